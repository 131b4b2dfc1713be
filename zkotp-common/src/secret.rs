//! Base32 secret decoding.
//!
//! Authenticator secrets are RFC 4648 Base32, usually shown without padding
//! and sometimes grouped with spaces or dashes. Decoding normalises the text,
//! pads it to a multiple of eight characters and decodes it into the raw key
//! bytes used both as the HMAC key and as the big-endian secret integer.

use std::fmt;

use data_encoding::{Encoding, BASE32, BASE32_NOPAD};

use crate::error::ZkOtpError;

const BASE32_BLOCK: usize = 8;

/// Raw TOTP key bytes. Never logged; `Debug` only reports the length.
#[derive(Clone, PartialEq, Eq)]
pub struct RawSecret(Vec<u8>);

impl RawSecret {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, ZkOtpError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ZkOtpError::Decode("secret decodes to zero bytes".into()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Unpadded Base32 rendering, as authenticator apps display it.
    pub fn to_base32(&self) -> String {
        BASE32_NOPAD.encode(&self.0)
    }
}

impl fmt::Debug for RawSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawSecret(<{} bytes>)", self.0.len())
    }
}

/// Decode a Base32 secret into its raw bytes.
pub fn decode_secret(input: &str) -> Result<RawSecret, ZkOtpError> {
    let normalized = normalize(input);
    if normalized.is_empty() {
        return Err(ZkOtpError::Decode("secret is empty".into()));
    }

    let padded = pad_base32(&normalized);
    let bytes = lenient_base32()?
        .decode(padded.as_bytes())
        .map_err(|err| ZkOtpError::Decode(err.to_string()))?;
    RawSecret::from_bytes(bytes)
}

/// Append `=` until the length is a multiple of eight.
pub fn pad_base32(input: &str) -> String {
    let missing = (BASE32_BLOCK - input.len() % BASE32_BLOCK) % BASE32_BLOCK;
    let mut padded = String::with_capacity(input.len() + missing);
    padded.push_str(input);
    padded.extend(std::iter::repeat('=').take(missing));
    padded
}

fn normalize(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

// Authenticators accept secrets whose final symbol carries non-zero pad bits.
fn lenient_base32() -> Result<Encoding, ZkOtpError> {
    let mut spec = BASE32.specification();
    spec.check_trailing_bits = false;
    spec.encoding()
        .map_err(|err| ZkOtpError::Decode(format!("base32 alphabet setup failed: {err}")))
}
