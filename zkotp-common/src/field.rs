//! BN254 scalar-field reduction and the secret bit decomposition.

use std::{fmt, str::FromStr};

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::{error::ZkOtpError, secret::RawSecret};

/// BN254 scalar field modulus `P`, decimal.
pub const BN254_MODULUS_DEC: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

/// Width of the secret bit decomposition.
pub const SECRET_BITS: usize = 512;
/// Bits per chunk handed to the circuit.
pub const SECRET_CHUNK_BITS: usize = 32;
/// Number of chunks (`SECRET_BITS / SECRET_CHUNK_BITS`).
pub const SECRET_CHUNKS: usize = SECRET_BITS / SECRET_CHUNK_BITS;

pub fn modulus() -> BigUint {
    BigUint::from_bytes_be(&Fr::MODULUS.to_bytes_be())
}

/// Canonical representative of a BN254 scalar, always `< P`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FieldElement(BigUint);

impl FieldElement {
    pub fn zero() -> Self {
        Self(BigUint::default())
    }

    /// Reduce an arbitrary unsigned integer modulo `P`.
    pub fn reduce(value: &BigUint) -> Self {
        Self(value % modulus())
    }

    /// Big-endian bytes, reduced modulo `P`.
    pub fn from_be_bytes_mod_order(bytes: &[u8]) -> Self {
        Self::reduce(&BigUint::from_bytes_be(bytes))
    }

    /// Accept an already canonical value; rejects anything `>= P`.
    pub fn from_canonical(value: BigUint) -> Result<Self, ZkOtpError> {
        if value >= modulus() {
            return Err(ZkOtpError::Input(format!(
                "value {value} is not a canonical BN254 scalar"
            )));
        }
        Ok(Self(value))
    }

    /// Big-endian bytes that must already be canonical.
    pub fn from_be_bytes_canonical(bytes: &[u8]) -> Result<Self, ZkOtpError> {
        Self::from_canonical(BigUint::from_bytes_be(bytes))
    }

    pub fn from_decimal(value: &str) -> Result<Self, ZkOtpError> {
        let trimmed = value.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ZkOtpError::Input(format!(
                "expected a decimal field element, got '{value}'"
            )));
        }
        let parsed = BigUint::parse_bytes(trimmed.as_bytes(), 10)
            .ok_or_else(|| ZkOtpError::Input(format!("invalid decimal '{value}'")))?;
        Self::from_canonical(parsed)
    }

    pub fn from_fr(fr: &Fr) -> Self {
        Self(BigUint::from_bytes_be(&fr.into_bigint().to_bytes_be()))
    }

    pub fn to_fr(&self) -> Fr {
        Fr::from_be_bytes_mod_order(&self.0.to_bytes_be())
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    pub fn to_decimal(&self) -> String {
        self.0.to_str_radix(10)
    }

    /// 32-byte big-endian encoding.
    pub fn to_be_bytes32(&self) -> [u8; 32] {
        let bytes = self.0.to_bytes_be();
        let mut out = [0u8; 32];
        // Canonical values are below 2^254, so they always fit.
        out[32 - bytes.len()..].copy_from_slice(&bytes);
        out
    }

    /// `0x`-prefixed, zero-padded 32-byte hex (`bytes32` form).
    pub fn to_bytes32_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_be_bytes32()))
    }
}

impl From<u64> for FieldElement {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl FromStr for FieldElement {
    type Err = ZkOtpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_decimal(s)
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldElement({})", self.0)
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_decimal())
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_decimal(&raw).map_err(de::Error::custom)
    }
}

/// 512-bit LSB-first decomposition of the secret, 16 chunks of 32 bits.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretBits([[u8; SECRET_CHUNK_BITS]; SECRET_CHUNKS]);

impl SecretBits {
    /// Bit `i` of `value` for `i < 8 * byte_len`, zero beyond.
    pub fn decompose(value: &BigUint, byte_len: usize) -> Self {
        let significant = byte_len.saturating_mul(8).min(SECRET_BITS);
        let mut chunks = [[0u8; SECRET_CHUNK_BITS]; SECRET_CHUNKS];
        for index in 0..significant {
            if value.bit(index as u64) {
                chunks[index / SECRET_CHUNK_BITS][index % SECRET_CHUNK_BITS] = 1;
            }
        }
        Self(chunks)
    }

    /// Parse a 16x32 matrix of `"0"`/`"1"` strings.
    pub fn from_rows<S: AsRef<str>>(rows: &[Vec<S>]) -> Result<Self, ZkOtpError> {
        if rows.len() != SECRET_CHUNKS {
            return Err(ZkOtpError::Assembly(format!(
                "secret_bits must have {SECRET_CHUNKS} rows, got {}",
                rows.len()
            )));
        }
        let mut chunks = [[0u8; SECRET_CHUNK_BITS]; SECRET_CHUNKS];
        for (row_index, row) in rows.iter().enumerate() {
            if row.len() != SECRET_CHUNK_BITS {
                return Err(ZkOtpError::Assembly(format!(
                    "secret_bits row {row_index} must have {SECRET_CHUNK_BITS} entries, got {}",
                    row.len()
                )));
            }
            for (bit_index, bit) in row.iter().enumerate() {
                chunks[row_index][bit_index] = match bit.as_ref().trim() {
                    "0" => 0,
                    "1" => 1,
                    other => {
                        return Err(ZkOtpError::Assembly(format!(
                            "secret_bits[{row_index}][{bit_index}] is '{other}', expected 0 or 1"
                        )))
                    }
                };
            }
        }
        Ok(Self(chunks))
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.0
            .iter()
            .map(|chunk| chunk.iter().map(|bit| bit.to_string()).collect())
            .collect()
    }

    pub fn chunks(&self) -> &[[u8; SECRET_CHUNK_BITS]; SECRET_CHUNKS] {
        &self.0
    }

    /// Recompose the (unreduced) integer the bits describe.
    pub fn to_integer(&self) -> BigUint {
        let mut value = BigUint::default();
        for (index, bit) in self.0.iter().flatten().enumerate() {
            if *bit == 1 {
                value.set_bit(index as u64, true);
            }
        }
        value
    }
}

impl fmt::Debug for SecretBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBits(<redacted>)")
    }
}

/// The secret in both representations the circuit consumes.
#[derive(Clone, PartialEq, Eq)]
pub struct ReducedSecret {
    pub field: FieldElement,
    pub bits: SecretBits,
}

impl ReducedSecret {
    /// From an already-reduced value; bits span its minimal byte length.
    pub fn from_field(field: FieldElement) -> Self {
        let byte_len = field.as_biguint().to_bytes_be().len();
        let bits = SecretBits::decompose(field.as_biguint(), byte_len);
        Self { field, bits }
    }
}

impl fmt::Debug for ReducedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReducedSecret(<redacted>)")
    }
}

/// The raw secret as an unsigned big-endian integer.
pub fn secret_integer(secret: &RawSecret) -> BigUint {
    BigUint::from_bytes_be(secret.as_bytes())
}

/// Reduce the secret into the scalar field and decompose that same value.
pub fn reduce_secret(secret: &RawSecret) -> ReducedSecret {
    let field = FieldElement::reduce(&secret_integer(secret));
    let bits = SecretBits::decompose(field.as_biguint(), secret.len());
    ReducedSecret { field, bits }
}

/// Field element described by a 16x32 LSB-first bit matrix, reduced mod `P`.
pub fn bits_to_field(bits: &SecretBits) -> FieldElement {
    FieldElement::reduce(&bits.to_integer())
}
