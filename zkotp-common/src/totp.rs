//! RFC 6238 time-based one-time passwords (HMAC-SHA1, 30 s step, 6 digits).

use std::{
    env,
    time::{SystemTime, UNIX_EPOCH},
};

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::{error::ZkOtpError, secret::RawSecret};

pub const TIME_STEP_SECS: u64 = 30;
pub const OTP_DIGITS: u32 = 6;
const OTP_MODULUS: u32 = 1_000_000;

pub const TIME_STEP_OVERRIDE_ENV: &str = "ZKOTP_TIME_STEP_OVERRIDE";
pub const TIME_STEP_SKEW_ENV: &str = "ZKOTP_TIME_STEP_SKEW";
/// Largest skew window honoured from the environment.
pub const MAX_TIME_STEP_SKEW: u64 = 10;

type HmacSha1 = Hmac<Sha1>;

/// HOTP value of `secret` at `counter` (RFC 4226 dynamic truncation).
pub fn hotp(secret: &RawSecret, counter: u64) -> Result<u32, ZkOtpError> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|err| ZkOtpError::Input(format!("unusable HMAC key: {err}")))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    Ok(binary % OTP_MODULUS)
}

/// TOTP value for an explicit time step.
pub fn totp(secret: &RawSecret, time_step: u64) -> Result<u32, ZkOtpError> {
    hotp(secret, time_step)
}

pub fn time_step_at(unix_secs: u64) -> u64 {
    unix_secs / TIME_STEP_SECS
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Six-digit, zero-padded display form of a code.
pub fn format_code(code: u32) -> String {
    format!("{code:0width$}", width = OTP_DIGITS as usize)
}

/// Parse a caller-supplied code: at most six ASCII digits.
pub fn parse_code(code: &str) -> Result<u32, ZkOtpError> {
    let trimmed = code.trim();
    if trimmed.is_empty()
        || trimmed.len() > OTP_DIGITS as usize
        || !trimmed.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(ZkOtpError::Input(format!(
            "otp code must be 1 to {OTP_DIGITS} decimal digits"
        )));
    }
    trimmed
        .parse::<u32>()
        .map_err(|err| ZkOtpError::Input(format!("invalid otp code: {err}")))
}

pub fn check_code_range(code: u64) -> Result<u32, ZkOtpError> {
    if code >= u64::from(OTP_MODULUS) {
        return Err(ZkOtpError::Input(format!(
            "otp code {code} exceeds {OTP_DIGITS} digits"
        )));
    }
    Ok(code as u32)
}

/// Source of the current time step, with an optional skew window.
#[derive(Clone, Debug, Default)]
pub struct TimeStepClock {
    step_override: Option<u64>,
    skew: u64,
}

impl TimeStepClock {
    pub fn system() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        Self {
            step_override: parse_env_u64(TIME_STEP_OVERRIDE_ENV),
            skew: parse_env_u64(TIME_STEP_SKEW_ENV)
                .unwrap_or(0)
                .min(MAX_TIME_STEP_SKEW),
        }
    }

    pub fn fixed(time_step: u64) -> Self {
        Self {
            step_override: Some(time_step),
            skew: 0,
        }
    }

    pub fn with_skew(mut self, skew: u64) -> Self {
        self.skew = skew.min(MAX_TIME_STEP_SKEW);
        self
    }

    pub fn skew(&self) -> u64 {
        self.skew
    }

    pub fn is_fixed(&self) -> bool {
        self.step_override.is_some()
    }

    pub fn current(&self) -> u64 {
        self.step_override
            .unwrap_or_else(|| time_step_at(unix_now()))
    }

    /// Steps to try for `now`: `now` first, then `now-1, now+1, ...` out to the skew.
    pub fn candidates(&self, now: u64) -> Vec<u64> {
        let mut steps = Vec::with_capacity(1 + 2 * self.skew as usize);
        steps.push(now);
        for delta in 1..=self.skew {
            if let Some(before) = now.checked_sub(delta) {
                steps.push(before);
            }
            if let Some(after) = now.checked_add(delta) {
                steps.push(after);
            }
        }
        steps
    }

    /// First candidate step whose TOTP equals `code`.
    pub fn matching_step(
        &self,
        secret: &RawSecret,
        code: u32,
        now: u64,
    ) -> Result<Option<u64>, ZkOtpError> {
        for step in self.candidates(now) {
            if totp(secret, step)? == code {
                return Ok(Some(step));
            }
        }
        Ok(None)
    }
}

fn parse_env_u64(var: &str) -> Option<u64> {
    env::var(var)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}
