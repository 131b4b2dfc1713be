//! `Prover.toml` witness file: render and parse.
//!
//! Every numeric value is a decimal string and the secret bits are a 16x32
//! matrix of `"0"`/`"1"` strings, the shape the circuit's ABI expects.

use serde::{Deserialize, Serialize};

use crate::{
    error::ZkOtpError,
    field::{FieldElement, SecretBits},
    input::CircuitInput,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProverToml {
    pub private: PrivateSection,
    pub public: PublicSection,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateSection {
    #[serde(alias = "secret_raw")]
    pub secret: String,
    pub secret_bits: Vec<Vec<String>>,
    pub otp_code: String,
}

impl std::fmt::Debug for PrivateSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateSection(<redacted>)")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicSection {
    pub hashed_secret: String,
    pub hashed_otp: String,
    pub time_step: String,
    pub action_hash: String,
    pub tx_nonce: String,
}

impl From<&CircuitInput> for ProverToml {
    fn from(input: &CircuitInput) -> Self {
        let public = &input.public;
        Self {
            private: PrivateSection {
                secret: input.secret.to_decimal(),
                secret_bits: input.secret_bits.rows(),
                otp_code: input.otp_code.to_string(),
            },
            public: PublicSection {
                hashed_secret: public.hashed_secret.to_decimal(),
                hashed_otp: public.hashed_otp.to_decimal(),
                time_step: public.time_step.to_string(),
                action_hash: public.action_hash.to_decimal(),
                tx_nonce: public.tx_nonce.to_string(),
            },
        }
    }
}

impl ProverToml {
    pub fn render(&self) -> Result<String, ZkOtpError> {
        toml::to_string(self)
            .map_err(|err| ZkOtpError::Assembly(format!("failed to render Prover.toml: {err}")))
    }

    pub fn parse(text: &str) -> Result<Self, ZkOtpError> {
        toml::from_str(text)
            .map_err(|err| ZkOtpError::Assembly(format!("failed to parse Prover.toml: {err}")))
    }

    /// Re-validate a parsed witness file into a circuit input.
    pub fn to_circuit_input(&self) -> Result<CircuitInput, ZkOtpError> {
        CircuitInput::builder()
            .secret(field(&self.private.secret, "secret")?)
            .secret_bits(SecretBits::from_rows(&self.private.secret_bits)?)
            .otp_code(integer(&self.private.otp_code, "otp_code")?)
            .hashed_secret(field(&self.public.hashed_secret, "hashed_secret")?)
            .hashed_otp(field(&self.public.hashed_otp, "hashed_otp")?)
            .time_step(integer(&self.public.time_step, "time_step")?)
            .action_hash_field(field(&self.public.action_hash, "action_hash")?)
            .tx_nonce(integer(&self.public.tx_nonce, "tx_nonce")?)
            .build()
    }
}

fn field(value: &str, name: &str) -> Result<FieldElement, ZkOtpError> {
    FieldElement::from_decimal(value)
        .map_err(|err| ZkOtpError::Assembly(format!("{name}: {err}")))
}

fn integer(value: &str, name: &str) -> Result<u64, ZkOtpError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|err| ZkOtpError::Assembly(format!("{name} '{value}': {err}")))
}
