//! Circuit input assembly.

use std::fmt;

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{
    action::ActionHash,
    error::ZkOtpError,
    field::{FieldElement, ReducedSecret, SecretBits},
    totp::check_code_range,
};

/// Fresh per-proof nonce.
pub fn generate_nonce() -> u64 {
    OsRng.next_u64()
}

/// Public half of the witness, in the order the circuit declares it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicInputs {
    pub hashed_secret: FieldElement,
    pub hashed_otp: FieldElement,
    pub time_step: u64,
    pub action_hash: FieldElement,
    pub tx_nonce: u64,
}

impl PublicInputs {
    pub const COUNT: usize = 5;

    /// Decimal field-element strings, circuit order.
    pub fn to_decimal_strings(&self) -> Vec<String> {
        vec![
            self.hashed_secret.to_decimal(),
            self.hashed_otp.to_decimal(),
            self.time_step.to_string(),
            self.action_hash.to_decimal(),
            self.tx_nonce.to_string(),
        ]
    }

    /// Field elements, circuit order.
    pub fn to_fields(&self) -> Vec<FieldElement> {
        vec![
            self.hashed_secret.clone(),
            self.hashed_otp.clone(),
            FieldElement::from(self.time_step),
            self.action_hash.clone(),
            FieldElement::from(self.tx_nonce),
        ]
    }
}

/// Everything the circuit consumes for one proof.
#[derive(Clone, PartialEq, Eq)]
pub struct CircuitInput {
    pub secret: FieldElement,
    pub secret_bits: SecretBits,
    pub otp_code: u32,
    pub public: PublicInputs,
}

impl CircuitInput {
    pub fn builder() -> CircuitInputBuilder {
        CircuitInputBuilder::default()
    }
}

impl fmt::Debug for CircuitInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitInput")
            .field("secret", &"<redacted>")
            .field("otp_code", &"<redacted>")
            .field("public", &self.public)
            .finish()
    }
}

#[derive(Default)]
pub struct CircuitInputBuilder {
    secret: Option<FieldElement>,
    secret_bits: Option<SecretBits>,
    otp_code: Option<u64>,
    hashed_secret: Option<FieldElement>,
    hashed_otp: Option<FieldElement>,
    time_step: Option<u64>,
    action_hash: Option<FieldElement>,
    tx_nonce: Option<u64>,
}

impl CircuitInputBuilder {
    pub fn reduced_secret(mut self, secret: ReducedSecret) -> Self {
        self.secret = Some(secret.field);
        self.secret_bits = Some(secret.bits);
        self
    }

    pub fn secret(mut self, secret: FieldElement) -> Self {
        self.secret = Some(secret);
        self
    }

    pub fn secret_bits(mut self, bits: SecretBits) -> Self {
        self.secret_bits = Some(bits);
        self
    }

    pub fn otp_code(mut self, code: u64) -> Self {
        self.otp_code = Some(code);
        self
    }

    pub fn hashed_secret(mut self, digest: FieldElement) -> Self {
        self.hashed_secret = Some(digest);
        self
    }

    pub fn hashed_otp(mut self, digest: FieldElement) -> Self {
        self.hashed_otp = Some(digest);
        self
    }

    pub fn time_step(mut self, step: u64) -> Self {
        self.time_step = Some(step);
        self
    }

    pub fn action_hash(mut self, hash: &ActionHash) -> Self {
        self.action_hash = Some(hash.to_field());
        self
    }

    pub fn action_hash_field(mut self, value: FieldElement) -> Self {
        self.action_hash = Some(value);
        self
    }

    pub fn tx_nonce(mut self, nonce: u64) -> Self {
        self.tx_nonce = Some(nonce);
        self
    }

    /// Validate and freeze the record. A missing nonce is generated here.
    pub fn build(self) -> Result<CircuitInput, ZkOtpError> {
        let secret = required(self.secret, "secret")?;
        let secret_bits = required(self.secret_bits, "secret_bits")?;
        let otp_code = check_code_range(required(self.otp_code, "otp_code")?)
            .map_err(|err| ZkOtpError::Assembly(err.to_string()))?;

        if secret_bits.to_integer() != *secret.as_biguint() {
            return Err(ZkOtpError::Assembly(
                "secret_bits do not decompose the field-reduced secret".into(),
            ));
        }

        let public = PublicInputs {
            hashed_secret: required(self.hashed_secret, "hashed_secret")?,
            hashed_otp: required(self.hashed_otp, "hashed_otp")?,
            time_step: required(self.time_step, "time_step")?,
            action_hash: required(self.action_hash, "action_hash")?,
            tx_nonce: self.tx_nonce.unwrap_or_else(generate_nonce),
        };

        Ok(CircuitInput {
            secret,
            secret_bits,
            otp_code,
            public,
        })
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ZkOtpError> {
    value.ok_or_else(|| ZkOtpError::Assembly(format!("missing field '{field}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        action::bind_action, commitment::CommitmentHasher, field::reduce_secret,
        secret::decode_secret,
    };

    fn complete() -> CircuitInputBuilder {
        let hasher = CommitmentHasher::new().unwrap();
        let reduced = reduce_secret(&decode_secret("JBSWY3DPEHPK3PXP").unwrap());
        let action = bind_action(
            "transferFunds",
            "0x000000000000000000000000000000000000dEaD",
            "1",
        )
        .unwrap();
        CircuitInput::builder()
            .hashed_secret(hasher.hash_secret(&reduced.field).unwrap())
            .hashed_otp(hasher.hash_otp(660_750).unwrap())
            .reduced_secret(reduced)
            .otp_code(660_750)
            .time_step(58_128_707)
            .action_hash(&action)
    }

    #[test]
    fn builds_with_generated_nonce() {
        let input = complete().build().unwrap();
        assert_eq!(input.otp_code, 660_750);
        assert_eq!(input.public.time_step, 58_128_707);
        assert_eq!(input.public.to_decimal_strings().len(), PublicInputs::COUNT);
    }

    #[test]
    fn explicit_nonce_is_kept() {
        let input = complete().tx_nonce(7).build().unwrap();
        assert_eq!(input.public.tx_nonce, 7);
        assert_eq!(input.public.to_decimal_strings()[4], "7");
    }

    #[test]
    fn missing_fields_are_assembly_errors() {
        let err = CircuitInput::builder().build().unwrap_err();
        assert!(matches!(err, ZkOtpError::Assembly(ref msg) if msg.contains("secret")));

        let reduced = reduce_secret(&decode_secret("JBSWY3DPEHPK3PXP").unwrap());
        let err = CircuitInput::builder()
            .reduced_secret(reduced)
            .otp_code(1)
            .build()
            .unwrap_err();
        assert!(matches!(err, ZkOtpError::Assembly(ref msg) if msg.contains("hashed_secret")));
    }

    #[test]
    fn out_of_range_code_is_rejected() {
        let err = complete().otp_code(1_000_000).build().unwrap_err();
        assert!(matches!(err, ZkOtpError::Assembly(_)));
    }

    #[test]
    fn bits_must_match_the_secret() {
        let err = complete()
            .secret(FieldElement::from(12345))
            .build()
            .unwrap_err();
        assert!(matches!(err, ZkOtpError::Assembly(ref msg) if msg.contains("secret_bits")));
    }

    #[test]
    fn debug_redacts_private_fields() {
        let rendered = format!("{:?}", complete().tx_nonce(1).build().unwrap());
        assert!(!rendered.contains("341881320659703961599727"));
        assert!(!rendered.contains("660750"));
    }
}
