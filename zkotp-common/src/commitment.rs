//! Poseidon commitments to the secret and the one-time code.
//!
//! Uses the circom-compatible BN254 parameter set (x^5 S-box, width 2 for a
//! single input), so digests agree with circomlib and the Noir stdlib
//! `poseidon::bn254::hash_1`.

use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonError, PoseidonHasher};

use crate::{error::ZkOtpError, field::FieldElement};

/// Single-input Poseidon hasher over BN254.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommitmentHasher;

impl CommitmentHasher {
    /// Builds the parameter set once so configuration faults surface at startup.
    pub fn new() -> Result<Self, ZkOtpError> {
        poseidon().map_err(hash_error)?;
        Ok(Self)
    }

    pub fn hash(&self, value: &FieldElement) -> Result<FieldElement, ZkOtpError> {
        let mut hasher = poseidon().map_err(hash_error)?;
        let digest = hasher.hash(&[value.to_fr()]).map_err(hash_error)?;
        Ok(FieldElement::from_fr(&digest))
    }

    /// `H(secret)` over the field-reduced secret.
    pub fn hash_secret(&self, secret: &FieldElement) -> Result<FieldElement, ZkOtpError> {
        self.hash(secret)
    }

    /// `H(otp)` with the code taken as a plain integer (no zero padding).
    pub fn hash_otp(&self, code: u32) -> Result<FieldElement, ZkOtpError> {
        self.hash(&FieldElement::from(u64::from(code)))
    }
}

fn poseidon() -> Result<Poseidon<Fr>, PoseidonError> {
    Poseidon::<Fr>::new_circom(1)
}

fn hash_error(err: PoseidonError) -> ZkOtpError {
    ZkOtpError::Proving(format!("poseidon: {err}"))
}
