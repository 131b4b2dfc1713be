//! Pure stages of the TOTP-bound proof pipeline.
//!
//! Decode -> Reduce -> {Totp, Hash} -> Bind -> Assemble. Each stage is a
//! plain function (or a small explicitly constructed service) of its inputs;
//! orchestration against the external circuit toolchain lives in
//! `zkotp-prover`.

pub mod action;
pub mod commitment;
pub mod error;
pub mod field;
pub mod input;
pub mod secret;
pub mod totp;
pub mod witness;

pub use action::{
    bind_action, ActionDescriptor, ActionEncoding, ActionHash, Address, Amount,
    DEFAULT_ACTION_NAME,
};
pub use commitment::CommitmentHasher;
pub use error::{AtStage, Stage, StageError, ZkOtpError};
pub use field::{
    bits_to_field, reduce_secret, FieldElement, ReducedSecret, SecretBits, BN254_MODULUS_DEC,
};
pub use input::{generate_nonce, CircuitInput, CircuitInputBuilder, PublicInputs};
pub use secret::{decode_secret, pad_base32, RawSecret};
pub use totp::{format_code, parse_code, time_step_at, totp, TimeStepClock, TIME_STEP_SECS};
pub use witness::ProverToml;
