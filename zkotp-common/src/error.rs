//! Error taxonomy shared by every pipeline stage.

use std::{fmt, time::Duration};

use thiserror::Error;

/// Aggregated error type for the proof pipeline.
#[derive(Debug, Error)]
pub enum ZkOtpError {
    /// Base32 secret could not be decoded.
    #[error("invalid base32 secret: {0}")]
    Decode(String),

    /// Missing or malformed caller input.
    #[error("invalid input: {0}")]
    Input(String),

    /// ABI type/width mismatch while binding the action.
    #[error("action encoding error: {0}")]
    Encoding(String),

    /// Circuit input record is incomplete or has the wrong shape.
    #[error("circuit input assembly failed: {0}")]
    Assembly(String),

    /// Circuit source or manifest could not be compiled.
    #[error("circuit compilation failed: {0}")]
    CircuitCompile(String),

    /// Inputs do not satisfy the circuit constraints.
    #[error("witness generation failed: {0}")]
    Witness(String),

    /// Proving backend fault (resources, internal error).
    #[error("proving backend error: {0}")]
    Proving(String),

    /// Proof attempt abandoned after the caller's deadline.
    #[error("proof generation timed out after {0:?}")]
    Timeout(Duration),
}

impl ZkOtpError {
    /// Errors caused by the caller's input; never retryable.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ZkOtpError::Decode(_) | ZkOtpError::Input(_) | ZkOtpError::Encoding(_)
        )
    }

    /// Whether the caller may resubmit the identical request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ZkOtpError::Proving(_) | ZkOtpError::Timeout(_))
    }

    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            ZkOtpError::Decode(_) => "SECRET_DECODE_FAILED",
            ZkOtpError::Input(_) => "INPUT_INVALID",
            ZkOtpError::Encoding(_) => "ACTION_ENCODING_FAILED",
            ZkOtpError::Assembly(_) => "CIRCUIT_INPUT_INVALID",
            ZkOtpError::CircuitCompile(_) => "CIRCUIT_COMPILE_FAILED",
            ZkOtpError::Witness(_) => "WITNESS_UNSATISFIED",
            ZkOtpError::Proving(_) => "PROVING_FAILED",
            ZkOtpError::Timeout(_) => "PROOF_TIMEOUT",
        }
    }
}

/// Pipeline stages in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Decode,
    Reduce,
    Totp,
    Hash,
    Bind,
    Assemble,
    Compile,
    Execute,
    Prove,
    Format,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Decode => "decode",
            Stage::Reduce => "reduce",
            Stage::Totp => "totp",
            Stage::Hash => "hash",
            Stage::Bind => "bind",
            Stage::Assemble => "assemble",
            Stage::Compile => "compile",
            Stage::Execute => "execute",
            Stage::Prove => "prove",
            Stage::Format => "format",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of the pipeline: the stage that failed and why.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: ZkOtpError,
}

impl StageError {
    pub fn new(stage: Stage, source: ZkOtpError) -> Self {
        Self { stage, source }
    }
}

/// Attach a stage to a stage-local result.
pub trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T, ZkOtpError> {
    fn at(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|source| StageError::new(stage, source))
    }
}
