//! Boundary to the external circuit compiler/executor and proving backend.

use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use zkotp_common::{FieldElement, ProverToml, ZkOtpError};

/// Compiled circuit program, produced once and shared by every request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledCircuit {
    /// Package name from the project manifest.
    pub package: String,
    /// blake3 of the compiled program artifact.
    pub fingerprint: String,
    pub program_path: Option<PathBuf>,
    pub verification_key_path: Option<PathBuf>,
}

/// Solved witness for one job.
#[derive(Clone)]
pub struct Witness {
    pub job_id: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for Witness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Witness")
            .field("job_id", &self.job_id)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Proof bytes plus the public inputs the backend bound them to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawProof {
    pub proof: Vec<u8>,
    pub public_inputs: Vec<FieldElement>,
}

/// Wall-clock budget for one blocking proof job.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.budget.checked_sub(self.started.elapsed())
    }

    pub fn expired(&self) -> bool {
        self.remaining().map_or(true, |left| left.is_zero())
    }

    pub fn check(&self) -> Result<(), ZkOtpError> {
        if self.expired() {
            Err(self.timeout_error())
        } else {
            Ok(())
        }
    }

    pub fn timeout_error(&self) -> ZkOtpError {
        ZkOtpError::Timeout(self.budget)
    }
}

/// Opaque circuit toolchain. Implementations are blocking and are driven from
/// a worker thread; they must stop work and return [`ZkOtpError::Timeout`]
/// once the deadline passes.
pub trait CircuitBackend: Send + Sync {
    /// Compile the fixed circuit source and project manifest.
    fn compile(&self, deadline: Deadline) -> Result<CompiledCircuit, ZkOtpError>;

    /// Solve the witness. Unsatisfied constraints are [`ZkOtpError::Witness`].
    fn execute(
        &self,
        circuit: &CompiledCircuit,
        job_id: &str,
        inputs: &ProverToml,
        deadline: Deadline,
    ) -> Result<Witness, ZkOtpError>;

    fn prove(
        &self,
        circuit: &CompiledCircuit,
        witness: &Witness,
        deadline: Deadline,
    ) -> Result<RawProof, ZkOtpError>;

    /// Independent local check; `Ok(false)` means the proof was rejected.
    fn verify(
        &self,
        circuit: &CompiledCircuit,
        proof: &RawProof,
        deadline: Deadline,
    ) -> Result<bool, ZkOtpError>;
}
