// zkotp-prover/src/lib.rs

//! Proof orchestration over an external circuit toolchain.

pub mod backend;
pub mod config;
pub mod format;
pub mod nargo;
pub mod pipeline;

pub use backend::{CircuitBackend, CompiledCircuit, Deadline, RawProof, Witness};
pub use config::ProverConfig;
pub use format::{proof_hex, public_inputs_hex, to_bytes32, to_bytes32_array};
pub use nargo::NargoBackend;
pub use pipeline::{prepare, Orchestrator, PreparedProof, ProofOutput, ProofRequest};
