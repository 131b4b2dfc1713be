//! The proof pipeline state machine.
//!
//! `Decode -> Reduce -> {Totp, Hash} -> Bind -> Assemble -> Compile -> Execute
//! -> Prove -> Format`. The stages up to `Assemble` are pure and run on the
//! caller's task; `Execute` and `Prove` hold a permit from a bounded pool and
//! run on a blocking worker under the configured timeout. The first failing
//! stage ends the run.

use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{sync::Semaphore, task, time};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;
use zkotp_common::{
    decode_secret, parse_code, reduce_secret, ActionDescriptor, ActionEncoding, ActionHash,
    AtStage, CircuitInput, CommitmentHasher, ProverToml, PublicInputs, Stage, StageError,
    TimeStepClock, ZkOtpError,
};

use crate::{
    backend::{CircuitBackend, CompiledCircuit, Deadline, RawProof},
    config::ProverConfig,
    format::{proof_hex, public_inputs_hex, to_bytes32_array},
};

// Grace period past the worker deadline before the async side gives up on it.
const TIMEOUT_GRACE: Duration = Duration::from_secs(2);

/// One proof request, as received from a caller.
#[derive(Clone)]
pub struct ProofRequest {
    /// Base32 TOTP secret.
    pub secret: String,
    /// Submitted one-time code, up to six digits.
    pub otp_code: String,
    /// Recipient address, `0x`-prefixed.
    pub to: String,
    /// Decimal or `0x`-hex amount.
    pub amount: String,
    pub tx_nonce: Option<u64>,
    /// Also return the proof split into `bytes32` segments.
    pub bytes32: bool,
    pub encoding: ActionEncoding,
}

impl std::fmt::Debug for ProofRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofRequest")
            .field("to", &self.to)
            .field("amount", &self.amount)
            .field("tx_nonce", &self.tx_nonce)
            .field("bytes32", &self.bytes32)
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

/// Everything derived before the toolchain is involved.
#[derive(Clone, Debug)]
pub struct PreparedProof {
    pub input: CircuitInput,
    pub action_hash: ActionHash,
    /// Whether the submitted code matched the TOTP at `time_step`.
    pub code_matched: bool,
}

/// Successful pipeline result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofOutput {
    pub job_id: String,
    pub proof_hex: String,
    pub public_inputs: Vec<String>,
    pub proof_bytes32: Option<Vec<String>>,
    pub time_step: u64,
    pub action_hash: String,
    pub tx_nonce: u64,
}

/// Run the pure stages: decode, reduce, TOTP, hash, bind and assemble.
///
/// A submitted code that matches no candidate time step is still assembled
/// (against the current step) so the circuit, not this function, rejects it.
pub fn prepare(
    request: &ProofRequest,
    hasher: &CommitmentHasher,
    clock: &TimeStepClock,
    action_name: &str,
) -> Result<PreparedProof, StageError> {
    let secret = decode_secret(&request.secret).at(Stage::Decode)?;
    let reduced = reduce_secret(&secret);

    let submitted = parse_code(&request.otp_code).at(Stage::Totp)?;
    let now = clock.current();
    let matched = clock
        .matching_step(&secret, submitted, now)
        .at(Stage::Totp)?;
    let time_step = matched.unwrap_or(now);
    if matched.is_none() {
        debug!(time_step, "submitted code matches no candidate time step");
    } else if time_step != now {
        debug!(time_step, now, "submitted code matched a skewed time step");
    }
    let expected = zkotp_common::totp(&secret, time_step).at(Stage::Totp)?;

    let hashed_secret = hasher.hash_secret(&reduced.field).at(Stage::Hash)?;
    let hashed_otp = hasher.hash_otp(expected).at(Stage::Hash)?;

    let action = ActionDescriptor::parse(action_name, &request.to, &request.amount)
        .at(Stage::Bind)?;
    let action_hash = action.hash(request.encoding);

    let mut builder = CircuitInput::builder()
        .reduced_secret(reduced)
        .otp_code(u64::from(submitted))
        .hashed_secret(hashed_secret)
        .hashed_otp(hashed_otp)
        .time_step(time_step)
        .action_hash(&action_hash);
    if let Some(nonce) = request.tx_nonce {
        builder = builder.tx_nonce(nonce);
    }
    let input = builder.build().at(Stage::Assemble)?;

    Ok(PreparedProof {
        input,
        action_hash,
        code_matched: matched.is_some(),
    })
}

/// Tracks the stage a blocking job has reached so a timeout can name it.
#[derive(Clone, Default)]
struct StageCursor(Arc<AtomicU8>);

impl StageCursor {
    const ORDER: [Stage; 2] = [Stage::Execute, Stage::Prove];

    fn enter(&self, stage: Stage) {
        if let Some(index) = Self::ORDER.iter().position(|s| *s == stage) {
            self.0.store(index as u8, Ordering::SeqCst);
        }
    }

    fn current(&self) -> Stage {
        Self::ORDER
            .get(self.0.load(Ordering::SeqCst) as usize)
            .copied()
            .unwrap_or(Stage::Prove)
    }
}

/// Drives requests through the pipeline against one compiled circuit.
#[derive(Clone)]
pub struct Orchestrator {
    backend: Arc<dyn CircuitBackend>,
    circuit: Arc<CompiledCircuit>,
    permits: Arc<Semaphore>,
    hasher: CommitmentHasher,
    clock: TimeStepClock,
    config: ProverConfig,
}

impl Orchestrator {
    /// Compile the circuit once. A failure here must stop the caller from serving.
    pub async fn start(
        backend: Arc<dyn CircuitBackend>,
        config: ProverConfig,
        clock: TimeStepClock,
    ) -> Result<Self, StageError> {
        let hasher = CommitmentHasher::new().at(Stage::Hash)?;
        let deadline = Deadline::after(config.proof_timeout);
        let compiler = backend.clone();
        let circuit = task::spawn_blocking(move || compiler.compile(deadline))
            .await
            .map_err(|err| ZkOtpError::CircuitCompile(format!("compile worker failed: {err}")))
            .and_then(|result| result)
            .at(Stage::Compile)?;
        info!(
            package = %circuit.package,
            fingerprint = %circuit.fingerprint,
            "circuit ready"
        );

        Ok(Self {
            backend,
            circuit: Arc::new(circuit),
            permits: Arc::new(Semaphore::new(config.max_concurrent_proofs.max(1))),
            hasher,
            clock,
            config,
        })
    }

    pub fn circuit(&self) -> &CompiledCircuit {
        &self.circuit
    }

    pub fn clock(&self) -> &TimeStepClock {
        &self.clock
    }

    pub fn hasher(&self) -> &CommitmentHasher {
        &self.hasher
    }

    pub fn config(&self) -> &ProverConfig {
        &self.config
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn prove(&self, request: ProofRequest) -> Result<ProofOutput, StageError> {
        let job_id = Uuid::new_v4().simple().to_string();
        let span = info_span!("proof", %job_id);
        self.run(job_id, request).instrument(span).await
    }

    async fn run(&self, job_id: String, request: ProofRequest) -> Result<ProofOutput, StageError> {
        let prepared = prepare(&request, &self.hasher, &self.clock, &self.config.action_name)?;
        let public = prepared.input.public.clone();
        info!(
            time_step = public.time_step,
            action_hash = %prepared.action_hash,
            code_matched = prepared.code_matched,
            "circuit input assembled"
        );

        let witness_file = ProverToml::from(&prepared.input);
        if let Some(dir) = &self.config.witness_debug_dir {
            write_debug_witness(dir, &job_id, &witness_file);
        }

        let raw = self.generate(&job_id, witness_file).await?;
        check_public_inputs(&raw, &public).at(Stage::Prove)?;

        let proof_bytes32 = request.bytes32.then(|| to_bytes32_array(&raw.proof));
        info!(proof_len = raw.proof.len(), "proof generated");
        Ok(ProofOutput {
            job_id,
            proof_hex: proof_hex(&raw.proof),
            public_inputs: public_inputs_hex(&raw.public_inputs),
            proof_bytes32,
            time_step: public.time_step,
            action_hash: prepared.action_hash.to_hex(),
            tx_nonce: public.tx_nonce,
        })
    }

    /// Execute and prove on a blocking worker, holding one permit.
    async fn generate(&self, job_id: &str, witness_file: ProverToml) -> Result<RawProof, StageError> {
        let deadline = Deadline::after(self.config.proof_timeout);
        let cursor = StageCursor::default();
        cursor.enter(Stage::Execute);

        // Waiting for a slot counts against the execute stage.
        let permit = match time::timeout(self.config.proof_timeout, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(err)) => {
                return Err(StageError::new(
                    Stage::Execute,
                    ZkOtpError::Proving(format!("proof slots closed: {err}")),
                ))
            }
            Err(_) => return Err(StageError::new(Stage::Execute, deadline.timeout_error())),
        };

        let backend = self.backend.clone();
        let circuit = self.circuit.clone();
        let verify = self.config.verify_proofs;
        let worker_cursor = cursor.clone();
        let worker_job = job_id.to_string();
        let span = tracing::Span::current();
        let job = task::spawn_blocking(move || {
            let _permit = permit;
            let _entered = span.enter();

            let witness = backend
                .execute(&circuit, &worker_job, &witness_file, deadline)
                .at(Stage::Execute)?;
            debug!(witness_len = witness.bytes.len(), "witness solved");

            worker_cursor.enter(Stage::Prove);
            let raw = backend.prove(&circuit, &witness, deadline).at(Stage::Prove)?;
            if verify {
                let accepted = backend.verify(&circuit, &raw, deadline).at(Stage::Prove)?;
                if !accepted {
                    return Err(StageError::new(
                        Stage::Prove,
                        ZkOtpError::Proving("backend rejected its own proof".into()),
                    ));
                }
                debug!("proof verified locally");
            }
            Ok(raw)
        });

        let budget = deadline.remaining().unwrap_or_default() + TIMEOUT_GRACE;
        match time::timeout(budget, job).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => Err(StageError::new(
                cursor.current(),
                ZkOtpError::Proving(format!("proof worker failed: {err}")),
            )),
            Err(_) => {
                warn!(stage = %cursor.current(), "proof job abandoned after timeout");
                Err(StageError::new(cursor.current(), deadline.timeout_error()))
            }
        }
    }
}

fn check_public_inputs(raw: &RawProof, expected: &PublicInputs) -> Result<(), ZkOtpError> {
    if raw.public_inputs != expected.to_fields() {
        return Err(ZkOtpError::Proving(format!(
            "backend returned {} public inputs that differ from the assembled witness",
            raw.public_inputs.len()
        )));
    }
    Ok(())
}

fn write_debug_witness(dir: &Path, job_id: &str, witness: &ProverToml) {
    let path = dir.join(format!("Prover-{job_id}.toml"));
    let result = fs::create_dir_all(dir)
        .map_err(|err| err.to_string())
        .and_then(|()| witness.render().map_err(|err| err.to_string()))
        .and_then(|text| fs::write(&path, text).map_err(|err| err.to_string()));
    match result {
        Ok(()) => debug!(path = %path.display(), "debug witness written"),
        Err(err) => warn!(path = %path.display(), error = %err, "failed to write debug witness"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkotp_common::{totp, FieldElement};

    const SECRET: &str = "JBSWY3DPEHPK3PXP";
    const TO: &str = "0x000000000000000000000000000000000000dEaD";

    fn request(code: &str) -> ProofRequest {
        ProofRequest {
            secret: SECRET.into(),
            otp_code: code.into(),
            to: TO.into(),
            amount: "1000000000000000000".into(),
            tx_nonce: Some(11),
            bytes32: false,
            encoding: ActionEncoding::Standard,
        }
    }

    #[test]
    fn prepare_binds_the_current_step() {
        let hasher = CommitmentHasher::new().unwrap();
        let clock = TimeStepClock::fixed(58_128_707);
        let prepared = prepare(&request("660750"), &hasher, &clock, "transferFunds").unwrap();
        assert!(prepared.code_matched);
        let public = &prepared.input.public;
        assert_eq!(public.time_step, 58_128_707);
        assert_eq!(public.tx_nonce, 11);
        assert_eq!(public.hashed_otp, hasher.hash_otp(660_750).unwrap());
        assert_eq!(
            prepared.action_hash.to_hex(),
            "0x1a7fe2e9e6d63889fe624dc87497eda186c935cb4bf9761b73d102a06417cfee"
        );
        assert_eq!(public.action_hash, prepared.action_hash.to_field());
    }

    #[test]
    fn wrong_code_is_still_assembled() {
        let hasher = CommitmentHasher::new().unwrap();
        let clock = TimeStepClock::fixed(58_128_707);
        let prepared = prepare(&request("000000"), &hasher, &clock, "transferFunds").unwrap();
        assert!(!prepared.code_matched);
        assert_eq!(prepared.input.otp_code, 0);
        assert_eq!(prepared.input.public.hashed_otp, hasher.hash_otp(660_750).unwrap());
    }

    #[test]
    fn skew_selects_the_matching_step() {
        let hasher = CommitmentHasher::new().unwrap();
        let secret = decode_secret(SECRET).unwrap();
        let previous = totp(&secret, 58_128_706).unwrap();
        let clock = TimeStepClock::fixed(58_128_707).with_skew(1);
        let prepared = prepare(
            &request(&zkotp_common::format_code(previous)),
            &hasher,
            &clock,
            "transferFunds",
        )
        .unwrap();
        assert!(prepared.code_matched);
        assert_eq!(prepared.input.public.time_step, 58_128_706);
    }

    #[test]
    fn failures_name_their_stage() {
        let hasher = CommitmentHasher::new().unwrap();
        let clock = TimeStepClock::fixed(1);

        let mut bad_secret = request("123456");
        bad_secret.secret = "JBSWY3DP1HPK3PXP".into();
        let err = prepare(&bad_secret, &hasher, &clock, "transferFunds").unwrap_err();
        assert_eq!(err.stage, Stage::Decode);
        assert!(err.source.is_caller_error());

        let err = prepare(&request("12345678"), &hasher, &clock, "transferFunds").unwrap_err();
        assert_eq!(err.stage, Stage::Totp);

        let mut bad_to = request("123456");
        bad_to.to = "0x1234".into();
        let err = prepare(&bad_to, &hasher, &clock, "transferFunds").unwrap_err();
        assert_eq!(err.stage, Stage::Bind);
        assert!(matches!(err.source, ZkOtpError::Encoding(_)));
    }

    #[test]
    fn public_input_mismatch_is_rejected() {
        let hasher = CommitmentHasher::new().unwrap();
        let prepared = prepare(
            &request("660750"),
            &hasher,
            &TimeStepClock::fixed(58_128_707),
            "transferFunds",
        )
        .unwrap();
        let mut fields = prepared.input.public.to_fields();
        let raw = RawProof {
            proof: vec![1],
            public_inputs: fields.clone(),
        };
        assert!(check_public_inputs(&raw, &prepared.input.public).is_ok());
        fields[2] = FieldElement::from(1);
        let tampered = RawProof {
            proof: vec![1],
            public_inputs: fields,
        };
        assert!(check_public_inputs(&tampered, &prepared.input.public).is_err());
    }

    #[test]
    fn debug_witness_lands_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let hasher = CommitmentHasher::new().unwrap();
        let prepared = prepare(
            &request("660750"),
            &hasher,
            &TimeStepClock::fixed(58_128_707),
            "transferFunds",
        )
        .unwrap();
        write_debug_witness(dir.path(), "job1", &ProverToml::from(&prepared.input));
        let written = fs::read_to_string(dir.path().join("Prover-job1.toml")).unwrap();
        assert!(written.contains("time_step = \"58128707\""));
    }

    #[test]
    fn request_debug_hides_secret_and_code() {
        let rendered = format!("{:?}", request("660750"));
        assert!(!rendered.contains(SECRET));
        assert!(!rendered.contains("660750"));
    }
}
