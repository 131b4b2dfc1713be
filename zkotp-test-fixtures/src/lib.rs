//! Shared test fixtures: golden vectors and an in-process circuit backend.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use once_cell::sync::OnceCell;
use zkotp_common::{
    decode_secret, totp, CircuitInput, CommitmentHasher, FieldElement, ProverToml, RawSecret,
    ZkOtpError,
};
use zkotp_prover::{CircuitBackend, CompiledCircuit, Deadline, RawProof, Witness};

pub mod golden {
    //! Reference values shared with circomlib and RFC 6238.

    /// Already field-reduced secret.
    pub const SECRET: &str =
        "8908205071745768956754940712577663823191824575165388703111402954146780104548";
    pub const OTP_CODE: u32 = 209_115;
    pub const TIME_STEP: u64 = 58_128_707;
    pub const HASHED_SECRET: &str =
        "15590790710182840606832013891373017168266054012021149761087856963999545435767";
    pub const HASHED_OTP: &str =
        "9296871482664815829572350227731615859613671321798777421412185744492749055678";

    /// RFC 6238 appendix B SHA-1 key, Base32.
    pub const RFC6238_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    /// Short authenticator-style secret.
    pub const DEMO_SECRET: &str = "JBSWY3DPEHPK3PXP";
    pub const DEMO_TIME_STEP: u64 = 58_128_707;
    pub const DEMO_OTP_CODE: u32 = 660_750;

    pub const RECIPIENT: &str = "0x000000000000000000000000000000000000dEaD";
    pub const AMOUNT_WEI: &str = "1000000000000000000";
    /// `keccak256(abi.encode("transferFunds", RECIPIENT, AMOUNT_WEI))`.
    pub const ACTION_HASH: &str =
        "0x1a7fe2e9e6d63889fe624dc87497eda186c935cb4bf9761b73d102a06417cfee";
}

const MOCK_PACKAGE: &str = "totp_auth_mock";
const PROOF_TAG: &[u8] = b"MOCKPROOF";
const POLL_INTERVAL: Duration = Duration::from_millis(10);

static FIXTURES: OnceCell<TestFixtures> = OnceCell::new();

/// Values computed once and reused across tests.
pub struct TestFixtures {
    hasher: CommitmentHasher,
    demo_secret: RawSecret,
}

impl TestFixtures {
    pub fn hasher(&self) -> &CommitmentHasher {
        &self.hasher
    }

    pub fn demo_secret(&self) -> &RawSecret {
        &self.demo_secret
    }

    /// Code an authenticator shows for the demo secret at `time_step`.
    pub fn demo_code(&self, time_step: u64) -> u32 {
        totp(&self.demo_secret, time_step).unwrap_or_default()
    }
}

pub fn fixtures() -> &'static TestFixtures {
    FIXTURES.get_or_init(|| TestFixtures {
        hasher: CommitmentHasher::new().unwrap_or_default(),
        demo_secret: decode_secret(golden::DEMO_SECRET)
            .unwrap_or_else(|err| panic!("demo secret must decode: {err}")),
    })
}

/// Fault to inject into [`MockCircuitBackend`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MockFault {
    #[default]
    None,
    /// `compile` fails.
    Compile,
    /// `prove` fails with a backend error.
    Proving,
    /// `verify` rejects every proof.
    RejectProofs,
    /// `prove` runs for this long, honouring the deadline.
    SlowProve(Duration),
    /// `prove` blocks for this long and only then looks at the deadline.
    StallProve(Duration),
}

/// In-process stand-in for the Noir toolchain.
///
/// `execute` enforces the same relations as the circuit: the Poseidon
/// commitments to the secret and to the submitted code, and the secret bit
/// decomposition. Proofs are a deterministic tag over the public inputs.
#[derive(Default)]
pub struct MockCircuitBackend {
    fault: Mutex<MockFault>,
    hasher: CommitmentHasher,
    executions: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl MockCircuitBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fault(fault: MockFault) -> Self {
        let backend = Self::default();
        backend.set_fault(fault);
        backend
    }

    pub fn shared(fault: MockFault) -> Arc<Self> {
        Arc::new(Self::with_fault(fault))
    }

    pub fn set_fault(&self, fault: MockFault) {
        if let Ok(mut current) = self.fault.lock() {
            *current = fault;
        }
    }

    fn fault(&self) -> MockFault {
        self.fault.lock().map(|fault| *fault).unwrap_or_default()
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous `prove` calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    fn check_constraints(&self, input: &CircuitInput) -> Result<(), ZkOtpError> {
        if self.hasher.hash_secret(&input.secret)? != input.public.hashed_secret {
            return Err(ZkOtpError::Witness(
                "constraint failed: poseidon(secret) != hashed_secret".into(),
            ));
        }
        if self.hasher.hash_otp(input.otp_code)? != input.public.hashed_otp {
            return Err(ZkOtpError::Witness(
                "constraint failed: poseidon(otp_code) != hashed_otp".into(),
            ));
        }
        Ok(())
    }
}

/// Deterministic mock proof bytes for a set of public inputs.
pub fn mock_proof(public_inputs: &[FieldElement]) -> Vec<u8> {
    let mut hasher = blake3::Hasher::new();
    for input in public_inputs {
        hasher.update(&input.to_be_bytes32());
    }
    let mut proof = PROOF_TAG.to_vec();
    proof.extend_from_slice(hasher.finalize().as_bytes());
    proof
}

impl CircuitBackend for MockCircuitBackend {
    fn compile(&self, _deadline: Deadline) -> Result<CompiledCircuit, ZkOtpError> {
        if self.fault() == MockFault::Compile {
            return Err(ZkOtpError::CircuitCompile(
                "src/main.nr: expected type Field".into(),
            ));
        }
        Ok(CompiledCircuit {
            package: MOCK_PACKAGE.to_string(),
            fingerprint: blake3::hash(MOCK_PACKAGE.as_bytes()).to_hex().to_string(),
            program_path: None,
            verification_key_path: None,
        })
    }

    fn execute(
        &self,
        _circuit: &CompiledCircuit,
        job_id: &str,
        inputs: &ProverToml,
        deadline: Deadline,
    ) -> Result<Witness, ZkOtpError> {
        deadline.check()?;
        self.executions.fetch_add(1, Ordering::SeqCst);
        let input = inputs
            .to_circuit_input()
            .map_err(|err| ZkOtpError::Witness(err.to_string()))?;
        self.check_constraints(&input)?;
        Ok(Witness {
            job_id: job_id.to_string(),
            bytes: inputs.render()?.into_bytes(),
        })
    }

    fn prove(
        &self,
        _circuit: &CompiledCircuit,
        witness: &Witness,
        deadline: Deadline,
    ) -> Result<RawProof, ZkOtpError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(active, Ordering::SeqCst);
        let result = self.prove_inner(witness, deadline);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn verify(
        &self,
        _circuit: &CompiledCircuit,
        proof: &RawProof,
        deadline: Deadline,
    ) -> Result<bool, ZkOtpError> {
        deadline.check()?;
        if self.fault() == MockFault::RejectProofs {
            return Ok(false);
        }
        Ok(proof.proof == mock_proof(&proof.public_inputs))
    }
}

impl MockCircuitBackend {
    fn prove_inner(&self, witness: &Witness, deadline: Deadline) -> Result<RawProof, ZkOtpError> {
        match self.fault() {
            MockFault::Proving => {
                return Err(ZkOtpError::Proving("out of memory allocating SRS".into()))
            }
            MockFault::SlowProve(duration) => {
                let mut waited = Duration::ZERO;
                while waited < duration {
                    deadline.check()?;
                    thread::sleep(POLL_INTERVAL);
                    waited += POLL_INTERVAL;
                }
            }
            MockFault::StallProve(duration) => thread::sleep(duration),
            _ => {}
        }
        deadline.check()?;

        let text = String::from_utf8(witness.bytes.clone())
            .map_err(|err| ZkOtpError::Proving(format!("corrupt witness: {err}")))?;
        let input = ProverToml::parse(&text)?.to_circuit_input()?;
        let public_inputs = input.public.to_fields();
        Ok(RawProof {
            proof: mock_proof(&public_inputs),
            public_inputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkotp_common::{reduce_secret, ReducedSecret};

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(30))
    }

    fn golden_witness(otp_code: u32) -> ProverToml {
        let hasher = fixtures().hasher();
        let secret = ReducedSecret::from_field(FieldElement::from_decimal(golden::SECRET).unwrap());
        let input = CircuitInput::builder()
            .hashed_secret(hasher.hash_secret(&secret.field).unwrap())
            .hashed_otp(hasher.hash_otp(golden::OTP_CODE).unwrap())
            .reduced_secret(secret)
            .otp_code(u64::from(otp_code))
            .time_step(golden::TIME_STEP)
            .action_hash_field(FieldElement::zero())
            .tx_nonce(1)
            .build()
            .unwrap();
        ProverToml::from(&input)
    }

    #[test]
    fn golden_commitments_match() {
        let toml = golden_witness(golden::OTP_CODE);
        assert_eq!(toml.public.hashed_secret, golden::HASHED_SECRET);
        assert_eq!(toml.public.hashed_otp, golden::HASHED_OTP);
    }

    #[test]
    fn execute_accepts_satisfying_witness() {
        let backend = MockCircuitBackend::new();
        let circuit = backend.compile(deadline()).unwrap();
        let witness = backend
            .execute(&circuit, "job", &golden_witness(golden::OTP_CODE), deadline())
            .unwrap();
        let proof = backend.prove(&circuit, &witness, deadline()).unwrap();
        assert!(backend.verify(&circuit, &proof, deadline()).unwrap());
        assert_eq!(backend.executions(), 1);
    }

    #[test]
    fn execute_rejects_wrong_code() {
        let backend = MockCircuitBackend::new();
        let circuit = backend.compile(deadline()).unwrap();
        let err = backend
            .execute(&circuit, "job", &golden_witness(123_456), deadline())
            .unwrap_err();
        assert!(matches!(err, ZkOtpError::Witness(ref msg) if msg.contains("hashed_otp")));
    }

    #[test]
    fn slow_prove_honours_deadline() {
        let backend = MockCircuitBackend::with_fault(MockFault::SlowProve(Duration::from_secs(5)));
        let circuit = backend.compile(deadline()).unwrap();
        let witness = backend
            .execute(&circuit, "job", &golden_witness(golden::OTP_CODE), deadline())
            .unwrap();
        let err = backend
            .prove(&circuit, &witness, Deadline::after(Duration::from_millis(50)))
            .unwrap_err();
        assert!(matches!(err, ZkOtpError::Timeout(_)));
    }

    #[test]
    fn demo_code_matches_reference() {
        assert_eq!(fixtures().demo_code(golden::DEMO_TIME_STEP), golden::DEMO_OTP_CODE);
        let reduced = reduce_secret(fixtures().demo_secret());
        assert_eq!(reduced.field.to_decimal(), "341881320659703961599727");
    }
}
