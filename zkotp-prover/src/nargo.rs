//! Noir (`nargo`) + Barretenberg (`bb`) command-line backend.

use std::{
    fs,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    thread,
    time::Duration,
};

use tracing::{debug, warn};
use zkotp_common::{FieldElement, ProverToml, ZkOtpError};

use crate::{
    backend::{CircuitBackend, CompiledCircuit, Deadline, RawProof, Witness},
    config::ProverConfig,
};

const MANIFEST_FILE: &str = "Nargo.toml";
const TARGET_DIR: &str = "target";
const VK_FILE: &str = "vk";
const PROOF_FILE: &str = "proof";
const PUBLIC_INPUTS_FILE: &str = "public_inputs";
const WITNESS_FILE: &str = "witness.gz";
const FIELD_BYTES: usize = 32;
const POLL_INTERVAL: Duration = Duration::from_millis(25);
const STDERR_TAIL: usize = 512;
/// Lowercased fragments nargo prints when the inputs do not satisfy the circuit.
const UNSATISFIED_MARKERS: [&str; 4] = [
    "failed constraint",
    "cannot satisfy constraint",
    "failed assertion",
    "assertion failed",
];

/// Drives the Noir toolchain through child processes.
#[derive(Clone, Debug)]
pub struct NargoBackend {
    circuit_dir: PathBuf,
    nargo_bin: PathBuf,
    bb_bin: PathBuf,
}

#[derive(Debug)]
struct CommandOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    fn failure_summary(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        let tail_start = text
            .char_indices()
            .rev()
            .nth(STDERR_TAIL)
            .map_or(0, |(index, _)| index);
        format!("{} ({})", &text[tail_start..], self.status)
    }

    /// Whether a failed `nargo execute` rejected the witness, as opposed to
    /// the toolchain itself failing.
    fn is_unsatisfied(&self) -> bool {
        let stderr = self.stderr.to_lowercase();
        let stdout = self.stdout.to_lowercase();
        UNSATISFIED_MARKERS
            .iter()
            .any(|marker| stderr.contains(marker) || stdout.contains(marker))
    }

    fn execute_error(&self) -> ZkOtpError {
        if self.is_unsatisfied() {
            ZkOtpError::Witness(self.failure_summary())
        } else {
            ZkOtpError::Proving(format!("nargo execute failed: {}", self.failure_summary()))
        }
    }
}

impl NargoBackend {
    pub fn new(circuit_dir: impl Into<PathBuf>, nargo_bin: impl Into<PathBuf>, bb_bin: impl Into<PathBuf>) -> Self {
        Self {
            circuit_dir: circuit_dir.into(),
            nargo_bin: nargo_bin.into(),
            bb_bin: bb_bin.into(),
        }
    }

    pub fn from_config(config: &ProverConfig) -> Self {
        Self::new(&config.circuit_dir, &config.nargo_bin, &config.bb_bin)
    }

    pub fn circuit_dir(&self) -> &Path {
        &self.circuit_dir
    }

    fn target_dir(&self) -> PathBuf {
        self.circuit_dir.join(TARGET_DIR)
    }

    /// `[package] name` from the project manifest.
    fn package_name(&self) -> Result<String, ZkOtpError> {
        let manifest_path = self.circuit_dir.join(MANIFEST_FILE);
        let text = fs::read_to_string(&manifest_path).map_err(|err| {
            ZkOtpError::CircuitCompile(format!("failed to read {}: {err}", manifest_path.display()))
        })?;
        let manifest: toml::Value = toml::from_str(&text).map_err(|err| {
            ZkOtpError::CircuitCompile(format!("invalid {}: {err}", manifest_path.display()))
        })?;
        manifest
            .get("package")
            .and_then(|package| package.get("name"))
            .and_then(toml::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ZkOtpError::CircuitCompile(format!(
                    "{} has no [package] name",
                    manifest_path.display()
                ))
            })
    }

    /// Run a child to completion, killing it if the deadline passes first.
    fn run(
        &self,
        mut command: Command,
        deadline: Deadline,
        spawn_error: fn(String) -> ZkOtpError,
    ) -> Result<CommandOutput, ZkOtpError> {
        deadline.check()?;
        let mut stdout_file = tempfile::tempfile().map_err(|err| spawn_error(err.to_string()))?;
        let mut stderr_file = tempfile::tempfile().map_err(|err| spawn_error(err.to_string()))?;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(
                stdout_file.try_clone().map_err(|err| spawn_error(err.to_string()))?,
            ))
            .stderr(Stdio::from(
                stderr_file.try_clone().map_err(|err| spawn_error(err.to_string()))?,
            ));

        debug!(command = ?command, "spawning circuit toolchain");
        let mut child = command
            .spawn()
            .map_err(|err| spawn_error(format!("failed to spawn {:?}: {err}", command.get_program())))?;

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if deadline.expired() => {
                    warn!(program = ?command.get_program(), "deadline passed; killing child");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(deadline.timeout_error());
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    let _ = child.kill();
                    return Err(spawn_error(format!("failed to wait for child: {err}")));
                }
            }
        };

        Ok(CommandOutput {
            status,
            stdout: read_captured(&mut stdout_file),
            stderr: read_captured(&mut stderr_file),
        })
    }
}

fn read_captured(file: &mut fs::File) -> String {
    let mut text = String::new();
    if file.seek(SeekFrom::Start(0)).is_ok() {
        let mut bytes = Vec::new();
        if file.read_to_end(&mut bytes).is_ok() {
            text = String::from_utf8_lossy(&bytes).into_owned();
        }
    }
    text
}

fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove job file");
        }
    }
}

fn required_path<'a>(path: &'a Option<PathBuf>, what: &str) -> Result<&'a Path, ZkOtpError> {
    path.as_deref()
        .ok_or_else(|| ZkOtpError::Proving(format!("compiled circuit has no {what}")))
}

/// Split a `public_inputs` file into 32-byte field elements.
pub fn parse_public_inputs(bytes: &[u8]) -> Result<Vec<FieldElement>, ZkOtpError> {
    if bytes.len() % FIELD_BYTES != 0 {
        return Err(ZkOtpError::Proving(format!(
            "public inputs are {} bytes, not a multiple of {FIELD_BYTES}",
            bytes.len()
        )));
    }
    bytes
        .chunks(FIELD_BYTES)
        .map(|chunk| {
            FieldElement::from_be_bytes_canonical(chunk)
                .map_err(|err| ZkOtpError::Proving(format!("public input out of range: {err}")))
        })
        .collect()
}

impl CircuitBackend for NargoBackend {
    fn compile(&self, deadline: Deadline) -> Result<CompiledCircuit, ZkOtpError> {
        let package = self.package_name()?;

        let mut compile = Command::new(&self.nargo_bin);
        compile.arg("compile").current_dir(&self.circuit_dir);
        let output = self.run(compile, deadline, ZkOtpError::CircuitCompile)?;
        if !output.status.success() {
            return Err(ZkOtpError::CircuitCompile(output.failure_summary()));
        }

        let program_path = self.target_dir().join(format!("{package}.json"));
        let program = fs::read(&program_path).map_err(|err| {
            ZkOtpError::CircuitCompile(format!("failed to read {}: {err}", program_path.display()))
        })?;
        let fingerprint = blake3::hash(&program).to_hex().to_string();

        let mut write_vk = Command::new(&self.bb_bin);
        write_vk
            .arg("write_vk")
            .arg("-b")
            .arg(&program_path)
            .arg("-o")
            .arg(self.target_dir());
        let output = self.run(write_vk, deadline, ZkOtpError::CircuitCompile)?;
        if !output.status.success() {
            return Err(ZkOtpError::CircuitCompile(format!(
                "verification key: {}",
                output.failure_summary()
            )));
        }

        debug!(%package, %fingerprint, "circuit compiled");
        Ok(CompiledCircuit {
            package,
            fingerprint,
            program_path: Some(program_path),
            verification_key_path: Some(self.target_dir().join(VK_FILE)),
        })
    }

    fn execute(
        &self,
        _circuit: &CompiledCircuit,
        job_id: &str,
        inputs: &ProverToml,
        deadline: Deadline,
    ) -> Result<Witness, ZkOtpError> {
        let prover_name = format!("Prover-{job_id}");
        let prover_path = self.circuit_dir.join(format!("{prover_name}.toml"));
        let witness_path = self.target_dir().join(format!("{job_id}.gz"));

        fs::write(&prover_path, inputs.render()?).map_err(|err| {
            ZkOtpError::Proving(format!("failed to write {}: {err}", prover_path.display()))
        })?;

        let mut execute = Command::new(&self.nargo_bin);
        execute
            .arg("execute")
            .arg("--prover-name")
            .arg(&prover_name)
            .arg(job_id)
            .current_dir(&self.circuit_dir);
        let result = self.run(execute, deadline, ZkOtpError::Proving);
        remove_quietly(&prover_path);
        let output = match result {
            Ok(output) => output,
            Err(err) => {
                remove_quietly(&witness_path);
                return Err(err);
            }
        };

        if !output.status.success() {
            remove_quietly(&witness_path);
            return Err(output.execute_error());
        }

        let bytes = fs::read(&witness_path).map_err(|err| {
            ZkOtpError::Proving(format!("failed to read {}: {err}", witness_path.display()))
        });
        remove_quietly(&witness_path);
        Ok(Witness {
            job_id: job_id.to_string(),
            bytes: bytes?,
        })
    }

    fn prove(
        &self,
        circuit: &CompiledCircuit,
        witness: &Witness,
        deadline: Deadline,
    ) -> Result<RawProof, ZkOtpError> {
        let program_path = required_path(&circuit.program_path, "program")?;
        let job_dir = tempfile::Builder::new()
            .prefix(&format!("zkotp-{}-", witness.job_id))
            .tempdir()
            .map_err(|err| ZkOtpError::Proving(format!("failed to create job dir: {err}")))?;
        let witness_path = job_dir.path().join(WITNESS_FILE);
        fs::write(&witness_path, &witness.bytes)
            .map_err(|err| ZkOtpError::Proving(format!("failed to stage witness: {err}")))?;

        let mut prove = Command::new(&self.bb_bin);
        prove
            .arg("prove")
            .arg("-b")
            .arg(program_path)
            .arg("-w")
            .arg(&witness_path)
            .arg("-o")
            .arg(job_dir.path());
        let output = self.run(prove, deadline, ZkOtpError::Proving)?;
        if !output.status.success() {
            return Err(ZkOtpError::Proving(output.failure_summary()));
        }

        let proof = fs::read(job_dir.path().join(PROOF_FILE))
            .map_err(|err| ZkOtpError::Proving(format!("failed to read proof: {err}")))?;
        let public_inputs = fs::read(job_dir.path().join(PUBLIC_INPUTS_FILE))
            .map_err(|err| ZkOtpError::Proving(format!("failed to read public inputs: {err}")))?;

        Ok(RawProof {
            proof,
            public_inputs: parse_public_inputs(&public_inputs)?,
        })
    }

    fn verify(
        &self,
        circuit: &CompiledCircuit,
        proof: &RawProof,
        deadline: Deadline,
    ) -> Result<bool, ZkOtpError> {
        let vk_path = required_path(&circuit.verification_key_path, "verification key")?;
        let job_dir = tempfile::tempdir()
            .map_err(|err| ZkOtpError::Proving(format!("failed to create verify dir: {err}")))?;
        let proof_path = job_dir.path().join(PROOF_FILE);
        let inputs_path = job_dir.path().join(PUBLIC_INPUTS_FILE);
        let inputs: Vec<u8> = proof
            .public_inputs
            .iter()
            .flat_map(FieldElement::to_be_bytes32)
            .collect();
        fs::write(&proof_path, &proof.proof)
            .and_then(|()| fs::write(&inputs_path, inputs))
            .map_err(|err| ZkOtpError::Proving(format!("failed to stage proof: {err}")))?;

        let mut verify = Command::new(&self.bb_bin);
        verify
            .arg("verify")
            .arg("-k")
            .arg(vk_path)
            .arg("-p")
            .arg(&proof_path)
            .arg("-i")
            .arg(&inputs_path);
        let output = self.run(verify, deadline, ZkOtpError::Proving)?;
        if !output.status.success() {
            debug!(reason = %output.failure_summary(), "backend rejected proof");
        }
        Ok(output.status.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_package_name_from_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(MANIFEST_FILE),
            "[package]\nname = \"totp_auth\"\ntype = \"bin\"\n",
        )
        .unwrap();
        let backend = NargoBackend::new(dir.path(), "nargo", "bb");
        assert_eq!(backend.package_name().unwrap(), "totp_auth");
    }

    #[test]
    fn missing_manifest_is_a_compile_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = NargoBackend::new(dir.path(), "nargo", "bb");
        let err = backend
            .compile(Deadline::after(Duration::from_secs(5)))
            .unwrap_err();
        assert!(matches!(err, ZkOtpError::CircuitCompile(_)));
    }

    #[test]
    fn missing_binary_is_a_compile_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "[package]\nname = \"c\"\n").unwrap();
        let backend = NargoBackend::new(dir.path(), "/nonexistent/zkotp-nargo", "bb");
        let err = backend
            .compile(Deadline::after(Duration::from_secs(5)))
            .unwrap_err();
        assert!(matches!(err, ZkOtpError::CircuitCompile(ref msg) if msg.contains("spawn")));
    }

    #[test]
    fn public_inputs_split_into_words() {
        let mut bytes = vec![0u8; 64];
        bytes[31] = 7;
        bytes[63] = 9;
        let inputs = parse_public_inputs(&bytes).unwrap();
        assert_eq!(inputs, vec![FieldElement::from(7), FieldElement::from(9)]);
        assert!(parse_public_inputs(&bytes[..40]).is_err());
        assert!(parse_public_inputs(&[0xff; 32]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn children_are_killed_at_the_deadline() {
        let backend = NargoBackend::new(".", "nargo", "bb");
        let mut sleep = Command::new("sleep");
        sleep.arg("5");
        let started = std::time::Instant::now();
        let err = backend
            .run(sleep, Deadline::after(Duration::from_millis(100)), ZkOtpError::Proving)
            .unwrap_err();
        assert!(matches!(err, ZkOtpError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn captures_stderr_of_failed_commands() {
        let backend = NargoBackend::new(".", "nargo", "bb");
        let mut failing = Command::new("sh");
        failing.arg("-c").arg("echo constraint failed >&2; exit 1");
        let output = backend
            .run(failing, Deadline::after(Duration::from_secs(5)), ZkOtpError::Proving)
            .unwrap();
        assert!(!output.status.success());
        assert!(output.failure_summary().contains("constraint failed"));
    }

    /// A circuit directory whose `execute` file is run by `sh` in place of nargo.
    #[cfg(unix)]
    fn scripted_nargo(script: &str) -> (tempfile::TempDir, NargoBackend) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("execute"), script).unwrap();
        let backend = NargoBackend::new(dir.path(), "sh", "bb");
        (dir, backend)
    }

    #[cfg(unix)]
    fn circuit() -> CompiledCircuit {
        CompiledCircuit {
            package: "totp".into(),
            fingerprint: "00".into(),
            program_path: None,
            verification_key_path: None,
        }
    }

    #[cfg(unix)]
    fn prover_toml() -> ProverToml {
        use zkotp_common::witness::{PrivateSection, PublicSection};

        ProverToml {
            private: PrivateSection {
                secret: "1".into(),
                secret_bits: vec![vec!["0".into(); 32]; 5],
                otp_code: "123456".into(),
            },
            public: PublicSection {
                hashed_secret: "2".into(),
                hashed_otp: "3".into(),
                time_step: "4".into(),
                action_hash: "5".into(),
                tx_nonce: "6".into(),
            },
        }
    }

    #[cfg(unix)]
    #[test]
    fn failed_constraint_is_a_witness_error() {
        let (dir, backend) = scripted_nargo("echo 'error: Failed constraint' >&2\nexit 1\n");
        let err = backend
            .execute(
                &circuit(),
                "job1",
                &prover_toml(),
                Deadline::after(Duration::from_secs(5)),
            )
            .unwrap_err();
        assert!(matches!(err, ZkOtpError::Witness(ref msg) if msg.contains("Failed constraint")));
        assert!(!err.is_retryable());
        assert!(!dir.path().join("Prover-job1.toml").exists());
    }

    #[cfg(unix)]
    #[test]
    fn toolchain_failure_during_execute_is_retryable() {
        let (_dir, backend) = scripted_nargo(
            "echo 'error: failed to open artifact target/totp.json: No such file or directory' >&2\nexit 1\n",
        );
        let err = backend
            .execute(
                &circuit(),
                "job2",
                &prover_toml(),
                Deadline::after(Duration::from_secs(5)),
            )
            .unwrap_err();
        assert!(matches!(err, ZkOtpError::Proving(ref msg) if msg.contains("failed to open artifact")));
        assert!(err.is_retryable());
    }

    #[cfg(unix)]
    #[test]
    fn partial_witness_is_removed_when_execute_times_out() {
        let (dir, backend) = scripted_nargo("mkdir -p target\n: > \"target/$3.gz\"\nsleep 5\n");
        let err = backend
            .execute(
                &circuit(),
                "job3",
                &prover_toml(),
                Deadline::after(Duration::from_millis(300)),
            )
            .unwrap_err();
        assert!(matches!(err, ZkOtpError::Timeout(_)));
        assert!(dir.path().join(TARGET_DIR).exists());
        assert!(!dir.path().join(TARGET_DIR).join("job3.gz").exists());
        assert!(!dir.path().join("Prover-job3.toml").exists());
    }
}
