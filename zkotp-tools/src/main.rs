use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, bail, ensure, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use zkotp_common::{
    bits_to_field, decode_secret, format_code, time_step_at, totp, totp::unix_now,
    ActionDescriptor, ActionEncoding, CommitmentHasher, ProverToml, SecretBits,
    TimeStepClock, DEFAULT_ACTION_NAME,
};
use zkotp_prover::{
    nargo::parse_public_inputs, prepare, CircuitBackend, Deadline, NargoBackend, ProofRequest,
    ProverConfig, RawProof,
};

const DEFAULT_PROVER_TOML: &str = "Prover.toml";

#[derive(Parser)]
#[command(
    name = "zkotp-tools",
    about = "Utility commands for TOTP-bound proof inputs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the TOTP code for a secret at a time step.
    Totp(TotpArgs),
    /// Write a Prover.toml witness file for the circuit.
    ProverToml(ProverTomlArgs),
    /// Poseidon-hash a 16x32 secret bit matrix.
    HashBits(HashBitsArgs),
    /// Print the action hash for a recipient and amount.
    ActionHash(ActionHashArgs),
    /// Check a witness file, or a proof against the compiled circuit.
    Verify(VerifyArgs),
}

#[derive(Args)]
struct TimeArgs {
    /// Time step to use instead of the wall clock.
    #[arg(long, conflicts_with = "unix")]
    time_step: Option<u64>,
    /// Unix timestamp in seconds to derive the time step from.
    #[arg(long)]
    unix: Option<u64>,
}

impl TimeArgs {
    fn resolve(&self) -> u64 {
        match (self.time_step, self.unix) {
            (Some(step), _) => step,
            (None, Some(secs)) => time_step_at(secs),
            (None, None) => time_step_at(unix_now()),
        }
    }
}

#[derive(Args)]
struct TotpArgs {
    /// Base32 TOTP secret.
    #[arg(long, env = "ZKOTP_SECRET", hide_env_values = true)]
    secret: String,
    #[command(flatten)]
    time: TimeArgs,
}

#[derive(Args)]
struct ProverTomlArgs {
    #[arg(long, env = "ZKOTP_SECRET", hide_env_values = true)]
    secret: String,
    /// Submitted code; computed from the secret when omitted.
    #[arg(long)]
    otp_code: Option<String>,
    #[arg(long)]
    to: String,
    /// Amount in wei, decimal or 0x-hex.
    #[arg(long)]
    amount: String,
    #[arg(long)]
    tx_nonce: Option<u64>,
    #[arg(long, default_value = DEFAULT_ACTION_NAME)]
    action_name: String,
    #[arg(long)]
    packed: bool,
    #[command(flatten)]
    time: TimeArgs,
    #[arg(long, default_value = DEFAULT_PROVER_TOML)]
    output: PathBuf,
}

#[derive(Args)]
struct HashBitsArgs {
    /// JSON file holding a 16x32 array of 0/1 entries.
    #[arg(long, conflicts_with = "witness")]
    bits: Option<PathBuf>,
    /// Read `private.secret_bits` from a Prover.toml instead.
    #[arg(long)]
    witness: Option<PathBuf>,
}

#[derive(Args)]
struct ActionHashArgs {
    #[arg(long)]
    to: String,
    #[arg(long)]
    amount: String,
    #[arg(long, default_value = DEFAULT_ACTION_NAME)]
    name: String,
    /// Use abi.encodePacked instead of abi.encode.
    #[arg(long)]
    packed: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct VerifyArgs {
    /// Witness file whose commitments are re-checked offline.
    #[arg(long, default_value = DEFAULT_PROVER_TOML, conflicts_with = "proof")]
    witness: PathBuf,
    /// Proof file produced by the proving backend.
    #[arg(long, requires = "public_inputs")]
    proof: Option<PathBuf>,
    /// `public_inputs` file produced alongside the proof.
    #[arg(long)]
    public_inputs: Option<PathBuf>,
    /// Seconds allowed for compiling and verifying.
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionHashOutput {
    action_name: String,
    recipient: String,
    encoding: ActionEncoding,
    action_hash: String,
    action_hash_field: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Totp(args) => print_totp(args),
        Commands::ProverToml(args) => write_prover_toml(args),
        Commands::HashBits(args) => hash_bits(args),
        Commands::ActionHash(args) => action_hash(args),
        Commands::Verify(args) => verify(args),
    }
}

fn print_totp(args: TotpArgs) -> Result<()> {
    let secret = decode_secret(&args.secret)?;
    let step = args.time.resolve();
    let code = totp(&secret, step)?;
    println!("{}", format_code(code));
    eprintln!("time step {step}");
    Ok(())
}

fn write_prover_toml(args: ProverTomlArgs) -> Result<()> {
    let step = args.time.resolve();
    let otp_code = match args.otp_code {
        Some(code) => code,
        None => format_code(totp(&decode_secret(&args.secret)?, step)?),
    };
    let request = ProofRequest {
        secret: args.secret,
        otp_code,
        to: args.to,
        amount: args.amount,
        tx_nonce: args.tx_nonce,
        bytes32: false,
        encoding: encoding(args.packed),
    };

    let prepared = prepare(
        &request,
        &CommitmentHasher::new()?,
        &TimeStepClock::fixed(step),
        &args.action_name,
    )
    .map_err(|err| anyhow!(err))?;
    if !prepared.code_matched {
        eprintln!("warning: submitted code does not match time step {step}; the circuit will reject this witness");
    }

    let rendered = ProverToml::from(&prepared.input).render()?;
    fs::write(&args.output, rendered)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    println!(
        "Wrote {} (time step {}, action hash {}, tx nonce {})",
        args.output.display(),
        step,
        prepared.action_hash,
        prepared.input.public.tx_nonce
    );
    Ok(())
}

fn hash_bits(args: HashBitsArgs) -> Result<()> {
    let bits = match (args.bits, args.witness) {
        (Some(path), _) => {
            let text = read_to_string(&path)?;
            let value: Value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", path.display()))?;
            bits_from_json(&value)?
        }
        (None, Some(path)) => {
            let witness = ProverToml::parse(&read_to_string(&path)?)?;
            SecretBits::from_rows(&witness.private.secret_bits)?
        }
        (None, None) => bail!("pass --bits <json> or --witness <Prover.toml>"),
    };

    let secret = bits_to_field(&bits);
    let digest = CommitmentHasher::new()?.hash_secret(&secret)?;
    println!("{digest}");
    Ok(())
}

/// Accepts `0`/`1` as JSON numbers or strings.
fn bits_from_json(value: &Value) -> Result<SecretBits> {
    let rows = value
        .as_array()
        .context("bit matrix must be a JSON array of rows")?;
    let rows = rows
        .iter()
        .enumerate()
        .map(|(row_index, row)| {
            row.as_array()
                .with_context(|| format!("row {row_index} is not an array"))?
                .iter()
                .map(|bit| match bit {
                    Value::Number(n) => Ok(n.to_string()),
                    Value::String(s) => Ok(s.clone()),
                    other => Err(anyhow!("row {row_index} has non-bit entry {other}")),
                })
                .collect::<Result<Vec<String>>>()
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(SecretBits::from_rows(&rows)?)
}

fn action_hash(args: ActionHashArgs) -> Result<()> {
    let descriptor = ActionDescriptor::parse(&args.name, &args.to, &args.amount)?;
    let encoding = encoding(args.packed);
    let hash = descriptor.hash(encoding);

    if args.json {
        let output = ActionHashOutput {
            action_name: args.name,
            recipient: descriptor.recipient.to_checksum(),
            encoding,
            action_hash: hash.to_hex(),
            action_hash_field: hash.to_field().to_decimal(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", hash.to_hex());
        println!("field: {}", hash.to_field());
    }
    Ok(())
}

fn verify(args: VerifyArgs) -> Result<()> {
    match (args.proof, args.public_inputs) {
        (Some(proof), Some(public_inputs)) => {
            verify_proof(proof, public_inputs, Duration::from_secs(args.timeout_secs))
        }
        _ => verify_witness(&args.witness),
    }
}

/// Offline check of the commitments a witness file claims.
fn verify_witness(path: &Path) -> Result<()> {
    let witness = ProverToml::parse(&read_to_string(path)?)?;
    let input = witness
        .to_circuit_input()
        .with_context(|| format!("{} is not a consistent witness", path.display()))?;

    let hasher = CommitmentHasher::new()?;
    let hashed_secret = hasher.hash_secret(&input.secret)?;
    ensure!(
        hashed_secret == input.public.hashed_secret,
        "hashed_secret does not commit to the secret (expected {hashed_secret})"
    );
    let hashed_otp = hasher.hash_otp(input.otp_code)?;
    ensure!(
        hashed_otp == input.public.hashed_otp,
        "hashed_otp does not commit to otp_code {}",
        format_code(input.otp_code)
    );

    println!(
        "{} satisfies the commitment constraints (time step {})",
        path.display(),
        input.public.time_step
    );
    Ok(())
}

fn verify_proof(proof: PathBuf, public_inputs: PathBuf, timeout: Duration) -> Result<()> {
    let config = ProverConfig::from_env();
    let backend = NargoBackend::from_config(&config);
    let deadline = Deadline::after(timeout);

    let circuit = backend
        .compile(deadline)
        .with_context(|| format!("failed to compile {}", backend.circuit_dir().display()))?;
    let raw = RawProof {
        proof: fs::read(&proof).with_context(|| format!("failed to read {}", proof.display()))?,
        public_inputs: parse_public_inputs(&fs::read(&public_inputs).with_context(|| {
            format!("failed to read {}", public_inputs.display())
        })?)?,
    };

    if !backend.verify(&circuit, &raw, deadline)? {
        bail!("proof rejected by circuit {}", circuit.package);
    }
    println!(
        "proof verified against {} ({} public inputs)",
        circuit.package,
        raw.public_inputs.len()
    );
    for input in &raw.public_inputs {
        println!("  {}", input.to_bytes32_hex());
    }
    Ok(())
}

fn encoding(packed: bool) -> ActionEncoding {
    if packed {
        ActionEncoding::Packed
    } else {
        ActionEncoding::Standard
    }
}

fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use zkotp_common::FieldElement;

    fn matrix(entry: Value) -> Value {
        Value::Array(vec![Value::Array(vec![entry; 32]); 16])
    }

    #[test]
    fn json_bits_accept_numbers_and_strings() {
        let zeros = bits_from_json(&matrix(json!(0))).unwrap();
        let strings = bits_from_json(&matrix(json!("0"))).unwrap();
        assert_eq!(zeros, strings);
        assert_eq!(bits_to_field(&zeros), FieldElement::zero());
    }

    #[test]
    fn json_bits_reject_wrong_shapes() {
        assert!(bits_from_json(&json!([[0, 1]])).is_err());
        assert!(bits_from_json(&json!({"bits": []})).is_err());
        assert!(bits_from_json(&matrix(json!(2))).is_err());
        assert!(bits_from_json(&matrix(json!(true))).is_err());
    }

    #[test]
    fn explicit_time_step_wins() {
        let time = TimeArgs {
            time_step: Some(7),
            unix: None,
        };
        assert_eq!(time.resolve(), 7);
        let time = TimeArgs {
            time_step: None,
            unix: Some(59),
        };
        assert_eq!(time.resolve(), 1);
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "zkotp-tools",
            "action-hash",
            "--to",
            "0x000000000000000000000000000000000000dEaD",
            "--amount",
            "1",
            "--packed",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::ActionHash(ref args) if args.packed));
    }
}
