// zkotp-prover/src/main.rs

use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use zkotp_common::{ActionEncoding, TimeStepClock};
use zkotp_prover::{NargoBackend, Orchestrator, ProofRequest, ProverConfig};

/// Generate one TOTP-bound proof with the local Noir toolchain.
#[derive(Parser)]
struct Args {
    /// Base32 TOTP secret.
    #[arg(long, env = "ZKOTP_SECRET", hide_env_values = true)]
    secret: String,
    /// Current six-digit code from the authenticator.
    #[arg(long)]
    otp_code: String,
    /// Recipient address.
    #[arg(long)]
    to: String,
    /// Amount in wei, decimal or 0x-hex.
    #[arg(long)]
    amount: String,
    /// Fixed time step instead of the wall clock.
    #[arg(long)]
    time_step: Option<u64>,
    #[arg(long)]
    tx_nonce: Option<u64>,
    /// Hash the action with packed encoding instead of abi.encode.
    #[arg(long)]
    packed: bool,
    /// Include the proof as bytes32 segments.
    #[arg(long)]
    bytes32: bool,
    /// Write the JSON result here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CliOutput {
    proof_hex: String,
    public_inputs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    proof_bytes32_array: Option<Vec<String>>,
    time_step: u64,
    action_hash: String,
    tx_nonce: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zkotp_prover=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = ProverConfig::from_env();
    let clock = match args.time_step {
        Some(step) => TimeStepClock::fixed(step),
        None => TimeStepClock::from_env(),
    };

    let backend = Arc::new(NargoBackend::from_config(&config));
    let orchestrator = Orchestrator::start(backend, config, clock)
        .await
        .map_err(|err| anyhow!(err))
        .context("circuit is not usable")?;

    let output = orchestrator
        .prove(ProofRequest {
            secret: args.secret,
            otp_code: args.otp_code,
            to: args.to,
            amount: args.amount,
            tx_nonce: args.tx_nonce,
            bytes32: args.bytes32,
            encoding: if args.packed {
                ActionEncoding::Packed
            } else {
                ActionEncoding::Standard
            },
        })
        .await
        .map_err(|err| anyhow!(err))
        .context("proof generation failed")?;

    let json = serde_json::to_vec_pretty(&CliOutput {
        proof_hex: output.proof_hex,
        public_inputs: output.public_inputs,
        proof_bytes32_array: output.proof_bytes32,
        time_step: output.time_step,
        action_hash: output.action_hash,
        tx_nonce: output.tx_nonce,
    })
    .context("failed to serialize proof")?;

    match args.output {
        Some(path) => {
            fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))
        }
        None => {
            println!("{}", String::from_utf8_lossy(&json));
            Ok(())
        }
    }
}
