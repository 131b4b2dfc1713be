use std::{env, path::PathBuf, time::Duration};

use zkotp_common::DEFAULT_ACTION_NAME;

pub const CIRCUIT_DIR_ENV: &str = "ZKOTP_CIRCUIT_DIR";
pub const NARGO_BIN_ENV: &str = "ZKOTP_NARGO_BIN";
pub const BB_BIN_ENV: &str = "ZKOTP_BB_BIN";
pub const PROOF_TIMEOUT_ENV: &str = "ZKOTP_PROOF_TIMEOUT_SECS";
pub const MAX_CONCURRENT_PROOFS_ENV: &str = "ZKOTP_MAX_CONCURRENT_PROOFS";
pub const ACTION_NAME_ENV: &str = "ZKOTP_ACTION_NAME";
pub const VERIFY_PROOFS_ENV: &str = "ZKOTP_VERIFY_PROOFS";
pub const WITNESS_DEBUG_DIR_ENV: &str = "ZKOTP_WITNESS_DEBUG_DIR";

const DEFAULT_CIRCUIT_DIR: &str = "circuit";
const DEFAULT_NARGO_BIN: &str = "nargo";
const DEFAULT_BB_BIN: &str = "bb";
const DEFAULT_PROOF_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_CONCURRENT_PROOFS: usize = 1;

/// Orchestrator settings.
#[derive(Clone, Debug)]
pub struct ProverConfig {
    pub circuit_dir: PathBuf,
    pub nargo_bin: PathBuf,
    pub bb_bin: PathBuf,
    pub proof_timeout: Duration,
    /// Permit slots around compile/execute/prove; at least one.
    pub max_concurrent_proofs: usize,
    pub action_name: String,
    pub verify_proofs: bool,
    pub witness_debug_dir: Option<PathBuf>,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            circuit_dir: PathBuf::from(DEFAULT_CIRCUIT_DIR),
            nargo_bin: PathBuf::from(DEFAULT_NARGO_BIN),
            bb_bin: PathBuf::from(DEFAULT_BB_BIN),
            proof_timeout: Duration::from_secs(DEFAULT_PROOF_TIMEOUT_SECS),
            max_concurrent_proofs: DEFAULT_MAX_CONCURRENT_PROOFS,
            action_name: DEFAULT_ACTION_NAME.to_string(),
            verify_proofs: false,
            witness_debug_dir: None,
        }
    }
}

impl ProverConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            circuit_dir: env_path(CIRCUIT_DIR_ENV).unwrap_or(defaults.circuit_dir),
            nargo_bin: env_path(NARGO_BIN_ENV).unwrap_or(defaults.nargo_bin),
            bb_bin: env_path(BB_BIN_ENV).unwrap_or(defaults.bb_bin),
            proof_timeout: parse_env_u64(PROOF_TIMEOUT_ENV)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.proof_timeout),
            max_concurrent_proofs: parse_env_u64(MAX_CONCURRENT_PROOFS_ENV)
                .map(|slots| slots.max(1) as usize)
                .unwrap_or(defaults.max_concurrent_proofs),
            action_name: env::var(ACTION_NAME_ENV)
                .ok()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(defaults.action_name),
            verify_proofs: parse_env_bool(VERIFY_PROOFS_ENV).unwrap_or(defaults.verify_proofs),
            witness_debug_dir: env_path(WITNESS_DEBUG_DIR_ENV),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.proof_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_proofs(mut self, slots: usize) -> Self {
        self.max_concurrent_proofs = slots.max(1);
        self
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn parse_env_u64(var: &str) -> Option<u64> {
    env::var(var)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn parse_env_bool(var: &str) -> Option<bool> {
    env::var(var).ok().and_then(|value| {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ProverConfig::default();
        assert_eq!(config.circuit_dir, PathBuf::from("circuit"));
        assert_eq!(config.proof_timeout, Duration::from_secs(120));
        assert_eq!(config.max_concurrent_proofs, 1);
        assert_eq!(config.action_name, "transferFunds");
        assert!(!config.verify_proofs);
        assert!(config.witness_debug_dir.is_none());
    }

    #[test]
    fn slot_count_never_drops_to_zero() {
        assert_eq!(
            ProverConfig::default()
                .with_max_concurrent_proofs(0)
                .max_concurrent_proofs,
            1
        );
    }
}
