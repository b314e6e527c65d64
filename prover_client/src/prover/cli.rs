use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueHint};

use crate::retry::RetryPolicy;

const HELP_HEADING: &str = "Prover options";

fn get_default_output_path() -> PathBuf {
    let mut path = std::env::current_dir().unwrap_or_default();
    path.push("proofs");
    path
}

#[derive(Args, Clone, PartialEq, Eq, Debug)]
pub struct CliProverConfig {
    /// Number of proving agents to run inside this process.
    #[arg(long, env = "PROVER_LOCAL_AGENTS", help_heading = HELP_HEADING, default_value_t = 4)]
    local_agents: usize,
    /// How long an idle agent waits on the queue before polling again.
    #[arg(long, env = "PROVER_POLL_TIMEOUT_MS", help_heading = HELP_HEADING, default_value_t = 1000)]
    poll_timeout_ms: u64,
    /// Directory where the generated proofs will be written.
    #[arg(short = 'o', long, env = "PROVER_PROOF_OUTPUT_DIR", value_hint = ValueHint::DirPath, help_heading = HELP_HEADING, default_value = get_default_output_path().into_os_string())]
    proof_output_dir: PathBuf,
    /// Backoff in milliseconds before retrying a request to a remote queue.
    #[arg(long, env = "PROVER_BACKOFF_MS", help_heading = HELP_HEADING, default_value_t = 500)]
    backoff_ms: u64,
    /// The maximum number of retries of a request to a remote queue.
    #[arg(long, env = "PROVER_MAX_RETRIES", help_heading = HELP_HEADING, default_value_t = 3)]
    max_retries: u32,
}

impl From<CliProverConfig> for super::ProverConfig {
    fn from(cli: CliProverConfig) -> Self {
        Self {
            local_agents: cli.local_agents,
            poll_timeout: Duration::from_millis(cli.poll_timeout_ms),
            proof_output_dir: cli.proof_output_dir,
            retry: RetryPolicy::new(Duration::from_millis(cli.backoff_ms), cli.max_retries),
        }
    }
}
