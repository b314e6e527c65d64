use clap::{Parser, Subcommand, ValueHint};
use prover_client::prover::cli::CliProverConfig;
use url::Url;

const QUEUE_HELP_HEADING: &str = "Queue options";

/// Block proving leader
#[derive(Parser)]
#[command(version, propagate_version = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,

    #[clap(flatten)]
    pub(crate) prover_config: CliProverConfig,

    /// Serve the proving queue on this port so remote workers can take jobs.
    #[arg(long, env = "PROVER_QUEUE_PORT", help_heading = QUEUE_HELP_HEADING)]
    pub(crate) queue_port: Option<u16>,

    /// Submit proofs to the queue of another leader instead of an in-process
    /// one. Local agents then serve that queue too.
    #[arg(long, env = "PROVER_QUEUE_URL", value_hint = ValueHint::Url, conflicts_with = "queue_port", help_heading = QUEUE_HELP_HEADING)]
    pub(crate) queue_url: Option<Url>,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Reads a JSON array of blocks from stdin and writes one proof file per
    /// block.
    Stdio,
}
