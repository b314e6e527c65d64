use thiserror::Error;

/// Errors surfaced synchronously by the orchestrator's public operations.
///
/// Backend failures never show up here: they resolve the session's
/// [`ProvingTicket`](crate::proving_state::ProvingTicket) instead.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("block size must be a power of two of at least 2, got {0}")]
    InvalidBlockSize(usize),
    #[error("too many L1 to L2 messages: got {got}, max {max}")]
    TooManyMessages { got: usize, max: usize },
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("padding transaction must not carry any effects")]
    InvalidPaddingTransaction,

    #[error("no active block")]
    NoActiveBlock,
    #[error("block is not accepting transactions")]
    NotAcceptingTransactions,
    #[error("block has not been proven")]
    NotProven,
    #[error("block has already been finalised")]
    AlreadyFinalised,
    #[error("block proving was cancelled")]
    Cancelled,

    #[error("inconsistent block: {0}")]
    Consistency(String),
    #[error("world state error: {0:#}")]
    WorldState(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// The call was rejected before any state was touched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidBlockSize(_)
                | Self::TooManyMessages { .. }
                | Self::InvalidTransaction(_)
                | Self::InvalidPaddingTransaction
        )
    }

    /// The call was made out of sequence for the current session.
    pub fn is_state(&self) -> bool {
        matches!(
            self,
            Self::NoActiveBlock
                | Self::NotAcceptingTransactions
                | Self::NotProven
                | Self::AlreadyFinalised
                | Self::Cancelled
        )
    }
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

/// Text carried by a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
