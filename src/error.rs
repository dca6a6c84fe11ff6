use thiserror::Error;

#[derive(Error, Debug)]
pub enum CertError {
    #[error("Event tree is not initialized, call finish_initialization first")]
    Uninitialized,

    #[error("Event tree is already initialized")]
    AlreadyInitialized,

    #[error("Event tree must have at least one party")]
    ZeroDepth,

    #[error("Depth {depth} is out of range for a tree of depth {tree_depth}")]
    InvalidDepth { depth: usize, tree_depth: usize },

    #[error("No node at depth {depth}, index {index}")]
    InvalidNodePos { depth: usize, index: u64 },

    #[error("Level {0} has no outcomes")]
    EmptyLevel(usize),

    #[error("Event tree is too large, leaf count overflows u64")]
    TreeTooLarge,

    #[error("Cannot split {n_leaves} leaves into {n_splits} groups")]
    InvalidSplitCount { n_splits: usize, n_leaves: u64 },

    #[error("Thread count must be positive")]
    InvalidThreadCount,

    #[error("Symmetries have changed (tree built at generation {built}, group is at {current})")]
    SymmetriesChanged { built: u64, current: u64 },

    #[error("Party count mismatch: expected {expected}, got {got}")]
    PartyMismatch { expected: usize, got: usize },

    #[error("Invalid outcome {outcome} for party {party}")]
    InvalidOutcome { party: usize, outcome: String },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Logger error: {0}")]
    Logger(#[from] log::SetLoggerError),
}

pub type CertResult<T> = Result<T, CertError>;
