use thiserror::Error;

/// Errors the collector can report to its embedder.
///
/// Every variant here corresponds to a condition the original collector
/// handled by aborting the process; this crate turns each of them into a
/// typed `Result` so a host VM can decide for itself whether a collector
/// failure is fatal.
#[derive(Error, Debug)]
pub enum GcError {
    #[error("failed to initialize thread pool: {0}")]
    PoolInit(String),

    #[error("failed to spawn worker thread {worker_id}: {source}")]
    ThreadSpawn {
        worker_id: usize,
        source: std::io::Error,
    },

    #[error("collector contract violated: {0}")]
    ContractViolation(String),

    #[error("operation attempted after pool shutdown")]
    AlreadyShutdown,
}

pub type Result<T> = std::result::Result<T, GcError>;
