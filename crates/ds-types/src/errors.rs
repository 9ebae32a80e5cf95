use thiserror::Error;

/// Main error type for the DownSlope engine
#[derive(Error, Debug)]
pub enum DsError {
    #[error("Descent error: {0}")]
    Descent(#[from] DescentError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while driving a single descent run
#[derive(Error, Debug)]
pub enum DescentError {
    #[error("Objective returned non-finite value {value}")]
    NonFiniteObjective { value: f64 },

    #[error("Objective returned non-finite value {value} while perturbing dimension {dimension}")]
    NonFiniteGradient { value: f64, dimension: usize },

    #[error("Parameter buffer is empty")]
    EmptyParameters,

    #[error("Gradient buffer length {gradient} does not match parameter length {parameters}")]
    DimensionMismatch { gradient: usize, parameters: usize },
}

/// Errors raised by the multi-restart coordinator
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Restart {index} failed: {source}")]
    RestartFailed {
        index: usize,
        #[source]
        source: Box<DsError>,
    },

    #[error("All {restarts} restarts failed")]
    AllRestartsFailed { restarts: usize },

    #[error("Search requires at least one restart")]
    NoRestarts,

    #[error("Search requires at least one dimension")]
    NoDimensions,
}

/// Result type alias for DownSlope operations
pub type DsResult<T> = Result<T, DsError>;

impl SearchError {
    /// Wrap a restart failure, preserving the restart index.
    pub fn restart(index: usize, source: DsError) -> Self {
        SearchError::RestartFailed {
            index,
            source: Box::new(source),
        }
    }
}
