use thiserror::Error;

/// Pipeline configuration and backend errors
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("Failed to create device: {0}")]
    DeviceCreation(String),

    #[error("Invalid dimensions: {0}x{1}")]
    InvalidDimensions(u32, u32),

    #[error("{what} must be a multiple of {of}, got {got}")]
    NotMultipleOf {
        what: &'static str,
        of: u32,
        got: u32,
    },

    #[error("Row width {width} exceeds the scan capacity {limit} for this device")]
    RowTooWide { width: u32, limit: u32 },

    #[error("Workgroup geometry {0}x{1} is not supported on this device")]
    WorkgroupUnsupported(u32, u32),

    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("Unknown buffer handle")]
    UnknownBuffer,

    #[error("Stage was not initialized before use")]
    Uninitialized,

    #[error("Compute operation failed: {0}")]
    OperationFailed(String),
}

pub type FilterResult<T> = Result<T, FilterError>;
