// Error types for the CDC pipeline.
//
// One enum covers every failure class from the propagation policy: transient
// I/O (retryable), configuration (fatal at startup), validation (terminal for
// a single event or group), capacity (throttler deny), and terminal delivery
// failure. `Duplicate` delivery is modeled as data (`DeliveryResult`), not an
// error.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CdcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transient I/O error: {0}")]
    Transient(String),

    #[error("configuration error in field '{field}': {reason}")]
    Configuration { field: String, reason: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("capacity exceeded: {0}")]
    Capacity(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("adapter error: {0}")]
    Adapter(String),

    #[error("publisher error: {0}")]
    Publisher(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CdcError>;
