//! Error types for the capture device and its registry collaborator.

use thiserror::Error;

/// Errors returned by control and streaming operations.
///
/// None of these tear the device down; every failure leaves the queue in
/// the state it had before the call.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Bad buffer, format or input index, or an undersized buffer request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not allowed in the current streaming/queue state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Non-blocking dequeue found no Done/Error buffer.
    #[error("no buffer ready")]
    NoBufferReady,

    /// The buffer pool is owned by the other I/O mode.
    #[error("device busy: {0}")]
    Busy(String),

    /// A blocking wait ran out of time.
    #[error("timed out waiting for a filled buffer")]
    Timeout,

    /// The frame source could not fill buffer `index` (read access path only).
    #[error("frame source failed to fill buffer {index}")]
    FillFailed { index: usize },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

/// Failures reported by a [`DeviceRegistry`](crate::registry::DeviceRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("registry rejected device {0:?}")]
    DeviceRejected(String),

    #[error("registry rejected video node {0:?}")]
    NodeRejected(String),

    #[error("video node {0} already in use")]
    NodeInUse(u32),

    #[error("{0:?} is not registered")]
    NotRegistered(String),
}

/// Result type for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;
