//! Engine error types

use thiserror::Error;

use crate::connection::ConnectionError;

/// Errors that can occur while running the transport sync engine
///
/// None of these are fatal to the host: callers log them and keep the
/// audio callback running in a degraded mode.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Socket setup or send failure
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Background thread could not be started
    #[error("Failed to spawn {name} thread: {reason}")]
    ThreadSpawn { name: &'static str, reason: String },
}

/// Result type for engine operations
pub type SyncResult<T> = Result<T, SyncError>;
