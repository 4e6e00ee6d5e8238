//! Error types for moor-runtime
//!
//! Re-exports core errors from moor-core and adds arbitration and lifecycle
//! errors.

use thiserror::Error;

pub use moor_core::{CoreError, ErrorReport};

/// Errors that can occur during runtime operations
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Core engine error
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The runtime was disposed before or while the work was submitted
    #[error("Runtime has been disposed")]
    Disposed,

    /// A unit of work panicked on the worker thread
    #[error("Worker panic: {0}")]
    WorkerPanicked(String),

    /// The worker thread could not be started
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    /// `ret` was called more than once for the same call
    #[error("Callback result already set")]
    ResultAlreadySet,

    /// A host callback failed
    #[error("Callback error: {0}")]
    Callback(String),
}

impl RuntimeError {
    /// Create a type error
    pub fn type_error(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::Core(CoreError::type_error(expected, actual))
    }

    /// Create a property error
    pub fn property(message: impl Into<String>) -> Self {
        Self::Core(CoreError::property(message))
    }

    /// Create a callback error
    pub fn callback(message: impl Into<String>) -> Self {
        Self::Callback(message.into())
    }

    /// The script report carried by this error, if any
    pub fn report(&self) -> Option<&ErrorReport> {
        match self {
            Self::Core(core) => core.report(),
            _ => None,
        }
    }

    /// True if this error comes from a disposed runtime
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }
}

impl From<moor_core::mlua::Error> for RuntimeError {
    fn from(e: moor_core::mlua::Error) -> Self {
        Self::Core(CoreError::from(e))
    }
}

/// Result type alias for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync + 'static>() {}

    #[test]
    fn test_errors_cross_threads() {
        assert_send_sync::<RuntimeError>();
        assert_send_sync::<RuntimeResult<()>>();
    }

    #[test]
    fn test_engine_error_converts_to_core() {
        let err = RuntimeError::from(moor_core::mlua::Error::runtime("bad key"));
        assert!(matches!(err, RuntimeError::Core(CoreError::Lua(_))));
        assert!(err.report().is_none());
    }
}
