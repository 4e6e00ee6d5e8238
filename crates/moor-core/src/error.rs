//! Core error types for engine operations
//!
//! Script failures keep their structured [`ErrorReport`] so callers can
//! surface file and line information instead of a flattened string. Engine
//! errors are flattened to owned data here: they cross the worker channel,
//! and `mlua::Error` is not `Send`.

use thiserror::Error;

use crate::report::ErrorReport;
use crate::roots::HandleId;

/// Result type alias for engine operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Structured error types for engine operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// A script failed to compile or run
    #[error("{0}")]
    Script(ErrorReport),

    /// The engine refused to root a value (usually out of memory)
    #[error("Allocation failed: {0}")]
    RootFailed(String),

    /// A handle id that is not (or no longer) in the root set
    #[error("Unknown handle {0}")]
    UnknownHandle(HandleId),

    /// Type conversion error
    #[error("Type error: expected {expected}, got {actual}")]
    TypeError { expected: String, actual: String },

    /// Property definition or access error
    #[error("Property error: {0}")]
    PropertyError(String),

    /// The table already carries a metatable installed by someone else
    #[error("Object already has a foreign metatable")]
    ForeignMetatable,

    /// Any other engine error
    #[error("Engine error: {0}")]
    Lua(String),
}

impl From<mlua::Error> for CoreError {
    fn from(e: mlua::Error) -> Self {
        Self::Lua(e.to_string())
    }
}

impl CoreError {
    /// Create a type error
    pub fn type_error(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeError {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a property error
    pub fn property(message: impl Into<String>) -> Self {
        Self::PropertyError(message.into())
    }

    /// Convert an engine error raised by script code into a script report.
    ///
    /// Errors that did not originate in a script (registry misuse and the like)
    /// stay as [`CoreError::Lua`].
    pub fn from_script(err: mlua::Error) -> Self {
        match ErrorReport::from_lua(&err) {
            Some(report) => Self::Script(report),
            None => Self::from(err),
        }
    }

    /// The script report carried by this error, if any
    pub fn report(&self) -> Option<&ErrorReport> {
        match self {
            Self::Script(report) => Some(report),
            _ => None,
        }
    }
}
