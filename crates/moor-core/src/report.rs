//! Structured error reports for failed script compilation and execution

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// `chunk:line: message` as produced by the Lua compiler and `error()`
static LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^\n:]+):(\d+): (.*)$").expect("location pattern is valid")
});

/// What kind of failure produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// The source did not compile
    Syntax,
    /// The script raised an error while running
    Runtime,
    /// The engine ran out of its memory budget
    Memory,
    /// A host callback failed or produced no result
    Callback,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Syntax => "Syntax error",
            Self::Runtime => "Runtime error",
            Self::Memory => "Memory error",
            Self::Callback => "Callback error",
        };
        f.write_str(name)
    }
}

/// A failed compile or run, with the source location when the engine gave one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub message: String,
    pub file_name: Option<String>,
    pub line: Option<u32>,
    pub kind: ReportKind,
    pub traceback: Option<String>,
}

impl ErrorReport {
    /// Build a report with no location
    pub fn new(kind: ReportKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file_name: None,
            line: None,
            kind,
            traceback: None,
        }
    }

    /// Parse an engine message of the form `chunk:line: text` plus an
    /// optional trailing traceback.
    pub fn parse(kind: ReportKind, raw: &str) -> Self {
        let (first, rest) = match raw.split_once('\n') {
            Some((first, rest)) => (first, Some(rest)),
            None => (raw, None),
        };
        let traceback = rest
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        match LOCATION.captures(first) {
            Some(caps) => Self {
                message: caps[3].to_string(),
                file_name: Some(caps[1].to_string()),
                line: caps[2].parse().ok(),
                kind,
                traceback,
            },
            None => Self {
                message: first.to_string(),
                file_name: None,
                line: None,
                kind,
                traceback,
            },
        }
    }

    /// Build a report from an engine error, or `None` when the error was not
    /// raised by compiling or running script code.
    pub fn from_lua(err: &mlua::Error) -> Option<Self> {
        match err {
            mlua::Error::SyntaxError { message, .. } => {
                Some(Self::parse(ReportKind::Syntax, message))
            }
            mlua::Error::RuntimeError(message) => Some(Self::parse(ReportKind::Runtime, message)),
            mlua::Error::MemoryError(message) => Some(Self::parse(ReportKind::Memory, message)),
            mlua::Error::CallbackError { traceback, cause } => {
                let mut report = match Self::from_lua(cause) {
                    Some(inner) if inner.kind != ReportKind::Runtime => inner,
                    Some(inner) => Self {
                        kind: ReportKind::Callback,
                        ..inner
                    },
                    None => Self::new(ReportKind::Callback, cause.to_string()),
                };
                if report.traceback.is_none() && !traceback.is_empty() {
                    report.traceback = Some(traceback.clone());
                }
                Some(report)
            }
            mlua::Error::WithContext { context, cause } => {
                Self::from_lua(cause).map(|mut report| {
                    report.message = format!("{}: {}", context, report.message);
                    report
                })
            }
            mlua::Error::ExternalError(inner) => {
                Some(Self::new(ReportKind::Callback, inner.to_string()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        match (&self.file_name, self.line) {
            (Some(file), Some(line)) => write!(f, " at {}:{}", file, line)?,
            (None, Some(line)) => write!(f, " at line {}", line)?,
            _ => {}
        }
        write!(f, ": {}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_location_and_traceback() {
        let report = ErrorReport::parse(
            ReportKind::Runtime,
            "eval:3: boom\nstack traceback:\n\t[C]: in ?",
        );
        assert_eq!(report.file_name.as_deref(), Some("eval"));
        assert_eq!(report.line, Some(3));
        assert_eq!(report.message, "boom");
        assert!(report.traceback.unwrap().starts_with("stack traceback"));
    }

    #[test]
    fn message_without_location() {
        let report = ErrorReport::parse(ReportKind::Memory, "not enough memory");
        assert_eq!(report.file_name, None);
        assert_eq!(report.line, None);
        assert_eq!(report.to_string(), "Memory error: not enough memory");
    }

    #[test]
    fn display_includes_location() {
        let report = ErrorReport::parse(ReportKind::Syntax, "main.lua:12: unexpected symbol");
        assert_eq!(
            report.to_string(),
            "Syntax error at main.lua:12: unexpected symbol"
        );
    }

    #[test]
    fn callback_cause_becomes_callback_kind() {
        let err = mlua::Error::CallbackError {
            traceback: "stack traceback:".to_string(),
            cause: std::sync::Arc::new(mlua::Error::runtime("no result")),
        };
        let report = ErrorReport::from_lua(&err).unwrap();
        assert_eq!(report.kind, ReportKind::Callback);
        assert_eq!(report.message, "no result");
    }

    #[test]
    fn non_script_errors_have_no_report() {
        assert!(ErrorReport::from_lua(&mlua::Error::MismatchedRegistryKey).is_none());
    }
}
