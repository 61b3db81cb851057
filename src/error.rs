// src/error.rs

//! Error types for venv-update
//!
//! Every failure the tool can hit is one variant of [`Error`]. The top-level
//! run loop marks the environment stale on any of them before translating
//! the error into a process exit code with [`Error::exit_code`].

use crate::resolver::ResolutionFailure;
use std::path::PathBuf;
use thiserror::Error;

/// Exit code used when the run was interrupted by a signal
pub const EXIT_INTERRUPTED: i32 = 130;

/// Errors that can occur while updating an environment
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed requirement syntax, reported with file/line context
    #[error("{file}:{line}: {message}")]
    Parse {
        file: PathBuf,
        line: usize,
        message: String,
    },

    /// A requirements file could not be read
    #[error("Could not open requirements file {path}: {source}")]
    RequirementsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed version or specifier outside of a requirement file
    #[error("Invalid version '{input}': {reason}")]
    InvalidVersion { input: String, reason: String },

    /// Unmet dependencies and version conflicts, aggregated
    #[error(transparent)]
    Resolution(#[from] ResolutionFailure),

    /// A child process (creator, index client, build tool) exited non-zero
    #[error("{program} exited with status {code}")]
    ExternalTool { program: String, code: i32 },

    /// A child process could not be started at all
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A file handed to the artifact cache is not a usable artifact
    #[error("Invalid artifact {path}: {reason}")]
    InvalidArtifact { path: PathBuf, reason: String },

    /// An internal invariant was violated; never retried
    #[error("Internal consistency error: {0}")]
    Consistency(String),

    /// The run was interrupted by SIGINT/SIGTERM
    #[error("Interrupted")]
    Interrupted,

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fingerprint (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Process exit code for this error
    ///
    /// External tool failures propagate the child's own exit code verbatim.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ExternalTool { code, .. } if *code != 0 => *code,
            Error::Interrupted => EXIT_INTERRUPTED,
            _ => 1,
        }
    }

    /// Build a parse error for a requirement file line
    pub fn parse(file: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            file: file.into(),
            line,
            message: message.into(),
        }
    }
}

/// Result type for venv-update operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_propagates_external_tool() {
        let err = Error::ExternalTool {
            program: "virtualenv".to_string(),
            code: 3,
        };
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_interrupted_is_distinct() {
        assert_eq!(Error::Interrupted.exit_code(), EXIT_INTERRUPTED);
        assert_ne!(Error::Consistency("x".into()).exit_code(), EXIT_INTERRUPTED);
    }

    #[test]
    fn test_parse_error_display() {
        let err = Error::parse("requirements.txt", 3, "Invalid requirement 'foo=='");
        assert_eq!(
            err.to_string(),
            "requirements.txt:3: Invalid requirement 'foo=='"
        );
    }
}
