//! Typed error hierarchy for the tflow orchestrator.
//!
//! Two enums cover the two failure families:
//! - `ConfigError`: problems detected before any external side effect
//! - `TflowError`: everything that can stop a step or a pipe at run time

use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration problems. Raised before any process is spawned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required option '{key}' for segment {segment} not given")]
    MissingRequiredSetting { segment: String, key: String },

    #[error("Unrecognized mode '{0}'. Valid modes: run, track, analyze, read, test, stop, clean, print_settings")]
    UnknownMode(String),

    #[error("Job type '{0}' not found")]
    UnknownJobType(String),

    #[error("Job type not specified (use --job-type or a jobtype.dat file)")]
    JobTypeNotSpecified,

    #[error("Job type {segment} has no {action} capability")]
    Unsupported { segment: String, action: String },

    #[error("Options key '{0}' has more than one namespace separator")]
    InvalidOptionKey(String),

    #[error("Option '{key}' has invalid value '{value}': {reason}")]
    InvalidOptionValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Malformed line {line} in options file {path}: {content}")]
    MalformedOptionsLine {
        path: PathBuf,
        line: usize,
        content: String,
    },
}

/// Errors surfaced by the step executor and the pipeline sequencer.
#[derive(Debug, Error)]
pub enum TflowError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{message}")]
    Environment { message: String },

    #[error(
        "{segment} job has failed. Final output:\n ---\n{}\n ---\n(To retry, delete output file: {} )",
        tail.join("\n"),
        log_file.display()
    )]
    ExternalToolFailure {
        segment: String,
        log_file: PathBuf,
        tail: Vec<String>,
    },

    #[error("{segment} process exited with status {code}")]
    ToolExited { segment: String, code: i32 },

    #[error("{action} stopped by interrupt")]
    Interrupted { action: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TflowError {
    pub fn environment(message: impl Into<String>) -> Self {
        Self::Environment {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit status for this error. Interrupts are kept distinct so
    /// wrapping scripts can tell a cancelled pipe from a failed one.
    pub fn exit_code(&self) -> u8 {
        match self {
            TflowError::Interrupted { .. } => 2,
            _ => 1,
        }
    }
}

pub type Result<T, E = TflowError> = std::result::Result<T, E>;
