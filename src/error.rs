use std::path::PathBuf;

use thiserror::Error;

/// Malformed lexical structure (unterminated string or comment).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("scan error at line {line}: {message}")]
pub struct ScanError {
    pub line: u32,
    pub message: String,
}

/// A construct whose delimiters cannot be balanced, or that the locator
/// does not support. `line`/`column` point at the last consistent position.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("locate error at {line}:{column}: {message}")]
pub struct LocateError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

/// A construct that cannot be rewritten without changing the program.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot instrument {construct}: {message}")]
pub struct InjectError {
    /// Human-readable construct identity, e.g. `statement 4`.
    pub construct: String,
    pub message: String,
}

/// An event with a known discriminator whose payload does not decode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot decode {kind} event: {message}")]
pub struct DecodeError {
    pub kind: &'static str,
    pub message: String,
}

/// An event that references a file or id absent from the coverage maps.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    #[error("event references unknown file '{0}'")]
    UnknownFile(String),

    #[error("file name '{name}' matches several instrumented files: {candidates:?}")]
    AmbiguousFile {
        name: String,
        candidates: Vec<String>,
    },

    #[error("{kind} id {id} is not in the coverage map of {path}")]
    UnknownId {
        path: String,
        kind: &'static str,
        id: u64,
    },

    #[error("branch {id} of {path} has {arms} arms, event names arm {arm}")]
    ArmOutOfRange {
        path: String,
        id: u64,
        arm: u64,
        arms: usize,
    },
}

#[derive(Error, Debug)]
pub enum SolcovError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error(transparent)]
    Inject(#[from] InjectError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error("Event log line {line}: {message}")]
    EventLog { line: usize, message: String },

    #[error("Config error: {0}")]
    Config(String),

    /// Two instrumented sources share a file name; their events would be
    /// indistinguishable.
    #[error("'{name}' names both {} and {}", .first.display(), .second.display())]
    DuplicateFileName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
}

pub type Result<T> = std::result::Result<T, SolcovError>;
