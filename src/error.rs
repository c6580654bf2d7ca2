// src/error.rs

use reqwest::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Failures that stop the monitor before it starts watching.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("could not read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write config {path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("missing required setting `{0}` (pass it on the command line once to cache it)")]
    MissingSetting(&'static str),

    #[error("base folder not found at {0}")]
    WatchRootMissing(PathBuf),

    #[error("could not open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("could not open processed-file store: {0}")]
    Store(#[from] rusqlite::Error),
}

/// Failures talking to the extraction, mapping or forwarding services.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("service returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("unexpected response shape: {0}")]
    Shape(String),

    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RemoteError {
    /// HTTP status carried by the error, when there is one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            RemoteError::Network(e) => e.status(),
            _ => None,
        }
    }
}

/// Failures reading or rewriting the spreadsheet ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read existing ledger: {0}")]
    Read(#[from] calamine::Error),

    #[error("could not write ledger: {0}")]
    Write(#[from] rust_xlsxwriter::XlsxError),
}

/// A stage failure that aborts processing of one file.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("extract stage failed: {0}")]
    Extract(#[source] RemoteError),

    #[error("mapping stage failed: {0}")]
    Map(#[source] RemoteError),
}
