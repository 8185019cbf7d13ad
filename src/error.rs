//! Error types for statement execution.

use thiserror::Error;

/// Errors raised while preparing, binding, stepping or decoding statements.
///
/// Engine failures carry the underlying [`rusqlite::Error`] so callers can
/// inspect the SQLite result code.
#[derive(Error, Debug)]
pub enum Error {
    /// The database could not be opened.
    #[error("failed to open database at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    /// SQL text failed to compile.
    #[error("failed to prepare `{sql}`: {source}")]
    Prepare {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A parameter could not be bound (index out of range, misuse, ...).
    #[error("failed to bind parameter {index}: {source}")]
    Bind {
        index: usize,
        #[source]
        source: rusqlite::Error,
    },

    /// The engine failed while executing a step.
    #[error("failed to step statement: {0}")]
    Step(#[source] rusqlite::Error),

    /// A column value could not be converted to the key's declared type.
    #[error("failed to decode column `{column}`: {message}")]
    Decode { column: String, message: String },

    /// The caller handed over keys that do not fit the requested target.
    #[error("contract violation: {0}")]
    ContractViolation(String),
}

impl Error {
    /// The SQLite primary result code, when the error came from the engine.
    pub fn sqlite_code(&self) -> Option<rusqlite::ErrorCode> {
        let source = match self {
            Error::Open { source, .. }
            | Error::Prepare { source, .. }
            | Error::Bind { source, .. }
            | Error::Step(source) => source,
            Error::Decode { .. } | Error::ContractViolation(_) => return None,
        };
        source.sqlite_error_code()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
