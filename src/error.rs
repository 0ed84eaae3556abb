//! Error types for the bridge registry service.
//!
//! Errors fall into four groups:
//!
//! - **Parse errors**: malformed extra-info lines. These always fail the
//!   whole parse.
//! - **Decode errors**: a row or line whose fields don't satisfy type
//!   constraints (bad port, unresolvable address, unknown distributor).
//! - **Source errors**: the SQLite store or the extra-info file can't be
//!   opened or read. A refresh cycle that hits one is abandoned and retried
//!   on the next tick.
//! - **Request errors**: malformed or unauthenticated HTTP requests. They are
//!   rejected before the distributor runs.

use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
#[derive(Error, Debug)]
pub enum Error {
    // ── Parse Errors ──────────────────────────────────────────────────────

    /// An `extra-info` line without exactly three fields.
    #[error("line {line}: incorrect number of words in 'extra-info' line")]
    MalformedHeader { line: usize },

    /// A `transport` line with fewer than three fields.
    #[error("line {line}: not enough arguments in 'transport' line")]
    MalformedTransport { line: usize },

    /// A transport argument that isn't a single `key=value` pair.
    #[error("line {line}: key=value pair in {args:?} not separated by a single '='")]
    MalformedArgument { line: usize, args: String },

    /// A `transport` line seen before any `extra-info` line.
    #[error("line {line}: 'transport' line outside of an 'extra-info' block")]
    TransportOutsideBlock { line: usize },

    /// An `extra-info` or `transport` line that isn't valid UTF-8.
    #[error("line {line}: descriptor line is not valid UTF-8")]
    InvalidEncoding { line: usize },

    /// A line longer than the parser accepts.
    #[error("line {line}: line exceeds {max} bytes")]
    LineTooLong { line: usize, max: usize },

    // ── Decode Errors ─────────────────────────────────────────────────────

    /// Host part of an address that is neither an IP nor resolvable.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Port that isn't a number in 0-65535.
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// Distribution group label we don't know about.
    #[error("unknown distributor: {0:?}")]
    UnknownDistributor(String),

    // ── Source Errors ─────────────────────────────────────────────────────

    /// SQLite failure (open, query or row decoding).
    #[error("database error: {0}")]
    Database(String),

    /// I/O failure reading a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking refresh job panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    // ── Configuration Errors ──────────────────────────────────────────────

    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    // ── Request Errors ────────────────────────────────────────────────────

    /// Malformed client request.
    #[error("{0}")]
    BadRequest(String),

    /// Request carried an unknown authentication token.
    #[error("invalid authentication token")]
    Unauthorized,
}

impl Error {
    /// Attach a line number to an address/port decode error so the operator
    /// can find the offending descriptor.
    pub(crate) fn at_line(self, line: usize) -> Self {
        match self {
            Error::InvalidAddress(msg) => Error::InvalidAddress(format!("line {}: {}", line, msg)),
            Error::InvalidPort(msg) => Error::InvalidPort(format!("line {}: {}", line, msg)),
            other => other,
        }
    }

    /// Whether this error is a structural parse error of the descriptor
    /// document, as opposed to a source that was unavailable.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedHeader { .. }
                | Error::MalformedTransport { .. }
                | Error::MalformedArgument { .. }
                | Error::TransportOutsideBlock { .. }
                | Error::InvalidEncoding { .. }
                | Error::LineTooLong { .. }
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}
