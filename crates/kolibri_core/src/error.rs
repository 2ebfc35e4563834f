use std::fmt;
use std::io;

/// Error kinds shared by every Kolibri subsystem (§7 of the core spec).
///
/// No component panics on an expected failure; every fallible operation
/// returns a `KolibriResult`. The formula pool is the one exception — once
/// constructed it is infallible, because every input to it is clamped
/// rather than rejected.
#[derive(Debug)]
pub enum KolibriError {
    /// Null/out-of-range/non-decimal payload.
    InvalidArgument(String),
    /// Buffer full when growth is forbidden (symbol table, ring, peers).
    Capacity(String),
    /// Genome chain break, HMAC mismatch, malformed block.
    Corrupted(String),
    /// File/socket failure.
    Io(io::Error),
    /// Swarm datagram failed HMAC.
    Unauthenticated,
    /// Feedback target gene absent; association missing.
    NotFound(String),
}

pub type KolibriResult<T> = Result<T, KolibriError>;

impl fmt::Display for KolibriError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KolibriError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            KolibriError::Capacity(msg) => write!(f, "capacity exceeded: {msg}"),
            KolibriError::Corrupted(msg) => write!(f, "corrupted: {msg}"),
            KolibriError::Io(err) => write!(f, "i/o error: {err}"),
            KolibriError::Unauthenticated => write!(f, "unauthenticated datagram"),
            KolibriError::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}

impl std::error::Error for KolibriError {}

impl From<io::Error> for KolibriError {
    fn from(err: io::Error) -> Self {
        KolibriError::Io(err)
    }
}
