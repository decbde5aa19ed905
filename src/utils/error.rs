//! Crate-wide error type.

use std::fmt;
use std::io;

/// All fallible consensus-layer and ambient-layer operations return this
/// error type. Transient network/decode conditions are handled locally by
/// callers (see design doc §7); this type exists so that the handful of
/// truly fatal conditions (a leader's self-append violating the log's own
/// invariants, a malformed config string) have somewhere to go.
#[derive(Debug)]
pub enum RaftError {
    /// Transient I/O failure on a peer or client connection.
    Io(io::Error),
    /// A length-prefixed frame could not be decoded into a valid message.
    Decode(String),
    /// A correlated response did not arrive within its timeout.
    Timeout(String),
    /// A TOML config string failed to parse or apply.
    Config(String),
    /// A consensus safety invariant was violated; the process should abort.
    Invariant(String),
    /// Catch-all for conditions not worth a dedicated variant.
    Msg(String),
}

impl RaftError {
    pub fn msg<S: Into<String>>(s: S) -> Self {
        RaftError::Msg(s.into())
    }
}

impl fmt::Display for RaftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaftError::Io(e) => write!(f, "I/O error: {}", e),
            RaftError::Decode(s) => write!(f, "decode error: {}", s),
            RaftError::Timeout(s) => write!(f, "timed out: {}", s),
            RaftError::Config(s) => write!(f, "config error: {}", s),
            RaftError::Invariant(s) => write!(f, "invariant violated: {}", s),
            RaftError::Msg(s) => write!(f, "{}", s),
        }
    }
}

impl std::error::Error for RaftError {}

impl From<io::Error> for RaftError {
    fn from(e: io::Error) -> Self {
        RaftError::Io(e)
    }
}

impl From<bincode::Error> for RaftError {
    fn from(e: bincode::Error) -> Self {
        RaftError::Decode(e.to_string())
    }
}

impl From<toml::de::Error> for RaftError {
    fn from(e: toml::de::Error) -> Self {
        RaftError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_variants() {
        assert!(RaftError::msg("oops").to_string().contains("oops"));
        assert!(RaftError::Invariant("x".into())
            .to_string()
            .contains("invariant"));
    }
}
