//! Error handling for epoch.

use thiserror::Error;

use crate::constants::{CODE_ACKNOWLEDGED, CODE_FAILURE, CODE_WARNING};

/// Tri-valued result of every supervised operation.
///
/// `Warning` means "it completed but suspiciously": a known non-zero exit
/// code, a stop wait that timed out, or a pidfile that never appeared after a
/// successful start. Protocol handlers translate these verbatim into the
/// `OK | WARN | FAIL` response prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Outcome {
    Failure = 0,
    Success = 1,
    Warning = 2,
}

impl Outcome {
    /// True unless the operation failed outright.
    pub fn ok(self) -> bool {
        !matches!(self, Outcome::Failure)
    }

    /// The membus response prefix for this outcome.
    pub fn wire_code(self) -> &'static str {
        match self {
            Outcome::Success => CODE_ACKNOWLEDGED,
            Outcome::Warning => CODE_WARNING,
            Outcome::Failure => CODE_FAILURE,
        }
    }

    /// Combines two outcomes, keeping the worse of the pair.
    pub fn worst_of(self, other: Outcome) -> Outcome {
        match (self, other) {
            (Outcome::Failure, _) | (_, Outcome::Failure) => Outcome::Failure,
            (Outcome::Warning, _) | (_, Outcome::Warning) => Outcome::Warning,
            _ => Outcome::Success,
        }
    }

    /// Decodes the raw byte used on the wire (LSOBJS exit map frames).
    pub fn from_wire_byte(byte: u8) -> Option<Outcome> {
        match byte {
            0 => Some(Outcome::Failure),
            1 => Some(Outcome::Success),
            2 => Some(Outcome::Warning),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Outcome::Success => "SUCCESS",
            Outcome::Warning => "WARNING",
            Outcome::Failure => "FAILURE",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for Outcome {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Outcome::Success),
            "WARNING" => Ok(Outcome::Warning),
            "FAILURE" => Ok(Outcome::Failure),
            _ => Err(()),
        }
    }
}

/// Errors raised while loading or editing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading or writing a configuration file.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// The file involved.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Two objects declared the same id.
    #[error("duplicate object id '{0}' in configuration")]
    DuplicateObject(String),

    /// The config editor could not find the requested object or attribute.
    #[error("object '{object}' has no editable '{attribute}' line in {file}")]
    EditTargetMissing {
        /// Object whose stanza was searched.
        object: String,
        /// Attribute that was not found.
        attribute: String,
        /// The file searched.
        file: String,
    },
}

/// Errors raised by the shared-memory control channel.
#[derive(Debug, Error)]
pub enum BusError {
    /// `shmget` failed; on the client side this usually means no server.
    #[error("failed to open shared memory region: {0}")]
    Open(#[from] nix::errno::Errno),

    /// The server never initialized its half within the timeout.
    #[error("membus stream not initialized by server")]
    ServerNotReady,

    /// The server did not answer the liveness ping within the timeout.
    #[error("membus ping timed out; is epoch the running init?")]
    PingTimeout,

    /// Another client holds the bus lock.
    #[error("another client (pid {0}) is connected to the membus")]
    Locked(u64),

    /// The peer failed to drain its slot within the write timeout.
    #[error("membus write timed out waiting for peer")]
    WriteTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_of_orders_failure_over_warning() {
        assert_eq!(Outcome::Success.worst_of(Outcome::Success), Outcome::Success);
        assert_eq!(Outcome::Success.worst_of(Outcome::Warning), Outcome::Warning);
        assert_eq!(Outcome::Warning.worst_of(Outcome::Failure), Outcome::Failure);
        assert_eq!(Outcome::Failure.worst_of(Outcome::Success), Outcome::Failure);
    }

    #[test]
    fn wire_codes_match_protocol() {
        assert_eq!(Outcome::Success.wire_code(), "OK");
        assert_eq!(Outcome::Warning.wire_code(), "WARN");
        assert_eq!(Outcome::Failure.wire_code(), "FAIL");
    }

    #[test]
    fn wire_byte_round_trip() {
        for outcome in [Outcome::Failure, Outcome::Success, Outcome::Warning] {
            assert_eq!(Outcome::from_wire_byte(outcome as u8), Some(outcome));
        }
        assert_eq!(Outcome::from_wire_byte(3), None);
    }
}
