use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::registry::SessionId;

/// Everything that can end a connection or a session.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed login: {0}")]
    MalformedLogin(String),

    #[error("username '{0}' is already in use")]
    DuplicateUsername(String),

    #[error("no valid login within {0:?}")]
    LoginTimeout(Duration),

    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("outbound queue full ({depth} lines pending)")]
    WriteBackpressureExceeded { depth: usize },

    #[error("no traffic for {0:?}")]
    IdleTimeout(Duration),

    #[error("session id {0} registered twice")]
    DuplicateSessionId(SessionId),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Copyable discriminant of [`RelayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedLogin,
    DuplicateUsername,
    LoginTimeout,
    LineTooLong,
    ConnectionClosed,
    WriteBackpressureExceeded,
    IdleTimeout,
    DuplicateSessionId,
    Io,
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedLogin(_) => ErrorKind::MalformedLogin,
            Self::DuplicateUsername(_) => ErrorKind::DuplicateUsername,
            Self::LoginTimeout(_) => ErrorKind::LoginTimeout,
            Self::LineTooLong { .. } => ErrorKind::LineTooLong,
            Self::ConnectionClosed => ErrorKind::ConnectionClosed,
            Self::WriteBackpressureExceeded { .. } => ErrorKind::WriteBackpressureExceeded,
            Self::IdleTimeout(_) => ErrorKind::IdleTimeout,
            Self::DuplicateSessionId(_) => ErrorKind::DuplicateSessionId,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Registry invariant violations; the process must not keep running.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DuplicateSessionId(_))
    }

    /// Failures raised before the session was registered.
    pub fn is_handshake(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MalformedLogin | ErrorKind::DuplicateUsername | ErrorKind::LoginTimeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            RelayError::LineTooLong { limit: 8 }.kind(),
            ErrorKind::LineTooLong
        );
        assert_eq!(
            RelayError::from(io::Error::other("boom")).kind(),
            ErrorKind::Io
        );
    }

    #[test]
    fn only_duplicate_id_is_fatal() {
        assert!(RelayError::DuplicateSessionId(SessionId::from("ABC")).is_fatal());
        assert!(!RelayError::DuplicateUsername("bob".into()).is_fatal());
        assert!(!RelayError::ConnectionClosed.is_fatal());
    }

    #[test]
    fn handshake_errors() {
        assert!(RelayError::LoginTimeout(Duration::from_secs(1)).is_handshake());
        assert!(RelayError::MalformedLogin("x".into()).is_handshake());
        assert!(!RelayError::IdleTimeout(Duration::from_secs(1)).is_handshake());
    }

    #[test]
    fn display_mentions_limit() {
        let err = RelayError::WriteBackpressureExceeded { depth: 4 };
        assert_eq!(err.to_string(), "outbound queue full (4 lines pending)");
    }
}
