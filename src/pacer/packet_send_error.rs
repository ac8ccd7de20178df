use std::{fmt, io};

/// Why a pacer transport write failed. `Clone` so it can ride along in the
/// send-result notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketSendError {
    /// The session has no underlying transport.
    NoTransport,
    /// The session has no remote address to send to.
    NoRemoteAddress,
    /// The socket write failed.
    Network { kind: io::ErrorKind, message: String },
}

impl fmt::Display for PacketSendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use PacketSendError::*;
        match self {
            NoTransport => write!(f, "No transport available for session"),
            NoRemoteAddress => write!(f, "No remote address set for session"),
            Network { kind, message } => write!(f, "Network error ({kind:?}): {message}"),
        }
    }
}

impl std::error::Error for PacketSendError {}

impl From<io::Error> for PacketSendError {
    fn from(e: io::Error) -> Self {
        Self::Network {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}
