use std::{fmt, io};

#[derive(Debug)]
pub enum RateHistoryError {
    Io(io::Error),
    Json(serde_json::Error),
    /// The bytes are not a valid legacy binary history.
    LegacyFormat(String),
}

impl fmt::Display for RateHistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use RateHistoryError::*;
        match self {
            Io(e) => write!(f, "Rate history I/O error: {e}"),
            Json(e) => write!(f, "Rate history JSON error: {e}"),
            LegacyFormat(msg) => write!(f, "Malformed legacy rate history: {msg}"),
        }
    }
}

impl std::error::Error for RateHistoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RateHistoryError::Io(e) => Some(e),
            RateHistoryError::Json(e) => Some(e),
            RateHistoryError::LegacyFormat(_) => None,
        }
    }
}

impl From<io::Error> for RateHistoryError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for RateHistoryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
