use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{constants::FORMAT_VERSION, legacy_format, rate_history_error::RateHistoryError};

/// In-memory form of the history file, whichever layout it was read from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateHistoryFile {
    pub version: u32,
    /// Remote address -> rates in bits per second, oldest first.
    pub rates: BTreeMap<String, Vec<u32>>,
}

/// Which on-disk layout a history was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryFormat {
    Json,
    Legacy,
}

impl RateHistoryFile {
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: FORMAT_VERSION,
            rates: BTreeMap::new(),
        }
    }

    /// Tries the JSON layout first, then the legacy binary one.
    pub fn decode(bytes: &[u8]) -> Result<(Self, HistoryFormat), RateHistoryError> {
        match serde_json::from_slice::<Self>(bytes) {
            Ok(file) => Ok((file, HistoryFormat::Json)),
            Err(json_err) => match legacy_format::decode(bytes) {
                Ok(rates) => Ok((
                    Self {
                        version: FORMAT_VERSION,
                        rates,
                    },
                    HistoryFormat::Legacy,
                )),
                // A file that does not even look binary is reported as bad JSON.
                Err(_) if bytes.first().is_some_and(|b| *b == b'{') => {
                    Err(RateHistoryError::Json(json_err))
                }
                Err(e) => Err(e),
            },
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, RateHistoryError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}
