use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{log::log_sink::LogSink, sink_debug, sink_info, sink_warn};

use super::{
    constants::MAX_RATES_PER_ADDRESS,
    rate_history_error::RateHistoryError,
    rate_history_file::{HistoryFormat, RateHistoryFile},
};

/// Remembers the send rates recent calls settled on, per remote IP.
///
/// The file is read lazily on first use. A missing or unreadable file means
/// "no history": lookups return 0 and the next save starts a fresh file.
/// Saves always write the JSON layout, so a legacy file is migrated the first
/// time a rate is stored.
pub struct RateHistoryManager {
    path: PathBuf,
    history: Option<RateHistoryFile>,
    logger: Arc<dyn LogSink>,
}

impl RateHistoryManager {
    pub fn new(path: impl AsRef<Path>, logger: Arc<dyn LogSink>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            history: None,
            logger,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `rate` to the list for `ip_address` and writes the file.
    pub fn save_rate(&mut self, ip_address: &str, rate: u32) -> Result<(), RateHistoryError> {
        let history = self.loaded();
        let list = history.rates.entry(ip_address.to_owned()).or_default();
        list.push(rate);
        if list.len() > MAX_RATES_PER_ADDRESS {
            let excess = list.len() - MAX_RATES_PER_ADDRESS;
            list.drain(..excess);
        }

        let bytes = history.encode()?;
        self.persist(&bytes)?;
        sink_info!(
            self.logger,
            "[RateHistory] stored {} bps for {}",
            rate,
            ip_address
        );
        Ok(())
    }

    /// Median of the stored rates for `ip_address`, or 0 without history.
    pub fn median_rate_get(&mut self, ip_address: &str) -> u32 {
        median(&self.rates(ip_address))
    }

    /// Stored rates for `ip_address`, oldest first.
    pub fn rates(&mut self, ip_address: &str) -> Vec<u32> {
        self.loaded()
            .rates
            .get(ip_address)
            .cloned()
            .unwrap_or_default()
    }

    fn loaded(&mut self) -> &mut RateHistoryFile {
        if self.history.is_none() {
            let file = self.load();
            self.history = Some(file);
        }
        self.history.get_or_insert_with(RateHistoryFile::new)
    }

    fn load(&self) -> RateHistoryFile {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                sink_debug!(self.logger, "[RateHistory] no file at {:?}", self.path);
                return RateHistoryFile::new();
            }
            Err(e) => {
                sink_warn!(
                    self.logger,
                    "[RateHistory] cannot read {:?}: {}",
                    self.path,
                    e
                );
                return RateHistoryFile::new();
            }
        };

        match RateHistoryFile::decode(&bytes) {
            Ok((file, HistoryFormat::Json)) => file,
            Ok((file, HistoryFormat::Legacy)) => {
                sink_info!(
                    self.logger,
                    "[RateHistory] read legacy history for {} addresses from {:?}",
                    file.rates.len(),
                    self.path
                );
                file
            }
            Err(e) => {
                sink_warn!(
                    self.logger,
                    "[RateHistory] ignoring unreadable {:?}: {}",
                    self.path,
                    e
                );
                RateHistoryFile::new()
            }
        }
    }

    fn persist(&self, bytes: &[u8]) -> io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(tmp, &self.path)
    }
}

/// Middle value; the mean of the two middle values for an even count.
#[must_use]
pub fn median(rates: &[u32]) -> u32 {
    if rates.is_empty() {
        return 0;
    }
    let mut sorted = rates.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        let sum = u64::from(sorted[mid - 1]) + u64::from(sorted[mid]);
        u32::try_from(sum / 2).unwrap_or(u32::MAX)
    }
}
