use crate::{
    config::Config,
    log::{log_msg::LogMsg, logger_handle::LoggerHandle},
};

use std::{
    fs::{self, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::mpsc::{self, TrySendError},
    thread,
    time::{SystemTime, UNIX_EPOCH},
};

use super::log_level::LogLevel;

/// Flush every 100 lines while debugging so a crash leaves a useful tail.
#[cfg(feature = "log-debug")]
const FLUSH_BATCH_SIZE: u32 = 100;

/// Flush every 1000 lines otherwise.
#[cfg(not(feature = "log-debug"))]
const FLUSH_BATCH_SIZE: u32 = 1_000;

/// Default capacity of the producer queue.
pub const DEFAULT_LOG_QUEUE_CAPACITY: usize = 4_096;

/// Bounded, non-blocking logger that writes to a per-process log file.
///
/// Producers (the pacer thread, flow-control timers, the demo binary) push
/// `LogMsg`s into a bounded channel; a dedicated `logger-worker` thread writes
/// them out and flushes in batches. Dropping every handle and the `Logger`
/// itself ends the worker after a final flush.
pub struct Logger {
    handle: LoggerHandle,
    thread: Option<thread::JoinHandle<()>>,
    file_path: PathBuf,
}

impl Logger {
    /// Starts the logger from the `[Logging]` section of `config`.
    ///
    /// Keys: `log_path` (directory, `~` expanded) and `log_filename` (prefix).
    /// Without `log_path` the file goes to `logs/` next to the executable.
    #[must_use]
    pub fn start(config: &Config, cap: usize) -> Self {
        let app_name = config.get_non_empty("Logging", "log_filename");

        match config.get_non_empty("Logging", "log_path") {
            Some(dir) => Self::start_in_dir(expand_path(dir), app_name, cap),
            None => Self::start_in_dir(exe_dir_fallback_cwd().join("logs"), app_name, cap),
        }
    }

    /// Starts the logger in `dir`, creating it if needed.
    ///
    /// File name: `<app_name>-YYYYMMDD_HHMMSS-pid<pid>.log`.
    pub fn start_in_dir<D: AsRef<Path>>(dir: D, app_name: Option<&str>, cap: usize) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let _ = fs::create_dir_all(&dir);

        let ts = timestamp_for_filename();
        let pid = std::process::id();
        let fname = match app_name {
            Some(name) => format!("{name}-{ts}-pid{pid}.log"),
            None => format!("{ts}-pid{pid}.log"),
        };
        let file_path = dir.join(fname);

        let (tx, rx) = mpsc::sync_channel::<LogMsg>(cap.max(1));
        let worker_path = file_path.clone();

        let thread = thread::Builder::new()
            .name("logger-worker".into())
            .spawn(move || run_worker(&worker_path, &rx))
            .ok();

        Self {
            handle: LoggerHandle { tx },
            thread,
            file_path,
        }
    }

    /// Enqueues a message without blocking; see [`LoggerHandle::try_log`].
    pub fn try_log<S: Into<String>>(
        &self,
        level: LogLevel,
        text: S,
        target: &'static str,
    ) -> Result<(), TrySendError<LogMsg>> {
        self.handle.try_log(level, text, target)
    }

    /// Returns a cloneable handle usable as `Arc<dyn LogSink>`.
    #[must_use]
    pub fn handle(&self) -> LoggerHandle {
        self.handle.clone()
    }

    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Closes this logger's sender and waits for the worker to drain.
    ///
    /// Outstanding `LoggerHandle` clones keep the worker alive; drop them first.
    pub fn shutdown(mut self) {
        let Self { handle, thread, .. } = &mut self;
        let (dead_tx, _) = mpsc::sync_channel(1);
        drop(std::mem::replace(handle, LoggerHandle { tx: dead_tx }));
        if let Some(worker) = thread.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(path: &Path, rx: &mpsc::Receiver<LogMsg>) {
    // Target file -> temp file -> sink; logging must never take the process down.
    let writer: Box<dyn Write + Send> =
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => Box::new(f),
            Err(_) => {
                let fallback = std::env::temp_dir().join("rustypace-fallback.log");
                match OpenOptions::new().create(true).append(true).open(&fallback) {
                    Ok(f) => Box::new(f),
                    Err(_) => Box::new(io::sink()),
                }
            }
        };

    let mut out = BufWriter::new(writer);
    let mut lines_written: u32 = 0;

    while let Ok(m) = rx.recv() {
        let _ = writeln!(
            &mut out,
            "[{}] {} {} | {}",
            m.level.as_str(),
            m.ts_ms,
            m.target,
            m.text
        );
        lines_written = lines_written.wrapping_add(1);
        if lines_written.is_multiple_of(FLUSH_BATCH_SIZE) {
            let _ = out.flush();
        }
    }

    let _ = out.flush();
}

/// Directory of the running executable, or the working directory on error.
fn exe_dir_fallback_cwd() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// `YYYYMMDD_HHMMSS` in UTC, falling back to `unix_<secs>`.
fn timestamp_for_filename() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    match unix_to_utc(secs) {
        Some(tm) => format!(
            "{:04}{:02}{:02}_{:02}{:02}{:02}",
            tm.year, tm.mon, tm.day, tm.hour, tm.min, tm.sec
        ),
        None => format!("unix_{secs}"),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SimpleUtc {
    year: i32,
    mon: u32,
    day: u32,
    hour: u32,
    min: u32,
    sec: u32,
}

/// Civil-from-days conversion of a UNIX timestamp.
#[allow(clippy::many_single_char_names)]
fn unix_to_utc(mut s: u64) -> Option<SimpleUtc> {
    let sec = (s % 60) as u32;
    s /= 60;
    let min = (s % 60) as u32;
    s /= 60;
    let hour = (s % 24) as u32;
    s /= 24;

    let z: i128 = i128::from(s) + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = mp + if mp < 10 { 3 } else { -9 };

    Some(SimpleUtc {
        year: i32::try_from(y + i128::from(m <= 2)).ok()?,
        mon: u32::try_from(m).ok()?,
        day: u32::try_from(d).ok()?,
        hour,
        min,
        sec,
    })
}

/// Expands a leading `~` to the home directory.
fn expand_path(path_str: &str) -> PathBuf {
    if let Some(rest) = path_str.strip_prefix('~') {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .ok()
            .map(PathBuf::from);

        if let Some(mut home_path) = home {
            if rest.is_empty() {
                return home_path;
            }
            if let Some(tail) = rest.strip_prefix('/').or_else(|| rest.strip_prefix('\\')) {
                home_path.push(tail);
                return home_path;
            }
        }
    }
    PathBuf::from(path_str)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::log::log_sink::LogSink;
    use rand::RngCore;

    #[test]
    fn unix_epoch_and_known_date_convert() {
        assert_eq!(
            unix_to_utc(0),
            Some(SimpleUtc { year: 1970, mon: 1, day: 1, hour: 0, min: 0, sec: 0 })
        );
        // 2024-02-29T12:34:56Z
        assert_eq!(
            unix_to_utc(1_709_210_096),
            Some(SimpleUtc { year: 2024, mon: 2, day: 29, hour: 12, min: 34, sec: 56 })
        );
    }

    #[test]
    fn lines_reach_the_file_after_shutdown() {
        let dir = std::env::temp_dir().join(format!("rustypace_log_{}", rand::thread_rng().next_u64()));
        let logger = Logger::start_in_dir(&dir, Some("unit"), 16);
        let path = logger.file_path().to_path_buf();

        {
            let handle = logger.handle();
            handle.log(LogLevel::Warn, "budget exhausted", "pacer");
        }
        logger.try_log(LogLevel::Info, "stopping", "pacer").unwrap();
        logger.shutdown();

        let contents = fs::read_to_string(&path).expect("log file written");
        assert!(contents.contains("[WARN ]"));
        assert!(contents.contains("budget exhausted"));
        assert!(contents.contains("stopping"));

        let _ = fs::remove_dir_all(&dir);
    }
}
