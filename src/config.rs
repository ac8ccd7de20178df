use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::str::FromStr;
use std::time::Duration;

/// Errors produced while loading or interpreting a configuration file.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: io::Error,
    },
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ConfigError::*;
        match self {
            Io { path, source } => write!(f, "Error reading file {path}: {source}"),
            InvalidValue {
                section,
                key,
                value,
            } => write!(f, "Invalid value for [{section}] {key}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::InvalidValue { .. } => None,
        }
    }
}

/// INI-style configuration: `key = value` globals followed by `[Section]`
/// blocks. `#` starts a comment line; values may be quoted.
#[derive(Debug, Default)]
pub struct Config {
    pub globals: HashMap<String, String>,
    pub sections: HashMap<String, HashMap<String, String>>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Ok(Self::parse(&content))
    }

    /// Parses configuration text. Malformed lines are skipped.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut config = Self::empty();
        let mut current_section: Option<String> = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                current_section = Some(name.trim().to_string());
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim().to_string();
                let value = value.trim().trim_matches('"').to_string();

                match &current_section {
                    None => {
                        config.globals.insert(key, value);
                    }
                    Some(sec) => {
                        config
                            .sections
                            .entry(sec.clone())
                            .or_default()
                            .insert(key, value);
                    }
                }
            }
        }
        config
    }

    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|sec| sec.get(key))
            .map(|s| s.as_str())
    }

    #[must_use]
    pub fn get_non_empty(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section, key).filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn get_global(&self, key: &str) -> Option<&str> {
        self.globals.get(key).map(|s| s.as_str())
    }

    #[must_use]
    pub fn get_or_default<'a>(&'a self, section: &str, key: &str, default: &'a str) -> &'a str {
        self.get_non_empty(section, key)
            .or_else(|| self.get_global(key).filter(|s| !s.is_empty()))
            .unwrap_or(default)
    }

    /// Parses `[section] key` (falling back to a global of the same name).
    /// A missing key yields `Ok(default)`; an unparsable one is an error.
    pub fn get_parsed<T: FromStr>(
        &self,
        section: &str,
        key: &str,
        default: T,
    ) -> Result<T, ConfigError> {
        let raw = self
            .get_non_empty(section, key)
            .or_else(|| self.get_global(key).filter(|s| !s.is_empty()));

        match raw {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                section: section.to_owned(),
                key: key.to_owned(),
                value: value.to_owned(),
            }),
        }
    }
}

/// Section holding the transport tunables.
pub const TRANSPORT_SECTION: &str = "Transport";

/// Typed view over `[Transport]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// Number of preallocated packets in the record pool.
    pub packet_pool_size: usize,
    /// Largest RTP payload a single packet carries.
    pub max_packet_payload: usize,
    /// Bytes reserved in front of the payload for protocol headers.
    pub packet_headroom: usize,
    /// Target gap between pacer wake-ups.
    pub pace_interval: Duration,
    /// Upper bound on the elapsed time credited in one budget top-up.
    pub max_pace_interval: Duration,
    /// Queued packets older than this are discarded before a new frame.
    pub stale_queue_age: Duration,
    /// Where learned send rates are persisted.
    pub rate_history_path: String,
    /// Cadence of the record-side flow-control timer.
    pub flow_control_interval: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            packet_pool_size: 600,
            max_packet_payload: 1200,
            packet_headroom: 80,
            pace_interval: Duration::from_millis(10),
            max_pace_interval: Duration::from_millis(50),
            stale_queue_age: Duration::from_millis(500),
            rate_history_path: "rate_history.json".to_owned(),
            flow_control_interval: Duration::from_millis(1000),
        }
    }
}

impl TransportSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let d = Self::default();
        let ms = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            let millis = config.get_parsed(TRANSPORT_SECTION, key, default.as_millis() as u64)?;
            Ok(Duration::from_millis(millis))
        };

        let settings = Self {
            packet_pool_size: config.get_parsed(
                TRANSPORT_SECTION,
                "packet_pool_size",
                d.packet_pool_size,
            )?,
            max_packet_payload: config.get_parsed(
                TRANSPORT_SECTION,
                "max_packet_payload",
                d.max_packet_payload,
            )?,
            packet_headroom: config.get_parsed(
                TRANSPORT_SECTION,
                "packet_headroom",
                d.packet_headroom,
            )?,
            pace_interval: ms("pace_interval_ms", d.pace_interval)?,
            max_pace_interval: ms("max_pace_interval_ms", d.max_pace_interval)?,
            stale_queue_age: ms("stale_queue_ms", d.stale_queue_age)?,
            rate_history_path: config
                .get_or_default(TRANSPORT_SECTION, "rate_history_path", &d.rate_history_path)
                .to_owned(),
            flow_control_interval: ms("flow_control_interval_ms", d.flow_control_interval)?,
        };

        if settings.packet_pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                section: TRANSPORT_SECTION.to_owned(),
                key: "packet_pool_size".to_owned(),
                value: "0".to_owned(),
            });
        }
        if settings.max_pace_interval < settings.pace_interval {
            return Err(ConfigError::InvalidValue {
                section: TRANSPORT_SECTION.to_owned(),
                key: "max_pace_interval_ms".to_owned(),
                value: settings.max_pace_interval.as_millis().to_string(),
            });
        }
        Ok(settings)
    }

    /// Buffer capacity each pooled packet needs.
    #[must_use]
    pub fn packet_capacity(&self) -> usize {
        self.packet_headroom + self.max_packet_payload
    }
}
