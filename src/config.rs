use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server settings, read from `SLOTWISE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub catalog: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub compact_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7420,
            data_dir: PathBuf::from("./data"),
            catalog: None,
            metrics_port: None,
            max_connections: 256,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or unparseable values fall back to
    /// the defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            bind: get("SLOTWISE_BIND").unwrap_or(d.bind),
            port: parsed(&get, "SLOTWISE_PORT").unwrap_or(d.port),
            data_dir: get("SLOTWISE_DATA_DIR").map_or(d.data_dir, PathBuf::from),
            catalog: get("SLOTWISE_CATALOG").map(PathBuf::from),
            metrics_port: parsed(&get, "SLOTWISE_METRICS_PORT"),
            max_connections: parsed(&get, "SLOTWISE_MAX_CONNECTIONS").unwrap_or(d.max_connections),
            compact_threshold: parsed(&get, "SLOTWISE_COMPACT_THRESHOLD")
                .unwrap_or(d.compact_threshold),
            compact_interval: parsed(&get, "SLOTWISE_COMPACT_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map_or(d.compact_interval, Duration::from_secs),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("appointments.wal")
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.trim().parse().ok())
}
