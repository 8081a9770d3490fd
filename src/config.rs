use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineSettings;

/// Process configuration, read from `PRIORITIZE_*` environment variables.
/// Unparseable numbers fall back to their defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub directory: Option<PathBuf>,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub store_timeout: Duration,
    /// Reservations that ended longer ago than this are purged. `None` keeps everything.
    pub retention: Option<Duration>,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "prioritize".into(),
            directory: None,
            max_connections: 256,
            compact_threshold: 1000,
            store_timeout: EngineSettings::default().store_timeout,
            retention: None,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        let var = |suffix: &str| lookup(&format!("PRIORITIZE_{suffix}"));
        let parsed = |suffix: &str| var(suffix).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            bind: var("BIND").unwrap_or(defaults.bind),
            port: var("PORT").and_then(|s| s.parse().ok()).unwrap_or(defaults.port),
            data_dir: var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: var("PASSWORD").unwrap_or(defaults.password),
            directory: var("DIRECTORY").map(PathBuf::from),
            max_connections: var("MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed("COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            store_timeout: parsed("STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            retention: parsed("RETENTION_MS").map(Duration::from_millis),
            metrics_port: var("METRICS_PORT").and_then(|s| s.parse().ok()),
            tls_cert: var("TLS_CERT").map(PathBuf::from),
            tls_key: var("TLS_KEY").map(PathBuf::from),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("prioritize.wal")
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            store_timeout: self.store_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(config(&[]), Config::default());
        assert_eq!(Config::default().listen_addr(), "0.0.0.0:5433");
    }

    #[test]
    fn reads_every_variable() {
        let cfg = config(&[
            ("PRIORITIZE_BIND", "127.0.0.1"),
            ("PRIORITIZE_PORT", "6543"),
            ("PRIORITIZE_DATA_DIR", "/var/lib/prioritize"),
            ("PRIORITIZE_PASSWORD", "s3cret"),
            ("PRIORITIZE_DIRECTORY", "/etc/prioritize/directory.json"),
            ("PRIORITIZE_MAX_CONNECTIONS", "8"),
            ("PRIORITIZE_COMPACT_THRESHOLD", "50"),
            ("PRIORITIZE_STORE_TIMEOUT_MS", "250"),
            ("PRIORITIZE_RETENTION_MS", "86400000"),
            ("PRIORITIZE_METRICS_PORT", "9100"),
            ("PRIORITIZE_TLS_CERT", "cert.pem"),
            ("PRIORITIZE_TLS_KEY", "key.pem"),
        ]);
        assert_eq!(cfg.listen_addr(), "127.0.0.1:6543");
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/prioritize/prioritize.wal"));
        assert_eq!(cfg.password, "s3cret");
        assert_eq!(cfg.directory, Some(PathBuf::from("/etc/prioritize/directory.json")));
        assert_eq!(cfg.max_connections, 8);
        assert_eq!(cfg.compact_threshold, 50);
        assert_eq!(cfg.engine_settings().store_timeout, Duration::from_millis(250));
        assert_eq!(cfg.retention, Some(Duration::from_secs(86_400)));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.tls_cert, Some(PathBuf::from("cert.pem")));
        assert_eq!(cfg.tls_key, Some(PathBuf::from("key.pem")));
    }

    #[test]
    fn garbage_numbers_fall_back() {
        let cfg = config(&[
            ("PRIORITIZE_PORT", "http"),
            ("PRIORITIZE_MAX_CONNECTIONS", "-1"),
            ("PRIORITIZE_STORE_TIMEOUT_MS", "soon"),
            ("PRIORITIZE_RETENTION_MS", "forever"),
        ]);
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.store_timeout, Duration::from_millis(2000));
        assert_eq!(cfg.retention, None);
    }
}
