use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server settings, read once at startup from `SLOTMARKET_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "slotmarket".into(),
            max_connections: 256,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parsed(&lookup, "SLOTMARKET_PORT").unwrap_or(defaults.port),
            bind: lookup("SLOTMARKET_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("SLOTMARKET_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("SLOTMARKET_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed::<usize>(&lookup, "SLOTMARKET_MAX_CONNECTIONS")
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "SLOTMARKET_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            compact_interval: parsed::<u64>(&lookup, "SLOTMARKET_COMPACT_INTERVAL_SECS")
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.compact_interval),
            metrics_port: parsed(&lookup, "SLOTMARKET_METRICS_PORT"),
            tls_cert: lookup("SLOTMARKET_TLS_CERT"),
            tls_key: lookup("SLOTMARKET_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotmarket.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = config_from(&[]);
        assert_eq!(config, Config::default());
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.wal_path(), PathBuf::from("./data/slotmarket.wal"));
    }

    #[test]
    fn variables_override_defaults() {
        let config = config_from(&[
            ("SLOTMARKET_PORT", "6000"),
            ("SLOTMARKET_BIND", "127.0.0.1"),
            ("SLOTMARKET_DATA_DIR", "/var/lib/slotmarket"),
            ("SLOTMARKET_PASSWORD", "secret"),
            ("SLOTMARKET_MAX_CONNECTIONS", "8"),
            ("SLOTMARKET_COMPACT_THRESHOLD", "50"),
            ("SLOTMARKET_COMPACT_INTERVAL_SECS", "5"),
            ("SLOTMARKET_METRICS_PORT", "9100"),
            ("SLOTMARKET_TLS_CERT", "cert.pem"),
            ("SLOTMARKET_TLS_KEY", "key.pem"),
        ]);
        assert_eq!(config.listen_addr(), "127.0.0.1:6000");
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/slotmarket/slotmarket.wal"));
        assert_eq!(config.password, "secret");
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.compact_interval, Duration::from_secs(5));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.tls_cert.as_deref(), Some("cert.pem"));
        assert_eq!(config.tls_key.as_deref(), Some("key.pem"));
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let config = config_from(&[
            ("SLOTMARKET_PORT", "not-a-port"),
            ("SLOTMARKET_MAX_CONNECTIONS", "0"),
            ("SLOTMARKET_COMPACT_INTERVAL_SECS", "-3"),
            ("SLOTMARKET_METRICS_PORT", "99999"),
        ]);
        assert_eq!(config.port, 5433);
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.compact_interval, Duration::from_secs(30));
        assert_eq!(config.metrics_port, None);
    }
}
