use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Runtime settings, read once from `AULA_*` environment variables at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Unset or empty disables the bearer check.
    pub api_token: Option<String>,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub max_connections: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            api_token: None,
            compact_threshold: 1000,
            metrics_port: None,
            max_connections: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value for {}: {:?}", self.var, self.value)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            bind: lookup("AULA_BIND").unwrap_or(defaults.bind),
            port: parse(&lookup, "AULA_PORT")?.unwrap_or(defaults.port),
            data_dir: lookup("AULA_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            api_token: lookup("AULA_API_TOKEN").filter(|t| !t.is_empty()),
            compact_threshold: parse(&lookup, "AULA_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parse(&lookup, "AULA_METRICS_PORT")?,
            max_connections: parse(&lookup, "AULA_MAX_CONNECTIONS")?
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.max_connections),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(config(&[]).unwrap(), Config::default());
    }

    #[test]
    fn reads_overrides() {
        let c = config(&[
            ("AULA_BIND", "127.0.0.1"),
            ("AULA_PORT", "9000"),
            ("AULA_DATA_DIR", "/var/lib/aula"),
            ("AULA_API_TOKEN", "tok"),
            ("AULA_METRICS_PORT", "9100"),
            ("AULA_MAX_CONNECTIONS", "16"),
        ])
        .unwrap();
        assert_eq!(c.bind, "127.0.0.1");
        assert_eq!(c.port, 9000);
        assert_eq!(c.wal_path(), PathBuf::from("/var/lib/aula/bookings.wal"));
        assert_eq!(c.api_token.as_deref(), Some("tok"));
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.max_connections, 16);
    }

    #[test]
    fn rejects_garbage() {
        let err = config(&[("AULA_PORT", "eighty")]).unwrap_err();
        assert_eq!(err.var, "AULA_PORT");
    }

    #[test]
    fn empty_token_means_none() {
        assert_eq!(config(&[("AULA_API_TOKEN", "")]).unwrap().api_token, None);
    }
}
