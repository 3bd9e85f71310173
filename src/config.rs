//! Server configuration.
//!
//! Settings come from an optional `shellql.toml`, then environment variables
//! (a `.env` file next to the config is loaded first), then CLI flags.
//!
//! ## Environment Variables
//!
//! - `SHELLQL_HOST` - Bind address
//! - `SHELLQL_PORT` - Listen port
//! - `SHELLQL_RUN_TTL_SECS` - Lifetime of a run that is never streamed
//! - `SHELLQL_MAX_QUERY_LEN` - Longest accepted raw query, in bytes
//! - `SHELLQL_SEED` - JSON seed file for the in-memory store

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::executor::{DEFAULT_MAX_QUERY_LEN, DEFAULT_PENDING_TTL};

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "shellql.toml";

pub const ENV_HOST: &str = "SHELLQL_HOST";
pub const ENV_PORT: &str = "SHELLQL_PORT";
pub const ENV_RUN_TTL_SECS: &str = "SHELLQL_RUN_TTL_SECS";
pub const ENV_MAX_QUERY_LEN: &str = "SHELLQL_MAX_QUERY_LEN";
pub const ENV_SEED: &str = "SHELLQL_SEED";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_run_ttl_secs")]
    pub run_ttl_secs: u64,
    #[serde(default = "default_max_query_len")]
    pub max_query_len: usize,
    /// Seed file loaded into the in-memory store at startup
    #[serde(default)]
    pub seed_path: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6780
}

fn default_run_ttl_secs() -> u64 {
    DEFAULT_PENDING_TTL.as_secs()
}

fn default_max_query_len() -> usize {
    DEFAULT_MAX_QUERY_LEN
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            run_ttl_secs: default_run_ttl_secs(),
            max_query_len: default_max_query_len(),
            seed_path: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a directory.
    ///
    /// A missing config file is not an error; defaults apply. A `.env` file in
    /// the directory is loaded before environment overrides are read.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let env_path = dir.join(".env");
        if env_path.exists() {
            if let Err(e) = dotenvy::from_path(&env_path) {
                tracing::warn!("Ignoring unreadable {}: {}", env_path.display(), e);
            }
        }

        let config_path = dir.join(CONFIG_FILE_NAME);
        let mut config = if config_path.exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        if config.max_query_len == 0 {
            anyhow::bail!("max_query_len must be positive in {}", path.display());
        }
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a variable lookup; unparsable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(host) = var(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = var(ENV_PORT).and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Some(ttl) = var(ENV_RUN_TTL_SECS).and_then(|v| v.parse().ok()) {
            self.run_ttl_secs = ttl;
        }
        if let Some(len) = var(ENV_MAX_QUERY_LEN).and_then(|v| v.parse().ok()) {
            if len > 0 {
                self.max_query_len = len;
            }
        }
        if let Some(seed) = var(ENV_SEED) {
            self.seed_path = Some(PathBuf::from(seed));
        }
    }

    pub fn run_ttl(&self) -> Duration {
        Duration::from_secs(self.run_ttl_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::from_file(&dir.path().join(CONFIG_FILE_NAME));
        assert!(config.is_err());

        let config = ServerConfig::default();
        assert_eq!(config.run_ttl(), Duration::from_secs(300));
        assert_eq!(config.max_query_len, 64 * 1024);
        assert_eq!(config.bind_addr(), "127.0.0.1:6780");
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "port = 9000\nseed_path = \"seed.json\"\n").unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.seed_path, Some(PathBuf::from("seed.json")));
    }

    #[test]
    fn test_zero_query_len_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "max_query_len = 0\n").unwrap();
        assert!(ServerConfig::from_file(&path).is_err());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_malformed_dotenv_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".env"), "this line has no assignment\n").unwrap();

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let config = tracing::subscriber::with_default(subscriber, || ServerConfig::load(dir.path()));
        assert_eq!(config.unwrap().max_query_len, DEFAULT_MAX_QUERY_LEN);

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("WARN"));
        assert!(output.contains(".env"));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_HOST, "0.0.0.0"),
            (ENV_PORT, "not-a-port"),
            (ENV_RUN_TTL_SECS, "60"),
            (ENV_MAX_QUERY_LEN, "0"),
            (ENV_SEED, ""),
        ]);
        let mut config = ServerConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 6780);
        assert_eq!(config.run_ttl_secs, 60);
        assert_eq!(config.max_query_len, DEFAULT_MAX_QUERY_LEN);
        assert!(config.seed_path.is_none());
    }
}
