//! Proxy configuration loading.
//!
//! Reads the backend list from a JSON or YAML document and resolves the
//! timeout settings from environment variables and defaults.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::proxy::errors::ProxyError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Per-backend handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Collective deadline for connecting every backend.
pub const DEFAULT_CONNECT_ALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Collective deadline for tearing every backend down.
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Environment variable overriding [`DEFAULT_CONNECT_TIMEOUT`], in seconds.
pub const CONNECT_TIMEOUT_ENV: &str = "MCP_PROXY_CONNECT_TIMEOUT";

// ─── Public Types ────────────────────────────────────────────────────────────

/// One backend entry of the configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendConfig {
    /// Stable identifier used as the namespace prefix. Generated when absent.
    #[serde(default, alias = "name")]
    pub id: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the backend process.
    #[serde(default)]
    pub cwd: Option<String>,
}

impl BackendConfig {
    /// Minimal config for `command` with an explicit identifier.
    pub fn new(id: &str, command: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            command: command.to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub servers: Vec<BackendConfig>,
}

/// Timeouts governing backend lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyOptions {
    pub connect_timeout: Duration,
    pub connect_all_timeout: Duration,
    pub disconnect_timeout: Duration,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connect_all_timeout: DEFAULT_CONNECT_ALL_TIMEOUT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
        }
    }
}

impl ProxyOptions {
    /// Defaults, with the connect timeout taken from
    /// `MCP_PROXY_CONNECT_TIMEOUT` when it holds a positive number of seconds.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();
        if let Some(raw) = lookup(CONNECT_TIMEOUT_ENV) {
            match raw.trim().parse::<f64>().ok().and_then(positive_seconds) {
                Some(timeout) => options.connect_timeout = timeout,
                None => {
                    tracing::warn!(
                        var = CONNECT_TIMEOUT_ENV,
                        value = %raw,
                        "ignoring invalid connect timeout"
                    );
                }
            }
        }
        options
    }
}

/// A strictly positive duration that fits in a `Duration`.
pub fn positive_seconds(secs: f64) -> Option<Duration> {
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Load the configuration document at `path`.
///
/// `.yaml` / `.yml` files are parsed as YAML, everything else as JSON.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ProxyError> {
    let content = std::fs::read_to_string(path).map_err(|e| ProxyError::Config {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let config = if is_yaml(path) {
        serde_yaml::from_str::<ProxyConfig>(&content).map_err(|e| ProxyError::Config {
            reason: format!("failed to parse {}: {e}", path.display()),
        })?
    } else {
        serde_json::from_str::<ProxyConfig>(&content).map_err(|e| ProxyError::Config {
            reason: format!("failed to parse {}: {e}", path.display()),
        })?
    };

    tracing::info!(
        path = %path.display(),
        count = config.servers.len(),
        "loaded backend config"
    );

    Ok(config)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_json_config() {
        let file = write_temp(
            ".json",
            r#"{"servers": [
                {"id": "fs", "command": "npx", "args": ["-y", "server-fs", "{ROOT}"]},
                {"name": "git", "command": "uvx", "env": {"GIT_DIR": "/repo"}}
            ]}"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].id.as_deref(), Some("fs"));
        assert_eq!(config.servers[0].args.len(), 3);
        assert_eq!(config.servers[1].id.as_deref(), Some("git"));
        assert_eq!(config.servers[1].env["GIT_DIR"], "/repo");
    }

    #[test]
    fn test_load_yaml_config() {
        let file = write_temp(
            ".yaml",
            "servers:\n  - command: python3\n    args: [\"-m\", \"server\"]\n    cwd: /srv\n",
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.servers.len(), 1);
        assert!(config.servers[0].id.is_none());
        assert_eq!(config.servers[0].cwd.as_deref(), Some("/srv"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ProxyError::Config { .. }));
    }

    #[test]
    fn test_load_config_malformed() {
        let file = write_temp(".json", r#"{"servers": [{"args": []}]}"#);
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn test_options_from_env() {
        let options = ProxyOptions::from_lookup(|name| {
            (name == CONNECT_TIMEOUT_ENV).then(|| "2.5".to_string())
        });
        assert_eq!(options.connect_timeout, Duration::from_millis(2500));
        assert_eq!(options.connect_all_timeout, DEFAULT_CONNECT_ALL_TIMEOUT);
    }

    #[test]
    fn test_options_invalid_env_falls_back() {
        let options = ProxyOptions::from_lookup(|_| Some("soon".to_string()));
        assert_eq!(options, ProxyOptions::default());
    }

    #[test]
    fn test_options_oversized_env_falls_back() {
        for raw in ["1e30", "inf", "-3", "0"] {
            let options = ProxyOptions::from_lookup(|_| Some(raw.to_string()));
            assert_eq!(options, ProxyOptions::default(), "value {raw}");
        }
    }

    #[test]
    fn test_positive_seconds_bounds() {
        assert_eq!(positive_seconds(0.25), Some(Duration::from_millis(250)));
        assert_eq!(positive_seconds(1e30), None);
        assert_eq!(positive_seconds(f64::NAN), None);
        assert_eq!(positive_seconds(0.0), None);
    }
}
