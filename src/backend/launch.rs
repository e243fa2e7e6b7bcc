//! Launch-time resolution of a backend's command line and environment.
//!
//! Everything here is a pure function of the configuration plus an
//! environment lookup, so it can be tested without spawning anything.

use std::collections::HashMap;

use crate::config::BackendConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Variables inherited from the proxy's own environment by every backend.
#[cfg(not(windows))]
const INHERITED_ENV_VARS: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

#[cfg(windows)]
const INHERITED_ENV_VARS: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PATH",
    "PROCESSOR_ARCHITECTURE",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
];

// ─── LaunchSpec ──────────────────────────────────────────────────────────────

/// Fully resolved command line for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
}

impl LaunchSpec {
    /// Resolve a backend config against the current process environment.
    pub fn from_config(config: &BackendConfig) -> Self {
        Self::resolve(config, |name| std::env::var(name).ok())
    }

    /// Resolve a backend config against an arbitrary environment lookup.
    pub fn resolve<F>(config: &BackendConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let args = resolve_args(&config.args, &lookup);
        let command = resolve_command_path(&config.command, &lookup);

        let mut env = default_environment(&lookup);
        env.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        Self {
            command,
            args,
            env,
            cwd: config.cwd.clone(),
        }
    }
}

// ─── Resolution ──────────────────────────────────────────────────────────────

/// Replace `{IDENT}` placeholder arguments with the value of the environment
/// variable `IDENT`.
///
/// Only an argument that is exactly one brace-delimited identifier is a
/// placeholder; anything else, and placeholders whose variable is unset, are
/// passed through verbatim.
pub fn resolve_args<F>(raw: &[String], lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    raw.iter()
        .map(|arg| match placeholder_name(arg) {
            Some(name) => lookup(name).unwrap_or_else(|| arg.clone()),
            None => arg.clone(),
        })
        .collect()
}

/// Return the identifier inside `{IDENT}`, if `arg` is such a placeholder.
fn placeholder_name(arg: &str) -> Option<&str> {
    let inner = arg.strip_prefix('{')?.strip_suffix('}')?;
    let mut chars = inner.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Some(inner)
    } else {
        None
    }
}

/// Resolve the executable through the `<COMMAND_UPPER>_PATH` override.
///
/// E.g. `npx` honours `NPX_PATH`. An empty override is ignored.
pub fn resolve_command_path<F>(command: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let var = format!("{}_PATH", command.to_uppercase());
    match lookup(&var) {
        Some(path) if !path.is_empty() => {
            tracing::info!(command, path = %path, "using command path override");
            path
        }
        _ => command.to_string(),
    }
}

/// Snapshot of the inherited default environment.
///
/// Values that look like shell functions (`()` prefix) are skipped.
pub fn default_environment<F>(lookup: F) -> HashMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    INHERITED_ENV_VARS
        .iter()
        .filter_map(|key| {
            let value = lookup(key)?;
            if value.starts_with("()") {
                None
            } else {
                Some((key.to_string(), value))
            }
        })
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_args_substitutes_set_placeholders() {
        let env = env_of(&[("API_TOKEN", "secret")]);
        let resolved = resolve_args(&strings(&["--token", "{API_TOKEN}"]), env);
        assert_eq!(resolved, strings(&["--token", "secret"]));
    }

    #[test]
    fn test_resolve_args_keeps_unset_placeholder() {
        let resolved = resolve_args(&strings(&["{MISSING_VAR}"]), env_of(&[]));
        assert_eq!(resolved, strings(&["{MISSING_VAR}"]));
    }

    #[test]
    fn test_resolve_args_only_exact_placeholders() {
        let env = env_of(&[("HOME", "/home/me"), ("1BAD", "x")]);
        let raw = strings(&["prefix{HOME}", "{HOME}/x", "{1BAD}", "{}", "{HO-ME}", "{_ok}"]);
        let resolved = resolve_args(&raw, env);
        assert_eq!(resolved, raw);
    }

    #[test]
    fn test_resolve_args_underscore_identifier() {
        let env = env_of(&[("_DIR", "/data")]);
        let resolved = resolve_args(&strings(&["{_DIR}"]), env);
        assert_eq!(resolved, strings(&["/data"]));
    }

    #[test]
    fn test_resolve_command_path_override() {
        let env = env_of(&[("UVX_PATH", "/opt/bin/uvx")]);
        assert_eq!(resolve_command_path("uvx", env), "/opt/bin/uvx");
    }

    #[test]
    fn test_resolve_command_path_empty_override_ignored() {
        let env = env_of(&[("NPX_PATH", "")]);
        assert_eq!(resolve_command_path("npx", env), "npx");
    }

    #[test]
    fn test_resolve_command_path_fallback() {
        assert_eq!(resolve_command_path("node", env_of(&[])), "node");
    }

    #[cfg(not(windows))]
    #[test]
    fn test_default_environment_filters() {
        let env = env_of(&[
            ("PATH", "/usr/bin"),
            ("SHELL", "() { :; }"),
            ("SECRET", "nope"),
        ]);
        let defaults = default_environment(env);
        assert_eq!(defaults.get("PATH").map(String::as_str), Some("/usr/bin"));
        assert!(!defaults.contains_key("SHELL"));
        assert!(!defaults.contains_key("SECRET"));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_launch_spec_overrides_win() {
        let config = BackendConfig {
            id: Some("fs".into()),
            command: "server".into(),
            args: strings(&["{ROOT}"]),
            env: HashMap::from([("PATH".to_string(), "/custom".to_string())]),
            cwd: Some("/srv".into()),
        };
        let env = env_of(&[("PATH", "/usr/bin"), ("ROOT", "/data"), ("HOME", "/home/me")]);
        let spec = LaunchSpec::resolve(&config, env);

        assert_eq!(spec.command, "server");
        assert_eq!(spec.args, strings(&["/data"]));
        assert_eq!(spec.env.get("PATH").map(String::as_str), Some("/custom"));
        assert_eq!(spec.env.get("HOME").map(String::as_str), Some("/home/me"));
        assert_eq!(spec.cwd.as_deref(), Some("/srv"));
    }
}
