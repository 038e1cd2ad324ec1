//! Reads `$XDG_CONFIG_HOME/<app_name>/config.toml`.
//!
//! Two pieces are read from the file: an `[env]` table of raw string
//! overrides (a general escape hatch) and first-class runtime fields under
//! `[runtime]`, both folded together by `lib.rs`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::LoadError;

pub fn xdg_config_path(app_name: &str) -> Option<PathBuf> {
    let dirs = cross_xdg::BaseDirs::new().ok()?;
    let path = dirs.config_home().join(app_name).join("config.toml");
    path.is_file().then_some(path)
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub runtime: RuntimeFields,
}

/// First-class settings, all optional: an absent field falls back to
/// [`crate::RuntimeConfig`]'s defaults unless overridden by env/`.env`.
#[derive(Debug, Default, Deserialize)]
pub struct RuntimeFields {
    pub store_path: Option<String>,
    pub worker_threads: Option<usize>,
    pub retention_window_secs: Option<u64>,
    pub alert_recipient: Option<String>,
    pub default_agent: Option<String>,
    pub health_window_secs: Option<u64>,
    pub workflow_queue_depth: Option<usize>,
    pub webhook_prefix: Option<String>,
}

/// Loads the `[env]` table, or an empty map if there is no config file (or
/// it has no `[env]` section).
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    Ok(load_config_file(app_name)?.unwrap_or_default().env)
}

/// Loads the whole parsed file, or `None` if no config file exists.
pub fn load_config_file(app_name: &str) -> Result<Option<ConfigFile>, LoadError> {
    let Some(path) = xdg_config_path(app_name) else {
        return Ok(None);
    };
    let content = std::fs::read_to_string(&path).map_err(|_| LoadError::XdgRead)?;
    let parsed: ConfigFile = toml::from_str(&content)?;
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &std::path::Path, app_name: &str, content: &str) {
        let app_dir = dir.join(app_name);
        std::fs::create_dir_all(&app_dir).unwrap();
        let mut f = std::fs::File::create(app_dir.join("config.toml")).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn missing_config_file_path_is_none() {
        assert_eq!(xdg_config_path("no-such-app-xyz"), None);
    }

    #[test]
    fn reads_env_table() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "conductor-test-1", "[env]\nFOO = \"bar\"\n");
        let path = dir.path().join("conductor-test-1").join("config.toml");
        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: ConfigFile = toml::from_str(&content).unwrap();
        assert_eq!(parsed.env.get("FOO"), Some(&"bar".to_string()));
    }

    #[test]
    fn reads_runtime_fields() {
        let content = "[runtime]\nworker_threads = 4\nwebhook_prefix = \"/api/hooks\"\n";
        let parsed: ConfigFile = toml::from_str(content).unwrap();
        assert_eq!(parsed.runtime.worker_threads, Some(4));
        assert_eq!(parsed.runtime.webhook_prefix, Some("/api/hooks".to_string()));
    }

    #[test]
    fn empty_env_section_parses_to_empty_map() {
        let content = "[env]\n";
        let parsed: ConfigFile = toml::from_str(content).unwrap();
        assert!(parsed.env.is_empty());
    }

    #[test]
    fn invalid_toml_fails_to_parse() {
        let content = "this is not [ valid toml";
        let result: Result<ConfigFile, _> = toml::from_str(content);
        assert!(result.is_err());
    }

    #[test]
    fn file_with_no_sections_at_all_parses_to_defaults() {
        let parsed: ConfigFile = toml::from_str("").unwrap();
        assert!(parsed.env.is_empty());
        assert_eq!(parsed.runtime.worker_threads, None);
    }
}
