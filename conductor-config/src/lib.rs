//! Loads `conductor`'s configuration: environment variables (existing
//! process env, then `.env`, then `$XDG_CONFIG_HOME/conductor/config.toml`'s
//! `[env]` table, in that precedence order) plus the runtime's first-class
//! settings (store path, worker pool size, retention window, alert
//! recipient, default agent, health window, webhook prefix).
//!
//! Same resolution order, same "missing file is not an error" posture as
//! a typical `load_and_apply`/`xdg_toml`/`dotenv` layering, generalized
//! from a bag of raw env strings to also populate a typed
//! [`conductor_core::runtime::RuntimeConfig`].

mod dotenv;
mod xdg_toml;

use std::path::Path;

use conductor_core::runtime::RuntimeConfig;
use thiserror::Error;

pub use xdg_toml::{ConfigFile, RuntimeFields};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read XDG config file")]
    XdgRead,
    #[error("failed to parse XDG config file: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("failed to read .env file")]
    DotenvRead,
    #[error("invalid value for {key}: {value}")]
    InvalidEnvValue { key: &'static str, value: String },
}

const APP_NAME: &str = "conductor";

/// Unions the XDG `[env]` table and the `.env` file's keys and sets each
/// into the process environment, but only if it isn't already set —
/// existing process env always wins, `.env` beats the XDG file when both
/// define the same key.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir)?;

    let mut keys: Vec<&String> = xdg_map.keys().chain(dotenv_map.keys()).collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        if std::env::var_os(key).is_some() {
            continue;
        }
        if let Some(value) = dotenv_map.get(key).or_else(|| xdg_map.get(key)) {
            std::env::set_var(key, value);
        }
    }
    Ok(())
}

fn apply_runtime_fields(config: &mut RuntimeConfig, fields: &RuntimeFields) {
    if let Some(v) = &fields.store_path {
        config.store_path = v.into();
    }
    if let Some(v) = fields.worker_threads {
        config.worker_threads = v;
    }
    if let Some(v) = fields.retention_window_secs {
        config.retention_window = std::time::Duration::from_secs(v);
    }
    if let Some(v) = &fields.alert_recipient {
        config.alert_recipient = v.clone();
    }
    if let Some(v) = &fields.default_agent {
        config.default_agent = v.clone();
    }
    if let Some(v) = fields.health_window_secs {
        config.health_window = std::time::Duration::from_secs(v);
    }
    if let Some(v) = fields.workflow_queue_depth {
        config.workflow_queue_depth = v;
    }
    if let Some(v) = &fields.webhook_prefix {
        config.webhook_prefix = v.clone();
    }
}

fn env_string(key: &'static str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, LoadError> {
    match env_string(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| LoadError::InvalidEnvValue { key, value: raw }),
    }
}

fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), LoadError> {
    if let Some(v) = env_string("CONDUCTOR_STORE_PATH") {
        config.store_path = v.into();
    }
    if let Some(v) = env_parsed::<usize>("CONDUCTOR_WORKER_THREADS")? {
        config.worker_threads = v;
    }
    if let Some(v) = env_parsed::<u64>("CONDUCTOR_RETENTION_WINDOW_SECS")? {
        config.retention_window = std::time::Duration::from_secs(v);
    }
    if let Some(v) = env_string("CONDUCTOR_ALERT_RECIPIENT") {
        config.alert_recipient = v;
    }
    if let Some(v) = env_string("CONDUCTOR_DEFAULT_AGENT") {
        config.default_agent = v;
    }
    if let Some(v) = env_parsed::<u64>("CONDUCTOR_HEALTH_WINDOW_SECS")? {
        config.health_window = std::time::Duration::from_secs(v);
    }
    if let Some(v) = env_parsed::<usize>("CONDUCTOR_WORKFLOW_QUEUE_DEPTH")? {
        config.workflow_queue_depth = v;
    }
    if let Some(v) = env_parsed::<u64>("CONDUCTOR_RETENTION_SWEEP_INTERVAL_SECS")? {
        config.retention_sweep_interval = std::time::Duration::from_secs(v);
    }
    if let Some(v) = env_string("CONDUCTOR_WEBHOOK_PREFIX") {
        config.webhook_prefix = v;
    }
    Ok(())
}

/// Builds a [`RuntimeConfig`] by layering, lowest to highest precedence:
/// built-in defaults, `$XDG_CONFIG_HOME/conductor/config.toml`'s `[runtime]`
/// table, then `CONDUCTOR_*` environment variables (which themselves
/// already reflect `load_and_apply`'s existing-env-then-`.env` order, since
/// those are folded into the process environment first).
pub fn load_runtime_config(override_dir: Option<&Path>) -> Result<RuntimeConfig, LoadError> {
    load_and_apply(APP_NAME, override_dir)?;

    let mut config = RuntimeConfig::default();
    if let Some(file) = xdg_toml::load_config_file(APP_NAME)? {
        apply_runtime_fields(&mut config, &file.runtime);
    }
    apply_env_overrides(&mut config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests mutate process environment; serialize them so they don't race
    // each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let previous = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self { key, previous }
        }
        fn unset(key: &'static str) -> Self {
            let previous = std::env::var(key).ok();
            std::env::remove_var(key);
            Self { key, previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.previous {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn existing_env_wins_over_dotenv_and_xdg() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _g = EnvGuard::set("CONDUCTOR_TEST_KEY", "from-process");
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "CONDUCTOR_TEST_KEY=from-dotenv\n").unwrap();

        load_and_apply("conductor-test-nonexistent-app", Some(dir.path())).unwrap();
        assert_eq!(std::env::var("CONDUCTOR_TEST_KEY").unwrap(), "from-process");
    }

    #[test]
    fn load_and_apply_with_no_files_is_ok() {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(load_and_apply("conductor-test-nonexistent-app", Some(dir.path())).is_ok());
    }

    #[test]
    fn dotenv_value_is_applied_when_key_absent_from_process_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _g = EnvGuard::unset("CONDUCTOR_TEST_DOTENV_ONLY");
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "CONDUCTOR_TEST_DOTENV_ONLY=hello\n").unwrap();

        load_and_apply("conductor-test-nonexistent-app", Some(dir.path())).unwrap();
        assert_eq!(std::env::var("CONDUCTOR_TEST_DOTENV_ONLY").unwrap(), "hello");
        std::env::remove_var("CONDUCTOR_TEST_DOTENV_ONLY");
    }

    #[test]
    fn runtime_config_defaults_when_nothing_is_set() {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        for key in [
            "CONDUCTOR_STORE_PATH",
            "CONDUCTOR_WORKER_THREADS",
            "CONDUCTOR_RETENTION_WINDOW_SECS",
            "CONDUCTOR_ALERT_RECIPIENT",
            "CONDUCTOR_DEFAULT_AGENT",
            "CONDUCTOR_HEALTH_WINDOW_SECS",
            "CONDUCTOR_WORKFLOW_QUEUE_DEPTH",
            "CONDUCTOR_WEBHOOK_PREFIX",
        ] {
            std::env::remove_var(key);
        }
        let config = load_runtime_config(Some(dir.path())).unwrap();
        assert_eq!(config.default_agent, RuntimeConfig::default().default_agent);
    }

    #[test]
    fn runtime_config_picks_up_env_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let _g = EnvGuard::set("CONDUCTOR_WORKER_THREADS", "7");
        let config = load_runtime_config(Some(dir.path())).unwrap();
        assert_eq!(config.worker_threads, 7);
    }

    #[test]
    fn malformed_numeric_env_override_is_rejected() {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let _g = EnvGuard::set("CONDUCTOR_WORKER_THREADS", "not-a-number");
        let err = load_runtime_config(Some(dir.path())).unwrap_err();
        assert!(matches!(err, LoadError::InvalidEnvValue { .. }));
    }
}
