//! Engine configuration loader.
//!
//! Reads `config.toml` (`~/.stratum/config.toml` by default) into
//! [`EngineConfig`]. Falls back to defaults when the file is missing or
//! malformed, so a broken config never prevents a run.

use std::path::{Path, PathBuf};

use stratum_types::config::EngineConfig;

/// Directory name under the user's home directory.
const CONFIG_DIR: &str = ".stratum";

/// `~/.stratum/config.toml`, or `None` when no home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join("config.toml"))
}

/// Load engine configuration from `path`.
///
/// - Missing file: returns [`EngineConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
pub async fn load_engine_config(path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => {
            if config.executor.max_retries == 0 {
                tracing::warn!(
                    "{} sets executor.max_retries = 0; steps will make no attempts",
                    path.display()
                );
            }
            config
        }
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            EngineConfig::default()
        }
    }
}

/// Load from `path` when given, else from the default location.
pub async fn load_engine_config_or_default(path: Option<&Path>) -> EngineConfig {
    match path.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => load_engine_config(&path).await,
        None => EngineConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_types::healing::{ErrorCategory, RecoveryStrategy};
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(&tmp.path().join("config.toml")).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        tokio::fs::write(
            &path,
            r#"
[executor]
max_retries = 4
base_timeout_secs = 10

[[recovery.rules]]
category = "external_service"
strategy = "fallback"
max_attempts = 1

[events]
capacity = 64
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(&path).await;
        assert_eq!(config.executor.max_retries, 4);
        assert_eq!(config.executor.base_timeout_secs, 10);
        assert_eq!(config.executor.backoff_unit_ms, 1000);
        assert_eq!(config.events.capacity, 64);
        let rule = config.recovery.rule_for(ErrorCategory::ExternalService);
        assert_eq!(rule.strategy, RecoveryStrategy::Fallback);
        assert!(rule.escalation_enabled);
        // Analyzer section absent: built-in patterns remain.
        assert_eq!(config.analyzer.patterns.len(), 4);
    }

    #[tokio::test]
    async fn invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        tokio::fs::write(&path, "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(&path).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn unknown_category_in_rules_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        tokio::fs::write(
            &path,
            "[[recovery.rules]]\ncategory = \"disk_full\"\nstrategy = \"skip\"\n",
        )
        .await
        .unwrap();

        let config = load_engine_config(&path).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn explicit_path_wins_over_default_location() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("custom.toml");
        tokio::fs::write(&path, "[executor]\nmax_retries = 7\n")
            .await
            .unwrap();

        let config = load_engine_config_or_default(Some(&path)).await;
        assert_eq!(config.executor.max_retries, 7);
    }

    #[test]
    fn bundled_demo_config_matches_builtin_tables() {
        let config: EngineConfig =
            toml::from_str(include_str!("../../../demos/config.toml")).unwrap();
        assert_eq!(config.executor.backoff_unit_ms, 200);
        assert_eq!(config.analyzer.patterns.len(), 5);
        assert_eq!(config.recovery, EngineConfig::default().recovery);
    }

    #[test]
    fn default_path_is_under_stratum_dir() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with(".stratum/config.toml"));
        }
    }
}
