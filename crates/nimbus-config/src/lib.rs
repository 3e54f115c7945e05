pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "nimbus.yaml";
const CONFIG_DIR: &str = ".nimbus";

/// Nimbus の設定ディレクトリ (~/.config/nimbus) を取得
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("nimbus");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// 設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 NIMBUS_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: nimbus.yaml
/// 3. ./.nimbus/nimbus.yaml
/// 4. ~/.config/nimbus/nimbus.yaml (グローバル設定)
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var("NIMBUS_CONFIG_PATH") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;
    let candidates = [
        current_dir.join(CONFIG_FILE),
        current_dir.join(CONFIG_DIR).join(CONFIG_FILE),
    ];
    if let Some(found) = candidates.into_iter().find(|p| p.exists()) {
        return Ok(found);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("nimbus").join(CONFIG_FILE);
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Control plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NimbusConfig {
    /// Directory holding persisted task records
    pub state_dir: PathBuf,

    /// Number of stage invocations executed concurrently
    pub workers: usize,

    /// Interval between two reconciliation rounds
    pub sync_interval_secs: u64,

    /// How long a lock acquisition may wait before failing
    pub lock_timeout_secs: u64,

    pub poll: PollSettings,

    pub scheduler: SchedulerSettings,

    pub deferred_delete: DeferredDeleteSettings,

    /// Pending usage limits, owner project -> resource kind -> amount
    pub quota: HashMap<String, HashMap<String, u64>>,

    pub providers: Vec<ProviderSettings>,
}

impl Default for NimbusConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(CONFIG_DIR),
            workers: 4,
            sync_interval_secs: 300,
            lock_timeout_secs: 30,
            poll: PollSettings::default(),
            scheduler: SchedulerSettings::default(),
            deferred_delete: DeferredDeleteSettings::default(),
            quota: HashMap::new(),
            providers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_ms: u64,
    pub max_interval_ms: u64,
    pub deadline_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_interval_ms: 10_000,
            deadline_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Base URL of the placement service; placement is unavailable when unset
    pub endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// What a sync pass does with records it already marked unknown because
/// dependents blocked their deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredDeleteMode {
    EveryPass,
    After,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeferredDeleteSettings {
    pub policy: DeferredDeleteMode,
    /// Only used with `policy: after`
    pub after_secs: u64,
}

impl Default for DeferredDeleteSettings {
    fn default() -> Self {
        Self {
            policy: DeferredDeleteMode::After,
            after_secs: 3600,
        }
    }
}

/// One provider credential managed by the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Credential identity; becomes the `manager_id` of imported records
    pub manager_id: String,

    /// "sakura-cloud" or "memory"
    pub provider: String,

    #[serde(default)]
    pub zone: Option<String>,

    /// Project that owns records imported through this credential
    pub owner_project_id: String,

    /// Resource kinds to reconcile; empty means everything the adapter supports
    #[serde(default)]
    pub kinds: Vec<String>,
}

impl NimbusConfig {
    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: NimbusConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        tracing::debug!(
            "Loaded config from {} ({} providers)",
            path.display(),
            config.providers.len()
        );
        Ok(config)
    }

    /// Load the discovered config file, or defaults when none exists
    pub fn discover() -> Result<Self> {
        match find_config_file() {
            Ok(path) => Self::load(path),
            Err(ConfigError::ConfigFileNotFound) => {
                tracing::warn!("No config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.poll.interval_ms == 0 || self.poll.deadline_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll interval and deadline must be positive".into(),
            ));
        }
        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.manager_id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate manager_id: {}",
                    provider.manager_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_get_config_dir() {
        let config_dir = get_config_dir().unwrap();
        assert!(config_dir.ends_with("nimbus"));
        assert!(config_dir.exists());
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("nimbus.yaml"), "workers: 2").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with("nimbus.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_dot_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let dot_dir = temp_dir.path().join(".nimbus");
        fs::create_dir(&dot_dir).unwrap();
        fs::write(dot_dir.join("nimbus.yaml"), "workers: 2").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with(".nimbus/nimbus.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "workers: 2").unwrap();

        unsafe {
            std::env::set_var("NIMBUS_CONFIG_PATH", config_path.to_str().unwrap());
        }

        let result = find_config_file();

        unsafe {
            std::env::remove_var("NIMBUS_CONFIG_PATH");
        }
        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_load_full_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nimbus.yaml");
        fs::write(
            &path,
            r#"
state_dir: /var/lib/nimbus
workers: 8
deferred_delete:
  policy: every_pass
scheduler:
  endpoint: http://scheduler.local:8897
  timeout_secs: 10
quota:
  project-a:
    disk: 100
providers:
  - manager_id: sakura-main
    provider: sakura-cloud
    zone: tk1a
    owner_project_id: project-a
    kinds: [zone, disk]
"#,
        )
        .unwrap();

        let config = NimbusConfig::load(&path).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.deferred_delete.policy, DeferredDeleteMode::EveryPass);
        assert_eq!(config.poll.deadline_secs, 300);
        assert_eq!(config.quota["project-a"]["disk"], 100);
        assert_eq!(config.providers[0].zone.as_deref(), Some("tk1a"));
        assert_eq!(config.providers[0].kinds, vec!["zone", "disk"]);
    }

    #[test]
    fn test_duplicate_manager_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nimbus.yaml");
        fs::write(
            &path,
            r#"
providers:
  - { manager_id: m1, provider: memory, owner_project_id: p }
  - { manager_id: m1, provider: memory, owner_project_id: p }
"#,
        )
        .unwrap();

        let err = NimbusConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = NimbusConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
