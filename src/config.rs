//! Configuration loader and validator for the digest service.
use crate::model::SchedulerMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub digest: DigestSettings,
    pub scheduler: SchedulerSettings,
    pub crm: Crm,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Digest content and recipient settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DigestSettings {
    pub is_active: bool,
    /// Digest title template; the digest id is appended on render.
    pub title: String,
    pub quantity_limit: u32,
    pub max_age_in_days: u32,
    pub language: String,
    /// The one supported content entity type.
    pub entity_type: String,
    /// Checkbox-group encoding inherited from the stored settings of the
    /// upstream CMS module: an entry counts as selected only when its
    /// value equals its key. Use [`DigestSettings::selected_bundles`];
    /// the map shape must not leak past configuration loading.
    pub bundles: BTreeMap<String, String>,
    /// Reserved for a future "supersede previously digested content with
    /// a newer mailing of the same entity" rule. Parsed, not acted on.
    pub include_update: bool,
    pub view_mode: String,
    /// Base URL used for the digest's absolute permalink.
    pub base_url: String,
    pub from_contact: i64,
    pub to_groups: Vec<i64>,
    pub test_groups: Vec<i64>,
    pub validation_contacts: Vec<i64>,
}

/// Weekly scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub is_active: bool,
    /// Target week day, 0 = Sunday .. 6 = Saturday.
    pub week_day: u32,
    /// Target hour, 0..23.
    pub hour: u32,
    pub mode: SchedulerMode,
}

/// External CRM mailing API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Crm {
    pub base_url: String,
    pub api_key: String,
}

impl DigestSettings {
    /// Normalize the checkbox-group map into a plain bundle list.
    pub fn selected_bundles(&self) -> Vec<String> {
        self.bundles
            .iter()
            .filter(|(key, value)| key == value)
            .map(|(_, value)| value.clone())
            .collect()
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.digest.title.trim().is_empty() {
        return Err(ConfigError::Invalid("digest.title must be non-empty"));
    }
    if cfg.digest.quantity_limit == 0 {
        return Err(ConfigError::Invalid("digest.quantity_limit must be > 0"));
    }
    if cfg.digest.max_age_in_days == 0 {
        return Err(ConfigError::Invalid("digest.max_age_in_days must be > 0"));
    }
    if cfg.digest.language.trim().is_empty() {
        return Err(ConfigError::Invalid("digest.language must be non-empty"));
    }
    if cfg.digest.entity_type.trim().is_empty() {
        return Err(ConfigError::Invalid("digest.entity_type must be non-empty"));
    }
    if cfg.digest.view_mode.trim().is_empty() {
        return Err(ConfigError::Invalid("digest.view_mode must be non-empty"));
    }
    if cfg.digest.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("digest.base_url must be non-empty"));
    }

    if cfg.scheduler.week_day > 6 {
        return Err(ConfigError::Invalid("scheduler.week_day must be 0..=6"));
    }
    if cfg.scheduler.hour > 23 {
        return Err(ConfigError::Invalid("scheduler.hour must be 0..=23"));
    }
    match cfg.scheduler.mode {
        SchedulerMode::Send if cfg.digest.to_groups.is_empty() => {
            return Err(ConfigError::Invalid(
                "digest.to_groups must be non-empty when scheduler.mode is send",
            ));
        }
        SchedulerMode::Notify if cfg.digest.validation_contacts.is_empty() => {
            return Err(ConfigError::Invalid(
                "digest.validation_contacts must be non-empty when scheduler.mode is notify",
            ));
        }
        _ => {}
    }

    if cfg.crm.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("crm.base_url must be non-empty"));
    }
    if cfg.crm.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("crm.api_key must be non-empty"));
    }

    Ok(())
}

/// Example YAML configuration, also used by tests.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

digest:
  is_active: true
  title: "Weekly digest"
  quantity_limit: 10
  max_age_in_days: 7
  language: "en"
  entity_type: "node"
  # Checkbox-group encoding: an entry is selected when value == key.
  bundles:
    article: "article"
    event: "event"
    page: "0"
  include_update: false
  view_mode: "teaser"
  base_url: "https://example.org"
  from_contact: 1
  to_groups:
    - 12
  test_groups:
    - 99
  validation_contacts:
    - 7

scheduler:
  is_active: true
  week_day: 5
  hour: 9
  mode: "send"

crm:
  base_url: "https://crm.example.org"
  api_key: "YOUR_CRM_API_KEY"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
    }

    #[test]
    fn selected_bundles_drops_unchecked_entries() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        // "page" is stored as "0" (unchecked) and must be filtered out.
        assert_eq!(cfg.digest.selected_bundles(), vec!["article", "event"]);
    }

    #[test]
    fn selected_bundles_empty_when_nothing_checked() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        for value in cfg.digest.bundles.values_mut() {
            *value = "0".into();
        }
        assert!(cfg.digest.selected_bundles().is_empty());
    }

    #[test]
    fn invalid_quantity_limit() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.digest.quantity_limit = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("quantity_limit")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_scheduler_bounds() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.scheduler.week_day = 7;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.scheduler.hour = 24;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn mode_requires_matching_recipients() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.digest.to_groups.clear();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("to_groups")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.scheduler.mode = SchedulerMode::Notify;
        cfg.digest.validation_contacts.clear();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("validation_contacts")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_crm_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.crm.api_key = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("crm.api_key")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(example().as_bytes()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.digest.to_groups, vec![12]);
        assert_eq!(cfg.scheduler.mode, SchedulerMode::Send);
    }
}
