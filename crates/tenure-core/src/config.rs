use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::model::{AttributeType, UnknownAttribute};
use crate::snapshot::fields::{FieldMap, TrackingPlan};

/// Project-relative location of the config file.
pub const CONFIG_RELATIVE_PATH: &str = ".tenure/config.toml";

/// Problems with the tracked-attribute table, detected at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("no attribute types are tracked")]
    NoTrackedAttributes,

    #[error("attribute {0} is tracked more than once")]
    DuplicateAttribute(AttributeType),

    #[error("attribute {0} has no source field")]
    MissingField(AttributeType),

    #[error("entity id field must not be empty")]
    MissingEntityField,

    #[error(transparent)]
    UnknownAttribute(#[from] UnknownAttribute),

    #[error("no snapshot partitions configured")]
    NoPartitions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub lock: LockConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_root")]
    pub root: PathBuf,
    /// Partition directories under `root`, concatenated in this order.
    #[serde(default = "default_partitions")]
    pub partitions: Vec<String>,
    /// Partitions inner-joined onto `partitions` by entity id; their fields
    /// are laid over each matching row.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub join: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: default_source_root(),
            partitions: default_partitions(),
            join: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_attributes")]
    pub attributes: Vec<String>,
    #[serde(default = "default_entity_field")]
    pub entity_field: String,
    /// Per-attribute source field overrides, keyed by attribute tag.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            attributes: default_attributes(),
            entity_field: default_entity_field(),
            fields: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl ProjectConfig {
    /// Build the validated tracking plan described by `[tracking]`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for unknown attribute tags, duplicate
    /// tracked attributes, empty field names, or an empty attribute list.
    pub fn tracking_plan(&self) -> Result<TrackingPlan, ConfigError> {
        let attributes = self
            .tracking
            .attributes
            .iter()
            .map(|tag| AttributeType::from_str(tag))
            .collect::<Result<Vec<_>, _>>()?;

        let mut fields = FieldMap::default().with_entity_field(&self.tracking.entity_field);
        for (tag, field) in &self.tracking.fields {
            fields = fields.with_field(AttributeType::from_str(tag)?, field);
        }

        if self.source.partitions.is_empty() {
            return Err(ConfigError::NoPartitions);
        }

        TrackingPlan::new(attributes, fields)
    }

    /// Database path, resolved against the project root when relative.
    #[must_use]
    pub fn db_path(&self, project_root: &Path) -> PathBuf {
        resolve(project_root, &self.store.path)
    }

    /// Snapshot root directory, resolved against the project root when relative.
    #[must_use]
    pub fn source_root(&self, project_root: &Path) -> PathBuf {
        resolve(project_root, &self.source.root)
    }

    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock.timeout_ms)
    }
}

/// Writer lock file that sits next to a history database.
#[must_use]
pub fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".lock");
    db_path.with_file_name(name)
}

/// Load `.tenure/config.toml`, falling back to defaults when absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = project_root.join(CONFIG_RELATIVE_PATH);
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Render the default config as TOML for `tn init`.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn default_config_toml() -> Result<String> {
    toml::to_string_pretty(&ProjectConfig::default()).context("serialize default config")
}

fn resolve(project_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".tenure/history.db")
}

fn default_source_root() -> PathBuf {
    PathBuf::from("snapshots")
}

fn default_partitions() -> Vec<String> {
    vec!["STK".to_string(), "KSQ".to_string()]
}

fn default_attributes() -> Vec<String> {
    AttributeType::ALL
        .iter()
        .map(|attr| attr.as_str().to_string())
        .collect()
}

fn default_entity_field() -> String {
    "ISU_SRT_CD".to_string()
}

const fn default_lock_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) {
        let path = dir.path().join(CONFIG_RELATIVE_PATH);
        std::fs::create_dir_all(path.parent().expect("config parent")).expect("create .tenure");
        std::fs::write(path, content).expect("write config");
    }

    #[test]
    fn missing_project_config_uses_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let cfg = load_project_config(dir.path()).expect("load should succeed");
        assert_eq!(cfg, ProjectConfig::default());
        assert_eq!(cfg.source.partitions, vec!["STK", "KSQ"]);
        assert_eq!(cfg.lock_timeout(), Duration::from_secs(5));

        let plan = cfg.tracking_plan().expect("default plan is valid");
        assert_eq!(plan.attributes(), AttributeType::ALL.as_slice());
    }

    #[test]
    fn partial_config_keeps_section_defaults() {
        let dir = TempDir::new().expect("tempdir");
        write_config(
            &dir,
            r#"
[tracking]
attributes = ["sector", "MARKET"]

[tracking.fields]
SECTOR = "IDX_NM"
"#,
        );

        let cfg = load_project_config(dir.path()).expect("load");
        assert_eq!(cfg.store, StoreConfig::default());
        let plan = cfg.tracking_plan().expect("plan");
        assert_eq!(
            plan.attributes(),
            &[AttributeType::Sector, AttributeType::Market]
        );
        assert_eq!(plan.fields().field(AttributeType::Sector), Some("IDX_NM"));
        assert_eq!(plan.fields().field(AttributeType::Market), Some("MKT_TP_NM"));
    }

    #[test]
    fn unknown_attribute_is_a_config_error() {
        let mut cfg = ProjectConfig::default();
        cfg.tracking.attributes.push("INDUSTRY".to_string());
        assert_eq!(
            cfg.tracking_plan().unwrap_err(),
            ConfigError::UnknownAttribute(UnknownAttribute("INDUSTRY".to_string()))
        );

        let mut cfg = ProjectConfig::default();
        cfg.tracking
            .fields
            .insert("TICKER".to_string(), "X".to_string());
        assert!(matches!(
            cfg.tracking_plan(),
            Err(ConfigError::UnknownAttribute(_))
        ));
    }

    #[test]
    fn join_partitions_parse_alongside_the_defaults() {
        let dir = TempDir::new().expect("tempdir");
        write_config(
            &dir,
            r#"
[source]
partitions = ["STK", "KSQ"]
join = ["ALL"]
"#,
        );

        let cfg = load_project_config(dir.path()).expect("load");
        assert_eq!(cfg.source.join, vec!["ALL"]);
        assert_eq!(cfg.source.root, SourceConfig::default().root);
        assert!(ProjectConfig::default().source.join.is_empty());
    }

    #[test]
    fn empty_partitions_are_rejected() {
        let mut cfg = ProjectConfig::default();
        cfg.source.partitions.clear();
        assert_eq!(cfg.tracking_plan().unwrap_err(), ConfigError::NoPartitions);
    }

    #[test]
    fn malformed_config_reports_path() {
        let dir = TempDir::new().expect("tempdir");
        write_config(&dir, "[store\npath = 1");
        let err = load_project_config(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }

    #[test]
    fn relative_paths_resolve_against_root() {
        let cfg = ProjectConfig::default();
        let root = Path::new("/srv/tenure");
        assert_eq!(
            cfg.db_path(root),
            PathBuf::from("/srv/tenure/.tenure/history.db")
        );
        assert_eq!(
            lock_path_for(&cfg.db_path(root)),
            PathBuf::from("/srv/tenure/.tenure/history.db.lock")
        );
        assert_eq!(cfg.source_root(root), PathBuf::from("/srv/tenure/snapshots"));
    }

    #[test]
    fn default_config_roundtrips_through_toml() {
        let text = default_config_toml().expect("serialize");
        let parsed: ProjectConfig = toml::from_str(&text).expect("parse");
        assert_eq!(parsed, ProjectConfig::default());
    }
}
