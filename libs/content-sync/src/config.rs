//! Engine configuration
//!
//! Loaded with figment in three layers, later layers winning:
//! 1. Built-in defaults (`SyncConfig::default()`)
//! 2. Optional config file (`.toml`, `.yaml`/`.yml`, `.json`)
//! 3. Environment variables prefixed `CONTENT_SYNC_`, nested keys split on `__`
//!    (e.g. `CONTENT_SYNC_ASSETS__API_KEY`)

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use errors::{config_error, SyncError, SyncResult};
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::reconciler::ResourceType;

/// Environment variable prefix for every config key
pub const ENV_PREFIX: &str = "CONTENT_SYNC_";

/// Which store is read and which one is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// staging → production
    Push,
    /// production → staging
    Pull,
}

impl SyncDirection {
    pub fn source_label(self) -> &'static str {
        match self {
            Self::Push => "staging",
            Self::Pull => "production",
        }
    }

    pub fn destination_label(self) -> &'static str {
        match self {
            Self::Push => "production",
            Self::Pull => "staging",
        }
    }

    pub fn source_url(self, config: &SyncConfig) -> &str {
        match self {
            Self::Push => &config.staging_database_url,
            Self::Pull => &config.production_database_url,
        }
    }

    pub fn destination_url(self, config: &SyncConfig) -> &str {
        match self {
            Self::Push => &config.production_database_url,
            Self::Pull => &config.staging_database_url,
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Pull => write!(f, "pull"),
        }
    }
}

impl FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "push" | "staging-to-production" => Ok(Self::Push),
            "pull" | "production-to-staging" => Ok(Self::Pull),
            other => Err(format!("unknown direction '{}', expected push or pull", other)),
        }
    }
}

/// Sync policy for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Diff and apply minimal inserts/updates, mirror deletes where configured
    Incremental,
    /// Truncate and reload every listed table
    Reset,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incremental => write!(f, "incremental"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

/// A table whose rows own child rows stored out-of-line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildTableSpec {
    /// Child table name, must itself be a listed table
    pub table: String,
    /// Column in the child table referencing the parent
    pub foreign_key: String,
    /// Parent column the foreign key points at
    #[serde(default = "default_parent_key")]
    pub parent_key: String,
}

/// Keep only the newest row per natural key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRule {
    pub key_column: String,
    pub created_column: String,
}

/// One entry of the fixed, ordered table list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    /// Delete destination-only rows (otherwise they are protected local content)
    #[serde(default, deserialize_with = "common::serde_helpers::deserialize_bool_flexible")]
    pub mirror_deletes: bool,
    #[serde(default)]
    pub children: Option<ChildTableSpec>,
    #[serde(default)]
    pub dedup: Option<DedupRule>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mirror_deletes: false,
            children: None,
            dedup: None,
        }
    }

    pub fn mirrored(mut self) -> Self {
        self.mirror_deletes = true;
        self
    }

    pub fn with_children(mut self, table: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        self.children = Some(ChildTableSpec {
            table: table.into(),
            foreign_key: foreign_key.into(),
            parent_key: default_parent_key(),
        });
        self
    }

    pub fn with_dedup(mut self, key_column: impl Into<String>, created_column: impl Into<String>) -> Self {
        self.dedup = Some(DedupRule {
            key_column: key_column.into(),
            created_column: created_column.into(),
        });
        self
    }
}

/// Remote asset store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetStoreConfig {
    #[serde(
        default = "common::serde_helpers::bool_true",
        deserialize_with = "common::serde_helpers::deserialize_bool_flexible"
    )]
    pub enabled: bool,
    /// Hostname identifying URLs that belong to the store
    #[serde(default = "default_asset_host")]
    pub host: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub cloud_name: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    /// Resource-type hypotheses, tried in order until one deletes the asset
    #[serde(
        default = "default_resource_types",
        deserialize_with = "common::serde_helpers::deserialize_string_list"
    )]
    pub resource_types: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AssetStoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_asset_host(),
            api_base_url: default_api_base_url(),
            cloud_name: None,
            api_key: None,
            api_secret: None,
            resource_types: default_resource_types(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Credentials for the admin API, present only when all three are set
#[derive(Debug, Clone)]
pub struct AssetCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

impl AssetStoreConfig {
    pub fn credentials(&self) -> Option<AssetCredentials> {
        let non_empty = |v: &Option<String>| v.as_ref().filter(|s| !s.trim().is_empty()).cloned();
        Some(AssetCredentials {
            cloud_name: non_empty(&self.cloud_name)?,
            api_key: non_empty(&self.api_key)?,
            api_secret: non_empty(&self.api_secret)?,
        })
    }

    /// Parsed resource-type hypotheses in configured order
    pub fn hypotheses(&self) -> SyncResult<Vec<ResourceType>> {
        self.resource_types
            .iter()
            .map(|s| {
                s.parse::<ResourceType>().map_err(|reason| SyncError::InvalidConfig {
                    field: "assets.resource_types".to_string(),
                    reason,
                })
            })
            .collect()
    }
}

/// Logging section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for daily rolling log files
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "common::serde_helpers::bool_false")]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
            json: false,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub staging_database_url: String,
    #[serde(default)]
    pub production_database_url: String,
    /// Postgres schema holding the content tables
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Migrations applied to the destination before every run
    #[serde(default)]
    pub migrations_dir: Option<PathBuf>,
    /// Outer timeout applied by the HTTP trigger
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    #[serde(default)]
    pub assets: AssetStoreConfig,
    #[serde(default = "default_tables")]
    pub tables: Vec<TableSpec>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            staging_database_url: String::new(),
            production_database_url: String::new(),
            schema: default_schema(),
            migrations_dir: None,
            run_timeout_secs: default_run_timeout_secs(),
            assets: AssetStoreConfig::default(),
            tables: default_tables(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load from defaults, an optional file and the environment, then validate
    pub fn load(path: Option<&Path>) -> SyncResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(SyncConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(SyncError::MissingConfig(path.display().to_string()));
            }
            let extension = path
                .extension()
                .and_then(|s| s.to_str())
                .ok_or_else(|| config_error!("Config file must have an extension"))?;

            figment = match extension {
                "toml" => figment.merge(Toml::file(path)),
                "yaml" | "yml" => figment.merge(Yaml::file(path)),
                "json" => figment.merge(Json::file(path)),
                _ => return Err(config_error!("Unsupported config format: {}", extension)),
            };
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::from_figment(figment)
    }

    /// Extract and validate from a prepared figment
    pub fn from_figment(figment: Figment) -> SyncResult<Self> {
        let config: SyncConfig = figment
            .extract()
            .map_err(|e| config_error!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.staging_database_url.trim().is_empty() {
            return Err(SyncError::InvalidConfig {
                field: "staging_database_url".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.production_database_url.trim().is_empty() {
            return Err(SyncError::InvalidConfig {
                field: "production_database_url".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.tables.is_empty() {
            return Err(SyncError::InvalidConfig {
                field: "tables".to_string(),
                reason: "at least one table must be listed".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for spec in &self.tables {
            if spec.name.trim().is_empty() {
                return Err(SyncError::InvalidConfig {
                    field: "tables".to_string(),
                    reason: "table name must not be empty".to_string(),
                });
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(SyncError::InvalidConfig {
                    field: "tables".to_string(),
                    reason: format!("table '{}' listed twice", spec.name),
                });
            }
        }

        for spec in &self.tables {
            if let Some(child) = &spec.children {
                if !seen.contains(child.table.as_str()) {
                    return Err(SyncError::InvalidConfig {
                        field: format!("tables.{}.children", spec.name),
                        reason: format!("child table '{}' is not a listed table", child.table),
                    });
                }
            }
        }

        self.assets.hypotheses()?;
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Names of every listed table in sync order
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }
}

fn default_parent_key() -> String {
    "id".to_string()
}

fn default_asset_host() -> String {
    "res.cloudinary.com".to_string()
}

fn default_api_base_url() -> String {
    "https://api.cloudinary.com".to_string()
}

fn default_resource_types() -> Vec<String> {
    vec!["image".to_string(), "raw".to_string(), "video".to_string()]
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_run_timeout_secs() -> u64 {
    300
}

/// The fixed content table list, in sync order
pub fn default_tables() -> Vec<TableSpec> {
    vec![
        TableSpec::new("site_settings"),
        TableSpec::new("home_page"),
        TableSpec::new("about_page"),
        TableSpec::new("team_members"),
        TableSpec::new("partners"),
        TableSpec::new("news_articles").with_children("article_blocks", "article_id"),
        TableSpec::new("article_blocks").mirrored(),
        TableSpec::new("download_leads").with_dedup("email", "created_at"),
    ]
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // unwrap is acceptable in tests
mod tests {
    use super::*;

    fn base_figment() -> Figment {
        Figment::from(Serialized::defaults(SyncConfig::default()))
    }

    #[test]
    fn test_defaults_mirror_exactly_one_table() {
        let tables = default_tables();
        let mirrored: Vec<_> = tables.iter().filter(|t| t.mirror_deletes).collect();
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].name, "article_blocks");
        assert_eq!(tables.last().unwrap().name, "download_leads");
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let yaml = r#"
staging_database_url: "sqlite:///tmp/staging.db"
production_database_url: "postgres://localhost/prod"
schema: content
assets:
  cloud_name: demo
  api_key: key
  api_secret: secret
  resource_types: "image, raw"
"#;
        let config = SyncConfig::from_figment(base_figment().merge(Yaml::string(yaml))).unwrap();
        assert_eq!(config.schema, "content");
        assert_eq!(
            config.assets.hypotheses().unwrap(),
            vec![ResourceType::Image, ResourceType::Raw]
        );
        assert!(config.assets.credentials().is_some());
        // tables fall back to the built-in list
        assert_eq!(config.tables.len(), 8);
    }

    #[test]
    fn test_load_from_yaml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("content-sync.yaml");
        let mut config = SyncConfig {
            staging_database_url: "sqlite:///srv/staging.db".into(),
            production_database_url: "sqlite:///srv/production.db".into(),
            run_timeout_secs: 60,
            ..Default::default()
        };
        config.tables = vec![TableSpec::new("partners"), TableSpec::new("download_leads").with_dedup("email", "created_at")];
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();

        let loaded = SyncConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.run_timeout_secs, 60);
        assert_eq!(loaded.table_names(), vec!["partners", "download_leads"]);
        assert!(loaded.table("download_leads").unwrap().dedup.is_some());

        let missing = SyncConfig::load(Some(&dir.path().join("absent.yaml"))).unwrap_err();
        assert!(matches!(missing, SyncError::MissingConfig(_)));
    }

    #[test]
    fn test_missing_urls_rejected() {
        let err = SyncConfig::from_figment(base_figment()).unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig { ref field, .. } if field == "staging_database_url"));
    }

    #[test]
    fn test_child_table_must_be_listed() {
        let yaml = r#"
staging_database_url: "sqlite::memory:"
production_database_url: "sqlite::memory:"
tables:
  - name: news_articles
    children:
      table: article_blocks
      foreign_key: article_id
"#;
        let err = SyncConfig::from_figment(base_figment().merge(Yaml::string(yaml))).unwrap_err();
        assert!(err.to_string().contains("article_blocks"));
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let mut config = SyncConfig {
            staging_database_url: "a".into(),
            production_database_url: "b".into(),
            ..Default::default()
        };
        config.tables.push(TableSpec::new("partners"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_resource_type_rejected() {
        let mut config = SyncConfig {
            staging_database_url: "a".into(),
            production_database_url: "b".into(),
            ..Default::default()
        };
        config.assets.resource_types = vec!["audio".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_require_all_fields() {
        let mut assets = AssetStoreConfig {
            cloud_name: Some("demo".into()),
            api_key: Some("key".into()),
            ..Default::default()
        };
        assert!(assets.credentials().is_none());
        assets.api_secret = Some("  ".into());
        assert!(assets.credentials().is_none());
        assets.api_secret = Some("secret".into());
        assert!(assets.credentials().is_some());
    }

    #[test]
    fn test_direction_routing() {
        let config = SyncConfig {
            staging_database_url: "staging".into(),
            production_database_url: "prod".into(),
            ..Default::default()
        };
        assert_eq!(SyncDirection::Push.source_url(&config), "staging");
        assert_eq!(SyncDirection::Push.destination_url(&config), "prod");
        assert_eq!(SyncDirection::Pull.source_url(&config), "prod");
        assert_eq!("PULL".parse::<SyncDirection>().unwrap(), SyncDirection::Pull);
        assert!("sideways".parse::<SyncDirection>().is_err());
    }
}
