//! Configuration management for the prototype engine
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (prototypes.toml)
//! - Environment variables (PROTOTYPES__*)
//!
//! ## Example config file (prototypes.toml):
//! ```toml
//! [loader]
//! extensions = ["yml", "yaml"]
//! skip_prefixes = ["."]
//! workers = 4
//!
//! [loader.retry]
//! max_attempts = 3
//! base_delay_ms = 50
//!
//! [categories]
//! entity_kind = "entity"
//! category_kind = "entityCategory"
//!
//! [validation]
//! check_references = true
//! allow_unknown_fields = true
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for the prototype engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub loader: LoaderConfig,

    #[serde(default)]
    pub categories: CategoryConfig,

    #[serde(default)]
    pub validation: ValidationConfig,
}

/// Directory loading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// File extensions treated as prototype documents
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Files and directories whose name starts with one of these are skipped
    #[serde(default = "default_skip_prefixes")]
    pub skip_prefixes: Vec<String>,

    /// Parser threads for directory loads; 0 uses available parallelism
    #[serde(default)]
    pub workers: usize,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Backoff for transient read failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles on every further attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

/// Kind and field names used by the category engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    #[serde(default = "default_entity_kind")]
    pub entity_kind: String,

    #[serde(default = "default_category_kind")]
    pub category_kind: String,

    /// Entity field listing explicit categories
    #[serde(default = "default_categories_field")]
    pub categories_field: String,

    /// Entity field listing components
    #[serde(default = "default_components_field")]
    pub components_field: String,

    /// Key naming a component inside a component entry
    #[serde(default = "default_component_name_key")]
    pub component_name_key: String,

    /// Category field holding its inheritance policy flag
    #[serde(default = "default_inheritable_field")]
    pub inheritable_field: String,

    #[serde(default = "default_hide_spawn_menu_field")]
    pub hide_spawn_menu_field: String,
}

/// Directory validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Check prototype-id fields against the loaded identifier sets
    #[serde(default = "default_true")]
    pub check_references: bool,

    /// Accept fields a kind's schema does not declare
    #[serde(default = "default_true")]
    pub allow_unknown_fields: bool,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_extensions() -> Vec<String> {
    vec!["yml".to_string(), "yaml".to_string()]
}

fn default_skip_prefixes() -> Vec<String> {
    vec![".".to_string(), "_".to_string()]
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    50
}

fn default_entity_kind() -> String {
    "entity".to_string()
}

fn default_category_kind() -> String {
    "entityCategory".to_string()
}

fn default_categories_field() -> String {
    "categories".to_string()
}

fn default_components_field() -> String {
    "components".to_string()
}

fn default_component_name_key() -> String {
    "type".to_string()
}

fn default_inheritable_field() -> String {
    "inheritable".to_string()
}

fn default_hide_spawn_menu_field() -> String {
    "hideSpawnMenu".to_string()
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            skip_prefixes: default_skip_prefixes(),
            workers: 0,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl Default for CategoryConfig {
    fn default() -> Self {
        Self {
            entity_kind: default_entity_kind(),
            category_kind: default_category_kind(),
            categories_field: default_categories_field(),
            components_field: default_components_field(),
            component_name_key: default_component_name_key(),
            inheritable_field: default_inheritable_field(),
            hide_spawn_menu_field: default_hide_spawn_menu_field(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            check_references: true,
            allow_unknown_fields: true,
        }
    }
}

impl LoaderConfig {
    /// Whether `path` has one of the configured extensions
    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    /// Whether a file or directory name is skipped
    pub fn skips(&self, name: &str) -> bool {
        self.skip_prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
    }

    /// Worker count, resolving 0 to available parallelism
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl EngineConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, optionally layering a specific file on top
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = [
            "prototypes.toml",
            ".prototypes.toml",
            "config/prototypes.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "game", "prototypes") {
            let xdg_config = config_dir.config_dir().join("prototypes.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // PROTOTYPES__LOADER__WORKERS=8 and friends
        builder = builder.add_source(
            Environment::with_prefix("PROTOTYPES")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.loader.extensions, vec!["yml", "yaml"]);
        assert_eq!(config.loader.retry.max_attempts, 3);
        assert_eq!(config.categories.entity_kind, "entity");
        assert!(config.validation.check_references);
    }

    #[test]
    fn test_serialize_config() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[loader]"));
        assert!(toml_str.contains("[categories]"));
        assert!(toml_str.contains("[validation]"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [loader]
            workers = 2

            [categories]
            entity_kind = "thing"
            "#,
        )
        .unwrap();
        assert_eq!(config.loader.workers, 2);
        assert_eq!(config.loader.extensions, vec!["yml", "yaml"]);
        assert_eq!(config.categories.entity_kind, "thing");
        assert_eq!(config.categories.category_kind, "entityCategory");
    }

    #[test]
    fn test_save_then_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.toml");

        let mut config = EngineConfig::default();
        config.loader.workers = 3;
        config.validation.allow_unknown_fields = false;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load_from(path.to_str()).unwrap();
        assert_eq!(loaded.loader.workers, 3);
        assert!(!loaded.validation.allow_unknown_fields);
    }

    #[test]
    fn test_loader_filters() {
        let loader = LoaderConfig::default();
        assert!(loader.accepts(Path::new("a/b.yml")));
        assert!(loader.accepts(Path::new("a/b.YAML")));
        assert!(!loader.accepts(Path::new("a/b.json")));
        assert!(loader.skips(".git"));
        assert!(loader.skips("_drafts"));
        assert!(!loader.skips("entities"));
        assert!(loader.worker_count() >= 1);
    }
}
