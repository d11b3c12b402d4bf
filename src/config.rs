//! Configuration management for the knowledge-base pipeline
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (kb.toml)
//! - Environment variables (KB__*)
//!
//! ## Example config file (kb.toml):
//! ```toml
//! [pipeline]
//! buffer_level = 1
//! root_class_id = "Q35120"
//! cleanup = true
//!
//! [fields]
//! type_field = 1
//! excluded = [0, 8, 9, 10, 11]
//!
//! [parse]
//! language = "cs"
//!
//! [substitution]
//! identifier_pattern = "Q\\d+"
//!
//! [categories]
//! person = ["Q5", "Q15632617", "Q3658341"]
//! artist = ["Q483501"]
//! ```

use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{KbError, Result};
use crate::extract::columns;
use crate::graph::{CategoryTable, ClassKey};
use crate::pipeline::BufferLevel;
use crate::substitute::DEFAULT_IDENTIFIER_PATTERN;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbConfig {
    /// Stage and buffering settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Column positions
    #[serde(default)]
    pub fields: FieldConfig,

    /// Dump parsing
    #[serde(default)]
    pub parse: ParseConfig,

    /// Name substitution
    #[serde(default)]
    pub substitution: SubstitutionConfig,

    /// Category tag -> class keys
    #[serde(default = "default_categories")]
    pub categories: BTreeMap<String, Vec<ClassKey>>,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 0 spools records and dictionary, 1 keeps the dictionary in memory,
    /// 2 keeps both
    #[serde(default)]
    pub buffer_level: BufferLevel,

    /// Replace types with root paths instead of ancestor lists
    #[serde(default)]
    pub full_paths: bool,

    /// Keep the root class in ancestor lists
    #[serde(default)]
    pub keep_root_class: bool,

    #[serde(default = "default_root_class")]
    pub root_class_id: ClassKey,

    /// Delete temporary files when the run ends
    #[serde(default = "default_true")]
    pub cleanup: bool,

    /// Spool directory (defaults to the output file's directory)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Add missing inverse edges before the graph is used
    #[serde(default)]
    pub complete_relations: bool,

    /// Collect identifiers without a label
    #[serde(default)]
    pub show_missing: bool,
}

/// Field positions in the tabular record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    #[serde(default)]
    pub id_field: usize,

    #[serde(default = "default_type_field")]
    pub type_field: usize,

    /// Fields never touched by name substitution
    #[serde(default = "default_excluded")]
    pub excluded: Vec<usize>,
}

/// Dump parsing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseConfig {
    /// Language of labels, aliases and descriptions
    #[serde(default = "default_language")]
    pub language: String,

    /// Skip entities without a label
    #[serde(default)]
    pub require_label: bool,
}

/// Name substitution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubstitutionConfig {
    #[serde(default = "default_identifier_pattern")]
    pub identifier_pattern: String,

    /// Delete identifiers without a label
    #[serde(default)]
    pub remove_missing: bool,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_root_class() -> ClassKey {
    "Q35120".to_string()
}

fn default_type_field() -> usize {
    columns::INSTANCE_OF
}

fn default_excluded() -> Vec<usize> {
    vec![
        columns::ID,
        columns::WIKIPEDIA_URL,
        columns::WIKIDATA_URL,
        columns::DBPEDIA_URL,
        columns::IMAGES,
    ]
}

fn default_language() -> String {
    "en".to_string()
}

fn default_identifier_pattern() -> String {
    DEFAULT_IDENTIFIER_PATTERN.to_string()
}

fn default_categories() -> BTreeMap<String, Vec<ClassKey>> {
    CategoryTable::builtin_map()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_level: BufferLevel::default(),
            full_paths: false,
            keep_root_class: false,
            root_class_id: default_root_class(),
            cleanup: true,
            temp_dir: None,
            complete_relations: false,
            show_missing: false,
        }
    }
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            id_field: columns::ID,
            type_field: default_type_field(),
            excluded: default_excluded(),
        }
    }
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            require_label: false,
        }
    }
}

impl Default for SubstitutionConfig {
    fn default() -> Self {
        Self {
            identifier_pattern: default_identifier_pattern(),
            remove_missing: false,
        }
    }
}

impl Default for KbConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            fields: FieldConfig::default(),
            parse: ParseConfig::default(),
            substitution: SubstitutionConfig::default(),
            categories: default_categories(),
        }
    }
}

impl KbConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, adding a specific file on top of the defaults
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["kb.toml", ".kb.toml", "config/kb.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("org", "wikidata-kb", "kb") {
            let xdg_config = config_dir.config_dir().join("kb.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // Load from environment variables (KB__PIPELINE__BUFFER_LEVEL=2)
        builder = builder.add_source(
            Environment::with_prefix("KB")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: KbConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot work together
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.root_class_id.is_empty() {
            return Err(KbError::configuration("root_class_id must not be empty"));
        }
        if self.parse.language.is_empty() {
            return Err(KbError::configuration("language must not be empty"));
        }
        CategoryTable::from_map(&self.categories)?;
        Ok(())
    }

    /// Category table for classification
    pub fn category_table(&self) -> Result<CategoryTable> {
        CategoryTable::from_map(&self.categories)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = KbConfig::default();
        assert_eq!(config.pipeline.buffer_level, BufferLevel::Spool);
        assert_eq!(config.pipeline.root_class_id, "Q35120");
        assert!(config.pipeline.cleanup);
        assert_eq!(config.fields.type_field, 1);
        assert_eq!(config.fields.excluded, vec![0, 8, 9, 10, 11]);
        assert_eq!(config.substitution.identifier_pattern, r"Q\d+");
        assert!(config.categories.contains_key("geographical"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialize_config() {
        let config = KbConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[pipeline]"));
        assert!(toml_str.contains("[fields]"));
        assert!(toml_str.contains("buffer_level = 0"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[pipeline]\nbuffer_level = 2\nfull_paths = true\n\n[parse]\nlanguage = \"cs\"\n",
        )
        .unwrap();

        let config = KbConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.pipeline.buffer_level, BufferLevel::Memory);
        assert!(config.pipeline.full_paths);
        assert_eq!(config.parse.language, "cs");
        assert_eq!(config.fields.type_field, 1);
        assert!(config.categories.contains_key("person"));
    }

    #[test]
    fn test_invalid_buffer_level_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[pipeline]\nbuffer_level = 3\n").unwrap();
        assert!(KbConfig::load_from(Some(&path)).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("saved.toml");
        let mut config = KbConfig::default();
        config.pipeline.show_missing = true;
        config
            .categories
            .insert("artist".to_string(), vec!["Q483501".to_string()]);
        config.save(&path).unwrap();

        let reloaded = KbConfig::load_from(Some(&path)).unwrap();
        assert!(reloaded.pipeline.show_missing);
        assert_eq!(reloaded.categories, config.categories);
    }
}
