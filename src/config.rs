//! Configuration system for ddd.
//!
//! Supports layered configuration from multiple sources:
//! 1. Environment variables (highest priority)
//! 2. Explicit file named by `DDD_CONFIG`
//! 3. Project config (.ddd.toml, searched upward to the repository root)
//! 4. User config (~/.config/ddd/config.toml)
//! 5. System config (/etc/ddd/config.toml)
//! 6. Compiled defaults (lowest priority)
//!
//! Files that cannot be read or parsed are skipped.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::extension::{EXTENSION_NAME, LIST_GUC};
use crate::logging::LoggingConfig;

/// Environment variable prefix for all config options.
const ENV_PREFIX: &str = "DDD";

/// Default config file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Project-level config file name.
const PROJECT_CONFIG_NAME: &str = ".ddd.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,

    /// Configuration-file values handed to the server's parameter registry,
    /// keyed by qualified parameter name.
    pub settings: BTreeMap<String, String>,

    /// The simulated cluster.
    pub cluster: ClusterConfig,

    /// Decision log.
    pub logging: LoggingConfig,
}

/// General configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Color output mode: "auto", "always", "never".
    pub color: String,

    /// Whether to show verbose output.
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            color: "auto".to_string(),
            verbose: false,
        }
    }
}

/// Databases and startup libraries of the simulated cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Databases that exist at startup.
    pub databases: Vec<String>,

    /// Database the session is connected to.
    pub current_database: String,

    /// Libraries loaded at server start, in order.
    pub shared_preload_libraries: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            databases: vec![
                "postgres".to_string(),
                "template0".to_string(),
                "template1".to_string(),
            ],
            current_database: "postgres".to_string(),
            shared_preload_libraries: vec![EXTENSION_NAME.to_string()],
        }
    }
}

/// Where a configuration layer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSourceKind {
    System,
    User,
    Project,
    Explicit,
    Environment,
}

impl fmt::Display for ConfigSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::System => "system",
            Self::User => "user",
            Self::Project => "project",
            Self::Explicit => "explicit",
            Self::Environment => "environment",
        })
    }
}

/// One layer that contributed to the effective configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    pub kind: ConfigSourceKind,
    /// File path, or the variable names for the environment layer.
    pub location: String,
}

impl Config {
    /// Load configuration from all sources, merging them in priority order.
    #[must_use]
    pub fn load() -> Self {
        Self::load_with_sources().0
    }

    /// Like [`Config::load`], also reporting which layers were applied.
    #[must_use]
    pub fn load_with_sources() -> (Self, Vec<ConfigSource>) {
        let mut config = Self::default();
        let mut sources = Vec::new();

        let mut layer = |kind, path: Option<PathBuf>| {
            let Some(path) = path else { return };
            if let Some(file_config) = Self::load_from_file(&path) {
                config.merge(file_config);
                sources.push(ConfigSource {
                    kind,
                    location: path.display().to_string(),
                });
            }
        };
        layer(ConfigSourceKind::System, Some(Self::system_config_path()));
        layer(ConfigSourceKind::User, Self::user_config_path());
        layer(ConfigSourceKind::Project, Self::find_project_config());
        layer(
            ConfigSourceKind::Explicit,
            env::var_os(format!("{ENV_PREFIX}_CONFIG")).map(PathBuf::from),
        );

        let applied = config.apply_env_overrides_from(|name| env::var(name).ok());
        if !applied.is_empty() {
            sources.push(ConfigSource {
                kind: ConfigSourceKind::Environment,
                location: applied.join(", "),
            });
        }
        (config, sources)
    }

    /// Load configuration from a specific file.
    #[must_use]
    pub fn load_from_file(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unparsable config file");
                None
            }
        }
    }

    fn system_config_path() -> PathBuf {
        PathBuf::from("/etc/ddd").join(CONFIG_FILE_NAME)
    }

    /// Path of the user config file.
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join("ddd").join(CONFIG_FILE_NAME))
    }

    /// Find `.ddd.toml` in the current directory or its parents, stopping at
    /// the repository root.
    fn find_project_config() -> Option<PathBuf> {
        let mut current = env::current_dir().ok()?;
        loop {
            let config_path = current.join(PROJECT_CONFIG_NAME);
            if config_path.exists() {
                return Some(config_path);
            }
            if current.join(".git").exists() || !current.pop() {
                return None;
            }
        }
    }

    /// Merge another config into this one (other takes priority).
    pub fn merge(&mut self, other: Self) {
        if other.general.color != "auto" {
            self.general.color = other.general.color;
        }
        if other.general.verbose {
            self.general.verbose = true;
        }

        // Settings merge per parameter.
        self.settings.extend(other.settings);

        let default_cluster = ClusterConfig::default();
        if other.cluster.databases != default_cluster.databases {
            self.cluster.databases = other.cluster.databases;
        }
        if other.cluster.current_database != default_cluster.current_database {
            self.cluster.current_database = other.cluster.current_database;
        }
        if other.cluster.shared_preload_libraries != default_cluster.shared_preload_libraries {
            self.cluster.shared_preload_libraries = other.cluster.shared_preload_libraries;
        }

        if other.logging != LoggingConfig::default() {
            self.logging = other.logging;
        }
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Returns the names of the variables that changed something.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();

        // DDD_LIST="postgres,prod"
        let name = format!("{ENV_PREFIX}_LIST");
        if let Some(list) = lookup(&name) {
            self.settings.insert(LIST_GUC.to_string(), list);
            applied.push(name);
        }

        // DDD_VERBOSE=1
        let name = format!("{ENV_PREFIX}_VERBOSE");
        if lookup(&name).is_some() {
            self.general.verbose = true;
            applied.push(name);
        }

        // DDD_COLOR=never
        let name = format!("{ENV_PREFIX}_COLOR");
        if let Some(color) = lookup(&name) {
            self.general.color = color;
            applied.push(name);
        }

        applied
    }

    /// Protect list as configured, if the configuration sets one.
    #[must_use]
    pub fn protect_list(&self) -> Option<&str> {
        self.settings.get(LIST_GUC).map(String::as_str)
    }

    /// The `[settings]` table as configuration-file values.
    #[must_use]
    pub fn settings_map(&self) -> HashMap<String, String> {
        self.settings
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Generate a sample configuration string with comments.
    #[must_use]
    pub fn generate_sample_config() -> String {
        r#"# ddd configuration

[general]
# Color output: "auto" | "always" | "never"
color = "auto"

# Verbose output
verbose = false

#─────────────────────────────────────────────────────────────
# SERVER SETTINGS
#─────────────────────────────────────────────────────────────

[settings]
# Databases that DROP DATABASE refuses to remove. Comma-separated,
# matched case-insensitively; "ALL" protects every database.
"dont_drop_db.list" = "postgres,template0,template1"

#─────────────────────────────────────────────────────────────
# CLUSTER
#─────────────────────────────────────────────────────────────

[cluster]
databases = ["postgres", "template0", "template1"]
current_database = "postgres"
shared_preload_libraries = ["dont_drop_db"]

#─────────────────────────────────────────────────────────────
# DECISION LOG
#─────────────────────────────────────────────────────────────

[logging]
enabled = false
# file = "~/.local/share/ddd/decisions.log"
# "text" | "json"
format = "text"

[logging.events]
deny = true
allow = false
"#
        .to_string()
    }
}
