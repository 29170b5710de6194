use crate::config::{ConfigError, ConfigSource, ConfigValidator, NonEmptyName, StorageName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::env;
use std::path::Path;
use std::str::FromStr;

/// Collection holding execution records when none is configured
pub const DEFAULT_STATE_COLLECTION: &str = "migration_state";

pub const ENV_DATABASE: &str = "TIDEMARK_DATABASE";
pub const ENV_STATE_COLLECTION: &str = "TIDEMARK_STATE_COLLECTION";
pub const ENV_NAMESPACE: &str = "TIDEMARK_NAMESPACE";
pub const ENV_TRANSACTIONS: &str = "TIDEMARK_TRANSACTIONS";
pub const ENV_URI: &str = "TIDEMARK_URI";

/// Whether migrations run inside real database transactions.
///
/// Standalone (non-replicated) MongoDB servers reject multi-document
/// transactions, so deployments targeting them switch this off explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    #[default]
    Enabled,
    Disabled,
}

impl TransactionMode {
    pub fn is_enabled(&self) -> bool {
        matches!(self, TransactionMode::Enabled)
    }
}

impl FromStr for TransactionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "enabled" | "on" | "true" | "1" => Ok(TransactionMode::Enabled),
            "disabled" | "off" | "false" | "0" => Ok(TransactionMode::Disabled),
            _ => Err(ConfigError::invalid_value(
                "transactions",
                s,
                "enabled or disabled",
            )),
        }
    }
}

impl std::fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionMode::Enabled => write!(f, "enabled"),
            TransactionMode::Disabled => write!(f, "disabled"),
        }
    }
}

/// One independently versioned migration stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Display name used in logs and reports
    pub name: String,
    /// Prefix selecting the module's migrations; also scopes its execution records
    pub namespace: String,
    /// Target database, falling back to the top-level database when absent
    #[serde(default)]
    pub database: Option<String>,
}

impl ModuleConfig {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            database: None,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

/// Configuration handed to the migration orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigratorConfig {
    /// Database used when no module overrides it
    pub database: String,
    /// Collection storing execution records in every target database
    #[serde(default = "default_state_collection")]
    pub state_collection: String,
    /// Namespace prefix for the global run (ignored when modules are configured)
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub transactions: TransactionMode,
    /// Modules are processed in the order listed
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
    /// Connection string for driver-backed clients
    #[serde(default)]
    pub connection_uri: Option<String>,
    /// Origin of every setting that did not come from its default
    #[serde(skip)]
    sources: BTreeMap<String, ConfigSource>,
}

fn default_state_collection() -> String {
    DEFAULT_STATE_COLLECTION.to_string()
}

impl MigratorConfig {
    /// Create a configuration targeting the given database
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            state_collection: default_state_collection(),
            namespace: None,
            transactions: TransactionMode::Enabled,
            modules: Vec::new(),
            connection_uri: None,
            sources: BTreeMap::from([("database".to_string(), ConfigSource::Programmatic)]),
        }
    }

    fn set_source(&mut self, field: &str, source: ConfigSource) {
        self.sources.insert(field.to_string(), source);
    }

    pub fn with_state_collection(mut self, collection: impl Into<String>) -> Self {
        self.state_collection = collection.into();
        self.set_source("state_collection", ConfigSource::Programmatic);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self.set_source("namespace", ConfigSource::Programmatic);
        self
    }

    pub fn with_transactions(mut self, mode: TransactionMode) -> Self {
        self.transactions = mode;
        self.set_source("transactions", ConfigSource::Programmatic);
        self
    }

    /// Shorthand for [`TransactionMode::Disabled`]
    pub fn without_transactions(self) -> Self {
        self.with_transactions(TransactionMode::Disabled)
    }

    pub fn with_module(mut self, module: ModuleConfig) -> Self {
        self.modules.push(module);
        self.set_source("modules", ConfigSource::Programmatic);
        self
    }

    pub fn with_connection_uri(mut self, uri: impl Into<String>) -> Self {
        self.connection_uri = Some(uri.into());
        self.set_source("connection_uri", ConfigSource::Programmatic);
        self
    }

    /// True when migrations are fanned out across modules
    pub fn is_modular(&self) -> bool {
        !self.modules.is_empty()
    }

    /// Database a module's migrations and records live in
    pub fn module_database<'a>(&'a self, module: &'a ModuleConfig) -> &'a str {
        module.database.as_deref().unwrap_or(&self.database)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Self::parse_yaml(yaml, ConfigSource::Programmatic)
    }

    /// Load and validate a YAML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::parse_yaml(&content, ConfigSource::File(path.display().to_string()))
    }

    fn parse_yaml(yaml: &str, source: ConfigSource) -> Result<Self, ConfigError> {
        let document: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let mut config: Self = serde_yaml::from_value(document.clone())?;

        if let serde_yaml::Value::Mapping(mapping) = &document {
            for key in mapping.keys().filter_map(serde_yaml::Value::as_str) {
                config.set_source(key, source.clone());
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Build a configuration purely from `TIDEMARK_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database = env::var(ENV_DATABASE).map_err(|_| {
            ConfigError::missing_required(
                "database",
                format!("{} environment variable is required", ENV_DATABASE),
            )
        })?;

        Self::new(database).apply_env_overrides()
    }

    /// Overlay any `TIDEMARK_*` variables that are set, then validate
    pub fn apply_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(database) = env::var(ENV_DATABASE) {
            self.database = database;
            self.set_source("database", ConfigSource::EnvVar(ENV_DATABASE.to_string()));
        }

        if let Ok(collection) = env::var(ENV_STATE_COLLECTION) {
            self.state_collection = collection;
            self.set_source(
                "state_collection",
                ConfigSource::EnvVar(ENV_STATE_COLLECTION.to_string()),
            );
        }

        if let Ok(namespace) = env::var(ENV_NAMESPACE) {
            self.namespace = Some(namespace);
            self.set_source("namespace", ConfigSource::EnvVar(ENV_NAMESPACE.to_string()));
        }

        if let Ok(mode) = env::var(ENV_TRANSACTIONS) {
            self.transactions = mode.parse()?;
            self.set_source(
                "transactions",
                ConfigSource::EnvVar(ENV_TRANSACTIONS.to_string()),
            );
        }

        if let Ok(uri) = env::var(ENV_URI) {
            self.connection_uri = Some(uri);
            self.set_source("connection_uri", ConfigSource::EnvVar(ENV_URI.to_string()));
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        StorageName { field: "database" }.validate(&self.database)?;
        StorageName {
            field: "state_collection",
        }
        .validate(&self.state_collection)?;

        let mut names = HashSet::new();
        let mut namespaces = HashSet::new();

        for module in &self.modules {
            NonEmptyName {
                field: "modules.name",
            }
            .validate(&module.name)?;
            NonEmptyName {
                field: "modules.namespace",
            }
            .validate(&module.namespace)?;

            if let Some(database) = &module.database {
                StorageName {
                    field: "modules.database",
                }
                .validate(database)?;
            }

            if !names.insert(module.name.as_str()) {
                return Err(ConfigError::validation_failed(format!(
                    "module name '{}' is configured more than once",
                    module.name
                )));
            }

            if !namespaces.insert(module.namespace.as_str()) {
                return Err(ConfigError::validation_failed(format!(
                    "module namespace '{}' is configured more than once; modules must not share execution history",
                    module.namespace
                )));
            }
        }

        Ok(())
    }

    /// Report where each top-level setting came from
    pub fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let defaults = [
            ("database", self.database.clone()),
            ("state_collection", self.state_collection.clone()),
            ("namespace", display_optional(&self.namespace)),
            ("transactions", self.transactions.to_string()),
            ("modules", format!("{} module(s)", self.modules.len())),
            ("connection_uri", display_optional(&self.connection_uri)),
        ];

        defaults
            .into_iter()
            .map(|(field, value)| {
                let source = self
                    .sources
                    .get(field)
                    .cloned()
                    .unwrap_or(ConfigSource::Default(value));
                (field.to_string(), source)
            })
            .collect()
    }
}

fn display_optional(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "none".to_string())
}
