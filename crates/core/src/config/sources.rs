/// Where a migrator setting came from, reported at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Overridden by a `TIDEMARK_*` variable
    EnvVar(String),
    /// Nobody set it; carries the value in effect
    Default(String),
    /// Read from the YAML file at this path
    File(String),
    /// Set through the builder API or an inline YAML document
    Programmatic,
}

impl ConfigSource {
    pub fn is_env_var(&self) -> bool {
        matches!(self, ConfigSource::EnvVar(_))
    }

    pub fn is_default(&self) -> bool {
        matches!(self, ConfigSource::Default(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self, ConfigSource::File(_))
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::EnvVar(var) => write!(f, "environment ({})", var),
            ConfigSource::Default(value) => write!(f, "default ({})", value),
            ConfigSource::File(path) => write!(f, "file ({})", path),
            ConfigSource::Programmatic => write!(f, "programmatic"),
        }
    }
}
