use std::path::{Path, PathBuf};

use crate::Sbu;

/// Possible errors while loading the report configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file as YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("The active threshold must be a finite, non-negative number, got {0}")]
    InvalidThreshold(f64),
    #[error("The configuration value '{0}' must not be empty")]
    Empty(&'static str),
}

/// The column headers used in every written report
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct ColumnLabels {
    pub username: String,
    pub project: String,
    pub name: String,
    pub pi: String,
    pub sbu_requested: String,
    pub active: String,
    /// Header of the total column and label of the grand total row
    pub sum: String,
    pub percentage: String,
}

impl Default for ColumnLabels {
    fn default() -> Self {
        Self {
            username: "username".to_owned(),
            project: "project".to_owned(),
            name: "name".to_owned(),
            pi: "PI".to_owned(),
            sbu_requested: "SBU requested".to_owned(),
            active: "active".to_owned(),
            sum: "sum".to_owned(),
            percentage: "% SBU".to_owned(),
        }
    }
}

/// The external programs queried for accounting data
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct AccountingConfig {
    /// Reports the monthly SBU usage of a single user
    pub usage_program: String,
    /// Lists all members of the cluster account
    pub members_program: String,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            usage_program: "accuse".to_owned(),
            members_program: "accinfo".to_owned(),
        }
    }
}

/// Settings shared by every stage of a report run
///
/// Built once in `main` and handed to each component by reference.
#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub labels: ColumnLabels,
    pub accounting: AccountingConfig,
    /// Users with more SBUs than this over the whole interval count as active
    pub active_threshold: f64,
    pub output_prefix: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            labels: ColumnLabels::default(),
            accounting: AccountingConfig::default(),
            active_threshold: 1.0,
            output_prefix: "Cluster_usage".to_owned(),
        }
    }
}

impl ReportConfig {
    /// Loads a configuration file, keys that are left out keep their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        // an empty document deserializes to unit, not to an empty mapping
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The active threshold as an SBU amount
    pub fn active_threshold(&self) -> Sbu {
        Sbu::saturating_from_num(self.active_threshold)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.active_threshold.is_finite() || self.active_threshold < 0.0 {
            return Err(ConfigError::InvalidThreshold(self.active_threshold));
        }

        let required = [
            ("labels.username", &self.labels.username),
            ("labels.project", &self.labels.project),
            ("labels.name", &self.labels.name),
            ("labels.pi", &self.labels.pi),
            ("labels.sbu_requested", &self.labels.sbu_requested),
            ("labels.active", &self.labels.active),
            ("labels.sum", &self.labels.sum),
            ("labels.percentage", &self.labels.percentage),
            ("accounting.usage_program", &self.accounting.usage_program),
            ("accounting.members_program", &self.accounting.members_program),
            ("output_prefix", &self.output_prefix),
        ];
        match required.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((key, _)) => Err(ConfigError::Empty(*key)),
            None => Ok(()),
        }
    }
}
