use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ArchiveError, Result};
use crate::version::ARCHIVE_SUFFIX;

/// Archive run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// GCP project hosting the repositories
    pub project: String,

    /// Repository location
    pub location: String,

    /// Active repositories a worklist may name
    pub repositories: Vec<String>,

    /// Prefix of marker tags (`{prefix}-{digest}`)
    pub marker_prefix: String,

    /// Worker pool width
    pub workers: usize,

    /// Batch wall-clock limit in seconds (0 = unlimited)
    pub timeout_secs: u64,

    /// Delete the archived copy when deleting the active version is blocked
    pub reconcile_archive_copy: bool,

    /// Registry gateway configuration
    pub registry: RegistryConfig,

    /// Logging configuration
    pub log: LogConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            project: "cpg-common".to_string(),
            location: "australia-southeast1".to_string(),
            repositories: vec!["images".to_string()],
            marker_prefix: "ARCHIVED".to_string(),
            workers: 10,
            timeout_secs: 3600, // 1 hour
            reconcile_archive_copy: true,
            registry: RegistryConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ArchiveConfig {
    /// Load configuration from a YAML file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ArchiveError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_yaml::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default file if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// `~/.image-archive/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".image-archive").join("config.yaml"))
    }

    /// Check values that would make a run unsafe or meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.project.is_empty() || self.location.is_empty() {
            return Err(ArchiveError::Config(
                "project and location must be set".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(ArchiveError::Config(
                "workers must be greater than 0".to_string(),
            ));
        }
        if self.repositories.is_empty() {
            return Err(ArchiveError::Config(
                "at least one repository must be configured".to_string(),
            ));
        }
        for repository in &self.repositories {
            if repository.is_empty() || repository.contains('/') {
                return Err(ArchiveError::Config(format!(
                    "invalid repository name: '{repository}'"
                )));
            }
            // The suffix is reserved for the archived state
            if repository.ends_with(ARCHIVE_SUFFIX) {
                return Err(ArchiveError::Config(format!(
                    "repository '{repository}' ends with the reserved suffix '{ARCHIVE_SUFFIX}'"
                )));
            }
        }
        if self.marker_prefix.is_empty() {
            return Err(ArchiveError::Config(
                "marker_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Batch timeout, `None` when unlimited.
    pub fn timeout(&self) -> Option<std::time::Duration> {
        (self.timeout_secs > 0).then(|| std::time::Duration::from_secs(self.timeout_secs))
    }
}

/// Registry gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Artifact Registry API endpoint
    pub endpoint: String,

    /// Path to the skopeo binary used for copies
    pub skopeo: PathBuf,

    /// Delay between polls of a long-running delete operation
    pub poll_interval_ms: u64,

    /// Maximum polls before a delete operation is reported as timed out
    pub poll_attempts: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://artifactregistry.googleapis.com/v1".to_string(),
            skopeo: PathBuf::from("skopeo"),
            poll_interval_ms: 500,
            poll_attempts: 120,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

/// Log level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: '{}' (supported: text, json)", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ArchiveConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers, 10);
        assert_eq!(config.repositories, vec!["images".to_string()]);
        assert_eq!(config.timeout(), Some(std::time::Duration::from_secs(3600)));
    }

    #[test]
    fn test_zero_timeout_is_unlimited() {
        let config = ArchiveConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_rejects_zero_workers() {
        let config = ArchiveConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ArchiveError::Config(_))));
    }

    #[test]
    fn test_rejects_reserved_suffix() {
        let config = ArchiveConfig {
            repositories: vec!["images-archive".to_string()],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reserved suffix"));
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "project: my-project\nworkers: 4\nregistry:\n  skopeo: /usr/local/bin/skopeo\nlog:\n  level: debug\n  format: json"
        )
        .unwrap();

        let config = ArchiveConfig::load(file.path()).unwrap();
        assert_eq!(config.project, "my-project");
        assert_eq!(config.workers, 4);
        assert_eq!(config.location, "australia-southeast1");
        assert_eq!(config.registry.skopeo, PathBuf::from("/usr/local/bin/skopeo"));
        assert_eq!(config.registry.poll_attempts, 120);
        assert_eq!(config.log.level, LogLevel::Debug);
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_load_invalid_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workers: [not, a, number]").unwrap();
        let err = ArchiveConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ArchiveError::Serialization(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ArchiveConfig::load(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, ArchiveError::Config(_)));
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(tracing::Level::from(LogLevel::Debug), tracing::Level::DEBUG);
        assert_eq!(tracing::Level::from(LogLevel::Error), tracing::Level::ERROR);
    }
}
