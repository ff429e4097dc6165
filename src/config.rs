//! Configuration for lamad-progress

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lamad-progress")
}

/// Which quiz attempt is authoritative when a learner resubmits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPolicy {
    /// Prior attempts are deleted on resubmission; only the latest counts
    MostRecent,
    /// All attempts are kept; the best score is reported
    Best,
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        AttemptPolicy::MostRecent
    }
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the database and extracted packages
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Pass threshold (percent) used when neither the quiz nor its course sets one
    #[serde(default = "default_pass_threshold")]
    pub default_pass_threshold: u8,

    /// Resubmission policy for quiz attempts
    #[serde(default)]
    pub quiz_attempt_policy: AttemptPolicy,

    /// Watch percentage a companion video needs before its SCORM item opens,
    /// unless the item metadata names its own
    #[serde(default = "default_companion_video_percent")]
    pub companion_video_percent: f64,

    /// Largest accepted package archive in bytes
    #[serde(default = "default_max_package_bytes")]
    pub max_package_bytes: u64,

    /// Largest total size an archive may expand to when extracted
    #[serde(default = "default_max_extracted_bytes")]
    pub max_extracted_bytes: u64,

    /// Largest accepted JSON request body in bytes
    #[serde(default = "default_max_json_bytes")]
    pub max_json_bytes: u64,

    /// SCORM sessions with no runtime call for this long are flushed and dropped
    #[serde(default = "default_scorm_idle_timeout_secs")]
    pub scorm_idle_timeout_secs: u64,

    /// How long a finished SCORM session keeps answering before it is dropped
    #[serde(default = "default_scorm_terminated_linger_secs")]
    pub scorm_terminated_linger_secs: u64,

    /// Period of the SCORM session sweep
    #[serde(default = "default_scorm_sweep_interval_secs")]
    pub scorm_sweep_interval_secs: u64,

    /// Upper bound on any wait for the store (pool checkout and SQLite busy timeout)
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Maximum pooled database connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Random bytes per certificate verification token
    #[serde(default = "default_certificate_token_bytes")]
    pub certificate_token_bytes: usize,
}

fn default_http_port() -> u16 {
    8095
}

fn default_pass_threshold() -> u8 {
    70
}

fn default_companion_video_percent() -> f64 {
    80.0
}

fn default_max_package_bytes() -> u64 {
    200 * 1024 * 1024
}

fn default_max_extracted_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_max_json_bytes() -> u64 {
    1024 * 1024
}

fn default_scorm_idle_timeout_secs() -> u64 {
    30 * 60
}

fn default_scorm_terminated_linger_secs() -> u64 {
    60
}

fn default_scorm_sweep_interval_secs() -> u64 {
    60
}

fn default_store_timeout_ms() -> u64 {
    5000
}

fn default_pool_size() -> u32 {
    8
}

fn default_certificate_token_bytes() -> usize {
    32
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            http_port: default_http_port(),
            default_pass_threshold: default_pass_threshold(),
            quiz_attempt_policy: AttemptPolicy::default(),
            companion_video_percent: default_companion_video_percent(),
            max_package_bytes: default_max_package_bytes(),
            max_extracted_bytes: default_max_extracted_bytes(),
            max_json_bytes: default_max_json_bytes(),
            scorm_idle_timeout_secs: default_scorm_idle_timeout_secs(),
            scorm_terminated_linger_secs: default_scorm_terminated_linger_secs(),
            scorm_sweep_interval_secs: default_scorm_sweep_interval_secs(),
            store_timeout_ms: default_store_timeout_ms(),
            pool_size: default_pool_size(),
            certificate_token_bytes: default_certificate_token_bytes(),
        }
    }
}

impl Config {
    /// Config rooted at a specific directory, everything else defaulted
    pub fn with_storage_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            storage_dir: dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load `<dir>/config.toml` when it exists, otherwise defaults rooted at `dir`.
    ///
    /// A file that omits `storage_dir` stays rooted at `dir`.
    pub fn load_from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, std::io::Error> {
        let dir = dir.as_ref();
        let path = dir.join("config.toml");
        if !path.exists() {
            return Ok(Self::with_storage_dir(dir));
        }
        let content = std::fs::read_to_string(&path)?;
        let invalid = |e: toml::de::Error| std::io::Error::new(std::io::ErrorKind::InvalidData, e);
        let table: toml::Table = toml::from_str(&content).map_err(invalid)?;
        let names_dir = table.contains_key("storage_dir");
        let mut config: Config = toml::from_str(&content).map_err(invalid)?;
        if !names_dir {
            config.storage_dir = dir.to_path_buf();
        }
        Ok(config)
    }

    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// SQLite database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join("progress.db")
    }

    /// Root for extracted SCORM packages
    pub fn packages_dir(&self) -> PathBuf {
        self.storage_dir.join("packages")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn scorm_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.scorm_idle_timeout_secs)
    }

    pub fn scorm_terminated_linger(&self) -> Duration {
        Duration::from_secs(self.scorm_terminated_linger_secs)
    }

    pub fn scorm_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.scorm_sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_explicit() {
        let config = Config::default();
        assert_eq!(config.default_pass_threshold, 70);
        assert_eq!(config.quiz_attempt_policy, AttemptPolicy::MostRecent);
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            default_pass_threshold = 80
            quiz_attempt_policy = "best"
            "#,
        )
        .unwrap();

        assert_eq!(config.default_pass_threshold, 80);
        assert_eq!(config.quiz_attempt_policy, AttemptPolicy::Best);
        assert_eq!(config.http_port, 8095);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_storage_dir(dir.path());
        config.save(config.config_path()).unwrap();

        let loaded = Config::load(config.config_path()).unwrap();
        assert_eq!(loaded.storage_dir, dir.path());
        assert_eq!(loaded.max_package_bytes, config.max_package_bytes);
    }

    #[test]
    fn test_load_from_dir_reads_existing_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "http_port = 9001\nquiz_attempt_policy = \"best\"\n",
        )
        .unwrap();

        let config = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.http_port, 9001);
        assert_eq!(config.quiz_attempt_policy, AttemptPolicy::Best);
        assert_eq!(config.storage_dir, dir.path());
    }

    #[test]
    fn test_load_from_dir_without_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.http_port, 8095);
        assert_eq!(config.storage_dir, dir.path());

        std::fs::write(dir.path().join("config.toml"), "http_port = \"nope\"").unwrap();
        assert!(Config::load_from_dir(dir.path()).is_err());
    }
}
