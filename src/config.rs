//! Application configuration module
//!
//! Loads settings once from environment variables (with `.env` support).
//! The lifecycle section is handed to the orchestrator at construction and
//! never read again from the environment.

use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0),
            port: 3000,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Everything the lifecycle core needs to know about its environment
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Object-store bucket holding landing files, artifacts and backups
    pub bucket: String,
    /// Folder inside the bucket where source files land (always ends in `/`)
    pub landing_prefix: String,
    pub project_id: String,
    /// Region used when a dataset has to be created
    pub region: String,
    /// Upper bound on bytes fetched from a source object
    pub sample_max_bytes: usize,
    pub sample_max_rows: usize,
    pub partition_expiration_days: u32,
    pub max_cluster_columns: usize,
    pub collaborator_timeout: Duration,
    pub backup_timeout: Duration,
    /// Consecutive wrong confirmation phrases before a deletion is aborted
    pub max_confirmation_attempts: u32,
    /// How long an unfinished deletion session may wait for the caller
    pub deletion_session_ttl: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            bucket: "data-architect".to_string(),
            landing_prefix: "landing/".to_string(),
            project_id: "local-project".to_string(),
            region: "US".to_string(),
            sample_max_bytes: 2048,
            sample_max_rows: 5,
            partition_expiration_days: 365,
            max_cluster_columns: 4,
            collaborator_timeout: Duration::from_secs(30),
            backup_timeout: Duration::from_secs(600),
            max_confirmation_attempts: 3,
            deletion_session_ttl: Duration::from_secs(900),
        }
    }
}

impl LifecycleConfig {
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(invalid("GCS_BUCKET_NAME", "must not be empty"));
        }
        if self.project_id.trim().is_empty() {
            return Err(invalid("GCP_PROJECT_ID", "must not be empty"));
        }
        if self.sample_max_bytes == 0 {
            return Err(invalid("SAMPLE_MAX_BYTES", "must be greater than zero"));
        }
        if self.max_cluster_columns == 0 {
            return Err(invalid("MAX_CLUSTER_COLUMNS", "must be greater than zero"));
        }
        if self.max_confirmation_attempts == 0 {
            return Err(invalid("MAX_CONFIRMATION_ATTEMPTS", "must be greater than zero"));
        }
        if self.deletion_session_ttl.is_zero() {
            return Err(invalid("DELETION_SESSION_TTL_SECS", "must be greater than zero"));
        }
        if !self.landing_prefix.ends_with('/') {
            self.landing_prefix.push('/');
        }
        Ok(self)
    }
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub lifecycle: LifecycleConfig,
    /// Local directory whose files are copied into the landing folder at boot
    pub seed_dir: Option<String>,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let server = ServerConfig {
            host: parse_var("HOST")?.unwrap_or_else(|| ServerConfig::default().host),
            port: parse_var("PORT")?.unwrap_or_else(|| ServerConfig::default().port),
        };

        let cors = CorsConfig {
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let defaults = LifecycleConfig::default();
        let lifecycle = LifecycleConfig {
            bucket: std::env::var("GCS_BUCKET_NAME").unwrap_or(defaults.bucket),
            landing_prefix: std::env::var("LANDING_FOLDER").unwrap_or(defaults.landing_prefix),
            project_id: std::env::var("GCP_PROJECT_ID").unwrap_or(defaults.project_id),
            region: std::env::var("BQ_REGION").unwrap_or(defaults.region),
            sample_max_bytes: parse_var("SAMPLE_MAX_BYTES")?.unwrap_or(defaults.sample_max_bytes),
            sample_max_rows: parse_var("SAMPLE_MAX_ROWS")?.unwrap_or(defaults.sample_max_rows),
            partition_expiration_days: parse_var("PARTITION_EXPIRATION_DAYS")?
                .unwrap_or(defaults.partition_expiration_days),
            max_cluster_columns: parse_var("MAX_CLUSTER_COLUMNS")?
                .unwrap_or(defaults.max_cluster_columns),
            collaborator_timeout: parse_var("COLLABORATOR_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.collaborator_timeout),
            backup_timeout: parse_var("BACKUP_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.backup_timeout),
            max_confirmation_attempts: parse_var("MAX_CONFIRMATION_ATTEMPTS")?
                .unwrap_or(defaults.max_confirmation_attempts),
            deletion_session_ttl: parse_var("DELETION_SESSION_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.deletion_session_ttl),
        }
        .validate()?;

        Ok(Self {
            server,
            cors,
            lifecycle,
            seed_dir: std::env::var("LOCAL_SEED_DIR").ok(),
        })
    }
}

/// Read an optional variable, failing loudly when it is set but unparsable
fn parse_var<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(var, e.to_string())),
        Err(_) => Ok(None),
    }
}

fn invalid(var: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        var,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_default_lifecycle_config_matches_conventions() {
        let config = LifecycleConfig::default();
        assert_eq!(config.bucket, "data-architect");
        assert_eq!(config.landing_prefix, "landing/");
        assert_eq!(config.sample_max_bytes, 2048);
        assert_eq!(config.max_confirmation_attempts, 3);
        assert_eq!(config.deletion_session_ttl, Duration::from_secs(900));
    }

    #[test]
    fn test_validate_normalizes_landing_prefix() {
        let config = LifecycleConfig {
            landing_prefix: "incoming".to_string(),
            ..LifecycleConfig::default()
        }
        .validate()
        .unwrap();
        assert_eq!(config.landing_prefix, "incoming/");
    }

    #[test]
    fn test_validate_rejects_zero_session_ttl() {
        let result = LifecycleConfig {
            deletion_session_ttl: Duration::ZERO,
            ..LifecycleConfig::default()
        }
        .validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { var: "DELETION_SESSION_TTL_SECS", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_bucket() {
        let result = LifecycleConfig {
            bucket: "  ".to_string(),
            ..LifecycleConfig::default()
        }
        .validate();
        assert!(result.is_err());
    }
}
