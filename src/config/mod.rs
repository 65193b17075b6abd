use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

use crate::voting::threshold::{MAX_PERCENT, Thresholds};

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub voting: VotingConfig,
}

impl ApiConfig {
    pub fn load() -> Result<Self> {
        let configured_path =
            std::env::var("BOARD_API_CONFIG").unwrap_or_else(|_| "config/api.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("BOARD_API_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/api.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize API configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        assert!(
            !self.database.url.is_empty(),
            "Database URL must be specified"
        );
        assert!(
            self.server.port > 0,
            "Server port must be greater than zero"
        );
        self.cache.ensure_bounds()?;
        self.voting.ensure_bounds()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        assert!(self.port < 65535, "HTTP port must be below 65535");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub items_max_capacity: u64,
    pub items_ttl_seconds: u64,
}

impl CacheConfig {
    pub fn items_ttl(&self) -> Duration {
        Duration::from_secs(self.items_ttl_seconds)
    }

    fn ensure_bounds(&self) -> Result<()> {
        assert!(
            self.items_max_capacity >= 16,
            "Item cache capacity must be at least 16"
        );
        assert!(
            self.items_ttl_seconds <= 3_600,
            "Item cache TTL cannot exceed one hour"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VotingConfig {
    /// Profile roles that count toward the eligible-voter snapshot.
    pub eligible_roles: Vec<String>,
    #[serde(default = "VotingConfig::default_threshold_percent")]
    pub default_approval_threshold_percent: i32,
    #[serde(default = "VotingConfig::default_threshold_percent")]
    pub default_minimum_quorum_percent: i32,
}

impl VotingConfig {
    pub fn default_thresholds(&self) -> Thresholds {
        Thresholds::new(
            self.default_approval_threshold_percent,
            self.default_minimum_quorum_percent,
        )
        .expect("Default thresholds validated at load")
    }

    pub fn ensure_bounds(&self) -> Result<()> {
        ensure!(
            !self.eligible_roles.is_empty(),
            "voting.eligible_roles must name at least one role"
        );
        ensure!(
            self.eligible_roles.iter().all(|role| !role.trim().is_empty()),
            "voting.eligible_roles must not contain blank roles"
        );
        ensure!(
            Thresholds::new(
                self.default_approval_threshold_percent,
                self.default_minimum_quorum_percent,
            )
            .is_some(),
            "default voting thresholds must be between 0 and {MAX_PERCENT}"
        );
        Ok(())
    }

    const fn default_threshold_percent() -> i32 {
        50
    }
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}
