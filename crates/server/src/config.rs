use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_JWT_SECRET: &str = "change-me-in-production";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub invitations: InvitationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed by CORS. Empty means any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_minutes: i64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_days: i64,
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationConfig {
    #[serde(default = "default_invitation_expiry")]
    pub default_expiry_hours: i64,
}

fn default_access_ttl() -> i64 { 15 }
fn default_refresh_ttl() -> i64 { 30 }
fn default_min_password_length() -> usize { 8 }
fn default_invitation_expiry() -> i64 { 168 }

impl Default for InvitationConfig {
    fn default() -> Self {
        Self {
            default_expiry_hours: default_invitation_expiry(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            access_token_ttl_minutes: default_access_ttl(),
            refresh_token_ttl_days: default_refresh_ttl(),
            min_password_length: default_min_password_length(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                allowed_origins: Vec::new(),
            },
            database: DatabaseConfig {
                path: "./data/charter.db".to_string(),
            },
            auth: AuthConfig::default(),
            invitations: InvitationConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_env_overrides();

        if config.auth.jwt_secret == DEFAULT_JWT_SECRET {
            tracing::warn!("Using the default JWT secret; set CHARTER_JWT_SECRET in production");
        }
        Ok(config)
    }

    fn load_file() -> Result<Self> {
        // Try to load from environment variable
        if let Ok(path) = std::env::var("CHARTER_CONFIG") {
            return Self::load_from_path(&PathBuf::from(path));
        }

        let default_paths = vec![
            PathBuf::from("charter-server.toml"),
            PathBuf::from("config/charter-server.toml"),
            PathBuf::from("/etc/charter/server.toml"),
        ];

        for path in default_paths {
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        tracing::warn!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CHARTER_DATABASE_PATH") {
            self.database.path = path;
        }
        if let Ok(secret) = std::env::var("CHARTER_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(port) = std::env::var("CHARTER_PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_file_with_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [database]
            path = "/tmp/charter.db"

            [auth]
            jwt_secret = "s3cret"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert!(config.server.allowed_origins.is_empty());
        assert_eq!(config.auth.access_token_ttl_minutes, 15);
        assert_eq!(config.auth.refresh_token_ttl_days, 30);
        assert_eq!(config.auth.min_password_length, 8);
        assert_eq!(config.invitations.default_expiry_hours, 168);
    }

    #[test]
    fn rejects_file_without_auth_section() {
        let result = Config::from_toml(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [database]
            path = "/tmp/charter.db"
            "#,
        );
        assert!(result.is_err());
    }
}
