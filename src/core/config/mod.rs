use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::security::capability::{PERFORMANCE_MANAGE, PERFORMANCE_VIEW};

pub const DEFAULT_CONFIG_FILE: &str = "performance.toml";
pub const ENV_PREFIX: &str = "PERFORMANCE_";

const DEV_JWT_SECRET: &str = "perfserver-development-secret";
pub const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub api_prefix: String,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub run_migrations: bool,
    pub jwt_secret: Option<String>,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub role_capabilities: HashMap<String, Vec<String>>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut role_capabilities = HashMap::new();
        role_capabilities.insert(
            "admin".to_string(),
            vec![PERFORMANCE_VIEW.to_string(), PERFORMANCE_MANAGE.to_string()],
        );
        role_capabilities.insert(
            "hr".to_string(),
            vec![PERFORMANCE_VIEW.to_string(), PERFORMANCE_MANAGE.to_string()],
        );
        role_capabilities.insert("manager".to_string(), vec![PERFORMANCE_VIEW.to_string()]);

        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_prefix: "/api/performance".to_string(),
            database_url: None,
            max_connections: 10,
            run_migrations: false,
            jwt_secret: None,
            default_page_size: 20,
            max_page_size: 100,
            role_capabilities,
        }
    }
}

impl AppConfig {
    /// Defaults, then the TOML file, then `PERFORMANCE_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("PERFORMANCE_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(&file))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .with_context(|| format!("Invalid configuration (file: {})", file.display()))?;

        if config.database_url.is_none() {
            config.database_url = std::env::var("DATABASE_URL").ok();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_page_size == 0 || self.max_page_size == 0 {
            anyhow::bail!("page sizes must be positive");
        }
        if self.default_page_size > self.max_page_size {
            anyhow::bail!(
                "default_page_size ({}) exceeds max_page_size ({})",
                self.default_page_size,
                self.max_page_size
            );
        }
        if !self.api_prefix.is_empty() && !self.api_prefix.starts_with('/') {
            anyhow::bail!("api_prefix must start with '/'");
        }
        Ok(())
    }

    pub fn server_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }

    /// The built-in secret is only acceptable for throwaway in-memory runs.
    pub fn check_jwt_secret(&self, allow_development: bool) -> Result<()> {
        match self.jwt_secret.as_deref() {
            Some(secret) if secret.len() < MIN_JWT_SECRET_LEN => {
                anyhow::bail!("jwt_secret must be at least {} characters", MIN_JWT_SECRET_LEN)
            }
            Some(_) => Ok(()),
            None if allow_development => Ok(()),
            None => anyhow::bail!(
                "jwt_secret is not configured (set PERFORMANCE_JWT_SECRET, at least {} characters)",
                MIN_JWT_SECRET_LEN
            ),
        }
    }

    pub fn jwt_secret(&self) -> &str {
        self.jwt_secret.as_deref().unwrap_or(DEV_JWT_SECRET)
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.api_prefix, "/api/performance");
        assert!(config.uses_dev_secret());
        assert_eq!(
            config.role_capabilities.get("manager"),
            Some(&vec![PERFORMANCE_VIEW.to_string()])
        );
    }

    #[test]
    fn test_load_merges_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "port = 9100\ndefault_page_size = 5\n\n[role_capabilities]\nauditor = [\"performance.view\"]"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.default_page_size, 5);
        assert_eq!(
            config.role_capabilities.get("auditor"),
            Some(&vec!["performance.view".to_string()])
        );
    }

    #[test]
    fn test_jwt_secret_required_outside_memory_mode() {
        let config = AppConfig::default();
        assert!(config.check_jwt_secret(false).is_err());
        assert!(config.check_jwt_secret(true).is_ok());

        let short = AppConfig {
            jwt_secret: Some("too-short".to_string()),
            ..AppConfig::default()
        };
        assert!(short.check_jwt_secret(false).is_err());
        assert!(short.check_jwt_secret(true).is_err());

        let strong = AppConfig {
            jwt_secret: Some("x".repeat(MIN_JWT_SECRET_LEN)),
            ..AppConfig::default()
        };
        assert!(strong.check_jwt_secret(false).is_ok());
        assert!(!strong.uses_dev_secret());
    }

    #[test]
    fn test_validate_rejects_inverted_page_sizes() {
        let config = AppConfig {
            default_page_size: 50,
            max_page_size: 10,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
