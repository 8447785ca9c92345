use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub filter: FilterConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageKind {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub storage: StorageKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub default_limit: i64,
    pub max_limit: Option<i64>,
    pub debug_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub enable_query_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    pub jwt_expires_in_days: i64,
    pub jwt_cookie_expires_in_days: i64,
    pub bcrypt_cost: u32,
    pub cors_origins: Vec<String>,
    /// Marks the session cookie `Secure`.
    pub require_https: bool,
    pub password_reset_base_url: String,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set outside development")]
    MissingVar(&'static str),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

const DEVELOPMENT_JWT_SECRET: &str = "development-only-jwt-secret-change-me";

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_source(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = match lookup("APP_ENV").as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            Some("staging") | Some("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Presets first, then individual variables
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_overrides(&lookup)
    }

    fn with_overrides(mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(v) = lookup("PORT").or_else(|| lookup("API_PORT")) {
            self.server.port = v.parse().map_err(|_| ConfigError::InvalidValue { key: "PORT", value: v })?;
        }
        if let Some(v) = lookup("STORAGE") {
            self.server.storage = match v.to_ascii_lowercase().as_str() {
                "memory" => StorageKind::Memory,
                "postgres" | "postgresql" => StorageKind::Postgres,
                _ => return Err(ConfigError::InvalidValue { key: "STORAGE", value: v }),
            };
        }

        if let Some(v) = lookup("FILTER_DEFAULT_LIMIT") {
            self.filter.default_limit = v.parse().unwrap_or(self.filter.default_limit);
        }
        if let Some(v) = lookup("FILTER_MAX_LIMIT") {
            self.filter.max_limit = v.parse().ok();
        }
        if let Some(v) = lookup("FILTER_DEBUG_LOGGING") {
            self.filter.debug_logging = v.parse().unwrap_or(self.filter.debug_logging);
        }

        if let Some(v) = lookup("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Some(v) = lookup("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Some(v) = lookup("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Some(v) = lookup("DATABASE_ENABLE_QUERY_LOGGING") {
            self.database.enable_query_logging = v.parse().unwrap_or(self.database.enable_query_logging);
        }

        match lookup("JWT_SECRET") {
            Some(v) if !v.is_empty() => self.security.jwt_secret = v,
            _ if self.environment != Environment::Development => {
                return Err(ConfigError::MissingVar("JWT_SECRET"));
            }
            _ => {}
        }
        if let Some(v) = lookup("JWT_EXPIRES_IN_DAYS") {
            self.security.jwt_expires_in_days = v.parse().unwrap_or(self.security.jwt_expires_in_days);
        }
        if let Some(v) = lookup("JWT_COOKIE_EXPIRES_IN_DAYS") {
            self.security.jwt_cookie_expires_in_days =
                v.parse().unwrap_or(self.security.jwt_cookie_expires_in_days);
        }
        if let Some(v) = lookup("BCRYPT_COST") {
            let cost: u32 = v.parse().map_err(|_| ConfigError::InvalidValue { key: "BCRYPT_COST", value: v.clone() })?;
            if !(4..=31).contains(&cost) {
                return Err(ConfigError::InvalidValue { key: "BCRYPT_COST", value: v });
            }
            self.security.bcrypt_cost = cost;
        }
        if let Some(v) = lookup("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = lookup("SECURITY_REQUIRE_HTTPS") {
            self.security.require_https = v.parse().unwrap_or(self.security.require_https);
        }
        if let Some(v) = lookup("PASSWORD_RESET_BASE_URL") {
            self.security.password_reset_base_url = v.trim_end_matches('/').to_string();
        }

        Ok(self)
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig { port: 3000, storage: StorageKind::Postgres },
            filter: FilterConfig {
                default_limit: 100,
                max_limit: None,
                debug_logging: true,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
                enable_query_logging: true,
            },
            security: SecurityConfig {
                jwt_secret: DEVELOPMENT_JWT_SECRET.to_string(),
                jwt_expires_in_days: 90,
                jwt_cookie_expires_in_days: 90,
                bcrypt_cost: 12,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
                require_https: false,
                password_reset_base_url: "http://localhost:3000/api/v1/users/resetPassword".to_string(),
            },
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            server: ServerConfig { port: 3000, storage: StorageKind::Postgres },
            filter: FilterConfig {
                default_limit: 100,
                max_limit: Some(500),
                debug_logging: false,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                connection_timeout: 10,
                enable_query_logging: true,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expires_in_days: 90,
                jwt_cookie_expires_in_days: 90,
                bcrypt_cost: 12,
                cors_origins: vec!["https://staging.example.com".to_string()],
                require_https: true,
                password_reset_base_url: "https://staging.example.com/api/v1/users/resetPassword".to_string(),
            },
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            server: ServerConfig { port: 3000, storage: StorageKind::Postgres },
            filter: FilterConfig {
                default_limit: 100,
                max_limit: Some(100),
                debug_logging: false,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 50,
                connection_timeout: 5,
                enable_query_logging: false,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expires_in_days: 90,
                jwt_cookie_expires_in_days: 90,
                bcrypt_cost: 12,
                cors_origins: vec!["https://app.example.com".to_string()],
                require_https: true,
                password_reset_base_url: "https://app.example.com/api/v1/users/resetPassword".to_string(),
            },
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}
