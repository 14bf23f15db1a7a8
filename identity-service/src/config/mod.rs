use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// Used to derive the bearer cookie name.
    pub app_name: String,
    pub database: DatabaseConfig,
    pub token: TokenConfig,
    pub identity: IdentitySettings,
    pub password: PasswordHashConfig,
    pub redirect: RedirectConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub signing_secret: Secret<String>,
    pub grant_days: i64,
    pub expiry_margin_seconds: i64,
    /// How long after expiry a token may still be exchanged on refresh.
    pub renewal_grace_days: i64,
    /// Fallback cookie domain when the request carries no usable Host header.
    pub cookie_domain: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentitySettings {
    pub canonical_domain: String,
    /// Path segments that skip identity resolution entirely.
    pub bypass_segments: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordHashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedirectConfig {
    pub rules_path: Option<String>,
    pub history_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub inactivity_hours: i64,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = IdentityConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            app_name: get_env("APP_NAME", Some("Identity"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: get_parsed("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: get_parsed("DATABASE_MIN_CONNECTIONS", "1")?,
            },
            token: TokenConfig {
                signing_secret: Secret::new(get_env("TOKEN_SIGNING_SECRET", None, is_prod)?),
                grant_days: get_parsed("TOKEN_GRANT_DAYS", "90")?,
                expiry_margin_seconds: get_parsed("TOKEN_EXPIRY_MARGIN_SECONDS", "5")?,
                renewal_grace_days: get_parsed("TOKEN_RENEWAL_GRACE_DAYS", "7")?,
                cookie_domain: get_env("COOKIE_DOMAIN", Some("localhost"), is_prod)?,
            },
            identity: IdentitySettings {
                canonical_domain: get_env("CANONICAL_DOMAIN", Some("local"), is_prod)?,
                bypass_segments: get_env("IDENTITY_BYPASS_SEGMENTS", Some("logout,health"), false)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            password: PasswordHashConfig {
                memory_kib: get_parsed("PASSWORD_HASH_MEMORY_KIB", "19456")?,
                iterations: get_parsed("PASSWORD_HASH_ITERATIONS", "2")?,
                parallelism: get_parsed("PASSWORD_HASH_PARALLELISM", "1")?,
            },
            redirect: RedirectConfig {
                rules_path: env::var("REDIRECT_RULES_PATH").ok().filter(|s| !s.is_empty()),
                history_limit: get_parsed("REDIRECT_HISTORY_LIMIT", "10")?,
            },
            session: SessionConfig {
                inactivity_hours: get_parsed("SESSION_INACTIVITY_HOURS", "24")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
    }

    /// Name of the cookie carrying the signed bearer token.
    pub fn cookie_name(&self) -> String {
        format!("X-{}-BTOK-Cookie", self.app_name)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        check_range("TOKEN_GRANT_DAYS", self.token.grant_days, 1, MAX_GRANT_DAYS)?;
        check_range(
            "TOKEN_EXPIRY_MARGIN_SECONDS",
            self.token.expiry_margin_seconds,
            0,
            MAX_EXPIRY_MARGIN_SECONDS,
        )?;
        check_range(
            "TOKEN_RENEWAL_GRACE_DAYS",
            self.token.renewal_grace_days,
            0,
            MAX_GRANT_DAYS,
        )?;
        check_range(
            "SESSION_INACTIVITY_HOURS",
            self.session.inactivity_hours,
            1,
            MAX_SESSION_INACTIVITY_HOURS,
        )?;

        if self.redirect.history_limit == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REDIRECT_HISTORY_LIMIT must be positive"
            )));
        }

        if self.app_name.is_empty() || !self.app_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "APP_NAME must be a non-empty cookie-safe token"
            )));
        }

        if self.token.signing_secret.expose_secret().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TOKEN_SIGNING_SECRET must not be empty"
            )));
        }

        // In production, ensure stricter validation
        if self.environment == Environment::Prod
            && self.token.signing_secret.expose_secret().len() < 32
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TOKEN_SIGNING_SECRET must be at least 32 bytes in production"
            )));
        }

        Ok(())
    }
}

const MAX_GRANT_DAYS: i64 = 3650;
const MAX_EXPIRY_MARGIN_SECONDS: i64 = 3600;
const MAX_SESSION_INACTIVITY_HOURS: i64 = 24 * 366;

fn check_range(key: &str, value: i64, min: i64, max: i64) -> Result<(), AppError> {
    if value < min || value > max {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "{} must be between {} and {}, got {}",
            key,
            min,
            max,
            value
        )));
    }
    Ok(())
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_parsed<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), false)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
