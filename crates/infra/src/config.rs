//! Service configuration sourced from the process environment.
//!
//! An optional `.env` file is loaded first; real environment variables win.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

/// Outgoing SMTP relay settings. Present only when `SMTP_HOST` is set.
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl core::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ServiceConfig {
    pub service: String,
    pub environment: Environment,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub stream_prefix: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub handler_timeout: Duration,
    pub http_addr: SocketAddr,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_lifetime: Duration,
    pub smtp: Option<SmtpConfig>,
    pub template_dir: Option<String>,
}

impl core::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("service", &self.service)
            .field("environment", &self.environment)
            .field("stream_prefix", &self.stream_prefix)
            .field("consumer_group", &self.consumer_group)
            .field("consumer_name", &self.consumer_name)
            .field("handler_timeout", &self.handler_timeout)
            .field("http_addr", &self.http_addr)
            .field("jwt_issuer", &self.jwt_issuer)
            .field("smtp", &self.smtp)
            .field("template_dir", &self.template_dir)
            .finish_non_exhaustive()
    }
}

const DEV_JWT_SECRET: &str = "khata-development-secret";

impl ServiceConfig {
    /// Load `.env` (if any) and read the configuration for `service`.
    pub fn from_env(service: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(service, |key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup` instead of the process environment.
    pub fn from_lookup(
        service: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match get("KHATA_ENV").as_deref() {
            None | Some("development") => Environment::Development,
            Some("production") => Environment::Production,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "KHATA_ENV",
                    value: other.to_string(),
                    reason: "expected development or production".into(),
                });
            }
        };

        let jwt_secret = match get("JWT_SECRET") {
            Some(secret) => secret,
            None if environment.is_production() => return Err(ConfigError::Missing("JWT_SECRET")),
            None => DEV_JWT_SECRET.to_string(),
        };

        let smtp = match get("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: parse_or("SMTP_PORT", get("SMTP_PORT"), 587)?,
                username: get("SMTP_USERNAME").unwrap_or_default(),
                password: get("SMTP_PASSWORD").unwrap_or_default(),
                from: get("SMTP_FROM").ok_or(ConfigError::Missing("SMTP_FROM"))?,
            }),
            None => None,
        };

        Ok(Self {
            service: service.to_string(),
            environment,
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            stream_prefix: get("KHATA_STREAM_PREFIX").unwrap_or_else(|| "khata".into()),
            consumer_group: get("KHATA_CONSUMER_GROUP").unwrap_or_else(|| service.to_string()),
            consumer_name: get("KHATA_CONSUMER_NAME")
                .or_else(|| get("HOSTNAME").map(|h| format!("{service}-{h}")))
                .unwrap_or_else(|| format!("{service}-{}", std::process::id())),
            handler_timeout: Duration::from_secs(parse_or(
                "KHATA_HANDLER_TIMEOUT_SECS",
                get("KHATA_HANDLER_TIMEOUT_SECS"),
                10,
            )?),
            http_addr: parse_or(
                "KHATA_HTTP_ADDR",
                get("KHATA_HTTP_ADDR"),
                SocketAddr::from(([0, 0, 0, 0], 8080)),
            )?,
            jwt_secret,
            jwt_issuer: get("JWT_ISSUER").unwrap_or_else(|| "khata".into()),
            jwt_lifetime: Duration::from_secs(parse_or(
                "JWT_LIFETIME_SECS",
                get("JWT_LIFETIME_SECS"),
                86_400,
            )?),
            smtp,
            template_dir: get("KHATA_TEMPLATE_DIR"),
        })
    }
}

fn parse_or<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
