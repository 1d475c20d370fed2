use {
    crate::{
        adapters::signature::SignatureVerifier,
        services::{
            EngineSettings,
            retry::{Backoff, RetryPolicy},
            sweeper::SweepSettings,
        },
    },
    std::{env, str::FromStr, time::Duration},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("WEBHOOK_SECRET must be set in production")]
    UnsignedInProduction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
    Test,
}

impl FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub bind_addr: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub gateway_base_url: String,
    pub gateway_access_token: String,
    pub webhook_secret: Option<String>,
    pub allow_unsigned_webhooks: bool,
    pub email_relay_url: Option<String>,
    pub request_timeout: Duration,
    pub engine: EngineSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match var("APP_ENV") {
            None => Environment::Production,
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                key: "APP_ENV",
                value,
            })?,
        };

        let defaults = EngineSettings::default();
        let sweep_minutes: u64 = parse_or(&var, "SWEEP_THRESHOLD_MINUTES", 30)?;
        let sweep_threshold_secs = sweep_minutes
            .checked_mul(60)
            .ok_or_else(|| ConfigError::Invalid {
                key: "SWEEP_THRESHOLD_MINUTES",
                value: sweep_minutes.to_string(),
            })?;
        let engine = EngineSettings {
            lock_ttl: Duration::from_secs(parse_or(&var, "LOCK_TTL_SECS", 30)?),
            lock_retry: RetryPolicy::new(
                parse_or(&var, "LOCK_MAX_ATTEMPTS", 5)?,
                Duration::from_millis(parse_or(&var, "LOCK_RETRY_DELAY_MS", 100)?),
                Backoff::Linear,
            ),
            result_ttl: Duration::from_secs(parse_or(&var, "RESULT_TTL_SECS", 600)?),
            fetch_timeout: Duration::from_millis(parse_or(&var, "FETCH_TIMEOUT_MS", 10_000)?),
            fetch_retry: RetryPolicy::new(
                parse_or(&var, "FETCH_MAX_ATTEMPTS", 3)?,
                defaults.fetch_retry.base_delay,
                Backoff::Exponential,
            ),
            dedup_window: Duration::from_secs(parse_or(&var, "DEDUP_WINDOW_SECS", 300)?),
            sweep: SweepSettings {
                interval: Duration::from_secs(parse_or(&var, "SWEEP_INTERVAL_SECS", 300)?),
                threshold: Duration::from_secs(sweep_threshold_secs),
                batch_size: parse_or(&var, "SWEEP_BATCH_SIZE", 100)?,
            },
            back_url: var("SUBSCRIPTION_BACK_URL"),
        };

        Ok(Self {
            environment,
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            database_url: var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: parse_or(&var, "DATABASE_MAX_CONNECTIONS", 20)?,
            gateway_base_url: var("GATEWAY_BASE_URL")
                .unwrap_or_else(|| "https://api.mercadopago.com".to_string()),
            gateway_access_token: var("GATEWAY_ACCESS_TOKEN")
                .ok_or(ConfigError::Missing("GATEWAY_ACCESS_TOKEN"))?,
            webhook_secret: var("WEBHOOK_SECRET"),
            allow_unsigned_webhooks: parse_or(&var, "WEBHOOK_ALLOW_UNSIGNED", false)?,
            email_relay_url: var("EMAIL_RELAY_URL"),
            request_timeout: Duration::from_secs(parse_or(&var, "REQUEST_TIMEOUT_SECS", 30)?),
            engine,
        })
    }

    /// Unsigned webhooks need a non-production environment and an explicit
    /// opt-in. Anything else without a secret refuses to start.
    pub fn signature_verifier(&self) -> Result<SignatureVerifier, ConfigError> {
        match &self.webhook_secret {
            Some(secret) => Ok(SignatureVerifier::enforced(secret.as_str())),
            None if self.environment != Environment::Production && self.allow_unsigned_webhooks => {
                Ok(SignatureVerifier::Unverified)
            }
            None => Err(ConfigError::UnsignedInProduction),
        }
    }
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
