//! Service configuration
//!
//! Read once at startup from the environment (plus `.env` when present).

use std::time::Duration;

use donorsync_membership::{PaypalConfig, PoolSettings, DEFAULT_PAYPAL_BASE_URL};

const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// PayPal credentials. Verification is only attempted when a webhook id is
/// configured.
#[derive(Debug, Clone, Default)]
pub struct PaypalSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub webhook_id: Option<String>,
    pub base_url: String,
}

impl PaypalSettings {
    /// Verifier settings, or `None` when verification is switched off
    pub fn verifier_config(&self) -> Option<PaypalConfig> {
        let webhook_id = self.webhook_id.clone()?;
        Some(PaypalConfig {
            client_id: self.client_id.clone().unwrap_or_default(),
            client_secret: self.client_secret.clone().unwrap_or_default(),
            webhook_id,
            base_url: self.base_url.clone(),
        })
    }
}

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Shared secret every webhook request must present
    pub webhook_secret: String,
    pub database_max_connections: u32,
    pub database_acquire_timeout: Duration,
    pub database_idle_timeout: Duration,
    /// Answer webhook senders with 200 even when processing fails, so their
    /// retry machinery never kicks in
    pub always_acknowledge_webhooks: bool,
    pub paypal: PaypalSettings,
}

// Keeps the webhook secret and database credentials out of logs
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("database_max_connections", &self.database_max_connections)
            .field("database_acquire_timeout", &self.database_acquire_timeout)
            .field("database_idle_timeout", &self.database_idle_timeout)
            .field("always_acknowledge_webhooks", &self.always_acknowledge_webhooks)
            .field("paypal_verification", &self.paypal.webhook_id.is_some())
            .finish_non_exhaustive()
    }
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    let value = std::env::var(name).map_err(|_| ConfigError::Missing(name))?;
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(ConfigError::Empty(name));
    }
    Ok(value)
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

fn flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(value) => match value.to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Ok(true),
            "false" | "no" | "0" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { name, value }),
        },
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("DATABASE_URL")?;
        let webhook_secret = required("WEBHOOK_SECRET")?;

        let bind_address = match optional("BIND_ADDRESS") {
            Some(address) => address,
            None => format!("127.0.0.1:{}", parsed("PORT", DEFAULT_PORT)?),
        };

        Ok(Self {
            database_url,
            bind_address,
            webhook_secret,
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10)?,
            database_acquire_timeout: Duration::from_secs(parsed(
                "DATABASE_ACQUIRE_TIMEOUT_SECS",
                5,
            )?),
            database_idle_timeout: Duration::from_secs(parsed("DATABASE_IDLE_TIMEOUT_SECS", 300)?),
            always_acknowledge_webhooks: flag("ALWAYS_ACKNOWLEDGE_WEBHOOKS", true)?,
            paypal: PaypalSettings {
                client_id: optional("PAYPAL_CLIENT_ID"),
                client_secret: optional("PAYPAL_CLIENT_SECRET"),
                webhook_id: optional("PAYPAL_WEBHOOK_ID"),
                base_url: optional("PAYPAL_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_PAYPAL_BASE_URL.to_string()),
            },
        })
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.database_max_connections,
            acquire_timeout: self.database_acquire_timeout,
            idle_timeout: self.database_idle_timeout,
            ..PoolSettings::new(self.database_url.clone())
        }
    }

    /// Minimal configuration for tests and embedding
    pub fn for_secret(webhook_secret: impl Into<String>) -> Self {
        Self {
            database_url: String::new(),
            bind_address: format!("127.0.0.1:{}", DEFAULT_PORT),
            webhook_secret: webhook_secret.into(),
            database_max_connections: 10,
            database_acquire_timeout: Duration::from_secs(5),
            database_idle_timeout: Duration::from_secs(300),
            always_acknowledge_webhooks: true,
            paypal: PaypalSettings {
                base_url: DEFAULT_PAYPAL_BASE_URL.to_string(),
                ..PaypalSettings::default()
            },
        }
    }
}
