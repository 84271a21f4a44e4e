//! Application settings loaded from `config.toml`.
//!
//! Every section has defaults, so an empty or partial file is valid. A handful
//! of environment variables (`DATABASE_URL`, `GATEWAY_URL`, `AUTH_URL`,
//! `AUTH_API_KEY`) override what the file says; `.env` is loaded by the binary
//! before this runs.

use crate::core::retry::{Backoff, RetryPolicy};
use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Database URL; overridden by `DATABASE_URL`
    pub database_url: Option<String>,
    /// Pledge and loan request rules
    pub lending: LendingSettings,
    /// Fixed-delay retry for transient failures
    pub retry: RetrySettings,
    /// Exponential backoff used when the gateway rate-limits us
    pub rate_limit: RateLimitSettings,
    /// Payment gateway endpoints
    pub gateway: GatewaySettings,
    /// Auth provider endpoint and callback polling
    pub auth: AuthSettings,
}

/// Pledge and loan request rules
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LendingSettings {
    /// Smallest pledge a lender may make, in cents
    pub min_pledge_cents: i64,
    /// Smallest amount a borrower may request, in cents
    pub min_loan_request_cents: i64,
}

impl Default for LendingSettings {
    fn default() -> Self {
        Self {
            min_pledge_cents: 2_500,
            min_loan_request_cents: 2_500,
        }
    }
}

/// Fixed-delay retry for transient failures
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1_000,
        }
    }
}

/// Exponential backoff after a rate-limit response
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// First delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Cap on any single delay, server hints included
    pub max_backoff_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

/// How the deposit checkout is presented to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutFlow {
    /// Hosted checkout page; the result comes back as redirect query parameters
    #[default]
    Redirect,
    /// In-page card widget confirmed with a client secret
    Embedded,
}

/// Payment gateway endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Base URL of the gateway's edge functions; overridden by `GATEWAY_URL`
    pub base_url: String,
    /// Wall-clock limit on confirming an embedded card payment
    pub confirm_timeout_secs: u64,
    /// Where the hosted checkout sends the user after paying; the gateway fills
    /// in `{CHECKOUT_SESSION_ID}` so the return names the session it paid
    pub success_url: String,
    /// Where the hosted checkout sends the user after cancelling
    pub cancel_url: String,
    /// Redirect or embedded checkout
    pub flow: CheckoutFlow,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321/functions/v1".to_string(),
            confirm_timeout_secs: 30,
            success_url: "http://localhost:3000/profile?success=true&session_id={CHECKOUT_SESSION_ID}".to_string(),
            cancel_url: "http://localhost:3000/profile?cancelled=true".to_string(),
            flow: CheckoutFlow::Redirect,
        }
    }
}

/// Auth provider endpoint and callback polling
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Base URL of the auth API; overridden by `AUTH_URL`
    pub base_url: String,
    /// Public API key sent with every auth request; overridden by `AUTH_API_KEY`
    pub api_key: String,
    /// How many times to look for a session after an OAuth redirect
    pub callback_attempts: u32,
    /// Delay between those lookups in milliseconds
    pub callback_delay_ms: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321/auth/v1".to_string(),
            api_key: String::new(),
            callback_attempts: 3,
            callback_delay_ms: 1_000,
        }
    }
}

impl Settings {
    /// Retry policy for gateway calls: fixed delay for transient failures,
    /// exponential backoff when rate limited.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            delay: Backoff::Fixed(Duration::from_millis(self.retry.delay_ms)),
            rate_limit: Backoff::Exponential {
                initial: Duration::from_millis(self.rate_limit.initial_backoff_ms),
                max: Duration::from_millis(self.rate_limit.max_backoff_ms),
            },
        }
    }

    /// Retry policy for looking up a session after an OAuth or payment redirect.
    #[must_use]
    pub fn session_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.auth.callback_attempts.max(1),
            Duration::from_millis(self.auth.callback_delay_ms),
        )
    }

    /// Wall-clock limit for embedded card confirmation.
    #[must_use]
    pub const fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.confirm_timeout_secs)
    }

    /// Resolved database URL: settings file, then the default.
    #[must_use]
    pub fn database_url(&self) -> String {
        self.database_url
            .clone()
            .unwrap_or_else(|| super::database::DEFAULT_DATABASE_URL.to_string())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Ok(url) = std::env::var("GATEWAY_URL") {
            self.gateway.base_url = url;
        }
        if let Ok(url) = std::env::var("AUTH_URL") {
            self.auth.base_url = url;
        }
        if let Ok(key) = std::env::var("AUTH_API_KEY") {
            self.auth.api_key = key;
        }
    }
}

/// Parses settings from TOML text without touching the environment.
pub fn parse_settings(contents: &str) -> Result<Settings> {
    toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })
}

/// Loads settings from a TOML file and applies environment overrides.
///
/// A missing file is not an error: defaults are used and a message is logged.
///
/// # Errors
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path_ref = path.as_ref();
    let mut settings = if path_ref.exists() {
        debug!("Loading settings from {:?}", path_ref);
        let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
            message: format!("Failed to read config file {path_ref:?}: {e}"),
        })?;
        parse_settings(&contents)?
    } else {
        info!("No config file at {:?}, using defaults", path_ref);
        Settings::default()
    };

    settings.apply_env_overrides();
    Ok(settings)
}
