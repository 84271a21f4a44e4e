/// Database connection and table creation
pub mod database;

/// Application settings loaded from config.toml and the environment
pub mod settings;

pub use settings::{
    AuthSettings, CheckoutFlow, GatewaySettings, LendingSettings, RateLimitSettings,
    RetrySettings, Settings, load_settings,
};
