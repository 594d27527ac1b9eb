//! Environment-driven configuration.

use anyhow::{Context, Result};
use secrecy::Secret;
use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// `None` runs the service on the in-memory store.
    pub database_url: Option<Secret<String>>,
    pub nats_url: Option<String>,
    /// Absolute origin the gateway sends shoppers back to, e.g. `https://shop.example.com`.
    pub public_base_url: String,
    pub currency: String,
    pub allow_guest_checkout: bool,
    pub cookie_secure: bool,
    pub sslcommerz: SslCommerzConfig,
}

#[derive(Clone, Debug)]
pub struct SslCommerzConfig {
    pub store_id: String,
    pub store_pass: Secret<String>,
    pub sandbox: bool,
    /// Overrides the sandbox/live host; used by tests.
    pub base_url: Option<String>,
}

impl SslCommerzConfig {
    pub const SANDBOX_URL: &'static str = "https://sandbox.sslcommerz.com";
    pub const LIVE_URL: &'static str = "https://securepay.sslcommerz.com";

    pub fn api_base_url(&self) -> &str {
        match &self.base_url {
            Some(url) => url,
            None if self.sandbox => Self::SANDBOX_URL,
            None => Self::LIVE_URL,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let port = env::var("PORT").unwrap_or_else(|_| "8083".to_string()).parse().context("PORT must be a number")?;
        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()).map(Secret::new);
        let nats_url = env::var("NATS_URL").ok().filter(|v| !v.is_empty());
        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port))
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            port,
            database_url,
            nats_url,
            cookie_secure: flag("COOKIE_SECURE", public_base_url.starts_with("https://")),
            public_base_url,
            currency: env::var("STORE_CURRENCY").unwrap_or_else(|_| "BDT".to_string()),
            allow_guest_checkout: flag("ALLOW_GUEST_CHECKOUT", false),
            sslcommerz: SslCommerzConfig {
                store_id: env::var("SSLCOMMERZ_STORE_ID").unwrap_or_default(),
                store_pass: Secret::new(env::var("SSLCOMMERZ_STORE_PASS").unwrap_or_default()),
                sandbox: flag("SSLCOMMERZ_SANDBOX", true),
                base_url: env::var("SSLCOMMERZ_BASE_URL").ok().filter(|v| !v.is_empty()),
            },
        })
    }
}

fn flag(key: &str, default: bool) -> bool {
    env::var(key).ok().map_or(default, |v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
