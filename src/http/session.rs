//! Cookie session: configuration, well-known keys and flash messages.

use serde::{Deserialize, Serialize};
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, Session, SessionManagerLayer};
use uuid::Uuid;

use super::error::Result;
use crate::config::Config;
use crate::domain::aggregates::GuestCart;

pub const SESSION_COOKIE_NAME: &str = "storefront_session";

/// Two weeks of inactivity.
const SESSION_EXPIRY_SECONDS: i64 = 14 * 24 * 60 * 60;

pub mod keys {
    pub const USER_ID: &str = "user_id";
    pub const CART: &str = "cart";
    pub const GUEST_TOKEN: &str = "guest_token";
    pub const FLASH: &str = "flash";
    pub const LAST_ORDER_NUMBER: &str = "last_order_number";
}

pub fn session_layer(config: &Config) -> SessionManagerLayer<MemoryStore> {
    SessionManagerLayer::new(MemoryStore::default())
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(tower_sessions::cookie::time::Duration::seconds(SESSION_EXPIRY_SECONDS)))
        .with_secure(config.cookie_secure)
        .with_same_site(SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level { Success, Info, Warning, Error }

/// One-shot message shown on the next page the browser loads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub level: Level,
    pub message: String,
}

pub async fn flash(session: &Session, level: Level, message: impl Into<String>) -> Result<()> {
    let mut pending: Vec<Flash> = session.get(keys::FLASH).await?.unwrap_or_default();
    pending.push(Flash { level, message: message.into() });
    session.insert(keys::FLASH, pending).await?;
    Ok(())
}

/// Flashes only into a session the browser already holds.
///
/// Gateway callbacks arrive as cross-site POSTs that carry no cookie; writing
/// to the fresh session would overwrite the shopper's real one.
pub async fn flash_existing(session: &Session, level: Level, message: impl Into<String>) -> Result<()> {
    if session.id().is_some() {
        flash(session, level, message).await?;
    }
    Ok(())
}

pub async fn take_flashes(session: &Session) -> Result<Vec<Flash>> {
    Ok(session.remove(keys::FLASH).await?.unwrap_or_default())
}

pub async fn user_id(session: &Session) -> Result<Option<Uuid>> {
    Ok(session.get(keys::USER_ID).await?)
}

pub async fn guest_cart(session: &Session) -> Result<GuestCart> {
    Ok(session.get(keys::CART).await?.unwrap_or_default())
}

pub async fn save_guest_cart(session: &Session, cart: &GuestCart) -> Result<()> {
    if cart.is_empty() {
        session.remove::<GuestCart>(keys::CART).await?;
    } else {
        session.insert(keys::CART, cart).await?;
    }
    Ok(())
}

/// Token identifying an anonymous checkout, created on first use.
pub async fn guest_token(session: &Session) -> Result<String> {
    if let Some(token) = session.get::<String>(keys::GUEST_TOKEN).await? {
        return Ok(token);
    }
    let token = Uuid::new_v4().simple().to_string();
    session.insert(keys::GUEST_TOKEN, &token).await?;
    Ok(token)
}

pub async fn last_order_number(session: &Session) -> Result<Option<String>> {
    Ok(session.get(keys::LAST_ORDER_NUMBER).await?)
}

/// Key recorded on checkout sessions for support lookups.
pub fn session_key(session: &Session) -> String {
    session.id().map(|id| id.to_string()).unwrap_or_default()
}

/// Only same-site paths are followed after sign-in.
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path,
        _ => "/",
    }
}
