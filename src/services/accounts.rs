//! Registration, sign-in and saved addresses.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::account::DEFAULT_COUNTRY;
use crate::domain::aggregates::{Address, AddressLabel, User};
use crate::store::Store;
use crate::{EcommerceError, Result};

#[derive(Debug, Deserialize, Validate)]
pub struct Registration {
    #[validate(email(message = "Enter a valid email address."))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters."))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewAddress {
    #[serde(default)]
    pub label: String,
    #[validate(length(min = 1, message = "Full name is required."))]
    pub full_name: String,
    #[validate(length(min = 1, message = "Phone is required."))]
    pub phone: String,
    #[serde(default)]
    pub country: String,
    #[validate(length(min = 1, message = "City is required."))]
    pub city: String,
    #[serde(default)]
    pub area: String,
    #[validate(length(min = 1, message = "Address line 1 is required."))]
    pub address_line1: String,
    #[serde(default)]
    pub address_line2: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub is_default_shipping: Option<String>,
    #[serde(default)]
    pub is_default_billing: Option<String>,
}

/// HTML checkboxes arrive as `on` when ticked and are absent otherwise.
fn checked(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| matches!(v, "on" | "true" | "1"))
}

fn first_error(errors: validator::ValidationErrors) -> EcommerceError {
    let message = errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| "Please correct the errors below.".to_string());
    EcommerceError::Validation(message)
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| EcommerceError::StorageError(format!("failed to hash password: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash).is_ok_and(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
}

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn Store>,
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>) -> Self { Self { store } }

    pub async fn register(&self, form: Registration) -> Result<User> {
        form.validate().map_err(first_error)?;
        let user = User {
            id: Uuid::now_v7(),
            email: form.email.trim().to_lowercase(),
            password_hash: hash_password(&form.password)?,
            is_staff: false,
            created_at: Utc::now(),
        };
        self.store.create_user(&user).await?;
        tracing::info!(user_id = %user.id, "account registered");
        Ok(user)
    }

    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User> {
        let email = email.trim().to_lowercase();
        match self.store.user_by_email(&email).await? {
            Some(user) if verify_password(password, &user.password_hash) => Ok(user),
            _ => {
                tracing::info!("failed sign-in attempt");
                Err(EcommerceError::InvalidCredentials)
            }
        }
    }

    pub async fn user(&self, id: Uuid) -> Result<Option<User>> { self.store.user(id).await }

    pub async fn addresses(&self, user_id: Uuid) -> Result<Vec<Address>> { self.store.addresses(user_id).await }

    /// Saves a new address. Taking a default flag clears it on the user's other addresses.
    pub async fn add_address(&self, user_id: Uuid, form: NewAddress) -> Result<Address> {
        form.validate().map_err(first_error)?;
        let now = Utc::now();
        let first = self.store.addresses(user_id).await?.is_empty();
        let address = Address {
            id: Uuid::now_v7(),
            user_id,
            label: AddressLabel::parse(&form.label),
            full_name: form.full_name.trim().to_string(),
            phone: form.phone.trim().to_string(),
            country: if form.country.trim().is_empty() { DEFAULT_COUNTRY.to_string() } else { form.country.trim().to_string() },
            city: form.city.trim().to_string(),
            area: form.area.trim().to_string(),
            address_line1: form.address_line1.trim().to_string(),
            address_line2: form.address_line2.trim().to_string(),
            postal_code: form.postal_code.trim().to_string(),
            is_default_shipping: first || checked(&form.is_default_shipping),
            is_default_billing: first || checked(&form.is_default_billing),
            created_at: now,
            updated_at: now,
        };
        self.store.save_address(&address).await?;
        Ok(address)
    }
}
