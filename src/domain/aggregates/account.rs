//! Customers and their saved addresses

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_COUNTRY: &str = "Bangladesh";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_staff: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressLabel { #[default] Home, Office, Other }

impl AddressLabel {
    pub fn as_str(&self) -> &'static str { match self { Self::Home => "home", Self::Office => "office", Self::Other => "other" } }
    pub fn parse(s: &str) -> Self { match s { "office" => Self::Office, "other" => Self::Other, _ => Self::Home } }
}

/// A saved address. Mutable; orders never point at it, they copy an [`AddressSnapshot`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Address {
    pub id: Uuid,
    pub user_id: Uuid,
    pub label: AddressLabel,
    pub full_name: String,
    pub phone: String,
    pub country: String,
    pub city: String,
    pub area: String,
    pub address_line1: String,
    pub address_line2: String,
    pub postal_code: String,
    pub is_default_shipping: bool,
    pub is_default_billing: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Address {
    pub fn snapshot(&self) -> AddressSnapshot {
        AddressSnapshot {
            full_name: self.full_name.clone(), phone: self.phone.clone(), email: String::new(),
            address_line1: self.address_line1.clone(), address_line2: self.address_line2.clone(),
            city: self.city.clone(), area: self.area.clone(), postal_code: self.postal_code.clone(),
            country: self.country.clone(),
        }
    }

    /// One-line form used on the review page.
    pub fn full_address(&self) -> String {
        let mut parts = vec![self.address_line1.as_str()];
        if !self.address_line2.is_empty() { parts.push(&self.address_line2); }
        if !self.area.is_empty() { parts.push(&self.area); }
        parts.push(&self.city);
        if !self.postal_code.is_empty() { parts.push(&self.postal_code); }
        parts.push(&self.country);
        parts.join(", ")
    }
}

/// Clears the default flags that `saved` takes over from the user's other addresses.
///
/// Keeps at most one default shipping and one default billing address per user.
pub fn release_defaults(others: &mut [Address], saved: &Address) {
    for other in others.iter_mut().filter(|a| a.user_id == saved.user_id && a.id != saved.id) {
        if saved.is_default_shipping { other.is_default_shipping = false; }
        if saved.is_default_billing { other.is_default_billing = false; }
    }
}

/// Address as copied onto a checkout session or an order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressSnapshot {
    pub full_name: String,
    pub phone: String,
    pub email: String,
    pub address_line1: String,
    pub address_line2: String,
    pub city: String,
    pub area: String,
    pub postal_code: String,
    pub country: String,
}

impl AddressSnapshot {
    pub fn is_empty(&self) -> bool { self.full_name.is_empty() && self.address_line1.is_empty() }

    /// Multi-line form shown on confirmation pages.
    pub fn display(&self) -> String {
        if self.is_empty() { return "No address".to_string(); }
        let country = if self.country.is_empty() { DEFAULT_COUNTRY } else { &self.country };
        let city_line = format!("{}, {}", self.city, self.postal_code);
        [self.full_name.as_str(), &self.address_line1, &self.address_line2, &city_line, country]
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(user_id: Uuid, shipping: bool, billing: bool) -> Address {
        let now = Utc::now();
        Address {
            id: Uuid::new_v4(), user_id, label: AddressLabel::Home, full_name: "Rahim Uddin".into(),
            phone: "01700000000".into(), country: DEFAULT_COUNTRY.into(), city: "Dhaka".into(),
            area: "Gulshan".into(), address_line1: "House 12, Road 5".into(), address_line2: String::new(),
            postal_code: "1212".into(), is_default_shipping: shipping, is_default_billing: billing,
            created_at: now, updated_at: now,
        }
    }

    #[test]
    fn only_one_default_per_kind() {
        let user = Uuid::new_v4();
        let mut existing = vec![address(user, true, true), address(Uuid::new_v4(), true, false)];
        let saved = address(user, true, false);
        release_defaults(&mut existing, &saved);
        assert!(!existing[0].is_default_shipping);
        assert!(existing[0].is_default_billing);
        assert!(existing[1].is_default_shipping, "other users are untouched");
    }

    #[test]
    fn snapshot_display() {
        let a = address(Uuid::new_v4(), false, false);
        assert_eq!(a.full_address(), "House 12, Road 5, Gulshan, Dhaka, 1212, Bangladesh");
        assert_eq!(a.snapshot().display(), "Rahim Uddin\nHouse 12, Road 5\nDhaka, 1212\nBangladesh");
        assert_eq!(AddressSnapshot::default().display(), "No address");
    }
}
