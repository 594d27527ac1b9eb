//! Postgres [`Store`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use super::{Placement, SettleOutcome, Store};
use crate::domain::aggregates::catalog::price;
use crate::domain::aggregates::{
    Address, AddressLabel, AddressSnapshot, CartLine, CheckoutOwner, CheckoutSession, CheckoutStep, Order, OrderItem,
    OrderRecord, OrderStatus, PaymentError, PaymentMethod, PaymentStatus, PaymentTransaction, ProductType, Settlement,
    ShippingMethod, StatusHistoryEntry, TransactionStatus, User, Variant, WebhookEvent,
};
use crate::domain::value_objects::{Money, OrderNumber, Sku, TransactionId};
use crate::{EcommerceError, Result};

#[derive(Clone)]
pub struct PgStore { pool: PgPool }

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| EcommerceError::StorageError(e.to_string()))
    }

}

fn count(n: i32) -> u32 { u32::try_from(n).unwrap_or(0) }

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

const VARIANT_SELECT: &str = "SELECT v.id, p.name AS product_name, v.name AS variant_name, v.sku, p.product_type, p.image_url, \
    pr.list_price, pr.sale_price, pr.currency AS price_currency, \
    CASE WHEN i.track_inventory THEN GREATEST(i.quantity - i.reserved, 0) END AS available_qty, \
    (v.is_active AND p.is_active) AS is_active \
    FROM product_variants v JOIN products p ON p.id = v.product_id \
    LEFT JOIN prices pr ON pr.variant_id = v.id LEFT JOIN inventory i ON i.variant_id = v.id";

#[derive(FromRow)]
struct VariantRow {
    id: Uuid, product_name: String, variant_name: String, sku: String, product_type: String, image_url: Option<String>,
    list_price: Option<Decimal>, sale_price: Option<Decimal>, price_currency: Option<String>,
    available_qty: Option<i32>, is_active: bool,
}

impl TryFrom<VariantRow> for Variant {
    type Error = EcommerceError;
    fn try_from(r: VariantRow) -> Result<Self> {
        let sku = Sku::new(r.sku).map_err(|e| EcommerceError::StorageError(e.to_string()))?;
        let currency = r.price_currency.unwrap_or_else(|| "BDT".to_string());
        Ok(Variant {
            id: r.id, product_name: r.product_name, variant_name: r.variant_name, sku,
            product_type: ProductType::parse(&r.product_type), image_url: r.image_url,
            price: r.list_price.map(|list| price(list, r.sale_price, &currency)),
            available_qty: r.available_qty.map(count), is_active: r.is_active,
        })
    }
}

#[derive(FromRow)]
struct UserRow { id: Uuid, email: String, password_hash: String, is_staff: bool, created_at: DateTime<Utc> }

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        User { id: r.id, email: r.email, password_hash: r.password_hash, is_staff: r.is_staff, created_at: r.created_at }
    }
}

#[derive(FromRow)]
struct AddressRow {
    id: Uuid, user_id: Uuid, label: String, full_name: String, phone: String, country: String, city: String, area: String,
    address_line1: String, address_line2: String, postal_code: String, is_default_shipping: bool, is_default_billing: bool,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl From<AddressRow> for Address {
    fn from(r: AddressRow) -> Self {
        Address {
            id: r.id, user_id: r.user_id, label: AddressLabel::parse(&r.label), full_name: r.full_name, phone: r.phone,
            country: r.country, city: r.city, area: r.area, address_line1: r.address_line1, address_line2: r.address_line2,
            postal_code: r.postal_code, is_default_shipping: r.is_default_shipping, is_default_billing: r.is_default_billing,
            created_at: r.created_at, updated_at: r.updated_at,
        }
    }
}

#[derive(FromRow)]
struct ShippingRow {
    id: Uuid, name: String, description: String, price: Decimal, currency: String, min_delivery_days: i32,
    max_delivery_days: i32, is_active: bool, free_above: Option<Decimal>, sort_order: i32,
}

impl From<ShippingRow> for ShippingMethod {
    fn from(r: ShippingRow) -> Self {
        ShippingMethod {
            id: r.id, name: r.name, description: r.description, price: Money::new(r.price, &r.currency),
            min_delivery_days: count(r.min_delivery_days), max_delivery_days: count(r.max_delivery_days),
            is_active: r.is_active, free_above: r.free_above.map(|f| Money::new(f, &r.currency)), sort_order: count(r.sort_order),
        }
    }
}

#[derive(FromRow)]
struct CheckoutRow {
    id: Uuid, user_id: Option<Uuid>, guest_token: Option<String>, session_key: String, current_step: String,
    shipping_address_id: Option<Uuid>, billing_address_id: Option<Uuid>, guest_email: String, guest_phone: String,
    guest_shipping_address: Option<Json<AddressSnapshot>>, guest_billing_address: Option<Json<AddressSnapshot>>,
    same_as_shipping: bool, shipping_method_id: Option<Uuid>, promo_code: String, customer_note: String,
    payment_method: Option<String>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>, expires_at: DateTime<Utc>,
}

impl TryFrom<CheckoutRow> for CheckoutSession {
    type Error = EcommerceError;
    fn try_from(r: CheckoutRow) -> Result<Self> {
        let owner = match (r.user_id, r.guest_token) {
            (Some(user_id), _) => CheckoutOwner::User(user_id),
            (None, Some(token)) => CheckoutOwner::Guest(token),
            (None, None) => return Err(EcommerceError::StorageError(format!("checkout session {} has no owner", r.id))),
        };
        Ok(CheckoutSession {
            id: r.id, owner, session_key: r.session_key, current_step: CheckoutStep::parse(&r.current_step),
            shipping_address_id: r.shipping_address_id, billing_address_id: r.billing_address_id,
            guest_email: r.guest_email, guest_phone: r.guest_phone,
            guest_shipping_address: r.guest_shipping_address.map(|j| j.0), guest_billing_address: r.guest_billing_address.map(|j| j.0),
            same_as_shipping: r.same_as_shipping, shipping_method_id: r.shipping_method_id,
            promo_code: r.promo_code, customer_note: r.customer_note,
            payment_method: r.payment_method.as_deref().and_then(PaymentMethod::parse),
            created_at: r.created_at, updated_at: r.updated_at, expires_at: r.expires_at,
        })
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid, order_number: String, user_id: Option<Uuid>, customer_email: String, status: String, payment_status: String,
    shipping_address: Json<AddressSnapshot>, billing_address: Json<AddressSnapshot>, shipping_method_name: String,
    shipping_cost: Decimal, estimated_delivery: String, subtotal: Decimal, tax_amount: Decimal, discount_amount: Decimal,
    total: Decimal, currency: String, guest_email: String, guest_phone: String, promo_code: String, customer_note: String,
    payment_method: Option<String>, payment_transaction_id: Option<String>, paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl From<OrderRow> for OrderRecord {
    fn from(r: OrderRow) -> Self {
        OrderRecord {
            id: r.id, order_number: OrderNumber::parse(r.order_number), user_id: r.user_id, customer_email: r.customer_email,
            status: OrderStatus::parse(&r.status), payment_status: PaymentStatus::parse(&r.payment_status),
            shipping_address: r.shipping_address.0, billing_address: r.billing_address.0,
            shipping_method_name: r.shipping_method_name, shipping_cost: r.shipping_cost, estimated_delivery: r.estimated_delivery,
            subtotal: r.subtotal, tax_amount: r.tax_amount, discount_amount: r.discount_amount, total: r.total,
            currency: r.currency, guest_email: r.guest_email, guest_phone: r.guest_phone, promo_code: r.promo_code,
            customer_note: r.customer_note, payment_method: r.payment_method.as_deref().and_then(PaymentMethod::parse),
            payment_transaction_id: r.payment_transaction_id, paid_at: r.paid_at, created_at: r.created_at, updated_at: r.updated_at,
        }
    }
}

#[derive(FromRow)]
struct OrderItemRow {
    id: Uuid, order_id: Uuid, variant_id: Option<Uuid>, product_name: String, variant_name: String, sku: String,
    product_image: String, quantity: i32, unit_price: Decimal, total_price: Decimal, is_digital: bool, created_at: DateTime<Utc>,
}

impl From<OrderItemRow> for OrderItem {
    fn from(r: OrderItemRow) -> Self {
        OrderItem {
            id: r.id, order_id: r.order_id, variant_id: r.variant_id, product_name: r.product_name, variant_name: r.variant_name,
            sku: r.sku, product_image: r.product_image, quantity: count(r.quantity), unit_price: r.unit_price,
            total_price: r.total_price, is_digital: r.is_digital, created_at: r.created_at,
        }
    }
}

#[derive(FromRow)]
struct HistoryRow { id: Uuid, order_id: Uuid, status: String, note: String, created_at: DateTime<Utc> }

impl From<HistoryRow> for StatusHistoryEntry {
    fn from(r: HistoryRow) -> Self {
        StatusHistoryEntry { id: r.id, order_id: r.order_id, status: OrderStatus::parse(&r.status), note: r.note, created_at: r.created_at }
    }
}

#[derive(FromRow)]
struct TransactionRow {
    id: Uuid, transaction_id: String, order_id: Uuid, amount: Decimal, currency: String, payment_method: String,
    provider_reference: String, status: String, provider_response: serde_json::Value,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl From<TransactionRow> for PaymentTransaction {
    fn from(r: TransactionRow) -> Self {
        PaymentTransaction {
            id: r.id, transaction_id: TransactionId::parse(r.transaction_id), order_id: r.order_id, amount: r.amount,
            currency: r.currency, payment_method: PaymentMethod::parse(&r.payment_method).unwrap_or(PaymentMethod::SslCommerz),
            provider_reference: r.provider_reference, status: TransactionStatus::parse(&r.status),
            provider_response: r.provider_response, created_at: r.created_at, updated_at: r.updated_at,
        }
    }
}

const ORDER_COLUMNS: &str = "id, order_number, user_id, customer_email, status, payment_status, shipping_address, \
    billing_address, shipping_method_name, shipping_cost, estimated_delivery, subtotal, tax_amount, discount_amount, total, \
    currency, guest_email, guest_phone, promo_code, customer_note, payment_method, payment_transaction_id, paid_at, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, transaction_id, order_id, amount, currency, payment_method, provider_reference, status, \
    provider_response, created_at, updated_at";

const CHECKOUT_COLUMNS: &str = "id, user_id, guest_token, session_key, current_step, shipping_address_id, billing_address_id, \
    guest_email, guest_phone, guest_shipping_address, guest_billing_address, same_as_shipping, shipping_method_id, promo_code, \
    customer_note, payment_method, created_at, updated_at, expires_at";

// ---------------------------------------------------------------------------
// Writes shared by several operations
// ---------------------------------------------------------------------------

async fn insert_history(tx: &mut Transaction<'_, Postgres>, entry: &StatusHistoryEntry) -> Result<()> {
    sqlx::query("INSERT INTO order_status_history (id, order_id, status, note, created_at) VALUES ($1, $2, $3, $4, $5)")
        .bind(entry.id).bind(entry.order_id).bind(entry.status.as_str()).bind(&entry.note).bind(entry.created_at)
        .execute(&mut **tx).await?;
    Ok(())
}

async fn insert_transaction(tx: &mut Transaction<'_, Postgres>, txn: &PaymentTransaction) -> Result<()> {
    sqlx::query(&format!("INSERT INTO payment_transactions ({TRANSACTION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"))
        .bind(txn.id).bind(txn.transaction_id.as_str()).bind(txn.order_id).bind(txn.amount).bind(&txn.currency)
        .bind(txn.payment_method.as_str()).bind(&txn.provider_reference).bind(txn.status.as_str())
        .bind(&txn.provider_response).bind(txn.created_at).bind(txn.updated_at)
        .execute(&mut **tx).await?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn variants(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Variant>> {
        if ids.is_empty() { return Ok(HashMap::new()); }
        let rows = sqlx::query_as::<_, VariantRow>(&format!("{VARIANT_SELECT} WHERE v.id = ANY($1) AND v.is_active AND p.is_active"))
            .bind(ids).fetch_all(&self.pool).await?;
        rows.into_iter().map(|r| Variant::try_from(r).map(|v| (v.id, v))).collect()
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        let result = sqlx::query("INSERT INTO users (id, email, password_hash, is_staff, created_at) VALUES ($1, $2, $3, $4, $5)")
            .bind(user.id).bind(&user.email).bind(&user.password_hash).bind(user.is_staff).bind(user.created_at)
            .execute(&self.pool).await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(EcommerceError::EmailTaken),
            Err(e) => Err(e.into()),
        }
    }

    async fn user(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT id, email, password_hash, is_staff, created_at FROM users WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(User::from))
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT id, email, password_hash, is_staff, created_at FROM users WHERE email = $1")
            .bind(email).fetch_optional(&self.pool).await?;
        Ok(row.map(User::from))
    }

    async fn save_address(&self, a: &Address) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if a.is_default_shipping {
            sqlx::query("UPDATE addresses SET is_default_shipping = FALSE WHERE user_id = $1 AND id <> $2")
                .bind(a.user_id).bind(a.id).execute(&mut *tx).await?;
        }
        if a.is_default_billing {
            sqlx::query("UPDATE addresses SET is_default_billing = FALSE WHERE user_id = $1 AND id <> $2")
                .bind(a.user_id).bind(a.id).execute(&mut *tx).await?;
        }
        sqlx::query(
            "INSERT INTO addresses (id, user_id, label, full_name, phone, country, city, area, address_line1, address_line2, \
             postal_code, is_default_shipping, is_default_billing, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (id) DO UPDATE SET label = $3, full_name = $4, phone = $5, country = $6, city = $7, area = $8, \
             address_line1 = $9, address_line2 = $10, postal_code = $11, is_default_shipping = $12, is_default_billing = $13, \
             updated_at = $15",
        )
        .bind(a.id).bind(a.user_id).bind(a.label.as_str()).bind(&a.full_name).bind(&a.phone).bind(&a.country)
        .bind(&a.city).bind(&a.area).bind(&a.address_line1).bind(&a.address_line2).bind(&a.postal_code)
        .bind(a.is_default_shipping).bind(a.is_default_billing).bind(a.created_at).bind(a.updated_at)
        .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn addresses(&self, user_id: Uuid) -> Result<Vec<Address>> {
        let rows = sqlx::query_as::<_, AddressRow>("SELECT * FROM addresses WHERE user_id = $1 ORDER BY is_default_shipping DESC, created_at DESC")
            .bind(user_id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Address::from).collect())
    }

    async fn address(&self, user_id: Uuid, id: Uuid) -> Result<Option<Address>> {
        let row = sqlx::query_as::<_, AddressRow>("SELECT * FROM addresses WHERE id = $1 AND user_id = $2")
            .bind(id).bind(user_id).fetch_optional(&self.pool).await?;
        Ok(row.map(Address::from))
    }

    async fn cart_lines(&self, user_id: Uuid) -> Result<Vec<CartLine>> {
        let rows: Vec<(Uuid, i32)> = sqlx::query_as("SELECT variant_id, quantity FROM cart_items WHERE user_id = $1 ORDER BY created_at")
            .bind(user_id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(variant_id, quantity)| CartLine { variant_id, quantity: count(quantity) }).collect())
    }

    async fn put_cart_line(&self, user_id: Uuid, variant_id: Uuid, quantity: u32, override_quantity: bool) -> Result<()> {
        if quantity == 0 {
            if override_quantity {
                self.remove_cart_line(user_id, variant_id).await?;
            }
            return Ok(());
        }
        let qty = i32::try_from(quantity).map_err(|_| EcommerceError::Validation("quantity too large".to_string()))?;
        let sql = if override_quantity {
            "INSERT INTO cart_items (user_id, variant_id, quantity, created_at, updated_at) VALUES ($1, $2, $3, NOW(), NOW()) \
             ON CONFLICT (user_id, variant_id) DO UPDATE SET quantity = $3, updated_at = NOW()"
        } else {
            "INSERT INTO cart_items (user_id, variant_id, quantity, created_at, updated_at) VALUES ($1, $2, $3, NOW(), NOW()) \
             ON CONFLICT (user_id, variant_id) DO UPDATE SET quantity = cart_items.quantity + $3, updated_at = NOW()"
        };
        sqlx::query(sql).bind(user_id).bind(variant_id).bind(qty).execute(&self.pool).await?;
        Ok(())
    }

    async fn remove_cart_line(&self, user_id: Uuid, variant_id: Uuid) -> Result<bool> {
        let done = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND variant_id = $2")
            .bind(user_id).bind(variant_id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    async fn clear_cart(&self, user_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM cart_items WHERE user_id = $1").bind(user_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn merge_cart(&self, user_id: Uuid, lines: &[CartLine]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for line in lines.iter().filter(|l| l.quantity > 0) {
            let qty = i32::try_from(line.quantity).unwrap_or(i32::MAX);
            sqlx::query(
                "INSERT INTO cart_items (user_id, variant_id, quantity, created_at, updated_at) VALUES ($1, $2, $3, NOW(), NOW()) \
                 ON CONFLICT (user_id, variant_id) DO UPDATE SET quantity = cart_items.quantity + $3, updated_at = NOW()",
            )
            .bind(user_id).bind(line.variant_id).bind(qty).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn shipping_methods(&self) -> Result<Vec<ShippingMethod>> {
        let rows = sqlx::query_as::<_, ShippingRow>("SELECT * FROM shipping_methods WHERE is_active ORDER BY sort_order, price")
            .fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(ShippingMethod::from).collect())
    }

    async fn shipping_method(&self, id: Uuid) -> Result<Option<ShippingMethod>> {
        let row = sqlx::query_as::<_, ShippingRow>("SELECT * FROM shipping_methods WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(ShippingMethod::from))
    }

    async fn checkout_session(&self, owner: &CheckoutOwner) -> Result<Option<CheckoutSession>> {
        let query = match owner {
            CheckoutOwner::User(id) => sqlx::query_as::<_, CheckoutRow>(&format!("SELECT {CHECKOUT_COLUMNS} FROM checkout_sessions WHERE user_id = $1"))
                .bind(*id).fetch_optional(&self.pool).await?,
            CheckoutOwner::Guest(token) => sqlx::query_as::<_, CheckoutRow>(&format!("SELECT {CHECKOUT_COLUMNS} FROM checkout_sessions WHERE guest_token = $1"))
                .bind(token).fetch_optional(&self.pool).await?,
        };
        query.map(CheckoutSession::try_from).transpose()
    }

    async fn create_checkout_session(&self, s: &CheckoutSession) -> Result<()> {
        let (user_id, guest_token) = match &s.owner {
            CheckoutOwner::User(id) => (Some(*id), None),
            CheckoutOwner::Guest(token) => (None, Some(token.clone())),
        };
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM checkout_sessions WHERE user_id = $1 OR guest_token = $2")
            .bind(user_id).bind(&guest_token).execute(&mut *tx).await?;
        sqlx::query(&format!(
            "INSERT INTO checkout_sessions ({CHECKOUT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)"
        ))
        .bind(s.id).bind(user_id).bind(&guest_token).bind(&s.session_key).bind(s.current_step.as_str())
        .bind(s.shipping_address_id).bind(s.billing_address_id).bind(&s.guest_email).bind(&s.guest_phone)
        .bind(s.guest_shipping_address.clone().map(Json)).bind(s.guest_billing_address.clone().map(Json))
        .bind(s.same_as_shipping).bind(s.shipping_method_id).bind(&s.promo_code).bind(&s.customer_note)
        .bind(s.payment_method.map(|m| m.as_str())).bind(s.created_at).bind(s.updated_at).bind(s.expires_at)
        .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_checkout_session(&self, s: &CheckoutSession) -> Result<()> {
        let done = sqlx::query(
            "UPDATE checkout_sessions SET session_key = $2, current_step = $3, shipping_address_id = $4, \
             billing_address_id = $5, guest_email = $6, guest_phone = $7, guest_shipping_address = $8, \
             guest_billing_address = $9, same_as_shipping = $10, shipping_method_id = $11, promo_code = $12, \
             customer_note = $13, payment_method = $14, updated_at = $15, expires_at = $16 WHERE id = $1",
        )
        .bind(s.id).bind(&s.session_key).bind(s.current_step.as_str())
        .bind(s.shipping_address_id).bind(s.billing_address_id).bind(&s.guest_email).bind(&s.guest_phone)
        .bind(s.guest_shipping_address.clone().map(Json)).bind(s.guest_billing_address.clone().map(Json))
        .bind(s.same_as_shipping).bind(s.shipping_method_id).bind(&s.promo_code).bind(&s.customer_note)
        .bind(s.payment_method.map(|m| m.as_str())).bind(s.updated_at).bind(s.expires_at)
        .execute(&self.pool).await?;
        if done.rows_affected() == 0 {
            return Err(EcommerceError::CheckoutConsumed);
        }
        Ok(())
    }

    async fn delete_checkout_session(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM checkout_sessions WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn place_order(&self, p: Placement<'_>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let consumed = sqlx::query("DELETE FROM checkout_sessions WHERE id = $1").bind(p.checkout_id).execute(&mut *tx).await?;
        if consumed.rows_affected() == 0 {
            return Err(EcommerceError::CheckoutConsumed);
        }

        let o = p.order;
        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
             $16, $17, $18, $19, $20, $21, $22, $23, $24, $25)"
        ))
        .bind(o.id).bind(o.order_number.as_str()).bind(o.user_id).bind(&o.customer_email).bind(o.status.as_str())
        .bind(o.payment_status.as_str()).bind(Json(&o.shipping_address)).bind(Json(&o.billing_address))
        .bind(&o.shipping_method_name).bind(o.shipping_cost).bind(&o.estimated_delivery).bind(o.subtotal)
        .bind(o.tax_amount).bind(o.discount_amount).bind(o.total).bind(&o.currency).bind(&o.guest_email)
        .bind(&o.guest_phone).bind(&o.promo_code).bind(&o.customer_note).bind(o.payment_method.map(|m| m.as_str()))
        .bind(&o.payment_transaction_id).bind(o.paid_at).bind(o.created_at).bind(o.updated_at)
        .execute(&mut *tx).await?;

        for item in p.items {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, variant_id, product_name, variant_name, sku, product_image, quantity, \
                 unit_price, total_price, is_digital, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            )
            .bind(item.id).bind(item.order_id).bind(item.variant_id).bind(&item.product_name).bind(&item.variant_name)
            .bind(&item.sku).bind(&item.product_image).bind(i32::try_from(item.quantity).unwrap_or(i32::MAX))
            .bind(item.unit_price).bind(item.total_price).bind(item.is_digital).bind(item.created_at)
            .execute(&mut *tx).await?;
        }

        insert_history(&mut tx, p.history).await?;
        insert_transaction(&mut tx, p.payment).await?;

        if let Some(user_id) = p.clear_cart_of {
            sqlx::query("DELETE FROM cart_items WHERE user_id = $1").bind(user_id).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn order_by_number(&self, order_number: &str) -> Result<Option<OrderRecord>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1"))
            .bind(order_number).fetch_optional(&self.pool).await?;
        Ok(row.map(OrderRecord::from))
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"))
            .bind(user_id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(OrderRecord::from).collect())
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, OrderItemRow>("SELECT * FROM order_items WHERE order_id = $1 ORDER BY created_at, product_name")
            .bind(order_id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(OrderItem::from).collect())
    }

    async fn status_history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>("SELECT * FROM order_status_history WHERE order_id = $1 ORDER BY created_at DESC")
            .bind(order_id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(StatusHistoryEntry::from).collect())
    }

    async fn create_transaction(&self, txn: &PaymentTransaction) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_transaction(&mut tx, txn).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn transaction(&self, transaction_id: &str) -> Result<Option<PaymentTransaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!("SELECT {TRANSACTION_COLUMNS} FROM payment_transactions WHERE transaction_id = $1"))
            .bind(transaction_id).fetch_optional(&self.pool).await?;
        Ok(row.map(PaymentTransaction::from))
    }

    async fn transactions_for_order(&self, order_id: Uuid) -> Result<Vec<PaymentTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions WHERE order_id = $1 ORDER BY created_at DESC"
        ))
        .bind(order_id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(PaymentTransaction::from).collect())
    }

    async fn settle_transaction(&self, transaction_id: &str, settlement: Settlement) -> Result<SettleOutcome> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions WHERE transaction_id = $1 FOR UPDATE"
        ))
        .bind(transaction_id).fetch_optional(&mut *tx).await? else {
            return Ok(SettleOutcome::NotFound);
        };
        let mut txn = PaymentTransaction::from(row);

        let Some(order_row) = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"))
            .bind(txn.order_id).fetch_optional(&mut *tx).await? else {
            return Ok(SettleOutcome::NotFound);
        };
        let record = OrderRecord::from(order_row);

        if let Err(PaymentError::AlreadySettled) = txn.settle(settlement) {
            return Ok(SettleOutcome::AlreadySettled { order_number: record.order_number.to_string() });
        }

        sqlx::query("UPDATE payment_transactions SET status = $2, provider_reference = $3, provider_response = $4, updated_at = $5 WHERE id = $1")
            .bind(txn.id).bind(txn.status.as_str()).bind(&txn.provider_reference).bind(&txn.provider_response).bind(txn.updated_at)
            .execute(&mut *tx).await?;

        let mut order = Order::from(record);
        let history = order.sync_payment(&txn);
        let o = order.record();
        sqlx::query(
            "UPDATE orders SET status = $2, payment_status = $3, payment_method = $4, payment_transaction_id = $5, \
             paid_at = $6, updated_at = $7 WHERE id = $1",
        )
        .bind(o.id).bind(o.status.as_str()).bind(o.payment_status.as_str()).bind(o.payment_method.map(|m| m.as_str()))
        .bind(&o.payment_transaction_id).bind(o.paid_at).bind(o.updated_at)
        .execute(&mut *tx).await?;
        for entry in &history {
            insert_history(&mut tx, entry).await?;
        }

        tx.commit().await?;
        Ok(SettleOutcome::Settled { order, transaction: txn })
    }

    async fn record_webhook(&self, e: &WebhookEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO webhook_events (id, provider, event_type, payload, processed, error_message, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(e.id).bind(&e.provider).bind(&e.event_type).bind(&e.payload).bind(e.processed).bind(&e.error_message).bind(e.created_at)
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn finish_webhook(&self, id: Uuid, error: Option<&str>) -> Result<()> {
        match error {
            None => sqlx::query("UPDATE webhook_events SET processed = TRUE WHERE id = $1").bind(id).execute(&self.pool).await?,
            Some(message) => sqlx::query("UPDATE webhook_events SET error_message = $2 WHERE id = $1")
                .bind(id).bind(message).execute(&self.pool).await?,
        };
        Ok(())
    }
}
