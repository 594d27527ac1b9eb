//! SSLCommerz client.
//!
//! Session initiation is a form-encoded POST to `/gwprocess/v4/api.php`;
//! validation is a GET to `/validator/api/validationserverAPI.php`. Both answer JSON.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::time::Duration;

use super::{GatewayError, PaymentGateway, PaymentRequest, Validation};
use crate::config::SslCommerzConfig;

const INIT_PATH: &str = "/gwprocess/v4/api.php";
const VALIDATION_PATH: &str = "/validator/api/validationserverAPI.php";

#[derive(Clone)]
pub struct SslCommerz {
    client: Client,
    config: SslCommerzConfig,
}

#[derive(Debug, Deserialize)]
struct InitResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    failedreason: Option<String>,
    #[serde(rename = "GatewayPageURL", default)]
    gateway_page_url: Option<String>,
}

impl SslCommerz {
    pub fn new(config: SslCommerzConfig) -> Self {
        let client = Client::builder().timeout(Duration::from_secs(30)).build().unwrap_or_default();
        Self { client, config }
    }

    /// Check if store credentials are set.
    pub fn is_configured(&self) -> bool {
        !self.config.store_id.is_empty() && !self.config.store_pass.expose_secret().is_empty()
    }

    fn url(&self, path: &str) -> String { format!("{}{}", self.config.api_base_url().trim_end_matches('/'), path) }

    fn init_form(&self, request: &PaymentRequest) -> Vec<(&'static str, String)> {
        let c = &request.customer;
        vec![
            ("store_id", self.config.store_id.clone()),
            ("store_passwd", self.config.store_pass.expose_secret().clone()),
            ("total_amount", format!("{:.2}", request.amount.amount())),
            ("currency", request.amount.currency().to_string()),
            ("tran_id", request.transaction_id.clone()),
            ("success_url", request.callbacks.success.clone()),
            ("fail_url", request.callbacks.fail.clone()),
            ("cancel_url", request.callbacks.cancel.clone()),
            ("ipn_url", request.callbacks.ipn.clone()),
            ("cus_name", c.name.clone()),
            ("cus_email", c.email.clone()),
            ("cus_add1", c.address.clone()),
            ("cus_city", c.city.clone()),
            ("cus_postcode", c.postcode.clone()),
            ("cus_country", c.country.clone()),
            ("cus_phone", c.phone.clone()),
            ("shipping_method", request.shipping_method.clone()),
            ("num_of_item", request.num_of_item.to_string()),
            ("product_name", format!("Order {}", request.order_number)),
            ("product_category", "General".to_string()),
            ("product_profile", "general".to_string()),
        ]
    }
}

#[async_trait]
impl PaymentGateway for SslCommerz {
    fn provider(&self) -> &'static str { "sslcommerz" }

    async fn initiate(&self, request: &PaymentRequest) -> Result<String, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let response = self.client.post(self.url(INIT_PATH)).form(&self.init_form(request)).send().await?.error_for_status()?;
        let body: InitResponse = response.json().await?;

        match body {
            InitResponse { status, gateway_page_url: Some(url), .. } if status == "SUCCESS" && !url.is_empty() => {
                tracing::info!(tran_id = %request.transaction_id, "SSLCommerz session opened");
                Ok(url)
            }
            InitResponse { failedreason, status, .. } => {
                let reason = failedreason.filter(|r| !r.is_empty()).unwrap_or_else(|| format!("status {}", status));
                tracing::error!(tran_id = %request.transaction_id, %reason, "SSLCommerz init rejected");
                Err(GatewayError::Rejected(reason))
            }
        }
    }

    async fn validate(&self, val_id: &str) -> Result<Validation, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }
        if val_id.is_empty() {
            return Err(GatewayError::InvalidResponse("missing val_id".to_string()));
        }

        let response = self
            .client
            .get(self.url(VALIDATION_PATH))
            .query(&[
                ("val_id", val_id),
                ("store_id", self.config.store_id.as_str()),
                ("store_passwd", self.config.store_pass.expose_secret().as_str()),
                ("format", "json"),
            ])
            .send()
            .await?
            .error_for_status()?;

        let raw: serde_json::Value = response.json().await?;
        if !raw.is_object() {
            return Err(GatewayError::InvalidResponse(raw.to_string()));
        }
        let validation = Validation::from_json(raw);
        tracing::debug!(val_id, status = %validation.status, "SSLCommerz validation answered");
        Ok(validation)
    }
}
