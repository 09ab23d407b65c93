use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::ServiceError;

pub mod stripe;

pub use stripe::StripeGateway;

/// Errors from the payment provider boundary.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Malformed or unknown identifier; not retryable
    #[error("provider rejected the request: {0}")]
    InvalidSession(String),
    /// Transport failure or provider-side fault; retryable by the caller
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl From<ProviderError> for ServiceError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidSession(msg) => ServiceError::UpstreamSession(msg),
            ProviderError::Unavailable(msg) => ServiceError::UpstreamUnavailable(msg),
        }
    }
}

/// Read-only access to the provider's checkout state. The session is the
/// provider's ground truth at fetch time; nothing here has side effects.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, ProviderError>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, ProviderError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutMode {
    Payment,
    Subscription,
}

/// A checkout session as reported by the provider, with customer, line items
/// and subscription sub-objects expanded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub mode: CheckoutMode,
    pub payment_status: String,
    #[serde(default)]
    pub customer: Option<ProviderCustomer>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub line_items: Option<LineItemList>,
    #[serde(default)]
    pub subscription: Option<SubscriptionRef>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderCustomer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineItemList {
    #[serde(default)]
    pub data: Vec<LineItem>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub price: Option<Price>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Price {
    pub id: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub unit_amount: Option<i64>,
    #[serde(default)]
    pub recurring: Option<Recurring>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Recurring {
    pub interval: String,
}

/// The provider sends the subscription either as a bare identifier or as an
/// expanded object depending on request expansion. Normalized in one place
/// via [`CheckoutSession::subscription_id`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubscriptionRef {
    Id(String),
    Object(SubscriptionStub),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriptionStub {
    pub id: String,
}

/// Full subscription detail, fetched when provisioning mode=subscription.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    /// Unix seconds for the end of the current billing period
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub items: Option<SubscriptionItemList>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriptionItemList {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriptionItem {
    #[serde(default)]
    pub price: Option<Price>,
}

impl CheckoutSession {
    /// Customer email, preferring the expanded customer object over
    /// session-level customer details.
    pub fn customer_email(&self) -> Option<&str> {
        self.customer
            .as_ref()
            .and_then(|c| c.email.as_deref())
            .or_else(|| {
                self.customer_details
                    .as_ref()
                    .and_then(|d| d.email.as_deref())
            })
            .filter(|e| !e.trim().is_empty())
    }

    /// Customer display name with the same preference order as the email.
    pub fn customer_name(&self) -> Option<&str> {
        self.customer
            .as_ref()
            .and_then(|c| c.name.as_deref())
            .or_else(|| {
                self.customer_details
                    .as_ref()
                    .and_then(|d| d.name.as_deref())
            })
            .filter(|n| !n.trim().is_empty())
    }

    /// Normalized subscription identifier, whatever shape the provider used.
    pub fn subscription_id(&self) -> Option<&str> {
        match self.subscription.as_ref()? {
            SubscriptionRef::Id(id) => Some(id.as_str()),
            SubscriptionRef::Object(obj) => Some(obj.id.as_str()),
        }
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }
}

impl ProviderSubscription {
    /// First subscription item's price, which carries nickname and amount.
    pub fn price(&self) -> Option<&Price> {
        self.items.as_ref()?.data.first()?.price.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_ref_accepts_bare_id() {
        let session: CheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_1",
            "mode": "subscription",
            "payment_status": "paid",
            "subscription": "sub_123"
        }))
        .unwrap();
        assert_eq!(session.subscription_id(), Some("sub_123"));
    }

    #[test]
    fn subscription_ref_accepts_expanded_object() {
        let session: CheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_1",
            "mode": "subscription",
            "payment_status": "paid",
            "subscription": {"id": "sub_456", "status": "active"}
        }))
        .unwrap();
        assert_eq!(session.subscription_id(), Some("sub_456"));
    }

    #[test]
    fn subscription_ref_absent_yields_none() {
        let session: CheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_1",
            "mode": "subscription",
            "payment_status": "paid"
        }))
        .unwrap();
        assert_eq!(session.subscription_id(), None);
    }

    #[test]
    fn email_prefers_expanded_customer() {
        let session: CheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_1",
            "mode": "payment",
            "payment_status": "paid",
            "customer": {"id": "cus_1", "email": "expanded@example.com"},
            "customer_details": {"email": "details@example.com"}
        }))
        .unwrap();
        assert_eq!(session.customer_email(), Some("expanded@example.com"));
    }

    #[test]
    fn email_falls_back_to_customer_details() {
        let session: CheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_1",
            "mode": "payment",
            "payment_status": "paid",
            "customer": {"id": "cus_1"},
            "customer_details": {"email": "details@example.com", "name": "Dana"}
        }))
        .unwrap();
        assert_eq!(session.customer_email(), Some("details@example.com"));
        assert_eq!(session.customer_name(), Some("Dana"));
    }
}
