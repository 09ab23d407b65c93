use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::AppConfig;

use super::{CheckoutSession, PaymentProvider, ProviderError, ProviderSubscription};

/// Thin HTTP client for the Stripe REST API. Only the two read endpoints the
/// reconciliation pipeline needs are implemented.
#[derive(Clone)]
pub struct StripeGateway {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(cfg: &AppConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.provider_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("http client init: {e}")))?;

        Ok(Self {
            http,
            api_base: cfg.stripe_api_base.trim_end_matches('/').to_string(),
            secret_key: cfg.stripe_secret_key.clone(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.api_base, path);
        debug!(%url, "provider request");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.secret_key)
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ProviderError::Unavailable(format!("invalid provider payload: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "provider returned error");

        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            Err(ProviderError::InvalidSession(format!(
                "provider responded {status}: {body}"
            )))
        } else {
            Err(ProviderError::Unavailable(format!(
                "provider responded {status}"
            )))
        }
    }
}

#[async_trait]
impl PaymentProvider for StripeGateway {
    #[instrument(skip(self))]
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, ProviderError> {
        self.get_json(
            &format!("/v1/checkout/sessions/{session_id}"),
            &[
                ("expand[]", "customer"),
                ("expand[]", "line_items"),
                ("expand[]", "subscription"),
            ],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, ProviderError> {
        self.get_json(&format!("/v1/subscriptions/{subscription_id}"), &[])
            .await
    }
}
