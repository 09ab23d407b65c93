use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::entities::{order, order_item, subscription};

/// A rendered outbound email.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("mail transport error: {0}")]
    Transport(String),
    #[error("mail API rejected message: {0}")]
    Rejected(String),
}

/// Outbound email delivery. At-least-once semantics are acceptable; callers
/// must treat failures as non-fatal.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), MailerError>;
}

/// Mailer backed by an HTTP email API (Resend-compatible `POST /emails`).
#[derive(Clone)]
pub struct HttpMailer {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(api_base: &str, api_key: &str, from: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), MailerError> {
        let response = self
            .http
            .post(format!("{}/emails", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": [message.to],
                "subject": message.subject,
                "html": message.html,
            }))
            .send()
            .await
            .map_err(|e| MailerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailerError::Rejected(format!("{status}: {body}")));
        }
        Ok(())
    }
}

/// Mailer used when no email API key is configured: logs and drops.
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), MailerError> {
        debug!(to = %message.to, subject = %message.subject, "mail delivery disabled; dropping message");
        Ok(())
    }
}

/// Best-effort notification phase of the reconciliation pipeline. Every send
/// is individually caught and logged; a messaging fault must never undo or
/// block a confirmed payment.
pub struct NotificationDispatcher {
    mailer: Arc<dyn Mailer>,
    admin_email: Option<String>,
}

impl NotificationDispatcher {
    pub fn new(mailer: Arc<dyn Mailer>, admin_email: Option<String>) -> Self {
        Self {
            mailer,
            admin_email,
        }
    }

    async fn send_isolated(&self, kind: &str, message: EmailMessage) {
        match self.mailer.send(message).await {
            Ok(()) => info!(kind, "notification sent"),
            Err(err) => warn!(kind, error = %err, "notification failed; continuing"),
        }
    }

    #[instrument(skip_all, fields(order_id = %order.id))]
    pub async fn order_confirmed(
        &self,
        customer_email: &str,
        customer_name: &str,
        order: &order::Model,
        items: &[order_item::Model],
    ) {
        self.send_isolated(
            "order_confirmation",
            order_confirmation_email(customer_email, customer_name, order, items),
        )
        .await;

        if let Some(admin) = &self.admin_email {
            self.send_isolated(
                "admin_order_notification",
                admin_order_email(admin, customer_email, order, items),
            )
            .await;
        }
    }

    #[instrument(skip_all, fields(subscription_id = %sub.id))]
    pub async fn subscription_confirmed(
        &self,
        customer_email: &str,
        customer_name: &str,
        sub: &subscription::Model,
    ) {
        self.send_isolated(
            "subscription_confirmation",
            subscription_confirmation_email(customer_email, customer_name, sub),
        )
        .await;
    }
}

fn order_confirmation_email(
    to: &str,
    name: &str,
    order: &order::Model,
    items: &[order_item::Model],
) -> EmailMessage {
    let rows: String = items
        .iter()
        .map(|item| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{} {}</td></tr>",
                item.name,
                item.quantity,
                item.price,
                order.currency.to_uppercase()
            )
        })
        .collect();

    EmailMessage {
        to: to.to_string(),
        subject: "Your order is confirmed".to_string(),
        html: format!(
            "<p>Hi {name},</p>\
             <p>Thanks for your purchase. Your order <strong>{}</strong> has been received.</p>\
             <table><tr><th>Item</th><th>Qty</th><th>Price</th></tr>{rows}</table>\
             <p>Total: {} {}</p>",
            order.id,
            order.total_amount,
            order.currency.to_uppercase()
        ),
    }
}

fn admin_order_email(
    to: &str,
    customer_email: &str,
    order: &order::Model,
    items: &[order_item::Model],
) -> EmailMessage {
    let lines: String = items
        .iter()
        .map(|item| format!("<li>{} x{} @ {}</li>", item.name, item.quantity, item.price))
        .collect();

    EmailMessage {
        to: to.to_string(),
        subject: format!("New order {}", order.id),
        html: format!(
            "<p>Order <strong>{}</strong> from {customer_email}.</p>\
             <ul>{lines}</ul>\
             <p>Total: {} {} ({:?})</p>",
            order.id,
            order.total_amount,
            order.currency.to_uppercase(),
            order.payment_status
        ),
    }
}

fn subscription_confirmation_email(
    to: &str,
    name: &str,
    sub: &subscription::Model,
) -> EmailMessage {
    let expiry = sub
        .expires_at
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "your next billing date".to_string());

    EmailMessage {
        to: to.to_string(),
        subject: "Your subscription is active".to_string(),
        html: format!(
            "<p>Hi {name},</p>\
             <p>Your <strong>{}</strong> plan is now active and renews on {expiry}.</p>",
            sub.plan.as_str()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use crate::entities::order::{OrderStatus, PaymentStatus};
    use crate::entities::subscription::PlanTier;

    fn sample_order() -> order::Model {
        order::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Completed,
            total_amount: dec!(25.50),
            currency: "usd".into(),
            stripe_session_id: "cs_test".into(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn order_email_lists_items_and_total() {
        let order = sample_order();
        let items = vec![order_item::Model {
            id: Uuid::new_v4(),
            order_id: order.id,
            name: "Scout Report".into(),
            quantity: 2,
            price: dec!(10.00),
            created_at: Utc::now(),
        }];

        let email = order_confirmation_email("a@example.com", "Alex", &order, &items);
        assert_eq!(email.to, "a@example.com");
        assert!(email.html.contains("Scout Report"));
        assert!(email.html.contains("25.50"));
    }

    #[test]
    fn subscription_email_names_the_plan() {
        let sub = subscription::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind: crate::entities::subscription::SUBSCRIPTION_KIND.into(),
            plan: PlanTier::Premium,
            is_active: true,
            started_at: Utc::now(),
            expires_at: None,
            stripe_sub_id: "sub_1".into(),
            created_at: Utc::now(),
            updated_at: None,
        };

        let email = subscription_confirmation_email("a@example.com", "Alex", &sub);
        assert!(email.html.contains("premium"));
        assert!(email.html.contains("next billing date"));
    }

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, _message: EmailMessage) -> Result<(), MailerError> {
            Err(MailerError::Transport("smtp down".into()))
        }
    }

    #[tokio::test]
    async fn dispatcher_swallows_mailer_failures() {
        let dispatcher =
            NotificationDispatcher::new(Arc::new(FailingMailer), Some("ops@example.com".into()));
        // Must not panic or propagate
        dispatcher
            .order_confirmed("a@example.com", "Alex", &sample_order(), &[])
            .await;
    }
}
