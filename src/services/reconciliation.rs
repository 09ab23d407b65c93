use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, ModelTrait,
    QueryFilter, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{
        order::{self, OrderStatus, PaymentStatus},
        order_item, subscription,
        subscription::SUBSCRIPTION_KIND,
        user, OrderItem,
    },
    errors::ServiceError,
    notifications::NotificationDispatcher,
    provider::{CheckoutMode, CheckoutSession, PaymentProvider},
    services::{formatting, plans},
};

/// Which of the two unordered triggers invoked reconciliation. Both run the
/// same pipeline; the value is only echoed in the response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerSource {
    Webhook,
    Redirect,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Webhook => "webhook",
            TriggerSource::Redirect => "redirect",
        }
    }
}

/// The pipeline's only externally visible contract.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConfirmationResponse {
    pub status: String,
    pub customer_name: String,
    pub customer_email: String,
    pub amount_total_formatted: String,
    pub payment_status: String,
    pub mode: String,
    pub source: String,
    pub processed: bool,
}

/// Outcome of the transactional phase.
enum Provisioned {
    Order {
        order: order::Model,
        items: Vec<order_item::Model>,
        created: bool,
    },
    Subscription {
        sub: subscription::Model,
        created: bool,
    },
}

/// Reconciles a completed checkout session into exactly one order or
/// subscription record. Safe to invoke any number of times, concurrently,
/// for the same session: the store's unique indexes arbitrate the race and
/// losers degrade to a read of the winner's record.
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    provider: Arc<dyn PaymentProvider>,
    notifier: NotificationDispatcher,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        provider: Arc<dyn PaymentProvider>,
        notifier: NotificationDispatcher,
    ) -> Self {
        Self {
            db,
            provider,
            notifier,
        }
    }

    #[instrument(skip(self), fields(source = source.as_str()))]
    pub async fn reconcile(
        &self,
        session_id: &str,
        source: TriggerSource,
    ) -> Result<ConfirmationResponse, ServiceError> {
        if session_id.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "session id must not be empty".to_string(),
            ));
        }

        // Critical path: any failure from here to the end of provisioning
        // aborts the request with nothing partial persisted.
        let session = self.provider.retrieve_checkout_session(session_id).await?;

        let email = session
            .customer_email()
            .ok_or_else(|| {
                ServiceError::MissingIdentity(format!(
                    "checkout session {} carries no customer email",
                    session.id
                ))
            })?
            .to_string();

        let user = user::Entity::find()
            .filter(user::Column::Email.eq(email.as_str()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::UserNotFound(format!("no user exists for customer email {email}"))
            })?;

        let provisioned = match session.mode {
            CheckoutMode::Payment => self.provision_order(&session, &user).await?,
            CheckoutMode::Subscription => self.provision_subscription(&session, &user).await?,
        };

        // Notification phase: best-effort, only for freshly created records.
        let name = formatting::display_name(session.customer_name(), user.first_name.as_deref());
        match &provisioned {
            Provisioned::Order {
                order,
                items,
                created: true,
            } => {
                self.notifier
                    .order_confirmed(&email, &name, order, items)
                    .await
            }
            Provisioned::Subscription { sub, created: true } => {
                self.notifier
                    .subscription_confirmed(&email, &name, sub)
                    .await
            }
            _ => debug!("record already provisioned; skipping notifications"),
        }

        Ok(ConfirmationResponse {
            status: "complete".to_string(),
            customer_name: name,
            customer_email: email,
            amount_total_formatted: formatting::format_minor_amount(
                session.amount_total.unwrap_or(0),
                session.currency.as_deref().unwrap_or("usd"),
            ),
            payment_status: session.payment_status.clone(),
            mode: match session.mode {
                CheckoutMode::Payment => "payment".to_string(),
                CheckoutMode::Subscription => "subscription".to_string(),
            },
            source: source.as_str().to_string(),
            processed: true,
        })
    }

    async fn find_order(&self, session_id: &str) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::StripeSessionId.eq(session_id))
            .one(&*self.db)
            .await?)
    }

    async fn find_subscription(
        &self,
        user_id: Uuid,
        stripe_sub_id: &str,
    ) -> Result<Option<subscription::Model>, ServiceError> {
        Ok(subscription::Entity::find()
            .filter(subscription::Column::UserId.eq(user_id))
            .filter(subscription::Column::StripeSubId.eq(stripe_sub_id))
            .one(&*self.db)
            .await?)
    }

    async fn order_with_items(
        &self,
        order: order::Model,
        created: bool,
    ) -> Result<Provisioned, ServiceError> {
        let items = order.find_related(OrderItem).all(&*self.db).await?;
        Ok(Provisioned::Order {
            order,
            items,
            created,
        })
    }

    #[instrument(skip_all, fields(session_id = %session.id, user_id = %user.id))]
    async fn provision_order(
        &self,
        session: &CheckoutSession,
        user: &user::Model,
    ) -> Result<Provisioned, ServiceError> {
        // Idempotency guard: the expected hit whenever the webhook already ran
        if let Some(existing) = self.find_order(&session.id).await? {
            info!(order_id = %existing.id, "order already provisioned for session");
            return self.order_with_items(existing, false).await;
        }

        let item_inputs = derive_items(session);
        let total_amount: Decimal = item_inputs
            .iter()
            .map(|item| item.price * Decimal::from(item.quantity))
            .sum();

        let payment_status = if session.is_paid() {
            PaymentStatus::Completed
        } else {
            PaymentStatus::Failed
        };

        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let txn = self.db.begin().await?;

        let inserted = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user.id),
            status: Set(OrderStatus::Pending),
            payment_status: Set(payment_status),
            total_amount: Set(total_amount),
            currency: Set(session
                .currency
                .clone()
                .unwrap_or_else(|| "usd".to_string())),
            stripe_session_id: Set(session.id.clone()),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await;

        let order = match inserted {
            Ok(order) => order,
            Err(err) if is_unique_violation(&err) => {
                // Lost the race against the other trigger; the dropped
                // transaction rolls back and the winner's record is returned.
                drop(txn);
                info!("concurrent provisioning detected; reusing existing order");
                let existing = self.find_order(&session.id).await?.ok_or_else(|| {
                    ServiceError::Internal(
                        "unique violation on order insert but no order found on re-query"
                            .to_string(),
                    )
                })?;
                return self.order_with_items(existing, false).await;
            }
            Err(err) => return Err(err.into()),
        };

        let mut items = Vec::with_capacity(item_inputs.len());
        for input in item_inputs {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                name: Set(input.name),
                quantity: Set(input.quantity),
                price: Set(input.price),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        txn.commit().await?;

        info!(
            order_id = %order.id,
            total_amount = %order.total_amount,
            payment_status = ?order.payment_status,
            "order provisioned"
        );

        Ok(Provisioned::Order {
            order,
            items,
            created: true,
        })
    }

    #[instrument(skip_all, fields(session_id = %session.id, user_id = %user.id))]
    async fn provision_subscription(
        &self,
        session: &CheckoutSession,
        user: &user::Model,
    ) -> Result<Provisioned, ServiceError> {
        let stripe_sub_id = session
            .subscription_id()
            .ok_or_else(|| {
                ServiceError::MalformedSubscriptionReference(format!(
                    "session {} carries no usable subscription reference",
                    session.id
                ))
            })?
            .to_string();

        if let Some(existing) = self.find_subscription(user.id, &stripe_sub_id).await? {
            info!(subscription_id = %existing.id, "subscription already provisioned");
            return Ok(Provisioned::Subscription {
                sub: existing,
                created: false,
            });
        }

        let detail = self.provider.retrieve_subscription(&stripe_sub_id).await?;
        let price = detail.price();
        let plan = plans::classify(
            price.and_then(|p| p.nickname.as_deref()),
            price.map(|p| p.id.as_str()).unwrap_or(""),
            price.and_then(|p| p.unit_amount),
        );
        let expires_at = detail
            .current_period_end
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

        let now = Utc::now();
        let inserted = subscription::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.id),
            kind: Set(SUBSCRIPTION_KIND.to_string()),
            plan: Set(plan),
            is_active: Set(true),
            started_at: Set(now),
            expires_at: Set(expires_at),
            stripe_sub_id: Set(stripe_sub_id.clone()),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await;

        let sub = match inserted {
            Ok(sub) => sub,
            Err(err) if is_unique_violation(&err) => {
                info!("concurrent provisioning detected; reusing existing subscription");
                let existing = self
                    .find_subscription(user.id, &stripe_sub_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::Internal(
                            "unique violation on subscription insert but none found on re-query"
                                .to_string(),
                        )
                    })?;
                return Ok(Provisioned::Subscription {
                    sub: existing,
                    created: false,
                });
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            subscription_id = %sub.id,
            plan = sub.plan.as_str(),
            "subscription provisioned"
        );

        // Best-effort projection: the subscription row is the source of truth,
        // so a failure here is logged and swallowed.
        let mut flag: user::ActiveModel = user.clone().into();
        flag.subscribed = Set(true);
        flag.updated_at = Set(Some(now));
        if let Err(err) = flag.update(&*self.db).await {
            warn!(error = %err, "failed to set user subscribed flag; continuing");
        }

        Ok(Provisioned::Subscription { sub, created: true })
    }
}

struct ItemInput {
    name: String,
    quantity: i32,
    price: Decimal,
}

/// Maps provider line items to order items; prices convert from minor to
/// major units.
fn derive_items(session: &CheckoutSession) -> Vec<ItemInput> {
    session
        .line_items
        .as_ref()
        .map(|list| {
            list.data
                .iter()
                .map(|line| ItemInput {
                    name: line
                        .description
                        .clone()
                        .unwrap_or_else(|| "Item".to_string()),
                    quantity: line
                        .quantity
                        .and_then(|q| i32::try_from(q).ok())
                        .unwrap_or(1),
                    price: Decimal::new(
                        line.price.as_ref().and_then(|p| p.unit_amount).unwrap_or(0),
                        2,
                    ),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn session_with_items(items: serde_json::Value) -> CheckoutSession {
        serde_json::from_value(serde_json::json!({
            "id": "cs_1",
            "mode": "payment",
            "payment_status": "paid",
            "line_items": {"data": items}
        }))
        .unwrap()
    }

    #[test]
    fn total_is_sum_of_price_times_quantity() {
        let session = session_with_items(serde_json::json!([
            {"description": "A", "quantity": 2, "price": {"id": "p1", "unit_amount": 1000}},
            {"description": "B", "quantity": 1, "price": {"id": "p2", "unit_amount": 550}}
        ]));

        let items = derive_items(&session);
        let total: Decimal = items
            .iter()
            .map(|i| i.price * Decimal::from(i.quantity))
            .sum();
        assert_eq!(total, dec!(25.50));
    }

    #[test]
    fn missing_line_item_fields_get_defaults() {
        let session = session_with_items(serde_json::json!([{}]));
        let items = derive_items(&session);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Item");
        assert_eq!(items[0].quantity, 1);
        assert_eq!(items[0].price, dec!(0.00));
    }

    #[test]
    fn out_of_range_quantity_falls_back_to_one() {
        let session = session_with_items(serde_json::json!([
            {"description": "A", "quantity": 9_999_999_999i64,
             "price": {"id": "p1", "unit_amount": 100}},
            {"description": "B", "quantity": -3,
             "price": {"id": "p2", "unit_amount": 100}}
        ]));
        let items = derive_items(&session);
        assert_eq!(items[0].quantity, 1);
        assert_eq!(items[1].quantity, -3);
    }

    #[test]
    fn trigger_source_labels() {
        assert_eq!(TriggerSource::Webhook.as_str(), "webhook");
        assert_eq!(TriggerSource::Redirect.as_str(), "redirect");
    }
}
