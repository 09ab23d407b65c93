use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use checkout_api::{
    config::AppConfig,
    db,
    entities::user,
    notifications::{EmailMessage, Mailer, MailerError, NotificationDispatcher},
    provider::{CheckoutSession, PaymentProvider, ProviderError, ProviderSubscription},
    services::reconciliation::ReconciliationService,
    AppState,
};

/// In-memory stand-in for the payment provider; sessions and subscriptions
/// are registered as raw JSON the way the wire would carry them.
#[derive(Default)]
pub struct MockProvider {
    sessions: Mutex<HashMap<String, Value>>,
    subscriptions: Mutex<HashMap<String, Value>>,
}

impl MockProvider {
    pub fn put_session(&self, id: &str, json: Value) {
        self.sessions.lock().unwrap().insert(id.to_string(), json);
    }

    pub fn put_subscription(&self, id: &str, json: Value) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(id.to_string(), json);
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, ProviderError> {
        let json = self
            .sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| {
                ProviderError::InvalidSession(format!("no such session: {session_id}"))
            })?;
        serde_json::from_value(json).map_err(|e| ProviderError::Unavailable(e.to_string()))
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, ProviderError> {
        let json = self
            .subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| {
                ProviderError::InvalidSession(format!("no such subscription: {subscription_id}"))
            })?;
        serde_json::from_value(json).map_err(|e| ProviderError::Unavailable(e.to_string()))
    }
}

/// Mailer that records every message and can be flipped into failure mode.
#[derive(Default)]
pub struct MockMailer {
    pub sent: Mutex<Vec<EmailMessage>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), MailerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailerError::Transport("injected failure".into()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Application harness backed by in-memory SQLite and mock collaborators.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub provider: Arc<MockProvider>,
    pub mailer: Arc<MockMailer>,
}

impl TestApp {
    pub async fn new() -> Self {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "sk_test_key".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );

        // Single connection so every query sees the same in-memory database
        let pool = db::establish_connection_with_config(&db::DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let provider = Arc::new(MockProvider::default());
        let mailer = Arc::new(MockMailer::default());

        let notifier =
            NotificationDispatcher::new(mailer.clone(), Some("ops@example.com".to_string()));
        let reconciliation = Arc::new(ReconciliationService::new(
            db_arc.clone(),
            provider.clone(),
            notifier,
        ));

        let state = AppState {
            db: db_arc,
            config: cfg,
            reconciliation,
        };

        let router = Router::new()
            .nest("/api/v1", checkout_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            provider,
            mailer,
        }
    }

    pub async fn seed_user(&self, email: &str, first_name: Option<&str>) -> user::Model {
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            first_name: Set(first_name.map(str::to_string)),
            subscribed: Set(false),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user")
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("response")
    }

    pub async fn confirm(&self, session_id: &str) -> Response {
        self.request(
            Method::GET,
            &format!("/api/v1/checkout/sessions/{session_id}/confirm"),
            None,
        )
        .await
    }

    pub fn sent_mail(&self) -> Vec<EmailMessage> {
        self.mailer.sent.lock().unwrap().clone()
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub async fn assert_status_json(response: Response, status: StatusCode) -> Value {
    assert_eq!(response.status(), status);
    response_json(response).await
}
