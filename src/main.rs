use std::{net::SocketAddr, sync::Arc};

use axum::Router;
use http::HeaderValue;
use tokio::signal;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use checkout_api as api;

use api::notifications::{HttpMailer, Mailer, NoopMailer, NotificationDispatcher};
use api::provider::{PaymentProvider, StripeGateway};
use api::services::reconciliation::ReconciliationService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        if let Err(e) = api::db::run_migrations(&db_pool).await {
            error!("migration run failed: {}", e);
            return Err(e.into());
        }
    }
    let db_arc = Arc::new(db_pool);

    // Payment provider gateway; the credential was validated at config load
    let provider: Arc<dyn PaymentProvider> = Arc::new(StripeGateway::new(&cfg)?);

    // Outbound mail: HTTP API when a key is configured, otherwise log-and-drop
    let mailer: Arc<dyn Mailer> = match cfg.mail_api_key.as_deref() {
        Some(key) => Arc::new(HttpMailer::new(&cfg.mail_api_base, key, &cfg.mail_from)),
        None => {
            info!("No mail API key configured; notification emails disabled");
            Arc::new(NoopMailer)
        }
    };
    let notifier = NotificationDispatcher::new(mailer, cfg.admin_email.clone());

    let reconciliation = Arc::new(ReconciliationService::new(
        db_arc.clone(),
        provider,
        notifier,
    ));

    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        reconciliation,
    };

    let cors_layer = match build_cors(&cfg) {
        Some(layer) => layer,
        None => {
            error!("no CORS origins configured; set APP__CORS_ALLOWED_ORIGINS");
            return Err("no CORS origins configured: set APP__CORS_ALLOWED_ORIGINS".into());
        }
    };

    let app = Router::new()
        .route("/", axum::routing::get(|| async { "checkout-api up" }))
        .merge(api::docs_routes())
        .nest("/api/v1", api::api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        .with_state(app_state);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("checkout-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Explicit origin list when configured; in development falls back to a
/// permissive layer. Returns None in production with no origins set.
fn build_cors(cfg: &api::config::AppConfig) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = cfg
        .cors_allowed_origins
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    if !origins.is_empty() {
        Some(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else if cfg.is_development() {
        info!("permissive CORS enabled (development environment)");
        Some(CorsLayer::permissive())
    } else {
        None
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};
        let mut sigterm = unix_signal(SignalKind::terminate()).expect("SIGTERM handler");
        tokio::select! {
            _ = signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
