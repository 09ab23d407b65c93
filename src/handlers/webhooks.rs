use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::{info, warn};

use crate::{
    errors::ServiceError,
    services::reconciliation::TriggerSource,
    AppState,
};

type HmacSha256 = Hmac<Sha256>;

/// Webhook trigger: the provider's asynchronous delivery for the same
/// checkout session the redirect confirmation may also report. Failures
/// surface as non-2xx so the provider retries; the idempotency guard makes
/// re-delivery safe.
// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    // Verify signature if configured
    if let Some(secret) = state.config.stripe_webhook_secret.clone() {
        let ok = verify_signature(
            &headers,
            &body,
            &secret,
            state.config.stripe_webhook_tolerance_secs,
        );
        if !ok {
            warn!("webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    let event: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::InvalidRequest(format!("invalid json: {e}")))?;

    let event_type = event.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match event_type {
        "checkout.session.completed" => {
            let session_id = event
                .pointer("/data/object/id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    ServiceError::InvalidRequest(
                        "event carries no checkout session id".to_string(),
                    )
                })?;

            state
                .reconciliation
                .reconcile(session_id, TriggerSource::Webhook)
                .await?;
        }
        _ => {
            info!(event_type, "unhandled webhook event type");
        }
    }

    Ok((StatusCode::OK, "ok"))
}

/// Stripe-Signature scheme: `t=<unix>,v1=<hex hmac>` over `"{t}.{payload}"`.
fn verify_signature(headers: &HeaderMap, payload: &Bytes, secret: &str, tolerance_secs: u64) -> bool {
    let Some(sig) = headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
    else {
        return false;
    };

    let mut ts = "";
    let mut v1 = "";
    for part in sig.split(',') {
        let mut it = part.trim().split('=');
        match (it.next(), it.next()) {
            (Some("t"), Some(val)) => ts = val,
            (Some("v1"), Some(val)) => v1 = val,
            _ => {}
        }
    }
    if ts.is_empty() || v1.is_empty() {
        return false;
    }

    if let Ok(ts_i) = ts.parse::<i64>() {
        let now = chrono::Utc::now().timestamp();
        if (now - ts_i).unsigned_abs() > tolerance_secs {
            return false;
        }
    } else {
        return false;
    }

    let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap_or(""));
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(signed.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, v1)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, ts: i64, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{ts}.{payload}").as_bytes());
        format!("t={ts},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn headers_with(sig: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Stripe-Signature", sig.parse().unwrap());
        headers
    }

    #[test]
    fn accepts_valid_signature() {
        let payload = r#"{"type":"checkout.session.completed"}"#;
        let ts = chrono::Utc::now().timestamp();
        let sig = sign("whsec_test", ts, payload);
        assert!(verify_signature(
            &headers_with(&sig),
            &Bytes::from(payload),
            "whsec_test",
            300
        ));
    }

    #[test]
    fn rejects_wrong_secret() {
        let payload = r#"{}"#;
        let ts = chrono::Utc::now().timestamp();
        let sig = sign("whsec_other", ts, payload);
        assert!(!verify_signature(
            &headers_with(&sig),
            &Bytes::from(payload),
            "whsec_test",
            300
        ));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let payload = r#"{}"#;
        let ts = chrono::Utc::now().timestamp() - 10_000;
        let sig = sign("whsec_test", ts, payload);
        assert!(!verify_signature(
            &headers_with(&sig),
            &Bytes::from(payload),
            "whsec_test",
            300
        ));
    }

    #[test]
    fn rejects_missing_header() {
        assert!(!verify_signature(
            &HeaderMap::new(),
            &Bytes::from_static(b"{}"),
            "whsec_test",
            300
        ));
    }

    #[test]
    fn constant_time_eq_basic() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }
}
