use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

/// Wire shape for every failed request.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "No user exists for customer email a@example.com",
    "details": null,
    "type": "user_not_found",
    "code": 404
}))]
pub struct ErrorResponse {
    /// Human-readable error description
    pub error: String,
    /// Additional context when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Machine-readable error class
    #[serde(rename = "type")]
    pub error_type: String,
    /// HTTP status code, duplicated in the body for failure-page rendering
    pub code: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Provider rejected session lookup: {0}")]
    UpstreamSession(String),

    #[error("Provider unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("No customer identity on session: {0}")]
    MissingIdentity(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Malformed subscription reference: {0}")]
    MalformedSubscriptionReference(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_)
            | Self::UpstreamSession(_)
            | Self::MissingIdentity(_)
            | Self::MalformedSubscriptionReference(_) => StatusCode::BAD_REQUEST,
            Self::UserNotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable class carried in the response body.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::UpstreamSession(_) => "upstream_session",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::MissingIdentity(_) => "missing_identity",
            Self::UserNotFound(_) => "user_not_found",
            Self::MalformedSubscriptionReference(_) => "malformed_subscription_reference",
            Self::Unauthorized(_) => "unauthorized",
            Self::DatabaseError(_) => "store_unavailable",
            Self::Internal(_) | Self::Other(_) => "internal",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database unavailable".to_string(),
            Self::Internal(_) | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let err = ErrorResponse {
            error: self.response_message(),
            details: None,
            error_type: self.error_type().to_string(),
            code: status.as_u16(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn status_code_mapping() {
        assert_eq!(
            ServiceError::InvalidRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::UpstreamSession("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::MissingIdentity("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::UserNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::MalformedSubscriptionReference("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::UpstreamUnavailable("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("x".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("connection refused".into()))
                .response_message(),
            "Database unavailable"
        );
        assert_eq!(
            ServiceError::Internal("stack trace".into()).response_message(),
            "Internal server error"
        );

        // User-facing errors keep the actual message
        assert_eq!(
            ServiceError::UserNotFound("no match for a@example.com".into()).response_message(),
            "User not found: no match for a@example.com"
        );
    }

    #[tokio::test]
    async fn response_body_carries_type_and_code() {
        let response = ServiceError::MissingIdentity("session has no email".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.error_type, "missing_identity");
        assert_eq!(payload.code, 400);
        assert!(payload.error.contains("session has no email"));
    }
}
