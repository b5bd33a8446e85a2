use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use uuid::Uuid;

use crate::store::StoreError;

/// Error codes for structured error responses
pub mod error_codes {
    pub const UNKNOWN_TOKEN: &str = "unknown_token";
    pub const INACTIVE_ENDPOINT: &str = "inactive_endpoint";
    pub const UNKNOWN_TENANT: &str = "unknown_tenant";
    pub const INVALID_PAYLOAD: &str = "invalid_payload";
    pub const UNSUPPORTED_EVENT: &str = "unsupported_event";
    pub const CONTACT_NOT_FOUND: &str = "contact_not_found";
    pub const LEAD_NOT_FOUND: &str = "lead_not_found";
    pub const STORE_ERROR: &str = "store_error";
}

/// Errors on the primary ingestion path.
///
/// Every variant aborts the request and maps to a response status the sender
/// can act on: 4xx means the event is bad and retrying won't help, 5xx means
/// we failed and the sender should retry. Secondary-effect failures never
/// become an `IngestError`; they are logged where they happen and the
/// request still succeeds.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Webhook secret does not resolve to any endpoint
    #[error("unknown webhook token")]
    UnknownToken,

    /// Endpoint or its tenant exists but has been deactivated
    #[error("webhook endpoint is inactive")]
    InactiveEndpoint,

    /// Tenant slug on the telephony surface does not resolve to an active tenant
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    /// Body is not a well-formed event envelope
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Recognized envelope with an `event_type` we do not handle
    #[error("unsupported event type: {0}")]
    UnsupportedEvent(String),

    /// Event references (or implies) a contact that does not exist
    #[error("contact not found")]
    ContactNotFound,

    /// Event references a lead id that does not exist for this tenant
    #[error("lead not found: {0}")]
    LeadNotFound(Uuid),

    /// Primary write failed; surfaced as retryable
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Get the error code for structured error responses
    pub fn error_code(&self) -> &'static str {
        match self {
            IngestError::UnknownToken => error_codes::UNKNOWN_TOKEN,
            IngestError::InactiveEndpoint => error_codes::INACTIVE_ENDPOINT,
            IngestError::UnknownTenant(_) => error_codes::UNKNOWN_TENANT,
            IngestError::InvalidPayload(_) => error_codes::INVALID_PAYLOAD,
            IngestError::UnsupportedEvent(_) => error_codes::UNSUPPORTED_EVENT,
            IngestError::ContactNotFound => error_codes::CONTACT_NOT_FOUND,
            IngestError::LeadNotFound(_) => error_codes::LEAD_NOT_FOUND,
            IngestError::Store(_) => error_codes::STORE_ERROR,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::UnknownToken | IngestError::UnknownTenant(_) => StatusCode::NOT_FOUND,
            IngestError::InactiveEndpoint => StatusCode::FORBIDDEN,
            IngestError::InvalidPayload(_) | IngestError::UnsupportedEvent(_) => {
                StatusCode::BAD_REQUEST
            }
            IngestError::ContactNotFound | IngestError::LeadNotFound(_) => StatusCode::NOT_FOUND,
            IngestError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Log the error at the appropriate level
    pub fn log(&self) {
        match self {
            // Warn level for sender mistakes: unauthenticated tokens and
            // malformed or unresolvable events
            IngestError::UnknownToken => {
                tracing::warn!("Rejected webhook: unknown token");
            }
            IngestError::InactiveEndpoint => {
                tracing::warn!("Rejected webhook: endpoint inactive");
            }
            IngestError::UnknownTenant(slug) => {
                tracing::warn!(tenant_slug = %slug, "Rejected webhook: unknown tenant");
            }
            IngestError::InvalidPayload(msg) => {
                tracing::warn!("Invalid payload: {}", msg);
            }
            IngestError::UnsupportedEvent(event_type) => {
                tracing::warn!(event_type = %event_type, "Unsupported event type");
            }
            IngestError::ContactNotFound => {
                tracing::warn!("Referenced contact not found");
            }
            IngestError::LeadNotFound(lead_id) => {
                tracing::warn!(lead_id = %lead_id, "Referenced lead not found");
            }
            // Error level for our own failures
            IngestError::Store(err) => {
                tracing::error!(error = %err, "Store error on primary write");
            }
        }
    }

    /// Message safe to return to the (unauthenticated) sender. Store
    /// internals stay in the logs.
    fn public_message(&self) -> String {
        match self {
            IngestError::Store(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.status_code();
        let body = Json(json!({
            "success": false,
            "error": self.public_message(),
            "code": self.error_code(),
        }));

        (status, body).into_response()
    }
}

// Result type alias for convenience
pub type IngestResult<T> = Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_client_errors() {
        assert_eq!(IngestError::UnknownToken.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            IngestError::InactiveEndpoint.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            IngestError::UnknownTenant("acme".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn store_errors_are_retryable() {
        let err = IngestError::Store(StoreError::Unavailable("pool closed".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_code(), error_codes::STORE_ERROR);
    }

    #[test]
    fn store_internals_are_not_echoed_to_sender() {
        let err = IngestError::Store(StoreError::Unavailable("password=hunter2".into()));
        assert_eq!(err.public_message(), "internal error");
    }

    #[test]
    fn validation_failures_are_bad_requests() {
        assert_eq!(
            IngestError::UnsupportedEvent("lead_deleted".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            IngestError::InvalidPayload("not json".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
