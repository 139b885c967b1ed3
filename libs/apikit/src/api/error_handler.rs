//! Terminal error normalizer.
//!
//! Maps whatever failure reaches the end of a chain to the taxonomy, logs it by
//! severity and renders the failure envelope. Installed last among the global
//! AFTER stages by the server builder.

use async_trait::async_trait;
use axum::response::{IntoResponse, Response};

use crate::api::envelope::{ApiEnvelope, FailureResponse, APPLICATION_JSON};
use crate::api::error::{classify, ApiError, ErrorRecord, Failure};
use crate::api::exchange::Exchange;
use crate::api::middleware::{ErrorMiddleware, Middleware, Scope};

pub struct ErrorNormalizer;

fn log_failure(record: &ErrorRecord, failure: &Failure, ex: &Exchange) {
    let method = &ex.request.method;
    let path = ex.request.path();
    if record.status.is_server_error() {
        tracing::error!(
            %method,
            path,
            code = record.kind.code(),
            status = record.status.as_u16(),
            error = %failure,
            "FAIL {method} {path}"
        );
    } else {
        tracing::warn!(
            %method,
            path,
            code = record.kind.code(),
            status = record.status.as_u16(),
            message = %record.message,
            "FAIL {method} {path}"
        );
    }
}

/// Classifies `failure`, logs it and finalizes `ex` with the failure envelope.
pub fn render_failure(failure: Failure, ex: &mut Exchange) -> Result<(), Failure> {
    let record = classify(&failure);
    log_failure(&record, &failure, ex);
    ex.set_content_type(APPLICATION_JSON);
    ex.send_json(record.status, &ApiEnvelope::failure(&record))
}

#[async_trait]
impl ErrorMiddleware for ErrorNormalizer {
    async fn handle(&self, error: Failure, ex: &mut Exchange) -> Result<(), Failure> {
        render_failure(error, ex)
    }
}

/// The error normalizer as an AFTER-scoped error stage.
pub fn error_handler() -> Middleware {
    Middleware::error_stage(Scope::After, ErrorNormalizer).named("ErrorHandler")
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        FailureResponse(classify(&self)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        FailureResponse((&self).into()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::StorageError;
    use crate::api::exchange::RequestContext;
    use crate::api::middleware::run_chain;
    use http::{Method, StatusCode};
    use serde_json::{json, Value};

    async fn normalize(failure: Failure) -> (StatusCode, Value) {
        let mut ex = Exchange::new(RequestContext {
            method: Method::POST,
            uri: "/users".parse().unwrap(),
            ..Default::default()
        });
        let rest = run_chain(&[error_handler()], &mut ex, Some(failure)).await;
        assert!(rest.is_none());
        assert!(ex.is_finalized());

        let resp = ex.finish();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn taxonomy_error_keeps_status_and_code() {
        let (status, body) = normalize(ApiError::conflict("dup").into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["meta"]["error"]["code"], "ConflictError");
        assert_eq!(body["data"], json!({}));
    }

    #[tokio::test]
    async fn storage_uniqueness_violation_maps_to_conflict() {
        let failure = StorageError::UniqueViolation {
            constraint: "users_email_key".into(),
        };
        let (status, body) = normalize(failure.into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["meta"]["error"]["code"], "ConflictError");
        assert!(!body.to_string().contains("users_email_key"));
    }

    #[tokio::test]
    async fn unknown_failure_is_sanitized() {
        let (status, body) = normalize(Failure::msg("socket closed by peer 10.0.0.3")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["meta"]["error"]["code"], "InternalServerError");
        assert_eq!(body["meta"]["error"]["details"], json!({}));
        assert!(!body.to_string().contains("10.0.0.3"));
    }

    #[tokio::test]
    async fn validation_details_reach_the_client() {
        let err = ApiError::new(crate::api::error::ErrorKind::Validation, "bad")
            .with_details(json!([{"path": "query.name"}]));
        let (status, body) = normalize(err.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["meta"]["error"]["details"][0]["path"], "query.name");
    }

    #[test]
    fn failure_into_response_uses_envelope_status() {
        let resp = Failure::from(ApiError::too_many_requests()).into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
