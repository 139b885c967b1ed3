//! The response envelope every endpoint and error answers with.

use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use http::{header, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::error::ErrorRecord;

pub const APPLICATION_JSON: &str = "application/json";

/// Standard response wrapper: `{meta: {serverTime, error?}, data}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiEnvelope<T = Value> {
    pub meta: Meta,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    /// ISO-8601 timestamp taken when the envelope is built.
    pub server_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Extra meta keys supplied by the caller, flattened next to `serverTime`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Client-visible part of a failure. The message stays server-side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub code: String,
    pub details: Value,
}

pub fn server_time() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Meta {
    fn now() -> Self {
        Self {
            server_time: server_time(),
            error: None,
            extra: Map::new(),
        }
    }
}

impl<T> ApiEnvelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            meta: Meta::now(),
            data,
        }
    }

    /// Adds an extra meta key. `serverTime` and `error` cannot be replaced this way.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "serverTime" && key != "error" {
            self.meta.extra.insert(key, value.into());
        }
        self
    }
}

impl ApiEnvelope<Value> {
    /// Failure envelope: `data` is `{}` and `details` defaults to `{}`.
    pub fn failure(record: &ErrorRecord) -> Self {
        let mut envelope = Self::new(Value::Object(Map::new()));
        envelope.meta.error = Some(ErrorBody {
            code: record.kind.code().to_string(),
            details: record
                .details
                .clone()
                .unwrap_or_else(|| Value::Object(Map::new())),
        });
        envelope
    }
}

/// Wraps handler output in the envelope. Handlers whose output schema is
/// [`api_output`](crate::api::schema::api_output) return this.
pub fn api_response<T>(data: T) -> ApiEnvelope<T> {
    ApiEnvelope::new(data)
}

/// Axum response wrapper rendering a failure envelope with the record's status.
#[derive(Debug, Clone)]
pub struct FailureResponse(pub ErrorRecord);

impl IntoResponse for FailureResponse {
    fn into_response(self) -> Response {
        let status = self.0.status;
        let mut resp = axum::Json(ApiEnvelope::failure(&self.0)).into_response();
        *resp.status_mut() = status;
        resp.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(APPLICATION_JSON),
        );
        resp
    }
}

impl<T: Serialize> IntoResponse for ApiEnvelope<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, axum::Json(self)).into_response()
    }
}
