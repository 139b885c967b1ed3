//! Error taxonomy shared by handlers, middleware and the error normalizer.
//!
//! Everything that travels through a request chain is a [`Failure`]. The
//! normalizer turns it into an [`ErrorRecord`] via [`classify`], which is the
//! only place that decides which HTTP status a failure gets.

use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::api::schema::Violation;

/// Kinds of request-time errors. The code string is part of the wire contract
/// (`meta.error.code`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    TooManyRequests,
    NotImplemented,
    InternalServer,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::BadRequest => "BadRequestError",
            ErrorKind::Unauthorized => "UnauthorizedError",
            ErrorKind::Forbidden => "ForbiddenError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Conflict => "ConflictError",
            ErrorKind::TooManyRequests => "TooManyRequestsError",
            ErrorKind::NotImplemented => "NotImplementedError",
            ErrorKind::InternalServer => "InternalServerError",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation | ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::NotImplemented | ErrorKind::InternalServer => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            ErrorKind::Validation => "Validation failed",
            ErrorKind::BadRequest => "Bad request",
            ErrorKind::Unauthorized => "Not authorized",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::NotFound => "Not found",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::TooManyRequests => "Too many requests",
            ErrorKind::NotImplemented => "Not implemented",
            ErrorKind::InternalServer => "Internal server error",
        }
    }
}

/// A taxonomy error: a known kind, its message and optional client-visible details.
#[derive(Debug, Clone, Error)]
#[error("{}: {message}", kind.code())]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Error of `kind` carrying its default message.
    pub fn of(kind: ErrorKind) -> Self {
        Self::new(kind, kind.default_message())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// `"<message>: <first violation message>"`, with every violation as details.
    pub fn validation(message: impl Into<String>, violations: Vec<Violation>) -> Self {
        let mut message = message.into();
        if let Some(first) = violations.first() {
            message = format!("{message}: {}", first.message);
        }
        let details = serde_json::to_value(&violations).unwrap_or(Value::Null);
        Self::new(ErrorKind::Validation, message).with_details(details)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    // Unauthorized and Forbidden never carry caller-supplied text or details.
    pub fn unauthorized() -> Self {
        Self::of(ErrorKind::Unauthorized)
    }

    pub fn forbidden() -> Self {
        Self::of(ErrorKind::Forbidden)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn too_many_requests() -> Self {
        Self::of(ErrorKind::TooManyRequests)
    }

    pub fn not_implemented() -> Self {
        Self::of(ErrorKind::NotImplemented)
    }

    pub fn internal() -> Self {
        Self::of(ErrorKind::InternalServer)
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

/// Failures raised by storage collaborators that the normalizer recognizes.
/// Anything not listed here is an unrecognized failure.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },
}

/// Invalid declarations, detected while building contracts or servers.
/// Never produced at request time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),
    #[error("invalid path template '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

/// What flows through a middleware chain when a stage fails.
#[derive(Debug, Error)]
pub enum Failure {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Failure {
    /// Wraps any error value as an unrecognized failure.
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Failure::Other(anyhow::Error::new(err))
    }

    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Failure::Other(anyhow::Error::msg(message))
    }
}

impl From<serde_json::Error> for Failure {
    fn from(err: serde_json::Error) -> Self {
        Failure::Other(err.into())
    }
}

/// Normalized view of a failure: taxonomy tag, status, message and details.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    #[serde(serialize_with = "serialize_status")]
    pub status: StatusCode,
    pub message: String,
    pub details: Option<Value>,
}

fn serialize_status<S: serde::Serializer>(status: &StatusCode, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u16(status.as_u16())
}

impl Serialize for ErrorKind {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.code())
    }
}

impl From<&ApiError> for ErrorRecord {
    fn from(err: &ApiError) -> Self {
        Self {
            kind: err.kind,
            status: err.kind.status(),
            message: err.message.clone(),
            details: match err.kind {
                ErrorKind::Unauthorized | ErrorKind::Forbidden => None,
                _ => err.details.clone(),
            },
        }
    }
}

fn storage_record(err: &StorageError) -> ErrorRecord {
    match err {
        StorageError::UniqueViolation { .. } => (&ApiError::of(ErrorKind::Conflict)).into(),
    }
}

/// Maps any failure to its taxonomy entry.
///
/// Taxonomy errors map verbatim, recognized storage failures map to a conflict, and
/// `anyhow` errors are searched along their source chain for either. Everything else
/// becomes an internal server error with the default message.
pub fn classify(failure: &Failure) -> ErrorRecord {
    match failure {
        Failure::Api(err) => err.into(),
        Failure::Storage(err) => storage_record(err),
        Failure::Other(err) => {
            for cause in err.chain() {
                if let Some(api) = cause.downcast_ref::<ApiError>() {
                    return api.into();
                }
                if let Some(storage) = cause.downcast_ref::<StorageError>() {
                    return storage_record(storage);
                }
            }
            (&ApiError::internal()).into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use serde_json::json;

    #[test]
    fn taxonomy_statuses() {
        let cases = [
            (ErrorKind::Validation, 400),
            (ErrorKind::BadRequest, 400),
            (ErrorKind::Unauthorized, 401),
            (ErrorKind::Forbidden, 403),
            (ErrorKind::NotFound, 404),
            (ErrorKind::Conflict, 409),
            (ErrorKind::TooManyRequests, 429),
            (ErrorKind::NotImplemented, 500),
            (ErrorKind::InternalServer, 500),
        ];
        for (kind, status) in cases {
            assert_eq!(kind.status().as_u16(), status, "{}", kind.code());
        }
    }

    #[test]
    fn validation_message_uses_first_violation() {
        let err = ApiError::validation(
            "Input validation failed",
            vec![
                Violation::new("query.name", "length", "name too short"),
                Violation::new("query.age", "range", "age out of range"),
            ],
        );
        assert_eq!(err.message, "Input validation failed: name too short");
        assert_eq!(err.details.as_ref().unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn classify_taxonomy_verbatim() {
        let record = classify(&ApiError::conflict("dup").into());
        assert_eq!(record.kind, ErrorKind::Conflict);
        assert_eq!(record.status, StatusCode::CONFLICT);
        assert_eq!(record.message, "dup");
        assert_eq!(record.details, None);
    }

    #[test]
    fn classify_drops_details_of_auth_errors() {
        let record = classify(&ApiError::unauthorized().with_details(json!({"user": 1})).into());
        assert_eq!(record.status, StatusCode::UNAUTHORIZED);
        assert!(record.details.is_none());

        let record = classify(&ApiError::forbidden().with_details(json!(["admin"])).into());
        assert!(record.details.is_none());

        let record = classify(&ApiError::conflict("dup").with_details(json!({"id": 1})).into());
        assert_eq!(record.details, Some(json!({"id": 1})));
    }

    #[test]
    fn classify_unique_violation_as_conflict() {
        let failure: Failure = StorageError::UniqueViolation {
            constraint: "users_email_key".into(),
        }
        .into();
        let record = classify(&failure);
        assert_eq!(record.kind, ErrorKind::Conflict);
        assert_eq!(record.message, "Conflict");
    }

    #[test]
    fn classify_searches_anyhow_chain() {
        let wrapped: anyhow::Result<()> = Err(ApiError::not_found("no such user"))
            .context("loading profile");
        let record = classify(&Failure::Other(wrapped.unwrap_err()));
        assert_eq!(record.kind, ErrorKind::NotFound);
        assert_eq!(record.message, "no such user");

        let storage: anyhow::Result<()> = Err(StorageError::UniqueViolation {
            constraint: "pk".into(),
        })
        .context("insert");
        assert_eq!(
            classify(&Failure::Other(storage.unwrap_err())).kind,
            ErrorKind::Conflict
        );
    }

    #[test]
    fn classify_unknown_hides_message() {
        let record = classify(&Failure::msg("database password is hunter2"));
        assert_eq!(record.kind, ErrorKind::InternalServer);
        assert_eq!(record.message, "Internal server error");
        assert!(!serde_json::to_string(&record).unwrap().contains("hunter2"));
    }

    #[test]
    fn record_serializes_code_and_status() {
        let record = classify(&ApiError::bad_request("nope").with_details(json!({"a": 1})).into());
        let v = serde_json::to_value(&record).unwrap();
        assert_eq!(v["kind"], "BadRequestError");
        assert_eq!(v["status"], 400);
        assert_eq!(v["details"]["a"], 1);
    }
}
