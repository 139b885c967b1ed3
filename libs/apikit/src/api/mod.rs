//! Request-handling building blocks: contracts, controllers, middleware and errors.

pub mod controller;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod error_handler;
pub mod exchange;
pub mod middleware;
pub mod schema;

pub use controller::{controller, Controller};
pub use endpoint::{del, delete, endpoint, get, patch, post, put, EndpointContract, HandlerFn};
pub use envelope::{api_response, ApiEnvelope, Meta};
pub use error::{ApiError, ConfigurationError, ErrorKind, Failure, StorageError};
pub use error_handler::error_handler;
pub use exchange::{Exchange, RequestContext};
pub use middleware::{
    request_logger, ErrorMiddleware, Middleware, MiddlewareKind, RequestMiddleware, Scope,
};
pub use schema::{Schema, SchemaRef, Violation};
