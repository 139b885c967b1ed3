//! # apikit
//!
//! Typed request handling on top of axum.
//!
//! Endpoints declare an input schema, an output schema and a handler. Controllers
//! group endpoints under a name and carry their own middleware. The server binds
//! everything onto a router where each request runs
//!
//! ```text
//! global BEFORE → controller BEFORE → endpoint BEFORE → validated handler
//!   → endpoint AFTER → controller AFTER → global AFTER → error normalizer
//! ```
//!
//! and synthesizes an OpenAPI document from the same declarations.
//!
//! ```rust,ignore
//! use apikit::{api_response, controller, get, schema, Server};
//!
//! let hello = get("/hello", Some("sayHello"))?
//!     .with_output(schema::api_output(schema::of::<String>()))
//!     .with_handler(|_: serde_json::Value, _| async {
//!         Ok::<_, apikit::Failure>(api_response("Hello!"))
//!     });
//! let server = Server::builder(cfg.server, cfg.docs)
//!     .controller(controller("Greeting").with_endpoint(hello))
//!     .build()?;
//! ```

pub use async_trait::async_trait;

pub mod api;
pub mod http;
pub mod openapi;

pub use api::schema;
pub use api::{
    api_response, controller, del, delete, endpoint, error_handler, get, patch, post, put,
    request_logger, ApiEnvelope, ApiError, ConfigurationError, Controller, EndpointContract,
    ErrorKind, ErrorMiddleware, Exchange, Failure, Middleware, MiddlewareKind, RequestContext,
    RequestMiddleware, Scope, StorageError, Violation,
};
pub use http::{docs_controller, Server, ServerBuilder};
pub use openapi::ApiDescription;
