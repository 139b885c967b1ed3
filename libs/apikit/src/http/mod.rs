//! Binding controllers onto axum and serving them.

pub mod binder;
pub mod docs;
pub mod request_id;
pub mod server;

pub use docs::docs_controller;
pub use server::{Server, ServerBuilder};
