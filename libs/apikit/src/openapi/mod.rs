//! OpenAPI 3.0 document synthesized from registered controllers.

pub mod description;
pub mod model;

pub use description::{operation_from_endpoint, path_to_title, ApiDescription};
