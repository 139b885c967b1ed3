//! Built-in controller exposing the API description.

use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use crate::api::controller::{controller, Controller};
use crate::api::endpoint::{get, EndpointContract};
use crate::api::error::{ConfigurationError, Failure};
use crate::api::exchange::RequestContext;
use crate::openapi::description::ApiDescription;

pub const DOCS_CONTROLLER: &str = "OpenAPI";

const RAPIDOC_HTML: &str = r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8">
  <title>API reference</title>
  <script type="module" src="https://unpkg.com/rapidoc/dist/rapidoc-min.js"></script>
</head>
<body>
  <rapi-doc
    spec-url="./openapi.json"
    theme="dark"
    render-style="view"
    show-header="false"
    allow-server-selection="false"
    allow-authentication="false"
    schema-style="table"
  ></rapi-doc>
</body>
</html>
"#;

fn spec_endpoint(description: Arc<ApiDescription>) -> Result<EndpointContract, ConfigurationError> {
    Ok(get("/openapi.json", Some("getOpenAPISpec"))?
        .with_response_content_type("application/json")
        .with_description("OpenAPI document of this server")
        .with_raw_handler(Arc::new(move |_: Value, _: RequestContext| {
            let doc = description.get_document();
            async move { Ok::<Value, Failure>((*doc).clone()) }.boxed()
        })))
}

fn page_endpoint() -> Result<EndpointContract, ConfigurationError> {
    Ok(get("/api.html", Some("API usage"))?
        .with_response_content_type("text/html")
        .with_description("Interactive API reference")
        .with_raw_handler(Arc::new(|_: Value, _: RequestContext| {
            async { Ok::<Value, Failure>(Value::String(RAPIDOC_HTML.to_string())) }.boxed()
        })))
}

/// `GET /openapi.json` and `GET /api.html` backed by `description`.
pub fn docs_controller(description: Arc<ApiDescription>) -> Result<Controller, ConfigurationError> {
    Ok(controller(DOCS_CONTROLLER)
        .with_description("Exposes an OpenAPI spec and Rapidoc page")
        .with_endpoint(spec_endpoint(description)?)
        .with_endpoint(page_endpoint()?))
}
