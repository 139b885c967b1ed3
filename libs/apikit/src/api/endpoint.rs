//! Endpoint contracts: one route's method, path, schemas, handler and metadata.
//!
//! Contracts are immutable values. Every builder method borrows the receiver and
//! returns a new contract with one field replaced, so a base contract can be
//! specialized several times without the variants affecting each other:
//!
//! ```ignore
//! let base = apikit::get("/hello", Some("getGreeting"))
//!     .with_input(schema::of::<HelloInput>());
//! let plain = base.with_output(schema::any());
//! let wrapped = base.with_output(schema::api_output(schema::of::<String>()));
//! ```

use std::future::Future;
use std::sync::{Arc, LazyLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use http::Method;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::api::envelope::APPLICATION_JSON;
use crate::api::error::{ApiError, ConfigurationError, Failure};
use crate::api::exchange::RequestContext;
use crate::api::middleware::Middleware;
use crate::api::schema::{SchemaRef, Violation};

/// Type-erased handler: validated input in, unvalidated output out.
pub type HandlerFn =
    Arc<dyn Fn(Value, RequestContext) -> BoxFuture<'static, Result<Value, Failure>> + Send + Sync>;

/// Immutable descriptor of a single route.
#[derive(Clone)]
pub struct EndpointContract {
    method: Method,
    path: String,
    name: Option<String>,
    description: Option<String>,
    input: Option<SchemaRef>,
    output: Option<SchemaRef>,
    response_content_type: String,
    handler: Option<HandlerFn>,
    middlewares: Vec<Middleware>,
    doc_meta: Option<Map<String, Value>>,
}

impl std::fmt::Debug for EndpointContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointContract")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("name", &self.name)
            .field("has_input", &self.input.is_some())
            .field("has_output", &self.output.is_some())
            .field("has_handler", &self.handler.is_some())
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

const SUPPORTED_METHODS: [Method; 8] = [
    Method::GET,
    Method::PUT,
    Method::POST,
    Method::DELETE,
    Method::HEAD,
    Method::OPTIONS,
    Method::PATCH,
    Method::TRACE,
];

/// Parses a verb case-insensitively, accepting only the supported set.
pub fn parse_method(method: &str) -> Result<Method, ConfigurationError> {
    let upper = method.trim().to_ascii_uppercase();
    SUPPORTED_METHODS
        .iter()
        .find(|m| m.as_str() == upper)
        .cloned()
        .ok_or_else(|| ConfigurationError::UnsupportedMethod(method.to_string()))
}

impl EndpointContract {
    /// Creates a contract with no schemas and no handler.
    pub fn new(method: Method, path: impl Into<String>) -> Result<Self, ConfigurationError> {
        if !SUPPORTED_METHODS.contains(&method) {
            return Err(ConfigurationError::UnsupportedMethod(method.to_string()));
        }
        let path = path.into();
        if !path.starts_with('/') {
            return Err(ConfigurationError::InvalidPath {
                path,
                reason: "must start with '/'".into(),
            });
        }
        if path.split('/').any(|segment| segment == ":") {
            return Err(ConfigurationError::InvalidPath {
                path,
                reason: "empty parameter name".into(),
            });
        }
        Ok(Self {
            method,
            path,
            name: None,
            description: None,
            input: None,
            output: None,
            response_content_type: APPLICATION_JSON.to_string(),
            handler: None,
            middlewares: Vec::new(),
            doc_meta: None,
        })
    }

    fn replace(&self, apply: impl FnOnce(&mut Self)) -> Self {
        let mut next = self.clone();
        apply(&mut next);
        next
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.replace(|c| c.name = Some(name))
    }

    /// Input schema, applied to `{params, query, body?}`.
    pub fn with_input(&self, schema: SchemaRef) -> Self {
        self.replace(|c| c.input = Some(schema))
    }

    pub fn with_output(&self, schema: SchemaRef) -> Self {
        self.replace(|c| c.output = Some(schema))
    }

    /// Typed handler. The validated input is deserialized into `I`; failure to do
    /// so is reported as a validation error without calling `f`.
    pub fn with_handler<F, Fut, I, O, E>(&self, f: F) -> Self
    where
        F: Fn(I, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        E: Into<Failure> + Send + 'static,
    {
        let f = Arc::new(f);
        let handler: HandlerFn = Arc::new(move |input: Value, ctx: RequestContext| {
            let f = f.clone();
            async move {
                let typed: I = serde_json::from_value(input).map_err(|e| {
                    ApiError::validation(
                        "Input validation failed",
                        vec![Violation::new("", "invalid_type", e.to_string())],
                    )
                })?;
                let out = f(typed, ctx).await.map_err(Into::<Failure>::into)?;
                Ok::<Value, Failure>(serde_json::to_value(out)?)
            }
            .boxed()
        });
        self.with_raw_handler(handler)
    }

    /// Handler operating directly on JSON values.
    pub fn with_raw_handler(&self, handler: HandlerFn) -> Self {
        self.replace(|c| c.handler = Some(handler))
    }

    pub fn with_middleware(&self, middleware: Middleware) -> Self {
        self.replace(|c| c.middlewares.push(middleware))
    }

    pub fn with_middlewares(&self, middlewares: impl IntoIterator<Item = Middleware>) -> Self {
        self.replace(|c| c.middlewares.extend(middlewares))
    }

    pub fn with_response_content_type(&self, content_type: impl Into<String>) -> Self {
        let content_type = content_type.into();
        self.replace(|c| c.response_content_type = content_type)
    }

    pub fn with_description(&self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.replace(|c| c.description = Some(description))
    }

    /// Keys shallow-merged over the generated operation object.
    pub fn with_doc_meta(&self, meta: Map<String, Value>) -> Self {
        self.replace(|c| c.doc_meta = Some(meta))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn input(&self) -> Option<&SchemaRef> {
        self.input.as_ref()
    }

    pub fn output(&self) -> Option<&SchemaRef> {
        self.output.as_ref()
    }

    pub fn response_content_type(&self) -> &str {
        &self.response_content_type
    }

    pub fn handler(&self) -> Option<&HandlerFn> {
        self.handler.as_ref()
    }

    pub fn middlewares(&self) -> &[Middleware] {
        &self.middlewares
    }

    pub fn doc_meta(&self) -> Option<&Map<String, Value>> {
        self.doc_meta.as_ref()
    }
}

static COLON_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\w+)").expect("valid colon parameter pattern"));
static BRACE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}/]+)\}").expect("valid brace parameter pattern"));

/// Rewrites `:name` segments to `{name}`: `/users/:id/posts` → `/users/{id}/posts`.
pub fn to_brace_path(path: &str) -> String {
    COLON_PARAM.replace_all(path, "{$1}").into_owned()
}

/// Parameter names of a brace-form path, in order of appearance.
pub fn brace_param_names(path: &str) -> Vec<String> {
    BRACE_PARAM
        .captures_iter(path)
        .map(|c| c[1].to_string())
        .collect()
}

/// Brace-form path with parameter names erased. Templates that differ only in
/// parameter names share a key: `/users/{id}` and `/users/{userId}` → `/users/{}`.
pub fn route_key(path: &str) -> String {
    BRACE_PARAM.replace_all(path, "{}").into_owned()
}

/// `endpoint("get", "/users/:id", Some("getUser"))`.
pub fn endpoint(
    method: &str,
    path: impl Into<String>,
    name: Option<&str>,
) -> Result<EndpointContract, ConfigurationError> {
    let contract = EndpointContract::new(parse_method(method)?, path)?;
    Ok(match name {
        Some(name) => contract.with_name(name),
        None => contract,
    })
}

macro_rules! verb_constructor {
    ($(#[$doc:meta])* $fn_name:ident, $method:expr) => {
        $(#[$doc])*
        pub fn $fn_name(
            path: impl Into<String>,
            name: Option<&str>,
        ) -> Result<EndpointContract, ConfigurationError> {
            let contract = EndpointContract::new($method, path)?;
            Ok(match name {
                Some(name) => contract.with_name(name),
                None => contract,
            })
        }
    };
}

verb_constructor!(get, Method::GET);
verb_constructor!(put, Method::PUT);
verb_constructor!(post, Method::POST);
verb_constructor!(delete, Method::DELETE);
verb_constructor!(
    /// Alias of [`delete`].
    del,
    Method::DELETE
);
verb_constructor!(patch, Method::PATCH);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::middleware::Scope;
    use crate::api::schema;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn unsupported_method_is_a_configuration_error() {
        assert_eq!(
            endpoint("fetch", "/x", None).unwrap_err(),
            ConfigurationError::UnsupportedMethod("fetch".into())
        );
        assert!(EndpointContract::new(Method::CONNECT, "/x").is_err());
        assert_eq!(endpoint("pAtCh", "/x", None).unwrap().method(), &Method::PATCH);
    }

    #[test]
    fn brace_path_conversion() {
        assert_eq!(to_brace_path("/users/:id"), "/users/{id}");
        assert_eq!(to_brace_path("/a/:org_id/b/:item2"), "/a/{org_id}/b/{item2}");
        assert_eq!(to_brace_path("/static/path"), "/static/path");
        assert_eq!(to_brace_path("/odd/:/x"), "/odd/:/x");
    }

    #[test]
    fn route_key_ignores_parameter_names() {
        assert_eq!(route_key("/users/{id}"), "/users/{}");
        assert_eq!(route_key("/users/{userId}"), route_key("/users/{id}"));
        assert_eq!(route_key("/users/{id}/posts/{postId}"), "/users/{}/posts/{}");
        assert_eq!(brace_param_names("/users/{id}/posts/{postId}"), vec!["id", "postId"]);
        assert!(brace_param_names("/static").is_empty());
    }

    #[test]
    fn path_must_be_absolute() {
        assert!(matches!(
            get("users", None),
            Err(ConfigurationError::InvalidPath { .. })
        ));
        assert!(matches!(
            get("/users/:/posts", None),
            Err(ConfigurationError::InvalidPath { .. })
        ));
    }

    #[test]
    fn transformations_leave_receiver_untouched() {
        let base = get("/hello", Some("getGreeting")).unwrap();
        let with_input = base.with_input(schema::any());
        let with_both = with_input.with_output(schema::any()).with_description("Greets");

        assert!(base.input().is_none());
        assert!(base.description().is_none());
        assert!(with_input.output().is_none());
        assert!(with_both.input().is_some());
        assert!(with_both.output().is_some());
        assert_eq!(with_both.name(), Some("getGreeting"));
        assert_eq!(with_both.path(), "/hello");
        assert_eq!(with_both.method(), &Method::GET);
        assert_eq!(with_both.response_content_type(), "application/json");
    }

    #[test]
    fn middleware_appends_in_call_order() {
        let base = post("/items", None).unwrap();
        let one = base.with_middleware(Middleware::from_fn(Scope::Before, |_| Ok(())).named("a"));
        let three = one.with_middlewares(vec![
            Middleware::from_fn(Scope::After, |_| Ok(())).named("b"),
            Middleware::from_fn(Scope::Before, |_| Ok(())).named("c"),
        ]);

        let names: Vec<_> = three.middlewares().iter().filter_map(|m| m.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(one.middlewares().len(), 1);
        assert!(base.middlewares().is_empty());
    }

    #[derive(Deserialize)]
    struct Input {
        query: Query,
    }

    #[derive(Deserialize)]
    struct Query {
        name: String,
    }

    #[tokio::test]
    async fn typed_handler_is_stored_not_invoked_and_erases_types() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let contract = get("/hello", None).unwrap().with_handler(move |input: Input, _ctx| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Ok::<_, Failure>(format!("Hello {}!", input.query.name)) }
        });
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        let handler = contract.handler().unwrap();
        let out = handler(json!({"query": {"name": "Evert"}}), RequestContext::default())
            .await
            .unwrap();
        assert_eq!(out, json!("Hello Evert!"));

        let err = handler(json!({"query": {}}), RequestContext::default())
            .await
            .unwrap_err();
        assert_eq!(
            crate::api::error::classify(&err).kind,
            crate::api::error::ErrorKind::Validation
        );
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn doc_meta_and_content_type_are_plain_setters() {
        let mut meta = Map::new();
        meta.insert("deprecated".into(), json!(true));
        let c = get("/page", None)
            .unwrap()
            .with_response_content_type("text/html")
            .with_doc_meta(meta);
        assert_eq!(c.response_content_type(), "text/html");
        assert_eq!(c.doc_meta().unwrap()["deprecated"], json!(true));
    }
}
