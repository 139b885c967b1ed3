//! Per-request state passed through the middleware chain.

use std::collections::BTreeMap;
use std::fmt;

use axum::body::{Body, Bytes};
use axum::response::Response;
use http::{header, Extensions, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::api::envelope::APPLICATION_JSON;
use crate::api::error::Failure;

/// What a handler sees of the request. Cheap to clone for handler calls.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Path parameters, keyed by the `:name` segments of the route.
    pub params: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    /// Parsed JSON body; `None` when the request had no body.
    pub body: Option<Value>,
    /// Value of `x-request-id` for this request.
    pub request_id: Option<String>,
    /// Typed values inserted by middleware (e.g. an authenticated principal).
    pub extensions: Extensions,
}

impl RequestContext {
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// The value an input schema validates: `{params, query, body?}`.
    pub fn raw_input(&self) -> Value {
        let strings = |m: &BTreeMap<String, String>| {
            Value::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect::<Map<_, _>>(),
            )
        };
        let mut input = Map::new();
        input.insert("params".into(), strings(&self.params));
        input.insert("query".into(), strings(&self.query));
        if let Some(body) = &self.body {
            input.insert("body".into(), body.clone());
        }
        Value::Object(input)
    }
}

type FinishHook = Box<dyn FnOnce(StatusCode, &RequestContext) + Send>;

/// A request moving through a chain together with the response being built.
///
/// The response is finalized by the first `send*` call. Later sends are ignored,
/// and later stages can detect the state via [`Exchange::is_finalized`].
pub struct Exchange {
    pub request: RequestContext,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    finalized: bool,
    finish_hooks: Vec<FinishHook>,
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("method", &self.request.method)
            .field("path", &self.request.path())
            .field("status", &self.status)
            .field("finalized", &self.finalized)
            .finish()
    }
}

impl Exchange {
    pub fn new(request: RequestContext) -> Self {
        Self {
            request,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            finalized: false,
            finish_hooks: Vec::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Replaces the content type. Invalid values are ignored.
    pub fn set_content_type(&mut self, content_type: &str) {
        if let Ok(value) = HeaderValue::from_str(content_type) {
            self.headers.insert(header::CONTENT_TYPE, value);
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Finalizes the response with `body` and the current status.
    pub fn send(&mut self, body: impl Into<Bytes>) {
        if self.finalized {
            tracing::warn!(
                method = %self.request.method,
                path = %self.request.path(),
                "response already sent, ignoring second send"
            );
            return;
        }
        self.body = body.into();
        self.finalized = true;
    }

    /// Serializes `value` as JSON and finalizes the response with `status`.
    pub fn send_json<T: Serialize>(
        &mut self,
        status: StatusCode,
        value: &T,
    ) -> Result<(), Failure> {
        let bytes = serde_json::to_vec(value)?;
        if !self.finalized {
            self.status = status;
            if !self.headers.contains_key(header::CONTENT_TYPE) {
                self.headers
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
            }
        }
        self.send(bytes);
        Ok(())
    }

    /// Registers a callback run once with the final status after the chain ends.
    pub fn on_finish<F>(&mut self, hook: F)
    where
        F: FnOnce(StatusCode, &RequestContext) + Send + 'static,
    {
        self.finish_hooks.push(Box::new(hook));
    }

    /// Runs finish hooks and converts the exchange into an HTTP response.
    pub fn finish(mut self) -> Response {
        let hooks = std::mem::take(&mut self.finish_hooks);
        for hook in hooks {
            hook(self.status, &self.request);
        }

        let mut resp = Response::new(Body::from(self.body));
        *resp.status_mut() = self.status;
        *resp.headers_mut() = self.headers;
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn ctx() -> RequestContext {
        RequestContext {
            method: Method::GET,
            uri: "/users/42?verbose=1".parse().unwrap(),
            params: BTreeMap::from([("id".to_string(), "42".to_string())]),
            query: BTreeMap::from([("verbose".to_string(), "1".to_string())]),
            ..Default::default()
        }
    }

    #[test]
    fn raw_input_omits_absent_body() {
        let input = ctx().raw_input();
        assert_eq!(input, json!({"params": {"id": "42"}, "query": {"verbose": "1"}}));

        let mut with_body = ctx();
        with_body.body = Some(json!({"a": 1}));
        assert_eq!(with_body.raw_input()["body"], json!({"a": 1}));
    }

    #[test]
    fn second_send_is_ignored() {
        let mut ex = Exchange::new(ctx());
        ex.send_json(StatusCode::CREATED, &json!({"first": true})).unwrap();
        ex.send_json(StatusCode::INTERNAL_SERVER_ERROR, &json!({"second": true}))
            .unwrap();

        assert!(ex.is_finalized());
        assert_eq!(ex.status(), StatusCode::CREATED);
        assert_eq!(ex.body, Bytes::from_static(br#"{"first":true}"#));
    }

    #[test]
    fn finish_runs_hooks_with_final_status() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut ex = Exchange::new(ctx());
        let sink = seen.clone();
        ex.on_finish(move |status, req| {
            sink.lock().unwrap().push((status, req.path().to_string()));
        });
        ex.set_status(StatusCode::ACCEPTED);
        ex.send("ok");

        let resp = ex.finish();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(StatusCode::ACCEPTED, "/users/42".to_string())]
        );
    }
}
