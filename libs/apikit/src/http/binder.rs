//! Binds controllers onto an axum router.
//!
//! A request runs the global BEFORE stages once, then every route chain bound to
//! its `(method, path)` in registration order until one finalizes the response,
//! then the global AFTER stages. A route chain is
//! `[controller BEFORE] → [endpoint BEFORE] → validated handler → [endpoint AFTER]
//! → [controller AFTER]`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Path, Query, Request};
use axum::response::Response;
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use http::{header, request::Parts, Method, StatusCode};
use serde_json::Value;

use crate::api::controller::Controller;
use crate::api::endpoint::{brace_param_names, route_key, to_brace_path, EndpointContract};
use crate::api::error::{ApiError, ConfigurationError, Failure};
use crate::api::error_handler::render_failure;
use crate::api::exchange::{Exchange, RequestContext};
use crate::api::middleware::{run_chain, Middleware, RequestMiddleware, Scope};
use crate::http::request_id::request_id_from;

/// Stages of one endpoint, plus the renaming of the bound route's path
/// parameters to the names this endpoint declared.
#[derive(Clone)]
pub struct Chain {
    stages: Arc<[Middleware]>,
    renames: Vec<(String, String)>,
}

impl Chain {
    fn new(stages: Vec<Middleware>) -> Self {
        Self {
            stages: stages.into(),
            renames: Vec::new(),
        }
    }

    /// Path parameters as this endpoint names them.
    fn params(&self, bound: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        if self.renames.is_empty() {
            return bound.clone();
        }
        self.renames
            .iter()
            .filter_map(|(from, to)| bound.get(from).map(|v| (to.clone(), v.clone())))
            .collect()
    }
}

/// Routes sharing a parameter-agnostic path, bound under the first spelling.
struct RouteGroup {
    key: String,
    path: String,
    params: Vec<String>,
    methods: Vec<(Method, Vec<Chain>)>,
}

/// The validated handler invocation step of a route chain.
struct InvokeEndpoint {
    endpoint: EndpointContract,
}

#[async_trait]
impl RequestMiddleware for InvokeEndpoint {
    async fn handle(&self, ex: &mut Exchange) -> Result<(), Failure> {
        let raw = ex.request.raw_input();
        let input = match self.endpoint.input() {
            Some(schema) => schema
                .validate(&raw)
                .map_err(|violations| ApiError::validation("Input validation failed", violations))?,
            None => raw,
        };

        let Some(handler) = self.endpoint.handler() else {
            return Err(ApiError::not_implemented().into());
        };
        let output = handler(input, ex.request.clone()).await?;

        let output = match self.endpoint.output() {
            Some(schema) => schema.validate(&output).map_err(|violations| {
                tracing::error!(
                    method = %self.endpoint.method(),
                    path = self.endpoint.path(),
                    ?violations,
                    "Output validation failed"
                );
                ApiError::internal()
            })?,
            None => output,
        };

        let content_type = self.endpoint.response_content_type();
        ex.set_content_type(content_type);
        let status = ex.status();
        match output {
            Value::String(text) if !content_type.contains("json") => {
                ex.send(text);
                Ok(())
            }
            other => ex.send_json(status, &other),
        }
    }
}

/// Terminal stage of requests no route chain answered.
struct NotFound;

#[async_trait]
impl RequestMiddleware for NotFound {
    async fn handle(&self, ex: &mut Exchange) -> Result<(), Failure> {
        Err(ApiError::not_found(format!(
            "Cannot {} {}",
            ex.request.method,
            ex.request.path()
        ))
        .into())
    }
}

/// Shared request pipeline: global stages plus body handling.
pub struct Pipeline {
    global_before: Vec<Middleware>,
    global_after: Vec<Middleware>,
    not_found: Middleware,
    body_limit: usize,
}

fn scoped(middlewares: &[Middleware], scope: Scope) -> impl Iterator<Item = Middleware> + '_ {
    middlewares.iter().filter(move |m| m.scope() == scope).cloned()
}

impl Pipeline {
    pub fn new(global: &[Middleware], body_limit: usize) -> Self {
        Self {
            global_before: scoped(global, Scope::Before).collect(),
            global_after: scoped(global, Scope::After).collect(),
            not_found: Middleware::regular(Scope::After, NotFound).named("NotFound"),
            body_limit,
        }
    }

    /// Controller and endpoint stages around the validated handler invocation.
    pub fn route_chain(controller: &Controller, endpoint: &EndpointContract) -> Vec<Middleware> {
        let invoke = Middleware::regular(
            Scope::Before,
            InvokeEndpoint {
                endpoint: endpoint.clone(),
            },
        )
        .named(endpoint.name().unwrap_or("handler"));

        scoped(controller.middlewares(), Scope::Before)
            .chain(scoped(endpoint.middlewares(), Scope::Before))
            .chain(std::iter::once(invoke))
            .chain(scoped(endpoint.middlewares(), Scope::After))
            .chain(scoped(controller.middlewares(), Scope::After))
            .collect()
    }

    /// Runs one request through the global stages and the given route chains.
    pub async fn dispatch(&self, routes: &[Chain], req: Request) -> Response {
        let (ctx, initial) = read_request(req, self.body_limit).await;
        let mut ex = Exchange::new(ctx);

        let mut pending = run_chain(&self.global_before, &mut ex, initial).await;
        let bound = ex.request.params.clone();
        for chain in routes {
            if ex.is_finalized() {
                break;
            }
            ex.request.params = chain.params(&bound);
            pending = run_chain(&chain.stages, &mut ex, pending).await;
        }
        if !ex.is_finalized() && pending.is_none() {
            pending = self.not_found.invoke(None, &mut ex).await;
        }
        pending = run_chain(&self.global_after, &mut ex, pending).await;

        if let Some(failure) = pending {
            if ex.is_finalized() {
                tracing::warn!(error = %failure, "Failure after response was sent");
            } else if let Err(e) = render_failure(failure, &mut ex) {
                tracing::error!(error = %e, "Failed to render failure envelope");
                ex.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                ex.send("");
            }
        }
        if !ex.is_finalized() {
            let not_found = ApiError::not_found(format!(
                "Cannot {} {}",
                ex.request.method,
                ex.request.path()
            ));
            if render_failure(not_found.into(), &mut ex).is_err() {
                ex.set_status(StatusCode::NOT_FOUND);
                ex.send("");
            }
        }
        ex.finish()
    }

    /// Adds one axum route per distinct path. Templates differing only in
    /// parameter names share a route, bound under the first registered spelling.
    /// Endpoints sharing `(method, path)` are dispatched in registration order.
    /// Unknown paths and methods get the not-found envelope.
    pub fn bind(
        self: Arc<Self>,
        mut router: Router,
        controllers: &[Controller],
    ) -> Result<Router, ConfigurationError> {
        let mut table: Vec<RouteGroup> = Vec::new();
        for controller in controllers {
            for endpoint in controller.endpoints() {
                let path = to_brace_path(endpoint.path());
                let key = route_key(&path);
                let names = brace_param_names(&path);
                let idx = match table.iter().position(|g| g.key == key) {
                    Some(idx) => idx,
                    None => {
                        table.push(RouteGroup {
                            key,
                            params: names.clone(),
                            path: path.clone(),
                            methods: Vec::new(),
                        });
                        table.len() - 1
                    }
                };
                let group = &mut table[idx];

                let mut chain = Chain::new(Self::route_chain(controller, endpoint));
                if names != group.params {
                    tracing::debug!(
                        bound = %group.path,
                        declared = %path,
                        "Sharing route with differently named parameters"
                    );
                    chain.renames = group.params.iter().cloned().zip(names).collect();
                }
                match group.methods.iter_mut().find(|(m, _)| m == endpoint.method()) {
                    Some((_, chains)) => chains.push(chain),
                    None => group.methods.push((endpoint.method().clone(), vec![chain])),
                }
            }
        }

        for RouteGroup { path, methods, .. } in table {
            let mut method_router: MethodRouter = MethodRouter::new();
            for (method, chains) in methods {
                let filter = MethodFilter::try_from(method.clone())
                    .map_err(|_| ConfigurationError::UnsupportedMethod(method.to_string()))?;
                tracing::debug!(%method, %path, chains = chains.len(), "Binding route");

                let chains: Arc<[Chain]> = chains.into();
                let pipeline = self.clone();
                method_router = method_router.on(filter, move |req: Request| {
                    let pipeline = pipeline.clone();
                    let chains = chains.clone();
                    async move { pipeline.dispatch(&chains, req).await }
                });
            }
            let pipeline = self.clone();
            method_router = method_router
                .fallback(move |req: Request| async move { pipeline.dispatch(&[], req).await });
            router = router.route(&path, method_router);
        }

        Ok(router.fallback(move |req: Request| async move { self.dispatch(&[], req).await }))
    }
}

async fn path_params(parts: &mut Parts) -> BTreeMap<String, String> {
    match Path::<HashMap<String, String>>::from_request_parts(parts, &()).await {
        Ok(Path(params)) => params.into_iter().collect(),
        Err(_) => BTreeMap::new(),
    }
}

fn is_json(parts: &Parts) -> bool {
    parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("json"))
        .unwrap_or(true)
}

/// Builds the request context. A body that cannot be read or parsed yields an
/// initial `BadRequestError` so the chain starts in failure mode.
async fn read_request(req: Request, body_limit: usize) -> (RequestContext, Option<Failure>) {
    let (mut parts, body) = req.into_parts();
    let params = path_params(&mut parts).await;
    let query = Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(q)| q)
        .unwrap_or_default();

    let mut initial = None;
    let body = match axum::body::to_bytes(body, body_limit).await {
        Ok(bytes) if bytes.is_empty() => None,
        Ok(bytes) if is_json(&parts) => match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(error = %e, "Malformed JSON body");
                initial = Some(ApiError::bad_request("Malformed JSON body").into());
                None
            }
        },
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, body_limit, "Failed to read request body");
            initial = Some(
                ApiError::bad_request(format!(
                    "Unable to read request body (limit {body_limit} bytes)"
                ))
                .into(),
            );
            None
        }
    };

    let ctx = RequestContext {
        request_id: request_id_from(&parts.headers),
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        params,
        query,
        body,
        extensions: parts.extensions,
    };
    (ctx, initial)
}
