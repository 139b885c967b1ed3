//! HTTP server assembly: controllers, global middleware, docs and tower layers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use runtime::{DocsConfig, ServerConfig};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::api::controller::Controller;
use crate::api::error::ConfigurationError;
use crate::api::error_handler::error_handler;
use crate::api::middleware::{request_logger, Middleware};
use crate::http::binder::Pipeline;
use crate::http::docs::docs_controller;
use crate::http::request_id::{self, MakeReqId};
use crate::openapi::description::ApiDescription;

pub struct ServerBuilder {
    server: ServerConfig,
    docs: DocsConfig,
    controllers: Vec<Controller>,
    middlewares: Vec<Middleware>,
    router: Router,
}

impl ServerBuilder {
    pub fn controller(mut self, controller: Controller) -> Self {
        self.controllers.push(controller);
        self
    }

    pub fn controllers(mut self, controllers: impl IntoIterator<Item = Controller>) -> Self {
        self.controllers.extend(controllers);
        self
    }

    /// Adds a global middleware. BEFORE stages run ahead of every route, AFTER
    /// stages run behind every route and ahead of the error normalizer.
    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn middlewares(mut self, middlewares: impl IntoIterator<Item = Middleware>) -> Self {
        self.middlewares.extend(middlewares);
        self
    }

    /// Plain axum routes served next to the controllers. They bypass the
    /// middleware pipeline.
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = self.router.merge(router);
        self
    }

    pub fn build(self) -> Result<Server, ConfigurationError> {
        let description = Arc::new(ApiDescription::from_config(&self.docs));

        let mut controllers = Vec::with_capacity(self.controllers.len() + 1);
        if self.docs.enabled {
            controllers.push(docs_controller(description.clone())?);
        }
        controllers.extend(self.controllers);
        for controller in &controllers {
            description.add_controller(controller);
        }

        let mut global = Vec::with_capacity(self.middlewares.len() + 2);
        global.push(request_logger());
        global.extend(self.middlewares);
        global.push(error_handler());

        let pipeline = Arc::new(Pipeline::new(&global, self.server.body_limit_bytes));
        let router = pipeline.bind(self.router, &controllers)?;
        tracing::info!(
            controllers = controllers.len(),
            operations = description.operation_count(),
            "Controllers bound"
        );

        let header = request_id::header();
        let mut router = router.layer(
            ServiceBuilder::new()
                .layer(PropagateRequestIdLayer::new(header.clone()))
                .layer(SetRequestIdLayer::new(header, MakeReqId))
                .layer(request_id::create_trace_layer()),
        );
        if self.server.cors_enabled {
            router = router.layer(CorsLayer::permissive());
        }

        Ok(Server {
            bind_addr: self.server.bind_addr,
            router,
            description,
        })
    }
}

/// A bound router ready to serve.
pub struct Server {
    bind_addr: String,
    router: Router,
    description: Arc<ApiDescription>,
}

impl Server {
    pub fn builder(server: ServerConfig, docs: DocsConfig) -> ServerBuilder {
        ServerBuilder {
            server,
            docs,
            controllers: Vec::new(),
            middlewares: Vec::new(),
            router: Router::new(),
        }
    }

    /// The fully layered router, e.g. for `tower::ServiceExt::oneshot` in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn api_description(&self) -> Arc<ApiDescription> {
        self.description.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    /// Binds the listener and serves until `cancel` fires.
    pub async fn serve(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let addr: SocketAddr = self
            .bind_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind address '{}': {}", self.bind_addr, e))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP server bound on {}", listener.local_addr()?);

        let shutdown = async move {
            cancel.cancelled().await;
            tracing::info!("HTTP server shutting down gracefully (cancellation)");
        };

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!(e))
    }
}
