//! Controllers: named groups of endpoints.

use crate::api::endpoint::EndpointContract;
use crate::api::middleware::Middleware;

/// A named group of endpoints sharing middleware and a documentation tag.
///
/// Appends are ordered and cumulative. Adding the same endpoint twice binds it twice.
#[derive(Clone, Debug)]
pub struct Controller {
    name: String,
    description: Option<String>,
    middlewares: Vec<Middleware>,
    endpoints: Vec<EndpointContract>,
}

pub fn controller(name: impl Into<String>) -> Controller {
    Controller::new(name)
}

impl Controller {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            middlewares: Vec::new(),
            endpoints: Vec::new(),
        }
    }

    pub fn add_endpoint(&mut self, endpoint: EndpointContract) -> &mut Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn add_endpoints(
        &mut self,
        endpoints: impl IntoIterator<Item = EndpointContract>,
    ) -> &mut Self {
        self.endpoints.extend(endpoints);
        self
    }

    pub fn add_middleware(&mut self, middleware: Middleware) -> &mut Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn add_middlewares(
        &mut self,
        middlewares: impl IntoIterator<Item = Middleware>,
    ) -> &mut Self {
        self.middlewares.extend(middlewares);
        self
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = Some(description.into());
        self
    }

    // Consuming variants for declaration-style setup.

    pub fn with_endpoint(mut self, endpoint: EndpointContract) -> Self {
        self.add_endpoint(endpoint);
        self
    }

    pub fn with_endpoints(mut self, endpoints: impl IntoIterator<Item = EndpointContract>) -> Self {
        self.add_endpoints(endpoints);
        self
    }

    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.add_middleware(middleware);
        self
    }

    pub fn with_middlewares(mut self, middlewares: impl IntoIterator<Item = Middleware>) -> Self {
        self.add_middlewares(middlewares);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.set_description(description);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn endpoints(&self) -> &[EndpointContract] {
        &self.endpoints
    }

    pub fn middlewares(&self) -> &[Middleware] {
        &self.middlewares
    }
}
