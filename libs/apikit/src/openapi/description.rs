//! API description synthesizer.
//!
//! Controllers are registered once at startup. The document is built lazily on
//! the first [`ApiDescription::get_document`] call and cached for the lifetime of
//! the description. Later calls return the same `Arc`, and registrations made
//! after the first build do not change it.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use runtime::DocsConfig;
use serde_json::{json, Value};

use crate::api::controller::Controller;
use crate::api::endpoint::{to_brace_path, EndpointContract};
use crate::openapi::model::{
    ComponentsRegistry, OpenApi, OpenApiComponents, OpenApiInfo, OpenApiServer, OperationSpec,
    ParamLocation, ParamSpec, Tag,
};

/// Component referenced by operations that declare no output schema.
pub const UNTYPED_RESPONSE: &str = "UntypedResponse";

#[derive(Default)]
struct Registered {
    operations: Vec<OperationSpec>,
    tags: Vec<Tag>,
    components: ComponentsRegistry,
}

/// Per-server API description context, shared with the docs controller.
pub struct ApiDescription {
    info: OpenApiInfo,
    registered: Mutex<Registered>,
    document: ArcSwapOption<Value>,
}

impl std::fmt::Debug for ApiDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiDescription")
            .field("info", &self.info)
            .field("operations", &self.registered.lock().operations.len())
            .field("built", &self.document.load().is_some())
            .finish()
    }
}

impl Default for ApiDescription {
    fn default() -> Self {
        Self::from_config(&DocsConfig::default())
    }
}

impl ApiDescription {
    pub fn new(info: OpenApiInfo) -> Self {
        Self {
            info,
            registered: Mutex::new(Registered::default()),
            document: ArcSwapOption::empty(),
        }
    }

    pub fn from_config(cfg: &DocsConfig) -> Self {
        Self::new(OpenApiInfo {
            title: cfg.title.clone(),
            version: cfg.version.clone(),
            description: cfg.description.clone(),
        })
    }

    /// Registers every endpoint of `controller` and its tag. A tag registered
    /// again under the same name keeps its position and takes the new description.
    pub fn add_controller(&self, controller: &Controller) {
        let mut reg = self.registered.lock();
        for endpoint in controller.endpoints() {
            let spec =
                operation_from_endpoint(Some(controller.name()), endpoint, &mut reg.components);
            register_operation(&mut reg.operations, spec);
        }

        let description = controller.description().map(str::to_string);
        match reg.tags.iter_mut().find(|t| t.name == controller.name()) {
            Some(tag) => tag.description = description,
            None => reg.tags.push(Tag {
                name: controller.name().to_string(),
                description,
            }),
        }
    }

    /// Registers a single endpoint outside of any controller.
    pub fn add_endpoint(&self, endpoint: &EndpointContract) {
        let mut reg = self.registered.lock();
        let spec = operation_from_endpoint(None, endpoint, &mut reg.components);
        register_operation(&mut reg.operations, spec);
    }

    pub fn operation_count(&self) -> usize {
        self.registered.lock().operations.len()
    }

    /// Returns the cached document, building it on first use.
    ///
    /// Two concurrent first callers may both build; only one result is stored and
    /// both receive it.
    pub fn get_document(&self) -> Arc<Value> {
        if let Some(doc) = self.document.load_full() {
            return doc;
        }

        let built = Arc::new(self.build_document());
        let previous = self
            .document
            .compare_and_swap(&None::<Arc<Value>>, Some(built.clone()));
        match &*previous {
            Some(existing) => existing.clone(),
            None => built,
        }
    }

    /// The cached document serialized as JSON.
    pub fn document_json(&self) -> String {
        self.get_document().to_string()
    }

    fn build_document(&self) -> Value {
        let reg = self.registered.lock();
        tracing::info!(
            operations = reg.operations.len(),
            "Building OpenAPI document"
        );

        let mut paths: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        for spec in &reg.operations {
            paths
                .entry(spec.path.clone())
                .or_default()
                .insert(spec.method.as_str().to_lowercase(), spec.to_operation());
        }

        let doc = OpenApi {
            openapi: "3.0.0",
            info: self.info.clone(),
            servers: vec![OpenApiServer { url: "/".into() }],
            tags: reg.tags.clone(),
            paths,
            components: OpenApiComponents {
                schemas: reg.components.schemas.clone(),
            },
        };
        serde_json::to_value(doc).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize OpenAPI document");
            json!({})
        })
    }
}

fn register_operation(operations: &mut Vec<OperationSpec>, spec: OperationSpec) {
    if operations
        .iter()
        .any(|op| op.method == spec.method && op.path == spec.path)
    {
        tracing::warn!(
            method = %spec.method,
            path = %spec.path,
            operation_id = %spec.operation_id,
            "Duplicate operation; keeping the first registration in the API description"
        );
        return;
    }
    operations.push(spec);
}

/// `"/users/:id/posts"` → `"UsersIdPosts"`.
pub fn path_to_title(path: &str) -> String {
    path.split(|c: char| !c.is_ascii_alphanumeric())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect()
}

fn required_names(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn params_from_section(
    section: &Value,
    location: ParamLocation,
    components: &ComponentsRegistry,
) -> Vec<ParamSpec> {
    let section = components.resolve(section);
    let required = required_names(section);
    let Some(fields) = section.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    fields
        .iter()
        .map(|(name, schema)| {
            let mut schema = schema.clone();
            let description = schema
                .as_object_mut()
                .and_then(|o| o.remove("description"))
                .and_then(|d| d.as_str().map(str::to_string));
            ParamSpec {
                name: name.clone(),
                location: location.clone(),
                required: required.contains(name),
                description,
                schema,
            }
        })
        .collect()
}

/// Derives the documented operation for `endpoint`, registering its schemas'
/// components along the way.
pub fn operation_from_endpoint(
    controller_name: Option<&str>,
    endpoint: &EndpointContract,
    components: &mut ComponentsRegistry,
) -> OperationSpec {
    let fallback_name = format!(
        "{}{}",
        endpoint.method().as_str().to_lowercase(),
        path_to_title(endpoint.path())
    );
    let operation_id = format!(
        "{}{}",
        controller_name.unwrap_or(""),
        endpoint.name().unwrap_or(&fallback_name)
    );

    let mut params = Vec::new();
    let mut request_body = None;
    let mut body_required = false;
    if let Some(input) = endpoint.input() {
        let doc = input.document();
        components.register_all(doc.components);
        let root = components.resolve(&doc.root).clone();
        if let Some(props) = root.get("properties").and_then(Value::as_object) {
            if let Some(section) = props.get("params") {
                params.extend(params_from_section(section, ParamLocation::Path, components));
            }
            if let Some(section) = props.get("query") {
                params.extend(params_from_section(section, ParamLocation::Query, components));
            }
            if let Some(body) = props.get("body") {
                request_body = Some(body.clone());
                body_required = required_names(&root).iter().any(|n| n == "body");
            }
        }
    }

    let response_schema = match endpoint.output() {
        Some(output) => {
            let doc = output.document();
            components.register_all(doc.components);
            doc.root
        }
        None => {
            components.register_schema(UNTYPED_RESPONSE, json!({}));
            json!({ "$ref": format!("#/components/schemas/{UNTYPED_RESPONSE}") })
        }
    };

    OperationSpec {
        method: endpoint.method().clone(),
        path: to_brace_path(endpoint.path()),
        operation_id,
        summary: endpoint.name().map(str::to_string),
        description: endpoint.description().map(str::to_string),
        tags: controller_name.map(|n| vec![n.to_string()]).unwrap_or_default(),
        params,
        request_body,
        body_required,
        response_content_type: endpoint.response_content_type().to_string(),
        response_schema,
        doc_meta: endpoint.doc_meta().cloned(),
    }
}
