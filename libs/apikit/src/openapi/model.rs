//! OpenAPI document model and component registry.

use std::collections::BTreeMap;

use http::Method;
use serde::Serialize;
use serde_json::{json, Map, Value};

const REF_PREFIX: &str = "#/components/schemas/";

/// Named component schemas shared by all operations.
#[derive(Debug, Default, Clone)]
pub struct ComponentsRegistry {
    pub schemas: BTreeMap<String, Value>,
}

impl ComponentsRegistry {
    /// Register a schema component. The first registration of a name wins.
    /// Returns true if inserted.
    pub fn register_schema(&mut self, name: impl Into<String>, schema: Value) -> bool {
        let name = name.into();
        match self.schemas.get(&name) {
            Some(existing) if *existing == schema => {
                tracing::debug!(schema_name = %name, "Identical schema re-registered, ignoring");
                false
            }
            Some(_) => {
                tracing::warn!(
                    schema_name = %name,
                    "Schema conflict: keeping the first registration"
                );
                false
            }
            None => {
                self.schemas.insert(name, schema);
                true
            }
        }
    }

    pub fn register_all(&mut self, schemas: BTreeMap<String, Value>) {
        for (name, schema) in schemas {
            self.register_schema(name, schema);
        }
    }

    /// Follows `$ref`s (also a single ref inside `allOf`/`oneOf`/`anyOf`, as
    /// generated for optional fields) until an inline schema is reached.
    pub fn resolve<'a>(&'a self, schema: &'a Value) -> &'a Value {
        let mut current = schema;
        // Bounded to survive self-referential components.
        for _ in 0..16 {
            if let Some(name) = current
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix(REF_PREFIX))
            {
                match self.schemas.get(name) {
                    Some(target) => {
                        current = target;
                        continue;
                    }
                    None => return current,
                }
            }

            let composed = ["allOf", "oneOf", "anyOf"].iter().find_map(|key| {
                current
                    .get(*key)
                    .and_then(Value::as_array)
                    .and_then(|items| items.iter().find(|item| item.get("$ref").is_some()))
            });
            match composed {
                Some(inner) => current = inner,
                None => return current,
            }
        }
        current
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
}

impl ParamLocation {
    fn as_str(&self) -> &'static str {
        match self {
            ParamLocation::Path => "path",
            ParamLocation::Query => "query",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub description: Option<String>,
    pub schema: Value,
}

/// One documented operation, ready to be rendered into the `paths` object.
#[derive(Clone, Debug)]
pub struct OperationSpec {
    pub method: Method,
    /// Path in brace form (`/users/{id}`).
    pub path: String,
    pub operation_id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub params: Vec<ParamSpec>,
    pub request_body: Option<Value>,
    pub body_required: bool,
    pub response_content_type: String,
    pub response_schema: Value,
    /// Shallow overrides applied last.
    pub doc_meta: Option<Map<String, Value>>,
}

impl OperationSpec {
    pub fn to_operation(&self) -> Value {
        let mut op = Map::new();
        op.insert("operationId".into(), json!(self.operation_id));
        if let Some(summary) = &self.summary {
            op.insert("summary".into(), json!(summary));
        }
        if let Some(description) = &self.description {
            op.insert("description".into(), json!(description));
        }
        if !self.tags.is_empty() {
            op.insert("tags".into(), json!(self.tags));
        }

        if !self.params.is_empty() {
            let parameters: Vec<Value> = self
                .params
                .iter()
                .map(|p| {
                    let mut param = Map::new();
                    param.insert("name".into(), json!(p.name));
                    param.insert("in".into(), json!(p.location.as_str()));
                    // OpenAPI requires all path params to be required.
                    param.insert(
                        "required".into(),
                        json!(p.required || p.location == ParamLocation::Path),
                    );
                    if let Some(d) = &p.description {
                        param.insert("description".into(), json!(d));
                    }
                    param.insert("schema".into(), p.schema.clone());
                    Value::Object(param)
                })
                .collect();
            op.insert("parameters".into(), Value::Array(parameters));
        }

        if let Some(body) = &self.request_body {
            op.insert(
                "requestBody".into(),
                json!({
                    "required": self.body_required,
                    "content": { "application/json": { "schema": body } }
                }),
            );
        }

        let mut content = Map::new();
        content.insert(
            self.response_content_type.clone(),
            json!({ "schema": self.response_schema }),
        );
        op.insert(
            "responses".into(),
            json!({ "200": { "description": "Response body", "content": content } }),
        );

        if let Some(meta) = &self.doc_meta {
            for (k, v) in meta {
                op.insert(k.clone(), v.clone());
            }
        }
        Value::Object(op)
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Tag {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Serialize)]
pub struct OpenApi {
    pub openapi: &'static str,
    pub info: OpenApiInfo,
    pub servers: Vec<OpenApiServer>,
    pub tags: Vec<Tag>,
    pub paths: BTreeMap<String, BTreeMap<String, Value>>,
    pub components: OpenApiComponents,
}

#[derive(Serialize, Clone, Debug)]
pub struct OpenApiInfo {
    pub title: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Serialize)]
pub struct OpenApiServer {
    pub url: String,
}

#[derive(Serialize, Default)]
pub struct OpenApiComponents {
    pub schemas: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_registration_wins() {
        let mut reg = ComponentsRegistry::default();
        assert!(reg.register_schema("User", json!({"type": "object"})));
        assert!(!reg.register_schema("User", json!({"type": "object"})));
        assert!(!reg.register_schema("User", json!({"type": "string"})));
        assert_eq!(reg.schemas["User"], json!({"type": "object"}));
    }

    #[test]
    fn resolve_follows_refs_and_optional_wrappers() {
        let mut reg = ComponentsRegistry::default();
        reg.register_schema(
            "Query",
            json!({"type": "object", "properties": {"q": {"type": "string"}}}),
        );
        reg.register_schema("Alias", json!({"$ref": "#/components/schemas/Query"}));

        let direct = json!({"$ref": "#/components/schemas/Alias"});
        assert_eq!(reg.resolve(&direct)["type"], "object");

        let optional = json!({"oneOf": [{"type": "null"}, {"$ref": "#/components/schemas/Query"}]});
        assert!(reg.resolve(&optional)["properties"].get("q").is_some());

        let dangling = json!({"$ref": "#/components/schemas/Missing"});
        assert_eq!(reg.resolve(&dangling), &dangling);
    }

    #[test]
    fn self_reference_terminates() {
        let mut reg = ComponentsRegistry::default();
        reg.register_schema("Loop", json!({"$ref": "#/components/schemas/Loop"}));
        let start = json!({"$ref": "#/components/schemas/Loop"});
        assert!(reg.resolve(&start).get("$ref").is_some());
    }

    #[test]
    fn doc_meta_overrides_generated_keys() {
        let mut meta = Map::new();
        meta.insert("summary".into(), json!("Overridden"));
        meta.insert("deprecated".into(), json!(true));
        let spec = OperationSpec {
            method: Method::GET,
            path: "/users/{id}".into(),
            operation_id: "UsersgetUsersId".into(),
            summary: Some("original".into()),
            description: None,
            tags: vec!["Users".into()],
            params: vec![ParamSpec {
                name: "id".into(),
                location: ParamLocation::Path,
                required: false,
                description: None,
                schema: json!({"type": "string"}),
            }],
            request_body: None,
            body_required: false,
            response_content_type: "application/json".into(),
            response_schema: json!({}),
            doc_meta: Some(meta),
        };

        let op = spec.to_operation();
        assert_eq!(op["summary"], "Overridden");
        assert_eq!(op["deprecated"], true);
        assert_eq!(op["parameters"][0]["required"], true);
        assert_eq!(op["responses"]["200"]["description"], "Response body");
        assert!(op.get("requestBody").is_none());
    }
}
