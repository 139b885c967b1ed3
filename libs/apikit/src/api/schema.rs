//! Schema adapters: validation plus the JSON schema used for the API description.
//!
//! A [`Schema`] validates a JSON value and returns its normalized form, which is
//! what the pipeline passes on instead of the raw value. The provided adapters
//! lean on `serde` for normalization, `validator` for field rules and `utoipa`
//! for documentation.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use utoipa::{PartialSchema, ToSchema};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// One field-level problem found by a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Dotted path of the offending value, e.g. `query.name` or `items[2].id`.
    pub path: String,
    pub code: String,
    pub message: String,
}

impl Violation {
    pub fn new(
        path: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    fn nested_under(mut self, prefix: &str) -> Self {
        self.path = join_path(prefix, &self.path);
        self
    }
}

/// JSON schema of a value plus the named component schemas it references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDoc {
    pub root: Value,
    pub components: BTreeMap<String, Value>,
}

pub trait Schema: Send + Sync + 'static {
    /// Returns the normalized value, or every violation found.
    fn validate(&self, value: &Value) -> Result<Value, Vec<Violation>>;

    fn document(&self) -> SchemaDoc;
}

pub type SchemaRef = Arc<dyn Schema>;

fn join_path(prefix: &str, path: &str) -> String {
    match (prefix.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) if path.starts_with('[') => format!("{prefix}{path}"),
        (false, false) => format!("{prefix}.{path}"),
    }
}

// ---------------------------------------------------------------------------
// serde + utoipa
// ---------------------------------------------------------------------------

/// Schema derived from a Rust type: `Deserialize` validates, `Serialize`
/// normalizes and `ToSchema` documents.
pub struct TypedSchema<T>(PhantomData<fn() -> T>);

/// Schema for `T`.
pub fn of<T>() -> SchemaRef
where
    T: DeserializeOwned + Serialize + ToSchema + 'static,
{
    Arc::new(TypedSchema::<T>(PhantomData))
}

fn deserialize<T: DeserializeOwned>(value: &Value) -> Result<T, Vec<Violation>> {
    T::deserialize(value).map_err(|e| vec![Violation::new("", "invalid_type", e.to_string())])
}

fn normalize<T: Serialize>(value: &T) -> Result<Value, Vec<Violation>> {
    serde_json::to_value(value).map_err(|e| vec![Violation::new("", "serialize", e.to_string())])
}

fn document_type<T: ToSchema>() -> SchemaDoc {
    let mut collected = Vec::new();
    T::schemas(&mut collected);

    let components = collected
        .into_iter()
        .filter_map(|(name, schema)| serde_json::to_value(schema).ok().map(|v| (name, v)))
        .collect();
    SchemaDoc {
        root: serde_json::to_value(<T as PartialSchema>::schema()).unwrap_or_else(|_| json!({})),
        components,
    }
}

impl<T> Schema for TypedSchema<T>
where
    T: DeserializeOwned + Serialize + ToSchema + 'static,
{
    fn validate(&self, value: &Value) -> Result<Value, Vec<Violation>> {
        let typed: T = deserialize(value)?;
        normalize(&typed)
    }

    fn document(&self) -> SchemaDoc {
        document_type::<T>()
    }
}

// ---------------------------------------------------------------------------
// serde + validator + utoipa
// ---------------------------------------------------------------------------

/// Like [`TypedSchema`], additionally enforcing `validator` rules.
pub struct ValidatedSchema<T>(PhantomData<fn() -> T>);

/// Schema for `T` that also runs `T::validate()`.
pub fn validated<T>() -> SchemaRef
where
    T: DeserializeOwned + Serialize + ToSchema + Validate + 'static,
{
    Arc::new(ValidatedSchema::<T>(PhantomData))
}

impl<T> Schema for ValidatedSchema<T>
where
    T: DeserializeOwned + Serialize + ToSchema + Validate + 'static,
{
    fn validate(&self, value: &Value) -> Result<Value, Vec<Violation>> {
        let typed: T = deserialize(value)?;
        typed.validate().map_err(|errors| flatten_errors(&errors))?;
        normalize(&typed)
    }

    fn document(&self) -> SchemaDoc {
        document_type::<T>()
    }
}

/// Flattens nested `validator` errors into dotted-path violations, sorted by path.
pub fn flatten_errors(errors: &ValidationErrors) -> Vec<Violation> {
    let mut out = Vec::new();
    collect_errors("", errors, &mut out);
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

fn collect_errors(prefix: &str, errors: &ValidationErrors, out: &mut Vec<Violation>) {
    for (field, kind) in errors.errors() {
        let path = join_path(prefix, field);
        match kind {
            ValidationErrorsKind::Field(list) => {
                for err in list {
                    let message = match &err.message {
                        Some(msg) => msg.to_string(),
                        None => describe_rule(&path, &err.code, &err.params),
                    };
                    out.push(Violation::new(path.clone(), err.code.to_string(), message));
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_errors(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    collect_errors(&format!("{path}[{idx}]"), inner, out);
                }
            }
        }
    }
}

fn describe_rule(
    path: &str,
    code: &str,
    params: &std::collections::HashMap<std::borrow::Cow<'static, str>, Value>,
) -> String {
    let param = |key: &str| params.get(key).map(|v| v.to_string());
    match (code, param("min"), param("max")) {
        ("length", Some(min), None) => format!("{path} must have at least {min} characters"),
        ("length", None, Some(max)) => format!("{path} must have at most {max} characters"),
        ("length", Some(min), Some(max)) => {
            format!("{path} must have between {min} and {max} characters")
        }
        ("range", Some(min), None) => format!("{path} must be at least {min}"),
        ("range", None, Some(max)) => format!("{path} must be at most {max}"),
        ("range", Some(min), Some(max)) => format!("{path} must be between {min} and {max}"),
        ("email", _, _) => format!("{path} must be a valid email address"),
        ("url", _, _) => format!("{path} must be a valid URL"),
        _ => format!("{path} is invalid ({code})"),
    }
}

// ---------------------------------------------------------------------------
// any
// ---------------------------------------------------------------------------

/// Accepts every value unchanged.
pub struct AnySchema;

pub fn any() -> SchemaRef {
    Arc::new(AnySchema)
}

impl Schema for AnySchema {
    fn validate(&self, value: &Value) -> Result<Value, Vec<Violation>> {
        Ok(value.clone())
    }

    fn document(&self) -> SchemaDoc {
        SchemaDoc {
            root: json!({}),
            components: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// envelope
// ---------------------------------------------------------------------------

/// Schema of the standard response envelope around `data`.
pub struct ApiOutputSchema {
    data: SchemaRef,
}

/// Envelope schema: `{meta: {serverTime, error?: {code, details}}, data: <inner>}`.
pub fn api_output(data: SchemaRef) -> SchemaRef {
    Arc::new(ApiOutputSchema { data })
}

impl ApiOutputSchema {
    fn validate_meta(meta: Option<&Value>) -> Result<Value, Vec<Violation>> {
        let Some(Value::Object(meta)) = meta else {
            return Err(vec![Violation::new("meta", "invalid_type", "meta must be an object")]);
        };

        let mut out = Map::new();
        let mut violations = Vec::new();

        match meta.get("serverTime").and_then(Value::as_str) {
            Some(ts) if chrono::DateTime::parse_from_rfc3339(ts).is_ok() => {
                out.insert("serverTime".into(), Value::String(ts.to_string()));
            }
            Some(_) => violations.push(Violation::new(
                "meta.serverTime",
                "invalid_string",
                "serverTime must be an ISO-8601 date-time",
            )),
            None => violations.push(Violation::new(
                "meta.serverTime",
                "required",
                "serverTime is required",
            )),
        }

        match meta.get("error") {
            None | Some(Value::Null) => {}
            Some(Value::Object(err)) if err.get("code").is_some_and(Value::is_string) => {
                out.insert(
                    "error".into(),
                    json!({
                        "code": err["code"],
                        "details": err.get("details").cloned().unwrap_or(Value::Null),
                    }),
                );
            }
            Some(_) => violations.push(Violation::new(
                "meta.error",
                "invalid_type",
                "error must be an object with a string code",
            )),
        }

        if violations.is_empty() {
            Ok(Value::Object(out))
        } else {
            Err(violations)
        }
    }
}

impl Schema for ApiOutputSchema {
    fn validate(&self, value: &Value) -> Result<Value, Vec<Violation>> {
        let Value::Object(obj) = value else {
            return Err(vec![Violation::new("", "invalid_type", "expected an object")]);
        };

        let meta = Self::validate_meta(obj.get("meta"));
        let data = self
            .data
            .validate(obj.get("data").unwrap_or(&Value::Null))
            .map_err(|vs| vs.into_iter().map(|v| v.nested_under("data")).collect::<Vec<_>>());

        match (meta, data) {
            (Ok(meta), Ok(data)) => Ok(json!({ "meta": meta, "data": data })),
            (meta, data) => Err(meta
                .err()
                .into_iter()
                .flatten()
                .chain(data.err().into_iter().flatten())
                .collect()),
        }
    }

    fn document(&self) -> SchemaDoc {
        let inner = self.data.document();
        SchemaDoc {
            root: json!({
                "type": "object",
                "required": ["meta", "data"],
                "properties": {
                    "meta": {
                        "type": "object",
                        "required": ["serverTime"],
                        "properties": {
                            "serverTime": { "type": "string", "format": "date-time" },
                            "error": {
                                "type": "object",
                                "required": ["code"],
                                "properties": {
                                    "code": { "type": "string" },
                                    "details": {}
                                }
                            }
                        }
                    },
                    "data": inner.root
                }
            }),
            components: inner.components,
        }
    }
}
