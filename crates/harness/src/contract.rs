//! API contract loading and request/response validation.
//!
//! The contract is an OpenAPI 3 document (YAML or JSON) restricted to the
//! features the vendor API uses:
//!
//! - `paths` with `{param}` templates and path-level `parameters`
//! - per-operation `operationId`, `parameters` (`in: path | query | header`),
//!   `requestBody` with an `application/json` schema, `responses` keyed by
//!   status and `security`
//! - document-level `security` as the fallback for operations without one
//! - `components.schemas`, referenced as `#/components/schemas/<Name>`
//!
//! Every schema is compiled once at load time. [`ApiContract::match_request`]
//! is the request gate: it resolves the operation and validates parameters
//! and body before anything else looks at the request.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    path::Path,
};

use jsonschema::{ValidationError, Validator};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::{HarnessError, HarnessResult};

const BUNDLED_CONTRACT: &str = include_str!("../contracts/vendor-api.yaml");

const COMPONENT_PREFIX: &str = "#/components/schemas/";
const DEFS_PREFIX: &str = "#/$defs/";
const MAX_RECEIVED_LEN: usize = 120;

// ── Document model ──────────────────────────────────────────────────────

type SecurityRequirement = BTreeMap<String, Vec<String>>;

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    paths: BTreeMap<String, PathItem>,
    #[serde(default)]
    components: Components,
    #[serde(default)]
    security: Vec<SecurityRequirement>,
}

#[derive(Debug, Default, Deserialize)]
struct Components {
    #[serde(default)]
    schemas: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct PathItem {
    #[serde(default)]
    parameters: Vec<ParameterSpec>,
    get: Option<OperationSpec>,
    put: Option<OperationSpec>,
    post: Option<OperationSpec>,
    delete: Option<OperationSpec>,
    patch: Option<OperationSpec>,
    head: Option<OperationSpec>,
    options: Option<OperationSpec>,
}

impl PathItem {
    fn into_operations(self) -> (Vec<ParameterSpec>, Vec<(&'static str, OperationSpec)>) {
        let operations = [
            ("GET", self.get),
            ("PUT", self.put),
            ("POST", self.post),
            ("DELETE", self.delete),
            ("PATCH", self.patch),
            ("HEAD", self.head),
            ("OPTIONS", self.options),
        ]
        .into_iter()
        .filter_map(|(method, spec)| spec.map(|spec| (method, spec)))
        .collect();
        (self.parameters, operations)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationSpec {
    operation_id: String,
    #[serde(default)]
    parameters: Vec<ParameterSpec>,
    request_body: Option<RequestBodySpec>,
    #[serde(default)]
    responses: BTreeMap<String, ResponseSpec>,
    security: Option<Vec<SecurityRequirement>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ParameterSpec {
    name: String,
    #[serde(rename = "in")]
    location: ParamLocation,
    #[serde(default)]
    required: bool,
    schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RequestBodySpec {
    #[serde(default)]
    required: bool,
    #[serde(default)]
    content: BTreeMap<String, MediaTypeSpec>,
}

#[derive(Debug, Deserialize)]
struct ResponseSpec {
    #[serde(default)]
    content: BTreeMap<String, MediaTypeSpec>,
}

#[derive(Debug, Deserialize)]
struct MediaTypeSpec {
    schema: Option<Value>,
}

/// Where a parameter is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    /// A `{name}` path template segment.
    Path,
    /// A query string pair.
    Query,
    /// A request header.
    Header,
}

impl fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path => f.write_str("path"),
            Self::Query => f.write_str("query"),
            Self::Header => f.write_str("header"),
        }
    }
}

// ── Compiled contract ───────────────────────────────────────────────────

/// Authentication an operation demands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Security {
    /// No credentials needed.
    Anonymous,
    /// A bearer token granting every listed scope.
    Bearer {
        /// Union of the scopes named by the operation's security requirements.
        scopes: BTreeSet<String>,
    },
}

/// An inbound request resolved to a contract operation and validated.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedOperation {
    /// The operation's `operationId`.
    pub operation_id: String,
    /// The matched path template, e.g. `/users/{uid}`.
    pub path_template: String,
    /// Path parameters, coerced to their declared types.
    pub path_params: BTreeMap<String, Value>,
    /// Query parameters, coerced to their declared types.
    pub query: BTreeMap<String, Value>,
    /// Decoded JSON body, when the operation declares one.
    pub body: Option<Value>,
    /// Authentication the operation demands.
    pub security: Security,
}

struct CompiledSchema {
    schema: Value,
    validator: Validator,
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema").field("schema", &self.schema).finish_non_exhaustive()
    }
}

impl CompiledSchema {
    fn violations(&self, location: &str, instance: &Value) -> Vec<String> {
        self.validator
            .iter_errors(instance)
            .map(|error| describe_violation(location, &self.schema, &error))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Primitive {
    String,
    Integer,
    Number,
    Boolean,
}

#[derive(Debug)]
struct Parameter {
    name: String,
    location: ParamLocation,
    required: bool,
    primitive: Primitive,
    schema: Option<CompiledSchema>,
}

#[derive(Debug)]
struct Operation {
    id: String,
    parameters: Vec<Parameter>,
    body_required: bool,
    body_schema: Option<CompiledSchema>,
    responses: BTreeMap<String, Option<CompiledSchema>>,
    security: Security,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug)]
struct Route {
    template: String,
    segments: Vec<Segment>,
    methods: BTreeMap<&'static str, usize>,
}

impl Route {
    /// Binds path parameters if `segments` fits this template.
    fn bind<'p>(&self, segments: &[&'p str]) -> Option<BTreeMap<String, &'p str>> {
        if segments.len() != self.segments.len() {
            return None;
        }
        let mut bound = BTreeMap::new();
        for (template, actual) in self.segments.iter().zip(segments) {
            match template {
                Segment::Literal(literal) if literal.as_str() == *actual => {},
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    bound.insert(name.clone(), *actual);
                },
            }
        }
        Some(bound)
    }

    /// Ordering key: literal segments sort before parameters, position by position.
    fn specificity(&self) -> Vec<bool> {
        self.segments.iter().map(|s| matches!(s, Segment::Param(_))).collect()
    }
}

/// A loaded, compiled API contract.
///
/// # Example
///
/// ```
/// use std::collections::BTreeMap;
/// use vendorsim_harness::ApiContract;
///
/// let contract = ApiContract::bundled()?;
/// let matched = contract.match_request(
///     "POST",
///     "/login",
///     None,
///     &BTreeMap::new(),
///     br#"{"username": "admin", "password": "adminPassword"}"#,
/// )?;
/// assert_eq!(matched.operation_id, "login");
/// # Ok::<(), vendorsim_harness::HarnessError>(())
/// ```
#[derive(Debug)]
pub struct ApiContract {
    routes: Vec<Route>,
    operations: Vec<Operation>,
    by_id: HashMap<String, usize>,
    declared_scopes: BTreeSet<String>,
}

impl ApiContract {
    /// Parses the contract bundled with this crate.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ContractLoad`] if the bundled document is invalid.
    pub fn bundled() -> HarnessResult<Self> {
        Self::from_yaml_str(BUNDLED_CONTRACT)
    }

    /// Reads a contract file. Files ending in `.json` are parsed as JSON,
    /// anything else as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ContractLoad`] if the file cannot be read,
    /// parsed or compiled.
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let document = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::contract_load_with_source(format!("cannot read {}", path.display()), e)
        })?;
        let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json { Self::from_json_str(&document) } else { Self::from_yaml_str(&document) }
    }

    /// Parses a YAML contract.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ContractLoad`] if the document is invalid.
    pub fn from_yaml_str(document: &str) -> HarnessResult<Self> {
        let document: Document = serde_yaml::from_str(document)
            .map_err(|e| HarnessError::contract_load_with_source("invalid YAML contract", e))?;
        Self::compile(document)
    }

    /// Parses a JSON contract.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ContractLoad`] if the document is invalid.
    pub fn from_json_str(document: &str) -> HarnessResult<Self> {
        let document: Document = serde_json::from_str(document)
            .map_err(|e| HarnessError::contract_load_with_source("invalid JSON contract", e))?;
        Self::compile(document)
    }

    fn compile(document: Document) -> HarnessResult<Self> {
        let defs = rewrite_refs(Value::Object(document.components.schemas));
        let compiler = SchemaCompiler { defs: &defs };

        let mut routes: Vec<Route> = Vec::new();
        let mut operations = Vec::new();
        let mut by_id = HashMap::new();
        let mut declared_scopes = BTreeSet::new();

        for (template, item) in document.paths {
            let segments = parse_template(&template)?;
            let (shared_params, specs) = item.into_operations();
            let mut methods = BTreeMap::new();

            for (method, spec) in specs {
                let requirements = spec.security.as_ref().unwrap_or(&document.security);
                let security = security_of(requirements);
                if let Security::Bearer { scopes } = &security {
                    declared_scopes.extend(scopes.iter().cloned());
                }

                let operation =
                    compiler.operation(&template, &segments, &shared_params, spec, security)?;
                if by_id.insert(operation.id.clone(), operations.len()).is_some() {
                    return Err(HarnessError::contract_load(format!(
                        "duplicate operationId '{}'",
                        operation.id
                    )));
                }
                methods.insert(method, operations.len());
                operations.push(operation);
            }

            routes.push(Route { template, segments, methods });
        }

        routes.sort_by_key(Route::specificity);
        Ok(Self { routes, operations, by_id, declared_scopes })
    }

    /// All operation ids, in contract path order.
    pub fn operation_ids(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().map(|op| op.id.as_str())
    }

    /// Every scope named by any operation's security requirements.
    #[must_use]
    pub fn declared_scopes(&self) -> &BTreeSet<String> {
        &self.declared_scopes
    }

    /// Authentication demanded by `operation_id`, if the operation exists.
    #[must_use]
    pub fn security(&self, operation_id: &str) -> Option<&Security> {
        self.by_id.get(operation_id).map(|&index| &self.operations[index].security)
    }

    /// Resolves and validates an inbound request.
    ///
    /// `path` is relative to the API base path; `headers` must have
    /// lower-cased names. Literal path segments take precedence over
    /// template parameters.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::SchemaViolation`] listing every problem found
    /// when no operation matches, a parameter is missing or invalid, an
    /// undeclared query parameter is present, or the body is missing, not
    /// JSON, or does not match its schema.
    pub fn match_request(
        &self,
        method: &str,
        path: &str,
        query: Option<&str>,
        headers: &BTreeMap<String, Vec<String>>,
        body: &[u8],
    ) -> HarnessResult<MatchedOperation> {
        let method = method.to_ascii_uppercase();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let candidates: Vec<(&Route, BTreeMap<String, &str>)> = self
            .routes
            .iter()
            .filter_map(|route| route.bind(&segments).map(|bound| (route, bound)))
            .collect();

        let Some((route, raw_path_params, index)) = candidates.iter().find_map(|(route, bound)| {
            route.methods.get(method.as_str()).map(|&index| (*route, bound, index))
        }) else {
            let label = format!("{method} {path}");
            // Every template that fits the path contributes its methods.
            let allowed: BTreeSet<&str> =
                candidates.iter().flat_map(|(route, _)| route.methods.keys().copied()).collect();
            let violation = if allowed.is_empty() {
                format!("path: expected a path declared by the contract, received {path}")
            } else {
                format!(
                    "method: expected one of [{}], received {method}",
                    allowed.into_iter().collect::<Vec<_>>().join(", ")
                )
            };
            return Err(HarnessError::schema_violation(label, vec![violation]));
        };

        let operation = &self.operations[index];
        let mut violations = Vec::new();

        let query_pairs = parse_query(query, &mut violations);
        let mut path_params = BTreeMap::new();
        let mut query_params = BTreeMap::new();

        for parameter in &operation.parameters {
            let raw = match parameter.location {
                ParamLocation::Path => raw_path_params.get(&parameter.name).copied(),
                ParamLocation::Query => query_pairs.get(&parameter.name).map(String::as_str),
                ParamLocation::Header => headers
                    .get(&parameter.name.to_ascii_lowercase())
                    .and_then(|values| values.first())
                    .map(String::as_str),
            };
            let location = format!("{}.{}", parameter.location, parameter.name);

            let Some(raw) = raw else {
                if parameter.required {
                    violations.push(format!("{location}: expected a value, received nothing"));
                }
                continue;
            };

            let value = coerce(raw, parameter.primitive);
            if let Some(schema) = &parameter.schema {
                violations.extend(schema.violations(&location, &value));
            }
            match parameter.location {
                ParamLocation::Path => {
                    path_params.insert(parameter.name.clone(), value);
                },
                ParamLocation::Query => {
                    query_params.insert(parameter.name.clone(), value);
                },
                ParamLocation::Header => {},
            }
        }

        for (name, value) in &query_pairs {
            let declared = operation
                .parameters
                .iter()
                .any(|p| p.location == ParamLocation::Query && &p.name == name);
            if !declared {
                violations.push(format!(
                    "query.{name}: expected no such parameter, received {}",
                    truncate(&Value::String(value.clone()).to_string())
                ));
            }
        }

        let decoded_body = operation.decode_body(body, &mut violations);

        if !violations.is_empty() {
            return Err(HarnessError::schema_violation(&operation.id, violations));
        }

        Ok(MatchedOperation {
            operation_id: operation.id.clone(),
            path_template: route.template.clone(),
            path_params,
            query: query_params,
            body: decoded_body,
            security: operation.security.clone(),
        })
    }

    /// Checks a response body against the schema declared for `status`.
    ///
    /// Statuses without a declared schema (and undeclared statuses with no
    /// `default` response) are not checked.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ResponseViolation`] if the body does not match,
    /// or [`HarnessError::BackendFault`] if `operation_id` is unknown.
    pub fn validate_response(
        &self,
        operation_id: &str,
        status: u16,
        body: &Value,
    ) -> HarnessResult<()> {
        let operation = self
            .by_id
            .get(operation_id)
            .map(|&index| &self.operations[index])
            .ok_or_else(|| {
                HarnessError::backend_fault(format!("unknown operation '{operation_id}'"))
            })?;

        let schema = operation
            .responses
            .get(&status.to_string())
            .or_else(|| operation.responses.get("default"))
            .and_then(Option::as_ref);
        let Some(schema) = schema else {
            return Ok(());
        };

        let violations = schema.violations("response", body);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::response_violation(operation_id, status, violations))
        }
    }
}

impl Operation {
    fn decode_body(&self, raw: &[u8], violations: &mut Vec<String>) -> Option<Value> {
        if self.body_schema.is_none() && !self.body_required {
            return None;
        }
        if raw.iter().all(u8::is_ascii_whitespace) {
            if self.body_required {
                violations.push("body: expected a JSON document, received nothing".to_owned());
            }
            return None;
        }
        let value: Value = match serde_json::from_slice(raw) {
            Ok(value) => value,
            Err(e) => {
                violations.push(format!(
                    "body: expected a JSON document, received {} bytes that do not parse ({e})",
                    raw.len()
                ));
                return None;
            },
        };
        if let Some(schema) = &self.body_schema {
            violations.extend(schema.violations("body", &value));
        }
        Some(value)
    }
}

// ── Compilation helpers ─────────────────────────────────────────────────

struct SchemaCompiler<'a> {
    defs: &'a Value,
}

impl SchemaCompiler<'_> {
    fn compile(&self, location: &str, schema: Value) -> HarnessResult<CompiledSchema> {
        let schema = json!({ "$defs": self.defs, "allOf": [rewrite_refs(schema)] });
        let validator = Validator::new(&schema).map_err(|e| {
            HarnessError::contract_load(format!("{location}: invalid schema: {e}"))
        })?;
        Ok(CompiledSchema { schema, validator })
    }

    fn primitive(&self, schema: Option<&Value>) -> Primitive {
        let mut current = schema;
        // Follows at most a short chain of references to find a `type`.
        for _ in 0..8 {
            let Some(schema) = current else { break };
            if let Some(kind) = schema.get("type").and_then(Value::as_str) {
                return match kind {
                    "integer" => Primitive::Integer,
                    "number" => Primitive::Number,
                    "boolean" => Primitive::Boolean,
                    _ => Primitive::String,
                };
            }
            current = schema
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix(COMPONENT_PREFIX))
                .and_then(|name| self.defs.get(name));
        }
        Primitive::String
    }

    fn operation(
        &self,
        template: &str,
        segments: &[Segment],
        shared: &[ParameterSpec],
        spec: OperationSpec,
        security: Security,
    ) -> HarnessResult<Operation> {
        let id = spec.operation_id;

        let mut merged: Vec<ParameterSpec> = shared.to_vec();
        for parameter in spec.parameters {
            merged.retain(|p| !(p.name == parameter.name && p.location == parameter.location));
            merged.push(parameter);
        }

        for segment in segments {
            if let Segment::Param(name) = segment
                && !merged.iter().any(|p| p.location == ParamLocation::Path && &p.name == name)
            {
                return Err(HarnessError::contract_load(format!(
                    "{id}: path parameter '{name}' of {template} is not declared"
                )));
            }
        }

        let mut parameters = Vec::with_capacity(merged.len());
        for spec in merged {
            let location = format!("{id} {}.{}", spec.location, spec.name);
            let primitive = self.primitive(spec.schema.as_ref());
            let schema = spec.schema.map(|s| self.compile(&location, s)).transpose()?;
            parameters.push(Parameter {
                // Path parameters are always required.
                required: spec.required || spec.location == ParamLocation::Path,
                name: spec.name,
                location: spec.location,
                primitive,
                schema,
            });
        }

        let (body_required, body_schema) = match spec.request_body {
            Some(mut body) => {
                let schema = body
                    .content
                    .remove("application/json")
                    .and_then(|media| media.schema)
                    .map(|s| self.compile(&format!("{id} body"), s))
                    .transpose()?;
                (body.required, schema)
            },
            None => (false, None),
        };

        let mut responses = BTreeMap::new();
        for (status, mut response) in spec.responses {
            let schema = response
                .content
                .remove("application/json")
                .and_then(|media| media.schema)
                .map(|s| self.compile(&format!("{id} response {status}"), s))
                .transpose()?;
            responses.insert(status, schema);
        }

        Ok(Operation {
            id,
            parameters,
            body_required,
            body_schema,
            responses,
            security,
        })
    }
}

fn parse_template(template: &str) -> HarnessResult<Vec<Segment>> {
    if !template.starts_with('/') {
        return Err(HarnessError::contract_load(format!("path {template:?} must start with '/'")));
    }
    template
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some("") => Err(HarnessError::contract_load(format!(
                "path {template:?} has an unnamed parameter"
            ))),
            Some(name) => Ok(Segment::Param(name.to_owned())),
            None => Ok(Segment::Literal(segment.to_owned())),
        })
        .collect()
}

/// Anonymous when there are no requirements or one of them is empty (`{}`).
fn security_of(requirements: &[SecurityRequirement]) -> Security {
    if requirements.is_empty() || requirements.iter().any(BTreeMap::is_empty) {
        return Security::Anonymous;
    }
    let scopes = requirements.iter().flat_map(|r| r.values().flatten().cloned()).collect();
    Security::Bearer { scopes }
}

/// Points component references at the `$defs` block of a compiled schema.
fn rewrite_refs(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| match (key.as_str(), value) {
                    ("$ref", Value::String(target)) => {
                        let target = match target.strip_prefix(COMPONENT_PREFIX) {
                            Some(name) => format!("{DEFS_PREFIX}{name}"),
                            None => target,
                        };
                        (key, Value::String(target))
                    },
                    (_, value) => (key, rewrite_refs(value)),
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(rewrite_refs).collect()),
        other => other,
    }
}

fn parse_query(query: Option<&str>, violations: &mut Vec<String>) -> BTreeMap<String, String> {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return BTreeMap::new();
    };
    let pairs: Vec<(String, String)> = match serde_urlencoded::from_str(query) {
        Ok(pairs) => pairs,
        Err(e) => {
            violations.push(format!("query: expected a URL-encoded query string, received {e}"));
            return BTreeMap::new();
        },
    };
    let mut map = BTreeMap::new();
    for (name, value) in pairs {
        if map.contains_key(&name) {
            violations.push(format!("query.{name}: expected a single value, received several"));
            continue;
        }
        map.insert(name, value);
    }
    map
}

/// Converts a raw parameter string to its declared primitive type.
///
/// Unparseable values stay strings so schema validation reports them.
fn coerce(raw: &str, primitive: Primitive) -> Value {
    let parsed = match primitive {
        Primitive::Integer => raw.parse::<i64>().ok().map(Value::from),
        Primitive::Number => {
            raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64).map(Value::Number)
        },
        Primitive::Boolean => match raw {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        Primitive::String => None,
    };
    parsed.unwrap_or_else(|| Value::String(raw.to_owned()))
}

// ── Violation formatting ────────────────────────────────────────────────

fn describe_violation(location: &str, schema: &Value, error: &ValidationError<'_>) -> String {
    let instance_path = error.instance_path.to_string();
    let schema_path = error.schema_path.to_string();
    let keyword = schema_path.rsplit('/').next().unwrap_or_default();

    let expected = match constraint_at(schema, &schema_path) {
        Some(Value::String(constraint)) => format!("{keyword} {constraint}"),
        Some(constraint) => format!("{keyword} {}", truncate(&constraint.to_string())),
        None => format!("{keyword} ({error})"),
    };
    let location = format!("{location}{}", instance_path.replace('/', "."));
    format!("{location}: expected {expected}, received {}", truncate(&error.instance.to_string()))
}

/// Walks a keyword location through the schema, following `$ref` hops.
fn constraint_at<'a>(root: &'a Value, schema_path: &str) -> Option<&'a Value> {
    let mut current = root;
    for raw in schema_path.split('/').skip(1) {
        let segment = raw.replace("~1", "/").replace("~0", "~");
        current = if segment == "$ref" {
            let target = current.get("$ref")?.as_str()?.strip_prefix('#')?;
            root.pointer(target)?
        } else {
            match current {
                Value::Object(map) => map.get(&segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            }
        };
    }
    Some(current)
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_RECEIVED_LEN {
        return text.to_owned();
    }
    let mut short: String = text.chars().take(MAX_RECEIVED_LEN).collect();
    short.push('…');
    short
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn bundled() -> ApiContract {
        ApiContract::bundled().unwrap()
    }

    fn no_headers() -> BTreeMap<String, Vec<String>> {
        BTreeMap::new()
    }

    fn violations(result: HarnessResult<MatchedOperation>) -> Vec<String> {
        match result {
            Err(HarnessError::SchemaViolation { violations, .. }) => violations,
            other => panic!("expected SchemaViolation, got {other:?}"),
        }
    }

    #[test]
    fn test_bundled_contract_compiles() {
        let contract = bundled();
        assert_eq!(contract.operation_ids().count(), 48);
        assert!(contract.declared_scopes().contains("filesystems:write"));
        assert_eq!(contract.security("login"), Some(&Security::Anonymous));
        assert_eq!(
            contract.security("createOrganization"),
            Some(&Security::Bearer { scopes: ["organizations:write".to_owned()].into() })
        );
    }

    #[test]
    fn test_literal_segment_beats_template() {
        let contract = bundled();
        let matched = contract
            .match_request("GET", "/organizations/multipleOrgExist", None, &no_headers(), b"")
            .unwrap();
        assert_eq!(matched.operation_id, "getMultipleOrgExist");

        let matched =
            contract.match_request("GET", "/organizations/abc", None, &no_headers(), b"").unwrap();
        assert_eq!(matched.operation_id, "getOrganization");
        assert_eq!(matched.path_params["uid"], json!("abc"));
        assert_eq!(matched.path_template, "/organizations/{uid}");
    }

    #[test]
    fn test_users_whoami_not_captured_by_uid_template() {
        let matched =
            bundled().match_request("GET", "/users/whoami", None, &no_headers(), b"").unwrap();
        assert_eq!(matched.operation_id, "whoAmI");
    }

    #[test]
    fn test_unknown_path_rejected() {
        let found = violations(bundled().match_request("GET", "/nope", None, &no_headers(), b""));
        assert_eq!(found, vec!["path: expected a path declared by the contract, received /nope"]);
    }

    #[test]
    fn test_wrong_method_lists_allowed() {
        let found =
            violations(bundled().match_request("PATCH", "/containers", None, &no_headers(), b""));
        assert_eq!(found, vec!["method: expected one of [GET, POST], received PATCH"]);
    }

    #[test]
    fn test_wrong_method_lists_allowed_across_templates() {
        // `/users/whoami` fits both the literal route and `/users/{uid}`.
        let found =
            violations(bundled().match_request("PATCH", "/users/whoami", None, &no_headers(), b""));
        assert_eq!(found, vec!["method: expected one of [DELETE, GET, PUT], received PATCH"]);
    }

    #[test]
    fn test_query_boolean_coerced() {
        let matched = bundled()
            .match_request("GET", "/fileSystems", Some("force_fresh=true"), &no_headers(), b"")
            .unwrap();
        assert_eq!(matched.query["force_fresh"], json!(true));
    }

    #[rstest]
    #[case::not_boolean("force_fresh=maybe", "query.force_fresh: expected type boolean")]
    #[case::unknown("verbose=1", "query.verbose: expected no such parameter")]
    #[case::repeated(
        "force_fresh=true&force_fresh=false",
        "query.force_fresh: expected a single value"
    )]
    fn test_query_violations(#[case] query: &str, #[case] prefix: &str) {
        let found = violations(bundled().match_request(
            "GET",
            "/fileSystems",
            Some(query),
            &no_headers(),
            b"",
        ));
        assert!(found.iter().any(|v| v.starts_with(prefix)), "{found:?}");
    }

    #[test]
    fn test_path_parameter_pattern_enforced() {
        let found = violations(bundled().match_request(
            "GET",
            "/s3/buckets/UPPER_case/policy",
            None,
            &no_headers(),
            b"",
        ));
        assert!(found[0].starts_with("path.bucket: expected pattern"), "{found:?}");
    }

    #[test]
    fn test_missing_required_body() {
        let found = violations(bundled().match_request("POST", "/login", None, &no_headers(), b""));
        assert_eq!(found, vec!["body: expected a JSON document, received nothing"]);
    }

    #[test]
    fn test_non_json_body() {
        let found =
            violations(bundled().match_request("POST", "/login", None, &no_headers(), b"user=x"));
        assert!(found[0].starts_with("body: expected a JSON document, received 6 bytes"));
    }

    #[test]
    fn test_body_schema_violation_names_field() {
        let found = violations(bundled().match_request(
            "POST",
            "/users",
            None,
            &no_headers(),
            br#"{"username": "u", "password": "p", "role": "Boss"}"#,
        ));
        assert_eq!(found.len(), 1, "{found:?}");
        assert!(found[0].starts_with("body.role: expected enum"), "{found:?}");
        assert!(found[0].ends_with("received \"Boss\""), "{found:?}");
    }

    #[test]
    fn test_body_missing_required_field() {
        let found = violations(bundled().match_request(
            "POST",
            "/login",
            None,
            &no_headers(),
            br#"{"username": "admin"}"#,
        ));
        assert!(found[0].starts_with("body: expected required"), "{found:?}");
    }

    #[test]
    fn test_valid_body_decoded() {
        let matched = bundled()
            .match_request(
                "POST",
                "/s3/buckets",
                None,
                &no_headers(),
                br#"{"bucket_name": "logs-2024", "hard_quota": "10GB"}"#,
            )
            .unwrap();
        assert_eq!(matched.body.unwrap()["hard_quota"], json!("10GB"));
        assert_eq!(matched.security, Security::Bearer { scopes: ["s3:write".to_owned()].into() });
    }

    #[test]
    fn test_response_validation() {
        let contract = bundled();
        let healthy = json!({"data": {"name": "c", "status": "OK", "guid": "g"}});
        assert!(contract.validate_response("getClusterStatus", 200, &healthy).is_ok());

        let result = contract.validate_response("getClusterStatus", 200, &json!({"data": {}}));
        assert!(matches!(result, Err(HarnessError::ResponseViolation { status: 200, .. })));

        // Undeclared status is not checked.
        assert!(contract.validate_response("getClusterStatus", 418, &json!("teapot")).is_ok());
    }

    #[test]
    fn test_document_security_fallback_and_optional_auth() {
        let contract = ApiContract::from_yaml_str(
            r"
openapi: 3.1.0
security:
  - bearerAuth: [widgets:read]
paths:
  /widgets:
    get:
      operationId: listWidgets
      responses: {}
  /public:
    get:
      operationId: publicInfo
      security: [{}, {bearerAuth: [x:y]}]
      responses: {}
",
        )
        .unwrap();
        assert_eq!(
            contract.security("listWidgets"),
            Some(&Security::Bearer { scopes: ["widgets:read".to_owned()].into() })
        );
        assert_eq!(contract.security("publicInfo"), Some(&Security::Anonymous));
    }

    #[test]
    fn test_json_contract_and_header_parameter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contract.json");
        std::fs::write(
            &path,
            json!({
                "openapi": "3.1.0",
                "paths": {
                    "/items/{id}": {
                        "get": {
                            "operationId": "getItem",
                            "parameters": [
                                {"name": "id", "in": "path", "required": true, "schema": {"type": "integer", "minimum": 1}},
                                {"name": "X-Tenant", "in": "header", "required": true, "schema": {"type": "string"}}
                            ],
                            "responses": {}
                        }
                    }
                }
            })
            .to_string(),
        )
        .unwrap();
        let contract = ApiContract::load(&path).unwrap();

        let headers: BTreeMap<String, Vec<String>> =
            [("x-tenant".to_owned(), vec!["t1".to_owned()])].into();
        let matched = contract.match_request("get", "/items/7", None, &headers, b"").unwrap();
        assert_eq!(matched.path_params["id"], json!(7));

        let found = violations(contract.match_request("GET", "/items/0", None, &no_headers(), b""));
        assert_eq!(found.len(), 2, "{found:?}");
        assert!(found.iter().any(|v| v.starts_with("path.id: expected minimum 1")));
        assert!(found.iter().any(|v| v == "header.X-Tenant: expected a value, received nothing"));
    }

    #[rstest]
    #[case::duplicate_operation_id(
        "paths:\n  /a:\n    get: {operationId: x}\n  /b:\n    get: {operationId: x}\n"
    )]
    #[case::undeclared_path_param("paths:\n  /a/{id}:\n    get: {operationId: x}\n")]
    #[case::invalid_schema(
        "paths:\n  /a:\n    post:\n      operationId: x\n      requestBody:\n        content:\n          application/json:\n            schema: {type: 12}\n"
    )]
    #[case::not_yaml("paths: [unterminated")]
    fn test_invalid_contracts_rejected(#[case] document: &str) {
        let result = ApiContract::from_yaml_str(document);
        assert!(matches!(result, Err(HarnessError::ContractLoad { .. })), "{result:?}");
    }

    #[test]
    fn test_missing_contract_file() {
        let result = ApiContract::load(Path::new("/definitely/not/here.yaml"));
        assert!(matches!(result, Err(HarnessError::ContractLoad { .. })));
    }

    #[test]
    fn test_constraint_at_follows_refs() {
        let root = json!({
            "$defs": {"Role": {"enum": ["a", "b"]}},
            "allOf": [{"properties": {"role": {"$ref": "#/$defs/Role"}}}]
        });
        assert_eq!(
            constraint_at(&root, "/allOf/0/properties/role/$ref/enum"),
            Some(&json!(["a", "b"]))
        );
        assert_eq!(constraint_at(&root, "/allOf/0/properties/missing"), None);
    }
}
