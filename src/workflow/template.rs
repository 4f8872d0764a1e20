/// Parameter templates
///
/// Step params are JSON trees where strings may embed `{{...}}` references into
/// the run-time state. They are parsed once into a small AST when a graph is
/// deserialized and resolved by the executor right before each step call.
///
/// Grammar of a reference (dotted path, no code):
/// - `inputs` / `inputs.<field>...`
/// - `context` / `context.<field>...`
/// - `<stepId>.output` / `<stepId>.output.<field>...`
///
/// A reference may carry a default: `{{inputs.limit || 10}}`.
///
/// `{"$literal": <value>}` keeps `<value>` verbatim, braces included.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while parsing template strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unterminated template in '{0}'")]
    Unterminated(String),

    #[error("empty template reference in '{0}'")]
    Empty(String),

    #[error("invalid reference '{0}': expected inputs.<field>, context.<field> or <step>.output.<field>")]
    InvalidReference(String),

    #[error("invalid default value in '{0}'")]
    InvalidDefault(String),
}

/// Root a reference is resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Inputs,
    Context,
    Step(String),
}

/// A dotted path into `inputs`, `context` or a step's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValueRef {
    pub scope: Scope,
    pub path: Vec<String>,
}

/// Read-only view of the state a reference is resolved against.
#[derive(Debug, Clone, Copy)]
pub struct ResolveScope<'a> {
    pub inputs: &'a Value,
    pub outputs: &'a Map<String, Value>,
    pub context: &'a Map<String, Value>,
}

impl ValueRef {
    pub fn inputs(path: &str) -> Self {
        Self {
            scope: Scope::Inputs,
            path: split_path(path),
        }
    }

    pub fn context(path: &str) -> Self {
        Self {
            scope: Scope::Context,
            path: split_path(path),
        }
    }

    pub fn step_output(step_id: impl Into<String>, path: &str) -> Self {
        Self {
            scope: Scope::Step(step_id.into()),
            path: split_path(path),
        }
    }

    /// Parse `inputs.a.b`, `context.x` or `step-id.output.field`.
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let text = text.trim();
        let invalid = || TemplateError::InvalidReference(text.to_string());

        if text.is_empty() {
            return Err(invalid());
        }

        let parts: Vec<&str> = text.split('.').collect();
        if parts
            .iter()
            .any(|p| p.is_empty() || p.chars().any(|c| c.is_whitespace() || c == '{' || c == '}'))
        {
            return Err(invalid());
        }

        let owned = |rest: &[&str]| rest.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        match parts[0] {
            "inputs" => Ok(Self {
                scope: Scope::Inputs,
                path: owned(&parts[1..]),
            }),
            "context" => Ok(Self {
                scope: Scope::Context,
                path: owned(&parts[1..]),
            }),
            step => {
                if parts.get(1) != Some(&"output") {
                    return Err(invalid());
                }
                Ok(Self {
                    scope: Scope::Step(step.to_string()),
                    path: owned(&parts[2..]),
                })
            }
        }
    }

    /// Step id this reference reads from, if it targets a step output.
    pub fn step_id(&self) -> Option<&str> {
        match &self.scope {
            Scope::Step(id) => Some(id),
            _ => None,
        }
    }

    /// Look the reference up. `None` when any segment is missing.
    pub fn resolve(&self, scope: &ResolveScope<'_>) -> Option<Value> {
        let root = match &self.scope {
            Scope::Inputs => scope.inputs,
            Scope::Step(id) => scope.outputs.get(id)?,
            Scope::Context => {
                let (first, rest) = match self.path.split_first() {
                    Some(split) => split,
                    None => return Some(Value::Object(scope.context.clone())),
                };
                return walk(scope.context.get(first)?, rest).cloned();
            }
        };
        walk(root, &self.path).cloned()
    }
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Inputs => write!(f, "inputs")?,
            Scope::Context => write!(f, "context")?,
            Scope::Step(id) => write!(f, "{}.output", id)?,
        }
        for segment in &self.path {
            write!(f, ".{}", segment)?;
        }
        Ok(())
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn walk<'v>(mut current: &'v Value, path: &[String]) -> Option<&'v Value> {
    for segment in path {
        current = match current {
            Value::Object(obj) => obj.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// One piece of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Ref {
        reference: ValueRef,
        default: Option<Value>,
    },
}

/// Parsed parameter expression.
///
/// Serialized back to the plain JSON form (`"{{inputs.data}}"`, nested
/// objects, arrays) so stored definitions stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ParamExpr {
    /// null, bool, number or a string without references.
    Literal(Value),
    /// A string that is exactly one reference; resolves to the referenced JSON value.
    Ref {
        reference: ValueRef,
        default: Option<Value>,
    },
    /// A string mixing text and references; resolves to a string.
    Interpolate(Vec<Segment>),
    Object(BTreeMap<String, ParamExpr>),
    List(Vec<ParamExpr>),
}

/// Wrapper key for a literal that must not be read as a template.
const LITERAL_KEY: &str = "$literal";

/// Named step parameters.
pub type Params = BTreeMap<String, ParamExpr>;

impl ParamExpr {
    /// A value taken as-is. Any `{{...}}` inside stays text.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn reference(reference: ValueRef) -> Self {
        Self::Ref {
            reference,
            default: None,
        }
    }

    pub fn input(path: &str) -> Self {
        Self::reference(ValueRef::inputs(path))
    }

    pub fn step_output(step_id: &str, path: &str) -> Self {
        Self::reference(ValueRef::step_output(step_id, path))
    }

    /// Attach a fallback used when a `Ref` resolves to nothing.
    pub fn or_default(self, fallback: impl Into<Value>) -> Self {
        match self {
            Self::Ref { reference, .. } => Self::Ref {
                reference,
                default: Some(fallback.into()),
            },
            other => other,
        }
    }

    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, ParamExpr)>,
        K: Into<String>,
    {
        Self::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Parse a raw JSON tree, turning `{{...}}` strings into references.
    pub fn parse_value(value: Value) -> Result<Self, TemplateError> {
        match value {
            Value::String(s) => parse_string(&s),
            Value::Array(items) => Ok(Self::List(
                items
                    .into_iter()
                    .map(Self::parse_value)
                    .collect::<Result<_, _>>()?,
            )),
            Value::Object(mut map) if map.len() == 1 && map.contains_key(LITERAL_KEY) => {
                Ok(Self::Literal(map.remove(LITERAL_KEY).unwrap_or(Value::Null)))
            }
            Value::Object(map) => Ok(Self::Object(
                map.into_iter()
                    .map(|(k, v)| Ok((k, Self::parse_value(v)?)))
                    .collect::<Result<_, TemplateError>>()?,
            )),
            other => Ok(Self::Literal(other)),
        }
    }

    /// Every reference in this expression, depth first.
    pub fn references(&self) -> Vec<&ValueRef> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a ValueRef>) {
        match self {
            Self::Literal(_) => {}
            Self::Ref { reference, .. } => out.push(reference),
            Self::Interpolate(segments) => {
                for segment in segments {
                    if let Segment::Ref { reference, .. } = segment {
                        out.push(reference);
                    }
                }
            }
            Self::Object(fields) => fields.values().for_each(|v| v.collect_refs(out)),
            Self::List(items) => items.iter().for_each(|v| v.collect_refs(out)),
        }
    }

    /// Resolve against the current state. Missing references become their
    /// default, or `null`.
    pub fn resolve(&self, scope: &ResolveScope<'_>) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Ref { reference, default } => lookup(reference, default.as_ref(), scope),
            Self::Interpolate(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(text) => out.push_str(text),
                        Segment::Ref { reference, default } => {
                            match lookup(reference, default.as_ref(), scope) {
                                Value::Null => {}
                                Value::String(s) => out.push_str(&s),
                                other => out.push_str(&other.to_string()),
                            }
                        }
                    }
                }
                Value::String(out)
            }
            Self::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.resolve(scope)))
                    .collect(),
            ),
            Self::List(items) => Value::Array(items.iter().map(|v| v.resolve(scope)).collect()),
        }
    }
}

/// Resolve a whole parameter map into a JSON object.
pub fn resolve_params(params: &Params, scope: &ResolveScope<'_>) -> Value {
    Value::Object(
        params
            .iter()
            .map(|(k, v)| (k.clone(), v.resolve(scope)))
            .collect(),
    )
}

fn lookup(reference: &ValueRef, default: Option<&Value>, scope: &ResolveScope<'_>) -> Value {
    match reference.resolve(scope) {
        Some(Value::Null) | None => {
            if default.is_none() {
                tracing::debug!("template reference '{}' resolved to null", reference);
            }
            default.cloned().unwrap_or(Value::Null)
        }
        Some(v) => v,
    }
}

fn parse_string(text: &str) -> Result<ParamExpr, TemplateError> {
    if !text.contains("{{") {
        return Ok(ParamExpr::Literal(Value::String(text.to_string())));
    }

    let mut segments = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        if open > 0 {
            segments.push(Segment::Text(rest[..open].to_string()));
        }
        let after = &rest[open + 2..];
        let close = after
            .find("}}")
            .ok_or_else(|| TemplateError::Unterminated(text.to_string()))?;
        segments.push(parse_reference_body(&after[..close], text)?);
        rest = &after[close + 2..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }

    if let [Segment::Ref { reference, default }] = segments.as_slice() {
        return Ok(ParamExpr::Ref {
            reference: reference.clone(),
            default: default.clone(),
        });
    }
    Ok(ParamExpr::Interpolate(segments))
}

fn parse_reference_body(body: &str, whole: &str) -> Result<Segment, TemplateError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(TemplateError::Empty(whole.to_string()));
    }

    let (path, default) = match body.split_once("||") {
        Some((path, fallback)) => (path, Some(parse_default(fallback.trim(), whole)?)),
        None => (body, None),
    };

    Ok(Segment::Ref {
        reference: ValueRef::parse(path)?,
        default,
    })
}

fn parse_default(raw: &str, whole: &str) -> Result<Value, TemplateError> {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return Ok(value);
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Ok(Value::String(raw[1..raw.len() - 1].to_string()));
    }
    Err(TemplateError::InvalidDefault(whole.to_string()))
}

fn render_reference(reference: &ValueRef, default: Option<&Value>) -> String {
    match default {
        Some(fallback) => format!("{{{{{} || {}}}}}", reference, fallback),
        None => format!("{{{{{}}}}}", reference),
    }
}

/// Whether a literal would read back as something else.
fn needs_wrapping(value: &Value) -> bool {
    match value {
        Value::String(s) => s.contains("{{"),
        Value::Array(items) => items.iter().any(needs_wrapping),
        Value::Object(map) => map.contains_key(LITERAL_KEY) || map.values().any(needs_wrapping),
        _ => false,
    }
}

impl TryFrom<Value> for ParamExpr {
    type Error = TemplateError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::parse_value(value)
    }
}

impl From<ParamExpr> for Value {
    fn from(expr: ParamExpr) -> Self {
        match expr {
            ParamExpr::Literal(v) if needs_wrapping(&v) => {
                let mut wrapped = Map::new();
                wrapped.insert(LITERAL_KEY.to_string(), v);
                Value::Object(wrapped)
            }
            ParamExpr::Literal(v) => v,
            ParamExpr::Ref { reference, default } => {
                Value::String(render_reference(&reference, default.as_ref()))
            }
            ParamExpr::Interpolate(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(text) => out.push_str(&text),
                        Segment::Ref { reference, default } => {
                            out.push_str(&render_reference(&reference, default.as_ref()))
                        }
                    }
                }
                Value::String(out)
            }
            ParamExpr::Object(fields) => {
                Value::Object(fields.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            ParamExpr::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
        }
    }
}
