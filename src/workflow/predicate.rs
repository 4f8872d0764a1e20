/// Guard predicates for conditional edges and condition steps
///
/// A deliberately small expression language over run-time state:
/// `inputs.operation == 'create'`, `check.output.met == true`,
/// `inputs.total >= 100 && !inputs.vip`. Rule conditions stored as JSON
/// (`{field, operator, value}`, `{any: [...]}`) parse into the same AST.

use crate::workflow::template::{ResolveScope, TemplateError, ValueRef};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredicateError {
    #[error("empty predicate")]
    Empty,

    #[error("syntax error in '{0}'")]
    Syntax(String),

    #[error("unsupported operator '{0}'")]
    UnknownOperator(String),

    #[error("unsupported condition shape: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Reference(#[from] TemplateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    In,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Contains => "contains",
            CompareOp::In => "in",
        }
    }

    /// Operator names accepted in the structured JSON form.
    fn from_name(name: &str) -> Option<Self> {
        let op = match name.trim().to_ascii_lowercase().as_str() {
            "==" | "===" | "eq" | "equals" => CompareOp::Eq,
            "!=" | "!==" | "ne" | "not_equals" => CompareOp::Ne,
            ">" | "gt" | "greater_than" => CompareOp::Gt,
            ">=" | "gte" => CompareOp::Ge,
            "<" | "lt" | "less_than" => CompareOp::Lt,
            "<=" | "lte" => CompareOp::Le,
            "contains" => CompareOp::Contains,
            "in" => CompareOp::In,
            _ => return None,
        };
        Some(op)
    }
}

/// Parsed boolean expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Const(bool),
    Truthy(ValueRef),
    Compare {
        left: ValueRef,
        op: CompareOp,
        right: Value,
    },
    Not(Box<Predicate>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

// Longest symbols first so `>=` is not read as `>`.
const SYMBOL_OPS: &[(&str, CompareOp)] = &[
    ("===", CompareOp::Eq),
    ("!==", CompareOp::Ne),
    ("==", CompareOp::Eq),
    ("!=", CompareOp::Ne),
    (">=", CompareOp::Ge),
    ("<=", CompareOp::Le),
    (">", CompareOp::Gt),
    ("<", CompareOp::Lt),
];

const WORD_OPS: &[(&str, CompareOp)] = &[(" contains ", CompareOp::Contains), (" in ", CompareOp::In)];

impl Predicate {
    /// Parse the textual guard syntax.
    pub fn parse(expr: &str) -> Result<Self, PredicateError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(PredicateError::Empty);
        }

        let alternatives = split_top_level(expr, "||")?;
        if alternatives.len() > 1 {
            return Ok(Predicate::Any(
                alternatives
                    .iter()
                    .map(|part| Self::parse(part))
                    .collect::<Result<_, _>>()?,
            ));
        }

        let conjuncts = split_top_level(expr, "&&")?;
        if conjuncts.len() > 1 {
            return Ok(Predicate::All(
                conjuncts
                    .iter()
                    .map(|part| Self::parse(part))
                    .collect::<Result<_, _>>()?,
            ));
        }

        parse_atom(expr)
    }

    /// Accept a stored rule condition: a guard string, a boolean, a
    /// `{field, operator, value}` object, `{any|all|not: ...}`, or an array
    /// (all must hold). `null` means "always".
    pub fn from_value(value: &Value) -> Result<Self, PredicateError> {
        match value {
            Value::Null => Ok(Predicate::Const(true)),
            Value::Bool(b) => Ok(Predicate::Const(*b)),
            Value::String(s) => Self::parse(s),
            Value::Array(items) => Ok(Predicate::All(
                items.iter().map(Self::from_value).collect::<Result<_, _>>()?,
            )),
            Value::Object(obj) => {
                if let Some(any) = obj.get("any") {
                    return Ok(Predicate::Any(list_of(any)?));
                }
                if let Some(all) = obj.get("all") {
                    return Ok(Predicate::All(list_of(all)?));
                }
                if let Some(inner) = obj.get("not") {
                    return Ok(Predicate::Not(Box::new(Self::from_value(inner)?)));
                }
                if let Some(expr) = obj.get("expression").and_then(Value::as_str) {
                    return Self::parse(expr);
                }

                let field = obj
                    .get("field")
                    .and_then(Value::as_str)
                    .ok_or_else(|| PredicateError::Unsupported(value.to_string()))?;
                let left = ValueRef::parse(field)?;

                match obj.get("operator").and_then(Value::as_str) {
                    Some(name) => Ok(Predicate::Compare {
                        left,
                        op: CompareOp::from_name(name)
                            .ok_or_else(|| PredicateError::UnknownOperator(name.to_string()))?,
                        right: obj.get("value").cloned().unwrap_or(Value::Null),
                    }),
                    None => Ok(Predicate::Truthy(left)),
                }
            }
            Value::Number(_) => Err(PredicateError::Unsupported(value.to_string())),
        }
    }

    /// Every reference read by this predicate.
    pub fn references(&self) -> Vec<&ValueRef> {
        match self {
            Predicate::Const(_) => Vec::new(),
            Predicate::Truthy(r) | Predicate::Compare { left: r, .. } => vec![r],
            Predicate::Not(inner) => inner.references(),
            Predicate::All(items) | Predicate::Any(items) => {
                items.iter().flat_map(|p| p.references()).collect()
            }
        }
    }

    /// True when the predicate holds regardless of state.
    pub fn is_tautology(&self) -> bool {
        match self {
            Predicate::Const(b) => *b,
            Predicate::Any(items) => items.iter().any(Predicate::is_tautology),
            Predicate::All(items) => items.iter().all(Predicate::is_tautology),
            _ => false,
        }
    }

    pub fn evaluate(&self, scope: &ResolveScope<'_>) -> bool {
        match self {
            Predicate::Const(b) => *b,
            Predicate::Truthy(r) => truthy(&r.resolve(scope).unwrap_or(Value::Null)),
            Predicate::Compare { left, op, right } => {
                compare(&left.resolve(scope).unwrap_or(Value::Null), *op, right)
            }
            Predicate::Not(inner) => !inner.evaluate(scope),
            Predicate::All(items) => items.iter().all(|p| p.evaluate(scope)),
            Predicate::Any(items) => items.iter().any(|p| p.evaluate(scope)),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Const(b) => write!(f, "{}", b),
            Predicate::Truthy(r) => write!(f, "{}", r),
            Predicate::Compare { left, op, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            Predicate::Not(inner) => match inner.as_ref() {
                Predicate::Truthy(_) | Predicate::Const(_) => write!(f, "!{}", inner),
                _ => write!(f, "!({})", inner),
            },
            Predicate::All(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|p| match p {
                        Predicate::Any(_) => format!("({})", p),
                        _ => p.to_string(),
                    })
                    .collect();
                write!(f, "{}", parts.join(" && "))
            }
            Predicate::Any(items) => {
                let parts: Vec<String> = items.iter().map(|p| p.to_string()).collect();
                write!(f, "{}", parts.join(" || "))
            }
        }
    }
}

fn list_of(value: &Value) -> Result<Vec<Predicate>, PredicateError> {
    match value {
        Value::Array(items) => items.iter().map(Predicate::from_value).collect(),
        other => Ok(vec![Predicate::from_value(other)?]),
    }
}

/// Split on `sep` outside quotes and parentheses.
fn split_top_level<'a>(expr: &'a str, sep: &str) -> Result<Vec<&'a str>, PredicateError> {
    let bytes = expr.as_bytes();
    let mut parts = Vec::new();
    let mut depth: i32 = 0;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                b'\'' | b'"' => quote = Some(c),
                b'(' | b'[' => depth += 1,
                b')' | b']' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(PredicateError::Syntax(expr.to_string()));
                    }
                }
                _ if depth == 0 && bytes[i..].starts_with(sep.as_bytes()) => {
                    parts.push(expr[start..i].trim());
                    i += sep.len();
                    start = i;
                    continue;
                }
                _ => {}
            },
        }
        i += 1;
    }

    if depth != 0 || quote.is_some() {
        return Err(PredicateError::Syntax(expr.to_string()));
    }
    parts.push(expr[start..].trim());
    if parts.iter().any(|p| p.is_empty()) {
        return Err(PredicateError::Syntax(expr.to_string()));
    }
    Ok(parts)
}

fn parse_atom(expr: &str) -> Result<Predicate, PredicateError> {
    let expr = expr.trim();

    if let Some(inner) = strip_outer_parens(expr) {
        return Predicate::parse(inner);
    }
    if let Some(rest) = expr.strip_prefix('!') {
        if !rest.starts_with('=') {
            return Ok(Predicate::Not(Box::new(parse_atom(rest)?)));
        }
    }
    match expr {
        "true" => return Ok(Predicate::Const(true)),
        "false" => return Ok(Predicate::Const(false)),
        _ => {}
    }

    if let Some((left, op, right)) = find_operator(expr) {
        return Ok(Predicate::Compare {
            left: ValueRef::parse(left)?,
            op,
            right: parse_literal(right)?,
        });
    }

    Ok(Predicate::Truthy(ValueRef::parse(expr)?))
}

fn strip_outer_parens(expr: &str) -> Option<&str> {
    if !expr.starts_with('(') || !expr.ends_with(')') {
        return None;
    }
    let mut depth = 0;
    for (i, c) in expr.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i != expr.len() - 1 {
                    return None;
                }
            }
            _ => {}
        }
    }
    Some(&expr[1..expr.len() - 1])
}

fn find_operator(expr: &str) -> Option<(&str, CompareOp, &str)> {
    let mut quote: Option<char> = None;
    for (i, c) in expr.char_indices() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                continue;
            }
            Some(_) => continue,
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                continue;
            }
            None => {}
        }

        let rest = &expr[i..];
        for (symbol, op) in SYMBOL_OPS.iter().chain(WORD_OPS.iter()) {
            if rest.starts_with(symbol) {
                return Some((&expr[..i], *op, &expr[i + symbol.len()..]));
            }
        }
    }
    None
}

fn parse_literal(raw: &str) -> Result<Value, PredicateError> {
    let raw = raw.trim();
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Ok(Value::String(raw[1..raw.len() - 1].to_string()));
    }
    serde_json::from_str(raw).map_err(|_| PredicateError::Syntax(raw.to_string()))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(obj) => !obj.is_empty(),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    use std::cmp::Ordering;

    let ordering = || -> Option<Ordering> {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    };

    match op {
        CompareOp::Eq => loose_eq(left, right),
        CompareOp::Ne => !loose_eq(left, right),
        CompareOp::Gt => ordering() == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
        CompareOp::Lt => ordering() == Some(Ordering::Less),
        CompareOp::Le => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Contains => match (left, right) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|item| loose_eq(item, needle)),
            (Value::Object(obj), Value::String(key)) => obj.contains_key(key),
            _ => false,
        },
        CompareOp::In => match (left, right) {
            (needle, Value::Array(items)) => items.iter().any(|item| loose_eq(needle, item)),
            (Value::String(needle), Value::String(haystack)) => haystack.contains(needle.as_str()),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn eval(expr: &str, inputs: Value) -> bool {
        let outputs = Map::new();
        let context = Map::new();
        let scope = ResolveScope { inputs: &inputs, outputs: &outputs, context: &context };
        Predicate::parse(expr).unwrap().evaluate(&scope)
    }

    #[test]
    fn equality_accepts_both_spellings() {
        assert!(eval("inputs.operation === 'create'", json!({"operation": "create"})));
        assert!(eval("inputs.operation == \"create\"", json!({"operation": "create"})));
        assert!(!eval("inputs.operation == 'create'", json!({"operation": "update"})));
        assert!(eval("inputs.operation != 'create'", json!({})));
    }

    #[test]
    fn numeric_ordering_and_membership() {
        assert!(eval("inputs.total >= 100", json!({"total": 100})));
        assert!(!eval("inputs.total > 100", json!({"total": 99.5})));
        assert!(eval("inputs.tier in ['gold', 'silver']", json!({"tier": "gold"})));
        assert!(eval("inputs.tags contains 'vip'", json!({"tags": ["new", "vip"]})));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let p = Predicate::parse("inputs.a && inputs.b || inputs.c").unwrap();
        assert!(matches!(p, Predicate::Any(ref items) if items.len() == 2));
        assert!(eval("inputs.a && inputs.b || inputs.c", json!({"c": true})));
        assert!(!eval("inputs.a && (inputs.b || inputs.c)", json!({"c": true})));
    }

    #[test]
    fn negation_and_truthiness() {
        assert!(eval("!inputs.vip", json!({"vip": false})));
        assert!(!eval("inputs.name", json!({"name": ""})));
        assert!(eval("inputs.name", json!({"name": "Jane"})));
    }

    #[test]
    fn reads_step_outputs() {
        let inputs = json!({});
        let mut outputs = Map::new();
        outputs.insert("check".into(), json!({"met": true}));
        let context = Map::new();
        let scope = ResolveScope { inputs: &inputs, outputs: &outputs, context: &context };
        let p = Predicate::parse("check.output.met == true").unwrap();
        assert!(p.evaluate(&scope));
    }

    #[test]
    fn structured_conditions() {
        let p = Predicate::from_value(&json!({
            "any": [
                {"field": "inputs.age", "operator": "gte", "value": 18},
                {"field": "inputs.guardian"}
            ]
        }))
        .unwrap();
        let outputs = Map::new();
        let context = Map::new();

        let adult = json!({"age": 30});
        let scope = ResolveScope { inputs: &adult, outputs: &outputs, context: &context };
        assert!(p.evaluate(&scope));

        let minor = json!({"age": 12});
        let scope = ResolveScope { inputs: &minor, outputs: &outputs, context: &context };
        assert!(!p.evaluate(&scope));

        assert_eq!(Predicate::from_value(&Value::Null).unwrap(), Predicate::Const(true));
    }

    #[test]
    fn canonical_display_normalises_spelling() {
        let a = Predicate::parse("inputs.operation === 'create'").unwrap();
        let b = Predicate::parse("inputs.operation==\"create\"").unwrap();
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(a.to_string(), "inputs.operation == \"create\"");
    }

    #[test]
    fn rejects_malformed_guards() {
        assert!(Predicate::parse("").is_err());
        assert!(Predicate::parse("inputs.a == ").is_err());
        assert!(Predicate::parse("(inputs.a").is_err());
        assert!(Predicate::parse("inputs.a && ").is_err());
        assert!(Predicate::parse("status == 'x'").is_err());
    }
}
