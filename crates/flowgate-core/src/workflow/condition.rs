//! Edge condition compiler and evaluator.
//!
//! Conditions arrive in two authored shapes (see `ConditionSpec`): a terse
//! string such as `amount > 500` or a structured `{field, operator, value}`
//! predicate, optionally grouped with `and`/`or`. Both compile once into a
//! `Condition` tree when the definition is loaded; evaluation then walks the
//! tree against the request's form data.
//!
//! Evaluation is total and fails closed: malformed expressions, unknown
//! operators, missing fields, and type mismatches all yield `false`.
//!
//! **Security note:** form data is only ever looked up by field name, never
//! spliced into expression text.

use std::str::FromStr;

use flowgate_types::workflow::{ConditionSpec, GroupKind};
use serde_json::Value;

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// Comparison operators shared by both condition forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
}

impl Operator {
    /// Symbol form used by string expressions: `>`, `<`, `>=`, `<=`, `==`, `!=`.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "==" => Some(Operator::Eq),
            "!=" => Some(Operator::Neq),
            ">" => Some(Operator::Gt),
            "<" => Some(Operator::Lt),
            ">=" => Some(Operator::Gte),
            "<=" => Some(Operator::Lte),
            _ => None,
        }
    }
}

impl FromStr for Operator {
    type Err = String;

    /// Name form used by structured predicates.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(Operator::Eq),
            "neq" => Ok(Operator::Neq),
            "gt" => Ok(Operator::Gt),
            "lt" => Ok(Operator::Lt),
            "gte" => Ok(Operator::Gte),
            "lte" => Ok(Operator::Lte),
            "contains" => Ok(Operator::Contains),
            "startsWith" | "starts_with" => Ok(Operator::StartsWith),
            "endsWith" | "ends_with" => Ok(Operator::EndsWith),
            other => Operator::from_symbol(other).ok_or_else(|| format!("unknown operator '{other}'")),
        }
    }
}

/// A compiled edge guard.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// No guard: the edge always passes.
    Always,
    /// Unparseable guard: the edge never passes.
    Never,
    /// `field` is present and truthy.
    Truthy(String),
    /// `field <op> value`.
    Compare {
        field: String,
        op: Operator,
        value: Value,
    },
    /// Every child passes. An empty list passes.
    All(Vec<Condition>),
    /// At least one child passes. An empty list fails.
    Any(Vec<Condition>),
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile an optional edge guard. A missing guard always passes.
pub fn compile_optional(spec: Option<&ConditionSpec>) -> Condition {
    spec.map(compile).unwrap_or(Condition::Always)
}

/// Compile an authored condition into its evaluable form.
pub fn compile(spec: &ConditionSpec) -> Condition {
    match spec {
        ConditionSpec::Expression(expr) => parse_expression(expr),
        ConditionSpec::Simple {
            field,
            operator,
            value,
        } => match operator.parse::<Operator>() {
            Ok(op) if !field.trim().is_empty() => Condition::Compare {
                field: field.trim().to_string(),
                op,
                value: value.clone(),
            },
            Ok(_) => Condition::Never,
            Err(e) => {
                tracing::debug!(field = %field, error = %e, "condition compiled as never-true");
                Condition::Never
            }
        },
        ConditionSpec::Group { kind, conditions } => {
            let children = conditions.iter().map(compile).collect();
            match kind {
                GroupKind::And => Condition::All(children),
                GroupKind::Or => Condition::Any(children),
            }
        }
    }
}

/// Parse a string expression: `field op value` or a bare `field`.
///
/// Operators, longest match first: `>=`, `<=`, `==`, `!=`, `>`, `<`.
/// Values may be quoted (`'x'` or `"x"`), `true`/`false`/`null`, numbers,
/// or bare words. Anything else parses to `Condition::Never`.
pub fn parse_expression(expr: &str) -> Condition {
    let expr = expr.trim();
    if expr.is_empty() {
        return Condition::Always;
    }

    let Some(op_start) = expr.find(['=', '!', '>', '<']) else {
        return if is_field_path(expr) {
            Condition::Truthy(expr.to_string())
        } else {
            Condition::Never
        };
    };

    let field = expr[..op_start].trim();
    if !is_field_path(field) {
        return Condition::Never;
    }

    let rest = &expr[op_start..];
    let (op, op_len) = match rest.get(..2).and_then(Operator::from_symbol) {
        Some(op) => (op, 2),
        None => match rest.get(..1).and_then(Operator::from_symbol) {
            Some(op) => (op, 1),
            None => return Condition::Never,
        },
    };

    let raw_value = rest[op_len..].trim();
    if raw_value.is_empty() {
        return Condition::Never;
    }

    Condition::Compare {
        field: field.to_string(),
        op,
        value: parse_literal(raw_value),
    }
}

fn is_field_path(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('.')
        && !s.ends_with('.')
        && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

fn parse_literal(raw: &str) -> Value {
    let quoted = raw.len() >= 2
        && ((raw.starts_with('\'') && raw.ends_with('\''))
            || (raw.starts_with('"') && raw.ends_with('"')));
    if quoted {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Some(n) = raw
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
    {
        return Value::Number(n);
    }
    Value::String(raw.to_string())
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

impl Condition {
    /// Evaluate against the request's form data.
    pub fn evaluate(&self, context: &Value) -> bool {
        match self {
            Condition::Always => true,
            Condition::Never => false,
            Condition::Truthy(field) => lookup(context, field).is_some_and(is_truthy),
            Condition::Compare { field, op, value } => {
                compare(lookup(context, field), *op, value)
            }
            Condition::All(children) => children.iter().all(|c| c.evaluate(context)),
            Condition::Any(children) => children.iter().any(|c| c.evaluate(context)),
        }
    }
}

/// Compile and evaluate in one go. Prefer compiling once per definition.
pub fn evaluate(spec: &ConditionSpec, context: &Value) -> bool {
    compile(spec).evaluate(context)
}

/// Resolve a field: exact key first, then a dotted path through objects and arrays.
fn lookup<'a>(context: &'a Value, field: &str) -> Option<&'a Value> {
    if let Some(v) = context.get(field) {
        return Some(v);
    }
    if !field.contains('.') {
        return None;
    }
    field.split('.').try_fold(context, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn compare(actual: Option<&Value>, op: Operator, expected: &Value) -> bool {
    match op {
        Operator::Eq => actual.is_some_and(|a| loose_eq(a, expected)),
        Operator::Neq => !actual.is_some_and(|a| loose_eq(a, expected)),
        Operator::Gt => numeric(actual, expected, |a, b| a > b),
        Operator::Lt => numeric(actual, expected, |a, b| a < b),
        Operator::Gte => numeric(actual, expected, |a, b| a >= b),
        Operator::Lte => numeric(actual, expected, |a, b| a <= b),
        Operator::Contains => match actual {
            Some(Value::Array(items)) => items.iter().any(|item| loose_eq(item, expected)),
            Some(a) => text(a).contains(text(expected).as_str()),
            None => false,
        },
        Operator::StartsWith => {
            actual.is_some_and(|a| text(a).starts_with(text(expected).as_str()))
        }
        Operator::EndsWith => actual.is_some_and(|a| text(a).ends_with(text(expected).as_str())),
    }
}

/// NaN on either side makes every numeric comparison false.
fn numeric(actual: Option<&Value>, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    let a = actual.map(to_number).unwrap_or(f64::NAN);
    let b = to_number(expected);
    !a.is_nan() && !b.is_nan() && cmp(a, b)
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::Bool(true) => 1.0,
        Value::Bool(false) => 0.0,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                f64::NAN
            } else {
                s.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Equality that lets numbers match numeric strings and booleans match their text.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_))
        | (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_))
        | (Value::Number(_), Value::Bool(_))
        | (Value::Bool(_), Value::Number(_)) => {
            let (x, y) = (to_number(a), to_number(b));
            !x.is_nan() && x == y
        }
        (Value::Bool(_), Value::String(_)) | (Value::String(_), Value::Bool(_)) => {
            text(a) == text(b)
        }
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expr(s: &str) -> ConditionSpec {
        ConditionSpec::Expression(s.to_string())
    }

    fn simple(field: &str, operator: &str, value: Value) -> ConditionSpec {
        ConditionSpec::Simple {
            field: field.to_string(),
            operator: operator.to_string(),
            value,
        }
    }

    // -----------------------------------------------------------------------
    // String expressions
    // -----------------------------------------------------------------------

    #[test]
    fn test_numeric_comparison() {
        assert!(evaluate(&expr("amount > 500"), &json!({"amount": 1000})));
        assert!(!evaluate(&expr("amount > 500"), &json!({"amount": 100})));
        assert!(evaluate(&expr("amount >= 500"), &json!({"amount": 500})));
        assert!(evaluate(&expr("amount <= 500"), &json!({"amount": 500})));
        assert!(evaluate(&expr("amount < 10.5"), &json!({"amount": 10})));
    }

    #[test]
    fn test_numeric_string_coerces() {
        assert!(evaluate(&expr("amount > 500"), &json!({"amount": "1000"})));
        assert!(!evaluate(&expr("amount > 500"), &json!({"amount": "lots"})));
    }

    #[test]
    fn test_missing_field_fails_closed() {
        assert!(!evaluate(&expr("amount > 500"), &json!({})));
        assert!(!evaluate(&expr("amount < 500"), &json!({})));
        assert!(!evaluate(&expr("vip"), &json!({})));
    }

    #[test]
    fn test_quoted_string_equality() {
        let ctx = json!({"status": "approved"});
        assert!(evaluate(&expr("status == 'approved'"), &ctx));
        assert!(evaluate(&expr("status == \"approved\""), &ctx));
        assert!(!evaluate(&expr("status != 'approved'"), &ctx));
        assert!(evaluate(&expr("status != 'draft'"), &ctx));
        assert!(!evaluate(
            &expr("status == 'approved'"),
            &json!({"status": "rejected"})
        ));
    }

    #[test]
    fn test_boolean_and_bare_literals() {
        assert!(evaluate(&expr("urgent == true"), &json!({"urgent": true})));
        assert!(evaluate(&expr("region == emea"), &json!({"region": "emea"})));
    }

    #[test]
    fn test_bare_field_truthiness() {
        assert!(evaluate(&expr("vip"), &json!({"vip": true})));
        assert!(!evaluate(&expr("vip"), &json!({"vip": false})));
        assert!(!evaluate(&expr("vip"), &json!({"vip": ""})));
        assert!(!evaluate(&expr("vip"), &json!({"vip": 0})));
        assert!(evaluate(&expr("vip"), &json!({"vip": "yes"})));
    }

    #[test]
    fn test_malformed_expressions_are_false() {
        let ctx = json!({"amount": 1000, "a": 1});
        assert_eq!(parse_expression("amount >"), Condition::Never);
        assert_eq!(parse_expression("> 5"), Condition::Never);
        assert_eq!(parse_expression("amount = 5"), Condition::Never);
        assert_eq!(parse_expression("a b c"), Condition::Never);
        assert!(!evaluate(&expr("amount >"), &ctx));
        assert!(!evaluate(&expr("(amount > 5"), &ctx));
    }

    #[test]
    fn test_dotted_path_lookup() {
        let ctx = json!({"vendor": {"tier": 2, "tags": ["preferred"]}});
        assert!(evaluate(&expr("vendor.tier >= 2"), &ctx));
        assert!(evaluate(&expr("vendor.tags.0 == 'preferred'"), &ctx));
        assert!(!evaluate(&expr("vendor.missing > 0"), &ctx));
    }

    #[test]
    fn test_exact_key_wins_over_path() {
        let ctx = json!({"cost.center": "R&D", "cost": {"center": "ops"}});
        assert!(evaluate(&expr("cost.center == 'R&D'"), &ctx));
    }

    // -----------------------------------------------------------------------
    // Structured predicates
    // -----------------------------------------------------------------------

    #[test]
    fn test_structured_operators() {
        let ctx = json!({"title": "Laptop purchase", "amount": 1200, "tags": ["hw", "it"]});
        assert!(evaluate(&simple("amount", "gt", json!(1000)), &ctx));
        assert!(evaluate(&simple("amount", "lte", json!(1200)), &ctx));
        assert!(evaluate(&simple("amount", "eq", json!("1200")), &ctx));
        assert!(evaluate(&simple("amount", "neq", json!(1)), &ctx));
        assert!(evaluate(&simple("title", "contains", json!("top")), &ctx));
        assert!(evaluate(&simple("title", "startsWith", json!("Lap")), &ctx));
        assert!(evaluate(&simple("title", "endsWith", json!("chase")), &ctx));
        assert!(evaluate(&simple("tags", "contains", json!("it")), &ctx));
        assert!(!evaluate(&simple("tags", "contains", json!("fin")), &ctx));
    }

    #[test]
    fn test_unknown_operator_is_false() {
        let ctx = json!({"amount": 1200});
        assert_eq!(compile(&simple("amount", "roughly", json!(1200))), Condition::Never);
        assert!(!evaluate(&simple("amount", "roughly", json!(1200)), &ctx));
    }

    #[test]
    fn test_string_ops_on_missing_field() {
        assert!(!evaluate(&simple("title", "contains", json!("x")), &json!({})));
        assert!(!evaluate(&simple("title", "startsWith", json!("x")), &json!({})));
        assert!(evaluate(&simple("title", "neq", json!("x")), &json!({})));
    }

    #[test]
    fn test_groups_nest() {
        let spec = ConditionSpec::Group {
            kind: GroupKind::And,
            conditions: vec![
                expr("amount > 100"),
                ConditionSpec::Group {
                    kind: GroupKind::Or,
                    conditions: vec![expr("vip"), simple("region", "eq", json!("emea"))],
                },
            ],
        };
        assert!(evaluate(&spec, &json!({"amount": 500, "region": "emea"})));
        assert!(evaluate(&spec, &json!({"amount": 500, "vip": true})));
        assert!(!evaluate(&spec, &json!({"amount": 500})));
        assert!(!evaluate(&spec, &json!({"amount": 50, "vip": true})));
    }

    #[test]
    fn test_empty_groups() {
        let all = ConditionSpec::Group {
            kind: GroupKind::And,
            conditions: vec![],
        };
        let any = ConditionSpec::Group {
            kind: GroupKind::Or,
            conditions: vec![],
        };
        assert!(evaluate(&all, &json!({})));
        assert!(!evaluate(&any, &json!({})));
    }

    #[test]
    fn test_missing_guard_always_passes() {
        assert!(compile_optional(None).evaluate(&json!({})));
        assert_eq!(parse_expression("   "), Condition::Always);
    }

    #[test]
    fn test_compiled_condition_is_reusable() {
        let condition = parse_expression("amount > 500");
        assert!(condition.evaluate(&json!({"amount": 501})));
        assert!(!condition.evaluate(&json!({"amount": 499})));
    }
}
