//! Typed filter expressions for the record store.
//!
//! Predicates are built as a small tree of conjunction, disjunction, negation,
//! presence and equality nodes and only turned into the store's LDAP-style
//! text (`(&(domain=d1)(!(timeCommitted=*)))`) at the boundary, through
//! [`Filter`]'s `Display` impl. Values are escaped while rendering so catalog
//! code never formats filter strings by hand.
//!
//! The same tree can be evaluated against a JSON record with
//! [`Filter::matches`], which is what the in-memory store and the tagged
//! state classification use.

use std::fmt;

use serde_json::Value;

/// Literal spellings legacy producers used for boolean `true`.
pub const TRUE_VARIANTS: [&str; 2] = ["true", "TRUE"];
/// Literal spellings legacy producers used for boolean `false`.
pub const FALSE_VARIANTS: [&str; 2] = ["false", "FALSE"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equals { field: String, value: String },
}

impl Filter {
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    pub fn negate(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    pub fn present(field: impl Into<String>) -> Self {
        Filter::Present(field.into())
    }

    pub fn absent(field: impl Into<String>) -> Self {
        Filter::negate(Filter::present(field))
    }

    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn not_equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::negate(Filter::equals(field, value))
    }

    /// Matches any of the literal spellings in `variants`.
    pub fn eq_any(field: &str, variants: &[&str]) -> Self {
        Filter::any(variants.iter().map(|value| Filter::equals(field, *value)))
    }

    /// Boolean flag stored as `"true"` or `"TRUE"`.
    pub fn flag_set(field: &str) -> Self {
        Filter::eq_any(field, &TRUE_VARIANTS)
    }

    /// Boolean flag stored as `"false"` or `"FALSE"`. Records without the
    /// field do not match.
    pub fn flag_cleared(field: &str) -> Self {
        Filter::eq_any(field, &FALSE_VARIANTS)
    }

    /// Appends `other` to this conjunction, or wraps both in a new one.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut clauses) => {
                clauses.push(other);
                Filter::And(clauses)
            }
            single => Filter::And(vec![single, other]),
        }
    }

    /// Evaluates the filter against a JSON object record.
    ///
    /// Fields holding `null` count as absent. Array fields match an equality
    /// test when any element does, mirroring multi-valued index semantics.
    pub fn matches(&self, record: &Value) -> bool {
        match self {
            Filter::And(clauses) => clauses.iter().all(|clause| clause.matches(record)),
            Filter::Or(clauses) => clauses.iter().any(|clause| clause.matches(record)),
            Filter::Not(inner) => !inner.matches(record),
            Filter::Present(field) => lookup(record, field).is_some(),
            Filter::Equals { field, value } => {
                lookup(record, field).is_some_and(|stored| value_equals(stored, value))
            }
        }
    }
}

fn lookup<'a>(record: &'a Value, field: &str) -> Option<&'a Value> {
    record.get(field).filter(|value| !value.is_null())
}

fn value_equals(stored: &Value, expected: &str) -> bool {
    match stored {
        Value::String(text) => text == expected,
        Value::Number(number) => number.to_string() == expected,
        Value::Bool(flag) => flag.to_string() == expected,
        Value::Array(items) => items.iter().any(|item| value_equals(item, expected)),
        Value::Null | Value::Object(_) => false,
    }
}

/// Escapes a value for use inside an equality assertion.
pub fn escape_value(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\\' => escaped.push_str("\\5c"),
            '\0' => escaped.push_str("\\00"),
            other => escaped.push(other),
        }
    }
    escaped
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(clauses) if clauses.len() == 1 => write!(f, "{}", clauses[0]),
            Filter::Or(clauses) if clauses.len() == 1 => write!(f, "{}", clauses[0]),
            Filter::And(clauses) => {
                f.write_str("(&")?;
                for clause in clauses {
                    write!(f, "{clause}")?;
                }
                f.write_str(")")
            }
            Filter::Or(clauses) => {
                f.write_str("(|")?;
                for clause in clauses {
                    write!(f, "{clause}")?;
                }
                f.write_str(")")
            }
            Filter::Not(inner) => write!(f, "(!{inner})"),
            Filter::Present(field) => write!(f, "({field}=*)"),
            Filter::Equals { field, value } => write!(f, "({field}={})", escape_value(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_nested_expression() {
        let filter = Filter::all([
            Filter::equals("domain", "d1"),
            Filter::present("timeCommitted"),
            Filter::absent("timeCancelled"),
            Filter::flag_set("wantRetry"),
        ]);
        assert_eq!(
            filter.to_string(),
            "(&(domain=d1)(timeCommitted=*)(!(timeCancelled=*))(|(wantRetry=true)(wantRetry=TRUE)))"
        );
    }

    #[test]
    fn single_clause_conjunction_renders_bare() {
        assert_eq!(Filter::all([Filter::equals("jobId", "j1")]).to_string(), "(jobId=j1)");
    }

    #[test]
    fn values_are_escaped() {
        let filter = Filter::equals("worker", "evil)(worker=*");
        assert_eq!(filter.to_string(), "(worker=evil\\29\\28worker=\\2a)");
        assert!(!filter.matches(&json!({ "worker": "other" })));
        assert!(filter.matches(&json!({ "worker": "evil)(worker=*" })));
    }

    #[test]
    fn null_fields_count_as_absent() {
        let record = json!({ "timeCommitted": null, "state": "done" });
        assert!(Filter::absent("timeCommitted").matches(&record));
        assert!(Filter::equals("state", "done").matches(&record));
        assert!(Filter::not_equals("state", "running").matches(&record));
    }

    #[test]
    fn equality_coerces_scalars_and_arrays() {
        let record = json!({ "phaseNum": 2, "valid": true, "tags": ["a", "b"] });
        assert!(Filter::equals("phaseNum", "2").matches(&record));
        assert!(Filter::equals("valid", "true").matches(&record));
        assert!(Filter::equals("tags", "b").matches(&record));
        assert!(!Filter::equals("tags", "c").matches(&record));
    }

    #[test]
    fn and_extends_existing_conjunction() {
        let filter = Filter::all([Filter::equals("a", "1")]).and(Filter::present("b"));
        assert_eq!(filter.to_string(), "(&(a=1)(b=*))");
        let filter = Filter::present("a").and(Filter::present("b"));
        assert_eq!(filter.to_string(), "(&(a=*)(b=*))");
    }
}
