//! Document filter evaluation: a MongoDB-style operator subset.
//!
//! Supported operators: `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`,
//! `$nin`, `$exists`, `$regex`. A bare value means equality. Keys are
//! dotted paths traversed through nested objects.
//!
//! `$regex` accepts SQL LIKE wildcards (`%` and `_`), translated to an
//! anchored regular expression; a pattern without wildcards is evaluated as
//! a plain regular expression.

use {serde_json::Value, std::cmp::Ordering};

/// Returns `true` when `doc` satisfies `filter`.
///
/// An empty or non-object filter matches every document, mirroring the
/// read-everything query.
pub fn matches(doc: &Value, filter: &Value) -> bool {
    let Some(conditions) = filter.as_object() else {
        return true;
    };

    conditions.iter().all(|(path, condition)| {
        let field = lookup_path(doc, path);
        matches_condition(field, condition)
    })
}

/// Resolves a dotted path inside a document.
pub fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn matches_condition(field: Option<&Value>, condition: &Value) -> bool {
    match condition.as_object() {
        Some(ops) if ops.keys().any(|k| k.starts_with('$')) => {
            ops.iter().all(|(op, operand)| {
                apply_operator(field, op, operand)
            })
        }
        _ => field.is_some_and(|value| values_equal(value, condition)),
    }
}

fn apply_operator(field: Option<&Value>, op: &str, operand: &Value) -> bool {
    match op {
        "$eq" => field.is_some_and(|value| values_equal(value, operand)),
        "$ne" => !field.is_some_and(|value| values_equal(value, operand)),
        "$gt" => compare(field, operand).is_some_and(|ord| ord == Ordering::Greater),
        "$gte" => compare(field, operand).is_some_and(|ord| ord != Ordering::Less),
        "$lt" => compare(field, operand).is_some_and(|ord| ord == Ordering::Less),
        "$lte" => compare(field, operand).is_some_and(|ord| ord != Ordering::Greater),
        "$in" => operand.as_array().is_some_and(|candidates| {
            field.is_some_and(|value| candidates.iter().any(|c| values_equal(value, c)))
        }),
        "$nin" => operand.as_array().is_some_and(|candidates| {
            !field.is_some_and(|value| candidates.iter().any(|c| values_equal(value, c)))
        }),
        "$exists" => {
            let wanted = operand.as_bool().unwrap_or(true);
            field.is_some() == wanted
        }
        "$regex" => {
            let (Some(Value::String(text)), Some(pattern)) = (field, operand.as_str()) else {
                return false;
            };
            like_matches(text, pattern)
        }
        other => {
            tracing::warn!(operator = other, "unsupported filter operator");
            false
        }
    }
}

/// Structural equality with numeric coercion across int/float.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Orders two values when comparable: numbers by magnitude, strings
/// lexicographically, booleans false-before-true.
pub fn compare(field: Option<&Value>, operand: &Value) -> Option<Ordering> {
    let field = field?;
    if let (Some(a), Some(b)) = (field.as_f64(), operand.as_f64()) {
        return a.partial_cmp(&b);
    }
    match (field, operand) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn like_matches(text: &str, pattern: &str) -> bool {
    let translated = if pattern.contains('%') || pattern.contains('_') {
        let mut regex = String::with_capacity(pattern.len() + 2);
        regex.push('^');
        for ch in pattern.chars() {
            match ch {
                '%' => regex.push_str(".*"),
                '_' => regex.push('.'),
                other => regex.push_str(&regex::escape(&other.to_string())),
            }
        }
        regex.push('$');
        regex
    } else {
        pattern.to_string()
    };

    match regex::Regex::new(&translated) {
        Ok(re) => re.is_match(text),
        Err(err) => {
            tracing::warn!(pattern = %pattern, error = %err, "invalid $regex pattern");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "name": "alice",
            "age": 34,
            "score": 7.5,
            "active": true,
            "address": {"city": "berlin", "zip": "10115"},
            "tags": ["admin", "ops"]
        })
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(matches(&doc(), &json!({})));
        assert!(matches(&doc(), &Value::Null));
    }

    #[test]
    fn test_bare_value_means_equality() {
        assert!(matches(&doc(), &json!({"name": "alice"})));
        assert!(!matches(&doc(), &json!({"name": "bob"})));
    }

    #[test]
    fn test_numeric_equality_coerces_int_float() {
        assert!(matches(&doc(), &json!({"age": 34.0})));
        assert!(matches(&doc(), &json!({"score": 7.5})));
    }

    #[test]
    fn test_dotted_path_traversal() {
        assert!(matches(&doc(), &json!({"address.city": "berlin"})));
        assert!(!matches(&doc(), &json!({"address.city": "munich"})));
        assert!(!matches(&doc(), &json!({"address.country": "de"})));
    }

    #[test]
    fn test_eq_ne() {
        assert!(matches(&doc(), &json!({"name": {"$eq": "alice"}})));
        assert!(matches(&doc(), &json!({"name": {"$ne": "bob"}})));
        assert!(!matches(&doc(), &json!({"name": {"$ne": "alice"}})));
        // $ne on a missing field matches: the field is not equal to anything.
        assert!(matches(&doc(), &json!({"missing": {"$ne": 1}})));
    }

    #[test]
    fn test_ordering_operators() {
        assert!(matches(&doc(), &json!({"age": {"$gt": 30}})));
        assert!(matches(&doc(), &json!({"age": {"$gte": 34}})));
        assert!(matches(&doc(), &json!({"age": {"$lt": 40}})));
        assert!(matches(&doc(), &json!({"age": {"$lte": 34}})));
        assert!(!matches(&doc(), &json!({"age": {"$gt": 34}})));
        // Range: combined operators on one field
        assert!(matches(&doc(), &json!({"age": {"$gt": 30, "$lt": 35}})));
        assert!(!matches(&doc(), &json!({"age": {"$gt": 30, "$lt": 33}})));
    }

    #[test]
    fn test_string_ordering() {
        assert!(matches(&doc(), &json!({"name": {"$lt": "bob"}})));
        assert!(!matches(&doc(), &json!({"name": {"$gt": "zed"}})));
    }

    #[test]
    fn test_in_nin() {
        assert!(matches(&doc(), &json!({"name": {"$in": ["alice", "bob"]}})));
        assert!(!matches(&doc(), &json!({"name": {"$in": ["bob"]}})));
        assert!(matches(&doc(), &json!({"name": {"$nin": ["bob"]}})));
        assert!(!matches(&doc(), &json!({"name": {"$nin": ["alice"]}})));
        // $nin on a missing field matches.
        assert!(matches(&doc(), &json!({"missing": {"$nin": [1]}})));
    }

    #[test]
    fn test_exists() {
        assert!(matches(&doc(), &json!({"name": {"$exists": true}})));
        assert!(matches(&doc(), &json!({"missing": {"$exists": false}})));
        assert!(!matches(&doc(), &json!({"missing": {"$exists": true}})));
        assert!(!matches(&doc(), &json!({"name": {"$exists": false}})));
    }

    #[test]
    fn test_regex_like_wildcards() {
        assert!(matches(&doc(), &json!({"name": {"$regex": "al%"}})));
        assert!(matches(&doc(), &json!({"name": {"$regex": "%ice"}})));
        assert!(matches(&doc(), &json!({"name": {"$regex": "a_ice"}})));
        assert!(!matches(&doc(), &json!({"name": {"$regex": "bob%"}})));
    }

    #[test]
    fn test_regex_plain_pattern() {
        assert!(matches(&doc(), &json!({"name": {"$regex": "^ali"}})));
        assert!(!matches(&doc(), &json!({"name": {"$regex": "^lice$"}})));
    }

    #[test]
    fn test_regex_on_non_string_is_false() {
        assert!(!matches(&doc(), &json!({"age": {"$regex": "3%"}})));
    }

    #[test]
    fn test_multiple_conditions_are_anded() {
        assert!(matches(
            &doc(),
            &json!({"name": "alice", "age": {"$gte": 30}})
        ));
        assert!(!matches(
            &doc(),
            &json!({"name": "alice", "age": {"$gte": 40}})
        ));
    }

    #[test]
    fn test_unknown_operator_never_matches() {
        assert!(!matches(&doc(), &json!({"age": {"$near": 34}})));
    }
}
