//! Document update application: `$set`, `$unset`, `$inc`.
//!
//! Bare keys at the top level of an update document are direct assignments.
//! Operator arguments use dotted paths; `$set` creates missing intermediate
//! objects, `$inc` coerces int, float and numeric-string operands.

use {
    crate::{Error, Result},
    serde_json::{Map, Value},
};

/// Applies an update document to a document in place.
pub fn apply(doc: &mut Value, update: &Value) -> Result<()> {
    let Some(operations) = update.as_object() else {
        return Err(Error::store("update must be a JSON object"));
    };

    for (key, operand) in operations {
        match key.as_str() {
            "$set" => {
                for (path, value) in object_arg(operand, "$set")? {
                    set_path(doc, path, value.clone());
                }
            }
            "$unset" => {
                for (path, _) in object_arg(operand, "$unset")? {
                    unset_path(doc, path);
                }
            }
            "$inc" => {
                for (path, delta) in object_arg(operand, "$inc")? {
                    increment_path(doc, path, delta)?;
                }
            }
            other if other.starts_with('$') => {
                return Err(Error::store(format!("unsupported update operator {other:?}")));
            }
            // Bare top-level key: direct assignment.
            _ => set_path(doc, key, operand.clone()),
        }
    }
    Ok(())
}

fn object_arg<'a>(operand: &'a Value, op: &str) -> Result<&'a Map<String, Value>> {
    operand
        .as_object()
        .ok_or_else(|| Error::store(format!("{op} expects an object argument")))
}

fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut current = doc;
    let segments: Vec<&str> = path.split('.').collect();

    for (i, segment) in segments.iter().enumerate() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let map = current.as_object_mut().expect("object ensured above");
        if i == segments.len() - 1 {
            map.insert((*segment).to_string(), value);
            return;
        }
        current = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

fn unset_path(doc: &mut Value, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = doc;

    for (i, segment) in segments.iter().enumerate() {
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if i == segments.len() - 1 {
            map.remove(*segment);
            return;
        }
        match map.get_mut(*segment) {
            Some(next) => current = next,
            None => return,
        }
    }
}

fn increment_path(doc: &mut Value, path: &str, delta: &Value) -> Result<()> {
    let delta = coerce_number(delta)
        .ok_or_else(|| Error::store(format!("$inc delta for {path:?} is not numeric")))?;

    let current = crate::store::filter::lookup_path(doc, path)
        .and_then(coerce_number)
        .unwrap_or(0.0);

    let next = current + delta;
    // Keep integers integral so counters stay JSON integers.
    let value = if next.fract() == 0.0 && next.abs() < (i64::MAX as f64) {
        Value::from(next as i64)
    } else {
        Value::from(next)
    };
    set_path(doc, path, value);
    Ok(())
}

/// Numeric coercion for `$inc`: int, float, or a parsable string.
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
