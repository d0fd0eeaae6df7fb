//! # Query Evaluation
//!
//! Filter matching, projection and aggregation stages for the in-memory store.
//!
//! Supported filter operators: `$and`, `$or`, `$nor`, `$eq`, `$ne`, `$gt`,
//! `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$exists`. Paths traverse arrays
//! implicitly, so `{"tags.name": "x"}` matches any element of `tags`.
//!
//! Supported pipeline stages: `$match`, `$project`, `$sort`, `$skip`,
//! `$limit`, `$count`.

use super::apply::remove_path;
use super::errors::{StoreError, StoreResult};
use crate::document::{pick_paths, Document, ID_FIELD};
use serde_json::{json, Value};
use std::cmp::Ordering;

/// Check whether a value (usually a document) satisfies a filter
pub fn matches_filter(value: &Value, filter: &Document) -> StoreResult<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => clauses(condition)?
                .iter()
                .map(|clause| matches_filter(value, clause))
                .collect::<StoreResult<Vec<_>>>()?
                .into_iter()
                .all(|m| m),
            "$or" => clauses(condition)?
                .iter()
                .map(|clause| matches_filter(value, clause))
                .collect::<StoreResult<Vec<_>>>()?
                .into_iter()
                .any(|m| m),
            "$nor" => !clauses(condition)?
                .iter()
                .map(|clause| matches_filter(value, clause))
                .collect::<StoreResult<Vec<_>>>()?
                .into_iter()
                .any(|m| m),
            other if other.starts_with('$') => {
                return Err(StoreError::InvalidQuery(format!(
                    "unknown top level operator: {}",
                    other
                )))
            }
            path => field_matches(value, path, condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses(condition: &Value) -> StoreResult<Vec<Document>> {
    let Value::Array(items) = condition else {
        return Err(StoreError::InvalidQuery(
            "$and/$or/$nor must be a nonempty array".to_string(),
        ));
    };
    items
        .iter()
        .map(|item| match item {
            Value::Object(clause) => Ok(clause.clone()),
            _ => Err(StoreError::InvalidQuery(
                "$and/$or/$nor entries need to be full objects".to_string(),
            )),
        })
        .collect()
}

/// Check whether the values found at `path` in `root` satisfy `condition`
pub fn field_matches(root: &Value, path: &str, condition: &Value) -> StoreResult<bool> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut found = Vec::new();
    collect_path_values(root, &segments, &mut found);
    values_match_condition(&found, condition)
}

fn collect_path_values<'a>(value: &'a Value, segments: &[&str], found: &mut Vec<&'a Value>) {
    let Some((segment, rest)) = segments.split_first() else {
        found.push(value);
        return;
    };

    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(*segment) {
                collect_path_values(child, rest, found);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = segment.parse::<usize>() {
                if let Some(child) = items.get(index) {
                    collect_path_values(child, rest, found);
                }
            }
            for item in items.iter().filter(|item| item.is_object()) {
                collect_path_values(item, segments, found);
            }
        }
        _ => {}
    }
}

/// Check a condition (plain value or operator object) against found values
pub fn values_match_condition(found: &[&Value], condition: &Value) -> StoreResult<bool> {
    let operators = match condition {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => map,
        _ => return Ok(any_equals(found, condition)),
    };

    for (operator, operand) in operators {
        let matched = match operator.as_str() {
            "$eq" => any_equals(found, operand),
            "$ne" => !any_equals(found, operand),
            "$gt" => any_compares(found, operand, |o| o == Ordering::Greater),
            "$gte" => any_compares(found, operand, |o| o != Ordering::Less),
            "$lt" => any_compares(found, operand, |o| o == Ordering::Less),
            "$lte" => any_compares(found, operand, |o| o != Ordering::Greater),
            "$in" => in_list(found, operand)?,
            "$nin" => !in_list(found, operand)?,
            "$exists" => found.is_empty() != is_truthy(operand),
            other => {
                return Err(StoreError::InvalidQuery(format!("unknown operator: {}", other)))
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn in_list(found: &[&Value], operand: &Value) -> StoreResult<bool> {
    let Value::Array(candidates) = operand else {
        return Err(StoreError::InvalidQuery("$in/$nin needs an array".to_string()));
    };
    Ok(candidates.iter().any(|candidate| any_equals(found, candidate)))
}

/// Equality with array membership, numbers compared by value
fn any_equals(found: &[&Value], expected: &Value) -> bool {
    if found.is_empty() {
        return expected.is_null();
    }
    found.iter().any(|value| {
        values_equal(value, expected)
            || matches!(value, Value::Array(items) if items.iter().any(|item| values_equal(item, expected)))
    })
}

fn any_compares(found: &[&Value], operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    found.iter().any(|value| {
        let direct = compare_values(value, operand).map(&accept).unwrap_or(false);
        direct
            || matches!(value, Value::Array(items) if items.iter().any(|item| {
                compare_values(item, operand).map(&accept).unwrap_or(false)
            }))
    })
}

/// Value equality treating `1` and `1.0` as the same number
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering between values of the same kind
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::Null => false,
        _ => true,
    }
}

/// Apply an inclusion or exclusion projection
///
/// `_id` is kept unless explicitly excluded. Mixing inclusions and
/// exclusions (other than on `_id`) is rejected.
pub fn apply_projection(doc: &Document, projection: &Document) -> StoreResult<Document> {
    if projection.is_empty() {
        return Ok(doc.clone());
    }

    let keep_id = projection.get(ID_FIELD).map(is_truthy).unwrap_or(true);
    let fields: Vec<(&String, bool)> = projection
        .iter()
        .filter(|(key, _)| key.as_str() != ID_FIELD)
        .map(|(key, value)| (key, is_truthy(value)))
        .collect();

    let included: Vec<String> = fields
        .iter()
        .filter(|(_, keep)| *keep)
        .map(|(key, _)| key.to_string())
        .collect();
    let excluded: Vec<&str> = fields
        .iter()
        .filter(|(_, keep)| !*keep)
        .map(|(key, _)| key.as_str())
        .collect();

    if !included.is_empty() && !excluded.is_empty() {
        return Err(StoreError::InvalidQuery(
            "Cannot do exclusion on field in inclusion projection".to_string(),
        ));
    }

    let mut projected = if included.is_empty() {
        let mut projected = doc.clone();
        for path in excluded {
            remove_path(&mut projected, path);
        }
        projected
    } else {
        let mut projected = pick_paths(doc, &included);
        if keep_id {
            if let Some(id) = doc.get(ID_FIELD) {
                projected.insert(ID_FIELD.to_string(), id.clone());
            }
        }
        projected
    };

    if !keep_id {
        projected.remove(ID_FIELD);
    }
    Ok(projected)
}

/// Run aggregation stages over a set of documents
pub fn run_pipeline(mut docs: Vec<Document>, pipeline: &[Document]) -> StoreResult<Vec<Document>> {
    for stage in pipeline {
        let mut entries = stage.iter();
        let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
            return Err(StoreError::InvalidQuery(
                "A pipeline stage specification object must contain exactly one field".to_string(),
            ));
        };

        docs = match (name.as_str(), spec) {
            ("$match", Value::Object(filter)) => {
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches_filter(&Value::Object(doc.clone()), filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            ("$project", Value::Object(projection)) => docs
                .iter()
                .map(|doc| apply_projection(doc, projection))
                .collect::<StoreResult<Vec<_>>>()?,
            ("$sort", Value::Object(order)) => {
                let mut sorted = docs;
                sorted.sort_by(|a, b| {
                    for (path, direction) in order {
                        let left = crate::document::get_document_path(a, path);
                        let right = crate::document::get_document_path(b, path);
                        let ordering = match (left, right) {
                            (Some(l), Some(r)) => compare_values(l, r).unwrap_or(Ordering::Equal),
                            (None, Some(_)) => Ordering::Less,
                            (Some(_), None) => Ordering::Greater,
                            (None, None) => Ordering::Equal,
                        };
                        let ordering = if direction.as_i64() == Some(-1) {
                            ordering.reverse()
                        } else {
                            ordering
                        };
                        if ordering != Ordering::Equal {
                            return ordering;
                        }
                    }
                    Ordering::Equal
                });
                sorted
            }
            ("$skip", count) => {
                let n = stage_count(name, count)?;
                docs.into_iter().skip(n).collect()
            }
            ("$limit", count) => {
                let n = stage_count(name, count)?;
                docs.into_iter().take(n).collect()
            }
            ("$count", Value::String(field)) => {
                if docs.is_empty() {
                    Vec::new()
                } else {
                    let mut counted = Document::new();
                    counted.insert(field.clone(), json!(docs.len()));
                    vec![counted]
                }
            }
            (other, _) => {
                return Err(StoreError::InvalidQuery(format!(
                    "Unrecognized pipeline stage name or malformed stage: '{}'",
                    other
                )))
            }
        };
    }
    Ok(docs)
}

fn stage_count(name: &str, count: &Value) -> StoreResult<usize> {
    count
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| StoreError::InvalidQuery(format!("{} must be a non-negative integer", name)))
}
