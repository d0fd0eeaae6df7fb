//! # Update Application
//!
//! Applies `$set`, `$unset` and `$setOnInsert` to documents held by the
//! in-memory store. Paths may contain array indices (arrays are padded with
//! `null` when assigning past their end) and `$[name]` / `$[]` positional
//! segments resolved through array filters.

use super::errors::{StoreError, DOLLAR_PREFIXED_FIELD_CODE};
use super::filter::{field_matches, values_match_condition};
use crate::document::{is_positional_segment, Document, ID_FIELD};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Generic bad-value error code
pub const BAD_VALUE_CODE: i32 = 2;

/// Error code for malformed update documents
pub const FAILED_TO_PARSE_CODE: i32 = 9;

/// Error code for a path that cannot be created in the existing document
pub const PATH_NOT_VIABLE_CODE: i32 = 28;

/// Error code for an attempt to change `_id`
pub const IMMUTABLE_FIELD_CODE: i32 = 66;

/// Why a single update could not be applied
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateFailure {
    pub code: i32,
    pub message: String,
}

impl UpdateFailure {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<StoreError> for UpdateFailure {
    fn from(err: StoreError) -> Self {
        UpdateFailure::new(BAD_VALUE_CODE, err.to_string())
    }
}

pub type ApplyResult<T> = Result<T, UpdateFailure>;

/// Array filter predicates grouped by placeholder name
#[derive(Debug, Default)]
pub struct ArrayFilters {
    by_name: HashMap<String, Document>,
}

impl ArrayFilters {
    /// Group raw filter documents by the identifier their keys start with
    pub fn parse(filters: &[Value]) -> ApplyResult<Self> {
        let mut by_name: HashMap<String, Document> = HashMap::new();

        for filter in filters {
            let Value::Object(conditions) = filter else {
                return Err(UpdateFailure::new(BAD_VALUE_CODE, "array filter must be an object"));
            };
            let mut names = conditions
                .keys()
                .map(|key| key.split('.').next().unwrap_or_default().to_string());
            let Some(name) = names.next() else {
                return Err(UpdateFailure::new(
                    FAILED_TO_PARSE_CODE,
                    "Cannot use an expression without a top-level field name in arrayFilters",
                ));
            };
            if names.any(|other| other != name) {
                return Err(UpdateFailure::new(
                    FAILED_TO_PARSE_CODE,
                    "Each array filter must use a single top-level field name",
                ));
            }
            if by_name.contains_key(&name) {
                return Err(UpdateFailure::new(
                    FAILED_TO_PARSE_CODE,
                    format!("Found multiple array filters with the same top-level field name {}", name),
                ));
            }
            by_name.insert(name, conditions.clone());
        }

        Ok(Self { by_name })
    }

    fn element_matches(&self, name: &str, element: &Value) -> ApplyResult<bool> {
        let Some(conditions) = self.by_name.get(name) else {
            return Err(UpdateFailure::new(
                BAD_VALUE_CODE,
                format!("No array filter found for identifier '{}'", name),
            ));
        };

        for (key, condition) in conditions {
            let matched = match key.strip_prefix(name).and_then(|rest| rest.strip_prefix('.')) {
                Some(rest) => field_matches(element, rest, condition)?,
                None => values_match_condition(&[element], condition)?,
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Which elements a positional segment selects
enum Positional<'a> {
    All,
    Filtered(&'a str),
}

fn positional(segment: &str) -> Option<Positional<'_>> {
    if segment == "$[]" {
        return Some(Positional::All);
    }
    if is_positional_segment(segment) {
        return Some(Positional::Filtered(&segment[2..segment.len() - 1]));
    }
    None
}

impl Positional<'_> {
    fn selects(&self, filters: &ArrayFilters, element: &Value) -> ApplyResult<bool> {
        match self {
            Positional::All => Ok(true),
            Positional::Filtered(name) => filters.element_matches(name, element),
        }
    }
}

/// Apply an operator document, returning the updated copy
///
/// `$setOnInsert` only takes effect when `inserting` is set (upsert path).
pub fn apply_update(
    doc: &Document,
    update: &Document,
    array_filters: &[Value],
    inserting: bool,
) -> ApplyResult<Document> {
    if update.is_empty() {
        return Err(UpdateFailure::new(
            FAILED_TO_PARSE_CODE,
            "Update document requires atomic operators",
        ));
    }

    let filters = ArrayFilters::parse(array_filters)?;
    let mut root = Value::Object(doc.clone());

    for (operator, fields) in update {
        let Value::Object(fields) = fields else {
            return Err(UpdateFailure::new(
                FAILED_TO_PARSE_CODE,
                format!("Modifiers operate on fields but we found another type instead: {}", operator),
            ));
        };
        match operator.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(&mut root, path, value, &filters)?;
                }
            }
            "$setOnInsert" => {
                if inserting {
                    for (path, value) in fields {
                        set_path(&mut root, path, value, &filters)?;
                    }
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    let segments: Vec<&str> = path.split('.').collect();
                    unset_at(&mut root, &segments, &filters)?;
                }
            }
            other => {
                return Err(UpdateFailure::new(
                    FAILED_TO_PARSE_CODE,
                    format!("Unknown modifier: {}", other),
                ))
            }
        }
    }

    let Value::Object(updated) = root else {
        return Err(UpdateFailure::new(BAD_VALUE_CODE, "update replaced the document root"));
    };
    if doc.contains_key(ID_FIELD) && doc.get(ID_FIELD) != updated.get(ID_FIELD) {
        return Err(UpdateFailure::new(
            IMMUTABLE_FIELD_CODE,
            "Performing an update on the path '_id' would modify the immutable field '_id'",
        ));
    }
    Ok(updated)
}

fn set_path(root: &mut Value, path: &str, value: &Value, filters: &ArrayFilters) -> ApplyResult<()> {
    let segments: Vec<&str> = path.split('.').collect();
    for segment in &segments {
        if segment.is_empty() {
            return Err(UpdateFailure::new(
                BAD_VALUE_CODE,
                format!("The update path '{}' contains an empty field name, which is not allowed.", path),
            ));
        }
        if segment.starts_with('$') && positional(segment).is_none() {
            return Err(UpdateFailure::new(
                DOLLAR_PREFIXED_FIELD_CODE,
                format!(
                    "The dollar ($) prefixed field '{}' in '{}' is not allowed in the context of an update's replacement document. Consider using an aggregation pipeline with $replaceWith.",
                    segment, path
                ),
            ));
        }
    }
    set_at(root, &segments, value, filters)
}

fn set_at(target: &mut Value, segments: &[&str], value: &Value, filters: &ArrayFilters) -> ApplyResult<()> {
    let Some((segment, rest)) = segments.split_first() else {
        *target = value.clone();
        return Ok(());
    };

    if let Some(selector) = positional(segment) {
        if !target.is_array() {
            return Err(UpdateFailure::new(
                BAD_VALUE_CODE,
                format!("Cannot apply array updates to non-array element {}", target),
            ));
        }
        if let Value::Array(items) = target {
            for item in items.iter_mut() {
                if selector.selects(filters, item)? {
                    set_at(item, rest, value, filters)?;
                }
            }
        }
        return Ok(());
    }

    match target {
        Value::Object(map) => {
            if rest.is_empty() {
                map.insert(segment.to_string(), value.clone());
                return Ok(());
            }
            let child = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() && !child.is_array() {
                return Err(cannot_create(rest[0], segment, child));
            }
            set_at(child, rest, value, filters)
        }
        Value::Array(items) => {
            let Ok(index) = segment.parse::<usize>() else {
                return Err(UpdateFailure::new(
                    PATH_NOT_VIABLE_CODE,
                    format!("Cannot create field '{}' in element {}", segment, Value::Array(items.clone())),
                ));
            };
            if items.len() <= index {
                items.resize(index + 1, Value::Null);
            }
            if rest.is_empty() {
                items[index] = value.clone();
                return Ok(());
            }
            if items[index].is_null() {
                items[index] = Value::Object(Map::new());
            }
            if !items[index].is_object() && !items[index].is_array() {
                return Err(cannot_create(rest[0], segment, &items[index]));
            }
            set_at(&mut items[index], rest, value, filters)
        }
        other => Err(cannot_create(segment, "", other)),
    }
}

fn cannot_create(field: &str, parent: &str, element: &Value) -> UpdateFailure {
    UpdateFailure::new(
        PATH_NOT_VIABLE_CODE,
        format!("Cannot create field '{}' in element {{{}: {}}}", field, parent, element),
    )
}

/// Removing an array element leaves `null` in its place
fn unset_at(target: &mut Value, segments: &[&str], filters: &ArrayFilters) -> ApplyResult<()> {
    let Some((segment, rest)) = segments.split_first() else {
        return Ok(());
    };

    if let Some(selector) = positional(segment) {
        if let Value::Array(items) = target {
            for item in items.iter_mut() {
                if !selector.selects(filters, item)? {
                    continue;
                }
                if rest.is_empty() {
                    *item = Value::Null;
                } else {
                    unset_at(item, rest, filters)?;
                }
            }
        }
        return Ok(());
    }

    match target {
        Value::Object(map) => {
            if rest.is_empty() {
                map.remove(*segment);
            } else if let Some(child) = map.get_mut(*segment) {
                unset_at(child, rest, filters)?;
            }
        }
        Value::Array(items) => {
            if let Ok(index) = segment.parse::<usize>() {
                if let Some(child) = items.get_mut(index) {
                    if rest.is_empty() {
                        *child = Value::Null;
                    } else {
                        unset_at(child, rest, filters)?;
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Remove a dotted path from a document (used by exclusion projections)
pub fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(child) = doc.get_mut(head) {
                remove_from_value(child, rest);
            }
        }
    }
}

fn remove_from_value(target: &mut Value, path: &str) {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    match (target, rest) {
        (Value::Object(map), None) => {
            map.remove(head);
        }
        (Value::Object(map), Some(rest)) => {
            if let Some(child) = map.get_mut(head) {
                remove_from_value(child, rest);
            }
        }
        (Value::Array(items), _) => {
            for item in items.iter_mut() {
                remove_from_value(item, path);
            }
        }
        _ => {}
    }
}

/// Seed document for an upsert: the plain equality fields of the filter
pub fn upsert_seed(filter: &Document) -> Document {
    let mut seed = Value::Object(Map::new());
    let no_filters = ArrayFilters::default();

    for (key, value) in filter {
        let is_operator_object = matches!(
            value,
            Value::Object(map) if map.keys().any(|k| k.starts_with('$'))
        );
        if key.starts_with('$') || is_operator_object {
            continue;
        }
        let segments: Vec<&str> = key.split('.').collect();
        if set_at(&mut seed, &segments, value, &no_filters).is_err() {
            continue;
        }
    }

    match seed {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
