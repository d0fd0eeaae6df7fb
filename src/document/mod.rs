//! # Documents
//!
//! Schemaless documents and dotted-path addressing.
//!
//! # Design Principles
//!
//! 1. **Schemaless**: A document is any JSON object; nothing is assumed about its shape
//! 2. **Uniform paths**: `a.0.b` walks mapping keys and array indices the same way
//! 3. **Opaque leaves**: Extended-JSON wrappers (`{"$date": ...}`) are values, never containers

pub mod flatten;
pub mod positional;

pub use flatten::{flatten_document, FlatPathMap};
pub use positional::{
    build_unset_filters, is_positional_segment, is_wildcard_path, matches_any_flattened_path,
};

use serde_json::{Map, Value};

/// A schemaless document
pub type Document = Map<String, Value>;

/// Name of the identifier field every stored document carries
pub const ID_FIELD: &str = "_id";

/// Parent of a dotted path (`a.b.c` -> `a.b`), `None` for a root field
pub fn parent_path(path: &str) -> Option<&str> {
    path.rsplit_once('.').map(|(parent, _)| parent)
}

/// Every strict ancestor of a dotted path, shallowest first
///
/// `a.b.c` yields `["a", "a.b"]`.
pub fn ancestor_paths(path: &str) -> Vec<&str> {
    path.match_indices('.').map(|(idx, _)| &path[..idx]).collect()
}

/// Resolve a dotted path against a value
///
/// Object segments are looked up by key, array segments by numeric index.
/// Scalars cannot be descended into.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Resolve a dotted path against a document
pub fn get_document_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let root = doc.get(head)?;
    match rest {
        Some(rest) => get_path(root, rest),
        None => Some(root),
    }
}

/// Check whether a dotted path exists in a document
pub fn has_path(doc: &Document, path: &str) -> bool {
    get_document_path(doc, path).is_some()
}

/// Check whether a value is an extended-JSON wrapper such as `{"$date": "..."}`
///
/// Database-native leaf types (dates, binaries, object ids, typed numbers)
/// travel as single objects whose keys are all `$`-prefixed. They are atomic.
pub fn is_opaque_leaf(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

/// Check whether a value is a container that flattening descends into
pub fn is_expandable(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty() && !is_opaque_leaf(value),
        Value::Array(items) => !items.is_empty(),
        _ => false,
    }
}

/// Build a document holding only the given dotted paths of `doc`
///
/// Paths absent from `doc` are skipped. Intermediate containers keep the
/// kind they have in the source (arrays stay arrays, padded with `null`).
pub fn pick_paths(doc: &Document, paths: &[String]) -> Document {
    let source = Value::Object(doc.clone());
    let mut picked = Value::Object(Map::new());

    for path in paths {
        let segments: Vec<&str> = path.split('.').collect();
        pick_into(&mut picked, &source, &segments);
    }

    match picked {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn pick_into(target: &mut Value, source: &Value, segments: &[&str]) {
    let Some((segment, rest)) = segments.split_first() else {
        return;
    };

    match source {
        Value::Object(src) => {
            let Some(child) = src.get(*segment) else {
                return;
            };
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            let Value::Object(out) = target else {
                return;
            };
            if rest.is_empty() {
                out.insert(segment.to_string(), child.clone());
            } else if let Some(empty) = empty_like(child) {
                let slot = out.entry(segment.to_string()).or_insert(empty);
                pick_into(slot, child, rest);
            }
        }
        Value::Array(src) => {
            let Some((index, child)) = segment
                .parse::<usize>()
                .ok()
                .and_then(|i| src.get(i).map(|child| (i, child)))
            else {
                return;
            };
            if !target.is_array() {
                *target = Value::Array(Vec::new());
            }
            let Value::Array(out) = target else {
                return;
            };
            if out.len() <= index {
                out.resize(index + 1, Value::Null);
            }
            if rest.is_empty() {
                out[index] = child.clone();
            } else if let Some(empty) = empty_like(child) {
                if out[index].is_null() {
                    out[index] = empty;
                }
                pick_into(&mut out[index], child, rest);
            }
        }
        _ => {}
    }
}

/// Build a backup subset holding only the given dotted paths of `doc`
///
/// Unlike [`pick_paths`], an array reached through an element path is kept
/// sparse: its picked slots are stored under their index (`{"arr": {"1": ..}}`)
/// so that restoring them never touches the elements left out. An array
/// picked whole stays an array.
pub fn pick_sparse_paths(doc: &Document, paths: &[String]) -> Document {
    let mut picked = Document::new();
    for path in paths {
        let segments: Vec<&str> = path.split('.').collect();
        pick_sparse_into(&mut picked, doc, &segments);
    }
    picked
}

fn pick_sparse_into(target: &mut Document, source: &Document, segments: &[&str]) {
    let Some((segment, rest)) = segments.split_first() else {
        return;
    };
    let Some(child) = source.get(*segment) else {
        return;
    };
    if rest.is_empty() {
        target.insert(segment.to_string(), child.clone());
        return;
    }

    let slot = target
        .entry(segment.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    match (slot, child) {
        (Value::Object(out), Value::Object(src)) if !is_opaque_leaf(child) => {
            pick_sparse_into(out, src, rest);
        }
        (Value::Object(out), Value::Array(items)) => {
            let indexed: Document = items
                .iter()
                .enumerate()
                .map(|(i, item)| (i.to_string(), item.clone()))
                .collect();
            pick_sparse_into(out, &indexed, rest);
        }
        _ => {}
    }
    if matches!(target.get(*segment), Some(Value::Object(out)) if out.is_empty()) {
        target.remove(*segment);
    }
}

fn empty_like(value: &Value) -> Option<Value> {
    match value {
        Value::Object(_) => Some(Value::Object(Map::new())),
        Value::Array(_) => Some(Value::Array(Vec::new())),
        _ => None,
    }
}
