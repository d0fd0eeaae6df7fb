//! # Document Flattening
//!
//! Turns a nested document into a flat map of dotted paths to leaf values.
//! Every diff computed during rollback works on this representation.

use super::{is_expandable, Document};
use serde_json::Value;
use std::collections::BTreeMap;

/// Dotted path -> leaf value view of a document
pub type FlatPathMap<'a> = BTreeMap<String, &'a Value>;

/// Flatten a document into dotted paths
///
/// Non-empty objects and arrays are expanded; array elements use their index
/// as the path segment (`{a: [{b: 1}]}` gives `a.0.b`). Scalars, empty
/// containers and extended-JSON wrappers are kept whole.
pub fn flatten_document(doc: &Document) -> FlatPathMap<'_> {
    let mut output = FlatPathMap::new();
    for (key, value) in doc {
        flatten_value(key.clone(), value, &mut output);
    }
    output
}

fn flatten_value<'a>(path: String, value: &'a Value, output: &mut FlatPathMap<'a>) {
    if !is_expandable(value) {
        output.insert(path, value);
        return;
    }

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_value(format!("{}.{}", path, key), child, output);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten_value(format!("{}.{}", path, index), child, output);
            }
        }
        _ => {
            output.insert(path, value);
        }
    }
}
