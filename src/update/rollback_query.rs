//! # Rollback Query Computation
//!
//! Derives the inverse of an [`UpdateSpec`] from the pre-image of the
//! document it was applied to.
//!
//! # Algorithm
//!
//! 1. **Restore**: every flattened path of the backup is set back. A path
//!    underneath an assigned field restores that whole field; a leaf array
//!    element restores its whole array unless the update reached deeper into
//!    that array, in which case the element is addressed directly.
//! 2. **Remove**: assigned fields the backup did not have are unset, together
//!    with the shallowest freshly created parent. Children of removed parents
//!    are not emitted.
//!    An element created in an existing array restores that array instead,
//!    since unsetting an element leaves a `null` hole.
//! 3. **Wildcards**: positional paths that matched nothing in the backup are
//!    unset through the array filters that make them addressable.
//!
//! Only fields captured in the backup are ever restored.

use super::{RollbackSpec, UpdateSpec};
use crate::document::{
    ancestor_paths, build_unset_filters, flatten_document, get_document_path, has_path,
    is_positional_segment, is_wildcard_path, matches_any_flattened_path, parent_path, Document,
    FlatPathMap,
};
use serde_json::Value;
use std::collections::BTreeSet;

/// Compute the specification undoing `update` on a document whose pre-image is `backup`
pub fn compute_rollback_spec(update: &UpdateSpec, backup: &Document) -> RollbackSpec {
    let assigned: Vec<&str> = update.set.keys().map(String::as_str).collect();
    let flattened = flatten_document(backup);

    let (mut set, mut rebuilt_arrays) = restore_pass(&assigned, backup, &flattened);
    let removed = removal_pass(&assigned, backup, &set, &rebuilt_arrays);
    let mut removed = restore_grown_arrays(removed, backup, &mut set, &mut rebuilt_arrays);

    let mut array_filters: Vec<Value> = Vec::new();
    for path in assigned.iter().filter(|path| is_wildcard_path(path)) {
        if matches_any_flattened_path(path, flattened.keys().map(String::as_str)) {
            continue;
        }
        removed.push(path.to_string());
        for filter in build_unset_filters(path) {
            if !array_filters.contains(&filter) {
                array_filters.push(filter);
            }
        }
    }

    RollbackSpec {
        set,
        unset: removed
            .into_iter()
            .map(|path| (path, Value::from(1)))
            .collect(),
        array_filters,
    }
}

/// Build the inverse `$set` and the array prefixes restored wholesale
fn restore_pass(
    assigned: &[&str],
    backup: &Document,
    flattened: &FlatPathMap<'_>,
) -> (Document, BTreeSet<String>) {
    let mut set = Document::new();
    let mut rebuilt_arrays = BTreeSet::new();

    for (path, value) in flattened {
        let enclosing = assigned
            .iter()
            .find(|field| path.starts_with(&format!("{}.", field)));
        if let Some(field) = enclosing {
            if let Some(subtree) = get_document_path(backup, field) {
                set.insert(field.to_string(), subtree.clone());
                continue;
            }
        }

        if let Some((array_path, _)) = split_trailing_index(path) {
            if let Some(Value::Array(items)) = get_document_path(backup, array_path) {
                if reaches_inside_elements(assigned, array_path) {
                    set.insert(path.clone(), (*value).clone());
                } else {
                    set.insert(array_path.to_string(), Value::Array(items.clone()));
                    rebuilt_arrays.insert(array_path.to_string());
                }
                continue;
            }
        }

        set.insert(path.clone(), (*value).clone());
    }

    // A restored container already carries everything beneath it
    let restored: BTreeSet<String> = set.keys().cloned().collect();
    for key in &restored {
        if ancestor_paths(key).iter().any(|a| restored.contains(*a)) {
            set.remove(key);
        }
    }

    (set, rebuilt_arrays)
}

/// Paths to unset: assigned fields absent from the backup and their fresh parents
fn removal_pass(
    assigned: &[&str],
    backup: &Document,
    set: &Document,
    rebuilt_arrays: &BTreeSet<String>,
) -> Vec<String> {
    let added: Vec<&str> = assigned
        .iter()
        .copied()
        .filter(|path| !set.contains_key(*path))
        .filter(|path| !is_wildcard_path(path))
        .filter(|path| {
            !ancestor_paths(path)
                .iter()
                .any(|a| rebuilt_arrays.contains(*a))
        })
        .collect();

    let mut candidates: Vec<String> = added.iter().map(|p| p.to_string()).collect();
    for path in &added {
        for parent in ancestor_paths(path) {
            if !has_path(backup, parent) && !candidates.iter().any(|c| c == parent) {
                candidates.push(parent.to_string());
            }
        }
    }

    candidates
        .iter()
        .filter(|path| match parent_path(path) {
            Some(parent) => !candidates.iter().any(|c| c == parent),
            None => true,
        })
        .cloned()
        .collect()
}

/// Replace unsets of fresh array elements by the backed-up array
///
/// Unsetting an array element leaves `null` in its slot, so an array the
/// update grew is set back whole. Removals beneath it are dropped.
fn restore_grown_arrays(
    removed: Vec<String>,
    backup: &Document,
    set: &mut Document,
    rebuilt_arrays: &mut BTreeSet<String>,
) -> Vec<String> {
    let mut kept = Vec::new();
    for path in removed {
        let grown = split_trailing_index(&path).and_then(|(array_path, _)| {
            match get_document_path(backup, array_path) {
                Some(Value::Array(items)) => Some((array_path.to_string(), items.clone())),
                _ => None,
            }
        });
        let Some((array_path, items)) = grown else {
            kept.push(path);
            continue;
        };

        if ancestor_paths(&array_path).iter().any(|a| set.contains_key(*a)) {
            continue;
        }
        let prefix = format!("{}.", array_path);
        let covered: Vec<String> = set
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in covered {
            set.remove(&key);
        }
        set.insert(array_path.clone(), Value::Array(items));
        rebuilt_arrays.insert(array_path);
    }

    kept.retain(|path| {
        !ancestor_paths(path)
            .iter()
            .any(|a| rebuilt_arrays.contains(*a))
    });
    kept
}

/// Split `a.b.3` into (`a.b`, 3)
fn split_trailing_index(path: &str) -> Option<(&str, usize)> {
    let (prefix, last) = path.rsplit_once('.')?;
    let index = last.parse::<usize>().ok()?;
    Some((prefix, index))
}

/// True if some assigned path descends below an element of the array at `array_path`
///
/// Positional segments in the assigned path match any concrete segment.
fn reaches_inside_elements(assigned: &[&str], array_path: &str) -> bool {
    let array_segments: Vec<&str> = array_path.split('.').collect();

    assigned.iter().any(|path| {
        let segments: Vec<&str> = path.split('.').collect();
        segments.len() > array_segments.len() + 1
            && array_segments
                .iter()
                .zip(&segments)
                .all(|(expected, actual)| expected == actual || is_positional_segment(actual))
    })
}
