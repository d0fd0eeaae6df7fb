//! # Positional Paths
//!
//! Support for filtered positional segments (`$[name]`) in update paths.
//!
//! A path such as `keys.$[element].value` targets "whichever elements of
//! `keys` satisfy the array filter bound to `element`". The store resolves
//! those segments at write time; rollback needs to know whether such a path
//! pointed at pre-existing data and how to re-target it for removal.

use regex::Regex;
use serde_json::{json, Map, Value};

/// Placeholder name of a `$[name]` segment, if the segment is one
fn placeholder(segment: &str) -> Option<&str> {
    let name = segment.strip_prefix("$[")?.strip_suffix(']')?;
    let valid = !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    valid.then_some(name)
}

/// Check whether a single path segment is a `$[name]` placeholder
pub fn is_positional_segment(segment: &str) -> bool {
    placeholder(segment).is_some()
}

/// Check whether a path contains at least one filtered positional segment
///
/// `my.$[name_me].key` is a wildcard path; `my.key` and the plain positional
/// operator `some.weird.$.key` are not.
pub fn is_wildcard_path(path: &str) -> bool {
    path.split('.').any(is_positional_segment)
}

/// Check whether a wildcard path addresses any of the given concrete paths
///
/// Every `$[name]` segment matches exactly one concrete segment. A concrete
/// path matches when it equals the pattern or lies underneath it.
pub fn matches_any_flattened_path<'a, I>(wildcard_path: &str, concrete_paths: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    let pattern = wildcard_path
        .split('.')
        .map(|segment| match placeholder(segment) {
            Some(_) => "[^.]+".to_string(),
            None => regex::escape(segment),
        })
        .collect::<Vec<_>>()
        .join(r"\.");

    let Ok(regex) = Regex::new(&format!(r"^{}(\..*)?$", pattern)) else {
        return false;
    };

    concrete_paths.into_iter().any(|path| regex.is_match(path))
}

/// Array filters needed to `$unset` through a wildcard path
///
/// One predicate per positional segment, left to right, each requiring the
/// field that follows the segment to exist: `keys.$[e].sub.$[f].value` gives
/// `[{"e.sub": {"$exists": true}}, {"f.value": {"$exists": true}}]`.
pub fn build_unset_filters(wildcard_path: &str) -> Vec<Value> {
    let segments: Vec<&str> = wildcard_path.split('.').collect();

    segments
        .iter()
        .enumerate()
        .filter_map(|(idx, segment)| {
            let name = placeholder(segment)?;
            let key = match segments.get(idx + 1) {
                Some(next) => format!("{}.{}", name, next),
                None => name.to_string(),
            };
            let mut predicate = Map::new();
            predicate.insert(key, json!({ "$exists": true }));
            Some(Value::Object(predicate))
        })
        .collect()
}
