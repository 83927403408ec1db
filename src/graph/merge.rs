//! Delta merges for denormalized array fields.
//!
//! A field holds either bare string ids (`linked_topics`) or small objects keyed
//! by `id` (`journey`). [`add_merge`] returns only the net-new elements so the
//! store can union-append them; two concurrent appends of different ids then
//! commute. [`remove_merge`] returns the survivors after removing ids.

use serde_json::Value;
use std::collections::HashSet;

/// Elements of `to_add` not already present in `existing`, deduplicated.
///
/// `to_add` is object-shaped when any element is a non-null object with more
/// than one key; objects are then merged by their `id`. Otherwise every value is
/// normalized to a string id (a string as-is, or an object's `id`) and falsy
/// values are dropped.
pub fn add_merge(existing: &[Value], to_add: &[Value]) -> Vec<Value> {
    let mut seen: HashSet<String> = existing.iter().filter_map(entry_id).collect();

    if is_object_shaped(to_add) {
        to_add
            .iter()
            .filter(|v| v.is_object())
            .filter(|v| match entry_id(v) {
                Some(id) => seen.insert(id),
                None => false,
            })
            .cloned()
            .collect()
    } else {
        to_add
            .iter()
            .filter_map(normalize_id)
            .filter(|id| seen.insert(id.clone()))
            .map(Value::String)
            .collect()
    }
}

/// Entries of `existing` that survive removing every id named in `to_remove`.
///
/// String entries are matched by value and object entries by their `id`.
/// Entries of any other shape pass through untouched.
pub fn remove_merge(existing: &[Value], to_remove: &[Value]) -> Vec<Value> {
    let doomed: HashSet<String> = to_remove.iter().filter_map(normalize_id).collect();
    if doomed.is_empty() {
        return existing.to_vec();
    }

    existing
        .iter()
        .filter(|entry| match entry {
            Value::String(s) => !doomed.contains(s),
            Value::Object(map) => match map.get("id").and_then(Value::as_str) {
                Some(id) => !doomed.contains(id),
                None => true,
            },
            _ => true,
        })
        .cloned()
        .collect()
}

/// Convenience wrapper for string-id fields.
pub fn ids_to_values<S: AsRef<str>>(ids: &[S]) -> Vec<Value> {
    ids.iter()
        .map(|id| Value::String(id.as_ref().to_string()))
        .collect()
}

fn is_object_shaped(values: &[Value]) -> bool {
    values
        .iter()
        .any(|v| v.as_object().is_some_and(|m| m.len() > 1))
}

/// The id an existing entry occupies, whatever its shape.
fn entry_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

/// Normalize an incoming value to a string id; falsy values yield `None`.
fn normalize_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}
