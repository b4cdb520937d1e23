//! Optimistic updaters for cached collections and detail values.
//!
//! A collection is either a bare JSON array or a canonical page
//! (`{ data: [...], pagination }`). Items are matched by their `id` field.
//! Every function is pure: it reads the current value and returns the value to
//! write, or `None` to leave the cache alone.

use serde_json::{Map, Value};
use uuid::Uuid;

pub const TEMP_ID_PREFIX: &str = "temp-";

/// A fresh placeholder id for an item the server has not assigned one to yet.
pub fn temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

fn items_mut(value: &mut Value) -> Option<&mut Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(object) => object.get_mut("data").and_then(Value::as_array_mut),
        _ => None,
    }
}

fn item_id(item: &Value) -> Option<&str> {
    item.get("id").and_then(Value::as_str)
}

/// Shallow merge: top-level fields of `patch` overwrite those of `target`.
pub fn merge(target: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (target, patch) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Append `item` under a temporary id. An absent collection becomes `[item]`.
pub fn add_to_collection(current: Option<&Value>, item: &Value) -> Option<Value> {
    let mut placeholder = match item {
        Value::Object(fields) => fields.clone(),
        _ => Map::new(),
    };
    placeholder.insert("id".into(), Value::String(temp_id()));
    let placeholder = Value::Object(placeholder);

    match current {
        None => Some(Value::Array(vec![placeholder])),
        Some(current) => {
            let mut next = current.clone();
            items_mut(&mut next)?.push(placeholder);
            Some(next)
        }
    }
}

/// Id of the placeholder `add_to_collection` appended to `optimistic`.
///
/// Placeholders are always appended, so the last temporary item is the one
/// this write added even when other creates are still pending.
pub fn placeholder_id(optimistic: Option<&Value>) -> Option<String> {
    let items = match optimistic? {
        Value::Array(items) => items,
        Value::Object(object) => object.get("data")?.as_array()?,
        _ => return None,
    };
    items
        .iter()
        .rev()
        .filter_map(item_id)
        .find(|id| is_temp_id(id))
        .map(str::to_string)
}

/// Swap one placeholder for the server's item.
///
/// Other placeholders are left alone. When the placeholder is gone (the list
/// was refetched meanwhile) the server item replaces an item with the same id,
/// or is appended.
pub fn commit_added(
    current: Option<&Value>,
    placeholder: Option<&str>,
    server_item: &Value,
) -> Option<Value> {
    let Some(current) = current else {
        return Some(Value::Array(vec![server_item.clone()]));
    };

    let mut next = current.clone();
    let items = items_mut(&mut next)?;
    let server_id = item_id(server_item).map(str::to_string);
    let slot_of = |id: Option<&str>| id.and_then(|id| items.iter().position(|item| item_id(item) == Some(id)));
    let placeholder_at = slot_of(placeholder);
    let existing_at = slot_of(server_id.as_deref());

    match (placeholder_at, existing_at) {
        (Some(at), Some(_)) => {
            items.remove(at);
        }
        (Some(at), None) | (None, Some(at)) => items[at] = server_item.clone(),
        (None, None) => items.push(server_item.clone()),
    }
    Some(next)
}

/// Shallow-merge `patch` into the item with `id`.
pub fn update_in_collection(current: Option<&Value>, id: &str, patch: &Value) -> Option<Value> {
    let mut next = current?.clone();
    let item = items_mut(&mut next)?
        .iter_mut()
        .find(|item| item_id(item) == Some(id))?;
    merge(item, patch);
    Some(next)
}

/// Drop the item with `id`.
pub fn remove_from_collection(current: Option<&Value>, id: &str) -> Option<Value> {
    let mut next = current?.clone();
    let items = items_mut(&mut next)?;
    let before = items.len();
    items.retain(|item| item_id(item) != Some(id));
    (items.len() < before).then_some(next)
}

/// Shallow-merge `patch` into a cached detail object.
pub fn replace_value(current: Option<&Value>, patch: &Value) -> Option<Value> {
    let current = current?;
    if !current.is_object() {
        return None;
    }
    let mut next = current.clone();
    merge(&mut next, patch);
    Some(next)
}
