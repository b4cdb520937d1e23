//! Response normalization.
//!
//! Backends speak one of two REST conventions: a wrapped envelope
//! (`{ success, data, message }`) or Django Ninja's direct style, which returns
//! payloads as-is, pages as `{ items, count, page, page_size, pages }` and errors
//! as `{ detail }`. [`classify`] decides which shape a body has, in a fixed
//! priority order, and [`normalize`] collapses every shape into the one
//! canonical payload the rest of the crate works with.

use crate::error::{ResyncError, Result};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

const DEFAULT_FAILURE_MESSAGE: &str = "API request failed";

/// Structural classification of a raw response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseShape<'a> {
    /// `{ success: bool, data, message? }`
    Wrapped {
        success: bool,
        data: &'a Value,
        message: Option<&'a str>,
    },
    /// `{ items, count, page, page_size?, pages? }`
    Paginated {
        items: &'a Value,
        count: u64,
        page: u64,
        page_size: Option<u64>,
        pages: Option<u64>,
    },
    /// `{ detail: "..." }` or `{ detail: [{ msg }, ...] }`, already joined.
    ErrorDetail(String),
    /// Anything else is taken to be canonical already.
    Direct(&'a Value),
}

/// Classify a response body. Priority: wrapped, paginated, error detail, direct.
pub fn classify(raw: &Value) -> ResponseShape<'_> {
    let Some(object) = raw.as_object() else {
        return ResponseShape::Direct(raw);
    };

    if let (Some(Value::Bool(success)), Some(data)) = (object.get("success"), object.get("data")) {
        return ResponseShape::Wrapped {
            success: *success,
            data,
            message: object.get("message").and_then(Value::as_str),
        };
    }

    if let (Some(items), Some(count), Some(page)) = (
        object.get("items"),
        object.get("count").and_then(Value::as_u64),
        object.get("page").and_then(Value::as_u64),
    ) {
        return ResponseShape::Paginated {
            items,
            count,
            page,
            page_size: object.get("page_size").and_then(Value::as_u64),
            pages: object.get("pages").and_then(Value::as_u64),
        };
    }

    if let Some(message) = object.get("detail").and_then(detail_message) {
        return ResponseShape::ErrorDetail(message);
    }

    ResponseShape::Direct(raw)
}

/// Normalize a successful response body into its canonical payload.
///
/// The input is never modified. A wrapped envelope around a Django page is
/// unwrapped and remapped in the same call.
pub fn normalize(raw: &Value) -> Result<Value> {
    match classify(raw) {
        ResponseShape::Wrapped {
            success: true,
            data,
            ..
        } => match classify(data) {
            paginated @ ResponseShape::Paginated { .. } => Ok(remap_page(paginated)),
            _ => Ok(data.clone()),
        },
        ResponseShape::Wrapped {
            success: false,
            message,
            ..
        } => Err(ResyncError::Api {
            message: message
                .filter(|m| !m.is_empty())
                .unwrap_or(DEFAULT_FAILURE_MESSAGE)
                .to_string(),
        }),
        paginated @ ResponseShape::Paginated { .. } => Ok(remap_page(paginated)),
        ResponseShape::ErrorDetail(message) => Err(ResyncError::Api { message }),
        ResponseShape::Direct(value) => Ok(value.clone()),
    }
}

/// Normalize a response that must be a page.
///
/// Fails with [`ResyncError::Normalization`] when the canonical payload does not
/// carry `data` and `pagination`.
pub fn normalize_paginated(raw: &Value) -> Result<Value> {
    let canonical = normalize(raw)?;
    let is_page = canonical
        .as_object()
        .is_some_and(|o| o.get("data").is_some_and(Value::is_array) && o.contains_key("pagination"));

    if is_page {
        Ok(canonical)
    } else {
        Err(ResyncError::Normalization("Unexpected response format".to_string()))
    }
}

/// Normalize and decode into a typed value.
pub fn normalize_into<T: DeserializeOwned>(raw: &Value) -> Result<T> {
    Ok(serde_json::from_value(normalize(raw)?)?)
}

/// Extract a human-readable message from an error response body.
///
/// Looks at `message`, then `detail` (string or list of `{ msg }`), then a
/// string `error` field.
pub fn error_message(raw: &Value) -> Option<String> {
    let object = raw.as_object()?;
    if let Some(message) = object.get("message").and_then(Value::as_str) {
        if !message.is_empty() {
            return Some(message.to_string());
        }
    }
    if let Some(message) = object.get("detail").and_then(detail_message) {
        return Some(message);
    }
    object
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn detail_message(detail: &Value) -> Option<String> {
    match detail {
        Value::String(s) => Some(s.clone()),
        Value::Array(entries) => Some(
            entries
                .iter()
                .filter_map(|d| d.get("msg").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(", "),
        ),
        _ => None,
    }
}

fn remap_page(shape: ResponseShape<'_>) -> Value {
    let ResponseShape::Paginated {
        items,
        count,
        page,
        page_size,
        pages,
    } = shape
    else {
        return Value::Null;
    };

    let item_count = items.as_array().map(|a| a.len() as u64).unwrap_or(0);
    let limit = page_size.unwrap_or(item_count);
    let total_pages = pages.unwrap_or_else(|| {
        if limit == 0 {
            0
        } else {
            count.div_ceil(limit)
        }
    });

    let mut pagination = Map::new();
    pagination.insert("page".into(), json!(page));
    pagination.insert("limit".into(), json!(limit));
    pagination.insert("total".into(), json!(count));
    pagination.insert("totalPages".into(), json!(total_pages));

    json!({
        "data": items.clone(),
        "pagination": pagination,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_django_page_is_remapped() {
        let raw = json!({"items": [{"id": 1}], "count": 1, "page": 1, "page_size": 10, "pages": 1});
        let canonical = normalize(&raw).unwrap();
        assert_eq!(
            canonical,
            json!({
                "data": [{"id": 1}],
                "pagination": {"page": 1, "limit": 10, "total": 1, "totalPages": 1}
            })
        );
    }

    #[test]
    fn test_three_shapes_produce_identical_bytes() {
        let canonical = json!({
            "data": [{"id": "1", "title": "A"}, {"id": "2", "title": "B"}],
            "pagination": {"page": 2, "limit": 2, "total": 6, "totalPages": 3}
        });
        let wrapped = json!({"success": true, "data": canonical.clone(), "message": "ok"});
        let django = json!({
            "items": [{"id": "1", "title": "A"}, {"id": "2", "title": "B"}],
            "count": 6,
            "page": 2,
            "page_size": 2,
            "pages": 3
        });

        let outputs: Vec<String> = [&wrapped, &django, &canonical]
            .into_iter()
            .map(|raw| serde_json::to_string(&normalize_paginated(raw).unwrap()).unwrap())
            .collect();

        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[1], outputs[2]);
    }

    #[test]
    fn test_wrapped_failure_surfaces_message() {
        let raw = json!({"success": false, "data": null, "message": "Title is required"});
        let err = normalize(&raw).unwrap_err();
        assert_eq!(err.to_string(), "Title is required");

        let raw = json!({"success": false, "data": null});
        assert_eq!(normalize(&raw).unwrap_err().to_string(), "API request failed");
    }

    #[test]
    fn test_detail_list_is_joined() {
        let raw = json!({"detail": [{"msg": "field required", "loc": ["title"]}, {"msg": "too short"}]});
        assert_eq!(classify(&raw), ResponseShape::ErrorDetail("field required, too short".into()));
        assert_eq!(normalize(&raw).unwrap_err().to_string(), "field required, too short");
    }

    #[test]
    fn test_direct_passes_through_unchanged() {
        let raw = json!({"id": "7", "title": "Direct"});
        let before = raw.clone();
        assert_eq!(normalize(&raw).unwrap(), before);
        assert_eq!(raw, before);
    }

    #[test]
    fn test_non_boolean_success_is_not_an_envelope() {
        let raw = json!({"success": "yes", "data": 1});
        assert!(matches!(classify(&raw), ResponseShape::Direct(_)));
    }

    #[test]
    fn test_paginated_requires_page_shape() {
        let err = normalize_paginated(&json!({"id": "1"})).unwrap_err();
        assert!(matches!(err, ResyncError::Normalization(_)));
    }

    #[test]
    fn test_missing_page_size_is_derived() {
        let raw = json!({"items": [1, 2], "count": 5, "page": 1});
        let canonical = normalize(&raw).unwrap();
        assert_eq!(canonical["pagination"], json!({"page": 1, "limit": 2, "total": 5, "totalPages": 3}));
    }

    #[test]
    fn test_error_message_lookup_order() {
        assert_eq!(error_message(&json!({"message": "m", "detail": "d"})).as_deref(), Some("m"));
        assert_eq!(error_message(&json!({"detail": "Not found"})).as_deref(), Some("Not found"));
        assert_eq!(error_message(&json!("plain")), None);
    }
}
