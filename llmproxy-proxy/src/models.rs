//! Static model descriptors appended to the upstream `GET /models`
//! response's `data` array (§4.5 "Models-listing path").

use serde_json::{json, Value};

/// Small, fixed list of provider-specific descriptors this proxy always
/// advertises regardless of what the configured upstream reports.
pub fn static_model_descriptors() -> Vec<Value> {
    vec![
        json!({"id": "gpt-4o", "object": "model", "owned_by": "llm-key-proxy"}),
        json!({"id": "gpt-4o-mini", "object": "model", "owned_by": "llm-key-proxy"}),
        json!({"id": "gemini-1.5-pro", "object": "model", "owned_by": "llm-key-proxy"}),
    ]
}

/// Appends the static descriptors to whatever the upstream returned,
/// tolerating a missing or malformed `data` array by starting fresh.
pub fn augment_models_response(mut upstream_body: Value) -> Value {
    let mut data = upstream_body
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    data.extend(static_model_descriptors());
    if let Some(obj) = upstream_body.as_object_mut() {
        obj.insert("data".to_string(), Value::Array(data));
        obj.entry("object").or_insert_with(|| json!("list"));
    } else {
        upstream_body = json!({"object": "list", "data": data});
    }
    upstream_body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn augments_existing_data_array() {
        let upstream = json!({"object": "list", "data": [{"id": "upstream-model"}]});
        let augmented = augment_models_response(upstream);
        let data = augmented["data"].as_array().unwrap();
        assert_eq!(data.len(), 1 + static_model_descriptors().len());
        assert_eq!(data[0]["id"], "upstream-model");
    }

    #[test]
    fn tolerates_missing_data_field() {
        let upstream = json!({"object": "list"});
        let augmented = augment_models_response(upstream);
        let data = augmented["data"].as_array().unwrap();
        assert_eq!(data.len(), static_model_descriptors().len());
    }
}
