//! Google-grounding request-body mutation (§4.5 step 4). Any non-Google
//! endpoint leaves the body untouched regardless of the `Settings` flag.

use serde_json::{json, Value};

const GOOGLE_HOST: &str = "generativelanguage.googleapis.com";

pub fn is_google_endpoint(endpoint: &str) -> bool {
    endpoint.contains(GOOGLE_HOST)
}

/// Mutates `body` in place per §4.5 step 4. Callers must first check
/// `settings.enable_google_grounding && is_google_endpoint(endpoint)`.
pub fn apply_google_grounding(body: &mut Value) {
    let model_is_gemini = body.get("model").and_then(Value::as_str).map(|m| m.contains("gemini")).unwrap_or(false);

    let Some(obj) = body.as_object_mut() else {
        return;
    };

    if model_is_gemini {
        obj.insert("tools".to_string(), json!([]));
    } else {
        obj.insert("tools".to_string(), json!([{ "googleSearchRetrieval": {} }]));
    }
    obj.insert("tool_choice".to_string(), json!("auto"));
}
