//! Decoding of the caller's request envelope and the defaults applied before forwarding.
use crate::errors::RelayError;
use serde_json::{Map, Value, json};
use tracing::debug;

/// Environment variable supplying `model` when the caller leaves it out.
pub const DEFAULT_MODEL_ENV_VAR: &str = "CB_OPENAI_MODEL";

pub type Payload = Map<String, Value>;

/// Parses the raw body. Anything that is valid JSON but not an object is rejected separately
/// from a parse failure.
pub fn decode(body: &[u8]) -> Result<Payload, RelayError> {
    match serde_json::from_slice(body).map_err(RelayError::InvalidJson)? {
        Value::Object(map) => Ok(map),
        other => Err(RelayError::InvalidPayloadShape {
            found: json_type_name(&other),
        }),
    }
}

/// Fills `model` (when missing, null or blank) from `default_model`, and `response_format`
/// (when missing or null) with `{"type": "json_object"}`. Values the caller set are kept.
pub fn apply_defaults(payload: &mut Payload, default_model: Option<String>) {
    let model_missing = match payload.get("model") {
        None | Some(Value::Null) => true,
        Some(Value::String(model)) => model.trim().is_empty(),
        Some(_) => false,
    };
    if model_missing && let Some(model) = default_model {
        debug!(model = %model, "Using default model");
        payload.insert("model".to_owned(), Value::String(model));
    }

    if matches!(payload.get("response_format"), None | Some(Value::Null)) {
        payload.insert(
            "response_format".to_owned(),
            json!({ "type": "json_object" }),
        );
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
