//! Completion webhook payloads.
//!
//! The service posts JSON of the shape
//! `{"type": "<event>", "data": {"modelId": ..., "status": ..., ...}}`.
//! Any well-formed JSON body is accepted: fields are read best-effort and a
//! field of an unexpected type is treated as absent. Scalars (numeric ids,
//! booleans) are kept in their JSON text form.

use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookPayload {
    /// Event kind, e.g. `model.completed`.
    pub kind: Option<String>,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookData {
    pub model_id: Option<String>,
    pub status: Option<String>,
    pub viewer_url: Option<String>,
    pub download_url: Option<String>,
}

impl WebhookPayload {
    /// Parse a raw webhook body.
    ///
    /// Fails only when the body is not valid JSON.
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(body)?;
        Ok(Self::from_value(&value))
    }

    /// Extract the known fields from an arbitrary JSON value.
    pub fn from_value(value: &Value) -> Self {
        let data = value.get("data").unwrap_or(&Value::Null);
        Self {
            kind: scalar(value.get("type")),
            data: WebhookData {
                model_id: scalar(data.get("modelId")),
                status: scalar(data.get("status")),
                viewer_url: scalar(data.get("viewerUrl")),
                download_url: scalar(data.get("downloadUrl")),
            },
        }
    }
}

fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        v @ (Value::Number(_) | Value::Bool(_)) => Some(v.to_string()),
        _ => None,
    }
}
