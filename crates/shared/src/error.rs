use serde::Deserialize;
use serde_json::Value;

/// Best-effort shape of a REST error body. The backend is not consistent
/// about error payloads, so every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

impl ApiErrorBody {
    /// Extracts a human-readable error message from a response body, if the
    /// body carries one.
    pub fn message_from(body: &Value) -> Option<String> {
        serde_json::from_value::<ApiErrorBody>(body.clone())
            .ok()
            .filter(|decoded| !decoded.message.is_empty())
            .map(|decoded| decoded.message)
    }
}
