use serde::{Deserialize, Serialize};

/// Query string accepted by the producer endpoints.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SendQuery {
    #[serde(default, rename = "str")]
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
