use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Request Types
// ============================================================================

/// Body of the `element` / `elements` routes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocateRequest {
    #[serde(default)]
    pub using: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImplicitWaitRequest {
    #[serde(default)]
    pub ms: Value,
}

/// Text to type or set. Clients send either `text` or the W3C `value`
/// character array.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub value: Option<Vec<String>>,
}

impl TextRequest {
    pub fn into_text(self) -> Option<String> {
        self.text.or_else(|| self.value.map(|chars| chars.concat()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppIdRequest {
    #[serde(rename = "appId", alias = "bundleId", default)]
    pub app_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeycodeRequest {
    #[serde(default)]
    pub keycode: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetClipboardRequest {
    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetClipboardRequest {
    /// Base64-encoded clipboard text.
    #[serde(default)]
    pub content: String,
    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub ready: bool,
    pub message: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewSessionResponse {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub capabilities: SessionCapabilities,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionCapabilities {
    /// Name of the accessible the session is bound to.
    pub app: String,
}

/// `app_state` result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    NotRunning = 1,
    RunningInForeground = 4,
}

impl AppState {
    pub fn code(self) -> u8 {
        self as u8
    }
}
