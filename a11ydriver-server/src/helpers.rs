//! Desktop services the accessibility bus does not provide: pointer and
//! keyboard synthesis, screenshots, window-to-app-id listing and the
//! clipboard. Most are delegated to small external helper programs.

use a11ydriver::{Rect, WebDriverError, ELEMENT_KEY};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[async_trait::async_trait]
pub trait DesktopHelpers: Send + Sync {
    /// Replays a W3C actions payload whose element origins are already
    /// resolved to viewport coordinates.
    async fn perform_actions(&self, actions: &Value) -> Result<(), WebDriverError>;

    /// Captures `area` of the screen as PNG bytes.
    async fn screenshot(&self, area: Rect) -> Result<Vec<u8>, WebDriverError>;

    /// Application ids of the open windows, keyed by owning pid.
    async fn app_ids(&self) -> Result<HashMap<u32, String>, WebDriverError>;

    async fn clipboard_text(&self) -> Result<String, WebDriverError>;

    async fn set_clipboard_text(&self, text: &str) -> Result<(), WebDriverError>;
}

/// Names (or paths) of the helper executables.
#[derive(Debug, Clone)]
pub struct HelperPrograms {
    pub inputsynth: String,
    pub screenshotter: String,
    pub appidlister: String,
}

impl Default for HelperPrograms {
    fn default() -> Self {
        Self {
            inputsynth: "selenium-webdriver-at-spi-inputsynth".to_string(),
            screenshotter: "selenium-webdriver-at-spi-screenshotter".to_string(),
            appidlister: "selenium-webdriver-at-spi-appidlister".to_string(),
        }
    }
}

/// [`DesktopHelpers`] backed by the helper programs and the system clipboard.
#[derive(Debug, Clone, Default)]
pub struct ExternalHelpers {
    programs: HelperPrograms,
}

impl ExternalHelpers {
    pub fn new(programs: HelperPrograms) -> Self {
        Self { programs }
    }
}

async fn run_helper(program: &str, args: &[String]) -> Result<Output, WebDriverError> {
    debug!("running {program} {args:?}");
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| WebDriverError::UnknownError(format!("failed to run {program}: {e}")))?;
    if !output.status.success() {
        return Err(WebDriverError::UnknownError(format!(
            "{program} failed with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output)
}

#[async_trait::async_trait]
impl DesktopHelpers for ExternalHelpers {
    async fn perform_actions(&self, actions: &Value) -> Result<(), WebDriverError> {
        let mut file = tempfile::Builder::new()
            .prefix("a11ydriver-actions-")
            .suffix(".json")
            .tempfile()
            .map_err(|e| WebDriverError::UnknownError(format!("failed to create actions file: {e}")))?;
        serde_json::to_writer(&mut file, actions)
            .map_err(|e| WebDriverError::UnknownError(format!("failed to write actions: {e}")))?;
        file.flush()
            .map_err(|e| WebDriverError::UnknownError(format!("failed to write actions: {e}")))?;

        // The file is removed when `file` drops, after the helper exits.
        let path = file.path().to_string_lossy().into_owned();
        run_helper(&self.programs.inputsynth, &[path]).await?;
        Ok(())
    }

    async fn screenshot(&self, area: Rect) -> Result<Vec<u8>, WebDriverError> {
        let args = [area.x, area.y, area.width, area.height].map(|n| n.to_string());
        let output = run_helper(&self.programs.screenshotter, &args).await?;

        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if path.is_empty() {
            return Err(WebDriverError::UnknownError(format!(
                "{} did not report an image file",
                self.programs.screenshotter
            )));
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| WebDriverError::UnknownError(format!("failed to read {path}: {e}")))?;
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!("failed to remove screenshot {path}: {e}");
        }
        info!("captured {} bytes from {area:?}", bytes.len());
        Ok(bytes)
    }

    async fn app_ids(&self) -> Result<HashMap<u32, String>, WebDriverError> {
        let output = run_helper(&self.programs.appidlister, &[]).await?;
        parse_app_ids(&output.stdout)
    }

    async fn clipboard_text(&self) -> Result<String, WebDriverError> {
        tokio::task::spawn_blocking(|| arboard::Clipboard::new()?.get_text())
            .await
            .map_err(|e| WebDriverError::UnknownError(format!("clipboard task failed: {e}")))?
            .map_err(|e| WebDriverError::UnknownError(format!("clipboard unavailable: {e}")))
    }

    async fn set_clipboard_text(&self, text: &str) -> Result<(), WebDriverError> {
        let text = text.to_string();
        tokio::task::spawn_blocking(move || arboard::Clipboard::new()?.set_text(text))
            .await
            .map_err(|e| WebDriverError::UnknownError(format!("clipboard task failed: {e}")))?
            .map_err(|e| WebDriverError::UnknownError(format!("clipboard unavailable: {e}")))
    }
}

/// Parses the app-id lister's `{"<pid>": "<app id>"}` object.
pub fn parse_app_ids(stdout: &[u8]) -> Result<HashMap<u32, String>, WebDriverError> {
    let raw: HashMap<String, String> = serde_json::from_slice(stdout)
        .map_err(|e| WebDriverError::UnknownError(format!("unreadable app id listing: {e}")))?;
    Ok(raw
        .into_iter()
        .filter_map(|(pid, app_id)| match pid.parse() {
            Ok(pid) => Some((pid, app_id)),
            Err(_) => {
                debug!("ignoring non-numeric pid '{pid}'");
                None
            }
        })
        .collect())
}

// ============================================================================
// W3C action origins
// ============================================================================

fn pointer_moves(actions: &Value) -> impl Iterator<Item = &Value> {
    actions
        .get("actions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|source| source.get("type").and_then(Value::as_str) == Some("pointer"))
        .filter_map(|source| source.get("actions").and_then(Value::as_array))
        .flatten()
        .filter(|action| action.get("type").and_then(Value::as_str) == Some("pointerMove"))
}

fn origin_handle(action: &Value) -> Option<&str> {
    action.get("origin")?.get(ELEMENT_KEY)?.as_str()
}

/// Element handles used as `pointerMove` origins, in payload order.
pub fn element_origins(actions: &Value) -> Vec<String> {
    let mut handles: Vec<String> = Vec::new();
    for handle in pointer_moves(actions).filter_map(origin_handle) {
        if !handles.iter().any(|h| h == handle) {
            handles.push(handle.to_string());
        }
    }
    handles
}

/// Rewrites element-relative `pointerMove`s to viewport coordinates:
/// the element's center plus the action's offset.
pub fn resolve_element_origins(
    actions: &mut Value,
    centers: &HashMap<String, (i32, i32)>,
) -> Result<(), WebDriverError> {
    let Some(sources) = actions.get_mut("actions").and_then(Value::as_array_mut) else {
        return Ok(());
    };
    for source in sources {
        if source.get("type").and_then(Value::as_str) != Some("pointer") {
            continue;
        }
        let Some(steps) = source.get_mut("actions").and_then(Value::as_array_mut) else {
            continue;
        };
        for step in steps {
            if step.get("type").and_then(Value::as_str) != Some("pointerMove") {
                continue;
            }
            let Some(handle) = origin_handle(step).map(str::to_string) else {
                continue;
            };
            let (cx, cy) = centers.get(&handle).copied().ok_or_else(|| {
                WebDriverError::NoSuchElement(format!("no element with handle '{handle}'"))
            })?;
            let offset = |key: &str| step.get(key).and_then(Value::as_f64).unwrap_or(0.0).round() as i64;
            let (x, y) = (i64::from(cx) + offset("x"), i64::from(cy) + offset("y"));

            if let Some(fields) = step.as_object_mut() {
                fields.insert("x".to_string(), Value::from(x));
                fields.insert("y".to_string(), Value::from(y));
                fields.insert("origin".to_string(), Value::from("viewport"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn element(handle: &str) -> Value {
        let mut origin = serde_json::Map::new();
        origin.insert(ELEMENT_KEY.to_string(), Value::from(handle));
        Value::Object(origin)
    }

    fn payload() -> Value {
        json!({
            "actions": [
                {
                    "type": "pointer",
                    "id": "finger",
                    "parameters": {"pointerType": "touch"},
                    "actions": [
                        {"type": "pointerMove", "duration": 0, "x": 5, "y": -3, "origin": element("e-0-1")},
                        {"type": "pointerDown", "button": 0},
                        {"type": "pause", "duration": 100},
                        {"type": "pointerMove", "duration": 250, "x": 40, "y": 40, "origin": "pointer"},
                        {"type": "pointerMove", "duration": 0, "origin": element("e-0-1")},
                        {"type": "pointerUp", "button": 0}
                    ]
                },
                {
                    "type": "key",
                    "id": "keyboard",
                    "actions": [{"type": "keyDown", "value": "a"}]
                }
            ]
        })
    }

    #[test]
    fn test_element_origins_are_collected_once() {
        assert_eq!(element_origins(&payload()), vec!["e-0-1".to_string()]);
        assert!(element_origins(&json!({})).is_empty());
    }

    #[test]
    fn test_element_origin_becomes_viewport_point() {
        let mut actions = payload();
        let centers = HashMap::from([("e-0-1".to_string(), (120, 80))]);
        resolve_element_origins(&mut actions, &centers).unwrap();

        let steps = &actions["actions"][0]["actions"];
        assert_eq!(steps[0]["x"], 125);
        assert_eq!(steps[0]["y"], 77);
        assert_eq!(steps[0]["origin"], "viewport");
        // Relative moves are left for the synthesizer.
        assert_eq!(steps[3]["origin"], "pointer");
        assert_eq!(steps[3]["x"], 40);
        // A missing offset means the center itself.
        assert_eq!(steps[4]["x"], 120);
        assert_eq!(steps[4]["y"], 80);
        assert_eq!(actions["actions"][1], payload()["actions"][1]);
    }

    #[test]
    fn test_unknown_origin_handle() {
        let mut actions = payload();
        let result = resolve_element_origins(&mut actions, &HashMap::new());
        assert!(matches!(result, Err(WebDriverError::NoSuchElement(_))));
    }

    #[test]
    fn test_parse_app_ids() {
        let ids = parse_app_ids(br#"{"4242": "org.kde.kcalc", "x": "junk"}"#).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids.get(&4242).map(String::as_str), Some("org.kde.kcalc"));
        assert!(parse_app_ids(b"not json").is_err());
    }
}
