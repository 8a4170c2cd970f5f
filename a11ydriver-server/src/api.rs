use a11ydriver::{
    capabilities::millis, Accessible, LocateMode, Locator, Session, SessionHandle,
    SessionManager, WebDriverError, ELEMENT_KEY,
};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::helpers::{element_origins, resolve_element_origins, DesktopHelpers};
use crate::types::{
    AppIdRequest, AppState as AppStateCode, GetClipboardRequest, ImplicitWaitRequest,
    KeycodeRequest, LocateRequest, NewSessionResponse, SessionCapabilities, SetClipboardRequest,
    StatusResponse, TextRequest,
};

/// Screenshots and clipboard payloads travel base64-encoded in bodies.
const BODY_LIMIT: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub helpers: Arc<dyn DesktopHelpers>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/session", post(new_session))
        .route("/session/{id}", delete(delete_session))
        .route("/session/{id}/timeouts", get(get_timeouts).post(set_timeouts))
        .route("/session/{id}/timeouts/implicit_wait", post(set_implicit_wait))
        .route("/session/{id}/source", get(source))
        .route("/session/{id}/sourceRaw", get(source_raw))
        .route("/session/{id}/element", get(find_element).post(find_element))
        .route("/session/{id}/elements", get(find_elements).post(find_elements))
        .route("/session/{id}/element/{eid}/element", post(find_element_from))
        .route("/session/{id}/element/{eid}/elements", post(find_elements_from))
        .route("/session/{id}/element/{eid}/click", get(click).post(click))
        .route("/session/{id}/element/{eid}/text", get(text))
        .route("/session/{id}/element/{eid}/enabled", get(enabled))
        .route("/session/{id}/element/{eid}/displayed", get(displayed))
        .route("/session/{id}/element/{eid}/selected", get(selected))
        .route("/session/{id}/element/{eid}/attribute/{name}", get(attribute))
        .route("/session/{id}/element/{eid}/rect", get(rect))
        .route("/session/{id}/element/{eid}/name", get(tag_name))
        .route("/session/{id}/element/{eid}/value", post(send_keys))
        .route("/session/{id}/element/{eid}/clear", post(clear))
        .route("/session/{id}/actions", post(perform_actions).delete(release_actions))
        .route("/session/{id}/screenshot", get(screenshot))
        .route("/session/{id}/appium/device/app_state", post(app_state))
        .route("/session/{id}/appium/device/terminate_app", post(terminate_app))
        .route("/session/{id}/appium/device/press_keycode", post(press_keycode))
        .route("/session/{id}/appium/device/get_clipboard", post(get_clipboard))
        .route("/session/{id}/appium/device/set_clipboard", post(set_clipboard))
        .route("/session/{id}/appium/element/{eid}/value", post(set_element_value))
        .route("/session/{id}/appium/compare_images", post(compare_images))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state)
}

// ============================================================================
// Error Handling
// ============================================================================

/// A [`WebDriverError`] rendered as the W3C error envelope.
#[derive(Debug)]
pub struct W3cError(pub WebDriverError);

impl W3cError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            WebDriverError::InvalidArgument(_)
            | WebDriverError::NoSuchWindow(_)
            | WebDriverError::NoSuchElement(_) => StatusCode::NOT_FOUND,
            WebDriverError::SessionNotCreated(_)
            | WebDriverError::UnsupportedOperation(_)
            | WebDriverError::UnknownError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for W3cError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self.0);
        } else {
            info!("{}", self.0);
        }
        (
            status,
            Json(json!({
                "value": {
                    "error": self.0.error_code(),
                    "message": self.0.message(),
                    "stacktrace": format!("{:?}", self.0),
                }
            })),
        )
            .into_response()
    }
}

impl<E: Into<WebDriverError>> From<E> for W3cError {
    fn from(err: E) -> Self {
        W3cError(err.into())
    }
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "request handler panicked".to_string()
    };
    W3cError(WebDriverError::UnknownError(detail)).into_response()
}

type ApiResult = Result<Json<Value>, W3cError>;

fn value(v: impl Serialize) -> ApiResult {
    let v = serde_json::to_value(v)
        .map_err(|e| WebDriverError::UnknownError(format!("failed to encode response: {e}")))?;
    Ok(Json(json!({ "value": v })))
}

/// Parses a JSON body without insisting on a content type. An empty body
/// reads as `{}`.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, W3cError> {
    let parsed = if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_value(json!({}))
    } else {
        serde_json::from_slice(body)
    };
    parsed.map_err(|e| W3cError(WebDriverError::InvalidArgument(format!("malformed request body: {e}"))))
}

fn element_reference(handle: String) -> Value {
    let mut reference = serde_json::Map::new();
    reference.insert(ELEMENT_KEY.to_string(), Value::String(handle));
    Value::Object(reference)
}

async fn session(state: &AppState, id: &str) -> Result<SessionHandle, W3cError> {
    Ok(state.manager.get_session(id).await?)
}

/// Looks up session `id` and holds its lock until the guard drops, so desktop
/// work for one session never interleaves.
async fn locked(state: &AppState, id: &str) -> Result<OwnedMutexGuard<Session>, W3cError> {
    Ok(session(state, id).await?.lock_owned().await)
}

/// Resolves `eid` in session `id`. The returned guard keeps the session
/// locked while the caller works on the element.
async fn element(
    state: &AppState,
    id: &str,
    eid: &str,
) -> Result<(OwnedMutexGuard<Session>, Accessible), W3cError> {
    let session = locked(state, id).await?;
    let element = session.element(eid)?.clone();
    Ok((session, element))
}

// ============================================================================
// Status & Sessions
// ============================================================================

pub async fn status() -> ApiResult {
    value(StatusResponse {
        ready: true,
        message: "ready to drive accessible applications".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn new_session(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let body: Value = parse_body(&body)?;
    let handle = state
        .manager
        .create_session(&body)
        .await
        .map_err(|e| match e {
            WebDriverError::InvalidArgument(m) => WebDriverError::SessionNotCreated(m),
            other => other,
        })?;
    let session = handle.lock().await;
    let app = session.browsing_context.name().await.unwrap_or_else(|_| session.app.clone());
    value(NewSessionResponse {
        session_id: session.id.clone(),
        capabilities: SessionCapabilities { app },
    })
}

pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.manager.delete_session(&id).await?;
    value(Value::Null)
}

pub async fn get_timeouts(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    value(state.manager.timeouts(&id).await?)
}

pub async fn set_timeouts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let body: Value = parse_body(&body)?;
    state.manager.set_timeouts(&id, &body).await?;
    value(Value::Null)
}

pub async fn set_implicit_wait(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let request: ImplicitWaitRequest = parse_body(&body)?;
    let ms = millis("ms", &request.ms)?;
    state.manager.set_implicit_timeout(&id, ms).await?;
    value(Value::Null)
}

pub async fn source(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let session = locked(&state, &id).await?;
    let xml = session.source(false, state.manager.config()).await?;
    value(xml)
}

/// The pretty-printed tree as plain XML, outside the JSON envelope.
pub async fn source_raw(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, W3cError> {
    let session = locked(&state, &id).await?;
    let xml = session.source(true, state.manager.config()).await?;
    Ok(([(header::CONTENT_TYPE, "application/xml")], xml).into_response())
}

// ============================================================================
// Locating
// ============================================================================

fn locator(body: &Bytes) -> Result<Locator, W3cError> {
    let request: LocateRequest = parse_body(body)?;
    Ok(Locator::new(&request.using, &request.value)?)
}

async fn locate_one(state: &AppState, id: &str, within: Option<&str>, body: &Bytes) -> ApiResult {
    let locator = locator(body)?;
    let mut session = locked(state, id).await?;
    let handle = session
        .find_element(locator, within, state.manager.config())
        .await?;
    value(element_reference(handle))
}

async fn locate_all(state: &AppState, id: &str, within: Option<&str>, body: &Bytes) -> ApiResult {
    let locator = locator(body)?;
    let description = format!("{} '{}'", locator.strategy(), locator.selector());
    let mut session = locked(state, id).await?;
    let handles = session
        .find_elements(locator, within, LocateMode::All, state.manager.config())
        .await?;
    if handles.is_empty() {
        return Err(W3cError(WebDriverError::NoSuchElement(format!(
            "no elements match {description}"
        ))));
    }
    value(handles.into_iter().map(element_reference).collect::<Vec<_>>())
}

pub async fn find_element(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    locate_one(&state, &id, None, &body).await
}

pub async fn find_elements(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    locate_all(&state, &id, None, &body).await
}

pub async fn find_element_from(
    State(state): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult {
    locate_one(&state, &id, Some(&eid), &body).await
}

pub async fn find_elements_from(
    State(state): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult {
    locate_all(&state, &id, Some(&eid), &body).await
}

// ============================================================================
// Element State & Interaction
// ============================================================================

pub async fn click(
    State(state): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
) -> ApiResult {
    let (_session, element) = element(&state, &id, &eid).await?;
    element.click(state.manager.config().settle_delay).await?;
    value(Value::Null)
}

pub async fn text(
    State(state): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
) -> ApiResult {
    let (_session, element) = element(&state, &id, &eid).await?;
    value(element.display_text().await?)
}

pub async fn enabled(
    State(state): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
) -> ApiResult {
    let (_session, element) = element(&state, &id, &eid).await?;
    value(element.is_enabled().await?)
}

pub async fn displayed(
    State(state): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
) -> ApiResult {
    let (_session, element) = element(&state, &id, &eid).await?;
    value(element.is_displayed().await?)
}

pub async fn selected(
    State(state): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
) -> ApiResult {
    let (_session, element) = element(&state, &id, &eid).await?;
    value(element.is_selected().await?)
}

pub async fn attribute(
    State(state): State<AppState>,
    Path((id, eid, name)): Path<(String, String, String)>,
) -> ApiResult {
    let (_session, element) = element(&state, &id, &eid).await?;
    value(element.attribute(&name).await?)
}

pub async fn rect(
    State(state): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
) -> ApiResult {
    let (_session, element) = element(&state, &id, &eid).await?;
    value(element.extents().await?)
}

pub async fn tag_name(
    State(state): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
) -> ApiResult {
    let (_session, element) = element(&state, &id, &eid).await?;
    value(element.role_name().await?)
}

fn required_text(body: &Bytes) -> Result<String, W3cError> {
    let request: TextRequest = parse_body(body)?;
    request.into_text().ok_or_else(|| {
        W3cError(WebDriverError::InvalidArgument(
            "expected 'text' or 'value' in body".to_string(),
        ))
    })
}

/// Types into the element: editable text is inserted directly, anything
/// else is focused and receives synthesized key presses.
pub async fn send_keys(
    State(state): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult {
    let text = required_text(&body)?;
    let (_session, element) = element(&state, &id, &eid).await?;
    if !element.insert_text(&text).await? {
        if !element.focus(state.manager.config().settle_delay).await? {
            return Err(W3cError(WebDriverError::UnsupportedOperation(
                "element accepts neither text insertion nor focus".to_string(),
            )));
        }
        state.manager.type_text(&text).await?;
    }
    value(Value::Null)
}

pub async fn clear(
    State(state): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
) -> ApiResult {
    let (_session, element) = element(&state, &id, &eid).await?;
    element.clear().await?;
    value(Value::Null)
}

/// Sets a numeric value through the Value interface, or replaces the text.
pub async fn set_element_value(
    State(state): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult {
    let text = required_text(&body)?;
    let (_session, element) = element(&state, &id, &eid).await?;
    element.set_value(&text).await?;
    value(Value::Null)
}

// ============================================================================
// Input Actions
// ============================================================================

pub async fn perform_actions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let mut actions: Value = parse_body(&body)?;
    if !actions.get("actions").is_some_and(Value::is_array) {
        return Err(W3cError(WebDriverError::InvalidArgument(
            "'actions' must be an array".to_string(),
        )));
    }

    let session = locked(&state, &id).await?;
    let mut centers = HashMap::new();
    for eid in element_origins(&actions) {
        let center = session.element(&eid)?.extents().await?.center();
        centers.insert(eid, center);
    }
    resolve_element_origins(&mut actions, &centers)?;

    info!("performing actions for session {id}");
    state.helpers.perform_actions(&actions).await?;
    value(Value::Null)
}

/// Nothing stays pressed between action batches, so there is nothing to
/// release.
pub async fn release_actions(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    session(&state, &id).await?;
    value(Value::Null)
}

pub async fn screenshot(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let session = locked(&state, &id).await?;
    let window = session.browsing_context.child_at(0).await?.ok_or_else(|| {
        WebDriverError::NoSuchWindow(format!("session {id} has no window to capture"))
    })?;
    let area = window.extents().await?;
    let png = state.helpers.screenshot(area).await?;
    value(STANDARD.encode(png))
}

// ============================================================================
// Appium Device Extensions
// ============================================================================

async fn pid_for_app_id(state: &AppState, app_id: &str) -> Result<Option<u32>, W3cError> {
    let apps = state.helpers.app_ids().await?;
    Ok(apps
        .into_iter()
        .find_map(|(pid, id)| (id == app_id).then_some(pid)))
}

pub async fn app_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let _session = locked(&state, &id).await?;
    let request: AppIdRequest = parse_body(&body)?;
    let code = match pid_for_app_id(&state, &request.app_id).await? {
        Some(_) => AppStateCode::RunningInForeground,
        None => AppStateCode::NotRunning,
    };
    value(code.code())
}

pub async fn terminate_app(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let _session = locked(&state, &id).await?;
    let request: AppIdRequest = parse_body(&body)?;
    if let Some(pid) = pid_for_app_id(&state, &request.app_id).await? {
        state.manager.terminate_process(pid).await?;
    }
    value(Value::Null)
}

pub async fn press_keycode(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let _session = locked(&state, &id).await?;
    let request: KeycodeRequest = parse_body(&body)?;
    let keys = match request.keycode {
        Value::String(keys) => keys,
        Value::Number(code) => code.to_string(),
        other => {
            return Err(W3cError(WebDriverError::InvalidArgument(format!(
                "'keycode' must be a string, got {other}"
            ))))
        }
    };
    state.manager.type_text(&keys).await?;
    value(Value::Null)
}

fn check_plaintext(content_type: Option<&str>) -> Result<(), W3cError> {
    match content_type {
        None | Some("plaintext") => Ok(()),
        Some(other) => Err(W3cError(WebDriverError::UnsupportedOperation(format!(
            "clipboard content type '{other}'"
        )))),
    }
}

pub async fn get_clipboard(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let _session = locked(&state, &id).await?;
    let request: GetClipboardRequest = parse_body(&body)?;
    check_plaintext(request.content_type.as_deref())?;
    let text = state.helpers.clipboard_text().await?;
    value(STANDARD.encode(text))
}

pub async fn set_clipboard(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let _session = locked(&state, &id).await?;
    let request: SetClipboardRequest = parse_body(&body)?;
    check_plaintext(request.content_type.as_deref())?;
    let decoded = STANDARD
        .decode(request.content.as_bytes())
        .map_err(|e| WebDriverError::InvalidArgument(format!("clipboard content is not base64: {e}")))?;
    let text = String::from_utf8(decoded)
        .map_err(|e| WebDriverError::InvalidArgument(format!("clipboard content is not UTF-8: {e}")))?;
    state.helpers.set_clipboard_text(&text).await?;
    value(Value::Null)
}

pub async fn compare_images(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    session(&state, &id).await?;
    Err(W3cError(WebDriverError::UnsupportedOperation(
        "image comparison is not available".to_string(),
    )))
}
