use a11ydriver::platforms::memory::{MemoryEngine, MemoryNode};
use a11ydriver::{
    AppLauncher, AutomationError, DriverConfig, LaunchRequest, Rect, SessionManager, State,
    WebDriverError, ELEMENT_KEY,
};
use a11ydriver_server::{router, AppState, DesktopHelpers};
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tower::ServiceExt;

const KCALC_PID: u32 = 4242;

struct Desktop {
    one: Arc<MemoryNode>,
    display: Arc<MemoryNode>,
    slider: Arc<MemoryNode>,
    engine: Arc<MemoryEngine>,
}

fn desktop() -> Desktop {
    let shown = [State::Visible, State::Showing, State::Sensitive, State::Enabled];
    let one = MemoryNode::builder("push button")
        .name("1")
        .role(43)
        .accessible_id("KCalc.digits.one")
        .states(&shown)
        .actions(&["SetFocus", "Press"])
        .extents(Rect::new(110, 120, 40, 30))
        .build();
    let display = MemoryNode::builder("text")
        .name("display")
        .role(61)
        .text("0")
        .editable()
        .states(&[State::Visible, State::Sensitive, State::Editable])
        .build();
    let slider = MemoryNode::builder("slider")
        .name("volume")
        .role(51)
        .value(5.0)
        .states(&shown)
        .build();
    let frame = MemoryNode::builder("frame")
        .name("KCalc")
        .role(23)
        .states(&shown)
        .extents(Rect::new(100, 100, 400, 300))
        .child(one.clone())
        .child(display.clone())
        .child(slider.clone())
        .build();
    let app = MemoryNode::builder("application")
        .name("kcalc")
        .role(75)
        .process_id(KCALC_PID)
        .child(frame)
        .build();
    let root = MemoryNode::builder("desktop frame")
        .name("main")
        .toolkit("at-spi-registry")
        .child(app)
        .build();

    Desktop {
        one,
        display,
        slider,
        engine: Arc::new(MemoryEngine::new(root)),
    }
}

#[derive(Default)]
struct RecordingLauncher {
    terminated: Mutex<Vec<u32>>,
}

#[async_trait::async_trait]
impl AppLauncher for RecordingLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<u32, AutomationError> {
        Err(AutomationError::LaunchFailed(format!(
            "{} cannot be started here",
            request.program
        )))
    }

    async fn terminate(&self, pid: u32) -> Result<(), AutomationError> {
        self.terminated.lock().unwrap().push(pid);
        Ok(())
    }
}

#[derive(Default)]
struct FakeHelpers {
    actions: Mutex<Vec<Value>>,
    screenshots: Mutex<Vec<Rect>>,
    clipboard: Mutex<String>,
    app_ids: HashMap<u32, String>,
    /// When set, screenshots wait for a permit after announcing themselves.
    screenshot_gate: Option<Arc<Semaphore>>,
    screenshot_started: Notify,
}

#[async_trait::async_trait]
impl DesktopHelpers for FakeHelpers {
    async fn perform_actions(&self, actions: &Value) -> Result<(), WebDriverError> {
        self.actions.lock().unwrap().push(actions.clone());
        Ok(())
    }

    async fn screenshot(&self, area: Rect) -> Result<Vec<u8>, WebDriverError> {
        if let Some(gate) = &self.screenshot_gate {
            self.screenshot_started.notify_one();
            let _permit = gate.acquire().await.unwrap();
        }
        self.screenshots.lock().unwrap().push(area);
        Ok(b"\x89PNG fake".to_vec())
    }

    async fn app_ids(&self) -> Result<HashMap<u32, String>, WebDriverError> {
        if self.app_ids.is_empty() {
            panic!("app id listing requested with no windows");
        }
        Ok(self.app_ids.clone())
    }

    async fn clipboard_text(&self) -> Result<String, WebDriverError> {
        Ok(self.clipboard.lock().unwrap().clone())
    }

    async fn set_clipboard_text(&self, text: &str) -> Result<(), WebDriverError> {
        *self.clipboard.lock().unwrap() = text.to_string();
        Ok(())
    }
}

async fn call(app: Router, method: Method, uri: String, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let body = match body {
        Some(v) => Body::from(v.to_string()),
        None => Body::empty(),
    };
    let request = Request::builder().method(method).uri(uri).body(body).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

struct Harness {
    app: Router,
    desktop: Desktop,
    launcher: Arc<RecordingLauncher>,
    helpers: Arc<FakeHelpers>,
}

fn harness_with(app_ids: HashMap<u32, String>) -> Harness {
    harness_with_helpers(FakeHelpers {
        app_ids,
        ..FakeHelpers::default()
    })
}

fn harness_with_helpers(helpers: FakeHelpers) -> Harness {
    let desktop = desktop();
    let launcher = Arc::new(RecordingLauncher::default());
    let helpers = Arc::new(helpers);
    let config = DriverConfig {
        implicit_wait_ms: 0,
        discovery_poll_interval: Duration::from_millis(10),
        settle_delay: Duration::ZERO,
        ..DriverConfig::default()
    };
    let manager = Arc::new(SessionManager::new(
        desktop.engine.clone(),
        launcher.clone(),
        config,
    ));
    let app = router(AppState {
        manager,
        helpers: helpers.clone(),
    });
    Harness {
        app,
        desktop,
        launcher,
        helpers,
    }
}

fn harness() -> Harness {
    harness_with(HashMap::from([(KCALC_PID, "org.kde.kcalc".to_string())]))
}

impl Harness {
    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = self.send_raw(method, uri, body).await;
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn send_raw(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        call(self.app.clone(), method, uri.to_string(), body).await
    }

    async fn new_session(&self) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/session",
                Some(json!({"capabilities": {"alwaysMatch": {"app": KCALC_PID.to_string()}}})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["value"]["sessionId"].as_str().unwrap().to_string()
    }

    async fn find(&self, sid: &str, using: &str, value: &str) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                &format!("/session/{sid}/element"),
                Some(json!({"using": using, "value": value})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["value"][ELEMENT_KEY].as_str().unwrap().to_string()
    }
}

fn error_code(body: &Value) -> &str {
    body["value"]["error"].as_str().unwrap_or_default()
}

#[tokio::test]
async fn test_status() {
    let h = harness();
    let (status, body) = h.send(Method::GET, "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"]["ready"], true);
}

#[tokio::test]
async fn test_session_lifecycle() {
    let h = harness();
    let (status, body) = h
        .send(
            Method::POST,
            "/session",
            Some(json!({"desiredCapabilities": {"app": KCALC_PID.to_string()}})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"]["capabilities"]["app"], "kcalc");
    let sid = body["value"]["sessionId"].as_str().unwrap().to_string();

    let (status, body) = h.send(Method::DELETE, &format!("/session/{sid}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], Value::Null);
    assert!(h.launcher.terminated.lock().unwrap().is_empty());

    let (status, body) = h.send(Method::DELETE, &format!("/session/{sid}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "no such window");
}

#[tokio::test]
async fn test_session_not_created() {
    let h = harness();
    let (status, body) = h
        .send(Method::POST, "/session", Some(json!({"capabilities": {}})))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_code(&body), "session not created");

    let (status, body) = h
        .send(
            Method::POST,
            "/session",
            Some(json!({"capabilities": {"alwaysMatch": {"app": "org.kde.kcalc.desktop"}}})),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_code(&body), "session not created");
}

#[tokio::test]
async fn test_element_lookup_errors() {
    let h = harness();
    let sid = h.new_session().await;
    let uri = format!("/session/{sid}/element");

    let (status, body) = h
        .send(Method::POST, &uri, Some(json!({"using": "name", "value": "absent"})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "no such element");

    let (status, body) = h
        .send(Method::POST, &uri, Some(json!({"using": "css selector", "value": "x"})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "invalid argument");

    let (status, body) = h.send(Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "invalid argument");

    let (status, body) = h
        .send(
            Method::POST,
            "/session/nope/element",
            Some(json!({"using": "name", "value": "1"})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "no such window");
}

#[tokio::test]
async fn test_malformed_body_is_invalid_argument() {
    let h = harness();
    let sid = h.new_session().await;
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/session/{sid}/element"))
        .body(Body::from("{using"))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_find_elements_returns_handles_in_order() {
    let h = harness();
    let sid = h.new_session().await;

    let (status, body) = h
        .send(
            Method::POST,
            &format!("/session/{sid}/elements"),
            Some(json!({"using": "xpath", "value": "//slider | //push_button"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let handles: Vec<&str> = body["value"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r[ELEMENT_KEY].as_str().unwrap())
        .collect();
    assert_eq!(handles, vec!["e-0-0", "e-0-2"]);

    let (status, body) = h
        .send(
            Method::POST,
            &format!("/session/{sid}/elements"),
            Some(json!({"using": "name", "value": "absent"})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["value"]["error"], "no such element");
}

#[tokio::test]
async fn test_find_from_element() {
    let h = harness();
    let sid = h.new_session().await;
    let frame = h.find(&sid, "name", "KCalc").await;

    let (status, body) = h
        .send(
            Method::POST,
            &format!("/session/{sid}/element/{frame}/element"),
            Some(json!({"using": "accessibility id", "value": "digits.one"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"][ELEMENT_KEY], "e-0-0");

    let (status, body) = h
        .send(
            Method::POST,
            &format!("/session/{sid}/element/{frame}/elements"),
            Some(json!({"using": "class name", "value": "combo_box"})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["value"]["error"], "no such element");
}

#[tokio::test]
async fn test_element_queries() {
    let h = harness();
    let sid = h.new_session().await;
    let one = h.find(&sid, "name", "1").await;
    let display = h.find(&sid, "name", "display").await;
    let base = format!("/session/{sid}/element");

    let (_, body) = h.send(Method::GET, &format!("{base}/{one}/text"), None).await;
    assert_eq!(body["value"], "1");
    let (_, body) = h.send(Method::GET, &format!("{base}/{display}/text"), None).await;
    assert_eq!(body["value"], "0");
    let (_, body) = h.send(Method::GET, &format!("{base}/{one}/enabled"), None).await;
    assert_eq!(body["value"], true);
    let (_, body) = h.send(Method::GET, &format!("{base}/{display}/displayed"), None).await;
    assert_eq!(body["value"], false);
    let (_, body) = h.send(Method::GET, &format!("{base}/{one}/selected"), None).await;
    assert_eq!(body["value"], false);
    let (_, body) = h
        .send(Method::GET, &format!("{base}/{one}/attribute/accessibility-id"), None)
        .await;
    assert_eq!(body["value"], "KCalc.digits.one");
    let (_, body) = h
        .send(Method::GET, &format!("{base}/{one}/attribute/showing"), None)
        .await;
    assert_eq!(body["value"], true);
    let (_, body) = h
        .send(Method::GET, &format!("{base}/{one}/attribute/bogus"), None)
        .await;
    assert_eq!(body["value"], Value::Null);
    let (_, body) = h.send(Method::GET, &format!("{base}/{one}/rect"), None).await;
    assert_eq!(body["value"], json!({"x": 110, "y": 120, "width": 40, "height": 30}));
    let (_, body) = h.send(Method::GET, &format!("{base}/{one}/name"), None).await;
    assert_eq!(body["value"], "push button");

    let (status, body) = h.send(Method::GET, &format!("{base}/e-7/text"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "no such element");
}

#[tokio::test]
async fn test_click_runs_press() {
    let h = harness();
    let sid = h.new_session().await;
    let one = h.find(&sid, "name", "1").await;

    let (status, _) = h
        .send(Method::POST, &format!("/session/{sid}/element/{one}/click"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.desktop.one.performed_actions(), vec!["SetFocus", "Press"]);
}

#[tokio::test]
async fn test_value_clear_and_appium_value() {
    let h = harness();
    let sid = h.new_session().await;
    let display = h.find(&sid, "name", "display").await;
    let slider = h.find(&sid, "name", "volume").await;
    let base = format!("/session/{sid}/element");

    let (status, _) = h
        .send(Method::POST, &format!("{base}/{display}/value"), Some(json!({"text": "12"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.desktop.display.text_contents().as_deref(), Some("012"));

    let (status, _) = h.send(Method::POST, &format!("{base}/{display}/clear"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.desktop.display.text_contents().as_deref(), Some(""));

    let (status, _) = h
        .send(
            Method::POST,
            &format!("/session/{sid}/appium/element/{slider}/value"),
            Some(json!({"text": "7.5"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.desktop.slider.current_value(), Some(7.5));

    let (_, body) = h
        .send(Method::GET, &format!("{base}/{slider}/attribute/value"), None)
        .await;
    assert_eq!(body["value"], 7.5);
}

#[tokio::test]
async fn test_value_falls_back_to_focus_and_keys() {
    let h = harness();
    let sid = h.new_session().await;
    let one = h.find(&sid, "name", "1").await;

    let (status, _) = h
        .send(
            Method::POST,
            &format!("/session/{sid}/element/{one}/value"),
            Some(json!({"value": ["4", "2"]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.desktop.one.performed_actions(), vec!["SetFocus"]);
    assert_eq!(h.desktop.engine.typed_keysyms(), vec![0x34, 0x32]);
}

#[tokio::test]
async fn test_source_routes() {
    let h = harness();
    let sid = h.new_session().await;

    let (status, body) = h.send(Method::GET, &format!("/session/{sid}/source"), None).await;
    assert_eq!(status, StatusCode::OK);
    let xml = body["value"].as_str().unwrap();
    assert!(xml.starts_with("<application name=\"kcalc\""), "{xml}");
    assert!(!xml.contains('\n'));

    let request = Request::builder()
        .uri(format!("/session/{sid}/sourceRaw"))
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/xml"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let raw = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(raw.contains("\n  <frame name=\"KCalc\""), "{raw}");
}

#[tokio::test]
async fn test_timeouts_routes() {
    let h = harness();
    let sid = h.new_session().await;

    let (status, _) = h
        .send(
            Method::POST,
            &format!("/session/{sid}/timeouts/implicit_wait"),
            Some(json!({"ms": 750})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h
        .send(
            Method::POST,
            &format!("/session/{sid}/timeouts"),
            Some(json!({"script": 1000})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = h.send(Method::GET, &format!("/session/{sid}/timeouts"), None).await;
    assert_eq!(
        body["value"],
        json!({"script": 1000, "pageLoad": 300000, "implicit": 750})
    );
}

#[tokio::test]
async fn test_actions_resolve_element_origin() {
    let h = harness();
    let sid = h.new_session().await;
    let one = h.find(&sid, "name", "1").await;

    let mut origin = serde_json::Map::new();
    origin.insert(ELEMENT_KEY.to_string(), Value::from(one));
    let payload = json!({
        "actions": [{
            "type": "pointer",
            "id": "mouse",
            "actions": [
                {"type": "pointerMove", "x": 0, "y": 0, "origin": origin},
                {"type": "pointerDown", "button": 0},
                {"type": "pointerUp", "button": 0}
            ]
        }]
    });
    let (status, _) = h
        .send(Method::POST, &format!("/session/{sid}/actions"), Some(payload))
        .await;
    assert_eq!(status, StatusCode::OK);

    let sent = h.helpers.actions.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    let moved = &sent[0]["actions"][0]["actions"][0];
    assert_eq!(moved["x"], 130);
    assert_eq!(moved["y"], 135);
    assert_eq!(moved["origin"], "viewport");

    let (status, _) = h
        .send(Method::DELETE, &format!("/session/{sid}/actions"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_screenshot_captures_first_window() {
    let h = harness();
    let sid = h.new_session().await;

    let (status, body) = h.send(Method::GET, &format!("/session/{sid}/screenshot"), None).await;
    assert_eq!(status, StatusCode::OK);
    let png = STANDARD.decode(body["value"].as_str().unwrap()).unwrap();
    assert_eq!(png, b"\x89PNG fake");
    assert_eq!(
        h.helpers.screenshots.lock().unwrap().clone(),
        vec![Rect::new(100, 100, 400, 300)]
    );
}

#[tokio::test]
async fn test_app_state_and_terminate_app() {
    let h = harness();
    let sid = h.new_session().await;
    let device = format!("/session/{sid}/appium/device");

    let (_, body) = h
        .send(Method::POST, &format!("{device}/app_state"), Some(json!({"appId": "org.kde.kcalc"})))
        .await;
    assert_eq!(body["value"], 4);
    let (_, body) = h
        .send(Method::POST, &format!("{device}/app_state"), Some(json!({"appId": "org.kde.dolphin"})))
        .await;
    assert_eq!(body["value"], 1);

    let (status, _) = h
        .send(
            Method::POST,
            &format!("{device}/terminate_app"),
            Some(json!({"appId": "org.kde.kcalc"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.launcher.terminated.lock().unwrap().clone(), vec![KCALC_PID]);
}

#[tokio::test]
async fn test_press_keycode() {
    let h = harness();
    let sid = h.new_session().await;
    let (status, _) = h
        .send(
            Method::POST,
            &format!("/session/{sid}/appium/device/press_keycode"),
            Some(json!({"keycode": "a\u{E006}"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.desktop.engine.typed_keysyms(), vec![0x61, 0xff0d]);
}

#[tokio::test]
async fn test_press_keycode_waits_for_session_lock() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness_with_helpers(FakeHelpers {
        app_ids: HashMap::from([(KCALC_PID, "org.kde.kcalc".to_string())]),
        screenshot_gate: Some(gate.clone()),
        ..FakeHelpers::default()
    });
    let sid = h.new_session().await;

    let screenshot = tokio::spawn(call(
        h.app.clone(),
        Method::GET,
        format!("/session/{sid}/screenshot"),
        None,
    ));
    h.helpers.screenshot_started.notified().await;

    let keycode = tokio::spawn(call(
        h.app.clone(),
        Method::POST,
        format!("/session/{sid}/appium/device/press_keycode"),
        Some(json!({"keycode": "a"})),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        h.desktop.engine.typed_keysyms().is_empty(),
        "key press ran while the screenshot held the session"
    );
    assert!(!keycode.is_finished());

    gate.add_permits(1);
    let (status, _) = screenshot.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    let (status, _) = keycode.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.desktop.engine.typed_keysyms(), vec![0x61]);
    assert_eq!(h.helpers.screenshots.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_clipboard_round_trip() {
    let h = harness();
    let sid = h.new_session().await;
    let device = format!("/session/{sid}/appium/device");

    let (status, _) = h
        .send(
            Method::POST,
            &format!("{device}/set_clipboard"),
            Some(json!({"content": STANDARD.encode("asdf"), "contentType": "plaintext"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.helpers.clipboard.lock().unwrap().as_str(), "asdf");

    let (_, body) = h
        .send(Method::POST, &format!("{device}/get_clipboard"), Some(json!({"contentType": "plaintext"})))
        .await;
    assert_eq!(body["value"], STANDARD.encode("asdf"));

    let (status, body) = h
        .send(Method::POST, &format!("{device}/set_clipboard"), Some(json!({"content": "%%%"})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "invalid argument");
}

#[tokio::test]
async fn test_compare_images_is_unsupported() {
    let h = harness();
    let sid = h.new_session().await;
    let (status, body) = h
        .send(Method::POST, &format!("/session/{sid}/appium/compare_images"), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_code(&body), "unsupported operation");
}

#[tokio::test]
async fn test_handler_panic_becomes_unknown_error() {
    let h = harness_with(HashMap::new());
    let sid = h.new_session().await;

    let (status, body) = h
        .send(
            Method::POST,
            &format!("/session/{sid}/appium/device/app_state"),
            Some(json!({"appId": "org.kde.kcalc"})),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_code(&body), "unknown error");

    // The server keeps serving.
    let (status, _) = h.send(Method::GET, "/status", None).await;
    assert_eq!(status, StatusCode::OK);
}
