#![allow(dead_code)]

use a11ydriver::element::Rect;
use a11ydriver::platforms::memory::{MemoryEngine, MemoryNode};
use a11ydriver::{AppLauncher, AutomationError, DriverConfig, LaunchRequest, SessionManager, State};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const KCALC_PID: u32 = 4242;

// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const SHOWN: &[State] = &[
    State::Visible,
    State::Showing,
    State::Sensitive,
    State::Enabled,
];

/// desktop
///   application "kcalc" (pid 4242)
///     frame "KCalc"
///       push button "1"  id KCalc.digits.one
///       push button "2"  id KCalc.digits.two   (visible only)
///       push button "hidden"                   (no states)
///       panel
///         text "display"   editable, text "0"
///         slider "volume"  value 5
///   application "firefox" (pid 7, Gecko)
pub struct Fixture {
    pub desktop: Arc<MemoryNode>,
    pub app: Arc<MemoryNode>,
    pub frame: Arc<MemoryNode>,
    pub one: Arc<MemoryNode>,
    pub display: Arc<MemoryNode>,
    pub slider: Arc<MemoryNode>,
    pub engine: Arc<MemoryEngine>,
}

pub fn fixture() -> Fixture {
    let one = MemoryNode::builder("push button")
        .name("1")
        .description("digit")
        .role(43)
        .accessible_id("KCalc.digits.one")
        .states(SHOWN)
        .actions(&["SetFocus", "Press"])
        .extents(Rect::new(10, 20, 40, 30))
        .build();
    let two = MemoryNode::builder("push button")
        .name("2")
        .description("digit")
        .role(43)
        .accessible_id("KCalc.digits.two")
        .states(&[State::Visible])
        .build();
    let hidden = MemoryNode::builder("push button").name("hidden").role(43).build();
    let display = MemoryNode::builder("text")
        .name("display")
        .description("digit")
        .role(61)
        .text("0")
        .editable()
        .states(&[State::Visible, State::Sensitive, State::Editable])
        .actions(&["SetFocus"])
        .build();
    let slider = MemoryNode::builder("slider")
        .name("volume")
        .role(51)
        .value(5.0)
        .states(SHOWN)
        .build();
    let panel = MemoryNode::builder("panel")
        .role(39)
        .states(SHOWN)
        .child(display.clone())
        .child(slider.clone())
        .build();
    let frame = MemoryNode::builder("frame")
        .name("KCalc")
        .role(23)
        .states(SHOWN)
        .extents(Rect::new(100, 100, 400, 300))
        .child(one.clone())
        .child(two)
        .child(hidden)
        .child(panel)
        .build();
    let app = MemoryNode::builder("application")
        .name("kcalc")
        .role(75)
        .process_id(KCALC_PID)
        .child(frame.clone())
        .build();
    let firefox = MemoryNode::builder("application")
        .name("Firefox")
        .toolkit("Gecko")
        .process_id(7)
        .child(MemoryNode::builder("frame").name("Mozilla Firefox").build())
        .build();
    let desktop = MemoryNode::builder("desktop frame")
        .name("main")
        .toolkit("at-spi-registry")
        .child(app.clone())
        .child(firefox)
        .build();
    let engine = Arc::new(MemoryEngine::new(desktop.clone()));

    Fixture {
        desktop,
        app,
        frame,
        one,
        display,
        slider,
        engine,
    }
}

/// Launcher that records requests instead of spawning processes.
///
/// When `appear` is set, a launch registers a new application with the
/// returned pid on the desktop, like a real application starting up.
pub struct FakeLauncher {
    pub next_pid: u32,
    pub desktop: Option<Arc<MemoryNode>>,
    pub launched: Mutex<Vec<LaunchRequest>>,
    pub terminated: Mutex<Vec<u32>>,
}

impl FakeLauncher {
    pub fn new(next_pid: u32, desktop: Option<Arc<MemoryNode>>) -> Self {
        Self {
            next_pid,
            desktop,
            launched: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
        }
    }

    pub fn launched(&self) -> Vec<LaunchRequest> {
        self.launched.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AppLauncher for FakeLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<u32, AutomationError> {
        self.launched.lock().unwrap().push(request.clone());
        if let Some(desktop) = &self.desktop {
            desktop.push_child(
                MemoryNode::builder("application")
                    .name(&request.program)
                    .process_id(self.next_pid)
                    .child(MemoryNode::builder("frame").name(&request.program).build())
                    .build(),
            );
        }
        Ok(self.next_pid)
    }

    async fn terminate(&self, pid: u32) -> Result<(), AutomationError> {
        self.terminated.lock().unwrap().push(pid);
        Ok(())
    }
}

pub fn test_config() -> DriverConfig {
    DriverConfig {
        implicit_wait_ms: 500,
        locate_poll_interval: Duration::from_millis(50),
        discovery_poll_interval: Duration::from_millis(50),
        settle_delay: Duration::ZERO,
        ..DriverConfig::default()
    }
}

pub fn manager(fixture: &Fixture, launcher: Arc<FakeLauncher>) -> SessionManager {
    SessionManager::new(fixture.engine.clone(), launcher, test_config())
}
