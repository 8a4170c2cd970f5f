use crate::capabilities::{AppTarget, Capabilities, Timeouts};
use crate::config::DriverConfig;
use crate::element::Accessible;
use crate::errors::{AutomationError, WebDriverError};
use crate::keys::keysym_for_char;
use crate::launcher::{desktop_entry_dirs, resolve_desktop_entry, split_command_line, AppLauncher, LaunchRequest};
use crate::locator::{LocateMode, Located, Locator};
use crate::platforms::AccessibilityEngine;
use crate::registry::ElementRegistry;
use crate::snapshot::SnapshotTree;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// One client session bound to an application (or the desktop).
#[derive(Debug)]
pub struct Session {
    pub id: String,
    /// The `app` capability as requested.
    pub app: String,
    pub target: AppTarget,
    pub timeouts: Timeouts,
    /// Root node of the driven application.
    pub browsing_context: Accessible,
    pub elements: ElementRegistry,
    pub process_id: Option<u32>,
    /// Whether this session spawned `process_id` and owns its lifetime.
    pub launched: bool,
}

impl Session {
    /// Locates elements and registers them, returning their handles in
    /// document order.
    ///
    /// The search starts at the browsing context, or at the element behind
    /// `within` when given. An empty result is returned as-is.
    pub async fn find_elements(
        &mut self,
        locator: Locator,
        within: Option<&str>,
        mode: LocateMode,
        config: &DriverConfig,
    ) -> Result<Vec<String>, WebDriverError> {
        let (start, start_path) = match within {
            Some(handle) => {
                let located = self.elements.resolve(handle)?;
                (located.node.clone(), located.path.clone())
            }
            None => (self.browsing_context.clone(), Vec::new()),
        };

        let found: Vec<Located> = locator
            .with_timeout(self.timeouts.implicit_wait())
            .with_poll_interval(config.locate_poll_interval)
            .locate(&self.browsing_context, &start, &start_path, mode, config)
            .await?;

        Ok(found
            .into_iter()
            .map(|located| self.elements.register(located))
            .collect())
    }

    /// Like [`Session::find_elements`] in `First` mode, but a miss is
    /// `NoSuchElement`.
    pub async fn find_element(
        &mut self,
        locator: Locator,
        within: Option<&str>,
        config: &DriverConfig,
    ) -> Result<String, WebDriverError> {
        let description = format!("{} '{}'", locator.strategy(), locator.selector());
        self.find_elements(locator, within, LocateMode::First, config)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| WebDriverError::NoSuchElement(format!("nothing matches {description}")))
    }

    pub fn element(&self, handle: &str) -> Result<&Accessible, WebDriverError> {
        Ok(&self.elements.resolve(handle)?.node)
    }

    /// Serializes the browsing context's tree as XML.
    pub async fn source(&self, pretty: bool, config: &DriverConfig) -> Result<String, WebDriverError> {
        let tree = SnapshotTree::capture(&self.browsing_context, &[], config)
            .await
            .map_err(|e| WebDriverError::NoSuchWindow(format!("browsing context unreachable: {e}")))?;
        Ok(tree.to_xml(pretty))
    }
}

pub type SessionHandle = Arc<Mutex<Session>>;

/// Process-wide table of open sessions.
///
/// Each session sits behind its own mutex so commands for one session run
/// one at a time while different sessions proceed in parallel.
pub struct SessionManager {
    engine: Arc<dyn AccessibilityEngine>,
    launcher: Arc<dyn AppLauncher>,
    config: DriverConfig,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionManager {
    pub fn new(
        engine: Arc<dyn AccessibilityEngine>,
        launcher: Arc<dyn AppLauncher>,
        config: DriverConfig,
    ) -> Self {
        Self {
            engine,
            launcher,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Opens a session from a new-session request body.
    #[instrument(skip(self, body))]
    pub async fn create_session(&self, body: &Value) -> Result<SessionHandle, WebDriverError> {
        let caps = Capabilities::from_request(body, Timeouts::with_implicit(self.config.implicit_wait_ms))?;
        info!("creating session for app '{}'", caps.app);

        let (browsing_context, process_id, launched) = match &caps.target {
            AppTarget::Root => {
                let desktop = self.engine.desktop().await.map_err(|e| {
                    WebDriverError::SessionNotCreated(format!("desktop root unavailable: {e}"))
                })?;
                (desktop, None, false)
            }
            AppTarget::Pid(pid) => {
                let app = self.discover(*pid, &caps.timeouts).await?;
                (app, Some(*pid), false)
            }
            target => {
                let request = self.launch_request(target, &caps)?;
                let pid = self.launcher.launch(&request).await.map_err(|e| {
                    WebDriverError::SessionNotCreated(format!("failed to launch '{}': {e}", caps.app))
                })?;
                match self.discover(pid, &caps.timeouts).await {
                    Ok(app) => (app, Some(pid), true),
                    Err(e) => {
                        if let Err(kill_err) = self.launcher.terminate(pid).await {
                            warn!("failed to clean up pid {pid}: {kill_err}");
                        }
                        return Err(e);
                    }
                }
            }
        };

        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            app: caps.app,
            target: caps.target,
            timeouts: caps.timeouts,
            browsing_context,
            elements: ElementRegistry::new(),
            process_id,
            launched,
        };
        let id = session.id.clone();
        let handle = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id.clone(), handle.clone());
        info!("session {id} created (pid {process_id:?}, launched {launched})");
        Ok(handle)
    }

    fn launch_request(&self, target: &AppTarget, caps: &Capabilities) -> Result<LaunchRequest, WebDriverError> {
        let argv = match target {
            AppTarget::DesktopEntry(id) => resolve_desktop_entry(id, &desktop_entry_dirs()),
            AppTarget::CommandLine(line) => split_command_line(line),
            AppTarget::Root | AppTarget::Pid(_) => Err(AutomationError::Internal(format!(
                "{target:?} does not launch anything"
            ))),
        }
        .map_err(|e| WebDriverError::SessionNotCreated(e.to_string()))?;

        let mut env = self.config.launch_environment.clone();
        env.extend(caps.environ.iter().cloned());
        LaunchRequest::from_argv(argv, env).map_err(|e| WebDriverError::SessionNotCreated(e.to_string()))
    }

    /// Polls the application registry for `pid` for up to twice the
    /// implicit wait. At least one scan always runs.
    async fn discover(&self, pid: u32, timeouts: &Timeouts) -> Result<Accessible, WebDriverError> {
        let budget = Duration::from_millis(timeouts.implicit.saturating_mul(2));
        let deadline = Instant::now() + budget;

        loop {
            match self.engine.applications().await {
                Ok(apps) => {
                    for app in apps {
                        match app.process_id().await {
                            Ok(app_pid) if app_pid == pid => {
                                debug!("found pid {pid} as {}", app.object_id());
                                return Ok(app);
                            }
                            Ok(_) => {}
                            Err(e) => debug!("skipping application during discovery: {e}"),
                        }
                    }
                }
                Err(e) => debug!("application scan failed: {e}"),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.config.discovery_poll_interval.min(deadline - now)).await;
        }

        Err(WebDriverError::SessionNotCreated(format!(
            "no accessible application with pid {pid} appeared within {}ms",
            budget.as_millis()
        )))
    }

    pub async fn get_session(&self, id: &str) -> Result<SessionHandle, WebDriverError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| WebDriverError::NoSuchWindow(format!("no session with id '{id}'")))
    }

    /// Closes a session, killing its application if the session launched it.
    #[instrument(skip(self))]
    pub async fn delete_session(&self, id: &str) -> Result<(), WebDriverError> {
        let handle = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| WebDriverError::NoSuchWindow(format!("no session with id '{id}'")))?;

        // Waits for in-flight commands on this session to finish.
        let session = handle.lock().await;
        self.close(&session).await?;
        info!("session {id} deleted");
        Ok(())
    }

    async fn close(&self, session: &Session) -> Result<(), WebDriverError> {
        match (session.launched, session.process_id) {
            (true, Some(pid)) => self.launcher.terminate(pid).await.map_err(WebDriverError::from),
            _ => Ok(()),
        }
    }

    pub async fn set_implicit_timeout(&self, id: &str, ms: u64) -> Result<(), WebDriverError> {
        let handle = self.get_session(id).await?;
        handle.lock().await.timeouts.implicit = ms;
        Ok(())
    }

    pub async fn timeouts(&self, id: &str) -> Result<Timeouts, WebDriverError> {
        let handle = self.get_session(id).await?;
        let timeouts = handle.lock().await.timeouts;
        Ok(timeouts)
    }

    /// Applies a W3C timeouts object to the session.
    pub async fn set_timeouts(&self, id: &str, value: &Value) -> Result<(), WebDriverError> {
        let handle = self.get_session(id).await?;
        let mut session = handle.lock().await;
        let mut timeouts = session.timeouts;
        timeouts.merge(value)?;
        session.timeouts = timeouts;
        Ok(())
    }

    /// Types `text` into whatever has keyboard focus.
    pub async fn type_text(&self, text: &str) -> Result<(), WebDriverError> {
        for ch in text.chars() {
            self.engine.generate_keysym(keysym_for_char(ch)).await?;
        }
        Ok(())
    }

    /// Kills an arbitrary process through the launcher, e.g. for
    /// `terminate_app`. Sessions bound to it are left open.
    pub async fn terminate_process(&self, pid: u32) -> Result<(), WebDriverError> {
        info!("terminating pid {pid}");
        self.launcher.terminate(pid).await.map_err(WebDriverError::from)
    }

    /// Closes every session. Used on server shutdown.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, SessionHandle)> = self.sessions.write().await.drain().collect();
        for (id, handle) in drained {
            let session = handle.lock().await;
            if let Err(e) = self.close(&session).await {
                warn!("failed to close session {id}: {e}");
            }
        }
    }
}
