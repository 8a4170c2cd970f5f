use crate::config::DEFAULT_IMPLICIT_WAIT_MS;
use crate::errors::WebDriverError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Per-session time budgets in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    pub script: u64,
    pub page_load: u64,
    /// Defaults to 5000 rather than the W3C value of 0.
    pub implicit: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            script: 30_000,
            page_load: 300_000,
            implicit: DEFAULT_IMPLICIT_WAIT_MS,
        }
    }
}

impl Timeouts {
    pub fn with_implicit(implicit: u64) -> Self {
        Self {
            implicit,
            ..Self::default()
        }
    }

    pub fn implicit_wait(&self) -> Duration {
        Duration::from_millis(self.implicit)
    }

    /// Applies the `script`, `pageLoad` and `implicit` keys present in
    /// `value`. `null` entries are ignored.
    pub fn merge(&mut self, value: &Value) -> Result<(), WebDriverError> {
        let object = value.as_object().ok_or_else(|| {
            WebDriverError::InvalidArgument("timeouts must be an object".to_string())
        })?;
        for (key, slot) in [
            ("script", &mut self.script),
            ("pageLoad", &mut self.page_load),
            ("implicit", &mut self.implicit),
        ] {
            match object.get(key) {
                None | Some(Value::Null) => {}
                Some(v) => *slot = millis(key, v)?,
            }
        }
        Ok(())
    }
}

/// Reads a non-negative millisecond count.
pub fn millis(key: &str, value: &Value) -> Result<u64, WebDriverError> {
    value
        .as_u64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        })
        .ok_or_else(|| {
            WebDriverError::InvalidArgument(format!(
                "{key} must be a non-negative number of milliseconds, got {value}"
            ))
        })
}

/// What a session drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppTarget {
    /// The desktop itself; nothing is launched.
    Root,
    /// An already running process.
    Pid(u32),
    /// A desktop entry id such as `org.kde.kcalc.desktop`.
    DesktopEntry(String),
    /// A command line to split and spawn.
    CommandLine(String),
}

impl AppTarget {
    pub fn parse(app: &str) -> Result<Self, WebDriverError> {
        if app.is_empty() {
            return Err(WebDriverError::SessionNotCreated(
                "the 'app' capability is empty".to_string(),
            ));
        }
        if app == "Root" {
            return Ok(AppTarget::Root);
        }
        if app.chars().all(|c| c.is_ascii_digit()) {
            return app.parse().map(AppTarget::Pid).map_err(|_| {
                WebDriverError::SessionNotCreated(format!("'{app}' is not a valid process id"))
            });
        }
        if app.ends_with(".desktop") {
            return Ok(AppTarget::DesktopEntry(app.to_string()));
        }
        Ok(AppTarget::CommandLine(app.to_string()))
    }

    pub fn launches(&self) -> bool {
        matches!(self, AppTarget::DesktopEntry(_) | AppTarget::CommandLine(_))
    }
}

/// Capabilities of a new-session request.
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    pub app: String,
    pub target: AppTarget,
    pub timeouts: Timeouts,
    /// Extra environment for a launched application.
    pub environ: Vec<(String, String)>,
}

const APP_KEYS: [&str; 2] = ["app", "appium:app"];
const TIMEOUT_KEYS: [&str; 2] = ["timeouts", "appium:timeouts"];
const ENVIRON_KEYS: [&str; 2] = ["environ", "appium:environ"];

impl Capabilities {
    /// Parses a new-session body.
    ///
    /// Sources are searched in the order `capabilities.alwaysMatch`,
    /// `capabilities.firstMatch[0]`, `desiredCapabilities`; for each key the
    /// first source that has it wins, and within a source the plain key is
    /// preferred over its `appium:` form.
    pub fn from_request(body: &Value, defaults: Timeouts) -> Result<Self, WebDriverError> {
        let sources: Vec<&Map<String, Value>> = [
            body.pointer("/capabilities/alwaysMatch"),
            body.pointer("/capabilities/firstMatch/0"),
            body.get("desiredCapabilities"),
        ]
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .collect();

        let app = match lookup(&sources, &APP_KEYS) {
            Some(Value::String(app)) => app.clone(),
            Some(other) => {
                return Err(WebDriverError::SessionNotCreated(format!(
                    "the 'app' capability must be a string, got {other}"
                )))
            }
            None => {
                return Err(WebDriverError::SessionNotCreated(
                    "missing required capability 'app'".to_string(),
                ))
            }
        };
        let target = AppTarget::parse(&app)?;

        let mut timeouts = defaults;
        if let Some(value) = lookup(&sources, &TIMEOUT_KEYS) {
            timeouts.merge(value)?;
        }

        let environ = match lookup(&sources, &ENVIRON_KEYS) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Object(vars)) => vars
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect(),
            Some(other) => {
                return Err(WebDriverError::InvalidArgument(format!(
                    "'environ' must be an object, got {other}"
                )))
            }
        };

        Ok(Self {
            app,
            target,
            timeouts,
            environ,
        })
    }
}

fn lookup<'a>(sources: &[&'a Map<String, Value>], keys: &[&str]) -> Option<&'a Value> {
    sources
        .iter()
        .find_map(|source| keys.iter().find_map(|key| source.get(*key)))
}
