use crate::errors::AutomationError;
use crate::state::{State, StateSet, StateSetExt};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Screen-space extents of an accessible, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center point, rounded toward the origin.
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// Text interface of an accessible.
#[async_trait::async_trait]
pub trait TextCapability: Send + Sync {
    async fn contents(&self) -> Result<String, AutomationError>;
}

/// Editable text interface of an accessible.
#[async_trait::async_trait]
pub trait EditableTextCapability: Send + Sync {
    /// Inserts `text` at `position`; a negative position appends.
    async fn insert_text(&self, position: i32, text: &str) -> Result<(), AutomationError>;
    async fn set_contents(&self, text: &str) -> Result<(), AutomationError>;
}

/// Named actions exposed by an accessible.
#[async_trait::async_trait]
pub trait ActionCapability: Send + Sync {
    async fn action_names(&self) -> Result<Vec<String>, AutomationError>;
    async fn do_action(&self, index: usize) -> Result<(), AutomationError>;
}

/// Numeric value interface (sliders, spin boxes, progress bars).
#[async_trait::async_trait]
pub trait ValueCapability: Send + Sync {
    async fn current(&self) -> Result<f64, AutomationError>;
    async fn set(&self, value: f64) -> Result<(), AutomationError>;
}

/// Geometry interface of an accessible.
#[async_trait::async_trait]
pub trait ComponentCapability: Send + Sync {
    async fn extents(&self) -> Result<Rect, AutomationError>;
}

/// The trait every platform-specific accessible node implements.
///
/// Optional interfaces are reported through the capability queries, which
/// return `Ok(None)` when the node does not implement them.
#[async_trait::async_trait]
pub trait AccessibleImpl: Send + Sync + Debug {
    /// Identity of the underlying provider object, stable for its lifetime.
    fn object_id(&self) -> String;

    async fn name(&self) -> Result<String, AutomationError>;
    async fn description(&self) -> Result<String, AutomationError>;
    /// Numeric role as the provider reports it.
    async fn role(&self) -> Result<u32, AutomationError>;
    async fn role_name(&self) -> Result<String, AutomationError>;
    async fn accessible_id(&self) -> Result<Option<String>, AutomationError>;
    async fn toolkit_name(&self) -> Result<String, AutomationError>;
    async fn states(&self) -> Result<StateSet, AutomationError>;
    async fn child_count(&self) -> Result<usize, AutomationError>;
    async fn child_at(&self, index: usize) -> Result<Option<Accessible>, AutomationError>;
    async fn process_id(&self) -> Result<u32, AutomationError>;

    async fn text(&self) -> Result<Option<Box<dyn TextCapability>>, AutomationError>;
    async fn editable_text(&self)
        -> Result<Option<Box<dyn EditableTextCapability>>, AutomationError>;
    async fn action(&self) -> Result<Option<Box<dyn ActionCapability>>, AutomationError>;
    async fn value(&self) -> Result<Option<Box<dyn ValueCapability>>, AutomationError>;
    async fn component(&self) -> Result<Option<Box<dyn ComponentCapability>>, AutomationError>;
}

/// A live node in an accessibility tree.
#[derive(Clone)]
pub struct Accessible {
    inner: Arc<dyn AccessibleImpl>,
}

impl Accessible {
    pub fn new(inner: Arc<dyn AccessibleImpl>) -> Self {
        Self { inner }
    }

    pub fn object_id(&self) -> String {
        self.inner.object_id()
    }

    pub async fn name(&self) -> Result<String, AutomationError> {
        self.inner.name().await
    }

    pub async fn description(&self) -> Result<String, AutomationError> {
        self.inner.description().await
    }

    pub async fn role(&self) -> Result<u32, AutomationError> {
        self.inner.role().await
    }

    pub async fn role_name(&self) -> Result<String, AutomationError> {
        self.inner.role_name().await
    }

    pub async fn accessible_id(&self) -> Result<Option<String>, AutomationError> {
        self.inner.accessible_id().await
    }

    pub async fn toolkit_name(&self) -> Result<String, AutomationError> {
        self.inner.toolkit_name().await
    }

    pub async fn states(&self) -> Result<StateSet, AutomationError> {
        self.inner.states().await
    }

    pub async fn child_count(&self) -> Result<usize, AutomationError> {
        self.inner.child_count().await
    }

    pub async fn child_at(&self, index: usize) -> Result<Option<Accessible>, AutomationError> {
        self.inner.child_at(index).await
    }

    pub async fn process_id(&self) -> Result<u32, AutomationError> {
        self.inner.process_id().await
    }

    pub async fn text(&self) -> Result<Option<Box<dyn TextCapability>>, AutomationError> {
        self.inner.text().await
    }

    pub async fn editable_text(
        &self,
    ) -> Result<Option<Box<dyn EditableTextCapability>>, AutomationError> {
        self.inner.editable_text().await
    }

    pub async fn action(&self) -> Result<Option<Box<dyn ActionCapability>>, AutomationError> {
        self.inner.action().await
    }

    pub async fn value(&self) -> Result<Option<Box<dyn ValueCapability>>, AutomationError> {
        self.inner.value().await
    }

    pub async fn component(
        &self,
    ) -> Result<Option<Box<dyn ComponentCapability>>, AutomationError> {
        self.inner.component().await
    }

    /// The composite `"[role name | name]"` string used by class-name lookups.
    pub async fn class_name(&self) -> Result<String, AutomationError> {
        Ok(format!("[{} | {}]", self.role_name().await?, self.name().await?))
    }

    /// Walks down from this node along `path`, one child index per step.
    pub async fn descend(&self, path: &[usize]) -> Result<Accessible, AutomationError> {
        let mut current = self.clone();
        for (depth, &index) in path.iter().enumerate() {
            current = current.child_at(index).await?.ok_or_else(|| {
                AutomationError::ElementNotFound(format!(
                    "no child {index} at depth {depth} of path {path:?}"
                ))
            })?;
        }
        Ok(current)
    }

    /// Activates the node.
    ///
    /// Runs the first `Press` or `Toggle` action. A `SetFocus` action seen
    /// before it is run as well, since focusing alone does not activate.
    #[instrument(level = "debug", skip(self))]
    pub async fn click(&self, settle: Duration) -> Result<(), AutomationError> {
        let action = self.action().await?.ok_or_else(|| {
            AutomationError::UnsupportedOperation(format!(
                "{} exposes no actions",
                self.object_id()
            ))
        })?;

        for (index, name) in action.action_names().await?.iter().enumerate() {
            match name.as_str() {
                "Press" | "Toggle" => {
                    debug!("running action {name} ({index})");
                    action.do_action(index).await?;
                    tokio::time::sleep(settle).await;
                    break;
                }
                "SetFocus" => {
                    debug!("running action {name} ({index})");
                    action.do_action(index).await?;
                    tokio::time::sleep(settle).await;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Runs the `SetFocus` action if the node has one. Returns whether it did.
    pub async fn focus(&self, settle: Duration) -> Result<bool, AutomationError> {
        let Some(action) = self.action().await? else {
            return Ok(false);
        };
        let names = action.action_names().await?;
        match names.iter().position(|name| name == "SetFocus") {
            Some(index) => {
                action.do_action(index).await?;
                tokio::time::sleep(settle).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Text contents when the node implements the text interface, else its name.
    pub async fn display_text(&self) -> Result<String, AutomationError> {
        match self.text().await? {
            Some(text) => text.contents().await,
            None => self.name().await,
        }
    }

    pub async fn is_enabled(&self) -> Result<bool, AutomationError> {
        Ok(self.states().await?.contains(State::Enabled))
    }

    pub async fn is_displayed(&self) -> Result<bool, AutomationError> {
        let states = self.states().await?;
        Ok(states.contains(State::Visible) && states.contains(State::Showing))
    }

    pub async fn is_selected(&self) -> Result<bool, AutomationError> {
        let states = self.states().await?;
        Ok(states.contains(State::Selected) || states.contains(State::Focused))
    }

    /// Resolves a named attribute.
    ///
    /// `accessibility-id`, `name`, `description`, `role` and `value` are read
    /// from the node; any other name is looked up as a state flag and yields
    /// a boolean. Unknown names yield `Null`.
    pub async fn attribute(&self, name: &str) -> Result<serde_json::Value, AutomationError> {
        use serde_json::Value;

        Ok(match name {
            "accessibility-id" => self
                .accessible_id()
                .await?
                .map(Value::String)
                .unwrap_or(Value::Null),
            "name" => Value::String(self.name().await?),
            "description" => Value::String(self.description().await?),
            "role" => Value::from(self.role().await?),
            "value" => match self.value().await? {
                Some(value) => serde_json::Number::from_f64(value.current().await?)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                None => Value::Null,
            },
            other => self
                .states()
                .await?
                .contains_named(other)
                .map(Value::Bool)
                .unwrap_or(Value::Null),
        })
    }

    /// Appends `text` through the editable text interface.
    ///
    /// Returns `false` when the node is not editable, leaving the caller to
    /// fall back to keyboard synthesis.
    pub async fn insert_text(&self, text: &str) -> Result<bool, AutomationError> {
        match self.editable_text().await? {
            Some(editable) => {
                editable.insert_text(-1, text).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn clear(&self) -> Result<(), AutomationError> {
        let editable = self.editable_text().await?.ok_or_else(|| {
            AutomationError::UnsupportedOperation(format!(
                "{} is not editable",
                self.object_id()
            ))
        })?;
        editable.set_contents("").await
    }

    /// Sets a value: numeric input goes through the value interface when the
    /// node has one, everything else replaces the text contents.
    pub async fn set_value(&self, input: &str) -> Result<(), AutomationError> {
        if let Ok(number) = input.trim().parse::<f64>() {
            if let Some(value) = self.value().await? {
                return value.set(number).await;
            }
        }
        match self.editable_text().await? {
            Some(editable) => editable.set_contents(input).await,
            None => Err(AutomationError::UnsupportedOperation(format!(
                "{} accepts neither a value nor text",
                self.object_id()
            ))),
        }
    }

    pub async fn extents(&self) -> Result<Rect, AutomationError> {
        match self.component().await? {
            Some(component) => component.extents().await,
            None => Err(AutomationError::UnsupportedOperation(format!(
                "{} has no geometry",
                self.object_id()
            ))),
        }
    }
}

impl Debug for Accessible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Accessible").field(&self.inner).finish()
    }
}

impl PartialEq for Accessible {
    fn eq(&self, other: &Self) -> bool {
        self.inner.object_id() == other.inner.object_id()
    }
}

impl Eq for Accessible {}

impl std::hash::Hash for Accessible {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.object_id().hash(state);
    }
}
