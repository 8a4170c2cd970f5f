//! AT-SPI 2 provider.
//!
//! Each node is a (bus name, object path) pair reached through the typed
//! `atspi-proxies` interfaces; every property read is a D-Bus round trip.

use crate::element::{
    Accessible, AccessibleImpl, ActionCapability, ComponentCapability, EditableTextCapability,
    Rect, TextCapability, ValueCapability,
};
use crate::errors::AutomationError;
use crate::platforms::AccessibilityEngine;
use crate::state::StateSet;
use atspi::connection::AccessibilityConnection;
use atspi_common::{CoordType, Interface};
use atspi_proxies::accessible::AccessibleProxy;
use atspi_proxies::action::ActionProxy;
use atspi_proxies::application::ApplicationProxy;
use atspi_proxies::component::ComponentProxy;
use atspi_proxies::device_event_controller::{DeviceEventControllerProxy, KeySynthType};
use atspi_proxies::editable_text::EditableTextProxy;
use atspi_proxies::text::TextProxy;
use atspi_proxies::value::ValueProxy;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};
use zbus::fdo::DBusProxy;
use zbus::names::BusName;
use zbus::proxy::{CacheProperties, Defaults};
use zbus::Connection;

const REGISTRY_BUS_NAME: &str = "org.a11y.atspi.Registry";
const ROOT_PATH: &str = "/org/a11y/atspi/accessible/root";
const NULL_PATH: &str = "/org/a11y/atspi/null";
const DEVICE_EVENT_CONTROLLER_PATH: &str = "/org/a11y/atspi/registry/deviceeventcontroller";

impl From<zbus::Error> for AutomationError {
    fn from(err: zbus::Error) -> Self {
        AutomationError::PlatformError(format!("D-Bus: {err}"))
    }
}

impl From<zbus::fdo::Error> for AutomationError {
    fn from(err: zbus::fdo::Error) -> Self {
        AutomationError::PlatformError(format!("D-Bus: {err}"))
    }
}

/// Builds an uncached typed proxy for `path` on `bus_name`.
async fn make_proxy<P>(conn: &Connection, bus_name: &str, path: &str) -> Result<P, AutomationError>
where
    P: From<zbus::Proxy<'static>> + Defaults,
{
    Ok(zbus::proxy::Builder::<P>::new(conn)
        .destination(bus_name.to_string())?
        .path(path.to_string())?
        .cache_properties(CacheProperties::No)
        .build()
        .await?)
}

/// Toolkit names keyed by application bus name.
type ToolkitCache = Arc<Mutex<HashMap<String, String>>>;

/// Engine backed by the AT-SPI registry on the accessibility bus.
pub struct AtspiEngine {
    conn: Connection,
    toolkits: ToolkitCache,
}

impl AtspiEngine {
    pub async fn connect() -> Result<Self, AutomationError> {
        let a11y = AccessibilityConnection::new().await.map_err(|e| {
            AutomationError::PlatformError(format!("cannot reach the accessibility bus: {e}"))
        })?;
        info!("connected to the accessibility bus");
        Ok(Self {
            conn: a11y.connection().clone(),
            toolkits: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn node(&self, bus_name: &str, path: &str) -> AtspiNode {
        AtspiNode {
            conn: self.conn.clone(),
            bus_name: bus_name.to_string(),
            path: path.to_string(),
            toolkits: self.toolkits.clone(),
        }
    }
}

#[async_trait::async_trait]
impl AccessibilityEngine for AtspiEngine {
    async fn desktop(&self) -> Result<Accessible, AutomationError> {
        Ok(Accessible::new(Arc::new(self.node(REGISTRY_BUS_NAME, ROOT_PATH))))
    }

    async fn generate_keysym(&self, keysym: u32) -> Result<(), AutomationError> {
        let controller: DeviceEventControllerProxy<'static> =
            make_proxy(&self.conn, REGISTRY_BUS_NAME, DEVICE_EVENT_CONTROLLER_PATH).await?;
        let keycode = i32::try_from(keysym)
            .map_err(|_| AutomationError::InvalidArgument(format!("keysym {keysym:#x} out of range")))?;
        controller
            .generate_keyboard_event(keycode, "", KeySynthType::Sym)
            .await?;
        Ok(())
    }
}

/// One remote accessible object.
#[derive(Clone)]
pub struct AtspiNode {
    conn: Connection,
    bus_name: String,
    path: String,
    toolkits: ToolkitCache,
}

impl fmt::Debug for AtspiNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtspiNode({}:{})", self.bus_name, self.path)
    }
}

impl AtspiNode {
    async fn proxy<P>(&self) -> Result<P, AutomationError>
    where
        P: From<zbus::Proxy<'static>> + Defaults,
    {
        make_proxy(&self.conn, &self.bus_name, &self.path).await
    }

    async fn accessible(&self) -> Result<AccessibleProxy<'static>, AutomationError> {
        self.proxy().await
    }

    /// A capability view when the object implements `interface`.
    async fn capability(&self, interface: Interface) -> Result<Option<AtspiCapability>, AutomationError> {
        let supported = self.accessible().await?.get_interfaces().await?.contains(interface);
        Ok(supported.then(|| AtspiCapability { node: self.clone() }))
    }
}

#[async_trait::async_trait]
impl AccessibleImpl for AtspiNode {
    fn object_id(&self) -> String {
        format!("{}:{}", self.bus_name, self.path)
    }

    async fn name(&self) -> Result<String, AutomationError> {
        Ok(self.accessible().await?.name().await?)
    }

    async fn description(&self) -> Result<String, AutomationError> {
        Ok(self.accessible().await?.description().await?)
    }

    async fn role(&self) -> Result<u32, AutomationError> {
        Ok(self.accessible().await?.get_role().await? as u32)
    }

    async fn role_name(&self) -> Result<String, AutomationError> {
        Ok(self.accessible().await?.get_role_name().await?)
    }

    async fn accessible_id(&self) -> Result<Option<String>, AutomationError> {
        // Older toolkits do not implement the property at all.
        match self.accessible().await?.accessible_id().await {
            Ok(id) if !id.is_empty() => Ok(Some(id)),
            Ok(_) => Ok(None),
            Err(e) => {
                debug!("no AccessibleId on {}: {e}", self.object_id());
                Ok(None)
            }
        }
    }

    async fn toolkit_name(&self) -> Result<String, AutomationError> {
        let cached = self
            .toolkits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.bus_name)
            .cloned();
        if let Some(name) = cached {
            return Ok(name);
        }
        let app: ApplicationProxy<'static> =
            make_proxy(&self.conn, &self.bus_name, ROOT_PATH).await?;
        let name = app.toolkit_name().await?;
        self.toolkits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.bus_name.clone(), name.clone());
        Ok(name)
    }

    async fn states(&self) -> Result<StateSet, AutomationError> {
        Ok(self.accessible().await?.get_state().await?)
    }

    async fn child_count(&self) -> Result<usize, AutomationError> {
        let count = self.accessible().await?.child_count().await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn child_at(&self, index: usize) -> Result<Option<Accessible>, AutomationError> {
        let index = i32::try_from(index)
            .map_err(|_| AutomationError::InvalidArgument(format!("child index {index} out of range")))?;
        let child = self.accessible().await?.get_child_at_index(index).await?;
        let (bus_name, path) = (child.name.as_str(), child.path.as_str());
        if path == NULL_PATH || bus_name.is_empty() {
            return Ok(None);
        }
        Ok(Some(Accessible::new(Arc::new(AtspiNode {
            conn: self.conn.clone(),
            bus_name: bus_name.to_string(),
            path: path.to_string(),
            toolkits: self.toolkits.clone(),
        }))))
    }

    async fn process_id(&self) -> Result<u32, AutomationError> {
        let dbus = DBusProxy::new(&self.conn).await?;
        let name = BusName::try_from(self.bus_name.as_str())
            .map_err(|e| AutomationError::PlatformError(format!("bad bus name {}: {e}", self.bus_name)))?;
        Ok(dbus.get_connection_unix_process_id(name).await?)
    }

    async fn text(&self) -> Result<Option<Box<dyn TextCapability>>, AutomationError> {
        Ok(self
            .capability(Interface::Text)
            .await?
            .map(|c| Box::new(c) as Box<dyn TextCapability>))
    }

    async fn editable_text(
        &self,
    ) -> Result<Option<Box<dyn EditableTextCapability>>, AutomationError> {
        Ok(self
            .capability(Interface::EditableText)
            .await?
            .map(|c| Box::new(c) as Box<dyn EditableTextCapability>))
    }

    async fn action(&self) -> Result<Option<Box<dyn ActionCapability>>, AutomationError> {
        Ok(self
            .capability(Interface::Action)
            .await?
            .map(|c| Box::new(c) as Box<dyn ActionCapability>))
    }

    async fn value(&self) -> Result<Option<Box<dyn ValueCapability>>, AutomationError> {
        Ok(self
            .capability(Interface::Value)
            .await?
            .map(|c| Box::new(c) as Box<dyn ValueCapability>))
    }

    async fn component(&self) -> Result<Option<Box<dyn ComponentCapability>>, AutomationError> {
        Ok(self
            .capability(Interface::Component)
            .await?
            .map(|c| Box::new(c) as Box<dyn ComponentCapability>))
    }
}

struct AtspiCapability {
    node: AtspiNode,
}

/// Maps a `false` acknowledgement from the provider to an error.
fn acknowledged(ok: bool, object_id: &str, what: &str) -> Result<(), AutomationError> {
    if ok {
        Ok(())
    } else {
        Err(AutomationError::PlatformError(format!(
            "{object_id} refused {what}"
        )))
    }
}

#[async_trait::async_trait]
impl TextCapability for AtspiCapability {
    async fn contents(&self) -> Result<String, AutomationError> {
        let text: TextProxy<'static> = self.node.proxy().await?;
        Ok(text.get_text(0, -1).await?)
    }
}

#[async_trait::async_trait]
impl EditableTextCapability for AtspiCapability {
    async fn insert_text(&self, position: i32, text: &str) -> Result<(), AutomationError> {
        let length = i32::try_from(text.chars().count()).unwrap_or(i32::MAX);
        let position = if position < 0 {
            let contents: TextProxy<'static> = self.node.proxy().await?;
            contents.character_count().await?
        } else {
            position
        };
        let editable: EditableTextProxy<'static> = self.node.proxy().await?;
        let ok = editable.insert_text(position, text, length).await?;
        acknowledged(ok, &self.node.object_id(), "the inserted text")
    }

    async fn set_contents(&self, text: &str) -> Result<(), AutomationError> {
        let editable: EditableTextProxy<'static> = self.node.proxy().await?;
        let ok = editable.set_text_contents(text).await?;
        acknowledged(ok, &self.node.object_id(), "the new contents")
    }
}

#[async_trait::async_trait]
impl ActionCapability for AtspiCapability {
    async fn action_names(&self) -> Result<Vec<String>, AutomationError> {
        let action: ActionProxy<'static> = self.node.proxy().await?;
        let count = action.nactions().await?;
        let mut names = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
        for index in 0..count.max(0) {
            names.push(action.get_name(index).await?);
        }
        Ok(names)
    }

    async fn do_action(&self, index: usize) -> Result<(), AutomationError> {
        let index = i32::try_from(index)
            .map_err(|_| AutomationError::InvalidArgument(format!("action index {index} out of range")))?;
        let action: ActionProxy<'static> = self.node.proxy().await?;
        let ok = action.do_action(index).await?;
        acknowledged(ok, &self.node.object_id(), &format!("action {index}"))
    }
}

#[async_trait::async_trait]
impl ValueCapability for AtspiCapability {
    async fn current(&self) -> Result<f64, AutomationError> {
        let value: ValueProxy<'static> = self.node.proxy().await?;
        Ok(value.current_value().await?)
    }

    async fn set(&self, value: f64) -> Result<(), AutomationError> {
        let proxy: ValueProxy<'static> = self.node.proxy().await?;
        proxy.set_current_value(value).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ComponentCapability for AtspiCapability {
    async fn extents(&self) -> Result<Rect, AutomationError> {
        let component: ComponentProxy<'static> = self.node.proxy().await?;
        let (x, y, width, height) = component.get_extents(CoordType::Screen).await?;
        Ok(Rect::new(x, y, width, height))
    }
}
