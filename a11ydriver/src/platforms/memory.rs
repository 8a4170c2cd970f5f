//! An in-process accessibility tree.
//!
//! Nodes are mutable after construction so callers can reshape the tree
//! between operations. Used by the test suites and by embedders that want to
//! expose a synthetic tree.

use crate::element::{
    Accessible, AccessibleImpl, ActionCapability, ComponentCapability, EditableTextCapability,
    Rect, TextCapability, ValueCapability,
};
use crate::errors::AutomationError;
use crate::platforms::AccessibilityEngine;
use crate::state::{state_set, State, StateSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Default)]
struct NodeData {
    name: String,
    description: String,
    role: u32,
    role_name: String,
    accessible_id: Option<String>,
    toolkit: String,
    states: StateSet,
    process_id: u32,
    children: Vec<Arc<MemoryNode>>,
    text: Option<String>,
    editable: bool,
    actions: Vec<String>,
    performed: Vec<String>,
    value: Option<f64>,
    extents: Option<Rect>,
    refuses_actions: bool,
    broken: bool,
}

/// A node of the in-memory tree.
pub struct MemoryNode {
    id: u64,
    data: Arc<RwLock<NodeData>>,
}

impl fmt::Debug for MemoryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.read();
        f.debug_struct("MemoryNode")
            .field("id", &self.id)
            .field("role_name", &data.role_name)
            .field("name", &data.name)
            .finish()
    }
}

impl MemoryNode {
    pub fn builder(role_name: &str) -> MemoryNodeBuilder {
        MemoryNodeBuilder {
            data: NodeData {
                role_name: role_name.to_string(),
                toolkit: "Qt".to_string(),
                ..NodeData::default()
            },
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, NodeData> {
        read_data(&self.data)
    }

    fn write(&self) -> RwLockWriteGuard<'_, NodeData> {
        write_data(&self.data)
    }

    fn capability(&self) -> MemoryCapability {
        MemoryCapability {
            data: self.data.clone(),
        }
    }

    fn check(&self) -> Result<RwLockReadGuard<'_, NodeData>, AutomationError> {
        let data = self.read();
        if data.broken {
            return Err(AutomationError::PlatformError(format!(
                "memory node {} is unreachable",
                self.id
            )));
        }
        Ok(data)
    }

    pub fn accessible(self: &Arc<Self>) -> Accessible {
        Accessible::new(self.clone())
    }

    pub fn set_name(&self, name: &str) {
        self.write().name = name.to_string();
    }

    pub fn set_description(&self, description: &str) {
        self.write().description = description.to_string();
    }

    pub fn set_states(&self, states: StateSet) {
        self.write().states = states;
    }

    pub fn set_process_id(&self, pid: u32) {
        self.write().process_id = pid;
    }

    /// Makes the provider answer `false` to every action request.
    pub fn set_refuses_actions(&self, refuses: bool) {
        self.write().refuses_actions = refuses;
    }

    /// Makes every read on this node fail, as a vanished provider object would.
    pub fn set_broken(&self, broken: bool) {
        self.write().broken = broken;
    }

    pub fn push_child(&self, child: Arc<MemoryNode>) {
        self.write().children.push(child);
    }

    pub fn insert_child(&self, index: usize, child: Arc<MemoryNode>) {
        let mut data = self.write();
        let index = index.min(data.children.len());
        data.children.insert(index, child);
    }

    pub fn remove_child(&self, index: usize) -> Option<Arc<MemoryNode>> {
        let mut data = self.write();
        (index < data.children.len()).then(|| data.children.remove(index))
    }

    pub fn text_contents(&self) -> Option<String> {
        self.read().text.clone()
    }

    pub fn current_value(&self) -> Option<f64> {
        self.read().value
    }

    /// Names of the actions run on this node, oldest first.
    pub fn performed_actions(&self) -> Vec<String> {
        self.read().performed.clone()
    }
}

/// Builder for [`MemoryNode`].
pub struct MemoryNodeBuilder {
    data: NodeData,
}

impl MemoryNodeBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.data.name = name.to_string();
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.data.description = description.to_string();
        self
    }

    pub fn role(mut self, role: u32) -> Self {
        self.data.role = role;
        self
    }

    pub fn accessible_id(mut self, id: &str) -> Self {
        self.data.accessible_id = Some(id.to_string());
        self
    }

    pub fn toolkit(mut self, toolkit: &str) -> Self {
        self.data.toolkit = toolkit.to_string();
        self
    }

    pub fn states(mut self, states: &[State]) -> Self {
        self.data.states = state_set(states);
        self
    }

    pub fn process_id(mut self, pid: u32) -> Self {
        self.data.process_id = pid;
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.data.text = Some(text.to_string());
        self
    }

    pub fn editable(mut self) -> Self {
        self.data.editable = true;
        self.data.text.get_or_insert_with(String::new);
        self
    }

    pub fn actions(mut self, actions: &[&str]) -> Self {
        self.data.actions = actions.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn value(mut self, value: f64) -> Self {
        self.data.value = Some(value);
        self
    }

    pub fn extents(mut self, rect: Rect) -> Self {
        self.data.extents = Some(rect);
        self
    }

    pub fn child(mut self, child: Arc<MemoryNode>) -> Self {
        self.data.children.push(child);
        self
    }

    pub fn build(self) -> Arc<MemoryNode> {
        Arc::new(MemoryNode {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            data: Arc::new(RwLock::new(self.data)),
        })
    }
}

#[async_trait::async_trait]
impl AccessibleImpl for MemoryNode {
    fn object_id(&self) -> String {
        format!("memory:{}", self.id)
    }

    async fn name(&self) -> Result<String, AutomationError> {
        Ok(self.check()?.name.clone())
    }

    async fn description(&self) -> Result<String, AutomationError> {
        Ok(self.check()?.description.clone())
    }

    async fn role(&self) -> Result<u32, AutomationError> {
        Ok(self.check()?.role)
    }

    async fn role_name(&self) -> Result<String, AutomationError> {
        Ok(self.check()?.role_name.clone())
    }

    async fn accessible_id(&self) -> Result<Option<String>, AutomationError> {
        Ok(self.check()?.accessible_id.clone())
    }

    async fn toolkit_name(&self) -> Result<String, AutomationError> {
        Ok(self.check()?.toolkit.clone())
    }

    async fn states(&self) -> Result<StateSet, AutomationError> {
        Ok(self.check()?.states)
    }

    async fn child_count(&self) -> Result<usize, AutomationError> {
        Ok(self.check()?.children.len())
    }

    async fn child_at(&self, index: usize) -> Result<Option<Accessible>, AutomationError> {
        Ok(self.check()?.children.get(index).map(|c| c.accessible()))
    }

    async fn process_id(&self) -> Result<u32, AutomationError> {
        Ok(self.check()?.process_id)
    }

    async fn text(&self) -> Result<Option<Box<dyn TextCapability>>, AutomationError> {
        let has_text = self.check()?.text.is_some();
        Ok(has_text.then(|| Box::new(self.capability()) as Box<dyn TextCapability>))
    }

    async fn editable_text(
        &self,
    ) -> Result<Option<Box<dyn EditableTextCapability>>, AutomationError> {
        let editable = self.check()?.editable;
        Ok(editable
            .then(|| Box::new(self.capability()) as Box<dyn EditableTextCapability>))
    }

    async fn action(&self) -> Result<Option<Box<dyn ActionCapability>>, AutomationError> {
        let has_actions = !self.check()?.actions.is_empty();
        Ok(has_actions
            .then(|| Box::new(self.capability()) as Box<dyn ActionCapability>))
    }

    async fn value(&self) -> Result<Option<Box<dyn ValueCapability>>, AutomationError> {
        let has_value = self.check()?.value.is_some();
        Ok(has_value
            .then(|| Box::new(self.capability()) as Box<dyn ValueCapability>))
    }

    async fn component(&self) -> Result<Option<Box<dyn ComponentCapability>>, AutomationError> {
        let has_extents = self.check()?.extents.is_some();
        Ok(has_extents
            .then(|| Box::new(self.capability()) as Box<dyn ComponentCapability>))
    }
}

fn read_data(data: &RwLock<NodeData>) -> RwLockReadGuard<'_, NodeData> {
    data.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_data(data: &RwLock<NodeData>) -> RwLockWriteGuard<'_, NodeData> {
    data.write().unwrap_or_else(PoisonError::into_inner)
}

/// Interface view over a node's shared data.
struct MemoryCapability {
    data: Arc<RwLock<NodeData>>,
}

#[async_trait::async_trait]
impl TextCapability for MemoryCapability {
    async fn contents(&self) -> Result<String, AutomationError> {
        Ok(read_data(&self.data).text.clone().unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl EditableTextCapability for MemoryCapability {
    async fn insert_text(&self, position: i32, text: &str) -> Result<(), AutomationError> {
        let mut data = write_data(&self.data);
        let contents = data.text.get_or_insert_with(String::new);
        let chars: Vec<char> = contents.chars().collect();
        let at = if position < 0 {
            chars.len()
        } else {
            (position as usize).min(chars.len())
        };
        let mut updated: String = chars[..at].iter().collect();
        updated.push_str(text);
        updated.extend(&chars[at..]);
        *contents = updated;
        Ok(())
    }

    async fn set_contents(&self, text: &str) -> Result<(), AutomationError> {
        write_data(&self.data).text = Some(text.to_string());
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionCapability for MemoryCapability {
    async fn action_names(&self) -> Result<Vec<String>, AutomationError> {
        Ok(read_data(&self.data).actions.clone())
    }

    async fn do_action(&self, index: usize) -> Result<(), AutomationError> {
        let mut data = write_data(&self.data);
        let name = data.actions.get(index).cloned().ok_or_else(|| {
            AutomationError::InvalidArgument(format!("no action at index {index}"))
        })?;
        if data.refuses_actions {
            return Err(AutomationError::PlatformError(format!(
                "memory node refused action {index}"
            )));
        }
        match name.as_str() {
            "Toggle" => {
                if data.states.contains(State::Checked) {
                    data.states.remove(State::Checked);
                } else {
                    data.states.insert(State::Checked);
                }
            }
            "SetFocus" => data.states.insert(State::Focused),
            _ => {}
        }
        data.performed.push(name);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ValueCapability for MemoryCapability {
    async fn current(&self) -> Result<f64, AutomationError> {
        Ok(read_data(&self.data).value.unwrap_or_default())
    }

    async fn set(&self, value: f64) -> Result<(), AutomationError> {
        write_data(&self.data).value = Some(value);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ComponentCapability for MemoryCapability {
    async fn extents(&self) -> Result<Rect, AutomationError> {
        Ok(read_data(&self.data).extents.unwrap_or_default())
    }
}

/// Engine over an in-memory desktop node.
pub struct MemoryEngine {
    desktop: Arc<MemoryNode>,
    keysyms: Mutex<Vec<u32>>,
}

impl MemoryEngine {
    pub fn new(desktop: Arc<MemoryNode>) -> Self {
        Self {
            desktop,
            keysyms: Mutex::new(Vec::new()),
        }
    }

    pub fn desktop_node(&self) -> &Arc<MemoryNode> {
        &self.desktop
    }

    /// Keysyms synthesized so far, oldest first.
    pub fn typed_keysyms(&self) -> Vec<u32> {
        self.keysyms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl AccessibilityEngine for MemoryEngine {
    async fn desktop(&self) -> Result<Accessible, AutomationError> {
        Ok(self.desktop.accessible())
    }

    async fn generate_keysym(&self, keysym: u32) -> Result<(), AutomationError> {
        self.keysyms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(keysym);
        Ok(())
    }

}
