//! Session-scoped element handles.
//!
//! A handle is the element's structural path from the browsing context, not
//! a reference to the provider object. Locating the same position again
//! yields the same handle and replaces the cached node. If the tree is
//! reshaped, an old handle keeps pointing at whatever node was cached for it,
//! which may by then be defunct. Entries are kept until the session ends.

use crate::errors::WebDriverError;
use crate::locator::Located;
use std::collections::HashMap;

/// JSON key under which W3C clients expect element handles.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const HANDLE_PREFIX: &str = "e";

/// Handle string for a structural path, e.g. `[0, 3, 1]` becomes `"e-0-3-1"`.
pub fn handle_for_path(path: &[usize]) -> String {
    let mut handle = HANDLE_PREFIX.to_string();
    for index in path {
        handle.push('-');
        handle.push_str(&index.to_string());
    }
    handle
}

/// Inverse of [`handle_for_path`].
pub fn path_for_handle(handle: &str) -> Option<Vec<usize>> {
    let mut parts = handle.split('-');
    if parts.next()? != HANDLE_PREFIX {
        return None;
    }
    parts.map(|part| part.parse().ok()).collect()
}

#[derive(Debug, Default)]
pub struct ElementRegistry {
    entries: HashMap<String, Located>,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caches `located` and returns its handle, replacing any earlier entry
    /// at the same position.
    pub fn register(&mut self, located: Located) -> String {
        let handle = handle_for_path(&located.path);
        self.entries.insert(handle.clone(), located);
        handle
    }

    pub fn resolve(&self, handle: &str) -> Result<&Located, WebDriverError> {
        self.entries.get(handle).ok_or_else(|| {
            WebDriverError::NoSuchElement(format!("no element with handle '{handle}'"))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
