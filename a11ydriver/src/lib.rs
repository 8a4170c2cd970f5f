//! Session, locator and element-handle engine for driving desktop
//! applications through their accessibility tree.
//!
//! A [`SessionManager`] binds sessions to applications found on an
//! [`AccessibilityEngine`], a [`Locator`] resolves strategy/selector pairs
//! (including structural [`XPath`] queries over a [`SnapshotTree`]) to live
//! [`Accessible`] nodes, and each session's [`ElementRegistry`] hands out
//! path-derived element handles.

pub mod capabilities;
pub mod config;
pub mod element;
pub mod errors;
pub mod keys;
pub mod launcher;
pub mod locator;
pub mod platforms;
pub mod registry;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod xpath;

pub use capabilities::{AppTarget, Capabilities, Timeouts};
pub use config::DriverConfig;
pub use element::{Accessible, AccessibleImpl, Rect};
pub use errors::{AutomationError, WebDriverError};
pub use launcher::{AppLauncher, LaunchRequest, ProcessLauncher};
pub use locator::{LocateMode, Located, Locator, LocatorStrategy};
pub use platforms::{create_engine, AccessibilityEngine};
pub use registry::{ElementRegistry, ELEMENT_KEY};
pub use session::{Session, SessionHandle, SessionManager};
pub use snapshot::SnapshotTree;
pub use state::{state_set, State, StateSet, StateSetExt};
pub use xpath::XPath;
