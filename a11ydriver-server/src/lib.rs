//! WebDriver HTTP surface over the `a11ydriver` session engine.

pub mod api;
pub mod helpers;
pub mod types;

pub use api::{router, AppState, W3cError};
pub use helpers::{DesktopHelpers, ExternalHelpers, HelperPrograms};
