use crate::element::Accessible;
use crate::errors::AutomationError;
use std::sync::Arc;
use tracing::debug;

pub mod memory;

#[cfg(target_os = "linux")]
pub mod linux;

/// The common trait that all accessibility providers must implement.
#[async_trait::async_trait]
pub trait AccessibilityEngine: Send + Sync {
    /// The desktop root; its children are the registered applications.
    async fn desktop(&self) -> Result<Accessible, AutomationError>;

    /// All applications currently registered with the provider.
    ///
    /// Children that fail to resolve are skipped rather than failing the scan.
    async fn applications(&self) -> Result<Vec<Accessible>, AutomationError> {
        let desktop = self.desktop().await?;
        let count = desktop.child_count().await?;
        let mut apps = Vec::with_capacity(count);
        for index in 0..count {
            match desktop.child_at(index).await {
                Ok(Some(app)) => apps.push(app),
                Ok(None) => {}
                Err(e) => debug!("skipping application {index}: {e}"),
            }
        }
        Ok(apps)
    }

    /// Synthesizes a press and release of the given X keysym.
    async fn generate_keysym(&self, keysym: u32) -> Result<(), AutomationError>;
}

/// Connects to the accessibility provider of the current platform.
#[cfg(target_os = "linux")]
pub async fn create_engine() -> Result<Arc<dyn AccessibilityEngine>, AutomationError> {
    let engine = linux::AtspiEngine::connect().await?;
    Ok(Arc::new(engine))
}

#[cfg(not(target_os = "linux"))]
pub async fn create_engine() -> Result<Arc<dyn AccessibilityEngine>, AutomationError> {
    Err(AutomationError::UnsupportedPlatform(
        "only the AT-SPI provider on Linux is available".to_string(),
    ))
}
