use std::time::Duration;

/// Implicit wait applied to new sessions that do not ask for one.
pub const DEFAULT_IMPLICIT_WAIT_MS: u64 = 5000;

/// Runtime knobs shared by the session manager and locator engine.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Implicit wait for sessions whose capabilities carry no `timeouts.implicit`.
    pub implicit_wait_ms: u64,
    /// Pause between locate passes.
    pub locate_poll_interval: Duration,
    /// Pause between application registry scans during session discovery.
    pub discovery_poll_interval: Duration,
    /// Only subtrees whose toolkit appears here are serialized.
    pub toolkit_allow_list: Vec<String>,
    /// Delay after focus/press actions so the application can catch up.
    pub settle_delay: Duration,
    /// Environment variables every launched application receives.
    pub launch_environment: Vec<(String, String)>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            implicit_wait_ms: DEFAULT_IMPLICIT_WAIT_MS,
            locate_poll_interval: Duration::from_millis(50),
            discovery_poll_interval: Duration::from_millis(100),
            toolkit_allow_list: vec!["Qt".to_string(), "at-spi-registry".to_string()],
            settle_delay: Duration::from_millis(100),
            launch_environment: vec![
                ("QT_ACCESSIBILITY".to_string(), "1".to_string()),
                ("QT_LINUX_ACCESSIBILITY_ALWAYS_ON".to_string(), "1".to_string()),
                // keeps kio's cache cleaner from outliving the application
                ("KIO_DISABLE_CACHE_CLEANER".to_string(), "1".to_string()),
            ],
        }
    }
}

impl DriverConfig {
    pub fn allows_toolkit(&self, toolkit: &str) -> bool {
        self.toolkit_allow_list.iter().any(|allowed| allowed == toolkit)
    }
}
