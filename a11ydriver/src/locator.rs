use crate::config::DriverConfig;
use crate::element::Accessible;
use crate::errors::{AutomationError, WebDriverError};
use crate::snapshot::SnapshotTree;
use crate::state::StateSetExt;
use crate::xpath::XPath;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// How a locate request identifies its targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorStrategy {
    /// Accessibility id ends with the selector; node visible and sensitive.
    AccessibilityId,
    /// `"[role name | name]"` equals the selector; node visible or sensitive.
    ClassName,
    /// Name equals the selector; node visible or sensitive.
    Name,
    /// Description equals the selector; node visible or sensitive.
    Description,
    /// Structural query over a fresh snapshot.
    XPath,
}

impl FromStr for LocatorStrategy {
    type Err = WebDriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accessibility id" | "accessibility-id" => Ok(LocatorStrategy::AccessibilityId),
            "class name" | "class-name" => Ok(LocatorStrategy::ClassName),
            "name" => Ok(LocatorStrategy::Name),
            "description" => Ok(LocatorStrategy::Description),
            "xpath" => Ok(LocatorStrategy::XPath),
            other => Err(WebDriverError::InvalidArgument(format!(
                "unsupported locator strategy '{other}'"
            ))),
        }
    }
}

impl fmt::Display for LocatorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LocatorStrategy::AccessibilityId => "accessibility id",
            LocatorStrategy::ClassName => "class name",
            LocatorStrategy::Name => "name",
            LocatorStrategy::Description => "description",
            LocatorStrategy::XPath => "xpath",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateMode {
    First,
    All,
}

/// A live node together with its path from the browsing context.
#[derive(Debug, Clone)]
pub struct Located {
    pub node: Accessible,
    pub path: Vec<usize>,
}

/// A validated locate request.
///
/// Building one checks the strategy and selector and compiles structural
/// queries, so malformed requests fail before any polling starts.
#[derive(Debug, Clone)]
pub struct Locator {
    strategy: LocatorStrategy,
    selector: String,
    query: Option<XPath>,
    timeout: Duration,
    poll_interval: Duration,
}

impl Locator {
    pub fn new(using: &str, value: &str) -> Result<Self, WebDriverError> {
        if using.is_empty() || value.is_empty() {
            return Err(WebDriverError::InvalidArgument(
                "both 'using' and 'value' must be non-empty".to_string(),
            ));
        }
        let strategy: LocatorStrategy = using.parse()?;
        let query = match strategy {
            LocatorStrategy::XPath => Some(
                XPath::compile(value)
                    .map_err(|e| WebDriverError::InvalidArgument(format!("{value}: {e}")))?,
            ),
            _ => None,
        };
        Ok(Self {
            strategy,
            selector: value.to_string(),
            query,
            timeout: Duration::ZERO,
            poll_interval: DriverConfig::default().locate_poll_interval,
        })
    }

    /// Total time the search may keep retrying while nothing matches.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn strategy(&self) -> LocatorStrategy {
        self.strategy
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Finds matches below `start`, retrying until something matches or the
    /// timeout elapses. At least one pass always runs.
    ///
    /// `start_path` is the path of `start` from `context`. An empty result is
    /// not an error.
    #[instrument(level = "debug", skip(self, context, start, config), fields(strategy = %self.strategy, selector = %self.selector))]
    pub async fn locate(
        &self,
        context: &Accessible,
        start: &Accessible,
        start_path: &[usize],
        mode: LocateMode,
        config: &DriverConfig,
    ) -> Result<Vec<Located>, WebDriverError> {
        let began = Instant::now();
        let deadline = began + self.timeout;
        let mut passes = 0u32;

        loop {
            passes += 1;
            let found = self
                .search_once(context, start, start_path, mode, config)
                .await?;
            if !found.is_empty() {
                debug!(
                    "{} match(es) after {passes} pass(es) in {:?}",
                    found.len(),
                    began.elapsed()
                );
                return Ok(found);
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }

        debug!("no match after {passes} pass(es) in {:?}", began.elapsed());
        Ok(Vec::new())
    }

    async fn search_once(
        &self,
        context: &Accessible,
        start: &Accessible,
        start_path: &[usize],
        mode: LocateMode,
        config: &DriverConfig,
    ) -> Result<Vec<Located>, WebDriverError> {
        match &self.query {
            Some(query) => self.search_snapshot(query, context, start, start_path, mode, config).await,
            None => Ok(self.search_live(start, start_path, mode).await),
        }
    }

    /// Depth-first pre-order walk below `start` (excluding it).
    async fn search_live(
        &self,
        start: &Accessible,
        start_path: &[usize],
        mode: LocateMode,
    ) -> Vec<Located> {
        let mut found = Vec::new();
        let mut stack = Vec::new();
        push_children(&mut stack, start, start_path).await;

        while let Some((node, path)) = stack.pop() {
            match self.matches(&node).await {
                Ok(true) => {
                    found.push(Located {
                        node: node.clone(),
                        path: path.clone(),
                    });
                    if mode == LocateMode::First {
                        break;
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    debug!("skipping {path:?}: {e}");
                    continue;
                }
            }
            push_children(&mut stack, &node, &path).await;
        }
        found
    }

    async fn matches(&self, node: &Accessible) -> Result<bool, AutomationError> {
        let selector = self.selector.as_str();
        let (hit, needs_both) = match self.strategy {
            LocatorStrategy::AccessibilityId => (
                node.accessible_id()
                    .await?
                    .is_some_and(|id| id.ends_with(selector)),
                true,
            ),
            LocatorStrategy::ClassName => (node.class_name().await? == selector, false),
            LocatorStrategy::Name => (node.name().await? == selector, false),
            LocatorStrategy::Description => (node.description().await? == selector, false),
            LocatorStrategy::XPath => return Ok(false),
        };
        if !hit {
            return Ok(false);
        }
        let states = node.states().await?;
        Ok(if needs_both {
            states.is_visible() && states.is_sensitive()
        } else {
            states.is_visible() || states.is_sensitive()
        })
    }

    /// Evaluates the query on a fresh snapshot and maps every hit back to a
    /// live node by walking `context` along the recorded path.
    ///
    /// A hit whose live node no longer has the snapshot's name and
    /// description fails the whole search, even in `First` mode.
    async fn search_snapshot(
        &self,
        query: &XPath,
        context: &Accessible,
        start: &Accessible,
        start_path: &[usize],
        mode: LocateMode,
        config: &DriverConfig,
    ) -> Result<Vec<Located>, WebDriverError> {
        let tree = SnapshotTree::capture(start, start_path, config)
            .await
            .map_err(|e| {
                if start_path.is_empty() {
                    WebDriverError::NoSuchWindow(format!("browsing context unreachable: {e}"))
                } else {
                    WebDriverError::NoSuchElement(format!("search root unreachable: {e}"))
                }
            })?;
        let hits = query
            .select(&tree)
            .map_err(|e| WebDriverError::InvalidArgument(format!("{}: {e}", query.as_str())))?;

        let mut found = Vec::with_capacity(hits.len());
        for index in hits {
            let snap = tree.node(index);
            let stale = |reason: String| {
                WebDriverError::NoSuchElement(format!(
                    "tree changed under {:?}: {reason}",
                    snap.path
                ))
            };
            let live = context
                .descend(&snap.path)
                .await
                .map_err(|e| stale(e.to_string()))?;
            let name = live.name().await.map_err(|e| stale(e.to_string()))?;
            let description = live.description().await.map_err(|e| stale(e.to_string()))?;
            if name != snap.name || description != snap.description {
                return Err(stale(format!(
                    "snapshot has '{}'/'{}', live node has '{name}'/'{description}'",
                    snap.name, snap.description
                )));
            }
            found.push(Located {
                node: live,
                path: snap.path.clone(),
            });
        }

        if mode == LocateMode::First {
            found.truncate(1);
        }
        Ok(found)
    }
}

/// Pushes the children of `node` so the first child is popped first.
async fn push_children(stack: &mut Vec<(Accessible, Vec<usize>)>, node: &Accessible, path: &[usize]) {
    let count = match node.child_count().await {
        Ok(count) => count,
        Err(e) => {
            debug!("cannot list children of {path:?}: {e}");
            return;
        }
    };
    for index in (0..count).rev() {
        match node.child_at(index).await {
            Ok(Some(child)) => {
                let mut child_path = path.to_vec();
                child_path.push(index);
                stack.push((child, child_path));
            }
            Ok(None) => {}
            Err(e) => debug!("child {index} of {path:?} unreadable: {e}"),
        }
    }
}
