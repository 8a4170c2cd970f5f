//! Spawning and killing the applications sessions drive.

use crate::errors::AutomationError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info, instrument, warn};

/// A process to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl LaunchRequest {
    /// Builds a request from an argv vector.
    pub fn from_argv(argv: Vec<String>, env: Vec<(String, String)>) -> Result<Self, AutomationError> {
        let mut argv = argv.into_iter();
        let program = argv
            .next()
            .ok_or_else(|| AutomationError::InvalidArgument("empty command line".to_string()))?;
        Ok(Self {
            program,
            args: argv.collect(),
            env,
        })
    }
}

/// Starts and stops application processes.
#[async_trait::async_trait]
pub trait AppLauncher: Send + Sync {
    /// Spawns the process and returns its pid without waiting for it.
    async fn launch(&self, request: &LaunchRequest) -> Result<u32, AutomationError>;

    /// Kills `pid`. A process that is already gone counts as success.
    async fn terminate(&self, pid: u32) -> Result<(), AutomationError>;
}

/// [`AppLauncher`] backed by real OS processes.
#[derive(Debug, Default, Clone)]
pub struct ProcessLauncher;

#[async_trait::async_trait]
impl AppLauncher for ProcessLauncher {
    #[instrument(level = "debug", skip(self))]
    async fn launch(&self, request: &LaunchRequest) -> Result<u32, AutomationError> {
        let mut child = tokio::process::Command::new(&request.program)
            .args(&request.args)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                AutomationError::LaunchFailed(format!("failed to spawn {}: {e}", request.program))
            })?;
        let pid = child.id().ok_or_else(|| {
            AutomationError::LaunchFailed(format!("{} exited immediately", request.program))
        })?;
        info!("launched {} as pid {pid}", request.program);

        // Reap the child so it does not linger as a zombie after it is killed.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("pid {pid} exited with {status}"),
                Err(e) => warn!("failed to wait for pid {pid}: {e}"),
            }
        });
        Ok(pid)
    }

    async fn terminate(&self, pid: u32) -> Result<(), AutomationError> {
        kill_process(pid)
    }
}

/// Sends SIGKILL to `pid`, treating a missing process as success.
#[cfg(unix)]
pub fn kill_process(pid: u32) -> Result<(), AutomationError> {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| AutomationError::InvalidArgument(format!("refusing to signal pid {pid}")))?;
    match signal::kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => {
            info!("killed pid {pid}");
            Ok(())
        }
        Err(Errno::ESRCH) => {
            debug!("pid {pid} already gone");
            Ok(())
        }
        Err(e) => Err(AutomationError::PlatformError(format!(
            "failed to kill pid {pid}: {e}"
        ))),
    }
}

#[cfg(not(unix))]
pub fn kill_process(pid: u32) -> Result<(), AutomationError> {
    Err(AutomationError::UnsupportedPlatform(format!(
        "cannot signal pid {pid} on this platform"
    )))
}

/// Splits a command line into arguments with POSIX shell quoting rules.
pub fn split_command_line(line: &str) -> Result<Vec<String>, AutomationError> {
    shlex::split(line).ok_or_else(|| {
        AutomationError::InvalidArgument(format!("unbalanced quoting in command line: {line}"))
    })
}

/// Directories searched for `.desktop` files, most specific first.
pub fn desktop_entry_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(data_home) = dirs::data_dir() {
        dirs.push(data_home.join("applications"));
    }
    let data_dirs = std::env::var("XDG_DATA_DIRS")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "/usr/local/share:/usr/share".to_string());
    dirs.extend(
        data_dirs
            .split(':')
            .filter(|d| !d.is_empty())
            .map(|d| Path::new(d).join("applications")),
    );
    dirs
}

/// Resolves a desktop entry id to the argv of its `Exec` line.
pub fn resolve_desktop_entry(id: &str, dirs: &[PathBuf]) -> Result<Vec<String>, AutomationError> {
    // Ids map `-` to subdirectories as a fallback (org-kde-foo.desktop → org/kde/foo.desktop).
    let candidates = [id.to_string(), id.replace('-', "/")];
    for dir in dirs {
        for candidate in &candidates {
            let path = dir.join(candidate);
            let Ok(contents) = std::fs::read_to_string(&path) else {
                continue;
            };
            debug!("using desktop entry {}", path.display());
            let exec = desktop_entry_exec(&contents).ok_or_else(|| {
                AutomationError::LaunchFailed(format!("{} has no Exec line", path.display()))
            })?;
            let argv = expand_field_codes(split_command_line(&exec)?);
            if argv.is_empty() {
                return Err(AutomationError::LaunchFailed(format!(
                    "{} has an empty Exec line",
                    path.display()
                )));
            }
            return Ok(argv);
        }
    }
    Err(AutomationError::LaunchFailed(format!(
        "desktop entry {id} not found"
    )))
}

/// The `Exec` value of the `[Desktop Entry]` group.
fn desktop_entry_exec(contents: &str) -> Option<String> {
    let mut in_main_group = false;
    for line in contents.lines().map(str::trim) {
        if line.starts_with('[') {
            in_main_group = line == "[Desktop Entry]";
            continue;
        }
        if !in_main_group {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "Exec" {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

/// Drops `%f`-style field codes; nothing is opened with the application.
fn expand_field_codes(argv: Vec<String>) -> Vec<String> {
    argv.into_iter()
        .filter(|arg| {
            !matches!(
                arg.as_str(),
                "%f" | "%F" | "%u" | "%U" | "%d" | "%D" | "%n" | "%N" | "%i" | "%c" | "%k" | "%v"
                    | "%m"
            )
        })
        .map(|arg| arg.replace("%%", "%"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_plain_and_quoted() {
        assert_eq!(
            split_command_line("qml  /tmp/my app.qml").unwrap(),
            vec!["qml", "/tmp/my", "app.qml"]
        );
        assert_eq!(
            split_command_line(r#"qml "/tmp/my app.qml" 'a b' c\ d"#).unwrap(),
            vec!["qml", "/tmp/my app.qml", "a b", "c d"]
        );
        assert_eq!(
            split_command_line(r#"echo "say \"hi\"" ''"#).unwrap(),
            vec!["echo", "say \"hi\"", ""]
        );
        assert!(split_command_line("echo 'oops").is_err());
    }

    #[test]
    fn test_split_rejects_dangling_escape_and_drops_comments() {
        assert!(split_command_line(r"kcalc --style\").is_err());
        assert_eq!(
            split_command_line("kcalc --style fusion # pinned style").unwrap(),
            vec!["kcalc", "--style", "fusion"]
        );
    }

    #[test]
    fn test_desktop_entry_exec_reads_main_group() {
        let contents = "\
[Desktop Action New]
Exec=kcalc --new

[Desktop Entry]
Name=KCalc
Exec=kcalc %U --style fusion
";
        assert_eq!(
            desktop_entry_exec(contents).as_deref(),
            Some("kcalc %U --style fusion")
        );
    }

    #[test]
    fn test_resolve_desktop_entry_from_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("org.kde.kcalc.desktop"),
            "[Desktop Entry]\nExec=kcalc %F --progress 50%%\n",
        )
        .unwrap();
        let dirs = vec![PathBuf::from("/nonexistent"), dir.path().to_path_buf()];

        assert_eq!(
            resolve_desktop_entry("org.kde.kcalc.desktop", &dirs).unwrap(),
            vec!["kcalc", "--progress", "50%"]
        );
        assert!(resolve_desktop_entry("missing.desktop", &dirs).is_err());
    }

    #[test]
    fn test_resolve_desktop_entry_with_bad_quoting() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("broken.desktop"),
            "[Desktop Entry]\nExec=kcalc \"--title=unclosed\n",
        )
        .unwrap();
        let dirs = vec![dir.path().to_path_buf()];
        assert!(matches!(
            resolve_desktop_entry("broken.desktop", &dirs),
            Err(AutomationError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_kill_missing_process_is_ok() {
        // pid_max on Linux is at most 2^22, so this pid cannot exist.
        assert!(kill_process(4_194_304 + 17).is_ok());
    }

    #[test]
    fn test_kill_rejects_non_positive_pids() {
        assert!(matches!(kill_process(0), Err(AutomationError::InvalidArgument(_))));
        assert!(matches!(kill_process(u32::MAX), Err(AutomationError::InvalidArgument(_))));
    }

    #[test]
    fn test_from_argv() {
        let request = LaunchRequest::from_argv(
            vec!["kcalc".into(), "--x".into()],
            vec![("A".into(), "1".into())],
        )
        .unwrap();
        assert_eq!(request.program, "kcalc");
        assert_eq!(request.args, vec!["--x"]);
        assert!(LaunchRequest::from_argv(Vec::new(), Vec::new()).is_err());
    }
}
