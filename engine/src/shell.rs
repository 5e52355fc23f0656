//! OS "open" and "reveal in file browser" dispatch.
//!
//! The engine never opens files itself; it hands paths to a `ShellOpener`.
//! `SystemShell` spawns the platform opener and does not wait for it.

use crate::error::{KeeperError, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

pub trait ShellOpener: Send + Sync {
    /// Open `path` with the default application, or with `app` when given.
    fn open(&self, path: &Path, app: Option<&Path>) -> Result<()>;

    /// Show `path` in the platform file browser.
    fn reveal(&self, path: &Path) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShell;

/// Start `command` detached. Returns the thread that waits on it, if one
/// could be started.
fn spawn(mut command: Command) -> Result<Option<JoinHandle<()>>> {
    debug!(?command, "spawning shell command");
    let program = command.get_program().to_owned();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| KeeperError::io(Path::new(&program), e))?;

    // Reap the opener in the background so it does not linger as a zombie.
    let reaper = thread::Builder::new()
        .name("keeper-shell-reaper".to_string())
        .spawn(move || match child.wait() {
            Ok(status) => debug!(%status, "shell command exited"),
            Err(e) => warn!(error = %e, "cannot wait for shell command"),
        });
    match reaper {
        Ok(handle) => Ok(Some(handle)),
        Err(e) => {
            warn!(error = %e, "cannot start shell reaper thread");
            Ok(None)
        }
    }
}

impl ShellOpener for SystemShell {
    fn open(&self, path: &Path, app: Option<&Path>) -> Result<()> {
        let command = match app {
            #[cfg(target_os = "macos")]
            Some(app) => {
                let mut c = Command::new("open");
                c.arg("-a").arg(app).arg(path);
                c
            }
            #[cfg(not(target_os = "macos"))]
            Some(app) => {
                let mut c = Command::new(app);
                c.arg(path);
                c
            }
            None => default_opener(path),
        };
        spawn(command).map(|_| ())
    }

    fn reveal(&self, path: &Path) -> Result<()> {
        spawn(reveal_command(path)).map(|_| ())
    }
}

#[cfg(target_os = "macos")]
fn default_opener(path: &Path) -> Command {
    let mut c = Command::new("open");
    c.arg(path);
    c
}

#[cfg(target_os = "windows")]
fn default_opener(path: &Path) -> Command {
    let mut c = Command::new("cmd");
    c.args(["/C", "start", ""]).arg(path);
    c
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn default_opener(path: &Path) -> Command {
    let mut c = Command::new("xdg-open");
    c.arg(path);
    c
}

#[cfg(target_os = "macos")]
fn reveal_command(path: &Path) -> Command {
    let mut c = Command::new("open");
    c.arg("-R").arg(path);
    c
}

#[cfg(target_os = "windows")]
fn reveal_command(path: &Path) -> Command {
    let mut c = Command::new("explorer");
    c.arg(format!("/select,{}", path.display()));
    c
}

// Linux file managers have no common "select" flag; open the parent.
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn reveal_command(path: &Path) -> Command {
    let mut c = Command::new("xdg-open");
    c.arg(path.parent().unwrap_or(path));
    c
}
