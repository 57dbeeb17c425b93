use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

#[cfg(unix)]
use std::os::unix::process::CommandExt as _;
#[cfg(windows)]
use std::os::windows::process::CommandExt;

use tracing::debug;

use crate::helpers::runner::CommandSpec;

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
#[cfg(windows)]
use crate::helpers::runner::CREATE_NO_WINDOW;

/// The OS view of background processes the service manager launches.
pub trait ProcessTable {
    /// Launches `spec` detached from this process, stdout and stderr
    /// appended to a freshly truncated `log`. Returns the child's PID.
    fn spawn_detached(&self, spec: &CommandSpec, log: &Path) -> io::Result<u32>;

    fn is_running(&self, pid: u32) -> bool;

    /// Kills `pid` together with everything it started.
    fn kill_tree(&self, pid: u32) -> io::Result<()>;
}

/// Real process table backed by `tasklist`/`taskkill` on Windows and `kill`
/// elsewhere.
#[derive(Default)]
pub struct SystemProcessTable {
    // Children launched by this invocation; reaped so an early exit is not
    // mistaken for a live zombie.
    children: Mutex<HashMap<u32, Child>>,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn own_child_exited(&self, pid: u32) -> Option<bool> {
        let mut children = self.children.lock().ok()?;
        let child = children.get_mut(&pid)?;
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid, %status, "child exited");
                children.remove(&pid);
                Some(true)
            }
            Ok(None) => Some(false),
            Err(_) => None,
        }
    }
}

fn quiet(program: &str) -> Command {
    let mut command = Command::new(program);
    command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::null());
    #[cfg(windows)]
    command.creation_flags(CREATE_NO_WINDOW);
    command
}

impl ProcessTable for SystemProcessTable {
    fn spawn_detached(&self, spec: &CommandSpec, log: &Path) -> io::Result<u32> {
        if let Some(parent) = log.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let out = File::create(log)?;
        let err = out.try_clone()?;

        let mut command = spec.to_std_command();
        command.stdin(Stdio::null()).stdout(out).stderr(err);
        #[cfg(windows)]
        command.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn()?;
        let pid = child.id();
        debug!(pid, "detached {}", spec.display());
        if let Ok(mut children) = self.children.lock() {
            children.insert(pid, child);
        }
        Ok(pid)
    }

    #[cfg(windows)]
    fn is_running(&self, pid: u32) -> bool {
        if let Some(exited) = self.own_child_exited(pid) {
            return !exited;
        }
        quiet("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH", "/FO", "CSV"])
            .output()
            .map(|output| String::from_utf8_lossy(&output.stdout).contains(&format!("\"{}\"", pid)))
            .unwrap_or(false)
    }

    #[cfg(not(windows))]
    fn is_running(&self, pid: u32) -> bool {
        if let Some(exited) = self.own_child_exited(pid) {
            return !exited;
        }
        quiet("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    fn kill_tree(&self, pid: u32) -> io::Result<()> {
        let status = quiet("taskkill")
            .args(["/F", "/PID", &pid.to_string(), "/T"])
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("taskkill exited with {}", status)))
        }
    }

    #[cfg(not(windows))]
    fn kill_tree(&self, pid: u32) -> io::Result<()> {
        // Services are their own process group leaders.
        let group = quiet("kill")
            .args(["-9", "--", &format!("-{}", pid)])
            .status()?;
        let status = if group.success() {
            group
        } else {
            quiet("kill").args(["-9", &pid.to_string()]).status()?
        };
        if let Ok(mut children) = self.children.lock() {
            if let Some(mut child) = children.remove(&pid) {
                let _ = child.wait();
            }
        }
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("kill exited with {}", status)))
        }
    }
}
