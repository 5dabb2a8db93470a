//! Server Process – Guard
//! ======================
//!
//! Owned handle to the background process that launches the database server.
//! The guard tracks the child for the lifetime of one server instance and is
//! the only sanctioned way to force-terminate it.
//!
//! Dropping a guard whose child may still be running logs a warning in debug
//! builds (a leak a test suite should notice) and then kills the child as a
//! last resort; correctness never depends on `Drop` running — the public
//! stop path force-kills explicitly.

use std::{
    ffi::OsStr,
    path::Path,
    process::{Child, Command, Stdio},
    time::Duration,
};

use wait_timeout::ChildExt;

use crate::error::{PgEmbedError, PgEmbedResult};

const FORCE_KILL_TIMEOUT: Duration = Duration::from_secs(1);

/// RAII handle owning one spawned background process.
#[derive(Debug)]
pub struct ServerProcessGuard {
    /// `None` once the child has been reaped.
    child: Option<Child>,
}

impl ServerProcessGuard {
    /// Spawn `program args...` with both output streams discarded (the
    /// launcher's diagnostics surface through the tools run by
    /// [`crate::process::run`], not through this long-lived handle).
    pub fn spawn<I, S>(program: &Path, args: I) -> PgEmbedResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        crate::info!("spawning server process: {}", program.display());
        let child = Command::new(program)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PgEmbedError::file_system("spawn process", program.to_path_buf(), e))?;
        Ok(Self { child: Some(child) })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Whether the tracked child is still running. A reaped or
    /// unqueryable child counts as dead.
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Block until the child exits and return its exit code.
    pub fn wait(&mut self) -> PgEmbedResult<i32> {
        let Some(child) = self.child.as_mut() else {
            return Err(PgEmbedError::ServerStart(
                "no tracked process to wait for".into(),
            ));
        };
        let status = child.wait().map_err(|e| {
            PgEmbedError::ServerStart(format!("failed to wait for server process: {e}"))
        })?;
        self.child = None;
        Ok(status.code().unwrap_or(-1))
    }

    /// Kill the tracked child if it is still alive, then reap it. Idempotent;
    /// a child that already exited is not an error.
    pub fn force_kill(&mut self) -> PgEmbedResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                crate::trace!("server process already exited with {status}");
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => {
                return Err(PgEmbedError::ServerStart(format!(
                    "failed to query server process state: {e}"
                )));
            }
        }

        child
            .kill()
            .map_err(|e| PgEmbedError::ServerStart(format!("failed to kill server process: {e}")))?;

        match child.wait_timeout(FORCE_KILL_TIMEOUT).map_err(|e| {
            PgEmbedError::ServerStart(format!("failed to reap server process: {e}"))
        })? {
            Some(status) => {
                crate::info!("server process force-killed; exit status {status}");
                Ok(())
            }
            None => Err(PgEmbedError::ServerStart(format!(
                "server process survived force-kill for {FORCE_KILL_TIMEOUT:?}"
            ))),
        }
    }
}

impl Drop for ServerProcessGuard {
    fn drop(&mut self) {
        if self.child.is_some() {
            if cfg!(debug_assertions) {
                crate::warn!(
                    "ServerProcessGuard dropped while its process may still be running; \
                     call stop() explicitly"
                );
            }
            if let Err(e) = self.force_kill() {
                // Never panic inside Drop; just record the problem.
                crate::error!("failed to kill server process during drop: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn long_cmd() -> (std::path::PathBuf, Vec<&'static str>) {
        (std::path::PathBuf::from("/bin/sleep"), vec!["30"])
    }

    #[cfg(unix)]
    #[test]
    fn spawn_kill_reap() {
        let (prog, args) = long_cmd();
        let mut guard = ServerProcessGuard::spawn(&prog, args).unwrap();
        assert!(guard.is_alive());
        assert!(guard.pid().is_some());

        guard.force_kill().unwrap();
        assert!(!guard.is_alive());
        // idempotent after the child is gone
        guard.force_kill().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn exited_child_is_not_alive() {
        let mut guard =
            ServerProcessGuard::spawn(std::path::Path::new("/bin/sh"), ["-c", "true"]).unwrap();
        let code = guard.wait().unwrap();
        assert_eq!(code, 0);
        assert!(!guard.is_alive());
        guard.force_kill().unwrap();
    }

    #[test]
    fn spawn_missing_binary_errors() {
        assert!(ServerProcessGuard::spawn(
            std::path::Path::new("definitely-does-not-exist-xyz"),
            ["start"]
        )
        .is_err());
    }

    #[cfg(unix)]
    #[test]
    fn drop_kills_a_live_child() {
        let (prog, args) = long_cmd();
        let pid = {
            let guard = ServerProcessGuard::spawn(&prog, args).unwrap();
            guard.pid().unwrap()
        };
        std::thread::sleep(Duration::from_millis(200));
        let alive = pid_alive(pid);
        assert!(!alive, "child {pid} survived guard drop");
    }

    #[cfg(unix)]
    fn pid_alive(pid: u32) -> bool {
        // A zombie still answers kill(0); rule that out by also checking
        // /proc state where available.
        let exists = std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if !exists {
            return false;
        }
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .map(|stat| !stat.contains(") Z "))
            .unwrap_or(false)
    }
}
