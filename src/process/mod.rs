//! External process execution
//! ==========================
//!
//! Two flavours: [`run`] executes a tool synchronously and captures its full
//! output (both pipes drained before waiting, so a chatty tool can never
//! deadlock on a full OS pipe buffer), while [`guard::ServerProcessGuard`]
//! owns a long-lived background process.
//!
//! A non-zero exit code is *not* an error at this layer; callers decide what
//! it means.

pub mod guard;

pub use guard::*;

use std::{ffi::OsStr, path::Path, process::Command};

use crate::error::{PgEmbedError, PgEmbedResult};

/// Captured result of one synchronous tool invocation.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Spawn `program` with `args`, block until it exits, and return the captured
/// exit code and output streams.
pub fn run<I, S>(program: &Path, args: I) -> PgEmbedResult<ProcessOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    crate::trace!("running {}", program.display());

    // Command::output() pipes and fully drains stdout/stderr before waiting.
    let output = Command::new(program).args(args).output().map_err(|e| {
        PgEmbedError::file_system("spawn process", program.to_path_buf(), e)
    })?;

    Ok(ProcessOutput {
        // Terminated-by-signal has no code; -1 keeps the "non-zero is
        // caller's problem" contract intact.
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
