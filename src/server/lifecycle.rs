//! Server – Lifecycle
//! ==================
//!
//! [`PgServer`] orchestrates the **provision → initialize → start → ready →
//! stop** lifecycle of one disposable database instance. Construction happens
//! through the fluent builder in [`super::builder`]; a built server has a
//! resolved port, identity, and workspace but has touched neither the network
//! nor the filesystem.
//!
//! The blocking and suspendable entry points run the identical pipeline in
//! the identical order; the downloads are the only suspension points of the
//! async form. `stop` is idempotent, legal in every state, and never returns
//! an error: teardown failures are traced and swallowed so cleanup in test
//! harnesses cannot mask the failure under investigation.

use std::{collections::BTreeMap, path::PathBuf};

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    error::{PgEmbedError, PgEmbedResult},
    net,
    platform::Platform,
    process::{self, ServerProcessGuard},
    provision::{BinaryProvisioner, ExtensionProvisioner, PgExtensionConfig},
    retry::RetryPolicy,
    workspace::Workspace,
};

/// Name of the maintenance database every instance ships with; connections
/// and extension installs target it.
pub const DATABASE_NAME: &str = "postgres";

/// Where one instance sits in its lifecycle. Transitions only move forward;
/// a failed start parks the instance in [`Failed`](Self::Failed), from which
/// only `stop` is useful.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Unstarted,
    Provisioning,
    Starting,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Provisioning => "provisioning",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One embedded database server instance.
///
/// Dropping a server stops it (and, when configured, removes its instance
/// directory), so a scoped instance cleans up after itself even when the
/// owning test panics.
#[derive(Debug)]
pub struct PgServer {
    pub(crate) version: String,
    pub(crate) instance_id: String,
    pub(crate) user: String,
    pub(crate) port: u16,
    pub(crate) locale: Option<String>,
    pub(crate) platform: Platform,
    pub(crate) server_params: BTreeMap<String, String>,
    pub(crate) extensions: Vec<PgExtensionConfig>,
    pub(crate) grant_local_user_access: bool,
    pub(crate) clear_instance_dir_on_stop: bool,
    pub(crate) clear_workspace_on_start: bool,
    pub(crate) startup_timeout: std::time::Duration,
    pub(crate) download_retry: RetryPolicy,
    pub(crate) workspace: Workspace,
    pub(crate) provisioner: BinaryProvisioner,
    pub(crate) state: LifecycleState,
    pub(crate) guard: Option<ServerProcessGuard>,
}

impl PgServer {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn host(&self) -> &'static str {
        net::PG_HOST
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn database_name(&self) -> &'static str {
        DATABASE_NAME
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn data_dir(&self) -> &std::path::Path {
        self.workspace.data_dir()
    }

    pub fn bin_dir(&self) -> &std::path::Path {
        self.workspace.bin_dir()
    }

    /// A `postgresql://` connection URL for the running instance.
    pub fn connection_url(&self) -> String {
        format!(
            "postgresql://{}@{}:{}/{}",
            self.user,
            self.host(),
            self.port,
            DATABASE_NAME
        )
    }

    /// Run the full start pipeline and block until the server accepts TCP
    /// connections.
    ///
    /// A pre-provisioned instance directory short-circuits provisioning,
    /// database initialization, and extension installation; the instance is
    /// simply started again. Legal only from the unstarted state.
    pub fn start(&mut self) -> PgEmbedResult<()> {
        self.check_unstarted("start")?;
        match self.start_pipeline() {
            Ok(()) => {
                self.state = LifecycleState::Ready;
                crate::info!(
                    "instance {} ready on port {}",
                    self.instance_id,
                    self.port
                );
                Ok(())
            }
            Err(e) => {
                self.state = LifecycleState::Failed;
                Err(e)
            }
        }
    }

    /// Suspendable form of [`start`](Self::start). Same pipeline, same
    /// ordering; only the downloads suspend, and cancelling `cancel` aborts
    /// them with [`PgEmbedError::Cancelled`].
    pub async fn start_async(&mut self, cancel: &CancellationToken) -> PgEmbedResult<()> {
        self.check_unstarted("start")?;
        match self.start_pipeline_async(cancel).await {
            Ok(()) => {
                self.state = LifecycleState::Ready;
                crate::info!(
                    "instance {} ready on port {}",
                    self.instance_id,
                    self.port
                );
                Ok(())
            }
            Err(e) => {
                self.state = LifecycleState::Failed;
                Err(e)
            }
        }
    }

    /// Stop the server and clean up. Idempotent, legal from every state,
    /// and infallible: each teardown step is best-effort and failures are
    /// traced, not returned.
    pub fn stop(&mut self) {
        if matches!(self.state, LifecycleState::Stopped) {
            return;
        }
        self.state = LifecycleState::Stopping;

        let pg_ctl = self
            .workspace
            .bin_dir()
            .join(self.platform.executable("pg_ctl"));
        if pg_ctl.is_file() {
            let data_dir = self.workspace.data_dir().to_path_buf();
            match process::run(
                &pg_ctl,
                [
                    "-D".as_ref(),
                    data_dir.as_os_str(),
                    "-U".as_ref(),
                    self.user.as_ref(),
                    "-m".as_ref(),
                    "fast".as_ref(),
                    "-t".as_ref(),
                    "5".as_ref(),
                    "stop".as_ref(),
                ],
            ) {
                Ok(out) if !out.success() => {
                    crate::trace!(
                        "pg_ctl stop exited with {}: {} {}",
                        out.exit_code,
                        out.stdout.trim(),
                        out.stderr.trim()
                    );
                }
                Ok(_) => {}
                Err(e) => crate::trace!("pg_ctl stop could not run: {e}"),
            }
        }

        if let Some(mut guard) = self.guard.take() {
            if let Err(e) = guard.force_kill() {
                crate::warn!("failed to kill server process while stopping: {e}");
            }
        }

        if self.clear_instance_dir_on_stop {
            if let Err(e) = self.workspace.remove_instance() {
                crate::warn!("failed to remove instance directory while stopping: {e}");
            }
        }

        self.state = LifecycleState::Stopped;
        crate::info!("instance {} stopped", self.instance_id);
    }

    /// Suspendable form of [`stop`](Self::stop). Teardown has no suspension
    /// points, so this simply delegates.
    pub async fn stop_async(&mut self) {
        self.stop();
    }

    fn check_unstarted(&self, operation: &'static str) -> PgEmbedResult<()> {
        if matches!(self.state, LifecycleState::Unstarted) {
            Ok(())
        } else {
            Err(PgEmbedError::InvalidState {
                operation,
                state: self.state.as_str(),
            })
        }
    }

    fn start_pipeline(&mut self) -> PgEmbedResult<()> {
        let fresh = self.begin_provisioning()?;

        if fresh {
            let txz = self.provisioner.ensure_blocking(&self.download_retry)?;
            let mut archives = Vec::with_capacity(self.extensions.len());
            for provisioner in self.extension_provisioners() {
                let archive = provisioner.ensure_blocking(&self.download_retry)?;
                archives.push((provisioner, archive));
            }
            self.install_binaries(&txz, &archives)?;
        }

        self.state = LifecycleState::Starting;
        self.start_server()?;
        if fresh {
            self.install_extensions()?;
        }
        Ok(())
    }

    async fn start_pipeline_async(&mut self, cancel: &CancellationToken) -> PgEmbedResult<()> {
        let fresh = self.begin_provisioning()?;

        if fresh {
            let txz = self.provisioner.ensure(&self.download_retry, cancel).await?;
            let mut archives = Vec::with_capacity(self.extensions.len());
            for provisioner in self.extension_provisioners() {
                let archive = provisioner.ensure(&self.download_retry, cancel).await?;
                archives.push((provisioner, archive));
            }
            self.install_binaries(&txz, &archives)?;
        }

        self.state = LifecycleState::Starting;
        self.start_server()?;
        if fresh {
            self.install_extensions()?;
        }
        Ok(())
    }

    /// Shared head of both pipelines: optional workspace wipe, the
    /// fresh-vs-provisioned decision, and directory creation. Returns whether
    /// this is a fresh instance.
    fn begin_provisioning(&mut self) -> PgEmbedResult<bool> {
        self.state = LifecycleState::Provisioning;

        if self.clear_workspace_on_start {
            self.workspace.remove_root()?;
        }

        // Checked before ensure() creates it: an existing instance directory
        // is the sole "already provisioned" signal.
        let fresh = !self.workspace.instance_dir().exists();
        self.workspace.ensure()?;

        if fresh {
            crate::info!(
                "provisioning fresh instance {} (version {})",
                self.instance_id,
                self.version
            );
        } else {
            crate::info!(
                "instance {} is already provisioned; skipping setup",
                self.instance_id
            );
        }
        Ok(fresh)
    }

    fn extension_provisioners(&self) -> Vec<ExtensionProvisioner> {
        self.extensions
            .iter()
            .map(|config| {
                ExtensionProvisioner::new(
                    config.clone(),
                    self.workspace.binaries_dir(),
                    self.workspace.instance_dir(),
                )
            })
            .collect()
    }

    /// Fresh-path installation: unpack the engine, merge extensions over it,
    /// fix up permissions, and initialize the cluster.
    fn install_binaries(
        &self,
        txz: &std::path::Path,
        extensions: &[(ExtensionProvisioner, PathBuf)],
    ) -> PgEmbedResult<()> {
        self.provisioner
            .extract_into(txz, self.workspace.instance_dir())?;
        for (provisioner, archive) in extensions {
            provisioner.extract(archive)?;
        }

        #[cfg(windows)]
        if self.grant_local_user_access {
            self.grant_access()?;
        }
        #[cfg(not(windows))]
        {
            let _ = self.grant_local_user_access;
            self.mark_executables()?;
        }

        self.init_db()
    }

    /// `icacls <instance> /t /grant:r <user>:(OI)(CI)F` so the local user
    /// can execute binaries extracted under another account's profile.
    #[cfg(windows)]
    fn grant_access(&self) -> PgEmbedResult<()> {
        let username = std::env::var("USERNAME").map_err(|_| PgEmbedError::InvalidConfig {
            field: "grant_local_user_access",
            reason: "USERNAME environment variable is not set".into(),
        })?;

        let instance_dir = self.workspace.instance_dir().to_path_buf();
        let out = process::run(
            std::path::Path::new("icacls.exe"),
            [
                instance_dir.as_os_str(),
                "/t".as_ref(),
                "/grant:r".as_ref(),
                format!("{username}:(OI)(CI)F").as_ref(),
            ],
        )?;
        if !out.success() {
            return Err(PgEmbedError::ServerStart(format!(
                "icacls exited with {}: {} {}",
                out.exit_code, out.stdout, out.stderr
            )));
        }
        Ok(())
    }

    /// Archives occasionally lose execute bits in transit; put them back on
    /// the three tools the lifecycle invokes.
    #[cfg(not(windows))]
    fn mark_executables(&self) -> PgEmbedResult<()> {
        use std::os::unix::fs::PermissionsExt;

        for tool in ["initdb", "pg_ctl", "postgres"] {
            let path = self.workspace.bin_dir().join(tool);
            if !path.is_file() {
                continue;
            }
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .map_err(|e| PgEmbedError::file_system("mark executable", path.clone(), e))?;
        }
        Ok(())
    }

    fn init_db(&self) -> PgEmbedResult<()> {
        let initdb = self
            .workspace
            .bin_dir()
            .join(self.platform.executable("initdb"));
        let data_dir = self.workspace.data_dir().to_path_buf();

        let mut args: Vec<std::ffi::OsString> = vec![
            "-D".into(),
            data_dir.into_os_string(),
            "-U".into(),
            self.user.clone().into(),
            "-E".into(),
            "UTF-8".into(),
        ];
        if let Some(locale) = &self.locale {
            args.push("--locale".into());
            args.push(locale.clone().into());
        }

        crate::info!("initializing cluster for instance {}", self.instance_id);
        let out = process::run(&initdb, args)?;
        if !out.success() {
            return Err(PgEmbedError::InitDb {
                exit_code: out.exit_code,
                stdout: out.stdout,
                stderr: out.stderr,
            });
        }
        Ok(())
    }

    /// Spawn `pg_ctl start` under a [`ServerProcessGuard`] and block on the
    /// readiness probe.
    fn start_server(&mut self) -> PgEmbedResult<()> {
        let pg_ctl = self
            .workspace
            .bin_dir()
            .join(self.platform.executable("pg_ctl"));
        let data_dir = self.workspace.data_dir().to_path_buf();

        let mut opts = format!("-F -p {}", self.port);
        for (key, value) in &self.server_params {
            opts.push_str(&format!(" -c {key}={value}"));
        }

        let mut guard = ServerProcessGuard::spawn(
            &pg_ctl,
            [
                "-D".as_ref(),
                data_dir.as_os_str(),
                "-U".as_ref(),
                self.user.as_ref(),
                "-o".as_ref(),
                opts.as_ref(),
                "start".as_ref(),
            ],
        )?;

        // The launcher normally exits quickly once the server is handed off
        // to the background; only a non-zero exit means the start is lost,
        // and that should surface now rather than after the full readiness
        // window.
        let mut launcher_reaped = false;
        let ready = net::wait_until_ready_with(self.host(), self.port, self.startup_timeout, || {
            if launcher_reaped || guard.is_alive() {
                return Ok(());
            }
            launcher_reaped = true;
            let code = guard.wait()?;
            if code != 0 {
                return Err(PgEmbedError::ServerStart(format!(
                    "launcher exited with status {code} before the server became ready"
                )));
            }
            Ok(())
        });
        self.guard = Some(guard);
        ready
    }

    /// Fresh-path activation: run each extension's statements, one `psql`
    /// batch per descriptor, in declaration order.
    fn install_extensions(&self) -> PgEmbedResult<()> {
        if self.extensions.is_empty() {
            return Ok(());
        }
        let psql = self
            .workspace
            .bin_dir()
            .join(self.platform.executable("psql"));
        let port = self.port.to_string();

        for extension in &self.extensions {
            let sql = extension.statements().join(";");
            crate::info!("installing extension: {sql}");
            let out = process::run(
                &psql,
                [
                    "-h",
                    self.host(),
                    "-p",
                    port.as_str(),
                    "-U",
                    self.user.as_str(),
                    "-d",
                    DATABASE_NAME,
                    "-c",
                    sql.as_str(),
                ],
            )?;
            if !out.success() {
                return Err(PgEmbedError::ExtensionInstall {
                    sql,
                    exit_code: out.exit_code,
                    output: format!("{} {}", out.stdout.trim(), out.stderr.trim()),
                });
            }
        }
        Ok(())
    }

    /// On-disk layout of this instance, for callers that manage extra files
    /// under the workspace.
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }
}

impl Drop for PgServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Parse and sanity-check the artifact repository base URL.
pub(crate) fn parse_repo_base_url(raw: &str) -> PgEmbedResult<Url> {
    let url = Url::parse(raw).map_err(|e| PgEmbedError::InvalidConfig {
        field: "repo_base_url",
        reason: format!("'{raw}' is not a valid URL: {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PgEmbedError::InvalidConfig {
            field: "repo_base_url",
            reason: format!("'{raw}' must use http or https"),
        });
    }
    Ok(url)
}
