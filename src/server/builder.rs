//! Server – Builder
//! =================
//!
//! Fluent construction of a [`PgServer`]. The finishing `build()` resolves
//! everything the lifecycle needs up front — host platform, a free port, the
//! instance identity, the workspace layout — and validates the rest, so a
//! successfully built server can only fail for runtime reasons (network,
//! filesystem, the engine itself).
//!
//! ```rust,ignore
//! let mut server = PgServer::builder()
//!     .version("17.2.0")
//!     .base_dir("/tmp/scratch")
//!     .server_params([("max_connections".to_string(), "20".to_string())])
//!     .build()?;
//! server.start()?;
//! println!("{}", server.connection_url());
//! server.stop();
//! ```

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use crate::{
    error::{PgEmbedError, PgEmbedResult},
    net,
    platform::{artifact_coordinates, Architecture, Platform},
    provision::{BinaryProvisioner, PgExtensionConfig, DEFAULT_REPO_BASE_URL},
    retry::{RetryPolicy, DOWNLOAD_DELAYS},
    server::lifecycle::{parse_repo_base_url, LifecycleState, PgServer},
    workspace::{Workspace, BINARIES_DIR_NAME},
};

pub const DEFAULT_USER: &str = "postgres";

/// Locale handed to cluster initialization on non-Windows hosts when none is
/// configured; Windows relies on the system default.
pub const DEFAULT_LOCALE: &str = "en_US.UTF-8";

pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_DELETE_RETRIES: u32 = 5;
const DEFAULT_DELETE_RETRY_INITIAL: Duration = Duration::from_millis(16);
const DEFAULT_DELETE_RETRY_FACTOR: u32 = 2;

#[bon::bon]
impl PgServer {
    /// Builder entry point; see the module docs for the full field list.
    ///
    /// `version` is the only required input. Everything else defaults the
    /// way a throwaway test instance wants it: a fresh UUID identity under
    /// `./pg_embed`, the first free port at or above 5500, user `postgres`,
    /// and a 30 second readiness window.
    #[builder]
    pub fn new(
        /// Full three-component engine version, e.g. `"17.2.0"`.
        #[builder(into)]
        version: String,
        /// Directory the `pg_embed` workspace is created under.
        #[builder(into)]
        base_dir: Option<PathBuf>,
        /// Instance identity; defaults to a fresh v4 UUID. Reusing an
        /// identity whose directory still exists re-attaches to that
        /// provisioned instance.
        #[builder(into)]
        instance_id: Option<String>,
        /// Superuser name for the cluster.
        #[builder(into)]
        user: Option<String>,
        /// Locale passed to cluster initialization.
        #[builder(into)]
        locale: Option<String>,
        /// Listen port; auto-allocated when unset.
        port: Option<u16>,
        /// Lower bound of the automatic port scan.
        #[builder(default = net::DEFAULT_PORT_SCAN_START)]
        port_scan_start: u16,
        /// Target platform override; detected from the host when unset.
        platform: Option<Platform>,
        /// Target architecture override; detected from the host when unset.
        architecture: Option<Architecture>,
        /// Additional server parameters, rendered as `-c key=value`.
        #[builder(into)]
        server_params: Option<BTreeMap<String, String>>,
        /// Extensions to provision and activate, in order.
        #[builder(default)]
        extensions: Vec<PgExtensionConfig>,
        /// Windows only: grant the local user full access to the instance
        /// directory before cluster initialization.
        #[builder(default = false)]
        grant_local_user_access: bool,
        /// Remove the instance directory when the server stops.
        #[builder(default = false)]
        clear_instance_dir_on_stop: bool,
        /// Wipe the whole workspace (shared cache included) before starting.
        #[builder(default = false)]
        clear_workspace_on_start: bool,
        /// Retry count for directory deletion.
        #[builder(default = DEFAULT_DELETE_RETRIES)]
        delete_retries: u32,
        /// First deletion retry delay; doubles per attempt by default.
        #[builder(default = DEFAULT_DELETE_RETRY_INITIAL)]
        delete_retry_initial: Duration,
        #[builder(default = DEFAULT_DELETE_RETRY_FACTOR)] delete_retry_factor: u32,
        /// How long the readiness probe waits before giving up.
        #[builder(default = DEFAULT_STARTUP_TIMEOUT)]
        startup_timeout: Duration,
        /// Delay schedule for download retries; defaults to 1 s, 2 s, 4 s.
        download_retry: Option<RetryPolicy>,
        /// Maven-layout repository serving the engine binaries.
        #[builder(into)]
        repo_base_url: Option<String>,
    ) -> PgEmbedResult<Self> {
        if version.trim().is_empty() {
            return Err(PgEmbedError::InvalidConfig {
                field: "version",
                reason: "cannot be empty".into(),
            });
        }

        let user = user.unwrap_or_else(|| DEFAULT_USER.to_string());
        if user.trim().is_empty() {
            return Err(PgEmbedError::InvalidConfig {
                field: "user",
                reason: "cannot be empty".into(),
            });
        }

        let platform = match platform {
            Some(platform) => platform,
            None => Platform::detect()?,
        };
        let architecture = match architecture {
            Some(architecture) => architecture,
            None => Architecture::detect()?,
        };
        // Unpublished combinations fail here, not at download time.
        artifact_coordinates(platform, architecture)?;

        let repo_base_url =
            parse_repo_base_url(repo_base_url.as_deref().unwrap_or(DEFAULT_REPO_BASE_URL))?;

        let instance_id = match instance_id {
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };
        if instance_id.trim().is_empty() || instance_id == BINARIES_DIR_NAME {
            return Err(PgEmbedError::InvalidConfig {
                field: "instance_id",
                reason: format!("'{instance_id}' cannot name an instance directory"),
            });
        }

        let port = match port {
            Some(port) => port,
            None => net::allocate(port_scan_start)?,
        };

        let locale = match locale {
            Some(locale) => Some(locale),
            None if platform != Platform::Windows => Some(DEFAULT_LOCALE.to_string()),
            None => None,
        };

        let delete_retry =
            RetryPolicy::exponential(delete_retries, delete_retry_initial, delete_retry_factor);
        let workspace = Workspace::new(
            &base_dir.unwrap_or_else(|| PathBuf::from(".")),
            &instance_id,
            delete_retry,
        );
        let provisioner = BinaryProvisioner::new(
            version.clone(),
            platform,
            architecture,
            repo_base_url,
            workspace.binaries_dir(),
        );

        Ok(PgServer {
            version,
            instance_id,
            user,
            port,
            locale,
            platform,
            server_params: server_params.unwrap_or_default(),
            extensions,
            grant_local_user_access,
            clear_instance_dir_on_stop,
            clear_workspace_on_start,
            startup_timeout,
            download_retry: download_retry
                .unwrap_or_else(|| RetryPolicy::fixed(DOWNLOAD_DELAYS)),
            workspace,
            provisioner,
            state: LifecycleState::Unstarted,
            guard: None,
        })
    }
}
