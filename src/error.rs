// top-level error for the public API

#[derive(serde::Serialize, Debug, thiserror::Error)]
pub enum PgEmbedError {
    #[error("unsupported environment: {os}/{arch}")]
    UnsupportedPlatform {
        /// `std::env::consts::OS`
        os: &'static str,
        /// `std::env::consts::ARCH`
        arch: &'static str,
    },

    #[error("invalid {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// A download or extraction step failed after exhausting its retries.
    #[error("failed to {operation}")]
    Provisioning {
        operation: &'static str,
        #[source]
        #[serde(serialize_with = "error_to_string")]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("{operation} failed for '{path}'")]
    FileSystem {
        operation: &'static str,
        path: std::path::PathBuf,
        #[source]
        #[serde(serialize_with = "error_to_string")]
        source: std::io::Error,
    },

    #[error("initdb exited with code {exit_code}: {stdout} {stderr}")]
    InitDb {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("extension install '{sql}' exited with code {exit_code}: {output}")]
    ExtensionInstall {
        sql: String,
        exit_code: i32,
        output: String,
    },

    #[error("gave up waiting for server to start after {waited:?}")]
    StartTimeout { waited: std::time::Duration },

    #[error("server start failed: {0}")]
    ServerStart(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type PgEmbedResult<T> = std::result::Result<T, PgEmbedError>;

impl PgEmbedError {
    pub fn file_system(
        operation: &'static str,
        path: impl Into<std::path::PathBuf>,
        err: impl Into<std::io::Error>,
    ) -> Self {
        Self::FileSystem {
            operation,
            path: path.into(),
            source: err.into(),
        }
    }
}

pub(crate) fn error_to_string<S>(e: &impl std::fmt::Display, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_str(&e.to_string())
}
