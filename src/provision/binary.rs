//! Engine binaries provisioner
//! ===========================
//!
//! Resolves the Maven coordinates of the embedded-binaries artifact for a
//! version/platform/architecture triple, downloads the jar, plucks the inner
//! `.txz` payload into the shared cache, and unpacks it into an instance
//! directory. The cache is keyed by the full triple, so instances of
//! different versions coexist and a second instance of the same version
//! never touches the network.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    error::{PgEmbedError, PgEmbedResult},
    platform::{artifact_coordinates, Architecture, Platform},
    provision::{archive, fetch, CacheLookup},
    retry::RetryPolicy,
};

/// Maven repository serving the published binaries.
pub const DEFAULT_REPO_BASE_URL: &str = "https://repo1.maven.org/maven2";

const GROUP_PATH: &str = "io/zonky/test/postgres";

#[derive(Debug, Clone)]
pub struct BinaryProvisioner {
    version: String,
    platform: Platform,
    architecture: Architecture,
    repo_base_url: Url,
    binaries_dir: PathBuf,
}

impl BinaryProvisioner {
    pub fn new(
        version: impl Into<String>,
        platform: Platform,
        architecture: Architecture,
        repo_base_url: Url,
        binaries_dir: &Path,
    ) -> Self {
        Self {
            version: version.into(),
            platform,
            architecture,
            repo_base_url,
            binaries_dir: binaries_dir.to_path_buf(),
        }
    }

    /// `embedded-postgres-binaries-{platform}-{architecture}`, the artifact id
    /// published for this triple.
    fn artifact_id(&self) -> PgEmbedResult<String> {
        let (platform, architecture) = artifact_coordinates(self.platform, self.architecture)?;
        Ok(format!(
            "embedded-postgres-binaries-{platform}-{architecture}"
        ))
    }

    /// Full URL of the jar under the Maven repository layout.
    pub fn download_url(&self) -> PgEmbedResult<Url> {
        let artifact_id = self.artifact_id()?;
        let version = &self.version;
        let url = format!(
            "{base}/{GROUP_PATH}/{artifact_id}/{version}/{artifact_id}-{version}.jar",
            base = self.repo_base_url.as_str().trim_end_matches('/'),
        );
        Url::parse(&url).map_err(|e| PgEmbedError::InvalidConfig {
            field: "repo_base_url",
            reason: format!("cannot build artifact URL from it: {e}"),
        })
    }

    /// Where the plucked payload lives in the shared cache.
    pub fn cached_txz_path(&self) -> PgEmbedResult<PathBuf> {
        Ok(self
            .binaries_dir
            .join(format!("{}-{}.txz", self.artifact_id()?, self.version)))
    }

    pub fn lookup_cache(&self) -> PgEmbedResult<CacheLookup> {
        Ok(if self.cached_txz_path()?.is_file() {
            CacheLookup::CachedLocally
        } else {
            CacheLookup::NotCached
        })
    }

    /// Make sure the payload is in the cache, downloading it if needed, and
    /// return its path.
    pub fn ensure_blocking(&self, retry: &RetryPolicy) -> PgEmbedResult<PathBuf> {
        let txz = self.cached_txz_path()?;
        if let CacheLookup::CachedLocally = self.lookup_cache()? {
            crate::trace!("using cached binaries at {}", txz.display());
            return Ok(txz);
        }

        let url = self.download_url()?;
        let jar = txz.with_extension("jar");
        retry.execute("download server binaries", || {
            fetch::fetch_blocking(url.as_str(), &jar)
        })?;

        self.finish_download(&jar, &txz)?;
        Ok(txz)
    }

    /// Suspendable form of [`ensure_blocking`](Self::ensure_blocking);
    /// cancelling aborts the transfer without consuming a retry.
    pub async fn ensure(
        &self,
        retry: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> PgEmbedResult<PathBuf> {
        let txz = self.cached_txz_path()?;
        if let CacheLookup::CachedLocally = self.lookup_cache()? {
            crate::trace!("using cached binaries at {}", txz.display());
            return Ok(txz);
        }

        let url = self.download_url()?;
        let jar = txz.with_extension("jar");
        retry
            .execute_async("download server binaries", || {
                fetch::fetch(url.as_str(), &jar, cancel)
            })
            .await?;

        self.finish_download(&jar, &txz)?;
        Ok(txz)
    }

    fn finish_download(&self, jar: &Path, txz: &Path) -> PgEmbedResult<()> {
        archive::pluck_txz_from_jar(jar, txz)?;
        std::fs::remove_file(jar)
            .map_err(|e| PgEmbedError::file_system("remove file", jar.to_path_buf(), e))?;
        crate::info!("server binaries cached at {}", txz.display());
        Ok(())
    }

    /// Unpack the cached payload into `instance_dir`, producing the `bin/`,
    /// `lib/`, and `share/` trees the engine runs from.
    pub fn extract_into(&self, txz: &Path, instance_dir: &Path) -> PgEmbedResult<()> {
        archive::extract_txz(txz, instance_dir)
    }
}
