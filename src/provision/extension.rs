//! Extension provisioner
//! =====================
//!
//! Extensions are described by a download URL for a zip archive plus the SQL
//! statements that activate them once the server is up. The archive is
//! cached next to the engine payload under its own file name and unpacked
//! over the instance directory so its `lib/` and `share/` content merges
//! with the engine's; statement execution lives with the server lifecycle.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    error::{PgEmbedError, PgEmbedResult},
    provision::{archive, fetch, CacheLookup},
    retry::RetryPolicy,
};

/// Validated description of one extension: where its archive lives and what
/// to run against the server after it is installed.
#[derive(Debug, Clone)]
pub struct PgExtensionConfig {
    download_url: Url,
    statements: Vec<String>,
}

impl PgExtensionConfig {
    /// Validates everything up front so a bad extension fails at
    /// construction, not halfway through provisioning.
    pub fn new(download_url: &str, statements: Vec<String>) -> PgEmbedResult<Self> {
        let url = Url::parse(download_url).map_err(|e| PgEmbedError::InvalidConfig {
            field: "extension download_url",
            reason: format!("'{download_url}' is not a valid URL: {e}"),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(PgEmbedError::InvalidConfig {
                field: "extension download_url",
                reason: format!("'{download_url}' must use http or https"),
            });
        }

        if archive_file_name(&url).is_none() {
            return Err(PgEmbedError::InvalidConfig {
                field: "extension download_url",
                reason: format!("'{download_url}' has no file name in its path"),
            });
        }

        if statements.is_empty() || statements.iter().any(|s| s.trim().is_empty()) {
            return Err(PgEmbedError::InvalidConfig {
                field: "extension statements",
                reason: "at least one non-empty SQL statement is required".into(),
            });
        }

        Ok(Self {
            download_url: url,
            statements,
        })
    }

    pub fn download_url(&self) -> &Url {
        &self.download_url
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// The archive's file name, which doubles as its cache key.
    pub fn archive_file_name(&self) -> &str {
        // validated in new()
        archive_file_name(&self.download_url).unwrap_or_default()
    }
}

fn archive_file_name(url: &Url) -> Option<&str> {
    url.path_segments()
        .and_then(Iterator::last)
        .filter(|segment| !segment.is_empty())
}

#[derive(Debug, Clone)]
pub struct ExtensionProvisioner {
    config: PgExtensionConfig,
    binaries_dir: PathBuf,
    instance_dir: PathBuf,
}

impl ExtensionProvisioner {
    pub fn new(config: PgExtensionConfig, binaries_dir: &Path, instance_dir: &Path) -> Self {
        Self {
            config,
            binaries_dir: binaries_dir.to_path_buf(),
            instance_dir: instance_dir.to_path_buf(),
        }
    }

    pub fn archive_path(&self) -> PathBuf {
        self.binaries_dir.join(self.config.archive_file_name())
    }

    pub fn lookup_cache(&self) -> CacheLookup {
        if self.archive_path().is_file() {
            CacheLookup::CachedLocally
        } else {
            CacheLookup::NotCached
        }
    }

    /// Make sure the extension archive is in the cache and return its path.
    pub fn ensure_blocking(&self, retry: &RetryPolicy) -> PgEmbedResult<PathBuf> {
        let archive_path = self.archive_path();
        if let CacheLookup::CachedLocally = self.lookup_cache() {
            crate::trace!("using cached extension at {}", archive_path.display());
            return Ok(archive_path);
        }

        retry.execute("download extension", || {
            fetch::fetch_blocking(self.config.download_url().as_str(), &archive_path)
        })?;
        Ok(archive_path)
    }

    /// Suspendable form of [`ensure_blocking`](Self::ensure_blocking).
    pub async fn ensure(
        &self,
        retry: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> PgEmbedResult<PathBuf> {
        let archive_path = self.archive_path();
        if let CacheLookup::CachedLocally = self.lookup_cache() {
            crate::trace!("using cached extension at {}", archive_path.display());
            return Ok(archive_path);
        }

        retry
            .execute_async("download extension", || {
                fetch::fetch(self.config.download_url().as_str(), &archive_path, cancel)
            })
            .await?;
        Ok(archive_path)
    }

    /// Unpack the cached archive over the instance directory, stripping the
    /// container folder if the archive carries one.
    pub fn extract(&self, archive_path: &Path) -> PgEmbedResult<()> {
        let container = archive::container_folder(archive_path)?;
        if let Some(folder) = &container {
            crate::trace!("stripping container folder '{folder}'");
        }
        archive::extract_zip(archive_path, &self.instance_dir, container.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::{write::FileOptions, ZipWriter};

    use super::*;

    fn statements() -> Vec<String> {
        vec!["CREATE EXTENSION IF NOT EXISTS plv8".to_string()]
    }

    #[test]
    fn config_requires_an_http_url_with_a_file_name() {
        assert!(PgExtensionConfig::new("https://example.com/plv8.zip", statements()).is_ok());

        for bad in [
            "not a url",
            "ftp://example.com/plv8.zip",
            "https://example.com/",
            "https://example.com",
        ] {
            assert!(
                PgExtensionConfig::new(bad, statements()).is_err(),
                "'{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn config_requires_at_least_one_non_empty_statement() {
        let url = "https://example.com/plv8.zip";
        assert!(PgExtensionConfig::new(url, Vec::new()).is_err());
        assert!(PgExtensionConfig::new(url, vec!["  ".to_string()]).is_err());
        assert!(PgExtensionConfig::new(
            url,
            vec!["CREATE EXTENSION plv8".to_string(), String::new()]
        )
        .is_err());
    }

    #[test]
    fn archive_file_name_is_the_last_path_segment() {
        let config =
            PgExtensionConfig::new("https://example.com/releases/v3/plv8-3.1.5.zip", statements())
                .unwrap();
        assert_eq!(config.archive_file_name(), "plv8-3.1.5.zip");
    }

    fn extension_zip_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in [
                ("plv8-3.1.5/lib/plv8.so", b"elf" as &[u8]),
                ("plv8-3.1.5/share/extension/plv8.control", b"ctl"),
            ] {
                zip.start_file::<_, ()>(name, FileOptions::default()).unwrap();
                zip.write_all(body).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn downloads_once_then_serves_from_cache() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/plv8-3.1.5.zip")
            .with_status(200)
            .with_body(extension_zip_bytes())
            .expect(1)
            .create();

        let tmp = tempfile::tempdir().unwrap();
        let binaries = tmp.path().join("binaries");
        let instance = tmp.path().join("instance");
        std::fs::create_dir_all(&binaries).unwrap();
        std::fs::create_dir_all(&instance).unwrap();

        let config = PgExtensionConfig::new(
            &format!("{}/plv8-3.1.5.zip", server.url()),
            statements(),
        )
        .unwrap();
        let provisioner = ExtensionProvisioner::new(config, &binaries, &instance);
        assert_eq!(provisioner.lookup_cache(), CacheLookup::NotCached);

        let retry = RetryPolicy::fixed(Vec::new());
        let first = provisioner.ensure_blocking(&retry).unwrap();
        assert_eq!(provisioner.lookup_cache(), CacheLookup::CachedLocally);
        let second = provisioner.ensure_blocking(&retry).unwrap();
        assert_eq!(first, second);
        mock.assert();
    }

    #[test]
    fn extraction_merges_into_the_instance_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let binaries = tmp.path().join("binaries");
        let instance = tmp.path().join("instance");
        std::fs::create_dir_all(&binaries).unwrap();
        std::fs::create_dir_all(instance.join("lib")).unwrap();

        let archive_path = binaries.join("plv8-3.1.5.zip");
        std::fs::write(&archive_path, extension_zip_bytes()).unwrap();

        let config =
            PgExtensionConfig::new("https://example.com/plv8-3.1.5.zip", statements()).unwrap();
        let provisioner = ExtensionProvisioner::new(config, &binaries, &instance);
        provisioner.extract(&archive_path).unwrap();

        assert!(instance.join("lib/plv8.so").is_file());
        assert!(instance.join("share/extension/plv8.control").is_file());
        assert!(!instance.join("plv8-3.1.5").exists());
    }
}
