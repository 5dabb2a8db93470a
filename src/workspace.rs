//! Workspace – on-disk layout of one server instance
//! =================================================
//!
//! ```text
//! <base>/pg_embed/                      # root, shared by all instances
//! ├── binaries/                        # shared archive cache (skip-if-present)
//! └── <instance-id>/                   # exclusively owned by one PgServer
//!     ├── bin/                         # extracted engine executables
//!     └── data/                        # cluster files created by initdb
//! ```
//!
//! The existence of the instance directory is the single source of truth for
//! "already provisioned": `ensure` never wipes it, and deletion is only ever
//! requested explicitly. Archives frequently extract files with the read-only
//! attribute set, which makes a plain recursive delete fail on some
//! platforms, so every delete first walks the tree clearing attributes and
//! then retries per the configured exponential policy.

use std::path::{Path, PathBuf};

use crate::{
    error::{PgEmbedError, PgEmbedResult},
    retry::RetryPolicy,
};

pub const WORKSPACE_DIR_NAME: &str = "pg_embed";
pub const BINARIES_DIR_NAME: &str = "binaries";

#[derive(Debug, Clone)]
pub struct Workspace {
    db_dir: PathBuf,
    binaries_dir: PathBuf,
    instance_dir: PathBuf,
    bin_dir: PathBuf,
    data_dir: PathBuf,
    delete_retry: RetryPolicy,
}

impl Workspace {
    pub fn new(base_dir: &Path, instance_id: &str, delete_retry: RetryPolicy) -> Self {
        let db_dir = base_dir.join(WORKSPACE_DIR_NAME);
        let binaries_dir = db_dir.join(BINARIES_DIR_NAME);
        let instance_dir = db_dir.join(instance_id);
        let bin_dir = instance_dir.join("bin");
        let data_dir = instance_dir.join("data");
        Self {
            db_dir,
            binaries_dir,
            instance_dir,
            bin_dir,
            data_dir,
            delete_retry,
        }
    }

    pub fn db_dir(&self) -> &Path {
        &self.db_dir
    }

    pub fn binaries_dir(&self) -> &Path {
        &self.binaries_dir
    }

    pub fn instance_dir(&self) -> &Path {
        &self.instance_dir
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Create the root, cache, and instance directories. Pre-existing
    /// directories are not an error.
    pub fn ensure(&self) -> PgEmbedResult<()> {
        for dir in [&self.db_dir, &self.binaries_dir, &self.instance_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|e| PgEmbedError::file_system("create directory", dir.clone(), e))?;
        }
        Ok(())
    }

    /// Delete the whole workspace root, including the shared binaries cache.
    pub fn remove_root(&self) -> PgEmbedResult<()> {
        self.delete_dir(&self.db_dir)
    }

    /// Delete this instance's directory tree.
    pub fn remove_instance(&self) -> PgEmbedResult<()> {
        self.delete_dir(&self.instance_dir)
    }

    fn delete_dir(&self, dir: &Path) -> PgEmbedResult<()> {
        if !dir.exists() {
            crate::trace!("directory {} is missing; nothing to remove", dir.display());
            return Ok(());
        }

        normalize_attributes(dir)?;

        let target = dir.to_path_buf();
        self.delete_retry
            .execute("delete directory", || std::fs::remove_dir_all(&target))?;
        Ok(())
    }
}

/// Recursively clear the read-only attribute on every file and directory
/// under `dir`, including `dir` itself.
fn normalize_attributes(dir: &Path) -> PgEmbedResult<()> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| PgEmbedError::file_system("read directory", dir.to_path_buf(), e))?;

    for entry in entries {
        let entry =
            entry.map_err(|e| PgEmbedError::file_system("read directory", dir.to_path_buf(), e))?;
        let path = entry.path();
        if path.is_dir() {
            normalize_attributes(&path)?;
        } else {
            clear_readonly(&path)?;
        }
    }

    clear_readonly(dir)
}

fn clear_readonly(path: &Path) -> PgEmbedResult<()> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| PgEmbedError::file_system("read metadata", path.to_path_buf(), e))?;
    let mut perms = metadata.permissions();
    if perms.readonly() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(perms.mode() | 0o600);
        }
        #[cfg(not(unix))]
        perms.set_readonly(false);
        std::fs::set_permissions(path, perms)
            .map_err(|e| PgEmbedError::file_system("clear read-only attribute", path, e))?;
    }
    Ok(())
}
