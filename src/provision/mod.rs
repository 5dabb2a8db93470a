//! Provisioning – acquiring server binaries and extensions
//! =======================================================
//!
//! Downloads land in the shared `binaries/` cache and are only fetched when
//! absent; extraction always targets one instance directory. The two
//! provisioners share the fetch and archive plumbing below and differ only
//! in where their artifacts come from and how they unpack.

pub mod archive;
pub mod binary;
pub mod extension;
pub mod fetch;

pub use archive::*;
pub use binary::*;
pub use extension::*;
pub use fetch::*;

/// Outcome of checking the shared cache before a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    /// A previously downloaded artifact is already on disk.
    CachedLocally,
    /// The artifact must be fetched from the remote repository.
    NotCached,
}
