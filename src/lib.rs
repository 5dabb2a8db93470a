//! pg_embed – disposable embedded PostgreSQL servers for Rust
//! ==========================================================
//!
//! ## Fully Managed
//! - **Automated Provisioning** – Downloads and caches the official
//!   [zonky embedded-postgres binaries](https://github.com/zonkyio/embedded-postgres-binaries)
//!   for the requested version, then unpacks a private instance per server.
//! - **Supported Platforms** – Linux, macOS, and Windows on amd64 and arm64,
//!   plus Alpine (musl) builds on Linux.
//! - **Multiple Versions** – The archive cache is keyed by version and
//!   platform, so suites pinned to different engine versions coexist.
//!
//! ## Built for Test Suites
//! - **Scoped Lifetime** – Dropping a [`PgServer`] stops it; teardown never
//!   throws, so cleanup cannot mask the failure under investigation.
//! - **Port Isolation** – Each instance gets the first free TCP port at or
//!   above 5500, letting suites run servers side by side.
//! - **Extensions** – Declare extension archives and their activation SQL up
//!   front; they are fetched, unpacked, and installed in order.
//!
//! ---
//!
//! ```rust,no_run
//! use pg_embed::*;
//!
//! fn main() -> PgEmbedResult<()> {
//!     let mut server = PgServer::builder().version("17.2.0").build()?;
//!     server.start()?;
//!
//!     println!("connect to {}", server.connection_url());
//!
//!     server.stop();
//!     Ok(())
//! }
//! ```
//!
//! ---
//!
//! ## How It Works
//!
//! ```text
//! Your test suite
//!       │
//!       ├─→ PgServer::builder()   (resolves port, identity, workspace)
//!       │         ↓
//!       ├─→ start()               (fetch → extract → initdb → pg_ctl → probe)
//!       │         ↓
//!       └─→ PgServer              (connection_url(), data_dir(), …)
//!                 │
//!                 └─→ stop()      (pg_ctl stop → kill → optional cleanup)
//! ```
//!
//! `start_async` runs the identical pipeline with suspendable, cancellable
//! downloads for suites already living inside a tokio runtime.

#[allow(unused_imports)]
use tracing::{Level, debug, error, info, span, trace, warn};

pub mod error;
pub mod net;
pub mod platform;
pub mod process;
pub mod provision;
pub mod retry;
pub mod server;
pub mod workspace;

pub use error::{PgEmbedError, PgEmbedResult};
pub use platform::{Architecture, Platform};
pub use provision::{BinaryProvisioner, CacheLookup, ExtensionProvisioner, PgExtensionConfig};
pub use retry::RetryPolicy;
pub use server::{LifecycleState, PgServer};
pub use workspace::Workspace;
