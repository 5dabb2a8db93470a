//! Platform / architecture model
//! =============================
//!
//! A closed pair of variant types replaces stringly-typed OS checks. The
//! artifact repository publishes binaries under `{platform}-{architecture}`
//! coordinates with two aliasing quirks (Alpine builds are published as
//! `linux` artifacts with an `alpine` / `alpine-lite` architecture tag), so
//! the whole mapping lives in one table in [`artifact_coordinates`].

use serde::{Deserialize, Serialize};

use crate::error::{PgEmbedError, PgEmbedResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Windows,
    Linux,
    Darwin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    Amd64,
    Arm64,
    /// Alpine (musl) build; only published for Linux.
    Alpine,
    /// Stripped-down Alpine build; only published for Linux.
    AlpineLite,
}

impl Platform {
    /// Detect the host platform, or fail with
    /// [`PgEmbedError::UnsupportedPlatform`].
    pub fn detect() -> PgEmbedResult<Self> {
        match std::env::consts::OS {
            "windows" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            "macos" => Ok(Self::Darwin),
            _ => Err(PgEmbedError::UnsupportedPlatform {
                os: std::env::consts::OS,
                arch: std::env::consts::ARCH,
            }),
        }
    }

    /// Append the platform-appropriate executable suffix.
    pub fn executable(&self, name: &str) -> String {
        match self {
            Self::Windows => format!("{name}.exe"),
            _ => name.to_string(),
        }
    }
}

impl Architecture {
    pub fn detect() -> PgEmbedResult<Self> {
        match std::env::consts::ARCH {
            "x86_64" => Ok(Self::Amd64),
            "aarch64" => Ok(Self::Arm64),
            _ => Err(PgEmbedError::UnsupportedPlatform {
                os: std::env::consts::OS,
                arch: std::env::consts::ARCH,
            }),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Windows => write!(f, "windows"),
            Self::Linux => write!(f, "linux"),
            Self::Darwin => write!(f, "darwin"),
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Amd64 => write!(f, "amd64"),
            Self::Arm64 => write!(f, "arm64v8"),
            Self::Alpine => write!(f, "alpine"),
            Self::AlpineLite => write!(f, "alpine-lite"),
        }
    }
}

/// The `{platform}-{architecture}` strings used in artifact names.
///
/// Combinations the repository does not publish are rejected up front rather
/// than producing a 404 at download time.
pub fn artifact_coordinates(
    platform: Platform,
    architecture: Architecture,
) -> PgEmbedResult<(&'static str, &'static str)> {
    use Architecture::*;
    use Platform::*;
    match (platform, architecture) {
        (Linux, Amd64) => Ok(("linux", "amd64")),
        (Linux, Arm64) => Ok(("linux", "arm64v8")),
        (Linux, Alpine) => Ok(("linux", "alpine")),
        (Linux, AlpineLite) => Ok(("linux", "alpine-lite")),
        (Darwin, Amd64) => Ok(("darwin", "amd64")),
        (Darwin, Arm64) => Ok(("darwin", "arm64v8")),
        (Windows, Amd64) => Ok(("windows", "amd64")),
        (Windows, Arm64) | (Windows | Darwin, Alpine | AlpineLite) => {
            Err(PgEmbedError::UnsupportedPlatform {
                os: std::env::consts::OS,
                arch: std::env::consts::ARCH,
            })
        }
    }
}
