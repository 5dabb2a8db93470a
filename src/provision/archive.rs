//! Archive handling
//! ================
//!
//! The engine ships as a `.txz` (xz-compressed tar) wrapped inside a jar,
//! which is itself a zip; extensions ship as plain zips, usually with a
//! versioned container folder on top. This module knows how to pluck the
//! inner payload out of the jar, unpack both archive kinds, and detect the
//! container folder so extension files land where the engine looks for them.

use std::path::{Path, PathBuf};

use xz2::read::XzDecoder;

use crate::error::{PgEmbedError, PgEmbedResult};

/// Folder names the engine expects at the top of its installation; an
/// extension archive entry ending in one of these betrays the container
/// folder wrapped around the payload.
const ENGINE_SUBFOLDERS: [&str; 3] = ["bin/", "lib/", "share/"];

/// Unpack an xz-compressed tar into `dest`, creating it if needed. Unix file
/// modes recorded in the tar are preserved, so the engine executables come
/// out runnable.
pub fn extract_txz(txz: &Path, dest: &Path) -> PgEmbedResult<()> {
    std::fs::create_dir_all(dest)
        .map_err(|e| PgEmbedError::file_system("create directory", dest.to_path_buf(), e))?;

    let file = std::fs::File::open(txz)
        .map_err(|e| PgEmbedError::file_system("open archive", txz.to_path_buf(), e))?;

    let mut archive = tar::Archive::new(XzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive
        .unpack(dest)
        .map_err(|e| PgEmbedError::file_system("unpack archive", txz.to_path_buf(), e))?;

    crate::trace!("extracted {} into {}", txz.display(), dest.display());
    Ok(())
}

/// Copy the single `.txz` member out of the jar at `jar` into `dest`. The
/// repository publishes exactly one per jar; a jar without one is corrupt.
pub fn pluck_txz_from_jar(jar: &Path, dest: &Path) -> PgEmbedResult<()> {
    let file = std::fs::File::open(jar)
        .map_err(|e| PgEmbedError::file_system("open archive", jar.to_path_buf(), e))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| PgEmbedError::file_system("read archive", jar.to_path_buf(), e))?;

    let mut member = None;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| PgEmbedError::file_system("read archive entry", jar.to_path_buf(), e))?;
        if entry.name().ends_with(".txz") {
            member = Some(i);
            break;
        }
    }

    let Some(index) = member else {
        return Err(PgEmbedError::file_system(
            "locate compressed payload in archive",
            jar.to_path_buf(),
            std::io::Error::other("no .txz member found"),
        ));
    };

    let mut entry = archive
        .by_index(index)
        .map_err(|e| PgEmbedError::file_system("read archive entry", jar.to_path_buf(), e))?;
    let mut out = std::fs::File::create(dest)
        .map_err(|e| PgEmbedError::file_system("create file", dest.to_path_buf(), e))?;
    std::io::copy(&mut entry, &mut out)
        .map_err(|e| PgEmbedError::file_system("copy archive entry", dest.to_path_buf(), e))?;
    Ok(())
}

/// The leading folder an extension zip wraps around its payload, detected by
/// finding an entry with one of the engine's expected subfolders below a
/// non-empty prefix. Matches directory entries and plain file paths alike,
/// since not every archiver records directory entries. `None` means the
/// payload sits at the archive root.
pub fn container_folder(zip_path: &Path) -> PgEmbedResult<Option<String>> {
    let file = std::fs::File::open(zip_path)
        .map_err(|e| PgEmbedError::file_system("open archive", zip_path.to_path_buf(), e))?;
    let archive = zip::ZipArchive::new(file)
        .map_err(|e| PgEmbedError::file_system("read archive", zip_path.to_path_buf(), e))?;

    for name in archive.file_names() {
        for subfolder in ENGINE_SUBFOLDERS {
            if let Some(idx) = name.find(subfolder) {
                // Only a match on a path-segment boundary counts, so a
                // folder like `toolshare/` cannot masquerade as `share/`.
                if idx > 0 && name.as_bytes()[idx - 1] == b'/' {
                    return Ok(Some(name[..idx].to_string()));
                }
            }
        }
    }
    Ok(None)
}

/// Unpack a zip into `dest`. With `strip` set, only entries under that
/// folder are extracted and the folder itself is dropped from their paths;
/// entries outside it (readme, license) are skipped. Entries with
/// path-traversal names are discarded, and Unix permission bits recorded in
/// the zip are restored.
pub fn extract_zip(zip_path: &Path, dest: &Path, strip: Option<&str>) -> PgEmbedResult<()> {
    let file = std::fs::File::open(zip_path)
        .map_err(|e| PgEmbedError::file_system("open archive", zip_path.to_path_buf(), e))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| PgEmbedError::file_system("read archive", zip_path.to_path_buf(), e))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| {
            PgEmbedError::file_system("read archive entry", zip_path.to_path_buf(), e)
        })?;

        let Some(sanitized) = entry.enclosed_name() else {
            continue; // invalid or malicious name
        };

        let rel: PathBuf = match strip {
            Some(prefix) => match sanitized.strip_prefix(prefix) {
                Ok(tail) if !tail.as_os_str().is_empty() => tail.to_owned(),
                _ => continue,
            },
            None => sanitized.to_owned(),
        };

        let out = dest.join(rel);

        if entry.is_dir() {
            std::fs::create_dir_all(&out)
                .map_err(|e| PgEmbedError::file_system("create directory", out.clone(), e))?;
            continue;
        }

        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PgEmbedError::file_system("create directory", parent.to_path_buf(), e)
            })?;
        }
        let mut out_file = std::fs::File::create(&out)
            .map_err(|e| PgEmbedError::file_system("create file", out.clone(), e))?;
        std::io::copy(&mut entry, &mut out_file)
            .map_err(|e| PgEmbedError::file_system("copy archive entry", out.clone(), e))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out, std::fs::Permissions::from_mode(mode)).map_err(|e| {
                PgEmbedError::file_system("set permissions from archive entry", out.clone(), e)
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::{write::FileOptions, ZipWriter};

    use super::*;

    pub(crate) fn tiny_txz(path: &Path, member: &str, contents: &[u8]) {
        let file = std::fs::File::create(path).unwrap();
        let encoder = xz2::write::XzEncoder::new(file, 6);
        let mut tar = tar::Builder::new(encoder);

        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        tar.append_data(&mut header, member, contents).unwrap();

        tar.into_inner().unwrap().finish().unwrap();
    }

    fn jar_with(path: &Path, members: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        for (name, contents) in members {
            zip.start_file::<_, ()>(*name, FileOptions::default()).unwrap();
            zip.write_all(contents).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn txz_unpacks_with_executable_bits() {
        let tmp = tempfile::tempdir().unwrap();
        let txz = tmp.path().join("pg.txz");
        tiny_txz(&txz, "bin/initdb", b"#!/bin/sh\nexit 0\n");

        let dest = tmp.path().join("instance");
        extract_txz(&txz, &dest).unwrap();

        let unpacked = dest.join("bin/initdb");
        assert!(unpacked.is_file());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&unpacked).unwrap().permissions().mode();
            assert!(mode & 0o111 != 0, "executable bit lost: {mode:o}");
        }
    }

    #[test]
    fn plucks_the_txz_member_out_of_a_jar() {
        let tmp = tempfile::tempdir().unwrap();
        let jar = tmp.path().join("binaries.jar");
        jar_with(
            &jar,
            &[
                ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n" as &[u8]),
                ("postgres-linux-x86_64.txz", b"txz-payload"),
            ],
        );

        let dest = tmp.path().join("cached.txz");
        pluck_txz_from_jar(&jar, &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"txz-payload");
    }

    #[test]
    fn jar_without_payload_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let jar = tmp.path().join("empty.jar");
        jar_with(&jar, &[("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n")]);

        let err = pluck_txz_from_jar(&jar, &tmp.path().join("out.txz"))
            .expect_err("a jar without a .txz member is corrupt");
        assert!(matches!(err, PgEmbedError::FileSystem { .. }), "{err:?}");
    }

    #[test]
    fn container_folder_is_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let wrapped = tmp.path().join("wrapped.zip");
        jar_with(
            &wrapped,
            &[
                ("plv8-3.1.5/README.md", b"docs" as &[u8]),
                ("plv8-3.1.5/lib/plv8.so", b"elf"),
                ("plv8-3.1.5/share/extension/plv8.control", b"ctl"),
            ],
        );
        assert_eq!(
            container_folder(&wrapped).unwrap().as_deref(),
            Some("plv8-3.1.5/")
        );

        let flat = tmp.path().join("flat.zip");
        jar_with(
            &flat,
            &[
                ("plv8.so", b"elf" as &[u8]),
                ("toolshare/readme", b"near-miss segment name"),
            ],
        );
        assert_eq!(container_folder(&flat).unwrap(), None);
    }

    #[test]
    fn container_folder_from_directory_entries_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("dirs.zip");
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut zip = ZipWriter::new(file);
        zip.add_directory::<_, ()>("plv8-3.1.5/", FileOptions::default())
            .unwrap();
        zip.add_directory::<_, ()>("plv8-3.1.5/bin/", FileOptions::default())
            .unwrap();
        zip.finish().unwrap();

        assert_eq!(
            container_folder(&zip_path).unwrap().as_deref(),
            Some("plv8-3.1.5/")
        );
    }

    #[test]
    fn strip_extracts_only_the_container_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("ext.zip");
        jar_with(
            &zip_path,
            &[
                ("plv8-3.1.5/lib/plv8.so", b"elf" as &[u8]),
                ("plv8-3.1.5/share/extension/plv8.control", b"ctl"),
                ("LICENSE", b"mit"),
            ],
        );

        let dest = tmp.path().join("instance");
        extract_zip(&zip_path, &dest, Some("plv8-3.1.5/")).unwrap();

        assert!(dest.join("lib/plv8.so").is_file());
        assert!(dest.join("share/extension/plv8.control").is_file());
        assert!(!dest.join("LICENSE").exists(), "entries outside the container are skipped");
        assert!(!dest.join("plv8-3.1.5").exists(), "container folder is stripped");
    }

    #[test]
    fn path_traversal_entries_are_discarded() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("evil.zip");
        jar_with(&zip_path, &[("../evil.txt", b"malice")]);

        let dest = tmp.path().join("instance");
        std::fs::create_dir_all(&dest).unwrap();
        extract_zip(&zip_path, &dest, None).unwrap();

        assert!(!dest.join("evil.txt").exists());
        assert!(!tmp.path().join("evil.txt").exists(), "must not escape dest");
    }
}
