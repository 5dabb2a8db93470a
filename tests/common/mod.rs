//! Shared fixtures for the lifecycle integration tests
//! ===================================================
//!
//! Builds the artifacts a mocked repository serves: a jar wrapping a txz
//! whose `bin/` holds shell-script stand-ins for the engine tools. Each stub
//! appends its name and argv to `calls.log` in the instance directory, which
//! lets the tests assert pipeline ordering without a real database engine.

#![allow(dead_code)]

use std::io::Write;

use pg_embed::platform::{artifact_coordinates, Architecture, Platform};

pub const VERSION: &str = "16.4.0";

const STUB_TOOL: &str = r#"#!/bin/sh
dir=$(dirname "$0")
echo "TOOL $@" >> "$dir/../calls.log"
exit 0
"#;

const STUB_PSQL: &str = r#"#!/bin/sh
dir=$(dirname "$0")
echo "psql $@" >> "$dir/../calls.log"
case "$@" in *FAIL*) exit 1 ;; esac
exit 0
"#;

const STUB_PG_CTL_DEAD: &str = r#"#!/bin/sh
dir=$(dirname "$0")
echo "pg_ctl $@" >> "$dir/../calls.log"
exit 1
"#;

/// The repository route the jar for the host platform is served under.
pub fn jar_route() -> String {
    let platform = Platform::detect().unwrap();
    let architecture = Architecture::detect().unwrap();
    let (p, a) = artifact_coordinates(platform, architecture).unwrap();
    format!(
        "/io/zonky/test/postgres/embedded-postgres-binaries-{p}-{a}\
         /{VERSION}/embedded-postgres-binaries-{p}-{a}-{VERSION}.jar"
    )
}

/// A txz whose `bin/` contains executable stubs for the tools the lifecycle
/// invokes.
pub fn stub_txz_bytes() -> Vec<u8> {
    stub_txz_bytes_with(STUB_TOOL.replace("TOOL", "pg_ctl"))
}

fn stub_txz_bytes_with(pg_ctl_script: String) -> Vec<u8> {
    let encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    let mut tar = tar::Builder::new(encoder);

    for (member, script) in [
        ("bin/initdb", STUB_TOOL.replace("TOOL", "initdb")),
        ("bin/pg_ctl", pg_ctl_script),
        ("bin/psql", STUB_PSQL.to_string()),
    ] {
        let bytes = script.as_bytes();
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        tar.append_data(&mut header, member, bytes).unwrap();
    }

    tar.into_inner().unwrap().finish().unwrap()
}

/// The jar the mocked repository serves: manifest plus the txz payload.
pub fn jar_bytes() -> Vec<u8> {
    jar_bytes_around(stub_txz_bytes())
}

/// Same jar, except its `pg_ctl` logs and then exits non-zero, the way a
/// launcher that lost a port race does.
pub fn jar_bytes_with_dead_launcher() -> Vec<u8> {
    jar_bytes_around(stub_txz_bytes_with(STUB_PG_CTL_DEAD.to_string()))
}

fn jar_bytes_around(txz: Vec<u8>) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file::<_, ()>("META-INF/MANIFEST.MF", zip::write::FileOptions::default())
            .unwrap();
        zip.write_all(b"Manifest-Version: 1.0\n").unwrap();
        zip.start_file::<_, ()>(
            "postgres-stub.txz",
            zip::write::FileOptions::default(),
        )
        .unwrap();
        zip.write_all(&txz).unwrap();
        zip.finish().unwrap();
    }
    buf
}

/// An extension archive with a versioned container folder, the shape real
/// extension releases use: explicit directory entries plus the files.
pub fn extension_zip_bytes() -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for dir in [
            "plv8-3.1.5/",
            "plv8-3.1.5/lib/",
            "plv8-3.1.5/share/",
            "plv8-3.1.5/share/extension/",
        ] {
            zip.add_directory::<_, ()>(dir, zip::write::FileOptions::default())
                .unwrap();
        }
        for (name, body) in [
            ("plv8-3.1.5/lib/plv8.so", b"elf" as &[u8]),
            ("plv8-3.1.5/share/extension/plv8.control", b"ctl"),
        ] {
            zip.start_file::<_, ()>(name, zip::write::FileOptions::default())
                .unwrap();
            zip.write_all(body).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

/// Everything the stubs logged, in invocation order.
pub fn recorded_calls(instance_dir: &std::path::Path) -> Vec<String> {
    match std::fs::read_to_string(instance_dir.join("calls.log")) {
        Ok(log) => log.lines().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}

/// Poll `calls.log` until a line containing `needle` shows up, for a few
/// seconds at most, then return everything logged. The launcher stub writes
/// its line from a spawned process, so a single read right after `start()`
/// returns can miss it.
pub fn wait_for_logged(instance_dir: &std::path::Path, needle: &str) -> Vec<String> {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let calls = recorded_calls(instance_dir);
        if calls.iter().any(|c| c.contains(needle)) || std::time::Instant::now() >= deadline {
            return calls;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
}
