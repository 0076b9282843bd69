//! Integration tests for the backup-archive upstream's subprocess protocol
//!
//! A fake extraction tool (shell script) stands in for the real backup
//! tool so the tests can exercise:
//! - the immediate "file not found" signal parsed from live stdout,
//!   without waiting for the process to exit
//! - hard process errors from a non-zero exit
//! - the defensive missing-file check after a clean exit
//! - successful extraction with destination recycling

#![cfg(unix)]

use camino::{Utf8Path, Utf8PathBuf};
use regionup::RecycleBin;
use regionup::models::{Config, UpdateOperationConfig, UpstreamEntry, UpstreamKind};
use regionup::upstream::{BackupArchiveUpstream, Upstream, UpstreamError, UpstreamRegistry};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Write an executable fake tool. It receives
/// `<archive> extract latest <world/file> <out_dir>` as `$1..$5`.
fn write_fake_tool(path: &Utf8Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

struct Fixture {
    root: Utf8PathBuf,
    op: UpdateOperationConfig,
    bin: RecycleBin,
    _temp: TempDir,
}

fn fixture(tool_body: &str) -> Fixture {
    let temp = TempDir::new().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    fs::write(root.join("store.db"), b"store").unwrap();
    fs::create_dir_all(root.join("world")).unwrap();
    write_fake_tool(&root.join("fake_tool.sh"), tool_body);

    let mut op = UpdateOperationConfig::default();
    op.backup_tool.command = root.join("fake_tool.sh").to_string();

    let bin = RecycleBin::new(root.join("bin")).unwrap();
    Fixture {
        root,
        op,
        bin,
        _temp: temp,
    }
}

fn archive_upstream(fixture: &Fixture) -> BackupArchiveUpstream {
    let entry = UpstreamEntry {
        kind: UpstreamKind::BackupArchive,
        path: fixture.root.join("store.db"),
        world_name: "world".to_string(),
    };
    BackupArchiveUpstream::new("pb", &entry, &fixture.op).unwrap()
}

#[tokio::test]
async fn test_not_found_log_line_fails_without_waiting_for_exit() {
    // The tool reports the missing file, then hangs far longer than any
    // timeout in play
    let fixture = fixture(
        r#"echo "[2024-05-01 10:22:03,123 INFO] File 'world/level.dat' in backup #4 does not exist"
sleep 30"#,
    );
    let upstream = archive_upstream(&fixture);

    let started = Instant::now();
    let err = upstream
        .extract_file(
            Utf8Path::new("level.dat"),
            &fixture.root.join("world"),
            &fixture.bin,
        )
        .await
        .unwrap_err();

    assert!(
        matches!(&err, UpstreamError::FileNotFound(f) if f == "world/level.dat"),
        "unexpected error: {err:?}"
    );
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "extract_file waited for the subprocess"
    );
}

#[tokio::test]
async fn test_non_zero_exit_is_a_process_error() {
    let fixture = fixture(r#"echo "[2024-05-01 10:22:03,123 ERROR] something broke"
exit 7"#);
    let upstream = archive_upstream(&fixture);

    let err = upstream
        .extract_file(
            Utf8Path::new("region/r.0.0.mca"),
            &fixture.root.join("world"),
            &fixture.bin,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, UpstreamError::ProcessError(7)));
}

#[tokio::test]
async fn test_clean_exit_without_output_file_is_not_found() {
    let fixture = fixture(r#"echo "[2024-05-01 10:22:03,123 INFO] pretending to extract"
exit 0"#);
    let upstream = archive_upstream(&fixture);

    let err = upstream
        .extract_file(
            Utf8Path::new("region/r.0.0.mca"),
            &fixture.root.join("world"),
            &fixture.bin,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, UpstreamError::FileNotFound(f) if f == "region/r.0.0.mca"));
}

#[tokio::test]
async fn test_successful_extraction_recycles_destination() {
    let fixture = fixture(r#"printf 'from backup' > "$5/$(basename "$4")""#);
    let upstream = archive_upstream(&fixture);

    let target = fixture.root.join("world/region/r.0.0.mca");
    fs::create_dir_all(target.parent().unwrap()).unwrap();
    fs::write(&target, b"current").unwrap();

    upstream
        .extract_file(
            Utf8Path::new("region/r.0.0.mca"),
            &fixture.root.join("world"),
            &fixture.bin,
        )
        .await
        .unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"from backup");

    // The previous content went into the bin
    assert_eq!(fixture.bin.restore_all(true), 1);
    assert_eq!(fs::read(&target).unwrap(), b"current");
}

#[tokio::test]
async fn test_tool_receives_the_documented_argument_shape() {
    // The tool dumps its arguments into the output file so we can assert
    // the exact invocation contract
    let fixture = fixture(r#"printf '%s|%s|%s|%s' "$1" "$2" "$3" "$4" > "$5/$(basename "$4")""#);
    let upstream = archive_upstream(&fixture);

    upstream
        .extract_file(
            Utf8Path::new("region/r.2.-3.mca"),
            &fixture.root.join("world"),
            &fixture.bin,
        )
        .await
        .unwrap();

    let recorded =
        fs::read_to_string(fixture.root.join("world/region/r.2.-3.mca")).unwrap();
    let parts: Vec<&str> = recorded.split('|').collect();
    assert_eq!(parts[0], fixture.root.join("store.db").as_str());
    assert_eq!(parts[1], "extract");
    assert_eq!(parts[2], "latest");
    assert_eq!(parts[3], "world/region/r.2.-3.mca");
}

#[tokio::test]
async fn test_invalid_upstream_is_cached_in_registry() {
    let temp = TempDir::new().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();

    let mut config = Config::default();
    config.paths.recycle_bin_directory = root.join("bin");
    config.paths.upstreams.clear();
    config.paths.upstreams.insert(
        "broken".to_string(),
        UpstreamEntry {
            kind: UpstreamKind::BackupArchive,
            path: root.join("does_not_exist.db"),
            world_name: "world".to_string(),
        },
    );
    config.paths.current_upstream = "broken".to_string();

    let registry = UpstreamRegistry::from_config(&config);
    let upstream = registry.current().unwrap();
    assert_eq!(upstream.kind(), "invalid");

    let bin = RecycleBin::new(root.join("bin")).unwrap();
    let err = upstream
        .extract_file(Utf8Path::new("region/r.0.0.mca"), &root, &bin)
        .await
        .unwrap_err();
    assert!(matches!(err, UpstreamError::ArchiveInvalid { .. }));
}
