use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

use crate::models::{BackupToolConfig, UpdateOperationConfig, UpstreamEntry, UpstreamKind};
use crate::recycle::RecycleBin;
use crate::upstream::{Upstream, UpstreamError};

/// Name of the manifest entry inside the backup tool package.
const TOOL_MANIFEST_FILE: &str = "manifest.json";

/// Manifest identifying the backup tool package.
#[derive(Debug, Deserialize)]
struct ToolManifest {
    id: String,
    version: String,
}

/// An upstream backed by an external backup tool's archive store.
///
/// Extraction spawns the tool as a subprocess and watches its stdout line by
/// line. The tool reports a missing file through its log rather than its
/// exit code, so each line is run through the configured log-format patterns
/// to pull out the message, and the message through the "file not found"
/// patterns; a hit is reported immediately without waiting for the process
/// to exit.
///
/// Extraction is async and runs inside the session's worker task. It must
/// never be driven from the thread servicing the host process's command
/// loop: if the host is blocked there, waiting on its own subprocess
/// deadlocks.
///
/// The patterns are compiled once at construction:
///
/// - `log_patterns`: must expose a `message` named capture
/// - `not_found_patterns`: must expose `file_name`, may expose `backup_id`
#[derive(Debug)]
pub struct BackupArchiveUpstream {
    name: String,
    archive_path: Utf8PathBuf,
    world_name: String,
    tool: BackupToolConfig,
    log_patterns: Vec<Regex>,
    not_found_patterns: Vec<Regex>,
    wait_timeout: Duration,
}

impl BackupArchiveUpstream {
    /// Build and validate. Any failure here is meant to be cached in an
    /// `InvalidUpstream` by the registry rather than surfacing later.
    pub fn new(
        name: &str,
        entry: &UpstreamEntry,
        op: &UpdateOperationConfig,
    ) -> Result<Self, UpstreamError> {
        Self::validate_tool_package(&op.backup_tool)?;
        Self::validate_archive_path(&entry.path)?;

        Ok(Self {
            name: name.to_string(),
            archive_path: entry.path.clone(),
            world_name: entry.world_name.clone(),
            tool: op.backup_tool.clone(),
            log_patterns: compile_patterns(&op.log_formats)?,
            not_found_patterns: compile_patterns(&op.file_not_found_formats)?,
            wait_timeout: op.process_wait_timeout(),
        })
    }

    /// The archive store itself must be a plain `.db` file.
    fn validate_archive_path(path: &Utf8Path) -> Result<(), UpstreamError> {
        if !path.exists() {
            return Err(UpstreamError::invalid(
                UpstreamKind::BackupArchive,
                format!("archive '{path}' does not exist"),
            ));
        }
        if !path.is_file() {
            return Err(UpstreamError::invalid(
                UpstreamKind::BackupArchive,
                format!("archive '{path}' is not a file"),
            ));
        }
        if path.extension() != Some("db") {
            return Err(UpstreamError::invalid(
                UpstreamKind::BackupArchive,
                format!("archive '{path}' is not a .db file"),
            ));
        }
        Ok(())
    }

    /// When a tool package is configured it must be a zip container whose
    /// manifest names the expected tool at a compatible version.
    fn validate_tool_package(tool: &BackupToolConfig) -> Result<(), UpstreamError> {
        let Some(package) = &tool.package_path else {
            // Standalone tool binary, nothing to inspect
            return Ok(());
        };
        let invalid = |reason: String| UpstreamError::invalid(UpstreamKind::BackupArchive, reason);

        if !package.is_file() {
            return Err(invalid(format!("tool package '{package}' not found")));
        }
        let file = File::open(package)
            .map_err(|e| invalid(format!("cannot open tool package '{package}': {e}")))?;
        let mut container = zip::ZipArchive::new(file)
            .map_err(|e| invalid(format!("'{package}' is not a zip container: {e}")))?;
        let mut raw = String::new();
        container
            .by_name(TOOL_MANIFEST_FILE)
            .map_err(|e| invalid(format!("'{package}' has no {TOOL_MANIFEST_FILE}: {e}")))?
            .read_to_string(&mut raw)
            .map_err(|e| invalid(format!("cannot read {TOOL_MANIFEST_FILE}: {e}")))?;
        let manifest: ToolManifest = serde_json::from_str(&raw)
            .map_err(|e| invalid(format!("malformed {TOOL_MANIFEST_FILE}: {e}")))?;

        if manifest.id != tool.tool_id {
            return Err(invalid(format!(
                "tool id is '{}', expected '{}'",
                manifest.id, tool.tool_id
            )));
        }
        let version = semver::Version::parse(&manifest.version)
            .map_err(|e| invalid(format!("unparseable tool version '{}': {e}", manifest.version)))?;
        let minimum = semver::Version::parse(&tool.min_version)
            .map_err(|e| invalid(format!("unparseable min_version '{}': {e}", tool.min_version)))?;
        if version < minimum {
            return Err(invalid(format!(
                "tool version {version} does not meet the required minimum {minimum}"
            )));
        }
        Ok(())
    }

    /// Run a line through the ordered log-format patterns and pull out the
    /// `message` capture of the first one that matches.
    fn parse_message(&self, line: &str) -> Option<String> {
        for pattern in &self.log_patterns {
            if let Some(caps) = pattern.captures(line) {
                if let Some(message) = caps.name("message") {
                    return Some(message.as_str().to_string());
                }
            }
        }
        None
    }

    /// Match a log message against the "file not found" patterns, returning
    /// the missing file name and, when captured, the backup id.
    fn parse_not_found(&self, message: &str) -> Option<(String, Option<String>)> {
        for pattern in &self.not_found_patterns {
            if let Some(caps) = pattern.captures(message) {
                if let Some(file_name) = caps.name("file_name") {
                    let backup_id = caps.name("backup_id").map(|m| m.as_str().to_string());
                    return Some((file_name.as_str().to_string(), backup_id));
                }
            }
        }
        None
    }
}

#[async_trait]
impl Upstream for BackupArchiveUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        UpstreamKind::BackupArchive.as_str()
    }

    async fn extract_file(
        &self,
        file_name: &Utf8Path,
        target_world_dir: &Utf8Path,
        bin: &RecycleBin,
    ) -> Result<(), UpstreamError> {
        let target_file_path = target_world_dir.join(file_name);
        let target_dir_path = target_file_path
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| target_world_dir.to_path_buf());
        std::fs::create_dir_all(&target_dir_path)?;
        if target_file_path.exists() {
            bin.recycle(&target_file_path)?;
        }

        let requested = Utf8PathBuf::from(&self.world_name).join(file_name);
        let mut cmd = Command::new(&self.tool.command);
        if let Some(package) = &self.tool.package_path {
            cmd.arg(package);
        }
        cmd.arg(&self.archive_path)
            .arg("extract")
            .arg("latest")
            .arg(&requested)
            .arg(&target_dir_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        tracing::debug!(upstream = %self.name, file = %requested, "extraction process started");

        // Drain stderr in the background so the child can never block on a
        // full pipe while we read stdout.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(target: "regionup::backup_tool", "{}", line.trim_end());
                }
            });
        }

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                let line = line.trim();
                tracing::info!(target: "regionup::backup_tool", "{line}");
                let Some(message) = self.parse_message(line) else {
                    continue;
                };
                if let Some((missing, backup_id)) = self.parse_not_found(message.trim()) {
                    tracing::info!(
                        upstream = %self.name,
                        file = %missing,
                        backup_id = backup_id.as_deref().unwrap_or("?"),
                        "backup tool reported a missing file"
                    );
                    // Report immediately; kill_on_drop reaps the child.
                    return Err(UpstreamError::FileNotFound(missing));
                }
            }
        }

        let status = timeout(self.wait_timeout, child.wait())
            .await
            .map_err(|_| UpstreamError::Timeout(self.wait_timeout))??;
        if !status.success() {
            return Err(UpstreamError::ProcessError(status.code().unwrap_or(-1)));
        }
        if !target_file_path.is_file() {
            // The tool exited cleanly but never produced the file
            return Err(UpstreamError::FileNotFound(file_name.to_string()));
        }
        Ok(())
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, UpstreamError> {
    patterns
        .iter()
        .map(|raw| {
            Regex::new(raw).map_err(|e| {
                UpstreamError::invalid(
                    UpstreamKind::BackupArchive,
                    format!("invalid log pattern '{raw}': {e}"),
                )
            })
        })
        .collect()
}
