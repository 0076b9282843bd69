//! Sources of replacement region files.
//!
//! An upstream hands the session the bytes for one relative file path at a
//! time. Two real kinds exist: a plain world-save directory copy
//! ([`WorldSaveUpstream`]) and an external backup archive driven through a
//! subprocess ([`BackupArchiveUpstream`]). A configured upstream that fails
//! startup validation becomes an [`InvalidUpstream`], kept around so listing
//! commands can show what is wrong with it; it never extracts anything.

pub mod archive;
pub mod invalid;
pub mod world;

pub use archive::BackupArchiveUpstream;
pub use invalid::InvalidUpstream;
pub use world::WorldSaveUpstream;

use async_trait::async_trait;
use camino::Utf8Path;
use indexmap::IndexMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

use crate::models::{Config, UpstreamKind};
use crate::recycle::{RecycleBin, RecycleError};

/// Errors from upstream validation and extraction.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("file '{0}' not found in upstream")]
    FileNotFound(String),

    #[error("extraction tool exited with code {0}")]
    ProcessError(i32),

    #[error("extraction tool did not exit within {0:?}")]
    Timeout(Duration),

    #[error("invalid upstream ({intended}): {reason}")]
    ArchiveInvalid { intended: String, reason: String },

    #[error("no upstream named '{0}' is configured")]
    UnknownName(String),

    #[error(transparent)]
    Recycle(#[from] RecycleError),

    #[error("process error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpstreamError {
    pub(crate) fn invalid(intended: UpstreamKind, reason: impl Into<String>) -> Self {
        Self::ArchiveInvalid {
            intended: intended.as_str().to_string(),
            reason: reason.into(),
        }
    }
}

/// One source of replacement files.
///
/// `extract_file` places `file_name` (a path relative to the world root)
/// under `target_world_dir`, recycling whatever was there before through
/// `bin` so a failed session can put it back.
#[async_trait]
pub trait Upstream: Send + Sync {
    fn name(&self) -> &str;

    /// A short human-readable kind tag for listing commands.
    fn kind(&self) -> &'static str;

    async fn extract_file(
        &self,
        file_name: &Utf8Path,
        target_world_dir: &Utf8Path,
        bin: &RecycleBin,
    ) -> Result<(), UpstreamError>;
}

/// All configured upstreams, built once at startup and keyed by name.
///
/// Validation failures are cached as [`InvalidUpstream`] entries instead of
/// aborting startup; selecting one later fails fast with the original
/// reason.
pub struct UpstreamRegistry {
    upstreams: IndexMap<String, Arc<dyn Upstream>>,
    current: RwLock<String>,
}

impl UpstreamRegistry {
    pub fn from_config(config: &Config) -> Self {
        let mut upstreams: IndexMap<String, Arc<dyn Upstream>> = IndexMap::new();
        for (name, entry) in &config.paths.upstreams {
            let built: Result<Arc<dyn Upstream>, UpstreamError> = match entry.kind {
                UpstreamKind::WorldSave => {
                    WorldSaveUpstream::new(name, &entry.path, &entry.world_name)
                        .map(|u| Arc::new(u) as Arc<dyn Upstream>)
                }
                UpstreamKind::BackupArchive => {
                    BackupArchiveUpstream::new(name, entry, &config.update_operation)
                        .map(|u| Arc::new(u) as Arc<dyn Upstream>)
                }
            };
            let upstream = match built {
                Ok(upstream) => {
                    tracing::info!(name, kind = entry.kind.as_str(), "registered upstream");
                    upstream
                }
                Err(error) => {
                    tracing::warn!(name, kind = entry.kind.as_str(), %error, "upstream failed validation");
                    Arc::new(InvalidUpstream::new(name, entry.kind, &error))
                }
            };
            upstreams.insert(name.clone(), upstream);
        }
        Self {
            upstreams,
            current: RwLock::new(config.paths.current_upstream.clone()),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Upstream>> {
        self.upstreams.get(name).cloned()
    }

    /// The upstream the next session will extract from, if the configured
    /// name resolves.
    pub fn current(&self) -> Option<Arc<dyn Upstream>> {
        self.get(&self.current_name())
    }

    pub fn current_name(&self) -> String {
        self.current.read().unwrap().clone()
    }

    /// Switch the active upstream. The caller is responsible for persisting
    /// the choice back to the configuration file.
    pub fn set_current(&self, name: &str) -> Result<(), UpstreamError> {
        if !self.upstreams.contains_key(name) {
            return Err(UpstreamError::UnknownName(name.to_string()));
        }
        *self.current.write().unwrap() = name.to_string();
        Ok(())
    }

    /// All upstreams sorted by name, for listing commands.
    pub fn sorted(&self) -> Vec<(String, Arc<dyn Upstream>)> {
        let mut entries: Vec<_> = self
            .upstreams
            .iter()
            .map(|(name, upstream)| (name.clone(), Arc::clone(upstream)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }
}
