use async_trait::async_trait;
use camino::Utf8Path;

use crate::models::UpstreamKind;
use crate::recycle::RecycleBin;
use crate::upstream::{Upstream, UpstreamError};

/// Placeholder for an upstream that failed startup validation.
///
/// Remembers which concrete kind it was meant to be and why validation
/// failed, so status commands can report it. Extraction always fails fast
/// with the cached reason; the source is never re-validated.
pub struct InvalidUpstream {
    name: String,
    intended: UpstreamKind,
    reason: String,
}

impl InvalidUpstream {
    pub fn new(name: &str, intended: UpstreamKind, error: &UpstreamError) -> Self {
        Self {
            name: name.to_string(),
            intended,
            reason: error.to_string(),
        }
    }

    /// The kind this upstream failed to become.
    pub fn intended_kind(&self) -> UpstreamKind {
        self.intended
    }

    /// Human-readable description of the validation failure.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[async_trait]
impl Upstream for InvalidUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "invalid"
    }

    async fn extract_file(
        &self,
        _file_name: &Utf8Path,
        _target_world_dir: &Utf8Path,
        _bin: &RecycleBin,
    ) -> Result<(), UpstreamError> {
        Err(UpstreamError::ArchiveInvalid {
            intended: self.intended.as_str().to_string(),
            reason: self.reason.clone(),
        })
    }
}
