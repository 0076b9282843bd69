use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};

use crate::models::UpstreamKind;
use crate::recycle::RecycleBin;
use crate::upstream::{Upstream, UpstreamError};

/// An upstream that is simply another world directory on disk.
///
/// Extraction is a plain copy of `<path>/<world_name>/<file>` into the
/// destination world, with the overwritten destination file recycled first.
#[derive(Debug)]
pub struct WorldSaveUpstream {
    name: String,
    path: Utf8PathBuf,
    world_name: String,
}

impl WorldSaveUpstream {
    pub fn new(
        name: &str,
        path: &Utf8Path,
        world_name: &str,
    ) -> Result<Self, UpstreamError> {
        if !path.is_dir() {
            return Err(UpstreamError::invalid(
                UpstreamKind::WorldSave,
                format!("'{path}' is not a directory"),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            world_name: world_name.to_string(),
        })
    }
}

#[async_trait]
impl Upstream for WorldSaveUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        UpstreamKind::WorldSave.as_str()
    }

    async fn extract_file(
        &self,
        file_name: &Utf8Path,
        target_world_dir: &Utf8Path,
        bin: &RecycleBin,
    ) -> Result<(), UpstreamError> {
        let source = self.path.join(&self.world_name).join(file_name);
        if !source.exists() {
            return Err(UpstreamError::FileNotFound(file_name.to_string()));
        }
        let target = target_world_dir.join(file_name);
        bin.copy(&source, &target, true)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Utf8PathBuf, WorldSaveUpstream, RecycleBin) {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("save/world/region")).unwrap();
        let upstream = WorldSaveUpstream::new("qb", &root.join("save"), "world").unwrap();
        let bin = RecycleBin::new(root.join("bin")).unwrap();
        (temp, root, upstream, bin)
    }

    #[test]
    fn test_missing_source_dir_is_invalid() {
        let err = WorldSaveUpstream::new("qb", Utf8Path::new("/no/such/dir"), "world").unwrap_err();
        assert!(matches!(err, UpstreamError::ArchiveInvalid { .. }));
    }

    #[tokio::test]
    async fn test_extract_copies_file() {
        let (_temp, root, upstream, bin) = setup();
        fs::write(root.join("save/world/region/r.0.0.mca"), b"fresh").unwrap();
        let dest = root.join("dest");

        upstream
            .extract_file(Utf8Path::new("region/r.0.0.mca"), &dest, &bin)
            .await
            .unwrap();
        assert_eq!(fs::read(dest.join("region/r.0.0.mca")).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_extract_recycles_existing_destination() {
        let (_temp, root, upstream, bin) = setup();
        fs::write(root.join("save/world/region/r.0.0.mca"), b"fresh").unwrap();
        let dest = root.join("dest");
        fs::create_dir_all(dest.join("region")).unwrap();
        fs::write(dest.join("region/r.0.0.mca"), b"stale").unwrap();

        upstream
            .extract_file(Utf8Path::new("region/r.0.0.mca"), &dest, &bin)
            .await
            .unwrap();
        assert_eq!(fs::read(dest.join("region/r.0.0.mca")).unwrap(), b"fresh");

        // The stale file must be recoverable
        assert_eq!(bin.restore_all(true), 1);
        assert_eq!(fs::read(dest.join("region/r.0.0.mca")).unwrap(), b"stale");
    }

    #[tokio::test]
    async fn test_extract_missing_file() {
        let (_temp, root, upstream, bin) = setup();
        let err = upstream
            .extract_file(Utf8Path::new("region/r.9.9.mca"), &root.join("dest"), &bin)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::FileNotFound(f) if f == "region/r.9.9.mca"));
    }
}
