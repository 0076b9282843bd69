//! Crash-safe file replacement.
//!
//! Every file the engine is about to overwrite or delete is first moved into
//! a slot inside the recycle bin: a numbered directory holding the payload
//! under a fixed name plus a JSON metadata sidecar recording where the file
//! came from and when it was recycled. As long as the slot survives, the
//! original file can be put back, which is what gives an update session its
//! transactional rollback without a real filesystem transaction.
//!
//! On-disk layout:
//!
//! ```text
//! <bin>/
//!   0/
//!     slot.json      {"original_file_path": "...", "delete_time": 1722950000.0}
//!     payload        (file or directory, the recycled content)
//!   1/
//!     ...
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Fixed name of the metadata sidecar inside a slot directory.
pub const SLOT_META_FILE: &str = "slot.json";

/// Fixed name of the recycled payload inside a slot directory.
pub const SLOT_PAYLOAD_FILE: &str = "payload";

/// Errors from recycle-bin operations.
#[derive(Error, Debug)]
pub enum RecycleError {
    #[error("file not found: {0}")]
    FileNotFound(Utf8PathBuf),

    #[error("slot metadata unreadable at {0}: {1}")]
    MetadataCorrupt(Utf8PathBuf, String),

    #[error("failed to save slot metadata to {0}")]
    MetaSavingFailed(Utf8PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Metadata sidecar written next to every recycled payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotMetadata {
    pub original_file_path: String,
    /// Seconds since the epoch, fractional.
    pub delete_time: f64,
}

/// Handle to one recycle-bin slot.
///
/// A slot is *available* only while its metadata still parses and its payload
/// still exists; restoring it consumes the slot.
#[derive(Debug, Clone)]
pub struct RecycledSlot {
    slot_path: Utf8PathBuf,
    meta: SlotMetadata,
}

impl RecycledSlot {
    /// Load a slot from its directory, failing on unreadable metadata.
    fn load(slot_path: Utf8PathBuf) -> Result<Self, RecycleError> {
        let meta_path = slot_path.join(SLOT_META_FILE);
        let raw = fs::read_to_string(&meta_path)
            .map_err(|e| RecycleError::MetadataCorrupt(meta_path.clone(), e.to_string()))?;
        let meta: SlotMetadata = serde_json::from_str(&raw)
            .map_err(|e| RecycleError::MetadataCorrupt(meta_path, e.to_string()))?;
        Ok(Self { slot_path, meta })
    }

    pub fn slot_path(&self) -> &Utf8Path {
        &self.slot_path
    }

    pub fn payload_path(&self) -> Utf8PathBuf {
        self.slot_path.join(SLOT_PAYLOAD_FILE)
    }

    pub fn meta_path(&self) -> Utf8PathBuf {
        self.slot_path.join(SLOT_META_FILE)
    }

    pub fn original_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.meta.original_file_path)
    }

    pub fn delete_time(&self) -> f64 {
        self.meta.delete_time
    }

    /// Whether this slot can still be restored.
    pub fn is_available(&self) -> bool {
        self.meta_path().is_file() && self.payload_path().exists()
    }

    /// Numeric index parsed from the slot directory name; used as a
    /// tie-breaker when two slots share a delete time.
    fn index(&self) -> u64 {
        self.slot_path
            .file_name()
            .and_then(|name| name.parse().ok())
            .unwrap_or(0)
    }
}

/// The recycle bin: a directory of numbered slots plus the lock that
/// serializes every operation touching them.
///
/// All destructive filesystem writes the engine performs go through the
/// [`copy`](Self::copy) / [`move_file`](Self::move_file) / [`recycle`]
/// (Self::recycle) helpers here, so each of them has a matching restore path.
pub struct RecycleBin {
    path: Utf8PathBuf,
    /// Next slot number to try; also serves as the operation lock.
    counter: Mutex<u64>,
}

impl RecycleBin {
    /// Open (and create if needed) a recycle bin rooted at `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Result<Self, RecycleError> {
        let path = path.into();
        ensure_dir(&path)?;
        Ok(Self {
            path,
            counter: Mutex::new(0),
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Move `target` into a fresh slot, returning the handle for a later
    /// [`restore`](Self::restore).
    pub fn recycle(&self, target: &Utf8Path) -> Result<RecycledSlot, RecycleError> {
        let mut counter = self.counter.lock().unwrap();
        self.recycle_locked(&mut counter, target)
    }

    fn recycle_locked(
        &self,
        counter: &mut u64,
        target: &Utf8Path,
    ) -> Result<RecycledSlot, RecycleError> {
        if !target.exists() {
            return Err(RecycleError::FileNotFound(target.to_path_buf()));
        }
        let slot_path = self.allocate_slot_locked(counter)?;
        let payload = slot_path.join(SLOT_PAYLOAD_FILE);
        copy_any(target, &payload)?;
        delete_any(target)?;

        let meta = SlotMetadata {
            original_file_path: target.to_string(),
            delete_time: epoch_now(),
        };
        let meta_path = slot_path.join(SLOT_META_FILE);
        let serialized = serde_json::to_string_pretty(&meta)
            .map_err(|_| RecycleError::MetaSavingFailed(meta_path.clone()))?;
        fs::write(&meta_path, serialized)
            .map_err(|_| RecycleError::MetaSavingFailed(meta_path.clone()))?;

        tracing::debug!(file = %target, slot = %slot_path, "recycled file");
        Ok(RecycledSlot { slot_path, meta })
    }

    /// Find the next unused numbered directory and create it.
    fn allocate_slot_locked(&self, counter: &mut u64) -> Result<Utf8PathBuf, RecycleError> {
        loop {
            let candidate = self.path.join(counter.to_string());
            *counter += 1;
            if !candidate.exists() {
                fs::create_dir_all(&candidate)?;
                return Ok(candidate);
            }
        }
    }

    /// Put a recycled payload back where it came from, replacing anything
    /// currently at the original path. Consumes the slot on success.
    pub fn restore(&self, slot: &RecycledSlot) -> Result<(), RecycleError> {
        let _counter = self.counter.lock().unwrap();
        Self::restore_locked(slot)
    }

    fn restore_locked(slot: &RecycledSlot) -> Result<(), RecycleError> {
        if !slot.is_available() {
            return Err(RecycleError::FileNotFound(slot.payload_path()));
        }
        let original = slot.original_path();
        delete_any(&original)?;
        if let Some(parent) = original.parent() {
            fs::create_dir_all(parent)?;
        }
        copy_any(&slot.payload_path(), &original)?;
        delete_any(slot.slot_path())?;
        tracing::debug!(original = %original, "restored recycled file");
        Ok(())
    }

    /// List every available slot, sorted by delete time (slot number breaks
    /// ties). Slots with unreadable metadata are skipped.
    pub fn slots(&self, newest_first: bool) -> Result<Vec<RecycledSlot>, RecycleError> {
        let _counter = self.counter.lock().unwrap();
        self.slots_locked(newest_first)
    }

    fn slots_locked(&self, newest_first: bool) -> Result<Vec<RecycledSlot>, RecycleError> {
        let mut slots = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let Ok(slot_path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            if !slot_path.is_dir() {
                continue;
            }
            match RecycledSlot::load(slot_path) {
                Ok(slot) if slot.is_available() => slots.push(slot),
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "skipping unreadable recycle slot"),
            }
        }
        slots.sort_by(|a, b| {
            a.delete_time()
                .partial_cmp(&b.delete_time())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.index().cmp(&b.index()))
        });
        if newest_first {
            slots.reverse();
        }
        Ok(slots)
    }

    /// Best-effort restore of every available slot. Per-slot failures are
    /// logged and skipped so one bad slot cannot block the rest. Returns how
    /// many slots were actually restored.
    pub fn restore_all(&self, newest_first: bool) -> usize {
        let _counter = self.counter.lock().unwrap();
        self.restore_all_locked(newest_first)
    }

    fn restore_all_locked(&self, newest_first: bool) -> usize {
        let slots = match self.slots_locked(newest_first) {
            Ok(slots) => slots,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list recycle slots for restore");
                return 0;
            }
        };
        let mut restored = 0;
        for slot in &slots {
            match Self::restore_locked(slot) {
                Ok(()) => restored += 1,
                Err(e) => {
                    tracing::warn!(slot = %slot.slot_path(), error = %e, "failed to restore slot")
                }
            }
        }
        restored
    }

    /// Copy `source` to `target`. An existing target is recycled first
    /// (or plainly deleted when `recycle_overwritten` is false).
    pub fn copy(
        &self,
        source: &Utf8Path,
        target: &Utf8Path,
        recycle_overwritten: bool,
    ) -> Result<(), RecycleError> {
        let mut counter = self.counter.lock().unwrap();
        self.copy_locked(&mut counter, source, target, recycle_overwritten)
    }

    fn copy_locked(
        &self,
        counter: &mut u64,
        source: &Utf8Path,
        target: &Utf8Path,
        recycle_overwritten: bool,
    ) -> Result<(), RecycleError> {
        if !source.exists() {
            return Err(RecycleError::FileNotFound(source.to_path_buf()));
        }
        if target.exists() {
            if recycle_overwritten {
                self.recycle_locked(counter, target)?;
            } else {
                delete_any(target)?;
            }
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        copy_any(source, target)?;
        Ok(())
    }

    /// Like [`copy`](Self::copy) but removes the source afterwards.
    pub fn move_file(
        &self,
        source: &Utf8Path,
        target: &Utf8Path,
        recycle_overwritten: bool,
    ) -> Result<(), RecycleError> {
        let mut counter = self.counter.lock().unwrap();
        self.copy_locked(&mut counter, source, target, recycle_overwritten)?;
        delete_any(source)?;
        Ok(())
    }

    /// Start a protected operation: the bin is emptied and recreated so that
    /// every slot existing afterwards belongs to this operation.
    pub fn begin(&self) -> Result<(), RecycleError> {
        let mut counter = self.counter.lock().unwrap();
        self.empty_locked(&mut counter)
    }

    /// Finish a successful operation, discarding the slots it created.
    pub fn commit(&self) -> Result<(), RecycleError> {
        let mut counter = self.counter.lock().unwrap();
        self.empty_locked(&mut counter)
    }

    /// Finish a failed operation: restore every slot created since
    /// [`begin`](Self::begin) in reverse creation order, then empty the bin.
    /// Returns how many slots were restored.
    pub fn roll_back(&self) -> usize {
        let mut counter = self.counter.lock().unwrap();
        let restored = self.restore_all_locked(true);
        if let Err(e) = self.empty_locked(&mut counter) {
            tracing::warn!(error = %e, "failed to empty recycle bin after rollback");
        }
        restored
    }

    fn empty_locked(&self, counter: &mut u64) -> Result<(), RecycleError> {
        delete_any(&self.path)?;
        fs::create_dir_all(&self.path)?;
        *counter = 0;
        Ok(())
    }
}

/// Remove a file or directory, tolerating it being absent.
pub fn delete_any(target: &Utf8Path) -> Result<(), RecycleError> {
    if target.is_dir() {
        fs::remove_dir_all(target)?;
    } else if target.exists() {
        fs::remove_file(target)?;
    }
    Ok(())
}

/// Create `path` as a directory, replacing a plain file squatting there.
pub fn ensure_dir(path: &Utf8Path) -> Result<(), RecycleError> {
    if path.is_file() {
        fs::remove_file(path)?;
    }
    if !path.is_dir() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

fn copy_any(source: &Utf8Path, target: &Utf8Path) -> Result<(), RecycleError> {
    if source.is_dir() {
        copy_dir_recursive(source, target)?;
    } else {
        fs::copy(source, target)?;
    }
    Ok(())
}

fn copy_dir_recursive(source: &Utf8Path, target: &Utf8Path) -> Result<(), RecycleError> {
    fs::create_dir_all(target)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let Ok(entry_path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            continue;
        };
        let Some(name) = entry_path.file_name() else {
            continue;
        };
        copy_any(&entry_path, &target.join(name))?;
    }
    Ok(())
}

fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_bin() -> (RecycleBin, TempDir, Utf8PathBuf) {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let bin = RecycleBin::new(root.join("bin")).unwrap();
        (bin, temp, root)
    }

    #[test]
    fn test_recycle_and_restore_round_trip() {
        let (bin, _temp, root) = new_bin();
        let file = root.join("victim.mca");
        fs::write(&file, b"region bytes").unwrap();

        let slot = bin.recycle(&file).unwrap();
        assert!(!file.exists());
        assert!(slot.is_available());

        bin.restore(&slot).unwrap();
        assert_eq!(fs::read(&file).unwrap(), b"region bytes");
        assert!(!slot.is_available());
        assert!(bin.slots(false).unwrap().is_empty());
    }

    #[test]
    fn test_recycle_missing_file_fails() {
        let (bin, _temp, root) = new_bin();
        let err = bin.recycle(&root.join("ghost")).unwrap_err();
        assert!(matches!(err, RecycleError::FileNotFound(_)));
    }

    #[test]
    fn test_recycle_directory_payload() {
        let (bin, _temp, root) = new_bin();
        let dir = root.join("poi");
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("sub/r.0.0.mca"), b"x").unwrap();

        let slot = bin.recycle(&dir).unwrap();
        assert!(!dir.exists());

        bin.restore(&slot).unwrap();
        assert_eq!(fs::read(dir.join("sub/r.0.0.mca")).unwrap(), b"x");
    }

    #[test]
    fn test_restore_replaces_current_content() {
        let (bin, _temp, root) = new_bin();
        let file = root.join("r.0.0.mca");
        fs::write(&file, b"old").unwrap();

        let slot = bin.recycle(&file).unwrap();
        fs::write(&file, b"new").unwrap();

        bin.restore(&slot).unwrap();
        assert_eq!(fs::read(&file).unwrap(), b"old");
    }

    #[test]
    fn test_restore_all_is_idempotent() {
        let (bin, _temp, root) = new_bin();
        for i in 0..3 {
            let file = root.join(format!("f{i}"));
            fs::write(&file, format!("content {i}")).unwrap();
            bin.recycle(&file).unwrap();
        }

        assert_eq!(bin.restore_all(true), 3);
        assert_eq!(bin.restore_all(true), 0);
        for i in 0..3 {
            assert_eq!(
                fs::read(root.join(format!("f{i}"))).unwrap(),
                format!("content {i}").into_bytes()
            );
        }
    }

    #[test]
    fn test_corrupt_metadata_slot_is_skipped() {
        let (bin, _temp, root) = new_bin();
        let good = root.join("good");
        fs::write(&good, b"ok").unwrap();
        bin.recycle(&good).unwrap();

        // Hand-craft a slot with garbage metadata
        let bad_slot = bin.path().join("99");
        fs::create_dir_all(&bad_slot).unwrap();
        fs::write(bad_slot.join(SLOT_META_FILE), b"{not json").unwrap();
        fs::write(bad_slot.join(SLOT_PAYLOAD_FILE), b"junk").unwrap();

        let slots = bin.slots(false).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(bin.restore_all(false), 1);
        assert!(good.exists());
    }

    #[test]
    fn test_slot_ordering_newest_first() {
        let (bin, _temp, root) = new_bin();
        let a = root.join("a");
        let b = root.join("b");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        bin.recycle(&a).unwrap();
        bin.recycle(&b).unwrap();

        let newest_first = bin.slots(true).unwrap();
        assert_eq!(newest_first[0].original_path(), b);
        assert_eq!(newest_first[1].original_path(), a);

        let oldest_first = bin.slots(false).unwrap();
        assert_eq!(oldest_first[0].original_path(), a);
    }

    #[test]
    fn test_copy_recycles_overwritten_target() {
        let (bin, _temp, root) = new_bin();
        let src = root.join("incoming");
        let dst = root.join("existing");
        fs::write(&src, b"new content").unwrap();
        fs::write(&dst, b"old content").unwrap();

        bin.copy(&src, &dst, true).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"new content");
        assert!(src.exists());

        // The overwritten file is in the bin, not gone
        let slots = bin.slots(false).unwrap();
        assert_eq!(slots.len(), 1);
        bin.restore(&slots[0]).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"old content");
    }

    #[test]
    fn test_copy_without_recycling() {
        let (bin, _temp, root) = new_bin();
        let src = root.join("incoming");
        let dst = root.join("existing");
        fs::write(&src, b"new").unwrap();
        fs::write(&dst, b"old").unwrap();

        bin.copy(&src, &dst, false).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"new");
        assert!(bin.slots(false).unwrap().is_empty());
    }

    #[test]
    fn test_move_file_removes_source() {
        let (bin, _temp, root) = new_bin();
        let src = root.join("src");
        fs::write(&src, b"payload").unwrap();

        bin.move_file(&src, &root.join("dst"), true).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(root.join("dst")).unwrap(), b"payload");
    }

    #[test]
    fn test_begin_rollback_cycle() {
        let (bin, _temp, root) = new_bin();
        let file = root.join("world.mca");
        fs::write(&file, b"before").unwrap();

        bin.begin().unwrap();
        bin.recycle(&file).unwrap();
        fs::write(&file, b"after").unwrap();

        assert_eq!(bin.roll_back(), 1);
        assert_eq!(fs::read(&file).unwrap(), b"before");
        assert!(bin.slots(false).unwrap().is_empty());
    }

    #[test]
    fn test_begin_discards_stale_slots() {
        let (bin, _temp, root) = new_bin();
        let file = root.join("stale");
        fs::write(&file, b"x").unwrap();
        bin.recycle(&file).unwrap();

        bin.begin().unwrap();
        assert!(bin.slots(false).unwrap().is_empty());
    }

    #[test]
    fn test_commit_clears_slots_without_restoring() {
        let (bin, _temp, root) = new_bin();
        let file = root.join("f");
        fs::write(&file, b"old").unwrap();

        bin.begin().unwrap();
        bin.recycle(&file).unwrap();
        fs::write(&file, b"new").unwrap();
        bin.commit().unwrap();

        assert_eq!(fs::read(&file).unwrap(), b"new");
        assert!(bin.slots(false).unwrap().is_empty());
    }
}
