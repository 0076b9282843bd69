use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Record of the most recent completed update session, successful or not.
///
/// Field names are part of the on-disk contract; the file is a single JSON
/// object overwritten on every session completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub player: Option<String>,
    /// Seconds since the epoch, fractional.
    pub timestamp: f64,
    pub is_last_operation_succeeded: bool,
    pub upstream_name: String,
    /// Relative file path -> the actor who queued the region it belongs to.
    pub last_operation_mca: IndexMap<String, Option<String>>,
}

/// Persistence for the single retained [`HistoryRecord`].
pub struct History {
    path: Utf8PathBuf,
    data: Mutex<Option<HistoryRecord>>,
}

impl History {
    /// Open the history store, loading whatever record exists. A missing or
    /// unreadable file just means an empty history.
    pub fn load(path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();
        let data = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok());
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().unwrap().is_none()
    }

    pub fn data(&self) -> Option<HistoryRecord> {
        self.data.lock().unwrap().clone()
    }

    /// Append (by overwrite) the record of a completed session. Returns
    /// whether the record made it to disk; failures are logged, not raised,
    /// so a broken history file never fails a session.
    pub fn record(
        &self,
        player: Option<String>,
        is_last_operation_succeeded: bool,
        last_operation_mca: IndexMap<String, Option<String>>,
        upstream_name: &str,
    ) -> bool {
        let record = HistoryRecord {
            player,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64(),
            is_last_operation_succeeded,
            upstream_name: upstream_name.to_string(),
            last_operation_mca,
        };

        let mut data = self.data.lock().unwrap();
        let serialized = match serde_json::to_string_pretty(&record) {
            Ok(serialized) => serialized,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize history record");
                return false;
            }
        };
        if let Err(e) = fs::write(&self.path, serialized) {
            tracing::error!(path = %self.path, error = %e, "failed to write history record");
            return false;
        }
        *data = Some(record);
        true
    }
}
