use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration document loaded from `regionup.yml`.
///
/// All sections carry serde defaults so a partially-written config file still
/// deserializes into something usable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub update_operation: UpdateOperationConfig,

    #[serde(default)]
    pub region_protection: RegionProtectionConfig,
}

/// Filesystem layout: where the live world lives, where the recycle bin
/// lives, and which upstreams exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_destination_world_directory")]
    pub destination_world_directory: Utf8PathBuf,

    #[serde(default = "default_recycle_bin_directory")]
    pub recycle_bin_directory: Utf8PathBuf,

    #[serde(default = "default_current_upstream")]
    pub current_upstream: String,

    #[serde(default = "default_upstreams")]
    pub upstreams: IndexMap<String, UpstreamEntry>,

    /// Per-dimension list of relative path templates. `{x}`, `{z}` and
    /// `{dim}` are substituted from the region being resolved.
    #[serde(default = "default_dimension_region_files")]
    pub dimension_region_files: IndexMap<String, Vec<String>>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            destination_world_directory: default_destination_world_directory(),
            recycle_bin_directory: default_recycle_bin_directory(),
            current_upstream: default_current_upstream(),
            upstreams: default_upstreams(),
            dimension_region_files: default_dimension_region_files(),
        }
    }
}

/// One configured source of replacement region files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamEntry {
    pub kind: UpstreamKind,
    pub path: Utf8PathBuf,

    #[serde(default = "default_world_name")]
    pub world_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamKind {
    WorldSave,
    BackupArchive,
}

impl UpstreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UpstreamKind::WorldSave => "world_save",
            UpstreamKind::BackupArchive => "backup_archive",
        }
    }
}

/// Everything about how one update session behaves: the confirm/countdown
/// protocol timings, the extraction tool invocation, and how its log output
/// is parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOperationConfig {
    #[serde(default = "default_true")]
    pub update_requires_confirm: bool,

    #[serde(default = "default_confirm_time_wait_secs")]
    pub confirm_time_wait_secs: u64,

    #[serde(default = "default_update_delay_secs")]
    pub update_delay_secs: u64,

    /// When true, an upstream missing one of a region's files is logged and
    /// skipped instead of failing the whole session.
    #[serde(default = "default_true")]
    pub treat_missing_as_skip: bool,

    #[serde(default)]
    pub backup_tool: BackupToolConfig,

    /// Ordered regex list applied to each extraction tool log line; the first
    /// pattern with a `message` capture wins.
    #[serde(default = "default_log_formats")]
    pub log_formats: Vec<String>,

    /// Ordered regex list applied to an extracted `message` to recognise the
    /// tool reporting a missing file; must capture `file_name` and may
    /// capture `backup_id`.
    #[serde(default = "default_file_not_found_formats")]
    pub file_not_found_formats: Vec<String>,

    #[serde(default = "default_process_wait_timeout_secs")]
    pub process_wait_timeout_secs: u64,
}

impl Default for UpdateOperationConfig {
    fn default() -> Self {
        Self {
            update_requires_confirm: true,
            confirm_time_wait_secs: default_confirm_time_wait_secs(),
            update_delay_secs: default_update_delay_secs(),
            treat_missing_as_skip: true,
            backup_tool: BackupToolConfig::default(),
            log_formats: default_log_formats(),
            file_not_found_formats: default_file_not_found_formats(),
            process_wait_timeout_secs: default_process_wait_timeout_secs(),
        }
    }
}

impl UpdateOperationConfig {
    pub fn confirm_time_wait(&self) -> Duration {
        Duration::from_secs(self.confirm_time_wait_secs)
    }

    pub fn update_delay(&self) -> Duration {
        Duration::from_secs(self.update_delay_secs)
    }

    pub fn process_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.process_wait_timeout_secs)
    }
}

/// How to invoke and validate the external backup extraction tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupToolConfig {
    /// Executable used to run the tool (interpreter or the tool itself).
    #[serde(default = "default_tool_command")]
    pub command: String,

    /// Optional tool package passed as the first argument. When set it must
    /// be a zip container carrying a `manifest.json` identifying the tool.
    #[serde(default)]
    pub package_path: Option<Utf8PathBuf>,

    #[serde(default = "default_tool_id")]
    pub tool_id: String,

    #[serde(default = "default_tool_min_version")]
    pub min_version: String,
}

impl Default for BackupToolConfig {
    fn default() -> Self {
        Self {
            command: default_tool_command(),
            package_path: None,
            tool_id: default_tool_id(),
            min_version: default_tool_min_version(),
        }
    }
}

/// Group permission checking switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionProtectionConfig {
    #[serde(default = "default_true")]
    pub enable_group_update_permission_check: bool,

    #[serde(default = "default_true")]
    pub check_add_groups: bool,

    #[serde(default)]
    pub check_del_operations: bool,
}

impl Default for RegionProtectionConfig {
    fn default() -> Self {
        Self {
            enable_group_update_permission_check: true,
            check_add_groups: true,
            check_del_operations: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_destination_world_directory() -> Utf8PathBuf {
    Utf8PathBuf::from("./server/world")
}

fn default_recycle_bin_directory() -> Utf8PathBuf {
    Utf8PathBuf::from("./recycle_bin")
}

fn default_current_upstream() -> String {
    "survival_pb".to_string()
}

fn default_world_name() -> String {
    "world".to_string()
}

fn default_upstreams() -> IndexMap<String, UpstreamEntry> {
    let mut upstreams = IndexMap::new();
    upstreams.insert(
        "survival_pb".to_string(),
        UpstreamEntry {
            kind: UpstreamKind::BackupArchive,
            path: Utf8PathBuf::from("../survival/pb_files/prime_backup.db"),
            world_name: default_world_name(),
        },
    );
    upstreams.insert(
        "survival_qb".to_string(),
        UpstreamEntry {
            kind: UpstreamKind::WorldSave,
            path: Utf8PathBuf::from("../survival/qb_multi/slot1"),
            world_name: default_world_name(),
        },
    );
    upstreams
}

fn default_dimension_region_files() -> IndexMap<String, Vec<String>> {
    let overworld = vec![
        "region/r.{x}.{z}.mca".to_string(),
        "poi/r.{x}.{z}.mca".to_string(),
        "entities/r.{x}.{z}.mca".to_string(),
    ];
    let with_dim_prefix = vec![
        "DIM{dim}/region/r.{x}.{z}.mca".to_string(),
        "DIM{dim}/poi/r.{x}.{z}.mca".to_string(),
        "DIM{dim}/entities/r.{x}.{z}.mca".to_string(),
    ];

    let mut map = IndexMap::new();
    map.insert("-1".to_string(), with_dim_prefix.clone());
    map.insert("0".to_string(), overworld);
    map.insert("1".to_string(), with_dim_prefix);
    map
}

fn default_tool_command() -> String {
    "python3".to_string()
}

fn default_tool_id() -> String {
    "prime_backup".to_string()
}

fn default_tool_min_version() -> String {
    "1.7.0".to_string()
}

fn default_confirm_time_wait_secs() -> u64 {
    60
}

fn default_update_delay_secs() -> u64 {
    10
}

fn default_log_formats() -> Vec<String> {
    vec![r"^\[[^\]]+ (?P<level>[A-Z]+)\] (?P<message>.*)$".to_string()]
}

fn default_file_not_found_formats() -> Vec<String> {
    vec![r"^File '(?P<file_name>.+)' in backup #(?P<backup_id>\d+) does not exist$".to_string()]
}

fn default_process_wait_timeout_secs() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert!(config.update_operation.update_requires_confirm);
        assert_eq!(config.update_operation.confirm_time_wait_secs, 60);
        assert_eq!(config.update_operation.update_delay_secs, 10);
        assert_eq!(config.paths.current_upstream, "survival_pb");
        assert_eq!(config.paths.upstreams.len(), 2);
        assert!(config.region_protection.enable_group_update_permission_check);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let yaml = r#"
update_operation:
  update_delay_secs: 3
"#;
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.update_operation.update_delay_secs, 3);
        // Untouched fields still carry defaults
        assert_eq!(config.update_operation.confirm_time_wait_secs, 60);
        assert_eq!(
            config.paths.destination_world_directory,
            Utf8PathBuf::from("./server/world")
        );
    }

    #[test]
    fn test_upstream_kind_round_trip() {
        let yaml = "kind: backup_archive\npath: /tmp/a.db\n";
        let entry: UpstreamEntry = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(entry.kind, UpstreamKind::BackupArchive);
        assert_eq!(entry.world_name, "world");

        let out = serde_yaml_ng::to_string(&entry).unwrap();
        assert!(out.contains("backup_archive"));
    }

    #[test]
    fn test_duration_accessors() {
        let config = UpdateOperationConfig::default();
        assert_eq!(config.confirm_time_wait(), Duration::from_secs(60));
        assert_eq!(config.update_delay(), Duration::from_secs(10));
        assert_eq!(config.process_wait_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_default_not_found_format_matches_tool_output() {
        let re = regex::Regex::new(&default_file_not_found_formats()[0]).unwrap();
        let caps = re
            .captures("File 'world/level.dat' in backup #4 does not exist")
            .unwrap();
        assert_eq!(&caps["file_name"], "world/level.dat");
        assert_eq!(&caps["backup_id"], "4");
    }
}
