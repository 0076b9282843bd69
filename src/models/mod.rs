//! Data models for the update engine.
//!
//! - [`Region`]: the immutable (x, z, dimension) identity a pending update is
//!   keyed by, and its resolution to on-disk file paths
//! - [`Config`] and friends: the YAML configuration document describing
//!   paths, upstreams, protocol timings and the extraction tool
//!
//! Config structs all derive `Serialize`/`Deserialize` with per-field
//! defaults, so a partial document loads cleanly. [`Region`] derives
//! `Eq`/`Hash` over all of its fields and is never mutated after
//! construction.

pub mod config;
pub mod region;

pub use config::{
    BackupToolConfig, Config, PathsConfig, RegionProtectionConfig, UpdateOperationConfig,
    UpstreamEntry, UpstreamKind,
};
pub use region::{Region, UnknownDimension};
