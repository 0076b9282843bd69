use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::config::PathsConfig;

/// Side length of a region in blocks.
const REGION_SIZE: i32 = 512;

/// No path template list is configured for a region's dimension.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no region path template configured for dimension '{0}'")]
pub struct UnknownDimension(pub String);

/// Identity of one region: a coordinate bucket plus the dimension it lives in.
///
/// Regions are plain immutable values. Equality and hashing cover all three
/// fields, so two regions with the same coordinates in different dimensions
/// are distinct entries in the pending set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub z: i32,
    pub dim: String,
}

impl Region {
    pub fn new(x: i32, z: i32, dim: impl Into<String>) -> Self {
        Self {
            x,
            z,
            dim: dim.into(),
        }
    }

    /// Bucket a player's block position into the region containing it.
    ///
    /// Coordinates are truncated to blocks first, then floor-divided so that
    /// negative positions land in the correct region (block -1 is in region -1,
    /// not region 0).
    pub fn from_player_coordinates(x: f64, z: f64, dim: impl Into<String>) -> Self {
        Self::new(
            (x.trunc() as i32).div_euclid(REGION_SIZE),
            (z.trunc() as i32).div_euclid(REGION_SIZE),
            dim,
        )
    }

    /// The bare region file name, e.g. `r.1.-2.mca`.
    pub fn file_name(&self) -> String {
        format!("r.{}.{}.mca", self.x, self.z)
    }

    /// Resolve every relative file path this region maps to, in the order the
    /// dimension's template list declares them.
    pub fn file_list(&self, paths: &PathsConfig) -> Result<Vec<Utf8PathBuf>, UnknownDimension> {
        let templates = paths
            .dimension_region_files
            .get(&self.dim)
            .ok_or_else(|| UnknownDimension(self.dim.clone()))?;
        Ok(templates
            .iter()
            .map(|template| {
                Utf8PathBuf::from(
                    template
                        .replace("{x}", &self.x.to_string())
                        .replace("{z}", &self.z.to_string())
                        .replace("{dim}", &self.dim),
                )
            })
            .collect())
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}) @ {}", self.x, self.z, self.dim)
    }
}
