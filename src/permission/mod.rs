//! Group-based update permissions.
//!
//! Regions can be listed in named groups; each group assigns a permission
//! level per player (with a group-wide default), and a region may only be
//! included in an update when no group containing it denies the acting
//! player. The console actor (`None`) always resolves to admin.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Mutex;
use thiserror::Error;

use camino::{Utf8Path, Utf8PathBuf};

use crate::models::{Region, RegionProtectionConfig};

/// A closed set of per-group permission levels.
///
/// Each level is a pair of capabilities: whether the holder administrates
/// the group and whether the holder may include its regions in updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPermission {
    Admin,
    #[default]
    User,
    Denied,
}

impl GroupPermission {
    pub fn is_admin(self) -> bool {
        matches!(self, GroupPermission::Admin)
    }

    pub fn is_update_allowed(self) -> bool {
        !matches!(self, GroupPermission::Denied)
    }
}

/// Effective update permission for a resolved level, honouring the global
/// kill switch for group checks.
pub fn effective_update_allowed(permission: GroupPermission, check_enabled: bool) -> bool {
    permission.is_update_allowed() || !check_enabled
}

/// Serialized form of one group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupFileData {
    pub name: String,

    #[serde(default)]
    pub regions: Vec<Region>,

    #[serde(default)]
    pub default_permission: GroupPermission,

    #[serde(default)]
    pub player_permission: IndexMap<String, GroupPermission>,
}

impl GroupFileData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn contains(&self, region: &Region) -> bool {
        self.regions.contains(region)
    }

    /// Resolve a player's level: explicit override first, else the group
    /// default. The console actor resolves to admin.
    pub fn resolve_permission(&self, actor: Option<&str>) -> GroupPermission {
        match actor {
            None => GroupPermission::Admin,
            Some(player) => self
                .player_permission
                .get(player)
                .copied()
                .unwrap_or(self.default_permission),
        }
    }
}

/// A region add/remove was blocked by one or more groups.
#[derive(Debug, Clone, Error)]
#[error("region update denied by group(s): {}", groups.join(", "))]
pub struct PermissionDenied {
    pub groups: Vec<String>,
}

#[derive(Error, Debug)]
pub enum GroupStorageError {
    #[error("group '{0}' already exists")]
    AlreadyExists(String),

    #[error("group '{0}' not found")]
    NotFound(String),

    #[error("failed to (de)serialize group file: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// JSON-file-backed group storage plus the permission checks built on it.
///
/// Constructed with the protection config it answers under; there is no
/// global configuration access.
pub struct GroupManager {
    path: Utf8PathBuf,
    protection: RegionProtectionConfig,
    groups: Mutex<IndexMap<String, GroupFileData>>,
}

impl GroupManager {
    /// Load groups from `path`, creating an empty file when none exists. A
    /// corrupt file is logged and replaced with an empty store.
    pub fn load(
        path: impl Into<Utf8PathBuf>,
        protection: RegionProtectionConfig,
    ) -> Result<Self, GroupStorageError> {
        let path = path.into();
        let manager = Self {
            path,
            protection,
            groups: Mutex::new(IndexMap::new()),
        };

        match fs::read_to_string(&manager.path) {
            Ok(raw) => match serde_json::from_str::<Vec<GroupFileData>>(&raw) {
                Ok(list) => {
                    let mut groups = manager.groups.lock().unwrap();
                    for data in list {
                        groups.insert(data.name.clone(), data);
                    }
                }
                Err(e) => {
                    tracing::error!(path = %manager.path, error = %e, "loading group file failed");
                    manager.save()?;
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                manager.save()?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(manager)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Persist the whole store.
    pub fn save(&self) -> Result<(), GroupStorageError> {
        let groups = self.groups.lock().unwrap();
        let list: Vec<&GroupFileData> = groups.values().collect();
        let serialized = serde_json::to_string_pretty(&list)?;
        fs::write(&self.path, serialized)?;
        tracing::debug!(path = %self.path, count = list.len(), "saved group file");
        Ok(())
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.lock().unwrap().keys().cloned().collect()
    }

    pub fn get_group(&self, name: &str) -> Option<GroupFileData> {
        self.groups.lock().unwrap().get(name).cloned()
    }

    pub fn create_group(&self, name: &str) -> Result<(), GroupStorageError> {
        {
            let mut groups = self.groups.lock().unwrap();
            if groups.contains_key(name) {
                return Err(GroupStorageError::AlreadyExists(name.to_string()));
            }
            groups.insert(name.to_string(), GroupFileData::new(name));
        }
        self.save()
    }

    pub fn delete_group(&self, name: &str) -> Result<GroupFileData, GroupStorageError> {
        let removed = {
            let mut groups = self.groups.lock().unwrap();
            groups
                .shift_remove(name)
                .ok_or_else(|| GroupStorageError::NotFound(name.to_string()))?
        };
        self.save()?;
        Ok(removed)
    }

    /// Mutate one group in place and persist. Returns the mutation's result.
    pub fn apply<R>(
        &self,
        name: &str,
        mutate: impl FnOnce(&mut GroupFileData) -> R,
    ) -> Result<R, GroupStorageError> {
        let result = {
            let mut groups = self.groups.lock().unwrap();
            let group = groups
                .get_mut(name)
                .ok_or_else(|| GroupStorageError::NotFound(name.to_string()))?;
            mutate(group)
        };
        self.save()?;
        Ok(result)
    }

    /// Evaluate a prospective change without committing it: the group data is
    /// cloned, `mutate` is applied to the copy, and `eval` judges the result.
    /// Live state is untouched; call [`apply`](Self::apply) to commit.
    pub fn preview<R>(
        &self,
        name: &str,
        mutate: impl FnOnce(&mut GroupFileData),
        eval: impl FnOnce(&GroupFileData) -> R,
    ) -> Result<R, GroupStorageError> {
        let groups = self.groups.lock().unwrap();
        let group = groups
            .get(name)
            .ok_or_else(|| GroupStorageError::NotFound(name.to_string()))?;
        let mut snapshot = group.clone();
        mutate(&mut snapshot);
        Ok(eval(&snapshot))
    }

    pub fn add_region_to_group(
        &self,
        name: &str,
        region: Region,
    ) -> Result<bool, GroupStorageError> {
        self.apply(name, |group| {
            if group.contains(&region) {
                false
            } else {
                group.regions.push(region);
                true
            }
        })
    }

    pub fn remove_region_from_group(
        &self,
        name: &str,
        region: &Region,
    ) -> Result<bool, GroupStorageError> {
        self.apply(name, |group| {
            let before = group.regions.len();
            group.regions.retain(|r| r != region);
            group.regions.len() != before
        })
    }

    pub fn set_player_permission(
        &self,
        name: &str,
        player: &str,
        permission: GroupPermission,
    ) -> Result<(), GroupStorageError> {
        self.apply(name, |group| {
            group
                .player_permission
                .insert(player.to_string(), permission);
        })
    }

    pub fn remove_player_permission(
        &self,
        name: &str,
        player: &str,
    ) -> Result<bool, GroupStorageError> {
        self.apply(name, |group| {
            group.player_permission.shift_remove(player).is_some()
        })
    }

    pub fn set_default_permission(
        &self,
        name: &str,
        permission: GroupPermission,
    ) -> Result<(), GroupStorageError> {
        self.apply(name, |group| {
            group.default_permission = permission;
        })
    }

    /// Every group listing `region`.
    pub fn groups_containing(&self, region: &Region) -> Vec<GroupFileData> {
        self.groups
            .lock()
            .unwrap()
            .values()
            .filter(|group| group.contains(region))
            .cloned()
            .collect()
    }

    pub fn is_region_included(&self, region: &Region) -> bool {
        !self.groups_containing(region).is_empty()
    }

    /// Groups containing `region` that block `actor` from updating it.
    ///
    /// A group's decision is `is_admin OR update allowed` for the actor's
    /// resolved level; admins always pass.
    pub fn denied_groups(&self, actor: Option<&str>, region: &Region) -> Vec<GroupFileData> {
        let check_enabled = self.protection.enable_group_update_permission_check;
        self.groups_containing(region)
            .into_iter()
            .filter(|group| {
                let permission = group.resolve_permission(actor);
                !(permission.is_admin() || effective_update_allowed(permission, check_enabled))
            })
            .collect()
    }

    pub fn is_region_permitted(&self, actor: Option<&str>, region: &Region) -> bool {
        self.denied_groups(actor, region).is_empty()
    }

    /// [`is_region_permitted`](Self::is_region_permitted) as a `Result`,
    /// carrying the blocking group names for user feedback.
    pub fn ensure_region_permitted(
        &self,
        actor: Option<&str>,
        region: &Region,
    ) -> Result<(), PermissionDenied> {
        let denied = self.denied_groups(actor, region);
        if denied.is_empty() {
            Ok(())
        } else {
            Err(PermissionDenied {
                groups: denied.into_iter().map(|group| group.name).collect(),
            })
        }
    }
}
