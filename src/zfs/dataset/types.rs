//! Dataset request and result types
//!
//! Every operation of the dataset manager takes one of these typed configs.
//! They deserialize straight from the JSON bodies of the REST API, so
//! optional flags default to off.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

// =============================================================================
// Listing
// =============================================================================

/// Dataset type filter for `zfs list -t`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetType {
    Filesystem,
    Volume,
    Snapshot,
    Bookmark,
    #[default]
    All,
}

impl DatasetType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DatasetType::Filesystem => "filesystem",
            DatasetType::Volume => "volume",
            DatasetType::Snapshot => "snapshot",
            DatasetType::Bookmark => "bookmark",
            DatasetType::All => "all",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListConfig {
    /// Root of the listing; all datasets when absent
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub dataset_type: DatasetType,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub depth: Option<u32>,
    /// Extra properties to fetch for every row
    #[serde(default)]
    pub properties: Vec<String>,
}

/// One row of `zfs list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub dataset_type: String,
    pub used: Option<u64>,
    pub available: Option<u64>,
    pub referenced: Option<u64>,
    pub mountpoint: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

// =============================================================================
// Lifecycle
// =============================================================================

/// What `zfs create` should make
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateKind {
    #[default]
    Filesystem,
    Volume,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateConfig {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: CreateKind,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Create missing parents (`-p`)
    #[serde(default)]
    pub parents: bool,
    /// Do not mount (`-u`)
    #[serde(default)]
    pub no_mount: bool,
    /// Volume size such as `10G`
    #[serde(default)]
    pub size: Option<String>,
    /// Sparse volume (`-s`)
    #[serde(default)]
    pub sparse: bool,
    /// Volume block size (`-b`)
    #[serde(default)]
    pub block_size: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestroyConfig {
    pub name: String,
    /// Destroy children (`-r`)
    #[serde(default)]
    pub recursive: bool,
    /// Destroy all dependents including clones (`-R`)
    #[serde(default)]
    pub recursive_dependents: bool,
    /// Force unmount (`-f`)
    #[serde(default)]
    pub force: bool,
    /// Defer snapshot destruction (`-d`)
    #[serde(default)]
    pub defer: bool,
}

/// A request naming a single dataset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NameConfig {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenameConfig {
    pub name: String,
    pub new_name: String,
    #[serde(default)]
    pub parents: bool,
    #[serde(default)]
    pub force: bool,
    /// Rename snapshots of descendants too (`-r`)
    #[serde(default)]
    pub recursive: bool,
}

// =============================================================================
// Properties
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyConfig {
    pub name: String,
    pub property: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetPropertyConfig {
    pub name: String,
    pub property: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InheritConfig {
    pub name: String,
    pub property: String,
    #[serde(default)]
    pub recursive: bool,
    /// Revert to the received value (`-S`)
    #[serde(default)]
    pub revert: bool,
}

/// Where a property value comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertySource {
    Local,
    Default,
    Inherited { from: String },
    Temporary,
    Received,
    None,
}

impl PropertySource {
    pub fn parse(s: &str) -> Self {
        match s {
            "local" => PropertySource::Local,
            "default" => PropertySource::Default,
            "temporary" => PropertySource::Temporary,
            "received" => PropertySource::Received,
            other => match other.strip_prefix("inherited from ") {
                Some(from) => PropertySource::Inherited {
                    from: from.to_string(),
                },
                None => PropertySource::None,
            },
        }
    }
}

/// One row of `zfs get`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub property: String,
    pub value: String,
    pub source: PropertySource,
}

// =============================================================================
// Snapshots, clones, bookmarks
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub dataset: String,
    /// Snapshot name without the dataset part
    pub name: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackConfig {
    pub name: String,
    /// Destroy snapshots newer than the target (`-r`)
    #[serde(default)]
    pub destroy_recent: bool,
    /// Also destroy clones of those snapshots (`-R`)
    #[serde(default)]
    pub destroy_clones: bool,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloneConfig {
    pub snapshot: String,
    pub target: String,
    #[serde(default)]
    pub parents: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookmarkConfig {
    pub snapshot: String,
    /// Full bookmark name (`pool/fs#mark`)
    pub bookmark: String,
}

// =============================================================================
// Mounting and sharing
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MountConfig {
    pub name: String,
    /// Overlay mount (`-O`)
    #[serde(default)]
    pub overlay: bool,
    /// Temporary mount options (`-o`)
    #[serde(default)]
    pub options: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnmountConfig {
    pub name: String,
    #[serde(default)]
    pub force: bool,
}

/// Share or unshare one dataset, or all with `all`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShareConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub all: bool,
}

// =============================================================================
// Diff
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffConfig {
    pub snapshot: String,
    /// Later snapshot or the live filesystem; the snapshot's filesystem when absent
    #[serde(default)]
    pub target: Option<String>,
    /// Include file types (`-F`)
    #[serde(default)]
    pub file_types: bool,
    /// Include change timestamps (`-t`)
    #[serde(default)]
    pub timestamps: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffChange {
    Added,
    Removed,
    Modified,
    Renamed,
}

impl DiffChange {
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "+" => Some(DiffChange::Added),
            "-" => Some(DiffChange::Removed),
            "M" => Some(DiffChange::Modified),
            "R" => Some(DiffChange::Renamed),
            _ => None,
        }
    }
}

/// One line of `zfs diff -H`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub change: DiffChange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_path: Option<String>,
}

// =============================================================================
// Delegated permissions
// =============================================================================

/// Who a delegation applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PermissionTarget {
    Users { names: Vec<String> },
    Groups { names: Vec<String> },
    Everyone,
    /// Permissions granted to the creator of new descendants
    Create,
    /// A named permission set (`@name`)
    Set { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowConfig {
    pub name: String,
    pub target: PermissionTarget,
    pub permissions: Vec<String>,
    /// Only this dataset (`-l`)
    #[serde(default)]
    pub local: bool,
    /// Only descendants (`-d`)
    #[serde(default)]
    pub descendants: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnallowConfig {
    pub name: String,
    pub target: PermissionTarget,
    /// All permissions of the target when empty
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub descendants: bool,
    /// Remove from descendants as well (`-r`)
    #[serde(default)]
    pub recursive: bool,
}

/// Parsed `zfs allow <name>` block for one dataset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetPermissions {
    pub dataset: String,
    /// Section heading (`Local permissions`, ...) to its entries
    pub sections: BTreeMap<String, Vec<String>>,
}

// =============================================================================
// Transfers
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendConfig {
    /// Snapshot to send; unused when resuming
    #[serde(default)]
    pub snapshot: String,
    /// Base for an incremental stream
    #[serde(default)]
    pub from_snapshot: Option<String>,
    /// Include intermediate snapshots (`-I` instead of `-i`)
    #[serde(default)]
    pub intermediary: bool,
    /// Replication stream (`-R`)
    #[serde(default)]
    pub replicate: bool,
    /// Send properties (`-p`)
    #[serde(default)]
    pub properties: bool,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub raw: bool,
    #[serde(default)]
    pub large_blocks: bool,
    #[serde(default)]
    pub embed_data: bool,
    #[serde(default)]
    pub verbose: bool,
    /// Parsable progress on stderr (`-P`)
    #[serde(default)]
    pub progress: bool,
    /// Token from an interrupted receive
    #[serde(default)]
    pub resume_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiveConfig {
    pub target: String,
    /// Roll back the target first (`-F`)
    #[serde(default)]
    pub force: bool,
    /// Keep partial state for resuming (`-s`)
    #[serde(default)]
    pub resumable: bool,
    #[serde(default)]
    pub no_mount: bool,
    /// Keep the sent path minus its pool under the target (`-d`)
    #[serde(default)]
    pub use_parent: bool,
    /// Keep only the last path component under the target (`-e`)
    #[serde(default)]
    pub use_last_component: bool,
    /// Overrides applied on receipt (`-o`)
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Properties to exclude (`-x`)
    #[serde(default)]
    pub exclude_properties: Vec<String>,
    /// Receive on another host over ssh
    #[serde(default)]
    pub remote_config: Option<RemoteConfig>,
}

fn default_ssh_port() -> u16 {
    22
}

/// Remote receive endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub host: String,
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub private_key: PathBuf,
    #[serde(default)]
    pub skip_host_key_check: bool,
    #[serde(default)]
    pub known_hosts_file: Option<PathBuf>,
    /// Run the remote receive through `sudo -n`
    #[serde(default)]
    pub use_sudo: bool,
}

/// Body of a transfer request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferConfig {
    pub send_config: SendConfig,
    pub receive_config: ReceiveConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_source_parse() {
        assert_eq!(PropertySource::parse("local"), PropertySource::Local);
        assert_eq!(
            PropertySource::parse("inherited from tank"),
            PropertySource::Inherited {
                from: "tank".to_string()
            }
        );
        assert_eq!(PropertySource::parse("-"), PropertySource::None);
    }

    #[test]
    fn test_create_config_defaults() {
        let cfg: CreateConfig = serde_json::from_value(json!({"name": "tank/fs"})).unwrap();
        assert_eq!(cfg.kind, CreateKind::Filesystem);
        assert!(!cfg.parents);
        assert!(cfg.properties.is_empty());

        let cfg: CreateConfig =
            serde_json::from_value(json!({"name": "tank/vol", "type": "volume", "size": "1G"}))
                .unwrap();
        assert_eq!(cfg.kind, CreateKind::Volume);
        assert_eq!(cfg.size.as_deref(), Some("1G"));
    }

    #[test]
    fn test_transfer_body() {
        let body = json!({
            "send_config": {"snapshot": "tank/fs@s1", "compressed": true},
            "receive_config": {
                "target": "backup/fs",
                "use_parent": true,
                "remote_config": {"host": "10.0.0.2", "user": "ops", "private_key": "/root/.ssh/id"}
            }
        });
        let cfg: TransferConfig = serde_json::from_value(body).unwrap();
        assert!(cfg.send_config.compressed);
        let remote = cfg.receive_config.remote_config.unwrap();
        assert_eq!(remote.port, 22);
        assert!(!remote.skip_host_key_check);
    }

    #[test]
    fn test_permission_target_tagging() {
        let target: PermissionTarget =
            serde_json::from_value(json!({"type": "users", "names": ["alice"]})).unwrap();
        assert_eq!(
            target,
            PermissionTarget::Users {
                names: vec!["alice".to_string()]
            }
        );
        let target: PermissionTarget = serde_json::from_value(json!({"type": "everyone"})).unwrap();
        assert_eq!(target, PermissionTarget::Everyone);
    }
}
