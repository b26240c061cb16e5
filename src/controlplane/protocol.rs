//! Controller Service message model
//!
//! Request and response types for the CSI Controller Service operations,
//! plus the well-known keys used in create parameters, volume contexts and
//! publish contexts. The types are serde-friendly so the REST surface can
//! carry them as JSON unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Well-known Keys
// =============================================================================

/// Create parameters, matched case-insensitively
pub mod params {
    pub const PROFILE: &str = "profile";
    pub const AVAILABILITY_ZONE: &str = "availabilityzone";
    pub const ENABLE_REPLICATION: &str = "enablereplication";
    pub const SECONDARY_AVAILABILITY_ZONE: &str = "secondaryavailabilityzone";
}

/// Volume context keys
pub mod volume_context {
    pub const NAME: &str = "name";
    pub const STATUS: &str = "status";
    pub const AVAILABILITY_ZONE: &str = "availabilityZone";
    pub const POOL_ID: &str = "poolId";
    pub const PROFILE_ID: &str = "profileId";
    pub const LV_PATH: &str = "lvPath";
    pub const REPLICATION_ID: &str = "replicationId";
}

/// Publish context keys
pub mod publish_context {
    pub const HOST_IP: &str = "hostIp";
    pub const HOST_NAME: &str = "hostName";
    pub const ATTACHMENT_ID: &str = "attachmentId";
    pub const ATTACHMENT_STATUS: &str = "attachmentStatus";
    pub const SECONDARY_ATTACHMENT_ID: &str = "secondaryAttachmentId";
}

// =============================================================================
// Volumes
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityRange {
    #[serde(default)]
    pub required_bytes: u64,
    #[serde(default)]
    pub limit_bytes: u64,
}

/// Where a new volume's content comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum VolumeContentSource {
    Snapshot { snapshot_id: String },
    Volume { volume_id: String },
}

impl VolumeContentSource {
    pub fn snapshot_id(&self) -> Option<&str> {
        match self {
            VolumeContentSource::Snapshot { snapshot_id } => Some(snapshot_id),
            VolumeContentSource::Volume { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeRequest {
    pub name: String,
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub volume_content_source: Option<VolumeContentSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub volume_id: String,
    pub capacity_bytes: u64,
    pub volume_context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeResponse {
    pub volume: Volume,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListVolumesResponse {
    pub entries: Vec<Volume>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCapacityResponse {
    /// Sum of pool free capacity, in GiB
    pub available_capacity: u64,
}

// =============================================================================
// Publish / Unpublish
// =============================================================================

/// CSI volume access mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    #[default]
    Unknown,
    SingleNodeWriter,
    SingleNodeReaderOnly,
    MultiNodeReaderOnly,
    MultiNodeSingleWriter,
    MultiNodeMultiWriter,
}

impl AccessMode {
    /// Whether the volume may be published to more than one host
    pub fn allows_multi_node(&self) -> bool {
        matches!(
            self,
            AccessMode::MultiNodeReaderOnly
                | AccessMode::MultiNodeSingleWriter
                | AccessMode::MultiNodeMultiWriter
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeCapability {
    pub access_mode: AccessMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerPublishVolumeRequest {
    #[serde(default)]
    pub volume_id: String,
    pub node_id: String,
    #[serde(default)]
    pub volume_capability: VolumeCapability,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub volume_context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerPublishVolumeResponse {
    pub publish_context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerUnpublishVolumeRequest {
    #[serde(default)]
    pub volume_id: String,
    /// Empty means every host
    #[serde(default)]
    pub node_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateVolumeCapabilitiesRequest {
    #[serde(default)]
    pub volume_id: String,
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
}

// =============================================================================
// Capabilities
// =============================================================================

/// Controller service RPC capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerCapability {
    CreateDeleteVolume,
    PublishUnpublishVolume,
    ListVolumes,
    GetCapacity,
    CreateDeleteSnapshot,
    ListSnapshots,
}

/// The fixed capability set advertised by this controller
pub const CONTROLLER_CAPABILITIES: [ControllerCapability; 6] = [
    ControllerCapability::CreateDeleteVolume,
    ControllerCapability::PublishUnpublishVolume,
    ControllerCapability::ListVolumes,
    ControllerCapability::GetCapacity,
    ControllerCapability::CreateDeleteSnapshot,
    ControllerCapability::ListSnapshots,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerGetCapabilitiesResponse {
    pub capabilities: Vec<ControllerCapability>,
}

// =============================================================================
// Snapshots
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSnapshotRequest {
    pub name: String,
    pub source_volume_id: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub snapshot_id: String,
    pub source_volume_id: String,
    pub size_bytes: u64,
    pub creation_time: DateTime<Utc>,
    pub ready_to_use: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSnapshotResponse {
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListSnapshotsRequest {
    /// 0 means no limit
    pub max_entries: u32,
    pub starting_token: String,
    pub source_volume_id: String,
    pub snapshot_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSnapshotsResponse {
    pub entries: Vec<Snapshot>,
    /// Empty when there is nothing left to fetch
    pub next_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_node_modes() {
        assert!(AccessMode::MultiNodeMultiWriter.allows_multi_node());
        assert!(AccessMode::MultiNodeReaderOnly.allows_multi_node());
        assert!(AccessMode::MultiNodeSingleWriter.allows_multi_node());
        assert!(!AccessMode::SingleNodeWriter.allows_multi_node());
        assert!(!AccessMode::Unknown.allows_multi_node());
    }

    #[test]
    fn test_publish_request_from_json() {
        let json = r#"{
            "nodeId": "node-a,iqn:iqn.2017-10.io.example:1",
            "volumeCapability": {"accessMode": "MULTI_NODE_READER_ONLY"}
        }"#;
        let req: ControllerPublishVolumeRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.volume_capability.access_mode, AccessMode::MultiNodeReaderOnly);
        assert!(req.volume_context.is_empty());
    }

    #[test]
    fn test_content_source_from_json() {
        let json = r#"{"name": "pvc-2", "volumeContentSource": {"snapshot": {"snapshotId": "snap-1"}}}"#;
        let req: CreateVolumeRequest = serde_json::from_str(json).unwrap();
        let source = req.volume_content_source.unwrap();
        assert_eq!(source.snapshot_id(), Some("snap-1"));
        assert!(req.capacity_range.is_none());
    }
}
