//! Domain Ports - Backend records and the orchestrator client port
//!
//! The backend orchestrator owns every record defined here. The controller
//! only lists, fetches, creates and deletes them through
//! [`OrchestratorClient`]; it never mutates a record in place.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Timestamp layout used by the orchestrator for `createdAt` fields
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// =============================================================================
// Volumes
// =============================================================================

/// Request body for creating a volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Size in GiB
    pub size: u64,
    pub profile_id: String,
    pub availability_zone: String,
    /// Source snapshot, empty when the volume is created blank
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub snapshot_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// A volume as realized by the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolumeRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Size in GiB
    pub size: u64,
    pub profile_id: String,
    pub availability_zone: String,
    pub snapshot_id: String,
    pub pool_id: String,
    pub status: String,
    pub metadata: BTreeMap<String, String>,
    pub created_at: String,
}

impl VolumeRecord {
    /// Whether this record realizes the given request.
    ///
    /// Name equality is checked separately; this compares the attributes
    /// that make two volumes with the same name interchangeable.
    pub fn is_compatible_with(&self, request: &VolumeRequest) -> bool {
        self.size == request.size
            && self.profile_id == request.profile_id
            && self.availability_zone == request.availability_zone
            && self.snapshot_id == request.snapshot_id
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Request body for creating a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequest {
    pub name: String,
    pub volume_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub profile_id: String,
}

/// A snapshot as realized by the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotRecord {
    pub id: String,
    pub name: String,
    /// Size in GiB
    pub size: u64,
    pub volume_id: String,
    pub profile_id: String,
    pub status: String,
    pub created_at: String,
}

impl SnapshotRecord {
    pub fn is_compatible_with(&self, request: &SnapshotRequest) -> bool {
        self.volume_id == request.volume_id && self.profile_id == request.profile_id
    }
}

// =============================================================================
// Attachments
// =============================================================================

/// Host side of an attachment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostInfo {
    pub platform: String,
    pub os_type: String,
    /// Filled in by the orchestrator
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip: String,
    pub host: String,
    pub initiator: String,
}

/// Request body for attaching a volume to a host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRequest {
    pub volume_id: String,
    pub host_info: HostInfo,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub access_protocol: String,
}

/// An attachment binding a volume to a host initiator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachmentRecord {
    pub id: String,
    pub volume_id: String,
    pub host_info: HostInfo,
    pub status: String,
    pub metadata: BTreeMap<String, String>,
    pub access_protocol: String,
}

// =============================================================================
// Replication
// =============================================================================

/// Replication mode of a pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    #[default]
    Sync,
    Async,
}

impl std::fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicationMode::Sync => write!(f, "sync"),
            ReplicationMode::Async => write!(f, "async"),
        }
    }
}

/// Request body for pairing two volumes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationRequest {
    pub name: String,
    pub primary_volume_id: String,
    pub secondary_volume_id: String,
    pub replication_mode: ReplicationMode,
    /// Seconds between syncs, 0 for synchronous pairs
    pub replication_period: u64,
}

/// A replication pair record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplicationRecord {
    pub id: String,
    pub name: String,
    pub primary_volume_id: String,
    pub secondary_volume_id: String,
    pub replication_mode: ReplicationMode,
    pub replication_period: u64,
    pub replication_status: String,
}

impl ReplicationRecord {
    /// Whether the pair references the volume on either side
    pub fn references(&self, volume_id: &str) -> bool {
        self.primary_volume_id == volume_id || self.secondary_volume_id == volume_id
    }
}

// =============================================================================
// Pools & Profiles
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IoConnectivity {
    pub access_protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolExtras {
    pub io_connectivity: IoConnectivity,
}

/// A storage pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolRecord {
    pub id: String,
    pub name: String,
    pub availability_zone: String,
    /// Total capacity in GiB
    pub total_capacity: u64,
    /// Free capacity in GiB
    pub free_capacity: u64,
    pub extras: PoolExtras,
}

/// A provisioning profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileRecord {
    pub id: String,
    pub name: String,
    pub description: String,
}

// =============================================================================
// Orchestrator Client Port
// =============================================================================

/// Port for the backend orchestrator.
///
/// Calls are whole-record and non-streaming. Implementations report a
/// missing id on `get_*`/`delete_*` however the backend does; the
/// controller never pre-checks existence.
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    async fn list_volumes(&self) -> Result<Vec<VolumeRecord>>;
    async fn get_volume(&self, id: &str) -> Result<VolumeRecord>;
    async fn create_volume(&self, request: &VolumeRequest) -> Result<VolumeRecord>;
    async fn delete_volume(&self, id: &str) -> Result<()>;

    async fn list_attachments(&self) -> Result<Vec<AttachmentRecord>>;
    async fn get_attachment(&self, id: &str) -> Result<AttachmentRecord>;
    async fn create_attachment(&self, request: &AttachmentRequest) -> Result<AttachmentRecord>;
    async fn delete_attachment(&self, id: &str) -> Result<()>;

    async fn list_snapshots(&self) -> Result<Vec<SnapshotRecord>>;
    async fn get_snapshot(&self, id: &str) -> Result<SnapshotRecord>;
    async fn create_snapshot(&self, request: &SnapshotRequest) -> Result<SnapshotRecord>;
    async fn delete_snapshot(&self, id: &str) -> Result<()>;

    async fn list_replications(&self) -> Result<Vec<ReplicationRecord>>;
    async fn get_replication(&self, id: &str) -> Result<ReplicationRecord>;
    async fn create_replication(&self, request: &ReplicationRequest)
        -> Result<ReplicationRecord>;
    async fn delete_replication(&self, id: &str) -> Result<()>;

    async fn list_pools(&self) -> Result<Vec<PoolRecord>>;
    async fn get_pool(&self, id: &str) -> Result<PoolRecord>;

    async fn list_profiles(&self) -> Result<Vec<ProfileRecord>>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Get backend name
    fn backend_name(&self) -> &str;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type OrchestratorClientRef = Arc<dyn OrchestratorClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_compatibility() {
        let request = VolumeRequest {
            name: "pvc-1".into(),
            size: 3,
            profile_id: "profile-1".into(),
            availability_zone: "default".into(),
            ..Default::default()
        };
        let mut record = VolumeRecord {
            id: "vol-1".into(),
            name: "pvc-1".into(),
            size: 3,
            profile_id: "profile-1".into(),
            availability_zone: "default".into(),
            ..Default::default()
        };
        assert!(record.is_compatible_with(&request));

        record.snapshot_id = "snap-1".into();
        assert!(!record.is_compatible_with(&request));
    }

    #[test]
    fn test_attachment_wire_shape() {
        let json = r#"{
            "id": "att-1",
            "volumeId": "vol-1",
            "hostInfo": {"platform": "x86_64", "osType": "linux", "ip": "10.0.0.5",
                         "host": "node-a", "initiator": "iqn.1993-08.org.debian:01:abc"},
            "status": "available",
            "accessProtocol": "iscsi"
        }"#;
        let record: AttachmentRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.host_info.ip, "10.0.0.5");
        assert_eq!(record.host_info.host, "node-a");
        assert!(record.metadata.is_empty());
    }

    #[test]
    fn test_replication_mode_display() {
        assert_eq!(format!("{}", ReplicationMode::Sync), "sync");
        assert_eq!(
            serde_json::to_string(&ReplicationMode::Async).unwrap(),
            "\"async\""
        );
    }
}
