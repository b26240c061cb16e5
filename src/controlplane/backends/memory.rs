//! In-memory Orchestrator
//!
//! A self-contained orchestrator that keeps every record in process. Used
//! for standalone mode and as the test double for the reconcilers: it can
//! be scripted to fail an operation once, optionally after the record was
//! committed, and keeps a journal of every mutating call.

use crate::domain::ports::{
    AttachmentRecord, AttachmentRequest, IoConnectivity, OrchestratorClient, PoolExtras,
    PoolRecord, ProfileRecord, ReplicationRecord, ReplicationRequest, SnapshotRecord,
    SnapshotRequest, VolumeRecord, VolumeRequest, TIME_FORMAT,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const BACKEND: &str = "memory";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the in-memory orchestrator
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Pools available from the start
    pub pools: Vec<PoolRecord>,
    /// Profiles available from the start
    pub profiles: Vec<ProfileRecord>,
    /// Address reported for every attached host
    pub host_ip: String,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            pools: vec![
                pool("pool-default", "default", 100, "iscsi"),
                pool("pool-secondary", "secondary", 100, "iscsi"),
            ],
            profiles: vec![ProfileRecord {
                id: "profile-default".to_string(),
                name: "default".to_string(),
                description: "default policy".to_string(),
            }],
            host_ip: "127.0.0.1".to_string(),
        }
    }
}

/// Build a pool record with the given connectivity
pub fn pool(id: &str, availability_zone: &str, capacity: u64, protocol: &str) -> PoolRecord {
    PoolRecord {
        id: id.to_string(),
        name: id.to_string(),
        availability_zone: availability_zone.to_string(),
        total_capacity: capacity,
        free_capacity: capacity,
        extras: PoolExtras {
            io_connectivity: IoConnectivity {
                access_protocol: protocol.to_string(),
            },
        },
    }
}

// =============================================================================
// Fault Injection
// =============================================================================

/// Operations that can be scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    ListVolumes,
    GetVolume,
    CreateVolume,
    DeleteVolume,
    ListAttachments,
    CreateAttachment,
    DeleteAttachment,
    ListSnapshots,
    CreateSnapshot,
    DeleteSnapshot,
    ListReplications,
    GetReplication,
    CreateReplication,
    DeleteReplication,
    ListPools,
    GetPool,
    ListProfiles,
}

impl std::fmt::Display for BackendOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    op: BackendOp,
    /// Apply the operation before reporting failure
    commit: bool,
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Default)]
struct State {
    volumes: BTreeMap<String, VolumeRecord>,
    attachments: BTreeMap<String, AttachmentRecord>,
    snapshots: BTreeMap<String, SnapshotRecord>,
    replications: BTreeMap<String, ReplicationRecord>,
    pools: BTreeMap<String, PoolRecord>,
    profiles: BTreeMap<String, ProfileRecord>,
}

// =============================================================================
// In-memory Orchestrator
// =============================================================================

/// Orchestrator backed by process memory
pub struct InMemoryOrchestrator {
    config: InMemoryConfig,
    state: RwLock<State>,
    faults: Mutex<Vec<Fault>>,
    journal: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl InMemoryOrchestrator {
    /// Create a new orchestrator seeded with the configured pools/profiles
    pub fn new(config: InMemoryConfig) -> Self {
        let state = State {
            pools: config
                .pools
                .iter()
                .map(|p| (p.id.clone(), p.clone()))
                .collect(),
            profiles: config
                .profiles
                .iter()
                .map(|p| (p.id.clone(), p.clone()))
                .collect(),
            ..Default::default()
        };

        info!(
            "In-memory orchestrator ready ({} pools, {} profiles)",
            state.pools.len(),
            state.profiles.len()
        );

        Self {
            config,
            state: RwLock::new(state),
            faults: Mutex::new(Vec::new()),
            journal: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Fail the next call of `op` without applying it
    pub fn fail_once(&self, op: BackendOp) {
        self.faults.lock().push(Fault { op, commit: false });
    }

    /// Apply the next call of `op` but report it as failed
    pub fn fail_once_after_commit(&self, op: BackendOp) {
        self.faults.lock().push(Fault { op, commit: true });
    }

    /// Mutating calls seen so far, oldest first
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    /// Insert a volume record as-is
    pub async fn insert_volume(&self, record: VolumeRecord) {
        self.state.write().await.volumes.insert(record.id.clone(), record);
    }

    /// Insert a snapshot record as-is
    pub async fn insert_snapshot(&self, record: SnapshotRecord) {
        self.state.write().await.snapshots.insert(record.id.clone(), record);
    }

    fn take_fault(&self, op: BackendOp) -> Option<Fault> {
        let mut faults = self.faults.lock();
        let index = faults.iter().position(|f| f.op == op)?;
        Some(faults.remove(index))
    }

    /// Returns `Err` for a non-committing fault; `Ok(true)` when the call
    /// must be applied and then reported as failed.
    fn check_fault(&self, op: BackendOp) -> Result<bool> {
        match self.take_fault(op) {
            None => Ok(false),
            Some(fault) if fault.commit => Ok(true),
            Some(_) => {
                warn!("Injected failure for {}", op);
                Err(injected(op))
            }
        }
    }

    fn record(&self, entry: String) {
        debug!("In-memory orchestrator: {}", entry);
        self.journal.lock().push(entry);
    }

    fn generate_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("{}-{:06}", prefix, n)
    }
}

impl Default for InMemoryOrchestrator {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

fn injected(op: BackendOp) -> Error {
    Error::backend_failed(BACKEND, &op.to_string(), "injected failure")
}

fn now() -> String {
    chrono::Utc::now().format(TIME_FORMAT).to_string()
}

/// Resolve a committed-fault outcome into the reported result
fn report<T>(op: BackendOp, committed_fault: bool, value: T) -> Result<T> {
    if committed_fault {
        warn!("Injected failure for {} after commit", op);
        Err(injected(op))
    } else {
        Ok(value)
    }
}

#[async_trait]
impl OrchestratorClient for InMemoryOrchestrator {
    async fn list_volumes(&self) -> Result<Vec<VolumeRecord>> {
        self.check_fault(BackendOp::ListVolumes)?;
        Ok(self.state.read().await.volumes.values().cloned().collect())
    }

    async fn get_volume(&self, id: &str) -> Result<VolumeRecord> {
        self.check_fault(BackendOp::GetVolume)?;
        self.state
            .read()
            .await
            .volumes
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("Volume", id))
    }

    async fn create_volume(&self, request: &VolumeRequest) -> Result<VolumeRecord> {
        let committed_fault = self.check_fault(BackendOp::CreateVolume)?;
        let mut state = self.state.write().await;

        let pool = state
            .pools
            .values_mut()
            .find(|p| p.availability_zone == request.availability_zone)
            .ok_or_else(|| {
                Error::backend_failed(
                    BACKEND,
                    "create_volume",
                    format!("no pool in availability zone {}", request.availability_zone),
                )
            })?;
        if pool.free_capacity < request.size {
            return Err(Error::backend_failed(
                BACKEND,
                "create_volume",
                format!("pool {} has {} GiB free", pool.id, pool.free_capacity),
            ));
        }
        pool.free_capacity -= request.size;
        let pool_id = pool.id.clone();

        let id = self.generate_id("vol");
        let mut metadata = request.metadata.clone();
        metadata.insert(
            "lvPath".to_string(),
            format!("/dev/opensds-volumes-{}/volume-{}", pool_id, id),
        );

        let record = VolumeRecord {
            id: id.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            size: request.size,
            profile_id: request.profile_id.clone(),
            availability_zone: request.availability_zone.clone(),
            snapshot_id: request.snapshot_id.clone(),
            pool_id,
            status: "available".to_string(),
            metadata,
            created_at: now(),
        };
        state.volumes.insert(id, record.clone());
        drop(state);

        self.record(format!("create_volume:{}", record.name));
        report(BackendOp::CreateVolume, committed_fault, record)
    }

    async fn delete_volume(&self, id: &str) -> Result<()> {
        let committed_fault = self.check_fault(BackendOp::DeleteVolume)?;
        let mut state = self.state.write().await;
        let record = state
            .volumes
            .remove(id)
            .ok_or_else(|| Error::not_found("Volume", id))?;
        if let Some(pool) = state.pools.get_mut(&record.pool_id) {
            pool.free_capacity += record.size;
        }
        drop(state);

        self.record(format!("delete_volume:{}", id));
        report(BackendOp::DeleteVolume, committed_fault, ())
    }

    async fn list_attachments(&self) -> Result<Vec<AttachmentRecord>> {
        self.check_fault(BackendOp::ListAttachments)?;
        Ok(self.state.read().await.attachments.values().cloned().collect())
    }

    async fn get_attachment(&self, id: &str) -> Result<AttachmentRecord> {
        self.state
            .read()
            .await
            .attachments
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("VolumeAttachment", id))
    }

    async fn create_attachment(&self, request: &AttachmentRequest) -> Result<AttachmentRecord> {
        let committed_fault = self.check_fault(BackendOp::CreateAttachment)?;
        let mut state = self.state.write().await;
        if !state.volumes.contains_key(&request.volume_id) {
            return Err(Error::not_found("Volume", &request.volume_id));
        }

        let id = self.generate_id("att");
        let mut host_info = request.host_info.clone();
        host_info.ip = self.config.host_ip.clone();
        let record = AttachmentRecord {
            id: id.clone(),
            volume_id: request.volume_id.clone(),
            host_info,
            status: "available".to_string(),
            metadata: request.metadata.clone(),
            access_protocol: request.access_protocol.clone(),
        };
        state.attachments.insert(id.clone(), record.clone());
        drop(state);

        self.record(format!("create_attachment:{}", request.volume_id));
        report(BackendOp::CreateAttachment, committed_fault, record)
    }

    async fn delete_attachment(&self, id: &str) -> Result<()> {
        let committed_fault = self.check_fault(BackendOp::DeleteAttachment)?;
        self.state
            .write()
            .await
            .attachments
            .remove(id)
            .ok_or_else(|| Error::not_found("VolumeAttachment", id))?;

        self.record(format!("delete_attachment:{}", id));
        report(BackendOp::DeleteAttachment, committed_fault, ())
    }

    async fn list_snapshots(&self) -> Result<Vec<SnapshotRecord>> {
        self.check_fault(BackendOp::ListSnapshots)?;
        Ok(self.state.read().await.snapshots.values().cloned().collect())
    }

    async fn get_snapshot(&self, id: &str) -> Result<SnapshotRecord> {
        self.state
            .read()
            .await
            .snapshots
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("VolumeSnapshot", id))
    }

    async fn create_snapshot(&self, request: &SnapshotRequest) -> Result<SnapshotRecord> {
        let committed_fault = self.check_fault(BackendOp::CreateSnapshot)?;
        let mut state = self.state.write().await;
        let size = state
            .volumes
            .get(&request.volume_id)
            .map(|v| v.size)
            .ok_or_else(|| Error::not_found("Volume", &request.volume_id))?;

        let id = self.generate_id("snap");
        let record = SnapshotRecord {
            id: id.clone(),
            name: request.name.clone(),
            size,
            volume_id: request.volume_id.clone(),
            profile_id: request.profile_id.clone(),
            status: "available".to_string(),
            created_at: now(),
        };
        state.snapshots.insert(id, record.clone());
        drop(state);

        self.record(format!("create_snapshot:{}", record.name));
        report(BackendOp::CreateSnapshot, committed_fault, record)
    }

    async fn delete_snapshot(&self, id: &str) -> Result<()> {
        let committed_fault = self.check_fault(BackendOp::DeleteSnapshot)?;
        self.state
            .write()
            .await
            .snapshots
            .remove(id)
            .ok_or_else(|| Error::not_found("VolumeSnapshot", id))?;

        self.record(format!("delete_snapshot:{}", id));
        report(BackendOp::DeleteSnapshot, committed_fault, ())
    }

    async fn list_replications(&self) -> Result<Vec<ReplicationRecord>> {
        self.check_fault(BackendOp::ListReplications)?;
        Ok(self.state.read().await.replications.values().cloned().collect())
    }

    async fn get_replication(&self, id: &str) -> Result<ReplicationRecord> {
        self.check_fault(BackendOp::GetReplication)?;
        self.state
            .read()
            .await
            .replications
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("Replication", id))
    }

    async fn create_replication(
        &self,
        request: &ReplicationRequest,
    ) -> Result<ReplicationRecord> {
        let committed_fault = self.check_fault(BackendOp::CreateReplication)?;
        let mut state = self.state.write().await;
        for volume_id in [&request.primary_volume_id, &request.secondary_volume_id] {
            if !state.volumes.contains_key(volume_id) {
                return Err(Error::not_found("Volume", volume_id));
            }
        }

        let id = self.generate_id("rep");
        let record = ReplicationRecord {
            id: id.clone(),
            name: request.name.clone(),
            primary_volume_id: request.primary_volume_id.clone(),
            secondary_volume_id: request.secondary_volume_id.clone(),
            replication_mode: request.replication_mode,
            replication_period: request.replication_period,
            replication_status: "enabled".to_string(),
        };
        state.replications.insert(id, record.clone());
        drop(state);

        self.record(format!("create_replication:{}", record.name));
        report(BackendOp::CreateReplication, committed_fault, record)
    }

    async fn delete_replication(&self, id: &str) -> Result<()> {
        let committed_fault = self.check_fault(BackendOp::DeleteReplication)?;
        self.state
            .write()
            .await
            .replications
            .remove(id)
            .ok_or_else(|| Error::not_found("Replication", id))?;

        self.record(format!("delete_replication:{}", id));
        report(BackendOp::DeleteReplication, committed_fault, ())
    }

    async fn list_pools(&self) -> Result<Vec<PoolRecord>> {
        self.check_fault(BackendOp::ListPools)?;
        Ok(self.state.read().await.pools.values().cloned().collect())
    }

    async fn get_pool(&self, id: &str) -> Result<PoolRecord> {
        self.check_fault(BackendOp::GetPool)?;
        self.state
            .read()
            .await
            .pools
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("StoragePool", id))
    }

    async fn list_profiles(&self) -> Result<Vec<ProfileRecord>> {
        self.check_fault(BackendOp::ListProfiles)?;
        Ok(self.state.read().await.profiles.values().cloned().collect())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn volume_request(name: &str, size: u64) -> VolumeRequest {
        VolumeRequest {
            name: name.into(),
            size,
            profile_id: "profile-default".into(),
            availability_zone: "default".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_volume_tracks_pool_capacity() {
        let backend = InMemoryOrchestrator::default();

        let volume = backend.create_volume(&volume_request("pvc-1", 10)).await.unwrap();
        assert_eq!(volume.pool_id, "pool-default");
        assert!(volume.metadata.contains_key("lvPath"));
        assert_eq!(backend.get_pool("pool-default").await.unwrap().free_capacity, 90);

        backend.delete_volume(&volume.id).await.unwrap();
        assert_eq!(backend.get_pool("pool-default").await.unwrap().free_capacity, 100);
        assert_eq!(
            backend.journal(),
            vec!["create_volume:pvc-1".to_string(), format!("delete_volume:{}", volume.id)]
        );
    }

    #[tokio::test]
    async fn test_fault_after_commit_keeps_record() {
        let backend = InMemoryOrchestrator::default();
        backend.fail_once_after_commit(BackendOp::CreateVolume);

        let err = backend.create_volume(&volume_request("pvc-1", 1)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unknown);
        assert_eq!(backend.list_volumes().await.unwrap().len(), 1);

        // the fault is consumed
        backend.create_volume(&volume_request("pvc-2", 1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_fault_without_commit() {
        let backend = InMemoryOrchestrator::default();
        backend.fail_once(BackendOp::CreateVolume);

        assert!(backend.create_volume(&volume_request("pvc-1", 1)).await.is_err());
        assert!(backend.list_volumes().await.unwrap().is_empty());
        assert!(backend.journal().is_empty());
    }

    #[tokio::test]
    async fn test_missing_ids_are_not_found() {
        let backend = InMemoryOrchestrator::default();
        let err = backend.delete_volume("vol-missing").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let err = backend.get_pool("pool-missing").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }
}
