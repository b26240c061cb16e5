//! Controller Service
//!
//! The boundary between the protocol model and the reconcilers. Each
//! operation validates its request, dispatches to the reconciler that owns
//! the behaviour and projects backend records into protocol responses.
//! Every call is timed and counted in [`ControllerMetrics`].

use crate::controlplane::attachment::{AttachmentConfig, AttachmentReconciler, PublishRequest};
use crate::controlplane::listing::{page_snapshots, SnapshotFilter};
use crate::controlplane::metrics::ControllerMetrics;
use crate::controlplane::protocol::{
    params, publish_context, volume_context, ControllerGetCapabilitiesResponse,
    ControllerPublishVolumeRequest, ControllerPublishVolumeResponse,
    ControllerUnpublishVolumeRequest, CreateSnapshotRequest, CreateSnapshotResponse,
    CreateVolumeRequest, CreateVolumeResponse, GetCapacityResponse, ListSnapshotsRequest,
    ListSnapshotsResponse, ListVolumesResponse, Snapshot, ValidateVolumeCapabilitiesRequest,
    Volume, VolumeContentSource, CONTROLLER_CAPABILITIES,
};
use crate::controlplane::provisioning::{
    allocation_units, ProvisioningConfig, ProvisioningReconciler, ALLOCATION_UNIT_BYTES,
};
use crate::controlplane::replication::{ReplicationConfig, ReplicationOrchestrator};
use crate::domain::ports::{
    OrchestratorClientRef, SnapshotRecord, SnapshotRequest, VolumeRecord, VolumeRequest,
    TIME_FORMAT,
};
use crate::error::{Error, Result};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the controller service
#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    pub provisioning: ProvisioningConfig,
    pub replication: ReplicationConfig,
    pub attachment: AttachmentConfig,
}

// =============================================================================
// Create Parameters
// =============================================================================

/// Recognised create-volume parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CreateParameters {
    profile_id: String,
    availability_zone: String,
    enable_replication: bool,
    secondary_availability_zone: Option<String>,
}

impl CreateParameters {
    /// Keys are matched case-insensitively; unknown keys are ignored
    fn parse(parameters: &BTreeMap<String, String>) -> Self {
        let mut parsed = Self::default();
        for (key, value) in parameters {
            match key.to_lowercase().as_str() {
                params::PROFILE => parsed.profile_id = value.clone(),
                params::AVAILABILITY_ZONE => parsed.availability_zone = value.clone(),
                params::ENABLE_REPLICATION => {
                    parsed.enable_replication = value.eq_ignore_ascii_case("true")
                }
                params::SECONDARY_AVAILABILITY_ZONE => {
                    parsed.secondary_availability_zone = Some(value.clone())
                }
                _ => debug!("Ignoring create parameter {}={}", key, value),
            }
        }
        parsed
    }
}

fn profile_parameter(parameters: &BTreeMap<String, String>) -> String {
    parameters
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(params::PROFILE))
        .map(|(_, v)| v.clone())
        .unwrap_or_default()
}

// =============================================================================
// Projections
// =============================================================================

fn base_context(volume: &VolumeRecord) -> BTreeMap<String, String> {
    BTreeMap::from([
        (volume_context::NAME.to_string(), volume.name.clone()),
        (volume_context::STATUS.to_string(), volume.status.clone()),
        (
            volume_context::AVAILABILITY_ZONE.to_string(),
            volume.availability_zone.clone(),
        ),
        (volume_context::POOL_ID.to_string(), volume.pool_id.clone()),
        (volume_context::PROFILE_ID.to_string(), volume.profile_id.clone()),
    ])
}

fn to_volume(volume: &VolumeRecord, volume_context: BTreeMap<String, String>) -> Volume {
    Volume {
        volume_id: volume.id.clone(),
        capacity_bytes: volume.size * ALLOCATION_UNIT_BYTES,
        volume_context,
    }
}

/// Project a snapshot record; the backend timestamp must parse
pub fn to_snapshot(record: &SnapshotRecord) -> Result<Snapshot> {
    let creation_time = NaiveDateTime::parse_from_str(&record.created_at, TIME_FORMAT)
        .map_err(|e| Error::TimestampParse {
            value: record.created_at.clone(),
            reason: e.to_string(),
        })?
        .and_utc();

    Ok(Snapshot {
        snapshot_id: record.id.clone(),
        source_volume_id: record.volume_id.clone(),
        size_bytes: record.size * ALLOCATION_UNIT_BYTES,
        creation_time,
        ready_to_use: true,
    })
}

// =============================================================================
// Controller Service
// =============================================================================

/// CSI Controller Service
pub struct ControllerService {
    backend: OrchestratorClientRef,
    provisioning: Arc<ProvisioningReconciler>,
    replication: Arc<ReplicationOrchestrator>,
    attachments: AttachmentReconciler,
    metrics: ControllerMetrics,
}

impl ControllerService {
    /// Wire the reconcilers around a backend client
    pub fn new(backend: OrchestratorClientRef, config: ControllerConfig) -> Result<Arc<Self>> {
        let provisioning = Arc::new(ProvisioningReconciler::new(
            backend.clone(),
            config.provisioning,
        ));
        let replication = Arc::new(ReplicationOrchestrator::new(
            backend.clone(),
            provisioning.clone(),
            config.replication,
        ));
        let attachments =
            AttachmentReconciler::new(backend.clone(), replication.clone(), config.attachment);

        info!("Controller service using {} backend", backend.backend_name());

        Ok(Arc::new(Self {
            backend,
            provisioning,
            replication,
            attachments,
            metrics: ControllerMetrics::new()?,
        }))
    }

    pub fn metrics(&self) -> &ControllerMetrics {
        &self.metrics
    }

    pub fn backend_name(&self) -> &str {
        self.backend.backend_name()
    }

    /// Whether the backend orchestrator answers
    pub async fn ready(&self) -> bool {
        match self.backend.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!("Backend health check failed: {}", e);
                false
            }
        }
    }

    async fn observed<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let start = Instant::now();
        let result = call.await;
        let code = result.as_ref().err().map(Error::code);
        if let Some(code) = code {
            debug!("{} failed with {}", operation, code);
        }
        self.metrics.observe(operation, start.elapsed(), code);
        result
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    pub async fn create_volume(&self, request: CreateVolumeRequest) -> Result<CreateVolumeResponse> {
        self.observed("create_volume", self.create_volume_inner(request))
            .await
    }

    async fn create_volume_inner(&self, request: CreateVolumeRequest) -> Result<CreateVolumeResponse> {
        info!("CreateVolume {}", request.name);
        if request.name.is_empty() {
            return Err(Error::InvalidArgument("Volume name cannot be empty".to_string()));
        }

        let parameters = CreateParameters::parse(&request.parameters);
        let snapshot_id = match &request.volume_content_source {
            Some(VolumeContentSource::Volume { volume_id }) => {
                return Err(Error::InvalidArgument(format!(
                    "cloning from volume {} is not supported",
                    volume_id
                )));
            }
            Some(source) => source.snapshot_id().unwrap_or_default().to_string(),
            None => String::new(),
        };

        let provisioned = self
            .provisioning
            .create_volume(VolumeRequest {
                name: request.name.clone(),
                size: allocation_units(request.capacity_range.map(|r| r.required_bytes)),
                profile_id: parameters.profile_id,
                availability_zone: parameters.availability_zone,
                snapshot_id,
                ..Default::default()
            })
            .await?;
        let volume = &provisioned.volume;

        let mut context = base_context(volume);
        context.insert(
            volume_context::LV_PATH.to_string(),
            volume.metadata.get(volume_context::LV_PATH).cloned().unwrap_or_default(),
        );

        if parameters.enable_replication {
            let replication_id = if provisioned.created {
                self.replication
                    .establish(
                        volume,
                        &provisioned.request,
                        parameters.secondary_availability_zone.as_deref(),
                    )
                    .await?
                    .id
            } else {
                match self.replication.find_pairing(&volume.id).await? {
                    Some(pairing) => pairing.id,
                    None => {
                        debug!("Reused volume {} has no replication", volume.id);
                        String::new()
                    }
                }
            };
            if !replication_id.is_empty() {
                context.insert(volume_context::REPLICATION_ID.to_string(), replication_id);
            }
        }

        Ok(CreateVolumeResponse {
            volume: to_volume(volume, context),
        })
    }

    pub async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        self.observed("delete_volume", async {
            info!("DeleteVolume {}", volume_id);
            if volume_id.is_empty() {
                return Err(Error::InvalidArgument("Volume ID cannot be empty".to_string()));
            }
            self.replication.delete_volume(volume_id).await
        })
        .await
    }

    pub async fn controller_publish_volume(
        &self,
        request: ControllerPublishVolumeRequest,
    ) -> Result<ControllerPublishVolumeResponse> {
        self.observed("controller_publish_volume", async {
            info!("ControllerPublishVolume {} to {}", request.volume_id, request.node_id);
            if request.volume_id.is_empty() {
                return Err(Error::InvalidArgument("Volume ID cannot be empty".to_string()));
            }
            if request.node_id.is_empty() {
                return Err(Error::InvalidArgument("Node ID cannot be empty".to_string()));
            }

            let published = self
                .attachments
                .publish(&PublishRequest {
                    volume_id: request.volume_id.clone(),
                    node_id: request.node_id.clone(),
                    access_mode: request.volume_capability.access_mode,
                    volume_context: request.volume_context.clone(),
                })
                .await?;

            let primary = &published.primary;
            let mut context = BTreeMap::from([
                (publish_context::HOST_IP.to_string(), primary.host_info.ip.clone()),
                (publish_context::HOST_NAME.to_string(), primary.host_info.host.clone()),
                (publish_context::ATTACHMENT_ID.to_string(), primary.id.clone()),
                (publish_context::ATTACHMENT_STATUS.to_string(), primary.status.clone()),
            ]);
            if let Some(secondary) = &published.secondary {
                context.insert(
                    publish_context::SECONDARY_ATTACHMENT_ID.to_string(),
                    secondary.id.clone(),
                );
            }

            Ok(ControllerPublishVolumeResponse {
                publish_context: context,
            })
        })
        .await
    }

    pub async fn controller_unpublish_volume(
        &self,
        request: ControllerUnpublishVolumeRequest,
    ) -> Result<()> {
        self.observed("controller_unpublish_volume", async {
            info!(
                "ControllerUnpublishVolume {} from {}",
                request.volume_id, request.node_id
            );
            self.attachments
                .unpublish(&request.volume_id, &request.node_id)
                .await
                .map(|removed| debug!("Removed {} attachment(s)", removed))
        })
        .await
    }

    pub async fn validate_volume_capabilities(
        &self,
        request: ValidateVolumeCapabilitiesRequest,
    ) -> Result<()> {
        self.observed("validate_volume_capabilities", async {
            debug!("ValidateVolumeCapabilities {}", request.volume_id);
            Err(Error::Unimplemented {
                operation: "ValidateVolumeCapabilities".to_string(),
            })
        })
        .await
    }

    pub async fn list_volumes(&self) -> Result<ListVolumesResponse> {
        self.observed("list_volumes", async {
            let volumes = self.backend.list_volumes().await?;
            let entries = volumes
                .iter()
                .map(|v| to_volume(v, base_context(v)))
                .collect();
            Ok(ListVolumesResponse { entries })
        })
        .await
    }

    pub async fn get_capacity(&self) -> Result<GetCapacityResponse> {
        self.observed("get_capacity", async {
            let pools = self.backend.list_pools().await?;
            let available_capacity = pools.iter().map(|p| p.free_capacity).sum();
            debug!("{} pools, {} GiB free", pools.len(), available_capacity);
            Ok(GetCapacityResponse { available_capacity })
        })
        .await
    }

    pub async fn controller_get_capabilities(&self) -> ControllerGetCapabilitiesResponse {
        ControllerGetCapabilitiesResponse {
            capabilities: CONTROLLER_CAPABILITIES.to_vec(),
        }
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub async fn create_snapshot(
        &self,
        request: CreateSnapshotRequest,
    ) -> Result<CreateSnapshotResponse> {
        self.observed("create_snapshot", async {
            info!(
                "CreateSnapshot {} of {}",
                request.name, request.source_volume_id
            );
            let record = self
                .provisioning
                .create_snapshot(SnapshotRequest {
                    name: request.name.clone(),
                    volume_id: request.source_volume_id.clone(),
                    profile_id: profile_parameter(&request.parameters),
                })
                .await?;
            Ok(CreateSnapshotResponse {
                snapshot: to_snapshot(&record)?,
            })
        })
        .await
    }

    pub async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.observed("delete_snapshot", async {
            info!("DeleteSnapshot {}", snapshot_id);
            self.provisioning.delete_snapshot(snapshot_id).await
        })
        .await
    }

    pub async fn list_snapshots(&self, request: ListSnapshotsRequest) -> Result<ListSnapshotsResponse> {
        self.observed("list_snapshots", async {
            let snapshots = self.backend.list_snapshots().await?;
            let filter = SnapshotFilter {
                snapshot_id: &request.snapshot_id,
                source_volume_id: &request.source_volume_id,
            };
            let page = page_snapshots(
                snapshots,
                filter,
                &request.starting_token,
                request.max_entries,
            )?;
            let entries = page.items.iter().map(to_snapshot).collect::<Result<Vec<_>>>()?;
            Ok(ListSnapshotsResponse {
                entries,
                next_token: page.next_token,
            })
        })
        .await
    }
}
