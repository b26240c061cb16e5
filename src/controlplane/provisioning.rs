//! Provisioning Reconciler
//!
//! Idempotent create/find for volumes and snapshots. The orchestrator has
//! no unique-name constraint, so names are made unique here: every create
//! first scans the full listing for a record with the same name and either
//! reuses it (compatible attributes) or rejects the request (incompatible).

use crate::domain::ports::{
    OrchestratorClientRef, SnapshotRecord, SnapshotRequest, VolumeRecord, VolumeRequest,
};
use crate::error::{Error, Result};
use tracing::{debug, error, info, warn};

/// Capacity granularity: one GiB
pub const ALLOCATION_UNIT_BYTES: u64 = 1024 * 1024 * 1024;

/// Round a requested byte capacity up to whole allocation units, never
/// less than one. `None` means the caller did not ask for a size.
pub fn allocation_units(required_bytes: Option<u64>) -> u64 {
    match required_bytes {
        Some(bytes) => bytes.div_ceil(ALLOCATION_UNIT_BYTES).max(1),
        None => 1,
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Defaults applied to volume requests
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    /// Profile looked up by name when the request names none
    pub default_profile_name: String,
    /// Availability zone used when the request names none
    pub default_availability_zone: String,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            default_profile_name: "default".to_string(),
            default_availability_zone: "default".to_string(),
        }
    }
}

// =============================================================================
// Lookup
// =============================================================================

/// Outcome of a name lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    /// No record carries the name
    Missing,
    /// A record with the name and matching attributes
    Compatible(T),
    /// Only records with the name but different attributes
    Incompatible,
}

/// Scan for a compatible record by name. A compatible record wins over
/// any number of incompatible namesakes.
fn lookup<T>(
    records: Vec<T>,
    name: &str,
    name_of: impl Fn(&T) -> &str,
    compatible: impl Fn(&T) -> bool,
) -> Lookup<T> {
    let mut exists = false;
    for record in records {
        if name_of(&record) != name {
            continue;
        }
        if compatible(&record) {
            return Lookup::Compatible(record);
        }
        exists = true;
    }

    if exists {
        Lookup::Incompatible
    } else {
        Lookup::Missing
    }
}

/// A volume returned by [`ProvisioningReconciler::create_volume`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedVolume {
    pub volume: VolumeRecord,
    /// False when an existing compatible volume was reused
    pub created: bool,
    /// The request as sent, with defaults filled in
    pub request: VolumeRequest,
}

// =============================================================================
// Provisioning Reconciler
// =============================================================================

/// Idempotent volume and snapshot provisioning
pub struct ProvisioningReconciler {
    backend: OrchestratorClientRef,
    config: ProvisioningConfig,
}

impl ProvisioningReconciler {
    /// Create a new reconciler
    pub fn new(backend: OrchestratorClientRef, config: ProvisioningConfig) -> Self {
        Self { backend, config }
    }

    /// Look up the id of the default profile
    pub async fn default_profile_id(&self) -> Result<String> {
        let profiles = self.backend.list_profiles().await.map_err(|e| {
            error!("Get default profile failed: {}", e);
            e
        })?;

        profiles
            .into_iter()
            .find(|p| p.name == self.config.default_profile_name)
            .map(|p| p.id)
            .ok_or_else(|| Error::FailedPrecondition("No default profile".to_string()))
    }

    /// Scan all volumes for one with the request's name
    pub async fn find_volume(&self, request: &VolumeRequest) -> Result<Lookup<VolumeRecord>> {
        let volumes = self.backend.list_volumes().await.map_err(|e| {
            error!("List volumes failed: {}", e);
            e
        })?;

        let found = lookup(
            volumes,
            &request.name,
            |v| v.name.as_str(),
            |v| v.is_compatible_with(request),
        );
        if let Lookup::Compatible(volume) = &found {
            debug!("Volume {} already exists and is compatible", volume.id);
        }
        Ok(found)
    }

    /// Create a volume, or return the compatible volume that already
    /// carries its name.
    ///
    /// Empty profile id and availability zone are replaced by the
    /// configured defaults before the lookup.
    pub async fn create_volume(&self, mut request: VolumeRequest) -> Result<ProvisionedVolume> {
        if request.name.is_empty() {
            return Err(Error::InvalidArgument("Volume name cannot be empty".to_string()));
        }
        if request.profile_id.is_empty() {
            request.profile_id = self.default_profile_id().await?;
        }
        if request.availability_zone.is_empty() {
            request.availability_zone = self.config.default_availability_zone.clone();
        }

        info!(
            "Creating volume {} ({} GiB, profile {}, zone {})",
            request.name, request.size, request.profile_id, request.availability_zone
        );

        match self.find_volume(&request).await? {
            Lookup::Compatible(volume) => Ok(ProvisionedVolume {
                volume,
                created: false,
                request,
            }),
            Lookup::Incompatible => Err(Error::Incompatible {
                kind: "Volume".to_string(),
                name: request.name,
            }),
            Lookup::Missing => {
                let volume = match self.backend.create_volume(&request).await {
                    Ok(volume) => volume,
                    Err(create_err) => self.recover_create(&request, create_err).await?,
                };
                info!("Created volume {} ({})", volume.name, volume.id);
                Ok(ProvisionedVolume {
                    volume,
                    created: true,
                    request,
                })
            }
        }
    }

    /// The create call failed; the volume may still have been created by
    /// this or a concurrent request. Rescan once before giving up.
    async fn recover_create(
        &self,
        request: &VolumeRequest,
        create_err: Error,
    ) -> Result<VolumeRecord> {
        match self.find_volume(request).await? {
            Lookup::Compatible(volume) => {
                warn!(
                    "Create of volume {} reported failure ({}) but volume {} exists",
                    request.name, create_err, volume.id
                );
                Ok(volume)
            }
            _ => {
                error!("Failed to create volume {}: {}", request.name, create_err);
                Err(create_err)
            }
        }
    }

    /// Delete a volume by id
    pub async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        info!("Deleting volume {}", volume_id);
        self.backend.delete_volume(volume_id).await
    }

    /// Scan all snapshots for one with the request's name
    pub async fn find_snapshot(
        &self,
        request: &SnapshotRequest,
    ) -> Result<Lookup<SnapshotRecord>> {
        let snapshots = self.backend.list_snapshots().await.map_err(|e| {
            error!("List volume snapshots failed: {}", e);
            e
        })?;

        Ok(lookup(
            snapshots,
            &request.name,
            |s| s.name.as_str(),
            |s| s.is_compatible_with(request),
        ))
    }

    /// Create a snapshot, or return the compatible snapshot that already
    /// carries its name
    pub async fn create_snapshot(&self, request: SnapshotRequest) -> Result<SnapshotRecord> {
        if request.name.is_empty() {
            return Err(Error::InvalidArgument("Snapshot Name cannot be empty".to_string()));
        }
        if request.volume_id.is_empty() {
            return Err(Error::InvalidArgument(
                "Source Volume ID cannot be empty".to_string(),
            ));
        }

        info!(
            "Creating snapshot {} of volume {}",
            request.name, request.volume_id
        );

        match self.find_snapshot(&request).await? {
            Lookup::Compatible(snapshot) => {
                debug!("Snapshot {} already exists and is compatible", snapshot.id);
                Ok(snapshot)
            }
            Lookup::Incompatible => Err(Error::Incompatible {
                kind: "Snapshot".to_string(),
                name: request.name,
            }),
            Lookup::Missing => self.backend.create_snapshot(&request).await.map_err(|e| {
                error!("Failed to create snapshot {}: {}", request.name, e);
                e
            }),
        }
    }

    /// Delete a snapshot by id
    pub async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        if snapshot_id.is_empty() {
            return Err(Error::InvalidArgument("Snapshot ID cannot be empty".to_string()));
        }
        info!("Deleting snapshot {}", snapshot_id);
        self.backend.delete_snapshot(snapshot_id).await
    }
}
