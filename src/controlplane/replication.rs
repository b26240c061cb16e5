//! Replication Orchestrator
//!
//! Treats a primary volume, its secondary and the pairing record as one
//! logical unit. Nothing here is transactional: a failure part way through
//! is surfaced and whatever was already created or deleted stays that way.

use crate::controlplane::provisioning::ProvisioningReconciler;
use crate::domain::ports::{
    OrchestratorClientRef, ReplicationMode, ReplicationRecord, ReplicationRequest, VolumeRecord,
    VolumeRequest,
};
use crate::error::Result;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Placement of secondary volumes
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Zone used when the request names no secondary zone
    pub secondary_availability_zone: String,
    /// Prepended to the primary's name
    pub secondary_name_prefix: String,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            secondary_availability_zone: "secondary".to_string(),
            secondary_name_prefix: "secondary-".to_string(),
        }
    }
}

// =============================================================================
// Replication Orchestrator
// =============================================================================

pub struct ReplicationOrchestrator {
    backend: OrchestratorClientRef,
    provisioning: Arc<ProvisioningReconciler>,
    config: ReplicationConfig,
}

impl ReplicationOrchestrator {
    pub fn new(
        backend: OrchestratorClientRef,
        provisioning: Arc<ProvisioningReconciler>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            backend,
            provisioning,
            config,
        }
    }

    /// Create the secondary volume for a freshly created primary and pair
    /// the two synchronously.
    ///
    /// `request` is the primary's request with defaults filled in. A
    /// pairing failure leaves the secondary volume in place.
    pub async fn establish(
        &self,
        primary: &VolumeRecord,
        request: &VolumeRequest,
        secondary_availability_zone: Option<&str>,
    ) -> Result<ReplicationRecord> {
        let zone = secondary_availability_zone
            .filter(|z| !z.is_empty())
            .unwrap_or(self.config.secondary_availability_zone.as_str());

        let secondary_request = VolumeRequest {
            name: format!("{}{}", self.config.secondary_name_prefix, request.name),
            availability_zone: zone.to_string(),
            ..request.clone()
        };

        info!(
            "Creating secondary volume {} in zone {} for {}",
            secondary_request.name, zone, primary.id
        );
        let secondary = self
            .provisioning
            .create_volume(secondary_request)
            .await
            .map_err(|e| {
                error!("Failed to create secondary volume for {}: {}", primary.id, e);
                e
            })?
            .volume;

        let pairing = ReplicationRequest {
            name: request.name.clone(),
            primary_volume_id: primary.id.clone(),
            secondary_volume_id: secondary.id.clone(),
            replication_mode: ReplicationMode::Sync,
            replication_period: 0,
        };

        match self.backend.create_replication(&pairing).await {
            Ok(replication) => {
                info!(
                    "Replication {} established: {} -> {}",
                    replication.id, primary.id, secondary.id
                );
                Ok(replication)
            }
            Err(e) => {
                // TODO: decide whether the orphaned secondary should be deleted here
                warn!(
                    "Create replication failed: {}; secondary volume {} is left behind",
                    e, secondary.id
                );
                Err(e)
            }
        }
    }

    /// Find the pairing that references the volume on either side
    pub async fn find_pairing(&self, volume_id: &str) -> Result<Option<ReplicationRecord>> {
        let replications = self.backend.list_replications().await?;
        Ok(replications.into_iter().find(|r| r.references(volume_id)))
    }

    /// Fetch a pairing by id
    pub async fn get_pairing(&self, replication_id: &str) -> Result<ReplicationRecord> {
        self.backend.get_replication(replication_id).await
    }

    /// Delete a volume together with its pairing and partner.
    ///
    /// With a pairing the order is: pairing, primary, secondary. The first
    /// failure aborts the sequence.
    pub async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        match self.find_pairing(volume_id).await? {
            Some(replication) => {
                info!(
                    "Volume {} is paired by replication {}, deleting both sides",
                    volume_id, replication.id
                );
                self.backend.delete_replication(&replication.id).await?;
                self.provisioning
                    .delete_volume(&replication.primary_volume_id)
                    .await?;
                self.provisioning
                    .delete_volume(&replication.secondary_volume_id)
                    .await
            }
            None => {
                debug!("Volume {} has no replication", volume_id);
                self.provisioning.delete_volume(volume_id).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::{BackendOp, InMemoryOrchestrator};
    use crate::controlplane::provisioning::ProvisioningConfig;
    use crate::domain::ports::OrchestratorClient;

    fn setup() -> (Arc<InMemoryOrchestrator>, Arc<ProvisioningReconciler>, ReplicationOrchestrator) {
        let backend = Arc::new(InMemoryOrchestrator::default());
        let provisioning = Arc::new(ProvisioningReconciler::new(
            backend.clone(),
            ProvisioningConfig::default(),
        ));
        let replication = ReplicationOrchestrator::new(
            backend.clone(),
            provisioning.clone(),
            ReplicationConfig::default(),
        );
        (backend, provisioning, replication)
    }

    async fn primary(provisioning: &ProvisioningReconciler) -> (VolumeRecord, VolumeRequest) {
        let provisioned = provisioning
            .create_volume(VolumeRequest {
                name: "pvc-1".into(),
                size: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        (provisioned.volume, provisioned.request)
    }

    #[tokio::test]
    async fn test_establish_pairing() {
        let (backend, provisioning, replication) = setup();
        let (volume, request) = primary(&provisioning).await;

        let pairing = replication.establish(&volume, &request, None).await.unwrap();
        assert_eq!(pairing.primary_volume_id, volume.id);
        assert_eq!(pairing.replication_mode, ReplicationMode::Sync);
        assert_eq!(pairing.replication_period, 0);

        let secondary = backend.get_volume(&pairing.secondary_volume_id).await.unwrap();
        assert_eq!(secondary.name, "secondary-pvc-1");
        assert_eq!(secondary.availability_zone, "secondary");
        assert_eq!(secondary.size, 2);

        let found = replication.find_pairing(&secondary.id).await.unwrap();
        assert_eq!(found.map(|r| r.id), Some(pairing.id));
    }

    #[tokio::test]
    async fn test_pairing_failure_leaves_secondary() {
        let (backend, provisioning, replication) = setup();
        let (volume, request) = primary(&provisioning).await;
        backend.fail_once(BackendOp::CreateReplication);

        assert!(replication.establish(&volume, &request, None).await.is_err());
        let names: Vec<_> = backend
            .list_volumes()
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, vec!["pvc-1", "secondary-pvc-1"]);
    }

    #[tokio::test]
    async fn test_delete_paired_volume() {
        let (backend, provisioning, replication) = setup();
        let (volume, request) = primary(&provisioning).await;
        let pairing = replication.establish(&volume, &request, None).await.unwrap();

        // deleting through the secondary removes everything as well
        replication.delete_volume(&pairing.secondary_volume_id).await.unwrap();

        let journal = backend.journal();
        assert_eq!(
            &journal[journal.len() - 3..],
            &[
                format!("delete_replication:{}", pairing.id),
                format!("delete_volume:{}", pairing.primary_volume_id),
                format!("delete_volume:{}", pairing.secondary_volume_id),
            ]
        );
        assert!(backend.list_volumes().await.unwrap().is_empty());
        assert!(backend.list_replications().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_unpaired_volume() {
        let (backend, provisioning, replication) = setup();
        let (volume, _) = primary(&provisioning).await;
        let other = provisioning
            .create_volume(VolumeRequest {
                name: "pvc-2".into(),
                size: 1,
                ..Default::default()
            })
            .await
            .unwrap()
            .volume;

        replication.delete_volume(&volume.id).await.unwrap();

        let remaining: Vec<_> = backend
            .list_volumes()
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(remaining, vec![other.id]);
    }

    #[tokio::test]
    async fn test_delete_stops_at_first_failure() {
        let (backend, provisioning, replication) = setup();
        let (volume, request) = primary(&provisioning).await;
        let pairing = replication.establish(&volume, &request, None).await.unwrap();
        backend.fail_once(BackendOp::DeleteVolume);

        assert!(replication.delete_volume(&volume.id).await.is_err());
        // pairing is gone, both volumes remain
        assert!(backend.list_replications().await.unwrap().is_empty());
        assert!(backend.get_volume(&pairing.secondary_volume_id).await.is_ok());
        assert!(backend.get_volume(&volume.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_listing_failure_is_surfaced() {
        let (backend, provisioning, replication) = setup();
        let (volume, _) = primary(&provisioning).await;
        backend.fail_once(BackendOp::ListReplications);

        assert!(replication.delete_volume(&volume.id).await.is_err());
        assert!(backend.get_volume(&volume.id).await.is_ok());
    }
}
