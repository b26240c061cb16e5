//! Attachment Reconciler
//!
//! Publishes volumes to hosts and withdraws them again. An attachment is
//! identified by its (volume, host) pair; a publish that matches an
//! existing attachment on every attribute reuses it, any difference is a
//! conflict. Replicated volumes are published on both sides.

use crate::controlplane::node_id::NodeIdentity;
use crate::controlplane::protocol::{volume_context, AccessMode};
use crate::controlplane::replication::ReplicationOrchestrator;
use crate::domain::ports::{AttachmentRecord, AttachmentRequest, HostInfo, OrchestratorClientRef};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// =============================================================================
// Access Protocols
// =============================================================================

/// Data path protocol of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessProtocol {
    FibreChannel,
    Iscsi,
    /// Block device only, no initiator
    Rbd,
}

impl AccessProtocol {
    /// Protocol assumed when a pool does not advertise one
    pub const DEFAULT: AccessProtocol = AccessProtocol::Iscsi;

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessProtocol::FibreChannel => "fibre_channel",
            AccessProtocol::Iscsi => "iscsi",
            AccessProtocol::Rbd => "rbd",
        }
    }

    /// Parse a pool's advertised protocol, case-insensitively. Empty means
    /// [`AccessProtocol::DEFAULT`].
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "" => Ok(Self::DEFAULT),
            "fibre_channel" => Ok(AccessProtocol::FibreChannel),
            "iscsi" => Ok(AccessProtocol::Iscsi),
            "rbd" => Ok(AccessProtocol::Rbd),
            other => Err(Error::UnsupportedProtocol {
                protocol: other.to_string(),
            }),
        }
    }

    /// Pick the initiator this protocol needs from the node identity
    pub fn initiator(&self, node: &NodeIdentity) -> Result<String> {
        match self {
            AccessProtocol::FibreChannel => {
                if node.wwpns.is_empty() {
                    return Err(Error::FailedPrecondition(format!(
                        "protocol is {}, but no wwpn",
                        self
                    )));
                }
                Ok(node.wwpns.join(","))
            }
            AccessProtocol::Iscsi => node.iqns.first().cloned().ok_or_else(|| {
                Error::FailedPrecondition(format!("protocol is {}, but no iqn", self))
            }),
            AccessProtocol::Rbd => Ok(String::new()),
        }
    }
}

impl std::fmt::Display for AccessProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Host attributes reported for every attachment
#[derive(Debug, Clone)]
pub struct AttachmentConfig {
    pub platform: String,
    pub os_type: String,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            platform: std::env::consts::ARCH.to_string(),
            os_type: std::env::consts::OS.to_string(),
        }
    }
}

// =============================================================================
// Publish Types
// =============================================================================

/// A publish request as seen by the reconciler
#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    pub volume_id: String,
    pub node_id: String,
    pub access_mode: AccessMode,
    /// Volume context handed back by the caller
    pub volume_context: BTreeMap<String, String>,
}

/// Attachments backing a publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub primary: AttachmentRecord,
    /// Attachment of the replication secondary, if the volume is paired
    pub secondary: Option<AttachmentRecord>,
}

/// Whether an existing attachment on the same host satisfies the request
pub fn is_compatible(existing: &AttachmentRecord, request: &AttachmentRequest) -> bool {
    existing.host_info.platform == request.host_info.platform
        && existing.host_info.os_type == request.host_info.os_type
        && existing.host_info.initiator == request.host_info.initiator
        && existing.metadata == request.metadata
        && existing.access_protocol == request.access_protocol
}

/// Volume metadata overlaid with the caller's context; context keys win
fn merge_metadata(
    volume: &BTreeMap<String, String>,
    context: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = volume.clone();
    merged.extend(context.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

// =============================================================================
// Attachment Reconciler
// =============================================================================

pub struct AttachmentReconciler {
    backend: OrchestratorClientRef,
    replication: Arc<ReplicationOrchestrator>,
    config: AttachmentConfig,
}

impl AttachmentReconciler {
    pub fn new(
        backend: OrchestratorClientRef,
        replication: Arc<ReplicationOrchestrator>,
        config: AttachmentConfig,
    ) -> Self {
        Self {
            backend,
            replication,
            config,
        }
    }

    /// Publish a volume to the host named by the node id
    pub async fn publish(&self, request: &PublishRequest) -> Result<Published> {
        let volume = self
            .backend
            .get_volume(&request.volume_id)
            .await
            .map_err(|e| {
                debug!("Get volume {} failed: {}", request.volume_id, e);
                Error::NotFound(format!("the volume {} is not exist", request.volume_id))
            })?;

        let pool = self.backend.get_pool(&volume.pool_id).await.map_err(|e| {
            error!("Get pool {} failed: {}", volume.pool_id, e);
            Error::NotFound(format!("the pool {} is not exist", volume.pool_id))
        })?;

        let protocol = AccessProtocol::parse(&pool.extras.io_connectivity.access_protocol)
            .map_err(|e| {
                error!("{}", e);
                e
            })?;
        let node = NodeIdentity::parse(&request.node_id);
        let initiator = protocol.initiator(&node).map_err(|e| {
            error!("{}", e);
            e
        })?;

        let attach_request = AttachmentRequest {
            volume_id: volume.id.clone(),
            host_info: HostInfo {
                platform: self.config.platform.clone(),
                os_type: self.config.os_type.clone(),
                ip: String::new(),
                host: node.host_name.clone(),
                initiator,
            },
            metadata: merge_metadata(&volume.metadata, &request.volume_context),
            access_protocol: protocol.as_str().to_string(),
        };
        let multi_node = request.access_mode.allows_multi_node();

        info!(
            "Publishing volume {} to {} over {}",
            volume.id, node.host_name, protocol
        );
        let primary = self
            .match_or_create(&attach_request, multi_node, &request.node_id)
            .await?;

        let secondary = match attach_request.metadata.get(volume_context::REPLICATION_ID) {
            Some(replication_id) => {
                let replication = self
                    .replication
                    .get_pairing(replication_id)
                    .await
                    .map_err(|e| {
                        error!("Get replication {} failed: {}", replication_id, e);
                        Error::FailedPrecondition("Get replication failed".to_string())
                    })?;

                let secondary_request = AttachmentRequest {
                    volume_id: replication.secondary_volume_id.clone(),
                    ..attach_request.clone()
                };
                info!(
                    "Publishing replication secondary {} to {}",
                    replication.secondary_volume_id, node.host_name
                );
                Some(
                    self.match_or_create(&secondary_request, multi_node, &request.node_id)
                        .await?,
                )
            }
            None => None,
        };

        Ok(Published { primary, secondary })
    }

    /// Reuse a compatible attachment or create a new one
    async fn match_or_create(
        &self,
        request: &AttachmentRequest,
        multi_node: bool,
        node_id: &str,
    ) -> Result<AttachmentRecord> {
        if let Some(existing) = self.find_published(request, multi_node).await? {
            return Ok(existing);
        }

        debug!("Need to create a new attachment for {}", request.volume_id);
        self.backend.create_attachment(request).await.map_err(|e| {
            error!("Failed to publish {} to {}: {}", request.volume_id, node_id, e);
            Error::FailedPrecondition(format!(
                "the volume {} failed to publish to node {}.",
                request.volume_id, node_id
            ))
        })
    }

    /// Check the volume's existing attachments against the request.
    ///
    /// `Ok(None)` means a new attachment is needed.
    async fn find_published(
        &self,
        request: &AttachmentRequest,
        multi_node: bool,
    ) -> Result<Option<AttachmentRecord>> {
        let attachments = self.backend.list_attachments().await.map_err(|e| {
            debug!("List volume attachments failed: {}", e);
            Error::FailedPrecondition(e.to_string())
        })?;

        for existing in attachments {
            if existing.volume_id != request.volume_id {
                continue;
            }

            if existing.host_info.host != request.host_info.host {
                if !multi_node {
                    return Err(Error::FailedPrecondition(format!(
                        "the volume {} has been published to another node and does not have MULTI_NODE volume capability",
                        request.volume_id
                    )));
                }
                continue;
            }

            if is_compatible(&existing, request) {
                debug!("Volume published and is compatible: {}", existing.id);
                return Ok(Some(existing));
            }

            error!(
                "Volume published but is incompatible, incompatible attachment id = {}",
                existing.id
            );
            return Err(Error::Incompatible {
                kind: "VolumeAttachment".to_string(),
                name: existing.id,
            });
        }

        Ok(None)
    }

    /// Remove the volume's attachments, restricted to the node's host
    /// unless the node id is empty. Returns the number deleted.
    pub async fn unpublish(&self, volume_id: &str, node_id: &str) -> Result<usize> {
        if volume_id.is_empty() {
            return Err(Error::InvalidArgument("Volume ID cannot be empty".to_string()));
        }

        self.backend.get_volume(volume_id).await.map_err(|e| {
            debug!("Get volume {} failed: {}", volume_id, e);
            Error::NotFound(format!("the volume {} is not exist", volume_id))
        })?;

        let attachments = self.backend.list_attachments().await.map_err(|e| {
            error!("List volume attachments failed: {}", e);
            Error::FailedPrecondition("Failed to unpublish volume.".to_string())
        })?;

        let host_name = NodeIdentity::parse(node_id).host_name;
        let on_host = |a: &AttachmentRecord| node_id.is_empty() || a.host_info.host == host_name;

        let mut volume_ids = vec![volume_id.to_string()];
        if let Some(replication) = self.replication.find_pairing(volume_id).await? {
            if replication.secondary_volume_id != volume_id {
                volume_ids.push(replication.secondary_volume_id);
            }
        }

        let targets: Vec<AttachmentRecord> = attachments
            .into_iter()
            .filter(|a| volume_ids.contains(&a.volume_id) && on_host(a))
            .collect();

        info!(
            "Unpublishing volume {} from {}: {} attachment(s)",
            volume_id,
            if node_id.is_empty() { "all nodes" } else { host_name.as_str() },
            targets.len()
        );

        for attachment in &targets {
            self.backend.delete_attachment(&attachment.id).await.map_err(|e| {
                warn!("Failed to delete attachment {}: {}", attachment.id, e);
                Error::FailedPrecondition(format!(
                    "the volume {} failed to unpublish from node {}.",
                    volume_id, node_id
                ))
            })?;
            debug!("Attachment {} has been successfully deleted", attachment.id);
        }

        Ok(targets.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::{pool, BackendOp, InMemoryConfig, InMemoryOrchestrator};
    use crate::controlplane::provisioning::{ProvisioningConfig, ProvisioningReconciler};
    use crate::controlplane::replication::ReplicationConfig;
    use crate::domain::ports::{OrchestratorClient, VolumeRecord, VolumeRequest};
    use crate::error::ErrorCode;
    use assert_matches::assert_matches;

    const NODE_A: &str = "node-a,iqn:iqn.1993-08.org.debian:01:aaa";
    const NODE_B: &str = "node-b,iqn:iqn.1993-08.org.debian:01:bbb";

    struct Fixture {
        backend: Arc<InMemoryOrchestrator>,
        provisioning: Arc<ProvisioningReconciler>,
        replication: Arc<ReplicationOrchestrator>,
        attachments: AttachmentReconciler,
    }

    fn fixture(config: InMemoryConfig) -> Fixture {
        let backend = Arc::new(InMemoryOrchestrator::new(config));
        let provisioning = Arc::new(ProvisioningReconciler::new(
            backend.clone(),
            ProvisioningConfig::default(),
        ));
        let replication = Arc::new(ReplicationOrchestrator::new(
            backend.clone(),
            provisioning.clone(),
            ReplicationConfig::default(),
        ));
        let attachments =
            AttachmentReconciler::new(backend.clone(), replication.clone(), AttachmentConfig::default());
        Fixture {
            backend,
            provisioning,
            replication,
            attachments,
        }
    }

    async fn volume(f: &Fixture, name: &str) -> VolumeRecord {
        f.provisioning
            .create_volume(VolumeRequest {
                name: name.into(),
                size: 1,
                ..Default::default()
            })
            .await
            .unwrap()
            .volume
    }

    fn publish_request(volume_id: &str, node_id: &str, access_mode: AccessMode) -> PublishRequest {
        PublishRequest {
            volume_id: volume_id.into(),
            node_id: node_id.into(),
            access_mode,
            volume_context: BTreeMap::new(),
        }
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!(AccessProtocol::parse("").unwrap(), AccessProtocol::Iscsi);
        assert_eq!(AccessProtocol::parse("FIBRE_CHANNEL").unwrap(), AccessProtocol::FibreChannel);
        assert_eq!(AccessProtocol::parse("rbd").unwrap(), AccessProtocol::Rbd);
        let err = AccessProtocol::parse("nvmeof").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_initiator_by_protocol() {
        let node = NodeIdentity::parse("h,wwpn:p1,wwpn:p2,iqn:q1,iqn:q2");
        assert_eq!(AccessProtocol::FibreChannel.initiator(&node).unwrap(), "p1,p2");
        assert_eq!(AccessProtocol::Iscsi.initiator(&node).unwrap(), "q1");
        assert_eq!(AccessProtocol::Rbd.initiator(&node).unwrap(), "");

        let bare = NodeIdentity::parse("h");
        assert_eq!(
            AccessProtocol::Iscsi.initiator(&bare).unwrap_err().code(),
            ErrorCode::FailedPrecondition
        );
        assert_eq!(
            AccessProtocol::FibreChannel.initiator(&bare).unwrap_err().to_string(),
            "Failed precondition: protocol is fibre_channel, but no wwpn"
        );
    }

    #[tokio::test]
    async fn test_publish_is_idempotent() {
        let f = fixture(InMemoryConfig::default());
        let vol = volume(&f, "pvc-1").await;
        let request = publish_request(&vol.id, NODE_A, AccessMode::SingleNodeWriter);

        let first = f.attachments.publish(&request).await.unwrap();
        let second = f.attachments.publish(&request).await.unwrap();

        assert_eq!(first.primary.id, second.primary.id);
        assert_eq!(first.primary.host_info.host, "node-a");
        assert_eq!(first.primary.host_info.initiator, "iqn.1993-08.org.debian:01:aaa");
        assert_eq!(first.primary.access_protocol, "iscsi");
        assert!(first.secondary.is_none());
        assert_eq!(f.backend.list_attachments().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_host_needs_multi_node() {
        let f = fixture(InMemoryConfig::default());
        let vol = volume(&f, "pvc-1").await;
        f.attachments
            .publish(&publish_request(&vol.id, NODE_A, AccessMode::SingleNodeWriter))
            .await
            .unwrap();

        let err = f
            .attachments
            .publish(&publish_request(&vol.id, NODE_B, AccessMode::SingleNodeWriter))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FailedPrecondition);

        let shared = f
            .attachments
            .publish(&publish_request(&vol.id, NODE_B, AccessMode::MultiNodeMultiWriter))
            .await
            .unwrap();
        assert_eq!(shared.primary.host_info.host, "node-b");
        assert_eq!(f.backend.list_attachments().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_same_host_different_context_conflicts() {
        let f = fixture(InMemoryConfig::default());
        let vol = volume(&f, "pvc-1").await;
        f.attachments
            .publish(&publish_request(&vol.id, NODE_A, AccessMode::SingleNodeWriter))
            .await
            .unwrap();

        let mut request = publish_request(&vol.id, NODE_A, AccessMode::SingleNodeWriter);
        request.volume_context.insert("fsType".into(), "xfs".into());
        let err = f.attachments.publish(&request).await.unwrap_err();
        assert_matches!(err, Error::Incompatible { .. });
        assert_eq!(err.code(), ErrorCode::AlreadyExists);
    }

    #[tokio::test]
    async fn test_missing_volume_and_pool() {
        let f = fixture(InMemoryConfig::default());
        let err = f
            .attachments
            .publish(&publish_request("vol-missing", NODE_A, AccessMode::SingleNodeWriter))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        f.backend
            .insert_volume(VolumeRecord {
                id: "vol-orphan".into(),
                name: "orphan".into(),
                pool_id: "pool-gone".into(),
                ..Default::default()
            })
            .await;
        let err = f
            .attachments
            .publish(&publish_request("vol-orphan", NODE_A, AccessMode::SingleNodeWriter))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "the pool pool-gone is not exist");
    }

    #[tokio::test]
    async fn test_fibre_channel_pool() {
        let f = fixture(InMemoryConfig {
            pools: vec![pool("pool-fc", "default", 50, "fibre_channel")],
            ..Default::default()
        });
        let vol = volume(&f, "pvc-1").await;

        let err = f
            .attachments
            .publish(&publish_request(&vol.id, NODE_A, AccessMode::SingleNodeWriter))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FailedPrecondition);

        let published = f
            .attachments
            .publish(&publish_request(
                &vol.id,
                "node-a,wwpn:21000024ff3a1b2c,wwpn:21000024ff3a1b2d",
                AccessMode::SingleNodeWriter,
            ))
            .await
            .unwrap();
        assert_eq!(
            published.primary.host_info.initiator,
            "21000024ff3a1b2c,21000024ff3a1b2d"
        );
    }

    #[tokio::test]
    async fn test_unsupported_pool_protocol() {
        let f = fixture(InMemoryConfig {
            pools: vec![pool("pool-nvme", "default", 50, "nvmeof")],
            ..Default::default()
        });
        let vol = volume(&f, "pvc-1").await;

        let err = f
            .attachments
            .publish(&publish_request(&vol.id, NODE_A, AccessMode::SingleNodeWriter))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_create_failure_is_precondition() {
        let f = fixture(InMemoryConfig::default());
        let vol = volume(&f, "pvc-1").await;
        f.backend.fail_once(BackendOp::CreateAttachment);

        let err = f
            .attachments
            .publish(&publish_request(&vol.id, NODE_A, AccessMode::SingleNodeWriter))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FailedPrecondition);
    }

    #[tokio::test]
    async fn test_publish_and_unpublish_replicated_volume() {
        let f = fixture(InMemoryConfig::default());
        let provisioned = f
            .provisioning
            .create_volume(VolumeRequest {
                name: "pvc-1".into(),
                size: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        let pairing = f
            .replication
            .establish(&provisioned.volume, &provisioned.request, None)
            .await
            .unwrap();

        let mut request =
            publish_request(&provisioned.volume.id, NODE_A, AccessMode::SingleNodeWriter);
        request
            .volume_context
            .insert(volume_context::REPLICATION_ID.into(), pairing.id.clone());

        let published = f.attachments.publish(&request).await.unwrap();
        let secondary = published.secondary.expect("secondary attachment");
        assert_eq!(secondary.volume_id, pairing.secondary_volume_id);

        let again = f.attachments.publish(&request).await.unwrap();
        assert_eq!(again.secondary.map(|a| a.id), Some(secondary.id));

        let removed = f
            .attachments
            .unpublish(&provisioned.volume.id, NODE_A)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(f.backend.list_attachments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unpublish_filters_by_host() {
        let f = fixture(InMemoryConfig::default());
        let vol = volume(&f, "pvc-1").await;
        for node in [NODE_A, NODE_B] {
            f.attachments
                .publish(&publish_request(&vol.id, node, AccessMode::MultiNodeReaderOnly))
                .await
                .unwrap();
        }

        assert_eq!(f.attachments.unpublish(&vol.id, NODE_B).await.unwrap(), 1);
        let left = f.backend.list_attachments().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].host_info.host, "node-a");

        f.attachments
            .publish(&publish_request(&vol.id, NODE_B, AccessMode::MultiNodeReaderOnly))
            .await
            .unwrap();
        assert_eq!(f.attachments.unpublish(&vol.id, "").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unpublish_failures() {
        let f = fixture(InMemoryConfig::default());
        let err = f.attachments.unpublish("vol-missing", NODE_A).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let vol = volume(&f, "pvc-1").await;
        f.attachments
            .publish(&publish_request(&vol.id, NODE_A, AccessMode::SingleNodeWriter))
            .await
            .unwrap();
        f.backend.fail_once(BackendOp::DeleteAttachment);

        let err = f.attachments.unpublish(&vol.id, NODE_A).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::FailedPrecondition);
        assert_eq!(f.backend.list_attachments().await.unwrap().len(), 1);
    }
}
