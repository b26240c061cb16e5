//! OpenSDS Orchestrator Client
//!
//! Talks to the OpenSDS hotpot REST API (`/v1beta/{tenant}/...`) with
//! reqwest. Records are exchanged as JSON in the orchestrator's own
//! camelCase shape, so the domain records deserialize directly.

use crate::domain::ports::{
    AttachmentRecord, AttachmentRequest, OrchestratorClient, PoolRecord, ProfileRecord,
    ReplicationRecord, ReplicationRequest, SnapshotRecord, SnapshotRequest, VolumeRecord,
    VolumeRequest,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

const BACKEND: &str = "opensds";
const API_VERSION: &str = "v1beta";
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the OpenSDS client
#[derive(Debug, Clone)]
pub struct OpenSdsConfig {
    /// Hotpot API endpoint
    pub endpoint: String,
    /// Tenant (project) id used in every path
    pub tenant_id: String,
    /// Keystone token, sent as `X-Auth-Token` when set
    pub auth_token: Option<String>,
    /// Transport timeout per call
    pub timeout: Duration,
}

impl Default for OpenSdsConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:50040".to_string(),
            tenant_id: "e93b4c0934da416eb9c8d120c5d04d96".to_string(),
            auth_token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Resource Paths
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Resource {
    Volumes,
    Attachments,
    Snapshots,
    Replications,
    Pools,
    Profiles,
}

impl Resource {
    fn path(&self) -> &'static str {
        match self {
            Resource::Volumes => "block/volumes",
            Resource::Attachments => "block/attachments",
            Resource::Snapshots => "block/snapshots",
            Resource::Replications => "block/replications",
            Resource::Pools => "pools",
            Resource::Profiles => "profiles",
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Resource::Volumes => "Volume",
            Resource::Attachments => "VolumeAttachment",
            Resource::Snapshots => "VolumeSnapshot",
            Resource::Replications => "Replication",
            Resource::Pools => "StoragePool",
            Resource::Profiles => "Profile",
        }
    }
}

// =============================================================================
// OpenSDS Client
// =============================================================================

/// HTTP client for the OpenSDS orchestrator
pub struct OpenSdsClient {
    config: OpenSdsConfig,
    http: reqwest::Client,
}

impl OpenSdsClient {
    /// Create a new client
    pub fn new(config: OpenSdsConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }

    fn collection_url(&self, resource: Resource) -> String {
        format!(
            "{}/{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            API_VERSION,
            urlencoding::encode(&self.config.tenant_id),
            resource.path()
        )
    }

    fn item_url(&self, resource: Resource, id: &str) -> String {
        format!("{}/{}", self.collection_url(resource), urlencoding::encode(id))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.config.auth_token {
            Some(token) => builder.header(AUTH_TOKEN_HEADER, token),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        resource: Resource,
        id: Option<&str>,
        operation: &str,
    ) -> Result<reqwest::Response> {
        let response = builder.send().await.map_err(|e| Error::BackendUnavailable {
            backend: BACKEND.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!("OpenSDS {} failed: {} {}", operation, status, body);

        match (status, id) {
            (StatusCode::NOT_FOUND, Some(id)) => Err(Error::not_found(resource.kind(), id)),
            _ => Err(Error::backend_failed(
                BACKEND,
                operation,
                format!("{}: {}", status, body.trim()),
            )),
        }
    }

    /// Read and decode a successful response body
    async fn decode<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        operation: &str,
    ) -> Result<T> {
        let body = response.bytes().await.map_err(|e| Error::BackendUnavailable {
            backend: BACKEND.to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&body).map_err(|e| {
            warn!("OpenSDS {} returned an undecodable body: {}", operation, e);
            Error::backend_failed(BACKEND, operation, format!("invalid response body: {}", e))
        })
    }

    async fn list<T: DeserializeOwned>(&self, resource: Resource) -> Result<Vec<T>> {
        let operation = format!("list {}", resource.path());
        debug!("OpenSDS {}", operation);
        let url = self.collection_url(resource);
        let response = self
            .send(self.request(Method::GET, &url), resource, None, &operation)
            .await?;
        // the API answers an empty collection with `null`
        let items: Option<Vec<T>> = self.decode(response, &operation).await?;
        Ok(items.unwrap_or_default())
    }

    async fn get<T: DeserializeOwned>(&self, resource: Resource, id: &str) -> Result<T> {
        let operation = format!("get {}", resource.path());
        debug!("OpenSDS {} {}", operation, id);
        let url = self.item_url(resource, id);
        let response = self
            .send(self.request(Method::GET, &url), resource, Some(id), &operation)
            .await?;
        self.decode(response, &operation).await
    }

    async fn create<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        resource: Resource,
        body: &B,
    ) -> Result<T> {
        let operation = format!("create {}", resource.path());
        debug!("OpenSDS {}", operation);
        let url = self.collection_url(resource);
        let response = self
            .send(self.request(Method::POST, &url).json(body), resource, None, &operation)
            .await?;
        self.decode(response, &operation).await
    }

    async fn delete(&self, resource: Resource, id: &str) -> Result<()> {
        let operation = format!("delete {}", resource.path());
        debug!("OpenSDS {} {}", operation, id);
        let url = self.item_url(resource, id);
        self.send(self.request(Method::DELETE, &url), resource, Some(id), &operation)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OrchestratorClient for OpenSdsClient {
    async fn list_volumes(&self) -> Result<Vec<VolumeRecord>> {
        self.list(Resource::Volumes).await
    }

    async fn get_volume(&self, id: &str) -> Result<VolumeRecord> {
        self.get(Resource::Volumes, id).await
    }

    async fn create_volume(&self, request: &VolumeRequest) -> Result<VolumeRecord> {
        self.create(Resource::Volumes, request).await
    }

    async fn delete_volume(&self, id: &str) -> Result<()> {
        self.delete(Resource::Volumes, id).await
    }

    async fn list_attachments(&self) -> Result<Vec<AttachmentRecord>> {
        self.list(Resource::Attachments).await
    }

    async fn get_attachment(&self, id: &str) -> Result<AttachmentRecord> {
        self.get(Resource::Attachments, id).await
    }

    async fn create_attachment(&self, request: &AttachmentRequest) -> Result<AttachmentRecord> {
        self.create(Resource::Attachments, request).await
    }

    async fn delete_attachment(&self, id: &str) -> Result<()> {
        self.delete(Resource::Attachments, id).await
    }

    async fn list_snapshots(&self) -> Result<Vec<SnapshotRecord>> {
        self.list(Resource::Snapshots).await
    }

    async fn get_snapshot(&self, id: &str) -> Result<SnapshotRecord> {
        self.get(Resource::Snapshots, id).await
    }

    async fn create_snapshot(&self, request: &SnapshotRequest) -> Result<SnapshotRecord> {
        self.create(Resource::Snapshots, request).await
    }

    async fn delete_snapshot(&self, id: &str) -> Result<()> {
        self.delete(Resource::Snapshots, id).await
    }

    async fn list_replications(&self) -> Result<Vec<ReplicationRecord>> {
        self.list(Resource::Replications).await
    }

    async fn get_replication(&self, id: &str) -> Result<ReplicationRecord> {
        self.get(Resource::Replications, id).await
    }

    async fn create_replication(
        &self,
        request: &ReplicationRequest,
    ) -> Result<ReplicationRecord> {
        self.create(Resource::Replications, request).await
    }

    async fn delete_replication(&self, id: &str) -> Result<()> {
        self.delete(Resource::Replications, id).await
    }

    async fn list_pools(&self) -> Result<Vec<PoolRecord>> {
        self.list(Resource::Pools).await
    }

    async fn get_pool(&self, id: &str) -> Result<PoolRecord> {
        self.get(Resource::Pools, id).await
    }

    async fn list_profiles(&self) -> Result<Vec<ProfileRecord>> {
        self.list(Resource::Profiles).await
    }

    async fn health_check(&self) -> Result<bool> {
        let url = self.collection_url(Resource::Profiles);
        match self.request(Method::GET, &url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                warn!("OpenSDS health check failed: {}", e);
                Ok(false)
            }
        }
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use assert_matches::assert_matches;

    #[test]
    fn test_urls() {
        let client = OpenSdsClient::new(OpenSdsConfig {
            endpoint: "http://hotpot:50040/".into(),
            tenant_id: "tenant-1".into(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            client.collection_url(Resource::Volumes),
            "http://hotpot:50040/v1beta/tenant-1/block/volumes"
        );
        assert_eq!(
            client.item_url(Resource::Pools, "pool 1"),
            "http://hotpot:50040/v1beta/tenant-1/pools/pool%201"
        );
    }

    #[test]
    fn test_volume_request_body() {
        let request = VolumeRequest {
            name: "pvc-1".into(),
            size: 2,
            profile_id: "profile-1".into(),
            availability_zone: "default".into(),
            ..Default::default()
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["availabilityZone"], "default");
        assert_eq!(body["profileId"], "profile-1");
        assert!(body.get("snapshotId").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let client = OpenSdsClient::new(OpenSdsConfig {
            endpoint: "http://127.0.0.1:1".into(),
            timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .unwrap();

        let err = client.list_volumes().await.unwrap_err();
        assert!(err.is_backend());
        assert!(!client.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_body_is_backend_failure() {
        let app = axum::Router::new()
            .route("/v1beta/tenant-1/block/volumes", axum::routing::get(|| async { "not json" }))
            .route(
                "/v1beta/tenant-1/block/volumes/vol-1",
                axum::routing::get(|| async { "{\"id\": 7" }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let client = OpenSdsClient::new(OpenSdsConfig {
            endpoint: format!("http://{}", addr),
            tenant_id: "tenant-1".into(),
            ..Default::default()
        })
        .unwrap();

        let err = client.list_volumes().await.unwrap_err();
        assert_matches!(err, Error::BackendOperationFailed { .. });
        assert_eq!(err.code(), ErrorCode::Unknown);

        let err = client.get_volume("vol-1").await.unwrap_err();
        assert_matches!(err, Error::BackendOperationFailed { .. });
    }
}
