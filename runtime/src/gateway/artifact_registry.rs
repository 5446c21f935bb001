//! Artifact Registry gateway.
//!
//! Metadata calls go to the Artifact Registry REST API (v1). Copies are
//! delegated to `skopeo copy --all`, which preserves the digest and every
//! platform variant of a multi-arch index.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image_archive_core::error::{ArchiveError, Result};
use image_archive_core::{ImageVersion, RegistryConfig, RegistryGateway};
use serde::Deserialize;

use super::auth::GatewayAuth;

/// Page size requested when listing docker images.
const PAGE_SIZE: u32 = 1000;

/// Registry label used in error messages.
const REGISTRY: &str = "artifactregistry";

/// google.rpc.Code values reported by long-running operations.
const RPC_NOT_FOUND: i32 = 5;
const RPC_FAILED_PRECONDITION: i32 = 9;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDockerImagesResponse {
    #[serde(default)]
    docker_images: Vec<DockerImage>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerImage {
    name: String,
    #[serde(default)]
    tags: Vec<String>,
    /// int64 is encoded as a JSON string
    #[serde(default)]
    image_size_bytes: Option<String>,
    #[serde(default)]
    build_time: Option<DateTime<Utc>>,
    #[serde(default)]
    update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    upload_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<RpcStatus>,
}

#[derive(Debug, Deserialize)]
struct RpcStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl DockerImage {
    fn into_version(self) -> Result<ImageVersion> {
        let mut version = ImageVersion::from_resource_name(&self.name)?;
        let hex = version.digest_hex().to_string();
        version.tags = self.tags.into_iter().filter(|tag| *tag != hex).collect();
        version.size_bytes = self
            .image_size_bytes
            .and_then(|size| size.parse().ok())
            .unwrap_or_default();
        version.build_time = self.build_time;
        version.update_time = self.update_time;
        version.upload_time = self.upload_time;
        Ok(version)
    }
}

/// Gateway backed by Google Artifact Registry.
pub struct ArtifactRegistryGateway {
    http: reqwest::Client,
    endpoint: String,
    project: String,
    location: String,
    auth: GatewayAuth,
    skopeo: PathBuf,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl ArtifactRegistryGateway {
    /// Create a gateway for repositories in `project`/`location`.
    pub fn new(
        project: impl Into<String>,
        location: impl Into<String>,
        config: &RegistryConfig,
        auth: GatewayAuth,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            project: project.into(),
            location: location.into(),
            auth,
            skopeo: config.skopeo.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            poll_attempts: config.poll_attempts,
        }
    }

    fn repository_url(&self, repository: &str) -> String {
        format!(
            "{}/projects/{}/locations/{}/repositories/{}",
            self.endpoint, self.project, self.location, repository
        )
    }

    fn package_resource(version: &ImageVersion) -> String {
        format!(
            "{}/packages/{}",
            version.repository_resource_name(),
            version.name.replace('/', "%2F")
        )
    }

    fn package_url(&self, version: &ImageVersion) -> String {
        format!("{}/{}", self.endpoint, Self::package_resource(version))
    }

    fn version_url(&self, version: &ImageVersion) -> String {
        format!("{}/versions/{}", self.package_url(version), version.digest)
    }

    fn registry_error(message: impl Into<String>) -> ArchiveError {
        ArchiveError::Registry {
            registry: REGISTRY.to_string(),
            message: message.into(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let token = self.auth.bearer().await?;
        request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Self::registry_error(format!("Request failed: {}", e)))
    }

    /// Map a non-success response onto the error taxonomy.
    async fn error_for(response: reqwest::Response, subject: &str) -> ArchiveError {
        let code = response.status();
        let body = response.text().await.unwrap_or_default();
        let (status, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => (envelope.error.status, envelope.error.message),
            Err(_) => (String::new(), body),
        };

        match status.as_str() {
            "NOT_FOUND" => ArchiveError::NotFound(subject.to_string()),
            "ALREADY_EXISTS" => ArchiveError::AlreadyExists(subject.to_string()),
            "FAILED_PRECONDITION" => ArchiveError::FailedPrecondition(message),
            _ if code == reqwest::StatusCode::NOT_FOUND => {
                ArchiveError::NotFound(subject.to_string())
            }
            _ if code == reqwest::StatusCode::CONFLICT => {
                ArchiveError::AlreadyExists(subject.to_string())
            }
            _ => Self::registry_error(format!("{} returned {}: {}", subject, code, message)),
        }
    }

    async fn json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| Self::registry_error(format!("Invalid response body: {}", e)))
    }

    /// Poll a long-running operation until it finishes.
    async fn wait_for(&self, mut operation: Operation, subject: &str) -> Result<()> {
        let mut attempts = 0;
        while !operation.done {
            if attempts >= self.poll_attempts {
                return Err(ArchiveError::Timeout(format!(
                    "operation {} for {} did not finish",
                    operation.name, subject
                )));
            }
            attempts += 1;
            tokio::time::sleep(self.poll_interval).await;

            let url = format!("{}/{}", self.endpoint, operation.name);
            let response = self.send(self.http.get(&url)).await?;
            if !response.status().is_success() {
                return Err(Self::error_for(response, subject).await);
            }
            operation = Self::json(response).await?;
        }

        match operation.error {
            None => Ok(()),
            Some(status) if status.code == RPC_NOT_FOUND => {
                Err(ArchiveError::NotFound(subject.to_string()))
            }
            Some(status) if status.code == RPC_FAILED_PRECONDITION => {
                Err(ArchiveError::FailedPrecondition(status.message))
            }
            Some(status) => Err(Self::registry_error(format!(
                "operation on {} failed ({}): {}",
                subject, status.code, status.message
            ))),
        }
    }
}

#[async_trait]
impl RegistryGateway for ArtifactRegistryGateway {
    async fn list_versions(&self, repository: &str) -> Result<Vec<ImageVersion>> {
        let url = format!("{}/dockerImages", self.repository_url(repository));
        let mut versions = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("pageSize", PAGE_SIZE.to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let response = self.send(self.http.get(&url).query(&query)).await?;
            if !response.status().is_success() {
                return Err(Self::error_for(response, repository).await);
            }
            let page: ListDockerImagesResponse = Self::json(response).await?;

            for image in page.docker_images {
                match image.into_version() {
                    Ok(version) => versions.push(version),
                    Err(e) => tracing::warn!(repository, error = %e, "Skipping unparseable image"),
                }
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::debug!(repository, count = versions.len(), "Listed versions");
        Ok(versions)
    }

    async fn version_exists(&self, version: &ImageVersion) -> Result<bool> {
        let response = self.send(self.http.get(self.version_url(version))).await?;
        if response.status().is_success() {
            return Ok(true);
        }
        match Self::error_for(response, &version.version_id()).await {
            ArchiveError::NotFound(_) => Ok(false),
            e => Err(e),
        }
    }

    async fn copy_version(&self, source: &ImageVersion, destination: &ImageVersion) -> Result<()> {
        let src = format!("docker://{}", source.docker_name());
        let dst = format!("docker://{}", destination.docker_name());
        tracing::debug!(source = %src, destination = %dst, "Copying with skopeo");

        let output = tokio::process::Command::new(&self.skopeo)
            .args(["copy", "--all", &src, &dst])
            .output()
            .await
            .map_err(|e| {
                Self::registry_error(format!(
                    "Failed to run {}: {}",
                    self.skopeo.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(Self::registry_error(format!(
                "skopeo copy {} -> {} failed: {}",
                source.version_id(),
                destination.version_id(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn add_tag(&self, version: &ImageVersion, tag: &str) -> Result<()> {
        let package = Self::package_resource(version);
        let body = serde_json::json!({
            "name": format!("{}/tags/{}", package, tag),
            "version": format!("{}/versions/{}", package, version.digest),
        });
        let url = format!("{}/tags", self.package_url(version));
        let response = self
            .send(self.http.post(&url).query(&[("tagId", tag)]).json(&body))
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::error_for(response, &format!("{}:{}", version.short_path(), tag)).await)
    }

    async fn remove_tag(&self, version: &ImageVersion, tag: &str) -> Result<()> {
        let url = format!("{}/tags/{}", self.package_url(version), tag);
        let response = self.send(self.http.delete(&url)).await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::error_for(response, &format!("{}:{}", version.short_path(), tag)).await)
    }

    async fn delete_version(&self, version: &ImageVersion) -> Result<()> {
        let subject = version.version_id();
        let response = self.send(self.http.delete(self.version_url(version))).await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response, &subject).await);
        }
        let operation: Operation = Self::json(response).await?;
        self.wait_for(operation, &subject).await
    }
}
