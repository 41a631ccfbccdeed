use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

use crate::config::TimeoutConfig;
use crate::coordinator::{EngineInfo, ParameterSnapshot};
use crate::error::{FleetError, Result};
use crate::protocol::{Ack, ProgressReport, RegisterRequest, RegisterResponse, UploadResponse};

/// Everything a node asks of the coordinator.
///
/// Implemented over HTTP by [`CoordinatorClient`]; tests substitute
/// in-process fakes.
#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    /// Register under `name`, returning the new node identity.
    async fn register(&self, name: &str) -> Result<String>;

    async fn fetch_parameters(&self) -> Result<ParameterSnapshot>;

    async fn report_progress(&self, report: &ProgressReport) -> Result<()>;

    /// Upload the file at `path` under its file name.
    async fn upload_artifact(&self, path: &Path) -> Result<UploadResponse>;

    /// Hash of the engine currently served, `None` when none is registered.
    async fn engine_hash(&self) -> Result<Option<String>>;

    async fn download_engine(&self) -> Result<Vec<u8>>;
}

/// HTTP client for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    http: reqwest::Client,
    base_url: String,
    timeouts: TimeoutConfig,
}

impl CoordinatorClient {
    pub fn new(base_url: &str, timeouts: TimeoutConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeouts.poll)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeouts,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl CoordinatorApi for CoordinatorClient {
    async fn register(&self, name: &str) -> Result<String> {
        let resp: RegisterResponse = self
            .http
            .post(self.url("/register"))
            .timeout(self.timeouts.poll)
            .json(&RegisterRequest {
                name: name.to_string(),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.node_id)
    }

    async fn fetch_parameters(&self) -> Result<ParameterSnapshot> {
        Ok(self
            .http
            .get(self.url("/parameters"))
            .timeout(self.timeouts.poll)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn report_progress(&self, report: &ProgressReport) -> Result<()> {
        let ack: Ack = self
            .http
            .post(self.url("/progress"))
            .timeout(self.timeouts.poll)
            .json(report)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if ack.status != "ok" {
            return Err(FleetError::Rejected(ack.status));
        }
        Ok(())
    }

    async fn upload_artifact(&self, path: &Path) -> Result<UploadResponse> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| FleetError::InvalidFilename(path.display().to_string()))?;
        let bytes = tokio::fs::read(path).await?;
        let part = Part::bytes(bytes)
            .file_name(filename)
            .mime_str("application/octet-stream")?;

        Ok(self
            .http
            .post(self.url("/upload"))
            .timeout(self.timeouts.transfer)
            .multipart(Form::new().part("file", part))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn engine_hash(&self) -> Result<Option<String>> {
        let info: EngineInfo = self
            .http
            .get(self.url("/engine/info"))
            .timeout(self.timeouts.poll)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(info.hash)
    }

    async fn download_engine(&self) -> Result<Vec<u8>> {
        let bytes = self
            .http
            .get(self.url("/engine"))
            .timeout(self.timeouts.transfer)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}
