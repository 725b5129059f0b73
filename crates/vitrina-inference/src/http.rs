//! HTTP image encoder backed by a CLIP-serving sidecar.
//!
//! Protocol:
//! - `GET {base}/info` → `{"model": "...", "dimension": 512}`
//! - `POST {base}/embed/image` with `{"model", "image" (base64), "mime_type"}`
//!   → `{"embedding": [f32, ...]}`
//!
//! The `/info` handshake runs once per encoder, on `initialize()` or on first
//! use, whichever comes first. Concurrent first callers share one request.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use vitrina_core::defaults::{
    self, env_or, EMBED_DIMENSION, ENCODER_MODEL, ENCODER_TIMEOUT_SECS, ENCODER_URL,
};
use vitrina_core::{Error, ImageEncoder, Result};

/// Model description returned by the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EncoderInfo {
    pub model: String,
    pub dimension: usize,
}

#[derive(Serialize)]
struct EmbedImageRequest<'a> {
    model: &'a str,
    image: String,
    mime_type: &'a str,
}

#[derive(Deserialize)]
struct EmbedImageResponse {
    embedding: Vec<f32>,
}

/// Image encoder reached over HTTP.
pub struct HttpImageEncoder {
    base_url: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
    timeout: Duration,
    info: OnceCell<EncoderInfo>,
}

impl HttpImageEncoder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimension,
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(ENCODER_TIMEOUT_SECS),
            info: OnceCell::new(),
        }
    }

    /// Create from `VITRINA_ENCODER_URL`, `VITRINA_ENCODER_MODEL`,
    /// `VITRINA_ENCODER_TIMEOUT_SECS` and `VITRINA_EMBED_DIM`.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var(defaults::ENV_ENCODER_URL).unwrap_or_else(|_| ENCODER_URL.to_string());
        let model = std::env::var(defaults::ENV_ENCODER_MODEL)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| ENCODER_MODEL.to_string());
        let dimension = env_or(defaults::ENV_EMBED_DIM, EMBED_DIMENSION);
        let timeout = env_or(defaults::ENV_ENCODER_TIMEOUT_SECS, ENCODER_TIMEOUT_SECS);
        Self::new(base_url, model, dimension).with_timeout(Duration::from_secs(timeout))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Model info, once the handshake has succeeded.
    pub fn info(&self) -> Option<&EncoderInfo> {
        self.info.get()
    }

    async fn handshake(&self) -> Result<&EncoderInfo> {
        self.info.get_or_try_init(|| self.fetch_info()).await
    }

    async fn fetch_info(&self) -> Result<EncoderInfo> {
        let url = format!("{}/info", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::ModelUnavailable(format!("encoder info request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::ModelUnavailable(format!(
                "encoder info returned {}",
                response.status()
            )));
        }

        let info: EncoderInfo = response
            .json()
            .await
            .map_err(|e| Error::ModelUnavailable(format!("invalid encoder info: {}", e)))?;

        if info.dimension != self.dimension {
            return Err(Error::Config(format!(
                "encoder {} produces {} dimensions, configured for {}",
                info.model, info.dimension, self.dimension
            )));
        }

        info!(
            subsystem = "inference",
            component = "http_encoder",
            op = "handshake",
            model = %info.model,
            dimension = info.dimension,
            "Image encoder ready"
        );
        Ok(info)
    }
}

#[async_trait]
impl ImageEncoder for HttpImageEncoder {
    async fn initialize(&self) -> Result<()> {
        self.handshake().await.map(|_| ())
    }

    async fn encode(&self, image: &[u8]) -> Result<Vec<f32>> {
        self.handshake().await?;

        let mime_type = infer::get(image)
            .map(|t| t.mime_type())
            .unwrap_or("application/octet-stream");
        let request = EmbedImageRequest {
            model: &self.model,
            image: base64::engine::general_purpose::STANDARD.encode(image),
            mime_type,
        };

        let url = format!("{}/embed/image", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::ModelUnavailable(format!("encoder request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Unprocessable(format!("encoder rejected image: {}", body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ModelUnavailable(format!(
                "encoder returned {}: {}",
                status, body
            )));
        }

        let result: EmbedImageResponse = response
            .json()
            .await
            .map_err(|e| Error::ModelUnavailable(format!("invalid encoder response: {}", e)))?;

        debug!(
            subsystem = "inference",
            component = "http_encoder",
            op = "encode",
            model = %self.model,
            image_bytes = image.len(),
            dimension = result.embedding.len(),
            "Image encoded"
        );
        Ok(result.embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
