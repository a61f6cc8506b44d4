use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    codec,
    error::{Error, Result},
};

/// Boundary to the captioning model.
///
/// Given N images, returns up to N captions in the same order. A transport
/// or service failure is an [`Error::CaptionService`]; a degraded response
/// may also come back shorter than the input (or empty), in which case the
/// missing tail simply has no caption.
#[async_trait]
pub trait CaptionClient: Send + Sync {
    async fn caption(&self, images: &[Vec<u8>]) -> Result<Vec<String>>;
}

#[derive(Debug, Serialize)]
struct CaptionRequest {
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CaptionResponse {
    #[serde(default)]
    captions: Vec<String>,
}

/// Caption client for the HTTP caption service (`POST /generate_captions`).
#[derive(Debug, Clone)]
pub struct HttpCaptionClient {
    client: reqwest::Client,
    endpoint: String,
    max_batch: usize,
}

impl HttpCaptionClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        max_batch: usize,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                Error::Config(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/generate_captions",
                base_url.trim_end_matches('/')
            ),
            max_batch,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CaptionClient for HttpCaptionClient {
    async fn caption(&self, images: &[Vec<u8>]) -> Result<Vec<String>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        if images.len() > self.max_batch {
            return Err(Error::CaptionService(format!(
                "batch of {} images exceeds the maximum of {}",
                images.len(),
                self.max_batch
            )));
        }

        let request = CaptionRequest {
            images: images.iter().map(|b| codec::encode_image(b)).collect(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::CaptionService(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::CaptionService(format!("{status}: {detail}")));
        }

        let body: CaptionResponse = response.json().await.map_err(|e| {
            Error::CaptionService(format!("malformed response: {e}"))
        })?;

        if body.captions.len() > images.len() {
            return Err(Error::CaptionService(format!(
                "service returned {} captions for {} images",
                body.captions.len(),
                images.len()
            )));
        }

        Ok(body.captions)
    }
}

/// Caption a single image of any supported format.
///
/// The image is normalized to PNG on the blocking pool first, so a corrupt
/// upload fails with [`Error::Decode`] before the service is contacted.
pub async fn caption_one(
    client: &dyn CaptionClient,
    image: Vec<u8>,
) -> Result<String> {
    let png =
        tokio::task::spawn_blocking(move || codec::normalize_image(&image))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;

    let caption = client
        .caption(&[png])
        .await?
        .into_iter()
        .next()
        .map(|c| c.trim().to_string())
        .unwrap_or_default();
    if caption.is_empty() {
        return Err(Error::CaptionService(
            "no caption returned for the image".to_string(),
        ));
    }
    Ok(caption)
}
