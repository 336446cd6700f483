//! Sentence-embedding model handle.
//!
//! The model is served by a text-embeddings inference server. A handle is
//! built once at startup with [`TextEmbeddingsServer::connect`], which fails
//! if the server is unreachable or serves a different model, and is then
//! shared read-only across every resolution.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EmbeddingError {
    /// The model cannot be used at all. Fatal at startup.
    #[error("embedding model unavailable: {0}")]
    Unavailable(String),
    /// A single embedding call failed.
    #[error("embedding inference failed: {0}")]
    Inference(String),
}

pub type EmbeddingFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<f32>, EmbeddingError>> + Send + 'a>>;

/// A loaded, read-only embedding model.
///
/// Implementations must be deterministic: the same text always yields the
/// same vector.
pub trait EmbeddingModel: Send + Sync {
    /// Embed one text into a fixed-length vector.
    fn embed<'a>(&'a self, text: &'a str) -> EmbeddingFuture<'a>;
}

#[derive(Deserialize)]
struct ServerInfo {
    model_id: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a str,
    truncate: bool,
}

/// Client for a text-embeddings inference server (`/info`, `/embed`).
pub struct TextEmbeddingsServer {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl TextEmbeddingsServer {
    /// Connect to the server at `base_url` and confirm it serves `expected_model`.
    pub async fn connect(
        base_url: &str,
        expected_model: &str,
        client: reqwest::Client,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let url = format!("{}/info", base_url);

        let resp = client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| EmbeddingError::Unavailable(format!("{}: {}", url, e)))?;

        if !resp.status().is_success() {
            return Err(EmbeddingError::Unavailable(format!(
                "{} returned HTTP {}",
                url,
                resp.status()
            )));
        }

        let info: ServerInfo = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Unavailable(format!("bad /info response: {}", e)))?;

        if info.model_id != expected_model {
            return Err(EmbeddingError::Unavailable(format!(
                "server at {} serves {}, expected {}",
                base_url, info.model_id, expected_model
            )));
        }

        tracing::info!(url = %base_url, model = %info.model_id, "embedding model ready");

        Ok(Self {
            base_url,
            client,
            timeout,
        })
    }
}

impl EmbeddingModel for TextEmbeddingsServer {
    fn embed<'a>(&'a self, text: &'a str) -> EmbeddingFuture<'a> {
        Box::pin(async move {
            let resp = self
                .client
                .post(format!("{}/embed", self.base_url))
                .json(&EmbedRequest {
                    inputs: text,
                    truncate: true,
                })
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| EmbeddingError::Inference(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(EmbeddingError::Inference(format!("HTTP {}", resp.status())));
            }

            let mut vectors: Vec<Vec<f32>> = resp
                .json()
                .await
                .map_err(|e| EmbeddingError::Inference(e.to_string()))?;

            match vectors.pop() {
                Some(v) if vectors.is_empty() && !v.is_empty() => Ok(v),
                _ => Err(EmbeddingError::Inference(
                    "expected exactly one embedding".into(),
                )),
            }
        })
    }
}
