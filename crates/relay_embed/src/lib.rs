//! HTTP embedding client for an OpenAI-compatible `/embeddings` endpoint.
//!
//! The embedding provider is an external collaborator: failures surface as
//! `RelayError::Upstream` so callers can retry, and are never conflated with
//! an empty search result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use relay_core::error::{RelayError, Result};
use relay_core::ports::EmbeddingClient;

pub const DEFAULT_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_DIMENSION: usize = 1536;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

impl HttpEmbeddingClient {
    /// `endpoint` is the full URL of the embeddings route, e.g.
    /// `https://api.openai.com/v1/embeddings`.
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: None,
            model: model.into(),
            dimension,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn parse(&self, body: EmbeddingResponse) -> Result<Vec<f32>> {
        let embedding = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                RelayError::Upstream("embedding response contained no data".into())
            })?;
        if embedding.len() != self.dimension {
            return Err(RelayError::Upstream(format!(
                "embedding provider returned dimension {}, expected {}",
                embedding.len(),
                self.dimension
            )));
        }
        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            input: text,
            model: &self.model,
            dimensions: self.dimension,
        };

        let mut call = self.http.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call
            .send()
            .await
            .map_err(|e| RelayError::Upstream(format!("embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Upstream(format!(
                "embedding provider returned {status}: {body}"
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Upstream(format!("malformed embedding response: {e}")))?;
        tracing::debug!(model = %self.model, "embedding computed");
        self.parse(body)
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(dimension: usize) -> HttpEmbeddingClient {
        HttpEmbeddingClient::new("http://localhost:9/embeddings", DEFAULT_MODEL, dimension)
    }

    #[test]
    fn parse_extracts_first_embedding() {
        let body: EmbeddingResponse =
            serde_json::from_str(r#"{"data": [{"embedding": [0.1, 0.2, 0.3]}]}"#).unwrap();
        let embedding = client(3).parse(body).unwrap();
        assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn parse_rejects_empty_data() {
        let body: EmbeddingResponse = serde_json::from_str(r#"{"data": []}"#).unwrap();
        let err = client(3).parse(body).unwrap_err();
        assert!(matches!(err, RelayError::Upstream(_)));
    }

    #[test]
    fn parse_rejects_wrong_dimension() {
        let body: EmbeddingResponse =
            serde_json::from_str(r#"{"data": [{"embedding": [0.1, 0.2]}]}"#).unwrap();
        let err = client(3).parse(body).unwrap_err();
        assert!(matches!(err, RelayError::Upstream(_)));
    }

    #[test]
    fn request_serializes_openai_shape() {
        let request = EmbeddingRequest {
            input: "hello",
            model: DEFAULT_MODEL,
            dimensions: DEFAULT_DIMENSION,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["input"], "hello");
        assert_eq!(json["model"], "text-embedding-3-small");
        assert_eq!(json["dimensions"], 1536);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_upstream_error() {
        let err = client(3).embed("hello").await.unwrap_err();
        assert!(matches!(err, RelayError::Upstream(_)));
    }
}
