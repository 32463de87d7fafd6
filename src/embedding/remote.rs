//! 원격 임베딩 - 외부 임베딩 API 호출
//!
//! 요청: `POST {endpoint}` `{"model": ..., "input": ...}`
//! 응답: 아래 경로 중 하나에 float 배열이 있어야 합니다.
//! - `embedding` (Ollama)
//! - `embeddings[0]`
//! - `data[0].embedding` (OpenAI 호환)
//!
//! 청크마다 요청 1회, 자동 재시도 없음.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::RemoteEmbeddingConfig;
use crate::error::{KnowledgeError, Result};

use super::EmbeddingProvider;

/// 원격 임베딩 구현체
#[derive(Debug)]
pub struct RemoteEmbedding {
    endpoint: url::Url,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
    dimension: usize,
}

/// API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

impl RemoteEmbedding {
    /// 새 원격 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `config` - 엔드포인트/모델/키/타임아웃
    /// * `dimension` - 기대하는 벡터 차원 (응답 길이 검증에 사용)
    pub fn new(config: &RemoteEmbeddingConfig, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(KnowledgeError::Config(
                "Remote embedding dimension must be greater than 0".to_string(),
            ));
        }

        let endpoint = url::Url::parse(&config.endpoint).map_err(|e| {
            KnowledgeError::Config(format!(
                "Invalid embedding endpoint '{}': {}",
                config.endpoint, e
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| KnowledgeError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            client,
            dimension,
        })
    }

    /// 응답 본문에서 벡터 추출
    fn extract_vector(&self, body: &Value) -> Result<Vec<f32>> {
        let candidate = body
            .get("embedding")
            .or_else(|| body.get("embeddings").and_then(|e| e.get(0)))
            .or_else(|| {
                body.get("data")
                    .and_then(|d| d.get(0))
                    .and_then(|d| d.get("embedding"))
            })
            .ok_or_else(|| {
                KnowledgeError::Embedding("embedding response missing vector".to_string())
            })?;

        let values = candidate.as_array().ok_or_else(|| {
            KnowledgeError::Embedding("embedding vector is not an array".to_string())
        })?;

        let vector = values
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| {
                KnowledgeError::Embedding(
                    "embedding vector contains non-numeric values".to_string(),
                )
            })?;

        // f32 범위를 넘는 값은 캐스팅 후 inf가 됨
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(KnowledgeError::Embedding(
                "embedding vector contains non-finite values".to_string(),
            ));
        }

        if vector.len() != self.dimension {
            return Err(KnowledgeError::Embedding(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            )));
        }

        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // 빈 텍스트 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let request = EmbedRequest {
            model: &self.model,
            input: text,
        };

        let mut builder = self.client.post(self.endpoint.clone()).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                KnowledgeError::Embedding(format!("embedding request timed out: {}", e))
            } else {
                KnowledgeError::Embedding(format!("Failed to send embedding request: {}", e))
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            KnowledgeError::Embedding(format!("Failed to read response body: {}", e))
        })?;

        if !status.is_success() {
            return Err(KnowledgeError::Embedding(format!(
                "embedding request failed: {} {}",
                status, body
            )));
        }

        let json: Value = serde_json::from_str(&body).map_err(|e| {
            KnowledgeError::Embedding(format!("Failed to parse embedding response: {}", e))
        })?;

        self.extract_vector(&json)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================
