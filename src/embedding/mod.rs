//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 텍스트를 고정 차원 벡터로 변환하는 프로바이더들입니다.
//!
//! - HashEmbedding: SHA-256 다이제스트 확장 (네트워크 불필요)
//! - FeatureEmbedding: 도메인 어휘 가중치 + 통계 피처 (네트워크 불필요)
//! - RemoteEmbedding: 외부 임베딩 API 호출
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&KnowledgeConfig::from_env()?)?;
//! let embedding = embedder.embed("customers table").await?;
//! ```

mod feature;
mod hash;
mod remote;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EmbedderKind, KnowledgeConfig};
use crate::error::Result;

pub use feature::{FeatureEmbedding, STAT_FEATURES};
pub use hash::HashEmbedding;
pub use remote::RemoteEmbedding;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 모든 구현체는 `dimension()` 길이의 벡터를 반환하며,
/// 빈 문자열도 에러 없이 처리해야 합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 임베딩 프로바이더 생성
pub fn create_embedder(config: &KnowledgeConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match config.embedder {
        EmbedderKind::Hash => Arc::new(HashEmbedding::new(config.dimension)?),
        EmbedderKind::Feature => Arc::new(FeatureEmbedding::new(config.dimension)?),
        EmbedderKind::Remote => Arc::new(RemoteEmbedding::new(&config.remote, config.dimension)?),
    };

    tracing::info!(
        "Using {} embedding (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================
