//! 해시 기반 임베딩
//!
//! SHA-256(text || counter) 블록을 이어 붙여 `dimension`개의 바이트를 얻고,
//! 각 바이트를 [-1, 1] 범위로 옮긴 뒤 L2 정규화합니다.
//! 의미적 유사성은 없지만 결정적이며 네트워크가 필요 없습니다.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{KnowledgeError, Result};
use crate::knowledge::l2_normalize;

use super::EmbeddingProvider;

/// SHA-256 해시 임베딩
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(KnowledgeError::Config(
                "Hash embedding dimension must be greater than 0".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    /// 동기 버전 (테스트/인덱서에서 직접 사용 가능)
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.dimension);
        let mut counter: u32 = 0;

        while vector.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();

            for byte in digest.iter() {
                if vector.len() == self.dimension {
                    break;
                }
                vector.push(*byte as f32 / 127.5 - 1.0);
            }
            counter += 1;
        }

        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "sha256-hash"
    }
}
