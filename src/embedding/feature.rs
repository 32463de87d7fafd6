//! 피처 기반 임베딩 (어휘 + 통계)
//!
//! 벡터 구성:
//! - [0, V): 도메인 어휘 슬롯 (tf × IDF 유사 가중치)
//! - [V, dim - 8): 어휘 밖 토큰의 해시 버킷 (가중치 1.0)
//! - 마지막 8칸: 통계 피처 (길이, 토큰 수, 다양성, 키워드 밀도 등)
//!
//! 앞쪽 토큰에는 위치 가중치를 줍니다. 마지막에 L2 정규화합니다.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use regex::Regex;

use crate::error::{KnowledgeError, Result};
use crate::knowledge::l2_normalize;

use super::EmbeddingProvider;

/// 통계 피처 슬롯 수 (벡터 끝에 예약)
pub const STAT_FEATURES: usize = 8;

/// 위치 가중치를 받는 앞쪽 토큰 수
const POSITIONAL_WINDOW: usize = 20;
const POSITIONAL_BOOST: f32 = 1.5;

/// 도메인 어휘와 손으로 정한 가중치
const VOCABULARY: &[(&str, f32)] = &[
    // 스키마
    ("table", 1.2),
    ("column", 1.2),
    ("schema", 1.5),
    ("primary", 1.8),
    ("foreign", 1.8),
    ("key", 1.0),
    ("index", 1.6),
    ("unique", 1.6),
    ("null", 1.3),
    ("constraint", 1.7),
    ("row", 1.0),
    ("sample", 1.4),
    ("type", 0.8),
    // 비즈니스 엔티티
    ("customer", 2.0),
    ("order", 1.9),
    ("product", 2.0),
    ("revenue", 2.4),
    ("sales", 2.2),
    ("price", 2.1),
    ("amount", 1.9),
    ("payment", 2.2),
    ("invoice", 2.3),
    ("transaction", 2.1),
    ("account", 1.8),
    ("user", 1.5),
    ("date", 1.2),
    ("status", 1.4),
    ("category", 1.9),
    ("inventory", 2.3),
    // 분석/마케팅
    ("marketing", 2.5),
    ("campaign", 2.5),
    ("segment", 2.2),
    ("churn", 2.6),
    ("retention", 2.5),
    ("conversion", 2.4),
    ("metric", 2.0),
    ("kpi", 2.6),
    ("rule", 1.8),
    ("business", 1.6),
    ("analysis", 1.5),
    ("report", 1.7),
    ("trend", 2.1),
];

/// 도메인 피처 임베딩
#[derive(Debug, Clone)]
pub struct FeatureEmbedding {
    dimension: usize,
    vocabulary: HashMap<&'static str, (usize, f32)>,
    token_re: Regex,
}

impl FeatureEmbedding {
    /// `dimension`은 어휘 수 + 통계 슬롯 수보다 커야 합니다.
    pub fn new(dimension: usize) -> Result<Self> {
        let min = VOCABULARY.len() + STAT_FEATURES + 1;
        if dimension < min {
            return Err(KnowledgeError::Config(format!(
                "Feature embedding dimension must be at least {}, got {}",
                min, dimension
            )));
        }

        let vocabulary = VOCABULARY
            .iter()
            .enumerate()
            .map(|(slot, (term, weight))| (*term, (slot, *weight)))
            .collect();

        let token_re = Regex::new(r"[\p{L}\p{N}_]+")
            .map_err(|e| KnowledgeError::Config(format!("Invalid token pattern: {}", e)))?;

        Ok(Self {
            dimension,
            vocabulary,
            token_re,
        })
    }

    fn body_len(&self) -> usize {
        self.dimension - STAT_FEATURES
    }

    /// 어휘 슬롯 조회 (단순 복수형 처리 포함)
    fn lookup(&self, token: &str) -> Option<(usize, f32)> {
        if let Some(hit) = self.vocabulary.get(token) {
            return Some(*hit);
        }
        token
            .strip_suffix('s')
            .and_then(|singular| self.vocabulary.get(singular))
            .copied()
    }

    /// 어휘 밖 토큰의 해시 버킷
    fn hashed_slot(&self, token: &str) -> usize {
        let buckets = self.body_len() - VOCABULARY.len();
        VOCABULARY.len() + (fnv1a(token.as_bytes()) % buckets as u64) as usize
    }

    /// 동기 버전
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if text.trim().is_empty() {
            return vector;
        }

        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = self
            .token_re
            .find_iter(&lowered)
            .map(|m| m.as_str())
            .collect();

        let mut keyword_hits = 0usize;
        for (position, token) in tokens.iter().enumerate() {
            let boost = if position < POSITIONAL_WINDOW {
                POSITIONAL_BOOST
            } else {
                1.0
            };
            match self.lookup(token) {
                Some((slot, weight)) => {
                    keyword_hits += 1;
                    vector[slot] += weight * boost;
                }
                None => {
                    let slot = self.hashed_slot(token);
                    vector[slot] += boost;
                }
            }
        }

        let char_count = text.chars().count();
        let token_count = tokens.len();
        let unique: HashSet<&str> = tokens.iter().copied().collect();
        let digits = text.chars().filter(|c| c.is_numeric()).count();
        let uppercase = text.chars().filter(|c| c.is_uppercase()).count();
        let token_chars: usize = tokens.iter().map(|t| t.chars().count()).sum();
        let lines = text.lines().count();

        let ratio = |n: usize, d: usize| if d == 0 { 0.0 } else { n as f32 / d as f32 };

        let stats = [
            (1.0 + char_count as f32).ln() / 10.0,
            (1.0 + token_count as f32).ln() / 10.0,
            ratio(unique.len(), token_count),
            ratio(keyword_hits, token_count),
            ratio(digits, char_count),
            ratio(uppercase, char_count),
            ratio(token_chars, token_count) / 10.0,
            (1.0 + lines as f32).ln() / 5.0,
        ];
        let base = self.body_len();
        vector[base..].copy_from_slice(&stats);

        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for FeatureEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "domain-feature"
    }
}

/// FNV-1a 64-bit
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    bytes.iter().fold(OFFSET, |hash, b| (hash ^ *b as u64).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::cosine_similarity;

    fn embedder() -> FeatureEmbedding {
        FeatureEmbedding::new(128).unwrap()
    }

    #[test]
    fn test_dimension_bounds() {
        assert!(FeatureEmbedding::new(8).is_err());
        assert!(FeatureEmbedding::new(VOCABULARY.len() + STAT_FEATURES).is_err());
        assert!(FeatureEmbedding::new(VOCABULARY.len() + STAT_FEATURES + 1).is_ok());
    }

    #[test]
    fn test_unit_length_and_dimension() {
        let v = embedder().embed_sync("Customer revenue by product category");
        assert_eq!(v.len(), 128);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_empty_string_is_zero_vector() {
        let v = embedder().embed_sync("");
        assert_eq!(v.len(), 128);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_vocabulary_hits_and_plurals() {
        let e = embedder();
        let v = e.embed_sync("customers");
        let (slot, _) = e.lookup("customer").unwrap();
        assert!(v[slot] > 0.0);
        assert!(e.lookup("zebra").is_none());
    }

    #[test]
    fn test_related_texts_score_higher() {
        let e = embedder();
        let query = e.embed_sync("customer churn and retention");
        let related = e.embed_sync("Churn analysis: customer retention dropped 5%");
        let unrelated = e.embed_sync("zzz qqq www");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_unicode_tokens() {
        let e = embedder();
        let tokens: Vec<&str> = e
            .token_re
            .find_iter("고객 이탈률 churn_rate2")
            .map(|m| m.as_str())
            .collect();
        assert_eq!(tokens, vec!["고객", "이탈률", "churn_rate2"]);

        let v = e.embed_sync("고객 이탈률");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        assert!(v[e.hashed_slot("고객")] > 0.0);
    }

    #[test]
    fn test_hashed_slots_stay_in_body() {
        let e = embedder();
        for token in ["alpha", "beta", "가나다", "x1"] {
            let slot = e.hashed_slot(token);
            assert!(slot >= VOCABULARY.len());
            assert!(slot < e.body_len());
        }
    }
}
