//! Vector 유틸리티 - 코사인 유사도, 정규화, top-K 정렬
//!
//! ANN 인덱스 없이 선형 스캔 + 안정 정렬로 순위를 매깁니다.
//! 소규모 코퍼스에서 정확성을 우선합니다.

use std::cmp::Ordering;

use super::store::{KnowledgeChunk, ScoredChunk};

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다.
/// 차원이 다르거나, 빈 벡터이거나, 노름이 0이면 0.0을 반환합니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let score = dot_product / (norm_a * norm_b);
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

/// L2 정규화 (제자리)
///
/// 영벡터는 그대로 둡니다.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// 청크를 유사도 내림차순으로 정렬해 상위 `limit`개 반환
///
/// 안정 정렬이므로 동점은 입력 순서(저장소 스캔 순서 = id 오름차순)를 유지합니다.
pub fn rank_by_similarity<I>(query: &[f32], chunks: I, limit: usize) -> Vec<ScoredChunk>
where
    I: IntoIterator<Item = KnowledgeChunk>,
{
    if limit == 0 {
        return vec![];
    }

    let mut scored: Vec<ScoredChunk> = chunks
        .into_iter()
        .map(|chunk| {
            let score = cosine_similarity(query, &chunk.vector);
            ScoredChunk { chunk, score }
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    scored
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chunk(id: i64, vector: Vec<f32>) -> KnowledgeChunk {
        KnowledgeChunk {
            id,
            content: format!("chunk {}", id),
            metadata: Default::default(),
            vector,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) - -1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        let empty: Vec<f32> = vec![];
        assert_eq!(cosine_similarity(&empty, &empty), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[f32::NAN, 1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0; 4];
        l2_normalize(&mut zero);
        assert!(zero.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_rank_is_stable_for_ties() {
        let chunks = vec![
            chunk(1, vec![0.0, 1.0]),
            chunk(2, vec![1.0, 0.0]),
            chunk(3, vec![0.0, 1.0]),
            chunk(4, vec![1.0, 0.0]),
        ];
        let ranked = rank_by_similarity(&[1.0, 0.0], chunks, 10);
        let ids: Vec<i64> = ranked.iter().map(|s| s.chunk.id).collect();
        assert_eq!(ids, vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_rank_truncates() {
        let chunks = (1..=5).map(|i| chunk(i, vec![i as f32, 1.0]));
        assert_eq!(rank_by_similarity(&[1.0, 0.0], chunks, 2).len(), 2);
        assert!(rank_by_similarity(&[1.0, 0.0], Vec::new(), 2).is_empty());
        assert!(rank_by_similarity(&[1.0], vec![chunk(1, vec![1.0])], 0).is_empty());
    }
}
