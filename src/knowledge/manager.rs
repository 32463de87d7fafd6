//! Knowledge Manager - 페이즈 단위 저장/검색/삭제/통계
//!
//! 외부 호출자(파이프라인 러너, 프로토콜 서버)가 사용하는 기본 API입니다.
//!
//! - 저장: 청킹 → 청크별 임베딩 → `phase`/`timestamp` 태깅 → 저장
//! - 검색: 쿼리 임베딩 → 전체 스캔 → 페이즈 필터 → 코사인 유사도 정렬
//!
//! 청크 단위 임베딩 실패는 로그를 남기고 건너뜁니다 (부분 성공).
//! 저장소 실패와 취소는 호출 전체를 중단합니다.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::cancel::{run_cancellable, CancelSignal};
use crate::config::KnowledgeConfig;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::{KnowledgeError, Result};

use super::chunker::{ChunkConfig, Chunker, KnowledgeChunker, TextChunk};
use super::store::{KnowledgeResult, KnowledgeStore, Metadata};
use super::vector::rank_by_similarity;

/// 페이즈가 없는 청크를 묶는 통계 키
pub const UNKNOWN_PHASE: &str = "unknown";

// ============================================================================
// Types
// ============================================================================

/// 저장 결과 (부분 성공 확인용)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreReport {
    pub phase: String,
    /// 청커가 만든 청크 수
    pub produced: usize,
    /// 실제 저장된 청크 수
    pub stored: usize,
    /// 임베딩 실패로 건너뛴 청크 수
    pub skipped: usize,
}

impl StoreReport {
    /// 모든 청크가 저장되었는지 여부
    pub fn is_complete(&self) -> bool {
        self.skipped == 0 && self.stored == self.produced
    }
}

/// 지식 통계
#[derive(Debug, Clone, Default, Serialize)]
pub struct KnowledgeStats {
    pub total_chunks: usize,
    pub phases: BTreeMap<String, usize>,
}

// ============================================================================
// KnowledgeManager
// ============================================================================

/// 페이즈 단위 지식 관리자
pub struct KnowledgeManager {
    store: Arc<KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: KnowledgeChunker,
    cancel: Option<CancelSignal>,
}

impl KnowledgeManager {
    /// 명시적 핸들로 생성
    pub fn new(
        store: Arc<KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunk_config: ChunkConfig,
    ) -> Result<Self> {
        Ok(Self {
            store,
            embedder,
            chunker: KnowledgeChunker::new(chunk_config)?,
            cancel: None,
        })
    }

    /// 설정으로부터 저장소/임베더/청커를 모두 구성
    pub fn from_config(config: &KnowledgeConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(KnowledgeStore::open_with_timeout(
            &config.db_path,
            config.store_timeout(),
        )?);
        let embedder = create_embedder(config)?;
        Self::new(store, embedder, config.chunk)
    }

    /// 취소 신호 연결
    pub fn with_cancel_signal(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    /// 내부 저장소 접근
    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    /// 내부 임베더 접근
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// 페이즈 지식 저장
    ///
    /// 테이블 스키마 모양이면 테이블 전략을, 아니면 일반 전략을 사용합니다.
    pub async fn store_phase_knowledge(&self, phase: &str, payload: &Value) -> Result<StoreReport> {
        validate_phase(phase)?;
        let chunks = self.chunker.chunk(payload, phase)?;
        self.persist(phase, chunks).await
    }

    /// 원문 텍스트를 페이즈 지식으로 저장
    pub async fn store_phase_text(
        &self,
        phase: &str,
        text: &str,
        source: &str,
    ) -> Result<StoreReport> {
        validate_phase(phase)?;
        let chunks = self.chunker.chunk_text(text, source);
        self.persist(phase, chunks).await
    }

    /// 청커 순서대로 임베딩 후 저장
    async fn persist(&self, phase: &str, chunks: Vec<TextChunk>) -> Result<StoreReport> {
        let mut report = StoreReport {
            phase: phase.to_string(),
            produced: chunks.len(),
            ..Default::default()
        };

        for (i, chunk) in chunks.into_iter().enumerate() {
            let vector = match self.embed(&chunk.content).await {
                Ok(v) => v,
                Err(e) if e.is_skippable() => {
                    tracing::warn!("Skipping chunk {} of phase '{}': {}", i, phase, e);
                    report.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let metadata = tag_chunk(chunk.metadata, phase);
            self.store.add_chunk(&chunk.content, metadata, &vector)?;
            report.stored += 1;
        }

        if report.skipped > 0 {
            tracing::warn!(
                "Stored {}/{} chunks for phase '{}' ({} skipped)",
                report.stored,
                report.produced,
                phase,
                report.skipped
            );
        } else {
            tracing::info!("Stored {} chunks for phase '{}'", report.stored, phase);
        }

        Ok(report)
    }

    /// 페이즈 지식 검색
    ///
    /// 해당 페이즈 청크가 없으면 빈 목록을 반환합니다.
    pub async fn retrieve_phase_knowledge(
        &self,
        phase: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgeResult>> {
        self.retrieve_where(query, limit, |p| p == phase).await
    }

    /// 여러 페이즈에 걸친 지식 검색
    pub async fn retrieve_cross_phase_knowledge<S: AsRef<str>>(
        &self,
        query: &str,
        phases: &[S],
        limit: usize,
    ) -> Result<Vec<KnowledgeResult>> {
        self.retrieve_where(query, limit, |p| phases.iter().any(|s| s.as_ref() == p))
            .await
    }

    async fn retrieve_where<F>(
        &self,
        query: &str,
        limit: usize,
        accept: F,
    ) -> Result<Vec<KnowledgeResult>>
    where
        F: Fn(&str) -> bool,
    {
        if limit == 0 {
            return Ok(vec![]);
        }

        let query_vector = self.embed(query).await?;
        self.check_cancelled()?;

        let candidates = self
            .store
            .get_all_chunks()?
            .into_iter()
            .filter(|chunk| chunk.phase().map(&accept).unwrap_or(false));

        let results: Vec<KnowledgeResult> = rank_by_similarity(&query_vector, candidates, limit)
            .into_iter()
            .map(KnowledgeResult::from)
            .collect();

        tracing::debug!("Retrieved {} chunks for query '{}'", results.len(), query);
        Ok(results)
    }

    /// 페이즈 지식 삭제 (멱등)
    pub async fn delete_phase_knowledge(&self, phase: &str) -> Result<usize> {
        self.check_cancelled()?;
        self.store.delete_by_metadata("phase", &json!(phase))
    }

    /// 페이즈별 청크 수 통계
    pub async fn get_knowledge_stats(&self) -> Result<KnowledgeStats> {
        self.check_cancelled()?;
        let chunks = self.store.get_all_chunks()?;

        let mut stats = KnowledgeStats {
            total_chunks: chunks.len(),
            ..Default::default()
        };
        for chunk in &chunks {
            let phase = chunk.phase().unwrap_or(UNKNOWN_PHASE);
            *stats.phases.entry(phase.to_string()).or_insert(0) += 1;
        }

        Ok(stats)
    }

    /// 전체 삭제
    pub async fn clear(&self) -> Result<usize> {
        self.check_cancelled()?;
        self.store.clear()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        run_cancellable(self.cancel.as_ref(), self.embedder.embed(text)).await
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(signal) => signal.check(),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn validate_phase(phase: &str) -> Result<()> {
    if phase.trim().is_empty() {
        return Err(KnowledgeError::Input("phase must not be empty".to_string()));
    }
    Ok(())
}

/// 청크 메타데이터에 `phase`와 `timestamp` 추가
pub(crate) fn tag_chunk(mut metadata: Metadata, phase: &str) -> Metadata {
    metadata.insert("phase".to_string(), json!(phase));
    metadata.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
    metadata
}

// ============================================================================
// Tests
// ============================================================================
