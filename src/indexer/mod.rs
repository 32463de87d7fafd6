//! Indexer - 아티팩트 디렉토리 일괄 색인
//!
//! 파이프라인이 남긴 출력 디렉토리를 훑어 지식 저장소를 채웁니다.
//!
//! - 전체 재구축 (`index_knowledge_base`): 저장소를 비우고 아티팩트별로 배치 저장
//! - 증분 갱신 (`update_index`): 기존 청크와 거의 같은 청크는 건너뛰고 나머지만 추가
//!
//! 아티팩트는 순차 처리합니다. 읽기/파싱 실패는 로그를 남기고 다음 아티팩트로 넘어갑니다.

mod collector;

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::cancel::{run_cancellable, CancelSignal};
use crate::config::{KnowledgeConfig, DEFAULT_DEDUP_THRESHOLD};
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::{KnowledgeError, Result};
use crate::knowledge::{
    tag_chunk, ChunkConfig, Chunker, KnowledgeChunker, KnowledgeStore, NewChunk, TextChunk,
};

pub use collector::{phase_for, Artifact, ArtifactCollector, ArtifactKind, CollectorConfig};

// ============================================================================
// Types
// ============================================================================

/// 인덱서 설정
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// 증분 갱신에서 중복으로 판단하는 최소 유사도
    pub dedup_threshold: f32,
    /// 최대 아티팩트 크기 (바이트)
    pub max_file_size: u64,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: DEFAULT_DEDUP_THRESHOLD,
            max_file_size: CollectorConfig::default().max_file_size,
            include_hidden: false,
        }
    }
}

impl IndexerConfig {
    fn collector(&self) -> CollectorConfig {
        CollectorConfig {
            include_hidden: self.include_hidden,
            max_file_size: self.max_file_size,
            ..Default::default()
        }
    }
}

/// 색인 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// 발견한 아티팩트 수
    pub artifacts: usize,
    /// 읽기/파싱에 실패한 아티팩트 수
    pub failed_artifacts: usize,
    /// 청커가 만든 청크 수
    pub produced: usize,
    /// 저장된 청크 수
    pub stored: usize,
    /// 임베딩 실패로 건너뛴 청크 수
    pub skipped: usize,
    /// 중복으로 건너뛴 청크 수 (증분 갱신만)
    pub duplicates: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexMode {
    Rebuild,
    Incremental,
}

// ============================================================================
// Indexer
// ============================================================================

/// 오프라인 일괄 색인기
pub struct Indexer {
    store: Arc<KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: KnowledgeChunker,
    config: IndexerConfig,
    cancel: Option<CancelSignal>,
}

impl Indexer {
    pub fn new(
        store: Arc<KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunk_config: ChunkConfig,
    ) -> Result<Self> {
        Ok(Self {
            store,
            embedder,
            chunker: KnowledgeChunker::new(chunk_config)?,
            config: IndexerConfig::default(),
            cancel: None,
        })
    }

    /// 설정으로부터 저장소/임베더를 구성
    pub fn from_config(config: &KnowledgeConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(KnowledgeStore::open_with_timeout(
            &config.db_path,
            config.store_timeout(),
        )?);
        let embedder = create_embedder(config)?;
        Ok(Self::new(store, embedder, config.chunk)?.with_config(IndexerConfig {
            dedup_threshold: config.dedup_threshold,
            ..Default::default()
        }))
    }

    pub fn with_config(mut self, config: IndexerConfig) -> Self {
        self.config = config;
        self
    }

    /// 취소 신호 연결
    pub fn with_cancel_signal(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    /// 전체 재구축
    ///
    /// 디렉토리가 없으면 저장소를 건드리지 않고 `Input` 에러를 반환합니다.
    pub async fn index_knowledge_base(&self, dir: &Path) -> Result<IndexReport> {
        let artifacts = self.collect(dir)?;
        self.check_cancelled()?;

        let removed = self.store.clear()?;
        tracing::info!("Cleared {} existing chunks before rebuild", removed);

        self.run(artifacts, IndexMode::Rebuild).await
    }

    /// 증분 갱신 (저장소를 비우지 않음)
    pub async fn update_index(&self, dir: &Path) -> Result<IndexReport> {
        let artifacts = self.collect(dir)?;
        self.run(artifacts, IndexMode::Incremental).await
    }

    fn collect(&self, dir: &Path) -> Result<Vec<Artifact>> {
        ArtifactCollector::new(self.config.collector()).collect_directory(dir)
    }

    async fn run(&self, artifacts: Vec<Artifact>, mode: IndexMode) -> Result<IndexReport> {
        let mut report = IndexReport {
            artifacts: artifacts.len(),
            ..Default::default()
        };

        for artifact in &artifacts {
            self.check_cancelled()?;

            let (phase, chunks) = match self.load_artifact(artifact) {
                Ok(loaded) => loaded,
                Err(e) => {
                    tracing::warn!("Skipping artifact {:?}: {}", artifact.path, e);
                    report.failed_artifacts += 1;
                    continue;
                }
            };

            report.produced += chunks.len();
            tracing::debug!(
                "Artifact {} -> phase '{}' ({} chunks)",
                artifact.source(),
                phase,
                chunks.len()
            );

            match mode {
                IndexMode::Rebuild => self.rebuild_artifact(&phase, chunks, &mut report).await?,
                IndexMode::Incremental => self.update_artifact(&phase, chunks, &mut report).await?,
            }
        }

        tracing::info!(
            "Indexed {} artifacts: {} stored, {} skipped, {} duplicates, {} failed",
            report.artifacts,
            report.stored,
            report.skipped,
            report.duplicates,
            report.failed_artifacts
        );
        Ok(report)
    }

    /// 아티팩트 청크를 모두 임베딩한 뒤 한 트랜잭션으로 저장
    async fn rebuild_artifact(
        &self,
        phase: &str,
        chunks: Vec<TextChunk>,
        report: &mut IndexReport,
    ) -> Result<()> {
        let mut batch = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let Some(vector) = self.embed_or_skip(&chunk, phase, report).await? else {
                continue;
            };
            batch.push(NewChunk {
                metadata: tag_chunk(chunk.metadata, phase),
                content: chunk.content,
                vector,
            });
        }

        report.stored += self.store.add_chunks(batch)?.len();
        Ok(())
    }

    /// 가장 비슷한 기존 청크가 임계값 이상이면 건너뜀
    async fn update_artifact(
        &self,
        phase: &str,
        chunks: Vec<TextChunk>,
        report: &mut IndexReport,
    ) -> Result<()> {
        for chunk in chunks {
            let Some(vector) = self.embed_or_skip(&chunk, phase, report).await? else {
                continue;
            };

            let best = self.store.search_similar(&vector, 1)?;
            if let Some(hit) = best.first() {
                if hit.score >= self.config.dedup_threshold {
                    tracing::debug!(
                        "Duplicate of chunk {} (score {:.3}), skipping",
                        hit.chunk.id,
                        hit.score
                    );
                    report.duplicates += 1;
                    continue;
                }
            }

            let metadata = tag_chunk(chunk.metadata, phase);
            self.store.add_chunk(&chunk.content, metadata, &vector)?;
            report.stored += 1;
        }
        Ok(())
    }

    /// 임베딩 실패는 `None` (건너뜀), 취소는 에러로 전파
    async fn embed_or_skip(
        &self,
        chunk: &TextChunk,
        phase: &str,
        report: &mut IndexReport,
    ) -> Result<Option<Vec<f32>>> {
        self.check_cancelled()?;
        match run_cancellable(self.cancel.as_ref(), self.embedder.embed(&chunk.content)).await {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_skippable() => {
                tracing::warn!("Skipping chunk of phase '{}': {}", phase, e);
                report.skipped += 1;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// 아티팩트를 읽어 (페이즈, 청크) 반환
    fn load_artifact(&self, artifact: &Artifact) -> Result<(String, Vec<TextChunk>)> {
        let text = std::fs::read_to_string(&artifact.path).map_err(|e| {
            KnowledgeError::Input(format!("Failed to read {:?}: {}", artifact.path, e))
        })?;
        let source = artifact.source();

        match artifact.kind {
            ArtifactKind::Json => {
                let mut payload: Value = serde_json::from_str(&text).map_err(|e| {
                    KnowledgeError::Input(format!("Invalid JSON in {}: {}", source, e))
                })?;
                let phase = take_phase_override(&mut payload)
                    .unwrap_or_else(|| artifact.phase.clone());
                let chunks = self.chunker.chunk(&payload, &source)?;
                Ok((phase, chunks))
            }
            ArtifactKind::Text => {
                let chunks = self.chunker.chunk_text(&text, &source);
                Ok((artifact.phase.clone(), chunks))
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(signal) => signal.check(),
            None => Ok(()),
        }
    }
}

/// JSON 객체 최상위의 문자열 `phase` 필드를 꺼냄
fn take_phase_override(payload: &mut Value) -> Option<String> {
    let object = payload.as_object_mut()?;
    match object.get("phase") {
        Some(Value::String(phase)) if !phase.trim().is_empty() => {
            let phase = phase.clone();
            object.remove("phase");
            Some(phase)
        }
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::cancel::cancel_pair;
    use crate::embedding::HashEmbedding;
    use crate::knowledge::KnowledgeManager;

    struct Fixture {
        _db_dir: TempDir,
        artifacts: TempDir,
        store: Arc<KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    }

    impl Fixture {
        fn new() -> Self {
            let db_dir = TempDir::new().unwrap();
            let store = Arc::new(KnowledgeStore::open(&db_dir.path().join("kb.db")).unwrap());
            Self {
                _db_dir: db_dir,
                artifacts: TempDir::new().unwrap(),
                store,
                embedder: Arc::new(HashEmbedding::new(64).unwrap()),
            }
        }

        fn indexer(&self) -> Indexer {
            Indexer::new(self.store.clone(), self.embedder.clone(), ChunkConfig::default()).unwrap()
        }

        fn manager(&self) -> KnowledgeManager {
            KnowledgeManager::new(self.store.clone(), self.embedder.clone(), ChunkConfig::default())
                .unwrap()
        }

        fn write(&self, relative: &str, contents: &str) {
            let path = self.artifacts.path().join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, contents).unwrap();
        }
    }

    fn schema_artifact() -> String {
        json!({
            "tables": {
                "customers": {
                    "schema": [{"name": "id", "type": "int", "nullable": false}],
                    "samples": [{"id": 1}]
                }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_index_knowledge_base_builds_phases() {
        let fx = Fixture::new();
        fx.write("phase1.json", &schema_artifact());
        fx.write("phase2/narrative.md", "Customer churn rose in Q3.");
        fx.write("phase3/rules.json", r#"{"rules": ["vip if spend > 1000"]}"#);

        let report = fx.indexer().index_knowledge_base(fx.artifacts.path()).await.unwrap();
        assert_eq!(report.artifacts, 3);
        assert_eq!(report.failed_artifacts, 0);
        assert_eq!(report.produced, 4);
        assert_eq!(report.stored, 4);

        let stats = fx.manager().get_knowledge_stats().await.unwrap();
        assert_eq!(stats.phases.get("phase1"), Some(&2));
        assert_eq!(stats.phases.get("phase2"), Some(&1));
        assert_eq!(stats.phases.get("phase3"), Some(&1));

        let results = fx
            .manager()
            .retrieve_phase_knowledge("phase2", "churn", 5)
            .await
            .unwrap();
        assert_eq!(results[0].metadata["source"], json!("phase2/narrative.md"));
        assert!(results[0].metadata.contains_key("timestamp"));
    }

    #[tokio::test]
    async fn test_rebuild_clears_previous_contents() {
        let fx = Fixture::new();
        fx.manager().store_phase_text("stale", "old knowledge", "s").await.unwrap();
        fx.write("fresh.txt", "new knowledge");

        fx.indexer().index_knowledge_base(fx.artifacts.path()).await.unwrap();

        let stats = fx.manager().get_knowledge_stats().await.unwrap();
        assert_eq!(stats.total_chunks, 1);
        assert!(!stats.phases.contains_key("stale"));
        assert_eq!(stats.phases.get("fresh"), Some(&1));
    }

    #[tokio::test]
    async fn test_missing_directory_leaves_store_untouched() {
        let fx = Fixture::new();
        fx.manager().store_phase_text("keep", "kept", "s").await.unwrap();

        let missing = fx.artifacts.path().join("missing");
        let result = fx.indexer().index_knowledge_base(&missing).await;
        assert!(matches!(result, Err(KnowledgeError::Input(_))));
        assert_eq!(fx.store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_artifact_is_counted_and_skipped() {
        let fx = Fixture::new();
        fx.write("broken.json", "{not json");
        fx.write("good.md", "valid narrative");

        let report = fx.indexer().index_knowledge_base(fx.artifacts.path()).await.unwrap();
        assert_eq!(report.artifacts, 2);
        assert_eq!(report.failed_artifacts, 1);
        assert_eq!(report.stored, 1);
    }

    #[tokio::test]
    async fn test_phase_field_overrides_path() {
        let fx = Fixture::new();
        fx.write("output/final.json", r#"{"phase": "phase4", "summary": "revenue up"}"#);

        fx.indexer().index_knowledge_base(fx.artifacts.path()).await.unwrap();
        let stats = fx.manager().get_knowledge_stats().await.unwrap();
        assert_eq!(stats.phases.get("phase4"), Some(&1));
        assert!(!stats.phases.contains_key("output"));

        let chunk = &fx.store.get_all_chunks().unwrap()[0];
        assert!(!chunk.content.contains("phase4"));
    }

    #[tokio::test]
    async fn test_update_index_skips_duplicates() {
        let fx = Fixture::new();
        fx.write("phase1.json", &schema_artifact());
        let indexer = fx.indexer();

        let first = indexer.update_index(fx.artifacts.path()).await.unwrap();
        assert_eq!(first.stored, 2);
        assert_eq!(first.duplicates, 0);

        fx.write("phase2.txt", "completely new text");
        let second = indexer.update_index(fx.artifacts.path()).await.unwrap();
        assert_eq!(second.duplicates, 2);
        assert_eq!(second.stored, 1);
        assert_eq!(fx.store.count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_indexer_aborts() {
        let fx = Fixture::new();
        fx.write("phase1.txt", "some text");
        let (handle, signal) = cancel_pair();
        let indexer = fx.indexer().with_cancel_signal(signal);

        handle.cancel();
        let result = indexer.update_index(fx.artifacts.path()).await;
        assert!(matches!(result, Err(KnowledgeError::Cancelled)));
        assert_eq!(fx.store.count().unwrap(), 0);
    }

    /// 항상 실패하는 임베더
    struct DownEmbedding;

    #[async_trait]
    impl EmbeddingProvider for DownEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(KnowledgeError::Embedding("connection refused".to_string()))
        }

        fn dimension(&self) -> usize {
            8
        }

        fn name(&self) -> &str {
            "down"
        }
    }

    #[tokio::test]
    async fn test_embedding_failures_are_skipped() {
        let mut fx = Fixture::new();
        fx.embedder = Arc::new(DownEmbedding);
        fx.write("phase1.json", &schema_artifact());

        let report = fx.indexer().index_knowledge_base(fx.artifacts.path()).await.unwrap();
        assert_eq!(report.produced, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.stored, 0);
    }

    #[test]
    fn test_take_phase_override() {
        let mut payload = json!({"phase": "p9", "x": 1});
        assert_eq!(take_phase_override(&mut payload).as_deref(), Some("p9"));
        assert_eq!(payload, json!({"x": 1}));

        let mut numeric = json!({"phase": 3});
        assert_eq!(take_phase_override(&mut numeric), None);
        assert_eq!(take_phase_override(&mut json!(["a"])), None);
    }
}
