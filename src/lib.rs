//! phase-knowledge - 페이즈 단위 지식 청킹/임베딩/검색 엔진
//!
//! 다단계 분석 파이프라인이 만든 스키마 설명, 비즈니스 서술, 규칙 정의를
//! 청크로 나누고 벡터화해 SQLite에 저장한 뒤, 페이즈별로 유사도 검색합니다.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod knowledge;

// Re-exports
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use config::{get_data_dir, EmbedderKind, KnowledgeConfig, RemoteEmbeddingConfig};
pub use embedding::{
    create_embedder, EmbeddingProvider, FeatureEmbedding, HashEmbedding, RemoteEmbedding,
};
pub use error::{KnowledgeError, Result};
pub use indexer::{IndexReport, Indexer, IndexerConfig};
pub use knowledge::{
    chunker_for, default_chunker, ChunkConfig, ChunkStrategy, Chunker, KnowledgeChunk,
    KnowledgeManager, KnowledgeResult, KnowledgeStats, KnowledgeStore, StoreReport, StoreStats,
    TextChunk,
};
