//! Knowledge 모듈 - 페이즈 단위 지식 저장소
//!
//! - Chunker: 테이블 스키마 인식 / 슬라이딩 윈도우 텍스트 분할
//! - Store: SQLite 청크 저장 + 선형 스캔 유사도 검색
//! - Vector: 코사인 유사도, L2 정규화, 안정 정렬 top-K
//! - Manager: 페이즈 단위 저장/검색/삭제/통계 API

mod chunker;
mod manager;
mod store;
mod vector;

pub(crate) use manager::tag_chunk;

// Re-exports
pub use chunker::{
    chunker_for, default_chunker, looks_like_table_schema, render_value, sliding_window,
    ChunkConfig, ChunkStrategy, Chunker, GenericChunker, KnowledgeChunker, TableChunker,
    TextChunk, MAX_SAMPLE_ROWS,
};
pub use manager::{KnowledgeManager, KnowledgeStats, StoreReport, UNKNOWN_PHASE};
pub use store::{
    KnowledgeChunk, KnowledgeResult, KnowledgeStore, Metadata, NewChunk, ScoredChunk,
    StoreStats,
};
pub use vector::{cosine_similarity, l2_normalize, rank_by_similarity};
