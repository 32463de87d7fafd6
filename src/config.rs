//! 설정 모듈
//!
//! 임베더 종류, 차원, 청크 크기, 저장 위치 등을 한 곳에서 관리합니다.
//! 환경변수에서 읽고, CLI 플래그로 덮어쓸 수 있습니다.
//!
//! 저장 위치 기본값: ~/.phase-knowledge/knowledge.db

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::{KnowledgeError, Result};
use crate::knowledge::ChunkConfig;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.phase-knowledge/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".phase-knowledge")
}

// ============================================================================
// Embedder Kind
// ============================================================================

/// 임베더 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// SHA-256 해시 기반 (오프라인/테스트용)
    Hash,
    /// 도메인 어휘 + 통계 피처 기반
    Feature,
    /// 외부 임베딩 API
    Remote,
}

impl EmbedderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedderKind::Hash => "hash",
            EmbedderKind::Feature => "feature",
            EmbedderKind::Remote => "remote",
        }
    }
}

impl FromStr for EmbedderKind {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hash" => Ok(EmbedderKind::Hash),
            "feature" | "lexical" | "simple" => Ok(EmbedderKind::Feature),
            "remote" | "api" => Ok(EmbedderKind::Remote),
            other => Err(KnowledgeError::Config(format!(
                "Unknown embedder kind: '{}'. Must be hash, feature, or remote",
                other
            ))),
        }
    }
}

// ============================================================================
// Config Types
// ============================================================================

/// 원격 임베딩 API 설정
#[derive(Debug, Clone, Serialize)]
pub struct RemoteEmbeddingConfig {
    /// 엔드포인트 URL (POST {model, input})
    pub endpoint: String,
    /// 모델 이름
    pub model: String,
    /// Bearer 토큰 (선택)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for RemoteEmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_EMBEDDING_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl RemoteEmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 전체 설정
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeConfig {
    /// SQLite 파일 경로
    pub db_path: PathBuf,
    /// 임베더 종류
    pub embedder: EmbedderKind,
    /// 임베딩 차원
    pub dimension: usize,
    /// 청킹 설정
    pub chunk: ChunkConfig,
    /// 원격 임베딩 설정 (embedder = remote 일 때만 사용)
    pub remote: RemoteEmbeddingConfig,
    /// SQLite 잠금 대기 시간 (ms)
    pub store_timeout_ms: u64,
    /// 증분 인덱싱 중복 판정 임계값
    pub dedup_threshold: f32,
}

pub const DEFAULT_DIMENSION: usize = 384;
pub const DEFAULT_EMBEDDING_URL: &str = "http://localhost:11434/api/embeddings";
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_DEDUP_THRESHOLD: f32 = 0.98;

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            db_path: get_data_dir().join("knowledge.db"),
            embedder: EmbedderKind::Feature,
            dimension: DEFAULT_DIMENSION,
            chunk: ChunkConfig::default(),
            remote: RemoteEmbeddingConfig::default(),
            store_timeout_ms: 5000,
            dedup_threshold: DEFAULT_DEDUP_THRESHOLD,
        }
    }
}

impl KnowledgeConfig {
    /// 환경변수에서 설정 로드 (없는 값은 기본값)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 키 조회 함수로부터 설정 구성
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(path) = get("PHASE_KNOWLEDGE_DB") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(kind) = get("PHASE_KNOWLEDGE_EMBEDDER") {
            config.embedder = kind.parse()?;
        }
        if let Some(v) = get("PHASE_KNOWLEDGE_DIMENSION") {
            config.dimension = parse_env("PHASE_KNOWLEDGE_DIMENSION", &v)?;
        }
        if let Some(v) = get("PHASE_KNOWLEDGE_CHUNK_SIZE") {
            config.chunk.chunk_size = parse_env("PHASE_KNOWLEDGE_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = get("PHASE_KNOWLEDGE_CHUNK_OVERLAP") {
            config.chunk.chunk_overlap = parse_env("PHASE_KNOWLEDGE_CHUNK_OVERLAP", &v)?;
        }
        if let Some(url) = get("PHASE_KNOWLEDGE_EMBEDDING_URL") {
            config.remote.endpoint = url;
        }
        if let Some(model) = get("PHASE_KNOWLEDGE_EMBEDDING_MODEL") {
            config.remote.model = model;
        }
        // 우선순위: PHASE_KNOWLEDGE_API_KEY > OPENAI_API_KEY
        config.remote.api_key = get("PHASE_KNOWLEDGE_API_KEY").or_else(|| get("OPENAI_API_KEY"));
        if let Some(v) = get("PHASE_KNOWLEDGE_TIMEOUT_SECS") {
            config.remote.timeout_secs = parse_env("PHASE_KNOWLEDGE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("PHASE_KNOWLEDGE_STORE_TIMEOUT_MS") {
            config.store_timeout_ms = parse_env("PHASE_KNOWLEDGE_STORE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("PHASE_KNOWLEDGE_DEDUP_THRESHOLD") {
            config.dedup_threshold = parse_env("PHASE_KNOWLEDGE_DEDUP_THRESHOLD", &v)?;
        }

        Ok(config)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(KnowledgeError::Config(
                "Embedding dimension must be greater than 0".to_string(),
            ));
        }

        self.chunk.validate()?;

        if !(0.0..=1.0).contains(&self.dedup_threshold) {
            return Err(KnowledgeError::Config(format!(
                "Dedup threshold must be within [0, 1], got {}",
                self.dedup_threshold
            )));
        }

        if self.embedder == EmbedderKind::Remote {
            let parsed = url::Url::parse(&self.remote.endpoint).map_err(|e| {
                KnowledgeError::Config(format!(
                    "Invalid embedding endpoint '{}': {}",
                    self.remote.endpoint, e
                ))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(KnowledgeError::Config(format!(
                    "Embedding endpoint must be http(s): {}",
                    self.remote.endpoint
                )));
            }
            if self.remote.model.trim().is_empty() {
                return Err(KnowledgeError::Config(
                    "Embedding model must not be empty".to_string(),
                ));
            }
            if self.remote.timeout_secs == 0 {
                return Err(KnowledgeError::Config(
                    "Embedding timeout must be greater than 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| {
            KnowledgeError::Config(format!("Invalid value for {}: '{}' ({})", key, value, e))
        })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = KnowledgeConfig::default();
        assert_eq!(config.embedder, EmbedderKind::Feature);
        assert_eq!(config.dimension, DEFAULT_DIMENSION);
        assert!(config.db_path.ends_with("knowledge.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = KnowledgeConfig::from_lookup(lookup(&[
            ("PHASE_KNOWLEDGE_DB", "/tmp/kb.db"),
            ("PHASE_KNOWLEDGE_EMBEDDER", "hash"),
            ("PHASE_KNOWLEDGE_DIMENSION", "128"),
            ("PHASE_KNOWLEDGE_CHUNK_SIZE", "500"),
            ("PHASE_KNOWLEDGE_CHUNK_OVERLAP", "50"),
        ]))
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/kb.db"));
        assert_eq!(config.embedder, EmbedderKind::Hash);
        assert_eq!(config.dimension, 128);
        assert_eq!(config.chunk.chunk_size, 500);
        assert_eq!(config.chunk.chunk_overlap, 50);
    }

    #[test]
    fn test_api_key_fallback() {
        let config =
            KnowledgeConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.remote.api_key.as_deref(), Some("sk-test"));

        let config = KnowledgeConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("PHASE_KNOWLEDGE_API_KEY", "primary"),
        ]))
        .unwrap();
        assert_eq!(config.remote.api_key.as_deref(), Some("primary"));
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let result =
            KnowledgeConfig::from_lookup(lookup(&[("PHASE_KNOWLEDGE_DIMENSION", "many")]));
        assert!(matches!(result, Err(KnowledgeError::Config(_))));
    }

    #[test]
    fn test_embedder_kind_parse() {
        assert_eq!("HASH".parse::<EmbedderKind>().unwrap(), EmbedderKind::Hash);
        assert_eq!("lexical".parse::<EmbedderKind>().unwrap(), EmbedderKind::Feature);
        assert_eq!("api".parse::<EmbedderKind>().unwrap(), EmbedderKind::Remote);
        assert!("word2vec".parse::<EmbedderKind>().is_err());
    }

    #[test]
    fn test_validate_rejects_overlap_ge_size() {
        let mut config = KnowledgeConfig::default();
        config.chunk.chunk_size = 100;
        config.chunk.chunk_overlap = 100;
        assert!(matches!(config.validate(), Err(KnowledgeError::Config(_))));
    }

    #[test]
    fn test_validate_remote_endpoint() {
        let mut config = KnowledgeConfig::default();
        config.embedder = EmbedderKind::Remote;
        config.remote.endpoint = "not a url".to_string();
        assert!(matches!(config.validate(), Err(KnowledgeError::Config(_))));

        config.remote.endpoint = "ftp://example.com/embed".to_string();
        assert!(config.validate().is_err());

        config.remote.endpoint = "https://example.com/v1/embeddings".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_dimension() {
        let config = KnowledgeConfig {
            dimension: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
