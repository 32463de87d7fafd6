//! Knowledge Store - rusqlite 기반 청크 저장소
//!
//! 청크(내용 + 메타데이터 + 벡터)를 저장하고 선형 스캔으로 유사도 검색을 합니다.
//! 저장 위치: ~/.phase-knowledge/knowledge.db
//!
//! 쓰기 직렬화는 이 저장소가 보장하지 않고 SQLite에 맡깁니다.
//! 같은 프로세스 안에서는 연결 Mutex가, 프로세스 간에는 SQLite 파일 잠금이
//! 충돌하는 쓰기를 직렬화합니다 (busy_timeout 만큼 대기).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::get_data_dir;
use crate::error::{KnowledgeError, Result};

use super::vector::rank_by_similarity;

/// 메타데이터 맵 (문자열 키 → 스칼라/배열 값)
pub type Metadata = serde_json::Map<String, Value>;

/// 기본 잠금 대기 시간
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

/// 저장된 청크
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: i64,
    pub content: String,
    pub metadata: Metadata,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeChunk {
    /// 메타데이터의 `phase` 값
    pub fn phase(&self) -> Option<&str> {
        self.metadata.get("phase").and_then(Value::as_str)
    }
}

/// 새 청크 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content: String,
    pub metadata: Metadata,
    pub vector: Vec<f32>,
}

/// 유사도 점수가 붙은 청크
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: KnowledgeChunk,
    pub score: f32,
}

/// 검색 결과 (호출자에게 돌려주는 읽기 전용 투영)
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeResult {
    pub content: String,
    pub metadata: Metadata,
    pub score: f32,
}

impl From<ScoredChunk> for KnowledgeResult {
    fn from(scored: ScoredChunk) -> Self {
        Self {
            content: scored.chunk.content,
            metadata: scored.chunk.metadata,
            score: scored.score,
        }
    }
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub total_content_bytes: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// KnowledgeStore
// ============================================================================

/// Knowledge Store - 동기 청크 저장소
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// 잠금 대기 시간을 지정하여 열기
    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    KnowledgeError::Persistence(format!(
                        "Failed to create database directory {:?}: {}",
                        parent, e
                    ))
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            KnowledgeError::Persistence(format!("Failed to open SQLite database {:?}: {}", path, e))
        })?;
        conn.busy_timeout(busy_timeout)?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 기본 위치에서 열기 (~/.phase-knowledge/knowledge.db)
    pub fn open_default() -> Result<Self> {
        Self::open(&get_data_dir().join("knowledge.db"))
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| KnowledgeError::Persistence(format!("Lock error: {}", e)))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                vector TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        tracing::debug!("Knowledge store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 청크 추가 (중복 내용도 허용)
    pub fn add_chunk(&self, content: &str, metadata: Metadata, vector: &[f32]) -> Result<i64> {
        let conn = self.lock()?;
        let id = insert_chunk(&conn, content, metadata, vector)?;
        tracing::debug!("Added chunk id={}", id);
        Ok(id)
    }

    /// 청크 일괄 추가 (단일 트랜잭션, 입력 순서 유지)
    pub fn add_chunks(&self, chunks: Vec<NewChunk>) -> Result<Vec<i64>> {
        if chunks.is_empty() {
            return Ok(vec![]);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            ids.push(insert_chunk(&tx, &chunk.content, chunk.metadata, &chunk.vector)?);
        }
        tx.commit()?;

        tracing::debug!("Added {} chunks in batch", ids.len());
        Ok(ids)
    }

    /// 전체 청크 조회 (id 오름차순)
    pub fn get_all_chunks(&self) -> Result<Vec<KnowledgeChunk>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, content, metadata, vector, created_at FROM chunks ORDER BY id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut chunks = Vec::new();
        for row in rows {
            let (id, content, metadata, vector, created_at) = row?;
            chunks.push(KnowledgeChunk {
                id,
                content,
                metadata: parse_json(id, "metadata", &metadata)?,
                vector: parse_json(id, "vector", &vector)?,
                created_at: parse_datetime(&created_at),
            });
        }

        Ok(chunks)
    }

    /// 코사인 유사도 상위 `limit`개 청크
    ///
    /// 동점은 id 오름차순(삽입 순)으로 정렬됩니다.
    pub fn search_similar(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredChunk>> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let chunks = self.get_all_chunks()?;
        Ok(rank_by_similarity(query, chunks, limit))
    }

    /// 메타데이터 `key`가 `value`와 정확히 일치하는 청크 삭제
    ///
    /// 일치하는 청크가 없어도 에러가 아닙니다.
    pub fn delete_by_metadata(&self, key: &str, value: &Value) -> Result<usize> {
        let mut conn = self.lock()?;

        let ids: Vec<i64> = {
            let mut stmt = conn.prepare("SELECT id, metadata FROM chunks")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut ids = Vec::new();
            for row in rows {
                let (id, metadata) = row?;
                let metadata: Metadata = parse_json(id, "metadata", &metadata)?;
                if metadata.get(key) == Some(value) {
                    ids.push(id);
                }
            }
            ids
        };

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM chunks WHERE id = ?1")?;
            for id in &ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;

        tracing::info!("Deleted {} chunks where {} = {}", ids.len(), key, value);
        Ok(ids.len())
    }

    /// 전체 삭제
    pub fn clear(&self) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM chunks", [])?;
        tracing::info!("Cleared knowledge store ({} chunks removed)", removed);
        Ok(removed)
    }

    /// 청크 개수
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let (count, total_size): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(CAST(content AS BLOB))), 0) FROM chunks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(StoreStats {
            chunk_count: count as usize,
            total_content_bytes: total_size as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 불변식 검사 후 한 행 삽입
fn insert_chunk(
    conn: &Connection,
    content: &str,
    mut metadata: Metadata,
    vector: &[f32],
) -> Result<i64> {
    if content.trim().is_empty() {
        return Err(KnowledgeError::Input(
            "chunk content must not be empty".to_string(),
        ));
    }
    if !metadata.contains_key("phase") {
        return Err(KnowledgeError::Input(
            "chunk metadata must contain 'phase'".to_string(),
        ));
    }
    // JSON은 inf/NaN을 null로 기록하므로 저장 전에 거부
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(KnowledgeError::Input(
            "chunk vector must contain only finite values".to_string(),
        ));
    }

    let now = Utc::now().to_rfc3339();
    metadata
        .entry("timestamp")
        .or_insert_with(|| Value::String(now.clone()));

    let metadata_json = serde_json::to_string(&metadata)
        .map_err(|e| KnowledgeError::Persistence(format!("Failed to encode metadata: {}", e)))?;
    let vector_json = serde_json::to_string(vector)
        .map_err(|e| KnowledgeError::Persistence(format!("Failed to encode vector: {}", e)))?;

    conn.execute(
        "INSERT INTO chunks (content, metadata, vector, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![content, metadata_json, vector_json, now],
    )?;

    Ok(conn.last_insert_rowid())
}

fn parse_json<T: serde::de::DeserializeOwned>(id: i64, column: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        KnowledgeError::Persistence(format!("Corrupt {} in chunk {}: {}", column, id, e))
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, KnowledgeStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = KnowledgeStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn meta(phase: &str) -> Metadata {
        let mut m = Metadata::new();
        m.insert("phase".to_string(), json!(phase));
        m
    }

    #[test]
    fn test_add_and_get_all() {
        let (_dir, store) = create_test_store();

        let id = store.add_chunk("customers table", meta("phase1"), &[1.0, 0.0]).unwrap();
        assert!(id > 0);

        let chunks = store.get_all_chunks().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, id);
        assert_eq!(chunks[0].content, "customers table");
        assert_eq!(chunks[0].vector, vec![1.0, 0.0]);
        assert_eq!(chunks[0].phase(), Some("phase1"));
        assert!(chunks[0].metadata.contains_key("timestamp"));
    }

    #[test]
    fn test_duplicate_content_is_allowed() {
        let (_dir, store) = create_test_store();
        store.add_chunk("same", meta("p"), &[1.0]).unwrap();
        store.add_chunk("same", meta("p"), &[1.0]).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_rejects_empty_content_and_missing_phase() {
        let (_dir, store) = create_test_store();

        let result = store.add_chunk("   ", meta("p"), &[1.0]);
        assert!(matches!(result, Err(KnowledgeError::Input(_))));

        let result = store.add_chunk("text", Metadata::new(), &[1.0]);
        assert!(matches!(result, Err(KnowledgeError::Input(_))));

        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_rejects_non_finite_vector() {
        let (_dir, store) = create_test_store();
        store.add_chunk("good", meta("a"), &[1.0, 0.0]).unwrap();

        let result = store.add_chunk("bad", meta("a"), &[f32::INFINITY, 0.0]);
        assert!(matches!(result, Err(KnowledgeError::Input(_))));
        let result = store.add_chunk("bad", meta("a"), &[f32::NAN, 0.0]);
        assert!(matches!(result, Err(KnowledgeError::Input(_))));

        // 나머지 청크는 계속 읽을 수 있어야 함
        assert_eq!(store.get_all_chunks().unwrap().len(), 1);
        let hits = store.search_similar(&[1.0, 0.0], 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.content, "good");
    }

    #[test]
    fn test_add_chunks_preserves_order() {
        let (_dir, store) = create_test_store();
        let batch: Vec<NewChunk> = (0..4)
            .map(|i| NewChunk {
                content: format!("chunk {}", i),
                metadata: meta("bulk"),
                vector: vec![i as f32, 1.0],
            })
            .collect();

        let ids = store.add_chunks(batch).unwrap();
        assert_eq!(ids.len(), 4);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let contents: Vec<String> = store
            .get_all_chunks()
            .unwrap()
            .into_iter()
            .map(|c| c.content)
            .collect();
        assert_eq!(contents, vec!["chunk 0", "chunk 1", "chunk 2", "chunk 3"]);
    }

    #[test]
    fn test_add_chunks_is_atomic() {
        let (_dir, store) = create_test_store();
        let batch = vec![
            NewChunk {
                content: "ok".to_string(),
                metadata: meta("p"),
                vector: vec![1.0],
            },
            NewChunk {
                content: "".to_string(),
                metadata: meta("p"),
                vector: vec![1.0],
            },
        ];
        assert!(store.add_chunks(batch).is_err());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_search_similar_ranking_and_ties() {
        let (_dir, store) = create_test_store();
        let first = store.add_chunk("x axis a", meta("p"), &[1.0, 0.0]).unwrap();
        let second = store.add_chunk("x axis b", meta("p"), &[2.0, 0.0]).unwrap();
        store.add_chunk("y axis", meta("p"), &[0.0, 1.0]).unwrap();
        store.add_chunk("bad dim", meta("p"), &[1.0, 0.0, 0.0]).unwrap();

        let results = store.search_similar(&[1.0, 0.0], 3).unwrap();
        assert_eq!(results.len(), 3);
        // 동점 → 삽입 순
        assert_eq!(results[0].chunk.id, first);
        assert_eq!(results[1].chunk.id, second);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(results[2].score, 0.0);

        assert!(store.search_similar(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_delete_by_metadata() {
        let (_dir, store) = create_test_store();
        store.add_chunk("a", meta("phase1"), &[1.0]).unwrap();
        store.add_chunk("b", meta("phase1"), &[1.0]).unwrap();
        store.add_chunk("c", meta("phase2"), &[1.0]).unwrap();

        let removed = store.delete_by_metadata("phase", &json!("phase1")).unwrap();
        assert_eq!(removed, 2);

        let removed = store.delete_by_metadata("phase", &json!("phase1")).unwrap();
        assert_eq!(removed, 0);

        // 정확히 일치하는 값만 삭제
        let removed = store.delete_by_metadata("phase", &json!("phase")).unwrap();
        assert_eq!(removed, 0);

        let remaining = store.get_all_chunks().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].phase(), Some("phase2"));
    }

    #[test]
    fn test_clear_and_stats() {
        let (_dir, store) = create_test_store();
        store.add_chunk("1234567890", meta("p"), &[1.0]).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.total_content_bytes, 10);

        assert_eq!(store.clear().unwrap(), 1);
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.clear().unwrap(), 0);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("kb.db");
        {
            let store = KnowledgeStore::open(&db_path).unwrap();
            store.add_chunk("durable", meta("p"), &[0.5, 0.5]).unwrap();
        }
        let store = KnowledgeStore::open(&db_path).unwrap();
        let chunks = store.get_all_chunks().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "durable");
    }

    #[test]
    fn test_open_failure_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        // 디렉토리 자체를 DB 파일로 열기
        let result = KnowledgeStore::open(dir.path());
        assert!(matches!(result, Err(KnowledgeError::Persistence(_))));
    }
}
