//! Knowledge Chunking Module
//!
//! 파이프라인 산출물(JSON 페이로드)과 원문 텍스트를 청크로 분할합니다.
//!
//! - GenericChunker: 페이로드를 들여쓴 텍스트로 렌더링 후 슬라이딩 윈도우 분할
//! - TableChunker: `tables` 맵을 테이블별 스키마/샘플 청크로 분할
//! - KnowledgeChunker: 페이로드 모양에 따라 위 두 전략을 자동 선택

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::{KnowledgeError, Result};

use super::store::Metadata;

/// 샘플 청크에 포함할 최대 행 수
pub const MAX_SAMPLE_ROWS: usize = 5;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정 (단위: 문자 수)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkConfig {
    /// 윈도우 크기
    pub chunk_size: usize,
    /// 연속 윈도우 간 중첩 크기 (chunk_size 미만)
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkConfig {
    /// RAG 최적화된 설정
    pub fn for_rag() -> Self {
        Self {
            chunk_size: 1500,
            chunk_overlap: 300,
        }
    }

    /// 빠른 인덱싱용 설정 (오버랩 없음)
    pub fn for_fast() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 0,
        }
    }

    /// overlap < size 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(KnowledgeError::Config(
                "Chunk size must be greater than 0".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(KnowledgeError::Config(format!(
                "Chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

// ============================================================================
// Chunk Output
// ============================================================================

/// 임베딩 전 청크 (내용 + 메타데이터)
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub content: String,
    pub metadata: Metadata,
}

impl TextChunk {
    fn new(content: String, chunk_type: &str, source: &str) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("type".to_string(), json!(chunk_type));
        metadata.insert("source".to_string(), json!(source));
        Self { content, metadata }
    }

    fn with(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// 메타데이터의 `type` 값
    pub fn chunk_type(&self) -> Option<&str> {
        self.metadata.get("type").and_then(Value::as_str)
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 페이로드를 순서 있는 청크 목록으로 분할
    fn chunk(&self, payload: &Value, source: &str) -> Result<Vec<TextChunk>>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

/// 청킹 전략 선택
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// 페이로드 모양으로 자동 선택
    Auto,
    /// 일반 텍스트 슬라이딩 윈도우
    Generic,
    /// 테이블 스키마 인식
    Table,
}

// ============================================================================
// GenericChunker
// ============================================================================

/// 일반 청커
///
/// 중첩 페이로드를 들여쓴 텍스트로 직렬화한 뒤 고정 크기 윈도우로 자릅니다.
pub struct GenericChunker {
    config: ChunkConfig,
}

impl GenericChunker {
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// 원문 텍스트 분할
    pub fn chunk_text(&self, text: &str, source: &str) -> Vec<TextChunk> {
        sliding_window(text, &self.config)
            .into_iter()
            .enumerate()
            .map(|(i, content)| {
                TextChunk::new(content, "text", source).with("chunk_index", json!(i))
            })
            .collect()
    }
}

impl Chunker for GenericChunker {
    fn chunk(&self, payload: &Value, source: &str) -> Result<Vec<TextChunk>> {
        let text = render_value(payload);
        Ok(self.chunk_text(&text, source))
    }

    fn name(&self) -> &'static str {
        "GenericChunker"
    }
}

// ============================================================================
// TableChunker
// ============================================================================

/// 테이블 스키마 인식 청커
///
/// `tables` 맵의 각 테이블마다 스키마 요약 청크 하나와
/// (샘플이 있으면) 샘플 행 청크 하나를 만듭니다.
#[derive(Debug, Default)]
pub struct TableChunker;

impl TableChunker {
    pub fn new() -> Self {
        Self
    }

    fn chunk_table(&self, name: &str, table: &Value, source: &str) -> Result<Vec<TextChunk>> {
        let table = table.as_object().ok_or_else(|| {
            KnowledgeError::Input(format!("table '{}' must be an object", name))
        })?;

        let columns = field(table, &["schema", "columns"])
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let schema = TextChunk::new(schema_summary(name, table, columns), "table_schema", source)
            .with("table", json!(name))
            .with("column_count", json!(columns.len()));
        let mut chunks = vec![schema];

        let samples = field(table, &["samples", "sample_data"])
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        if !samples.is_empty() {
            let rows = &samples[..samples.len().min(MAX_SAMPLE_ROWS)];
            let mut content = format!("Sample rows from table {}:\n", name);
            for row in rows {
                content.push_str(&compact(row));
                content.push('\n');
            }
            chunks.push(
                TextChunk::new(content.trim().to_string(), "table_samples", source)
                    .with("table", json!(name))
                    .with("sample_count", json!(rows.len())),
            );
        }

        Ok(chunks)
    }
}

impl Chunker for TableChunker {
    fn chunk(&self, payload: &Value, source: &str) -> Result<Vec<TextChunk>> {
        let tables = payload
            .get("tables")
            .ok_or_else(|| KnowledgeError::Input("payload has no 'tables' key".to_string()))?
            .as_object()
            .ok_or_else(|| KnowledgeError::Input("'tables' must be an object".to_string()))?;

        let mut chunks = Vec::new();
        for (name, table) in tables {
            chunks.extend(self.chunk_table(name, table, source)?);
        }
        Ok(chunks)
    }

    fn name(&self) -> &'static str {
        "TableChunker"
    }
}

// ============================================================================
// KnowledgeChunker (auto)
// ============================================================================

/// 자동 선택 청커
///
/// `tables` 객체가 있으면 테이블 전략을, 나머지 최상위 키는 일반 전략을 씁니다.
pub struct KnowledgeChunker {
    generic: GenericChunker,
    table: TableChunker,
}

impl KnowledgeChunker {
    pub fn new(config: ChunkConfig) -> Result<Self> {
        Ok(Self {
            generic: GenericChunker::new(config)?,
            table: TableChunker::new(),
        })
    }

    /// 원문 텍스트 분할
    pub fn chunk_text(&self, text: &str, source: &str) -> Vec<TextChunk> {
        self.generic.chunk_text(text, source)
    }
}

impl Chunker for KnowledgeChunker {
    fn chunk(&self, payload: &Value, source: &str) -> Result<Vec<TextChunk>> {
        if !looks_like_table_schema(payload) {
            return self.generic.chunk(payload, source);
        }

        let mut chunks = self.table.chunk(payload, source)?;

        if let Value::Object(map) = payload {
            let rest: Map<String, Value> = map
                .iter()
                .filter(|(k, _)| k.as_str() != "tables")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if !rest.is_empty() {
                chunks.extend(self.generic.chunk(&Value::Object(rest), source)?);
            }
        }

        Ok(chunks)
    }

    fn name(&self) -> &'static str {
        "KnowledgeChunker"
    }
}

/// `tables` 객체를 가진 페이로드인지 확인
pub fn looks_like_table_schema(payload: &Value) -> bool {
    matches!(payload.get("tables"), Some(Value::Object(_)))
}

// ============================================================================
// Rendering
// ============================================================================

/// 중첩 값을 들여쓴 텍스트로 렌더링
///
/// 빈 값(null, 빈 문자열/배열/객체)은 빈 문자열이 됩니다.
pub fn render_value(value: &Value) -> String {
    let mut out = String::new();
    match value {
        Value::Object(_) | Value::Array(_) => render_nested(value, 0, &mut out),
        scalar => out.push_str(&render_scalar(scalar)),
    }
    out
}

fn render_nested(value: &Value, indent: usize, out: &mut String) {
    let pad = " ".repeat(indent);
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                if is_compound(v) {
                    out.push_str(&format!("{}{}:\n", pad, key));
                    render_nested(v, indent + 2, out);
                } else {
                    out.push_str(&format!("{}{}: {}\n", pad, key, render_scalar(v)));
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                if is_compound(item) {
                    out.push_str(&format!("{}-\n", pad));
                    render_nested(item, indent + 2, out);
                } else {
                    out.push_str(&format!("{}- {}\n", pad, render_scalar(item)));
                }
            }
        }
        scalar => {
            out.push_str(&pad);
            out.push_str(&render_scalar(scalar));
            out.push('\n');
        }
    }
}

fn is_compound(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => false,
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) => "[]".to_string(),
        Value::Object(_) => "{}".to_string(),
    }
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

// ============================================================================
// Table Summary
// ============================================================================

fn field<'a>(table: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| table.get(*k))
}

fn schema_summary(name: &str, table: &Map<String, Value>, columns: &[Value]) -> String {
    let mut out = format!("Table: {}\n", name);

    let row_count = field(table, &["row_count"])
        .or_else(|| table.get("stats").and_then(|s| s.get("row_count")));
    if let Some(count) = row_count {
        out.push_str(&format!("Row count: {}\n", compact(count)));
    }

    out.push_str("Columns:\n");
    for column in columns {
        out.push_str(&format!("  - {}\n", describe_column(column)));
    }

    if let Some(pk) = field(table, &["primary_key", "primary_keys"]) {
        out.push_str(&format!("Primary key: {}\n", list_or_scalar(pk)));
    }

    for (label, keys) in [
        ("Foreign keys", &["foreign_keys"][..]),
        ("Unique constraints", &["unique_keys", "unique_constraints"][..]),
        ("Indexes", &["indexes"][..]),
    ] {
        let items = field(table, keys)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if items.is_empty() {
            continue;
        }
        out.push_str(&format!("{}:\n", label));
        for item in items {
            out.push_str(&format!("  - {}\n", compact(item)));
        }
    }

    out.trim_end().to_string()
}

fn describe_column(column: &Value) -> String {
    let Some(col) = column.as_object() else {
        return compact(column);
    };

    let name = col.get("name").map(compact).unwrap_or_else(|| "?".to_string());
    let mut parts = Vec::new();

    if let Some(ty) = col.get("type").or_else(|| col.get("data_type")) {
        parts.push(compact(ty));
    }
    match col.get("nullable").and_then(Value::as_bool) {
        Some(true) => parts.push("NULL".to_string()),
        Some(false) => parts.push("NOT NULL".to_string()),
        None => {}
    }
    if let Some(default) = col.get("default").filter(|d| !d.is_null()) {
        parts.push(format!("default: {}", compact(default)));
    }
    if let Some(constraints) = col.get("constraints").filter(|c| !c.is_null()) {
        parts.push(list_or_scalar(constraints));
    }

    if parts.is_empty() {
        name
    } else {
        format!("{} ({})", name, parts.join(", "))
    }
}

fn list_or_scalar(value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(compact).collect::<Vec<_>>().join(", "),
        other => compact(other),
    }
}

// ============================================================================
// Sliding Window
// ============================================================================

/// 문자 단위 슬라이딩 윈도우 분할
///
/// 각 윈도우는 trim되며 빈 윈도우는 버립니다.
pub fn sliding_window(text: &str, config: &ChunkConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || config.chunk_size == 0 {
        return vec![];
    }

    let step = config.step().max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        let window: String = chars[start..end].iter().collect();
        let trimmed = window.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        if end >= chars.len() {
            break;
        }
        start += step;
    }

    chunks
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 기본 청커 생성 (자동 선택)
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(KnowledgeChunker {
        generic: GenericChunker {
            config: ChunkConfig::default(),
        },
        table: TableChunker::new(),
    })
}

/// 전략 지정 청커 생성
pub fn chunker_for(strategy: ChunkStrategy, config: ChunkConfig) -> Result<Box<dyn Chunker>> {
    Ok(match strategy {
        ChunkStrategy::Auto => Box::new(KnowledgeChunker::new(config)?),
        ChunkStrategy::Generic => Box::new(GenericChunker::new(config)?),
        ChunkStrategy::Table => Box::new(TableChunker::new()),
    })
}

// ============================================================================
// Tests
// ============================================================================
