//! 아티팩트 수집
//!
//! 파이프라인 출력 디렉토리에서 지식 아티팩트(json/md/txt)를 찾습니다.
//! .gitignore 패턴을 존중하고, 파일 이름 순으로 정렬해 재현 가능한 순서를 보장합니다.
//!
//! 페이즈 결정 규칙:
//! - `<root>/<phase>/...` 처럼 하위 디렉토리에 있으면 첫 번째 디렉토리 이름
//! - `<root>/<phase>.json` 처럼 루트에 있으면 파일 이름(확장자 제외)

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::error::{KnowledgeError, Result};

// ============================================================================
// Artifact Kinds
// ============================================================================

/// 지원하는 아티팩트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// 구조화된 JSON 페이로드
    Json,
    /// 마크다운/텍스트 서술
    Text,
}

impl ArtifactKind {
    /// 확장자로 아티팩트 종류 결정
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(ArtifactKind::Json),
            "md" | "markdown" | "txt" => Some(ArtifactKind::Text),
            _ => None,
        }
    }

    /// 파일 경로에서 종류 결정
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

// ============================================================================
// Artifact
// ============================================================================

/// 수집된 아티팩트
#[derive(Debug, Clone)]
pub struct Artifact {
    /// 절대 경로
    pub path: PathBuf,
    /// 루트 기준 상대 경로 (`source` 메타데이터로 사용)
    pub relative: PathBuf,
    pub kind: ArtifactKind,
    /// 경로에서 유도한 페이즈
    pub phase: String,
    pub size: u64,
}

impl Artifact {
    /// `source` 메타데이터 값 (슬래시 구분)
    pub fn source(&self) -> String {
        self.relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// 상대 경로에서 페이즈 유도
pub fn phase_for(relative: &Path) -> Option<String> {
    let mut components = relative.components();
    let first = components.next()?;
    if components.next().is_some() {
        Some(first.as_os_str().to_string_lossy().into_owned())
    } else {
        relative
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
    }
}

// ============================================================================
// Artifact Collector
// ============================================================================

/// 수집기 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// 아티팩트 수집기
pub struct ArtifactCollector {
    config: CollectorConfig,
}

impl ArtifactCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 수집기 생성
    pub fn with_defaults() -> Self {
        Self::new(CollectorConfig::default())
    }

    /// 디렉토리 재귀 수집
    pub fn collect_directory(&self, root: &Path) -> Result<Vec<Artifact>> {
        if !root.exists() {
            return Err(KnowledgeError::Input(format!(
                "Directory not found: {:?}",
                root
            )));
        }
        if !root.is_dir() {
            return Err(KnowledgeError::Input(format!("Not a directory: {:?}", root)));
        }

        let mut artifacts = Vec::new();

        let walker = WalkBuilder::new(root)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .require_git(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            // 파일만 처리
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            let path = entry.path();
            let Some(kind) = ArtifactKind::from_path(path) else {
                continue;
            };

            let size = match entry.metadata() {
                Ok(m) => m.len(),
                Err(e) => {
                    tracing::warn!("Failed to read metadata for {:?}: {}", path, e);
                    continue;
                }
            };

            if self.config.max_file_size > 0 && size > self.config.max_file_size {
                tracing::debug!("Skipping large file: {:?} ({} bytes)", path, size);
                continue;
            }

            let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
            let Some(phase) = phase_for(&relative) else {
                continue;
            };

            artifacts.push(Artifact {
                path: path.to_path_buf(),
                relative,
                kind,
                phase,
                size,
            });
        }

        tracing::info!("Collected {} artifacts from {:?}", artifacts.len(), root);
        Ok(artifacts)
    }
}

// ============================================================================
// Tests
// ============================================================================
