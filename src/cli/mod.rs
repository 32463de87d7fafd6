//! CLI 모듈
//!
//! phase-knowledge CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::cancel::{cancel_pair, CancelSignal};
use crate::config::{get_data_dir, EmbedderKind, KnowledgeConfig};
use crate::indexer::{IndexReport, Indexer};
use crate::knowledge::{KnowledgeManager, KnowledgeResult, KnowledgeStore, StoreReport};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "phase-knowledge")]
#[command(version, about = "페이즈 단위 지식 저장/검색 엔진", long_about = None)]
pub struct Cli {
    /// SQLite 파일 경로 (PHASE_KNOWLEDGE_DB 덮어쓰기)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// 임베더 종류
    #[arg(long, global = true, value_enum)]
    pub embedder: Option<EmbedderKind>,

    /// 임베딩 차원
    #[arg(long, global = true)]
    pub dimension: Option<usize>,

    /// 청크 크기 (문자 수)
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// 청크 겹침 (문자 수)
    #[arg(long, global = true)]
    pub chunk_overlap: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 페이즈 지식 저장
    Store {
        /// 페이즈 이름
        phase: String,

        /// JSON 페이로드 파일
        #[arg(short, long, conflicts_with = "text", required_unless_present = "text")]
        file: Option<PathBuf>,

        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 텍스트 출처 태그 (--text 전용)
        #[arg(short, long, requires = "text")]
        source: Option<String>,
    },

    /// 페이즈 지식 검색
    Query {
        /// 페이즈 이름
        phase: String,

        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// 여러 페이즈에 걸친 검색
    CrossQuery {
        /// 검색 쿼리
        query: String,

        /// 대상 페이즈 (쉼표 구분)
        #[arg(short, long, value_delimiter = ',', required = true)]
        phases: Vec<String>,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// 페이즈 지식 삭제
    Delete {
        /// 페이즈 이름
        phase: String,
    },

    /// 페이즈별 청크 통계
    Stats,

    /// 아티팩트 디렉토리 전체 재색인
    Index {
        /// 아티팩트 디렉토리
        dir: PathBuf,
    },

    /// 아티팩트 디렉토리 증분 색인
    Update {
        /// 아티팩트 디렉토리
        dir: PathBuf,
    },

    /// 모든 지식 삭제
    Clear {
        /// 확인 없이 삭제
        #[arg(long)]
        yes: bool,
    },

    /// 상태 확인
    Status,
}

impl Cli {
    /// 환경변수 설정 위에 플래그 적용
    pub fn apply_overrides(&self, mut config: KnowledgeConfig) -> KnowledgeConfig {
        if let Some(ref db) = self.db {
            config.db_path = db.clone();
        }
        if let Some(embedder) = self.embedder {
            config.embedder = embedder;
        }
        if let Some(dimension) = self.dimension {
            config.dimension = dimension;
        }
        if let Some(size) = self.chunk_size {
            config.chunk.chunk_size = size;
        }
        if let Some(overlap) = self.chunk_overlap {
            config.chunk.chunk_overlap = overlap;
        }
        config
    }

    fn config(&self) -> Result<KnowledgeConfig> {
        let config = KnowledgeConfig::from_env().context("환경변수 설정 로드 실패")?;
        let config = self.apply_overrides(config);
        config.validate().context("잘못된 설정")?;
        Ok(config)
    }
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
///
/// Ctrl-C를 누르면 진행 중인 작업이 취소됩니다.
pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.config()?;

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            handle.cancel();
        }
    });

    match cli.command {
        Commands::Store {
            phase,
            file,
            text,
            source,
        } => cmd_store(&config, signal, &phase, file, text, source).await,
        Commands::Query {
            phase,
            query,
            limit,
        } => cmd_query(&config, signal, &phase, &query, limit).await,
        Commands::CrossQuery {
            query,
            phases,
            limit,
        } => cmd_cross_query(&config, signal, &query, &phases, limit).await,
        Commands::Delete { phase } => cmd_delete(&config, signal, &phase).await,
        Commands::Stats => cmd_stats(&config, signal).await,
        Commands::Index { dir } => cmd_index(&config, signal, &dir, false).await,
        Commands::Update { dir } => cmd_index(&config, signal, &dir, true).await,
        Commands::Clear { yes } => cmd_clear(&config, signal, yes).await,
        Commands::Status => cmd_status(&config),
    }
}

fn open_manager(config: &KnowledgeConfig, signal: CancelSignal) -> Result<KnowledgeManager> {
    Ok(KnowledgeManager::from_config(config)
        .context("KnowledgeManager 초기화 실패")?
        .with_cancel_signal(signal))
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 저장 명령어 (store)
async fn cmd_store(
    config: &KnowledgeConfig,
    signal: CancelSignal,
    phase: &str,
    file: Option<PathBuf>,
    text: Option<String>,
    source: Option<String>,
) -> Result<()> {
    let manager = open_manager(config, signal)?;

    let report = if let Some(ref path) = file {
        println!("[*] 페이로드 로드 중: {}", path.display());
        let payload = read_payload(path)?;
        manager
            .store_phase_knowledge(phase, &payload)
            .await
            .context("지식 저장 실패")?
    } else if let Some(ref text) = text {
        let source = source.as_deref().unwrap_or("direct-input");
        manager
            .store_phase_text(phase, text, source)
            .await
            .context("지식 저장 실패")?
    } else {
        bail!("--file 또는 --text 중 하나를 지정해야 합니다");
    };

    print_store_report(&report);
    Ok(())
}

/// 검색 명령어 (query)
async fn cmd_query(
    config: &KnowledgeConfig,
    signal: CancelSignal,
    phase: &str,
    query: &str,
    limit: usize,
) -> Result<()> {
    println!("[*] 검색 중: \"{}\" (phase: {})", query, phase);

    let manager = open_manager(config, signal)?;
    let results = manager
        .retrieve_phase_knowledge(phase, query, limit)
        .await
        .context("검색 실패")?;

    print_results(&results);
    Ok(())
}

/// 교차 페이즈 검색 명령어 (cross-query)
async fn cmd_cross_query(
    config: &KnowledgeConfig,
    signal: CancelSignal,
    query: &str,
    phases: &[String],
    limit: usize,
) -> Result<()> {
    println!("[*] 검색 중: \"{}\" (phases: {})", query, phases.join(", "));

    let manager = open_manager(config, signal)?;
    let results = manager
        .retrieve_cross_phase_knowledge(query, phases, limit)
        .await
        .context("검색 실패")?;

    print_results(&results);
    Ok(())
}

/// 삭제 명령어 (delete)
async fn cmd_delete(config: &KnowledgeConfig, signal: CancelSignal, phase: &str) -> Result<()> {
    let manager = open_manager(config, signal)?;
    let removed = manager
        .delete_phase_knowledge(phase)
        .await
        .context("삭제 실패")?;

    if removed > 0 {
        println!("[OK] 페이즈 '{}' 청크 {} 개 삭제됨", phase, removed);
    } else {
        println!("[!] 페이즈 '{}'에 삭제할 청크가 없습니다", phase);
    }
    Ok(())
}

/// 통계 명령어 (stats)
async fn cmd_stats(config: &KnowledgeConfig, signal: CancelSignal) -> Result<()> {
    let manager = open_manager(config, signal)?;
    let stats = manager
        .get_knowledge_stats()
        .await
        .context("통계 조회 실패")?;

    if stats.total_chunks == 0 {
        println!("[!] 저장된 지식이 없습니다.");
        return Ok(());
    }

    println!("[OK] 전체 청크: {} 개\n", stats.total_chunks);
    for (phase, count) in &stats.phases {
        println!("  {:<24} {:>6}", phase, count);
    }
    Ok(())
}

/// 색인 명령어 (index / update)
async fn cmd_index(
    config: &KnowledgeConfig,
    signal: CancelSignal,
    dir: &Path,
    incremental: bool,
) -> Result<()> {
    let indexer = Indexer::from_config(config)
        .context("Indexer 초기화 실패")?
        .with_cancel_signal(signal);

    let report = if incremental {
        println!("[*] 증분 색인 중: {}", dir.display());
        indexer.update_index(dir).await.context("증분 색인 실패")?
    } else {
        println!("[*] 전체 재색인 중: {}", dir.display());
        indexer
            .index_knowledge_base(dir)
            .await
            .context("재색인 실패")?
    };

    print_index_report(&report);
    Ok(())
}

/// 전체 삭제 명령어 (clear)
async fn cmd_clear(config: &KnowledgeConfig, signal: CancelSignal, yes: bool) -> Result<()> {
    if !yes {
        bail!("모든 지식이 삭제됩니다. 계속하려면 --yes 를 지정하세요");
    }

    let manager = open_manager(config, signal)?;
    let removed = manager.clear().await.context("전체 삭제 실패")?;
    println!("[OK] 청크 {} 개 삭제됨", removed);
    Ok(())
}

/// 상태 명령어 (status)
fn cmd_status(config: &KnowledgeConfig) -> Result<()> {
    println!("phase-knowledge v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", get_data_dir().display());
    println!("[*] 데이터베이스: {}", config.db_path.display());
    println!(
        "[*] 임베더: {} (dimension: {})",
        config.embedder.as_str(),
        config.dimension
    );
    println!(
        "[*] 청킹: size {}, overlap {}",
        config.chunk.chunk_size, config.chunk.chunk_overlap
    );

    if config.embedder == EmbedderKind::Remote {
        println!("[*] 임베딩 API: {} ({})", config.remote.endpoint, config.remote.model);
        if config.remote.api_key.is_some() {
            println!("[OK] API 키: 설정됨");
        } else {
            println!("[!] API 키: 미설정 (인증이 필요 없는 엔드포인트만 사용 가능)");
        }
    }

    match KnowledgeStore::open_with_timeout(&config.db_path, config.store_timeout()) {
        Ok(store) => match store.stats() {
            Ok(stats) => {
                println!("[OK] 저장된 청크: {} 개", stats.chunk_count);
                println!(
                    "     총 콘텐츠: {}",
                    format_bytes(stats.total_content_bytes)
                );
            }
            Err(e) => {
                println!("[!] 통계 조회 실패: {}", e);
            }
        },
        Err(e) => {
            println!("[!] KnowledgeStore 열기 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn read_payload(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("파일 읽기 실패: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("JSON 파싱 실패: {}", path.display()))
}

fn print_store_report(report: &StoreReport) {
    if report.is_complete() {
        println!(
            "[OK] 페이즈 '{}': 청크 {} 개 저장됨",
            report.phase, report.stored
        );
    } else {
        println!(
            "[!] 페이즈 '{}': {}/{} 청크 저장됨 ({} 개 임베딩 실패)",
            report.phase, report.stored, report.produced, report.skipped
        );
    }
}

fn print_index_report(report: &IndexReport) {
    println!(
        "[OK] 아티팩트 {} 개 처리 (실패 {})",
        report.artifacts, report.failed_artifacts
    );
    println!(
        "     청크: 생성 {}, 저장 {}, 임베딩 실패 {}, 중복 {}",
        report.produced, report.stored, report.skipped, report.duplicates
    );
}

fn print_results(results: &[KnowledgeResult]) {
    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return;
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());

    for (i, result) in results.iter().enumerate() {
        let phase = metadata_str(result, "phase").unwrap_or("-");
        let kind = metadata_str(result, "type").unwrap_or("-");

        println!(
            "{}. [{}] [{}] [점수: {:.4}]",
            i + 1,
            phase,
            kind,
            result.score
        );

        if let Some(table) = metadata_str(result, "table") {
            println!("   테이블: {}", table);
        }
        if let Some(source) = metadata_str(result, "source") {
            println!("   출처: {}", source);
        }

        println!("   내용: {}", truncate_text(&result.content, 200));
        println!();
    }
}

fn metadata_str<'a>(result: &'a KnowledgeResult, key: &str) -> Option<&'a str> {
    result.metadata.get(key).and_then(Value::as_str)
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
