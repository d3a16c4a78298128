//! CLI 모듈
//!
//! palank-docqa CLI 명령어 정의 및 구현

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;

use crate::config::Config;
use crate::engine::DocQaEngine;
use crate::knowledge::ScoredChunk;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "palank-docqa")]
#[command(version, about = "문서 기반 질의응답 RAG 엔진", long_about = None)]
pub struct Cli {
    /// 데이터 디렉토리 (기본: DOCQA_HOME 또는 ~/.palank-docqa)
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// PDF 또는 텍스트 파일을 문서 하나로 수집
    Ingest {
        /// 수집할 파일 경로
        path: PathBuf,

        /// 문서 이름 (기본: 파일 이름)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// 문서에 질문
    Ask {
        /// 질문
        question: String,

        /// 이 문서에서만 검색
        #[arg(short, long)]
        source: Option<String>,

        /// 참고할 청크 수
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// 스트리밍 없이 완성 답변을 한 번에 출력
        #[arg(long)]
        no_stream: bool,
    },

    /// 저장된 문서 목록
    Sources,

    /// 문서 삭제
    Forget {
        /// 삭제할 문서 이름
        source: String,
    },

    /// 수집 기록
    History {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 벡터 인덱스 생성 (청크가 충분히 쌓인 뒤)
    Index,

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env().context("설정 로드 실패")?;
    if let Some(home) = cli.home {
        config.relocate(home);
    }

    match cli.command {
        Commands::Ingest { path, name } => cmd_ingest(&config, &path, name.as_deref()).await,
        Commands::Ask {
            question,
            source,
            top_k,
            no_stream,
        } => {
            if let Some(top_k) = top_k {
                config.top_k = top_k;
            }
            cmd_ask(&config, &question, source.as_deref(), no_stream).await
        }
        Commands::Sources => cmd_sources(&config).await,
        Commands::Forget { source } => cmd_forget(&config, &source).await,
        Commands::History { limit } => cmd_history(&config, limit).await,
        Commands::Index => cmd_index(&config).await,
        Commands::Status => cmd_status(&config).await,
    }
}

async fn open_engine(config: &Config) -> Result<DocQaEngine> {
    DocQaEngine::open(config)
        .await
        .context("DocQaEngine 초기화 실패")
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 수집 명령어 (ingest)
async fn cmd_ingest(config: &Config, path: &Path, name: Option<&str>) -> Result<()> {
    let engine = open_engine(config).await?;
    engine
        .warm_up()
        .await
        .context("임베딩 프로바이더 로드 실패")?;

    println!("[*] 수집 중: {}", path.display());

    let report = engine
        .ingest_file(path, name)
        .await
        .context("문서 수집 실패")?;

    if report.inserted_count == 0 {
        println!("[!] 추출된 텍스트가 없습니다: {}", report.source_name);
        return Ok(());
    }

    println!(
        "[OK] '{}' 수집 완료 ({} 청크)",
        report.source_name, report.inserted_count
    );
    if report.duplicate_of_previous {
        println!("[!] 같은 내용이 이미 수집되어 있습니다. 청크가 중복 저장되었습니다.");
        println!("    정리: palank-docqa forget <문서 이름>");
    }

    Ok(())
}

/// 질문 명령어 (ask)
///
/// 답변 조각을 도착하는 대로 출력하고, 끝나면 근거 청크를 표시합니다.
async fn cmd_ask(
    config: &Config,
    question: &str,
    source: Option<&str>,
    no_stream: bool,
) -> Result<()> {
    config
        .require_llm_api_key()
        .context("언어 모델 API 키가 설정되지 않았습니다 (export DEEPSEEK_API_KEY=your-key)")?;

    let engine = open_engine(config).await?;
    engine
        .warm_up()
        .await
        .context("임베딩 프로바이더 로드 실패")?;

    if no_stream {
        let (text, sources) = engine
            .ask_complete(question, source)
            .await
            .context("답변 생성 실패")?;
        println!("{}", text);
        print_sources(&sources);
        return Ok(());
    }

    let answer = engine.ask(question, source).await;
    let failed = answer.is_failed();
    let sources = answer.sources().to_vec();

    let mut stdout = std::io::stdout();
    let mut fragments = answer.into_text_stream();
    while let Some(fragment) = fragments.next().await {
        write!(stdout, "{}", fragment)?;
        stdout.flush()?;
    }
    println!();

    if failed {
        anyhow::bail!("답변 생성 실패");
    }
    print_sources(&sources);

    Ok(())
}

fn print_sources(sources: &[ScoredChunk]) {
    if sources.is_empty() {
        return;
    }

    println!();
    println!("[*] 참고 자료:");
    for (i, hit) in sources.iter().enumerate() {
        println!(
            "  {}. {} (p.{}) [거리: {:.4}]",
            i + 1,
            hit.chunk.source,
            hit.chunk.page_number,
            hit.distance
        );
        println!("     {}", truncate_text(&hit.chunk.content, 80));
    }
}

/// 문서 목록 명령어 (sources)
async fn cmd_sources(config: &Config) -> Result<()> {
    let engine = open_engine(config).await?;
    let sources = engine
        .list_known_sources()
        .await
        .context("문서 목록 조회 실패")?;

    if sources.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 문서 ({} 건):\n", sources.len());
    for source in sources {
        println!("  {}", source);
    }

    Ok(())
}

/// 삭제 명령어 (forget)
async fn cmd_forget(config: &Config, source: &str) -> Result<()> {
    let engine = open_engine(config).await?;
    let report = engine.forget(source).await.context("문서 삭제 실패")?;

    if report.chunks_removed == 0 {
        println!("[!] '{}' 문서를 찾을 수 없습니다", source);
    } else {
        println!(
            "[OK] '{}' 삭제됨 ({} 청크, 기록 {} 건)",
            report.source_name, report.chunks_removed, report.ledger_rows_removed
        );
    }

    Ok(())
}

/// 수집 기록 명령어 (history)
async fn cmd_history(config: &Config, limit: usize) -> Result<()> {
    let engine = open_engine(config).await?;
    let records = engine.history(limit).context("수집 기록 조회 실패")?;

    if records.is_empty() {
        println!("[!] 수집 기록이 없습니다.");
        return Ok(());
    }

    println!("[OK] 수집 기록 ({} 건):\n", records.len());
    for record in records {
        println!(
            "  #{:<4} {} | {} 청크 | {}",
            record.id,
            record.ingested_at.format("%Y-%m-%d %H:%M"),
            record.chunk_count,
            record.source
        );
        println!("        sha256: {}", truncate_text(&record.content_sha256, 16));
    }

    Ok(())
}

/// 인덱스 생성 명령어 (index)
async fn cmd_index(config: &Config) -> Result<()> {
    let engine = open_engine(config).await?;

    println!("[*] 벡터 인덱스 생성 중...");
    engine.create_index().await.context("인덱스 생성 실패")?;
    println!("[OK] 인덱스 생성 완료");

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: &Config) -> Result<()> {
    println!("palank-docqa v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!(
        "[*] 임베딩: {} ({}차원, {:?})",
        config.embedding.model, config.embedding.dimension, config.embedding.backend
    );

    if config.generation.api_key.is_some() {
        println!(
            "[OK] 언어 모델: {} @ {}",
            config.generation.model, config.generation.base_url
        );
    } else {
        println!("[!] 언어 모델 API 키: 미설정");
        println!("    설정: export DEEPSEEK_API_KEY=your-key");
    }

    match DocQaEngine::open(config).await {
        Ok(engine) => match engine.stats().await {
            Ok(stats) => {
                println!("[OK] 저장소: {}", stats.store_uri);
                println!(
                    "     문서 {} 건, 청크 {} 개",
                    stats.source_count, stats.chunk_count
                );
                println!("     수집 기록: {}", stats.ledger_path);
            }
            Err(e) => {
                println!("[!] 통계 조회 실패: {}", e);
            }
        },
        Err(e) => {
            println!("[!] 저장소 열기 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

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

// ============================================================================
// Tests
// ============================================================================
