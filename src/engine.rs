//! DocQA 엔진 - 수집/검색/답변 파이프라인 조립
//!
//! 하나의 임베딩 핸들과 하나의 저장소 연결을 두 파이프라인에 주입합니다.
//! 호출자용 연산: `ingest_document`, `list_known_sources`, `ask`

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::answer::{Answer, AnswerPipeline};
use crate::config::Config;
use crate::embedding::EmbeddingHandle;
use crate::error::{AnswerError, ConfigError, EngineError, IngestionError, StoreError};
use crate::extractor::extract_document;
use crate::generation::{ChatCompletionClient, GenerationClient};
use crate::ingest::{IngestReport, IngestionPipeline};
use crate::knowledge::{IngestLedger, IngestRecord, KnowledgeStore, LanceKnowledgeStore, PageText};
use crate::retrieval::Retriever;

// ============================================================================
// Types
// ============================================================================

/// 엔진 상태
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub store_uri: String,
    pub ledger_path: String,
    pub dimension: usize,
    pub chunk_count: usize,
    pub source_count: usize,
    pub embedding_loaded: bool,
    pub generation_model: Option<String>,
}

/// 문서 삭제 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForgetReport {
    pub source_name: String,
    pub chunks_removed: usize,
    pub ledger_rows_removed: usize,
}

// ============================================================================
// DocQaEngine
// ============================================================================

/// 문서 질의응답 엔진
pub struct DocQaEngine {
    store: Arc<LanceKnowledgeStore>,
    ledger: Arc<IngestLedger>,
    embeddings: EmbeddingHandle,
    ingestion: IngestionPipeline,
    retriever: Retriever,
    generator: Option<Arc<dyn GenerationClient>>,
}

impl DocQaEngine {
    /// 설정으로 엔진 열기
    ///
    /// 언어 모델 API 키가 없으면 수집/조회만 가능하고 `ask`는 실패 답변을 돌려줍니다.
    pub async fn open(config: &Config) -> Result<Self, EngineError> {
        if !config.data_dir.exists() {
            std::fs::create_dir_all(&config.data_dir).map_err(|e| {
                StoreError::Connection(format!("{}: {}", config.data_dir.display(), e))
            })?;
        }

        let store = LanceKnowledgeStore::open(&config.store_uri, config.embedding.dimension).await?;
        let ledger = IngestLedger::open(&config.data_dir.join("ledger.db"))?;
        let embeddings = EmbeddingHandle::from_config(&config.embedding);

        let generator: Option<Arc<dyn GenerationClient>> = match &config.generation.api_key {
            Some(key) => Some(Arc::new(ChatCompletionClient::new(
                &config.generation.base_url,
                key.clone(),
                config.generation.model.clone(),
            )?)),
            None => None,
        };

        Ok(Self::from_parts(Arc::new(store), Arc::new(ledger), embeddings, generator)?
            .with_top_k(config.top_k))
    }

    /// 구성 요소로 엔진 조립
    ///
    /// 임베딩 차원과 저장소 스키마 차원이 다르면 시작하지 않습니다.
    pub fn from_parts(
        store: Arc<LanceKnowledgeStore>,
        ledger: Arc<IngestLedger>,
        embeddings: EmbeddingHandle,
        generator: Option<Arc<dyn GenerationClient>>,
    ) -> Result<Self, StoreError> {
        if embeddings.dimension() != store.dimension() {
            return Err(StoreError::Schema {
                expected: store.dimension(),
                actual: embeddings.dimension(),
            });
        }

        let ingestion = IngestionPipeline::new(embeddings.clone(), store.clone())
            .with_ledger(ledger.clone());
        let retriever = Retriever::new(embeddings.clone(), store.clone());

        Ok(Self {
            store,
            ledger,
            embeddings,
            ingestion,
            retriever,
            generator,
        })
    }

    /// 검색 결과 개수 변경
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.retriever = self.retriever.with_top_k(top_k);
        self
    }

    /// 임베딩 프로바이더 미리 로드 (실패 시 파이프라인 시작 불가)
    pub async fn warm_up(&self) -> Result<(), EngineError> {
        self.embeddings.get_provider().await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Caller-facing operations
    // ------------------------------------------------------------------------

    /// 문서 하나 수집
    pub async fn ingest_document(
        &self,
        pages: &[PageText],
        source_name: &str,
    ) -> Result<IngestReport, IngestionError> {
        self.ingestion.ingest_document(pages, source_name).await
    }

    /// 파일을 추출해서 수집 (`source_name`이 없으면 파일 이름)
    pub async fn ingest_file(
        &self,
        path: &Path,
        source_name: Option<&str>,
    ) -> Result<IngestReport, IngestionError> {
        let document = extract_document(path).await?;
        let name = source_name.unwrap_or(&document.source_name);
        self.ingestion.ingest_document(&document.pages, name).await
    }

    /// 저장된 문서 목록
    pub async fn list_known_sources(&self) -> Result<BTreeSet<String>, StoreError> {
        self.store.list_distinct_sources().await
    }

    /// 질문에 대한 스트리밍 답변
    pub async fn ask(&self, question: &str, source_filter: Option<&str>) -> Answer {
        match self.answer_pipeline() {
            Ok(pipeline) => pipeline.answer(question, source_filter).await,
            Err(e) => Answer::Failed(e),
        }
    }

    /// 비스트리밍 답변
    pub async fn ask_complete(
        &self,
        question: &str,
        source_filter: Option<&str>,
    ) -> Result<(String, Vec<crate::knowledge::ScoredChunk>), AnswerError> {
        self.answer_pipeline()?
            .answer_complete(question, source_filter)
            .await
    }

    fn answer_pipeline(&self) -> Result<AnswerPipeline, AnswerError> {
        let generator = self.generator.clone().ok_or_else(|| {
            AnswerError::Config(ConfigError::Missing(
                "DEEPSEEK_API_KEY or LLM_API_KEY".to_string(),
            ))
        })?;
        Ok(AnswerPipeline::new(self.retriever.clone(), generator))
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// 문서 삭제 (저장소 청크 + 수집 기록)
    pub async fn forget(&self, source_name: &str) -> Result<ForgetReport, StoreError> {
        let chunks_removed = self.store.delete_source(source_name).await?;
        let ledger_rows_removed = self.ledger.forget_source(source_name)?;

        tracing::info!(
            "Forgot '{}': {} chunks, {} ledger rows",
            source_name,
            chunks_removed,
            ledger_rows_removed
        );

        Ok(ForgetReport {
            source_name: source_name.to_string(),
            chunks_removed,
            ledger_rows_removed,
        })
    }

    /// 최근 수집 기록
    pub fn history(&self, limit: usize) -> Result<Vec<IngestRecord>, StoreError> {
        self.ledger.list(limit)
    }

    /// 벡터 인덱스 생성
    pub async fn create_index(&self) -> Result<(), StoreError> {
        self.store.create_index().await
    }

    /// 엔진 상태
    pub async fn stats(&self) -> Result<EngineStats, StoreError> {
        let chunk_count = self.store.count().await?;
        let source_count = self.store.list_distinct_sources().await?.len();

        Ok(EngineStats {
            store_uri: self.store.uri().to_string(),
            ledger_path: self.ledger.db_path().display().to_string(),
            dimension: self.store.dimension(),
            chunk_count,
            source_count,
            embedding_loaded: self.embeddings.is_loaded(),
            generation_model: self.generator.as_ref().map(|g| g.model().to_string()),
        })
    }

    /// 임베딩 핸들
    pub fn embeddings(&self) -> &EmbeddingHandle {
        &self.embeddings
    }
}

// ============================================================================
// Tests
// ============================================================================
