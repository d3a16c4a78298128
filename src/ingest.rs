//! 수집 파이프라인 - 페이지 → 청크 → 임베딩 → 저장
//!
//! 한 문서의 모든 청크를 먼저 임베딩한 뒤 저장소에 한 번에 삽입합니다.
//! 중간 어느 단계에서 실패해도 그 문서의 청크는 하나도 보이지 않습니다.

use std::sync::Arc;

use serde::Serialize;

use crate::embedding::EmbeddingHandle;
use crate::error::IngestionError;
use crate::knowledge::{
    content_digest, DocumentSegmenter, IngestLedger, KnowledgeStore, NewChunk, PageText,
};

/// 한 번에 임베딩 서비스로 보내는 청크 수
const EMBED_BATCH_SIZE: usize = 32;

/// 수집 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub inserted_count: usize,
    pub source_name: String,
    /// 같은 내용이 이미 수집된 적이 있음 (청크는 그대로 추가됨)
    pub duplicate_of_previous: bool,
}

/// 수집 파이프라인
pub struct IngestionPipeline {
    segmenter: DocumentSegmenter,
    embeddings: EmbeddingHandle,
    store: Arc<dyn KnowledgeStore>,
    ledger: Option<Arc<IngestLedger>>,
}

impl IngestionPipeline {
    pub fn new(embeddings: EmbeddingHandle, store: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            segmenter: DocumentSegmenter::default(),
            embeddings,
            store,
            ledger: None,
        }
    }

    /// 수집 기록 연결
    pub fn with_ledger(mut self, ledger: Arc<IngestLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// 분할 설정 교체
    pub fn with_segmenter(mut self, segmenter: DocumentSegmenter) -> Self {
        self.segmenter = segmenter;
        self
    }

    /// 문서 하나 수집
    ///
    /// # Arguments
    /// * `pages` - 추출 순서대로의 (0부터 시작하는 페이지 인덱스, 텍스트)
    /// * `source_name` - 문서 표시 이름 (검색 필터의 기준)
    pub async fn ingest_document(
        &self,
        pages: &[PageText],
        source_name: &str,
    ) -> Result<IngestReport, IngestionError> {
        let source_name = source_name.trim();
        if source_name.is_empty() {
            return Err(IngestionError::Extraction("source name is empty".to_string()));
        }

        let digest = content_digest(pages);
        let duplicate_of_previous = self.check_duplicate(&digest, source_name);

        let candidates = self.segmenter.segment(pages);
        if candidates.is_empty() {
            tracing::info!("No extractable text in '{}', nothing to ingest", source_name);
            return Ok(IngestReport {
                inserted_count: 0,
                source_name: source_name.to_string(),
                duplicate_of_previous,
            });
        }

        tracing::info!(
            "Ingesting '{}': {} pages → {} chunks",
            source_name,
            pages.len(),
            candidates.len()
        );

        // 1. 전체 임베딩 (실패 시 저장소는 건드리지 않음)
        let mut embeddings = Vec::with_capacity(candidates.len());
        for (batch_index, batch) in candidates.chunks(EMBED_BATCH_SIZE).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self
                .embeddings
                .embed_documents(&texts)
                .await
                .map_err(|source| IngestionError::Embedding {
                    index: batch_index * EMBED_BATCH_SIZE,
                    source,
                })?;
            embeddings.extend(vectors);
        }

        let chunks: Vec<NewChunk> = candidates
            .into_iter()
            .zip(embeddings)
            .map(|(candidate, embedding)| NewChunk {
                content: candidate.content,
                page_number: candidate.page_number,
                embedding,
            })
            .collect();

        // 2. 한 번에 삽입
        let inserted_count = self.store.insert(source_name, chunks).await?;

        // 3. 기록 (실패해도 커밋된 삽입은 유지)
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.record(source_name, &digest, inserted_count) {
                tracing::warn!("Failed to record ingestion of '{}': {}", source_name, e);
            }
        }

        tracing::info!("Ingested '{}': {} chunks stored", source_name, inserted_count);

        Ok(IngestReport {
            inserted_count,
            source_name: source_name.to_string(),
            duplicate_of_previous,
        })
    }

    fn check_duplicate(&self, digest: &str, source_name: &str) -> bool {
        let Some(ledger) = &self.ledger else {
            return false;
        };

        match ledger.find_by_digest(digest) {
            Ok(previous) if !previous.is_empty() => {
                let names: Vec<&str> = previous.iter().map(|r| r.source.as_str()).collect();
                tracing::warn!(
                    "'{}' has the same content as a previous ingestion ({}); chunks will be duplicated",
                    source_name,
                    names.join(", ")
                );
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!("Ingestion ledger lookup failed: {}", e);
                false
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
