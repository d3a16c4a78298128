//! 검색 오케스트레이터 - 질문 → 관련 청크
//!
//! 질문 앞에 검색 instruction을 붙여 임베딩하고 저장소에서 최근접 청크를 찾습니다.
//! 실패는 재시도하지 않고 그대로 호출자에게 돌려줍니다.

use std::sync::Arc;

use crate::config::DEFAULT_TOP_K;
use crate::embedding::EmbeddingHandle;
use crate::error::RetrievalError;
use crate::knowledge::{KnowledgeStore, ScoredChunk};

/// 검색기
#[derive(Clone)]
pub struct Retriever {
    embeddings: EmbeddingHandle,
    store: Arc<dyn KnowledgeStore>,
    top_k: usize,
}

impl Retriever {
    pub fn new(embeddings: EmbeddingHandle, store: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            embeddings,
            store,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// 검색 결과 개수 변경 (0이면 1로 취급)
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// 관련 청크 검색 (거리 오름차순)
    ///
    /// `source_filter`가 있으면 해당 문서의 청크만 대상입니다.
    /// 일치하는 청크가 없으면 빈 결과를 반환합니다.
    pub async fn retrieve(
        &self,
        question: &str,
        source_filter: Option<&str>,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let query = self.embeddings.embed_query(question).await?;

        let results = self.store.search(&query, self.top_k, source_filter).await?;

        tracing::info!(
            "Retrieved {} chunks (scope: {})",
            results.len(),
            source_filter.unwrap_or("all documents")
        );
        for hit in &results {
            tracing::debug!(
                "  {} p.{} distance={:.4}",
                hit.chunk.source,
                hit.chunk.page_number,
                hit.distance
            );
        }

        Ok(results)
    }
}

// ============================================================================
// Tests
// ============================================================================
