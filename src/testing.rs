//! 테스트 공용 목(mock) 구현

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::embedding::{EmbeddingHandle, EmbeddingProvider, HashingEmbedding};
use crate::error::{EmbeddingError, GenerationError, StoreError};
use crate::generation::{FragmentStream, GenerationClient, GenerationRequest};
use crate::knowledge::{KnowledgeStore, NewChunk, ScoredChunk};

pub const QUERY_PREFIX: &str = "query: ";

/// 해싱 임베딩 핸들 (로드된 상태)
pub fn hashing_handle(dimension: usize) -> EmbeddingHandle {
    let provider = HashingEmbedding::new(dimension).unwrap_or_else(|e| panic!("{e}"));
    EmbeddingHandle::from_provider(Arc::new(provider), QUERY_PREFIX)
}

// ============================================================================
// Embedding
// ============================================================================

/// 받은 텍스트를 기록하는 프로바이더
pub struct RecordingEmbedding {
    inner: HashingEmbedding,
    pub seen: Mutex<Vec<String>>,
}

impl RecordingEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: HashingEmbedding::new(dimension).unwrap_or_else(|e| panic!("{e}")),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EmbeddingProvider for RecordingEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(text.to_string());
        }
        self.inner.embed(text).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// ============================================================================
// Store
// ============================================================================

/// 모든 연산이 연결 실패로 끝나는 저장소
pub struct UnreachableStore {
    dimension: usize,
    search_calls: AtomicUsize,
}

impl UnreachableStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            search_calls: AtomicUsize::new(0),
        }
    }

    /// `search` 호출 횟수
    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeStore for UnreachableStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn insert(&self, _source: &str, _chunks: Vec<NewChunk>) -> Result<usize, StoreError> {
        Err(StoreError::Connection("connection refused".to_string()))
    }

    async fn search(
        &self,
        _query: &[f32],
        _top_k: usize,
        _source_filter: Option<&str>,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Connection("connection refused".to_string()))
    }

    async fn list_distinct_sources(&self) -> Result<BTreeSet<String>, StoreError> {
        Err(StoreError::Connection("connection refused".to_string()))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Err(StoreError::Connection("connection refused".to_string()))
    }

    async fn delete_source(&self, _source: &str) -> Result<usize, StoreError> {
        Err(StoreError::Connection("connection refused".to_string()))
    }
}

// ============================================================================
// Generation
// ============================================================================

/// 정해진 조각을 돌려주는 생성 클라이언트
#[derive(Default)]
pub struct ScriptedGenerator {
    fragments: Vec<String>,
    /// 호출 자체가 실패
    fail_on_call: bool,
    /// 조각을 모두 보낸 뒤 스트림 에러
    fail_after_fragments: bool,
    last_request: Mutex<Option<GenerationRequest>>,
    /// 스트림이 drop되면 true
    dropped: Arc<AtomicBool>,
    /// 소비자가 꺼내 간 항목 수
    pulled: Arc<AtomicUsize>,
}

impl ScriptedGenerator {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_on_call: true,
            ..Default::default()
        }
    }

    /// 조각 뒤에 스트림 에러, 그 뒤에도 조각 하나가 더 남아 있음
    pub fn interrupted(fragments: &[&str]) -> Self {
        Self {
            fail_after_fragments: true,
            ..Self::new(fragments)
        }
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }

    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    pub fn stream_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    fn remember(&self, request: &GenerationRequest) {
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request.clone());
        }
    }
}

/// drop 시 플래그를 세우는 가드
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerator {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.remember(request);
        if self.fail_on_call {
            return Err(GenerationError::Api {
                status: 503,
                message: "upstream unavailable".to_string(),
            });
        }
        Ok(self.fragments.concat())
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, GenerationError> {
        self.remember(request);
        if self.fail_on_call {
            return Err(GenerationError::Api {
                status: 503,
                message: "upstream unavailable".to_string(),
            });
        }

        let mut items: Vec<Result<String, GenerationError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if self.fail_after_fragments {
            items.push(Err(GenerationError::Stream("connection reset".to_string())));
            items.push(Ok("after the error".to_string()));
        }

        let guard = DropFlag(Arc::clone(&self.dropped));
        let pulled = Arc::clone(&self.pulled);
        let fragments = stream::iter(items).map(move |item| {
            let _alive = &guard;
            pulled.fetch_add(1, Ordering::SeqCst);
            item
        });
        Ok(fragments.boxed())
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
