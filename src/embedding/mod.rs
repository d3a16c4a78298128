//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 수집 파이프라인과 검색 파이프라인이 공유하는 임베딩 프로바이더입니다.
//! 두 파이프라인은 반드시 같은 모델과 같은 instruction 규칙을 사용해야 합니다.
//!
//! - 문서 청크: 원문 그대로 임베딩
//! - 질문: 검색 instruction을 앞에 붙여서 임베딩 (비대칭 임베딩)
//!
//! ## 사용법
//! ```rust,ignore
//! let handle = EmbeddingHandle::from_config(&config.embedding);
//! let doc_vec = handle.embed_document("STL is allowed").await?;
//! let query_vec = handle.embed_query("can I use STL?").await?;
//! ```

mod hashing;
mod http;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::EmbeddingError;

pub use hashing::HashingEmbedding;
pub use http::HttpEmbedding;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 고정 길이 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// EmbeddingHandle
// ============================================================================

/// 프로바이더 생성 함수 (비용이 큰 작업 - 프로세스당 최대 1회 실행)
pub type ProviderFactory =
    Arc<dyn Fn() -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> + Send + Sync>;

/// 지연 초기화되는 공유 임베딩 프로바이더 핸들
///
/// 상태: 미초기화 → (첫 사용 시) 로드됨 → 프로세스 종료까지 유지.
/// 여러 요청이 동시에 첫 사용을 시도해도 생성은 한 번만 완료되고
/// 모든 호출자가 같은 인스턴스를 받습니다. 복제해도 같은 셀을 공유합니다.
#[derive(Clone)]
pub struct EmbeddingHandle {
    cell: Arc<OnceCell<Arc<dyn EmbeddingProvider>>>,
    factory: ProviderFactory,
    dimension: usize,
    query_instruction: Arc<str>,
}

impl std::fmt::Debug for EmbeddingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingHandle")
            .field("dimension", &self.dimension)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl EmbeddingHandle {
    /// 팩토리로 핸들 생성 (아직 프로바이더를 만들지 않음)
    ///
    /// # Arguments
    /// * `dimension` - 스키마가 선언한 차원 D
    /// * `query_instruction` - 질문 앞에 붙일 검색 instruction
    /// * `factory` - 프로바이더 생성 함수
    pub fn new<F>(dimension: usize, query_instruction: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> + Send + Sync + 'static,
    {
        Self {
            cell: Arc::new(OnceCell::new()),
            factory: Arc::new(factory),
            dimension,
            query_instruction: Arc::from(query_instruction.into()),
        }
    }

    /// 이미 생성된 프로바이더로 핸들 생성 (로드된 상태로 시작)
    pub fn from_provider(
        provider: Arc<dyn EmbeddingProvider>,
        query_instruction: impl Into<String>,
    ) -> Self {
        let dimension = provider.dimension();
        let factory_provider = Arc::clone(&provider);
        Self {
            cell: Arc::new(OnceCell::new_with(Some(provider))),
            factory: Arc::new(move || Ok(Arc::clone(&factory_provider))),
            dimension,
            query_instruction: Arc::from(query_instruction.into()),
        }
    }

    /// 설정에서 핸들 생성
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let config = config.clone();
        let dimension = config.dimension;
        let instruction = config.query_instruction.clone();

        Self::new(dimension, instruction, move || create_provider(&config))
    }

    /// 프로바이더 반환 (첫 호출 시 초기화)
    pub async fn get_provider(&self) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
        let provider = self
            .cell
            .get_or_try_init(|| async {
                let provider = (self.factory)()?;

                if provider.dimension() != self.dimension {
                    return Err(EmbeddingError::Unavailable(format!(
                        "provider {} produces {}-dimensional vectors, schema declares {}",
                        provider.name(),
                        provider.dimension(),
                        self.dimension
                    )));
                }

                tracing::info!(
                    "Embedding provider loaded: {} (dimension: {})",
                    provider.name(),
                    provider.dimension()
                );
                Ok(provider)
            })
            .await?;

        Ok(Arc::clone(provider))
    }

    /// 프로바이더 로드 여부
    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// 선언된 차원
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 검색 instruction
    pub fn query_instruction(&self) -> &str {
        &self.query_instruction
    }

    /// 질문 임베딩용 텍스트 (instruction + 질문)
    pub fn query_text(&self, question: &str) -> String {
        format!("{}{}", self.query_instruction, question)
    }

    /// 문서 청크 임베딩 (instruction 없음)
    pub async fn embed_document(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.get_provider().await?.embed(text).await
    }

    /// 문서 청크 배치 임베딩
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.get_provider().await?.embed_batch(texts).await
    }

    /// 질문 임베딩 (instruction 접두)
    pub async fn embed_query(&self, question: &str) -> Result<Vec<f32>, EmbeddingError> {
        let text = self.query_text(question);
        self.get_provider().await?.embed(&text).await
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 임베딩 프로바이더 생성
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    let provider: Arc<dyn EmbeddingProvider> = match config.backend {
        EmbeddingBackend::Http => Arc::new(HttpEmbedding::new(
            config.api_url.clone(),
            config.model.clone(),
            config.api_key.clone(),
            config.dimension,
        )?),
        EmbeddingBackend::Hashing => Arc::new(HashingEmbedding::new(config.dimension)?),
    };
    Ok(provider)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handle(counter: Arc<AtomicUsize>) -> EmbeddingHandle {
        EmbeddingHandle::new(64, "query: ", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            // 생성 비용 흉내
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(Arc::new(HashingEmbedding::new(64)?) as Arc<dyn EmbeddingProvider>)
        })
    }

    #[tokio::test]
    async fn test_lazy_initialization() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = counting_handle(Arc::clone(&counter));

        assert!(!handle.is_loaded());
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        handle.embed_document("hello").await.unwrap();
        handle.embed_document("world").await.unwrap();

        assert!(handle.is_loaded());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_initializes_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = counting_handle(Arc::clone(&counter));

        let h1 = handle.clone();
        let h2 = handle.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { h1.get_provider().await }),
            tokio::spawn(async move { h2.get_provider().await }),
        );

        let a = a.unwrap().unwrap();
        let b = b.unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let va = a.embed("같은 입력").await.unwrap();
        let vb = b.embed("같은 입력").await.unwrap();
        assert_eq!(va, vb);
    }

    #[tokio::test]
    async fn test_query_uses_instruction_prefix() {
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedding::new(64).unwrap());
        let handle = EmbeddingHandle::from_provider(Arc::clone(&provider), "query: ");

        assert_eq!(handle.query_text("stl?"), "query: stl?");

        let query = handle.embed_query("stl?").await.unwrap();
        let prefixed = provider.embed("query: stl?").await.unwrap();
        let bare = handle.embed_document("stl?").await.unwrap();
        assert_eq!(query, prefixed);
        assert_ne!(query, bare);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_unavailable() {
        let handle = EmbeddingHandle::new(1024, "", || {
            Ok(Arc::new(HashingEmbedding::new(64)?) as Arc<dyn EmbeddingProvider>)
        });
        let err = handle.get_provider().await.err().unwrap();
        assert!(matches!(err, EmbeddingError::Unavailable(_)));
        assert!(!handle.is_loaded());
    }

    #[tokio::test]
    async fn test_construction_failure_surfaces() {
        let handle = EmbeddingHandle::new(64, "", || {
            Err(EmbeddingError::Unavailable("model missing".to_string()))
        });
        let err = handle.embed_query("q").await.err().unwrap();
        assert!(err.to_string().contains("model missing"));
    }
}
