//! 에러 타입
//!
//! 파이프라인별 에러 분류입니다.
//! - 임베딩: `EmbeddingError`
//! - 저장소: `StoreError` (연결 실패 / 스키마(차원) 불일치 / 쿼리 실패)
//! - 수집: `IngestionError` (문서 단위 전체 롤백)
//! - 검색/생성/답변: `RetrievalError`, `GenerationError`, `AnswerError`
//! - 엔진 시작: `EngineError`

use thiserror::Error;

/// 임베딩 프로바이더 에러
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// 프로바이더 생성 실패 (치명적 - 의존 파이프라인 시작 불가)
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    /// 입력 텍스트 문제 (빈 텍스트, 길이 초과 등)
    #[error("invalid embedding input: {0}")]
    InvalidInput(String),

    /// HTTP 전송 실패
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// 임베딩 서비스가 에러 응답을 반환
    #[error("embedding service error ({status}): {message}")]
    Api { status: u16, message: String },

    /// 응답 파싱 실패
    #[error("failed to decode embedding response: {0}")]
    Decode(String),
}

/// Knowledge Store 에러
#[derive(Error, Debug)]
pub enum StoreError {
    /// 백엔드 연결 실패 (StoreConnectionError)
    #[error("knowledge store unreachable: {0}")]
    Connection(String),

    /// 벡터 차원 불일치 (StoreSchemaError) - 설정 오류로 취급
    #[error("vector dimension mismatch: schema declares {expected}, got {actual}")]
    Schema { expected: usize, actual: usize },

    /// 쿼리/쓰기 실패
    #[error("knowledge store operation failed: {0}")]
    Query(String),

    /// SQLite 수집 기록 실패
    #[error("ingestion ledger error: {0}")]
    Ledger(#[from] rusqlite::Error),
}

impl StoreError {
    /// lancedb 에러를 쿼리 에러로 변환 (컨텍스트 포함)
    pub(crate) fn query(context: &str, err: impl std::fmt::Display) -> Self {
        StoreError::Query(format!("{context}: {err}"))
    }

    /// 스키마 에러 여부
    pub fn is_schema(&self) -> bool {
        matches!(self, StoreError::Schema { .. })
    }
}

/// 문서 수집 에러 - 발생 시 해당 문서의 청크는 하나도 저장되지 않음
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("failed to extract document: {0}")]
    Extraction(String),

    #[error("failed to embed chunk {index}: {source}")]
    Embedding {
        index: usize,
        #[source]
        source: EmbeddingError,
    },

    #[error("failed to store document chunks: {0}")]
    Store(#[from] StoreError),
}

/// 검색 에러 (재시도하지 않음)
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("knowledge store search failed: {0}")]
    Store(#[from] StoreError),
}

/// 언어 모델 호출 에러
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("generation service error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode generation response: {0}")]
    Decode(String),

    #[error("generation stream interrupted: {0}")]
    Stream(String),
}

/// 답변 파이프라인 에러
#[derive(Error, Debug)]
pub enum AnswerError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// 엔진 시작 에러 (설정 단계에서 치명적)
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// 설정 에러
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(String),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}
