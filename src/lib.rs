//! palank-docqa - 문서 기반 질의응답 RAG 엔진
//!
//! 문서를 페이지 단위로 추출해 겹치는 청크로 나누고, 임베딩과 함께 LanceDB에 저장합니다.
//! 질문이 들어오면 가장 가까운 청크를 찾아 근거 자료로 삼고,
//! 언어 모델 답변을 조각 단위로 스트리밍합니다.

pub mod answer;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod ingest;
pub mod knowledge;
pub mod retrieval;

#[cfg(test)]
mod testing;

// Re-exports
pub use answer::{Answer, AnswerPipeline, TextStream, NO_RELEVANT_INFORMATION};
pub use config::{get_data_dir, Config, EmbeddingBackend, EmbeddingConfig, GenerationConfig};
pub use embedding::{EmbeddingHandle, EmbeddingProvider, HashingEmbedding, HttpEmbedding};
pub use engine::{DocQaEngine, EngineStats, ForgetReport};
pub use error::{
    AnswerError, ConfigError, EmbeddingError, EngineError, GenerationError, IngestionError,
    RetrievalError, StoreError,
};
pub use generation::{ChatCompletionClient, FragmentStream, GenerationClient, GenerationRequest};
pub use ingest::{IngestReport, IngestionPipeline};
pub use knowledge::{
    Chunk, DocumentSegmenter, IngestLedger, KnowledgeStore, LanceKnowledgeStore, PageText,
    ScoredChunk, SegmentConfig,
};
pub use retrieval::Retriever;
