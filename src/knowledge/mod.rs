//! Knowledge 모듈 - 문서 분할 + 청크 벡터 저장소
//!
//! - Segmenter: 페이지 텍스트 → 겹치는 고정 크기 청크
//! - LanceDB: 청크 + 벡터 저장, 코사인 최근접 검색, source 필터
//! - Ledger: SQLite 수집 기록 (중복 수집 감지)

mod lance;
mod ledger;
mod segmenter;
mod vector;

// Re-exports
pub use lance::LanceKnowledgeStore;
pub use ledger::{content_digest, IngestLedger, IngestRecord};
pub use segmenter::{joined_text, ChunkCandidate, DocumentSegmenter, PageText, SegmentConfig};
pub use vector::{
    check_dimension, cosine_distance, cosine_similarity, sort_by_distance, Chunk,
    KnowledgeStore, NewChunk, ScoredChunk,
};
