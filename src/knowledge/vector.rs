//! Knowledge Store - 청크 타입, 저장소 트레이트, 거리 유틸리티
//!
//! 거리 척도는 코사인 거리 (1 - 코사인 유사도) 하나로 고정합니다.
//! 저장과 검색이 같은 척도를 써야 하므로 스키마의 일부로 취급합니다.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::StoreError;

// ============================================================================
// Types
// ============================================================================

/// 저장된 청크
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// 저장소가 삽입 시 부여하는 ID (불변)
    pub id: String,
    pub content: String,
    /// 원본 문서 식별자 (표시 이름)
    pub source: String,
    /// 1부터 시작하는 페이지 번호
    pub page_number: u32,
    /// 임베딩 벡터 (길이 = 스키마 차원 D)
    pub embedding: Vec<f32>,
}

/// 삽입용 청크 (임베딩 완료, ID 미부여)
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content: String,
    pub page_number: u32,
    pub embedding: Vec<f32>,
}

/// 검색 결과 (거리 오름차순 - 작을수록 관련성 높음)
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

// ============================================================================
// KnowledgeStore Trait
// ============================================================================

/// 청크 저장소 트레이트 (async)
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// 스키마가 선언한 벡터 차원 D
    fn dimension(&self) -> usize;

    /// 한 문서의 청크를 한 번에 삽입 (전부 보이거나 전부 안 보임)
    async fn insert(&self, source: &str, chunks: Vec<NewChunk>) -> Result<usize, StoreError>;

    /// 최근접 검색 (source_filter가 있으면 source가 정확히 같은 청크만 대상)
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        source_filter: Option<&str>,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    /// 저장된 문서 목록
    async fn list_distinct_sources(&self) -> Result<BTreeSet<String>, StoreError>;

    /// 청크 개수
    async fn count(&self) -> Result<usize, StoreError>;

    /// 문서의 청크 삭제
    async fn delete_source(&self, source: &str) -> Result<usize, StoreError>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 벡터 길이가 스키마 차원과 같은지 확인 (자르거나 채우지 않음)
pub fn check_dimension(expected: usize, vector: &[f32]) -> Result<(), StoreError> {
    if vector.len() != expected {
        return Err(StoreError::Schema {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 영벡터면 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 코사인 거리 (0.0 ~ 2.0)
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// 거리 오름차순 정렬
pub fn sort_by_distance(results: &mut [ScoredChunk]) {
    results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(id: &str, distance: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: id.to_string(),
                content: "c".to_string(),
                source: "s".to_string(),
                page_number: 1,
                embedding: vec![],
            },
            distance,
        }
    }

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.0001);
        assert!(cosine_distance(&a, &a).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.0001);
        assert!((cosine_distance(&a, &c) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_distance(&a, &d) - 2.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_empty() {
        let a: Vec<f32> = vec![];
        assert_eq!(cosine_similarity(&a, &a), 0.0);
    }

    #[test]
    fn test_check_dimension() {
        assert!(check_dimension(3, &[0.1, 0.2, 0.3]).is_ok());

        let err = check_dimension(3, &[0.1, 0.2]).err().unwrap();
        assert!(matches!(err, StoreError::Schema { expected: 3, actual: 2 }));

        assert!(check_dimension(3, &[0.0; 4]).is_err());
    }

    #[test]
    fn test_sort_by_distance() {
        let mut results = vec![scored("b", 0.7), scored("a", 0.1), scored("c", 0.4)];
        sort_by_distance(&mut results);
        let ids: Vec<&str> = results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }
}
