//! 해싱 임베딩 - 네트워크 없이 동작하는 결정적 프로바이더
//!
//! 토큰을 FNV-1a 해시로 버킷에 배정하고 L2 정규화합니다 (feature hashing).
//! 의미 유사도는 없고 어휘 중복만 반영하므로 테스트와 폐쇄망 환경용입니다.

use async_trait::async_trait;

use super::EmbeddingProvider;
use crate::error::EmbeddingError;

/// 해싱 임베딩 구현체
#[derive(Debug, Clone)]
pub struct HashingEmbedding {
    dimension: usize,
}

impl HashingEmbedding {
    pub fn new(dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::Unavailable(
                "embedding dimension must be positive".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            // 상위 비트로 부호 결정 (충돌 편향 완화)
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

/// 소문자 단어 토큰화 - ASCII가 아닌 토큰(한중일 등)은 글자 단위로 분리
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();

    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        if word.is_ascii() {
            tokens.push(word.to_ascii_lowercase());
        } else {
            tokens.extend(word.chars().map(|c| c.to_lowercase().collect::<String>()));
        }
    }

    tokens
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".to_string()));
        }
        Ok(self.vectorize(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashing"
    }
}
