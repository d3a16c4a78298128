//! HTTP 임베딩 프로바이더
//!
//! OpenAI 호환 `/v1/embeddings` 엔드포인트를 호출합니다.
//! text-embeddings-inference 등으로 bge-large-zh-v1.5를 서빙하는 배포를 가정합니다.
//!
//! 재시도와 타임아웃은 두지 않습니다. 실패는 한 번 보고하고 호출자가 결정합니다.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;
use crate::error::EmbeddingError;

/// 요청당 최대 입력 수
const MAX_BATCH: usize = 32;

/// OpenAI 호환 임베딩 구현체
#[derive(Debug)]
pub struct HttpEmbedding {
    api_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
    dimension: usize,
}

impl HttpEmbedding {
    /// 새 HTTP 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `api_url` - 임베딩 엔드포인트 전체 URL
    /// * `model` - 모델 이름
    /// * `api_key` - Bearer 토큰 (선택)
    /// * `dimension` - 기대 차원
    pub fn new(
        api_url: String,
        model: String,
        api_key: Option<String>,
        dimension: usize,
    ) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::Unavailable(
                "embedding dimension must be positive".to_string(),
            ));
        }
        if api_url.trim().is_empty() {
            return Err(EmbeddingError::Unavailable(
                "embedding API URL is empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("palank-docqa/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EmbeddingError::Unavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            api_url,
            model,
            api_key,
            client,
            dimension,
        })
    }

    async fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = EmbedRequest {
            model: &self.model,
            input: inputs,
        };

        let mut request = self.client.post(&self.api_url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        let parsed: EmbedResponse = serde_json::from_str(&text)
            .map_err(|e| EmbeddingError::Decode(e.to_string()))?;

        if parsed.data.len() != inputs.len() {
            return Err(EmbeddingError::Decode(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                parsed.data.len()
            )));
        }

        // index 순서로 정렬 (서버가 순서를 보장하지 않을 수 있음)
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// OpenAI 호환 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// 에러 본문에서 메시지 추출
///
/// `{"error": {"message": ..}}` (OpenAI) 와 `{"error": ".."}` (TEI) 둘 다 처리합니다.
fn error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        let error = v.get("error")?;
        error
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| error.as_str())
            .map(str::to_string)
    });
    message.unwrap_or_else(|| body.trim().to_string())
}

fn validate_input(text: &str) -> Result<(), EmbeddingError> {
    if text.trim().is_empty() {
        return Err(EmbeddingError::InvalidInput("empty text".to_string()));
    }
    Ok(())
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        validate_input(text)?;

        let mut vectors = self.request(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Decode("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut results = Vec::with_capacity(texts.len());

        for (i, batch) in texts.chunks(MAX_BATCH).enumerate() {
            for text in batch {
                validate_input(text)?;
            }
            tracing::debug!(
                "Embedding batch {}/{}",
                i + 1,
                texts.len().div_ceil(MAX_BATCH)
            );
            let inputs: Vec<&str> = batch.iter().map(String::as_str).collect();
            results.extend(self.request(&inputs).await?);
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_dimension() {
        let result = HttpEmbedding::new("http://localhost/v1/embeddings".into(), "m".into(), None, 0);
        assert!(matches!(result, Err(EmbeddingError::Unavailable(_))));
    }

    #[test]
    fn test_empty_url_rejected() {
        let result = HttpEmbedding::new("  ".into(), "m".into(), None, 1024);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_text_rejected_before_request() {
        let embedder =
            HttpEmbedding::new("http://127.0.0.1:9/v1/embeddings".into(), "m".into(), None, 8)
                .unwrap();
        let err = embedder.embed("   ").await.err().unwrap();
        assert!(matches!(err, EmbeddingError::InvalidInput(_)));
    }

    #[test]
    fn test_error_message_formats() {
        assert_eq!(
            error_message(r#"{"error":{"message":"input too long","type":"invalid"}}"#),
            "input too long"
        );
        assert_eq!(
            error_message(r#"{"error":"Input validation error","error_type":"Validation"}"#),
            "Input validation error"
        );
        assert_eq!(error_message("bad gateway"), "bad gateway");
    }

    #[test]
    fn test_response_decoding() {
        let body = r#"{"object":"list","data":[{"object":"embedding","embedding":[0.5,0.25],"index":0}]}"#;
        let parsed: EmbedResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data[0].embedding, vec![0.5, 0.25]);
    }
}
