//! 생성 모듈 - 외부 언어 모델 호출
//!
//! system/user 메시지 쌍을 보내고 완성 답변 하나, 또는 조각 스트림을 받습니다.
//! 스트림 조각은 도착하는 대로 전달되며 완료까지 모아두지 않습니다.
//! 스트림을 drop하면 HTTP 응답도 함께 해제됩니다.

mod openai;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::GenerationError;

pub use openai::{sse_fragments, ChatCompletionClient};

/// 답변 조각 스트림 (pull 방식, 재시작 불가)
pub type FragmentStream = BoxStream<'static, Result<String, GenerationError>>;

/// 생성 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
}

impl GenerationRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
        }
    }
}

/// 생성 결과
pub enum Generation {
    /// 한 번에 받은 완성 답변
    Complete(String),
    /// 조각 스트림
    Stream(FragmentStream),
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Generation::Complete(text) => f.debug_tuple("Complete").field(text).finish(),
            Generation::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// 언어 모델 클라이언트 트레이트
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// 완성 답변 요청
    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// 스트리밍 요청 - 연결이 성립하면 조각 스트림을 반환
    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, GenerationError>;

    /// `stream` 플래그에 따라 완성 답변 또는 스트림
    async fn generate(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<Generation, GenerationError> {
        if stream {
            Ok(Generation::Stream(self.stream(request).await?))
        } else {
            Ok(Generation::Complete(self.complete(request).await?))
        }
    }

    /// 모델 이름
    fn model(&self) -> &str;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_generate_follows_stream_flag() {
        let generator = ScriptedGenerator::new(&["STL ", "is allowed."]);
        let request = GenerationRequest::new("system", "can I use STL?");

        let streamed = match generator.generate(&request, true).await.unwrap() {
            Generation::Stream(fragments) => fragments.try_collect::<Vec<_>>().await.unwrap(),
            other => panic!("expected stream, got {other:?}"),
        };
        assert_eq!(streamed, vec!["STL ", "is allowed."]);

        match generator.generate(&request, false).await.unwrap() {
            Generation::Complete(text) => assert_eq!(text, "STL is allowed."),
            other => panic!("expected complete, got {other:?}"),
        }
        assert_eq!(generator.last_request(), Some(request));
    }

    #[tokio::test]
    async fn test_generate_reports_call_failure() {
        let generator = ScriptedGenerator::failing();
        let request = GenerationRequest::new("system", "question");

        for stream in [true, false] {
            let err = generator.generate(&request, stream).await.unwrap_err();
            assert!(matches!(err, GenerationError::Api { status: 503, .. }));
        }
    }
}
