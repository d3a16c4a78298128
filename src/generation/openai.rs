//! OpenAI 호환 Chat Completions 클라이언트
//!
//! DeepSeek(`https://api.deepseek.com`) 등 `/chat/completions` 호환 엔드포인트를 호출합니다.
//! 스트리밍 응답은 Server-Sent Events(`data: {...}` 줄, `data: [DONE]` 종료)로 옵니다.

use std::fmt::Display;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use super::{FragmentStream, GenerationClient, GenerationRequest};
use crate::error::GenerationError;

/// Chat Completions 클라이언트
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl ChatCompletionClient {
    /// 새 클라이언트 생성
    ///
    /// # Arguments
    /// * `base_url` - API 기본 URL (예: `https://api.deepseek.com`)
    /// * `api_key` - Bearer 토큰
    /// * `model` - 모델 이름 (예: `deepseek-chat`)
    pub fn new(base_url: &str, api_key: String, model: String) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("palank-docqa/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            stream,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.trim())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message: api_error_message(&text),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl GenerationClient for ChatCompletionClient {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let response = self.send(request, false).await?;
        let text = response.text().await?;
        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| GenerationError::Decode(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::Decode("response has no message content".to_string()))
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, GenerationError> {
        let response = self.send(request, true).await?;
        tracing::debug!("Streaming completion from {}", self.model);
        Ok(sse_fragments(response.bytes_stream()).boxed())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

/// 스트리밍 청크 (이벤트 하나의 `data`)
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

// ============================================================================
// SSE Decoding
// ============================================================================

/// SSE 이벤트 하나의 해석 결과
#[derive(Debug, PartialEq)]
enum StreamEvent {
    /// 내용 조각 (빈 조각은 None)
    Fragment(Option<String>),
    /// `[DONE]`
    Done,
}

/// 이벤트 `data` 필드 해석
fn decode_event(data: &str) -> Result<StreamEvent, GenerationError> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(StreamEvent::Done);
    }
    if data.is_empty() {
        return Ok(StreamEvent::Fragment(None));
    }

    let chunk: StreamChunk =
        serde_json::from_str(data).map_err(|e| GenerationError::Decode(format!("{e}: {data}")))?;

    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(GenerationError::Stream(message));
    }

    let content: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();

    Ok(StreamEvent::Fragment((!content.is_empty()).then_some(content)))
}

/// 바이트 스트림을 SSE 내용 조각 스트림으로 변환
///
/// 조각은 이벤트가 도착하는 대로 나오며 빈 조각은 건너뜁니다.
/// `[DONE]` 또는 첫 에러 이후에는 아래 바이트 스트림을 더 읽지 않습니다.
pub fn sse_fragments<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, GenerationError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let events = Box::pin(bytes.eventsource());

    stream::unfold(Some(events), |state| async move {
        let mut events = state?;
        loop {
            let event = match events.next().await? {
                Ok(event) => event,
                Err(e) => return Some((Err(GenerationError::Stream(e.to_string())), None)),
            };

            match decode_event(&event.data) {
                Ok(StreamEvent::Fragment(Some(text))) => return Some((Ok(text), Some(events))),
                Ok(StreamEvent::Fragment(None)) => continue,
                Ok(StreamEvent::Done) => return None,
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":{}}}}}]}}\n\n",
            serde_json::to_string(text).unwrap()
        )
    }

    async fn collect(parts: Vec<String>) -> Vec<Result<String, GenerationError>> {
        let bytes = stream::iter(parts.into_iter().map(|p| Ok::<_, std::io::Error>(p.into_bytes())));
        sse_fragments(bytes).collect().await
    }

    #[test]
    fn test_decode_event() {
        assert_eq!(decode_event("[DONE]").unwrap(), StreamEvent::Done);
        assert_eq!(decode_event("").unwrap(), StreamEvent::Fragment(None));
        assert_eq!(
            decode_event(r#"{"choices":[{"delta":{"content":"hi"}}]}"#).unwrap(),
            StreamEvent::Fragment(Some("hi".to_string()))
        );
        assert_eq!(
            decode_event(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            StreamEvent::Fragment(None)
        );
        assert!(matches!(decode_event("not json"), Err(GenerationError::Decode(_))));
    }

    #[tokio::test]
    async fn test_fragments_in_order_across_split_chunks() {
        let body = format!("{}{}{}data: [DONE]\n\n", delta("STL "), delta(""), delta("is allowed"));
        // 임의 위치에서 잘린 바이트 조각
        let (a, b) = body.split_at(17);
        let (b, c) = b.split_at(40);
        let results = collect(vec![a.to_string(), b.to_string(), c.to_string()]).await;

        let texts: Vec<String> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["STL ".to_string(), "is allowed".to_string()]);
    }

    #[tokio::test]
    async fn test_stops_at_done() {
        let body = format!("{}data: [DONE]\n\n{}", delta("a"), delta("ignored"));
        let results = collect(vec![body]).await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_comments_and_keep_alives_ignored() {
        let body = format!(": keep-alive\n\n{}: ping\n\n{}", delta("a"), delta("b"));
        let results = collect(vec![body]).await;
        assert_eq!(
            results.into_iter().map(Result::unwrap).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[tokio::test]
    async fn test_error_chunk_terminates() {
        let body = format!(
            "{}data: {{\"error\":{{\"message\":\"overloaded\"}}}}\n\n{}",
            delta("partial"),
            delta("never")
        );
        let results = collect(vec![body]).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), "partial");
        assert!(matches!(&results[1], Err(GenerationError::Stream(m)) if m == "overloaded"));
    }

    #[tokio::test]
    async fn test_transport_error_terminates() {
        let parts: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(delta("one").into_bytes()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(delta("two").into_bytes()),
        ];
        let results: Vec<_> = sse_fragments(stream::iter(parts)).collect().await;

        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    #[test]
    fn test_endpoint_join() {
        let client = ChatCompletionClient::new(
            "https://api.deepseek.com/",
            "sk-test".to_string(),
            "deepseek-chat".to_string(),
        )
        .unwrap();
        assert_eq!(client.endpoint(), "https://api.deepseek.com/chat/completions");
        assert_eq!(client.model(), "deepseek-chat");
    }

    #[test]
    fn test_api_error_message() {
        assert_eq!(
            api_error_message(r#"{"error":{"message":"Authentication Fails","type":"auth"}}"#),
            "Authentication Fails"
        );
        assert_eq!(api_error_message("Service Unavailable"), "Service Unavailable");
    }
}
