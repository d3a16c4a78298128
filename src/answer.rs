//! 답변 파이프라인 - 검색 → 컨텍스트 조립 → 스트리밍 생성
//!
//! 결과는 태그가 붙은 `Answer`로 돌려줍니다.
//! - `Grounded`: 검색된 자료를 근거로 생성 중인 답변
//! - `NoMatches`: 검색 결과 없음 (에러가 아닌 정상 종료 상태)
//! - `Failed`: 검색 또는 생성 호출 실패
//!
//! 텍스트만 필요한 호출자는 `into_text_stream()`으로 세 경우를 모두
//! 같은 조각 스트림으로 받을 수 있습니다.

use std::future::ready;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::error::{AnswerError, GenerationError};
use crate::generation::{FragmentStream, Generation, GenerationClient, GenerationRequest};
use crate::knowledge::ScoredChunk;
use crate::retrieval::Retriever;

/// 검색 결과가 없을 때 컨텍스트 자리에 들어가는 표시이자 사용자 안내 문구
pub const NO_RELEVANT_INFORMATION: &str =
    "No relevant information was found in the knowledge base.";

/// 근거 기반 답변 지시문
pub const SYSTEM_PROMPT: &str = "You are a document question-answering assistant. \
Answer strictly from the reference material supplied in the user message. \
If the material does not cover the question, say explicitly that the documents do not contain the answer. \
Never fabricate facts, rules, or numbers that are not in the material.";

/// 텍스트 조각 스트림 (에러도 안내 문구 조각으로 변환됨)
pub type TextStream = BoxStream<'static, String>;

// ============================================================================
// Answer
// ============================================================================

/// 답변 결과
pub enum Answer {
    /// 검색 자료 기반 답변 (`sources`는 거리 오름차순)
    Grounded {
        sources: Vec<ScoredChunk>,
        fragments: FragmentStream,
    },
    /// 관련 자료 없음
    NoMatches { fragments: FragmentStream },
    /// 검색/생성 실패
    Failed(AnswerError),
}

impl std::fmt::Debug for Answer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Answer::Grounded { sources, .. } => f
                .debug_struct("Grounded")
                .field("sources", &sources.len())
                .finish_non_exhaustive(),
            Answer::NoMatches { .. } => f.write_str("NoMatches"),
            Answer::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

impl Answer {
    /// 근거 청크 (없으면 빈 슬라이스)
    pub fn sources(&self) -> &[ScoredChunk] {
        match self {
            Answer::Grounded { sources, .. } => sources,
            _ => &[],
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Answer::Failed(_))
    }

    /// 모든 경우를 텍스트 조각 스트림 하나로 변환
    ///
    /// - 실패: 안내 조각 하나
    /// - 자료 없음: 안내 조각 뒤에 모델 출력 (`answer_complete`도 같은 안내로 시작)
    /// - 생성 도중 에러: 마지막 조각으로 진단 문구, 이후 종료
    pub fn into_text_stream(self) -> TextStream {
        match self {
            Answer::Failed(err) => stream::once(ready(failure_message(&err))).boxed(),
            Answer::NoMatches { fragments } => {
                let notice = stream::once(ready(no_match_notice()));
                notice.chain(forward_fragments(fragments)).boxed()
            }
            Answer::Grounded { fragments, .. } => forward_fragments(fragments).boxed(),
        }
    }

    /// 스트림을 끝까지 모아 완성 텍스트로 반환
    pub async fn collect_text(self) -> String {
        self.into_text_stream().collect::<Vec<_>>().await.concat()
    }
}

/// 조각을 도착 순서대로 전달 - 빈 조각은 건너뛰고 첫 에러에서 진단 조각 후 종료
///
/// 진단 조각을 내보낸 뒤에는 생성 스트림을 다시 당기지 않습니다.
fn forward_fragments(fragments: FragmentStream) -> impl futures::Stream<Item = String> + Send {
    stream::unfold(Some(fragments), |state| async move {
        let mut fragments = state?;
        loop {
            match fragments.next().await? {
                Ok(text) if text.is_empty() => continue,
                Ok(text) => return Some((text, Some(fragments))),
                Err(e) => {
                    tracing::warn!("Generation stream failed: {}", e);
                    return Some((generation_failure_message(&e), None));
                }
            }
        }
    })
}

/// 검색 결과가 없을 때 답변 앞에 붙는 안내
fn no_match_notice() -> String {
    format!("{NO_RELEVANT_INFORMATION}\n\n")
}

fn failure_message(err: &AnswerError) -> String {
    match err {
        AnswerError::Retrieval(e) => {
            format!("Sorry, the knowledge base could not be searched right now ({e}).")
        }
        AnswerError::Generation(e) => generation_failure_message(e),
        AnswerError::Config(e) => format!("The answer service is not configured ({e})."),
    }
}

fn generation_failure_message(err: &GenerationError) -> String {
    format!("\n[The language model could not complete the answer: {err}]")
}

// ============================================================================
// Prompt Assembly
// ============================================================================

/// 검색 결과를 라벨이 붙은 발췌 목록으로 조립
pub fn build_context(chunks: &[ScoredChunk]) -> String {
    if chunks.is_empty() {
        return NO_RELEVANT_INFORMATION.to_string();
    }

    chunks
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "--- Excerpt {} (source: {}, page {}) ---\n{}",
                i + 1,
                hit.chunk.source,
                hit.chunk.page_number,
                hit.chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 사용자 메시지 (참고 자료 + 원문 질문)
pub fn build_user_prompt(context: &str, question: &str) -> String {
    format!(
        "Reference material:\n{context}\n\n\
         Question: {question}\n\n\
         Answer using only the reference material above."
    )
}

// ============================================================================
// AnswerPipeline
// ============================================================================

/// 답변 파이프라인
#[derive(Clone)]
pub struct AnswerPipeline {
    retriever: Retriever,
    generator: Arc<dyn GenerationClient>,
}

impl AnswerPipeline {
    pub fn new(retriever: Retriever, generator: Arc<dyn GenerationClient>) -> Self {
        Self {
            retriever,
            generator,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// 질문에 대한 스트리밍 답변
    ///
    /// 검색/생성 실패는 `Answer::Failed`로 돌려주며 패닉하지 않습니다.
    pub async fn answer(&self, question: &str, source_filter: Option<&str>) -> Answer {
        let (hits, request) = match self.prepare(question, source_filter).await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!("Retrieval failed: {}", e);
                return Answer::Failed(e);
            }
        };

        let fragments = match self.generator.generate(&request, true).await {
            Ok(Generation::Stream(fragments)) => fragments,
            Ok(Generation::Complete(text)) => stream::once(ready(Ok(text))).boxed(),
            Err(e) => {
                tracing::warn!("Generation request failed: {}", e);
                return Answer::Failed(e.into());
            }
        };

        if hits.is_empty() {
            Answer::NoMatches { fragments }
        } else {
            Answer::Grounded {
                sources: hits,
                fragments,
            }
        }
    }

    /// 비스트리밍 답변 (같은 프롬프트, 한 번에 수신)
    ///
    /// 텍스트는 같은 질문의 `answer(..).collect_text()`와 같습니다.
    pub async fn answer_complete(
        &self,
        question: &str,
        source_filter: Option<&str>,
    ) -> Result<(String, Vec<ScoredChunk>), AnswerError> {
        let (hits, request) = self.prepare(question, source_filter).await?;
        let generated = match self.generator.generate(&request, false).await? {
            Generation::Complete(text) => text,
            Generation::Stream(fragments) => {
                fragments.try_collect::<Vec<_>>().await?.concat()
            }
        };

        let text = if hits.is_empty() {
            no_match_notice() + &generated
        } else {
            generated
        };
        Ok((text, hits))
    }

    async fn prepare(
        &self,
        question: &str,
        source_filter: Option<&str>,
    ) -> Result<(Vec<ScoredChunk>, GenerationRequest), AnswerError> {
        let hits = self.retriever.retrieve(question, source_filter).await?;
        let context = build_context(&hits);
        let request = GenerationRequest::new(SYSTEM_PROMPT, build_user_prompt(&context, question));
        Ok((hits, request))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingHandle;
    use crate::ingest::IngestionPipeline;
    use crate::knowledge::{Chunk, LanceKnowledgeStore, PageText};
    use crate::testing::{hashing_handle, ScriptedGenerator, UnreachableStore};
    use tempfile::TempDir;

    const DIM: usize = 1024;

    fn hit(source: &str, page: u32, content: &str, distance: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: format!("{source}-{page}"),
                content: content.to_string(),
                source: source.to_string(),
                page_number: page,
                embedding: vec![],
            },
            distance,
        }
    }

    async fn seeded_pipeline(
        dir: &TempDir,
        generator: Arc<ScriptedGenerator>,
    ) -> AnswerPipeline {
        let handle: EmbeddingHandle = hashing_handle(DIM);
        let uri = dir.path().join("kb.lance");
        let store = Arc::new(
            LanceKnowledgeStore::open(uri.to_str().unwrap(), DIM)
                .await
                .unwrap(),
        );
        IngestionPipeline::new(handle.clone(), store.clone())
            .ingest_document(
                &[PageText::new(2, "STL is allowed during the contest.")],
                "contest.pdf",
            )
            .await
            .unwrap();

        AnswerPipeline::new(Retriever::new(handle, store), generator)
    }

    #[test]
    fn test_build_context_labels_excerpts_in_rank_order() {
        let context = build_context(&[
            hit("rules.pdf", 3, "STL is allowed.", 0.1),
            hit("faq.pdf", 1, "Bring your ID.", 0.4),
        ]);

        assert_eq!(
            context,
            "--- Excerpt 1 (source: rules.pdf, page 3) ---\nSTL is allowed.\n\n\
             --- Excerpt 2 (source: faq.pdf, page 1) ---\nBring your ID."
        );
    }

    #[test]
    fn test_empty_context_is_explicit_marker() {
        assert_eq!(build_context(&[]), NO_RELEVANT_INFORMATION);
    }

    #[tokio::test]
    async fn test_grounded_answer_streams_in_order() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::new(&["Yes, ", "", "STL ", "is allowed."]));
        let pipeline = seeded_pipeline(&dir, generator.clone()).await;

        let answer = pipeline.answer("can I use STL?", None).await;
        assert_eq!(answer.sources().len(), 1);
        assert_eq!(answer.sources()[0].chunk.page_number, 3);

        let fragments: Vec<String> = answer.into_text_stream().collect().await;
        assert_eq!(fragments, vec!["Yes, ", "STL ", "is allowed."]);

        let request = generator.last_request().unwrap();
        assert_eq!(request.system_prompt, SYSTEM_PROMPT);
        assert!(request.user_prompt.contains("(source: contest.pdf, page 3)"));
        assert!(request.user_prompt.contains("Question: can I use STL?"));
    }

    #[tokio::test]
    async fn test_streaming_matches_single_shot() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::new(&["The ", "rules ", "allow STL."]));
        let pipeline = seeded_pipeline(&dir, generator.clone()).await;

        let streamed = pipeline.answer("can I use STL?", None).await.collect_text().await;
        let (complete, _) = pipeline.answer_complete("can I use STL?", None).await.unwrap();

        assert_eq!(streamed, complete);
    }

    #[tokio::test]
    async fn test_no_match_streaming_matches_single_shot() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::new(&["I don't ", "know."]));
        let pipeline = seeded_pipeline(&dir, generator.clone()).await;

        let streamed = pipeline
            .answer("can I use STL?", Some("missing.pdf"))
            .await
            .collect_text()
            .await;
        let (complete, sources) = pipeline
            .answer_complete("can I use STL?", Some("missing.pdf"))
            .await
            .unwrap();

        assert!(sources.is_empty());
        assert_eq!(streamed, complete);
        assert_eq!(
            complete,
            format!("{NO_RELEVANT_INFORMATION}\n\nI don't know.")
        );
    }

    #[tokio::test]
    async fn test_missing_source_yields_no_match_notice() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::new(&["I don't know."]));
        let pipeline = seeded_pipeline(&dir, generator.clone()).await;

        let answer = pipeline
            .answer("unrelated nonsense query", Some("doc_that_does_not_exist.pdf"))
            .await;
        assert!(matches!(answer, Answer::NoMatches { .. }));

        let text = answer.collect_text().await;
        assert!(text.contains(NO_RELEVANT_INFORMATION));

        // 모델에도 "자료 없음" 표시가 전달됨
        let request = generator.last_request().unwrap();
        assert!(request.user_prompt.contains(NO_RELEVANT_INFORMATION));
    }

    #[tokio::test]
    async fn test_retrieval_failure_is_single_fragment() {
        let generator = Arc::new(ScriptedGenerator::new(&["never"]));
        let store = Arc::new(UnreachableStore::new(DIM));
        let retriever = Retriever::new(hashing_handle(DIM), store.clone());
        let pipeline = AnswerPipeline::new(retriever, generator.clone());

        let answer = pipeline.answer("anything", None).await;
        assert!(answer.is_failed());

        let fragments: Vec<String> = answer.into_text_stream().collect().await;
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].contains("could not be searched"));
        assert!(generator.last_request().is_none());
        assert_eq!(store.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_generation_call_failure_is_diagnostic() {
        let dir = TempDir::new().unwrap();
        let pipeline = seeded_pipeline(&dir, Arc::new(ScriptedGenerator::failing())).await;

        let answer = pipeline.answer("can I use STL?", None).await;
        assert!(matches!(answer, Answer::Failed(AnswerError::Generation(_))));

        let fragments: Vec<String> = answer.into_text_stream().collect().await;
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].contains("upstream unavailable"));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_ends_with_diagnostic() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::interrupted(&["Partial ", "answer"]));
        let pipeline = seeded_pipeline(&dir, generator).await;

        let fragments: Vec<String> = pipeline
            .answer("can I use STL?", None)
            .await
            .into_text_stream()
            .collect()
            .await;

        assert_eq!(fragments.len(), 3);
        assert_eq!(&fragments[..2], &["Partial ", "answer"]);
        assert!(fragments[2].contains("connection reset"));
    }

    #[tokio::test]
    async fn test_stream_not_polled_after_error() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::interrupted(&["Partial "]));
        let pipeline = seeded_pipeline(&dir, generator.clone()).await;

        let fragments: Vec<String> = pipeline
            .answer("can I use STL?", None)
            .await
            .into_text_stream()
            .collect()
            .await;

        assert_eq!(fragments.len(), 2);
        assert!(!fragments.iter().any(|f| f.contains("after the error")));
        // 조각 하나 + 에러 하나만 꺼냄
        assert_eq!(generator.pulled(), 2);
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_generation() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::new(&["one ", "two ", "three"]));
        let pipeline = seeded_pipeline(&dir, generator.clone()).await;

        let mut stream = pipeline.answer("can I use STL?", None).await.into_text_stream();
        assert_eq!(stream.next().await.as_deref(), Some("one "));
        assert!(!generator.stream_dropped());

        drop(stream);
        assert!(generator.stream_dropped());
    }
}
