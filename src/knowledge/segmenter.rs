//! Document Segmenter - 페이지 텍스트를 겹치는 고정 크기 청크로 분할
//!
//! 페이지 텍스트를 이어 붙인 뒤 슬라이딩 윈도우로 자릅니다.
//! 페이지 경계는 청크 경계가 아닙니다. 크기와 오버랩은 문자(char) 단위입니다.
//!
//! - 목표 크기 500자, 오버랩 50자
//! - 윈도우 후반부에 문장 끝(또는 공백)이 있으면 그 위치에서 자름
//! - 인접 청크는 정확히 `overlap` 글자를 공유함
//! - 마지막 남은 조각은 목표 크기보다 작아도 청크로 내보냄
//! - 공백뿐인 윈도우는 내보내지 않음 (임베딩할 수 없음). 긴 공백 구간이 있으면
//!   그 구간에서는 오버랩과 원문 재구성이 성립하지 않음

/// 페이지 구분자 (이전 페이지에 속함)
const PAGE_SEPARATOR: char = '\n';

/// 문장 끝으로 취급하는 문자
const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', ';', '。', '！', '？', '；', '\n'];

// ============================================================================
// Types
// ============================================================================

/// 분할 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentConfig {
    /// 목표 청크 크기 (문자 수)
    pub chunk_size: usize,
    /// 인접 청크 간 오버랩 (문자 수)
    pub overlap: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}

/// 추출된 페이지 하나
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 0부터 시작하는 추출 인덱스
    pub index: usize,
    pub text: String,
}

impl PageText {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }
}

/// 저장 전 청크 후보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkCandidate {
    pub content: String,
    /// 1부터 시작하는 페이지 번호 (추출 인덱스 + 1)
    pub page_number: u32,
}

// ============================================================================
// DocumentSegmenter
// ============================================================================

/// 슬라이딩 윈도우 분할기
#[derive(Debug, Clone, Default)]
pub struct DocumentSegmenter {
    config: SegmentConfig,
}

impl DocumentSegmenter {
    /// 설정으로 생성
    ///
    /// 오버랩은 청크 크기보다 작게 보정됩니다.
    pub fn new(config: SegmentConfig) -> Self {
        let chunk_size = config.chunk_size.max(1);
        let overlap = config.overlap.min(chunk_size - 1);
        Self {
            config: SegmentConfig {
                chunk_size,
                overlap,
            },
        }
    }

    pub fn config(&self) -> SegmentConfig {
        self.config
    }

    /// 페이지 목록을 청크 후보로 분할
    pub fn segment(&self, pages: &[PageText]) -> Vec<ChunkCandidate> {
        let document = JoinedDocument::new(pages);
        if document.chars.iter().all(|c| c.is_whitespace()) {
            return vec![];
        }

        let SegmentConfig {
            chunk_size,
            overlap,
        } = self.config;
        let chars = &document.chars;
        let total = chars.len();

        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let hard_end = (start + chunk_size).min(total);
            let end = if hard_end == total {
                total
            } else {
                self.soft_end(chars, start, hard_end)
            };

            let content: String = chars[start..end].iter().collect();
            if !content.trim().is_empty() {
                let first_text = chars[start..end]
                    .iter()
                    .position(|c| !c.is_whitespace())
                    .map_or(start, |p| start + p);
                chunks.push(ChunkCandidate {
                    content,
                    page_number: document.page_number_at(first_text),
                });
            }

            if end == total {
                break;
            }
            start = end - overlap;
        }

        tracing::debug!(
            "Segmented {} pages ({} chars) into {} chunks",
            pages.len(),
            total,
            chunks.len()
        );
        chunks
    }

    /// 윈도우 후반부에서 자를 위치 찾기
    ///
    /// 반환값은 항상 `start + overlap` 보다 커서 다음 윈도우가 전진합니다.
    fn soft_end(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let min_end = start + (self.config.overlap + 1).max(self.config.chunk_size / 2);
        if min_end >= hard_end {
            return hard_end;
        }

        let window = min_end..=hard_end;
        let sentence_end = window
            .clone()
            .rev()
            .find(|&p| SENTENCE_TERMINATORS.contains(&chars[p - 1]));
        if let Some(p) = sentence_end {
            return p;
        }

        window
            .rev()
            .find(|&p| chars[p - 1].is_whitespace())
            .unwrap_or(hard_end)
    }
}

/// 페이지를 이어 붙인 문서와 페이지 시작 오프셋
struct JoinedDocument {
    chars: Vec<char>,
    /// (시작 char 오프셋, 추출 인덱스)
    page_starts: Vec<(usize, usize)>,
}

impl JoinedDocument {
    fn new(pages: &[PageText]) -> Self {
        let mut chars = Vec::new();
        let mut page_starts = Vec::with_capacity(pages.len());

        for (i, page) in pages.iter().enumerate() {
            if i > 0 {
                chars.push(PAGE_SEPARATOR);
            }
            page_starts.push((chars.len(), page.index));
            chars.extend(page.text.chars());
        }

        Self { chars, page_starts }
    }

    fn page_number_at(&self, offset: usize) -> u32 {
        let slot = self
            .page_starts
            .partition_point(|&(start, _)| start <= offset)
            .saturating_sub(1);
        let index = self.page_starts.get(slot).map_or(0, |&(_, index)| index);
        u32::try_from(index + 1).unwrap_or(u32::MAX)
    }
}

/// 분할 대상 원문 (페이지를 구분자로 이어 붙인 텍스트)
pub fn joined_text(pages: &[PageText]) -> String {
    JoinedDocument::new(pages).chars.into_iter().collect()
}

// ============================================================================
// Tests
// ============================================================================
