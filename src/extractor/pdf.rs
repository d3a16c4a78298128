//! PDF 페이지 추출
//!
//! pdf-extract로 전체 텍스트를 뽑은 뒤 폼피드(`\x0c`) 기준으로 페이지를 나눕니다.
//! 빈 페이지도 자리를 유지해야 이후 페이지 번호가 밀리지 않습니다.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::IngestionError;
use crate::knowledge::PageText;

/// PDF에서 페이지 텍스트 추출 (인덱스는 0부터)
///
/// 텍스트 레이어가 없는 PDF(스캔본 등)는 빈 목록을 반환합니다.
pub fn extract_pages(path: &Path) -> Result<Vec<PageText>, IngestionError> {
    let bytes = std::fs::read(path)
        .map_err(|e| IngestionError::Extraction(format!("{}: {}", path.display(), e)))?;

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .map_err(|e| IngestionError::Extraction(format!("{}: {}", path.display(), e)))?;

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        return Ok(Vec::new());
    }

    Ok(split_pages(&text)
        .into_iter()
        .enumerate()
        .map(|(index, text)| PageText::new(index, text))
        .collect())
}

/// "--- Page 3 ---" 형태의 구분 줄
fn page_marker() -> Option<&'static Regex> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    MARKER
        .get_or_init(|| {
            Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$").ok()
        })
        .as_ref()
}

/// 추출 텍스트를 페이지별로 분리
fn split_pages(text: &str) -> Vec<String> {
    if text.contains('\x0c') {
        let mut pages: Vec<String> = text.split('\x0c').map(|s| s.trim().to_string()).collect();
        // 마지막 폼피드 뒤의 빈 꼬리
        while pages.len() > 1 && pages.last().is_some_and(|p| p.is_empty()) {
            pages.pop();
        }
        return pages;
    }

    if let Some(marker) = page_marker() {
        if marker.is_match(text) {
            let pages: Vec<String> = marker
                .split(text)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();

            if pages.len() > 1 {
                return pages;
            }
        }
    }

    vec![text.trim().to_string()]
}

// ============================================================================
// Tests
// ============================================================================
