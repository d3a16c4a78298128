//! 문서 추출 모듈
//!
//! 파일에서 (페이지 인덱스, 텍스트) 목록을 만듭니다.
//! - PDF 파일: pdf-extract로 페이지별 텍스트 추출
//! - 텍스트 파일(.txt, .md 등): 파일 전체를 한 페이지로

pub mod pdf;

use std::path::Path;

use crate::error::IngestionError;
use crate::knowledge::PageText;

// ============================================================================
// Types
// ============================================================================

/// 지원 문서 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Text,
}

impl DocumentKind {
    const TEXT_EXTENSIONS: &'static [&'static str] = &["txt", "md", "markdown", "rst", "csv"];

    /// 확장자로 형식 판별
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();

        if ext == "pdf" {
            Some(DocumentKind::Pdf)
        } else if Self::TEXT_EXTENSIONS.contains(&ext.as_str()) {
            Some(DocumentKind::Text)
        } else {
            None
        }
    }
}

/// 추출된 문서
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    /// 기본 표시 이름 (파일 이름)
    pub source_name: String,
    pub kind: DocumentKind,
    pub pages: Vec<PageText>,
}

// ============================================================================
// Extraction
// ============================================================================

/// 파일에서 페이지 추출
pub async fn extract_document(path: &Path) -> Result<ExtractedDocument, IngestionError> {
    let kind = DocumentKind::from_path(path).ok_or_else(|| {
        IngestionError::Extraction(format!("unsupported file type: {}", path.display()))
    })?;

    let source_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| IngestionError::Extraction(format!("not a file: {}", path.display())))?;

    let pages = match kind {
        DocumentKind::Text => extract_text(path).await?,
        DocumentKind::Pdf => {
            // PDF 추출은 CPU 바운드이므로 spawn_blocking 사용
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || pdf::extract_pages(&path))
                .await
                .map_err(|e| IngestionError::Extraction(format!("PDF extraction task failed: {e}")))??
        }
    };

    tracing::debug!("Extracted {} pages from {:?}", pages.len(), path);

    Ok(ExtractedDocument {
        source_name,
        kind,
        pages,
    })
}

async fn extract_text(path: &Path) -> Result<Vec<PageText>, IngestionError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| IngestionError::Extraction(format!("{}: {}", path.display(), e)))?;

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![PageText::new(0, text)])
}

// ============================================================================
// Tests
// ============================================================================
