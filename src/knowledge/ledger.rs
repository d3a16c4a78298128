//! Ingestion Ledger - rusqlite 기반 수집 기록
//!
//! 문서 수집이 커밋될 때마다 (source, 내용 SHA-256, 청크 수, 시각)을 기록합니다.
//! 같은 내용을 다시 수집하면 청크는 그대로 중복 저장되고, 기록으로 중복 여부만 알립니다.
//! 저장 위치: ~/.palank-docqa/ledger.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::segmenter::PageText;
use crate::error::StoreError;

// ============================================================================
// Types
// ============================================================================

/// 수집 기록 한 건
#[derive(Debug, Clone, Serialize)]
pub struct IngestRecord {
    pub id: i64,
    pub source: String,
    pub content_sha256: String,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
}

// ============================================================================
// IngestLedger
// ============================================================================

/// 수집 기록 저장소
pub struct IngestLedger {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl IngestLedger {
    /// 기록 DB 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Connection(format!("{}: {}", parent.display(), e)))?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let ledger = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        ledger.initialize()?;
        Ok(ledger)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Query(format!("ledger lock poisoned: {e}")))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ingestions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                content_sha256 TEXT NOT NULL,
                chunk_count INTEGER NOT NULL,
                ingested_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ingestions_sha ON ingestions(content_sha256);
            CREATE INDEX IF NOT EXISTS idx_ingestions_source ON ingestions(source);",
        )?;

        tracing::debug!("Ingestion ledger initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 수집 기록 추가
    pub fn record(&self, source: &str, content_sha256: &str, chunk_count: usize) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO ingestions (source, content_sha256, chunk_count, ingested_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![source, content_sha256, chunk_count as i64, now],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// 같은 내용의 이전 수집 기록
    pub fn find_by_digest(&self, content_sha256: &str) -> Result<Vec<IngestRecord>, StoreError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, source, content_sha256, chunk_count, ingested_at FROM ingestions
             WHERE content_sha256 = ?1
             ORDER BY id",
        )?;

        let records = stmt
            .query_map(params![content_sha256], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// 최근 기록 목록
    pub fn list(&self, limit: usize) -> Result<Vec<IngestRecord>, StoreError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, source, content_sha256, chunk_count, ingested_at FROM ingestions
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let records = stmt
            .query_map(params![limit as i64], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// 문서 기록 삭제
    pub fn forget_source(&self, source: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM ingestions WHERE source = ?1", params![source])?;
        Ok(rows)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<IngestRecord> {
    Ok(IngestRecord {
        id: row.get(0)?,
        source: row.get(1)?,
        content_sha256: row.get(2)?,
        chunk_count: row.get::<_, i64>(3)? as usize,
        ingested_at: parse_datetime(row.get::<_, String>(4)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// 페이지 내용의 SHA-256 (페이지 인덱스 포함)
pub fn content_digest(pages: &[PageText]) -> String {
    let mut hasher = Sha256::new();
    for page in pages {
        hasher.update((page.index as u64).to_le_bytes());
        hasher.update((page.text.len() as u64).to_le_bytes());
        hasher.update(page.text.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Tests
// ============================================================================
