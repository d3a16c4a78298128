//! LanceDB Knowledge Store - 청크 + 벡터 영속 저장소
//!
//! 스키마: `(id, content, source, page_number, embedding[D])`, 코사인 거리.
//! 테이블은 열 때 선언된 차원으로 만들어지고, 기존 테이블의 차원이 다르면
//! 설정 오류(`StoreError::Schema`)로 열기를 거부합니다.
//!
//! 연결(`Connection`)은 저장소가 소유하고 공유하며, 테이블 핸들은 호출마다 열어
//! 호출이 끝나면(성공/실패/취소) 해제됩니다.
//! ref: https://lancedb.github.io/lancedb/

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    UInt32Array,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::index::vector::IvfPqIndexBuilder;
use lancedb::index::Index;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::DistanceType;

use super::vector::{check_dimension, sort_by_distance, Chunk, KnowledgeStore, NewChunk, ScoredChunk};
use crate::error::StoreError;

/// 청크 테이블 이름
const TABLE_NAME: &str = "knowledge_base";

/// 벡터 컬럼 이름
const EMBEDDING_COLUMN: &str = "embedding";

// ============================================================================
// LanceKnowledgeStore
// ============================================================================

/// LanceDB 기반 Knowledge Store
pub struct LanceKnowledgeStore {
    db: Connection,
    uri: String,
    dimension: usize,
}

impl LanceKnowledgeStore {
    /// 저장소 열기 (테이블이 없으면 생성)
    ///
    /// # Arguments
    /// * `uri` - LanceDB 연결 문자열 (로컬 경로, s3:// 등)
    /// * `dimension` - 스키마 차원 D
    pub async fn open(uri: &str, dimension: usize) -> Result<Self, StoreError> {
        if dimension == 0 || i32::try_from(dimension).is_err() {
            return Err(StoreError::Schema {
                expected: dimension,
                actual: 0,
            });
        }

        // 로컬 경로면 부모 디렉토리 생성
        if !uri.contains("://") {
            if let Some(parent) = Path::new(uri).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| StoreError::Connection(format!("{}: {}", parent.display(), e)))?;
                }
            }
        }

        let db = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| StoreError::Connection(format!("{uri}: {e}")))?;

        let store = Self {
            db,
            uri: uri.to_string(),
            dimension,
        };
        store.ensure_table().await?;

        tracing::debug!("Knowledge store opened at {} (dimension: {})", uri, dimension);
        Ok(store)
    }

    /// 연결 문자열
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// 테이블 스키마
    fn schema(&self) -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("page_number", DataType::UInt32, false),
            Field::new(
                EMBEDDING_COLUMN,
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                false,
            ),
        ]))
    }

    /// 테이블 생성 또는 기존 테이블 차원 검증
    async fn ensure_table(&self) -> Result<(), StoreError> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        if !names.iter().any(|n| n == TABLE_NAME) {
            self.db
                .create_empty_table(TABLE_NAME, self.schema())
                .execute()
                .await
                .map_err(|e| StoreError::query("Failed to create table", e))?;
            tracing::info!(
                "Created table {} with {}-dimensional embeddings",
                TABLE_NAME,
                self.dimension
            );
            return Ok(());
        }

        let table = self.table().await?;
        let schema = table
            .schema()
            .await
            .map_err(|e| StoreError::query("Failed to read table schema", e))?;

        let declared = schema
            .field_with_name(EMBEDDING_COLUMN)
            .ok()
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            })
            .ok_or_else(|| {
                StoreError::Query(format!("table {TABLE_NAME} has no fixed-size embedding column"))
            })?;

        if declared != self.dimension {
            return Err(StoreError::Schema {
                expected: self.dimension,
                actual: declared,
            });
        }
        Ok(())
    }

    /// 호출 단위 테이블 핸들
    async fn table(&self) -> Result<lancedb::table::Table, StoreError> {
        self.db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| StoreError::Connection(format!("open table {TABLE_NAME}: {e}")))
    }

    /// 청크들을 Arrow RecordBatch로 변환 (ID 부여)
    fn chunks_to_batch(&self, source: &str, chunks: &[NewChunk]) -> Result<RecordBatch, StoreError> {
        let ids: Vec<String> = chunks
            .iter()
            .map(|_| uuid::Uuid::new_v4().to_string())
            .collect();
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let sources: Vec<&str> = chunks.iter().map(|_| source).collect();
        let pages: Vec<u32> = chunks.iter().map(|c| c.page_number).collect();

        let embeddings_flat: Vec<f32> = chunks
            .iter()
            .flat_map(|c| c.embedding.iter().copied())
            .collect();
        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .map_err(|e| StoreError::query("Failed to create embedding array", e))?;

        RecordBatch::try_new(
            self.schema(),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(sources)),
                Arc::new(UInt32Array::from(pages)),
                Arc::new(embeddings),
            ],
        )
        .map_err(|e| StoreError::query("Failed to create RecordBatch", e))
    }

    /// 코사인 IVF-PQ 인덱스 생성
    ///
    /// 학습에 충분한 행이 필요합니다 (수백 건 이상).
    pub async fn create_index(&self) -> Result<(), StoreError> {
        let table = self.table().await?;
        table
            .create_index(
                &[EMBEDDING_COLUMN],
                Index::IvfPq(IvfPqIndexBuilder::default().distance_type(DistanceType::Cosine)),
            )
            .execute()
            .await
            .map_err(|e| StoreError::query("Failed to create vector index", e))?;

        tracing::info!("Created cosine IVF-PQ index on {}.{}", TABLE_NAME, EMBEDDING_COLUMN);
        Ok(())
    }
}

/// SQL 문자열 리터럴 이스케이프
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, StoreError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| StoreError::Query(format!("Missing {name} column")))
}

/// 검색 결과 배치를 ScoredChunk로 변환
fn batch_to_scored(batch: &RecordBatch) -> Result<Vec<ScoredChunk>, StoreError> {
    let ids = string_column(batch, "id")?;
    let contents = string_column(batch, "content")?;
    let sources = string_column(batch, "source")?;
    let pages = batch
        .column_by_name("page_number")
        .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
        .ok_or_else(|| StoreError::Query("Missing page_number column".to_string()))?;
    let embeddings = batch
        .column_by_name(EMBEDDING_COLUMN)
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .ok_or_else(|| StoreError::Query("Missing embedding column".to_string()))?;
    // _distance 컬럼 (LanceDB가 자동 추가)
    let distances = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .ok_or_else(|| StoreError::Query("Missing _distance column".to_string()))?;

    let mut results = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let values = embeddings.value(i);
        let embedding = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .map(|v| v.values().to_vec())
            .ok_or_else(|| StoreError::Query("embedding is not f32".to_string()))?;

        results.push(ScoredChunk {
            chunk: Chunk {
                id: ids.value(i).to_string(),
                content: contents.value(i).to_string(),
                source: sources.value(i).to_string(),
                page_number: pages.value(i),
                embedding,
            },
            distance: distances.value(i),
        });
    }
    Ok(results)
}

#[async_trait]
impl KnowledgeStore for LanceKnowledgeStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn insert(&self, source: &str, chunks: Vec<NewChunk>) -> Result<usize, StoreError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        // 하나라도 잘못되면 아무것도 쓰지 않음
        for chunk in &chunks {
            check_dimension(self.dimension, &chunk.embedding)?;
            if chunk.content.trim().is_empty() {
                return Err(StoreError::Query("chunk content is empty".to_string()));
            }
        }

        let batch = self.chunks_to_batch(source, &chunks)?;
        let schema = batch.schema();
        let table = self.table().await?;

        // 단일 배치 추가 = 단일 커밋
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(batches)
            .execute()
            .await
            .map_err(|e| StoreError::query("Failed to add chunks to table", e))?;

        tracing::info!("Inserted {} chunks for source {}", chunks.len(), source);
        Ok(chunks.len())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        source_filter: Option<&str>,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        check_dimension(self.dimension, query)?;
        if top_k == 0 {
            return Ok(vec![]);
        }

        let table = self.table().await?;

        let mut vector_query = table
            .vector_search(query.to_vec())
            .map_err(|e| StoreError::query("Failed to create vector search", e))?
            .column(EMBEDDING_COLUMN)
            .distance_type(DistanceType::Cosine)
            .limit(top_k);

        // 필터는 순위 계산 전에 적용 (prefilter)
        if let Some(source) = source_filter {
            vector_query = vector_query.only_if(format!("source = {}", sql_literal(source)));
        }

        let batches: Vec<RecordBatch> = vector_query
            .execute()
            .await
            .map_err(|e| StoreError::query("Failed to execute vector search", e))?
            .try_collect()
            .await
            .map_err(|e| StoreError::query("Failed to read search results", e))?;

        let mut results = Vec::new();
        for batch in &batches {
            results.extend(batch_to_scored(batch)?);
        }
        sort_by_distance(&mut results);
        results.truncate(top_k);

        Ok(results)
    }

    async fn list_distinct_sources(&self) -> Result<BTreeSet<String>, StoreError> {
        let table = self.table().await?;

        let batches: Vec<RecordBatch> = table
            .query()
            .select(Select::columns(&["source"]))
            .execute()
            .await
            .map_err(|e| StoreError::query("Failed to query sources", e))?
            .try_collect()
            .await
            .map_err(|e| StoreError::query("Failed to read sources", e))?;

        let mut sources = BTreeSet::new();
        for batch in &batches {
            let column = string_column(batch, "source")?;
            sources.extend((0..column.len()).map(|i| column.value(i).to_string()));
        }
        Ok(sources)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let table = self.table().await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| StoreError::query("Failed to count rows", e))
    }

    async fn delete_source(&self, source: &str) -> Result<usize, StoreError> {
        let table = self.table().await?;
        let filter = format!("source = {}", sql_literal(source));

        let matching = table
            .count_rows(Some(filter.clone()))
            .await
            .map_err(|e| StoreError::query("Failed to count rows for source", e))?;
        if matching == 0 {
            return Ok(0);
        }

        table
            .delete(&filter)
            .await
            .map_err(|e| StoreError::query("Failed to delete chunks", e))?;

        tracing::info!("Deleted {} chunks for source {}", matching, source);
        Ok(matching)
    }
}

// ============================================================================
// Tests
// ============================================================================
