//! 설정 모듈
//!
//! 환경변수에서 엔진 설정을 읽습니다. CLI 플래그가 개별 값을 덮어씁니다.
//! 데이터 위치: ~/.palank-docqa/

use std::path::PathBuf;

use crate::error::ConfigError;

/// bge-large-zh-v1.5 출력 차원 (스키마 차원 D)
pub const DEFAULT_DIMENSION: usize = 1024;

/// 기본 검색 결과 수
pub const DEFAULT_TOP_K: usize = 3;

/// bge 계열 모델의 검색용 쿼리 instruction (문서에는 붙이지 않음)
/// source: https://huggingface.co/BAAI/bge-large-zh-v1.5
pub const DEFAULT_QUERY_INSTRUCTION: &str = "为这个句子生成表示以用于检索相关文章：";

const DEFAULT_EMBEDDING_URL: &str = "http://127.0.0.1:8080/v1/embeddings";
const DEFAULT_EMBEDDING_MODEL: &str = "BAAI/bge-large-zh-v1.5";
const DEFAULT_LLM_BASE_URL: &str = "https://api.deepseek.com";
const DEFAULT_LLM_MODEL: &str = "deepseek-chat";

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.palank-docqa/)
///
/// `DOCQA_HOME`이 설정되어 있으면 우선 사용합니다.
pub fn get_data_dir() -> PathBuf {
    if let Some(home) = non_empty_var("DOCQA_HOME") {
        return PathBuf::from(home);
    }

    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".palank-docqa")
}

// ============================================================================
// Types
// ============================================================================

/// 임베딩 프로바이더 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// OpenAI 호환 /v1/embeddings 엔드포인트
    Http,
    /// 오프라인 해싱 임베딩 (테스트/폐쇄망용)
    Hashing,
}

impl EmbeddingBackend {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "hashing" | "hash" => Ok(Self::Hashing),
            _ => Err(ConfigError::Invalid {
                key: "EMBEDDING_PROVIDER".to_string(),
                value: value.to_string(),
            }),
        }
    }
}

/// 임베딩 설정
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimension: usize,
    pub query_instruction: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Http,
            api_url: DEFAULT_EMBEDDING_URL.to_string(),
            api_key: None,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
            query_instruction: DEFAULT_QUERY_INSTRUCTION.to_string(),
        }
    }
}

/// 언어 모델 설정
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_LLM_MODEL.to_string(),
        }
    }
}

/// 엔진 전체 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// LanceDB 연결 문자열 (로컬 경로 또는 s3:// 등)
    pub store_uri: String,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub top_k: usize,
}

impl Config {
    /// 데이터 디렉토리 기준 기본 설정
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        let store_uri = data_dir.join("knowledge.lance").to_string_lossy().into_owned();
        Self {
            data_dir,
            store_uri,
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            top_k: DEFAULT_TOP_K,
        }
    }

    /// 데이터 디렉토리 변경 (저장소 경로도 함께 이동)
    pub fn relocate(&mut self, data_dir: PathBuf) {
        self.store_uri = data_dir.join("knowledge.lance").to_string_lossy().into_owned();
        self.data_dir = data_dir;
    }

    /// 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::with_data_dir(get_data_dir());

        if let Some(uri) = non_empty_var("DOCQA_STORE_URI") {
            config.store_uri = uri;
        }
        if let Some(top_k) = non_empty_var("DOCQA_TOP_K") {
            config.top_k = parse_positive("DOCQA_TOP_K", &top_k)?;
        }

        // 임베딩
        if let Some(backend) = non_empty_var("EMBEDDING_PROVIDER") {
            config.embedding.backend = EmbeddingBackend::parse(&backend)?;
        }
        if let Some(url) = non_empty_var("EMBEDDING_API_URL") {
            config.embedding.api_url = url;
        }
        config.embedding.api_key = non_empty_var("EMBEDDING_API_KEY");
        if let Some(model) = non_empty_var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Some(dim) = non_empty_var("EMBEDDING_DIMENSION") {
            config.embedding.dimension = parse_positive("EMBEDDING_DIMENSION", &dim)?;
        }
        if let Some(instruction) = non_empty_var("EMBEDDING_QUERY_INSTRUCTION") {
            config.embedding.query_instruction = instruction;
        }

        // 언어 모델 (우선순위: DEEPSEEK_API_KEY > LLM_API_KEY)
        config.generation.api_key =
            non_empty_var("DEEPSEEK_API_KEY").or_else(|| non_empty_var("LLM_API_KEY"));
        if let Some(url) = non_empty_var("LLM_BASE_URL") {
            config.generation.base_url = url;
        }
        if let Some(model) = non_empty_var("LLM_MODEL") {
            config.generation.model = model;
        }

        Ok(config)
    }

    /// 언어 모델 API 키 (없으면 에러)
    pub fn require_llm_api_key(&self) -> Result<&str, ConfigError> {
        self.generation.api_key.as_deref().ok_or_else(|| {
            ConfigError::Missing("DEEPSEEK_API_KEY or LLM_API_KEY".to_string())
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_positive(key: &str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================
