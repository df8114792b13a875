use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::essay::{EssayType, RubricType};
use crate::models::usage::UsageWindow;

/// 批改错误
///
/// 每个变体对应一个对外可区分的 `ErrorKind`，调用方依据 kind 决定给用户的提示。
#[derive(Debug, Error)]
pub enum GradingError {
    /// 请求形状或长度不合法
    #[error("请求校验失败: {0}")]
    Validation(#[from] ValidationError),
    /// 文档上传不合法
    #[error("文档上传校验失败: {0}")]
    DocumentUpload(#[from] DocumentUploadError),
    /// 配额已用尽
    #[error("{0}")]
    QuotaExceeded(#[from] QuotaExceeded),
    /// 文档组不存在
    #[error("文档组不存在: {id}")]
    DocumentSetNotFound { id: String },
    /// 文档组已过期
    #[error("文档组 {id} 已于 {expired_at} 过期")]
    DocumentSetExpired {
        id: String,
        expired_at: DateTime<Utc>,
    },
    /// 作文类型与评分方案组合非法
    #[error("配置错误: {0}")]
    Configuration(#[from] ConfigurationError),
    /// AI 服务调用失败
    #[error("AI 服务调用失败 ({class}, 共尝试 {attempts} 次): {message}")]
    AiProvider {
        class: ProviderErrorClass,
        attempts: u32,
        message: String,
    },
    /// AI 返回内容违反自身声明的结构
    #[error("AI 输出结构不符: {0}")]
    SchemaMismatch(#[from] SchemaViolation),
}

/// 请求校验错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("题目不能为空")]
    EmptyPrompt,
    #[error("{essay_type} 请求缺少 essay_text")]
    MissingEssayText { essay_type: EssayType },
    #[error("{essay_type} 请求不应包含 saq_parts")]
    UnexpectedSaqParts { essay_type: EssayType },
    #[error("SAQ 请求缺少 saq_parts")]
    MissingSaqParts,
    #[error("SAQ 请求不应包含 essay_text")]
    UnexpectedEssayText,
    #[error("SAQ 小问 {part} 不能为空")]
    EmptySaqPart { part: &'static str },
    #[error("saq_type 只适用于 SAQ，当前为 {essay_type}")]
    SaqTypeNotAllowed { essay_type: EssayType },
    #[error("document_set_id 只适用于 DBQ，当前为 {essay_type}")]
    DocumentSetNotAllowed { essay_type: EssayType },
    #[error("作文过短: {words} 词，{essay_type} 至少需要 {min} 词")]
    TooShort {
        essay_type: EssayType,
        words: usize,
        min: usize,
    },
    #[error("作文过长: {words} 词，{essay_type} 最多允许 {max} 词")]
    TooLong {
        essay_type: EssayType,
        words: usize,
        max: usize,
    },
}

/// 文档上传错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentUploadError {
    #[error("文档数量必须为 {expected}，实际为 {actual}")]
    WrongCount { expected: usize, actual: usize },
    #[error("文档 {doc_num} 的格式不受支持: {content_type}")]
    UnsupportedFormat { doc_num: usize, content_type: String },
    #[error("文档 {doc_num} 的内容与声明的格式 {declared} 不一致")]
    FormatMismatch { doc_num: usize, declared: String },
    #[error("文档 {doc_num} 大小 {size} 字节，超过上限 {max} 字节")]
    TooLarge { doc_num: usize, size: usize, max: usize },
    #[error("文档 {doc_num} 为空")]
    Empty { doc_num: usize },
}

/// 文档组查询错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentLookupError {
    #[error("文档组不存在: {id}")]
    NotFound { id: String },
    #[error("文档组 {id} 已于 {expired_at} 过期")]
    Expired {
        id: String,
        expired_at: DateTime<Utc>,
    },
}

/// 配额拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("配额已用尽 ({window})，将于 {resets_at} 重置")]
pub struct QuotaExceeded {
    pub window: UsageWindow,
    pub resets_at: DateTime<Utc>,
}

/// 配置错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("{essay_type} 不支持评分方案 {rubric_type}")]
    IllegalRubric {
        essay_type: EssayType,
        rubric_type: RubricType,
    },
}

/// AI 输出违反结构约束
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    #[error("输出不是合法 JSON: {message}")]
    MalformedJson { message: String },
    #[error("缺少字段 {path}")]
    MissingField { path: String },
    #[error("字段 {path} 类型错误，应为 {expected}")]
    WrongType { path: String, expected: &'static str },
    #[error("评分项 {item} 的反馈为空")]
    EmptyFeedback { item: &'static str },
    #[error("评分项 {item} 得分 {score} 超出 [0, {max_score}]")]
    ScoreOutOfRange {
        item: &'static str,
        score: i64,
        max_score: i64,
    },
    #[error("评分项 {item} 满分应为 {expected}，实际为 {actual}")]
    MaxScoreMismatch {
        item: &'static str,
        expected: u32,
        actual: i64,
    },
    #[error("总满分应为 {expected}，实际为 {actual}")]
    TotalMaxScoreMismatch { expected: u32, actual: i64 },
    #[error("总分 {reported} 与各项得分之和 {sum} 不一致")]
    ScoreSumMismatch { reported: i64, sum: i64 },
}

/// AI 服务错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorClass {
    /// 网络、5xx、超时，可重试
    Transient,
    /// 鉴权失败、参数错误等，不重试
    Fatal,
}

impl std::fmt::Display for ProviderErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderErrorClass::Transient => f.write_str("transient"),
            ProviderErrorClass::Fatal => f.write_str("fatal"),
        }
    }
}

/// `GradingModel` 返回的错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("临时错误: {0}")]
    Transient(String),
    #[error("致命错误: {0}")]
    Fatal(String),
    /// 返回了内容，但无法解析为 JSON
    #[error("输出格式错误: {0}")]
    Malformed(String),
}

// ========== 对外错误类型 ==========

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    QuotaExceeded,
    DocumentSetNotFound,
    DocumentSetExpired,
    Configuration,
    AiProvider,
    SchemaMismatch,
}

/// 序列化给 API 层的错误体
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<UsageWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_class: Option<ProviderErrorClass>,
}

const SERVICE_UNAVAILABLE_MESSAGE: &str = "Grading service temporarily unavailable. Please try again later.";

impl GradingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GradingError::Validation(_) | GradingError::DocumentUpload(_) => ErrorKind::Validation,
            GradingError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            GradingError::DocumentSetNotFound { .. } => ErrorKind::DocumentSetNotFound,
            GradingError::DocumentSetExpired { .. } => ErrorKind::DocumentSetExpired,
            GradingError::Configuration(_) => ErrorKind::Configuration,
            GradingError::AiProvider { .. } => ErrorKind::AiProvider,
            GradingError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
        }
    }

    /// 用户可通过修改请求或稍后重试自行解决
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation
                | ErrorKind::QuotaExceeded
                | ErrorKind::DocumentSetNotFound
                | ErrorKind::DocumentSetExpired
        )
    }

    /// 面向用户的提示；服务端问题统一使用笼统措辞
    pub fn user_message(&self) -> String {
        match self {
            GradingError::Validation(e) => match e {
                ValidationError::TooShort { essay_type, words, min } => format!(
                    "Your {} response is too short ({} words). Please write at least {} words.",
                    essay_type, words, min
                ),
                ValidationError::TooLong { essay_type, words, max } => format!(
                    "Your {} response is too long ({} words). Please keep it under {} words.",
                    essay_type, words, max
                ),
                ValidationError::EmptyPrompt => "Please provide the essay prompt.".to_string(),
                ValidationError::MissingEssayText { essay_type } => {
                    format!("Please provide your {} essay text.", essay_type)
                }
                ValidationError::MissingSaqParts => {
                    "Please provide answers for parts A, B and C.".to_string()
                }
                ValidationError::EmptySaqPart { part } => {
                    format!("Please provide an answer for {}.", part.replace('_', " "))
                }
                ValidationError::UnexpectedSaqParts { essay_type } => format!(
                    "A {} request must not include SAQ part answers.",
                    essay_type
                ),
                ValidationError::UnexpectedEssayText => {
                    "An SAQ request must not include essay text.".to_string()
                }
                ValidationError::SaqTypeNotAllowed { essay_type } => {
                    format!("An SAQ type cannot be set on a {} request.", essay_type)
                }
                ValidationError::DocumentSetNotAllowed { essay_type } => format!(
                    "Document sets can only be attached to DBQ requests, not {}.",
                    essay_type
                ),
            },
            GradingError::DocumentUpload(e) => match e {
                DocumentUploadError::WrongCount { expected, actual } => format!(
                    "Please upload exactly {} documents ({} received).",
                    expected, actual
                ),
                DocumentUploadError::TooLarge { doc_num, max, .. } => format!(
                    "Document {} is larger than {} MB.",
                    doc_num,
                    max / (1024 * 1024)
                ),
                DocumentUploadError::UnsupportedFormat { doc_num, .. }
                | DocumentUploadError::FormatMismatch { doc_num, .. } => {
                    format!("Document {} must be a JPEG or PNG image.", doc_num)
                }
                DocumentUploadError::Empty { doc_num } => {
                    format!("Document {} is empty.", doc_num)
                }
            },
            GradingError::QuotaExceeded(q) => format!(
                "Usage limit reached ({}). Try again after {}.",
                q.window,
                q.resets_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            GradingError::DocumentSetNotFound { .. } => {
                "Document set not found. Please check the document set id.".to_string()
            }
            GradingError::DocumentSetExpired { .. } => {
                "Your uploaded documents have expired. Please re-upload them and try again."
                    .to_string()
            }
            GradingError::Configuration(_)
            | GradingError::AiProvider { .. }
            | GradingError::SchemaMismatch(_) => SERVICE_UNAVAILABLE_MESSAGE.to_string(),
        }
    }

    /// 转换为 API 层错误体
    pub fn to_body(&self) -> ErrorBody {
        let (window, retry_at) = match self {
            GradingError::QuotaExceeded(q) => (Some(q.window), Some(q.resets_at)),
            _ => (None, None),
        };
        let provider_class = match self {
            GradingError::AiProvider { class, .. } => Some(*class),
            _ => None,
        };
        ErrorBody {
            kind: self.kind(),
            message: self.user_message(),
            window,
            retry_at,
            provider_class,
        }
    }
}

impl From<DocumentLookupError> for GradingError {
    fn from(err: DocumentLookupError) -> Self {
        match err {
            DocumentLookupError::NotFound { id } => GradingError::DocumentSetNotFound { id },
            DocumentLookupError::Expired { id, expired_at } => {
                GradingError::DocumentSetExpired { id, expired_at }
            }
        }
    }
}

// ========== 便捷构造函数 ==========

impl GradingError {
    /// 创建 AI 服务错误
    pub fn provider(class: ProviderErrorClass, attempts: u32, message: impl Into<String>) -> Self {
        GradingError::AiProvider {
            class,
            attempts,
            message: message.into(),
        }
    }
}

// ========== Result 类型别名 ==========

/// 批改结果类型
pub type GradingResult<T> = Result<T, GradingError>;
