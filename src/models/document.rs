use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 每个文档组必须包含的文档数量
pub const DOCUMENTS_PER_SET: usize = 7;

/// 单个文档的大小上限（5 MiB）
pub const MAX_DOCUMENT_BYTES: usize = 5 * 1024 * 1024;

/// 可接受的图片格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// 从声明的 MIME 类型解析
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }

    /// 文件头是否与格式一致
    pub fn matches_magic(self, bytes: &[u8]) -> bool {
        match self {
            ImageFormat::Jpeg => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
            ImageFormat::Png => bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
        }
    }
}

/// 待上传的文档
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    /// 调用方声明的 MIME 类型
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl DocumentUpload {
    pub fn new(content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            bytes,
        }
    }
}

/// 已缓存的文档
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    /// 1..=7
    pub doc_num: u8,
    pub format: ImageFormat,
    pub size_bytes: usize,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// 文档组，创建后不可变
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSet {
    pub id: String,
    pub documents: Vec<Document>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DocumentSet {
    /// 严格晚于 `expires_at` 才算过期
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn total_bytes(&self) -> usize {
        self.documents.iter().map(|d| d.size_bytes).sum()
    }
}

/// `create` 的返回值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSetCreated {
    pub document_set_id: String,
    pub count: usize,
    pub expires_at: DateTime<Utc>,
}
