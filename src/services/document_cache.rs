//! 文档组缓存 - 业务能力层
//!
//! 临时保存 DBQ 的 7 张文档图片，调用方只持有 id。
//!
//! - 创建是原子的：校验全部通过后才写入，失败不留下任何痕迹
//! - 过期在每次 `get` 时惰性判断，后台清理只用于回收内存
//! - 过期被发现后文档组立即删除，并留下墓碑，之后的查询仍返回"已过期"而不是"不存在"

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DocumentLookupError, DocumentUploadError};
use crate::infrastructure::Clock;
use crate::models::document::{
    Document, DocumentSet, DocumentSetCreated, DocumentUpload, ImageFormat, DOCUMENTS_PER_SET,
    MAX_DOCUMENT_BYTES,
};

/// 文档组默认存活时间（2 小时）
pub const DEFAULT_DOCUMENT_TTL: TimeDelta = TimeDelta::hours(2);

/// 文档组缓存
pub trait DocumentCache: Send + Sync {
    /// 校验并保存一组文档
    fn create(&self, uploads: Vec<DocumentUpload>) -> Result<DocumentSetCreated, DocumentUploadError>;

    /// 读取文档组
    fn get(&self, id: &str) -> Result<Arc<DocumentSet>, DocumentLookupError>;

    /// 删除文档组，不存在时同样视为成功
    fn delete(&self, id: &str);

    /// 清理过期文档组和陈旧墓碑，返回清理的文档组数量
    fn sweep(&self) -> usize;

    /// 当前保存的文档组数量（含尚未被发现的过期组）
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct CacheState {
    sets: HashMap<String, Arc<DocumentSet>>,
    /// id → 过期时间
    tombstones: HashMap<String, DateTime<Utc>>,
}

impl CacheState {
    /// 记录过期 id，同时清掉超过一个 TTL 的旧墓碑
    fn bury(&mut self, id: &str, expired_at: DateTime<Utc>, now: DateTime<Utc>, ttl: TimeDelta) {
        self.sets.remove(id);
        self.tombstones.insert(id.to_string(), expired_at);
        self.prune_tombstones(now, ttl);
    }

    fn prune_tombstones(&mut self, now: DateTime<Utc>, ttl: TimeDelta) {
        self.tombstones.retain(|_, expired_at| now <= *expired_at + ttl);
    }
}

/// 内存实现
#[derive(Debug)]
pub struct InMemoryDocumentCache {
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    max_document_bytes: usize,
    state: RwLock<CacheState>,
}

impl InMemoryDocumentCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(clock, DEFAULT_DOCUMENT_TTL)
    }

    pub fn with_ttl(clock: Arc<dyn Clock>, ttl: TimeDelta) -> Self {
        Self {
            clock,
            ttl,
            max_document_bytes: MAX_DOCUMENT_BYTES,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// 调整单文档大小上限
    pub fn with_max_document_bytes(mut self, max_document_bytes: usize) -> Self {
        self.max_document_bytes = max_document_bytes;
        self
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// 校验整组上传，全部合法时返回每个文档的格式
pub fn validate_uploads(
    uploads: &[DocumentUpload],
    max_document_bytes: usize,
) -> Result<Vec<ImageFormat>, DocumentUploadError> {
    if uploads.len() != DOCUMENTS_PER_SET {
        return Err(DocumentUploadError::WrongCount {
            expected: DOCUMENTS_PER_SET,
            actual: uploads.len(),
        });
    }

    uploads
        .iter()
        .enumerate()
        .map(|(idx, upload)| {
            let doc_num = idx + 1;
            let format = ImageFormat::from_mime(&upload.content_type).ok_or_else(|| {
                DocumentUploadError::UnsupportedFormat {
                    doc_num,
                    content_type: upload.content_type.clone(),
                }
            })?;
            if upload.bytes.is_empty() {
                return Err(DocumentUploadError::Empty { doc_num });
            }
            if upload.bytes.len() > max_document_bytes {
                return Err(DocumentUploadError::TooLarge {
                    doc_num,
                    size: upload.bytes.len(),
                    max: max_document_bytes,
                });
            }
            if !format.matches_magic(&upload.bytes) {
                return Err(DocumentUploadError::FormatMismatch {
                    doc_num,
                    declared: upload.content_type.clone(),
                });
            }
            Ok(format)
        })
        .collect()
}

impl DocumentCache for InMemoryDocumentCache {
    fn create(&self, uploads: Vec<DocumentUpload>) -> Result<DocumentSetCreated, DocumentUploadError> {
        let formats = validate_uploads(&uploads, self.max_document_bytes)?;

        let created_at = self.clock.now();
        let expires_at = created_at + self.ttl;
        let id = Uuid::new_v4().to_string();

        let documents: Vec<Document> = uploads
            .into_iter()
            .zip(formats)
            .enumerate()
            .map(|(idx, (upload, format))| Document {
                doc_num: (idx + 1) as u8,
                format,
                size_bytes: upload.bytes.len(),
                bytes: upload.bytes,
            })
            .collect();
        let count = documents.len();

        let set = Arc::new(DocumentSet {
            id: id.clone(),
            documents,
            created_at,
            expires_at,
        });
        let total_bytes = set.total_bytes();

        self.write_state().sets.insert(id.clone(), set);

        info!(
            "📁 文档组已创建: {} ({} 个文档, 共 {} 字节, 过期时间 {})",
            id, count, total_bytes, expires_at
        );

        Ok(DocumentSetCreated {
            document_set_id: id,
            count,
            expires_at,
        })
    }

    fn get(&self, id: &str) -> Result<Arc<DocumentSet>, DocumentLookupError> {
        let now = self.clock.now();

        {
            let state = self.read_state();
            match state.sets.get(id) {
                Some(set) if !set.is_expired(now) => return Ok(Arc::clone(set)),
                Some(_) => {}
                None => {
                    return Err(match state.tombstones.get(id) {
                        Some(expired_at) => DocumentLookupError::Expired {
                            id: id.to_string(),
                            expired_at: *expired_at,
                        },
                        None => DocumentLookupError::NotFound { id: id.to_string() },
                    });
                }
            }
        }

        // 已过期：升级为写锁后重新判断，避免与并发的 delete 冲突
        let mut state = self.write_state();
        match state.sets.get(id).map(|set| (set.is_expired(now), set.expires_at)) {
            Some((false, _)) => state
                .sets
                .get(id)
                .map(Arc::clone)
                .ok_or_else(|| DocumentLookupError::NotFound { id: id.to_string() }),
            Some((true, expired_at)) => {
                state.bury(id, expired_at, now, self.ttl);
                debug!("文档组 {} 已过期，惰性删除", id);
                Err(DocumentLookupError::Expired {
                    id: id.to_string(),
                    expired_at,
                })
            }
            None => Err(match state.tombstones.get(id) {
                Some(expired_at) => DocumentLookupError::Expired {
                    id: id.to_string(),
                    expired_at: *expired_at,
                },
                None => DocumentLookupError::NotFound { id: id.to_string() },
            }),
        }
    }

    fn delete(&self, id: &str) {
        let mut state = self.write_state();
        let removed = state.sets.remove(id).is_some();
        state.tombstones.remove(id);
        if removed {
            debug!("文档组 {} 已删除", id);
        }
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.write_state();

        let expired: Vec<(String, DateTime<Utc>)> = state
            .sets
            .values()
            .filter(|set| set.is_expired(now))
            .map(|set| (set.id.clone(), set.expires_at))
            .collect();
        for (id, expired_at) in &expired {
            state.bury(id, *expired_at, now, self.ttl);
        }
        // 墓碑再保留一个 TTL
        state.prune_tombstones(now, self.ttl);

        expired.len()
    }

    fn len(&self) -> usize {
        self.read_state().sets.len()
    }
}

/// 启动后台清理任务
pub fn spawn_sweeper(cache: Arc<dyn DocumentCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // 第一次 tick 立即返回
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = cache.sweep();
            if removed > 0 {
                info!("🧹 清理过期文档组 {} 个，剩余 {} 个", removed, cache.len());
            }
        }
    })
}
