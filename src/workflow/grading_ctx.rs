//! 批改上下文
//!
//! 封装"我正在批改哪一份请求"这一信息，用作日志前缀

use std::fmt::Display;
use uuid::Uuid;

use crate::models::essay::{EssayType, GradingRequest};

/// 批改上下文
#[derive(Debug, Clone)]
pub struct GradingCtx {
    /// 请求编号（仅用于日志关联）
    pub request_id: String,

    pub essay_type: EssayType,

    /// 是否附带文档组
    pub has_documents: bool,
}

impl GradingCtx {
    /// 为一次提交创建上下文
    pub fn new(request: &GradingRequest) -> Self {
        let mut request_id = Uuid::new_v4().simple().to_string();
        request_id.truncate(8);
        Self {
            request_id,
            essay_type: request.essay_type,
            has_documents: request.document_set_id.is_some(),
        }
    }
}

impl Display for GradingCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_documents {
            write!(f, "[批改 #{} {} +文档]", self.request_id, self.essay_type)
        } else {
            write!(f, "[批改 #{} {}]", self.request_id, self.essay_type)
        }
    }
}
