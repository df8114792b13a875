//! # Essay Grader
//!
//! AP 历史作文（DBQ / LEQ / SAQ）自动批改的编排核心
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 可替换的时钟，所有时间窗口和过期判断都从这里取"现在"
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `rubric_registry` - 评分方案、提示词、输出 schema 与校验
//! - `document_cache` - DBQ 文档组的限时缓存
//! - `usage_guard` - 四个时间窗口的配额守卫
//! - `llm_service` - 结构化输出的模型调用
//! - `text_analysis` - 字数 / 段落统计
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一篇作文"的完整批改流程
//! - `GradingCtx` - 上下文封装（请求编号 + 作文类型）
//! - `GradingFlow` - 流程编排（校验 → 配额 → 文档 → 模型 → 校验输出 → 记账）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批量任务处理器，管理资源和并发
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;
pub mod logger;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{ErrorBody, ErrorKind, GradingError, GradingResult};
pub use infrastructure::{Clock, ManualClock, SystemClock};
pub use models::{EssayType, GradeResponse, GradingRequest, RubricType, SaqParts, SaqType};
pub use orchestrator::App;
pub use services::{
    DocumentCache, GradingModel, InMemoryDocumentCache, InMemoryUsageGuard, OpenAiGradingModel,
    UsageGuard,
};
pub use workflow::{GradingCtx, GradingFlow, GradingPolicy};
