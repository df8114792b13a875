//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量任务的加载与并发调度，是命令行程序的"指挥中心"。
//!
//! ### `batch_processor` - 批量批改处理器
//! - 管理应用生命周期（初始化、运行、清理）
//! - 批量加载批改任务（Vec<GradingJob>）
//! - 控制并发数量（Semaphore）
//! - 持有共享的文档缓存、用量守卫和过期清理任务
//! - 输出全局统计信息
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<GradingJob>)
//!     ↓
//! workflow::GradingFlow (处理单篇作文)
//!     ↓
//! services (能力层：rubric / cache / guard / llm)
//!     ↓
//! infrastructure (基础设施：Clock)
//! ```
//!
//! 编排层只做调度和统计，不做具体的评分判断。

pub mod batch_processor;

// 重新导出主要类型
pub use batch_processor::{grade_job, write_report, App, JobReport};
