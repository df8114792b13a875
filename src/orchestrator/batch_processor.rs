//! 批量批改处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量作文的调度和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：创建模型客户端、文档缓存、用量守卫，启动过期清理任务
//! 2. **批量加载**：扫描并加载所有待批改的任务（`Vec<GradingJob>`）
//! 3. **并发控制**：使用 Semaphore 限制同时批改的数量
//! 4. **结果落盘**：每个任务的结果（或错误）写成 JSON
//! 5. **全局统计**：汇总所有任务的处理结果

use crate::config::Config;
use crate::error::{ErrorBody, GradingError};
use crate::infrastructure::{Clock, SystemClock};
use crate::models::grade::GradeResponse;
use crate::models::loaders::{self, GradingJob};
use crate::services::{
    spawn_sweeper, DocumentCache, GradingModel, InMemoryDocumentCache, InMemoryUsageGuard,
    OpenAiGradingModel,
};
use crate::utils::logging;
use crate::workflow::{GradingFlow, GradingPolicy};
use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// 单个任务的落盘结果
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobReport {
    Graded { job: String, result: GradeResponse },
    Failed { job: String, error: ErrorBody },
}

impl JobReport {
    pub fn is_graded(&self) -> bool {
        matches!(self, JobReport::Graded { .. })
    }

    fn summary_line(&self) -> String {
        match self {
            JobReport::Graded { job, result } => format!(
                "[{}] ✅ {}/{} ({:.1}%, {})",
                job, result.score, result.max_score, result.percentage, result.letter_grade
            ),
            JobReport::Failed { job, error } => {
                format!("[{}] ❌ {:?}: {}", job, error.kind, error.message)
            }
        }
    }
}

/// 批改单个任务：先上传文档（如有），再提交批改，最后释放文档组
pub async fn grade_job<M: GradingModel>(flow: &GradingFlow<M>, job: &GradingJob) -> Result<JobReport> {
    let name = job.name();

    let document_set_id = if job.documents.is_empty() {
        None
    } else {
        let uploads = loaders::load_job_documents(job).await?;
        match flow.upload_documents(uploads) {
            Ok(created) => {
                info!(
                    "[{}] 📎 上传 {} 份文档，文档组 {}",
                    name, created.count, created.document_set_id
                );
                Some(created.document_set_id)
            }
            Err(e) => {
                warn!("[{}] ⚠️ 文档上传失败: {}", name, e);
                return Ok(JobReport::Failed {
                    job: name,
                    error: e.to_body(),
                });
            }
        }
    };

    let outcome: Result<GradeResponse, GradingError> =
        flow.submit(job.to_request(document_set_id.clone())).await;

    if let Some(id) = &document_set_id {
        flow.delete_documents(id);
    }

    Ok(match outcome {
        Ok(result) => JobReport::Graded { job: name, result },
        Err(e) => JobReport::Failed {
            job: name,
            error: e.to_body(),
        },
    })
}

/// 写出任务结果 JSON
pub async fn write_report(job: &GradingJob, report: &JobReport) -> Result<()> {
    let path = job.result_path();
    let json = serde_json::to_string_pretty(report)?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("无法写入结果文件: {}", path.display()))?;
    Ok(())
}

/// 应用主结构
pub struct App {
    config: Config,
    flow: Arc<GradingFlow<OpenAiGradingModel>>,
    sweeper: JoinHandle<()>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        // 初始化日志文件
        logging::init_log_file(&config.output_log_file)?;

        logging::log_startup(&config);

        if config.llm_api_key.is_empty() {
            warn!("⚠️ 未设置 LLM_API_KEY，模型调用将会失败");
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ttl = TimeDelta::try_seconds(config.document_ttl_secs as i64)
            .context("document_ttl_secs 超出范围")?;
        let cache: Arc<dyn DocumentCache> = Arc::new(
            InMemoryDocumentCache::with_ttl(clock.clone(), ttl)
                .with_max_document_bytes(config.max_document_bytes),
        );
        let guard = Arc::new(InMemoryUsageGuard::new(clock, config.usage_limits));

        let sweeper = spawn_sweeper(
            cache.clone(),
            Duration::from_secs(config.sweep_interval_secs.max(1)),
        );

        let flow = GradingFlow::new(
            OpenAiGradingModel::new(&config),
            cache,
            guard,
            GradingPolicy::from_config(&config),
        );

        Ok(Self {
            config,
            flow: Arc::new(flow),
            sweeper,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(self) -> Result<()> {
        info!("\n📁 正在扫描待批改的作文...");
        let jobs = loaders::load_all_jobs(&self.config.jobs_folder).await?;

        if jobs.is_empty() {
            warn!("⚠️ 没有找到待批改的TOML文件，程序结束");
            self.sweeper.abort();
            return Ok(());
        }

        let total = jobs.len();
        let max_concurrent = self.config.max_concurrent_jobs.max(1);
        logging::log_jobs_loaded(total, max_concurrent);

        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let mut handles = Vec::with_capacity(total);

        for job in jobs {
            let permit = semaphore.clone().acquire_owned().await?;
            let flow = self.flow.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let report = grade_job(&flow, &job).await?;
                write_report(&job, &report).await?;
                Ok::<_, anyhow::Error>((job.name(), report))
            });
            handles.push(handle);
        }

        let mut success = 0;
        let mut failed = 0;
        for handle in handles {
            match handle.await {
                Ok(Ok((_, report))) => {
                    if report.is_graded() {
                        success += 1;
                    } else {
                        failed += 1;
                    }
                    self.append_log(&report.summary_line());
                }
                Ok(Err(e)) => {
                    error!("❌ 任务处理出错: {:#}", e);
                    failed += 1;
                }
                Err(e) => {
                    error!("任务执行失败: {}", e);
                    failed += 1;
                }
            }
        }

        logging::log_usage_summary(&self.flow.usage_summary());
        logging::print_final_stats(success, failed, total, &self.config.output_log_file);

        self.sweeper.abort();
        Ok(())
    }

    fn append_log(&self, line: &str) {
        let appended = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.config.output_log_file)
            .and_then(|mut file| writeln!(file, "{}", line));
        if let Err(e) = appended {
            warn!("写入日志文件失败: {}", e);
        }
    }
}
