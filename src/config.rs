use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::models::document::MAX_DOCUMENT_BYTES;
use crate::models::usage::UsageLimits;

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    // --- 模型调用策略 ---
    /// 单次调用超时（秒）
    pub ai_timeout_secs: u64,
    /// 临时错误的额外重试次数
    pub ai_max_retries: u32,
    /// 退避基础间隔（毫秒）
    pub ai_retry_base_delay_ms: u64,
    // --- 配额 ---
    pub usage_limits: UsageLimits,
    // --- 文档缓存 ---
    /// 文档组存活时间（秒）
    pub document_ttl_secs: u64,
    /// 单张图片上限（字节）
    pub max_document_bytes: usize,
    /// 过期清理间隔（秒）
    pub sweep_interval_secs: u64,
    // --- 批量任务 ---
    /// 批改任务 TOML 存放目录
    pub jobs_folder: String,
    /// 同时批改的作文数量
    pub max_concurrent_jobs: usize,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o".to_string(),
            llm_temperature: 0.2,
            llm_max_tokens: 2048,
            ai_timeout_secs: 45,
            ai_max_retries: 2,
            ai_retry_base_delay_ms: 500,
            usage_limits: UsageLimits::default(),
            document_ttl_secs: 2 * 60 * 60,
            max_document_bytes: MAX_DOCUMENT_BYTES,
            sweep_interval_secs: 5 * 60,
            jobs_folder: "grading_jobs".to_string(),
            max_concurrent_jobs: 4,
            verbose_logging: false,
            output_log_file: "grading_log.txt".to_string(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件加载，缺省字段取默认值，再叠加环境变量
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("无法解析配置文件: {}", path.display()))?;
        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(self) -> Self {
        let limits = self.usage_limits;
        Self {
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(self.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(self.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(self.llm_model_name),
            llm_temperature: env_or("LLM_TEMPERATURE", self.llm_temperature),
            llm_max_tokens: env_or("LLM_MAX_TOKENS", self.llm_max_tokens),
            ai_timeout_secs: env_or("AI_TIMEOUT_SECS", self.ai_timeout_secs),
            ai_max_retries: env_or("AI_MAX_RETRIES", self.ai_max_retries),
            ai_retry_base_delay_ms: env_or("AI_RETRY_BASE_DELAY_MS", self.ai_retry_base_delay_ms),
            usage_limits: UsageLimits {
                requests_per_minute: env_or("LIMIT_REQUESTS_PER_MINUTE", limits.requests_per_minute),
                essays_per_hour: env_or("LIMIT_ESSAYS_PER_HOUR", limits.essays_per_hour),
                essays_per_day: env_or("LIMIT_ESSAYS_PER_DAY", limits.essays_per_day),
                words_per_day: env_or("LIMIT_WORDS_PER_DAY", limits.words_per_day),
            },
            document_ttl_secs: env_or("DOCUMENT_TTL_SECS", self.document_ttl_secs),
            max_document_bytes: env_or("MAX_DOCUMENT_BYTES", self.max_document_bytes),
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", self.sweep_interval_secs),
            jobs_folder: std::env::var("JOBS_FOLDER").unwrap_or(self.jobs_folder),
            max_concurrent_jobs: env_or("MAX_CONCURRENT_JOBS", self.max_concurrent_jobs),
            verbose_logging: env_or("VERBOSE_LOGGING", self.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(self.output_log_file),
        }
    }
}
