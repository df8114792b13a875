//! 批改流程 - 流程层
//!
//! 核心职责：定义"一份作文"的完整批改流程，是唯一的对外入口 `submit`
//!
//! 流程顺序：
//! 1. 计入每分钟请求数 → 超限立即拒绝
//! 2. 请求形状校验（SAQ 补齐默认评分方案）
//! 3. 作文 / 字数配额预留 → 超限立即拒绝
//! 4. 读取文档组（如有）
//! 5. 字数 / 段落统计与长度校验
//! 6. 解析评分方案
//! 7. 调用模型（超时 + 临时错误有限重试）
//! 8. 校验并转换模型输出（从不重试）
//! 9. 提交用量
//! 10. 返回结果

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{
    DocumentLookupError, GradingError, GradingResult, ProviderError, ProviderErrorClass,
    SchemaViolation, ValidationError,
};
use crate::models::document::{DocumentSet, DocumentSetCreated, DocumentUpload};
use crate::models::essay::{EssayType, GradingRequest, RubricType};
use crate::models::grade::GradeResponse;
use crate::models::usage::UsageSummary;
use crate::services::llm_service::{GradingModel, ModelRequest};
use crate::services::{rubric_registry, text_analysis, DocumentCache, UsageGuard};
use crate::utils::logging::truncate_text;
use crate::workflow::grading_ctx::GradingCtx;

/// 模型调用策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradingPolicy {
    /// 单次调用超时
    pub ai_timeout: Duration,
    /// 临时错误的额外重试次数
    pub max_retries: u32,
    /// 指数退避的基础间隔
    pub retry_base_delay: Duration,
}

impl Default for GradingPolicy {
    fn default() -> Self {
        Self {
            ai_timeout: Duration::from_secs(45),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

impl GradingPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ai_timeout: Duration::from_secs(config.ai_timeout_secs),
            max_retries: config.ai_max_retries,
            retry_base_delay: Duration::from_millis(config.ai_retry_base_delay_ms),
        }
    }

    /// 第 `attempt` 次失败后的等待时间：base · 2^(attempt-1)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// 批改流程
///
/// - 编排完整的批改流程
/// - 共享的文档缓存和用量守卫通过 trait 注入
/// - 可被多个并发请求共享（放进 `Arc`）
pub struct GradingFlow<M> {
    model: M,
    cache: Arc<dyn DocumentCache>,
    guard: Arc<dyn UsageGuard>,
    policy: GradingPolicy,
}

impl<M: GradingModel> GradingFlow<M> {
    pub fn new(
        model: M,
        cache: Arc<dyn DocumentCache>,
        guard: Arc<dyn UsageGuard>,
        policy: GradingPolicy,
    ) -> Self {
        Self {
            model,
            cache,
            guard,
            policy,
        }
    }

    pub fn cache(&self) -> &Arc<dyn DocumentCache> {
        &self.cache
    }

    pub fn guard(&self) -> &Arc<dyn UsageGuard> {
        &self.guard
    }

    /// 上传一组文档
    pub fn upload_documents(&self, uploads: Vec<DocumentUpload>) -> GradingResult<DocumentSetCreated> {
        Ok(self.cache.create(uploads)?)
    }

    /// 读取文档组
    pub fn documents(&self, document_set_id: &str) -> GradingResult<Arc<DocumentSet>> {
        Ok(self.cache.get(document_set_id)?)
    }

    /// 删除文档组
    pub fn delete_documents(&self, document_set_id: &str) {
        self.cache.delete(document_set_id);
    }

    /// 用量概览
    pub fn usage_summary(&self) -> UsageSummary {
        self.guard.summary()
    }

    /// 批改一份作文
    pub async fn submit(&self, request: GradingRequest) -> GradingResult<GradeResponse> {
        let ctx = GradingCtx::new(&request);
        info!(
            "{} 📝 收到批改请求，题目: {}",
            ctx,
            truncate_text(&request.prompt, 60)
        );

        let result = self.run(&ctx, &request).await;
        match &result {
            Ok(response) => info!(
                "{} ✅ 批改完成: {}/{} ({:.1}%, {}, {})",
                ctx,
                response.score,
                response.max_score,
                response.percentage,
                response.letter_grade,
                response.performance_level
            ),
            Err(e) if e.is_user_actionable() => warn!("{} ⚠️ 请求被拒绝: {}", ctx, e),
            Err(GradingError::Configuration(e)) => {
                error!("{} ❌ 集成错误（调用方传入了非法组合）: {}", ctx, e)
            }
            Err(e) => error!("{} ❌ 批改失败: {}", ctx, e),
        }
        result
    }

    async fn run(&self, ctx: &GradingCtx, request: &GradingRequest) -> GradingResult<GradeResponse> {
        // 1. 计入请求数，先于任何校验
        self.guard.admit()?;

        // 2. 请求形状
        let rubric_type = validate_shape(request)?;

        // 3. 作文 / 字数配额（预留凭证在出错或取消时自动归还）
        let raw_text = request.raw_text();
        let estimated_words = text_analysis::word_count(&raw_text) as u64;
        let ticket = self.guard.reserve(estimated_words)?;

        // 4. 文档组
        let documents = match &request.document_set_id {
            Some(id) => {
                let set = self.cache.get(id).map_err(|e| {
                    if let DocumentLookupError::Expired { .. } = e {
                        info!("{} 文档组 {} 已过期，需要重新上传", ctx, id);
                    }
                    e
                })?;
                Some(set)
            }
            None => None,
        };

        // 5. 长度
        let stats = text_analysis::analyze(&raw_text);
        text_analysis::check_length(request.essay_type, &stats)?;

        // 6. 评分方案
        let resolved = rubric_registry::resolve(request.essay_type, rubric_type)?;

        // 7. 调用模型
        let attached = documents.as_ref().map_or(0, |set| set.documents.len());
        let model_request = ModelRequest {
            system_prompt: resolved.system_prompt.clone(),
            user_message: resolved.render_user_message(request, &stats, attached),
            documents,
            schema_name: resolved.rubric.schema_name(),
            schema: resolved.output_schema.clone(),
        };
        let raw = self.call_model(ctx, &model_request).await?;

        // 8. 校验输出
        let response = resolved
            .validate_and_convert(&raw, stats.word_count, stats.paragraph_count)
            .map_err(|violation| {
                self.log_schema_drift(ctx, model_request.schema_name, &violation);
                violation
            })?;

        // 9. 提交用量
        self.guard.commit(ticket, stats.word_count as u64);

        Ok(response)
    }

    /// 调用模型，临时错误按指数退避重试
    async fn call_model(&self, ctx: &GradingCtx, request: &ModelRequest) -> GradingResult<serde_json::Value> {
        let max_attempts = self.policy.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            info!(
                "{} 🤖 调用模型 {} (第 {}/{} 次)",
                ctx,
                self.model.model_name(),
                attempt,
                max_attempts
            );

            let outcome = tokio::time::timeout(self.policy.ai_timeout, self.model.complete(request)).await;
            let reason = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(ProviderError::Malformed(message))) => {
                    let violation = SchemaViolation::MalformedJson { message };
                    self.log_schema_drift(ctx, request.schema_name, &violation);
                    return Err(violation.into());
                }
                Ok(Err(ProviderError::Fatal(message))) => {
                    return Err(GradingError::provider(ProviderErrorClass::Fatal, attempt, message));
                }
                Ok(Err(ProviderError::Transient(message))) => message,
                Err(_) => format!("模型调用超时 ({} 秒)", self.policy.ai_timeout.as_secs()),
            };

            if attempt >= max_attempts {
                return Err(GradingError::provider(
                    ProviderErrorClass::Transient,
                    attempt,
                    reason,
                ));
            }

            let delay = self.policy.backoff(attempt);
            warn!(
                "{} 模型调用临时失败 (第 {}/{} 次): {}，{} 毫秒后重试",
                ctx,
                attempt,
                max_attempts,
                reason,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn log_schema_drift(&self, ctx: &GradingCtx, schema_name: &str, violation: &SchemaViolation) {
        error!(
            "{} 🧨 schema drift: 模型 {} 的输出违反 {} 约束: {}（不重试，需要开发者检查提示词与 schema）",
            ctx,
            self.model.model_name(),
            schema_name,
            violation
        );
    }
}

/// 请求形状校验，返回实际生效的评分方案
///
/// SAQ 缺省 College Board；DBQ / LEQ 原样透传，非法组合交给 `rubric_registry::resolve` 报配置错误。
pub fn validate_shape(request: &GradingRequest) -> Result<Option<RubricType>, ValidationError> {
    if request.prompt.trim().is_empty() {
        return Err(ValidationError::EmptyPrompt);
    }

    let essay_type = request.essay_type;
    if essay_type.is_full_essay() {
        if request.saq_parts.is_some() {
            return Err(ValidationError::UnexpectedSaqParts { essay_type });
        }
        if request
            .essay_text
            .as_deref()
            .map_or(true, |text| text.trim().is_empty())
        {
            return Err(ValidationError::MissingEssayText { essay_type });
        }
        if request.saq_type.is_some() {
            return Err(ValidationError::SaqTypeNotAllowed { essay_type });
        }
        if essay_type == EssayType::Leq && request.document_set_id.is_some() {
            return Err(ValidationError::DocumentSetNotAllowed { essay_type });
        }
        Ok(request.rubric_type)
    } else {
        if request.essay_text.is_some() {
            return Err(ValidationError::UnexpectedEssayText);
        }
        let parts = request
            .saq_parts
            .as_ref()
            .ok_or(ValidationError::MissingSaqParts)?;
        if let Some((part, _)) = parts.iter().find(|(_, answer)| answer.trim().is_empty()) {
            return Err(ValidationError::EmptySaqPart { part });
        }
        if request.document_set_id.is_some() {
            return Err(ValidationError::DocumentSetNotAllowed {
                essay_type: EssayType::Saq,
            });
        }
        Ok(Some(request.rubric_type.unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::essay::SaqParts;

    #[test]
    fn test_validate_shape_defaults_saq_rubric() {
        let request = GradingRequest::saq("Question", SaqParts::new("a", "b", "c"));
        assert_eq!(validate_shape(&request), Ok(Some(RubricType::CollegeBoard)));

        let request = request.with_rubric(RubricType::Eg);
        assert_eq!(validate_shape(&request), Ok(Some(RubricType::Eg)));
    }

    #[test]
    fn test_validate_shape_essay_fields() {
        let request = GradingRequest::essay(EssayType::Dbq, "Prompt", "  ");
        assert_eq!(
            validate_shape(&request),
            Err(ValidationError::MissingEssayText {
                essay_type: EssayType::Dbq
            })
        );

        let mut request = GradingRequest::essay(EssayType::Leq, "Prompt", "Essay");
        request.saq_parts = Some(SaqParts::new("a", "b", "c"));
        assert_eq!(
            validate_shape(&request),
            Err(ValidationError::UnexpectedSaqParts {
                essay_type: EssayType::Leq
            })
        );

        let request =
            GradingRequest::essay(EssayType::Leq, "Prompt", "Essay").with_document_set("abc");
        assert!(matches!(
            validate_shape(&request),
            Err(ValidationError::DocumentSetNotAllowed { .. })
        ));

        // rubric_type 透传，由注册表报配置错误
        let request =
            GradingRequest::essay(EssayType::Dbq, "Prompt", "Essay").with_rubric(RubricType::Eg);
        assert_eq!(validate_shape(&request), Ok(Some(RubricType::Eg)));
    }

    #[test]
    fn test_validate_shape_saq_fields() {
        let mut request = GradingRequest::saq("Question", SaqParts::new("a", " ", "c"));
        assert_eq!(
            validate_shape(&request),
            Err(ValidationError::EmptySaqPart { part: "part_b" })
        );

        request.saq_parts = None;
        assert_eq!(validate_shape(&request), Err(ValidationError::MissingSaqParts));

        let mut request = GradingRequest::saq("Question", SaqParts::new("a", "b", "c"));
        request.essay_text = Some("essay".to_string());
        assert_eq!(validate_shape(&request), Err(ValidationError::UnexpectedEssayText));

        let request = GradingRequest::saq("   ", SaqParts::new("a", "b", "c"));
        assert_eq!(validate_shape(&request), Err(ValidationError::EmptyPrompt));
    }

    #[test]
    fn test_backoff_is_exponential() {
        let policy = GradingPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
    }
}
