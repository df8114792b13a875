//! LLM 服务 - 业务能力层
//!
//! 只负责"把拼好的提示词和文档图片发给模型，拿回结构化 JSON"，不关心评分规则
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 通过 `json_schema` 响应格式约束输出结构
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl, ResponseFormat, ResponseFormatJsonSchema,
    },
    Client,
};
use base64::Engine;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ProviderError;
use crate::models::document::DocumentSet;

/// 一次模型调用的全部输入
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub user_message: String,
    /// DBQ 文档图片，按 doc_num 顺序附加
    pub documents: Option<Arc<DocumentSet>>,
    pub schema_name: &'static str,
    pub schema: Value,
}

impl ModelRequest {
    pub fn image_count(&self) -> usize {
        self.documents.as_ref().map_or(0, |set| set.documents.len())
    }
}

/// 结构化输出模型
///
/// 返回值是模型声称符合 schema 的 JSON，是否真的符合由评分注册表校验。
pub trait GradingModel: Send + Sync {
    fn complete(
        &self,
        request: &ModelRequest,
    ) -> impl Future<Output = Result<Value, ProviderError>> + Send;

    fn model_name(&self) -> &str;
}

/// 基于 async-openai 的实现
pub struct OpenAiGradingModel {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiGradingModel {
    /// 创建新的 LLM 服务
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
        }
    }

    fn build_messages(
        &self,
        request: &ModelRequest,
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(request.system_prompt.as_str())
            .build()?;

        let image_urls = document_data_urls(request.documents.as_deref());
        let user_msg = if image_urls.is_empty() {
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.user_message.as_str())
                .build()?
        } else {
            // Vision：文本在前，文档图片按顺序在后
            let mut content_parts = vec![ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: request.user_message.clone(),
                },
            )];
            for url in image_urls {
                content_parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                    ChatCompletionRequestMessageContentPartImage {
                        image_url: ImageUrl {
                            url,
                            detail: Some(ImageDetail::High),
                        },
                    },
                ));
            }
            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
                .build()?
        };

        Ok(vec![
            ChatCompletionRequestMessage::System(system_msg),
            ChatCompletionRequestMessage::User(user_msg),
        ])
    }
}

impl GradingModel for OpenAiGradingModel {
    async fn complete(&self, request: &ModelRequest) -> Result<Value, ProviderError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!(
            "用户消息长度: {} 字符, 图片 {} 张",
            request.user_message.len(),
            request.image_count()
        );

        let messages = self.build_messages(request).map_err(classify_error)?;

        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Rubric-aligned essay grade".to_string()),
                name: request.schema_name.to_string(),
                schema: Some(request.schema.clone()),
                strict: Some(true),
            },
        };

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .response_format(response_format)
            .build()
            .map_err(classify_error)?;

        let response = self.client.chat().create(chat_request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            classify_error(e)
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| ProviderError::Transient("LLM 返回内容为空".to_string()))?;

        parse_content(&content)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// 文档图片转为 base64 data URL
pub fn document_data_urls(documents: Option<&DocumentSet>) -> Vec<String> {
    let Some(set) = documents else {
        return Vec::new();
    };
    let mut docs: Vec<_> = set.documents.iter().collect();
    docs.sort_by_key(|doc| doc.doc_num);
    docs.into_iter()
        .map(|doc| {
            format!(
                "data:{};base64,{}",
                doc.format.mime(),
                base64::engine::general_purpose::STANDARD.encode(&doc.bytes)
            )
        })
        .collect()
}

/// 解析模型返回的文本为 JSON，容忍 ```json 代码块包裹
pub fn parse_content(content: &str) -> Result<Value, ProviderError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))
}

/// 区分可重试与不可重试的 API 错误
fn classify_error(err: OpenAIError) -> ProviderError {
    let message = err.to_string();
    match &err {
        OpenAIError::Reqwest(e) => {
            let retryable_status = e
                .status()
                .map_or(true, |status| status.is_server_error() || status.as_u16() == 429);
            if e.is_timeout() || e.is_connect() || retryable_status {
                ProviderError::Transient(message)
            } else {
                ProviderError::Fatal(message)
            }
        }
        OpenAIError::ApiError(api) => {
            if is_transient_api_error(api.r#type.as_deref(), &api.message) {
                ProviderError::Transient(message)
            } else {
                ProviderError::Fatal(message)
            }
        }
        _ => ProviderError::Fatal(message),
    }
}

fn is_transient_api_error(error_type: Option<&str>, message: &str) -> bool {
    const TRANSIENT_MARKERS: [&str; 5] = [
        "server_error",
        "rate_limit",
        "overloaded",
        "timeout",
        "temporarily unavailable",
    ];
    let haystack = format!("{} {}", error_type.unwrap_or_default(), message).to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| haystack.contains(marker))
}
