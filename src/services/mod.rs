pub mod document_cache;
pub mod llm_service;
pub mod rubric_registry;
pub mod text_analysis;
pub mod usage_guard;

pub use document_cache::{spawn_sweeper, DocumentCache, InMemoryDocumentCache};
pub use llm_service::{GradingModel, ModelRequest, OpenAiGradingModel};
pub use rubric_registry::{resolve, ResolvedRubric, Rubric};
pub use usage_guard::{InMemoryUsageGuard, UsageGuard, UsageTicket};
