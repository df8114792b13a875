pub mod grading_ctx;
pub mod grading_flow;

pub use grading_ctx::GradingCtx;
pub use grading_flow::{validate_shape, GradingFlow, GradingPolicy};
