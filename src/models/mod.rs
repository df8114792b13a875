pub mod document;
pub mod essay;
pub mod grade;
pub mod loaders;
pub mod usage;

pub use document::{DocumentSet, DocumentSetCreated, DocumentUpload, ImageFormat};
pub use essay::{EssayType, GradingRequest, RubricType, SaqParts, SaqType};
pub use grade::{GradeBreakdown, GradeResponse, LetterGrade, PerformanceLevel, RubricItem};
pub use loaders::{load_all_jobs, load_job, GradingJob};
pub use usage::{UsageLimits, UsageSummary, UsageWindow};
