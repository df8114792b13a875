use crate::models::document::DocumentUpload;
use crate::models::essay::{EssayType, GradingRequest, RubricType, SaqParts, SaqType};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 一份批改任务（一个 TOML 文件）
#[derive(Debug, Clone, Deserialize)]
pub struct GradingJob {
    pub essay_type: EssayType,
    pub prompt: String,
    #[serde(default)]
    pub essay_text: Option<String>,
    #[serde(default)]
    pub saq_parts: Option<SaqParts>,
    #[serde(default)]
    pub saq_type: Option<SaqType>,
    #[serde(default)]
    pub rubric_type: Option<RubricType>,
    /// DBQ 文档图片路径，相对于任务文件所在目录
    #[serde(default)]
    pub documents: Vec<PathBuf>,

    #[serde(skip)]
    pub file_path: Option<PathBuf>,
}

impl GradingJob {
    /// 任务名（文件名去掉扩展名）
    pub fn name(&self) -> String {
        self.file_path
            .as_deref()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string())
    }

    /// 结果文件路径：与任务文件同目录，扩展名改为 `.result.json`
    pub fn result_path(&self) -> PathBuf {
        match &self.file_path {
            Some(path) => path.with_extension("result.json"),
            None => PathBuf::from(format!("{}.result.json", self.name())),
        }
    }

    /// 转换为批改请求，`document_set_id` 由上传文档后填入
    pub fn to_request(&self, document_set_id: Option<String>) -> GradingRequest {
        GradingRequest {
            essay_type: self.essay_type,
            prompt: self.prompt.clone(),
            essay_text: self.essay_text.clone(),
            saq_parts: self.saq_parts.clone(),
            saq_type: self.saq_type,
            rubric_type: self.rubric_type,
            document_set_id,
        }
    }

    fn resolve_document_path(&self, path: &Path) -> PathBuf {
        match self.file_path.as_deref().and_then(Path::parent) {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// 按扩展名推断 MIME 类型，未知类型交给文档缓存拒绝
fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// 读取任务附带的文档图片
pub async fn load_job_documents(job: &GradingJob) -> Result<Vec<DocumentUpload>> {
    let mut uploads = Vec::with_capacity(job.documents.len());
    for path in &job.documents {
        let full_path = job.resolve_document_path(path);
        let bytes = fs::read(&full_path)
            .await
            .with_context(|| format!("无法读取文档图片: {}", full_path.display()))?;
        uploads.push(DocumentUpload::new(content_type_for(&full_path), bytes));
    }
    Ok(uploads)
}

/// 从 TOML 文件加载批改任务
pub async fn load_job(toml_file_path: &Path) -> Result<GradingJob> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取TOML文件: {}", toml_file_path.display()))?;

    let mut job: GradingJob = toml::from_str(&content)
        .with_context(|| format!("无法解析TOML文件: {}", toml_file_path.display()))?;

    job.file_path = Some(toml_file_path.to_path_buf());

    Ok(job)
}

/// 从文件夹中加载所有批改任务，按文件名排序
pub async fn load_all_jobs(folder_path: &str) -> Result<Vec<GradingJob>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut paths = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut jobs = Vec::with_capacity(paths.len());
    for path in paths {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );
        match load_job(&path).await {
            Ok(job) => jobs.push(job),
            Err(e) => tracing::warn!("加载文件失败 {}: {:#}", path.display(), e),
        }
    }

    Ok(jobs)
}
