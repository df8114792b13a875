use anyhow::Result;
/// 日志工具模块
///
/// 提供日志格式化和输出的辅助函数
use std::fs;
use tracing::info;

use crate::config::Config;
use crate::models::usage::UsageSummary;

/// 初始化结果日志文件
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n作文批改日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 作文批改模式");
    info!("🤖 模型: {}", config.llm_model_name);
    info!(
        "⏱️ 超时 {} 秒，临时错误最多重试 {} 次",
        config.ai_timeout_secs, config.ai_max_retries
    );
    info!("📊 最大并发数: {}", config.max_concurrent_jobs);
    info!("{}", "=".repeat(60));
}

/// 记录任务加载信息
pub fn log_jobs_loaded(total: usize, max_concurrent: usize) {
    info!("✓ 找到 {} 个待批改的作文", total);
    info!("📋 最多同时批改 {} 篇\n", max_concurrent);
}

/// 记录当前配额余量
pub fn log_usage_summary(summary: &UsageSummary) {
    info!(
        "📈 配额余量: 本分钟请求 {} / 本小时作文 {} / 今日作文 {} / 今日字数 {}",
        summary.requests_remaining_this_minute,
        summary.essays_remaining_this_hour,
        summary.essays_remaining_today,
        summary.words_remaining_today
    );
}

/// 打印最终统计信息
pub fn print_final_stats(success: usize, failed: usize, total: usize, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部批改完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", success, total);
    info!("❌ 失败: {}", failed);
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("历史作文批改", 2), "历史...");
    }
}
