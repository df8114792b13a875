//! 日志初始化

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// 安装全局 tracing 订阅者
///
/// 过滤规则取自 `RUST_LOG`，缺省 `info`；`verbose` 时本 crate 输出 debug 级别。
pub fn init(verbose: bool) {
    let default_filter = if verbose {
        "info,essay_grader=debug"
    } else {
        "info"
    };

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
