use anyhow::Result;
use essay_grader::{logger, App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置：优先读取 GRADER_CONFIG 指定的 TOML，否则只用环境变量
    let config = match std::env::var("GRADER_CONFIG") {
        Ok(path) => Config::from_toml_file(path)?,
        Err(_) => Config::from_env(),
    };

    // 初始化日志
    logger::init(config.verbose_logging);

    // 初始化并运行应用
    App::initialize(config).await?.run().await?;

    Ok(())
}
