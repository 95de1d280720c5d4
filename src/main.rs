use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use orchestrator::app::{init_metrics, Application};
use orchestrator::shutdown::{wait_for_signal, ShutdownManager};
use orchestrator_core::{config::AppConfig, init_logging};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("orchestrator")
        .version("1.0.0")
        .about("分布式节点注册与任务编排守护进程")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时按默认位置查找"),
        )
        .arg(
            Arg::new("node-id")
                .long("node-id")
                .value_name("ID")
                .help("节点ID，覆盖配置与主机ID文件"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let mut config = AppConfig::load(config_path.map(String::as_str))
        .with_context(|| format!("加载配置失败: {:?}", config_path))?;

    if let Some(id) = matches.get_one::<String>("node-id") {
        config.node.node_id = Some(id.clone());
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;
    init_metrics(&config.observability)?;

    info!("启动节点守护进程");
    let app = Application::new(&config)?;
    let shutdown_manager = ShutdownManager::new();

    let background = app.start(shutdown_manager.subscribe().await).await?;
    info!(node_id = %app.node().uuid, "节点守护进程已启动");

    if let Err(e) = wait_for_signal().await {
        error!("等待退出信号失败: {e}");
    }

    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;
    shutdown_manager
        .stop_within("节点服务", Duration::from_secs(30), app.stop())
        .await;
    for (name, handle) in background {
        shutdown_manager
            .stop_within(name, Duration::from_secs(5), async {
                if let Err(e) = handle.await {
                    error!("{name}异常退出: {e}");
                }
            })
            .await;
    }

    info!("节点守护进程已退出");
    Ok(())
}
