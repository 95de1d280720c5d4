use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use orchestrator_core::{config::AppConfig, models::HostNode, NodeApi, TaskApi};
use orchestrator_dispatcher::{ConsoleProgress, DependencyChecker, Outcome, TaskGraphExecutor};
use orchestrator_infrastructure::{HttpNodeApi, HttpTaskApi, RegionClient};

/// 命令行管理工具
#[derive(Parser, Debug)]
#[command(name = "orchctl")]
#[command(version = "1.0.0")]
#[command(about = "分布式节点注册与任务编排 - 命令行管理工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 控制面API地址，覆盖配置文件
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 任务管理
    Task(TaskCommands),
    /// 节点管理
    Node(NodeCommands),
}

#[derive(Args, Debug)]
struct TaskCommands {
    #[command(subcommand)]
    action: TaskActions,
}

#[derive(Subcommand, Debug)]
enum TaskActions {
    /// 列出任务
    List,
    /// 查看任务详情
    Get { task_id: String },
    /// 在指定节点上执行任务并跟踪后续任务
    Exec {
        task_id: String,
        /// 目标节点，逗号分隔
        #[arg(short, long, value_delimiter = ',', required = true)]
        nodes: Vec<String>,
    },
    /// 跟踪任务在指定节点上的执行状态
    Status {
        task_id: String,
        #[arg(short, long, value_delimiter = ',', required = true)]
        nodes: Vec<String>,
    },
    /// 输出任务依赖闭包的安装顺序
    Graph {
        #[arg(required = true)]
        task_ids: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct NodeCommands {
    #[command(subcommand)]
    action: NodeActions,
}

#[derive(Subcommand, Debug)]
enum NodeActions {
    /// 列出节点
    List,
    /// 查看节点详情
    Get { node_id: String },
    /// 节点上线
    Up { node_id: String },
    /// 节点下线
    Down { node_id: String },
    /// 禁止调度
    Cordon { node_id: String },
    /// 恢复调度
    Uncordon { node_id: String },
    /// 设置节点标签
    Label {
        node_id: String,
        /// 标签，格式 key=value
        #[arg(required = true)]
        labels: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .compact()
        .with_max_level(tracing::Level::WARN)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    let base_url = cli.api_url.unwrap_or(config.api.base_url.clone());
    let client = RegionClient::new(
        &base_url,
        Duration::from_secs(config.api.request_timeout_seconds),
    )?;

    let ok = match cli.command {
        Commands::Task(cmd) => run_task(cmd.action, client, &config).await?,
        Commands::Node(cmd) => run_node(cmd.action, client).await?,
    };
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_task(action: TaskActions, client: RegionClient, config: &AppConfig) -> Result<bool> {
    let api: Arc<dyn TaskApi> = Arc::new(HttpTaskApi::new(client));
    let executor = || {
        TaskGraphExecutor::new(Arc::clone(&api), Arc::new(ConsoleProgress), &config.task)
    };

    match action {
        TaskActions::List => {
            println!("{:<30} {:<30} {}", "ID", "NAME", "NODES");
            for task in api.list().await? {
                println!("{:<30} {:<30} {}", task.id, task.name, task.nodes.join(","));
            }
            Ok(true)
        }
        TaskActions::Get { task_id } => {
            let task = api.get(&task_id).await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
            Ok(true)
        }
        TaskActions::Exec { task_id, nodes } => {
            let outcome = executor().exec(&task_id, &nodes).await?;
            Ok(report(outcome))
        }
        TaskActions::Status { task_id, nodes } => {
            let outcome = executor().status(&task_id, &nodes).await;
            Ok(report(outcome))
        }
        TaskActions::Graph { task_ids } => {
            let checker = DependencyChecker::new(Arc::clone(&api));
            let tasks = checker.closure(&task_ids).await?;
            let order = DependencyChecker::install_order(&tasks)?;
            for (i, id) in order.iter().enumerate() {
                println!("{:>3}. {}", i + 1, id);
            }
            Ok(true)
        }
    }
}

fn report(outcome: Outcome) -> bool {
    match outcome {
        Outcome::Done => {
            println!("\n任务执行完成");
            true
        }
        Outcome::Fatal {
            task, node, status, ..
        } => {
            eprintln!(
                "\n任务 {} 在节点 {} 执行失败: {} {} {}",
                task, node, status.status, status.comple_status, status.message
            );
            false
        }
        Outcome::Unreachable {
            task,
            failures,
            last_error,
        } => {
            eprintln!("\n连续 {failures} 次获取任务 {task} 状态失败: {last_error}");
            false
        }
    }
}

async fn run_node(action: NodeActions, client: RegionClient) -> Result<bool> {
    let api = HttpNodeApi::new(client);

    match action {
        NodeActions::List => {
            println!(
                "{:<38} {:<20} {:<16} {:<20} {:<10} {}",
                "UUID", "HOSTNAME", "IP", "ROLES", "STATUS", "SCHEDULABLE"
            );
            for node in api.list().await? {
                print_node_row(&node);
            }
        }
        NodeActions::Get { node_id } => {
            let node = api.get(&node_id).await?;
            println!("{}", serde_json::to_string_pretty(&node)?);
        }
        NodeActions::Up { node_id } => {
            api.up(&node_id).await?;
            println!("节点 {node_id} 已上线");
        }
        NodeActions::Down { node_id } => {
            api.down(&node_id).await?;
            println!("节点 {node_id} 已下线");
        }
        NodeActions::Cordon { node_id } => {
            api.cordon(&node_id).await?;
            println!("节点 {node_id} 已禁止调度");
        }
        NodeActions::Uncordon { node_id } => {
            api.uncordon(&node_id).await?;
            println!("节点 {node_id} 已恢复调度");
        }
        NodeActions::Label { node_id, labels } => {
            let labels = parse_labels(&labels)?;
            api.set_labels(&node_id, &labels).await?;
            println!("节点 {node_id} 标签已更新");
        }
    }
    Ok(true)
}

fn print_node_row(node: &HostNode) {
    println!(
        "{:<38} {:<20} {:<16} {:<20} {:<10} {}",
        node.uuid,
        node.host_name,
        node.internal_ip,
        node.roles.to_string(),
        format!("{:?}", node.status).to_lowercase(),
        !node.unschedulable
    );
}

fn parse_labels(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(anyhow::anyhow!("标签格式错误，应为 key=value: {pair}")),
        })
        .collect()
}
