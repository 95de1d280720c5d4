use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use orchestrator_core::{
    config::{AppConfig, NodeConfig, ObservabilityConfig, StoreConfig},
    models::{HostNode, HostRoles, NodeRole},
    CoordinationStore, KeyLayout, TaskRepository,
};
use orchestrator_dispatcher::TaskTimeoutDetector;
use orchestrator_infrastructure::{EtcdStore, InMemoryStore, StoreTaskRepository};
use orchestrator_node::{read_host_id, NodeServer};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 管理节点上的后台任务
struct ManageTasks {
    detector: Arc<TaskTimeoutDetector>,
    tasks: Arc<StoreTaskRepository>,
    release_period: Duration,
}

/// 节点守护进程
///
/// 管理节点额外运行任务超时检测与依赖等待复查。
pub struct Application {
    node: HostNode,
    server: NodeServer,
    manage: Option<ManageTasks>,
}

impl Application {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let node = build_host_node(&config.node)?;
        info!(
            node_id = %node.uuid,
            host_name = %node.host_name,
            roles = %node.roles,
            "初始化节点"
        );

        let store = connect_store(&config.store)?;
        let manage = if node.has_role(NodeRole::Manage) {
            let tasks = Arc::new(StoreTaskRepository::new(
                Arc::clone(&store),
                KeyLayout::new(config.keys.clone()),
                node.uuid.clone(),
            ));
            let repo: Arc<dyn TaskRepository> = tasks.clone();
            Some(ManageTasks {
                detector: Arc::new(TaskTimeoutDetector::new(repo, &config.task)),
                tasks,
                release_period: Duration::from_secs(config.task.poll_interval_seconds),
            })
        } else {
            None
        };
        let server = NodeServer::new(config, store, node.clone());

        Ok(Self {
            node,
            server,
            manage,
        })
    }

    pub fn node(&self) -> &HostNode {
        &self.node
    }

    /// 启动节点服务，返回带名称的后台任务
    pub async fn start(
        &self,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Vec<(&'static str, JoinHandle<()>)>> {
        self.server.run().await.context("启动节点服务失败")?;
        let mut handles = Vec::new();
        if let Some(manage) = &self.manage {
            handles.push((
                "依赖等待复查",
                Arc::clone(&manage.tasks)
                    .start_release_loop(manage.release_period, shutdown_rx.resubscribe()),
            ));
            handles.push((
                "任务超时检测",
                Arc::clone(&manage.detector).start(shutdown_rx),
            ));
        }
        Ok(handles)
    }

    /// 按下线、删除记录、关闭存储、停止调度的顺序退出
    pub async fn stop(&self) {
        self.server.stop().await;
    }
}

/// 配置了 etcd 地址时连接 etcd，否则使用进程内存储
pub fn connect_store(config: &StoreConfig) -> Result<Arc<dyn CoordinationStore>> {
    if config.is_standalone() {
        warn!("未配置协调存储地址，使用进程内存储，仅适用于单机部署");
        return Ok(Arc::new(InMemoryStore::new()));
    }
    let store = EtcdStore::new(config).context("创建etcd客户端失败")?;
    info!(endpoints = ?config.endpoints, "使用etcd协调存储");
    Ok(Arc::new(store))
}

/// 根据配置构建本机节点
pub fn build_host_node(config: &NodeConfig) -> Result<HostNode> {
    let uuid = match &config.node_id {
        Some(id) => id.clone(),
        None => read_host_id(&config.host_id_file)
            .with_context(|| format!("读取节点ID失败: {}", config.host_id_file))?,
    };
    let host_name = match &config.hostname {
        Some(name) => name.clone(),
        None => hostname::get()
            .context("获取主机名失败")?
            .to_string_lossy()
            .into_owned(),
    };

    let mut node = HostNode::new(uuid, host_name, config.internal_ip.clone());
    node.external_ip = config.external_ip.clone();
    node.roles = HostRoles::new(config.parsed_roles()?);
    node.labels = config.labels.clone();
    Ok(node)
}

/// 安装Prometheus指标导出
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.metrics_enabled {
        return Ok(());
    }
    let addr: std::net::SocketAddr = config
        .metrics_bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {}", config.metrics_bind_address))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("安装Prometheus指标导出失败: {e}"))?;
    info!("指标导出监听 {}", addr);
    Ok(())
}
