use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::{
    config::AppConfig, models::HostNode, CoordinationStore, KeyLayout, OrchestratorError,
    OrchestratorResult,
};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::cron_scheduler::{CronScheduler, JobRunner};
use crate::executor::JobExecutor;
use crate::job_sync::JobSynchronizer;
use crate::lease::LeaseManager;
use crate::once_runner::OnceJobRunner;

/// 节点守护进程
///
/// 组合租约、作业同步、一次性作业与本地调度，负责按顺序启动与关闭。
pub struct NodeServer {
    store: Arc<dyn CoordinationStore>,
    lease: Arc<LeaseManager>,
    sync: Arc<JobSynchronizer>,
    cron: Arc<CronScheduler>,
    once: Arc<OnceJobRunner>,
    runner: Arc<dyn JobRunner>,
    shutdown_tx: RwLock<Option<broadcast::Sender<()>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeServer {
    pub fn new(config: &AppConfig, store: Arc<dyn CoordinationStore>, node: HostNode) -> Self {
        let keys = KeyLayout::new(config.keys.clone());
        let runner: Arc<dyn JobRunner> = Arc::new(JobExecutor::new(
            Arc::clone(&store),
            keys.clone(),
            node.uuid.clone(),
            node.host_name.clone(),
            config.executor.clone(),
        ));
        Self::with_runner(config, store, node, runner)
    }

    /// 使用指定的执行入口构建
    pub fn with_runner(
        config: &AppConfig,
        store: Arc<dyn CoordinationStore>,
        node: HostNode,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        let keys = KeyLayout::new(config.keys.clone());
        let cron = Arc::new(CronScheduler::new(Duration::from_millis(
            config.cron.tick_millis,
        )));
        let sync = Arc::new(JobSynchronizer::new(
            Arc::clone(&store),
            keys.clone(),
            node.clone(),
            Arc::clone(&cron),
        ));
        let once = Arc::new(OnceJobRunner::new(
            Arc::clone(&store),
            keys.clone(),
            Arc::clone(&sync),
            Arc::clone(&runner),
        ));
        let lease = Arc::new(LeaseManager::new(
            Arc::clone(&store),
            keys,
            node,
            config.node.ttl_seconds,
        ));

        Self {
            store,
            lease,
            sync,
            cron,
            once,
            runner,
            shutdown_tx: RwLock::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn lease(&self) -> &Arc<LeaseManager> {
        &self.lease
    }

    pub fn sync(&self) -> &Arc<JobSynchronizer> {
        &self.sync
    }

    pub fn cron(&self) -> &Arc<CronScheduler> {
        &self.cron
    }

    /// 注册节点并启动全部后台循环
    pub async fn run(&self) -> OrchestratorResult<()> {
        let mut tx_guard = self.shutdown_tx.write().await;
        if tx_guard.is_some() {
            return Err(OrchestratorError::Internal("节点服务已在运行".to_string()));
        }

        self.lease.register().await?;

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut handles = vec![self.lease.start(shutdown_tx.subscribe())];

        // 先订阅再全量加载
        handles.push(self.sync.watch_groups(shutdown_tx.subscribe()).await?);
        handles.push(self.sync.watch_jobs(shutdown_tx.subscribe()).await?);
        let groups = self.sync.load_groups().await?;
        let jobs = self.sync.load_jobs().await?;
        handles.push(self.once.watch(shutdown_tx.subscribe()).await?);
        handles.push(
            self.cron
                .start(Arc::clone(&self.runner), shutdown_tx.subscribe()),
        );

        *tx_guard = Some(shutdown_tx);
        self.handles.lock().await.extend(handles);
        info!(
            "节点服务启动完成，分组 {} 个，本节点作业 {} 个",
            groups, jobs
        );
        Ok(())
    }

    /// 关闭：标记下线、停止续约、删除记录、关闭存储连接、停止调度
    pub async fn stop(&self) {
        info!("正在关闭节点服务");

        if let Err(e) = self.lease.mark_down().await {
            warn!("标记节点下线失败: {}", e);
        }

        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }

        if let Err(e) = self.lease.delete_record().await {
            error!("删除节点记录失败: {}", e);
        }
        if let Err(e) = self.store.close().await {
            error!("关闭存储连接失败: {}", e);
        }
        self.cron.stop();

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for mut handle in handles {
            if timeout(Duration::from_secs(5), &mut handle).await.is_err() {
                warn!("后台任务未在5秒内退出，强制终止");
                handle.abort();
            }
        }
        info!("节点服务已关闭");
    }
}
