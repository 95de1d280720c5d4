use std::collections::HashSet;
use std::sync::Arc;

use orchestrator_core::{
    models::Job, CoordinationStore, KeyLayout, OrchestratorResult, StoreEvent,
};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cron_scheduler::JobRunner;
use crate::job_sync::{consume, JobSynchronizer};

/// 一次性作业执行器
///
/// 监听 once 命名空间的创建事件，对作用于本节点的一次性作业立即执行一次。
/// 同一条记录（键 + 创建版本）在本节点最多执行一次，记录删除后清除对应标记。
pub struct OnceJobRunner {
    store: Arc<dyn CoordinationStore>,
    keys: KeyLayout,
    sync: Arc<JobSynchronizer>,
    runner: Arc<dyn JobRunner>,
    seen: Mutex<HashSet<(String, i64)>>,
}

impl OnceJobRunner {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        keys: KeyLayout,
        sync: Arc<JobSynchronizer>,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        Self {
            store,
            keys,
            sync,
            runner,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// 解析事件值，返回需要执行的作业
    ///
    /// 值为完整作业JSON时按规则匹配本节点；为空或等于本节点ID时执行本地已同步的同名作业。
    async fn resolve(&self, key: &str, value: &str) -> Option<Arc<Job>> {
        let node = self.sync.node();
        let value = value.trim();

        if value.starts_with('{') {
            let job = match Job::from_json(value) {
                Ok(job) => job,
                Err(e) => {
                    warn!("一次性作业 {} 无法解析: {}", key, e);
                    return None;
                }
            };
            if !job.run_once {
                debug!("作业 {} 未标记为一次性作业，忽略", job.id);
                return None;
            }
            let groups = self.sync.groups_snapshot().await;
            if !job.is_run_on(node, &groups) {
                return None;
            }
            return Some(Arc::new(job));
        }

        if value.is_empty() || value == node.uuid {
            let id = orchestrator_core::keys::id_from_key(key);
            let job = self.sync.job(id).await;
            if job.is_none() {
                debug!("本节点没有作业 {}，忽略一次性执行", id);
            }
            return job;
        }

        None
    }

    /// 已执行且记录尚未删除的条目数
    pub async fn seen_len(&self) -> usize {
        self.seen.lock().await.len()
    }

    /// 处理一条事件，需要执行时返回执行任务句柄
    pub async fn handle_event(&self, event: StoreEvent) -> Option<JoinHandle<()>> {
        let kv = match event {
            StoreEvent::Created(kv) => kv,
            StoreEvent::Deleted(kv) => {
                // 删除后同一创建版本不会再出现
                self.seen.lock().await.retain(|(key, _)| key != &kv.key);
                return None;
            }
            StoreEvent::Modified(_) => return None,
        };

        if !self
            .seen
            .lock()
            .await
            .insert((kv.key.clone(), kv.create_revision))
        {
            debug!("一次性作业 {} 已执行过", kv.key);
            return None;
        }

        let job = self.resolve(&kv.key, &kv.value).await?;
        info!("执行一次性作业 {}", job.id);

        let runner = Arc::clone(&self.runner);
        let job_id = job.id.clone();
        let run = tokio::spawn(async move {
            runner.run_once(job).await;
        });

        // 执行任务 panic 只记录日志，不影响节点进程
        Some(tokio::spawn(async move {
            if let Err(e) = run.await {
                if e.is_panic() {
                    error!("一次性作业 {} 执行时 panic: {}", job_id, e);
                } else {
                    warn!("一次性作业 {} 被取消", job_id);
                }
            }
        }))
    }

    /// 订阅 once 前缀
    pub async fn watch(
        self: &Arc<Self>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> OrchestratorResult<JoinHandle<()>> {
        let rx = self.store.watch_prefix(self.keys.once_prefix()).await?;
        let runner = Arc::clone(self);
        Ok(tokio::spawn(async move {
            consume(rx, shutdown_rx, "一次性作业", |event| {
                let runner = Arc::clone(&runner);
                async move {
                    runner.handle_event(event).await;
                }
            })
            .await;
        }))
    }
}
