use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::{
    models::HostNode, CoordinationStore, KeyLayout, LeaseId, OrchestratorError,
    OrchestratorResult,
};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// 一次续约周期的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    /// 原租约续约成功
    Renewed,
    /// 续约失败后重新申请租约并重新发布节点记录
    Reestablished(LeaseId),
    /// 重新注册同样失败，下个周期再试
    Failed,
}

/// 节点租约管理
///
/// 节点记录以 `ttl + 2` 秒的租约写入存储，每 `ttl` 秒续约一次。
/// 续约失败时清空持有的租约并重新注册，单次失败不会导致节点被判定下线。
pub struct LeaseManager {
    store: Arc<dyn CoordinationStore>,
    keys: KeyLayout,
    node: Arc<RwLock<HostNode>>,
    ttl_seconds: i64,
    lease_id: AtomicI64,
}

impl LeaseManager {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        keys: KeyLayout,
        node: HostNode,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            store,
            keys,
            node: Arc::new(RwLock::new(node)),
            ttl_seconds,
            lease_id: AtomicI64::new(0),
        }
    }

    /// 当前持有的租约，0 表示未持有
    pub fn lease_id(&self) -> LeaseId {
        self.lease_id.load(Ordering::SeqCst)
    }

    pub async fn node(&self) -> HostNode {
        self.node.read().await.clone()
    }

    pub async fn key(&self) -> String {
        self.keys.node_key(&self.node.read().await.uuid)
    }

    /// 首次注册，同一节点ID已被其他存活进程占用时拒绝
    pub async fn register(&self) -> OrchestratorResult<LeaseId> {
        let key = self.key().await;
        let (uuid, pid) = {
            let node = self.node.read().await;
            (node.uuid.clone(), node.pid)
        };

        if let Some(kv) = self.store.get(&key).await? {
            match serde_json::from_str::<HostNode>(&kv.value) {
                Ok(existing) if kv.lease != 0 && existing.pid != pid => {
                    return Err(OrchestratorError::NodeAlreadyRegistered {
                        id: uuid,
                        pid: existing.pid,
                    });
                }
                Ok(_) => {}
                Err(e) => warn!("节点 {} 的旧记录无法解析，将被覆盖: {}", uuid, e),
            }
        }

        let lease = self.set().await?;
        info!("节点 {} 注册成功, lease={}", uuid, lease);
        Ok(lease)
    }

    /// 申请新租约，刷新节点记录并绑定新租约重新发布
    pub async fn set(&self) -> OrchestratorResult<LeaseId> {
        let key = self.key().await;
        let lease = self.store.grant(self.ttl_seconds + 2).await?;

        let stored = match self.store.get(&key).await {
            Ok(Some(kv)) => serde_json::from_str::<HostNode>(&kv.value).ok(),
            Ok(None) => None,
            Err(e) => {
                debug!("读取节点旧记录失败: {}", e);
                None
            }
        };

        let snapshot = {
            let mut node = self.node.write().await;
            if let Some(stored) = &stored {
                node.refresh_from(stored);
            }
            node.up();
            node.lease_id = lease;
            node.clone()
        };

        let value = serde_json::to_string(&snapshot)?;
        self.store.put(&key, &value, Some(lease)).await?;
        self.lease_id.store(lease, Ordering::SeqCst);
        Ok(lease)
    }

    /// 执行一个续约周期
    pub async fn tick(&self) -> RenewOutcome {
        let lease = self.lease_id();
        if lease > 0 {
            match self.store.keep_alive_once(lease).await {
                Ok(()) => {
                    metrics::counter!("orchestrator_lease_renewals_total").increment(1);
                    return RenewOutcome::Renewed;
                }
                Err(e) => {
                    warn!("keepAlive err, try to reset: {}", e);
                    self.lease_id.store(0, Ordering::SeqCst);
                }
            }
        }

        match self.set().await {
            Ok(lease) => {
                info!("节点记录重新注册成功, lease={}", lease);
                metrics::counter!("orchestrator_lease_reestablished_total").increment(1);
                RenewOutcome::Reestablished(lease)
            }
            Err(e) => {
                warn!("节点记录重新注册失败: {}", e);
                RenewOutcome::Failed
            }
        }
    }

    /// 启动后台续约循环，收到关闭信号后退出
    pub fn start(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = Duration::from_secs(self.ttl_seconds.max(1) as u64);

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("启动节点租约续约服务，周期 {:?}", period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.tick().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("租约续约服务停止");
                        break;
                    }
                }
            }
        })
    }

    /// 将节点记录标记为下线，保留租约绑定
    pub async fn mark_down(&self) -> OrchestratorResult<()> {
        let key = self.key().await;
        let snapshot = {
            let mut node = self.node.write().await;
            node.down();
            node.clone()
        };
        let lease = self.lease_id();
        let value = serde_json::to_string(&snapshot)?;
        self.store
            .put(&key, &value, (lease > 0).then_some(lease))
            .await
    }

    /// 删除节点记录并撤销租约
    pub async fn delete_record(&self) -> OrchestratorResult<()> {
        let key = self.key().await;
        self.store.delete(&key).await?;

        let lease = self.lease_id.swap(0, Ordering::SeqCst);
        if lease > 0 {
            if let Err(e) = self.store.revoke(lease).await {
                error!("撤销租约 {} 失败: {}", lease, e);
            }
        }
        Ok(())
    }
}
