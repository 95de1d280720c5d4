use async_trait::async_trait;
use orchestrator_core::{
    CoordinationStore, EventType, KeyValue, LeaseId, OrchestratorError, OrchestratorResult,
    RawEvent,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// 内存协调存储实现
///
/// 提供租约、带租约写入、前缀读取与前缀监听，语义与 etcd v3 保持一致：
/// 每次写入递增全局 revision，首次写入时 `create_revision == mod_revision`。
/// 租约在每次访问时惰性检查过期，过期后绑定的键被删除并向监听者发出删除事件。
/// 适用于单机部署与测试场景。
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
    config: InMemoryStoreConfig,
}

#[derive(Debug, Clone)]
pub struct InMemoryStoreConfig {
    /// 每个 watch 通道的缓冲容量
    pub watch_buffer: usize,
}

impl Default for InMemoryStoreConfig {
    fn default() -> Self {
        Self {
            watch_buffer: 1024, // 默认缓冲1024个事件
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    revision: i64,
    next_lease: LeaseId,
    entries: BTreeMap<String, KeyValue>,
    leases: HashMap<LeaseId, LeaseEntry>,
    watchers: Vec<Watcher>,
    closed: bool,
}

#[derive(Debug)]
struct LeaseEntry {
    ttl: Duration,
    deadline: Instant,
    keys: HashSet<String>,
}

#[derive(Debug)]
struct Watcher {
    prefix: String,
    tx: mpsc::Sender<RawEvent>,
}

impl StoreState {
    fn ensure_open(&self) -> OrchestratorResult<()> {
        if self.closed {
            return Err(OrchestratorError::StoreClosed);
        }
        Ok(())
    }

    fn next_revision(&mut self) -> i64 {
        self.revision += 1;
        self.revision
    }

    /// 删除所有已过期的租约及其绑定的键
    fn expire_leases(&mut self, now: Instant) -> usize {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(lease) = self.leases.remove(id) {
                debug!("租约 {} 已过期，删除 {} 个键", id, lease.keys.len());
                for key in lease.keys {
                    self.remove_key(&key);
                }
            }
        }
        expired.len()
    }

    fn remove_key(&mut self, key: &str) -> bool {
        let Some(mut kv) = self.entries.remove(key) else {
            return false;
        };
        if kv.lease != 0 {
            if let Some(lease) = self.leases.get_mut(&kv.lease) {
                lease.keys.remove(key);
            }
        }
        kv.mod_revision = self.next_revision();
        self.notify(RawEvent {
            event_type: EventType::Delete,
            kv,
        });
        true
    }

    fn insert(&mut self, key: &str, value: &str, lease: Option<LeaseId>) -> OrchestratorResult<()> {
        let lease = lease.unwrap_or(0);
        if lease != 0 && !self.leases.contains_key(&lease) {
            return Err(OrchestratorError::LeaseNotFound { id: lease });
        }

        let revision = self.next_revision();
        let create_revision = match self.entries.get(key) {
            Some(prev) => {
                if prev.lease != 0 && prev.lease != lease {
                    if let Some(old) = self.leases.get_mut(&prev.lease) {
                        old.keys.remove(key);
                    }
                }
                prev.create_revision
            }
            None => revision,
        };

        if let Some(entry) = self.leases.get_mut(&lease) {
            entry.keys.insert(key.to_string());
        }

        let kv = KeyValue {
            key: key.to_string(),
            value: value.to_string(),
            create_revision,
            mod_revision: revision,
            lease,
        };
        self.entries.insert(key.to_string(), kv.clone());
        self.notify(RawEvent {
            event_type: EventType::Put,
            kv,
        });
        Ok(())
    }

    fn notify(&mut self, event: RawEvent) {
        self.watchers.retain(|watcher| {
            if !event.kv.key.starts_with(&watcher.prefix) {
                return !watcher.tx.is_closed();
            }
            match watcher.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("watch通道已满，丢弃事件: {}", event.kv.key);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_config(InMemoryStoreConfig::default())
    }

    pub fn with_config(config: InMemoryStoreConfig) -> Self {
        info!("Creating in-memory coordination store with config: {:?}", config);
        Self {
            state: Arc::new(Mutex::new(StoreState {
                next_lease: 1,
                ..Default::default()
            })),
            config,
        }
    }

    fn lock(&self) -> OrchestratorResult<MutexGuard<'_, StoreState>> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| OrchestratorError::Internal(format!("存储状态锁异常: {e}")))?;
        state.ensure_open()?;
        state.expire_leases(Instant::now());
        Ok(state)
    }

    /// 立即清理过期租约，返回清理的租约数
    pub fn expire_leases(&self) -> OrchestratorResult<usize> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| OrchestratorError::Internal(format!("存储状态锁异常: {e}")))?;
        Ok(state.expire_leases(Instant::now()))
    }

    /// 当前有效租约数
    pub fn lease_count(&self) -> OrchestratorResult<usize> {
        Ok(self.lock()?.leases.len())
    }

    /// 当前全局版本号
    pub fn revision(&self) -> OrchestratorResult<i64> {
        Ok(self.lock()?.revision)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn grant(&self, ttl_seconds: i64) -> OrchestratorResult<LeaseId> {
        if ttl_seconds <= 0 {
            return Err(OrchestratorError::Store(format!(
                "租约TTL必须大于0: {ttl_seconds}"
            )));
        }
        let mut state = self.lock()?;
        let id = state.next_lease;
        state.next_lease += 1;
        let ttl = Duration::from_secs(ttl_seconds as u64);
        state.leases.insert(
            id,
            LeaseEntry {
                ttl,
                deadline: Instant::now() + ttl,
                keys: HashSet::new(),
            },
        );
        debug!("授予租约 {} ttl={}s", id, ttl_seconds);
        Ok(id)
    }

    async fn keep_alive_once(&self, lease: LeaseId) -> OrchestratorResult<()> {
        let mut state = self.lock()?;
        let entry = state
            .leases
            .get_mut(&lease)
            .ok_or(OrchestratorError::LeaseNotFound { id: lease })?;
        entry.deadline = Instant::now() + entry.ttl;
        Ok(())
    }

    async fn revoke(&self, lease: LeaseId) -> OrchestratorResult<()> {
        let mut state = self.lock()?;
        let entry = state
            .leases
            .remove(&lease)
            .ok_or(OrchestratorError::LeaseNotFound { id: lease })?;
        for key in entry.keys {
            state.remove_key(&key);
        }
        Ok(())
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> OrchestratorResult<()> {
        self.lock()?.insert(key, value, lease)
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        lease: Option<LeaseId>,
    ) -> OrchestratorResult<bool> {
        let mut state = self.lock()?;
        if state.entries.contains_key(key) {
            return Ok(false);
        }
        state.insert(key, value, lease)?;
        Ok(true)
    }

    async fn get(&self, key: &str) -> OrchestratorResult<Option<KeyValue>> {
        Ok(self.lock()?.entries.get(key).cloned())
    }

    async fn get_prefix(&self, prefix: &str) -> OrchestratorResult<Vec<KeyValue>> {
        let state = self.lock()?;
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, kv)| kv.clone())
            .collect())
    }

    async fn delete(&self, key: &str) -> OrchestratorResult<bool> {
        Ok(self.lock()?.remove_key(key))
    }

    async fn watch_prefix(&self, prefix: &str) -> OrchestratorResult<mpsc::Receiver<RawEvent>> {
        let (tx, rx) = mpsc::channel(self.config.watch_buffer);
        self.lock()?.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        debug!("开始监听前缀: {}", prefix);
        Ok(rx)
    }

    async fn close(&self) -> OrchestratorResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| OrchestratorError::Internal(format!("存储状态锁异常: {e}")))?;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.watchers.clear();
        info!("协调存储连接已关闭");
        Ok(())
    }
}
