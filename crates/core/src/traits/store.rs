use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{OrchestratorError, OrchestratorResult};

/// 租约ID，0 表示未持有租约
pub type LeaseId = i64;

/// 存储中的一条键值及其版本信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    pub create_revision: i64,
    pub mod_revision: i64,
    pub lease: LeaseId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Put,
    Delete,
}

/// watch 通道上的原始事件
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub event_type: EventType,
    pub kv: KeyValue,
}

/// 类型化的存储事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Created(KeyValue),
    Modified(KeyValue),
    Deleted(KeyValue),
}

impl StoreEvent {
    pub fn kv(&self) -> &KeyValue {
        match self {
            StoreEvent::Created(kv) | StoreEvent::Modified(kv) | StoreEvent::Deleted(kv) => kv,
        }
    }
}

impl TryFrom<RawEvent> for StoreEvent {
    type Error = OrchestratorError;

    /// 首次写入（create_revision == mod_revision）为创建，之后的写入为修改。
    /// 版本号不一致的写事件无法归类，返回错误由调用方记录后忽略。
    fn try_from(event: RawEvent) -> Result<Self, Self::Error> {
        let kv = event.kv;
        match event.event_type {
            EventType::Delete => Ok(StoreEvent::Deleted(kv)),
            EventType::Put if kv.create_revision > 0 && kv.create_revision == kv.mod_revision => {
                Ok(StoreEvent::Created(kv))
            }
            EventType::Put if kv.create_revision > 0 && kv.mod_revision > kv.create_revision => {
                Ok(StoreEvent::Modified(kv))
            }
            EventType::Put => Err(OrchestratorError::UnknownEvent(format!(
                "key={} create_revision={} mod_revision={}",
                kv.key, kv.create_revision, kv.mod_revision
            ))),
        }
    }
}

/// 强一致、支持租约与前缀监听的协调存储
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// 申请一个 ttl 秒的租约
    async fn grant(&self, ttl_seconds: i64) -> OrchestratorResult<LeaseId>;

    /// 续约一次，租约不存在或已过期时返回 `LeaseNotFound`
    async fn keep_alive_once(&self, lease: LeaseId) -> OrchestratorResult<()>;

    /// 撤销租约，绑定的键一并删除
    async fn revoke(&self, lease: LeaseId) -> OrchestratorResult<()>;

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> OrchestratorResult<()>;

    /// 键不存在时写入，返回是否写入成功
    async fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        lease: Option<LeaseId>,
    ) -> OrchestratorResult<bool>;

    async fn get(&self, key: &str) -> OrchestratorResult<Option<KeyValue>>;

    async fn get_prefix(&self, prefix: &str) -> OrchestratorResult<Vec<KeyValue>>;

    /// 删除键，返回键是否存在
    async fn delete(&self, key: &str) -> OrchestratorResult<bool>;

    /// 监听前缀下的变化，连接关闭时通道结束
    async fn watch_prefix(&self, prefix: &str) -> OrchestratorResult<mpsc::Receiver<RawEvent>>;

    /// 关闭连接，结束所有 watch 通道
    async fn close(&self) -> OrchestratorResult<()>;
}
