use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

use crate::models::{HostNode, Task, TaskStatus};
use crate::OrchestratorResult;

/// 任务管理接口
#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn list(&self) -> OrchestratorResult<Vec<Task>>;

    async fn get(&self, task_id: &str) -> OrchestratorResult<Task>;

    /// 各节点上的实时执行状态
    async fn status(&self, task_id: &str) -> OrchestratorResult<HashMap<String, TaskStatus>>;

    /// 提交任务到指定节点后立即返回，状态需另行轮询
    async fn exec(&self, task_id: &str, nodes: &[String]) -> OrchestratorResult<()>;
}

/// 任务持久化接口，供超时检测等后台服务回写状态
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn list_tasks(&self) -> OrchestratorResult<Vec<Task>>;

    async fn get_task(&self, task_id: &str) -> OrchestratorResult<Option<Task>>;

    async fn put_task(&self, task: &Task) -> OrchestratorResult<()>;
}

/// 节点管理接口
#[async_trait]
pub trait NodeApi: Send + Sync {
    async fn list(&self) -> OrchestratorResult<Vec<HostNode>>;

    async fn get(&self, node_id: &str) -> OrchestratorResult<HostNode>;

    async fn up(&self, node_id: &str) -> OrchestratorResult<()>;

    async fn down(&self, node_id: &str) -> OrchestratorResult<()>;

    /// 禁止调度
    async fn cordon(&self, node_id: &str) -> OrchestratorResult<()>;

    async fn uncordon(&self, node_id: &str) -> OrchestratorResult<()>;

    async fn set_labels(
        &self,
        node_id: &str,
        labels: &BTreeMap<String, String>,
    ) -> OrchestratorResult<()>;
}
