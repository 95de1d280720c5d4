use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::{
    models::{
        evaluate_dependency, scheduler_status, task_status, DependencyState, SchedulerStatus,
        Task, TaskStatus,
    },
    CoordinationStore, KeyLayout, OrchestratorError, OrchestratorResult, TaskApi, TaskRepository,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// 基于协调存储的任务仓库
///
/// 任务以 JSON 形式保存在 tasks 前缀下，同时实现 `TaskApi`，
/// 供与存储同机部署的管理端直接提交与查询任务。
///
/// 提交执行时逐节点判定依赖：满足的节点立即放行，未满足的保持 Waiting，
/// 由 `release_waiting` 周期性复查。
pub struct StoreTaskRepository {
    store: Arc<dyn CoordinationStore>,
    keys: KeyLayout,
    scheduler_master: String,
}

impl StoreTaskRepository {
    pub fn new(store: Arc<dyn CoordinationStore>, keys: KeyLayout, scheduler_master: String) -> Self {
        Self {
            store,
            keys,
            scheduler_master,
        }
    }

    async fn load(&self, task_id: &str) -> OrchestratorResult<Task> {
        self.get_task(task_id)
            .await?
            .ok_or_else(|| OrchestratorError::TaskNotFound {
                id: task_id.to_string(),
            })
    }

    /// 任务在指定节点上的依赖判定，缺失的依赖任务视为无法满足
    pub async fn dependency_state(
        &self,
        task: &Task,
        node: &str,
    ) -> OrchestratorResult<DependencyState> {
        let mut waiting = None;
        for dep in &task.depends {
            let state = match self.get_task(&dep.depend_task_id).await? {
                Some(dep_task) => evaluate_dependency(&dep_task, dep, node),
                None => DependencyState::Unsatisfiable(format!(
                    "依赖任务 {} 不存在",
                    dep.depend_task_id
                )),
            };
            match state {
                DependencyState::Ready => {}
                DependencyState::Waiting(reason) => {
                    waiting.get_or_insert(reason);
                }
                unsatisfiable => return Ok(unsatisfiable),
            }
        }
        Ok(waiting.map_or(DependencyState::Ready, DependencyState::Waiting))
    }

    /// 按判定结果写入调度状态，只有依赖满足时才放行节点
    fn schedule_node(&self, task: &mut Task, node: &str, state: &DependencyState, now: DateTime<Utc>) {
        let (status, message) = match state {
            DependencyState::Ready => (scheduler_status::SUCCESS, "Success".to_string()),
            DependencyState::Waiting(reason) => (scheduler_status::WAITING, reason.clone()),
            DependencyState::Unsatisfiable(reason) => (scheduler_status::FAILURE, reason.clone()),
        };
        let next_tasks = task
            .scheduler
            .status
            .get(node)
            .map(|s| s.next_tasks.clone())
            .unwrap_or_default();
        task.scheduler.status.insert(
            node.to_string(),
            SchedulerStatus {
                status: status.to_string(),
                message,
                scheduler_time: Some(now),
                scheduler_master: self.scheduler_master.clone(),
                next_tasks,
            },
        );

        task.status.remove(node);
        if *state == DependencyState::Ready {
            task.status.insert(
                node.to_string(),
                TaskStatus {
                    status: task_status::START.to_string(),
                    start_time: Some(now),
                    ..Default::default()
                },
            );
            task.start_time.get_or_insert(now);
        }
    }

    /// 复查处于 Waiting 的节点，返回本轮放行的节点数
    pub async fn release_waiting(&self) -> OrchestratorResult<usize> {
        let mut released = 0;
        for mut task in self.list_tasks().await? {
            let mut waiting: Vec<String> = task
                .scheduler
                .status
                .iter()
                .filter(|(_, s)| s.status == scheduler_status::WAITING)
                .map(|(node, _)| node.clone())
                .collect();
            if waiting.is_empty() {
                continue;
            }
            waiting.sort();

            let now = Utc::now();
            let mut changed = false;
            for node in &waiting {
                let state = match self.dependency_state(&task, node).await {
                    Ok(state) => state,
                    Err(e) => {
                        error!("判定任务 {} 在节点 {} 的依赖失败: {}", task.id, node, e);
                        continue;
                    }
                };
                if let DependencyState::Waiting(_) = state {
                    continue;
                }
                if state == DependencyState::Ready {
                    info!("任务 {} 的依赖已满足，放行节点 {}", task.id, node);
                    released += 1;
                } else {
                    warn!("任务 {} 在节点 {} 的依赖无法满足: {:?}", task.id, node, state);
                }
                self.schedule_node(&mut task, node, &state, now);
                changed = true;
            }
            if changed {
                if let Err(e) = self.put_task(&task).await {
                    error!("回写任务 {} 调度状态失败: {}", task.id, e);
                }
            }
        }
        Ok(released)
    }

    /// 周期复查等待中的节点
    pub fn start_release_loop(
        self: Arc<Self>,
        period: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            info!("启动依赖等待复查，间隔 {:?}", period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.release_waiting().await {
                            Ok(0) => {}
                            Ok(n) => debug!("本轮放行 {} 个节点", n),
                            Err(e) => error!("复查等待节点失败: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("依赖等待复查停止");
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl TaskRepository for StoreTaskRepository {
    async fn list_tasks(&self) -> OrchestratorResult<Vec<Task>> {
        let kvs = self.store.get_prefix(self.keys.tasks_prefix()).await?;
        let mut tasks = Vec::with_capacity(kvs.len());
        for kv in kvs {
            match serde_json::from_str::<Task>(&kv.value) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!("跳过无法解析的任务 {}: {}", kv.key, e),
            }
        }
        Ok(tasks)
    }

    async fn get_task(&self, task_id: &str) -> OrchestratorResult<Option<Task>> {
        match self.store.get(&self.keys.task_key(task_id)).await? {
            Some(kv) => Ok(Some(serde_json::from_str(&kv.value)?)),
            None => Ok(None),
        }
    }

    async fn put_task(&self, task: &Task) -> OrchestratorResult<()> {
        let value = serde_json::to_string(task)?;
        self.store
            .put(&self.keys.task_key(&task.id), &value, None)
            .await
    }
}

#[async_trait]
impl TaskApi for StoreTaskRepository {
    async fn list(&self) -> OrchestratorResult<Vec<Task>> {
        self.list_tasks().await
    }

    async fn get(&self, task_id: &str) -> OrchestratorResult<Task> {
        self.load(task_id).await
    }

    async fn status(&self, task_id: &str) -> OrchestratorResult<HashMap<String, TaskStatus>> {
        Ok(self.load(task_id).await?.status)
    }

    /// 逐节点判定依赖并记录调度结论，任一节点依赖无法满足时返回错误
    async fn exec(&self, task_id: &str, nodes: &[String]) -> OrchestratorResult<()> {
        if nodes.is_empty() {
            return Err(OrchestratorError::TaskExecution(
                "目标节点不能为空".to_string(),
            ));
        }

        let mut task = self.load(task_id).await?;
        task.start_time = None;
        task.complete_time = None;

        let now = Utc::now();
        let mut failures = Vec::new();
        for node in nodes {
            let state = self.dependency_state(&task, node).await?;
            match &state {
                DependencyState::Ready => {}
                DependencyState::Waiting(reason) => {
                    info!("任务 {} 在节点 {} 等待依赖: {}", task_id, node, reason);
                }
                DependencyState::Unsatisfiable(reason) => {
                    failures.push(format!("{node}: {reason}"));
                }
            }
            self.schedule_node(&mut task, node, &state, now);
            if !task.nodes.contains(node) {
                task.nodes.push(node.clone());
            }
        }

        self.put_task(&task).await?;
        if !failures.is_empty() {
            return Err(OrchestratorError::TaskExecution(format!(
                "任务 {} 依赖无法满足: {}",
                task_id,
                failures.join("; ")
            )));
        }
        info!("任务 {} 已提交到节点 {:?}", task_id, nodes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;
    use orchestrator_core::models::{DetermineStrategy, TaskDep};

    fn repo() -> StoreTaskRepository {
        StoreTaskRepository::new(
            Arc::new(InMemoryStore::new()),
            KeyLayout::default(),
            "manage-1".to_string(),
        )
    }

    fn depends_on(id: &str, dep: &str, strategy: DetermineStrategy) -> Task {
        let mut task = Task::new(id);
        task.depends.push(TaskDep {
            depend_task_id: dep.to_string(),
            strategy,
        });
        task
    }

    fn node_status(status: &str, comple: &str) -> TaskStatus {
        TaskStatus {
            status: status.to_string(),
            comple_status: comple.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_exec_releases_nodes_without_dependencies() {
        let repo = repo();
        let mut task = Task::new("install_k8s");
        task.status
            .insert("n1".to_string(), node_status("complete", "Failure"));
        repo.put_task(&task).await.unwrap();

        repo.exec("install_k8s", &["n1".to_string()]).await.unwrap();

        let stored = repo.get("install_k8s").await.unwrap();
        assert_eq!(stored.status["n1"].status, "start");
        assert!(stored.status["n1"].comple_status.is_empty());
        assert!(stored.status["n1"].start_time.is_some());
        assert_eq!(stored.scheduler.status["n1"].status, "Success");
        assert_eq!(stored.scheduler.status["n1"].scheduler_master, "manage-1");
        assert_eq!(stored.nodes, vec!["n1".to_string()]);
    }

    #[tokio::test]
    async fn test_exec_holds_node_while_dependency_runs() {
        let repo = repo();
        let mut docker = Task::new("install_docker");
        docker
            .status
            .insert("n1".to_string(), node_status("exec", ""));
        repo.put_task(&docker).await.unwrap();
        let mut k8s = depends_on("install_k8s", "install_docker", DetermineStrategy::SameNode);
        k8s.status
            .insert("n1".to_string(), node_status("complete", "Success"));
        repo.put_task(&k8s).await.unwrap();

        repo.exec("install_k8s", &["n1".to_string()]).await.unwrap();

        let stored = repo.get("install_k8s").await.unwrap();
        assert!(!stored.status.contains_key("n1"));
        assert_eq!(stored.scheduler.status["n1"].status, "Waiting");
        assert!(stored.start_time.is_none());

        // 依赖仍在执行，复查不放行
        assert_eq!(repo.release_waiting().await.unwrap(), 0);
        assert!(!repo.get("install_k8s").await.unwrap().status.contains_key("n1"));

        docker
            .status
            .insert("n1".to_string(), node_status("complete", "Success"));
        repo.put_task(&docker).await.unwrap();
        assert_eq!(repo.release_waiting().await.unwrap(), 1);

        let stored = repo.get("install_k8s").await.unwrap();
        assert_eq!(stored.status["n1"].status, "start");
        assert_eq!(stored.scheduler.status["n1"].status, "Success");
        assert!(stored.start_time.is_some());
        assert_eq!(repo.release_waiting().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exec_rejects_unsatisfiable_dependency() {
        let repo = repo();
        let mut docker = Task::new("install_docker");
        docker
            .status
            .insert("n1".to_string(), node_status("complete", "Failure"));
        repo.put_task(&docker).await.unwrap();
        repo.put_task(&depends_on(
            "install_k8s",
            "install_docker",
            DetermineStrategy::SameNode,
        ))
        .await
        .unwrap();
        repo.put_task(&depends_on("orphan", "missing", DetermineStrategy::AtLeastOnce))
            .await
            .unwrap();

        assert!(matches!(
            repo.exec("install_k8s", &["n1".to_string()]).await,
            Err(OrchestratorError::TaskExecution(_))
        ));
        let stored = repo.get("install_k8s").await.unwrap();
        assert_eq!(stored.scheduler.status["n1"].status, "Failure");
        assert!(!stored.status.contains_key("n1"));

        assert!(repo.exec("orphan", &["n1".to_string()]).await.is_err());
        assert_eq!(repo.release_waiting().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exec_requires_nodes_and_task() {
        let repo = repo();
        assert!(repo.exec("t1", &[]).await.is_err());
        assert!(matches!(
            repo.exec("missing", &["n1".to_string()]).await,
            Err(OrchestratorError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_skips_malformed() {
        let store = Arc::new(InMemoryStore::new());
        let keys = KeyLayout::default();
        store
            .put(&keys.task_key("broken"), "{not json", None)
            .await
            .unwrap();
        let repo = StoreTaskRepository::new(store, keys, String::new());
        repo.put_task(&Task::new("ok")).await.unwrap();

        let tasks = repo.list().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "ok");
    }
}
