//! 测试替身

use async_trait::async_trait;
use orchestrator_core::{
    models::{Task, TaskStatus},
    CoordinationStore, KeyValue, LeaseId, OrchestratorError, OrchestratorResult, RawEvent,
    TaskApi,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// 包装协调存储，前 N 次续约返回错误
pub struct FlakyStore {
    inner: Arc<dyn CoordinationStore>,
    keep_alive_failures: AtomicU32,
    keep_alive_calls: AtomicU32,
    grant_calls: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn CoordinationStore>) -> Self {
        Self {
            inner,
            keep_alive_failures: AtomicU32::new(0),
            keep_alive_calls: AtomicU32::new(0),
            grant_calls: AtomicU32::new(0),
        }
    }

    /// 接下来的 n 次续约失败
    pub fn fail_keep_alive(&self, n: u32) {
        self.keep_alive_failures.store(n, Ordering::SeqCst);
    }

    pub fn keep_alive_calls(&self) -> u32 {
        self.keep_alive_calls.load(Ordering::SeqCst)
    }

    pub fn grant_calls(&self) -> u32 {
        self.grant_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoordinationStore for FlakyStore {
    async fn grant(&self, ttl_seconds: i64) -> OrchestratorResult<LeaseId> {
        self.grant_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.grant(ttl_seconds).await
    }

    async fn keep_alive_once(&self, lease: LeaseId) -> OrchestratorResult<()> {
        self.keep_alive_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .keep_alive_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(OrchestratorError::Store("injected keep-alive failure".to_string()));
        }
        self.inner.keep_alive_once(lease).await
    }

    async fn revoke(&self, lease: LeaseId) -> OrchestratorResult<()> {
        self.inner.revoke(lease).await
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> OrchestratorResult<()> {
        self.inner.put(key, value, lease).await
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        lease: Option<LeaseId>,
    ) -> OrchestratorResult<bool> {
        self.inner.put_if_absent(key, value, lease).await
    }

    async fn get(&self, key: &str) -> OrchestratorResult<Option<KeyValue>> {
        self.inner.get(key).await
    }

    async fn get_prefix(&self, prefix: &str) -> OrchestratorResult<Vec<KeyValue>> {
        self.inner.get_prefix(prefix).await
    }

    async fn delete(&self, key: &str) -> OrchestratorResult<bool> {
        self.inner.delete(key).await
    }

    async fn watch_prefix(&self, prefix: &str) -> OrchestratorResult<mpsc::Receiver<RawEvent>> {
        self.inner.watch_prefix(prefix).await
    }

    async fn close(&self) -> OrchestratorResult<()> {
        self.inner.close().await
    }
}

/// 一次状态查询的脚本结果
#[derive(Debug, Clone)]
pub enum StatusStep {
    Status(HashMap<String, TaskStatus>),
    Error,
}

impl StatusStep {
    pub fn of(entries: &[(&str, TaskStatus)]) -> Self {
        StatusStep::Status(
            entries
                .iter()
                .map(|(node, status)| (node.to_string(), status.clone()))
                .collect(),
        )
    }
}

/// 按脚本返回任务状态的 TaskApi
///
/// 每个任务的状态脚本逐次消费，只剩最后一步时重复返回该步。
#[derive(Clone, Default)]
pub struct ScriptedTaskApi {
    tasks: Arc<Mutex<HashMap<String, Task>>>,
    scripts: Arc<Mutex<HashMap<String, VecDeque<StatusStep>>>>,
    exec_calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    status_calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTaskApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(self, task: Task) -> Self {
        self.tasks.lock().unwrap().insert(task.id.clone(), task);
        self
    }

    pub fn with_script(self, task_id: &str, steps: Vec<StatusStep>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(task_id.to_string(), steps.into());
        self
    }

    pub fn exec_calls(&self) -> Vec<(String, Vec<String>)> {
        self.exec_calls.lock().unwrap().clone()
    }

    /// 按调用顺序记录的状态查询
    pub fn status_calls(&self) -> Vec<String> {
        self.status_calls.lock().unwrap().clone()
    }

    pub fn status_call_count(&self, task_id: &str) -> usize {
        self.status_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == task_id)
            .count()
    }
}

#[async_trait]
impl TaskApi for ScriptedTaskApi {
    async fn list(&self) -> OrchestratorResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self.tasks.lock().unwrap().values().cloned().collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    async fn get(&self, task_id: &str) -> OrchestratorResult<Task> {
        self.tasks
            .lock()
            .unwrap()
            .get(task_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::TaskNotFound {
                id: task_id.to_string(),
            })
    }

    async fn status(&self, task_id: &str) -> OrchestratorResult<HashMap<String, TaskStatus>> {
        self.status_calls.lock().unwrap().push(task_id.to_string());

        let mut scripts = self.scripts.lock().unwrap();
        let Some(steps) = scripts.get_mut(task_id) else {
            return Ok(HashMap::new());
        };
        let step = if steps.len() > 1 {
            steps.pop_front()
        } else {
            steps.front().cloned()
        };
        match step {
            Some(StatusStep::Status(status)) => Ok(status),
            Some(StatusStep::Error) => Err(OrchestratorError::Network(
                "control plane unreachable".to_string(),
            )),
            None => Ok(HashMap::new()),
        }
    }

    async fn exec(&self, task_id: &str, nodes: &[String]) -> OrchestratorResult<()> {
        if nodes.is_empty() {
            return Err(OrchestratorError::TaskExecution(
                "目标节点不能为空".to_string(),
            ));
        }
        self.exec_calls
            .lock()
            .unwrap()
            .push((task_id.to_string(), nodes.to_vec()));
        Ok(())
    }
}
