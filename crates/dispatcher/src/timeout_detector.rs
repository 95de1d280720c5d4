use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use orchestrator_core::{
    config::TaskConfig,
    models::{comple_status, task_status, Task},
    OrchestratorResult, TaskRepository,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

/// 超出可表示范围的超时按不限时处理
fn window_of(seconds: i64) -> TimeDelta {
    TimeDelta::try_seconds(seconds).unwrap_or(TimeDelta::MAX)
}

/// 任务超时检测
///
/// 节点状态记录了开始时间却迟迟没有终态时，超过时间窗口后强制标记为超时并回写。
pub struct TaskTimeoutDetector {
    repo: Arc<dyn TaskRepository>,
    default_timeout: TimeDelta,
    scan_interval: Duration,
}

impl TaskTimeoutDetector {
    pub fn new(repo: Arc<dyn TaskRepository>, config: &TaskConfig) -> Self {
        Self {
            repo,
            default_timeout: window_of(config.timeout_seconds),
            scan_interval: Duration::from_secs(config.timeout_scan_seconds),
        }
    }

    /// 标记超时的节点状态，返回被标记的节点
    pub fn check(&self, task: &mut Task, now: DateTime<Utc>) -> Vec<String> {
        let window = if task.timeout > 0 {
            window_of(task.timeout)
        } else {
            self.default_timeout
        };

        let mut marked = Vec::new();
        for (node, status) in task.status.iter_mut() {
            let Some(start) = status.start_time else {
                continue;
            };
            if status.is_terminal() || now - start <= window {
                continue;
            }
            status.status = task_status::TIMEOUT.to_string();
            status.comple_status = comple_status::TIMEOUT.to_string();
            status.end_time = Some(now);
            status.take_time = (now - start).num_seconds();
            status.message = format!("执行超过 {} 秒未完成", window.num_seconds());
            marked.push(node.clone());
        }
        marked.sort();
        marked
    }

    /// 扫描全部任务，返回被标记超时的节点状态数量
    pub async fn scan(&self, now: DateTime<Utc>) -> OrchestratorResult<usize> {
        let mut total = 0;
        for mut task in self.repo.list_tasks().await? {
            let marked = self.check(&mut task, now);
            if marked.is_empty() {
                continue;
            }
            warn!("任务 {} 在节点 {:?} 上执行超时", task.id, marked);
            if let Err(e) = self.repo.put_task(&task).await {
                error!("回写任务 {} 超时状态失败: {}", task.id, e);
                continue;
            }
            total += marked.len();
        }
        Ok(total)
    }

    /// 启动周期扫描
    pub fn start(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.scan_interval);
            info!("启动任务超时检测，间隔 {:?}", self.scan_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.scan(Utc::now()).await {
                            error!("任务超时扫描失败: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("任务超时检测停止");
                        break;
                    }
                }
            }
        })
    }
}
