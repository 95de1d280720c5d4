use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use orchestrator_core::{
    config::TaskConfig,
    models::{Task, TaskOutput, TaskStatus},
    OrchestratorError, OrchestratorResult, TaskApi,
};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// 一次任务图执行的最终结果
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 目标节点上的任务及其后续任务全部完成
    Done,
    /// 某个目标节点报告错误、失败或超时
    Fatal {
        task: String,
        node: String,
        status: TaskStatus,
        outputs: Vec<TaskOutput>,
    },
    /// 连续多次无法获取任务或状态
    Unreachable {
        task: String,
        failures: u32,
        last_error: String,
    },
}

impl Outcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done)
    }
}

/// 轮询过程中的进度事件
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// 非目标节点上的状态，仅输出标记
    Skipped { task: String, node: String },
    /// 节点状态发生变化
    Transition {
        task: String,
        node: String,
        status: String,
        comple_status: String,
    },
    /// 状态未变化
    Waiting { task: String, node: String },
    /// 开始跟踪后续任务
    Dispatched { task: String, nodes: Vec<String> },
    Fatal {
        task: String,
        node: String,
        outputs: Vec<TaskOutput>,
    },
}

/// 进度输出
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// 输出到终端
#[derive(Debug, Default)]
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn emit(&self, event: ProgressEvent) {
        use std::io::Write;

        let mut out = std::io::stdout().lock();
        let _ = match event {
            ProgressEvent::Skipped { .. } | ProgressEvent::Waiting { .. } => write!(out, "."),
            ProgressEvent::Transition {
                task,
                node,
                status,
                comple_status,
            } => writeln!(
                out,
                "\n任务 {task} 在节点 {node} 状态: {status} {comple_status}"
            ),
            ProgressEvent::Dispatched { task, nodes } => {
                writeln!(out, "\n开始跟踪任务 {task}，节点 {}", nodes.join(","))
            }
            ProgressEvent::Fatal {
                task,
                node,
                outputs,
            } => {
                let _ = writeln!(out, "\n任务 {task} 在节点 {node} 执行失败");
                for output in outputs {
                    let _ = writeln!(out, "---- {} ----\n{}", output.node_id, output.body);
                }
                Ok(())
            }
        };
        let _ = out.flush();
    }
}

/// 记录全部事件，用于测试与回放
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// 按顺序输出的状态变化 (task, node, status, comple_status)
    pub fn transitions(&self) -> Vec<(String, String, String, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::Transition {
                    task,
                    node,
                    status,
                    comple_status,
                } => Some((task, node, status, comple_status)),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// 单个任务在目标节点上的轮询结果
enum Watch {
    Complete(Task),
    Stop(Outcome),
}

/// 跨节点任务图执行器
///
/// 提交任务后按固定间隔轮询各节点状态，目标节点全部完成后继续跟踪
/// 调度状态中记录的后续任务。致命状态与控制面不可达以 `Outcome` 返回，
/// 由调用方决定进程退出码。
pub struct TaskGraphExecutor {
    api: Arc<dyn TaskApi>,
    progress: Arc<dyn ProgressSink>,
    poll_interval: Duration,
    max_check_fail: u32,
}

impl TaskGraphExecutor {
    pub fn new(api: Arc<dyn TaskApi>, progress: Arc<dyn ProgressSink>, config: &TaskConfig) -> Self {
        Self {
            api,
            progress,
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            max_check_fail: config.max_check_fail,
        }
    }

    /// 提交任务到指定节点并跟踪执行
    pub async fn exec(&self, task_id: &str, nodes: &[String]) -> OrchestratorResult<Outcome> {
        if nodes.is_empty() {
            return Err(OrchestratorError::TaskExecution(
                "目标节点不能为空".to_string(),
            ));
        }
        self.api.exec(task_id, nodes).await?;
        info!("任务 {} 已提交到节点 {:?}", task_id, nodes);
        Ok(self.status(task_id, nodes).await)
    }

    /// 跟踪任务及其后续任务，直到全部完成或出现致命状态
    pub async fn status(&self, task_id: &str, nodes: &[String]) -> Outcome {
        let mut visited: HashSet<(String, String)> = HashSet::new();
        let mut stack = vec![(task_id.to_string(), nodes.to_vec())];

        while let Some((task_id, nodes)) = stack.pop() {
            let nodes: Vec<String> = nodes
                .into_iter()
                .filter(|node| visited.insert((task_id.clone(), node.clone())))
                .collect();
            if nodes.is_empty() {
                debug!("任务 {} 已跟踪过，跳过", task_id);
                continue;
            }

            let task = match self.watch(&task_id, &nodes).await {
                Watch::Complete(task) => task,
                Watch::Stop(outcome) => return outcome,
            };

            // 后续任务按节点分组，只跟踪声明了它的节点
            let mut order: Vec<String> = Vec::new();
            let mut next: HashMap<String, Vec<String>> = HashMap::new();
            for node in &nodes {
                for next_task in task.next_tasks_for(node) {
                    let targets = next.entry(next_task.clone()).or_insert_with(|| {
                        order.push(next_task.clone());
                        Vec::new()
                    });
                    if !targets.contains(node) {
                        targets.push(node.clone());
                    }
                }
            }

            for next_task in order.into_iter().rev() {
                if let Some(targets) = next.remove(&next_task) {
                    stack.push((next_task, targets));
                }
            }
        }

        Outcome::Done
    }

    /// 轮询单个任务直到所有目标节点完成
    async fn watch(&self, task_id: &str, nodes: &[String]) -> Watch {
        self.progress.emit(ProgressEvent::Dispatched {
            task: task_id.to_string(),
            nodes: nodes.to_vec(),
        });

        let mut check_fail = 0u32;
        let mut last_state: HashMap<String, (String, String)> = HashMap::new();
        let mut completed: HashSet<String> = HashSet::new();

        loop {
            metrics::counter!("orchestrator_task_polls_total").increment(1);

            let fetched = match self.api.get(task_id).await {
                Ok(task) => self.api.status(task_id).await.map(|status| (task, status)),
                Err(e) => Err(e),
            };
            let (task, status) = match fetched {
                Ok(fetched) => fetched,
                Err(e) => {
                    check_fail += 1;
                    warn!(
                        "获取任务 {} 状态失败({}/{}): {}",
                        task_id, check_fail, self.max_check_fail, e
                    );
                    if check_fail >= self.max_check_fail {
                        return Watch::Stop(Outcome::Unreachable {
                            task: task_id.to_string(),
                            failures: check_fail,
                            last_error: e.to_string(),
                        });
                    }
                    sleep(self.poll_interval).await;
                    continue;
                }
            };

            let mut entries: Vec<(&String, &TaskStatus)> = status.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            for (node, node_status) in entries {
                if !nodes.contains(node) {
                    self.progress.emit(ProgressEvent::Skipped {
                        task: task_id.to_string(),
                        node: node.clone(),
                    });
                    continue;
                }

                if node_status.is_fatal() {
                    let outputs: Vec<TaskOutput> = task.outputs_for(nodes).cloned().collect();
                    self.progress.emit(ProgressEvent::Fatal {
                        task: task_id.to_string(),
                        node: node.clone(),
                        outputs: outputs.clone(),
                    });
                    return Watch::Stop(Outcome::Fatal {
                        task: task_id.to_string(),
                        node: node.clone(),
                        status: node_status.clone(),
                        outputs,
                    });
                }

                let state = (node_status.status.clone(), node_status.comple_status.clone());
                if last_state.get(node) != Some(&state) {
                    self.progress.emit(ProgressEvent::Transition {
                        task: task_id.to_string(),
                        node: node.clone(),
                        status: state.0.clone(),
                        comple_status: state.1.clone(),
                    });
                    last_state.insert(node.clone(), state);
                } else {
                    self.progress.emit(ProgressEvent::Waiting {
                        task: task_id.to_string(),
                        node: node.clone(),
                    });
                }

                if node_status.is_complete() {
                    completed.insert(node.clone());
                }
            }

            check_fail = 0;
            if nodes.iter().all(|node| completed.contains(node)) {
                info!("任务 {} 在节点 {:?} 上全部完成", task_id, nodes);
                return Watch::Complete(task);
            }
            sleep(self.poll_interval).await;
        }
    }
}
