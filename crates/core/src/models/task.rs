use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 节点执行状态取值
pub mod task_status {
    pub const CREATE: &str = "create";
    pub const INIT: &str = "init";
    pub const START: &str = "start";
    pub const EXEC: &str = "exec";
    pub const COMPLETE: &str = "complete";
    pub const TIMEOUT: &str = "timeout";
}

/// 调度系统上报的完成状态取值
pub mod comple_status {
    pub const SUCCESS: &str = "Success";
    pub const FAILURE: &str = "Failure";
    /// 控制面历史上写作 "Unknow"，判断时按前缀匹配以兼容两种拼写
    pub const UNKNOWN: &str = "Unknow";
    pub const TIMEOUT: &str = "Timeout";
}

/// 管理端对单个节点的调度结论
pub mod scheduler_status {
    pub const WAITING: &str = "Waiting";
    pub const SUCCESS: &str = "Success";
    pub const FAILURE: &str = "Failure";
}

/// 依赖判定策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DetermineStrategy {
    /// 依赖任务在任一节点成功即可
    #[default]
    AtLeastOnce,
    /// 依赖任务必须在同一节点成功
    SameNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDep {
    pub depend_task_id: String,
    #[serde(rename = "strategy", default)]
    pub strategy: DetermineStrategy,
}

/// 任务在单个节点上的执行状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub comple_status: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub take_time: i64,
    #[serde(default)]
    pub shell_code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl TaskStatus {
    /// 执行或调度任一信号报告完成即视为完成
    pub fn is_complete(&self) -> bool {
        self.status == task_status::COMPLETE || self.comple_status == comple_status::SUCCESS
    }

    pub fn is_fatal(&self) -> bool {
        self.status.contains("error")
            || self.status == task_status::TIMEOUT
            || self.comple_status.contains(comple_status::FAILURE)
            || self.comple_status.contains(comple_status::UNKNOWN)
    }

    /// 是否已有终态
    pub fn is_terminal(&self) -> bool {
        !self.comple_status.is_empty()
            || self.status == task_status::COMPLETE
            || self.status == task_status::TIMEOUT
    }
}

/// 单个节点上的调度状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub scheduler_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduler_master: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_tasks: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskScheduler {
    /// 立即调度（Intime）或触发调度（Passive）
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub status: HashMap<String, SchedulerStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutputStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub condition_type: String,
    #[serde(default)]
    pub condition_status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_groups: Vec<String>,
}

/// 节点执行输出
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub node_id: String,
    #[serde(default)]
    pub job_id: String,
    #[serde(default, rename = "type")]
    pub output_type: String,
    #[serde(default)]
    pub status: Vec<TaskOutputStatus>,
    #[serde(default)]
    pub exec_status: String,
    #[serde(default)]
    pub body: String,
}

/// 编排任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub depends: Vec<TaskDep>,
    /// 超时（秒）
    #[serde(default, rename = "time_out")]
    pub timeout: i64,
    #[serde(default)]
    pub status: HashMap<String, TaskStatus>,
    #[serde(default)]
    pub scheduler: TaskScheduler,
    #[serde(default, rename = "out_put")]
    pub output: Vec<TaskOutput>,
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub complete_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub run_mode: String,
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            group_id: None,
            nodes: Vec::new(),
            depends: Vec::new(),
            timeout: 0,
            status: HashMap::new(),
            scheduler: TaskScheduler::default(),
            output: Vec::new(),
            create_time: Utc::now(),
            start_time: None,
            complete_time: None,
            event_id: String::new(),
            run_mode: String::new(),
        }
    }

    /// 节点完成后需要触发的后续任务，去重且保持声明顺序
    pub fn next_tasks_for(&self, node_id: &str) -> Vec<String> {
        let from_scheduler = self
            .scheduler
            .status
            .get(node_id)
            .into_iter()
            .flat_map(|s| s.next_tasks.iter());
        let from_output = self
            .output
            .iter()
            .filter(|o| o.node_id == node_id)
            .flat_map(|o| o.status.iter())
            .flat_map(|s| s.next_tasks.iter());

        let mut next = Vec::new();
        for id in from_scheduler.chain(from_output) {
            if !id.is_empty() && !next.contains(id) {
                next.push(id.clone());
            }
        }
        next
    }

    /// 替换指定节点的输出
    pub fn update_output(&mut self, output: TaskOutput) {
        match self.output.iter_mut().find(|o| o.node_id == output.node_id) {
            Some(existing) => *existing = output,
            None => self.output.push(output),
        }
    }

    /// 指定节点的输出内容
    pub fn outputs_for<'a>(&'a self, nodes: &'a [String]) -> impl Iterator<Item = &'a TaskOutput> {
        self.output.iter().filter(move |o| nodes.contains(&o.node_id))
    }
}
