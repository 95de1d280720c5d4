//! 测试数据构建器

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orchestrator_core::models::{
    DetermineStrategy, HostNode, Job, JobKind, JobRule, NodeRole, SchedulerStatus, Task, TaskDep,
    TaskStatus,
};

/// 构建测试用 Job
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            job: Job {
                id: id.to_string(),
                name: format!("{id}-name"),
                group: "default".to_string(),
                command: "true".to_string(),
                user: String::new(),
                rules: vec![],
                pause: false,
                timeout: 0,
                parallels: 0,
                retry: 0,
                interval: 0,
                kind: JobKind::Common,
                avg_time: 0,
                fail_notify: false,
                to: vec![],
                run_once: false,
                counter: Arc::default(),
            },
        }
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.job.group = group.to_string();
        self
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.job.command = command.to_string();
        self
    }

    /// 添加一条按节点ID匹配的规则
    pub fn with_rule(mut self, rule_id: &str, timer: &str, node_ids: &[&str]) -> Self {
        self.job.rules.push(JobRule {
            id: rule_id.to_string(),
            timer: timer.to_string(),
            node_ids: node_ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        });
        self
    }

    /// 添加一条按分组匹配的规则
    pub fn with_group_rule(mut self, rule_id: &str, timer: &str, group_ids: &[&str]) -> Self {
        self.job.rules.push(JobRule {
            id: rule_id.to_string(),
            timer: timer.to_string(),
            group_ids: group_ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        });
        self
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.job.kind = kind;
        self.job.normalize();
        self
    }

    pub fn with_parallels(mut self, parallels: i64) -> Self {
        self.job.parallels = parallels;
        self
    }

    pub fn with_retry(mut self, retry: u32, interval: u64) -> Self {
        self.job.retry = retry;
        self.job.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: i64) -> Self {
        self.job.timeout = timeout;
        self
    }

    pub fn paused(mut self) -> Self {
        self.job.pause = true;
        self
    }

    pub fn run_once(mut self) -> Self {
        self.job.run_once = true;
        self
    }

    pub fn build(self) -> Job {
        self.job
    }

    /// 序列化为存储中的JSON值
    pub fn to_json(self) -> String {
        serde_json::to_string(&self.job).unwrap()
    }
}

/// 构建测试用 Task
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            task: Task::new(id),
        }
    }

    pub fn with_group_id(mut self, group_id: &str) -> Self {
        self.task.group_id = Some(group_id.to_string());
        self
    }

    pub fn with_nodes(mut self, nodes: &[&str]) -> Self {
        self.task.nodes = nodes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_depend(mut self, task_id: &str, strategy: DetermineStrategy) -> Self {
        self.task.depends.push(TaskDep {
            depend_task_id: task_id.to_string(),
            strategy,
        });
        self
    }

    /// 设置任务在节点上完成后触发的下游任务
    pub fn with_next_tasks(mut self, node: &str, next: &[&str]) -> Self {
        self.task.scheduler.status.insert(
            node.to_string(),
            SchedulerStatus {
                status: "Success".to_string(),
                next_tasks: next.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        );
        self
    }

    pub fn with_status(mut self, node: &str, status: &str, comple_status: &str) -> Self {
        self.task
            .status
            .insert(node.to_string(), task_status(status, comple_status));
        self
    }

    pub fn with_start_time(mut self, start: DateTime<Utc>) -> Self {
        self.task.start_time = Some(start);
        self
    }

    pub fn with_timeout(mut self, timeout: i64) -> Self {
        self.task.timeout = timeout;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// 构建单个节点状态
pub fn task_status(status: &str, comple_status: &str) -> TaskStatus {
    TaskStatus {
        status: status.to_string(),
        comple_status: comple_status.to_string(),
        ..Default::default()
    }
}

/// 构建测试用 HostNode
pub struct NodeBuilder {
    node: HostNode,
}

impl NodeBuilder {
    pub fn new(uuid: &str) -> Self {
        Self {
            node: HostNode::new(uuid, format!("{uuid}-host"), "10.0.0.1"),
        }
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.node.roles.add(role);
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.node.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.node.labels.extend(labels);
        self
    }

    pub fn alive(mut self) -> Self {
        self.node.up();
        self
    }

    pub fn build(self) -> HostNode {
        self.node
    }
}
