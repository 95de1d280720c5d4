use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use super::{HostNode, NodeGroup, NodeRole, Timer};
use crate::{OrchestratorError, OrchestratorResult};

/// Cmd 标识，由作业ID与规则ID拼接而成
pub type CmdId = String;

/// 作业类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum JobKind {
    /// 普通作业，可在多个节点并行
    #[default]
    Common,
    /// 单例作业，同一时刻全局只运行一个
    Alone,
    /// 间隔作业，一个周期内全局只运行一次
    Interval,
}

impl From<JobKind> for i32 {
    fn from(kind: JobKind) -> i32 {
        match kind {
            JobKind::Common => 0,
            JobKind::Alone => 1,
            JobKind::Interval => 2,
        }
    }
}

impl TryFrom<i32> for JobKind {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(JobKind::Common),
            1 => Ok(JobKind::Alone),
            2 => Ok(JobKind::Interval),
            other => Err(format!("未知的作业类型: {other}")),
        }
    }
}

/// 作业运行计数，修改作业时在新旧定义之间共享
#[derive(Debug, Default)]
pub struct JobCounter {
    running: AtomicI64,
    runs: AtomicU64,
}

impl JobCounter {
    /// 当前正在运行的实例数
    pub fn running(&self) -> i64 {
        self.running.load(Ordering::SeqCst)
    }

    /// 累计运行次数
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// 并发数未达上限时占用一个名额
    pub fn try_acquire(&self, parallels: i64) -> bool {
        if parallels <= 0 {
            self.running.fetch_add(1, Ordering::SeqCst);
            return true;
        }
        self.running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < parallels).then_some(current + 1)
            })
            .is_ok()
    }

    pub fn release(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn record_run(&self) -> u64 {
        self.runs.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// 作业规则：目标节点与定时表达式
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRule {
    pub id: String,
    pub timer: String,
    #[serde(rename = "gids", default)]
    pub group_ids: Vec<String>,
    #[serde(rename = "nids", default)]
    pub node_ids: Vec<String>,
    #[serde(rename = "exclude_nids", default)]
    pub exclude_node_ids: Vec<String>,
    /// 节点角色选择器，节点具备任一角色即命中
    #[serde(default)]
    pub roles: Vec<NodeRole>,
    /// 节点标签选择器，全部匹配才命中
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl JobRule {
    /// 判断规则是否作用于指定节点
    pub fn included(&self, node: &HostNode, groups: &HashMap<String, NodeGroup>) -> bool {
        if self.exclude_node_ids.iter().any(|id| id == &node.uuid) {
            return false;
        }

        if self.node_ids.iter().any(|id| id == &node.uuid) {
            return true;
        }

        if self
            .group_ids
            .iter()
            .filter_map(|gid| groups.get(gid))
            .any(|g| g.includes(&node.uuid))
        {
            return true;
        }

        if !self.roles.is_empty() && self.roles.iter().any(|r| node.has_role(*r)) {
            return true;
        }

        !self.labels.is_empty()
            && self
                .labels
                .iter()
                .all(|(k, v)| node.label(k) == Some(v.as_str()))
    }
}

/// 作业定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub group: String,
    #[serde(rename = "cmd")]
    pub command: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub rules: Vec<JobRule>,
    #[serde(default)]
    pub pause: bool,
    /// 执行超时（秒），0表示不限制
    #[serde(default)]
    pub timeout: i64,
    /// 单节点最大并发数，0表示不限制
    #[serde(default)]
    pub parallels: i64,
    #[serde(default)]
    pub retry: u32,
    /// 重试间隔（秒）
    #[serde(default)]
    pub interval: u64,
    #[serde(default)]
    pub kind: JobKind,
    /// 平均执行时间（毫秒）
    #[serde(default)]
    pub avg_time: i64,
    #[serde(default)]
    pub fail_notify: bool,
    #[serde(default)]
    pub to: Vec<String>,
    /// 仅在一次性命名空间中有效：收到即执行一次
    #[serde(default)]
    pub run_once: bool,
    #[serde(skip)]
    pub counter: Arc<JobCounter>,
}

impl Job {
    /// 从存储中的JSON值解析作业
    pub fn from_json(value: &str) -> OrchestratorResult<Self> {
        let mut job: Job = serde_json::from_str(value)?;
        job.check()?;
        Ok(job)
    }

    /// 规范化并校验作业字段
    pub fn check(&mut self) -> OrchestratorResult<()> {
        self.id = self.id.trim().to_string();
        if self.id.is_empty() || self.id.contains('/') {
            return Err(OrchestratorError::InvalidJob(format!(
                "非法的作业ID: {:?}",
                self.id
            )));
        }

        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(OrchestratorError::InvalidJob(format!(
                "作业 {} 名称不能为空",
                self.id
            )));
        }

        self.group = self.group.trim().to_string();
        if self.command.trim().is_empty() {
            return Err(OrchestratorError::InvalidJob(format!(
                "作业 {} 命令不能为空",
                self.id
            )));
        }

        for rule in &self.rules {
            if rule.timer.trim().is_empty() {
                if self.run_once {
                    continue;
                }
                return Err(OrchestratorError::InvalidJob(format!(
                    "作业 {} 规则 {} 缺少定时表达式",
                    self.id, rule.id
                )));
            }
            if let Err(e) = Timer::parse(&rule.timer) {
                return Err(OrchestratorError::InvalidJob(format!(
                    "作业 {} 规则 {}: {}",
                    self.id, rule.id, e
                )));
            }
        }

        self.normalize();
        Ok(())
    }

    /// 单例作业强制单并发
    pub fn normalize(&mut self) {
        if self.kind == JobKind::Alone {
            self.parallels = 1;
        }
    }

    /// 生成该作业在指定节点上的全部 Cmd，暂停的作业不生成
    pub fn cmds(
        self: &Arc<Self>,
        node: &HostNode,
        groups: &HashMap<String, NodeGroup>,
    ) -> BTreeMap<CmdId, Cmd> {
        if self.pause {
            return BTreeMap::new();
        }

        self.rules
            .iter()
            .filter(|rule| rule.included(node, groups))
            .map(|rule| {
                let cmd = Cmd {
                    job: Arc::clone(self),
                    rule: rule.clone(),
                };
                (cmd.id(), cmd)
            })
            .collect()
    }

    /// 作业是否有规则作用于指定节点
    pub fn is_run_on(&self, node: &HostNode, groups: &HashMap<String, NodeGroup>) -> bool {
        self.rules.iter().any(|rule| rule.included(node, groups))
    }

    /// 作业引用的分组
    pub fn group_ids(&self) -> impl Iterator<Item = &String> {
        self.rules.iter().flat_map(|r| r.group_ids.iter())
    }

    /// 更新平均执行时间
    pub fn record_duration(&mut self, elapsed_ms: i64) {
        if self.avg_time == 0 {
            self.avg_time = elapsed_ms;
        } else {
            self.avg_time = (self.avg_time + elapsed_ms) / 2;
        }
    }
}

/// 作业规则在本节点上的具体化
#[derive(Debug, Clone)]
pub struct Cmd {
    pub job: Arc<Job>,
    pub rule: JobRule,
}

impl Cmd {
    pub fn id(&self) -> CmdId {
        format!("{}{}", self.job.id, self.rule.id)
    }

    pub fn timer(&self) -> &str {
        &self.rule.timer
    }
}
