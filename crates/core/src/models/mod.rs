//! # 数据模型
//!
//! 定义节点注册与任务编排系统的核心数据结构。
//!
//! ## 核心模型
//!
//! ### HostNode - 节点
//! 集群中的一台主机，由角色集合、标签、健康状况与租约信息组合而成。
//! 节点记录绑定租约写入协调存储，租约过期后记录自动消失。
//!
//! ### Job / JobRule / Cmd - 作业
//! 作业由若干规则组成，每条规则指定目标节点与调度表达式。
//! `Cmd` 是 `(Job, Rule)` 在某个节点上的具体化，ID 为 `job.id + rule.id`，
//! 在作业修改前后保持稳定，供本地调度器区分"同一槽位换了定时器"和"新槽位"。
//!
//! ### Task - 编排任务
//! 运维流程中的一个步骤，带有依赖边、逐节点执行状态，以及完成后需要触发的后续任务。
//!
//! ## 序列化约定
//!
//! 写入协调存储的结构均使用 JSON，字段名与控制面保持一致（例如规则中的 `nids`、`gids`）。

pub mod dependency;
pub mod group;
pub mod job;
pub mod job_log;
pub mod node;
pub mod task;
pub mod timer;

pub use dependency::{evaluate_dependency, DependencyState};
pub use group::NodeGroup;
pub use job::{Cmd, CmdId, Job, JobCounter, JobKind, JobRule};
pub use job_log::JobLog;
pub use node::{HostNode, HostRoles, NodeHealth, NodeRole, NodeStatus};
pub use task::{
    comple_status, scheduler_status, task_status, DetermineStrategy, SchedulerStatus, Task,
    TaskDep, TaskOutput, TaskOutputStatus, TaskScheduler, TaskStatus,
};
pub use timer::Timer;
