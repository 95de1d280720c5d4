use super::{comple_status, DetermineStrategy, Task, TaskDep};

/// 任务在某节点上的依赖判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyState {
    Ready,
    Waiting(String),
    Unsatisfiable(String),
}

/// 按判定策略评估单条依赖
pub fn evaluate_dependency(dep_task: &Task, dep: &TaskDep, node: &str) -> DependencyState {
    let succeeded = |n: &str| {
        dep_task
            .status
            .get(n)
            .is_some_and(|s| s.comple_status == comple_status::SUCCESS)
    };

    match dep.strategy {
        DetermineStrategy::SameNode => {
            if succeeded(node) {
                return DependencyState::Ready;
            }
            match dep_task.status.get(node) {
                Some(s) if !s.comple_status.is_empty() => DependencyState::Unsatisfiable(format!(
                    "依赖任务 {} 在节点 {} 的结果为 {}",
                    dep_task.id, node, s.comple_status
                )),
                _ => DependencyState::Waiting(format!(
                    "等待依赖任务 {} 在节点 {} 完成",
                    dep_task.id, node
                )),
            }
        }
        DetermineStrategy::AtLeastOnce => {
            if dep_task.status.keys().any(|n| succeeded(n)) {
                return DependencyState::Ready;
            }
            let scheduled: Vec<&String> = if dep_task.nodes.is_empty() {
                dep_task.status.keys().collect()
            } else {
                dep_task.nodes.iter().collect()
            };
            let all_failed = !scheduled.is_empty()
                && scheduled
                    .iter()
                    .all(|n| dep_task.status.get(*n).is_some_and(|s| s.is_fatal()));
            if all_failed {
                DependencyState::Unsatisfiable(format!(
                    "依赖任务 {} 在所有节点上均失败",
                    dep_task.id
                ))
            } else {
                DependencyState::Waiting(format!("等待依赖任务 {} 至少成功一次", dep_task.id))
            }
        }
    }
}
