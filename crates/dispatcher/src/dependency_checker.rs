use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

pub use orchestrator_core::models::{evaluate_dependency, DependencyState};
use orchestrator_core::{models::Task, OrchestratorError, OrchestratorResult, TaskApi};
use tracing::debug;

pub struct DependencyChecker {
    api: Arc<dyn TaskApi>,
}

impl DependencyChecker {
    pub fn new(api: Arc<dyn TaskApi>) -> Self {
        Self { api }
    }

    /// 判断任务在指定节点上的全部依赖是否满足
    pub async fn evaluate(&self, task: &Task, node: &str) -> OrchestratorResult<DependencyState> {
        let mut waiting = None;
        for dep in &task.depends {
            let state = match self.api.get(&dep.depend_task_id).await {
                Ok(dep_task) => evaluate_dependency(&dep_task, dep, node),
                Err(OrchestratorError::TaskNotFound { id }) => {
                    DependencyState::Unsatisfiable(format!("依赖任务 {id} 不存在"))
                }
                Err(e) => return Err(e),
            };
            debug!(
                "任务 {} 依赖 {} 在节点 {} 的判定结果: {:?}",
                task.id, dep.depend_task_id, node, state
            );
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

    /// 从给定任务出发，沿依赖边收集全部任务
    pub async fn closure(&self, roots: &[String]) -> OrchestratorResult<Vec<Task>> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<String> = roots.iter().cloned().collect();
        let mut tasks = Vec::new();

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let task = self.api.get(&id).await?;
            for dep in &task.depends {
                if !seen.contains(&dep.depend_task_id) {
                    queue.push_back(dep.depend_task_id.clone());
                }
            }
            tasks.push(task);
        }
        Ok(tasks)
    }

    /// 按依赖关系排出安装顺序，同层按任务ID排序
    pub fn install_order(tasks: &[Task]) -> OrchestratorResult<Vec<String>> {
        let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for task in tasks {
            in_degree.entry(task.id.as_str()).or_insert(0);
            for dep in &task.depends {
                let dep_id = dep.depend_task_id.as_str();
                if !ids.contains(dep_id) {
                    continue;
                }
                *in_degree.entry(task.id.as_str()).or_insert(0) += 1;
                dependents.entry(dep_id).or_default().push(task.id.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.to_string());
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() < in_degree.len() {
            let mut cyclic: Vec<&str> = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(id, _)| *id)
                .collect();
            cyclic.sort_unstable();
            return Err(OrchestratorError::CircularDependency(cyclic.join(",")));
        }
        Ok(order)
    }
}
