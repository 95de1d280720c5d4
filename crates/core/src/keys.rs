use chrono::{DateTime, Utc};

use crate::config::KeysConfig;

/// 协调存储键布局
#[derive(Debug, Clone, Default)]
pub struct KeyLayout {
    prefixes: KeysConfig,
}

impl KeyLayout {
    pub fn new(prefixes: KeysConfig) -> Self {
        Self { prefixes }
    }

    pub fn nodes_prefix(&self) -> &str {
        &self.prefixes.nodes
    }

    pub fn node_key(&self, node_id: &str) -> String {
        format!("{}{}", self.prefixes.nodes, node_id)
    }

    pub fn jobs_prefix(&self) -> &str {
        &self.prefixes.jobs
    }

    /// 作业键：`<jobs>/<group>/<id>`
    pub fn job_key(&self, group: &str, job_id: &str) -> String {
        format!("{}{}/{}", self.prefixes.jobs, group, job_id)
    }

    pub fn once_prefix(&self) -> &str {
        &self.prefixes.once
    }

    pub fn once_key(&self, group: &str, job_id: &str) -> String {
        format!("{}{}/{}", self.prefixes.once, group, job_id)
    }

    pub fn groups_prefix(&self) -> &str {
        &self.prefixes.groups
    }

    pub fn group_key(&self, group_id: &str) -> String {
        format!("{}{}", self.prefixes.groups, group_id)
    }

    pub fn lock_key(&self, job_id: &str) -> String {
        format!("{}{}", self.prefixes.locks, job_id)
    }

    pub fn job_log_key(&self, job_id: &str, node_id: &str, at: DateTime<Utc>) -> String {
        format!(
            "{}{}/{}/{}",
            self.prefixes.job_logs,
            job_id,
            node_id,
            at.timestamp_nanos_opt().unwrap_or_else(|| at.timestamp_micros())
        )
    }

    pub fn job_logs_prefix(&self, job_id: &str) -> String {
        format!("{}{}/", self.prefixes.job_logs, job_id)
    }

    pub fn tasks_prefix(&self) -> &str {
        &self.prefixes.tasks
    }

    pub fn task_key(&self, task_id: &str) -> String {
        format!("{}{}", self.prefixes.tasks, task_id)
    }
}

/// 从存储键中取出ID（最后一段路径）
pub fn id_from_key(key: &str) -> &str {
    match key.rfind('/') {
        Some(index) => &key[index + 1..],
        None => "",
    }
}
