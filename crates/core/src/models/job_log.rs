use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 作业执行记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLog {
    pub job_id: String,
    pub job_group: String,
    pub name: String,
    pub rule_id: String,
    pub node: String,
    pub hostname: String,
    pub command: String,
    pub output: String,
    pub success: bool,
    pub attempt: u32,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl JobLog {
    pub fn elapsed_ms(&self) -> i64 {
        (self.end_time - self.begin_time).num_milliseconds()
    }
}
