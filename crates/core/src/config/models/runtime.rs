use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    pub tick_millis: u64,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self { tick_millis: 1000 }
    }
}

impl CronConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_millis == 0 {
            return Err(anyhow::anyhow!("调度检查间隔必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub shell: String,
    /// 作业未设置超时时使用的默认超时（秒），0表示不限制
    pub default_timeout_seconds: u64,
    /// Alone/Interval 作业分布式锁的TTL上限（秒）
    pub lock_ttl_seconds: i64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            default_timeout_seconds: 0,
            lock_ttl_seconds: 300,
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.shell.is_empty() {
            return Err(anyhow::anyhow!("执行Shell不能为空"));
        }
        if self.lock_ttl_seconds <= 0 {
            return Err(anyhow::anyhow!("锁TTL必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub poll_interval_seconds: u64,
    pub max_check_fail: u32,
    pub timeout_seconds: i64,
    pub timeout_scan_seconds: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 3, // 3秒轮询一次
            max_check_fail: 3,        // 连续3次失败后放弃
            timeout_seconds: 180,     // 3分钟未完成视为超时
            timeout_scan_seconds: 30,
        }
    }
}

impl TaskConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("任务轮询间隔必须大于0"));
        }
        if self.max_check_fail == 0 {
            return Err(anyhow::anyhow!("最大连续失败次数必须大于0"));
        }
        if self.timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("任务超时时间必须大于0"));
        }
        if self.timeout_scan_seconds == 0 {
            return Err(anyhow::anyhow!("超时扫描间隔必须大于0"));
        }
        Ok(())
    }
}
