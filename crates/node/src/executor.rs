use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use orchestrator_core::{
    config::ExecutorConfig,
    models::{Cmd, Job, JobCounter, JobKind, JobLog},
    CoordinationStore, KeyLayout, LeaseId, OrchestratorError, OrchestratorResult,
};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::cron_scheduler::{JobRunner, Timer};

/// 一次命令执行的结果
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub success: bool,
    pub output: String,
}

/// 释放并发名额
struct RunningGuard(Arc<JobCounter>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Alone/Interval 作业持有的分布式锁
struct JobLock {
    lease: LeaseId,
    keeper: Option<JoinHandle<()>>,
}

/// 本节点的作业执行器
///
/// 负责并发限制、分布式锁、重试，以 `<shell> -c <cmd>` 执行命令并把执行记录写回存储。
pub struct JobExecutor {
    store: Arc<dyn CoordinationStore>,
    keys: KeyLayout,
    node_id: String,
    hostname: String,
    config: ExecutorConfig,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        keys: KeyLayout,
        node_id: impl Into<String>,
        hostname: impl Into<String>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            keys,
            node_id: node_id.into(),
            hostname: hostname.into(),
            config,
        }
    }

    /// 计算锁的TTL（秒），0 表示规则周期无效
    pub fn lock_ttl(&self, cmd: &Cmd) -> OrchestratorResult<i64> {
        let timer = Timer::parse(cmd.timer())?;
        let Some(first) = timer.next_after(Utc::now()) else {
            return Ok(0);
        };
        let Some(second) = timer.next_after(first) else {
            return Ok(0);
        };
        let mut ttl = (second - first).num_seconds();
        if ttl == 0 {
            return Ok(0);
        }

        let max = self.config.lock_ttl_seconds;
        if cmd.job.kind == JobKind::Interval {
            return Ok((ttl - 2).min(max).max(1));
        }

        // 平均耗时向上取整到秒
        let cost = (cmd.job.avg_time + 999) / 1000;
        if ttl >= cost {
            ttl -= cost;
        }
        Ok(ttl.min(max).max(2))
    }

    async fn lock(&self, cmd: &Cmd) -> OrchestratorResult<Option<JobLock>> {
        let ttl = self.lock_ttl(cmd)?;
        if ttl == 0 {
            warn!("job[{}] rule[{}] 定时周期无效，跳过执行", cmd.job.id, cmd.rule.id);
            return Ok(None);
        }

        let lease = self.store.grant(ttl).await?;
        let key = self.keys.lock_key(&cmd.job.id);
        if !self.store.put_if_absent(&key, &self.node_id, Some(lease)).await? {
            debug!("job[{}] 锁已被其他节点持有", cmd.job.id);
            if let Err(e) = self.store.revoke(lease).await {
                warn!("撤销未使用的锁租约 {} 失败: {}", lease, e);
            }
            return Ok(None);
        }

        let keeper = (cmd.job.kind == JobKind::Alone).then(|| {
            let store = Arc::clone(&self.store);
            let period = Duration::from_secs((ttl as u64 / 2).max(1));
            tokio::spawn(async move {
                loop {
                    sleep(period).await;
                    if let Err(e) = store.keep_alive_once(lease).await {
                        warn!("锁租约 {} 续约失败: {}", lease, e);
                        break;
                    }
                }
            })
        });

        Ok(Some(JobLock { lease, keeper }))
    }

    /// Alone 作业执行完立即释放锁，Interval 作业让锁自然过期
    async fn unlock(&self, lock: JobLock) {
        if let Some(keeper) = lock.keeper {
            keeper.abort();
            if let Err(e) = self.store.revoke(lock.lease).await {
                warn!("撤销锁租约 {} 失败: {}", lock.lease, e);
            }
        }
    }

    /// 执行一次命令
    pub async fn execute(&self, job: &Job) -> ExecOutput {
        let mut command = Command::new(&self.config.shell);
        command
            .arg("-c")
            .arg(&job.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecOutput {
                    success: false,
                    output: format!("启动命令失败: {e}"),
                }
            }
        };

        let limit = if job.timeout > 0 {
            job.timeout as u64
        } else {
            self.config.default_timeout_seconds
        };

        let result = if limit > 0 {
            match timeout(Duration::from_secs(limit), child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    return ExecOutput {
                        success: false,
                        output: OrchestratorError::ExecutionTimeout(format!(
                            "作业 {} 执行超过 {} 秒",
                            job.id, limit
                        ))
                        .to_string(),
                    }
                }
            }
        } else {
            child.wait_with_output().await
        };

        match result {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                ExecOutput {
                    success: output.status.success(),
                    output: text,
                }
            }
            Err(e) => ExecOutput {
                success: false,
                output: format!("等待命令结束失败: {e}"),
            },
        }
    }

    /// 按重试次数执行，返回最后一次的结果与尝试次数
    async fn execute_with_retry(&self, job: &Job) -> (ExecOutput, u32, chrono::DateTime<Utc>) {
        let attempts = job.retry.max(1);
        let begin = Utc::now();
        let mut attempt = 1;
        loop {
            let output = self.execute(job).await;
            if output.success || attempt >= attempts {
                return (output, attempt, begin);
            }
            warn!(
                "作业 {} 第 {} 次执行失败，{} 秒后重试",
                job.id, attempt, job.interval
            );
            if job.interval > 0 {
                sleep(Duration::from_secs(job.interval)).await;
            }
            attempt += 1;
        }
    }

    async fn write_log(&self, log: &JobLog) {
        let key = self.keys.job_log_key(&log.job_id, &self.node_id, log.end_time);
        let value = match serde_json::to_string(log) {
            Ok(value) => value,
            Err(e) => {
                error!("序列化作业 {} 执行记录失败: {}", log.job_id, e);
                return;
            }
        };
        if let Err(e) = self.store.put(&key, &value, None).await {
            error!("写入作业 {} 执行记录失败: {}", log.job_id, e);
        }
    }

    fn build_log(
        &self,
        job: &Job,
        rule_id: &str,
        output: ExecOutput,
        attempt: u32,
        begin: chrono::DateTime<Utc>,
    ) -> JobLog {
        JobLog {
            job_id: job.id.clone(),
            job_group: job.group.clone(),
            name: job.name.clone(),
            rule_id: rule_id.to_string(),
            node: self.node_id.clone(),
            hostname: self.hostname.clone(),
            command: job.command.clone(),
            output: output.output,
            success: output.success,
            attempt,
            begin_time: begin,
            end_time: Utc::now(),
        }
    }

    async fn run_job(&self, job: &Job, rule_id: &str) -> bool {
        let (output, attempt, begin) = self.execute_with_retry(job).await;
        let log = self.build_log(job, rule_id, output, attempt, begin);
        let success = log.success;

        job.counter.record_run();
        metrics::counter!(
            "orchestrator_job_runs_total",
            "result" => if success { "success" } else { "failure" }
        )
        .increment(1);

        if success {
            info!("作业 {} 执行成功，耗时 {}ms", job.id, log.elapsed_ms());
        } else {
            warn!("作业 {} 执行失败: {}", job.id, log.output.trim());
        }
        self.write_log(&log).await;
        success
    }
}

#[async_trait]
impl JobRunner for JobExecutor {
    async fn run_cmd(&self, cmd: Cmd) -> bool {
        let job = Arc::clone(&cmd.job);

        if !job.counter.try_acquire(job.parallels) {
            let now = Utc::now();
            let output = ExecOutput {
                success: false,
                output: format!(
                    "job[{}] running on[{}] running:[{}]",
                    job.id,
                    self.node_id,
                    job.counter.running()
                ),
            };
            warn!("{}", output.output);
            let log = self.build_log(&job, &cmd.rule.id, output, 0, now);
            self.write_log(&log).await;
            return false;
        }
        let _guard = RunningGuard(Arc::clone(&job.counter));

        let lock = if job.kind == JobKind::Common {
            None
        } else {
            match self.lock(&cmd).await {
                Ok(Some(lock)) => Some(lock),
                Ok(None) => return false,
                Err(e) => {
                    warn!("获取作业 {} 的锁失败: {}", job.id, e);
                    return false;
                }
            }
        };

        let success = self.run_job(&job, &cmd.rule.id).await;

        if let Some(lock) = lock {
            self.unlock(lock).await;
        }
        success
    }

    async fn run_once(&self, job: Arc<Job>) -> bool {
        let rule_id = job.rules.first().map(|r| r.id.clone()).unwrap_or_default();
        self.run_job(&job, &rule_id).await
    }
}
