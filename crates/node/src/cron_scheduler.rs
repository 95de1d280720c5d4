use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
pub use orchestrator_core::models::Timer;
use orchestrator_core::{
    models::{Cmd, CmdId, Job},
    OrchestratorResult,
};
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Cmd 与一次性作业的执行入口
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// 按规则执行一次定时触发，返回是否成功
    async fn run_cmd(&self, cmd: Cmd) -> bool;

    /// 立即执行一次作业，不受并发与锁限制
    async fn run_once(&self, job: Arc<Job>) -> bool;
}

#[derive(Debug)]
struct Entry {
    cmd: Cmd,
    timer: Timer,
    next: Option<DateTime<Utc>>,
    /// 每次（重新）注册定时器时递增
    generation: u64,
}

/// 本地定时调度器
///
/// 条目表只通过 `add_cmd` / `mod_cmd` / `del_cmd` 修改；
/// 调度循环按 tick 扫描到期条目并交给 `JobRunner` 异步执行。
pub struct CronScheduler {
    entries: Mutex<HashMap<CmdId, Entry>>,
    tick: Duration,
    registrations: AtomicU64,
    running: AtomicBool,
    stop_notify: Notify,
}

impl CronScheduler {
    pub fn new(tick: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            tick,
            registrations: AtomicU64::new(0),
            running: AtomicBool::new(false),
            stop_notify: Notify::new(),
        }
    }

    /// 注册 Cmd；同ID条目存在时整体替换
    pub async fn add_cmd(&self, cmd: Cmd) -> OrchestratorResult<()> {
        let timer = Timer::parse(cmd.timer())?;
        let next = timer.next_after(Utc::now());
        let id = cmd.id();

        info!(
            "job[{}] group[{}] rule[{}] timer[{}] has added",
            cmd.job.id,
            cmd.job.group,
            cmd.rule.id,
            cmd.rule.timer
        );

        let mut entries = self.entries.lock().await;
        let generation = entries.get(&id).map(|e| e.generation).unwrap_or(0) + 1;
        entries.insert(
            id,
            Entry {
                cmd,
                timer,
                next,
                generation,
            },
        );
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// 原地更新 Cmd，只有定时表达式变化时才重新注册定时器
    pub async fn mod_cmd(&self, cmd: Cmd) -> OrchestratorResult<()> {
        let id = cmd.id();
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(&id) {
            drop(entries);
            return self.add_cmd(cmd).await;
        }
        let Some(entry) = entries.get_mut(&id) else {
            return Ok(());
        };

        if entry.cmd.rule.timer != cmd.rule.timer {
            let timer = Timer::parse(cmd.timer())?;
            entry.next = timer.next_after(Utc::now());
            entry.timer = timer;
            entry.generation += 1;
            self.registrations.fetch_add(1, Ordering::SeqCst);
        }
        entry.cmd = cmd;

        info!(
            "job[{}] group[{}] rule[{}] timer[{}] has updated",
            entry.cmd.job.id,
            entry.cmd.job.group,
            entry.cmd.rule.id,
            entry.cmd.rule.timer
        );
        Ok(())
    }

    /// 从索引和调度器中移除 Cmd
    pub async fn del_cmd(&self, id: &str) -> bool {
        let removed = self.entries.lock().await.remove(id);
        match removed {
            Some(entry) => {
                info!(
                    "job[{}] group[{}] rule[{}] timer[{}] has deleted",
                    entry.cmd.job.id,
                    entry.cmd.job.group,
                    entry.cmd.rule.id,
                    entry.cmd.rule.timer
                );
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn cmd(&self, id: &str) -> Option<Cmd> {
        self.entries.lock().await.get(id).map(|e| e.cmd.clone())
    }

    pub async fn cmd_ids(&self) -> Vec<CmdId> {
        let mut ids: Vec<CmdId> = self.entries.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 条目定时器的注册代数
    pub async fn generation(&self, id: &str) -> Option<u64> {
        self.entries.lock().await.get(id).map(|e| e.generation)
    }

    /// 累计定时器注册次数
    pub fn registrations(&self) -> u64 {
        self.registrations.load(Ordering::SeqCst)
    }

    /// 取出到期的 Cmd 并推进下一次触发时间
    pub async fn due_cmds(&self, now: DateTime<Utc>) -> Vec<Cmd> {
        let mut entries = self.entries.lock().await;
        let mut due = Vec::new();
        for entry in entries.values_mut() {
            if let Some(next) = entry.next {
                if next <= now {
                    due.push(entry.cmd.clone());
                    entry.next = entry.timer.next_after(now);
                }
            }
        }
        due
    }

    /// 启动调度循环
    pub fn start(
        self: &Arc<Self>,
        runner: Arc<dyn JobRunner>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            let mut ticker = interval(scheduler.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("启动本地定时调度循环，间隔 {:?}", scheduler.tick);

            while scheduler.running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = ticker.tick() => {
                        for cmd in scheduler.due_cmds(Utc::now()).await {
                            debug!("触发 cmd {}", cmd.id());
                            let runner = Arc::clone(&runner);
                            tokio::spawn(async move {
                                runner.run_cmd(cmd).await;
                            });
                        }
                    }
                    _ = scheduler.stop_notify.notified() => {
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
            info!("本地定时调度循环已停止");
        })
    }

    /// 停止调度循环，已在执行的 Cmd 不受影响
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.stop_notify.notify_waiters();
        } else {
            warn!("定时调度器未在运行");
        }
    }
}
