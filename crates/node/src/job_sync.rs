use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use orchestrator_core::{
    keys::id_from_key,
    models::{Cmd, CmdId, HostNode, Job, NodeGroup},
    CoordinationStore, KeyLayout, OrchestratorResult, RawEvent, StoreEvent,
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cron_scheduler::CronScheduler;

/// 在 `state` 锁内提交给调度器的变更
enum CronOp {
    Mod(Cmd),
    Del(CmdId),
}

#[derive(Default)]
struct SyncState {
    /// 在本节点生效的作业
    jobs: HashMap<String, Arc<Job>>,
    groups: HashMap<String, NodeGroup>,
    /// 分组ID -> (作业ID -> 作业分组)
    links: HashMap<String, HashMap<String, String>>,
    /// 收到过删除事件的作业ID，按删除顺序保留最近 `DELETED_CAPACITY` 个
    deleted: HashSet<String>,
    deleted_order: VecDeque<String>,
}

const DELETED_CAPACITY: usize = 1024;

impl SyncState {
    fn link(&mut self, job: &Job) {
        for gid in job.group_ids() {
            self.links
                .entry(gid.clone())
                .or_default()
                .insert(job.id.clone(), job.group.clone());
        }
    }

    fn mark_deleted(&mut self, id: &str) {
        if !self.deleted.insert(id.to_string()) {
            return;
        }
        self.deleted_order.push_back(id.to_string());
        while self.deleted_order.len() > DELETED_CAPACITY {
            if let Some(oldest) = self.deleted_order.pop_front() {
                self.deleted.remove(&oldest);
            }
        }
    }

    fn unmark_deleted(&mut self, id: &str) {
        if self.deleted.remove(id) {
            self.deleted_order.retain(|d| d != id);
        }
    }

    /// 删除作业在所有分组下的关联
    fn unlink_id(&mut self, id: &str) {
        self.links.retain(|_, linked| {
            linked.remove(id);
            !linked.is_empty()
        });
    }

    fn unlink(&mut self, job: &Job) {
        for gid in job.group_ids() {
            if let Some(linked) = self.links.get_mut(gid) {
                linked.remove(&job.id);
                if linked.is_empty() {
                    self.links.remove(gid);
                }
            }
        }
    }
}

/// 作业同步器
///
/// 监听作业前缀，把作用于本节点的作业规则具体化为 Cmd 并与本地调度器保持一致。
/// 作业表、分组表只在 `state` 锁内修改，对调度器的变更也在同一把锁内提交，
/// 作业监听与分组监听并发时不会互相覆盖；锁内不做存储网络调用。
pub struct JobSynchronizer {
    store: Arc<dyn CoordinationStore>,
    keys: KeyLayout,
    node: HostNode,
    cron: Arc<CronScheduler>,
    state: Mutex<SyncState>,
}

impl JobSynchronizer {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        keys: KeyLayout,
        node: HostNode,
        cron: Arc<CronScheduler>,
    ) -> Self {
        Self {
            store,
            keys,
            node,
            cron,
            state: Mutex::new(SyncState::default()),
        }
    }

    pub fn node(&self) -> &HostNode {
        &self.node
    }

    pub async fn job(&self, id: &str) -> Option<Arc<Job>> {
        self.state.lock().await.jobs.get(id).cloned()
    }

    pub async fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().await.jobs.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn groups_snapshot(&self) -> HashMap<String, NodeGroup> {
        self.state.lock().await.groups.clone()
    }

    pub async fn is_deleted(&self, id: &str) -> bool {
        self.state.lock().await.deleted.contains(id)
    }

    /// 启动时全量加载作业
    pub async fn load_jobs(&self) -> OrchestratorResult<usize> {
        let kvs = self.store.get_prefix(self.keys.jobs_prefix()).await?;
        let mut added = 0;
        for kv in kvs {
            match Job::from_json(&kv.value) {
                Ok(job) => {
                    if self.add_job(job).await {
                        added += 1;
                    }
                }
                Err(e) => warn!("跳过无法解析的作业 {}: {}", kv.key, e),
            }
        }
        info!("加载作业完成，本节点生效 {} 个", added);
        Ok(added)
    }

    /// 启动时全量加载节点分组
    pub async fn load_groups(&self) -> OrchestratorResult<usize> {
        let kvs = self.store.get_prefix(self.keys.groups_prefix()).await?;
        let mut state = self.state.lock().await;
        for kv in kvs {
            match NodeGroup::from_json(&kv.value) {
                Ok(group) => {
                    state.groups.insert(group.id.clone(), group);
                }
                Err(e) => warn!("跳过无法解析的分组 {}: {}", kv.key, e),
            }
        }
        Ok(state.groups.len())
    }

    /// 添加作业，返回作业是否在本节点生效
    ///
    /// 已存在的作业按修改处理，重复的创建事件只会保留一份 Cmd。
    pub async fn add_job(&self, job: Job) -> bool {
        let mut state = self.state.lock().await;
        let (running, ops) = self.add_locked(&mut state, job);
        self.apply(ops).await;
        running
    }

    /// 删除作业，未在本节点生效的作业同样记录删除标记
    pub async fn del_job(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        state.mark_deleted(id);
        state.unlink_id(id);
        let Some(job) = state.jobs.remove(id) else {
            return false;
        };
        let ops = job
            .rules
            .iter()
            .map(|rule| CronOp::Del(format!("{}{}", job.id, rule.id)))
            .collect();
        self.apply(ops).await;
        true
    }

    /// 修改作业：按新旧 Cmd 集合做差量更新，返回作业是否仍在本节点生效
    pub async fn mod_job(&self, job: Job) -> bool {
        let mut state = self.state.lock().await;
        let (running, ops) = self.mod_locked(&mut state, job);
        self.apply(ops).await;
        running
    }

    /// 分组变化后补读的作业：期间收到删除事件的不再加入
    async fn add_fetched(&self, job: Job) -> bool {
        let mut state = self.state.lock().await;
        if state.deleted.contains(&job.id) {
            debug!("作业 {} 已删除，忽略补读结果", job.id);
            return false;
        }
        let (running, ops) = self.add_locked(&mut state, job);
        self.apply(ops).await;
        running
    }

    fn add_locked(&self, state: &mut SyncState, job: Job) -> (bool, Vec<CronOp>) {
        state.unmark_deleted(&job.id);
        state.link(&job);

        if state.jobs.contains_key(&job.id) {
            return self.mod_locked(state, job);
        }
        if !job.is_run_on(&self.node, &state.groups) {
            return (false, Vec::new());
        }

        let job = Arc::new(job);
        state.jobs.insert(job.id.clone(), Arc::clone(&job));
        let ops = job
            .cmds(&self.node, &state.groups)
            .into_values()
            .map(CronOp::Mod)
            .collect();
        (true, ops)
    }

    fn mod_locked(&self, state: &mut SyncState, mut job: Job) -> (bool, Vec<CronOp>) {
        let Some(prev) = state.jobs.get(&job.id).cloned() else {
            return self.add_locked(state, job);
        };

        let mut prev_cmds = prev.cmds(&self.node, &state.groups);
        job.counter = Arc::clone(&prev.counter);
        let job = Arc::new(job);
        state.unlink(&prev);
        state.link(&job);

        let new_cmds = job.cmds(&self.node, &state.groups);
        let running = job.is_run_on(&self.node, &state.groups);
        if running {
            state.jobs.insert(job.id.clone(), Arc::clone(&job));
        } else {
            state.jobs.remove(&job.id);
        }

        let mut ops = Vec::with_capacity(new_cmds.len() + prev_cmds.len());
        for (id, cmd) in new_cmds {
            prev_cmds.remove(&id);
            ops.push(CronOp::Mod(cmd));
        }
        ops.extend(prev_cmds.into_keys().map(CronOp::Del));
        (running, ops)
    }

    /// 调用方持有 `state` 锁
    async fn apply(&self, ops: Vec<CronOp>) {
        for op in ops {
            match op {
                CronOp::Mod(cmd) => {
                    let id = cmd.id();
                    if let Err(e) = self.cron.mod_cmd(cmd).await {
                        warn!("注册定时任务 {} 失败: {}", id, e);
                    }
                }
                CronOp::Del(id) => {
                    self.cron.del_cmd(&id).await;
                }
            }
        }
    }

    /// 处理一条作业事件
    pub async fn handle_job_event(&self, event: StoreEvent) {
        match event {
            StoreEvent::Created(kv) => match Job::from_json(&kv.value) {
                Ok(job) => {
                    self.add_job(job).await;
                }
                Err(e) => warn!("作业创建事件无法解析 {}: {}", kv.key, e),
            },
            StoreEvent::Modified(kv) => match Job::from_json(&kv.value) {
                Ok(job) => {
                    self.mod_job(job).await;
                }
                Err(e) => warn!("作业修改事件无法解析 {}: {}", kv.key, e),
            },
            StoreEvent::Deleted(kv) => {
                let id = id_from_key(&kv.key);
                if id.is_empty() {
                    warn!("无法从键 {} 中取出作业ID", kv.key);
                    return;
                }
                self.del_job(id).await;
            }
        }
    }

    /// 处理一条分组事件，重新计算关联作业在本节点的 Cmd
    pub async fn handle_group_event(&self, event: StoreEvent) {
        let fetch = {
            let mut state = self.state.lock().await;
            let gid = match &event {
                StoreEvent::Created(kv) | StoreEvent::Modified(kv) => {
                    match NodeGroup::from_json(&kv.value) {
                        Ok(group) => {
                            let gid = group.id.clone();
                            state.groups.insert(gid.clone(), group);
                            gid
                        }
                        Err(e) => {
                            warn!("分组事件无法解析 {}: {}", kv.key, e);
                            return;
                        }
                    }
                }
                StoreEvent::Deleted(kv) => {
                    let gid = id_from_key(&kv.key).to_string();
                    state.groups.remove(&gid);
                    gid
                }
            };

            let linked = state.links.get(&gid).cloned().unwrap_or_default();
            let mut ops = Vec::new();
            let mut fetch = Vec::new();
            for (job_id, job_group) in linked {
                if state.deleted.contains(&job_id) {
                    continue;
                }
                let Some(job) = state.jobs.get(&job_id).cloned() else {
                    fetch.push((job_group, job_id));
                    continue;
                };

                // 分组变化前的 Cmd 集合已无法还原，按规则ID比较
                let cmds = job.cmds(&self.node, &state.groups);
                for rule in &job.rules {
                    let id = format!("{}{}", job.id, rule.id);
                    if !cmds.contains_key(&id) {
                        ops.push(CronOp::Del(id));
                    }
                }
                ops.extend(cmds.into_values().map(CronOp::Mod));
                if !job.is_run_on(&self.node, &state.groups) {
                    state.jobs.remove(&job_id);
                }
            }
            self.apply(ops).await;
            fetch
        };

        for (group, job_id) in fetch {
            match self.store.get(&self.keys.job_key(&group, &job_id)).await {
                Ok(Some(kv)) => match Job::from_json(&kv.value) {
                    Ok(job) => {
                        self.add_fetched(job).await;
                    }
                    Err(e) => warn!("作业 {} 无法解析: {}", job_id, e),
                },
                Ok(None) => debug!("作业 {} 已不存在", job_id),
                Err(e) => warn!("读取作业 {} 失败: {}", job_id, e),
            }
        }
    }

    /// 订阅作业前缀，返回消费任务句柄
    ///
    /// 订阅先于全量加载建立，加载期间的变化不会丢失。
    pub async fn watch_jobs(
        self: &Arc<Self>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> OrchestratorResult<JoinHandle<()>> {
        let rx = self.store.watch_prefix(self.keys.jobs_prefix()).await?;
        let sync = Arc::clone(self);
        Ok(tokio::spawn(async move {
            consume(rx, shutdown_rx, "作业", |event| {
                let sync = Arc::clone(&sync);
                async move { sync.handle_job_event(event).await }
            })
            .await;
        }))
    }

    pub async fn watch_groups(
        self: &Arc<Self>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> OrchestratorResult<JoinHandle<()>> {
        let rx = self.store.watch_prefix(self.keys.groups_prefix()).await?;
        let sync = Arc::clone(self);
        Ok(tokio::spawn(async move {
            consume(rx, shutdown_rx, "分组", |event| {
                let sync = Arc::clone(&sync);
                async move { sync.handle_group_event(event).await }
            })
            .await;
        }))
    }
}

/// watch 事件消费循环，通道结束或收到关闭信号时退出
pub(crate) async fn consume<F, Fut>(
    mut rx: mpsc::Receiver<RawEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
    name: &str,
    mut handle: F,
) where
    F: FnMut(StoreEvent) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    info!("开始监听{}变化", name);
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    info!("{}监听通道已关闭", name);
                    break;
                };
                match StoreEvent::try_from(event) {
                    Ok(event) => handle(event).await,
                    Err(e) => error!("忽略无法识别的{}事件: {}", name, e),
                }
            }
            _ = shutdown_rx.recv() => {
                info!("{}监听停止", name);
                break;
            }
        }
    }
}
