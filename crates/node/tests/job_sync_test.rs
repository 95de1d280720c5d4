#[cfg(test)]
mod job_sync_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use orchestrator_core::models::NodeGroup;
    use orchestrator_core::{CoordinationStore, KeyLayout, KeyValue, StoreEvent};
    use orchestrator_infrastructure::InMemoryStore;
    use orchestrator_node::cron_scheduler::CronScheduler;
    use orchestrator_node::job_sync::*;
    use orchestrator_testing_utils::{JobBuilder, NodeBuilder};

    fn synchronizer(store: Arc<InMemoryStore>, node_id: &str) -> (Arc<JobSynchronizer>, Arc<CronScheduler>) {
        let cron = Arc::new(CronScheduler::new(Duration::from_millis(100)));
        let sync = Arc::new(JobSynchronizer::new(
            store,
            KeyLayout::default(),
            NodeBuilder::new(node_id).build(),
            cron.clone(),
        ));
        (sync, cron)
    }

    fn kv(key: &str, value: String, create: i64, modified: i64) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value,
            create_revision: create,
            mod_revision: modified,
            lease: 0,
        }
    }

    fn job_key(id: &str) -> String {
        KeyLayout::default().job_key("default", id)
    }

    #[tokio::test]
    async fn test_duplicate_create_registers_once() {
        let (sync, cron) = synchronizer(Arc::new(InMemoryStore::new()), "n1");
        let json = JobBuilder::new("j1")
            .with_rule("r1", "@every 10s", &["n1"])
            .to_json();

        for _ in 0..2 {
            sync.handle_job_event(StoreEvent::Created(kv(&job_key("j1"), json.clone(), 3, 3)))
                .await;
        }

        assert_eq!(cron.cmd_ids().await, vec!["j1r1".to_string()]);
        assert_eq!(cron.registrations(), 1);
        assert_eq!(cron.generation("j1r1").await, Some(1));
    }

    #[tokio::test]
    async fn test_job_for_other_node_is_ignored() {
        let (sync, cron) = synchronizer(Arc::new(InMemoryStore::new()), "n1");
        let job = JobBuilder::new("j1")
            .with_rule("r1", "@every 10s", &["n2"])
            .build();

        assert!(!sync.add_job(job).await);
        assert!(cron.is_empty().await);
        assert!(sync.job("j1").await.is_none());
    }

    #[tokio::test]
    async fn test_shrinking_node_set_removes_only_dropped_node() {
        let store = Arc::new(InMemoryStore::new());
        let (sync_a, cron_a) = synchronizer(store.clone(), "A");
        let (sync_b, cron_b) = synchronizer(store, "B");

        let before = || {
            JobBuilder::new("j1")
                .with_rule("r1", "@every 10s", &["A", "B"])
                .build()
        };
        assert!(sync_a.add_job(before()).await);
        assert!(sync_b.add_job(before()).await);
        sync_a.job("j1").await.unwrap().counter.record_run();

        let after = || {
            JobBuilder::new("j1")
                .with_rule("r1", "@every 10s", &["A"])
                .build()
        };
        assert!(sync_a.mod_job(after()).await);
        assert!(!sync_b.mod_job(after()).await);

        assert!(cron_b.is_empty().await);
        assert!(sync_b.job("j1").await.is_none());

        assert!(cron_a.contains("j1r1").await);
        let job = sync_a.job("j1").await.unwrap();
        assert_eq!(job.counter.runs(), 1);
        assert_eq!(job.rules[0].node_ids, vec!["A".to_string()]);
        assert_eq!(cron_a.generation("j1r1").await, Some(1));
    }

    #[tokio::test]
    async fn test_rule_diff_on_modify() {
        let (sync, cron) = synchronizer(Arc::new(InMemoryStore::new()), "n1");
        let job = JobBuilder::new("j1")
            .with_rule("r1", "@every 10s", &["n1"])
            .with_rule("r2", "@every 20s", &["n1"])
            .build();
        sync.add_job(job).await;
        assert_eq!(cron.len().await, 2);

        let job = JobBuilder::new("j1")
            .with_rule("r2", "@every 20s", &["n1"])
            .with_rule("r3", "@every 30s", &["n1"])
            .build();
        sync.mod_job(job).await;

        assert_eq!(
            cron.cmd_ids().await,
            vec!["j1r2".to_string(), "j1r3".to_string()]
        );
        assert_eq!(cron.generation("j1r2").await, Some(1));
    }

    #[tokio::test]
    async fn test_timer_change_reschedules_but_other_fields_do_not() {
        let (sync, cron) = synchronizer(Arc::new(InMemoryStore::new()), "n1");
        sync.add_job(
            JobBuilder::new("j1")
                .with_rule("r1", "@every 10s", &["n1"])
                .build(),
        )
        .await;

        sync.mod_job(
            JobBuilder::new("j1")
                .with_command("echo changed")
                .with_rule("r1", "@every 10s", &["n1"])
                .build(),
        )
        .await;
        assert_eq!(cron.generation("j1r1").await, Some(1));
        assert_eq!(cron.registrations(), 1);
        assert_eq!(
            cron.cmd("j1r1").await.unwrap().job.command,
            "echo changed"
        );

        sync.mod_job(
            JobBuilder::new("j1")
                .with_command("echo changed")
                .with_rule("r1", "@every 1m", &["n1"])
                .build(),
        )
        .await;
        assert_eq!(cron.generation("j1r1").await, Some(2));
        assert_eq!(cron.registrations(), 2);
    }

    #[tokio::test]
    async fn test_modify_unknown_job_degrades_to_add() {
        let (sync, cron) = synchronizer(Arc::new(InMemoryStore::new()), "n1");
        let json = JobBuilder::new("j1")
            .with_rule("r1", "@every 10s", &["n1"])
            .to_json();

        sync.handle_job_event(StoreEvent::Modified(kv(&job_key("j1"), json, 3, 7)))
            .await;
        assert!(cron.contains("j1r1").await);
    }

    #[tokio::test]
    async fn test_paused_job_drops_cmds() {
        let (sync, cron) = synchronizer(Arc::new(InMemoryStore::new()), "n1");
        sync.add_job(
            JobBuilder::new("j1")
                .with_rule("r1", "@every 10s", &["n1"])
                .build(),
        )
        .await;

        sync.mod_job(
            JobBuilder::new("j1")
                .with_rule("r1", "@every 10s", &["n1"])
                .paused()
                .build(),
        )
        .await;
        assert!(cron.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_records_id_even_when_not_local() {
        let (sync, cron) = synchronizer(Arc::new(InMemoryStore::new()), "n1");
        sync.add_job(
            JobBuilder::new("j1")
                .with_rule("r1", "@every 10s", &["n1"])
                .build(),
        )
        .await;

        sync.handle_job_event(StoreEvent::Deleted(kv(&job_key("j1"), String::new(), 3, 9)))
            .await;
        assert!(cron.is_empty().await);
        assert!(sync.is_deleted("j1").await);

        assert!(!sync.del_job("j-remote").await);
        assert!(sync.is_deleted("j-remote").await);
    }

    #[tokio::test]
    async fn test_malformed_event_is_skipped() {
        let (sync, cron) = synchronizer(Arc::new(InMemoryStore::new()), "n1");
        sync.handle_job_event(StoreEvent::Created(kv(
            &job_key("broken"),
            "{not json".to_string(),
            3,
            3,
        )))
        .await;
        assert!(cron.is_empty().await);
    }

    #[tokio::test]
    async fn test_group_membership_change() {
        let store = Arc::new(InMemoryStore::new());
        let keys = KeyLayout::default();
        let (sync, cron) = synchronizer(store.clone(), "n1");

        let json = JobBuilder::new("j1")
            .with_group_rule("r1", "@every 10s", &["g1"])
            .to_json();
        store.put(&job_key("j1"), &json, None).await.unwrap();

        assert_eq!(sync.load_jobs().await.unwrap(), 0);
        assert!(cron.is_empty().await);

        let group = |nids: &[&str]| {
            serde_json::to_string(&NodeGroup {
                id: "g1".to_string(),
                name: "storage".to_string(),
                node_ids: nids.iter().map(|s| s.to_string()).collect(),
            })
            .unwrap()
        };

        sync.handle_group_event(StoreEvent::Created(kv(
            &keys.group_key("g1"),
            group(&["n1"]),
            5,
            5,
        )))
        .await;
        assert!(cron.contains("j1r1").await);
        assert!(sync.job("j1").await.is_some());

        sync.handle_group_event(StoreEvent::Modified(kv(
            &keys.group_key("g1"),
            group(&["n2"]),
            5,
            6,
        )))
        .await;
        assert!(cron.is_empty().await);
        assert!(sync.job("j1").await.is_none());
    }

    #[tokio::test]
    async fn test_watch_applies_store_changes() {
        let store = Arc::new(InMemoryStore::new());
        let (sync, cron) = synchronizer(store.clone(), "n1");
        let (tx, rx) = tokio::sync::broadcast::channel(1);
        let handle = sync.watch_jobs(rx).await.unwrap();

        let json = JobBuilder::new("j1")
            .with_rule("r1", "@every 10s", &["n1"])
            .to_json();
        store.put(&job_key("j1"), &json, None).await.unwrap();
        wait_until(|| {
            let cron = cron.clone();
            async move { cron.contains("j1r1").await }
        })
        .await;

        store.delete(&job_key("j1")).await.unwrap();
        wait_until(|| {
            let cron = cron.clone();
            async move { cron.is_empty().await }
        })
        .await;

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_watch_survives_unparsable_timer() {
        let store = Arc::new(InMemoryStore::new());
        let (sync, cron) = synchronizer(store.clone(), "n1");
        let (tx, rx) = tokio::sync::broadcast::channel(1);
        let handle = sync.watch_jobs(rx).await.unwrap();

        let bad = JobBuilder::new("bad")
            .with_rule("r1", "@every 9999999999999999h", &["n1"])
            .to_json();
        store.put(&job_key("bad"), &bad, None).await.unwrap();
        let good = JobBuilder::new("j1")
            .with_rule("r1", "@every 10s", &["n1"])
            .to_json();
        store.put(&job_key("j1"), &good, None).await.unwrap();

        wait_until(|| {
            let cron = cron.clone();
            async move { cron.contains("j1r1").await }
        })
        .await;
        assert!(!handle.is_finished());
        assert_eq!(cron.cmd_ids().await, vec!["j1r1".to_string()]);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_group_updates_racing_delete_leave_no_cmd() {
        let keys = KeyLayout::default();
        let group = serde_json::to_string(&NodeGroup {
            id: "g1".to_string(),
            name: "storage".to_string(),
            node_ids: vec!["n1".to_string()],
        })
        .unwrap();

        for _ in 0..20 {
            let (sync, cron) = synchronizer(Arc::new(InMemoryStore::new()), "n1");
            sync.handle_group_event(StoreEvent::Created(kv(
                &keys.group_key("g1"),
                group.clone(),
                2,
                2,
            )))
            .await;
            sync.add_job(
                JobBuilder::new("j1")
                    .with_group_rule("r1", "@every 10s", &["g1"])
                    .build(),
            )
            .await;
            assert!(cron.contains("j1r1").await);

            let mut tasks = Vec::new();
            for rev in 3..13 {
                let sync = sync.clone();
                let event = StoreEvent::Modified(kv(&keys.group_key("g1"), group.clone(), 2, rev));
                tasks.push(tokio::spawn(async move { sync.handle_group_event(event).await }));
            }
            let deleter = sync.clone();
            tasks.push(tokio::spawn(async move {
                deleter.del_job("j1").await;
            }));
            for task in tasks {
                task.await.unwrap();
            }

            assert!(cron.is_empty().await);
            assert!(sync.job("j1").await.is_none());
        }
    }

    #[tokio::test]
    async fn test_deleted_marks_are_cleared_and_bounded() {
        let (sync, cron) = synchronizer(Arc::new(InMemoryStore::new()), "n1");
        let job = || {
            JobBuilder::new("j1")
                .with_rule("r1", "@every 10s", &["n1"])
                .build()
        };

        sync.add_job(job()).await;
        assert!(sync.del_job("j1").await);
        assert!(sync.is_deleted("j1").await);

        // 重新创建后不再视为已删除
        assert!(sync.add_job(job()).await);
        assert!(!sync.is_deleted("j1").await);
        assert!(cron.contains("j1r1").await);

        for i in 0..1100 {
            sync.del_job(&format!("gone-{i}")).await;
        }
        assert!(!sync.is_deleted("gone-0").await);
        assert!(sync.is_deleted("gone-1099").await);
    }

    async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }
}
