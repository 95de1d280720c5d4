#[cfg(test)]
mod server_tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use orchestrator_core::config::AppConfig;
    use orchestrator_core::models::{Cmd, Job};
    use orchestrator_core::{CoordinationStore, KeyLayout, OrchestratorError};
    use orchestrator_infrastructure::InMemoryStore;
    use orchestrator_node::cron_scheduler::JobRunner;
    use orchestrator_node::registry::NodeRegistry;
    use orchestrator_node::server::*;
    use orchestrator_testing_utils::{JobBuilder, NodeBuilder};

    #[derive(Default)]
    struct OnceRecorder {
        once: Mutex<Vec<String>>,
    }

    impl OnceRecorder {
        fn once(&self) -> Vec<String> {
            self.once.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobRunner for OnceRecorder {
        async fn run_cmd(&self, _cmd: Cmd) -> bool {
            true
        }

        async fn run_once(&self, job: Arc<Job>) -> bool {
            self.once.lock().unwrap().push(job.id.clone());
            true
        }
    }

    #[tokio::test]
    async fn test_node_server_lifecycle() {
        let store = Arc::new(InMemoryStore::new());
        let keys = KeyLayout::default();
        let runner = Arc::new(OnceRecorder::default());
        let config = AppConfig::default();

        let server = NodeServer::with_runner(
            &config,
            store.clone(),
            NodeBuilder::new("n1").build(),
            runner.clone(),
        );
        server.run().await.unwrap();
        assert!(server.run().await.is_err());

        let registry = NodeRegistry::new(store.clone(), keys.clone());
        assert!(registry.get_node("n1").await.unwrap().unwrap().is_alive());

        let json = JobBuilder::new("j1")
            .with_rule("r1", "@every 10s", &["n1"])
            .to_json();
        store
            .put(&keys.job_key("default", "j1"), &json, None)
            .await
            .unwrap();
        for _ in 0..100 {
            if server.cron().contains("j1r1").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(server.cron().contains("j1r1").await);

        store
            .put(&keys.once_key("default", "j1"), "n1", None)
            .await
            .unwrap();
        for _ in 0..100 {
            if !runner.once().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(runner.once(), vec!["j1".to_string()]);

        server.stop().await;
        assert!(matches!(
            registry.get_node("n1").await,
            Err(OrchestratorError::StoreClosed)
        ));
    }

    #[tokio::test]
    async fn test_bad_job_does_not_stop_job_watch() {
        let store = Arc::new(InMemoryStore::new());
        let keys = KeyLayout::default();
        let server = NodeServer::with_runner(
            &AppConfig::default(),
            store.clone(),
            NodeBuilder::new("n1").build(),
            Arc::new(OnceRecorder::default()),
        );
        server.run().await.unwrap();

        let bad = JobBuilder::new("bad")
            .with_rule("r1", "@every 9999999999999999h", &["n1"])
            .to_json();
        store
            .put(&keys.job_key("default", "bad"), &bad, None)
            .await
            .unwrap();
        let good = JobBuilder::new("j1")
            .with_rule("r1", "@every 10s", &["n1"])
            .to_json();
        store
            .put(&keys.job_key("default", "j1"), &good, None)
            .await
            .unwrap();

        for _ in 0..100 {
            if server.cron().contains("j1r1").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(server.cron().contains("j1r1").await);
        assert!(!server.cron().contains("badr1").await);
        assert!(server.sync().job("bad").await.is_none());

        server.stop().await;
    }
}
