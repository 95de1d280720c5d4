#[cfg(test)]
mod lease_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use orchestrator_core::models::HostNode;
    use orchestrator_core::{CoordinationStore, KeyLayout, NodeApi, OrchestratorError};
    use orchestrator_infrastructure::InMemoryStore;
    use orchestrator_node::lease::*;
    use orchestrator_node::registry::NodeRegistry;
    use orchestrator_testing_utils::{FlakyStore, NodeBuilder};

    fn setup() -> (Arc<InMemoryStore>, Arc<FlakyStore>, LeaseManager, NodeRegistry) {
        let inner = Arc::new(InMemoryStore::new());
        let flaky = Arc::new(FlakyStore::new(inner.clone()));
        let keys = KeyLayout::default();
        let manager = LeaseManager::new(
            flaky.clone(),
            keys.clone(),
            NodeBuilder::new("n1").build(),
            10,
        );
        let registry = NodeRegistry::new(inner.clone(), keys);
        (inner, flaky, manager, registry)
    }

    #[tokio::test]
    async fn test_register_publishes_alive_record() {
        let (_inner, _flaky, manager, registry) = setup();

        let lease = manager.register().await.unwrap();
        assert!(lease > 0);
        assert_eq!(manager.lease_id(), lease);

        let node = registry.get_node("n1").await.unwrap().unwrap();
        assert!(node.is_alive());
        assert_eq!(node.lease_id, lease);
        assert!(registry
            .dead_nodes(&["n1".to_string()])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_keep_alive_failures_reacquire_lease() {
        let (_inner, flaky, manager, registry) = setup();
        let first = manager.register().await.unwrap();

        flaky.fail_keep_alive(2);

        let second = match manager.tick().await {
            RenewOutcome::Reestablished(lease) => lease,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_ne!(second, first);
        assert!(registry
            .dead_nodes(&["n1".to_string()])
            .await
            .unwrap()
            .is_empty());

        let third = match manager.tick().await {
            RenewOutcome::Reestablished(lease) => lease,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_ne!(third, second);

        assert_eq!(manager.tick().await, RenewOutcome::Renewed);
        assert_eq!(manager.lease_id(), third);
        assert_eq!(flaky.keep_alive_calls(), 3);
        assert_eq!(flaky.grant_calls(), 3);

        let node = registry.get_node("n1").await.unwrap().unwrap();
        assert!(node.is_alive());
        assert_eq!(node.lease_id, third);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_record_is_republished_on_next_tick() {
        let (_inner, _flaky, manager, registry) = setup();
        manager.register().await.unwrap();

        tokio::time::advance(Duration::from_secs(13)).await;
        assert!(registry.get_node("n1").await.unwrap().is_none());
        assert_eq!(
            registry.dead_nodes(&["n1".to_string()]).await.unwrap(),
            vec!["n1".to_string()]
        );

        assert!(matches!(
            manager.tick().await,
            RenewOutcome::Reestablished(_)
        ));
        assert!(registry.get_node("n1").await.unwrap().unwrap().is_alive());
    }

    #[tokio::test]
    async fn test_reestablish_keeps_admin_changes() {
        let (_inner, flaky, manager, registry) = setup();
        manager.register().await.unwrap();

        registry.cordon("n1").await.unwrap();
        flaky.fail_keep_alive(1);
        manager.tick().await;

        assert!(registry.get_node("n1").await.unwrap().unwrap().unschedulable);
        assert!(manager.node().await.unschedulable);
    }

    #[tokio::test]
    async fn test_register_rejects_live_duplicate() {
        let store = Arc::new(InMemoryStore::new());
        let keys = KeyLayout::default();

        let mut other = HostNode::new("n1", "other-host", "10.0.0.9");
        other.pid = std::process::id().wrapping_add(1);
        let lease = store.grant(30).await.unwrap();
        store
            .put(
                &keys.node_key("n1"),
                &serde_json::to_string(&other).unwrap(),
                Some(lease),
            )
            .await
            .unwrap();

        let manager = LeaseManager::new(store, keys, NodeBuilder::new("n1").build(), 10);
        assert!(matches!(
            manager.register().await,
            Err(OrchestratorError::NodeAlreadyRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn test_mark_down_then_delete() {
        let (inner, _flaky, manager, registry) = setup();
        manager.register().await.unwrap();

        manager.mark_down().await.unwrap();
        let node = registry.get_node("n1").await.unwrap().unwrap();
        assert!(!node.is_alive());
        assert!(node.health.last_down_time.is_some());

        manager.delete_record().await.unwrap();
        assert!(registry.get_node("n1").await.unwrap().is_none());
        assert_eq!(manager.lease_id(), 0);
        assert_eq!(inner.lease_count().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_renews_until_shutdown() {
        let (_inner, flaky, manager, _registry) = setup();
        let manager = Arc::new(manager);
        manager.register().await.unwrap();

        let (tx, rx) = tokio::sync::broadcast::channel(1);
        let handle = manager.start(rx);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(flaky.keep_alive_calls(), 3);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
