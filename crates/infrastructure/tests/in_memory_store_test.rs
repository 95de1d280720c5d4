#[cfg(test)]
mod tests {
    use orchestrator_core::{CoordinationStore, OrchestratorError, StoreEvent};
    use orchestrator_infrastructure::in_memory_store::*;
    use std::time::Duration;

    async fn next_event(rx: &mut tokio::sync::mpsc::Receiver<orchestrator_core::RawEvent>) -> StoreEvent {
        let raw = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("等待事件超时")
            .expect("watch通道已关闭");
        StoreEvent::try_from(raw).unwrap()
    }

    #[tokio::test]
    async fn test_watch_create_modify_delete() {
        let store = InMemoryStore::new();
        let mut rx = store.watch_prefix("/rainbond/jobs/").await.unwrap();

        store.put("/rainbond/jobs/g/j1", "v1", None).await.unwrap();
        store.put("/rainbond/jobs/g/j1", "v2", None).await.unwrap();
        store.put("/rainbond/once/g/j1", "n1", None).await.unwrap();
        assert!(store.delete("/rainbond/jobs/g/j1").await.unwrap());
        assert!(!store.delete("/rainbond/jobs/g/j1").await.unwrap());

        assert!(matches!(next_event(&mut rx).await, StoreEvent::Created(kv) if kv.value == "v1"));
        assert!(matches!(next_event(&mut rx).await, StoreEvent::Modified(kv) if kv.value == "v2"));
        assert!(matches!(next_event(&mut rx).await, StoreEvent::Deleted(kv) if kv.key == "/rainbond/jobs/g/j1"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_multiple_watchers_receive_events() {
        let store = InMemoryStore::new();
        let mut a = store.watch_prefix("/x/").await.unwrap();
        let mut b = store.watch_prefix("/x/").await.unwrap();

        store.put("/x/1", "v", None).await.unwrap();

        assert!(matches!(next_event(&mut a).await, StoreEvent::Created(_)));
        assert!(matches!(next_event(&mut b).await, StoreEvent::Created(_)));
    }

    #[tokio::test]
    async fn test_revoke_removes_bound_keys() {
        let store = InMemoryStore::new();
        let lease = store.grant(30).await.unwrap();
        store.put("/nodes/n1", "{}", Some(lease)).await.unwrap();
        store.put("/nodes/n2", "{}", None).await.unwrap();

        store.revoke(lease).await.unwrap();

        assert!(store.get("/nodes/n1").await.unwrap().is_none());
        assert!(store.get("/nodes/n2").await.unwrap().is_some());
        assert!(matches!(
            store.revoke(lease).await,
            Err(OrchestratorError::LeaseNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_rebinding_key_to_new_lease() {
        let store = InMemoryStore::new();
        let old = store.grant(30).await.unwrap();
        let new = store.grant(30).await.unwrap();
        store.put("/nodes/n1", "a", Some(old)).await.unwrap();
        store.put("/nodes/n1", "b", Some(new)).await.unwrap();

        // 旧租约撤销不应删除已经重新绑定的键
        store.revoke(old).await.unwrap();
        let kv = store.get("/nodes/n1").await.unwrap().unwrap();
        assert_eq!(kv.lease, new);
        assert_eq!(kv.value, "b");
    }

    #[tokio::test]
    async fn test_grant_rejects_non_positive_ttl() {
        let store = InMemoryStore::new();
        assert!(store.grant(0).await.is_err());
        assert_eq!(store.lease_count().unwrap(), 0);
    }
}
