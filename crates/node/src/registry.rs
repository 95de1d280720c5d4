use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_core::{
    models::HostNode, CoordinationStore, KeyLayout, KeyValue, NodeApi, OrchestratorError,
    OrchestratorResult,
};
use tracing::{info, warn};

/// 节点注册表查询与管理
///
/// 直接读写存储中的节点记录，写回时保持原有租约绑定，记录仍随节点租约过期。
pub struct NodeRegistry {
    store: Arc<dyn CoordinationStore>,
    keys: KeyLayout,
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn CoordinationStore>, keys: KeyLayout) -> Self {
        Self { store, keys }
    }

    pub async fn list_nodes(&self) -> OrchestratorResult<Vec<HostNode>> {
        let kvs = self.store.get_prefix(self.keys.nodes_prefix()).await?;
        let mut nodes = Vec::with_capacity(kvs.len());
        for kv in kvs {
            match serde_json::from_str::<HostNode>(&kv.value) {
                Ok(node) => nodes.push(node),
                Err(e) => warn!("跳过无法解析的节点记录 {}: {}", kv.key, e),
            }
        }
        Ok(nodes)
    }

    pub async fn get_node(&self, node_id: &str) -> OrchestratorResult<Option<HostNode>> {
        Ok(self.load(node_id).await?.map(|(node, _)| node))
    }

    /// 期望存活但记录缺失或不健康的节点
    pub async fn dead_nodes(&self, expected: &[String]) -> OrchestratorResult<Vec<String>> {
        let alive: Vec<String> = self
            .list_nodes()
            .await?
            .into_iter()
            .filter(HostNode::is_alive)
            .map(|node| node.uuid)
            .collect();
        Ok(expected
            .iter()
            .filter(|id| !alive.contains(id))
            .cloned()
            .collect())
    }

    async fn load(&self, node_id: &str) -> OrchestratorResult<Option<(HostNode, KeyValue)>> {
        match self.store.get(&self.keys.node_key(node_id)).await? {
            Some(kv) => {
                let node = serde_json::from_str(&kv.value)?;
                Ok(Some((node, kv)))
            }
            None => Ok(None),
        }
    }

    async fn update<F>(&self, node_id: &str, action: &str, f: F) -> OrchestratorResult<()>
    where
        F: FnOnce(&mut HostNode),
    {
        let (mut node, kv) =
            self.load(node_id)
                .await?
                .ok_or_else(|| OrchestratorError::NodeNotFound {
                    id: node_id.to_string(),
                })?;
        f(&mut node);
        let value = serde_json::to_string(&node)?;
        self.store
            .put(&kv.key, &value, (kv.lease > 0).then_some(kv.lease))
            .await?;
        info!("节点 {} 已{}", node_id, action);
        Ok(())
    }
}

#[async_trait]
impl NodeApi for NodeRegistry {
    async fn list(&self) -> OrchestratorResult<Vec<HostNode>> {
        self.list_nodes().await
    }

    async fn get(&self, node_id: &str) -> OrchestratorResult<HostNode> {
        self.get_node(node_id)
            .await?
            .ok_or_else(|| OrchestratorError::NodeNotFound {
                id: node_id.to_string(),
            })
    }

    async fn up(&self, node_id: &str) -> OrchestratorResult<()> {
        self.update(node_id, "上线", HostNode::up).await
    }

    async fn down(&self, node_id: &str) -> OrchestratorResult<()> {
        self.update(node_id, "下线", HostNode::down).await
    }

    async fn cordon(&self, node_id: &str) -> OrchestratorResult<()> {
        self.update(node_id, "禁止调度", HostNode::cordon).await
    }

    async fn uncordon(&self, node_id: &str) -> OrchestratorResult<()> {
        self.update(node_id, "恢复调度", HostNode::uncordon).await
    }

    async fn set_labels(
        &self,
        node_id: &str,
        labels: &BTreeMap<String, String>,
    ) -> OrchestratorResult<()> {
        self.update(node_id, "更新标签", |node| node.merge_labels(labels))
            .await
    }
}
