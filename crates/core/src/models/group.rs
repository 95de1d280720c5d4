use serde::{Deserialize, Serialize};

use crate::OrchestratorResult;

/// 节点分组
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroup {
    pub id: String,
    pub name: String,
    #[serde(rename = "nids", default)]
    pub node_ids: Vec<String>,
}

impl NodeGroup {
    pub fn from_json(value: &str) -> OrchestratorResult<Self> {
        Ok(serde_json::from_str(value)?)
    }

    pub fn includes(&self, node_id: &str) -> bool {
        self.node_ids.iter().any(|id| id == node_id)
    }
}
