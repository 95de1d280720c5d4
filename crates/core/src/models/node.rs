use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::OrchestratorError;

/// 节点角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Manage,
    Compute,
    Storage,
    Gateway,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Manage => "manage",
            NodeRole::Compute => "compute",
            NodeRole::Storage => "storage",
            NodeRole::Gateway => "gateway",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "manage" => Ok(NodeRole::Manage),
            "compute" => Ok(NodeRole::Compute),
            "storage" => Ok(NodeRole::Storage),
            "gateway" => Ok(NodeRole::Gateway),
            other => Err(OrchestratorError::Configuration(format!(
                "未知的节点角色: {other}"
            ))),
        }
    }
}

/// 节点角色集合
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostRoles(BTreeSet<NodeRole>);

impl HostRoles {
    pub fn new(roles: impl IntoIterator<Item = NodeRole>) -> Self {
        Self(roles.into_iter().collect())
    }

    pub fn has(&self, role: NodeRole) -> bool {
        self.0.contains(&role)
    }

    pub fn add(&mut self, role: NodeRole) -> bool {
        self.0.insert(role)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeRole> {
        self.0.iter()
    }
}

impl fmt::Display for HostRoles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let roles: Vec<&str> = self.0.iter().map(NodeRole::as_str).collect();
        f.write_str(&roles.join(","))
    }
}

/// 节点状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Running,
    Offline,
    Unknown,
    Error,
    Init,
    InstallSuccess,
    InstallFailed,
    Installing,
    NotInstalled,
}

/// 节点健康状况
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub healthy: bool,
    pub update_time: DateTime<Utc>,
    pub last_down_time: Option<DateTime<Utc>>,
}

impl Default for NodeHealth {
    fn default() -> Self {
        Self {
            healthy: false,
            update_time: Utc::now(),
            last_down_time: None,
        }
    }
}

/// 集群节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostNode {
    pub uuid: String,
    pub host_name: String,
    pub internal_ip: String,
    pub external_ip: Option<String>,
    pub roles: HostRoles,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// 由管理员设置的标签，刷新记录时保留
    #[serde(default)]
    pub custom_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub unschedulable: bool,
    pub status: NodeStatus,
    #[serde(default)]
    pub health: NodeHealth,
    #[serde(default)]
    pub lease_id: i64,
    #[serde(default)]
    pub pid: u32,
}

impl HostNode {
    pub fn new(uuid: impl Into<String>, host_name: impl Into<String>, internal_ip: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            host_name: host_name.into(),
            internal_ip: internal_ip.into(),
            external_ip: None,
            roles: HostRoles::default(),
            labels: BTreeMap::new(),
            custom_labels: BTreeMap::new(),
            unschedulable: false,
            status: NodeStatus::Init,
            health: NodeHealth::default(),
            lease_id: 0,
            pid: std::process::id(),
        }
    }

    /// 标记节点上线
    pub fn up(&mut self) {
        self.status = NodeStatus::Running;
        self.health.healthy = true;
        self.health.update_time = Utc::now();
    }

    /// 标记节点下线
    pub fn down(&mut self) {
        let now = Utc::now();
        self.status = NodeStatus::Offline;
        self.health.healthy = false;
        self.health.update_time = now;
        self.health.last_down_time = Some(now);
    }

    /// 禁止调度
    pub fn cordon(&mut self) {
        self.unschedulable = true;
    }

    /// 恢复调度
    pub fn uncordon(&mut self) {
        self.unschedulable = false;
    }

    pub fn has_role(&self, role: NodeRole) -> bool {
        self.roles.has(role)
    }

    pub fn is_alive(&self) -> bool {
        self.status == NodeStatus::Running && self.health.healthy
    }

    /// 合并自定义标签，同名键覆盖
    pub fn merge_labels(&mut self, labels: &BTreeMap<String, String>) {
        for (k, v) in labels {
            self.custom_labels.insert(k.clone(), v.clone());
        }
    }

    /// 查询标签，自定义标签优先
    pub fn label(&self, key: &str) -> Option<&str> {
        self.custom_labels
            .get(key)
            .or_else(|| self.labels.get(key))
            .map(String::as_str)
    }

    /// 用存储中的旧记录刷新本节点记录，保留管理员设置的字段
    pub fn refresh_from(&mut self, stored: &HostNode) {
        self.unschedulable = stored.unschedulable;
        self.custom_labels = stored.custom_labels.clone();
        if self.health.last_down_time.is_none() {
            self.health.last_down_time = stored.health.last_down_time;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("Manage".parse::<NodeRole>().unwrap(), NodeRole::Manage);
        assert!("master".parse::<NodeRole>().is_err());

        let roles = HostRoles::new([NodeRole::Compute, NodeRole::Manage]);
        assert_eq!(roles.to_string(), "manage,compute");
        assert!(roles.has(NodeRole::Compute));
        assert!(!roles.has(NodeRole::Gateway));
    }

    #[test]
    fn test_up_down_cordon() {
        let mut node = HostNode::new("n1", "host-1", "10.0.0.1");
        assert!(!node.is_alive());

        node.up();
        assert!(node.is_alive());

        node.down();
        assert!(!node.is_alive());
        assert_eq!(node.status, NodeStatus::Offline);
        assert!(node.health.last_down_time.is_some());

        node.cordon();
        assert!(node.unschedulable);
        node.uncordon();
        assert!(!node.unschedulable);
    }

    #[test]
    fn test_refresh_keeps_admin_fields() {
        let mut stored = HostNode::new("n1", "host-1", "10.0.0.1");
        stored.cordon();
        stored
            .custom_labels
            .insert("zone".to_string(), "a".to_string());

        let mut fresh = HostNode::new("n1", "host-1", "10.0.0.1");
        fresh.refresh_from(&stored);

        assert!(fresh.unschedulable);
        assert_eq!(fresh.label("zone"), Some("a"));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&NodeStatus::InstallSuccess).unwrap();
        assert_eq!(json, "\"install_success\"");
    }
}
