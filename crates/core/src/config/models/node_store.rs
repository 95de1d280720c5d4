use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::models::NodeRole;

pub const DEFAULT_HOST_ID_FILE: &str = "/opt/rainbond/etc/node/node_host_uuid.conf";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// 显式指定的节点ID，为空时读取 host_id_file
    pub node_id: Option<String>,
    pub host_id_file: String,
    pub hostname: Option<String>,
    pub internal_ip: String,
    pub external_ip: Option<String>,
    pub roles: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub ttl_seconds: i64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            host_id_file: DEFAULT_HOST_ID_FILE.to_string(),
            hostname: None,
            internal_ip: "127.0.0.1".to_string(),
            external_ip: None,
            roles: vec!["compute".to_string()],
            labels: BTreeMap::new(),
            ttl_seconds: 10, // 10秒租约续期周期
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ttl_seconds <= 0 {
            return Err(anyhow::anyhow!("租约TTL必须大于0"));
        }

        if self.node_id.is_none() && self.host_id_file.is_empty() {
            return Err(anyhow::anyhow!("未指定节点ID时主机ID文件路径不能为空"));
        }

        if let Some(id) = &self.node_id {
            if id.trim().is_empty() {
                return Err(anyhow::anyhow!("节点ID不能为空字符串"));
            }
        }

        if self.internal_ip.is_empty() {
            return Err(anyhow::anyhow!("内网IP不能为空"));
        }

        self.parsed_roles()?;
        Ok(())
    }

    /// 将配置中的角色字符串解析为节点角色
    pub fn parsed_roles(&self) -> anyhow::Result<Vec<NodeRole>> {
        self.roles
            .iter()
            .map(|r| NodeRole::from_str(r).map_err(|e| anyhow::anyhow!(e.to_string())))
            .collect()
    }
}

/// 协调存储中的键前缀布局
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    pub nodes: String,
    pub jobs: String,
    pub groups: String,
    pub once: String,
    pub job_logs: String,
    pub locks: String,
    pub tasks: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            nodes: "/rainbond/nodes/target/".to_string(),
            jobs: "/rainbond/jobs/".to_string(),
            groups: "/rainbond/groups/".to_string(),
            once: "/rainbond/once/".to_string(),
            job_logs: "/rainbond/job_logs/".to_string(),
            locks: "/rainbond/locks/".to_string(),
            tasks: "/rainbond/tasks/".to_string(),
        }
    }
}

impl KeysConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let prefixes = [
            ("nodes", &self.nodes),
            ("jobs", &self.jobs),
            ("groups", &self.groups),
            ("once", &self.once),
            ("job_logs", &self.job_logs),
            ("locks", &self.locks),
            ("tasks", &self.tasks),
        ];

        for (name, prefix) in prefixes {
            if !prefix.starts_with('/') || !prefix.ends_with('/') {
                return Err(anyhow::anyhow!(
                    "键前缀 {} 必须以'/'开头并以'/'结尾: {}",
                    name,
                    prefix
                ));
            }
        }

        // 作业与一次性作业的前缀必须互不包含，否则两个watch会收到对方的事件
        if self.jobs.starts_with(&self.once) || self.once.starts_with(&self.jobs) {
            return Err(anyhow::anyhow!(
                "作业前缀与一次性作业前缀不能互相包含: {} / {}",
                self.jobs,
                self.once
            ));
        }

        Ok(())
    }
}

/// 协调存储连接
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// etcd 地址，例如 `http://10.0.0.1:2379`；为空时使用进程内存储，仅适用于单机部署
    pub endpoints: Vec<String>,
    pub request_timeout_seconds: u64,
    /// 每个 watch 通道的缓冲容量
    pub watch_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            request_timeout_seconds: 5,
            watch_buffer: 1024,
        }
    }
}

impl StoreConfig {
    pub fn is_standalone(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("存储请求超时必须大于0"));
        }
        if self.watch_buffer == 0 {
            return Err(anyhow::anyhow!("watch缓冲容量必须大于0"));
        }
        for endpoint in &self.endpoints {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "存储地址必须以 http:// 或 https:// 开头: {}",
                    endpoint
                ));
            }
        }
        Ok(())
    }
}
