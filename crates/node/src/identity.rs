use std::fs;
use std::path::Path;

use orchestrator_core::{OrchestratorError, OrchestratorResult};
use tracing::info;
use uuid::Uuid;

const HOST_ID_KEY: &str = "host_uuid";

/// 读取本机持久化的节点ID，文件不存在或为空时生成并写入
///
/// 文件格式为 `host_uuid=<id>`，也接受只包含ID的单行。
pub fn read_host_id(path: impl AsRef<Path>) -> OrchestratorResult<String> {
    let path = path.as_ref();

    if path.exists() {
        let content = fs::read_to_string(path)?;
        if let Some(id) = parse_host_id(&content)? {
            return Ok(id);
        }
    }

    let id = Uuid::new_v4().to_string();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, format!("{HOST_ID_KEY}={id}\n"))?;
    info!("生成新的节点ID {} 并写入 {}", id, path.display());
    Ok(id)
}

fn parse_host_id(content: &str) -> OrchestratorResult<Option<String>> {
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match line.split_once('=') {
            Some((key, value)) if key.trim() == HOST_ID_KEY => {
                let value = value.trim();
                if value.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(value.to_string()));
            }
            Some(_) => continue,
            None => return Ok(Some(line.to_string())),
        }
    }

    if content.trim().is_empty() {
        Ok(None)
    } else {
        Err(OrchestratorError::Configuration(format!(
            "节点ID文件格式无效，缺少 {HOST_ID_KEY}"
        )))
    }
}
