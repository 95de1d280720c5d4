//! 配置管理
//!
//! 配置按以下顺序叠加加载：
//!
//! 1. 各配置段的默认值
//! 2. TOML配置文件（可选）
//! 3. 环境变量覆盖（前缀 `ORCHESTRATOR_`，层级分隔符 `__`）
//!
//! 例如 `ORCHESTRATOR_NODE__TTL_SECONDS=15` 覆盖 `node.ttl_seconds`。

pub mod models;

pub use models::*;
