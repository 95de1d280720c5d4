//! # Orchestrator Testing Utils
//!
//! 各 crate 共用的测试替身与测试数据构建器。
//!
//! - **FlakyStore**: 包装任意协调存储，按需注入续约失败
//! - **ScriptedTaskApi**: 按脚本逐次返回任务状态的任务接口
//! - **Builders**: Job / Task / HostNode 构建器
//!
//! ```toml
//! [dev-dependencies]
//! orchestrator-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
