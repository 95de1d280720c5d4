pub mod config;
pub mod errors;
pub mod keys;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::*;
pub use errors::*;
pub use keys::KeyLayout;
pub use logging::init_logging;
pub use models::{
    Cmd, CmdId, HostNode, Job, JobKind, JobLog, JobRule, NodeGroup, NodeRole, NodeStatus, Task,
    TaskStatus,
};
pub use traits::{
    CoordinationStore, EventType, KeyValue, LeaseId, NodeApi, RawEvent, StoreEvent, TaskApi,
    TaskRepository,
};

/// 统一的Result类型
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
