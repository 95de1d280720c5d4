use thiserror::Error;

/// 编排系统错误类型定义
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("存储错误: {0}")]
    Store(String),

    #[error("存储连接已关闭")]
    StoreClosed,

    #[error("租约不存在: {id}")]
    LeaseNotFound { id: i64 },

    #[error("节点已注册: {id} (pid {pid})")]
    NodeAlreadyRegistered { id: String, pid: u32 },

    #[error("节点未找到: {id}")]
    NodeNotFound { id: String },

    #[error("作业未找到: {id}")]
    JobNotFound { id: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的作业定义: {0}")]
    InvalidJob(String),

    #[error("无法识别的存储事件: {0}")]
    UnknownEvent(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("执行超时: {0}")]
    ExecutionTimeout(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("检测到循环依赖: {0}")]
    CircularDependency(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// 是否为可重试的瞬时错误（存储抖动、网络中断）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Store(_)
                | OrchestratorError::Network(_)
                | OrchestratorError::LeaseNotFound { .. }
        )
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, OrchestratorError>;
