pub mod api_observability;
pub mod app_config;
pub mod node_store;
pub mod runtime;

// Re-export main types for easier imports
pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use node_store::{KeysConfig, NodeConfig, StoreConfig};
pub use runtime::{CronConfig, ExecutorConfig, TaskConfig};
