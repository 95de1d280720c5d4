//! 基础设施层：协调存储实现与控制面REST客户端

pub mod etcd_store;
pub mod http_api;
pub mod in_memory_store;
pub mod store_task_repository;

pub use etcd_store::EtcdStore;
pub use http_api::{HttpNodeApi, HttpTaskApi, RegionClient};
pub use in_memory_store::{InMemoryStore, InMemoryStoreConfig};
pub use store_task_repository::StoreTaskRepository;
