pub mod store;
pub mod task_api;

pub use store::{CoordinationStore, EventType, KeyValue, LeaseId, RawEvent, StoreEvent};
pub use task_api::{NodeApi, TaskApi, TaskRepository};
