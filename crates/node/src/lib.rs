pub mod cron_scheduler;
pub mod executor;
pub mod identity;
pub mod job_sync;
pub mod lease;
pub mod once_runner;
pub mod registry;
pub mod server;

pub use cron_scheduler::{CronScheduler, JobRunner, Timer};
pub use executor::{ExecOutput, JobExecutor};
pub use identity::read_host_id;
pub use job_sync::JobSynchronizer;
pub use lease::{LeaseManager, RenewOutcome};
pub use once_runner::OnceJobRunner;
pub use registry::NodeRegistry;
pub use server::NodeServer;
