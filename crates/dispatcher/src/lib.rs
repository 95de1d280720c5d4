//! 任务编排：跨节点任务图的提交与跟踪、依赖判定以及任务超时检测

pub mod dependency_checker;
pub mod task_graph;
pub mod timeout_detector;

pub use dependency_checker::{evaluate_dependency, DependencyChecker, DependencyState};
pub use task_graph::{
    ConsoleProgress, Outcome, ProgressEvent, ProgressSink, RecordingProgress, TaskGraphExecutor,
};
pub use timeout_detector::TaskTimeoutDetector;
