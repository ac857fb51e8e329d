//! 调度派发层
//!
//! 触发入口、并发控制、任务运行器、执行记录汇总、
//! 定时循环与缺数审计。

pub mod auditor;
pub mod concurrency;
pub mod execution;
pub mod runner;
pub mod schedule_loop;
pub mod scheduler;
pub mod test_utils;

pub use auditor::MissingDataAuditor;
pub use concurrency::{CancelRegistry, ConcurrencyController};
pub use execution::ExecutionManager;
pub use runner::TaskRunner;
pub use schedule_loop::ScheduleLoop;
pub use scheduler::{SyncScheduler, TaskSpec};
