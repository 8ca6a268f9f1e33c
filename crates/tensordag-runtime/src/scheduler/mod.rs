//! Per-device background scheduler.
//!
//! Submissions land on one FIFO run queue per compute device; each queue
//! owns a pool of worker threads that batch compatible model ops, honor
//! cross-device dependencies, and unblock the submitting client exactly
//! once when the whole DAG has finished.

pub mod config;
pub mod device_queue;
pub mod queue;
pub mod registry;
pub(crate) mod worker;


use std::sync::Arc;

use crate::executor::OpExecutor;
use crate::run_info::DagInspector;
use crate::unblock::ClientNotifier;

pub use config::SchedulerConfig;
pub use device_queue::DeviceQueue;
pub use queue::{NodeHandle, RunQueue};
pub use registry::DeviceRegistry;

/// Collaborators shared by every worker of every device queue.
pub(crate) struct SchedulerShared {
    pub(crate) config: SchedulerConfig,
    pub(crate) inspector: Arc<dyn DagInspector>,
    pub(crate) executor: Arc<dyn OpExecutor>,
    pub(crate) notifier: Arc<dyn ClientNotifier>,
}
