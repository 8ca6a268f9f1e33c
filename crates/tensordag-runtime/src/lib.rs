//! Tensordag Runtime - per-device background execution for request DAGs.
//!
//! The runtime provides:
//! - **Device registry**: one FIFO run queue and worker pool per device
//! - **Scheduler**: opportunistic batching with cross-device dependency
//!   handling and an exactly-once client unblock protocol
//! - **Executor**: single and batched execution of DAG ops over a
//!   pluggable compute backend
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tensordag_runtime::{ClientNotifier, DeviceRegistry, SchedulerConfig};
//! # use tensordag_runtime::{ClientId, DagRunInfo, ModelBackend};
//! # use tensordag_core::{OpError, Tensor};
//! # struct MyBackend;
//! # impl ModelBackend for MyBackend {
//! #     fn run_model(&self, _: &str, _: &str, _: &[Tensor]) -> Result<Vec<Tensor>, OpError> { Ok(vec![]) }
//! #     fn run_script(&self, _: &str, _: &str, _: &str, _: &[Tensor]) -> Result<Vec<Tensor>, OpError> { Ok(vec![]) }
//! # }
//! # struct MyHost;
//! # impl ClientNotifier for MyHost {
//! #     fn unblock(&self, _: ClientId, _: Arc<DagRunInfo>) {}
//! # }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = DeviceRegistry::with_backend(
//!         SchedulerConfig::default().with_threads_per_queue(2),
//!         Arc::new(MyBackend),
//!         Arc::new(MyHost),
//!     )?;
//!
//!     // Parse a client request into a DAG, then:
//!     // registry.submit(&rinfo)?;
//!
//!     registry.shutdown();
//!     Ok(())
//! }
//! ```

pub mod executor;
pub mod run_info;
pub mod scheduler;
pub mod unblock;

pub use executor::{ModelBackend, OpExecutor, SessionExecutor};
pub use run_info::{
    BatchMatch, ClientId, CompletionAction, CurrentOpInfo, DagInspector, DagRunInfo,
    GraphInspector, OpBatchInfo,
};
pub use scheduler::{DeviceQueue, DeviceRegistry, SchedulerConfig};
pub use unblock::ClientNotifier;

// Re-export commonly used core types.
pub use tensordag_core::{Dag, DagOp, OpError, OpIndex, OpKind, SchedulerError, Tensor};
