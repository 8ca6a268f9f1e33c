//! Process-wide device registry.
//!
//! Maps canonical (uppercase) device strings to their run queues. Queues are
//! created on first reference and live until shutdown; racing submitters
//! always end up with the same queue for a device.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use tensordag_core::{normalize_device, tdag_sched, SchedulerError, SchedulerResult};

use crate::executor::{ModelBackend, OpExecutor, SessionExecutor};
use crate::run_info::{DagInspector, DagRunInfo, GraphInspector};
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::device_queue::DeviceQueue;
use crate::scheduler::SchedulerShared;
use crate::unblock::ClientNotifier;

/// The per-device scheduler: device queues keyed by canonical device string,
/// plus the collaborators every worker consumes.
pub struct DeviceRegistry {
    queues: DashMap<String, Arc<DeviceQueue>>,
    shared: Arc<SchedulerShared>,
}

impl DeviceRegistry {
    /// Create a registry with explicit collaborators.
    pub fn new(
        config: SchedulerConfig,
        inspector: Arc<dyn DagInspector>,
        executor: Arc<dyn OpExecutor>,
        notifier: Arc<dyn ClientNotifier>,
    ) -> SchedulerResult<Self> {
        config
            .validate()
            .map_err(SchedulerError::InvalidConfig)?;
        Ok(Self {
            queues: DashMap::new(),
            shared: Arc::new(SchedulerShared {
                config,
                inspector,
                executor,
                notifier,
            }),
        })
    }

    /// Create a registry with the canonical inspector and executor over the
    /// given compute backend.
    pub fn with_backend(
        config: SchedulerConfig,
        backend: Arc<dyn ModelBackend>,
        notifier: Arc<dyn ClientNotifier>,
    ) -> SchedulerResult<Self> {
        Self::new(
            config,
            Arc::new(GraphInspector),
            Arc::new(SessionExecutor::new(backend)),
            notifier,
        )
    }

    /// Ensure the run queue for `device` exists, creating it and its worker
    /// pool on first reference.
    ///
    /// Lookup is by canonical uppercase form. Concurrent callers racing on
    /// the same device observe the same queue; a worker-spawn failure tears
    /// the partial queue down and surfaces the error.
    pub fn ensure(&self, device: &str) -> SchedulerResult<Arc<DeviceQueue>> {
        if device.is_empty() || !device.is_ascii() {
            return Err(SchedulerError::InvalidDevice {
                device: device.to_string(),
            });
        }
        let key = normalize_device(device);

        match self.queues.entry(key.clone()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let queue = DeviceQueue::spawn(key, Arc::clone(&self.shared))?;
                entry.insert(Arc::clone(&queue));
                Ok(queue)
            }
        }
    }

    /// Submit a request: enqueue it on every distinct device its DAG
    /// touches and wake those queues.
    ///
    /// All queues are ensured before anything is enqueued, so a registry
    /// failure rejects the submission without leaving it half-placed.
    pub fn submit(&self, rinfo: &Arc<DagRunInfo>) -> SchedulerResult<()> {
        let devices = rinfo.dag().devices();
        if devices.is_empty() {
            return Err(SchedulerError::SubmissionRejected {
                reason: "request DAG has no ops".to_string(),
            });
        }

        let mut queues = Vec::with_capacity(devices.len());
        for device in devices {
            queues.push(self.ensure(device)?);
        }
        for queue in queues {
            queue.enqueue(Arc::clone(rinfo));
        }
        Ok(())
    }

    /// Look up an existing queue without creating one.
    pub fn queue(&self, device: &str) -> Option<Arc<DeviceQueue>> {
        self.queues
            .get(&normalize_device(device))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Number of device queues created so far.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// Whether any device queue exists yet.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Shut down every device queue and join all worker pools.
    pub fn shutdown(&self) {
        let queues: Vec<Arc<DeviceQueue>> = self
            .queues
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.queues.clear();

        for queue in queues {
            queue.shutdown();
        }
        tdag_sched!(debug, "Registry shut down");
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
