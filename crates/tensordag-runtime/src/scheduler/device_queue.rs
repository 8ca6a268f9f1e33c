//! Per-device run queue and worker pool.
//!
//! One `DeviceQueue` exists per distinct device string for the lifetime of
//! the process. Producers enqueue under the queue mutex and signal the
//! condition variable; the pool's workers drain the queue through the
//! scheduling rounds in [`crate::scheduler::worker`].

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use tensordag_core::{tdag_queue, tdag_sched, SchedulerError};

use crate::run_info::DagRunInfo;
use crate::scheduler::queue::RunQueue;
use crate::scheduler::worker;
use crate::scheduler::SchedulerShared;

/// Queue state guarded by the device mutex.
pub(crate) struct QueueInner {
    pub(crate) queue: RunQueue<Arc<DagRunInfo>>,
    pub(crate) shutdown: bool,
}

/// A device's FIFO run queue, condition variable, and worker pool.
pub struct DeviceQueue {
    device: String,
    pub(crate) inner: Mutex<QueueInner>,
    pub(crate) cond: Condvar,
    threads: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) shared: Arc<SchedulerShared>,
}

impl DeviceQueue {
    /// Bring up the queue for `device` and spawn its worker pool.
    ///
    /// `device` must already be in canonical uppercase form. If any worker
    /// thread fails to spawn, the ones already running are shut down and
    /// joined before the error is returned.
    pub(crate) fn spawn(
        device: String,
        shared: Arc<SchedulerShared>,
    ) -> Result<Arc<Self>, SchedulerError> {
        let pool_size = shared.config.threads_per_queue;
        let queue = Arc::new(Self {
            device,
            inner: Mutex::new(QueueInner {
                queue: RunQueue::new(),
                shutdown: false,
            }),
            cond: Condvar::new(),
            threads: Mutex::new(Vec::with_capacity(pool_size)),
            shared,
        });

        for worker_id in 0..pool_size {
            let worker_queue = Arc::clone(&queue);
            let spawned = std::thread::Builder::new()
                .name(format!("tensordag-{}-{}", queue.device, worker_id))
                .spawn(move || worker::worker_loop(worker_id, worker_queue));

            match spawned {
                Ok(handle) => queue.threads.lock().push(handle),
                Err(source) => {
                    let device = queue.device.clone();
                    tdag_sched!(error,
                        device = %device,
                        worker = worker_id,
                        "Worker spawn failed, tearing down device queue"
                    );
                    queue.shutdown();
                    return Err(SchedulerError::WorkerSpawn { device, source });
                }
            }
        }

        tdag_sched!(debug,
            device = %queue.device,
            workers = pool_size,
            "Device queue started"
        );
        Ok(queue)
    }

    /// The canonical device string this queue serves.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Number of requests currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue a request at the back and wake one worker.
    pub fn enqueue(&self, rinfo: Arc<DagRunInfo>) {
        let mut inner = self.inner.lock();
        inner.queue.push_back(rinfo);
        tdag_queue!(trace,
            device = %self.device,
            queue_len = inner.queue.len(),
            "Request enqueued"
        );
        self.cond.notify_one();
    }

    /// Stop the worker pool: raise the shutdown flag, wake every worker,
    /// and join them. Idempotent.
    pub(crate) fn shutdown(&self) {
        {
            let mut inner = self.inner.lock();
            inner.shutdown = true;
        }
        self.cond.notify_all();

        let handles = std::mem::take(&mut *self.threads.lock());
        for handle in handles {
            let _ = handle.join();
        }
        tdag_sched!(debug, device = %self.device, "Device queue stopped");
    }
}
