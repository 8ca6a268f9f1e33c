//! Worker loop for the per-device scheduler.
//!
//! Each worker owns its device queue's mutex while selecting work, releases
//! it around the compute call, and reacquires it for post-run bookkeeping.
//! A scheduling round peeks ahead in the FIFO to assemble a batch of
//! compatible model ops, while preserving dependency ordering: a request
//! whose inputs are still being produced on another device yields its place
//! to the next runnable request instead of blocking the queue.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::MutexGuard;

use tensordag_core::{tdag_op, tdag_queue, tdag_sched};

use crate::run_info::{CompletionAction, DagRunInfo};
use crate::scheduler::device_queue::{DeviceQueue, QueueInner};
use crate::scheduler::queue::NodeHandle;
use crate::scheduler::SchedulerShared;

/// What a scheduling round decided.
enum RoundOutcome {
    /// The round ran, retired, retried, or unblocked something.
    Progress,
    /// Every candidate head was ruled out (a minimum batch size could not
    /// be met); only a new submission can change the picture.
    Stalled,
}

/// Main worker loop. Runs until the queue's shutdown flag is raised.
pub(crate) fn worker_loop(worker_id: usize, device_queue: Arc<DeviceQueue>) {
    tdag_sched!(debug, worker = worker_id, device = %device_queue.device(), "Worker started");

    let mut guard = device_queue.inner.lock();
    'outer: loop {
        // Block until there is something to look at. Checking the queue
        // before each wait means a signal sent before we got here is never
        // lost; spurious wakes simply loop.
        while !guard.shutdown && guard.queue.is_empty() {
            device_queue.cond.wait(&mut guard);
        }
        if guard.shutdown {
            break;
        }

        while !guard.queue.is_empty() {
            let outcome = scheduling_round(&device_queue, &mut guard, worker_id);
            if guard.shutdown {
                break 'outer;
            }
            if matches!(outcome, RoundOutcome::Stalled) {
                device_queue.cond.wait(&mut guard);
                if guard.shutdown {
                    break 'outer;
                }
            }
        }
    }

    tdag_sched!(debug, worker = worker_id, device = %device_queue.device(), "Worker stopped");
}

/// One scheduling round. Entered and exited with the queue mutex held; the
/// mutex is released only around the compute call and the retry sleep.
#[allow(unused_variables)] // worker_id only used in tracing
fn scheduling_round(
    device_queue: &DeviceQueue,
    guard: &mut MutexGuard<'_, QueueInner>,
    worker_id: usize,
) -> RoundOutcome {
    let shared = &device_queue.shared;
    let device = device_queue.device();

    let mut do_unblock = false;
    let mut do_run = false;
    let mut do_retry = false;
    let mut device_complete = false;

    // ---- Selection walk ----
    //
    // Starting from the queue front, decide what to do with the head and
    // opportunistically extend it into a batch. If the head's op demands a
    // minimum batch size the queue cannot satisfy, restart the walk from
    // the next node; give up when no head yields progress.
    let mut head = guard.queue.front();
    let mut batch: Vec<NodeHandle> = Vec::new();

    'walk: while let Some(item) = head {
        batch.clear();
        batch.push(item);
        do_unblock = false;
        do_run = false;
        do_retry = false;
        device_complete = false;

        let Some(rinfo) = guard.queue.get(item).map(Arc::clone) else {
            break;
        };
        let info = shared.inspector.current_op_and_info(&rinfo, device);

        // All ops everywhere are done: unblock (the reference count decides
        // which worker actually delivers it).
        if info.dag_complete {
            do_unblock = true;
            break;
        }

        // Nothing left for this device: retire the entry without running.
        if info.device_complete {
            device_complete = true;
            break;
        }

        // Inputs still being produced by another device's workers: put the
        // entry back and give way.
        if !info.ready {
            do_retry = true;
            break;
        }

        do_run = true;

        let Some(op) = info.op else {
            break;
        };
        if !info.batchable {
            break;
        }

        let batch_info = shared.inspector.op_batch_info(&rinfo, op);
        let mut current_batchsize = batch_info.inbatchsize;
        if current_batchsize == 0 || current_batchsize >= batch_info.batchsize {
            break;
        }

        // Scan ahead for compatible model ops until the batch is full.
        let mut cursor = guard.queue.next(item);
        while let Some(candidate) = cursor {
            cursor = guard.queue.next(candidate);

            let Some(candidate_rinfo) = guard.queue.get(candidate).map(Arc::clone) else {
                continue;
            };
            let candidate_info = shared.inspector.current_op_and_info(&candidate_rinfo, device);
            let Some(candidate_op) = candidate_info.op else {
                continue;
            };
            if !candidate_info.ready || !candidate_info.batchable {
                continue;
            }

            let matched =
                shared
                    .inspector
                    .batching_match(&rinfo, op, &candidate_rinfo, candidate_op);
            if !matched.compatible {
                continue;
            }
            // A candidate that would overflow the batch ends the scan.
            if current_batchsize + matched.added_batchsize > batch_info.batchsize {
                break;
            }

            batch.push(candidate);
            current_batchsize += matched.added_batchsize;
        }

        if batch_info.minbatchsize == 0 || current_batchsize >= batch_info.minbatchsize {
            break;
        }

        // The minimum batch size was not met with this head; try to start a
        // batch at the next entry instead.
        head = guard.queue.next(item);
        continue 'walk;
    }

    // The walk ran off the end of the queue without finding a head that can
    // make progress.
    if head.is_none() {
        return RoundOutcome::Stalled;
    }

    // ---- Eviction ----
    //
    // The evicted entries are exclusively owned by this worker from here;
    // other workers on the same queue keep operating on the rest.
    let evicted: Vec<Arc<DagRunInfo>> = batch
        .iter()
        .filter_map(|&handle| guard.queue.evict(handle))
        .collect();
    let batched_run = evicted.len() > 1;

    let mut run_error = false;
    if do_run {
        tdag_op!(debug,
            worker = worker_id,
            device = %device,
            batch = evicted.len(),
            "Dispatching"
        );

        // Compute runs without the queue lock.
        MutexGuard::unlocked(guard, || {
            if batched_run {
                shared.executor.run_batched(&evicted, device);
            } else {
                shared.executor.run_single(&evicted[0], device);
            }
        });

        // Post-run inspection: one failed member poisons its whole request;
        // the error is OR-ed across the batch.
        run_error = evicted.iter().any(|rinfo| rinfo.has_error());

        // An errored round is terminal for the whole group: none of the
        // evicted entries go back on the queue, so this device's ref-count
        // contribution is retired for every member, errored or not. A
        // member whose error arrived from another device mid-run still had
        // its op completed here and must not be left uncounted.
        if run_error {
            for rinfo in &evicted {
                retire_device(shared, rinfo, device);
            }
        }
    }

    // The head request finished every op on every device.
    if do_unblock {
        retire_device(shared, &evicted[0], device);
    }

    // This device ran out of ops for the head request while others still
    // have work for it.
    if device_complete {
        retire_device(shared, &evicted[0], device);
    }

    // The head request is not runnable yet: swap it behind the next entry
    // so the queue keeps moving, or back off briefly if there is nothing
    // else to run while other devices produce its inputs.
    if do_retry {
        let head_rinfo = Arc::clone(&evicted[0]);
        if !guard.queue.is_empty() {
            tdag_queue!(trace, worker = worker_id, device = %device, "Retry-swap with next entry");
            if let Some(next_rinfo) = guard.queue.pop_front() {
                guard.queue.push_front(head_rinfo);
                guard.queue.push_front(next_rinfo);
            }
        } else {
            guard.queue.push_front(head_rinfo);
            let backoff = Duration::from_micros(shared.config.retry_sleep_us);
            MutexGuard::unlocked(guard, || std::thread::sleep(backoff));
        }
    }

    // A successful run goes back to the front (the request is a DAG, there
    // may be more to do). Reinserting in reverse keeps the original head
    // first; later members trade places with entries that arrived during
    // the run, a deliberate trade-off against a priority queue.
    if do_run && !run_error {
        for rinfo in evicted.iter().rev() {
            guard.queue.push_front(Arc::clone(rinfo));
        }
    }

    // Entries that were terminally handled (retired or errored) are dropped
    // here with the eviction list; re-queued entries are owned by the queue
    // again.
    RoundOutcome::Progress
}

/// Retire this device's contribution to a request's reference count and
/// deliver the unblock if this worker took the count to zero.
fn retire_device(shared: &SchedulerShared, rinfo: &Arc<DagRunInfo>, device: &str) {
    match rinfo.complete_device(device) {
        CompletionAction::Pending => {}
        CompletionAction::Unblock(client) => {
            tdag_sched!(debug, device = %device, client = client, "Unblocking client");
            shared.notifier.unblock(client, Arc::clone(rinfo));
        }
        CompletionAction::Dispose => {
            tdag_sched!(trace, device = %device, "Request finished with detached client");
        }
    }
}
