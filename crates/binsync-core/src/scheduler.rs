//! A single background worker draining a three-level priority queue (§4.D).
//!
//! Two independent schedulers exist in a running binsync process: one for
//! outgoing push jobs, one for UI-refresh jobs. Each owns exactly one
//! worker thread, so jobs within a scheduler never run concurrently with
//! each other — only FIFO order within a priority class and strict
//! priority across classes are guaranteed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Select, Sender};

use crate::error::CoreError;

/// Relative urgency of a scheduled job. Lower-numbered classes are drained
/// first; within a class, jobs run in submission order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Drained before anything in `Medium` or `Slow` is considered.
    Fast,
    /// Drained before `Slow`, after `Fast` is empty.
    Medium,
    /// Drained only once `Fast` and `Medium` are both empty.
    Slow,
}

/// A unit of work submitted to a [`Scheduler`].
///
/// Boxed so the scheduler can hold jobs of differing captured state in one
/// queue; `FnOnce` because a job runs exactly once.
pub type Job = Box<dyn FnOnce() -> Result<(), CoreError> + Send + 'static>;

const QUEUE_CAPACITY: usize = 4096;

/// A single-worker, three-priority job queue.
pub struct Scheduler {
    fast_tx: Sender<Job>,
    medium_tx: Sender<Job>,
    slow_tx: Sender<Job>,
    fast_rx: Receiver<Job>,
    medium_rx: Receiver<Job>,
    slow_rx: Receiver<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stop: Arc<AtomicBool>,
}

impl Scheduler {
    /// Construct a scheduler with its queues open but no worker thread
    /// running yet.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (fast_tx, fast_rx) = bounded(QUEUE_CAPACITY);
        let (medium_tx, medium_rx) = bounded(QUEUE_CAPACITY);
        let (slow_tx, slow_rx) = bounded(QUEUE_CAPACITY);
        Arc::new(Self {
            fast_tx,
            medium_tx,
            slow_tx,
            fast_rx,
            medium_rx,
            slow_rx,
            worker: Mutex::new(None),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Start the worker thread, if one isn't already running.
    pub fn start_worker_thread(self: &Arc<Self>) {
        let mut worker = self.worker.lock().expect("worker mutex poisoned");
        if worker.is_some() {
            return;
        }
        self.stop.store(false, Ordering::SeqCst);
        let scheduler = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("binsync-scheduler".into())
            .spawn(move || scheduler.worker_loop())
            .expect("failed to spawn scheduler worker thread");
        *worker = Some(handle);
    }

    /// Signal the worker to stop once its queues are drained, and join it.
    ///
    /// Already-enqueued jobs still run to completion; nothing new should be
    /// scheduled once this returns.
    pub fn stop_worker_thread(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().expect("worker mutex poisoned").take() {
            let _ = handle.join();
        }
    }

    /// Enqueue `job` at `priority` and return immediately.
    ///
    /// # Errors
    /// Returns [`CoreError::SchedulerShutdown`] if the queue has been
    /// dropped (the scheduler itself was torn down).
    pub fn schedule_job(&self, job: Job, priority: Priority) -> Result<(), CoreError> {
        let tx = match priority {
            Priority::Fast => &self.fast_tx,
            Priority::Medium => &self.medium_tx,
            Priority::Slow => &self.slow_tx,
        };
        tx.send(job).map_err(|_| CoreError::SchedulerShutdown)
    }

    /// Enqueue `job` at `priority` and block until it has run, returning
    /// its result.
    ///
    /// Uses a dedicated one-shot reply channel rather than a condvar, so
    /// the submitting thread (which may be the GUI thread) never shares a
    /// lock with the worker.
    ///
    /// # Errors
    /// Returns [`CoreError::SchedulerShutdown`] if the job could not be
    /// enqueued, or if the worker died before reporting a result.
    pub fn schedule_and_wait_job(
        &self,
        job: impl FnOnce() -> Result<(), CoreError> + Send + 'static,
        priority: Priority,
    ) -> Result<(), CoreError> {
        let (reply_tx, reply_rx) = bounded::<Result<(), CoreError>>(1);
        let wrapped: Job = Box::new(move || {
            let result = job();
            let reply = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(CoreError::JobFailed(e.to_string())),
            };
            let _ = reply_tx.send(reply);
            result
        });
        self.schedule_job(wrapped, priority)?;
        reply_rx.recv().map_err(|_| CoreError::SchedulerShutdown)?
    }

    fn worker_loop(&self) {
        loop {
            if self.try_run_one() {
                continue;
            }
            if self.stop.load(Ordering::SeqCst) {
                return;
            }

            let mut select = Select::new();
            let fast_idx = select.recv(&self.fast_rx);
            let medium_idx = select.recv(&self.medium_rx);
            let slow_idx = select.recv(&self.slow_rx);
            let Ok(op) = select.select_timeout(std::time::Duration::from_millis(200)) else {
                continue;
            };
            let job = if op.index() == fast_idx {
                op.recv(&self.fast_rx)
            } else if op.index() == medium_idx {
                op.recv(&self.medium_rx)
            } else if op.index() == slow_idx {
                op.recv(&self.slow_rx)
            } else {
                unreachable!("Select only registered three receivers")
            };
            if let Ok(job) = job {
                run_job(job);
            }
        }
    }

    /// Drain one job in strict priority order, if any are queued.
    fn try_run_one(&self) -> bool {
        if let Ok(job) = self.fast_rx.try_recv() {
            run_job(job);
            return true;
        }
        if let Ok(job) = self.medium_rx.try_recv() {
            run_job(job);
            return true;
        }
        if let Ok(job) = self.slow_rx.try_recv() {
            run_job(job);
            return true;
        }
        false
    }
}

fn run_job(job: Job) {
    if let Err(error) = job() {
        tracing::warn!(%error, "scheduled job failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn running_scheduler() -> Arc<Scheduler> {
        let scheduler = Scheduler::new();
        scheduler.start_worker_thread();
        scheduler
    }

    #[test]
    fn schedule_and_wait_runs_job_synchronously() {
        let scheduler = running_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        scheduler
            .schedule_and_wait_job(
                move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                Priority::Fast,
            )
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        scheduler.stop_worker_thread();
    }

    #[test]
    fn fast_jobs_run_before_slow_jobs_submitted_first() {
        let scheduler = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        // Queue both jobs before the worker starts, so priority order is
        // actually exercised rather than racing submission order.
        let o1 = Arc::clone(&order);
        scheduler
            .schedule_job(
                Box::new(move || {
                    o1.lock().unwrap().push("slow");
                    Ok(())
                }),
                Priority::Slow,
            )
            .unwrap();
        let o2 = Arc::clone(&order);
        scheduler
            .schedule_job(
                Box::new(move || {
                    o2.lock().unwrap().push("fast");
                    Ok(())
                }),
                Priority::Fast,
            )
            .unwrap();

        scheduler.start_worker_thread();
        scheduler.stop_worker_thread();
        assert_eq!(*order.lock().unwrap(), vec!["fast", "slow"]);
    }
}
