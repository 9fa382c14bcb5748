//! Periodic job scheduling.
//!
//! A deliberately small timer service: jobs registered with
//! [`Scheduler::every`] run on one worker thread started by
//! [`Scheduler::start`] and stopped by [`Scheduler::stop`]. Job panics are
//! trapped and logged, and a late job never cancels the schedule - the
//! next due time is advanced past "now" so a stalled job does not burst.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error};

/// A periodic job callback.
pub type JobFn = dyn Fn() + Send + Sync;

struct Job {
    name: String,
    period: Duration,
    next_due: Instant,
    callback: Arc<JobFn>,
}

#[derive(Default)]
struct Inner {
    jobs: Vec<Job>,
    running: bool,
    worker: Option<JoinHandle<()>>,
}

/// The periodic-job service.
#[derive(Default)]
pub struct Scheduler {
    inner: Mutex<Inner>,
    tick: Condvar,
}

impl Scheduler {
    /// Create a stopped scheduler.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a job to run every `period`, first due one period from now.
    pub fn every(&self, period: Duration, name: impl Into<String>, job: impl Fn() + Send + Sync + 'static) {
        let mut inner = self.inner.lock().expect("scheduler lock poisoned");
        inner.jobs.push(Job {
            name: name.into(),
            period,
            next_due: Instant::now() + period,
            callback: Arc::new(job),
        });
        drop(inner);
        self.tick.notify_all();
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("scheduler lock poisoned").jobs.len()
    }

    /// Whether no jobs are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start the worker thread. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut inner = self.inner.lock().expect("scheduler lock poisoned");
        if inner.running {
            return;
        }
        inner.running = true;

        let scheduler = Arc::clone(self);
        inner.worker = Some(
            std::thread::Builder::new()
                .name("knx-sched".into())
                .spawn(move || scheduler.run())
                .expect("spawn scheduler worker"),
        );
        debug!("scheduler started");
    }

    /// Stop the worker and join it. Idempotent.
    pub fn stop(&self) {
        let worker = {
            let mut inner = self.inner.lock().expect("scheduler lock poisoned");
            if !inner.running {
                return;
            }
            inner.running = false;
            inner.worker.take()
        };
        self.tick.notify_all();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("scheduler worker panicked");
            }
        }
        debug!("scheduler stopped");
    }

    fn run(&self) {
        let mut inner = self.inner.lock().expect("scheduler lock poisoned");
        while inner.running {
            let now = Instant::now();

            // Collect everything due; a job that fell several periods
            // behind runs once, with its next due time pushed past now
            let mut due: Vec<(String, Arc<JobFn>)> = Vec::new();
            let mut next_wakeup = now + Duration::from_secs(1);
            for job in &mut inner.jobs {
                if job.next_due <= now {
                    due.push((job.name.clone(), Arc::clone(&job.callback)));
                    while job.next_due <= now {
                        job.next_due += job.period;
                    }
                }
                if job.next_due < next_wakeup {
                    next_wakeup = job.next_due;
                }
            }

            if due.is_empty() {
                let timeout = next_wakeup.saturating_duration_since(now);
                let (guard, _) = self
                    .tick
                    .wait_timeout(inner, timeout)
                    .expect("scheduler lock poisoned");
                inner = guard;
                continue;
            }

            drop(inner);
            for (name, callback) in due {
                if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                    error!("scheduled job {name:?} panicked");
                }
            }
            inner = self.inner.lock().expect("scheduler lock poisoned");
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("scheduler lock poisoned");
        f.debug_struct("Scheduler")
            .field("jobs", &inner.jobs.len())
            .field("running", &inner.running)
            .finish()
    }
}
