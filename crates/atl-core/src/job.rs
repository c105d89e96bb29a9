//! Job System
//!
//! Worker pool for work that must not stall the audio thread, such as
//! physics ray casts issued by the propagation processor.
//! Features:
//! - Global injector queue shared by named worker threads
//! - Workers park on a condition variable while idle
//! - Zero-worker mode where jobs only run when the owner pumps them,
//!   which gives tests full control over completion order

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle as ThreadHandle};
use std::time::Duration;

use crossbeam::deque::{Injector, Steal};
use parking_lot::{Condvar, Mutex};

/// Handle to a submitted job
#[derive(Debug, Clone)]
pub struct JobHandle {
    completed: Arc<AtomicBool>,
    id: u64,
}

impl JobHandle {
    /// Check if the job has completed
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Get the job ID
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A job that can be executed by the job system
pub trait Job: Send + 'static {
    /// Execute the job
    fn execute(&mut self);

    /// Get the job name for debugging
    fn name(&self) -> &str {
        "unnamed_job"
    }
}

/// Wrapper for closure-based jobs
struct ClosureJob<F: FnOnce() + Send + 'static> {
    func: Option<F>,
    name: &'static str,
}

impl<F: FnOnce() + Send + 'static> Job for ClosureJob<F> {
    fn execute(&mut self) {
        if let Some(func) = self.func.take() {
            func();
        }
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Internal job wrapper with metadata
struct JobWrapper {
    job: Box<dyn Job>,
    completed: Arc<AtomicBool>,
}

impl JobWrapper {
    fn run(mut self) {
        self.job.execute();
        self.completed.store(true, Ordering::Release);
    }
}

/// State shared between the owner and the worker threads
struct Shared {
    queue: Injector<JobWrapper>,
    /// Jobs submitted but not yet finished
    pending: AtomicUsize,
    shutdown: AtomicBool,
    idle_lock: Mutex<()>,
    job_available: Condvar,
}

impl Shared {
    fn pop(&self) -> Option<JobWrapper> {
        loop {
            match self.queue.steal() {
                Steal::Success(wrapper) => return Some(wrapper),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    fn run_one(&self) -> bool {
        match self.pop() {
            Some(wrapper) => {
                wrapper.run();
                self.pending.fetch_sub(1, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }
}

/// Job system backed by a fixed set of worker threads
pub struct JobSystem {
    shared: Arc<Shared>,
    /// Number of worker threads
    num_workers: usize,
    /// Job counter for IDs
    job_counter: AtomicUsize,
    workers: Vec<ThreadHandle<()>>,
}

impl JobSystem {
    /// Create a new job system with the specified number of worker threads
    ///
    /// With zero workers nothing runs until [`JobSystem::process_jobs`] is
    /// called.
    pub fn new(num_workers: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Injector::new(),
            pending: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            idle_lock: Mutex::new(()),
            job_available: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(num_workers);
        for index in 0..num_workers {
            let shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("job-worker-{}", index))
                .spawn(move || worker_loop(&shared));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    log::error!("Failed to spawn job worker {}: {}", index, err);
                    break;
                }
            }
        }

        Self {
            shared,
            num_workers: workers.len(),
            job_counter: AtomicUsize::new(0),
            workers,
        }
    }

    /// Create a job system with one worker per available core, minus the caller
    pub fn with_cores() -> Self {
        let num_cores = thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);
        Self::new(num_cores.saturating_sub(1).max(1))
    }

    /// Get the number of worker threads
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Check whether the system still accepts jobs
    pub fn is_running(&self) -> bool {
        !self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Submit a job to the system
    ///
    /// Returns `None` once the system is shutting down.
    pub fn submit<J: Job>(&self, job: J) -> Option<JobHandle> {
        if !self.is_running() {
            return None;
        }

        let id = self.job_counter.fetch_add(1, Ordering::Relaxed) as u64;
        let completed = Arc::new(AtomicBool::new(false));

        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        self.shared.queue.push(JobWrapper {
            job: Box::new(job),
            completed: completed.clone(),
        });

        let _guard = self.shared.idle_lock.lock();
        self.shared.job_available.notify_one();

        Some(JobHandle { completed, id })
    }

    /// Submit a closure as a job
    pub fn submit_fn<F>(&self, name: &'static str, func: F) -> Option<JobHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(ClosureJob {
            func: Some(func),
            name,
        })
    }

    /// Process queued jobs on the current thread
    pub fn process_jobs(&self, max_jobs: usize) -> usize {
        let mut processed = 0;
        while processed < max_jobs && self.shared.run_one() {
            processed += 1;
        }
        processed
    }

    /// Wait for a job to complete, helping with queued work meanwhile
    pub fn wait_for(&self, handle: &JobHandle) {
        while !handle.is_complete() {
            if self.process_jobs(1) == 0 {
                thread::yield_now();
            }
        }
    }

    /// Wait until every submitted job has finished
    pub fn wait_idle(&self) {
        while self.pending_jobs() > 0 {
            if self.process_jobs(16) == 0 {
                thread::yield_now();
            }
        }
    }

    /// Number of jobs submitted but not yet finished
    pub fn pending_jobs(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }
}

fn worker_loop(shared: &Shared) {
    while !shared.shutdown.load(Ordering::Acquire) {
        if shared.run_one() {
            continue;
        }

        let mut guard = shared.idle_lock.lock();
        if shared.queue.is_empty() && !shared.shutdown.load(Ordering::Acquire) {
            shared
                .job_available
                .wait_for(&mut guard, Duration::from_millis(50));
        }
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);

        {
            let _guard = self.shared.idle_lock.lock();
            self.shared.job_available.notify_all();
        }

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }

        // Drain leftovers so completion callbacks are not silently lost
        while self.shared.run_one() {}
    }
}
