use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::error::AppError;
use crate::session::WorkerId;

/// One progress report from a running task. The core emits these; whatever
/// front end exists consumes them on its own thread.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub fraction: f64,
    pub message: String,
}

/// Where a task sends progress. A sink without a channel swallows events, so
/// callers that don't care pass `ProgressSink::ignore()`.
#[derive(Clone)]
pub struct ProgressSink {
    sender: Option<Sender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(sender: Sender<ProgressEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn ignore() -> Self {
        Self { sender: None }
    }

    /// Emits one progress event. A disconnected receiver is not an error;
    /// the task keeps running and the event is dropped.
    pub fn emit(&self, fraction: f64, message: impl Into<String>) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(ProgressEvent {
                fraction: fraction.clamp(0.0, 1.0),
                message: message.into(),
            });
        }
    }
}

/// Cooperative cancellation checked between units of work (an upload checks
/// it between archives, never mid-archive).
#[derive(Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type Job = Box<dyn FnOnce(WorkerId) + Send + 'static>;

/// Fixed-size pool executing queued background work (uploads, index
/// refreshes). Jobs run in submission order per worker; each worker carries
/// a stable [`WorkerId`] that session checkouts are keyed by.
pub struct BackgroundExecutor {
    sender: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl BackgroundExecutor {
    pub fn new(worker_count: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let workers = (0..worker_count.max(1))
            .map(|i| {
                let receiver: Receiver<Job> = receiver.clone();
                let worker = WorkerId(i as u64);
                thread::Builder::new()
                    .name(format!("background-{}", i))
                    .spawn(move || {
                        for job in receiver.iter() {
                            job(worker);
                        }
                        log::debug!("Background worker {:?} shutting down.", worker);
                    })
                    .expect("failed to spawn background worker")
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
        }
    }

    pub fn submit(&self, job: impl FnOnce(WorkerId) + Send + 'static) -> Result<(), AppError> {
        self.sender
            .as_ref()
            .ok_or(AppError::SendError)?
            .send(Box::new(job))?;
        Ok(())
    }

    /// Drains the queue and joins every worker.
    pub fn shutdown(mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for BackgroundExecutor {
    fn drop(&mut self) {
        self.sender.take();
    }
}

/// Runs short user-triggered tasks on a fresh thread immediately, never
/// behind the background queue. Concurrency is capped; a submit past the cap
/// blocks the submitter until a slot frees, it is never queued behind other
/// jobs.
pub struct ImmediateExecutor {
    cap: usize,
    active: Arc<(Mutex<usize>, Condvar)>,
    next_worker: AtomicU64,
}

impl ImmediateExecutor {
    /// Worker IDs from this executor live in their own namespace so they can
    /// never collide with background worker IDs in the session pool.
    const WORKER_ID_BASE: u64 = 1 << 32;

    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            active: Arc::new((Mutex::new(0), Condvar::new())),
            next_worker: AtomicU64::new(0),
        }
    }

    pub fn submit(&self, job: impl FnOnce(WorkerId) + Send + 'static) {
        {
            let (count, available) = &*self.active;
            let mut count = count.lock().expect("immediate counter poisoned");
            while *count >= self.cap {
                count = available.wait(count).expect("immediate counter poisoned");
            }
            *count += 1;
        }

        let active = Arc::clone(&self.active);
        let worker = WorkerId(Self::WORKER_ID_BASE + self.next_worker.fetch_add(1, Ordering::SeqCst));
        thread::Builder::new()
            .name(format!("immediate-{}", worker.0))
            .spawn(move || {
                job(worker);
                let (count, available) = &*active;
                *count.lock().expect("immediate counter poisoned") -= 1;
                available.notify_one();
            })
            .expect("failed to spawn immediate worker");
    }
}

/// A background-style pool for low-priority work where every job receives a
/// cancellation flag. `submit` hands the flag back so the caller can abandon
/// the job between its units of work.
pub struct CancelableExecutor {
    inner: BackgroundExecutor,
}

impl CancelableExecutor {
    const WORKER_ID_BASE: u64 = 1 << 33;

    pub fn new(worker_count: usize) -> Self {
        let inner = BackgroundExecutor::new(worker_count);
        Self { inner }
    }

    pub fn submit(
        &self,
        job: impl FnOnce(WorkerId, CancellationFlag) + Send + 'static,
    ) -> Result<CancellationFlag, AppError> {
        let flag = CancellationFlag::new();
        let returned = flag.clone();
        self.inner.submit(move |worker| {
            let worker = WorkerId(Self::WORKER_ID_BASE + worker.0);
            if flag.is_cancelled() {
                log::debug!("Job on worker {:?} cancelled before it started.", worker);
                return;
            }
            job(worker, flag);
        })?;
        Ok(returned)
    }

    pub fn shutdown(self) {
        self.inner.shutdown();
    }
}

/// The three pools the application schedules onto.
pub struct TaskExecutor {
    pub background: BackgroundExecutor,
    pub immediate: ImmediateExecutor,
    pub cancelable: CancelableExecutor,
}

impl TaskExecutor {
    pub fn new(background_workers: usize, immediate_cap: usize) -> Self {
        Self {
            background: BackgroundExecutor::new(background_workers),
            immediate: ImmediateExecutor::new(immediate_cap),
            cancelable: CancelableExecutor::new(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn background_jobs_all_run_with_stable_worker_ids() {
        let executor = BackgroundExecutor::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            executor
                .submit(move |worker| {
                    assert!(worker.0 < 2);
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        executor.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn immediate_pool_respects_its_cap() {
        let executor = ImmediateExecutor::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done = Arc::clone(&done);
            executor.submit(move |_| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        while done.load(Ordering::SeqCst) < 6 {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn cancelable_jobs_observe_their_flag() {
        let executor = CancelableExecutor::new(1);
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let flag = executor
            .submit(move |_, flag| {
                while !flag.is_cancelled() {
                    thread::sleep(Duration::from_millis(2));
                }
                sender.send(()).unwrap();
            })
            .unwrap();
        flag.cancel();
        receiver
            .recv_timeout(Duration::from_secs(2))
            .expect("job never observed cancellation");
        executor.shutdown();
    }

    #[test]
    fn progress_sink_clamps_and_ignores_disconnects() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let sink = ProgressSink::new(sender);
        sink.emit(1.7, "done");
        assert_eq!(
            receiver.recv().unwrap(),
            ProgressEvent {
                fraction: 1.0,
                message: "done".into()
            }
        );
        drop(receiver);
        sink.emit(0.5, "dropped"); // no panic
        ProgressSink::ignore().emit(0.1, "nowhere");
    }
}
