//! Serializes handshake work onto one background worker (spec.md §4.5:
//! "a queue feeds one worker thread, strict FIFO"). Grounded in the
//! teacher's FFI boundary (`ffi/android.rs`), which off-loads blocking
//! work onto a plain `std::thread::spawn` rather than a runtime; this
//! crate does the same but keeps the thread alive for the subsystem's
//! whole lifetime instead of spawning one per call.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    Run(Job),
    Shutdown,
}

/// A single-worker FIFO queue. Every job enqueued runs in submission
/// order on one background thread, so two handshake steps for the same
/// `request_id` can never race each other.
pub struct TaskQueue {
    sender: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
    pub fn new() -> Arc<Self> {
        let (sender, receiver): (Sender<Command>, Receiver<Command>) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("devicetrust-worker".into())
            .spawn(move || run_worker(receiver))
            .expect("spawning the subsystem worker thread");

        Arc::new(TaskQueue {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Enqueues `job` for the worker thread. Returns `false` if the queue
    /// has already been destroyed.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        match self.sender.lock().unwrap().as_ref() {
            Some(sender) => sender.send(Command::Run(Box::new(job))).is_ok(),
            None => false,
        }
    }

    /// Drains whatever is queued, stops the worker, and joins it. Safe to
    /// call more than once — later calls are no-ops.
    pub fn destroy(&self) {
        if let Some(sender) = self.sender.lock().unwrap().take() {
            let _ = sender.send(Command::Shutdown);
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn run_worker(receiver: Receiver<Command>) {
    for command in receiver {
        match command {
            Command::Run(job) => job(),
            Command::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn jobs_run_in_submission_order() {
        let queue = TaskQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let order = order.clone();
            queue.submit(move || order.lock().unwrap().push(i));
        }
        queue.destroy();
        assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn destroy_is_idempotent() {
        let queue = TaskQueue::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        queue.submit(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        queue.destroy();
        queue.destroy();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn submit_after_destroy_is_rejected() {
        let queue = TaskQueue::new();
        queue.destroy();
        assert!(!queue.submit(|| {}));
    }
}
