//! Bounded worker pool over an unbounded job queue.
//!
//! Jobs are fire-and-forget: all output goes through the mail depot, or, for
//! match sessions, through the session's own sockets. Size the pool for the
//! number of simultaneous matches plus two, since a match session occupies
//! its worker for the whole invitation-and-duel window.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let (tx, rx): (Sender<Job>, Receiver<Job>) = unbounded();
        let mut workers = Vec::with_capacity(size);
        for n in 0..size {
            let rx = rx.clone();
            workers.push(thread::spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
                debug!("worker {} draining out", n);
            }));
        }
        Self { tx, workers }
    }

    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        // Fails only when every worker is gone, i.e. at teardown.
        let _ = self.tx.send(Box::new(job));
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_executes_all_jobs() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) == 100 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_jobs_run_concurrently() {
        let pool = WorkerPool::new(4);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.execute(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(100));
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        for _ in 0..100 {
            if peak.load(Ordering::SeqCst) >= 2 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }
}
