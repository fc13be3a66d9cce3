//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Calfactory.
//
// Calfactory is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Calfactory is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Calfactory. If not, see <http://www.gnu.org/licenses/>.

//! Worker threads for load and create jobs.
//!
//! Opening a calendar can block on slow storage, so callers never do it on
//! their own thread. Instead, work is handed to a `JobQueue`, which owns a
//! small fixed set of worker threads draining a shared FIFO channel and
//! passing each item to a handler.
//!
//! Each worker processes one item at a time in queue order. With more than
//! one worker, items are handled concurrently and complete in no particular
//! order.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::channel;
use lazy_static::lazy_static;
use log::{debug, error};

lazy_static! {
    static ref MAX_WORKERS: usize = std::env::var("CALFACTORY_MAX_WORKERS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or_else(num_cpus::get);
}

/// Determine how many workers to actually run for a configured count.
///
/// 0 means "one per CPU". The result is never 0 and never exceeds the
/// `CALFACTORY_MAX_WORKERS` environment variable (which itself defaults to
/// the CPU count).
pub fn effective_workers(configured: usize) -> usize {
    let max = *MAX_WORKERS;
    if 0 == configured {
        max
    } else {
        configured.min(max)
    }
}

pub struct JobQueue<T> {
    name: String,
    sender: Mutex<Option<channel::Sender<T>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl<T: Send + 'static> JobQueue<T> {
    /// Start a queue served by `workers` threads (at least one), each of
    /// which passes the items it receives to `handler`.
    pub fn new(
        name: &str,
        workers: usize,
        handler: impl Fn(T) + Send + Sync + 'static,
    ) -> io::Result<Self> {
        let (sender, receiver) = channel::unbounded::<T>();
        let handler = Arc::new(handler);

        let mut handles = Vec::new();
        for ix in 0..workers.max(1) {
            let receiver = receiver.clone();
            let handler = Arc::clone(&handler);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, ix))
                .spawn(move || run_worker(receiver, &*handler))?;
            handles.push(handle);
        }

        debug!("{} started with {} worker(s)", name, handles.len());

        Ok(JobQueue {
            name: name.to_owned(),
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
        })
    }

    /// Append `item` to the queue and return immediately.
    ///
    /// Once the queue has been shut down, `item` is handed back unprocessed.
    pub fn submit(&self, item: T) -> Result<(), T> {
        let sender = self.sender.lock().unwrap();
        match *sender {
            Some(ref sender) => sender.send(item).map_err(|e| e.into_inner()),
            None => Err(item),
        }
    }
}

impl<T> JobQueue<T> {
    pub fn is_closed(&self) -> bool {
        self.sender.lock().unwrap().is_none()
    }

    /// Stop accepting work, let the workers drain whatever is already queued,
    /// and wait for them to exit.
    ///
    /// Calling this from one of the queue's own workers does not wait for
    /// that worker.
    pub fn shutdown(&self) {
        self.sender.lock().unwrap().take();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        let me = thread::current().id();
        for worker in workers {
            if worker.thread().id() == me {
                continue;
            }

            if worker.join().is_err() {
                error!("{} worker exited abnormally", self.name);
            }
        }
    }
}

impl<T> Drop for JobQueue<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<T>(receiver: channel::Receiver<T>, handler: &dyn Fn(T)) {
    for item in receiver.iter() {
        if panic::catch_unwind(AssertUnwindSafe(|| handler(item))).is_err() {
            error!(
                "Job panicked on {}",
                thread::current().name().unwrap_or("worker")
            );
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    type Task = Box<dyn FnOnce() + Send>;

    fn task_queue(name: &str, workers: usize) -> JobQueue<Task> {
        JobQueue::new(name, workers, |task: Task| task()).unwrap()
    }

    #[test]
    fn single_worker_runs_fifo() {
        let (send, recv) = channel::unbounded();
        let queue = JobQueue::new("fifo", 1, move |i: u32| {
            send.send(i).unwrap()
        })
        .unwrap();

        for i in 0..20 {
            queue.submit(i).unwrap();
        }

        queue.shutdown();
        assert_eq!(
            (0..20).collect::<Vec<_>>(),
            recv.try_iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn submit_does_not_wait_for_work() {
        let queue = task_queue("nonblocking", 1);
        let (gate_send, gate_recv) = channel::bounded::<()>(0);
        let (done_send, done_recv) = channel::unbounded();

        queue
            .submit(Box::new(move || {
                gate_recv.recv().unwrap();
                done_send.send(()).unwrap();
            }))
            .map_err(|_| "rejected")
            .unwrap();
        // The worker is now blocked; more submissions must still go through.
        queue.submit(Box::new(|| ())).map_err(|_| "rejected").unwrap();

        assert!(done_recv.try_recv().is_err());
        gate_send.send(()).unwrap();
        done_recv.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn shutdown_drains_and_hands_back_later_items() {
        let count = Arc::new(AtomicUsize::new(0));
        let queue = {
            let count = Arc::clone(&count);
            JobQueue::new("drain", 3, move |n: usize| {
                count.fetch_add(n, Ordering::SeqCst);
            })
            .unwrap()
        };

        for _ in 0..100 {
            queue.submit(1).unwrap();
        }

        queue.shutdown();
        assert_eq!(100, count.load(Ordering::SeqCst));
        assert!(queue.is_closed());
        assert_eq!(Err(42), queue.submit(42));
    }

    #[test]
    fn worker_survives_panicking_job() {
        let queue = task_queue("panic", 1);
        let (send, recv) = channel::unbounded();

        queue
            .submit(Box::new(|| panic!("job failure")))
            .map_err(|_| "rejected")
            .unwrap();
        queue
            .submit(Box::new(move || send.send(()).unwrap()))
            .map_err(|_| "rejected")
            .unwrap();

        recv.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn effective_workers_is_never_zero() {
        assert!(effective_workers(0) >= 1);
        assert_eq!(1, effective_workers(1));
        assert!(effective_workers(usize::MAX) <= *MAX_WORKERS);
    }
}
