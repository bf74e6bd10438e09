use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use anyhow::Result;
use crossbeam_channel::{self as channel, Receiver, Sender};
use tokio::sync::oneshot;
use tracing::warn;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of named worker threads where every job carries a lane key.
/// Jobs sharing a key run on the same thread in submission order; jobs on
/// different lanes have no ordering relative to each other.
pub struct Dispatcher {
    lanes: Vec<Sender<Job>>,
    name: &'static str,
}

pub struct Worker {
    receiver: Receiver<Job>,
    name: String,
}

impl Dispatcher {
    pub fn new(name: &'static str, lanes: usize) -> Self {
        let lanes = (0..lanes.max(1))
            .map(|i| {
                let (sender, receiver) = channel::unbounded();
                Worker::new(receiver, format!("{name}-{i}"));
                sender
            })
            .collect();
        Self { lanes, name }
    }

    /// One lane per CPU.
    pub fn per_cpu(name: &'static str) -> Self {
        Self::new(name, num_cpus::get())
    }

    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }

    pub fn dispatch<K, F>(&self, key: &K, func: F)
    where
        K: Hash + ?Sized,
        F: FnOnce() + Send + 'static,
    {
        let lane = self.lane_of(key);
        if self.lanes[lane].send(Box::new(func)).is_err() {
            warn!(dispatcher = self.name, lane, "dispatcher lane is gone");
        }
    }

    fn lane_of<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.lanes.len() as u64) as usize
    }
}

impl Worker {
    pub fn new(receiver: Receiver<Job>, name: String) {
        let _ = thread::Builder::new().name(name.clone()).spawn(move || {
            let worker = Worker { receiver, name };
            worker.run();
        });
    }

    pub fn run(&self) {
        // exits once every sender of the lane is dropped
        while let Ok(job) = self.receiver.recv() {
            job();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if thread::panicking() {
            warn!(worker = self.name, "dispatcher worker panicked, restarting");
            Worker::new(self.receiver.clone(), self.name.clone());
        }
    }
}

/// Runs a blocking closure on its own named thread and awaits the result.
pub async fn spawn_task<F, R>(name: &str, func: F) -> Result<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (sender, receiver) = oneshot::channel();
    thread::Builder::new().name(name.to_string()).spawn(move || {
        let result = func();
        let _ = sender.send(result);
    })?;
    let result = receiver.await?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn same_key_keeps_submission_order() {
        let dispatcher = Dispatcher::new("test", 4);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = channel::bounded(1);
        for i in 0..100 {
            let seen = seen.clone();
            dispatcher.dispatch("call-1", move || seen.lock().unwrap().push(i));
        }
        dispatcher.dispatch("call-1", move || {
            let _ = done_tx.send(());
        });
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn panicking_job_does_not_kill_the_lane() {
        let dispatcher = Dispatcher::new("test", 1);
        dispatcher.dispatch("k", || panic!("boom"));
        let (done_tx, done_rx) = channel::bounded(1);
        dispatcher.dispatch("k", move || {
            let _ = done_tx.send(7);
        });
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[tokio::test]
    async fn spawn_task_returns_value() {
        let value = spawn_task("test-task", || 40 + 2).await.unwrap();
        assert_eq!(value, 42);
    }
}
