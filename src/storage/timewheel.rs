//! Hashed time wheel for delayed jobs.
//!
//! A single ring of `slot_num` slots ticks every `interval`. A job due in
//! `d` lands `d / interval` ticks ahead; delays longer than one rotation are
//! encoded as a `circle` count that is decremented each time the cursor
//! passes the slot. A keyed job can be cancelled, and re-scheduling a live
//! key replaces the previous job.
//!
//! All state (`slots`, `timer`, `current_pos`) is confined to one worker
//! task that multiplexes the ticker with a command channel, so the public
//! API never touches shared mutable state. Due jobs run on detached tasks;
//! a panicking job is caught and logged without disturbing the wheel.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error};

/// A scheduled callback.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Default tick interval of the shared wheel.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Default slot count of the shared wheel (one hour ring at 1 s ticks).
pub const DEFAULT_SLOT_NUM: usize = 3600;

enum WheelCmd {
    Add {
        delay: Duration,
        key: String,
        job: Job,
    },
    Remove(String),
    Stop,
}

/// Handle to a running time wheel.
///
/// Build one at startup and share it by `Arc`; every method just enqueues a
/// command for the worker.
pub struct TimeWheel {
    cmd_tx: mpsc::UnboundedSender<WheelCmd>,
}

impl TimeWheel {
    /// Starts a wheel with the given tick interval (whole seconds, minimum
    /// one) and slot count, spawning its worker on the current runtime.
    pub fn new(interval: Duration, slot_num: usize) -> Arc<Self> {
        let interval = interval.max(Duration::from_secs(1));
        let slot_num = slot_num.max(1);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            interval_secs: interval.as_secs(),
            slot_num,
            slots: (0..slot_num).map(|_| VecDeque::new()).collect(),
            timer: HashMap::new(),
            current_pos: 0,
            next_id: 0,
        };
        tokio::spawn(worker.run(interval, cmd_rx));

        Arc::new(Self { cmd_tx })
    }

    /// Starts a wheel with the default geometry (1 s ticks, 3600 slots).
    pub fn with_defaults() -> Arc<Self> {
        Self::new(DEFAULT_INTERVAL, DEFAULT_SLOT_NUM)
    }

    /// Schedules `job` to run after `delay`. A non-empty `key` identifies the
    /// job for [`cancel`](Self::cancel); scheduling a key that is already
    /// pending replaces the previous job.
    pub fn delay<F>(&self, delay: Duration, key: &str, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.cmd_tx.send(WheelCmd::Add {
            delay,
            key: key.to_string(),
            job: Box::new(job),
        });
    }

    /// Schedules `job` to run at the absolute instant `at`. Instants in the
    /// past fire on the next tick.
    pub fn at<F>(&self, at: Instant, key: &str, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.delay(at.saturating_duration_since(Instant::now()), key, job);
    }

    /// Cancels the pending job for `key`. No-op if none is pending.
    pub fn cancel(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        let _ = self.cmd_tx.send(WheelCmd::Remove(key.to_string()));
    }

    /// Stops the worker. Pending jobs never fire.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(WheelCmd::Stop);
    }
}

struct Task {
    id: u64,
    circle: u64,
    key: String,
    job: Job,
}

struct Worker {
    interval_secs: u64,
    slot_num: usize,
    slots: Vec<VecDeque<Task>>,
    timer: HashMap<String, Location>,
    current_pos: usize,
    next_id: u64,
}

/// Where a keyed task currently lives.
struct Location {
    slot: usize,
    id: u64,
}

impl Worker {
    async fn run(mut self, interval: Duration, mut cmd_rx: mpsc::UnboundedReceiver<WheelCmd>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick(),
                cmd = cmd_rx.recv() => match cmd {
                    Some(WheelCmd::Add { delay, key, job }) => self.add(delay, key, job),
                    Some(WheelCmd::Remove(key)) => self.remove(&key),
                    Some(WheelCmd::Stop) | None => {
                        debug!("time wheel worker stopping");
                        return;
                    }
                },
            }
        }
    }

    fn position_of(&self, delay: Duration) -> (usize, u64) {
        let ticks = delay.as_secs() / self.interval_secs;
        let circle = ticks / self.slot_num as u64;
        let pos = (self.current_pos + ticks as usize % self.slot_num) % self.slot_num;
        (pos, circle)
    }

    fn add(&mut self, delay: Duration, key: String, job: Job) {
        let (pos, circle) = self.position_of(delay);
        if !key.is_empty() && self.timer.contains_key(&key) {
            // At most one pending job per key.
            self.remove(&key);
        }
        let id = self.next_id;
        self.next_id += 1;
        if !key.is_empty() {
            self.timer.insert(key.clone(), Location { slot: pos, id });
        }
        self.slots[pos].push_back(Task {
            id,
            circle,
            key,
            job,
        });
    }

    fn remove(&mut self, key: &str) {
        if let Some(loc) = self.timer.remove(key) {
            self.slots[loc.slot].retain(|task| task.id != loc.id);
        }
    }

    fn on_tick(&mut self) {
        let due = std::mem::take(&mut self.slots[self.current_pos]);
        let pos = self.current_pos;
        self.current_pos = (self.current_pos + 1) % self.slot_num;

        for mut task in due {
            if task.circle > 0 {
                task.circle -= 1;
                self.slots[pos].push_back(task);
                continue;
            }
            if !task.key.is_empty() {
                self.timer.remove(&task.key);
            }
            let job = task.job;
            tokio::spawn(async move {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                    error!(?panic, "time wheel job panicked");
                }
            });
        }
    }
}
