//! Cooperative single-threaded event dispatcher.
//!
//! Combines the lock-free queue (§4.1, one ring per priority so strict
//! cross-priority ordering needs no comparator) and the hierarchical timer wheel
//! (§4.2), the same pairing as
//! `examples/original_source/libs/core/include/veloz/core/optimized_event_loop.h`'s
//! `OptimizedEventLoop`. Any thread may `post`; exactly one thread calls `run()`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::CoreError;
use crate::queue::LockFreeQueue;
use crate::timer::HierarchicalTimerWheel;

pub const MAX_BATCH: usize = 256;
const PRIORITY_LEVELS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    fn index(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

type Task = Box<dyn FnOnce() + Send>;

#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub tasks_posted: AtomicU64,
    pub tasks_run: AtomicU64,
    pub tasks_dropped_filtered: AtomicU64,
    pub errors_failed: AtomicU64,
    pub timer_schedules: AtomicU64,
    pub timer_fires: AtomicU64,
    pub batch_count: AtomicU64,
}

pub struct Dispatcher {
    queues: [Arc<LockFreeQueue<Task>>; PRIORITY_LEVELS],
    timers: Mutex<HierarchicalTimerWheel>,
    enabled_tags: RwLock<std::collections::HashSet<String>>,
    running: AtomicBool,
    wake: Arc<Condvar>,
    wake_lock: Mutex<()>,
    stats: Arc<DispatcherStats>,
    queue_capacity: usize,
}

impl Dispatcher {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queues: std::array::from_fn(|_| Arc::new(LockFreeQueue::new(queue_capacity))),
            timers: Mutex::new(HierarchicalTimerWheel::new()),
            enabled_tags: RwLock::new(std::collections::HashSet::new()),
            running: AtomicBool::new(false),
            wake: Arc::new(Condvar::new()),
            wake_lock: Mutex::new(()),
            stats: Arc::new(DispatcherStats::default()),
            queue_capacity,
        }
    }

    pub fn stats(&self) -> Arc<DispatcherStats> {
        self.stats.clone()
    }

    /// Empty filter set admits everything; otherwise a task is dropped unless at
    /// least one of its tags is enabled.
    pub fn set_enabled_tags(&self, tags: impl IntoIterator<Item = String>) {
        let mut guard = self.enabled_tags.write();
        *guard = tags.into_iter().collect();
    }

    fn admitted(&self, tags: &[String]) -> bool {
        let filter = self.enabled_tags.read();
        filter.is_empty() || tags.iter().any(|t| filter.contains(t))
    }

    /// Wait-free unless the target priority's ring is full.
    pub fn post(
        &self,
        task: Task,
        priority: Priority,
        tags: &[String],
    ) -> Result<(), CoreError> {
        if !self.admitted(tags) {
            self.stats.tasks_dropped_filtered.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        self.queues[priority.index()].push(task)?;
        self.stats.tasks_posted.fetch_add(1, Ordering::Relaxed);
        self.wake.notify_one();
        Ok(())
    }

    /// Schedules `task` to enter the immediate queue at `priority` after
    /// `delay_ms`. Returns the timer id (usable with `cancel_delayed`).
    pub fn post_delayed(&self, task: Task, delay_ms: u64, priority: Priority) -> usize {
        let id = {
            let mut wheel = self.timers.lock();
            // Tags are not re-checked at fire time; the original contract filters
            // at post() only, and a delayed post is just a deferred post().
            let queue = self.queues[priority.index()].clone();
            let wake = self.wake.clone();
            wheel.schedule(
                delay_ms,
                Box::new(move || {
                    let _ = queue.push(task);
                    wake.notify_one();
                }),
            )
        };
        self.stats.timer_schedules.fetch_add(1, Ordering::Relaxed);
        id
    }

    pub fn cancel_delayed(&self, id: usize) -> bool {
        self.timers.lock().cancel(id)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Drains up to `MAX_BATCH` tasks in strict priority order and advances the
    /// timer wheel by `elapsed_ms`. Returns the number of tasks run. Exposed
    /// separately from `run()` so tests can drive the dispatcher deterministically
    /// without a wall-clock sleep loop.
    pub fn drain_once(&self, elapsed_ms: u64) -> usize {
        if elapsed_ms > 0 {
            let fired = self.timers.lock().advance(elapsed_ms);
            self.stats
                .timer_fires
                .fetch_add(fired.len() as u64, Ordering::Relaxed);
        }

        let mut processed = 0usize;
        'outer: for queue in &self.queues {
            while processed < MAX_BATCH {
                match queue.pop() {
                    Some(task) => {
                        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)).is_err() {
                            self.stats.errors_failed.fetch_add(1, Ordering::Relaxed);
                        }
                        processed += 1;
                        self.stats.tasks_run.fetch_add(1, Ordering::Relaxed);
                    }
                    None => continue 'outer,
                }
            }
            break;
        }
        self.stats.batch_count.fetch_add(1, Ordering::Relaxed);
        processed
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs until `stop()` is called from another thread (or task closure). Sleeps
    /// up to 1ms when a drain pass processes nothing and no timer is imminent.
    pub fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        let mut last_tick = Instant::now();

        while self.running.load(Ordering::SeqCst) {
            let now = Instant::now();
            let elapsed_ms = now.duration_since(last_tick).as_millis() as u64;
            if elapsed_ms > 0 {
                last_tick += Duration::from_millis(elapsed_ms);
            }

            let processed = self.drain_once(elapsed_ms);

            if processed == 0 {
                let mut guard = self.wake_lock.lock();
                self.wake.wait_for(&mut guard, Duration::from_millis(1));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn critical_runs_before_earlier_normals() {
        let dispatcher = Dispatcher::new(64);
        let order = Arc::new(StdMutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            dispatcher
                .post(Box::new(move || order.lock().unwrap().push(format!("normal-{i}"))), Priority::Normal, &[])
                .unwrap();
        }
        {
            let order = order.clone();
            dispatcher
                .post(Box::new(move || order.lock().unwrap().push("critical".to_string())), Priority::Critical, &[])
                .unwrap();
        }

        dispatcher.drain_once(0);

        let order = order.lock().unwrap();
        assert_eq!(order[0], "critical");
        assert_eq!(order[1..], ["normal-0", "normal-1", "normal-2", "normal-3", "normal-4"]);
    }

    #[test]
    fn tag_filter_drops_unmatched_tasks() {
        let dispatcher = Dispatcher::new(8);
        dispatcher.set_enabled_tags(["symbol:BTCUSDT".to_string()]);

        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        dispatcher
            .post(
                Box::new(move || ran2.store(true, Ordering::SeqCst)),
                Priority::Normal,
                &["symbol:ETHUSDT".to_string()],
            )
            .unwrap();

        dispatcher.drain_once(0);
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(
            dispatcher.stats().tasks_dropped_filtered.load(Ordering::SeqCst),
            1
        );
    }

    #[test]
    fn empty_filter_admits_everything() {
        let dispatcher = Dispatcher::new(8);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        dispatcher
            .post(Box::new(move || ran2.store(true, Ordering::SeqCst)), Priority::Low, &["anything".to_string()])
            .unwrap();
        dispatcher.drain_once(0);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn post_delayed_enters_queue_after_wheel_fires() {
        let dispatcher = Dispatcher::new(8);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        dispatcher.post_delayed(
            Box::new(move || ran2.store(true, Ordering::SeqCst)),
            50,
            Priority::Normal,
        );

        dispatcher.drain_once(49);
        assert!(!ran.load(Ordering::SeqCst));
        dispatcher.drain_once(1);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_task_is_caught_and_counted_then_draining_continues() {
        let dispatcher = Dispatcher::new(8);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();

        dispatcher
            .post(Box::new(|| panic!("boom")), Priority::Normal, &[])
            .unwrap();
        dispatcher
            .post(Box::new(move || ran2.store(true, Ordering::SeqCst)), Priority::Normal, &[])
            .unwrap();

        let processed = dispatcher.drain_once(0);

        assert_eq!(processed, 2);
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(dispatcher.stats().errors_failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn queue_full_returns_error_to_caller() {
        let dispatcher = Dispatcher::new(2);
        dispatcher.post(Box::new(|| {}), Priority::Normal, &[]).unwrap();
        dispatcher.post(Box::new(|| {}), Priority::Normal, &[]).unwrap();
        let result = dispatcher.post(Box::new(|| {}), Priority::Normal, &[]);
        assert!(result.is_err());
    }
}
