//! Serialized executor actor
//!
//! The executor owns a [`TaskQueue`] and runs every callback inline in one
//! actor task: timers and readiness notifications from any number of sockets
//! all execute one at a time, in due-time order. Watcher and acceptor tasks
//! elsewhere in the emulator only ever enqueue work here; they never run a
//! task body themselves.
//!
//! [`ExecutorHandle`] is the cloneable submission side. It is safe to use
//! from inside a running callback: commands go over an unbounded channel and
//! are applied between task executions, so re-entrant scheduling and
//! cancellation cannot deadlock or corrupt the queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, trace};

use crate::error::SchedulerError;
use crate::queue::{TaskCallback, TaskGroupId, TaskHandle, TaskQueue};

enum Command {
    Insert {
        handle: TaskHandle,
        group: TaskGroupId,
        delay: Duration,
        period: Option<Duration>,
        callback: TaskCallback,
    },
    Cancel(TaskHandle),
    CancelGroup(TaskGroupId),
    Shutdown,
}

/// Cloneable handle for submitting work to the executor
///
/// Group and task identifiers are issued from shared atomic counters, so
/// allocation is synchronous and identifiers are never reused.
#[derive(Clone)]
pub struct ExecutorHandle {
    tx: mpsc::UnboundedSender<Command>,
    next_group: Arc<AtomicU64>,
    next_handle: Arc<AtomicU64>,
}

impl ExecutorHandle {
    /// Allocate a fresh task group
    pub fn new_group(&self) -> TaskGroupId {
        TaskGroupId(self.next_group.fetch_add(1, Ordering::Relaxed))
    }

    /// Schedule a one-shot task to fire no earlier than `delay` from now
    ///
    /// A zero delay means "as soon as the execution context is free", never
    /// inline in the caller.
    pub fn schedule(
        &self,
        group: TaskGroupId,
        delay: Duration,
        callback: impl FnMut() + Send + 'static,
    ) -> Result<TaskHandle, SchedulerError> {
        self.submit(group, delay, None, Box::new(callback))
    }

    /// Schedule a task that re-arms itself after every firing until cancelled
    pub fn schedule_periodic(
        &self,
        group: TaskGroupId,
        initial_delay: Duration,
        period: Duration,
        callback: impl FnMut() + Send + 'static,
    ) -> Result<TaskHandle, SchedulerError> {
        self.submit(group, initial_delay, Some(period), Box::new(callback))
    }

    /// Run a one-shot closure on the execution context as soon as it is free
    pub fn execute(
        &self,
        group: TaskGroupId,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<TaskHandle, SchedulerError> {
        let mut callback = Some(callback);
        self.schedule(group, Duration::ZERO, move || {
            if let Some(callback) = callback.take() {
                callback();
            }
        })
    }

    /// Cancel a single task; no-op if it already fired or was cancelled
    ///
    /// Safe to call from inside any callback, including the task's own.
    pub fn cancel(&self, handle: TaskHandle) {
        let _ = self.tx.send(Command::Cancel(handle));
    }

    /// Cancel every pending task owned by a group; idempotent
    pub fn cancel_group(&self, group: TaskGroupId) {
        let _ = self.tx.send(Command::CancelGroup(group));
    }

    /// Ask the executor to stop; pending tasks are dropped
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    fn submit(
        &self,
        group: TaskGroupId,
        delay: Duration,
        period: Option<Duration>,
        callback: TaskCallback,
    ) -> Result<TaskHandle, SchedulerError> {
        let handle = TaskHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.tx
            .send(Command::Insert {
                handle,
                group,
                delay,
                period,
                callback,
            })
            .map_err(|_| SchedulerError::ShutDown)?;
        Ok(handle)
    }
}

/// The executor actor; owns the task queue and runs callbacks serially
pub struct Executor {
    queue: TaskQueue,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl Executor {
    /// Create an executor and its submission handle
    ///
    /// The executor does nothing until [`Executor::run`] is awaited,
    /// typically via `tokio::spawn(executor.run())`.
    pub fn new() -> (Self, ExecutorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let executor = Self {
            queue: TaskQueue::new(),
            rx,
        };
        let handle = ExecutorHandle {
            tx,
            next_group: Arc::new(AtomicU64::new(0)),
            next_handle: Arc::new(AtomicU64::new(0)),
        };
        (executor, handle)
    }

    /// Run the actor loop until shutdown
    ///
    /// Biased toward the command channel so that cancellations submitted
    /// before a tick are applied before that tick's tasks execute.
    pub async fn run(mut self) {
        debug!("executor running");
        loop {
            let next = self.queue.next_due();
            tokio::select! {
                biased;

                cmd = self.rx.recv() => {
                    if !self.apply(cmd) {
                        break;
                    }
                }

                _ = Self::sleep_until_due(next) => {
                    if !self.run_due() {
                        break;
                    }
                }
            }
        }
        debug!("executor stopped, {} tasks dropped", self.queue.len());
    }

    /// Apply one command; returns false on shutdown
    fn apply(&mut self, cmd: Option<Command>) -> bool {
        match cmd {
            Some(Command::Insert { handle, group, delay, period, callback }) => {
                let due = Instant::now() + delay;
                trace!("insert task {:?} in group {:?}", handle, group);
                self.queue.insert(handle, group, due, period, callback);
                true
            }
            Some(Command::Cancel(handle)) => {
                self.queue.cancel(handle);
                true
            }
            Some(Command::CancelGroup(group)) => {
                let removed = self.queue.cancel_group(group);
                if removed > 0 {
                    debug!("cancelled {} tasks in group {:?}", removed, group);
                }
                true
            }
            Some(Command::Shutdown) | None => false,
        }
    }

    async fn sleep_until_due(next: Option<Instant>) {
        match next {
            Some(due) => sleep_until(due).await,
            None => std::future::pending().await,
        }
    }

    /// Run every task due at this tick, re-arming periodic ones
    ///
    /// Commands submitted by a running callback are drained and applied
    /// after that callback returns and before the next task runs, so a
    /// cancel against a later task of the same tick takes effect. Returns
    /// false if a shutdown arrived mid-tick.
    fn run_due(&mut self) -> bool {
        let now = Instant::now();
        while let Some(mut task) = self.queue.pop_due(now) {
            (task.callback)();
            if let Some(period) = task.period {
                self.queue
                    .insert(task.handle, task.group, now + period, Some(period), task.callback);
            }
            while let Ok(cmd) = self.rx.try_recv() {
                if !self.apply(Some(cmd)) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn spawn_executor() -> ExecutorHandle {
        let (executor, handle) = Executor::new();
        tokio::spawn(executor.run());
        handle
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_fires_after_delay() {
        let handle = spawn_executor();
        let group = handle.new_group();
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle
            .schedule(group, Duration::from_millis(50), move || {
                tx.send(()).unwrap();
            })
            .unwrap();

        rx.recv().await.expect("task fired");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_is_not_inline() {
        let handle = spawn_executor();
        let group = handle.new_group();
        let fired = Arc::new(Mutex::new(false));

        let flag = fired.clone();
        handle
            .schedule(group, Duration::ZERO, move || {
                *flag.lock().unwrap() = true;
            })
            .unwrap();

        // Not executed synchronously by schedule() itself.
        assert!(!*fired.lock().unwrap());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(*fired.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_fires_until_cancelled() {
        let handle = spawn_executor();
        let group = handle.new_group();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = handle
            .schedule_periodic(group, Duration::from_millis(10), Duration::from_millis(10), move || {
                tx.send(()).unwrap();
            })
            .unwrap();

        for _ in 0..3 {
            rx.recv().await.expect("periodic fired");
        }

        handle.cancel(task);
        tokio::time::sleep(Duration::from_millis(1)).await;
        while rx.try_recv().is_ok() {}

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "no firings after cancel");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_group_drops_all_pending() {
        let handle = spawn_executor();
        let doomed = handle.new_group();
        let kept = handle.new_group();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for _ in 0..4 {
            let tx = tx.clone();
            handle
                .schedule(doomed, Duration::from_millis(20), move || {
                    tx.send("doomed").unwrap();
                })
                .unwrap();
        }
        let tx2 = tx.clone();
        handle
            .schedule(kept, Duration::from_millis(20), move || {
                tx2.send("kept").unwrap();
            })
            .unwrap();

        handle.cancel_group(doomed);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rx.try_recv(), Ok("kept"));
        assert!(rx.try_recv().is_err(), "doomed group fired");
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_can_schedule_more_work() {
        let handle = spawn_executor();
        let group = handle.new_group();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let inner_handle = handle.clone();
        handle
            .schedule(group, Duration::from_millis(5), move || {
                let tx = tx.clone();
                inner_handle
                    .schedule(group, Duration::ZERO, move || {
                        tx.send("inner").unwrap();
                    })
                    .unwrap();
            })
            .unwrap();

        assert_eq!(rx.recv().await, Some("inner"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_can_cancel_other_task() {
        let handle = spawn_executor();
        let group = handle.new_group();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let tx2 = tx.clone();
        let victim = handle
            .schedule(group, Duration::from_millis(50), move || {
                tx2.send("victim").unwrap();
            })
            .unwrap();

        let inner_handle = handle.clone();
        handle
            .schedule(group, Duration::from_millis(5), move || {
                inner_handle.cancel(victim);
                tx.send("canceller").unwrap();
            })
            .unwrap();

        assert_eq!(rx.recv().await, Some("canceller"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err(), "victim fired despite cancel");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_takes_effect_within_one_tick() {
        let handle = spawn_executor();
        let group = handle.new_group();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // Canceller and victim share a due time; the canceller was submitted
        // first, so it runs first and must stop the victim from firing.
        let victim_slot: Arc<Mutex<Option<TaskHandle>>> = Arc::new(Mutex::new(None));

        let slot = victim_slot.clone();
        let inner_handle = handle.clone();
        let tx2 = tx.clone();
        handle
            .schedule(group, Duration::from_millis(10), move || {
                if let Some(victim) = *slot.lock().unwrap() {
                    inner_handle.cancel(victim);
                }
                tx2.send("canceller").unwrap();
            })
            .unwrap();

        let victim = handle
            .schedule(group, Duration::from_millis(10), move || {
                tx.send("victim").unwrap();
            })
            .unwrap();
        *victim_slot.lock().unwrap() = Some(victim);

        assert_eq!(rx.recv().await, Some("canceller"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "victim fired despite same-tick cancel");
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_after_shutdown_is_rejected() {
        let (executor, handle) = Executor::new();
        let join = tokio::spawn(executor.run());

        handle.shutdown();
        join.await.unwrap();

        let group = handle.new_group();
        let result = handle.schedule(group, Duration::ZERO, || {});
        assert_eq!(result.unwrap_err(), SchedulerError::ShutDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_due_times_fire_in_submission_order() {
        let handle = spawn_executor();
        let group = handle.new_group();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for tag in 0..5u32 {
            let tx = tx.clone();
            handle
                .schedule(group, Duration::from_millis(10), move || {
                    tx.send(tag).unwrap();
                })
                .unwrap();
        }

        let mut fired = Vec::new();
        for _ in 0..5 {
            fired.push(rx.recv().await.unwrap());
        }
        assert_eq!(fired, vec![0, 1, 2, 3, 4]);
    }
}
