//! Time-ordered task queue
//!
//! The pure, single-owner half of the scheduler. [`TaskQueue`] holds pending
//! tasks keyed by [`TaskHandle`], grouped by [`TaskGroupId`], and ordered by
//! (due time, insertion sequence) so that tasks due at the same instant fire
//! in submission order. The async executor wraps this queue; the queue
//! itself never spawns, sleeps, or blocks, which keeps its ordering and
//! cancellation behavior directly testable.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;

use tokio::time::{Duration, Instant};

/// Callback type for scheduled tasks
///
/// Periodic tasks are invoked repeatedly, so the callback is `FnMut`.
pub type TaskCallback = Box<dyn FnMut() + Send>;

/// Identifier grouping related scheduled tasks (for bulk cancellation)
///
/// Issued monotonically; never reused for the lifetime of the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskGroupId(pub(crate) u64);

/// Identifier for one scheduled task instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub(crate) u64);

/// A task popped from the queue because its due time has passed
///
/// The executor runs the callback and, for periodic tasks, re-inserts it
/// under the same handle.
pub struct DueTask {
    /// Handle the task was scheduled under
    pub handle: TaskHandle,
    /// Owning group
    pub group: TaskGroupId,
    /// Re-arm period, if periodic
    pub period: Option<Duration>,
    /// The callback to run
    pub callback: TaskCallback,
}

impl fmt::Debug for DueTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DueTask")
            .field("handle", &self.handle)
            .field("group", &self.group)
            .field("period", &self.period)
            .field("callback", &"<callback>")
            .finish()
    }
}

/// Heap entry; ordering inverted so the earliest (due, seq) pops first
#[derive(Debug, PartialEq, Eq)]
struct QueueEntry {
    due: Instant,
    seq: u64,
    handle: TaskHandle,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct TaskEntry {
    group: TaskGroupId,
    period: Option<Duration>,
    callback: TaskCallback,
}

/// Time-ordered queue of pending tasks
///
/// Cancellation is lazy: `cancel` removes the task from the live map, and
/// stale heap entries are skipped when encountered. Ties on due time break
/// by insertion sequence, giving a strict total order.
pub struct TaskQueue {
    heap: BinaryHeap<QueueEntry>,
    tasks: HashMap<TaskHandle, TaskEntry>,
    groups: HashMap<TaskGroupId, HashSet<TaskHandle>>,
    next_seq: u64,
}

impl TaskQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            tasks: HashMap::new(),
            groups: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Number of pending tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check whether no tasks are pending
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Insert a task under an externally issued handle
    ///
    /// Re-inserting a handle that is already pending replaces the old
    /// instance (used by the executor to re-arm periodic tasks).
    pub fn insert(
        &mut self,
        handle: TaskHandle,
        group: TaskGroupId,
        due: Instant,
        period: Option<Duration>,
        callback: TaskCallback,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.tasks.insert(
            handle,
            TaskEntry {
                group,
                period,
                callback,
            },
        );
        self.groups.entry(group).or_default().insert(handle);
        self.heap.push(QueueEntry { due, seq, handle });
    }

    /// Cancel a single pending task
    ///
    /// Returns false if the task already fired or was already cancelled.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        match self.tasks.remove(&handle) {
            Some(entry) => {
                if let Some(members) = self.groups.get_mut(&entry.group) {
                    members.remove(&handle);
                    if members.is_empty() {
                        self.groups.remove(&entry.group);
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Cancel every pending task owned by a group
    ///
    /// Idempotent; safe to call for a group with no pending tasks. Returns
    /// the number of tasks removed.
    pub fn cancel_group(&mut self, group: TaskGroupId) -> usize {
        let Some(members) = self.groups.remove(&group) else {
            return 0;
        };
        let count = members.len();
        for handle in members {
            self.tasks.remove(&handle);
        }
        count
    }

    /// Due time of the earliest live task, if any
    ///
    /// Pops stale heap entries left behind by cancellation.
    pub fn next_due(&mut self) -> Option<Instant> {
        while let Some(entry) = self.heap.peek() {
            if self.tasks.contains_key(&entry.handle) {
                return Some(entry.due);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop the earliest task whose due time is at or before `now`
    ///
    /// Returns tasks in strict (due, insertion-seq) order.
    pub fn pop_due(&mut self, now: Instant) -> Option<DueTask> {
        loop {
            if self.heap.peek()?.due > now {
                return None;
            }
            let entry = self.heap.pop()?;
            if let Some(task) = self.tasks.remove(&entry.handle) {
                if let Some(members) = self.groups.get_mut(&task.group) {
                    members.remove(&entry.handle);
                    if members.is_empty() {
                        self.groups.remove(&task.group);
                    }
                }
                return Some(DueTask {
                    handle: entry.handle,
                    group: task.group,
                    period: task.period,
                    callback: task.callback,
                });
            }
            // Stale entry for a cancelled task; keep draining.
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> TaskCallback) {
        let log: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = log.clone();
            move |tag: u32| -> TaskCallback {
                let log = log.clone();
                Box::new(move || log.lock().unwrap().push(tag))
            }
        };
        (log, make)
    }

    fn drain(queue: &mut TaskQueue, now: Instant) -> Vec<TaskHandle> {
        let mut fired = Vec::new();
        while let Some(mut task) = queue.pop_due(now) {
            (task.callback)();
            fired.push(task.handle);
        }
        fired
    }

    #[test]
    fn test_fires_in_due_time_order() {
        let (log, make) = recorder();
        let mut queue = TaskQueue::new();
        let now = Instant::now();
        let group = TaskGroupId(0);

        queue.insert(TaskHandle(1), group, now + Duration::from_millis(30), None, make(3));
        queue.insert(TaskHandle(2), group, now + Duration::from_millis(10), None, make(1));
        queue.insert(TaskHandle(3), group, now + Duration::from_millis(20), None, make(2));

        drain(&mut queue, now + Duration::from_millis(100));

        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_equal_due_times_fire_in_submission_order() {
        let (log, make) = recorder();
        let mut queue = TaskQueue::new();
        let now = Instant::now();
        let due = now + Duration::from_millis(5);
        let group = TaskGroupId(0);

        for tag in 0..10u32 {
            queue.insert(TaskHandle(tag as u64), group, due, None, make(tag));
        }

        drain(&mut queue, due);

        assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_not_yet_due_tasks_stay_queued() {
        let (log, make) = recorder();
        let mut queue = TaskQueue::new();
        let now = Instant::now();
        let group = TaskGroupId(0);

        queue.insert(TaskHandle(1), group, now + Duration::from_millis(10), None, make(1));
        queue.insert(TaskHandle(2), group, now + Duration::from_millis(50), None, make(2));

        drain(&mut queue, now + Duration::from_millis(20));

        assert_eq!(*log.lock().unwrap(), vec![1]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_due(), Some(now + Duration::from_millis(50)));
    }

    #[test]
    fn test_cancel_removes_pending_task() {
        let (log, make) = recorder();
        let mut queue = TaskQueue::new();
        let now = Instant::now();
        let group = TaskGroupId(0);

        queue.insert(TaskHandle(1), group, now, None, make(1));
        queue.insert(TaskHandle(2), group, now, None, make(2));

        assert!(queue.cancel(TaskHandle(1)));

        drain(&mut queue, now);

        assert_eq!(*log.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_cancel_is_noop_after_firing() {
        let (_log, make) = recorder();
        let mut queue = TaskQueue::new();
        let now = Instant::now();

        queue.insert(TaskHandle(1), TaskGroupId(0), now, None, make(1));
        drain(&mut queue, now);

        assert!(!queue.cancel(TaskHandle(1)));
        assert!(!queue.cancel(TaskHandle(1)));
    }

    #[test]
    fn test_cancel_group_removes_all_group_tasks() {
        let (log, make) = recorder();
        let mut queue = TaskQueue::new();
        let now = Instant::now();
        let doomed = TaskGroupId(1);
        let kept = TaskGroupId(2);

        for i in 0..5u64 {
            queue.insert(TaskHandle(i), doomed, now + Duration::from_millis(i), None, make(0));
        }
        queue.insert(TaskHandle(100), kept, now, None, make(1));

        assert_eq!(queue.cancel_group(doomed), 5);

        drain(&mut queue, now + Duration::from_secs(1));

        assert_eq!(*log.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_cancel_group_idempotent_and_safe_when_empty() {
        let mut queue = TaskQueue::new();
        assert_eq!(queue.cancel_group(TaskGroupId(7)), 0);
        assert_eq!(queue.cancel_group(TaskGroupId(7)), 0);
    }

    #[test]
    fn test_next_due_skips_cancelled_entries() {
        let (_log, make) = recorder();
        let mut queue = TaskQueue::new();
        let now = Instant::now();
        let group = TaskGroupId(0);

        queue.insert(TaskHandle(1), group, now + Duration::from_millis(10), None, make(0));
        queue.insert(TaskHandle(2), group, now + Duration::from_millis(20), None, make(0));
        queue.cancel(TaskHandle(1));

        assert_eq!(queue.next_due(), Some(now + Duration::from_millis(20)));
    }

    #[test]
    fn test_periodic_rearm_preserves_handle() {
        let (log, make) = recorder();
        let mut queue = TaskQueue::new();
        let now = Instant::now();
        let group = TaskGroupId(0);
        let period = Duration::from_millis(10);

        queue.insert(TaskHandle(1), group, now, Some(period), make(1));

        let mut tick = now;
        for _ in 0..3 {
            let mut task = queue.pop_due(tick).expect("task due");
            (task.callback)();
            assert_eq!(task.handle, TaskHandle(1));
            let next = tick + task.period.unwrap();
            queue.insert(task.handle, task.group, next, task.period, task.callback);
            tick = next;
        }

        assert_eq!(*log.lock().unwrap(), vec![1, 1, 1]);

        // Cancelling by the original handle stops the re-armed task.
        assert!(queue.cancel(TaskHandle(1)));
        assert!(queue.pop_due(tick + Duration::from_secs(1)).is_none());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Schedule { delay_ms: u64, group: u8 },
            Cancel { index: usize },
            CancelGroup { group: u8 },
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0u64..50, 0u8..4).prop_map(|(delay_ms, group)| Op::Schedule { delay_ms, group }),
                (0usize..32).prop_map(|index| Op::Cancel { index }),
                (0u8..4).prop_map(|group| Op::CancelGroup { group }),
            ]
        }

        proptest! {
            // At any tick, the set of fired tasks equals exactly the set of
            // never-cancelled tasks with due <= now, in (due, submission) order.
            #[test]
            fn fired_set_matches_live_due_set(ops in prop::collection::vec(op(), 1..40)) {
                let mut queue = TaskQueue::new();
                let base = Instant::now();
                let log: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

                // Model: (handle, due_ms, group, cancelled)
                let mut model: Vec<(u64, u64, u8, bool)> = Vec::new();
                let mut next_handle = 0u64;

                for op in ops {
                    match op {
                        Op::Schedule { delay_ms, group } => {
                            let handle = next_handle;
                            next_handle += 1;
                            let log = log.clone();
                            queue.insert(
                                TaskHandle(handle),
                                TaskGroupId(group as u64),
                                base + Duration::from_millis(delay_ms),
                                None,
                                Box::new(move || log.lock().unwrap().push(handle)),
                            );
                            model.push((handle, delay_ms, group, false));
                        }
                        Op::Cancel { index } => {
                            let len = model.len().max(1);
                            if let Some(entry) = model.get_mut(index % len) {
                                queue.cancel(TaskHandle(entry.0));
                                entry.3 = true;
                            }
                        }
                        Op::CancelGroup { group } => {
                            queue.cancel_group(TaskGroupId(group as u64));
                            for entry in model.iter_mut().filter(|e| e.2 == group) {
                                entry.3 = true;
                            }
                        }
                    }
                }

                let horizon_ms = 25u64;
                let now = base + Duration::from_millis(horizon_ms);
                while let Some(mut task) = queue.pop_due(now) {
                    (task.callback)();
                }

                let mut expected: Vec<(u64, u64)> = model
                    .iter()
                    .filter(|(_, due, _, cancelled)| !cancelled && *due <= horizon_ms)
                    .map(|(handle, due, _, _)| (*due, *handle))
                    .collect();
                // Submission order is handle order here, so (due, handle) is
                // the expected firing order.
                expected.sort();
                let expected: Vec<u64> = expected.into_iter().map(|(_, h)| h).collect();

                prop_assert_eq!(&*log.lock().unwrap(), &expected);
            }
        }
    }
}
