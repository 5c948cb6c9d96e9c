//! Worklists feeding the worker pool.
//!
//! Every enqueued value is a tagged [`WorkItem`]: either a task or a stop
//! sentinel. Two implementations sit behind the [`Worklist`] trait: a plain
//! FIFO queue, and a priority queue ordered by estimated job size. In both,
//! stop sentinels are served only after every task, which is what lets the
//! pool post its sentinels while tasks are still queued.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};

use crate::estimator::SizeMetric;

/// Work-ordering strategy selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerStrategy {
    /// Serve tasks in enqueue order.
    Fifo,
    /// Serve the largest estimated job first.
    LongestFirst,
    /// Serve the smallest estimated job first.
    ShortestFirst,
}

impl FromStr for SchedulerStrategy {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "fifo" => Ok(Self::Fifo),
            "ljf" => Ok(Self::LongestFirst),
            "sjf" => Ok(Self::ShortestFirst),
            other => Err(format!("unknown scheduler strategy `{other}`")),
        }
    }
}

/// A unit of work executed by one worker.
pub struct Task {
    /// File measured by the estimator under the priority strategies.
    /// Whole-database tasks carry `None` and are treated as size 0, placing
    /// them last under longest-first and first under shortest-first.
    pub source: Option<PathBuf>,
    /// The work itself.
    pub job: Box<dyn FnOnce() + Send>,
}

/// A queued value: a task, or the sentinel that shuts one worker down.
pub enum WorkItem {
    /// Run this.
    Task(Task),
    /// Exit the receiving worker.
    Stop,
}

/// Concurrent multi-producer multi-consumer work queue.
pub trait Worklist: Send + Sync {
    /// Enqueue one item.
    fn put(&self, item: WorkItem);

    /// Block until an item is available and take it.
    fn get(&self) -> WorkItem;
}

/// Build the worklist for `strategy`.
#[must_use]
pub fn for_strategy(strategy: SchedulerStrategy, metric: SizeMetric) -> Arc<dyn Worklist> {
    match strategy {
        SchedulerStrategy::Fifo => Arc::new(FifoWorklist::new()),
        SchedulerStrategy::LongestFirst => {
            Arc::new(PriorityWorklist::new(PriorityOrder::LongestFirst, metric))
        },
        SchedulerStrategy::ShortestFirst => {
            Arc::new(PriorityWorklist::new(PriorityOrder::ShortestFirst, metric))
        },
    }
}

/// Unbounded insertion-order worklist.
pub struct FifoWorklist {
    items: Mutex<VecDeque<WorkItem>>,
    ready: Condvar,
}

impl FifoWorklist {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }
}

impl Default for FifoWorklist {
    fn default() -> Self {
        Self::new()
    }
}

impl Worklist for FifoWorklist {
    fn put(&self, item: WorkItem) {
        let mut items = self.items.lock().expect("worklist mutex poisoned");
        items.push_back(item);
        self.ready.notify_one();
    }

    fn get(&self) -> WorkItem {
        let mut items = self.items.lock().expect("worklist mutex poisoned");
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            items = self.ready.wait(items).expect("worklist mutex poisoned");
        }
    }
}

/// Direction of the size ordering in [`PriorityWorklist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityOrder {
    /// Biggest estimated size first.
    LongestFirst,
    /// Smallest estimated size first.
    ShortestFirst,
}

struct HeapEntry {
    /// 1 for tasks, 0 for stops; stops sort below every task so they are
    /// drained last.
    class: u8,
    /// Strategy-adjusted size; higher pops earlier.
    rank: u64,
    /// Insertion sequence; earlier pops earlier among equal ranks.
    seq: u64,
    item: WorkItem,
}

impl HeapEntry {
    fn key(&self) -> (u8, u64, std::cmp::Reverse<u64>) {
        (self.class, self.rank, std::cmp::Reverse(self.seq))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Worklist ordered by estimated job size.
///
/// The size of a task is computed exactly once, when the task is inserted,
/// by measuring its source file with the configured metric. Stops skip
/// estimation entirely.
pub struct PriorityWorklist {
    order: PriorityOrder,
    metric: SizeMetric,
    seq: AtomicU64,
    items: Mutex<BinaryHeap<HeapEntry>>,
    ready: Condvar,
}

impl PriorityWorklist {
    /// Create an empty queue with the given ordering and metric.
    #[must_use]
    pub fn new(order: PriorityOrder, metric: SizeMetric) -> Self {
        Self {
            order,
            metric,
            seq: AtomicU64::new(0),
            items: Mutex::new(BinaryHeap::new()),
            ready: Condvar::new(),
        }
    }

    fn rank(&self, size: u64) -> u64 {
        match self.order {
            PriorityOrder::LongestFirst => size,
            PriorityOrder::ShortestFirst => u64::MAX - size,
        }
    }
}

impl Worklist for PriorityWorklist {
    fn put(&self, item: WorkItem) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        let entry = match item {
            WorkItem::Task(task) => {
                let size = task
                    .source
                    .as_deref()
                    .map_or(0, |path| self.metric.measure(path));
                HeapEntry {
                    class: 1,
                    rank: self.rank(size),
                    seq,
                    item: WorkItem::Task(task),
                }
            },
            WorkItem::Stop => HeapEntry {
                class: 0,
                rank: 0,
                seq,
                item: WorkItem::Stop,
            },
        };
        let mut items = self.items.lock().expect("worklist mutex poisoned");
        items.push(entry);
        self.ready.notify_one();
    }

    fn get(&self) -> WorkItem {
        let mut items = self.items.lock().expect("worklist mutex poisoned");
        loop {
            if let Some(entry) = items.pop() {
                return entry.item;
            }
            items = self.ready.wait(items).expect("worklist mutex poisoned");
        }
    }
}
