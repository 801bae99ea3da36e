//! See `WorkerPool`.

use crate::host::{
    Affinity,
    Scheduler,
    Task,
};
use crossbeam::{
    queue::SegQueue,
    sync::{
        Parker,
        Unparker,
    },
};
use std::{
    cmp::Ordering as CmpOrdering,
    collections::{
        hash_map::DefaultHasher,
        BinaryHeap,
    },
    hash::{
        Hash,
        Hasher,
    },
    panic::{
        catch_unwind,
        AssertUnwindSafe,
    },
    thread,
    time::{
        Duration,
        Instant,
    },
    sync::{
        Arc,
        atomic::{
            AtomicU32,
            AtomicU64,
            AtomicUsize,
            Ordering,
        },
    },
};
use parking_lot::{
    Condvar,
    Mutex,
};


/// Thread pool implementing `Scheduler`.
///
/// Each worker thread has its own queue of pinned tasks, which only it runs. A task with chunk
/// affinity is pinned to the worker its chunk hashes to, so all work touching one chunk is
/// serialized on one thread. Tasks with no affinity go in a shared queue which any idle worker
/// takes from. Delayed tasks are held by a timer thread until due.
///
/// Worker threads shut down once all handles are dropped and all queued work is done. Tasks still
/// waiting on their delay at that point are dropped without running.
pub struct WorkerPool(Arc<State>);

// shared state
struct State {
    // per worker, pinned task queue
    pinned: Vec<SegQueue<Task>>,
    // task queue any worker may take from
    shared: SegQueue<Task>,
    // per worker, handle to wake it from sleeping when there's no work
    unparkers: Vec<Unparker>,
    // rotating index for which worker to wake for shared work
    wake_next: AtomicUsize,
    // counter of how may WorkerPool handles remain. threads shut down once this is 0.
    alive: AtomicU32,
    // delayed tasks, soonest first
    timer: Mutex<BinaryHeap<Delayed>>,
    // notified on changes to timer heap or alive
    timer_cvar: Condvar,
    // submission counter, for FIFO among delayed tasks due at the same instant
    next_seq: AtomicU64,
}

// task waiting on its delay
struct Delayed {
    due: Instant,
    seq: u64,
    affinity: Affinity,
    task: Task,
}

// ordered so BinaryHeap, a max heap, pops the soonest
impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        (self.due, self.seq) == (other.due, other.seq)
    }
}

impl Eq for Delayed {}

impl WorkerPool {
    /// Construct with a worker per CPU, spawning threads.
    pub fn new() -> Self {
        Self::with_threads(num_cpus::get())
    }

    /// Construct with the given number of workers (at least 1), spawning threads.
    pub fn with_threads(threads: usize) -> Self {
        let threads = threads.max(1);
        let parkers = (0..threads).map(|_| Parker::new()).collect::<Vec<_>>();
        let state = Arc::new(State {
            pinned: (0..threads).map(|_| SegQueue::new()).collect(),
            shared: SegQueue::new(),
            unparkers: parkers.iter().map(|parker| parker.unparker().clone()).collect(),
            wake_next: AtomicUsize::new(0),
            alive: AtomicU32::new(1),
            timer: Mutex::new(BinaryHeap::new()),
            timer_cvar: Condvar::new(),
            next_seq: AtomicU64::new(0),
        });
        for (q, parker) in parkers.into_iter().enumerate() {
            let state = Arc::clone(&state);
            thread::Builder::new()
                .name(format!("marker-worker-{}", q))
                .spawn(move || worker_body(q, parker, state))
                .map_err(|e| error!(%e, "unable to spawn worker thread"))
                .ok();
        }
        {
            let state = Arc::clone(&state);
            thread::Builder::new()
                .name("marker-timer".to_owned())
                .spawn(move || timer_body(state))
                .map_err(|e| error!(%e, "unable to spawn timer thread"))
                .ok();
        }
        debug!(threads, "started worker pool");
        WorkerPool(state)
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.0.pinned.len()
    }
}

impl Scheduler for WorkerPool {
    fn submit(&self, task: Task, delay: Duration, affinity: Affinity) {
        if delay.is_zero() {
            self.0.dispatch(task, affinity);
        } else {
            let seq = self.0.next_seq.fetch_add(1, Ordering::Relaxed);
            self.0.timer.lock().push(Delayed {
                due: Instant::now() + delay,
                seq,
                affinity,
                task,
            });
            self.0.timer_cvar.notify_one();
        }
    }
}

impl State {
    // put a task in the appropriate queue and wake the appropriate worker
    fn dispatch(&self, task: Task, affinity: Affinity) {
        match affinity {
            Affinity::Chunk(chunk) => {
                let mut hasher = DefaultHasher::new();
                chunk.hash(&mut hasher);
                let q = (hasher.finish() % self.pinned.len() as u64) as usize;
                self.pinned[q].push(task);
                self.unparkers[q].unpark();
            }
            Affinity::Any => {
                self.shared.push(task);
                let q = self.wake_next.fetch_add(1, Ordering::Relaxed) % self.unparkers.len();
                self.unparkers[q].unpark();
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) != 0
    }
}

fn worker_body(q: usize, parker: Parker, state: Arc<State>) {
    loop {
        // own pinned work first, then shared work
        if let Some(task) = state.pinned[q].pop().or_else(|| state.shared.pop()) {
            run_task(task);
            continue;
        }
        // and if none can be found, see if the pool is just dead
        if !state.is_alive() {
            // if it is, die, but make sure to maintain a chain reaction of sleeping threads
            // waking each other up so they all notice the pool is dead and shut off
            state.unparkers[(q + 1) % state.unparkers.len()].unpark();
            trace!(q, "worker shutting down");
            return;
        }
        // elsewise, we're probably just empty, so park until woken up
        parker.park();
    }
}

fn run_task(task: Task) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
        let msg = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        error!(%msg, "scheduled task panicked");
    }
}

fn timer_body(state: Arc<State>) {
    let mut heap = state.timer.lock();
    loop {
        if !state.is_alive() {
            if !heap.is_empty() {
                debug!(dropped = heap.len(), "dropping delayed tasks on shutdown");
            }
            heap.clear();
            return;
        }
        let now = Instant::now();
        let next_due = heap.peek().map(|delayed| delayed.due);
        match next_due {
            Some(due) if due <= now => {
                let delayed = heap.pop();
                // don't hold the lock while dispatching
                drop(heap);
                if let Some(delayed) = delayed {
                    state.dispatch(delayed.task, delayed.affinity);
                }
                heap = state.timer.lock();
            }
            Some(due) => {
                state.timer_cvar.wait_until(&mut heap, due);
            }
            None => {
                state.timer_cvar.wait(&mut heap);
            }
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for WorkerPool {
    fn clone(&self) -> Self {
        self.0.alive.fetch_add(1, Ordering::SeqCst);
        WorkerPool(Arc::clone(&self.0))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let alive = self.0.alive.fetch_sub(1, Ordering::SeqCst);
        if alive == 1 {
            for unparker in &self.0.unparkers {
                unparker.unpark();
            }
            // lock so the timer thread can't miss this between checking alive and waiting
            let _heap = self.0.timer.lock();
            self.0.timer_cvar.notify_all();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chunk_data::ChunkPos;
    use std::{
        collections::HashSet,
        sync::mpsc,
    };

    #[test]
    fn runs_shared_and_pinned_tasks() {
        let pool = WorkerPool::with_threads(4);
        let (send, recv) = mpsc::channel();
        for i in 0..100 {
            let send = send.clone();
            let affinity =
                if i % 2 == 0 {
                    Affinity::Any
                } else {
                    Affinity::Chunk(ChunkPos::new("overworld", i, -i))
                };
            pool.submit(Box::new(move || send.send(i).unwrap()), Duration::ZERO, affinity);
        }
        let mut got = (0..100)
            .map(|_| recv.recv_timeout(Duration::from_secs(10)).unwrap())
            .collect::<Vec<_>>();
        got.sort();
        assert_eq!(got, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn same_chunk_runs_on_same_thread() {
        let pool = WorkerPool::with_threads(4);
        let (send, recv) = mpsc::channel();
        let chunk = ChunkPos::new("overworld", 3, 7);
        for _ in 0..20 {
            let send = send.clone();
            pool.submit(
                Box::new(move || send.send(thread::current().id()).unwrap()),
                Duration::ZERO,
                Affinity::Chunk(chunk.clone()),
            );
        }
        let threads = (0..20)
            .map(|_| recv.recv_timeout(Duration::from_secs(10)).unwrap())
            .collect::<HashSet<_>>();
        assert_eq!(threads.len(), 1);
    }

    #[test]
    fn delayed_tasks_wait() {
        let pool = WorkerPool::with_threads(2);
        let (send, recv) = mpsc::channel();
        let start = Instant::now();
        pool.submit(
            Box::new(move || send.send(Instant::now()).unwrap()),
            Duration::from_millis(50),
            Affinity::Any,
        );
        let ran_at = recv.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(ran_at - start >= Duration::from_millis(50));
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let pool = WorkerPool::with_threads(1);
        let (send, recv) = mpsc::channel();
        pool.submit(Box::new(|| panic!("oops")), Duration::ZERO, Affinity::Any);
        pool.submit(Box::new(move || send.send(()).unwrap()), Duration::ZERO, Affinity::Any);
        recv.recv_timeout(Duration::from_secs(10)).unwrap();
    }

    #[test]
    fn at_least_one_worker() {
        assert_eq!(WorkerPool::with_threads(3).threads(), 3);
        let pool = WorkerPool::with_threads(0);
        assert_eq!(pool.threads(), 1);
        let (send, recv) = mpsc::channel();
        pool.submit(
            Box::new(move || send.send(()).unwrap()),
            Duration::ZERO,
            Affinity::Chunk(ChunkPos::new("overworld", 0, 0)),
        );
        recv.recv_timeout(Duration::from_secs(10)).unwrap();
    }
}
