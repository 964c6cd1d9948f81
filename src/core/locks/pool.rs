use crate::core::graph::WaitForGraph;
use crate::core::types::{LockSnapshot, LockState, WorkerId, current_worker_id};
use fxhash::{FxHashMap, FxHashSet};
use parking_lot::{Mutex, MutexGuard};

/// Fixed set of independent exclusive locks shared by all workers
///
/// There is no meta-lock: each lock is acquired and released on its own, in
/// whatever order a worker chooses. The size never changes after construction.
/// Alongside the locks the pool keeps a record of who owns and who waits on
/// each of them, so a stalled run can be explained with [`LockPool::snapshot`].
///
/// # Example
///
/// ```rust
/// use stallguard::{LockPool, current_worker_id};
///
/// let pool = LockPool::new(4);
/// let first = pool.lock(0);
/// let third = pool.lock(2);
/// assert!(pool.try_lock(0).is_none());
/// assert_eq!(pool.owner(2), Some(current_worker_id()));
/// drop(third);
/// drop(first);
/// assert_eq!(pool.owner(2), None);
/// ```
pub struct LockPool {
    locks: Box<[Mutex<()>]>,
    /// Bookkeeping only; never held while blocking on a pool lock
    ownership: Mutex<Ownership>,
}

#[derive(Default)]
struct Ownership {
    /// Maps a lock index to the worker currently holding it
    owners: FxHashMap<usize, WorkerId>,
    /// Maps a lock index to the workers blocked on it
    waiters: FxHashMap<usize, FxHashSet<WorkerId>>,
}

/// Held lock of a [`LockPool`]; clears the ownership record and unlocks on drop
pub struct PoolGuard<'a> {
    pool: &'a LockPool,
    index: usize,
    _guard: MutexGuard<'a, ()>,
}

impl Drop for PoolGuard<'_> {
    fn drop(&mut self) {
        // Runs before `_guard` is dropped, so the next owner always records itself
        // after this entry is gone
        self.pool.ownership.lock().owners.remove(&self.index);
    }
}

impl PoolGuard<'_> {
    /// Index of the held lock
    pub fn index(&self) -> usize {
        self.index
    }
}

impl LockPool {
    /// Create `size` unlocked locks
    pub fn new(size: usize) -> Self {
        LockPool {
            locks: (0..size).map(|_| Mutex::new(())).collect(),
            ownership: Mutex::new(Ownership::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Block until lock `index` is acquired
    ///
    /// While blocked the calling worker is recorded as a waiter of the lock.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn lock(&self, index: usize) -> PoolGuard<'_> {
        let worker = current_worker_id();
        let lock = &self.locks[index];

        if let Some(guard) = lock.try_lock() {
            self.ownership.lock().owners.insert(index, worker);
            return self.guard(index, guard);
        }

        self.ownership
            .lock()
            .waiters
            .entry(index)
            .or_default()
            .insert(worker);

        let guard = lock.lock();

        let mut ownership = self.ownership.lock();
        if let Some(waiters) = ownership.waiters.get_mut(&index) {
            waiters.remove(&worker);
            if waiters.is_empty() {
                ownership.waiters.remove(&index);
            }
        }
        ownership.owners.insert(index, worker);
        drop(ownership);

        self.guard(index, guard)
    }

    /// Acquire lock `index` only if it is free right now
    pub fn try_lock(&self, index: usize) -> Option<PoolGuard<'_>> {
        let guard = self.locks.get(index)?.try_lock()?;
        self.ownership
            .lock()
            .owners
            .insert(index, current_worker_id());
        Some(self.guard(index, guard))
    }

    /// Whether lock `index` is currently held by anyone
    pub fn is_locked(&self, index: usize) -> bool {
        self.locks.get(index).is_some_and(|l| l.is_locked())
    }

    /// Worker recorded as holding lock `index`
    pub fn owner(&self, index: usize) -> Option<WorkerId> {
        self.ownership.lock().owners.get(&index).copied()
    }

    /// Who holds and who waits on which lock, plus every circular wait among them
    ///
    /// Only locks that are held or waited on are listed, ordered by index.
    /// `not_waiting` lists owners that are not blocked on anything.
    pub fn snapshot(&self) -> LockSnapshot {
        let ownership = self.ownership.lock();

        let mut indices: Vec<usize> = ownership
            .owners
            .keys()
            .chain(ownership.waiters.keys())
            .copied()
            .collect();
        indices.sort_unstable();
        indices.dedup();

        let locks: Vec<LockState> = indices
            .into_iter()
            .map(|index| {
                let mut waiters: Vec<WorkerId> = ownership
                    .waiters
                    .get(&index)
                    .map(|set| set.iter().copied().collect())
                    .unwrap_or_default();
                waiters.sort_unstable();
                LockState {
                    index,
                    owner: ownership.owners.get(&index).copied(),
                    waiters,
                }
            })
            .collect();
        drop(ownership);

        let waiting: FxHashSet<WorkerId> = locks
            .iter()
            .flat_map(|l| l.waiters.iter().copied())
            .collect();
        let mut not_waiting: Vec<WorkerId> = locks
            .iter()
            .filter_map(|l| l.owner)
            .filter(|owner| !waiting.contains(owner))
            .collect();
        not_waiting.sort_unstable();
        not_waiting.dedup();

        LockSnapshot {
            cycles: find_cycles(&locks),
            locks,
            not_waiting,
        }
    }

    fn guard<'a>(&'a self, index: usize, guard: MutexGuard<'a, ()>) -> PoolGuard<'a> {
        PoolGuard {
            pool: self,
            index,
            _guard: guard,
        }
    }
}

/// Circular waits among the listed locks, each reported once
fn find_cycles(locks: &[LockState]) -> Vec<Vec<WorkerId>> {
    let mut graph = WaitForGraph::new();
    let mut cycles = Vec::new();
    let mut seen: Vec<Vec<WorkerId>> = Vec::new();

    for lock in locks {
        let Some(owner) = lock.owner else {
            continue;
        };
        for &waiter in &lock.waiters {
            if let Some(cycle) = graph.add_edge(waiter, owner) {
                let mut members = cycle.clone();
                members.sort_unstable();
                if !seen.contains(&members) {
                    seen.push(members);
                    cycles.push(cycle);
                }
            }
        }
    }
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_until(what: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !what() {
            assert!(Instant::now() < deadline, "condition never became true");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_locks_are_independent() {
        let pool = LockPool::new(3);
        assert_eq!(pool.len(), 3);

        let _a = pool.lock(0);
        let _c = pool.lock(2);
        assert!(pool.is_locked(0));
        assert!(!pool.is_locked(1));
        assert!(pool.try_lock(1).is_some());
        assert!(pool.try_lock(2).is_none());
    }

    #[test]
    fn test_out_of_range_try_lock() {
        let pool = LockPool::new(1);
        assert!(pool.try_lock(5).is_none());
        assert!(!pool.is_locked(5));
    }

    #[test]
    fn test_ownership_follows_guards() {
        let pool = LockPool::new(2);
        let me = current_worker_id();

        let guard = pool.lock(1);
        assert_eq!(guard.index(), 1);
        assert_eq!(pool.owner(1), Some(me));

        let snapshot = pool.snapshot();
        assert_eq!(
            snapshot.locks,
            vec![LockState {
                index: 1,
                owner: Some(me),
                waiters: vec![],
            }]
        );
        assert_eq!(snapshot.not_waiting, vec![me]);
        assert!(snapshot.cycles.is_empty());

        drop(guard);
        assert_eq!(pool.owner(1), None);
        assert!(pool.snapshot().locks.is_empty());
    }

    #[test]
    fn test_blocked_worker_is_recorded_as_waiter() {
        let pool = Arc::new(LockPool::new(1));
        let me = current_worker_id();
        let held = pool.lock(0);

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let id = current_worker_id();
                drop(pool.lock(0));
                id
            })
        };

        wait_until(|| !pool.snapshot().locks[0].waiters.is_empty());
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.locks[0].owner, Some(me));
        assert_eq!(snapshot.locks[0].waiters.len(), 1);

        drop(held);
        let id = waiter.join().unwrap();
        assert_ne!(id, me);
        assert!(pool.snapshot().locks.is_empty());
    }

    #[test]
    fn test_crossed_orders_show_up_as_one_cycle() {
        let pool = Arc::new(LockPool::new(2));

        let spawn_crossed = |first: usize, second: usize| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let _a = pool.lock(first);
                // Wait until the other side holds its first lock
                while !pool.is_locked(second) {
                    thread::yield_now();
                }
                let _b = pool.lock(second);
            })
        };
        let _left = spawn_crossed(0, 1);
        let _right = spawn_crossed(1, 0);

        wait_until(|| !pool.snapshot().cycles.is_empty());
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.cycles.len(), 1);
        assert_eq!(snapshot.cycles[0].len(), 2);
        assert!(snapshot.not_waiting.is_empty());

        let owners: Vec<_> = snapshot.locks.iter().filter_map(|l| l.owner).collect();
        let mut members = snapshot.cycles[0].clone();
        members.sort_unstable();
        let mut owners_sorted = owners.clone();
        owners_sorted.sort_unstable();
        assert_eq!(members, owners_sorted);

        // Both threads stay blocked; they are left detached
    }
}
