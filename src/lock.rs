//! Reader/writer lock for tables and the catalog
//!
//! A `Lock` packs its hot state into one atomic counter:
//!
//! - the low 32 bits count active readers,
//! - the high bits count exclusive requests that are queued or active.
//!
//! Readers take a single compare-and-swap fast path while the high bits are
//! zero. Everything else goes through a wait stack guarded by a small mutex.
//! Each waiter parks on its own condition variable, so a release wakes exactly
//! the waiters it grants.
//!
//! Grant rule: the oldest waiting unit is served first. A unit is either one
//! exclusive request, or a run of consecutive readers which is granted as a
//! batch. Readers that arrive while an exclusive request is queued never pass
//! it, so a writer waits at most for the readers that were active or queued
//! ahead of it.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// One active reader.
const READ: i64 = 1;
/// One queued or active exclusive request.
const WRITE: i64 = 1 << 32;
const READER_MASK: i64 = WRITE - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Read,
    ReadAndWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Waiting,
    Granted,
    /// Timed out and unlinked; a late grant must not resolve it again.
    Dead,
}

/// A queued lock request.
#[derive(Debug)]
struct LockNode {
    mode: LockMode,
    state: Mutex<NodeState>,
    cond: Condvar,
}

impl LockNode {
    fn new(mode: LockMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            state: Mutex::new(NodeState::Waiting),
            cond: Condvar::new(),
        })
    }

    fn grant(&self) {
        let mut state = self.state.lock();
        if *state == NodeState::Waiting {
            *state = NodeState::Granted;
            self.cond.notify_one();
        }
    }

    fn is_granted(&self) -> bool {
        *self.state.lock() == NodeState::Granted
    }
}

#[derive(Debug, Default)]
struct WaitQueue {
    writer_active: bool,
    /// Oldest request at index 0, newest (the head of the stack) at the end.
    nodes: Vec<Arc<LockNode>>,
}

/// Reader/writer lock with timeouts and a non-blocking exclusive attempt.
#[derive(Debug)]
pub struct Lock {
    name: String,
    state: AtomicI64,
    queue: Mutex<WaitQueue>,
}

impl Lock {
    /// Create a new idle lock. The name only appears in diagnostics.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: AtomicI64::new(0),
            queue: Mutex::new(WaitQueue::default()),
        }
    }

    /// Get the lock's resource name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire shared access, waiting at most `timeout`.
    pub fn lock_read(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        if self.try_fast_read() {
            return Ok(());
        }

        let node = {
            let mut queue = self.queue.lock();
            if self.state.load(Ordering::Acquire) & !READER_MASK == 0 {
                // Exclusive requests only reserve under the queue mutex.
                self.state.fetch_add(READ, Ordering::AcqRel);
                return Ok(());
            }
            let node = LockNode::new(LockMode::Read);
            queue.nodes.push(node.clone());
            self.wake_next(&mut queue);
            node
        };

        self.park(&node, deadline, timeout)
    }

    /// Release shared access.
    pub fn unlock_read(&self) {
        let prev = self.state.fetch_sub(READ, Ordering::AcqRel);
        debug_assert!(prev & READER_MASK > 0, "unlock_read on {} without readers", self.name);

        if prev & READER_MASK == 1 && prev & !READER_MASK != 0 {
            let mut queue = self.queue.lock();
            self.wake_next(&mut queue);
        }
    }

    /// Acquire exclusive access, waiting at most `timeout`.
    ///
    /// The request is always queued, which keeps it ordered behind earlier
    /// waiters. An uncontended request is granted before the caller parks.
    pub fn lock_read_and_write(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        let node = LockNode::new(LockMode::ReadAndWrite);
        {
            let mut queue = self.queue.lock();
            self.state.fetch_add(WRITE, Ordering::AcqRel);
            queue.nodes.push(node.clone());
            self.wake_next(&mut queue);
        }

        if node.is_granted() {
            return Ok(());
        }
        self.park(&node, deadline, timeout)
    }

    /// Release exclusive access and wake the next waiting unit.
    pub fn unlock_read_and_write(&self) {
        let mut queue = self.queue.lock();
        debug_assert!(queue.writer_active, "unlock_read_and_write on {} without a writer", self.name);
        queue.writer_active = false;
        self.state.fetch_sub(WRITE, Ordering::AcqRel);
        self.wake_next(&mut queue);
    }

    /// Take exclusive access only if the lock is completely idle.
    ///
    /// Never queues and never blocks.
    pub fn lock_read_and_write_no_wait(&self) -> bool {
        let Some(mut queue) = self.queue.try_lock() else {
            return false;
        };
        if queue.writer_active || !queue.nodes.is_empty() {
            return false;
        }
        if self
            .state
            .compare_exchange(0, WRITE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            queue.writer_active = true;
            true
        } else {
            false
        }
    }

    /// Shared access released when the guard drops.
    pub fn read(&self, timeout: Duration) -> Result<ReadGuard<'_>> {
        self.lock_read(timeout)?;
        Ok(ReadGuard { lock: self })
    }

    /// Exclusive access released when the guard drops.
    pub fn write(&self, timeout: Duration) -> Result<WriteGuard<'_>> {
        self.lock_read_and_write(timeout)?;
        Ok(WriteGuard { lock: self })
    }

    pub fn try_write(&self) -> Option<WriteGuard<'_>> {
        if self.lock_read_and_write_no_wait() {
            Some(WriteGuard { lock: self })
        } else {
            None
        }
    }

    /// Number of readers currently holding the lock
    pub fn active_readers(&self) -> usize {
        (self.state.load(Ordering::Acquire) & READER_MASK) as usize
    }

    /// Number of requests parked in the wait stack
    pub fn waiting(&self) -> usize {
        self.queue.lock().nodes.len()
    }

    /// True when nobody holds or waits for the lock
    pub fn is_idle(&self) -> bool {
        self.state.load(Ordering::Acquire) == 0
    }

    fn try_fast_read(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        while current & !READER_MASK == 0 {
            match self.state.compare_exchange_weak(
                current,
                current + READ,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Grant the oldest waiting unit if it can run now. Caller holds the queue.
    fn wake_next(&self, queue: &mut WaitQueue) {
        if queue.writer_active {
            return;
        }
        let Some(oldest) = queue.nodes.first() else {
            return;
        };

        match oldest.mode {
            LockMode::ReadAndWrite => {
                if self.state.load(Ordering::Acquire) & READER_MASK == 0 {
                    let node = queue.nodes.remove(0);
                    queue.writer_active = true;
                    node.grant();
                    trace!(lock = %self.name, "granted exclusive request");
                }
            }
            LockMode::Read => {
                let run = queue
                    .nodes
                    .iter()
                    .take_while(|node| node.mode == LockMode::Read)
                    .count();
                for node in queue.nodes.drain(..run) {
                    self.state.fetch_add(READ, Ordering::AcqRel);
                    node.grant();
                }
                trace!(lock = %self.name, readers = run, "granted reader run");
            }
        }
    }

    fn park(&self, node: &Arc<LockNode>, deadline: Instant, timeout: Duration) -> Result<()> {
        {
            let mut state = node.state.lock();
            while *state == NodeState::Waiting {
                if node.cond.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
            if *state == NodeState::Granted {
                return Ok(());
            }
        }

        // Queue before node, same order as wake_next.
        let mut queue = self.queue.lock();
        {
            let mut state = node.state.lock();
            if *state == NodeState::Granted {
                return Ok(());
            }
            *state = NodeState::Dead;
        }
        queue.nodes.retain(|queued| !Arc::ptr_eq(queued, node));
        if node.mode == LockMode::ReadAndWrite {
            self.state.fetch_sub(WRITE, Ordering::AcqRel);
        }
        self.wake_next(&mut queue);

        debug!(lock = %self.name, ?timeout, mode = ?node.mode, "lock request timed out");
        Err(Error::LockTimeout {
            resource: self.name.clone(),
            timeout,
        })
    }
}

/// Shared access to a [`Lock`]
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ReadGuard<'a> {
    lock: &'a Lock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock_read();
    }
}

/// Exclusive access to a [`Lock`]
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct WriteGuard<'a> {
    lock: &'a Lock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock_read_and_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn test_readers_share() {
        let lock = Lock::new("t");
        lock.lock_read(SHORT).unwrap();
        lock.lock_read(SHORT).unwrap();
        assert_eq!(lock.active_readers(), 2);
        assert_eq!(lock.waiting(), 0);
        lock.unlock_read();
        lock.unlock_read();
        assert!(lock.is_idle());
    }

    #[test]
    fn test_no_wait_round_trip() {
        let lock = Lock::new("t");
        assert!(lock.lock_read_and_write_no_wait());
        assert!(!lock.lock_read_and_write_no_wait());
        lock.unlock_read_and_write();
        assert!(lock.lock_read_and_write_no_wait());
        lock.unlock_read_and_write();
        assert!(lock.is_idle());
    }

    #[test]
    fn test_no_wait_fails_with_reader() {
        let lock = Lock::new("t");
        let _guard = lock.read(SHORT).unwrap();
        assert!(!lock.lock_read_and_write_no_wait());
        assert!(lock.try_write().is_none());
    }

    #[test]
    fn test_uncontended_write_does_not_park() {
        let lock = Lock::new("t");
        let start = Instant::now();
        lock.lock_read_and_write(Duration::from_secs(5)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(lock.waiting(), 0);
        lock.unlock_read_and_write();
    }

    #[test]
    fn test_write_timeout_restores_state() {
        let lock = Lock::new("t");
        let guard = lock.read(SHORT).unwrap();

        let result = lock.lock_read_and_write(Duration::from_millis(20));
        assert!(matches!(result, Err(Error::LockTimeout { .. })));
        assert_eq!(lock.waiting(), 0);

        // The abandoned reservation must not block new readers.
        lock.lock_read(SHORT).unwrap();
        lock.unlock_read();
        drop(guard);

        assert!(lock.is_idle());
        assert!(lock.lock_read_and_write_no_wait());
        lock.unlock_read_and_write();
    }

    #[test]
    fn test_read_timeout_behind_writer() {
        let lock = Lock::new("t");
        let guard = lock.write(SHORT).unwrap();

        let result = lock.lock_read(Duration::from_millis(20));
        assert!(matches!(result, Err(Error::LockTimeout { .. })));
        assert_eq!(lock.waiting(), 0);

        drop(guard);
        assert!(lock.is_idle());
    }

    #[test]
    fn test_writer_granted_after_reader_release() {
        let lock = Arc::new(Lock::new("t"));
        lock.lock_read(SHORT).unwrap();

        let writer = {
            let lock = lock.clone();
            thread::spawn(move || {
                lock.lock_read_and_write(Duration::from_secs(5)).unwrap();
                lock.unlock_read_and_write();
            })
        };

        while lock.waiting() == 0 {
            thread::yield_now();
        }
        lock.unlock_read();
        writer.join().unwrap();
        assert!(lock.is_idle());
    }
}
