//! Parent/child bookkeeping
//!
//! One `ChildRecord` per successful spawn. The parent owns it through its
//! `Children` collection; the child only holds a `Weak` to it, so a record
//! disappears as soon as the parent has consumed it or exited.
//!
//! ```text
//!   Running ──child exit──► Exited(status) ──parent wait──► Consumed
//! ```

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

use super::{Pid, Scheduler, ThreadId};

/// Lifecycle of one child as seen by its parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildState {
    Running,
    Exited(i32),
    Consumed,
}

/// Why a wait was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitError {
    /// Not a pid this process received from its own spawn.
    NotAChild,
    /// The status was already collected.
    AlreadyWaited,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAChild => write!(f, "not a direct child"),
            Self::AlreadyWaited => write!(f, "child already waited for"),
        }
    }
}

#[derive(Debug)]
struct RecordInner {
    state: ChildState,
    waiter: Option<ThreadId>,
}

/// Exit-status handoff for one parent/child pair.
#[derive(Debug)]
pub struct ChildRecord {
    pid: Pid,
    inner: Mutex<RecordInner>,
}

impl ChildRecord {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            inner: Mutex::new(RecordInner {
                state: ChildState::Running,
                waiter: None,
            }),
        }
    }

    pub fn state(&self) -> ChildState {
        self.inner.lock().state
    }

    /// Post the child's exit status and wake the parent if it is waiting.
    ///
    /// The wakeup is issued under the same lock the waiter registers under.
    pub fn post_exit(&self, status: i32, scheduler: &dyn Scheduler) {
        let mut inner = self.inner.lock();
        if inner.state != ChildState::Running {
            return;
        }
        inner.state = ChildState::Exited(status);
        log::debug!("[PROCESS] {} posted exit({})", self.pid, status);
        if let Some(waiter) = inner.waiter.take() {
            scheduler.unblock(waiter);
        }
    }

    /// Block until the child has exited, then consume its status.
    ///
    /// Returns the status exactly once; later calls fail.
    pub fn wait(&self, scheduler: &dyn Scheduler) -> Result<i32, WaitError> {
        loop {
            let mut inner = self.inner.lock();
            match inner.state {
                ChildState::Exited(status) => {
                    inner.state = ChildState::Consumed;
                    inner.waiter = None;
                    return Ok(status);
                }
                ChildState::Consumed => return Err(WaitError::AlreadyWaited),
                ChildState::Running => inner.waiter = Some(scheduler.current()),
            }
            drop(inner);
            // An unblock that lands between the drop and here is kept as a
            // permit, so this returns at once and the loop re-checks.
            scheduler.block();
        }
    }
}

/// The records a process owns for its direct children.
#[derive(Debug)]
pub struct Children {
    records: Mutex<BTreeMap<Pid, Arc<ChildRecord>>>,
}

impl Children {
    pub const fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record a new child and return the child's link to its record.
    pub fn attach(&self, pid: Pid) -> Weak<ChildRecord> {
        let record = Arc::new(ChildRecord::new(pid));
        let link = Arc::downgrade(&record);
        self.records.lock().insert(pid, record);
        link
    }

    /// Forget a child that never started.
    pub fn detach(&self, pid: Pid) {
        self.records.lock().remove(&pid);
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.records.lock().contains_key(&pid)
    }

    /// Wait for direct child `pid` and consume its exit status.
    pub fn wait(&self, pid: Pid, scheduler: &dyn Scheduler) -> Result<i32, WaitError> {
        // Clone out of the map: the map lock must not be held while blocked.
        let record = self
            .records
            .lock()
            .get(&pid)
            .cloned()
            .ok_or(WaitError::NotAChild)?;

        let result = record.wait(scheduler);
        self.records.lock().remove(&pid);
        result
    }

    /// Drop every record. Children still running become orphans whose
    /// status is never collected.
    pub fn release_all(&self) -> Vec<Pid> {
        let records = core::mem::take(&mut *self.records.lock());
        records.into_keys().collect()
    }
}

impl Default for Children {
    fn default() -> Self {
        Self::new()
    }
}
