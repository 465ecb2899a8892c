//! Kernel services behind the trap layer
//!
//! `Kernel` owns the filesystem gate and the handles to every external
//! collaborator. There is no global state: the architecture glue builds one
//! `Kernel` at boot and passes it to `handle_trap` on every syscall.

use alloc::boxed::Box;
use alloc::format;
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicU32, Ordering};

use log::{info, warn};

use crate::drivers::{Console, PowerControl};
use crate::fs::{FileStore, FsGate};
use crate::mm::AddressSpace;
use crate::process::{Loader, Pid, Process, Scheduler};

/// Everything the trap layer consumes from the rest of the kernel.
pub struct Collaborators {
    pub store: Box<dyn FileStore>,
    pub console: Arc<dyn Console>,
    pub power: Arc<dyn PowerControl>,
    pub loader: Arc<dyn Loader>,
    pub scheduler: Arc<dyn Scheduler>,
}

pub struct Kernel {
    pub(crate) fs: FsGate,
    pub(crate) console: Arc<dyn Console>,
    pub(crate) power: Arc<dyn PowerControl>,
    loader: Arc<dyn Loader>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    next_pid: AtomicU32,
}

impl Kernel {
    pub fn new(parts: Collaborators) -> Self {
        Self {
            fs: FsGate::new(parts.store),
            console: parts.console,
            power: parts.power,
            loader: parts.loader,
            scheduler: parts.scheduler,
            next_pid: AtomicU32::new(1),
        }
    }

    fn allocate_pid(&self) -> Pid {
        Pid::from_raw(self.next_pid.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a parentless process for a thread the caller already runs.
    pub fn attach(&self, name: &str, space: Box<dyn AddressSpace>) -> Arc<Process> {
        let process = Arc::new(Process::new(self.allocate_pid(), name, space, Weak::new()));
        info!("[PROCESS] attached {} ({})", process.pid(), name);
        process
    }

    /// Load and start the first user process.
    pub fn boot(&self, cmdline: &str) -> Option<Pid> {
        self.spawn(cmdline, None)
    }

    /// Load `cmdline` and start it, as a child of `parent` if given.
    ///
    /// The child's record is attached before the child can run, so even a
    /// child that exits immediately has somewhere to post its status.
    pub(crate) fn spawn(&self, cmdline: &str, parent: Option<&Process>) -> Option<Pid> {
        let name = cmdline.split_whitespace().next()?;

        let Some(space) = self.fs.with(|store| self.loader.load(store, cmdline)) else {
            info!("[PROCESS] load failed: {}", name);
            return None;
        };

        let pid = self.allocate_pid();
        let link = match parent {
            Some(parent) => parent.children().attach(pid),
            None => Weak::new(),
        };

        let process = Arc::new(Process::new(pid, name, space, link));
        if !self.scheduler.start(process) {
            warn!("[PROCESS] scheduler refused {} ({})", pid, name);
            if let Some(parent) = parent {
                parent.children().detach(pid);
            }
            return None;
        }

        info!("[PROCESS] started {} ({})", pid, name);
        Some(pid)
    }

    /// Terminate `process` with `status`.
    ///
    /// Prints the exit line every terminating process produces, then tears
    /// the process down.
    pub(crate) fn exit_process(&self, process: &Process, status: i32) {
        if process.has_exited() {
            return;
        }
        let line = format!("{}: exit({})\n", process.name(), status);
        self.console.put_bytes(line.as_bytes());

        if process.terminate(status, &self.fs, &*self.scheduler) {
            info!("[PROCESS] {} ({}) exited with {}", process.pid(), process.name(), status);
        }
    }
}
