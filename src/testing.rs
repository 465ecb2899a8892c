//! Host fakes for the collaborator traits, and a driver that plays the
//! user side of the trap ABI.
//!
//! Each process runs as a closure on its own std thread. `User` lays
//! request blocks on the process's fake stack and traps into the kernel
//! the same way the architecture glue would.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread::{self, JoinHandle, Thread};

use crate::drivers::{Console, PowerControl};
use crate::fs::{File, FileStore};
use crate::kernel::{Collaborators, Kernel};
use crate::mm::{AddressSpace, PageFlags, VirtAddr, PAGE_SIZE, USER_TOP};
use crate::process::{Loader, Process, Scheduler, ThreadId};
use crate::syscall::numbers::*;
use crate::trap::{TrapFrame, TrapOutcome};

/// One read-only code page.
pub const CODE_BASE: u32 = 0x0804_8000;
/// Writable data area, followed by an unmapped page.
pub const DATA_BASE: u32 = 0x1000_0000;
pub const DATA_PAGES: u32 = 4;
/// Where `User` places request blocks, at the top of the stack page.
pub const ARGS_SLOT: u32 = USER_TOP - 16;

// ---------------------------------------------------------------------------
// Address space

/// Page-granular fake address space.
#[derive(Debug, Default)]
pub struct FakeSpace {
    pages: BTreeMap<u32, (PageFlags, Vec<u8>)>,
}

impl FakeSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Code page, data area and one stack page just below `USER_TOP`.
    pub fn standard() -> Self {
        let mut space = Self::new();
        space.map(CODE_BASE, 1, PageFlags::USER_CODE);
        space.map(DATA_BASE, DATA_PAGES, PageFlags::USER_DATA);
        space.map(USER_TOP - PAGE_SIZE, 1, PageFlags::USER_DATA);
        space
    }

    pub fn map(&mut self, base: u32, pages: u32, flags: PageFlags) {
        let first = VirtAddr::new(base).page_number();
        for page in first..first + pages {
            self.pages.insert(page, (flags, vec![0; PAGE_SIZE as usize]));
        }
    }

    /// Write ignoring page permissions.
    pub fn poke(&mut self, addr: u32, bytes: &[u8]) {
        AddressSpace::write(self, VirtAddr::new(addr), bytes);
    }

    pub fn peek(&self, addr: u32, len: usize) -> Vec<u8> {
        let mut out = vec![0; len];
        AddressSpace::read(self, VirtAddr::new(addr), &mut out);
        out
    }

    fn byte(&mut self, addr: u32) -> &mut u8 {
        let addr = VirtAddr::new(addr);
        let (_, page) = self
            .pages
            .get_mut(&addr.page_number())
            .unwrap_or_else(|| panic!("touched unmapped {}", addr));
        &mut page[addr.page_offset() as usize]
    }
}

impl AddressSpace for FakeSpace {
    fn lookup(&self, addr: VirtAddr) -> Option<PageFlags> {
        self.pages.get(&addr.page_number()).map(|(flags, _)| *flags)
    }

    fn read(&self, addr: VirtAddr, dst: &mut [u8]) {
        for (i, out) in dst.iter_mut().enumerate() {
            let at = VirtAddr::new(addr.as_u32() + i as u32);
            let (_, page) = self
                .pages
                .get(&at.page_number())
                .unwrap_or_else(|| panic!("read unmapped {}", at));
            *out = page[at.page_offset() as usize];
        }
    }

    fn write(&mut self, addr: VirtAddr, src: &[u8]) {
        for (i, value) in src.iter().enumerate() {
            *self.byte(addr.as_u32() + i as u32) = *value;
        }
    }
}

// ---------------------------------------------------------------------------
// File store

/// Counts overlapping entries into the store.
#[derive(Debug, Default)]
pub struct Reentrancy {
    inside: AtomicBool,
    entries: AtomicUsize,
    violations: AtomicUsize,
}

pub struct Entered(Arc<Reentrancy>);

impl Reentrancy {
    fn enter(self: &Arc<Self>) -> Entered {
        if self.inside.swap(true, Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.entries.fetch_add(1, Ordering::SeqCst);
        // Widen the window for an overlapping caller.
        thread::yield_now();
        Entered(self.clone())
    }

    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }

    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }
}

impl Drop for Entered {
    fn drop(&mut self) {
        self.0.inside.store(false, Ordering::SeqCst);
    }
}

type Contents = Arc<Mutex<Vec<u8>>>;
type Directory = Arc<Mutex<BTreeMap<String, Contents>>>;

/// In-memory file store with 14-character names.
pub struct MemFs {
    files: Directory,
    monitor: Arc<Reentrancy>,
}

impl MemFs {
    pub const NAME_MAX: usize = 14;

    pub fn new() -> Self {
        Self::with_monitor(Arc::default(), Arc::default())
    }

    fn with_monitor(files: Directory, monitor: Arc<Reentrancy>) -> Self {
        Self { files, monitor }
    }
}

impl FileStore for MemFs {
    fn create(&mut self, name: &str, initial_size: u32) -> bool {
        let _entered = self.monitor.enter();
        let mut files = self.files.lock().unwrap();
        if name.len() > Self::NAME_MAX || files.contains_key(name) {
            return false;
        }
        let contents = vec![0; initial_size as usize];
        files.insert(name.to_string(), Arc::new(Mutex::new(contents)));
        true
    }

    fn remove(&mut self, name: &str) -> bool {
        let _entered = self.monitor.enter();
        self.files.lock().unwrap().remove(name).is_some()
    }

    fn open(&mut self, name: &str) -> Option<Box<dyn File>> {
        let _entered = self.monitor.enter();
        let contents = self.files.lock().unwrap().get(name)?.clone();
        Some(Box::new(MemFile {
            contents,
            position: 0,
            monitor: Some(self.monitor.clone()),
        }))
    }
}

/// An open in-memory file. Unlinked contents stay reachable through it.
pub struct MemFile {
    contents: Contents,
    position: u32,
    monitor: Option<Arc<Reentrancy>>,
}

impl MemFile {
    /// A file that belongs to no store.
    pub fn detached(data: &[u8]) -> Self {
        Self {
            contents: Arc::new(Mutex::new(data.to_vec())),
            position: 0,
            monitor: None,
        }
    }

    fn enter(&self) -> Option<Entered> {
        self.monitor.as_ref().map(Reentrancy::enter)
    }
}

impl File for MemFile {
    fn length(&self) -> u32 {
        let _entered = self.enter();
        self.contents.lock().unwrap().len() as u32
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let _entered = self.enter();
        let contents = self.contents.lock().unwrap();
        let start = (self.position as usize).min(contents.len());
        let count = buf.len().min(contents.len() - start);
        buf[..count].copy_from_slice(&contents[start..start + count]);
        drop(contents);
        self.position += count as u32;
        count
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        let _entered = self.enter();
        let mut contents = self.contents.lock().unwrap();
        let start = self.position as usize;
        if contents.len() < start + buf.len() {
            contents.resize(start + buf.len(), 0);
        }
        contents[start..start + buf.len()].copy_from_slice(buf);
        drop(contents);
        self.position += buf.len() as u32;
        buf.len()
    }

    fn seek(&mut self, position: u32) {
        let _entered = self.enter();
        self.position = position;
    }

    fn tell(&self) -> u32 {
        let _entered = self.enter();
        self.position
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        let _entered = self.enter();
    }
}

// ---------------------------------------------------------------------------
// Devices

#[derive(Debug, Default)]
pub struct CaptureConsole {
    output: Mutex<Vec<u8>>,
    input: Mutex<VecDeque<u8>>,
}

impl CaptureConsole {
    pub fn output(&self) -> Vec<u8> {
        self.output.lock().unwrap().clone()
    }

    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output()).into_owned()
    }

    pub fn push_input(&self, bytes: &[u8]) {
        self.input.lock().unwrap().extend(bytes);
    }

    pub fn pending_input(&self) -> usize {
        self.input.lock().unwrap().len()
    }
}

impl Console for CaptureConsole {
    fn put_bytes(&self, bytes: &[u8]) {
        self.output.lock().unwrap().extend_from_slice(bytes);
    }

    /// Zero once the queued input runs out.
    fn get_byte(&self) -> u8 {
        self.input.lock().unwrap().pop_front().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub struct FakePower {
    off: AtomicBool,
}

impl FakePower {
    pub fn is_off(&self) -> bool {
        self.off.load(Ordering::SeqCst)
    }
}

impl PowerControl for FakePower {
    fn power_off(&self) {
        self.off.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Scheduler and loader

/// How a user program stopped running user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ended {
    Exited(i32),
    Halted,
}

pub type Program = Arc<dyn Fn(&mut User) -> Result<i32, Ended> + Send + Sync>;
type Programs = Arc<Mutex<HashMap<String, Program>>>;

static NEXT_THREAD: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD.fetch_add(1, Ordering::Relaxed);
}

/// Status a panicking program exits with, so its parent never hangs.
const PANICKED: i32 = -99;

/// One std thread per process; block/unblock are park/unpark.
#[derive(Default)]
pub struct ParkScheduler {
    threads: Mutex<HashMap<u64, Thread>>,
    programs: Programs,
    kernel: OnceLock<Weak<Kernel>>,
    started: Mutex<Vec<Arc<Process>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    refuse: AtomicBool,
}

impl ParkScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_starts(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// A process this scheduler has started, by pid.
    pub fn started(&self, pid: u32) -> Option<Arc<Process>> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .find(|process| process.pid().as_u32() == pid)
            .cloned()
    }

    fn bind(&self, kernel: &Arc<Kernel>) {
        assert!(self.kernel.set(Arc::downgrade(kernel)).is_ok());
    }

    /// Join every process thread, including ones started while joining.
    fn join_all(&self) {
        loop {
            let handles = std::mem::take(&mut *self.handles.lock().unwrap());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(panic) = handle.join() {
                    panic::resume_unwind(panic);
                }
            }
        }
    }
}

impl Scheduler for ParkScheduler {
    fn current(&self) -> ThreadId {
        let id = THREAD_ID.with(|id| *id);
        self.threads
            .lock()
            .unwrap()
            .entry(id)
            .or_insert_with(thread::current);
        ThreadId(id)
    }

    fn block(&self) {
        thread::park();
    }

    fn unblock(&self, thread: ThreadId) {
        if let Some(handle) = self.threads.lock().unwrap().get(&thread.0) {
            handle.unpark();
        }
    }

    fn start(&self, process: Arc<Process>) -> bool {
        if self.refuse.load(Ordering::SeqCst) {
            return false;
        }
        let Some(kernel) = self.kernel.get().and_then(Weak::upgrade) else {
            return false;
        };
        let Some(program) = self.programs.lock().unwrap().get(process.name()).cloned() else {
            return false;
        };

        self.started.lock().unwrap().push(process.clone());
        let spawned = thread::Builder::new()
            .name(process.name().to_string())
            .spawn(move || {
                let mut user = User::new(kernel.clone(), process.clone());
                match panic::catch_unwind(AssertUnwindSafe(|| program(&mut user))) {
                    Ok(Ok(status)) => {
                        user.exit(status);
                    }
                    Ok(Err(_)) => {}
                    Err(panic) => {
                        kernel.exit_process(&process, PANICKED);
                        panic::resume_unwind(panic);
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                self.handles.lock().unwrap().push(handle);
                true
            }
            Err(_) => false,
        }
    }
}

/// Loads any registered program into a standard address space.
pub struct FakeLoader {
    programs: Programs,
}

impl Loader for FakeLoader {
    fn load(&self, _store: &mut dyn FileStore, cmdline: &str) -> Option<Box<dyn AddressSpace>> {
        let name = cmdline.split_whitespace().next()?;
        if !self.programs.lock().unwrap().contains_key(name) {
            return None;
        }
        Some(Box::new(FakeSpace::standard()))
    }
}

// ---------------------------------------------------------------------------
// Harness

/// A kernel wired to host fakes.
pub struct Harness {
    pub kernel: Arc<Kernel>,
    pub console: Arc<CaptureConsole>,
    pub power: Arc<FakePower>,
    pub scheduler: Arc<ParkScheduler>,
    pub monitor: Arc<Reentrancy>,
    files: Directory,
}

impl Harness {
    pub fn new() -> Self {
        let console = Arc::new(CaptureConsole::default());
        let power = Arc::new(FakePower::default());
        let scheduler = Arc::new(ParkScheduler::new());
        let monitor = Arc::new(Reentrancy::default());
        let files = Directory::default();
        let loader = FakeLoader {
            programs: scheduler.programs.clone(),
        };

        let kernel = Arc::new(Kernel::new(Collaborators {
            store: Box::new(MemFs::with_monitor(files.clone(), monitor.clone())),
            console: console.clone(),
            power: power.clone(),
            loader: Arc::new(loader),
            scheduler: scheduler.clone(),
        }));
        scheduler.bind(&kernel);

        Self {
            kernel,
            console,
            power,
            scheduler,
            monitor,
            files,
        }
    }

    /// Make `name` loadable; `program` runs as the process body.
    pub fn register<F>(&self, name: &str, program: F)
    where
        F: Fn(&mut User) -> Result<i32, Ended> + Send + Sync + 'static,
    {
        self.scheduler
            .programs
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::new(program));
    }

    /// A parentless process named "root" driven from the calling thread.
    pub fn root(&self) -> User {
        let process = self.kernel.attach("root", Box::new(FakeSpace::standard()));
        User::new(self.kernel.clone(), process)
    }

    pub fn join(&self) {
        self.scheduler.join_all();
    }

    pub fn create_file(&self, name: &str, data: &[u8]) {
        self.kernel.fs.with(|store| {
            assert!(store.create(name, 0));
            let mut file = store.open(name).unwrap();
            assert_eq!(file.write(data), data.len());
        });
    }

    pub fn store_names(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// User side of the ABI

/// Drives one process through the trap interface.
pub struct User {
    kernel: Arc<Kernel>,
    process: Arc<Process>,
    cursor: u32,
}

impl User {
    fn new(kernel: Arc<Kernel>, process: Arc<Process>) -> Self {
        Self {
            kernel,
            process,
            cursor: DATA_BASE,
        }
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    /// Write into this process's memory, ignoring page permissions. Does
    /// nothing once the address space is gone.
    pub fn poke(&mut self, addr: u32, bytes: &[u8]) {
        let _ = self
            .process
            .with_space(|space| space.write(VirtAddr::new(addr), bytes));
    }

    pub fn peek(&self, addr: u32, len: usize) -> Vec<u8> {
        let mut out = vec![0; len];
        self.process
            .with_space(|space| space.read(VirtAddr::new(addr), &mut out))
            .unwrap();
        out
    }

    /// Trap with the stack pointer at `esp`.
    pub fn trap_at(&mut self, esp: u32) -> Result<u32, Ended> {
        let mut frame = TrapFrame::new(esp);
        match self.kernel.handle_trap(&self.process, &mut frame) {
            TrapOutcome::Resume => Ok(frame.eax),
            TrapOutcome::Exited(status) => Err(Ended::Exited(status)),
            TrapOutcome::Halted => Err(Ended::Halted),
        }
    }

    /// Issue syscall `number` with up to three argument words.
    pub fn syscall(&mut self, number: u32, args: &[u32]) -> Result<u32, Ended> {
        let mut block = [0u8; 16];
        block[..4].copy_from_slice(&number.to_le_bytes());
        for (i, arg) in args.iter().enumerate() {
            block[4 + 4 * i..8 + 4 * i].copy_from_slice(&arg.to_le_bytes());
        }
        self.poke(ARGS_SLOT, &block);
        let result = self.trap_at(ARGS_SLOT);
        self.cursor = DATA_BASE;
        result
    }

    /// Copy `bytes` into the data area for the next syscall.
    fn stage(&mut self, bytes: &[u8]) -> u32 {
        let addr = self.cursor;
        let end = addr + bytes.len() as u32;
        assert!(end <= DATA_BASE + DATA_PAGES * PAGE_SIZE, "data area exhausted");
        self.poke(addr, bytes);
        self.cursor = (end + 3) & !3;
        addr
    }

    fn stage_str(&mut self, s: &str) -> u32 {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.stage(&bytes)
    }

    pub fn exit(&mut self, status: i32) -> Ended {
        match self.syscall(SYS_EXIT, &[status as u32]) {
            Err(ended) => ended,
            Ok(value) => panic!("exit returned {}", value),
        }
    }

    pub fn exec(&mut self, cmdline: &str) -> Result<i32, Ended> {
        let ptr = self.stage_str(cmdline);
        self.syscall(SYS_EXEC, &[ptr]).map(|pid| pid as i32)
    }

    pub fn wait(&mut self, pid: i32) -> Result<i32, Ended> {
        self.syscall(SYS_WAIT, &[pid as u32]).map(|status| status as i32)
    }

    pub fn practice(&mut self, n: i32) -> Result<i32, Ended> {
        self.syscall(SYS_PRACTICE, &[n as u32]).map(|v| v as i32)
    }

    pub fn create(&mut self, name: &str, initial_size: u32) -> Result<bool, Ended> {
        let ptr = self.stage_str(name);
        Ok(self.syscall(SYS_CREATE, &[ptr, initial_size])? != 0)
    }

    pub fn remove(&mut self, name: &str) -> Result<bool, Ended> {
        let ptr = self.stage_str(name);
        Ok(self.syscall(SYS_REMOVE, &[ptr])? != 0)
    }

    pub fn open(&mut self, name: &str) -> Result<i32, Ended> {
        let ptr = self.stage_str(name);
        self.syscall(SYS_OPEN, &[ptr]).map(|fd| fd as i32)
    }

    pub fn filesize(&mut self, fd: i32) -> Result<i32, Ended> {
        self.syscall(SYS_FILESIZE, &[fd as u32]).map(|v| v as i32)
    }

    /// Read up to `len` bytes. Returns the result and the bytes read.
    pub fn read(&mut self, fd: i32, len: u32) -> Result<(i32, Vec<u8>), Ended> {
        let buf = self.stage(&vec![0; len as usize]);
        let count = self.syscall(SYS_READ, &[fd as u32, buf, len])? as i32;
        let data = if count > 0 {
            self.peek(buf, count as usize)
        } else {
            Vec::new()
        };
        Ok((count, data))
    }

    pub fn write(&mut self, fd: i32, data: &[u8]) -> Result<i32, Ended> {
        let buf = self.stage(data);
        self.syscall(SYS_WRITE, &[fd as u32, buf, data.len() as u32])
            .map(|v| v as i32)
    }

    pub fn seek(&mut self, fd: i32, position: u32) -> Result<(), Ended> {
        self.syscall(SYS_SEEK, &[fd as u32, position]).map(|_| ())
    }

    pub fn tell(&mut self, fd: i32) -> Result<i32, Ended> {
        self.syscall(SYS_TELL, &[fd as u32]).map(|v| v as i32)
    }

    pub fn close(&mut self, fd: i32) -> Result<(), Ended> {
        self.syscall(SYS_CLOSE, &[fd as u32]).map(|_| ())
    }
}
