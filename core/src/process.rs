//! Emulated processes and the central process registry.
//!
//! Fields the stats reporter polls (progress, core, lifecycle flags) are
//! atomics; everything only the executing worker touches (variables, the
//! instruction log, the parsed program) sits behind the body mutex. A
//! process is created by the shell or the batch generator and lives until
//! full-system shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use csopesy_lib::clock;
use csopesy_mm::Pid;

use crate::instruction::Instruction;

/// Sentinel for "never ran on any core".
pub const NO_CORE: u32 = u32::MAX;

/// Cap on generator-declared variables per process.
pub const MAX_DECLARED_VARS: usize = 32;

/// State only touched by the worker currently running the process (or by a
/// display command holding the lock briefly).
#[derive(Default)]
pub struct ProcBody {
    pub variables: HashMap<String, u16>,
    /// One formatted log line per executed instruction, indexed by line.
    pub log: Vec<String>,
    /// User-supplied program; lines beyond it are generated randomly.
    pub program: Vec<Instruction>,
    /// Names handed out by generated DECLAREs, in declaration order.
    pub declared: Vec<String>,
    pub finished_at: Option<String>,
    pub shutdown_at: Option<String>,
    pub shutdown_reason: Option<String>,
}

pub struct Process {
    id: Pid,
    name: String,
    created_at: String,
    memory_size: u64,
    total_line: u64,
    current_line: AtomicU64,
    core_assigned: AtomicU32,
    /// Times a worker pulled this process off a ready queue.
    dispatches: AtomicU64,
    finished: AtomicBool,
    shutdown: AtomicBool,
    body: Mutex<ProcBody>,
}

impl Process {
    pub fn new(
        id: Pid,
        name: String,
        total_line: u64,
        memory_size: u64,
        program: Vec<Instruction>,
    ) -> Self {
        Self {
            id,
            name,
            created_at: clock::timestamp_now(),
            memory_size,
            total_line,
            current_line: AtomicU64::new(0),
            core_assigned: AtomicU32::new(NO_CORE),
            dispatches: AtomicU64::new(0),
            finished: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            body: Mutex::new(ProcBody {
                program,
                ..ProcBody::default()
            }),
        }
    }

    pub fn id(&self) -> Pid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> &str {
        &self.created_at
    }

    pub fn memory_size(&self) -> u64 {
        self.memory_size
    }

    pub fn total_line(&self) -> u64 {
        self.total_line
    }

    pub fn current_line(&self) -> u64 {
        self.current_line.load(Ordering::Acquire)
    }

    pub fn advance_line(&self) {
        self.current_line.fetch_add(1, Ordering::Release);
    }

    pub fn has_remaining_work(&self) -> bool {
        self.current_line() < self.total_line
    }

    /// Core the process last ran on, if it ever ran.
    pub fn core(&self) -> Option<u32> {
        match self.core_assigned.load(Ordering::Acquire) {
            NO_CORE => None,
            core => Some(core),
        }
    }

    pub fn assign_core(&self, core: u32) {
        self.core_assigned.store(core, Ordering::Release);
    }

    pub fn record_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dispatch_count(&self) -> u64 {
        self.dispatches.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn mark_finished(&self) {
        self.body().finished_at = Some(clock::timestamp_now());
        self.finished.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Terminate the process for a memory-access violation. Records the
    /// reason and timestamp; the flag is what keeps it off the ready queues.
    pub fn mark_shutdown(&self, body: &mut ProcBody, reason: String) {
        body.shutdown_reason = Some(reason);
        body.shutdown_at = Some(clock::timestamp_now());
        self.shutdown.store(true, Ordering::Release);
    }

    /// Neither finished nor shut down.
    pub fn is_live(&self) -> bool {
        !self.is_finished() && !self.is_shutdown()
    }

    pub fn body(&self) -> MutexGuard<'_, ProcBody> {
        self.body.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct TableInner {
    by_name: HashMap<String, Arc<Process>>,
}

/// Name-keyed registry of every process ever created this run.
pub struct ProcessTable {
    inner: Mutex<TableInner>,
    next_pid: AtomicU32,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner::default()),
            next_pid: AtomicU32::new(1),
        }
    }

    pub fn allocate_pid(&self) -> Pid {
        self.next_pid.fetch_add(1, Ordering::Relaxed)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().by_name.contains_key(name)
    }

    /// Register a process. Fails if the name is already taken (the shell and
    /// the batch generator race for names).
    pub fn insert(&self, process: Arc<Process>) -> bool {
        let mut inner = self.lock();
        if inner.by_name.contains_key(process.name()) {
            return false;
        }
        inner.by_name.insert(process.name().to_string(), process);
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<Process>> {
        self.lock().by_name.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().by_name.is_empty()
    }

    /// All processes in creation (pid) order.
    pub fn all(&self) -> Vec<Arc<Process>> {
        let mut all: Vec<_> = self.lock().by_name.values().cloned().collect();
        all.sort_by_key(|p| p.id());
        all
    }

    fn lock(&self) -> MutexGuard<'_, TableInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(id: Pid, name: &str) -> Arc<Process> {
        Arc::new(Process::new(id, name.to_string(), 10, 256, Vec::new()))
    }

    #[test]
    fn fresh_process_is_live_and_unscheduled() {
        let p = proc(1, "p01");
        assert!(p.is_live());
        assert_eq!(p.core(), None);
        assert_eq!(p.current_line(), 0);
        assert!(p.has_remaining_work());
    }

    #[test]
    fn shutdown_records_reason_and_time() {
        let p = proc(1, "p01");
        {
            let mut body = p.body();
            p.mark_shutdown(&mut body, "Memory access violation at 0x100".into());
        }
        assert!(p.is_shutdown());
        assert!(!p.is_live());
        let body = p.body();
        assert_eq!(
            body.shutdown_reason.as_deref(),
            Some("Memory access violation at 0x100")
        );
        assert!(body.shutdown_at.is_some());
    }

    #[test]
    fn table_rejects_duplicate_names() {
        let table = ProcessTable::new();
        assert!(table.insert(proc(1, "worker")));
        assert!(!table.insert(proc(2, "worker")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn table_lists_in_pid_order() {
        let table = ProcessTable::new();
        table.insert(proc(3, "c"));
        table.insert(proc(1, "a"));
        table.insert(proc(2, "b"));
        let ids: Vec<_> = table.all().iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
