//! The demand-paging resolver.
//!
//! All mutable memory state lives behind one mutex: the frame table, every
//! process's page table, the FIFO victim queue, and the backing store. A
//! [`MemoryManager::resolve`] call runs start-to-finish inside that critical
//! section, including the backing-store file rewrite, so concurrent
//! workers can never see a page half-moved.
//!
//! Paging counters are plain atomics and can be read without the lock.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::backing_store::BackingStore;
use crate::error::{MmError, MmResult};
use crate::frame::{Frame, PageId, Pid};
use crate::page_table::{PageTable, PageTableEntry};

struct MemState {
    frames: Vec<Frame>,
    tables: HashMap<Pid, PageTable>,
    /// Load order of resident pages; the front is the next eviction victim.
    victims: VecDeque<PageId>,
    backing: BackingStore,
}

pub struct MemoryManager {
    frame_size: u64,
    total_bytes: u64,
    state: Mutex<MemState>,
    page_ins: AtomicU64,
    page_outs: AtomicU64,
}

impl MemoryManager {
    /// Allocate `total_bytes / frame_size` empty frames and an empty backing
    /// store at `backing_path`. Both sizes must be powers of two with
    /// `frame_size <= total_bytes` (enforced by configuration validation).
    pub fn new(total_bytes: u64, frame_size: u64, backing_path: impl Into<PathBuf>) -> Self {
        let frame_count = (total_bytes / frame_size) as usize;
        Self {
            frame_size,
            total_bytes,
            state: Mutex::new(MemState {
                frames: vec![Frame::default(); frame_count],
                tables: HashMap::new(),
                victims: VecDeque::new(),
                backing: BackingStore::new(backing_path),
            }),
            page_ins: AtomicU64::new(0),
            page_outs: AtomicU64::new(0),
        }
    }

    pub fn frame_size(&self) -> u64 {
        self.frame_size
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn frame_count(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn page_ins(&self) -> u64 {
        self.page_ins.load(Ordering::Relaxed)
    }

    pub fn page_outs(&self) -> u64 {
        self.page_outs.load(Ordering::Relaxed)
    }

    /// Create the page table for a new process of `memory_size` bytes.
    pub fn register_process(&self, pid: Pid, memory_size: u64) {
        let pages = (memory_size / self.frame_size) as usize;
        debug_assert!(pages > 0, "process memory below frame size");
        self.lock().tables.insert(pid, PageTable::new(pages));
    }

    /// Translate a virtual address within `pid`'s address space to its page
    /// number (clamped to the last page).
    pub fn page_for_addr(&self, pid: Pid, addr: u64) -> MmResult<usize> {
        let state = self.lock();
        let table = state.tables.get(&pid).ok_or(MmError::UnknownProcess(pid))?;
        Ok(table.page_for_addr(addr, self.frame_size))
    }

    /// Make `(pid, page)` resident.
    ///
    /// On success the page occupies exactly one frame, its table entry points
    /// at that frame, and the victim queue holds it exactly once. Resolving a
    /// page that is already resident touches neither counters nor the queue.
    pub fn resolve(&self, pid: Pid, page: usize) -> MmResult {
        let mut state = self.lock();
        self.resolve_locked(&mut state, PageId::new(pid, page))
    }

    /// Resolve `(pid, page)` and append `token` to its frame data in the
    /// same critical section.
    pub fn write_token(&self, pid: Pid, page: usize, token: &str) -> MmResult {
        let id = PageId::new(pid, page);
        let mut state = self.lock();
        self.resolve_locked(&mut state, id)?;
        let frame_idx = state.tables[&id.pid].entry(id.page).frame;
        if let Some(idx) = frame_idx {
            state.frames[idx].data.push_str(token);
        }
        Ok(())
    }

    fn resolve_locked(&self, state: &mut MemState, id: PageId) -> MmResult {
        let table = state.tables.get(&id.pid).ok_or(MmError::UnknownProcess(id.pid))?;
        let pages = table.page_count();
        if id.page >= pages {
            return Err(MmError::PageOutOfRange {
                pid: id.pid,
                page: id.page,
                pages,
            });
        }
        if table.entry(id.page).in_memory() {
            return Ok(());
        }

        let free_frame = state.frames.iter().position(Frame::is_free);
        let frame_idx = match free_frame {
            Some(idx) => idx,
            None => self.evict_one(state)?,
        };

        // Restore spilled data if this page was evicted before; first-touch
        // pages start with an empty frame.
        let restored = state.backing.take(id);
        let was_spilled = restored.is_some();
        state.frames[frame_idx].owner = Some(id);
        state.frames[frame_idx].data = restored.unwrap_or_default();
        if was_spilled {
            persist(&state.backing);
        }
        if let Some(table) = state.tables.get_mut(&id.pid) {
            table.entry_mut(id.page).frame = Some(frame_idx);
        }

        // Re-queue at the tail, dropping any stale entry first so the queue
        // holds each resident page exactly once.
        state.victims.retain(|v| *v != id);
        state.victims.push_back(id);

        self.page_ins.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Evict the oldest resident page and return its now-free frame index.
    fn evict_one(&self, state: &mut MemState) -> MmResult<usize> {
        let victim = state.victims.pop_front().ok_or(MmError::NoFrame)?;

        let table = state
            .tables
            .get_mut(&victim.pid)
            .ok_or(MmError::UnknownProcess(victim.pid))?;
        let Some(frame_idx) = table.entry_mut(victim.page).frame.take() else {
            log::error!("victim queue held non-resident page ({victim})");
            return Err(MmError::NoFrame);
        };

        let data = std::mem::take(&mut state.frames[frame_idx].data);
        state.frames[frame_idx].owner = None;
        state.backing.insert(victim, data);
        persist(&state.backing);

        self.page_outs.fetch_add(1, Ordering::Relaxed);
        Ok(frame_idx)
    }

    // --- observability -----------------------------------------------------

    pub fn used_frames(&self) -> usize {
        self.lock().frames.iter().filter(|f| !f.is_free()).count()
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_frames() as u64 * self.frame_size
    }

    pub fn frames_snapshot(&self) -> Vec<Frame> {
        self.lock().frames.clone()
    }

    pub fn page_table_snapshot(&self, pid: Pid) -> Option<Vec<PageTableEntry>> {
        self.lock().tables.get(&pid).map(|t| t.entries().to_vec())
    }

    /// Number of `pid`'s pages currently holding a frame.
    pub fn resident_pages(&self, pid: Pid) -> usize {
        self.lock()
            .tables
            .get(&pid)
            .map(PageTable::resident_pages)
            .unwrap_or(0)
    }

    pub fn backing_snapshot(&self) -> Vec<(PageId, String)> {
        self.lock().backing.snapshot()
    }

    pub fn victim_queue_snapshot(&self) -> Vec<PageId> {
        self.lock().victims.iter().copied().collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mirror the backing store to disk; on failure the in-memory map stays
/// authoritative and the error is only logged.
fn persist(backing: &BackingStore) {
    if let Err(err) = backing.persist() {
        log::warn!(
            "failed to rewrite backing store {}: {err}",
            backing.path().display()
        );
    }
}
