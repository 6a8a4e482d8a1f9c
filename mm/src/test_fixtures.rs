//! Shared helpers for memory-manager tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::frame::{PageId, Pid};
use crate::manager::MemoryManager;

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Unique throwaway file path under the system temp directory.
pub fn scratch_path(tag: &str) -> PathBuf {
    let n = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("csopesy-test-{}-{tag}-{n}.txt", std::process::id()))
}

/// Backing-store file that deletes itself when the test ends.
pub struct ScratchFile {
    pub path: PathBuf,
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        std::fs::remove_file(&self.path).ok();
    }
}

/// A manager over `total_bytes` of physical memory in `frame_size` frames,
/// spilling to a self-cleaning scratch file.
pub fn manager(total_bytes: u64, frame_size: u64, tag: &str) -> (MemoryManager, ScratchFile) {
    let path = scratch_path(tag);
    let mgr = MemoryManager::new(total_bytes, frame_size, &path);
    (mgr, ScratchFile { path })
}

/// Assert the three structural invariants of the paging state:
///
/// 1. every resident page-table entry points at a frame owned by exactly
///    that page, and no two entries share a frame;
/// 2. no page is simultaneously resident and spilled;
/// 3. the victim queue lists each resident page exactly once and nothing
///    else.
pub fn assert_consistent(mgr: &MemoryManager, pids: &[Pid]) {
    let frames = mgr.frames_snapshot();
    let victims = mgr.victim_queue_snapshot();
    let backing: Vec<PageId> = mgr.backing_snapshot().into_iter().map(|(id, _)| id).collect();

    let mut resident: Vec<PageId> = Vec::new();
    let mut claimed_frames: Vec<usize> = Vec::new();

    for &pid in pids {
        let table = mgr
            .page_table_snapshot(pid)
            .unwrap_or_else(|| panic!("pid {pid} has no page table"));
        for (page, entry) in table.iter().enumerate() {
            let Some(idx) = entry.frame else { continue };
            let id = PageId::new(pid, page);
            assert_eq!(
                frames[idx].owner,
                Some(id),
                "frame {idx} does not record ownership of {id}"
            );
            assert!(
                !claimed_frames.contains(&idx),
                "frame {idx} referenced by two page-table entries"
            );
            claimed_frames.push(idx);
            resident.push(id);
        }
    }

    for id in &resident {
        assert!(!backing.contains(id), "{id} is both resident and spilled");
    }

    let mut queue_sorted = victims.clone();
    queue_sorted.sort();
    queue_sorted.dedup();
    assert_eq!(
        queue_sorted.len(),
        victims.len(),
        "victim queue holds a duplicate entry"
    );
    let mut resident_sorted = resident.clone();
    resident_sorted.sort();
    assert_eq!(
        queue_sorted, resident_sorted,
        "victim queue does not match the resident set"
    );
}
