//! Error types for the memory management subsystem.

use thiserror::Error;

use crate::frame::Pid;

/// Failure modes of a page resolution.
///
/// `NoFrame` is the only variant reachable on a healthy system: every frame
/// is occupied and the victim queue is empty, so nothing can be evicted.
/// Callers treat it as "page not loaded" and keep the process running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MmError {
    #[error("page {page} out of range for pid {pid} ({pages} pages)")]
    PageOutOfRange { pid: Pid, page: usize, pages: usize },

    #[error("no page table registered for pid {0}")]
    UnknownProcess(Pid),

    #[error("no free frame and no resident page to evict")]
    NoFrame,
}

/// Convenience result type for memory management operations.
pub type MmResult<T = ()> = Result<T, MmError>;
