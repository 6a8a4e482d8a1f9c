//! Physical frames and page identities.

use std::fmt;

/// Emulated process identifier.
pub type Pid = u32;

/// Identity of one virtual page: which process, which page number.
///
/// This is the key type of the whole subsystem: frames record the `PageId`
/// they hold, the victim queue is a FIFO of `PageId`s, and the backing store
/// maps `PageId` to spilled page data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub pid: Pid,
    pub page: usize,
}

impl PageId {
    pub fn new(pid: Pid, page: usize) -> Self {
        Self { pid, page }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {} page {}", self.pid, self.page)
    }
}

/// One slot of physical memory, exactly one page wide.
///
/// `data` is an opaque string accumulating the tokens instructions write
/// into the page; it travels with the page through eviction and reload.
#[derive(Clone, Debug, Default)]
pub struct Frame {
    pub owner: Option<PageId>,
    pub data: String,
}

impl Frame {
    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }
}
