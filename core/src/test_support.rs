//! Builders shared by the core test suites.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{Config, SchedulerPolicy};
use crate::system::{Runtime, System};

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Backing-store file that deletes itself when the test ends.
pub struct ScratchFile {
    pub path: PathBuf,
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        std::fs::remove_file(&self.path).ok();
    }
}

pub fn scratch_path(tag: &str) -> PathBuf {
    let n = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("csopesy-core-test-{}-{tag}-{n}.txt", std::process::id()))
}

/// A small single-core FCFS configuration with zero inter-instruction
/// delay. Tests tweak fields as needed before building a system.
pub fn test_config() -> Config {
    Config {
        num_cpu: 1,
        scheduler: SchedulerPolicy::Fcfs,
        quantum_cycles: 3,
        batch_process_freq: 1,
        min_ins: 20,
        max_ins: 20,
        delay_per_exec: 0,
        max_overall_mem: 1024,
        mem_per_frame: 64,
        min_mem_per_proc: 64,
        max_mem_per_proc: 1024,
    }
}

/// A bare system with no worker threads; tests drive the executor directly.
pub fn system(config: Config) -> (Arc<System>, ScratchFile) {
    let path = scratch_path("system");
    let sys = System::new(config, &path);
    (sys, ScratchFile { path })
}

/// A full runtime with live workers, shut down when dropped.
pub fn runtime(config: Config) -> (Runtime, ScratchFile) {
    let path = scratch_path("runtime");
    let rt = Runtime::start(config, &path).expect("spawn workers");
    (rt, ScratchFile { path })
}

/// Poll `cond` every few milliseconds until it holds or `timeout_ms` passes.
pub fn wait_until(timeout_ms: u64, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
