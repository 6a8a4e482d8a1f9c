//! Batch process generator.
//!
//! A dedicated thread that wakes every `batch_process_freq` ticks (one tick
//! approximated as 100 ms, interruptible at tick granularity) and enqueues
//! one synthetic process named `processNN`. Names already taken by the
//! shell or a previous generator run are skipped.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::system::System;

const TICK: Duration = Duration::from_millis(100);

pub fn spawn_generator(system: Arc<System>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("batch-generator".to_string())
        .spawn(move || generator_loop(system))
}

fn generator_loop(system: Arc<System>) {
    let mut counter: u32 = 1;
    loop {
        for _ in 0..system.config.batch_process_freq {
            if system.scheduler.is_creation_stopped() {
                return;
            }
            thread::sleep(TICK);
        }
        if system.scheduler.is_creation_stopped() {
            return;
        }

        loop {
            let name = format!("process{counter:02}");
            counter += 1;
            if system.processes.contains(&name) {
                continue;
            }
            match system.create_auto_process(&name) {
                Ok(process) => log::debug!(
                    "batch generator queued {} ({} lines, {} bytes)",
                    process.name(),
                    process.total_line(),
                    process.memory_size()
                ),
                Err(err) => log::warn!("batch generator could not create {name}: {err}"),
            }
            break;
        }
    }
}
