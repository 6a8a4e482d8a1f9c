//! Ready queues, worker cores, and the dispatch policies.
//!
//! One queue lock covers both ready queues and the two stop flags, paired
//! with a condition variable for worker wake-up. Workers hold the lock only
//! to dequeue or enqueue; instruction execution happens outside it. Tick
//! counters are atomics: one total tick per wake-up plus one total+active
//! tick per executed instruction, one idle tick per empty wake-up.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::SchedulerPolicy;
use crate::exec::{self, StepOutcome};
use crate::process::Process;
use crate::system::System;

/// How long a worker waits on the condition variable per wake-up.
const WORKER_WAIT: Duration = Duration::from_millis(1);

#[derive(Default)]
struct SchedQueues {
    fcfs: VecDeque<Arc<Process>>,
    rr: VecDeque<Arc<Process>>,
    /// Full stop: workers exit after their current instruction.
    stop_scheduler: bool,
    /// Stops only the batch generator; workers keep draining.
    stop_creation: bool,
}

impl SchedQueues {
    fn active(&mut self, policy: SchedulerPolicy) -> &mut VecDeque<Arc<Process>> {
        match policy {
            SchedulerPolicy::Fcfs => &mut self.fcfs,
            SchedulerPolicy::Rr => &mut self.rr,
        }
    }

    fn active_is_empty(&self, policy: SchedulerPolicy) -> bool {
        match policy {
            SchedulerPolicy::Fcfs => self.fcfs.is_empty(),
            SchedulerPolicy::Rr => self.rr.is_empty(),
        }
    }
}

pub struct Scheduler {
    policy: SchedulerPolicy,
    quantum: u64,
    queues: Mutex<SchedQueues>,
    work_available: Condvar,
    total_ticks: AtomicU64,
    active_ticks: AtomicU64,
    idle_ticks: AtomicU64,
}

impl Scheduler {
    pub fn new(policy: SchedulerPolicy, quantum: u64) -> Self {
        Self {
            policy,
            quantum,
            queues: Mutex::new(SchedQueues::default()),
            work_available: Condvar::new(),
            total_ticks: AtomicU64::new(0),
            active_ticks: AtomicU64::new(0),
            idle_ticks: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> SchedulerPolicy {
        self.policy
    }

    /// Push a process onto the active ready queue and wake one worker.
    pub fn enqueue(&self, process: Arc<Process>) {
        self.lock().active(self.policy).push_back(process);
        self.work_available.notify_one();
    }

    pub fn queued(&self) -> usize {
        let mut queues = self.lock();
        queues.active(self.policy).len()
    }

    /// Request a full stop and wake every waiter.
    pub fn stop_all(&self) {
        {
            let mut queues = self.lock();
            queues.stop_scheduler = true;
            queues.stop_creation = true;
        }
        self.work_available.notify_all();
    }

    /// Stop only process creation; running and queued work drains normally.
    pub fn stop_creation(&self) {
        self.lock().stop_creation = true;
        self.work_available.notify_all();
    }

    /// Re-arm process creation before starting a fresh generator.
    pub fn resume_creation(&self) {
        self.lock().stop_creation = false;
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stop_scheduler
    }

    pub fn is_creation_stopped(&self) -> bool {
        let queues = self.lock();
        queues.stop_creation || queues.stop_scheduler
    }

    pub fn total_ticks(&self) -> u64 {
        self.total_ticks.load(Ordering::SeqCst)
    }

    pub fn active_ticks(&self) -> u64 {
        self.active_ticks.load(Ordering::SeqCst)
    }

    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks.load(Ordering::SeqCst)
    }

    /// Count one executed instruction: the core was busy for that tick.
    /// Total is bumped first so `active + idle <= total` holds at every
    /// instant; sequential consistency keeps that visible across threads.
    fn tick_active(&self) {
        self.total_ticks.fetch_add(1, Ordering::SeqCst);
        self.active_ticks.fetch_add(1, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, SchedQueues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Start one worker thread per configured core, numbered from 1.
pub fn spawn_workers(system: &Arc<System>) -> io::Result<Vec<JoinHandle<()>>> {
    (1..=system.config.num_cpu)
        .map(|core_id| {
            let system = Arc::clone(system);
            thread::Builder::new()
                .name(format!("cpu-{core_id}"))
                .spawn(move || worker_loop(system, core_id))
        })
        .collect()
}

/// What a dispatch did with its process.
enum Dispatch {
    Finished,
    /// Quantum expired with work remaining; back to the tail.
    Requeue,
    /// Memory violation or system stop; do not finish, do not requeue.
    Abandon,
}

fn worker_loop(system: Arc<System>, core_id: u32) {
    let sched = &system.scheduler;
    let delay = Duration::from_millis(system.config.delay_per_exec);

    loop {
        let popped = {
            let queues = sched.lock();
            let (mut queues, _timeout) = sched
                .work_available
                .wait_timeout_while(queues, WORKER_WAIT, |q| {
                    !q.stop_scheduler && q.active_is_empty(sched.policy)
                })
                .unwrap_or_else(PoisonError::into_inner);
            sched.total_ticks.fetch_add(1, Ordering::SeqCst);
            if queues.stop_scheduler {
                return;
            }
            queues.active(sched.policy).pop_front()
        };

        let Some(process) = popped else {
            sched.idle_ticks.fetch_add(1, Ordering::SeqCst);
            thread::sleep(delay);
            continue;
        };

        process.record_dispatch();
        process.assign_core(core_id);

        let dispatch = match sched.policy {
            SchedulerPolicy::Fcfs => run_to_completion(&system, &process, core_id, delay),
            SchedulerPolicy::Rr => run_quantum(&system, &process, core_id, delay),
        };

        match dispatch {
            Dispatch::Finished => process.mark_finished(),
            Dispatch::Requeue => sched.enqueue(process),
            Dispatch::Abandon => {}
        }
    }
}

fn run_to_completion(
    system: &System,
    process: &Process,
    core_id: u32,
    delay: Duration,
) -> Dispatch {
    while process.has_remaining_work() {
        if system.scheduler.is_stopped() {
            return Dispatch::Abandon;
        }
        system.scheduler.tick_active();
        if exec::step(system, process, core_id) == StepOutcome::Fault {
            return Dispatch::Abandon;
        }
        process.advance_line();
        thread::sleep(delay);
    }
    Dispatch::Finished
}

fn run_quantum(system: &System, process: &Process, core_id: u32, delay: Duration) -> Dispatch {
    let mut executed = 0;
    while process.has_remaining_work() && executed < system.scheduler.quantum {
        if system.scheduler.is_stopped() {
            return Dispatch::Abandon;
        }
        system.scheduler.tick_active();
        if exec::step(system, process, core_id) == StepOutcome::Fault {
            return Dispatch::Abandon;
        }
        process.advance_line();
        executed += 1;
        thread::sleep(delay);
    }
    if process.has_remaining_work() {
        Dispatch::Requeue
    } else {
        Dispatch::Finished
    }
}
