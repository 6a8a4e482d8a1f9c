//! The instruction executor.
//!
//! One call executes exactly one instruction for the process's current
//! line: the next user-program instruction if any remain, otherwise a
//! randomly generated one. The executor never advances `current_line`;
//! the worker dispatch loop owns that.
//!
//! Every instruction leaves one formatted line in the process log at the
//! current line index: `(TIMESTAMP) Core: C "body"`. A memory access
//! outside `[mem_per_frame, memory_size)` shuts the process down with a
//! final violation line; the worker abandons it on the spot.

use std::thread;
use std::time::Duration;

use csopesy_lib::{clock, rng};
use csopesy_mm::Pid;

use crate::instruction::{Instruction, WriteSrc};
use crate::process::{ProcBody, Process, MAX_DECLARED_VARS};
use crate::system::System;

/// Fixed duration of a generated SLEEP.
pub const SLEEP_MS: u64 = 100;

/// Iterations of a generated FOR.
const FOR_STEPS: u32 = 3;

/// Largest value the generator hands to DECLARE and WRITE.
const VALUE_MAX: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Ran,
    /// Memory access violation (now or earlier); abandon the process.
    Fault,
}

/// Where an instruction came from; user and generated instructions log a
/// few forms differently.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Origin {
    User,
    Generated,
}

pub fn step(sys: &System, proc: &Process, core_id: u32) -> StepOutcome {
    if proc.is_shutdown() {
        return StepOutcome::Fault;
    }

    let line = proc.current_line() as usize;
    let prefix = format!("({}) Core: {} ", clock::timestamp_now(), core_id);

    // A SLEEP must not hold the body lock while the core naps; it is
    // recorded here and slept after the log line is committed.
    let mut nap: Option<u64> = None;
    let outcome = {
        let mut body = proc.body();
        if body.log.len() <= line {
            body.log.resize(line + 1, String::new());
        }
        match body.program.get(line).cloned() {
            Some(instr) => {
                run_instruction(sys, proc, &mut body, instr, line, &prefix, Origin::User, &mut nap)
            }
            None => run_generated(sys, proc, &mut body, line, &prefix, &mut nap),
        }
    };
    if let Some(ms) = nap {
        thread::sleep(Duration::from_millis(ms));
    }
    outcome
}

#[allow(clippy::too_many_arguments)]
fn run_instruction(
    sys: &System,
    proc: &Process,
    body: &mut ProcBody,
    instr: Instruction,
    line: usize,
    prefix: &str,
    origin: Origin,
    nap: &mut Option<u64>,
) -> StepOutcome {
    let pid = proc.id();
    match instr {
        Instruction::Declare { var, value } => {
            // The variable store lives on page 0; record the token there.
            if let Err(err) = sys.memory.write_token(pid, 0, &format!("({var} {value})")) {
                log::debug!("pid {pid}: page 0 unavailable for DECLARE: {err}");
            }
            body.variables.insert(var.clone(), value);
            set_log(body, line, prefix, &format!("DECLARE {var} = {value}"));
        }

        Instruction::Add { dst, a, b } => {
            if origin == Origin::Generated {
                touch_variable_page(sys, pid);
            }
            let va = value_of(body, &a);
            let vb = value_of(body, &b);
            let res = va.saturating_add(vb);
            body.variables.insert(dst, res);
            set_log(body, line, prefix, &format!("ADD {a}({va}) + {b}({vb}) = {res}"));
        }

        Instruction::Subtract { dst, a, b } => {
            if origin == Origin::Generated {
                touch_variable_page(sys, pid);
            }
            let va = value_of(body, &a);
            let vb = value_of(body, &b);
            let res = va.saturating_sub(vb);
            body.variables.insert(dst, res);
            set_log(
                body,
                line,
                prefix,
                &format!("SUBTRACT {a}({va}) - {b}({vb}) = {res}"),
            );
        }

        Instruction::Print { var } => {
            if origin == Origin::Generated {
                touch_variable_page(sys, pid);
            }
            let value = value_of(body, &var);
            let text = match origin {
                Origin::User => format!("PRINT(\"Result: \" + {var}) = {value}"),
                Origin::Generated => format!("PRINT {var} = {value}"),
            };
            set_log(body, line, prefix, &text);
        }

        Instruction::Write { addr, src } => {
            if out_of_bounds(sys, proc, addr) {
                return violation(proc, body, line, prefix, addr);
            }
            let value = match src {
                WriteSrc::Literal(v) => v,
                WriteSrc::Var(name) => value_of(body, &name),
            };
            let key = format_addr(addr);
            let page = page_of(sys, proc, addr);
            let loaded = sys
                .memory
                .write_token(pid, page, &format!("({key} {value})"))
                .is_ok();
            let text = match origin {
                Origin::User => {
                    body.variables.insert(key.clone(), value);
                    format!("WRITE {key} {value}")
                }
                Origin::Generated => {
                    if loaded {
                        body.variables.insert(key.clone(), value);
                    }
                    format!("WRITE {key} {value} ({})", page_status(page, loaded))
                }
            };
            set_log(body, line, prefix, &text);
        }

        Instruction::Read { var, addr } => {
            if out_of_bounds(sys, proc, addr) {
                return violation(proc, body, line, prefix, addr);
            }
            let key = format_addr(addr);
            let page = page_of(sys, proc, addr);
            let loaded = sys.memory.resolve(pid, page).is_ok();
            let value = value_of(body, &key);
            body.variables.insert(var.clone(), value);
            let text = match origin {
                Origin::User => format!(
                    "READ {var} = {value} from {key} ({})",
                    if loaded { "loaded" } else { "not loaded" }
                ),
                Origin::Generated => {
                    format!("READ {var} = {value} from {key} ({})", page_status(page, loaded))
                }
            };
            set_log(body, line, prefix, &text);
        }

        Instruction::Sleep { ms } => {
            *nap = Some(ms);
            set_log(body, line, prefix, &format!("SLEPT for {ms}ms"));
        }

        Instruction::For { var, count } => {
            let mut text = format!("FOR loop on {var}: ");
            for i in 1..=count {
                let slot = body.variables.entry(var.clone()).or_insert(0);
                *slot = slot.saturating_add(1);
                text.push_str(&format!("[{i}]={} ", *slot));
            }
            set_log(body, line, prefix, &text);
        }
    }
    StepOutcome::Ran
}

/// Pick and run one synthetic instruction.
///
/// Draws uniformly over the seven opcodes; DECLARE is forced while the
/// process has no variables, and ADD/SUBTRACT degrade to a FOR loop when
/// fewer than two variables exist.
fn run_generated(
    sys: &System,
    proc: &Process,
    body: &mut ProcBody,
    line: usize,
    prefix: &str,
    nap: &mut Option<u64>,
) -> StepOutcome {
    let declared = body.declared.len();
    let cmd = if declared == 0 { 1 } else { rng::range_u64(0, 6) };

    let instr = match cmd {
        1 => {
            if declared >= MAX_DECLARED_VARS {
                set_log(body, line, prefix, "DECLARE ignored");
                return StepOutcome::Ran;
            }
            let var = format!("v{declared}");
            body.declared.push(var.clone());
            Instruction::Declare {
                var,
                value: rng::range_u64(1, VALUE_MAX) as u16,
            }
        }
        0 => Instruction::Print {
            var: pick_declared(body),
        },
        2 | 3 if declared >= 2 => {
            let a = pick_declared(body);
            let b = pick_declared(body);
            let dst = format!("res{line}");
            if cmd == 2 {
                Instruction::Add { dst, a, b }
            } else {
                Instruction::Subtract { dst, a, b }
            }
        }
        4 => Instruction::Sleep { ms: SLEEP_MS },
        5 => Instruction::Read {
            var: pick_declared(body),
            addr: random_data_addr(sys, proc),
        },
        6 => Instruction::Write {
            addr: random_data_addr(sys, proc),
            src: WriteSrc::Literal(rng::range_u64(1, VALUE_MAX) as u16),
        },
        // ADD/SUBTRACT drawn with too few operands.
        _ => Instruction::For {
            var: pick_declared(body),
            count: FOR_STEPS,
        },
    };

    run_instruction(sys, proc, body, instr, line, prefix, Origin::Generated, nap)
}

fn pick_declared(body: &ProcBody) -> String {
    rng::with_thread_rng(|r| r.pick(&body.declared)).clone()
}

/// Uniform data address: anywhere in the process space past the reserved
/// first page.
fn random_data_addr(sys: &System, proc: &Process) -> u64 {
    let lo = sys.config.mem_per_frame;
    let hi = (proc.memory_size() - 1).max(lo);
    rng::range_u64(lo, hi)
}

/// Generated PRINT/ADD/SUBTRACT touch the variable store before reading
/// it, like the instructions that mutate it do. A failed resolve only
/// rates a diagnostic; the instruction still runs on the variable map.
fn touch_variable_page(sys: &System, pid: Pid) {
    if let Err(err) = sys.memory.resolve(pid, 0) {
        log::debug!("pid {pid}: page 0 unavailable: {err}");
    }
}

fn out_of_bounds(sys: &System, proc: &Process, addr: u64) -> bool {
    addr < sys.config.mem_per_frame || addr >= proc.memory_size()
}

fn violation(
    proc: &Process,
    body: &mut ProcBody,
    line: usize,
    prefix: &str,
    addr: u64,
) -> StepOutcome {
    let reason = format!("Memory access violation at {}", format_addr(addr));
    body.log[line] = format!("{prefix}\"{reason}\"");
    proc.mark_shutdown(body, reason);
    StepOutcome::Fault
}

fn value_of(body: &ProcBody, name: &str) -> u16 {
    body.variables.get(name).copied().unwrap_or(0)
}

fn set_log(body: &mut ProcBody, line: usize, prefix: &str, text: &str) {
    body.log[line] = format!("{prefix}\"{text}\"");
}

fn format_addr(addr: u64) -> String {
    format!("0x{addr:X}")
}

fn page_of(sys: &System, proc: &Process, addr: u64) -> usize {
    let pages = (proc.memory_size() / sys.config.mem_per_frame) as usize;
    ((addr / sys.config.mem_per_frame) as usize).min(pages.saturating_sub(1))
}

fn page_status(page: usize, loaded: bool) -> String {
    if loaded {
        format!("Page {page} loaded")
    } else {
        format!("Page {page} not loaded - memory full")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{system, test_config};

    /// Run one instruction and advance, like the dispatch loop does.
    fn step_and_advance(sys: &System, proc: &Process) -> StepOutcome {
        let outcome = step(sys, proc, 1);
        if outcome == StepOutcome::Ran {
            proc.advance_line();
        }
        outcome
    }

    #[test]
    fn custom_program_logs_match_the_canonical_forms() {
        let (sys, _files) = system(test_config());
        let proc = sys
            .create_process(
                "p",
                Some(256),
                Some("DECLARE A 1; ADD B A A; PRINT(\"Result: \" + B)"),
            )
            .unwrap();

        for _ in 0..3 {
            assert_eq!(step_and_advance(&sys, &proc), StepOutcome::Ran);
        }

        let body = proc.body();
        assert!(body.log[0].ends_with("\"DECLARE A = 1\""), "{}", body.log[0]);
        assert!(
            body.log[1].ends_with("\"ADD A(1) + A(1) = 2\""),
            "{}",
            body.log[1]
        );
        assert!(
            body.log[2].ends_with("\"PRINT(\"Result: \" + B) = 2\""),
            "{}",
            body.log[2]
        );
        assert_eq!(body.variables.get("B"), Some(&2));
    }

    #[test]
    fn arithmetic_saturates_at_the_u16_bounds() {
        let (sys, _files) = system(test_config());
        let proc = sys
            .create_process(
                "p",
                Some(256),
                Some("DECLARE hi 65535; DECLARE lo 1; ADD s hi hi; SUBTRACT d lo hi"),
            )
            .unwrap();
        for _ in 0..4 {
            step_and_advance(&sys, &proc);
        }
        let body = proc.body();
        assert_eq!(body.variables.get("s"), Some(&65535));
        assert_eq!(body.variables.get("d"), Some(&0));
    }

    #[test]
    fn write_then_read_round_trips_through_eviction() {
        // Single frame: the written page is evicted by the read of another
        // page and must come back from the backing store intact.
        let mut cfg = test_config();
        cfg.max_overall_mem = 64;
        cfg.mem_per_frame = 64;
        let (sys, _files) = system(cfg);
        let proc = sys
            .create_process(
                "p",
                Some(256),
                Some("WRITE 0x40 123; READ a 0x80; READ x 0x40"),
            )
            .unwrap();
        for _ in 0..3 {
            assert_eq!(step_and_advance(&sys, &proc), StepOutcome::Ran);
        }
        let body = proc.body();
        assert_eq!(body.variables.get("x"), Some(&123));
        assert!(sys.memory.page_outs() >= 1);
    }

    #[test]
    fn write_accepts_a_variable_source() {
        let (sys, _files) = system(test_config());
        let proc = sys
            .create_process("p", Some(256), Some("DECLARE v 9; WRITE 0x40 v; READ out 0x40"))
            .unwrap();
        for _ in 0..3 {
            step_and_advance(&sys, &proc);
        }
        assert_eq!(proc.body().variables.get("out"), Some(&9));
    }

    #[test]
    fn out_of_bounds_write_shuts_the_process_down_once() {
        let (sys, _files) = system(test_config());
        let proc = sys
            .create_process("p", Some(128), Some("WRITE 0x100 5"))
            .unwrap();

        assert_eq!(step(&sys, &proc, 1), StepOutcome::Fault);
        assert!(proc.is_shutdown());
        assert!(!proc.is_finished());
        assert_eq!(proc.current_line(), 0);
        {
            let body = proc.body();
            assert_eq!(
                body.shutdown_reason.as_deref(),
                Some("Memory access violation at 0x100")
            );
            assert_eq!(body.log.len(), 1);
            assert!(body.log[0].contains("Memory access violation at 0x100"));
        }

        // A shutdown process never executes again and logs nothing more.
        assert_eq!(step(&sys, &proc, 1), StepOutcome::Fault);
        assert_eq!(proc.body().log.len(), 1);
    }

    #[test]
    fn reads_below_the_reserved_page_fault() {
        let (sys, _files) = system(test_config());
        let proc = sys
            .create_process("p", Some(256), Some("READ v 0x10"))
            .unwrap();
        assert_eq!(step(&sys, &proc, 1), StepOutcome::Fault);
        assert_eq!(
            proc.body().shutdown_reason.as_deref(),
            Some("Memory access violation at 0x10")
        );
    }

    #[test]
    fn generated_lines_always_log_and_respect_the_declare_cap() {
        csopesy_lib::rng::seed_thread_rng(0xC0FFEE);
        let (sys, _files) = system(test_config());
        let proc = sys.create_process("p", Some(1024), None).unwrap();

        for line in 0..proc.total_line() {
            let outcome = step_and_advance(&sys, &proc);
            assert_eq!(outcome, StepOutcome::Ran, "line {line} faulted");
        }

        let body = proc.body();
        assert_eq!(body.log.len(), proc.total_line() as usize);
        assert!(body.log.iter().all(|l| l.contains("Core: 1 \"")));
        assert!(body.declared.len() <= MAX_DECLARED_VARS);
        // The first generated instruction is always a DECLARE.
        assert!(body.log[0].contains("DECLARE v0 = "));
    }

    #[test]
    fn declares_beyond_the_cap_are_ignored() {
        let (sys, _files) = system(test_config());
        let proc = sys.create_process("p", Some(1024), None).unwrap();

        // Start at the cap so the very next DECLARE draw must be ignored.
        {
            let mut body = proc.body();
            for i in 0..MAX_DECLARED_VARS {
                let var = format!("v{i}");
                body.variables.insert(var.clone(), 1);
                body.declared.push(var);
            }
        }

        csopesy_lib::rng::seed_thread_rng(7);
        let mut saw_ignored = false;
        for _ in 0..300 {
            step_and_advance(&sys, &proc);
            if proc.body().log.last().is_some_and(|l| l.contains("DECLARE ignored")) {
                saw_ignored = true;
                break;
            }
        }

        // 300 draws over 7 opcodes cannot realistically miss DECLARE.
        assert!(saw_ignored);
        let body = proc.body();
        assert_eq!(body.declared.len(), MAX_DECLARED_VARS);
        assert!(!body.log.iter().any(|l| l.contains("DECLARE v32")));
    }
}
