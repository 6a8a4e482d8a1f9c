//! Console rendering: banner, listings, dumps, and reports.
//!
//! Everything here is presentation only; each function reads snapshots
//! from the system and formats text. `process_listing` doubles as the
//! `report-util` file body with colouring switched off.

use std::fmt::Write;
use std::sync::Arc;

use csopesy_core::{Config, Process, System};

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

const RULE: &str = "-----------------------------\n";

pub fn banner() {
    println!(" _____  _____   ____  _____  ______  _______     __");
    println!("/ ____|/ ____| / __ \\|  __ \\|  ____|/ ____\\ \\   / /");
    println!("| |    | (___ | |  | | |__) | |__  | (___  \\ \\_/ /");
    println!("| |     \\___ \\| |  | |  ___/|  __|  \\___ \\  \\   /");
    println!("| |____ ____) | |__| | |    | |____ ____) |  | |");
    println!(" \\_____|_____/ \\____/|_|    |______|_____/   |_|");
    println!("{GREEN}Hello, Welcome to CSOPESY command line!{RESET}");
    println!("{YELLOW}Type 'exit' to quit, 'clear' to clear the screen{RESET}");
}

pub fn clear_screen() {
    print!("\x1b[2J\x1b[1;1H");
}

pub fn print_instruction_help() {
    println!("Allowed forms:");
    println!("  DECLARE <var> <value>");
    println!("  ADD <v1> <v2> <v3>");
    println!("  SUBTRACT <v1> <v2> <v3>");
    println!("  PRINT(\"Result: \" + <var>)");
    println!("  WRITE <0xHEXADDR> <value>");
    println!("  READ <var> <0xHEXADDR>");
}

pub fn config_summary(config: &Config) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\nSystem configuration loaded successfully:");
    let _ = writeln!(out, "--------------------------------------------");
    let _ = writeln!(out, "- num-cpu:            {}", config.num_cpu);
    let _ = writeln!(out, "- scheduler:          {}", config.scheduler.as_str());
    let _ = writeln!(out, "- quantum-cycles:     {}", config.quantum_cycles);
    let _ = writeln!(out, "- batch-process-freq: {}", config.batch_process_freq);
    let _ = writeln!(out, "- min-ins:            {}", config.min_ins);
    let _ = writeln!(out, "- max-ins:            {}", config.max_ins);
    let _ = writeln!(out, "- delay-per-exec:     {}", config.delay_per_exec);
    let _ = writeln!(out, "- max-overall-mem:    {}", config.max_overall_mem);
    let _ = writeln!(out, "- mem-per-frame:      {}", config.mem_per_frame);
    let _ = writeln!(out, "- min-mem-per-proc:   {}", config.min_mem_per_proc);
    let _ = writeln!(out, "- max-mem-per-proc:   {}", config.max_mem_per_proc);
    let _ = writeln!(
        out,
        "Initialized physical memory with {} frames.",
        config.num_frames()
    );
    let _ = writeln!(out, "--------------------------------------------");
    out
}

/// The `screen -ls` body; written verbatim (uncoloured) by `report-util`.
pub fn process_listing(system: &Arc<System>, colored: bool) -> String {
    let (yellow, reset) = if colored { (YELLOW, RESET) } else { ("", "") };
    let processes = system.processes.all();

    let cores_total = system.config.num_cpu as usize;
    let cores_used = system.cores_used();
    let cores_available = cores_total.saturating_sub(cores_used);

    let mut out = String::from(RULE);
    let _ = writeln!(out, "CPU Utilization: {:.2}%", system.cpu_utilization());
    let _ = writeln!(out, "Cores Used:      {cores_used}");
    let _ = writeln!(out, "Cores Available: {cores_available}");
    out.push_str(RULE);

    let _ = writeln!(out, "Running processes:");
    for proc in processes.iter().filter(|p| p.is_live()) {
        let Some(core) = proc.core() else { continue };
        let _ = writeln!(
            out,
            "{}{yellow}  ({}) {reset}Core: {core} {yellow}{} / {}{reset}",
            proc.name(),
            proc.created_at(),
            proc.current_line(),
            proc.total_line()
        );
    }

    let _ = writeln!(out, "\nFinished processes:");
    for proc in processes.iter().filter(|p| p.is_finished()) {
        let finished_at = proc.body().finished_at.clone().unwrap_or_default();
        let _ = writeln!(
            out,
            "{} ({finished_at}) Finished {} / {}",
            proc.name(),
            proc.total_line(),
            proc.total_line()
        );
    }

    let _ = writeln!(out, "\nShutdown processes:");
    for proc in processes.iter().filter(|p| p.is_shutdown()) {
        let body = proc.body();
        let _ = writeln!(
            out,
            "{} ({}) {}",
            proc.name(),
            body.shutdown_at.as_deref().unwrap_or_default(),
            body.shutdown_reason.as_deref().unwrap_or_default()
        );
    }

    out.push_str(RULE);
    out
}

/// `process-smi` at the top level: CPU occupancy plus memory usage.
pub fn system_stats(system: &Arc<System>) -> String {
    let cores_used = system.cores_used();
    let cores_total = system.config.num_cpu;
    let stats = system.vm_stats();
    let mem_pct = if stats.total_bytes > 0 {
        stats.used_bytes as f64 / stats.total_bytes as f64 * 100.0
    } else {
        0.0
    };

    let mut out = String::new();
    let _ = writeln!(
        out,
        "CPU Utilization: {:.2}% ({cores_used} / {cores_total} cores)",
        system.cpu_utilization()
    );
    let _ = writeln!(
        out,
        "Memory Usage:    {} bytes / {} bytes ({mem_pct:.2}%)\n",
        stats.used_bytes, stats.total_bytes
    );

    let _ = writeln!(out, "Running Processes Memory Usage:");
    for proc in system.processes.all() {
        if proc.is_finished() {
            continue;
        }
        let resident = system.memory.resident_pages(proc.id()) as u64;
        let _ = writeln!(
            out,
            "  {}: {} / {} bytes",
            proc.name(),
            resident * system.config.mem_per_frame,
            proc.memory_size()
        );
    }
    out.push('\n');
    out
}

/// `vmstats`: memory, tick, and paging counter summary.
pub fn memory_summary(system: &Arc<System>) -> String {
    let stats = system.vm_stats();
    let mut out = String::new();
    let _ = writeln!(out, "\n[Memory Summary]");
    let _ = writeln!(out, "Total memory     : {} bytes", stats.total_bytes);
    let _ = writeln!(out, "Used  memory     : {} bytes", stats.used_bytes);
    let _ = writeln!(out, "Free  memory     : {} bytes", stats.free_bytes);
    let _ = writeln!(out, "\n[CPU Tick Summary]");
    let _ = writeln!(out, "Active CPU ticks : {}", stats.active_ticks);
    let _ = writeln!(out, "Idle   CPU ticks : {}", stats.idle_ticks);
    let _ = writeln!(out, "Total  CPU ticks : {}", stats.total_ticks);
    let _ = writeln!(out, "\n[Paging Summary]");
    let _ = writeln!(out, "Num paged in     : {}", stats.page_ins);
    let _ = writeln!(out, "Num paged out    : {}", stats.page_outs);
    out.push_str(RULE);
    out
}

/// `check`: the physical frame table.
pub fn frames_dump(system: &Arc<System>) -> String {
    let mut out = String::from("\n[Physical Memory State]\n");
    for (i, frame) in system.memory.frames_snapshot().iter().enumerate() {
        match frame.owner {
            None => {
                let _ = writeln!(out, "Frame {i}: FREE");
            }
            Some(id) => {
                let _ = writeln!(
                    out,
                    "Frame {i}: PID={}, Page={}, Data=\"{}\"",
                    id.pid, id.page, frame.data
                );
            }
        }
    }
    out.push_str(RULE);
    out
}

/// `backing`: contents of the backing store.
pub fn backing_dump(system: &Arc<System>) -> String {
    let mut out = String::from("\n[Backing Store Contents]\n");
    for (id, data) in system.memory.backing_snapshot() {
        let _ = writeln!(out, "Process {}, Page {} => \"{data}\"", id.pid, id.page);
    }
    out.push_str(RULE);
    out
}

/// Header of the per-process subscreen.
pub fn process_details(system: &Arc<System>, process: &Arc<Process>) -> String {
    let mut out = String::new();

    if process.is_shutdown() {
        let body = process.body();
        let _ = writeln!(
            out,
            "Process {} shutdown due to memory access violation error that occurred at {}. {} invalid.",
            process.name(),
            body.shutdown_at.as_deref().unwrap_or_default(),
            body.shutdown_reason.as_deref().unwrap_or_default()
        );
        return out;
    }

    let _ = writeln!(out, "Process: {}", process.name());
    let _ = writeln!(out, "ID: {}", process.id());
    let _ = writeln!(out, "Memory Size: {} bytes", process.memory_size());
    let _ = writeln!(
        out,
        "Instruction: {} of {}",
        process.current_line(),
        process.total_line()
    );
    let _ = writeln!(out, "Created: {}", process.created_at());

    if let Some(entries) = system.memory.page_table_snapshot(process.id()) {
        let _ = writeln!(out, "Page Table ({} pages):", entries.len());
        for (page, entry) in entries.iter().enumerate() {
            let _ = writeln!(
                out,
                "  Page {page}: inMemory={}, frameIndex={}",
                entry.in_memory(),
                entry.frame.map(|i| i as i64).unwrap_or(-1)
            );
        }
    }

    let _ = writeln!(out, "{YELLOW}Type 'exit' to quit, 'clear' to clear the screen{RESET}");
    out
}

/// `process-smi` inside the subscreen: identity plus the executed log lines.
pub fn process_smi_view(process: &Arc<Process>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\nprocess_name: {}", process.name());
    let _ = writeln!(out, "ID: {}", process.id());
    let _ = writeln!(out, "Logs:");
    let _ = writeln!(
        out,
        "({}) Core: {}",
        process.created_at(),
        process.core().map(|c| c as i64).unwrap_or(-1)
    );
    let _ = writeln!(out, "\nCurrent instruction line {}", process.current_line());
    let _ = writeln!(out, "Lines of code: {}", process.total_line());

    if process.is_finished() {
        let _ = writeln!(out, "\nStatus: finished");
    } else {
        let body = process.body();
        let executed = (process.current_line() as usize).min(body.log.len());
        for line in &body.log[..executed] {
            let _ = writeln!(out, "  - {line}");
        }
    }
    out.push('\n');
    out
}
