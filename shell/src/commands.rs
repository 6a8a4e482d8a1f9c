//! Command parsing and dispatch.

use std::fs;
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use csopesy_core::{Config, Process, Runtime, System};
use csopesy_mm::backing_store::BACKING_STORE_FILE;

use crate::render;

const CONFIG_FILE: &str = "config.txt";
const REPORT_FILE: &str = "csopesy-log.txt";

enum Flow {
    Continue,
    Exit,
}

pub struct Shell {
    runtime: Option<Runtime>,
}

impl Shell {
    pub fn new() -> Self {
        Self { runtime: None }
    }

    pub fn run(&mut self) -> Result<()> {
        render::banner();
        while let Some(line) = prompt_line()? {
            if let Flow::Exit = self.dispatch(line.trim())? {
                break;
            }
        }
        if let Some(mut runtime) = self.runtime.take() {
            if runtime.generator_running() {
                println!("Stopping scheduler...");
                runtime.stop_generator();
            }
            runtime.shutdown();
        }
        println!("Exiting CSOPESY command line.");
        Ok(())
    }

    fn dispatch(&mut self, line: &str) -> Result<Flow> {
        match line {
            "" => {}
            "initialize" => self.cmd_initialize()?,
            "scheduler-start" => self.cmd_scheduler_start()?,
            "scheduler-stop" => self.cmd_scheduler_stop(),
            "report-util" => self.cmd_report_util(),
            "process-smi" => self.cmd_process_smi(),
            "vmstats" => self.cmd_vmstats(),
            "check" => self.cmd_check(),
            "backing" => self.cmd_backing(),
            "clear" => {
                render::clear_screen();
                render::banner();
            }
            "exit" => return Ok(Flow::Exit),
            _ if line.starts_with("screen") => self.cmd_screen(line)?,
            _ => println!("Unknown command."),
        }
        Ok(Flow::Continue)
    }

    fn cmd_initialize(&mut self) -> Result<()> {
        let config = match Config::load(CONFIG_FILE) {
            Ok(config) => config,
            Err(err) => {
                println!("Failed to load system configuration: {err}");
                return Ok(());
            }
        };

        if let Some(old) = self.runtime.take() {
            println!("Reinitializing system...");
            old.shutdown();
        }

        print!("{}", render::config_summary(&config));
        match Runtime::start(config, BACKING_STORE_FILE) {
            Ok(runtime) => {
                log::info!(
                    "started {} worker cores ({} policy)",
                    runtime.system().config.num_cpu,
                    runtime.system().config.scheduler.as_str()
                );
                print!("{}", render::frames_dump(runtime.system()));
                println!("System config loaded and CPU threads started.");
                self.runtime = Some(runtime);
            }
            Err(err) => println!("Failed to start CPU threads: {err}"),
        }
        Ok(())
    }

    fn cmd_scheduler_start(&mut self) -> Result<()> {
        let Some(runtime) = self.runtime.as_mut() else {
            return Ok(uninitialized());
        };
        if runtime.start_generator()? {
            println!("Scheduler is running!");
        } else {
            println!("Scheduler is already running!");
        }
        Ok(())
    }

    fn cmd_scheduler_stop(&mut self) {
        let Some(runtime) = self.runtime.as_mut() else {
            return uninitialized();
        };
        if runtime.generator_running() {
            println!("Stopping scheduler...");
            runtime.stop_generator();
        } else {
            println!("Scheduler is not running.");
        }
    }

    fn cmd_report_util(&self) {
        let Some(runtime) = self.runtime.as_ref() else {
            return uninitialized();
        };
        let report = render::process_listing(runtime.system(), false);
        match fs::write(REPORT_FILE, report) {
            Ok(()) => println!("Report saved to {REPORT_FILE}"),
            Err(err) => println!("Failed to create log file {REPORT_FILE}: {err}"),
        }
    }

    fn cmd_process_smi(&self) {
        match self.runtime.as_ref() {
            Some(runtime) => print!("{}", render::system_stats(runtime.system())),
            None => uninitialized(),
        }
    }

    fn cmd_vmstats(&self) {
        match self.runtime.as_ref() {
            Some(runtime) => print!("{}", render::memory_summary(runtime.system())),
            None => uninitialized(),
        }
    }

    fn cmd_check(&self) {
        match self.runtime.as_ref() {
            Some(runtime) => print!("{}", render::frames_dump(runtime.system())),
            None => uninitialized(),
        }
    }

    fn cmd_backing(&self) {
        match self.runtime.as_ref() {
            Some(runtime) => {
                print!("{}", render::backing_dump(runtime.system()));
                print!("{}", render::frames_dump(runtime.system()));
            }
            None => uninitialized(),
        }
    }

    fn cmd_screen(&mut self, line: &str) -> Result<()> {
        let Some(runtime) = self.runtime.as_ref() else {
            return Ok(uninitialized());
        };
        let system = Arc::clone(runtime.system());
        let tokens: Vec<&str> = line.split_whitespace().collect();

        match tokens.get(1).copied() {
            Some("-ls") => print!("{}", render::process_listing(&system, true)),

            Some("-s") if tokens.len() >= 3 => {
                let name = tokens[2];
                // A trailing size overrides the random memory draw.
                let mem = tokens.get(3).and_then(|t| t.parse::<u64>().ok());
                match system.create_process(name, mem, None) {
                    Ok(process) => self.enter_process_view(&system, &process)?,
                    Err(err) => println!("Error: {err}"),
                }
            }

            Some("-c") if tokens.len() >= 4 => {
                let name = tokens[2];
                let mem = tokens[3].parse::<u64>().unwrap_or(0);
                let Some(program) = quoted_section(line) else {
                    println!("[screen] Invalid usage.");
                    return Ok(());
                };
                match system.create_process(name, Some(mem), Some(program)) {
                    Ok(process) => self.enter_process_view(&system, &process)?,
                    Err(err) => {
                        println!("Error: {err}");
                        render::print_instruction_help();
                    }
                }
            }

            Some("-r") if tokens.len() >= 3 => {
                let name = tokens[2];
                match system.processes.get(name) {
                    Some(process) => self.enter_process_view(&system, &process)?,
                    None => println!("Process {name} not found."),
                }
            }

            _ => println!("[screen] Invalid usage."),
        }
        Ok(())
    }

    /// Per-process subscreen: details first, then its own command loop.
    fn enter_process_view(&self, system: &Arc<System>, process: &Arc<Process>) -> Result<()> {
        print!("{}", render::process_details(system, process));
        while let Some(line) = prompt_line()? {
            match line.trim() {
                "exit" => break,
                "clear" => {
                    render::clear_screen();
                    print!("{}", render::process_details(system, process));
                }
                "process-smi" => print!("{}", render::process_smi_view(process)),
                _ => println!("Unknown command inside process view."),
            }
        }
        render::banner();
        Ok(())
    }
}

fn uninitialized() {
    println!("Please initialize first.");
}

/// Read one line after the standard prompt; `None` on EOF.
fn prompt_line() -> Result<Option<String>> {
    print!("Enter a command: ");
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

/// The text between the first and last double quote of the line.
fn quoted_section(line: &str) -> Option<&str> {
    let first = line.find('"')?;
    let last = line.rfind('"')?;
    if last <= first {
        return None;
    }
    Some(&line[first + 1..last])
}
