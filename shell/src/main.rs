//! CSOPESY interactive shell.
//!
//! Reads commands from stdin, drives the emulator [`Runtime`], and renders
//! listings and reports. All emulator semantics live in `csopesy-core`;
//! this binary is parsing and presentation only.
//!
//! [`Runtime`]: csopesy_core::Runtime

mod commands;
mod render;

use anyhow::Result;

use crate::commands::Shell;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    Shell::new().run()
}
