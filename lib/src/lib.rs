//! Shared utilities for the CSOPESY emulator.
//!
//! Everything here is subsystem-neutral: wall-clock timestamp formatting in
//! the fixed report format, and the seedable PRNG used by the instruction
//! generator and the process factory.

pub mod clock;
pub mod rng;

pub use clock::{format_timestamp, timestamp_now};
pub use rng::Xorshift64;
