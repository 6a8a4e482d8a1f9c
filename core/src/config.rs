//! System configuration snapshot.
//!
//! Loaded once from a plaintext file of whitespace-separated key/value
//! pairs, validated field by field, then frozen inside the [`System`]
//! context for the lifetime of the run. Every key is required; unknown
//! keys and out-of-range values abort initialisation.
//!
//! [`System`]: crate::system::System

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

/// Memory tunables must be one of these powers of two (bytes).
pub const POW2_MEMORY_SIZES: [u64; 11] = [
    64, 128, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768, 65536,
];

/// Upper bound for the count-valued tunables.
const COUNT_MAX: u64 = 1 << 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPolicy {
    Fcfs,
    Rr,
}

impl SchedulerPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            SchedulerPolicy::Fcfs => "fcfs",
            SchedulerPolicy::Rr => "rr",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub num_cpu: u32,
    pub scheduler: SchedulerPolicy,
    pub quantum_cycles: u64,
    /// Ticks between auto-created processes (one tick approximated as 100 ms).
    pub batch_process_freq: u64,
    pub min_ins: u64,
    pub max_ins: u64,
    /// Milliseconds slept between instructions.
    pub delay_per_exec: u64,
    pub max_overall_mem: u64,
    pub mem_per_frame: u64,
    pub min_mem_per_proc: u64,
    pub max_mem_per_proc: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] io::Error),

    #[error("unknown config key `{0}`")]
    UnknownKey(String),

    #[error("key `{0}` has no value")]
    MissingValue(String),

    #[error("missing required key `{0}`")]
    MissingKey(&'static str),

    #[error("invalid value `{value}` for `{key}`: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("min-ins ({min}) exceeds max-ins ({max})")]
    InstructionBounds { min: u64, max: u64 },

    #[error("min-mem-per-proc ({min}) exceeds max-mem-per-proc ({max})")]
    ProcessMemoryBounds { min: u64, max: u64 },

    #[error("mem-per-frame ({frame}) exceeds max-overall-mem ({total})")]
    FrameExceedsTotal { frame: u64, total: u64 },

    #[error("min-mem-per-proc ({min}) is below mem-per-frame ({frame})")]
    ProcessBelowFrame { min: u64, frame: u64 },
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Parse and validate the key/value text form. Keys may appear in any
    /// order; a repeated key keeps its last value. Every key is required.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut num_cpu = None;
        let mut scheduler = None;
        let mut quantum_cycles = None;
        let mut batch_process_freq = None;
        let mut min_ins = None;
        let mut max_ins = None;
        let mut delay_per_exec = None;
        let mut max_overall_mem = None;
        let mut mem_per_frame = None;
        let mut min_mem_per_proc = None;
        let mut max_mem_per_proc = None;

        let mut words = text.split_whitespace();
        while let Some(key) = words.next() {
            let value = words
                .next()
                .ok_or_else(|| ConfigError::MissingValue(key.to_string()))?;
            match key {
                "num-cpu" => num_cpu = Some(parse_count("num-cpu", value, 1, 128)? as u32),
                "scheduler" => {
                    scheduler = Some(match value {
                        "fcfs" => SchedulerPolicy::Fcfs,
                        "rr" => SchedulerPolicy::Rr,
                        _ => {
                            return Err(ConfigError::InvalidValue {
                                key: "scheduler",
                                value: value.to_string(),
                                reason: "must be `fcfs` or `rr`",
                            });
                        }
                    });
                }
                "quantum-cycles" => {
                    quantum_cycles = Some(parse_count("quantum-cycles", value, 1, COUNT_MAX)?)
                }
                "batch-process-freq" => {
                    batch_process_freq =
                        Some(parse_count("batch-process-freq", value, 1, COUNT_MAX)?)
                }
                "min-ins" => min_ins = Some(parse_count("min-ins", value, 1, COUNT_MAX)?),
                "max-ins" => max_ins = Some(parse_count("max-ins", value, 1, COUNT_MAX)?),
                "delay-per-exec" => {
                    delay_per_exec = Some(parse_count("delay-per-exec", value, 0, COUNT_MAX)?)
                }
                "max-overall-mem" => {
                    max_overall_mem = Some(parse_pow2("max-overall-mem", value)?)
                }
                "mem-per-frame" => mem_per_frame = Some(parse_pow2("mem-per-frame", value)?),
                "min-mem-per-proc" => {
                    min_mem_per_proc = Some(parse_pow2("min-mem-per-proc", value)?)
                }
                "max-mem-per-proc" => {
                    max_mem_per_proc = Some(parse_pow2("max-mem-per-proc", value)?)
                }
                _ => return Err(ConfigError::UnknownKey(key.to_string())),
            }
        }

        let config = Config {
            num_cpu: num_cpu.ok_or(ConfigError::MissingKey("num-cpu"))?,
            scheduler: scheduler.ok_or(ConfigError::MissingKey("scheduler"))?,
            quantum_cycles: quantum_cycles.ok_or(ConfigError::MissingKey("quantum-cycles"))?,
            batch_process_freq: batch_process_freq
                .ok_or(ConfigError::MissingKey("batch-process-freq"))?,
            min_ins: min_ins.ok_or(ConfigError::MissingKey("min-ins"))?,
            max_ins: max_ins.ok_or(ConfigError::MissingKey("max-ins"))?,
            delay_per_exec: delay_per_exec.ok_or(ConfigError::MissingKey("delay-per-exec"))?,
            max_overall_mem: max_overall_mem
                .ok_or(ConfigError::MissingKey("max-overall-mem"))?,
            mem_per_frame: mem_per_frame.ok_or(ConfigError::MissingKey("mem-per-frame"))?,
            min_mem_per_proc: min_mem_per_proc
                .ok_or(ConfigError::MissingKey("min-mem-per-proc"))?,
            max_mem_per_proc: max_mem_per_proc
                .ok_or(ConfigError::MissingKey("max-mem-per-proc"))?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_ins > self.max_ins {
            return Err(ConfigError::InstructionBounds {
                min: self.min_ins,
                max: self.max_ins,
            });
        }
        if self.min_mem_per_proc > self.max_mem_per_proc {
            return Err(ConfigError::ProcessMemoryBounds {
                min: self.min_mem_per_proc,
                max: self.max_mem_per_proc,
            });
        }
        if self.mem_per_frame > self.max_overall_mem {
            return Err(ConfigError::FrameExceedsTotal {
                frame: self.mem_per_frame,
                total: self.max_overall_mem,
            });
        }
        if self.min_mem_per_proc < self.mem_per_frame {
            return Err(ConfigError::ProcessBelowFrame {
                min: self.min_mem_per_proc,
                frame: self.mem_per_frame,
            });
        }
        Ok(())
    }

    /// Number of physical frames the frame table is allocated with.
    pub fn num_frames(&self) -> u64 {
        self.max_overall_mem / self.mem_per_frame
    }

    /// The power-of-two sizes a process may be created with.
    pub fn proc_memory_sizes(&self) -> Vec<u64> {
        POW2_MEMORY_SIZES
            .iter()
            .copied()
            .filter(|&s| (self.min_mem_per_proc..=self.max_mem_per_proc).contains(&s))
            .collect()
    }
}

fn parse_count(key: &'static str, value: &str, lo: u64, hi: u64) -> Result<u64, ConfigError> {
    let parsed: u64 = value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: "not an unsigned integer",
    })?;
    if !(lo..=hi).contains(&parsed) {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "out of range",
        });
    }
    Ok(parsed)
}

fn parse_pow2(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    let parsed: u64 = value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: "not an unsigned integer",
    })?;
    if !POW2_MEMORY_SIZES.contains(&parsed) {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "must be a power of two between 64 and 65536",
        });
    }
    Ok(parsed)
}
