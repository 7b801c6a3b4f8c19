//! Analysis configuration.
//!
//! A plain record of knobs, built once by the caller and passed by
//! reference into the pipeline. No process-global state. Values come from
//! defaults, an optional flat `key = value` file, and `-c KEY=VALUE`
//! command-line overrides, applied in that order.

use crate::errors::ConfigError;

/// All tunables for parsing, simulation, and CFG construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cap on the size of finite value sets; larger sets widen to ⊤.
    pub set_max: usize,
    /// Number of visits to a block before differing stack slots are
    /// forcibly widened to ⊤ on merge.
    pub widen_threshold: u32,
    /// Hard cap on context clones sharing one entry pc.
    pub max_clones_per_pc: u32,
    /// Hard cap on the total number of blocks in the CFG.
    pub max_blocks: usize,
    /// Drop blocks unreachable from the entry once analysis completes.
    pub remove_unreachable: bool,
    /// Merge runs of adjacent unreachable blocks into single blocks.
    pub merge_unreachable: bool,
    /// Popping an empty stack marks the block malformed instead of
    /// synthesising an input variable.
    pub die_on_empty_pop: bool,
    /// Rewrite jumps with no valid target to THROW/THROWI.
    pub generate_throws: bool,
    /// Specialise JUMPIs with constant conditions: a never-taken branch
    /// loses the jump, an always-taken one becomes a plain JUMP.
    pub mutate_jumps: bool,
    /// Worklist pop budget; negative means unbounded.
    pub max_iterations: i64,
    /// Wall-clock soft limit for the builder loop in seconds; negative
    /// means none.
    pub bailout_seconds: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            set_max: 10,
            widen_threshold: 10,
            max_clones_per_pc: 8,
            max_blocks: 2048,
            remove_unreachable: false,
            merge_unreachable: false,
            die_on_empty_pop: false,
            generate_throws: false,
            mutate_jumps: false,
            max_iterations: -1,
            bailout_seconds: -1,
        }
    }
}

impl Config {
    /// Parse a flat config file: one `key = value` per line, `#` comments,
    /// blank lines ignored.
    pub fn from_file_contents(text: &str) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or(ConfigError::BadLine(idx + 1))?;
            config.set(key.trim(), value.trim())?;
        }
        Ok(config)
    }

    /// Apply a single `KEY=VALUE` override.
    pub fn apply_override(&mut self, pair: &str) -> Result<(), ConfigError> {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| ConfigError::BadValue {
                key: pair.to_string(),
                value: "expected KEY=VALUE".to_string(),
            })?;
        self.set(key.trim(), value.trim())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let bad = || ConfigError::BadValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        match key {
            "set_max" => self.set_max = value.parse().map_err(|_| bad())?,
            "widen_threshold" => self.widen_threshold = value.parse().map_err(|_| bad())?,
            "max_clones_per_pc" => self.max_clones_per_pc = value.parse().map_err(|_| bad())?,
            "max_blocks" => self.max_blocks = value.parse().map_err(|_| bad())?,
            "remove_unreachable" => self.remove_unreachable = parse_bool(value).ok_or_else(bad)?,
            "merge_unreachable" => self.merge_unreachable = parse_bool(value).ok_or_else(bad)?,
            "die_on_empty_pop" => self.die_on_empty_pop = parse_bool(value).ok_or_else(bad)?,
            "generate_throws" => self.generate_throws = parse_bool(value).ok_or_else(bad)?,
            "mutate_jumps" => self.mutate_jumps = parse_bool(value).ok_or_else(bad)?,
            "max_iterations" => self.max_iterations = value.parse().map_err(|_| bad())?,
            "bailout_seconds" => self.bailout_seconds = value.parse().map_err(|_| bad())?,
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
