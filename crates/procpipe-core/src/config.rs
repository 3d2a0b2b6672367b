use crate::error::ProcessError;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const MAX_FLUSH_THRESHOLD: usize = 16 * 1024 * 1024;
const MAX_FLUSH_LINGER_MS: u64 = 1_000;

/// Tuning for the loops that copy bytes between a child and its channels
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PumpConfig {
    /// Maximum number of bytes read from the child per iteration
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Bytes accumulated before the pump hands them to the channel.
    /// 0 flushes after every chunk.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    /// How long buffered bytes below the threshold may wait for more output
    /// before they are flushed anyway (in milliseconds)
    #[serde(default = "default_flush_linger_ms")]
    pub flush_linger_ms: u64,

    /// Number of flushed chunks a channel holds before writers are suspended
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            flush_threshold: default_flush_threshold(),
            flush_linger_ms: default_flush_linger_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl PumpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Larger reads, flushed in batches. Suited to bulk binary output.
    pub fn buffered() -> Self {
        Self {
            chunk_size: 8 * 1024,
            flush_threshold: 64 * 1024,
            flush_linger_ms: 20,
            channel_capacity: 8,
        }
    }

    pub fn validate(&self) -> Result<(), ProcessError> {
        if self.chunk_size == 0 {
            return Err(ProcessError::ConfigurationError(
                "chunk_size must be greater than zero".to_string(),
            ));
        }

        if self.channel_capacity == 0 {
            return Err(ProcessError::ConfigurationError(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }

        if self.flush_threshold > MAX_FLUSH_THRESHOLD {
            return Err(ProcessError::ConfigurationError(format!(
                "flush_threshold should not exceed {MAX_FLUSH_THRESHOLD} bytes"
            )));
        }

        if self.flush_linger_ms > MAX_FLUSH_LINGER_MS {
            return Err(ProcessError::ConfigurationError(format!(
                "flush_linger_ms should not exceed {MAX_FLUSH_LINGER_MS}"
            )));
        }

        Ok(())
    }

    pub fn flush_linger(&self) -> Duration {
        Duration::from_millis(self.flush_linger_ms)
    }
}

/// What to run: executable, already-split arguments and environment overrides
#[derive(Default, Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into, strip_option), build_fn(validate = "Self::validate"))]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    pub program: String,
    #[builder(default)]
    #[builder(setter(custom))]
    #[serde(default)]
    pub args: Vec<String>,
    /// Merged over the inherited environment
    #[builder(default)]
    #[builder(setter(custom))]
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[builder(default)]
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Suppress the console window on Windows. Ignored elsewhere.
    #[builder(default)]
    #[serde(default)]
    pub hide_window: bool,
    #[builder(default)]
    #[serde(default)]
    pub pump: PumpConfig,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn builder() -> CommandSpecBuilder {
        CommandSpecBuilder::default()
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<S: ToString, I: IntoIterator<Item = S>>(mut self, iter: I) -> Self {
        self.args.extend(iter.into_iter().map(|s| s.to_string()));
        self
    }

    pub fn validate(&self) -> Result<(), ProcessError> {
        if self.program.trim().is_empty() {
            return Err(ProcessError::ConfigurationError(
                "program must not be empty".to_string(),
            ));
        }
        self.pump.validate()
    }
}

impl CommandSpecBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.args = Some(args);
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());
        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }

    fn validate(&self) -> Result<(), String> {
        match &self.program {
            Some(program) if program.trim().is_empty() => {
                Err("program must not be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

// Default value functions for serde
fn default_chunk_size() -> usize {
    1024
}
fn default_flush_threshold() -> usize {
    0
}
fn default_flush_linger_ms() -> u64 {
    5
}
fn default_channel_capacity() -> usize {
    16
}
