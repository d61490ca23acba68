use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session_options::{LogLevel, DEFAULT_PROFILE_OUTPUT_PATH_PREFIX};

/// Execution provider selection in a [`SessionConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Whatever the runtime registers by default
    #[default]
    Default,
    /// CPU, with the arena allocator unless disabled
    Cpu {
        #[serde(default = "default_use_arena")]
        use_arena: bool,
    },
    /// CUDA on the given device, falling back to CPU
    Cuda {
        #[serde(default)]
        device_id: i32,
    },
}

fn default_use_arena() -> bool {
    true
}

/// Serializable session options
///
/// Every field defaults to the native runtime default, so a config file only needs to name
/// the values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub sequential_execution: bool,
    pub memory_pattern: bool,
    pub cpu_mem_arena: bool,
    pub profiling: bool,
    pub profile_output_path_prefix: String,
    pub log_id: String,
    pub log_verbosity_level: LogLevel,
    /// 0 = one thread per available core
    pub thread_pool_size: i32,
    pub graph_optimization_level: u32,
    pub execution_provider: ProviderConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sequential_execution: true,
            memory_pattern: true,
            cpu_mem_arena: true,
            profiling: false,
            profile_output_path_prefix: DEFAULT_PROFILE_OUTPUT_PATH_PREFIX.to_string(),
            log_id: String::new(),
            log_verbosity_level: LogLevel::Verbose,
            thread_pool_size: 0,
            graph_optimization_level: 1,
            execution_provider: ProviderConfig::Default,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading session config from {}", path.display());
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
