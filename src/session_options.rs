use std::fmt;
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::api::{NativeApi, OptionsPtr};
use crate::config::{ProviderConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::platform::{self, HostProbe, PlatformProbe};
use crate::runtime;

/// Default prefix for profiling output files, matching the native default
pub const DEFAULT_PROFILE_OUTPUT_PATH_PREFIX: &str = "onnxruntime_profile_";

/// Log verbosity for session logs
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Verbose,
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    /// Native `OrtLoggingLevel` value
    pub fn as_raw(self) -> u32 {
        match self {
            LogLevel::Verbose => 0,
            LogLevel::Info => 1,
            LogLevel::Warning => 2,
            LogLevel::Error => 3,
            LogLevel::Fatal => 4,
        }
    }
}

/// Named graph optimization levels accepted by the native runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GraphOptimizationLevel {
    /// Disable all optimizations
    DisableAll,
    /// Constant folding and redundant node elimination
    #[default]
    Basic,
    /// Basic plus layout and fusion optimizations
    All,
}

impl From<GraphOptimizationLevel> for u32 {
    fn from(level: GraphOptimizationLevel) -> u32 {
        match level {
            GraphOptimizationLevel::DisableAll => 0,
            GraphOptimizationLevel::Basic => 1,
            GraphOptimizationLevel::All => 2,
        }
    }
}

/// An execution provider appended to the options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Cpu { use_arena: bool },
    Cuda { device_id: i32 },
}

/// Options used to create an inference session
///
/// Owns a native `OrtSessionOptions` handle. Each setter pushes its value to the native handle
/// first and only then updates the locally cached value, so the getters always report the last
/// value the runtime accepted. The handle is released by [`SessionOptions::release`] or on drop,
/// whichever comes first.
pub struct SessionOptions {
    api: Arc<dyn NativeApi>,
    ptr: Option<OptionsPtr>,
    sequential_execution: bool,
    memory_pattern: bool,
    profiling: bool,
    profile_output_path_prefix: String,
    cpu_mem_arena: bool,
    log_id: String,
    log_verbosity_level: LogLevel,
    thread_pool_size: i32,
    graph_optimization_level: u32,
    providers: Vec<ExecutionProvider>,
}

// The handle is exclusively owned and every mutation goes through `&mut self`.
unsafe impl Send for SessionOptions {}

impl SessionOptions {
    /// Create options with the runtime defaults, using the process-wide runtime
    pub fn new() -> Result<Self> {
        Self::with_api(runtime::default_api()?)
    }

    /// Create options with the runtime defaults on an explicit native API
    pub fn with_api(api: Arc<dyn NativeApi>) -> Result<Self> {
        let ptr = api.create_session_options()?;
        debug!("Created session options {:p}", ptr);

        Ok(Self {
            api,
            ptr: Some(ptr),
            sequential_execution: true,
            memory_pattern: true,
            profiling: false,
            profile_output_path_prefix: DEFAULT_PROFILE_OUTPUT_PATH_PREFIX.to_string(),
            cpu_mem_arena: true,
            log_id: String::new(),
            log_verbosity_level: LogLevel::Verbose,
            thread_pool_size: 0,
            graph_optimization_level: 1,
            providers: Vec::new(),
        })
    }

    /// Options for CPU execution with the arena allocator
    pub fn with_cpu_provider() -> Result<Self> {
        platform::check_libc_version(&HostProbe)?;
        Self::cpu_unchecked(runtime::default_api()?, true)
    }

    /// Options for CUDA execution on device 0, falling back to CPU
    pub fn with_cuda_provider() -> Result<Self> {
        Self::with_cuda_device(0)
    }

    /// Options for CUDA execution on `device_id`, falling back to CPU
    ///
    /// Fails with a prerequisite error if the host glibc is too old or the CUDA libraries
    /// cannot be loaded. No native handle is created in that case.
    pub fn with_cuda_device(device_id: i32) -> Result<Self> {
        check_cuda_prerequisites(&HostProbe)?;
        Self::cuda_unchecked(runtime::default_api()?, device_id)
    }

    /// [`SessionOptions::with_cpu_provider`] with an explicit API and platform probe
    pub fn cpu_provider_with(api: Arc<dyn NativeApi>, probe: &dyn PlatformProbe) -> Result<Self> {
        platform::check_libc_version(probe)?;
        Self::cpu_unchecked(api, true)
    }

    /// [`SessionOptions::with_cuda_device`] with an explicit API and platform probe
    pub fn cuda_provider_with(
        api: Arc<dyn NativeApi>,
        probe: &dyn PlatformProbe,
        device_id: i32,
    ) -> Result<Self> {
        check_cuda_prerequisites(probe)?;
        Self::cuda_unchecked(api, device_id)
    }

    fn cpu_unchecked(api: Arc<dyn NativeApi>, use_arena: bool) -> Result<Self> {
        info!("Configuring session options for CPU execution (arena: {})", use_arena);
        let mut options = Self::with_api(api)?;
        options.append_cpu_provider(use_arena)?;
        Ok(options)
    }

    fn cuda_unchecked(api: Arc<dyn NativeApi>, device_id: i32) -> Result<Self> {
        info!("Configuring session options for CUDA execution on device {}", device_id);
        // On error `options` is dropped here, which releases the handle
        let mut options = Self::with_api(api)?;
        options.append_cuda_provider(device_id)?;
        options.append_cpu_provider(true)?;
        Ok(options)
    }

    /// Build options from a config, choosing the factory by its execution provider
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let mut options = match config.execution_provider {
            ProviderConfig::Default => Self::new()?,
            ProviderConfig::Cpu { use_arena } => {
                platform::check_libc_version(&HostProbe)?;
                Self::cpu_unchecked(runtime::default_api()?, use_arena)?
            }
            ProviderConfig::Cuda { device_id } => Self::with_cuda_device(device_id)?,
        };
        options.apply_config(config)?;
        Ok(options)
    }

    /// [`SessionOptions::from_config`] with an explicit API and platform probe
    pub fn from_config_with(
        api: Arc<dyn NativeApi>,
        probe: &dyn PlatformProbe,
        config: &SessionConfig,
    ) -> Result<Self> {
        let mut options = match config.execution_provider {
            ProviderConfig::Default => Self::with_api(api)?,
            ProviderConfig::Cpu { use_arena } => {
                platform::check_libc_version(probe)?;
                Self::cpu_unchecked(api, use_arena)?
            }
            ProviderConfig::Cuda { device_id } => Self::cuda_provider_with(api, probe, device_id)?,
        };
        options.apply_config(config)?;
        Ok(options)
    }

    /// Push every value in `config` that differs from the current state
    ///
    /// The profiling prefix is set before profiling is toggled so that enabling profiling uses
    /// the configured prefix. If profiling is already running under a different prefix it is
    /// restarted. The provider choice is ignored; it only matters at construction.
    pub fn apply_config(&mut self, config: &SessionConfig) -> Result<()> {
        if self.profiling && config.profile_output_path_prefix != self.profile_output_path_prefix {
            // The runtime only reads the prefix when profiling is enabled
            self.set_profiling(false)?;
        }
        self.set_profile_output_path_prefix(config.profile_output_path_prefix.clone());
        self.set_sequential_execution(config.sequential_execution)?;
        self.set_memory_pattern(config.memory_pattern)?;
        self.set_cpu_mem_arena(config.cpu_mem_arena)?;
        if config.log_id != self.log_id {
            self.set_log_id(config.log_id.clone())?;
        }
        if config.log_verbosity_level != self.log_verbosity_level {
            self.set_log_verbosity_level(config.log_verbosity_level)?;
        }
        if config.thread_pool_size != self.thread_pool_size {
            self.set_thread_pool_size(config.thread_pool_size)?;
        }
        if config.graph_optimization_level != self.graph_optimization_level {
            self.set_graph_optimization_level(config.graph_optimization_level)?;
        }
        self.set_profiling(config.profiling)
    }

    /// Snapshot of the cached state as a config
    ///
    /// The provider lists built by the factories (none, a single CPU provider, or CUDA followed
    /// by CPU with the arena) map back exactly. Any other list appended by hand is reduced to
    /// its first CUDA provider, or else its first CPU provider.
    pub fn to_config(&self) -> SessionConfig {
        SessionConfig {
            sequential_execution: self.sequential_execution,
            memory_pattern: self.memory_pattern,
            cpu_mem_arena: self.cpu_mem_arena,
            profiling: self.profiling,
            profile_output_path_prefix: self.profile_output_path_prefix.clone(),
            log_id: self.log_id.clone(),
            log_verbosity_level: self.log_verbosity_level,
            thread_pool_size: self.thread_pool_size,
            graph_optimization_level: self.graph_optimization_level,
            execution_provider: provider_config_for(&self.providers),
        }
    }

    /// Raw native handle, for building sessions on top of these options
    pub fn as_ptr(&self) -> Result<OptionsPtr> {
        self.ptr.ok_or(Error::Released)
    }

    /// Whether the native handle has been released
    pub fn is_released(&self) -> bool {
        self.ptr.is_none()
    }

    /// Release the native handle. Calling this again does nothing.
    pub fn release(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            debug!("Releasing session options {:p}", ptr);
            unsafe { self.api.release_session_options(ptr) };
        }
    }

    /// Whether sequential execution is enabled. Default is `true`.
    pub fn sequential_execution(&self) -> bool {
        self.sequential_execution
    }

    /// Enable or disable sequential execution
    pub fn set_sequential_execution(&mut self, enable: bool) -> Result<()> {
        let ptr = self.as_ptr()?;
        if self.sequential_execution == enable {
            return Ok(());
        }
        debug!("Setting sequential execution to {} on {:p}", enable, ptr);
        unsafe {
            if enable {
                self.api.enable_sequential_execution(ptr)?;
            } else {
                self.api.disable_sequential_execution(ptr)?;
            }
        }
        self.sequential_execution = enable;
        Ok(())
    }

    /// Whether allocation patterns from the first run are reused. Default is `true`.
    pub fn memory_pattern(&self) -> bool {
        self.memory_pattern
    }

    /// Enable or disable memory pattern reuse
    pub fn set_memory_pattern(&mut self, enable: bool) -> Result<()> {
        let ptr = self.as_ptr()?;
        if self.memory_pattern == enable {
            return Ok(());
        }
        debug!("Setting memory pattern to {} on {:p}", enable, ptr);
        unsafe {
            if enable {
                self.api.enable_mem_pattern(ptr)?;
            } else {
                self.api.disable_mem_pattern(ptr)?;
            }
        }
        self.memory_pattern = enable;
        Ok(())
    }

    /// Path prefix for profiling output files
    pub fn profile_output_path_prefix(&self) -> &str {
        &self.profile_output_path_prefix
    }

    /// Set the profiling output prefix. Takes effect the next time profiling is enabled.
    pub fn set_profile_output_path_prefix(&mut self, prefix: impl Into<String>) {
        self.profile_output_path_prefix = prefix.into();
    }

    /// Whether run profiling is enabled. Default is `false`.
    pub fn profiling(&self) -> bool {
        self.profiling
    }

    /// Enable or disable profiling of session runs
    pub fn set_profiling(&mut self, enable: bool) -> Result<()> {
        let ptr = self.as_ptr()?;
        if self.profiling == enable {
            return Ok(());
        }
        unsafe {
            if enable {
                debug!(
                    "Enabling profiling on {:p} with prefix {}",
                    ptr, self.profile_output_path_prefix
                );
                self.api.enable_profiling(ptr, &self.profile_output_path_prefix)?;
            } else {
                debug!("Disabling profiling on {:p}", ptr);
                self.api.disable_profiling(ptr)?;
            }
        }
        self.profiling = enable;
        Ok(())
    }

    /// Whether the arena allocator is used for CPU memory. Default is `true`.
    pub fn cpu_mem_arena(&self) -> bool {
        self.cpu_mem_arena
    }

    /// Enable or disable the CPU arena allocator
    pub fn set_cpu_mem_arena(&mut self, enable: bool) -> Result<()> {
        let ptr = self.as_ptr()?;
        if self.cpu_mem_arena == enable {
            return Ok(());
        }
        debug!("Setting CPU memory arena to {} on {:p}", enable, ptr);
        unsafe {
            if enable {
                self.api.enable_cpu_mem_arena(ptr)?;
            } else {
                self.api.disable_cpu_mem_arena(ptr)?;
            }
        }
        self.cpu_mem_arena = enable;
        Ok(())
    }

    /// Log id for the session. Default is empty.
    pub fn log_id(&self) -> &str {
        &self.log_id
    }

    pub fn set_log_id(&mut self, log_id: impl Into<String>) -> Result<()> {
        let ptr = self.as_ptr()?;
        let log_id = log_id.into();
        debug!("Setting log id to '{}' on {:p}", log_id, ptr);
        unsafe { self.api.set_session_log_id(ptr, &log_id)? };
        self.log_id = log_id;
        Ok(())
    }

    /// Verbosity of session logs. Default is [`LogLevel::Verbose`].
    pub fn log_verbosity_level(&self) -> LogLevel {
        self.log_verbosity_level
    }

    pub fn set_log_verbosity_level(&mut self, level: LogLevel) -> Result<()> {
        let ptr = self.as_ptr()?;
        debug!("Setting log verbosity to {} on {:p}", level, ptr);
        unsafe { self.api.set_session_log_verbosity_level(ptr, level)? };
        self.log_verbosity_level = level;
        Ok(())
    }

    /// Thread pool size for session runs. Default is `0`, which lets the runtime pick one
    /// thread per available core.
    pub fn thread_pool_size(&self) -> i32 {
        self.thread_pool_size
    }

    pub fn set_thread_pool_size(&mut self, size: i32) -> Result<()> {
        let ptr = self.as_ptr()?;
        debug!("Setting thread pool size to {} on {:p}", size, ptr);
        unsafe { self.api.set_session_thread_pool_size(ptr, size)? };
        self.thread_pool_size = size;
        Ok(())
    }

    /// Graph optimization level. Default is `1`.
    ///
    /// * `0`: disable all optimizations
    /// * `1`: basic optimizations
    /// * `2`: all optimizations
    pub fn graph_optimization_level(&self) -> u32 {
        self.graph_optimization_level
    }

    /// Set the graph optimization level; see [`GraphOptimizationLevel`] for named values
    pub fn set_graph_optimization_level(&mut self, level: impl Into<u32>) -> Result<()> {
        let ptr = self.as_ptr()?;
        let level = level.into();
        debug!("Setting graph optimization level to {} on {:p}", level, ptr);
        unsafe { self.api.set_session_graph_optimization_level(ptr, level)? };
        self.graph_optimization_level = level;
        Ok(())
    }

    /// Execution providers appended so far, in order
    pub fn providers(&self) -> &[ExecutionProvider] {
        &self.providers
    }

    /// Append the CPU execution provider
    pub fn append_cpu_provider(&mut self, use_arena: bool) -> Result<()> {
        let ptr = self.as_ptr()?;
        debug!("Appending CPU provider (arena: {}) to {:p}", use_arena, ptr);
        unsafe { self.api.append_execution_provider_cpu(ptr, use_arena)? };
        self.providers.push(ExecutionProvider::Cpu { use_arena });
        Ok(())
    }

    /// Append the CUDA execution provider without checking platform prerequisites
    pub fn append_cuda_provider(&mut self, device_id: i32) -> Result<()> {
        let ptr = self.as_ptr()?;
        debug!("Appending CUDA provider (device: {}) to {:p}", device_id, ptr);
        unsafe { self.api.append_execution_provider_cuda(ptr, device_id)? };
        self.providers.push(ExecutionProvider::Cuda { device_id });
        Ok(())
    }
}

fn provider_config_for(providers: &[ExecutionProvider]) -> ProviderConfig {
    match providers {
        [] => ProviderConfig::Default,
        [ExecutionProvider::Cpu { use_arena }] => ProviderConfig::Cpu {
            use_arena: *use_arena,
        },
        [ExecutionProvider::Cuda { device_id }, ExecutionProvider::Cpu { use_arena: true }] => {
            ProviderConfig::Cuda {
                device_id: *device_id,
            }
        }
        _ => {
            debug!("Provider list {:?} has no exact config form", providers);
            providers
                .iter()
                .find_map(|provider| match provider {
                    ExecutionProvider::Cuda { device_id } => Some(ProviderConfig::Cuda {
                        device_id: *device_id,
                    }),
                    ExecutionProvider::Cpu { .. } => None,
                })
                .or_else(|| {
                    providers.iter().find_map(|provider| match provider {
                        ExecutionProvider::Cpu { use_arena } => Some(ProviderConfig::Cpu {
                            use_arena: *use_arena,
                        }),
                        ExecutionProvider::Cuda { .. } => None,
                    })
                })
                .unwrap_or_default()
        }
    }
}

fn check_cuda_prerequisites(probe: &dyn PlatformProbe) -> Result<()> {
    platform::check_libc_version(probe)?;
    platform::check_cuda_libraries(probe)
}

impl Drop for SessionOptions {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("ptr", &self.ptr)
            .field("sequential_execution", &self.sequential_execution)
            .field("memory_pattern", &self.memory_pattern)
            .field("profiling", &self.profiling)
            .field("profile_output_path_prefix", &self.profile_output_path_prefix)
            .field("cpu_mem_arena", &self.cpu_mem_arena)
            .field("log_id", &self.log_id)
            .field("log_verbosity_level", &self.log_verbosity_level)
            .field("thread_pool_size", &self.thread_pool_size)
            .field("graph_optimization_level", &self.graph_optimization_level)
            .field("providers", &self.providers)
            .finish()
    }
}
