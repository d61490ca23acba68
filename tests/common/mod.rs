#![allow(dead_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::sync::Arc;

use onnx_session_options::{
    Error, ErrorCode, LogLevel, NativeApi, OptionsPtr, OrtSessionOptions, PlatformProbe, Result,
    TargetOs,
};
use parking_lot::Mutex;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One native call, as seen by [`RecordingApi`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create,
    Release,
    EnableSequentialExecution,
    DisableSequentialExecution,
    EnableMemPattern,
    DisableMemPattern,
    EnableProfiling(String),
    DisableProfiling,
    EnableCpuMemArena,
    DisableCpuMemArena,
    SetLogId(String),
    SetLogVerbosityLevel(LogLevel),
    SetThreadPoolSize(i32),
    SetGraphOptimizationLevel(u32),
    AppendCpu(bool),
    AppendCuda(i32),
}

impl Call {
    /// Calls that match `self` regardless of their arguments
    fn same_kind(&self, other: &Call) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    live: HashSet<usize>,
    failure: Option<(Call, ErrorCode, String)>,
}

/// In-memory stand-in for the native runtime
///
/// Hands out heap-allocated fake handles, records every call, and can be told to fail the
/// next call of a given kind.
#[derive(Default)]
pub struct RecordingApi {
    state: Mutex<State>,
}

impl RecordingApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next call of the same kind as `call` with the given status
    pub fn fail_next(&self, call: Call, code: ErrorCode, message: &str) {
        self.state.lock().failure = Some((call, code, message.to_string()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Calls other than create/release
    pub fn setter_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, Call::Create | Call::Release))
            .collect()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn live_handles(&self) -> usize {
        self.state.lock().live.len()
    }

    fn record(&self, options: Option<OptionsPtr>, call: Call) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(options) = options {
            assert!(
                state.live.contains(&(options.as_ptr() as usize)),
                "{:?} on a handle that is not live",
                call
            );
        }

        let fail = matches!(&state.failure, Some((kind, _, _)) if kind.same_kind(&call));
        state.calls.push(call);
        if fail {
            if let Some((_, code, message)) = state.failure.take() {
                return Err(Error::Native { code, message });
            }
        }
        Ok(())
    }
}

impl NativeApi for RecordingApi {
    fn create_session_options(&self) -> Result<OptionsPtr> {
        self.record(None, Call::Create)?;
        let raw = Box::into_raw(Box::new(0u64)) as *mut OrtSessionOptions;
        self.state.lock().live.insert(raw as usize);
        Ok(NonNull::new(raw).expect("Box pointers are never null"))
    }

    unsafe fn release_session_options(&self, options: OptionsPtr) {
        let mut state = self.state.lock();
        assert!(
            state.live.remove(&(options.as_ptr() as usize)),
            "double release of {:p}",
            options
        );
        state.calls.push(Call::Release);
        drop(Box::from_raw(options.as_ptr() as *mut u64));
    }

    unsafe fn enable_sequential_execution(&self, options: OptionsPtr) -> Result<()> {
        self.record(Some(options), Call::EnableSequentialExecution)
    }

    unsafe fn disable_sequential_execution(&self, options: OptionsPtr) -> Result<()> {
        self.record(Some(options), Call::DisableSequentialExecution)
    }

    unsafe fn enable_mem_pattern(&self, options: OptionsPtr) -> Result<()> {
        self.record(Some(options), Call::EnableMemPattern)
    }

    unsafe fn disable_mem_pattern(&self, options: OptionsPtr) -> Result<()> {
        self.record(Some(options), Call::DisableMemPattern)
    }

    unsafe fn enable_profiling(
        &self,
        options: OptionsPtr,
        profile_file_prefix: &str,
    ) -> Result<()> {
        self.record(Some(options), Call::EnableProfiling(profile_file_prefix.to_string()))
    }

    unsafe fn disable_profiling(&self, options: OptionsPtr) -> Result<()> {
        self.record(Some(options), Call::DisableProfiling)
    }

    unsafe fn enable_cpu_mem_arena(&self, options: OptionsPtr) -> Result<()> {
        self.record(Some(options), Call::EnableCpuMemArena)
    }

    unsafe fn disable_cpu_mem_arena(&self, options: OptionsPtr) -> Result<()> {
        self.record(Some(options), Call::DisableCpuMemArena)
    }

    unsafe fn set_session_log_id(&self, options: OptionsPtr, log_id: &str) -> Result<()> {
        self.record(Some(options), Call::SetLogId(log_id.to_string()))
    }

    unsafe fn set_session_log_verbosity_level(
        &self,
        options: OptionsPtr,
        level: LogLevel,
    ) -> Result<()> {
        self.record(Some(options), Call::SetLogVerbosityLevel(level))
    }

    unsafe fn set_session_thread_pool_size(&self, options: OptionsPtr, size: i32) -> Result<()> {
        self.record(Some(options), Call::SetThreadPoolSize(size))
    }

    unsafe fn set_session_graph_optimization_level(
        &self,
        options: OptionsPtr,
        level: u32,
    ) -> Result<()> {
        self.record(Some(options), Call::SetGraphOptimizationLevel(level))
    }

    unsafe fn append_execution_provider_cpu(
        &self,
        options: OptionsPtr,
        use_arena: bool,
    ) -> Result<()> {
        self.record(Some(options), Call::AppendCpu(use_arena))
    }

    unsafe fn append_execution_provider_cuda(
        &self,
        options: OptionsPtr,
        device_id: i32,
    ) -> Result<()> {
        self.record(Some(options), Call::AppendCuda(device_id))
    }
}

/// Platform probe with fixed answers
#[derive(Debug, Clone)]
pub struct FakeProbe {
    pub os: TargetOs,
    pub libc: Option<String>,
    pub loadable: Vec<String>,
    pub system_dir: Option<PathBuf>,
}

impl FakeProbe {
    pub fn linux(libc: &str) -> Self {
        Self {
            os: TargetOs::Linux,
            libc: Some(libc.to_string()),
            loadable: Vec::new(),
            system_dir: None,
        }
    }

    pub fn windows(loadable: &[&str]) -> Self {
        Self {
            os: TargetOs::Windows,
            libc: None,
            loadable: loadable.iter().map(|name| name.to_string()).collect(),
            system_dir: Some(PathBuf::from("C:\\Windows\\System32")),
        }
    }

    pub fn macos() -> Self {
        Self {
            os: TargetOs::MacOs,
            libc: None,
            loadable: Vec::new(),
            system_dir: None,
        }
    }
}

impl PlatformProbe for FakeProbe {
    fn target_os(&self) -> TargetOs {
        self.os
    }

    fn libc_version(&self) -> Option<String> {
        self.libc.clone()
    }

    fn can_load_library(&self, name: &str) -> bool {
        self.loadable.iter().any(|loadable| loadable == name)
    }

    fn system_directory(&self) -> Option<PathBuf> {
        self.system_dir.clone()
    }
}
