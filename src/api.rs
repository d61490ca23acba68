//! The call-through layer between [`SessionOptions`](crate::SessionOptions) and the native runtime.
//!
//! Every native entry point the wrapper touches is one method on [`NativeApi`]. The production
//! implementation lives in [`crate::runtime`]; tests substitute a recording implementation.

use std::ptr::NonNull;

use crate::error::Result;
use crate::session_options::LogLevel;

/// Opaque native `OrtSessionOptions`
#[repr(C)]
pub struct OrtSessionOptions {
    _private: [u8; 0],
}

/// Opaque native `OrtStatus`
#[repr(C)]
pub struct OrtStatus {
    _private: [u8; 0],
}

/// Native path character type (`ORTCHAR_T`)
#[cfg(target_os = "windows")]
pub type OrtChar = u16;
#[cfg(not(target_os = "windows"))]
pub type OrtChar = std::os::raw::c_char;

/// Raw handle to a live native session options object
pub type OptionsPtr = NonNull<OrtSessionOptions>;

/// Native entry points used to configure session options
///
/// All methods except [`NativeApi::create_session_options`] are `unsafe`: the caller must pass
/// a handle obtained from `create_session_options` on the same API that has not yet been
/// released.
pub trait NativeApi: Send + Sync {
    /// Allocate a new options object with the runtime defaults
    fn create_session_options(&self) -> Result<OptionsPtr>;

    /// Free an options object. The handle is invalid afterwards.
    unsafe fn release_session_options(&self, options: OptionsPtr);

    unsafe fn enable_sequential_execution(&self, options: OptionsPtr) -> Result<()>;
    unsafe fn disable_sequential_execution(&self, options: OptionsPtr) -> Result<()>;

    unsafe fn enable_mem_pattern(&self, options: OptionsPtr) -> Result<()>;
    unsafe fn disable_mem_pattern(&self, options: OptionsPtr) -> Result<()>;

    /// Enable profiling, writing output files under `profile_file_prefix`
    unsafe fn enable_profiling(&self, options: OptionsPtr, profile_file_prefix: &str) -> Result<()>;
    unsafe fn disable_profiling(&self, options: OptionsPtr) -> Result<()>;

    unsafe fn enable_cpu_mem_arena(&self, options: OptionsPtr) -> Result<()>;
    unsafe fn disable_cpu_mem_arena(&self, options: OptionsPtr) -> Result<()>;

    unsafe fn set_session_log_id(&self, options: OptionsPtr, log_id: &str) -> Result<()>;
    unsafe fn set_session_log_verbosity_level(
        &self,
        options: OptionsPtr,
        level: LogLevel,
    ) -> Result<()>;
    unsafe fn set_session_thread_pool_size(&self, options: OptionsPtr, size: i32) -> Result<()>;
    unsafe fn set_session_graph_optimization_level(
        &self,
        options: OptionsPtr,
        level: u32,
    ) -> Result<()>;

    unsafe fn append_execution_provider_cpu(
        &self,
        options: OptionsPtr,
        use_arena: bool,
    ) -> Result<()>;
    unsafe fn append_execution_provider_cuda(
        &self,
        options: OptionsPtr,
        device_id: i32,
    ) -> Result<()>;
}
