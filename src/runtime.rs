//! Loads the ONNX Runtime shared library and exposes it as a [`NativeApi`].

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use libloading::Library;
use log::{debug, info};
use once_cell::sync::OnceCell;

use crate::api::{NativeApi, OptionsPtr, OrtChar, OrtSessionOptions, OrtStatus};
use crate::error::{Error, ErrorCode, Result};
use crate::session_options::LogLevel;

/// Environment variable overriding the runtime library location
pub const DYLIB_PATH_ENV: &str = "ORT_DYLIB_PATH";

type CreateSessionOptionsFn =
    unsafe extern "system" fn(*mut *mut OrtSessionOptions) -> *mut OrtStatus;
type ReleaseSessionOptionsFn = unsafe extern "system" fn(*mut OrtSessionOptions);
type OptionsFn = unsafe extern "system" fn(*mut OrtSessionOptions) -> *mut OrtStatus;
type EnableProfilingFn =
    unsafe extern "system" fn(*mut OrtSessionOptions, *const OrtChar) -> *mut OrtStatus;
type SetLogIdFn =
    unsafe extern "system" fn(*mut OrtSessionOptions, *const c_char) -> *mut OrtStatus;
type SetU32Fn = unsafe extern "system" fn(*mut OrtSessionOptions, u32) -> *mut OrtStatus;
type SetIntFn = unsafe extern "system" fn(*mut OrtSessionOptions, c_int) -> *mut OrtStatus;
type GetErrorCodeFn = unsafe extern "system" fn(*const OrtStatus) -> c_int;
type GetErrorMessageFn = unsafe extern "system" fn(*const OrtStatus) -> *const c_char;
type ReleaseStatusFn = unsafe extern "system" fn(*mut OrtStatus);

/// Resolve a symbol and copy the function pointer out of the library
macro_rules! resolve {
    ($lib:expr, $name:literal, $ty:ty) => {{
        let symbol = unsafe { $lib.get::<$ty>(concat!($name, "\0").as_bytes()) }
            .map_err(|source| Error::MissingSymbol { symbol: $name, source })?;
        *symbol
    }};
}

/// [`NativeApi`] backed by a dynamically loaded ONNX Runtime library
pub struct DylibApi {
    path: PathBuf,
    create_session_options: CreateSessionOptionsFn,
    release_session_options: ReleaseSessionOptionsFn,
    enable_sequential_execution: OptionsFn,
    disable_sequential_execution: OptionsFn,
    enable_mem_pattern: OptionsFn,
    disable_mem_pattern: OptionsFn,
    enable_profiling: EnableProfilingFn,
    disable_profiling: OptionsFn,
    enable_cpu_mem_arena: OptionsFn,
    disable_cpu_mem_arena: OptionsFn,
    set_session_log_id: SetLogIdFn,
    set_session_log_verbosity_level: SetU32Fn,
    set_session_thread_pool_size: SetIntFn,
    set_session_graph_optimization_level: SetU32Fn,
    append_cpu: SetIntFn,
    append_cuda: SetIntFn,
    get_error_code: GetErrorCodeFn,
    get_error_message: GetErrorMessageFn,
    release_status: ReleaseStatusFn,
    // Must outlive every function pointer above
    _library: Library,
}

// The resolved entry points are plain C functions that are safe to call from any thread.
unsafe impl Send for DylibApi {}
unsafe impl Sync for DylibApi {}

impl DylibApi {
    /// Open the runtime library at `path` and resolve all entry points
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!("Loading ONNX Runtime from {}", path.display());

        let library = unsafe { Library::new(&path) }.map_err(|source| Error::RuntimeLoad {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            create_session_options: resolve!(
                library,
                "OrtCreateSessionOptions",
                CreateSessionOptionsFn
            ),
            release_session_options: resolve!(
                library,
                "OrtReleaseSessionOptions",
                ReleaseSessionOptionsFn
            ),
            enable_sequential_execution: resolve!(
                library,
                "OrtEnableSequentialExecution",
                OptionsFn
            ),
            disable_sequential_execution: resolve!(
                library,
                "OrtDisableSequentialExecution",
                OptionsFn
            ),
            enable_mem_pattern: resolve!(library, "OrtEnableMemPattern", OptionsFn),
            disable_mem_pattern: resolve!(library, "OrtDisableMemPattern", OptionsFn),
            enable_profiling: resolve!(library, "OrtEnableProfiling", EnableProfilingFn),
            disable_profiling: resolve!(library, "OrtDisableProfiling", OptionsFn),
            enable_cpu_mem_arena: resolve!(library, "OrtEnableCpuMemArena", OptionsFn),
            disable_cpu_mem_arena: resolve!(library, "OrtDisableCpuMemArena", OptionsFn),
            set_session_log_id: resolve!(library, "OrtSetSessionLogId", SetLogIdFn),
            set_session_log_verbosity_level: resolve!(
                library,
                "OrtSetSessionLogVerbosityLevel",
                SetU32Fn
            ),
            set_session_thread_pool_size: resolve!(
                library,
                "OrtSetSessionThreadPoolSize",
                SetIntFn
            ),
            set_session_graph_optimization_level: resolve!(
                library,
                "OrtSetSessionGraphOptimizationLevel",
                SetU32Fn
            ),
            append_cpu: resolve!(
                library,
                "OrtSessionOptionsAppendExecutionProvider_CPU",
                SetIntFn
            ),
            append_cuda: resolve!(
                library,
                "OrtSessionOptionsAppendExecutionProvider_CUDA",
                SetIntFn
            ),
            get_error_code: resolve!(library, "OrtGetErrorCode", GetErrorCodeFn),
            get_error_message: resolve!(library, "OrtGetErrorMessage", GetErrorMessageFn),
            release_status: resolve!(library, "OrtReleaseStatus", ReleaseStatusFn),
            path,
            _library: library,
        })
    }

    /// Path the library was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Turn a returned status into a `Result`, releasing it when non-null
    unsafe fn check(&self, status: *mut OrtStatus) -> Result<()> {
        if status.is_null() {
            return Ok(());
        }

        let code = ErrorCode::from_raw((self.get_error_code)(status));
        let message_ptr = (self.get_error_message)(status);
        let message = if message_ptr.is_null() {
            String::new()
        } else {
            CStr::from_ptr(message_ptr).to_string_lossy().into_owned()
        };
        (self.release_status)(status);

        debug!("ONNX Runtime call failed: [{}] {}", code, message);
        Err(Error::Native { code, message })
    }
}

/// Encode a string as a NUL-terminated `ORTCHAR_T` buffer
#[cfg(target_os = "windows")]
fn to_ort_chars(value: &str) -> Result<Vec<OrtChar>> {
    CString::new(value)?;
    Ok(value.encode_utf16().chain(std::iter::once(0)).collect())
}

#[cfg(not(target_os = "windows"))]
fn to_ort_chars(value: &str) -> Result<CString> {
    Ok(CString::new(value)?)
}

impl NativeApi for DylibApi {
    fn create_session_options(&self) -> Result<OptionsPtr> {
        let mut out: *mut OrtSessionOptions = ptr::null_mut();
        unsafe { self.check((self.create_session_options)(&mut out))? };
        NonNull::new(out).ok_or_else(|| Error::Native {
            code: ErrorCode::Fail,
            message: "OrtCreateSessionOptions returned a null handle".to_string(),
        })
    }

    unsafe fn release_session_options(&self, options: OptionsPtr) {
        (self.release_session_options)(options.as_ptr());
    }

    unsafe fn enable_sequential_execution(&self, options: OptionsPtr) -> Result<()> {
        self.check((self.enable_sequential_execution)(options.as_ptr()))
    }

    unsafe fn disable_sequential_execution(&self, options: OptionsPtr) -> Result<()> {
        self.check((self.disable_sequential_execution)(options.as_ptr()))
    }

    unsafe fn enable_mem_pattern(&self, options: OptionsPtr) -> Result<()> {
        self.check((self.enable_mem_pattern)(options.as_ptr()))
    }

    unsafe fn disable_mem_pattern(&self, options: OptionsPtr) -> Result<()> {
        self.check((self.disable_mem_pattern)(options.as_ptr()))
    }

    unsafe fn enable_profiling(
        &self,
        options: OptionsPtr,
        profile_file_prefix: &str,
    ) -> Result<()> {
        let prefix = to_ort_chars(profile_file_prefix)?;
        self.check((self.enable_profiling)(options.as_ptr(), prefix.as_ptr()))
    }

    unsafe fn disable_profiling(&self, options: OptionsPtr) -> Result<()> {
        self.check((self.disable_profiling)(options.as_ptr()))
    }

    unsafe fn enable_cpu_mem_arena(&self, options: OptionsPtr) -> Result<()> {
        self.check((self.enable_cpu_mem_arena)(options.as_ptr()))
    }

    unsafe fn disable_cpu_mem_arena(&self, options: OptionsPtr) -> Result<()> {
        self.check((self.disable_cpu_mem_arena)(options.as_ptr()))
    }

    unsafe fn set_session_log_id(&self, options: OptionsPtr, log_id: &str) -> Result<()> {
        let log_id = CString::new(log_id)?;
        self.check((self.set_session_log_id)(options.as_ptr(), log_id.as_ptr()))
    }

    unsafe fn set_session_log_verbosity_level(
        &self,
        options: OptionsPtr,
        level: LogLevel,
    ) -> Result<()> {
        self.check((self.set_session_log_verbosity_level)(options.as_ptr(), level.as_raw()))
    }

    unsafe fn set_session_thread_pool_size(&self, options: OptionsPtr, size: i32) -> Result<()> {
        self.check((self.set_session_thread_pool_size)(options.as_ptr(), size))
    }

    unsafe fn set_session_graph_optimization_level(
        &self,
        options: OptionsPtr,
        level: u32,
    ) -> Result<()> {
        self.check((self.set_session_graph_optimization_level)(options.as_ptr(), level))
    }

    unsafe fn append_execution_provider_cpu(
        &self,
        options: OptionsPtr,
        use_arena: bool,
    ) -> Result<()> {
        self.check((self.append_cpu)(options.as_ptr(), c_int::from(use_arena)))
    }

    unsafe fn append_execution_provider_cuda(
        &self,
        options: OptionsPtr,
        device_id: i32,
    ) -> Result<()> {
        self.check((self.append_cuda)(options.as_ptr(), device_id))
    }
}

/// Location of the runtime library: `ORT_DYLIB_PATH` if set, else the platform file name
pub fn default_library_path() -> PathBuf {
    match std::env::var_os(DYLIB_PATH_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(libloading::library_filename("onnxruntime")),
    }
}

static DEFAULT_API: OnceCell<Arc<DylibApi>> = OnceCell::new();

/// Process-wide runtime, loaded on first use
pub fn default_api() -> Result<Arc<dyn NativeApi>> {
    let api = DEFAULT_API.get_or_try_init(|| DylibApi::load(default_library_path()).map(Arc::new))?;
    let api: Arc<dyn NativeApi> = api.clone();
    Ok(api)
}
