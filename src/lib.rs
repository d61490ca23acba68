pub mod api;
pub mod config;
pub mod error;
pub mod event;
pub mod platform;
pub mod runtime;
pub mod session_options;

// Re-export commonly used types
pub use api::{NativeApi, OptionsPtr, OrtSessionOptions};
pub use config::{ProviderConfig, SessionConfig};
pub use error::{Error, ErrorCode, Result};
pub use event::Event;
pub use platform::{HostProbe, LibcVersion, PlatformProbe, TargetOs};
pub use runtime::DylibApi;
pub use session_options::{
    ExecutionProvider, GraphOptimizationLevel, LogLevel, SessionOptions,
    DEFAULT_PROFILE_OUTPUT_PATH_PREFIX,
};
