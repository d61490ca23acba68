use std::ffi::NulError;
use std::path::PathBuf;

use strum::Display;
use thiserror::Error;

use crate::platform::LibcVersion;

pub type Result<T> = std::result::Result<T, Error>;

/// Status codes reported by the native runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ErrorCode {
    Ok,
    Fail,
    InvalidArgument,
    NoSuchFile,
    NoModel,
    EngineError,
    RuntimeException,
    InvalidProtobuf,
    ModelLoaded,
    NotImplemented,
    InvalidGraph,
    ExecutionProviderFail,
}

impl ErrorCode {
    /// Map a raw `OrtErrorCode` value, treating unknown codes as `Fail`
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => ErrorCode::Ok,
            1 => ErrorCode::Fail,
            2 => ErrorCode::InvalidArgument,
            3 => ErrorCode::NoSuchFile,
            4 => ErrorCode::NoModel,
            5 => ErrorCode::EngineError,
            6 => ErrorCode::RuntimeException,
            7 => ErrorCode::InvalidProtobuf,
            8 => ErrorCode::ModelLoaded,
            9 => ErrorCode::NotImplemented,
            10 => ErrorCode::InvalidGraph,
            11 => ErrorCode::ExecutionProviderFail,
            _ => ErrorCode::Fail,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            ErrorCode::Ok => 0,
            ErrorCode::Fail => 1,
            ErrorCode::InvalidArgument => 2,
            ErrorCode::NoSuchFile => 3,
            ErrorCode::NoModel => 4,
            ErrorCode::EngineError => 5,
            ErrorCode::RuntimeException => 6,
            ErrorCode::InvalidProtobuf => 7,
            ErrorCode::ModelLoaded => 8,
            ErrorCode::NotImplemented => 9,
            ErrorCode::InvalidGraph => 10,
            ErrorCode::ExecutionProviderFail => 11,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("[{code}] {message}")]
    Native { code: ErrorCode, message: String },

    #[error(
        "libc.so version={found} does not meet the minimum of {required} required by ONNX Runtime. \
         Linux distribution should be similar to Ubuntu 16.04 or higher"
    )]
    LibcVersion {
        found: LibcVersion,
        required: LibcVersion,
    },

    #[error(
        "'{library}' not found. CUDA is required for GPU execution. \
         Verify it is available in the system directory={search_dir}. \
         Else copy it to the output folder."
    )]
    MissingLibrary { library: String, search_dir: String },

    #[error("Failed to load ONNX Runtime from {path}: {source}")]
    RuntimeLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("ONNX Runtime entry point `{symbol}` not found: {source}")]
    MissingSymbol {
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    #[error("Session options used after release")]
    Released,

    #[error("String contains an interior NUL byte: {0}")]
    InvalidString(#[from] NulError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid session config: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The native status code this error corresponds to
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Native { code, .. } => *code,
            Error::LibcVersion { .. } => ErrorCode::RuntimeException,
            Error::MissingLibrary { .. } => ErrorCode::NoSuchFile,
            Error::RuntimeLoad { .. } => ErrorCode::NoSuchFile,
            Error::MissingSymbol { .. } => ErrorCode::NotImplemented,
            Error::InvalidString(_) => ErrorCode::InvalidArgument,
            Error::Released | Error::Io(_) | Error::Json(_) => ErrorCode::Fail,
        }
    }

    /// True for platform prerequisite failures raised by the provider factories
    pub fn is_prerequisite(&self) -> bool {
        matches!(self, Error::LibcVersion { .. } | Error::MissingLibrary { .. })
    }
}
