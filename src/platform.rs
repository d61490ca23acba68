//! Platform prerequisites checked before enabling an alternate execution backend.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use log::{debug, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use thiserror::Error;

use crate::error::{self, Result};

/// Oldest glibc the runtime binaries are built against
pub const MIN_LIBC_VERSION: LibcVersion = LibcVersion::new(2, 23);

/// CUDA libraries the runtime loads lazily on Windows
pub const CUDA_DELAY_LOADED_LIBS: &[&str] = &["cublas64_100.dll", "cudnn64_7.dll"];

/// Operating system family, as far as the prerequisite checks care
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    Linux,
    Windows,
    MacOs,
    Other,
}

impl TargetOs {
    /// The operating system this crate was compiled for
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            TargetOs::Linux
        } else if cfg!(target_os = "windows") {
            TargetOs::Windows
        } else if cfg!(target_os = "macos") {
            TargetOs::MacOs
        } else {
            TargetOs::Other
        }
    }
}

/// A `major.minor[.build[.revision]]` version number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LibcVersion {
    pub major: u32,
    pub minor: u32,
    pub build: Option<u32>,
    pub revision: Option<u32>,
}

impl LibcVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            build: None,
            revision: None,
        }
    }
}

impl Default for LibcVersion {
    fn default() -> Self {
        LibcVersion::new(0, 0)
    }
}

impl fmt::Display for LibcVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(build) = self.build {
            write!(f, ".{}", build)?;
            if let Some(revision) = self.revision {
                write!(f, ".{}", revision)?;
            }
        }
        Ok(())
    }
}

/// Error returned when a version string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version string '{0}'")]
pub struct ParseVersionError(String);

impl FromStr for LibcVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || ParseVersionError(s.to_string());

        let parts = s
            .trim()
            .split('.')
            .map(|part| part.parse::<u32>().map_err(|_| invalid()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        match parts.as_slice() {
            [major, minor] => Ok(LibcVersion::new(*major, *minor)),
            [major, minor, build] => Ok(LibcVersion {
                build: Some(*build),
                ..LibcVersion::new(*major, *minor)
            }),
            [major, minor, build, revision] => Ok(LibcVersion {
                major: *major,
                minor: *minor,
                build: Some(*build),
                revision: Some(*revision),
            }),
            _ => Err(invalid()),
        }
    }
}

/// Host facts consulted by the prerequisite checks
pub trait PlatformProbe {
    /// Operating system to apply checks for
    fn target_os(&self) -> TargetOs;

    /// Raw glibc version string, `None` when it cannot be determined
    fn libc_version(&self) -> Option<String>;

    /// Whether the named dynamic library can be loaded
    fn can_load_library(&self, name: &str) -> bool;

    /// Directory the system loader searches for libraries
    fn system_directory(&self) -> Option<PathBuf>;
}

// Libraries found by `HostProbe` stay loaded for the life of the process
static RESIDENT_LIBRARIES: Lazy<Mutex<Vec<(String, libloading::Library)>>> =
    Lazy::new(|| Mutex::new(Vec::new()));

/// Probes the machine the process is running on
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProbe;

impl PlatformProbe for HostProbe {
    fn target_os(&self) -> TargetOs {
        TargetOs::current()
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    fn libc_version(&self) -> Option<String> {
        let version = unsafe { libc::gnu_get_libc_version() };
        if version.is_null() {
            return None;
        }
        let version = unsafe { std::ffi::CStr::from_ptr(version) };
        version.to_str().ok().map(str::to_string)
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    fn libc_version(&self) -> Option<String> {
        None
    }

    fn can_load_library(&self, name: &str) -> bool {
        let mut loaded = RESIDENT_LIBRARIES.lock();
        if loaded.iter().any(|(loaded_name, _)| loaded_name == name) {
            return true;
        }
        match unsafe { libloading::Library::new(name) } {
            Ok(library) => {
                debug!("Loaded {} for the rest of the process", name);
                loaded.push((name.to_string(), library));
                true
            }
            Err(err) => {
                debug!("Failed to load {}: {}", name, err);
                false
            }
        }
    }

    fn system_directory(&self) -> Option<PathBuf> {
        std::env::var_os("SystemRoot").map(|root| PathBuf::from(root).join("System32"))
    }
}

/// Require glibc 2.23 or newer on Linux
///
/// Any failure to probe or parse the version counts as not meeting the requirement, and is
/// reported as version `0.0`. Other platforms always pass.
pub fn check_libc_version(probe: &dyn PlatformProbe) -> Result<()> {
    if probe.target_os() != TargetOs::Linux {
        return Ok(());
    }

    let found = probe
        .libc_version()
        .and_then(|raw| raw.parse::<LibcVersion>().ok())
        .unwrap_or_default();

    if found >= MIN_LIBC_VERSION {
        debug!("libc version {} satisfies minimum {}", found, MIN_LIBC_VERSION);
        return Ok(());
    }

    warn!("libc version {} is below the required {}", found, MIN_LIBC_VERSION);
    Err(error::Error::LibcVersion {
        found,
        required: MIN_LIBC_VERSION,
    })
}

/// Require the CUDA libraries to be loadable on Windows
///
/// Fails on the first library in [`CUDA_DELAY_LOADED_LIBS`] that cannot be loaded.
pub fn check_cuda_libraries(probe: &dyn PlatformProbe) -> Result<()> {
    if probe.target_os() != TargetOs::Windows {
        return Ok(());
    }

    for library in CUDA_DELAY_LOADED_LIBS {
        if probe.can_load_library(library) {
            continue;
        }

        let search_dir = probe
            .system_directory()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        warn!("{} could not be loaded from {}", library, search_dir);
        return Err(error::Error::MissingLibrary {
            library: library.to_string(),
            search_dir,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct StaticProbe {
        os: TargetOs,
        libc: Option<&'static str>,
    }

    fn is_resident(name: &str) -> bool {
        RESIDENT_LIBRARIES.lock().iter().any(|(loaded_name, _)| loaded_name == name)
    }

    impl StaticProbe {
        fn new(os: TargetOs, libc: Option<&'static str>) -> Self {
            Self { os, libc }
        }
    }

    impl PlatformProbe for StaticProbe {
        fn target_os(&self) -> TargetOs {
            self.os
        }

        fn libc_version(&self) -> Option<String> {
            self.libc.map(str::to_string)
        }

        fn can_load_library(&self, _name: &str) -> bool {
            false
        }

        fn system_directory(&self) -> Option<PathBuf> {
            None
        }
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!("2.23".parse::<LibcVersion>().unwrap(), LibcVersion::new(2, 23));
        assert_eq!(
            "2.31.1".parse::<LibcVersion>().unwrap(),
            LibcVersion {
                build: Some(1),
                ..LibcVersion::new(2, 31)
            }
        );
        assert_eq!("2.35.0.4".parse::<LibcVersion>().unwrap().to_string(), "2.35.0.4");

        assert!("2".parse::<LibcVersion>().is_err());
        assert!("2.x".parse::<LibcVersion>().is_err());
        assert!("".parse::<LibcVersion>().is_err());
        assert!("1.2.3.4.5".parse::<LibcVersion>().is_err());
    }

    #[test]
    fn test_version_ordering_is_numeric() {
        let v2_3: LibcVersion = "2.3".parse().unwrap();
        let v2_23: LibcVersion = "2.23".parse().unwrap();
        let v2_100: LibcVersion = "2.100".parse().unwrap();
        assert!(v2_3 < v2_23);
        assert!(v2_23 < v2_100);
        assert!("2.23.1".parse::<LibcVersion>().unwrap() > v2_23);
    }

    #[test]
    fn test_libc_check_on_linux() {
        let ok = StaticProbe::new(TargetOs::Linux, Some("2.27"));
        assert!(check_libc_version(&ok).is_ok());

        let exact = StaticProbe::new(TargetOs::Linux, Some("2.23"));
        assert!(check_libc_version(&exact).is_ok());

        let old = StaticProbe::new(TargetOs::Linux, Some("2.17"));
        match check_libc_version(&old) {
            Err(Error::LibcVersion { found, required }) => {
                assert_eq!(found, LibcVersion::new(2, 17));
                assert_eq!(required, MIN_LIBC_VERSION);
            }
            other => panic!("expected libc version error, got {:?}", other),
        }
    }

    #[test]
    fn test_unprobeable_libc_reports_zero() {
        for libc in [None, Some("garbage")] {
            let probe = StaticProbe::new(TargetOs::Linux, libc);
            match check_libc_version(&probe) {
                Err(Error::LibcVersion { found, .. }) => assert_eq!(found.to_string(), "0.0"),
                other => panic!("expected libc version error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_checks_skip_other_platforms() {
        let mac = StaticProbe::new(TargetOs::MacOs, None);
        assert!(check_libc_version(&mac).is_ok());
        assert!(check_cuda_libraries(&mac).is_ok());

        let linux = StaticProbe::new(TargetOs::Linux, Some("2.31"));
        assert!(check_cuda_libraries(&linux).is_ok());
    }

    #[test]
    fn test_cuda_check_names_first_missing_library() {
        let windows = StaticProbe::new(TargetOs::Windows, None);
        match check_cuda_libraries(&windows) {
            Err(Error::MissingLibrary { library, search_dir }) => {
                assert_eq!(library, "cublas64_100.dll");
                assert_eq!(search_dir, "<unknown>");
            }
            other => panic!("expected missing library error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_library_is_not_kept() {
        let name = "libonnx_session_options_absent.so";
        assert!(!HostProbe.can_load_library(name));
        assert!(!is_resident(name));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_loaded_library_stays_resident() {
        assert!(HostProbe.can_load_library("libc.so.6"));
        assert!(is_resident("libc.so.6"));

        // A second check reuses the loaded library
        assert!(HostProbe.can_load_library("libc.so.6"));
        let count = RESIDENT_LIBRARIES
            .lock()
            .iter()
            .filter(|(loaded_name, _)| loaded_name == "libc.so.6")
            .count();
        assert_eq!(count, 1);
    }
}
