//! Renderer error taxonomy and escalation policy
//!
//! Every fatal condition carries the source location that raised it. Vulkan
//! return codes are converted through [`VkResultExt::check`], which records
//! the caller's location via `#[track_caller]`.

use ash::prelude::VkResult;
use ash::vk;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::Location;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File/line/column of the code that raised an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    /// Source file path as reported by the compiler
    pub file: &'static str,
    /// 1-based line number
    pub line: u32,
    /// 1-based column number
    pub column: u32,
}

impl SourceLocation {
    /// Location of the caller of the enclosing `#[track_caller]` function
    #[track_caller]
    #[must_use]
    pub fn caller() -> Self {
        Self::from(Location::caller())
    }
}

impl From<&'static Location<'static>> for SourceLocation {
    fn from(location: &'static Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Renderer errors
#[derive(Error, Debug)]
pub enum RenderError {
    /// Device, swapchain, or API call failure
    #[error("Graphics error: {message} [{location}]")]
    Graphics {
        /// What was being attempted
        message: String,
        /// Result code returned by the driver, if any
        result: Option<vk::Result>,
        /// Where the error was raised
        location: SourceLocation,
    },

    /// File or texture load failure
    #[error("Asset error: {message} [{location}]")]
    Asset {
        /// What went wrong
        message: String,
        /// Offending file, if the failure concerns one
        path: Option<PathBuf>,
        /// Where the error was raised
        location: SourceLocation,
    },

    /// Anything that fits neither category
    #[error("{message} [{location}]")]
    Generic {
        /// What went wrong
        message: String,
        /// Where the error was raised
        location: SourceLocation,
    },
}

/// Result type for renderer operations
pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    /// Graphics error without an API result code
    #[track_caller]
    pub fn graphics(message: impl Into<String>) -> Self {
        Self::Graphics {
            message: message.into(),
            result: None,
            location: SourceLocation::caller(),
        }
    }

    /// Graphics error wrapping a Vulkan result code
    #[track_caller]
    #[must_use]
    pub fn vulkan(what: &str, result: vk::Result) -> Self {
        Self::Graphics {
            message: format!("{what} failed: {result:?}"),
            result: Some(result),
            location: SourceLocation::caller(),
        }
    }

    /// Asset error, optionally tied to a file
    #[track_caller]
    pub fn asset(message: impl Into<String>, path: Option<&Path>) -> Self {
        Self::Asset {
            message: message.into(),
            path: path.map(Path::to_path_buf),
            location: SourceLocation::caller(),
        }
    }

    /// Fallback error
    #[track_caller]
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
            location: SourceLocation::caller(),
        }
    }

    /// Where the error was raised
    #[must_use]
    pub const fn location(&self) -> SourceLocation {
        match self {
            Self::Graphics { location, .. }
            | Self::Asset { location, .. }
            | Self::Generic { location, .. } => *location,
        }
    }

    /// Vulkan result code carried by a graphics error
    #[must_use]
    pub const fn vk_result(&self) -> Option<vk::Result> {
        match self {
            Self::Graphics { result, .. } => *result,
            _ => None,
        }
    }

    /// Whether the device was lost; never recoverable
    #[must_use]
    pub fn is_device_lost(&self) -> bool {
        self.vk_result() == Some(vk::Result::ERROR_DEVICE_LOST)
    }
}

/// Uniform checker for Vulkan return codes
pub trait VkResultExt<T> {
    /// Convert a non-success code into [`RenderError::Graphics`] located at the caller
    fn check(self, what: &str) -> RenderResult<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    #[track_caller]
    fn check(self, what: &str) -> RenderResult<T> {
        let location = SourceLocation::caller();
        self.map_err(|result| RenderError::Graphics {
            message: format!("{what} failed: {result:?}"),
            result: Some(result),
            location,
        })
    }
}

/// What happens when an error escalates out of the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorMode {
    /// Log at error level and hand the error back to the caller
    Raise,
    /// Log and terminate the process
    Terminate,
}

impl Default for ErrorMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Raise
        } else {
            Self::Terminate
        }
    }
}

impl ErrorMode {
    /// Escalate a fatal error according to this mode
    ///
    /// In [`ErrorMode::Raise`] the error is returned for the caller to propagate.
    /// In [`ErrorMode::Terminate`] this function does not return.
    #[must_use]
    pub fn escalate(self, error: RenderError) -> RenderError {
        log::error!("Fatal renderer error at {}: {}", error.location(), error);
        match self {
            Self::Raise => error,
            Self::Terminate => {
                log::logger().flush();
                std::process::exit(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_records_caller_location() {
        let result: VkResult<()> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let line = line!() + 1;
        let error = result.check("allocating test memory").unwrap_err();

        assert_eq!(error.location().line, line);
        assert!(error.location().file.ends_with("error.rs"));
        assert_eq!(error.vk_result(), Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert!(error.to_string().contains("allocating test memory"));
    }

    #[test]
    fn test_check_passes_success_through() {
        let result: VkResult<u32> = Ok(7);
        assert_eq!(result.check("noop").unwrap(), 7);
    }

    #[test]
    fn test_device_lost_detection() {
        let lost = RenderError::vulkan("waiting for fence", vk::Result::ERROR_DEVICE_LOST);
        assert!(lost.is_device_lost());
        assert!(!RenderError::generic("other").is_device_lost());
    }

    #[test]
    fn test_asset_error_keeps_path() {
        let error = RenderError::asset("missing shader", Some(Path::new("shaders/mesh.vert.spv")));
        match error {
            RenderError::Asset { path, .. } => {
                assert_eq!(path.as_deref(), Some(Path::new("shaders/mesh.vert.spv")));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_raise_mode_returns_error() {
        let error = ErrorMode::Raise.escalate(RenderError::graphics("no suitable GPU"));
        assert!(matches!(error, RenderError::Graphics { .. }));
    }
}
