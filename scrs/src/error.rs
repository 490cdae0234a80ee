//! Error types for scrs operations

use std::fmt;
use thiserror::Error;

/// Status code returned by the ShaderConductor C ABI
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    /// Success
    pub const S_OK: Status = Status(shaderconductor::ffi::S_OK);
    /// Operation not provided by the compiler
    pub const E_NOTIMPL: Status = Status(shaderconductor::ffi::E_NOTIMPL);
    /// A required pointer was null
    pub const E_POINTER: Status = Status(shaderconductor::ffi::E_POINTER);
    /// Generic failure
    pub const E_FAIL: Status = Status(shaderconductor::ffi::E_FAIL);
    /// Invalid argument
    pub const E_INVALIDARG: Status = Status(shaderconductor::ffi::E_INVALIDARG);

    /// Returns true if the status indicates success
    #[inline]
    pub fn is_success(&self) -> bool {
        self.0 >= 0
    }

    /// Returns true if the status indicates an error
    #[inline]
    pub fn is_error(&self) -> bool {
        self.0 < 0
    }

    /// Returns the raw status value
    #[inline]
    pub fn code(&self) -> i32 {
        self.0
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status(0x{:08x})", self.0 as u32)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0 as u32)
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Status(code)
    }
}

/// Error type for scrs operations
#[derive(Error, Debug)]
pub enum Error {
    /// Shader compilation failed
    #[error("Compilation failed: {message}")]
    Compilation {
        /// The status code
        status: Status,
        /// Diagnostics reported by the compiler
        message: String,
    },

    /// Preprocessing failed
    #[error("Preprocessing failed: {message}")]
    Preprocessing {
        /// The status code
        status: Status,
        /// Diagnostics reported by the preprocessor
        message: String,
    },

    /// Disassembly failed
    #[error("Disassembly failed: {message}")]
    Disassembly {
        /// The status code
        status: Status,
        /// Reason reported by the disassembler
        message: String,
    },

    /// Reflection data was requested but not produced
    #[error("Reflection failed: {0}")]
    Reflection(String),

    /// Get blob part failed
    #[error("Get blob part failed (status: {status})")]
    BlobPart {
        /// The status code
        status: Status,
    },

    /// Strip shader failed
    #[error("Strip shader failed (status: {status})")]
    StripShader {
        /// The status code
        status: Status,
    },

    /// Create blob failed
    #[error("Create blob failed (status: {status})")]
    CreateBlob {
        /// The status code
        status: Status,
    },

    /// Invalid parameter provided
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// UTF-8 encoding error
    #[error("UTF-8 encoding error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Include file not found
    #[error("Include file not found: {0}")]
    IncludeNotFound(String),

    /// IO error during include resolution
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for scrs operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(Status::S_OK.is_success());
        assert!(Status::E_FAIL.is_error());
        assert!(Status::E_INVALIDARG.is_error());
        assert_eq!(Status::from(0).code(), 0);
    }

    #[test]
    fn test_status_formatting() {
        assert_eq!(Status::E_FAIL.to_string(), "0x80004005");
        assert_eq!(format!("{:?}", Status::E_NOTIMPL), "Status(0x80004001)");
    }

    #[test]
    fn test_error_messages() {
        let err = Error::Compilation {
            status: Status::E_FAIL,
            message: "shader.hlsl(3,12): error: undeclared identifier 'x'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Compilation failed: shader.hlsl(3,12): error: undeclared identifier 'x'"
        );
        let err = Error::BlobPart {
            status: Status::E_FAIL,
        };
        assert_eq!(err.to_string(), "Get blob part failed (status: 0x80004005)");
    }
}
