//! Error types for shaderconductor operations

use crate::diag::Diagnostics;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Front-end, IR or emitter diagnostics
    #[error("{0}")]
    Compile(Diagnostics),

    /// Malformed binary handed to the disassembler
    #[error("Disassembly failed: {0}")]
    Disassemble(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed or truncated DXIL container
    #[error("Malformed container: {0}")]
    Container(String),

    #[error("UTF-8 encoding error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl From<Diagnostics> for Error {
    fn from(diags: Diagnostics) -> Self {
        Error::Compile(diags)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
