//! HLSL cross-compiler core
//!
//! Compiles HLSL source to DXIL, SPIR-V, HLSL, GLSL, ESSL and Metal, and
//! disassembles the binary targets. The pipeline is preprocess, parse,
//! analyze, build IR, optimize and emit; every phase reports problems as
//! [`Diagnostics`] rather than failing early. The same operations are
//! exported through a C ABI (see [`ffi`]).

#![allow(clippy::missing_safety_doc)]

macro_rules! debug_log {
    ($($arg:tt)*) => {
        log::debug!(target: "shaderconductor", $($arg)*)
    };
}

macro_rules! debug_log_return {
    ($tag:literal, $fmt:literal, $expr:expr) => {{
        let result = $expr;
        log::debug!(target: "shaderconductor", concat!($tag, " -> ", $fmt), result);
        result
    }};
}

/// Dumps the IR at trace level when the `debug-logs` feature is on.
macro_rules! dump_ir {
    ($phase:literal, $module:expr) => {{
        #[cfg(feature = "debug-logs")]
        {
            log::trace!(target: "shaderconductor::ir", "IR after {}:\n{:#?}", $phase, $module);
        }
        #[cfg(not(feature = "debug-logs"))]
        {
            let _ = &$module;
        }
    }};
}

pub mod blob;
pub mod compiler;
pub mod container;
pub mod desc;
pub mod diag;
pub mod disasm;
pub mod dxil_ops;
pub mod emit;
pub mod error;
pub mod ffi;
pub mod front;
pub mod ir;
pub mod opt;
pub mod reflect;

pub use blob::Blob;
pub use compiler::{compile, compile_multi, disassemble, preprocess};
pub use desc::{
    ABI_VERSION, DisassembleDesc, MacroDefine, OptionsDesc, ResultDesc, ShaderModel, ShaderStage,
    ShadingLanguage, SourceDesc, TargetDesc,
};
pub use diag::{Diagnostic, Diagnostics, ErrorKind, Severity, SourceLocation};
pub use error::{Error, Result};
pub use front::include::{FileSystemInclude, IncludeHandler, MemoryInclude};
pub use reflect::Reflection;
