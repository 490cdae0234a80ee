//! Safe, ergonomic Rust API for ShaderConductor
//!
//! This crate wraps the ShaderConductor C ABI with Rust idioms: Result
//! types, RAII wrappers, iterators and builder patterns. HLSL compiles to
//! DXIL, SPIR-V, HLSL, GLSL, ESSL and Metal.
//!
//! # Example
//!
//! ```no_run
//! use scrs::{CompileBuilder, CompileFlags, ShaderStage, ShadingLanguage};
//!
//! let source = r#"
//!     float4 main(float4 pos : SV_POSITION) : SV_TARGET {
//!         return pos;
//!     }
//! "#;
//!
//! // Compile a pixel shader to SPIR-V and GLSL in one pass
//! let results = CompileBuilder::new(source, ShaderStage::Pixel)
//!     .with_flags(CompileFlags::NEED_REFLECTION)
//!     .target(ShadingLanguage::SpirV)
//!     .target(ShadingLanguage::Glsl)
//!     .compile_all();
//!
//! for result in results {
//!     let result = result.unwrap();
//!     println!("{}: {} bytes", result.language, result.target.len());
//! }
//! ```

mod blob;
mod compile;
mod disassemble;
mod error;
mod flags;
mod include;
mod parts;
mod preprocess;
pub mod reflect;

pub use blob::Blob;
pub use compile::{CompileBuilder, CompileResult, Define, Target, compile};
pub use disassemble::{DisassembleBuilder, disassemble};
pub use error::{Error, Result, Status};
pub use flags::{BindingShifts, CompileFlags, DisassembleFlags, StripFlags};
pub use include::{FileSystemInclude, IncludeHandler, MemoryInclude};
pub use parts::{
    get_blob_part, get_debug_info, get_input_signature, get_output_signature, strip_debug_info,
    strip_shader,
};
pub use preprocess::{PreprocessBuilder, PreprocessResult, preprocess};
pub use reflect::ShaderReflection;
pub use shaderconductor::container::BlobPart;
pub use shaderconductor::reflect::{DataType, ResourceKind};
pub use shaderconductor::{ShaderModel, ShaderStage, ShadingLanguage};

/// Version of the C ABI this crate was built against.
pub fn abi_version() -> u32 {
    shaderconductor::ffi::ScGetAbiVersion()
}
