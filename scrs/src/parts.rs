//! DXIL container part extraction and stripping

use crate::{Blob, BlobPart, Error, Result, Status, StripFlags};
use shaderconductor::ffi::{ScBlob, ScGetBlobPart, ScStripShader};
use std::ptr;

/// Extracts a specific part from a compiled DXIL container.
///
/// # Example
/// ```no_run
/// use scrs::{compile, get_blob_part, BlobPart, ShaderStage, ShadingLanguage};
///
/// let bytecode = compile(
///     "float4 main(float4 pos : SV_POSITION) : SV_TARGET { return pos; }",
///     "main",
///     ShaderStage::Pixel,
///     ShadingLanguage::Dxil,
/// ).unwrap();
///
/// if let Ok(input_sig) = get_blob_part(&bytecode, BlobPart::InputSignature) {
///     println!("Input signature: {} bytes", input_sig.len());
/// }
/// ```
pub fn get_blob_part(bytecode: &[u8], part: BlobPart) -> Result<Blob> {
    let mut blob: *mut ScBlob = ptr::null_mut();
    let status = Status(unsafe {
        ScGetBlobPart(bytecode.as_ptr().cast(), bytecode.len(), part as u32, &mut blob)
    });
    if status.is_error() {
        return Err(Error::BlobPart { status });
    }
    unsafe { Blob::from_raw(blob) }.ok_or(Error::BlobPart { status })
}

/// Extracts the input signature part.
pub fn get_input_signature(bytecode: &[u8]) -> Result<Blob> {
    get_blob_part(bytecode, BlobPart::InputSignature)
}

/// Extracts the output signature part.
pub fn get_output_signature(bytecode: &[u8]) -> Result<Blob> {
    get_blob_part(bytecode, BlobPart::OutputSignature)
}

/// Extracts the debug info part.
pub fn get_debug_info(bytecode: &[u8]) -> Result<Blob> {
    get_blob_part(bytecode, BlobPart::DebugInfo)
}

/// Strips specified parts from a compiled DXIL container.
///
/// # Example
/// ```no_run
/// use scrs::{CompileBuilder, CompileFlags, ShaderStage, StripFlags, strip_shader};
///
/// let result = CompileBuilder::new(
///     "float4 main() : SV_TARGET { return float4(1,0,0,1); }",
///     ShaderStage::Pixel,
/// )
/// .with_flags(CompileFlags::DEBUG_INFO)
/// .compile()
/// .unwrap();
///
/// let stripped = strip_shader(&result.target, StripFlags::DEBUG_INFO).unwrap();
/// println!("Original: {} bytes, Stripped: {} bytes", result.target.len(), stripped.len());
/// ```
pub fn strip_shader(bytecode: &[u8], flags: StripFlags) -> Result<Blob> {
    let mut stripped: *mut ScBlob = ptr::null_mut();
    let status = Status(unsafe {
        ScStripShader(bytecode.as_ptr().cast(), bytecode.len(), flags.bits(), &mut stripped)
    });
    if status.is_error() {
        return Err(Error::StripShader { status });
    }
    unsafe { Blob::from_raw(stripped) }.ok_or(Error::StripShader { status })
}

/// Strips debug info from a compiled shader.
///
/// Convenience function equivalent to `strip_shader(bytecode, StripFlags::DEBUG_INFO)`.
pub fn strip_debug_info(bytecode: &[u8]) -> Result<Blob> {
    strip_shader(bytecode, StripFlags::DEBUG_INFO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompileBuilder, CompileFlags, ShaderStage};

    const PIXEL: &str = "float4 main(float4 pos : SV_POSITION) : SV_TARGET { return pos; }";

    #[test]
    fn test_signatures_are_extractable() {
        let bytecode = crate::compile(PIXEL, "main", ShaderStage::Pixel, crate::ShadingLanguage::Dxil)
            .unwrap();
        assert!(!get_input_signature(&bytecode).unwrap().is_empty());
        assert!(!get_output_signature(&bytecode).unwrap().is_empty());
        assert!(matches!(
            get_debug_info(&bytecode),
            Err(Error::BlobPart { status }) if status == Status::E_FAIL
        ));
    }

    #[test]
    fn test_strip_debug_info() {
        let result = CompileBuilder::new(PIXEL, ShaderStage::Pixel)
            .with_flags(CompileFlags::DEBUG_INFO)
            .compile()
            .unwrap();
        assert!(get_debug_info(&result.target).is_ok());

        let stripped = strip_debug_info(&result.target).unwrap();
        assert!(stripped.len() < result.target.len());
        assert_eq!(&stripped[0..4], b"DXBC");
        assert!(get_debug_info(&stripped).is_err());
    }

    #[test]
    fn test_invalid_container() {
        assert!(matches!(
            strip_shader(b"nope", StripFlags::SIGNATURES),
            Err(Error::StripShader { .. })
        ));
        assert!(matches!(
            get_blob_part(&[], BlobPart::Program),
            Err(Error::BlobPart { status }) if status == Status::E_INVALIDARG
        ));
    }
}
