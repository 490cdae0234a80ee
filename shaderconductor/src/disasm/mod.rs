//! Text listings of compiled binaries.
//!
//! Only the binary targets can be disassembled. SPIR-V goes through
//! `rspirv`; DXIL containers are listed part by part with the program
//! decoded through the opcode table.

mod dxil;
mod spirv;

use crate::desc::ShadingLanguage;
use crate::error::{Error, Result};

/// Disassembles `binary`, which was produced for `language`.
pub fn disassemble_binary(language: ShadingLanguage, binary: &[u8]) -> Result<String> {
    debug_log!("disassembling {} bytes of {}", binary.len(), language);
    match language {
        ShadingLanguage::Dxil => dxil::disassemble(binary),
        ShadingLanguage::SpirV => spirv::disassemble(binary),
        _ => Err(Error::InvalidArgument(format!(
            "{} is a text language and cannot be disassembled",
            language.name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_languages_rejected() {
        for language in [ShadingLanguage::Hlsl, ShadingLanguage::Glsl, ShadingLanguage::MslIos] {
            let err = disassemble_binary(language, b"void main() {}").unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
        }
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert!(disassemble_binary(ShadingLanguage::SpirV, &[]).is_err());
        assert!(disassemble_binary(ShadingLanguage::Dxil, &[]).is_err());
    }
}
