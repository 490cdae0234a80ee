use crate::error::{Error, Result};
use rspirv::binary::Disassemble;
use rspirv::dr;
use std::panic::catch_unwind;

const SPIRV_MAGIC: u32 = 0x0723_0203;
const HEADER_WORDS: usize = 5;

pub fn disassemble(binary: &[u8]) -> Result<String> {
    if binary.len() % 4 != 0 {
        return Err(Error::Disassemble(format!(
            "SPIR-V size {} is not a multiple of 4",
            binary.len()
        )));
    }
    let words: Vec<u32> = binary
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    match words.first() {
        Some(&SPIRV_MAGIC) => {}
        Some(&other) => {
            return Err(Error::Disassemble(format!("bad SPIR-V magic {:#010x}", other)));
        }
        None => return Err(Error::Disassemble("empty SPIR-V binary".to_string())),
    }
    check_instruction_stream(&words)?;
    // rspirv asserts on some operand shapes instead of returning errors
    let listing = catch_unwind(|| dr::load_words(&words).map(|module| module.disassemble()))
        .map_err(|_| Error::Disassemble("malformed SPIR-V: inconsistent operands".to_string()))?;
    let text = listing.map_err(|e| Error::Disassemble(format!("malformed SPIR-V: {:?}", e)))?;
    debug_log!("SPIR-V listing: {} lines", text.lines().count());
    Ok(text)
}

/// Checks the header length and that every instruction's word count stays
/// inside the module.
fn check_instruction_stream(words: &[u32]) -> Result<()> {
    if words.len() < HEADER_WORDS {
        return Err(Error::Disassemble(format!(
            "malformed SPIR-V: header needs {} words, have {}",
            HEADER_WORDS,
            words.len()
        )));
    }
    let mut offset = HEADER_WORDS;
    while offset < words.len() {
        let count = (words[offset] >> 16) as usize;
        if count == 0 {
            return Err(Error::Disassemble(format!(
                "malformed SPIR-V: zero word count at word {}",
                offset
            )));
        }
        if count > words.len() - offset {
            return Err(Error::Disassemble(format!(
                "malformed SPIR-V: instruction at word {} needs {} words, {} remain",
                offset,
                count,
                words.len() - offset
            )));
        }
        offset += count;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{OptionsDesc, ShaderStage, ShadingLanguage, TargetDesc};
    use crate::emit::test_support::*;
    use crate::emit::{EmitContext, emit};

    #[test]
    fn test_lists_compiled_module() {
        let module = module(PIXEL, "PS", ShaderStage::Pixel);
        let options = OptionsDesc::default();
        let target = TargetDesc::new(ShadingLanguage::SpirV);
        let output = emit(&module, &EmitContext::new(&options, &target)).unwrap();
        let text = disassemble(output.blob.data()).unwrap();
        assert!(text.contains("OpEntryPoint"));
        assert!(text.contains("OpImageSampleImplicitLod"));
    }

    #[test]
    fn test_rejects_bad_magic_and_size() {
        assert!(matches!(
            disassemble(&[1, 2, 3]),
            Err(Error::Disassemble(message)) if message.contains("multiple of 4")
        ));
        assert!(matches!(
            disassemble(&0xDEAD_BEEFu32.to_le_bytes()),
            Err(Error::Disassemble(message)) if message.contains("magic")
        ));
    }

    #[test]
    fn test_rejects_truncated_module() {
        let mut bytes = Vec::new();
        for word in [SPIRV_MAGIC, 0x0001_0000, 0, 10, 0] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        // OpCapability with a word count running past the end
        bytes.extend_from_slice(&(17u32 | 4 << 16).to_le_bytes());
        assert!(disassemble(&bytes).is_err());
    }

    fn compiled_pixel_shader() -> Vec<u8> {
        let module = module(PIXEL, "PS", ShaderStage::Pixel);
        let options = OptionsDesc::default();
        let target = TargetDesc::new(ShadingLanguage::SpirV);
        let output = emit(&module, &EmitContext::new(&options, &target)).unwrap();
        output.blob.data().to_vec()
    }

    #[test]
    fn test_every_truncation_is_an_error_or_a_listing() {
        let bytes = compiled_pixel_shader();
        assert!(disassemble(&bytes).is_ok());
        for words in 0..bytes.len() / 4 {
            // Must return, never unwind
            let _ = disassemble(&bytes[..words * 4]);
        }
        assert!(matches!(
            disassemble(&bytes[..36]),
            Err(Error::Disassemble(message)) if message.starts_with("malformed SPIR-V")
        ));
    }

    #[test]
    fn test_corrupted_words_do_not_unwind() {
        let bytes = compiled_pixel_shader();
        for word in HEADER_WORDS..(bytes.len() / 4).min(96) {
            for pattern in [0u32, 0xFFFF_FFFF, 0x0001_0000] {
                let mut corrupted = bytes.clone();
                corrupted[word * 4..word * 4 + 4].copy_from_slice(&pattern.to_le_bytes());
                let _ = disassemble(&corrupted);
            }
        }
    }
}
