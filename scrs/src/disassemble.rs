//! Shader disassembly API

use crate::compile::RawResult;
use crate::{DisassembleFlags, Error, Result, ShadingLanguage, Status};
use shaderconductor::ffi::{ScDisassemble, ScDisassembleDesc};
use std::fmt::Write;

/// Builder for shader disassembly
///
/// # Example
/// ```no_run
/// use scrs::{compile, DisassembleBuilder, DisassembleFlags, ShaderStage, ShadingLanguage};
///
/// let bytecode = compile(
///     "float4 main() : SV_TARGET { return float4(1,0,0,1); }",
///     "main",
///     ShaderStage::Pixel,
///     ShadingLanguage::Dxil,
/// ).unwrap();
///
/// let listing = DisassembleBuilder::new(ShadingLanguage::Dxil, &bytecode)
///     .flags(DisassembleFlags::ENABLE_INSTRUCTION_NUMBERING)
///     .comment("My shader")
///     .disassemble()
///     .unwrap();
///
/// println!("{}", listing);
/// ```
pub struct DisassembleBuilder<'a> {
    language: ShadingLanguage,
    binary: &'a [u8],
    flags: DisassembleFlags,
    comment: Option<String>,
}

impl<'a> DisassembleBuilder<'a> {
    /// Creates a disassemble builder for a DXIL or SPIR-V binary.
    pub fn new(language: ShadingLanguage, binary: &'a [u8]) -> Self {
        DisassembleBuilder {
            language,
            binary,
            flags: DisassembleFlags::empty(),
            comment: None,
        }
    }

    /// Sets disassembly flags.
    pub fn flags(mut self, flags: DisassembleFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Adds disassembly flags.
    pub fn with_flags(mut self, flags: DisassembleFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Enables instruction numbering.
    pub fn with_instruction_numbering(self) -> Self {
        self.with_flags(DisassembleFlags::ENABLE_INSTRUCTION_NUMBERING)
    }

    /// Sets a comment placed at the top of the listing.
    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    /// Disassembles the binary.
    pub fn disassemble(self) -> Result<String> {
        let desc = ScDisassembleDesc {
            language: self.language as u32,
            binary: self.binary.as_ptr().cast(),
            binary_size: self.binary.len(),
        };
        let mut out = RawResult::new();
        let status = Status(unsafe { ScDisassemble(&desc, &mut out.0) });
        let (listing, _) =
            out.finish(status, |status, message| Error::Disassembly { status, message })?;
        Ok(self.decorate(&listing.to_string_lossy()))
    }

    fn decorate(&self, listing: &str) -> String {
        let mut text = String::with_capacity(listing.len());
        if let Some(comment) = &self.comment {
            for line in comment.lines() {
                let _ = writeln!(text, "; {}", line);
            }
        }
        let mut number = 0usize;
        for line in listing.lines() {
            let is_comment = line.trim_start().starts_with(';');
            if is_comment && self.flags.contains(DisassembleFlags::INSTRUCTION_ONLY) {
                continue;
            }
            let numbered = self.flags.contains(DisassembleFlags::ENABLE_INSTRUCTION_NUMBERING)
                && !is_comment
                && !line.trim().is_empty();
            if numbered {
                let _ = writeln!(text, "{:4}: {}", number, line);
                number += 1;
            } else {
                let _ = writeln!(text, "{}", line);
            }
        }
        text
    }
}

/// Convenience function for simple disassembly.
///
/// # Example
/// ```no_run
/// use scrs::{compile, disassemble, ShaderStage, ShadingLanguage};
///
/// let spirv = compile(
///     "float4 main() : SV_TARGET { return float4(1,0,0,1); }",
///     "main",
///     ShaderStage::Pixel,
///     ShadingLanguage::SpirV,
/// ).unwrap();
///
/// println!("{}", disassemble(ShadingLanguage::SpirV, &spirv).unwrap());
/// ```
pub fn disassemble(language: ShadingLanguage, binary: &[u8]) -> Result<String> {
    DisassembleBuilder::new(language, binary).disassemble()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ShaderStage, compile};

    const PIXEL: &str = "float4 main() : SV_TARGET { return float4(1,0,0,1); }";

    #[test]
    fn test_disassemble_dxil() {
        let bytecode = compile(PIXEL, "main", ShaderStage::Pixel, ShadingLanguage::Dxil).unwrap();
        let text = disassemble(ShadingLanguage::Dxil, &bytecode).unwrap();
        assert!(text.contains("ps_6_0"), "Should contain shader model");
    }

    #[test]
    fn test_disassemble_with_options() {
        let bytecode = compile(PIXEL, "main", ShaderStage::Pixel, ShadingLanguage::Dxil).unwrap();
        let text = DisassembleBuilder::new(ShadingLanguage::Dxil, &bytecode)
            .with_instruction_numbering()
            .with_flags(DisassembleFlags::INSTRUCTION_ONLY)
            .comment("Test shader")
            .disassemble()
            .unwrap();

        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("; Test shader"));
        assert!(lines.all(|l| !l.starts_with(';')));
        assert!(text.contains("   0: "));
    }

    #[test]
    fn test_disassemble_spirv() {
        let spirv = compile(PIXEL, "main", ShaderStage::Pixel, ShadingLanguage::SpirV).unwrap();
        let text = disassemble(ShadingLanguage::SpirV, &spirv).unwrap();
        assert!(text.contains("OpEntryPoint"));
    }

    #[test]
    fn test_text_language_is_rejected() {
        let err = disassemble(ShadingLanguage::Glsl, b"#version 450\n").unwrap_err();
        assert!(matches!(
            err,
            Error::Disassembly { message, .. } if message.starts_with("Invalid argument")
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(disassemble(ShadingLanguage::Dxil, b"not a container").is_err());
    }
}
