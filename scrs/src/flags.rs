//! Compile, strip, and disassemble flags

use bitflags::bitflags;

bitflags! {
    /// Boolean switches of the compile options
    ///
    /// The numeric options (optimization level, shader model, binding
    /// shifts) are set separately on the builder.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CompileFlags: u32 {
        /// Pack matrices in row-major order (set by default)
        const PACK_MATRIX_ROW_MAJOR = 1 << 0;

        /// Allow `half`, `min16float` and friends as real 16-bit types (SM 6.2+)
        const ENABLE_16BIT_TYPES = 1 << 1;

        /// Embed debug information in the output
        const DEBUG_INFO = 1 << 2;

        /// Skip optimization passes
        const SKIP_OPTIMIZATION = 1 << 3;

        /// Produce reflection data alongside the target
        const NEED_REFLECTION = 1 << 4;

        /// Combined image samplers take the binding of their texture
        const INHERIT_COMBINED_SAMPLER_BINDINGS = 1 << 5;
    }
}

impl Default for CompileFlags {
    fn default() -> Self {
        CompileFlags::PACK_MATRIX_ROW_MAJOR
    }
}

/// Amounts added to every register of each resource class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BindingShifts {
    /// `t` registers
    pub textures: i32,
    /// `s` registers
    pub samplers: i32,
    /// `b` registers
    pub cbuffers: i32,
    /// `u` registers
    pub ua_buffers: i32,
}

impl BindingShifts {
    /// Shifts every class by the same amount.
    pub fn all(shift: i32) -> Self {
        BindingShifts {
            textures: shift,
            samplers: shift,
            cbuffers: shift,
            ua_buffers: shift,
        }
    }
}

bitflags! {
    /// Parts to remove from a DXIL container
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StripFlags: u32 {
        /// Strip input and output signatures
        const SIGNATURES = shaderconductor::container::STRIP_SIGNATURES;

        /// Strip debug information and the debug name
        const DEBUG_INFO = shaderconductor::container::STRIP_DEBUG_INFO;
    }
}

impl Default for StripFlags {
    fn default() -> Self {
        StripFlags::empty()
    }
}

bitflags! {
    /// Post-processing applied to disassembly listings
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DisassembleFlags: u32 {
        /// Number each instruction line
        const ENABLE_INSTRUCTION_NUMBERING = 1 << 0;

        /// Drop comment lines (headers, signatures)
        const INSTRUCTION_ONLY = 1 << 1;
    }
}

impl Default for DisassembleFlags {
    fn default() -> Self {
        DisassembleFlags::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_flags_combine() {
        let flags = CompileFlags::DEBUG_INFO | CompileFlags::NEED_REFLECTION;
        assert!(flags.contains(CompileFlags::DEBUG_INFO));
        assert!(flags.contains(CompileFlags::NEED_REFLECTION));
        assert!(!flags.contains(CompileFlags::SKIP_OPTIMIZATION));
    }

    #[test]
    fn test_default_packs_row_major() {
        assert_eq!(CompileFlags::default(), CompileFlags::PACK_MATRIX_ROW_MAJOR);
        assert!(StripFlags::default().is_empty());
        assert!(DisassembleFlags::default().is_empty());
    }

    #[test]
    fn test_strip_flags_match_container_bits() {
        assert_eq!(StripFlags::SIGNATURES.bits(), 0x1);
        assert_eq!(StripFlags::DEBUG_INFO.bits(), 0x2);
    }

    #[test]
    fn test_binding_shifts() {
        let shifts = BindingShifts::all(4);
        assert_eq!(shifts.cbuffers, 4);
        assert_eq!(shifts.ua_buffers, 4);
        assert_eq!(BindingShifts::default().textures, 0);
    }
}
