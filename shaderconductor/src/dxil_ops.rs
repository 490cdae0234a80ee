//! Instruction set of the `DXIL` program part.
//!
//! The program is a flat stream of 32-bit words. Every instruction starts
//! with a header word holding the opcode in the low 16 bits and the total
//! word count (header included) in the high 16 bits. Instructions that
//! define a value follow the header with a result type id and a result id;
//! type declarations use `0` as their result type. Control flow is
//! structured (`if`/`loop`/`switch` markers), so values never cross block
//! boundaries except through memory.

use crate::desc::ShaderStage;
use crate::ir::Intrinsic;
use shaderconductor_proc::opcode_table;
use thiserror::Error;

/// `DXIL` magic inside the program header
pub const DXIL_MAGIC: u32 = u32::from_le_bytes(*b"DXIL");
/// Bytecode format version stored in the program header (1.0)
pub const DXIL_VERSION: u32 = 0x0100;
/// Program version word plus size word plus the 16-byte bytecode header
pub const PROGRAM_HEADER_SIZE: usize = 24;

opcode_table! {
    /// Opcodes of the structured SSA bytecode
    DxilOp {
        /// stage, function, name
        EntryPoint = 0x01 => "entry_point" (*);
        /// target, name
        Name = 0x02 => "name" (*);
        /// entry function, x, y, z
        NumThreads = 0x03 => "num_threads" (4);
        /// variable, register class, register, space
        Binding = 0x04 => "binding" (4);
        /// struct type, member, byte offset
        MemberOffset = 0x05 => "member_offset" (3);
        /// struct type, member, row-major flag
        MatrixOrientation = 0x06 => "matrix_orientation" (3);

        TypeVoid = 0x10 => "type.void" -> (0);
        TypeBool = 0x11 => "type.bool" -> (0);
        /// width, signed
        TypeInt = 0x12 => "type.int" -> (2);
        /// width
        TypeFloat = 0x13 => "type.float" -> (1);
        /// component type, count
        TypeVector = 0x14 => "type.vector" -> (2);
        /// component type, rows, columns
        TypeMatrix = 0x15 => "type.matrix" -> (3);
        /// element type, length
        TypeArray = 0x16 => "type.array" -> (2);
        TypeStruct = 0x17 => "type.struct" -> (*);
        /// sampled type, dimension, arrayed, multisampled, read-write, components
        TypeTexture = 0x18 => "type.texture" -> (6);
        /// comparison flag
        TypeSampler = 0x19 => "type.sampler" -> (1);
        /// buffer kind, read-write, element type
        TypeBuffer = 0x1A => "type.buffer" -> (3);
        /// address space, pointee
        TypePointer = 0x1B => "type.pointer" -> (2);
        /// result type, parameter types
        TypeFunction = 0x1C => "type.function" -> (*);

        /// one or two literal words
        Constant = 0x20 => "constant" -> (*);
        ConstantComposite = 0x21 => "constant_composite" -> (*);
        /// address space, initializer or 0
        GlobalVariable = 0x22 => "global" -> (2);

        /// function type
        Function = 0x30 => "function" -> (1);
        Parameter = 0x31 => "parameter" -> (0);
        FunctionEnd = 0x32 => "function_end" (0);
        /// callee, arguments
        Call = 0x33 => "call" -> (*);
        Alloca = 0x34 => "alloca" -> (0);
        Load = 0x35 => "load" -> (1);
        /// pointer, value
        Store = 0x36 => "store" (2);
        /// base pointer, indices
        GetElementPtr = 0x37 => "getelementptr" -> (*);
        /// signature element
        LoadInput = 0x38 => "load_input" -> (1);
        /// signature element, value
        StoreOutput = 0x39 => "store_output" (2);
        ThreadId = 0x3A => "thread_id" -> (0);
        GroupId = 0x3B => "group_id" -> (0);
        ThreadIdInGroup = 0x3C => "thread_id_in_group" -> (0);
        FlattenedThreadIdInGroup = 0x3D => "flattened_thread_id_in_group" -> (0);

        FAdd = 0x40 => "fadd" -> (2);
        FSub = 0x41 => "fsub" -> (2);
        FMul = 0x42 => "fmul" -> (2);
        FDiv = 0x43 => "fdiv" -> (2);
        FRem = 0x44 => "frem" -> (2);
        Add = 0x45 => "add" -> (2);
        Sub = 0x46 => "sub" -> (2);
        Mul = 0x47 => "mul" -> (2);
        SDiv = 0x48 => "sdiv" -> (2);
        UDiv = 0x49 => "udiv" -> (2);
        SRem = 0x4A => "srem" -> (2);
        URem = 0x4B => "urem" -> (2);
        Shl = 0x4C => "shl" -> (2);
        AShr = 0x4D => "ashr" -> (2);
        LShr = 0x4E => "lshr" -> (2);
        And = 0x4F => "and" -> (2);
        Or = 0x50 => "or" -> (2);
        Xor = 0x51 => "xor" -> (2);
        /// predicate, left, right
        FCmp = 0x52 => "fcmp" -> (3);
        /// predicate, left, right
        ICmp = 0x53 => "icmp" -> (3);
        FNeg = 0x54 => "fneg" -> (1);
        Neg = 0x55 => "neg" -> (1);
        Not = 0x56 => "not" -> (1);
        LogicalNot = 0x57 => "lnot" -> (1);
        LogicalAnd = 0x58 => "land" -> (2);
        LogicalOr = 0x59 => "lor" -> (2);
        /// condition, accept, reject
        Select = 0x5A => "select" -> (3);

        FPToSI = 0x60 => "fptosi" -> (1);
        FPToUI = 0x61 => "fptoui" -> (1);
        SIToFP = 0x62 => "sitofp" -> (1);
        UIToFP = 0x63 => "uitofp" -> (1);
        FPCast = 0x64 => "fpcast" -> (1);
        /// value, source is signed
        IntCast = 0x65 => "intcast" -> (2);
        Bitcast = 0x66 => "bitcast" -> (1);

        /// composite, literal indices
        Extract = 0x70 => "extract" -> (*);
        /// object, composite, literal indices
        Insert = 0x71 => "insert" -> (*);
        /// first, second, literal components
        Shuffle = 0x72 => "shuffle" -> (*);
        Composite = 0x73 => "composite" -> (*);
        /// composite, index
        ExtractDynamic = 0x74 => "extract_dynamic" -> (2);

        /// intrinsic code, arguments
        Intrinsic = 0x80 => "intrinsic" -> (*);
        /// HLSL `mul` operands in source order
        MatMul = 0x81 => "matmul" -> (2);

        /// texture, sampler, coordinate, offset or 0
        Sample = 0x90 => "sample" -> (4);
        /// texture, sampler, coordinate, offset or 0, bias
        SampleBias = 0x91 => "sample_bias" -> (5);
        /// texture, sampler, coordinate, offset or 0, level
        SampleLevel = 0x92 => "sample_level" -> (5);
        /// texture, sampler, coordinate, offset or 0, ddx, ddy
        SampleGrad = 0x93 => "sample_grad" -> (6);
        /// texture, sampler, coordinate, offset or 0, reference
        SampleCmp = 0x94 => "sample_cmp" -> (5);
        /// texture, sampler, coordinate, offset or 0, reference, level
        SampleCmpLevel = 0x95 => "sample_cmp_level" -> (6);
        /// texture, sampler, coordinate, offset or 0, reference
        SampleCmpLevelZero = 0x96 => "sample_cmp_level_zero" -> (5);
        /// resource, coordinate, level or sample or 0
        TextureLoad = 0x97 => "texture_load" -> (3);
        /// resource, coordinate, value
        TextureStore = 0x98 => "texture_store" (3);
        /// barrier flags
        Barrier = 0x99 => "barrier" (1);

        If = 0xA0 => "if" (1);
        Else = 0xA1 => "else" (0);
        EndIf = 0xA2 => "endif" (0);
        Loop = 0xA3 => "loop" (0);
        Continuing = 0xA4 => "continuing" (0);
        BreakIf = 0xA5 => "break_if" (1);
        EndLoop = 0xA6 => "endloop" (0);
        Switch = 0xA7 => "switch" (1);
        /// literal case value
        Case = 0xA8 => "case" (1);
        Default = 0xA9 => "default" (0);
        EndSwitch = 0xAA => "endswitch" (0);
        Break = 0xAB => "break" (0);
        Continue = 0xAC => "continue" (0);
        Return = 0xAD => "ret" (0);
        ReturnValue = 0xAE => "ret_value" (1);
        Discard = 0xAF => "discard" (0);
    }
}

impl DxilOp {
    /// Whether the instruction opens a nested region in listings.
    pub fn opens_region(self) -> bool {
        matches!(
            self,
            DxilOp::Function
                | DxilOp::If
                | DxilOp::Else
                | DxilOp::Loop
                | DxilOp::Continuing
                | DxilOp::Switch
                | DxilOp::Case
                | DxilOp::Default
        )
    }

    /// Whether the instruction closes a region opened earlier.
    pub fn closes_region(self) -> bool {
        matches!(
            self,
            DxilOp::FunctionEnd
                | DxilOp::Else
                | DxilOp::EndIf
                | DxilOp::Continuing
                | DxilOp::EndLoop
                | DxilOp::Case
                | DxilOp::Default
                | DxilOp::EndSwitch
        )
    }
}

/// Address spaces of pointers and global variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AddressSpace {
    Function = 0,
    Private = 1,
    GroupShared = 2,
    ConstantBuffer = 3,
    Resource = 4,
}

impl AddressSpace {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => AddressSpace::Function,
            1 => AddressSpace::Private,
            2 => AddressSpace::GroupShared,
            3 => AddressSpace::ConstantBuffer,
            4 => AddressSpace::Resource,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            AddressSpace::Function => "function",
            AddressSpace::Private => "private",
            AddressSpace::GroupShared => "groupshared",
            AddressSpace::ConstantBuffer => "cbuffer",
            AddressSpace::Resource => "resource",
        }
    }
}

/// Comparison predicates of `fcmp` (ordered) and `icmp`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Predicate {
    Eq = 0,
    Ne = 1,
    SLt = 2,
    SLe = 3,
    SGt = 4,
    SGe = 5,
    ULt = 6,
    ULe = 7,
    UGt = 8,
    UGe = 9,
}

impl Predicate {
    const ALL: [Predicate; 10] = [
        Predicate::Eq,
        Predicate::Ne,
        Predicate::SLt,
        Predicate::SLe,
        Predicate::SGt,
        Predicate::SGe,
        Predicate::ULt,
        Predicate::ULe,
        Predicate::UGt,
        Predicate::UGe,
    ];

    pub fn from_u32(value: u32) -> Option<Self> {
        Predicate::ALL.get(value as usize).copied()
    }

    /// Spelling in listings; floating-point compares use the signed forms.
    pub fn name(self, float: bool) -> &'static str {
        match (self, float) {
            (Predicate::Eq, true) => "oeq",
            (Predicate::Ne, true) => "une",
            (Predicate::SLt | Predicate::ULt, true) => "olt",
            (Predicate::SLe | Predicate::ULe, true) => "ole",
            (Predicate::SGt | Predicate::UGt, true) => "ogt",
            (Predicate::SGe | Predicate::UGe, true) => "oge",
            (Predicate::Eq, false) => "eq",
            (Predicate::Ne, false) => "ne",
            (Predicate::SLt, false) => "slt",
            (Predicate::SLe, false) => "sle",
            (Predicate::SGt, false) => "sgt",
            (Predicate::SGe, false) => "sge",
            (Predicate::ULt, false) => "ult",
            (Predicate::ULe, false) => "ule",
            (Predicate::UGt, false) => "ugt",
            (Predicate::UGe, false) => "uge",
        }
    }
}

/// Barrier flag bits
pub mod barrier {
    pub const SYNC_GROUP: u32 = 0x1;
    pub const GROUP_MEMORY: u32 = 0x2;
    pub const DEVICE_MEMORY: u32 = 0x4;
}

/// Intrinsics in code order; the code of an intrinsic is its position.
pub const INTRINSICS: &[Intrinsic] = &[
    Intrinsic::Abs,
    Intrinsic::Acos,
    Intrinsic::Asin,
    Intrinsic::Atan,
    Intrinsic::Atan2,
    Intrinsic::Ceil,
    Intrinsic::Clamp,
    Intrinsic::Cos,
    Intrinsic::Cosh,
    Intrinsic::Cross,
    Intrinsic::Ddx,
    Intrinsic::Ddy,
    Intrinsic::DdxCoarse,
    Intrinsic::DdyCoarse,
    Intrinsic::DdxFine,
    Intrinsic::DdyFine,
    Intrinsic::Degrees,
    Intrinsic::Determinant,
    Intrinsic::Distance,
    Intrinsic::Dot,
    Intrinsic::Exp,
    Intrinsic::Exp2,
    Intrinsic::FaceForward,
    Intrinsic::Floor,
    Intrinsic::Fmod,
    Intrinsic::Frac,
    Intrinsic::Fwidth,
    Intrinsic::IsInf,
    Intrinsic::IsNan,
    Intrinsic::Ldexp,
    Intrinsic::Length,
    Intrinsic::Lerp,
    Intrinsic::Log,
    Intrinsic::Log10,
    Intrinsic::Log2,
    Intrinsic::Mad,
    Intrinsic::Max,
    Intrinsic::Min,
    Intrinsic::Normalize,
    Intrinsic::Pow,
    Intrinsic::Radians,
    Intrinsic::Rcp,
    Intrinsic::Reflect,
    Intrinsic::Refract,
    Intrinsic::Round,
    Intrinsic::Rsqrt,
    Intrinsic::Saturate,
    Intrinsic::Sign,
    Intrinsic::Sin,
    Intrinsic::Sinh,
    Intrinsic::Smoothstep,
    Intrinsic::Sqrt,
    Intrinsic::Step,
    Intrinsic::Tan,
    Intrinsic::Tanh,
    Intrinsic::Transpose,
    Intrinsic::Trunc,
    Intrinsic::All,
    Intrinsic::Any,
    Intrinsic::CountBits,
    Intrinsic::ReverseBits,
    Intrinsic::FirstBitHigh,
    Intrinsic::FirstBitLow,
];

pub fn intrinsic_code(intrinsic: Intrinsic) -> u32 {
    INTRINSICS
        .iter()
        .position(|&i| i == intrinsic)
        .map_or(u32::MAX, |p| p as u32)
}

pub fn intrinsic_from_code(code: u32) -> Option<Intrinsic> {
    INTRINSICS.get(code as usize).copied()
}

/// Program kind stored in the version word, in `D3D12_SHADER_VERSION_TYPE` order.
pub fn program_kind(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Pixel => 0,
        ShaderStage::Vertex => 1,
        ShaderStage::Geometry => 2,
        ShaderStage::Hull => 3,
        ShaderStage::Domain => 4,
        ShaderStage::Compute => 5,
    }
}

pub fn stage_from_kind(kind: u32) -> Option<ShaderStage> {
    Some(match kind {
        0 => ShaderStage::Pixel,
        1 => ShaderStage::Vertex,
        2 => ShaderStage::Geometry,
        3 => ShaderStage::Hull,
        4 => ShaderStage::Domain,
        5 => ShaderStage::Compute,
        _ => return None,
    })
}

/// Packs a string into NUL-terminated, zero-padded little-endian words.
pub fn encode_string(text: &str, out: &mut Vec<u32>) {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    out.extend(
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
    );
}

/// Reads a string written by [`encode_string`]; returns it with the number
/// of words consumed.
pub fn decode_string(words: &[u32]) -> Option<(String, usize)> {
    let mut bytes = Vec::new();
    for (i, word) in words.iter().enumerate() {
        for byte in word.to_le_bytes() {
            if byte == 0 {
                return Some((String::from_utf8_lossy(&bytes).into_owned(), i + 1));
            }
            bytes.push(byte);
        }
    }
    None
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("instruction at word {offset} is truncated")]
    Truncated { offset: usize },

    #[error("unknown opcode {code:#x} at word {offset}")]
    UnknownOpcode { code: u16, offset: usize },

    #[error("'{op}' at word {offset} has {found} operands, expected {expected}")]
    OperandCount {
        op: DxilOp,
        offset: usize,
        expected: usize,
        found: usize,
    },

    #[error("instruction '{op}' at word {offset} does not fit in a single instruction")]
    TooLong { op: DxilOp, offset: usize },
}

/// One decoded or to-be-encoded instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub op: DxilOp,
    /// Result type id; `0` for type declarations and void instructions
    pub result_type: u32,
    /// Result id; `0` when the opcode defines no value
    pub result: u32,
    pub operands: Vec<u32>,
}

impl Instruction {
    pub fn new(op: DxilOp, operands: Vec<u32>) -> Self {
        Instruction {
            op,
            result_type: 0,
            result: 0,
            operands,
        }
    }

    pub fn with_result(op: DxilOp, result_type: u32, result: u32, operands: Vec<u32>) -> Self {
        Instruction {
            op,
            result_type,
            result,
            operands,
        }
    }

    fn word_count(&self) -> usize {
        1 + if self.op.has_result() { 2 } else { 0 } + self.operands.len()
    }

    /// Appends the encoded instruction to `out`.
    pub fn encode(&self, out: &mut Vec<u32>) -> Result<(), DecodeError> {
        let count = self.word_count();
        if count > u16::MAX as usize {
            return Err(DecodeError::TooLong {
                op: self.op,
                offset: out.len(),
            });
        }
        out.push(self.op.code() as u32 | (count as u32) << 16);
        if self.op.has_result() {
            out.push(self.result_type);
            out.push(self.result);
        }
        out.extend_from_slice(&self.operands);
        Ok(())
    }

    /// Decodes the instruction starting at `words[offset]`; returns it with
    /// its length in words.
    pub fn decode(words: &[u32], offset: usize) -> Result<(Instruction, usize), DecodeError> {
        let header = *words.get(offset).ok_or(DecodeError::Truncated { offset })?;
        let code = (header & 0xFFFF) as u16;
        let count = (header >> 16) as usize;
        let op = DxilOp::from_code(code).ok_or(DecodeError::UnknownOpcode { code, offset })?;
        let fixed = if op.has_result() { 3 } else { 1 };
        if count < fixed || offset + count > words.len() {
            return Err(DecodeError::Truncated { offset });
        }
        let operands = words[offset + fixed..offset + count].to_vec();
        if let Some(expected) = op.operand_count() {
            if operands.len() != expected {
                return Err(DecodeError::OperandCount {
                    op,
                    offset,
                    expected,
                    found: operands.len(),
                });
            }
        }
        let (result_type, result) = if op.has_result() {
            (words[offset + 1], words[offset + 2])
        } else {
            (0, 0)
        };
        Ok((
            Instruction {
                op,
                result_type,
                result,
                operands,
            },
            count,
        ))
    }
}

/// Version and size words in front of the bytecode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    pub stage: ShaderStage,
    pub major: u8,
    pub minor: u8,
    /// Bytecode size in words
    pub code_words: u32,
}

impl ProgramHeader {
    pub fn write(&self, out: &mut Vec<u8>) {
        let version = program_kind(self.stage) << 16 | (self.major as u32) << 4 | self.minor as u32;
        let code_bytes = self.code_words * 4;
        let total_words = PROGRAM_HEADER_SIZE as u32 / 4 + self.code_words;
        for word in [version, total_words, DXIL_MAGIC, DXIL_VERSION, 16, code_bytes] {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }

    /// Parses the header and returns it with the bytecode words.
    pub fn parse(part: &[u8]) -> Result<(ProgramHeader, Vec<u32>), String> {
        if part.len() < PROGRAM_HEADER_SIZE {
            return Err(format!("program part of {} bytes is too small", part.len()));
        }
        let word = |i: usize| u32::from_le_bytes([part[i * 4], part[i * 4 + 1], part[i * 4 + 2], part[i * 4 + 3]]);
        let version = word(0);
        if word(2) != DXIL_MAGIC {
            return Err("program part lacks the DXIL magic".to_string());
        }
        let stage = stage_from_kind(version >> 16)
            .ok_or_else(|| format!("unknown program kind {}", version >> 16))?;
        let code_offset = 8 + word(4) as usize;
        let code_bytes = word(5) as usize;
        let end = code_offset
            .checked_add(code_bytes)
            .filter(|&end| end <= part.len() && code_bytes % 4 == 0)
            .ok_or_else(|| "program bytecode exceeds its part".to_string())?;
        let code = part[code_offset..end]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect::<Vec<_>>();
        Ok((
            ProgramHeader {
                stage,
                major: ((version >> 4) & 0xF) as u8,
                minor: (version & 0xF) as u8,
                code_words: code.len() as u32,
            },
            code,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_opcode_table_lookups() {
        assert_eq!(DxilOp::from_code(0x40), Some(DxilOp::FAdd));
        assert_eq!(DxilOp::FAdd.mnemonic(), "fadd");
        assert!(DxilOp::FAdd.has_result());
        assert!(!DxilOp::Store.has_result());
        assert_eq!(DxilOp::Store.operand_count(), Some(2));
        assert_eq!(DxilOp::Call.operand_count(), None);
        assert_eq!(DxilOp::from_code(0xFFFF), None);
        assert!(DxilOp::ALL.iter().all(|&op| DxilOp::from_code(op.code()) == Some(op)));
    }

    #[test]
    fn test_instruction_decode_checks_arity() {
        let mut words = Vec::new();
        Instruction::with_result(DxilOp::FAdd, 1, 5, vec![3, 4])
            .encode(&mut words)
            .unwrap();
        Instruction::new(DxilOp::Return, vec![]).encode(&mut words).unwrap();
        let (first, len) = Instruction::decode(&words, 0).unwrap();
        assert_eq!(len, 5);
        assert_eq!(first.result, 5);
        assert_eq!(first.operands, vec![3, 4]);
        let (second, _) = Instruction::decode(&words, len).unwrap();
        assert_eq!(second.op, DxilOp::Return);

        // fadd with a single operand
        let bad = [DxilOp::FAdd.code() as u32 | 4 << 16, 1, 5, 3];
        assert!(matches!(
            Instruction::decode(&bad, 0),
            Err(DecodeError::OperandCount { expected: 2, found: 1, .. })
        ));
        assert!(matches!(
            Instruction::decode(&[0x7777 | 1 << 16], 0),
            Err(DecodeError::UnknownOpcode { code: 0x7777, .. })
        ));
        assert!(matches!(
            Instruction::decode(&[DxilOp::Store.code() as u32 | 3 << 16, 1], 0),
            Err(DecodeError::Truncated { offset: 0 })
        ));
    }

    #[test]
    fn test_strings_are_padded() {
        let mut words = Vec::new();
        encode_string("main", &mut words);
        assert_eq!(words.len(), 2);
        assert_eq!(decode_string(&words), Some(("main".to_string(), 2)));
        assert_eq!(decode_string(&[u32::from_le_bytes(*b"abcd")]), None);
    }

    #[test]
    fn test_intrinsic_codes_are_stable() {
        assert_eq!(intrinsic_code(Intrinsic::Abs), 0);
        for &intrinsic in INTRINSICS {
            assert_eq!(intrinsic_from_code(intrinsic_code(intrinsic)), Some(intrinsic));
        }
    }

    #[test]
    fn test_program_header_parse() {
        let mut part = Vec::new();
        ProgramHeader {
            stage: ShaderStage::Compute,
            major: 6,
            minor: 2,
            code_words: 1,
        }
        .write(&mut part);
        part.extend_from_slice(&7u32.to_le_bytes());
        let (header, code) = ProgramHeader::parse(&part).unwrap();
        assert_eq!(header.stage, ShaderStage::Compute);
        assert_eq!((header.major, header.minor), (6, 2));
        assert_eq!(code, vec![7]);
        assert!(ProgramHeader::parse(&part[..20]).is_err());
    }
}
