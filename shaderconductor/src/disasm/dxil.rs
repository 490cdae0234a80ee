use crate::container::{
    Container, FOURCC_DEBUG_NAME, FOURCC_INPUT_SIGNATURE, FOURCC_OUTPUT_SIGNATURE, FOURCC_PROGRAM,
    SignatureElement, parse_signature,
};
use crate::dxil_ops::{
    AddressSpace, DxilOp, Instruction, Predicate, ProgramHeader, decode_string, intrinsic_from_code,
    stage_from_kind,
};
use crate::error::{Error, Result};
use std::fmt::Write;

pub fn disassemble(binary: &[u8]) -> Result<String> {
    let container = Container::parse(binary)?;
    let mut out = String::new();

    let names: Vec<String> = container.parts.iter().map(|p| p.name()).collect();
    let _ = writeln!(out, "; DXIL container, {} parts: {}", names.len(), names.join(" "));
    if !Container::verify(binary) {
        let _ = writeln!(out, "; warning: container digest does not match its contents");
    }
    if let Some(part) = container.part(FOURCC_DEBUG_NAME) {
        if let Some(name) = debug_name(part.data) {
            let _ = writeln!(out, "; debug name: {}", name);
        }
    }
    for (fourcc, title) in [
        (FOURCC_INPUT_SIGNATURE, "Input signature"),
        (FOURCC_OUTPUT_SIGNATURE, "Output signature"),
    ] {
        if let Some(part) = container.part(fourcc) {
            write_signature(&mut out, title, &parse_signature(part.data)?);
        }
    }

    let program = container
        .part(FOURCC_PROGRAM)
        .ok_or_else(|| Error::Disassemble("container has no DXIL part".to_string()))?;
    let (header, code) = ProgramHeader::parse(program.data).map_err(Error::Disassemble)?;
    let _ = writeln!(
        out,
        ";\n{}_{}_{}",
        header.stage.short_name(),
        header.major,
        header.minor
    );

    let mut offset = 0;
    let mut depth = 0usize;
    while offset < code.len() {
        let (inst, len) =
            Instruction::decode(&code, offset).map_err(|e| Error::Disassemble(e.to_string()))?;
        if inst.op.closes_region() {
            depth = depth.saturating_sub(1);
        }
        let _ = writeln!(out, "{}{}", "  ".repeat(depth), render(&inst));
        if inst.op.opens_region() {
            depth += 1;
        }
        offset += len;
    }
    debug_log!("DXIL listing: {} program words", code.len());
    Ok(out)
}

/// `ILDN` layout: flags, name length, nul-terminated name.
fn debug_name(data: &[u8]) -> Option<&str> {
    let len = u16::from_le_bytes([*data.get(2)?, *data.get(3)?]) as usize;
    std::str::from_utf8(data.get(4..4 + len)?).ok()
}

fn write_signature(out: &mut String, title: &str, elements: &[SignatureElement]) {
    let _ = writeln!(out, ";\n; {}:\n;", title);
    if elements.is_empty() {
        let _ = writeln!(out, "; (none)");
        return;
    }
    let _ = writeln!(
        out,
        "; {:<20} {:>5} {:>6} {:>8} {:>8} {:>7}",
        "Name", "Index", "Mask", "Register", "SysValue", "Format"
    );
    let _ = writeln!(
        out,
        "; {} {} {} {} {} {}",
        "-".repeat(20),
        "-".repeat(5),
        "-".repeat(6),
        "-".repeat(8),
        "-".repeat(8),
        "-".repeat(7)
    );
    for e in elements {
        let _ = writeln!(
            out,
            "; {:<20} {:>5} {:>6} {:>8} {:>8} {:>7}",
            e.semantic_name,
            e.semantic_index,
            mask_letters(e.mask),
            e.register,
            system_value_name(e.system_value),
            format_name(e.component_type)
        );
    }
}

fn mask_letters(mask: u8) -> String {
    b"xyzw"
        .iter()
        .enumerate()
        .map(|(i, &c)| if mask & (1 << i) != 0 { c as char } else { ' ' })
        .collect()
}

fn system_value_name(value: u32) -> String {
    match value {
        0 => "NONE".to_string(),
        1 => "POS".to_string(),
        6 => "VERTID".to_string(),
        7 => "PRIMID".to_string(),
        8 => "INSTID".to_string(),
        9 => "FFACE".to_string(),
        10 => "SAMPLE".to_string(),
        64 => "TARGET".to_string(),
        65 => "DEPTH".to_string(),
        other => other.to_string(),
    }
}

fn format_name(component_type: u32) -> &'static str {
    match component_type {
        1 => "uint",
        2 => "int",
        3 => "float",
        4 => "uint16",
        5 => "int16",
        6 => "half",
        7 => "uint64",
        8 => "int64",
        9 => "double",
        _ => "unknown",
    }
}

fn render(inst: &Instruction) -> String {
    let mut line = String::new();
    if inst.op.has_result() {
        let _ = write!(line, "%{} = ", inst.result);
    }
    line.push_str(inst.op.mnemonic());
    if inst.result_type != 0 {
        let _ = write!(line, " %{}", inst.result_type);
    }
    let operands = &inst.operands;
    match inst.op {
        DxilOp::EntryPoint => {
            let stage = operands
                .first()
                .and_then(|&kind| stage_from_kind(kind))
                .map_or("?", |s| s.short_name());
            let _ = write!(line, " {}", stage);
            push_id_list(&mut line, operands.get(1..2).unwrap_or(&[]));
            push_string(&mut line, operands.get(2..).unwrap_or(&[]));
        }
        DxilOp::Name => {
            push_id_list(&mut line, operands.get(..1).unwrap_or(&[]));
            push_string(&mut line, operands.get(1..).unwrap_or(&[]));
        }
        DxilOp::FCmp | DxilOp::ICmp => {
            let name = operands
                .first()
                .and_then(|&p| Predicate::from_u32(p))
                .map_or("?", |p| p.name(inst.op == DxilOp::FCmp));
            let _ = write!(line, " {}", name);
            push_id_list(&mut line, operands.get(1..).unwrap_or(&[]));
        }
        DxilOp::Intrinsic => {
            let name = operands
                .first()
                .and_then(|&code| intrinsic_from_code(code))
                .map_or("?", |i| i.hlsl_name());
            let _ = write!(line, " {}", name);
            push_id_list(&mut line, operands.get(1..).unwrap_or(&[]));
        }
        DxilOp::GlobalVariable | DxilOp::TypePointer => {
            let space = operands
                .first()
                .and_then(|&s| AddressSpace::from_u32(s))
                .map_or("?", |s| s.name());
            let _ = write!(line, " {}", space);
            push_id_list(&mut line, operands.get(1..).unwrap_or(&[]));
        }
        DxilOp::Barrier => {
            let _ = write!(line, " {:#x}", operands.first().copied().unwrap_or(0));
        }
        op => {
            for (index, &word) in operands.iter().enumerate() {
                if is_literal(op, index) {
                    let _ = write!(line, " {}", word);
                } else if word == 0 {
                    line.push_str(" none");
                } else {
                    let _ = write!(line, " %{}", word);
                }
            }
        }
    }
    line
}

fn push_id_list(line: &mut String, ids: &[u32]) {
    for &id in ids {
        if id == 0 {
            line.push_str(" none");
        } else {
            let _ = write!(line, " %{}", id);
        }
    }
}

fn push_string(line: &mut String, words: &[u32]) {
    match decode_string(words) {
        Some((text, _)) => {
            let _ = write!(line, " {:?}", text);
        }
        None => line.push_str(" <bad string>"),
    }
}

/// Whether operand `index` of `op` is a literal rather than an id.
fn is_literal(op: DxilOp, index: usize) -> bool {
    match op {
        DxilOp::NumThreads
        | DxilOp::Binding
        | DxilOp::MemberOffset
        | DxilOp::MatrixOrientation => index >= 1,
        DxilOp::TypeInt
        | DxilOp::TypeFloat
        | DxilOp::TypeSampler
        | DxilOp::Constant
        | DxilOp::Case => true,
        DxilOp::TypeVector | DxilOp::TypeArray => index == 1,
        DxilOp::TypeMatrix => index >= 1,
        DxilOp::TypeTexture => index >= 1,
        DxilOp::TypeBuffer => index < 2,
        DxilOp::IntCast => index == 1,
        DxilOp::Extract => index >= 1,
        DxilOp::Insert | DxilOp::Shuffle => index >= 2,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerBuilder;
    use crate::desc::{OptionsDesc, ShaderStage, ShadingLanguage, TargetDesc};
    use crate::emit::test_support::*;
    use crate::emit::{EmitContext, emit};

    fn compile(source: &str, entry: &str, stage: ShaderStage, options: &OptionsDesc) -> Vec<u8> {
        let module = module_with(source, entry, stage, options);
        let target = TargetDesc::new(ShadingLanguage::Dxil);
        emit(&module, &EmitContext::new(options, &target))
            .unwrap()
            .blob
            .data()
            .to_vec()
    }

    #[test]
    fn test_pixel_listing() {
        let bytes = compile(PIXEL, "PS", ShaderStage::Pixel, &OptionsDesc::default());
        let text = disassemble(&bytes).unwrap();
        assert!(text.starts_with("; DXIL container, 4 parts: ISG1 OSG1 HASH DXIL"));
        assert!(text.contains("\nps_6_0\n"));
        assert!(text.contains("entry_point ps"));
        assert!(text.contains("\"PS\""));
        assert!(text.contains("= sample "));
        assert!(text.contains("TEXCOORD"));
        assert!(text.contains("TARGET"));
        assert!(!text.contains("warning"));
    }

    #[test]
    fn test_regions_are_indented() {
        let bytes = compile(COMPUTE, "CS", ShaderStage::Compute, &OptionsDesc::default());
        let text = disassemble(&bytes).unwrap();
        assert!(text.contains("num_threads"));
        let function = text.lines().find(|l| l.contains("= function ")).unwrap();
        assert!(!function.starts_with(' '));
        let body = text.lines().skip_while(|l| !l.contains("= function ")).nth(1).unwrap();
        assert!(body.starts_with("  "));
        let end = text.lines().find(|l| l.trim() == "function_end").unwrap();
        assert_eq!(end, "function_end");
    }

    #[test]
    fn test_debug_name_is_listed() {
        let options = OptionsDesc {
            enable_debug_info: true,
            ..OptionsDesc::default()
        };
        let bytes = compile(PIXEL, "PS", ShaderStage::Pixel, &options);
        let text = disassemble(&bytes).unwrap();
        assert!(text.contains("; debug name: "));
        assert!(text.contains(".pdb"));
    }

    #[test]
    fn test_tampered_container_is_flagged() {
        let mut bytes = compile(PIXEL, "PS", ShaderStage::Pixel, &OptionsDesc::default());
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        match disassemble(&bytes) {
            Ok(text) => assert!(text.contains("digest does not match")),
            Err(err) => assert!(matches!(err, Error::Disassemble(_))),
        }
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(matches!(disassemble(b"DXBX"), Err(Error::Container(_))));

        let no_program = ContainerBuilder::new()
            .add_part(*b"HASH", vec![0; 20])
            .finish();
        assert!(matches!(
            disassemble(&no_program),
            Err(Error::Disassemble(message)) if message.contains("no DXIL part")
        ));

        let mut program = Vec::new();
        ProgramHeader {
            stage: ShaderStage::Pixel,
            major: 6,
            minor: 0,
            code_words: 1,
        }
        .write(&mut program);
        program.extend_from_slice(&(0x7777u32 | 1 << 16).to_le_bytes());
        let unknown = ContainerBuilder::new()
            .add_part(FOURCC_PROGRAM, program)
            .finish();
        assert!(matches!(
            disassemble(&unknown),
            Err(Error::Disassemble(message)) if message.contains("unknown opcode")
        ));
    }
}
