//! Metal Shading Language emission
//!
//! Metal has no global resources: everything a function touches, directly
//! or through callees, is passed as a parameter and bound on the stage
//! function with sequential `[[buffer(n)]]`, `[[texture(n)]]` and
//! `[[sampler(n)]]` indices. Matrices follow the same transposed mapping as
//! GLSL, so `floatRxC` stays `floatRxC` and `mul(a, b)` becomes `b * a`.

use super::text::{
    BodyWriter, Interface, LevelText, Names, Namer, SampleText, Scope, Syntax, Writer,
    float_digits, globals_used, int_digits, local_names, narrow_texel, semantic_text,
    swizzle_letters, write_entry_call,
};
use super::{EmitContext, EmitOutput, Emitter, capability, parse_dotted};
use crate::desc::{ShaderStage, ShadingLanguage};
use crate::diag::Diagnostics;
use crate::ir::visit::for_each_expr;
use crate::ir::{
    BinaryOp, BufferKind, BuiltIn, CBufferMember, EntryPoint, Expr, ExprKind, Function,
    GlobalKind, GlobalVariable, Handle, Interpolation, Intrinsic, Literal, MatrixLayout,
    MemoryScope, Module, ParamDirection, Place, ResourceRef, Scalar, ScalarKind, TextureDim,
    TextureType, Type,
};
use std::collections::HashSet;

const KEYWORDS: &[&str] = &[
    "alignas", "alignof", "and", "array", "asm", "auto", "bool", "break", "case", "catch",
    "char", "class", "const", "constant", "constexpr", "continue", "decltype", "default",
    "delete", "depth2d", "depthcube", "device", "do", "double", "else", "enum", "explicit",
    "export", "extern", "false", "float", "for", "fragment", "friend", "goto", "half", "if",
    "inline", "int", "kernel", "long", "main", "metal", "mutable", "namespace", "new",
    "noexcept", "not", "nullptr", "operator", "or", "private", "protected", "public",
    "register", "return", "sampler", "short", "signed", "sizeof", "static", "struct",
    "switch", "template", "texture1d", "texture2d", "texture3d", "texturecube", "this",
    "thread", "threadgroup", "throw", "true", "try", "typedef", "typename", "uchar", "uint",
    "union", "unsigned", "ushort", "using", "vertex", "virtual", "void", "volatile", "while",
    "xor", "abs", "all", "any", "clamp", "cross", "dot", "fract", "length", "max", "min", "mix",
    "normalize", "pow", "select", "sqrt", "saturate", "transpose",
];

const VERSIONS: &[(u32, u32)] = &[
    (1, 0),
    (1, 1),
    (1, 2),
    (2, 0),
    (2, 1),
    (2, 2),
    (2, 3),
    (2, 4),
    (3, 0),
    (3, 1),
];

#[derive(Debug)]
pub struct MslEmitter;

fn version(ctx: &EmitContext) -> Result<(u32, u32), String> {
    let Some(text) = ctx.version() else {
        return Ok((2, 0));
    };
    match parse_dotted(text) {
        Some(v) if VERSIONS.contains(&v) => Ok(v),
        _ => Err(format!("invalid MSL version '{}'", text)),
    }
}

impl Emitter for MslEmitter {
    fn name(&self) -> &'static str {
        "MSL"
    }

    fn languages(&self) -> &'static [ShadingLanguage] {
        &[ShadingLanguage::MslMacOs, ShadingLanguage::MslIos]
    }

    fn check(&self, module: &Module, ctx: &EmitContext, diags: &mut Diagnostics) {
        let version = match version(ctx) {
            Ok(version) => version,
            Err(message) => {
                capability(diags, message);
                return;
            }
        };
        let ios = ctx.language() == ShadingLanguage::MslIos;
        if module.uses_64bit {
            capability(diags, "double precision is not supported by Metal");
        }
        for (h, global) in module.resources() {
            match &global.ty {
                Type::Texture(t) if ios && t.dim == TextureDim::Cube && t.arrayed => capability(
                    diags,
                    format!("'{}': cube map arrays are not supported on iOS", global.name),
                ),
                Type::Texture(t) if t.rw && version < (1, 2) => capability(
                    diags,
                    format!("'{}': read-write textures need MSL 1.2 or up", global.name),
                ),
                _ => {}
            }
            if let GlobalKind::ConstantBuffer { members, .. } = &global.kind {
                if let Err(message) = plan_cbuffer(members) {
                    capability(diags, format!("constant buffer '{}': {}", global.name, message));
                }
                check_cbuffer_reads(module, h, global, members, diags);
            }
        }
    }

    fn emit(&self, module: &Module, ctx: &EmitContext) -> Result<EmitOutput, Diagnostics> {
        let version = version(ctx).map_err(|message| {
            let mut diags = Diagnostics::new();
            capability(&mut diags, message);
            diags
        })?;
        let Some(entry) = module.entry() else {
            return Err(Diagnostics::single(
                crate::diag::ErrorKind::Internal,
                None,
                "module has no entry point",
            ));
        };
        let mut namer = Namer::new(KEYWORDS, &["spv", "__"]);
        let wrapper = if entry.name == "main" {
            "main0".to_string()
        } else {
            entry.name.clone()
        };
        namer.reserve(&wrapper);
        let mut names = Names::new(module, &mut namer);
        names.functions[entry.function.index()] = namer.name(&format!("{}_inner", entry.name));
        let syntax = MslSyntax {
            depth: depth_textures(module),
            uses: globals_used(module),
        };
        let text = syntax.write_module(module, &names, namer, entry, &wrapper, version, ctx.language());
        Ok(EmitOutput::text(text))
    }
}

/// Storage type and padding for each constant buffer member, keeping HLSL offsets.
fn plan_cbuffer(members: &[CBufferMember]) -> Result<Vec<(u32, String)>, String> {
    let mut end = 0;
    let mut plan = Vec::with_capacity(members.len());
    for member in members {
        let (ty, size) = storage(&member.ty, member.matrix_layout)
            .map_err(|why| format!("member '{}' {}", member.name, why))?;
        if member.offset < end {
            return Err(format!(
                "member '{}' at offset {} overlaps the padding of the previous member",
                member.name, member.offset
            ));
        }
        plan.push((member.offset - end, ty));
        end = member.offset + size;
    }
    Ok(plan)
}

/// Metal spelling and size of a constant buffer member with HLSL placement.
fn storage(ty: &Type, layout: MatrixLayout) -> Result<(String, u32), String> {
    Ok(match ty {
        Type::Scalar(s) if s.kind == ScalarKind::Bool => ("uint".to_string(), 4),
        Type::Scalar(s) => (scalar_name(*s).to_string(), s.width as u32),
        Type::Vector(s, n) => {
            let base = if s.kind == ScalarKind::Bool { "uint" } else { scalar_name(*s) };
            let width = if s.kind == ScalarKind::Bool { 4 } else { s.width as u32 };
            (format!("packed_{}{}", base, n), width * *n as u32)
        }
        Type::Matrix { scalar, rows, cols } => {
            if *scalar != Scalar::F32 {
                return Err("is a non-float matrix, which Metal cannot lay out like HLSL".to_string());
            }
            let (columns, length) = match layout {
                MatrixLayout::RowMajor => (*rows, *cols),
                MatrixLayout::ColumnMajor => (*cols, *rows),
            };
            // Metal strides two-component columns at 8 bytes, HLSL at 16
            let length = if length == 2 { 4 } else { length };
            (format!("float{}x{}", columns, length), columns as u32 * 16)
        }
        Type::Array(elem, n) => match &**elem {
            Type::Scalar(s) | Type::Vector(s, _) if s.width == 4 => {
                let base = if s.kind == ScalarKind::Bool { "uint" } else { scalar_name(*s) };
                (format!("array<{}4, {}>", base, n), n * 16)
            }
            Type::Matrix { .. } if padded_matrix(elem, layout).is_some() => {
                return Err("is an array of matrices with two-component vectors".to_string());
            }
            Type::Matrix { .. } if layout == MatrixLayout::RowMajor => {
                let (elem, size) = storage(elem, layout)?;
                (format!("array<{}, {}>", elem, n), n * size)
            }
            _ => return Err("is an array Metal cannot lay out like HLSL".to_string()),
        },
        _ => return Err("is a struct, which Metal cannot lay out like HLSL".to_string()),
    })
}

/// Column count of a constant buffer matrix whose two-component columns are
/// stored widened to four.
fn padded_matrix(ty: &Type, layout: MatrixLayout) -> Option<u8> {
    let Type::Matrix { rows, cols, .. } = ty else {
        return None;
    };
    let (columns, length) = match layout {
        MatrixLayout::RowMajor => (*rows, *cols),
        MatrixLayout::ColumnMajor => (*cols, *rows),
    };
    (length == 2).then_some(columns)
}

/// Swizzle selecting the live components of a padded array element.
fn padded_element(ty: &Type) -> Option<&'static str> {
    match ty {
        Type::Array(elem, _) => match elem.vector_size() {
            Some(1) => Some("x"),
            Some(2) => Some("xy"),
            Some(3) => Some("xyz"),
            _ => None,
        },
        _ => None,
    }
}

/// Padded arrays can only be read element by element.
fn check_cbuffer_reads(
    module: &Module,
    handle: Handle<GlobalVariable>,
    global: &GlobalVariable,
    members: &[CBufferMember],
    diags: &mut Diagnostics,
) {
    let mut whole = HashSet::new();
    for (_, function) in module.functions.iter() {
        for_each_expr(&function.body, &mut |e| {
            if let ExprKind::Load(Place::CBuffer { buffer, member }) = &e.kind {
                if *buffer == handle {
                    whole.insert(*member);
                }
            }
        });
    }
    for index in whole {
        if let Some(member) = members.get(index as usize) {
            if padded_element(&member.ty).is_some() {
                capability(
                    diags,
                    format!(
                        "constant buffer '{}': array '{}' can only be indexed when targeting Metal",
                        global.name, member.name
                    ),
                );
            }
        }
    }
}

/// Textures sampled with comparison become depth textures.
fn depth_textures(module: &Module) -> HashSet<Handle<GlobalVariable>> {
    let mut depth = HashSet::new();
    for (_, function) in module.functions.iter() {
        for_each_expr(&function.body, &mut |e| {
            if let ExprKind::Sample {
                texture: ResourceRef::Global(t),
                compare: Some(_),
                ..
            } = &e.kind
            {
                depth.insert(*t);
            }
        });
    }
    depth
}

fn scalar_name(scalar: Scalar) -> &'static str {
    match (scalar.kind, scalar.width) {
        (ScalarKind::Bool, _) => "bool",
        (ScalarKind::Sint, 2) => "short",
        (ScalarKind::Sint, _) => "int",
        (ScalarKind::Uint, 2) => "ushort",
        (ScalarKind::Uint, _) => "uint",
        (ScalarKind::Float, 2) => "half",
        (ScalarKind::Float, _) => "float",
    }
}

fn texture_type(t: &TextureType, depth: bool) -> String {
    let base = match (t.dim, t.multisampled) {
        (TextureDim::D1, _) => "texture1d",
        (TextureDim::D2, false) => "texture2d",
        (TextureDim::D2, true) => "texture2d_ms",
        (TextureDim::D3, _) => "texture3d",
        (TextureDim::Cube, _) => "texturecube",
    };
    let base = if depth { base.replacen("texture", "depth", 1) } else { base.to_string() };
    format!(
        "{}{}<{}{}>",
        base,
        if t.arrayed { "_array" } else { "" },
        scalar_name(t.sampled),
        if t.rw { ", access::read_write" } else { "" }
    )
}

fn builtin_input(builtin: BuiltIn) -> Option<(&'static str, &'static str, Type)> {
    Some(match builtin {
        BuiltIn::VertexId => ("gl_VertexIndex", "vertex_id", Type::UINT),
        BuiltIn::InstanceId => ("gl_InstanceIndex", "instance_id", Type::UINT),
        BuiltIn::FragCoord => ("gl_FragCoord", "position", Type::Vector(Scalar::F32, 4)),
        BuiltIn::FrontFacing => ("gl_FrontFacing", "front_facing", Type::BOOL),
        BuiltIn::SampleIndex => ("gl_SampleID", "sample_id", Type::UINT),
        BuiltIn::PrimitiveId => ("gl_PrimitiveID", "primitive_id", Type::UINT),
        BuiltIn::GlobalInvocationId => (
            "gl_GlobalInvocationID",
            "thread_position_in_grid",
            Type::Vector(Scalar::U32, 3),
        ),
        BuiltIn::LocalInvocationId => (
            "gl_LocalInvocationID",
            "thread_position_in_threadgroup",
            Type::Vector(Scalar::U32, 3),
        ),
        BuiltIn::WorkgroupId => (
            "gl_WorkGroupID",
            "threadgroup_position_in_grid",
            Type::Vector(Scalar::U32, 3),
        ),
        BuiltIn::LocalInvocationIndex => {
            ("gl_LocalInvocationIndex", "thread_index_in_threadgroup", Type::UINT)
        }
        BuiltIn::Position | BuiltIn::FragDepth => return None,
    })
}

fn builtin_output(builtin: BuiltIn) -> Option<(&'static str, &'static str, Type)> {
    match builtin {
        BuiltIn::Position => Some(("gl_Position", "position", Type::Vector(Scalar::F32, 4))),
        BuiltIn::FragDepth => Some(("gl_FragDepth", "depth(any)", Type::FLOAT)),
        _ => None,
    }
}

fn interpolation_attribute(interpolation: Interpolation) -> Option<&'static str> {
    match interpolation {
        Interpolation::Linear => None,
        Interpolation::NoInterpolation => Some("flat"),
        Interpolation::Centroid => Some("centroid_perspective"),
        Interpolation::NoPerspective => Some("center_no_perspective"),
        Interpolation::Sample => Some("sample_perspective"),
    }
}

/// Inserts `.pad` after the subscript that follows `prefix_len` bytes of `text`.
fn insert_after_subscript(text: &str, prefix_len: usize, pad: &str) -> String {
    let bytes = text.as_bytes();
    if bytes.get(prefix_len) != Some(&b'[') {
        return text.to_string();
    }
    let mut depth = 0;
    for (i, &b) in bytes.iter().enumerate().skip(prefix_len) {
        match b {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return format!("{}.{}{}", &text[..=i], pad, &text[i + 1..]);
                }
            }
            _ => {}
        }
    }
    text.to_string()
}

struct MslSyntax {
    depth: HashSet<Handle<GlobalVariable>>,
    uses: Vec<Vec<Handle<GlobalVariable>>>,
}

impl MslSyntax {
    /// Parameter declaration through which a function sees `global`.
    fn global_param(&self, s: &Scope, h: Handle<GlobalVariable>) -> Option<String> {
        let global = &s.module.globals[h];
        let name = s.names.global(h);
        Some(match (&global.kind, &global.ty) {
            (GlobalKind::ConstantBuffer { .. }, _) => format!("constant type_{}& {}", name, name),
            (GlobalKind::Private, _) if is_program_constant(global) => return None,
            (GlobalKind::Private, ty) => format!("thread {}& {}", self.type_name(s, ty), name),
            (GlobalKind::Workgroup, ty) => format!("threadgroup {}& {}", self.type_name(s, ty), name),
            (GlobalKind::Resource, Type::Buffer { kind, rw, elem }) => {
                let elem = match kind {
                    BufferKind::ByteAddress => Type::UINT,
                    _ => (**elem).clone(),
                };
                format!(
                    "{}device {}* {}",
                    if *rw { "" } else { "const " },
                    self.type_name(s, &elem),
                    name
                )
            }
            (GlobalKind::Resource, Type::Texture(t)) => {
                format!("{} {}", texture_type(t, self.depth.contains(&h)), name)
            }
            (GlobalKind::Resource, Type::Sampler { .. }) => format!("sampler {}", name),
            _ => return None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn write_module(
        &self,
        module: &Module,
        names: &Names,
        mut namer: Namer,
        entry: &EntryPoint,
        wrapper: &str,
        version: (u32, u32),
        language: ShadingLanguage,
    ) -> String {
        let mut w = Writer::new();
        let platform = if language == ShadingLanguage::MslIos { "iOS" } else { "macOS" };
        w.line(format!("// Metal Shading Language {}.{} for {}", version.0, version.1, platform));
        w.line("#include <metal_stdlib>");
        w.line("#include <simd/simd.h>");
        w.blank();
        w.line("using namespace metal;");
        w.blank();

        let entry_function = &module.functions[entry.function];
        let top = Scope {
            module,
            names,
            function: entry_function,
            handle: entry.function,
            locals: Vec::new(),
        };

        for (h, decl) in module.structs.iter() {
            w.line(format!("struct {}", names.structs[h.index()]));
            w.open();
            for (i, member) in decl.members.iter().enumerate() {
                w.line(format!(
                    "{};",
                    self.declare(&top, &member.ty, &names.members[h.index()][i])
                ));
            }
            w.close_with("};");
            w.blank();
        }

        for (h, global) in module.globals.iter() {
            match &global.kind {
                GlobalKind::ConstantBuffer { members, .. } => {
                    let Ok(plan) = plan_cbuffer(members) else {
                        continue;
                    };
                    w.line(format!("struct type_{}", names.global(h)));
                    w.open();
                    for (i, (member, (pad, ty))) in members.iter().zip(plan).enumerate() {
                        if pad > 0 {
                            w.line(format!("char _pad{}[{}];", i, pad));
                        }
                        w.line(format!("{} {};", ty, namer.member(&member.name)));
                    }
                    w.close_with("};");
                    w.blank();
                }
                GlobalKind::Private if is_program_constant(global) => {
                    if let Some(init) = &global.init {
                        let printer = BodyWriter::new(
                            self,
                            Scope {
                                locals: Vec::new(),
                                ..top
                            },
                        );
                        w.line(format!(
                            "constant {} = {};",
                            self.declare(&top, &global.ty, names.global(h)),
                            printer.expr(init)
                        ));
                    }
                }
                _ => {}
            }
        }

        let interface = self.write_interface_structs(&mut w, module, names, entry, wrapper, &mut namer);

        for (h, function) in module.functions.iter() {
            let scope = Scope {
                module,
                names,
                function,
                handle: h,
                locals: local_names(function, &namer),
            };
            w.line(self.header(&scope, function));
            BodyWriter::new(self, scope).write_body(&mut w);
            w.blank();
        }

        self.write_wrapper(&mut w, module, names, entry, wrapper, interface, &mut namer);
        w.finish()
    }

    fn header(&self, s: &Scope, function: &Function) -> String {
        let mut params: Vec<String> = function
            .params
            .iter()
            .map(|p| {
                let local = &function.locals[p.local];
                match p.direction {
                    ParamDirection::In => self.declare(s, &local.ty, s.local(p.local)),
                    ParamDirection::Out | ParamDirection::InOut => {
                        format!("thread {}& {}", self.type_name(s, &local.ty), s.local(p.local))
                    }
                }
            })
            .collect();
        if let Some(globals) = self.uses.get(s.handle.index()) {
            params.extend(globals.iter().filter_map(|&g| self.global_param(s, g)));
        }
        format!(
            "{} {}({})",
            self.type_name(s, &function.result),
            s.names.functions[s.handle.index()],
            params.join(", ")
        )
    }

    /// Declares the `_in` and `_out` structs of the stage function.
    fn write_interface_structs(
        &self,
        w: &mut Writer,
        module: &Module,
        names: &Names,
        entry: &EntryPoint,
        wrapper: &str,
        namer: &mut Namer,
    ) -> StageInterface {
        let scope = Scope {
            module,
            names,
            function: &module.functions[entry.function],
            handle: entry.function,
            locals: Vec::new(),
        };
        let mut stage = StageInterface::default();
        let input_name = namer.name("in");
        let output_name = namer.name("out");

        let mut fields = Vec::new();
        for varying in &entry.inputs {
            if let Some(builtin) = varying.builtin {
                let io = builtin_input(builtin).map(|(name, attribute, ty)| {
                    stage.builtin_params.push(format!(
                        "{} {} [[{}]]",
                        self.type_name(&scope, &ty),
                        name,
                        attribute
                    ));
                    (name.to_string(), ty)
                });
                stage.interface.push(false, io);
                continue;
            }
            let field = namer.member(&format!("in_var_{}", semantic_text(varying)));
            let mut attributes = match entry.stage {
                ShaderStage::Vertex => format!(" [[attribute({})]]", varying.location),
                _ => format!(" [[user(locn{})]]", varying.location),
            };
            if entry.stage == ShaderStage::Pixel {
                let integer = varying.ty.scalar().is_some_and(|s| !s.is_float());
                let interpolation = if integer {
                    Some("flat")
                } else {
                    varying.interpolation.and_then(interpolation_attribute)
                };
                if let Some(attribute) = interpolation {
                    attributes.push_str(&format!(" [[{}]]", attribute));
                }
            }
            fields.push(format!("{}{};", self.declare(&scope, &varying.ty, &field), attributes));
            stage
                .interface
                .push(false, Some((format!("{}.{}", input_name, field), varying.ty.clone())));
        }
        if !fields.is_empty() {
            let type_name = format!("{}_in", wrapper);
            w.line(format!("struct {}", type_name));
            w.open();
            for field in fields {
                w.line(field);
            }
            w.close_with("};");
            w.blank();
            stage.stage_in = Some(format!("{} {} [[stage_in]]", type_name, input_name));
        }

        let mut fields = Vec::new();
        for varying in &entry.outputs {
            if let Some((name, attribute, ty)) = varying.builtin.and_then(builtin_output) {
                fields.push(format!("{} [[{}]];", self.declare(&scope, &ty, name), attribute));
                stage
                    .interface
                    .push(true, Some((format!("{}.{}", output_name, name), ty)));
                continue;
            }
            if varying.builtin.is_some() {
                stage.interface.push(true, None);
                continue;
            }
            let field = namer.member(&format!("out_var_{}", semantic_text(varying)));
            let attribute = match entry.stage {
                ShaderStage::Pixel => format!("color({})", varying.location),
                _ => format!("user(locn{})", varying.location),
            };
            fields.push(format!(
                "{} [[{}]];",
                self.declare(&scope, &varying.ty, &field),
                attribute
            ));
            stage
                .interface
                .push(true, Some((format!("{}.{}", output_name, field), varying.ty.clone())));
        }
        if !fields.is_empty() {
            let type_name = format!("{}_out", wrapper);
            w.line(format!("struct {}", type_name));
            w.open();
            for field in fields {
                w.line(field);
            }
            w.close_with("};");
            w.blank();
            stage.output = Some((type_name, output_name));
        }
        stage
    }

    #[allow(clippy::too_many_arguments)]
    fn write_wrapper(
        &self,
        w: &mut Writer,
        module: &Module,
        names: &Names,
        entry: &EntryPoint,
        wrapper: &str,
        stage: StageInterface,
        namer: &mut Namer,
    ) {
        let function = &module.functions[entry.function];
        let scope = Scope {
            module,
            names,
            function,
            handle: entry.function,
            locals: local_names(function, namer),
        };
        let used = self.uses.get(entry.function.index()).cloned().unwrap_or_default();

        let mut params = Vec::new();
        params.extend(stage.stage_in.clone());
        params.extend(stage.builtin_params.iter().cloned());
        let (mut buffers, mut textures, mut samplers) = (0, 0, 0);
        for &h in &used {
            let global = &module.globals[h];
            let attribute = match (&global.kind, &global.ty) {
                (GlobalKind::ConstantBuffer { .. }, _) | (GlobalKind::Resource, Type::Buffer { .. }) => {
                    buffers += 1;
                    format!("buffer({})", buffers - 1)
                }
                (GlobalKind::Resource, Type::Texture(_)) => {
                    textures += 1;
                    format!("texture({})", textures - 1)
                }
                (GlobalKind::Resource, Type::Sampler { .. }) => {
                    samplers += 1;
                    format!("sampler({})", samplers - 1)
                }
                _ => continue,
            };
            if let Some(param) = self.global_param(&scope, h) {
                params.push(format!("{} [[{}]]", param, attribute));
            }
        }

        let qualifier = match entry.stage {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Pixel => "fragment",
            _ => "kernel",
        };
        let result = match &stage.output {
            Some((type_name, _)) => type_name.clone(),
            None => "void".to_string(),
        };
        w.line(format!("{} {} {}({})", qualifier, result, wrapper, params.join(", ")));
        w.open();
        if let Some((type_name, output_name)) = &stage.output {
            w.line(format!("{} {} = {{}};", type_name, output_name));
        }
        let mut extra = Vec::new();
        for &h in &used {
            let global = &module.globals[h];
            match global.kind {
                GlobalKind::Private if !is_program_constant(global) => {
                    let mut line = self.declare(&scope, &global.ty, names.global(h));
                    if let Some(init) = &global.init {
                        let printer = BodyWriter::new(
                            self,
                            Scope {
                                locals: scope.locals.clone(),
                                ..scope
                            },
                        );
                        line.push_str(" = ");
                        line.push_str(&printer.expr(init));
                    }
                    w.line(format!("{};", line));
                }
                GlobalKind::Workgroup => {
                    w.line(format!(
                        "threadgroup {};",
                        self.declare(&scope, &global.ty, names.global(h))
                    ));
                }
                _ => {}
            }
            if self.global_param(&scope, h).is_some() {
                extra.push(names.global(h).to_string());
            }
        }
        write_entry_call(self, w, &scope, entry, &stage.interface, namer, extra);
        if let Some((_, output_name)) = &stage.output {
            w.line(format!("return {};", output_name));
        }
        w.close();
    }

    /// Integer position and array slice arguments of `read` and `write`.
    fn texel_coords(&self, coord: &str, t: &TextureType) -> Vec<String> {
        let size = t.dim.coord_size();
        let (position, layer) = self.array_layer(coord, t);
        let mut args = vec![match size {
            1 => format!("uint({})", position),
            n => format!("uint{}({})", n, position),
        }];
        if let Some(letter) = layer {
            args.push(format!("uint({}.{})", coord, letter));
        }
        args
    }

    /// Splits the slice off an arrayed coordinate.
    fn array_layer(&self, coord: &str, image: &TextureType) -> (String, Option<String>) {
        if !image.arrayed {
            return (coord.to_string(), None);
        }
        let size = image.dim.coord_size();
        let pattern: Vec<u8> = (0..size).collect();
        let letter = swizzle_letters(&[size]);
        (
            format!("{}.{}", coord, swizzle_letters(&pattern)),
            Some(letter),
        )
    }
}

/// `static const` globals with an initializer live in the constant address space.
fn is_program_constant(global: &GlobalVariable) -> bool {
    global.kind == GlobalKind::Private && global.is_const && global.init.is_some()
}

#[derive(Debug, Default)]
struct StageInterface {
    interface: Interface,
    stage_in: Option<String>,
    builtin_params: Vec<String>,
    /// Output struct type and variable name
    output: Option<(String, String)>,
}

impl Syntax for MslSyntax {
    fn type_name(&self, s: &Scope, ty: &Type) -> String {
        match ty {
            Type::Void => "void".to_string(),
            Type::Scalar(scalar) => scalar_name(*scalar).to_string(),
            Type::Vector(scalar, n) => format!("{}{}", scalar_name(*scalar), n),
            Type::Matrix { scalar, rows, cols } => format!("{}{}x{}", scalar_name(*scalar), rows, cols),
            Type::Array(elem, n) => format!("array<{}, {}>", self.type_name(s, elem), n),
            Type::Struct(h) => s
                .names
                .structs
                .get(h.index())
                .cloned()
                .unwrap_or_else(|| "_invalid".to_string()),
            Type::Texture(t) => texture_type(t, false),
            Type::Sampler { .. } => "sampler".to_string(),
            Type::Buffer { .. } => "_invalid".to_string(),
        }
    }

    fn declare(&self, s: &Scope, ty: &Type, name: &str) -> String {
        format!("{} {}", self.type_name(s, ty), name)
    }

    fn literal(&self, value: Literal, scalar: Scalar) -> String {
        match (value.cast(scalar), scalar.width) {
            (Literal::Bool(b), _) => b.to_string(),
            (Literal::Int(i), 2) => format!("short({})", i),
            (Literal::Int(i), _) => int_digits(i),
            (Literal::Uint(u), 2) => format!("ushort({})", u),
            (Literal::Uint(u), _) => format!("{}u", u),
            (Literal::Float(f), _) if f.is_nan() => "NAN".to_string(),
            (Literal::Float(f), _) if f.is_infinite() => {
                if f < 0.0 { "(-INFINITY)".to_string() } else { "INFINITY".to_string() }
            }
            (Literal::Float(f), 2) => format!("half({})", float_digits(f)),
            (Literal::Float(f), _) => float_digits(f),
        }
    }

    fn cbuffer_member(&self, s: &Scope, buffer: Handle<GlobalVariable>, member: u32) -> String {
        let Some(m) = s.module.cbuffer_member(buffer, member) else {
            return "_invalid".to_string();
        };
        let mut text = format!(
            "{}.{}",
            s.names.global(buffer),
            Namer::new(KEYWORDS, &["spv", "__"]).member(&m.name)
        );
        if let Some(columns) = padded_matrix(&m.ty, m.matrix_layout) {
            let parts: Vec<String> = (0..columns).map(|i| format!("{}[{}].xy", text, i)).collect();
            text = format!("float{}x2({})", columns, parts.join(", "));
        }
        if m.ty.is_matrix() && m.matrix_layout == MatrixLayout::ColumnMajor {
            format!("transpose({})", text)
        } else {
            text
        }
    }

    fn load(&self, s: &Scope, place: &Place, text: String) -> String {
        let Place::CBuffer { buffer, member } = place.root() else {
            return text;
        };
        let Some(m) = s.module.cbuffer_member(*buffer, *member) else {
            return text;
        };
        let mut text = text;
        if let Some(pad) = padded_element(&m.ty) {
            let prefix = self.cbuffer_member(s, *buffer, *member);
            text = insert_after_subscript(&text, prefix.len(), pad);
        }
        let ty = s.function.place_type(s.module, place);
        if ty.is_bool_like() {
            text = format!("{}({})", self.type_name(s, &ty), text);
        }
        text
    }

    fn element(&self, s: &Scope, resource: ResourceRef, index: String) -> String {
        format!("{}[{}]", s.resource(resource), index)
    }

    fn binary(&self, _s: &Scope, op: BinaryOp, ty: &Type, left: String, right: String) -> String {
        if op == BinaryOp::Rem && ty.scalar().is_some_and(Scalar::is_float) {
            return format!("fmod({}, {})", left, right);
        }
        if ty.is_bool_like() {
            match op {
                BinaryOp::BitAnd => return format!("({} && {})", left, right),
                BinaryOp::BitOr => return format!("({} || {})", left, right),
                BinaryOp::BitXor => return format!("({} != {})", left, right),
                _ => {}
            }
        }
        format!("({} {} {})", left, op.symbol(), right)
    }

    fn select(&self, _s: &Scope, condition: &Type, _ty: &Type, c: String, a: String, b: String) -> String {
        if condition.is_vector() {
            format!("select({}, {}, {})", b, a, c)
        } else {
            format!("({} ? {} : {})", c, a, b)
        }
    }

    fn construct(&self, s: &Scope, ty: &Type, args: Vec<String>) -> String {
        match ty {
            Type::Struct(_) | Type::Array(..) => {
                format!("{}{{ {} }}", self.type_name(s, ty), args.join(", "))
            }
            _ => format!("{}({})", self.type_name(s, ty), args.join(", ")),
        }
    }

    fn bitcast(&self, s: &Scope, ty: &Type, _from: &Type, value: String) -> String {
        format!("as_type<{}>({})", self.type_name(s, ty), value)
    }

    fn intrinsic(&self, s: &Scope, fun: Intrinsic, args: &[Expr], printed: Vec<String>, ty: &Type) -> String {
        use Intrinsic::*;
        let a = |i: usize| printed.get(i).cloned().unwrap_or_default();
        let call = |name: &str| format!("{}({})", name, printed.join(", "));
        let arg_ty = args.first().map(|e| e.ty.clone()).unwrap_or(Type::Void);
        let all_ones = || match &arg_ty {
            Type::Vector(_, n) => format!("uint{}(0xffffffffu)", n),
            _ => "0xffffffffu".to_string(),
        };
        let text = match fun {
            Ddx | DdxCoarse | DdxFine => call("dfdx"),
            Ddy | DdyCoarse | DdyFine => call("dfdy"),
            Frac => call("fract"),
            Lerp => call("mix"),
            Mad if arg_ty.scalar().is_some_and(Scalar::is_float) => call("fma"),
            Mad => format!("({} * {} + {})", a(0), a(1), a(2)),
            Rcp => format!("(1.0 / {})", a(0)),
            Round => call("rint"),
            Ldexp => format!("({} * exp2({}))", a(0), a(1)),
            Degrees => format!("({} * 57.295779513082323)", a(0)),
            Radians => format!("({} * 0.017453292519943295)", a(0)),
            All | Any => {
                let name = if fun == All { "all" } else { "any" };
                match &arg_ty {
                    Type::Vector(scalar, n) if scalar.kind != ScalarKind::Bool => {
                        format!("{}(bool{}({}))", name, n, a(0))
                    }
                    Type::Vector(..) => call(name),
                    _ => format!("bool({})", a(0)),
                }
            }
            CountBits => call("popcount"),
            ReverseBits => call("reverse_bits"),
            FirstBitHigh => format!(
                "select(31u - clz({0}), {1}, {0} == 0)",
                a(0),
                all_ones()
            ),
            FirstBitLow => format!("select(ctz({0}), {1}, {0} == 0)", a(0), all_ones()),
            other => call(other.hlsl_name()),
        };
        let natural_scalar = match fun {
            IsInf | IsNan | All | Any => Some(ScalarKind::Bool),
            FirstBitHigh | FirstBitLow => Some(ScalarKind::Uint),
            _ => arg_ty.scalar().map(|s| s.kind),
        };
        match ty.scalar() {
            Some(result) if Some(result.kind) != natural_scalar => {
                format!("{}({})", self.type_name(s, ty), text)
            }
            _ => text,
        }
    }

    fn matmul(&self, _s: &Scope, _left: &Expr, _right: &Expr, l: String, r: String) -> String {
        format!("({} * {})", r, l)
    }

    fn sample(&self, s: &Scope, sample: SampleText, ty: &Type) -> String {
        let image = sample.image;
        let depth = match sample.texture {
            ResourceRef::Global(h) => self.depth.contains(&h),
            ResourceRef::Param(_) => false,
        };
        let (coord, layer) = self.array_layer(&sample.coord, &image);
        let mut args = vec![s.resource(sample.sampler).to_string(), coord];
        if let Some(letter) = layer {
            args.push(format!("uint(rint({}.{}))", sample.coord, letter));
        }
        let method = if let Some(cmp) = &sample.compare {
            args.push(cmp.clone());
            "sample_compare"
        } else {
            "sample"
        };
        let gradient = match image.dim {
            TextureDim::D3 => "gradient3d",
            TextureDim::Cube => "gradientcube",
            _ => "gradient2d",
        };
        if image.dim != TextureDim::D1 {
            match sample.level {
                LevelText::Auto => {}
                LevelText::Bias(b) => args.push(format!("bias({})", b)),
                LevelText::Lod(l) => args.push(format!("level({})", l)),
                LevelText::Zero => args.push("level(0)".to_string()),
                LevelText::Grad(x, y) => args.push(format!("{}({}, {})", gradient, x, y)),
            }
        }
        if let Some(offset) = sample.offset {
            if image.dim != TextureDim::Cube {
                args.push(offset);
            }
        }
        let call = format!("{}.{}({})", s.resource(sample.texture), method, args.join(", "));
        if sample.compare.is_some() {
            call
        } else if depth {
            match ty {
                Type::Vector(..) => format!("{}({})", self.type_name(s, ty), call),
                _ => call,
            }
        } else {
            narrow_texel(call, ty)
        }
    }

    fn image_load(&self, s: &Scope, image: ResourceRef, coord: String, lod: Option<String>, ty: &Type) -> String {
        let name = s.resource(image);
        let t = match s.resource_type(image) {
            Type::Texture(t) => t,
            _ => return format!("{}[{}]", name, coord),
        };
        let mut args = self.texel_coords(&coord, &t);
        if !t.rw && t.dim != TextureDim::D1 {
            if let Some(lod) = lod {
                args.push(format!("uint({})", lod));
            }
        }
        let call = format!("{}.read({})", name, args.join(", "));
        let depth = matches!(image, ResourceRef::Global(h) if self.depth.contains(&h));
        match ty {
            Type::Vector(..) if depth => format!("{}({})", self.type_name(s, ty), call),
            _ if depth => call,
            _ => narrow_texel(call, ty),
        }
    }

    fn image_store(&self, s: &Scope, image: ResourceRef, coord: String, value: String, value_ty: &Type) -> String {
        let name = s.resource(image);
        let t = match s.resource_type(image) {
            Type::Texture(t) => t,
            _ => return format!("{}[{}] = {};", name, coord, value),
        };
        let value = match (value_ty.scalar(), value_ty.vector_size()) {
            (Some(scalar), Some(n)) if n < 4 => {
                let zero = self.literal(Literal::Int(0), scalar);
                let mut parts = vec![value];
                parts.extend(std::iter::repeat_n(zero, 4 - n as usize));
                format!("{}4({})", scalar_name(scalar), parts.join(", "))
            }
            _ => value,
        };
        let mut args = vec![value];
        args.extend(self.texel_coords(&coord, &t));
        format!("{}.write({});", name, args.join(", "))
    }

    fn discard(&self) -> &'static str {
        "discard_fragment();"
    }

    fn barrier(&self, scope: MemoryScope, _sync: bool) -> String {
        let flags = match scope {
            MemoryScope::Group => "mem_flags::mem_threadgroup",
            MemoryScope::Device => "mem_flags::mem_device",
            MemoryScope::All => "mem_flags::mem_device | mem_flags::mem_threadgroup | mem_flags::mem_texture",
        };
        format!("threadgroup_barrier({});", flags)
    }

    fn call_args(&self, s: &Scope, callee: Handle<Function>, mut args: Vec<String>) -> Vec<String> {
        if let Some(globals) = self.uses.get(callee.index()) {
            for &g in globals {
                if self.global_param(s, g).is_some() {
                    args.push(s.names.global(g).to_string());
                }
            }
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{OptionsDesc, TargetDesc};
    use crate::diag::ErrorKind;
    use crate::emit::emit;
    use crate::emit::test_support::*;

    fn msl_module(module: &Module, language: ShadingLanguage, version: &str) -> Result<String, Diagnostics> {
        let options = OptionsDesc::default();
        let target = TargetDesc::with_version(language, version);
        emit(module, &EmitContext::new(&options, &target)).map(|o| o.blob.to_string_lossy())
    }

    fn msl(source: &str, entry: &str, stage: ShaderStage) -> String {
        msl_module(&module(source, entry, stage), ShadingLanguage::MslMacOs, "").unwrap()
    }

    #[test]
    fn test_vertex_stage_function() {
        let text = msl(VERTEX, "VS", ShaderStage::Vertex);
        assert!(text.starts_with("// Metal Shading Language 2.0 for macOS\n#include <metal_stdlib>"));
        assert!(text.contains("struct type_Transform"));
        assert!(text.contains("    float4x4 mvp;"));
        assert!(text.contains("float3 in_var_POSITION0 [[attribute(0)]];"));
        assert!(text.contains("float4 gl_Position [[position]];"));
        assert!(text.contains("float2 out_var_TEXCOORD0 [[user(locn0)]];"));
        assert!(text.contains(
            "vertex VS_out VS(VS_in in [[stage_in]], constant type_Transform& Transform [[buffer(0)]])"
        ));
        assert!(text.contains("(Transform.mvp * float4(pos, 1.0))"));
        assert!(text.contains("out.gl_Position = _ret.pos;"));
        assert!(text.contains("return out;"));
    }

    #[test]
    fn test_fragment_resources_are_renumbered() {
        let text = msl(PIXEL, "PS", ShaderStage::Pixel);
        assert!(text.contains("texture2d<float> albedo [[texture(0)]]"));
        assert!(text.contains("sampler linearSampler [[sampler(0)]]"));
        assert!(text.contains("albedo.sample(linearSampler, uv)"));
        assert!(text.contains("discard_fragment();"));
        assert!(text.contains("float4 out_var_SV_Target0 [[color(0)]];"));
    }

    #[test]
    fn test_kernel_buffers() {
        let text = msl(COMPUTE, "CS", ShaderStage::Compute);
        assert!(text.contains("kernel void CS("));
        assert!(text.contains("uint3 gl_GlobalInvocationID [[thread_position_in_grid]]"));
        assert!(text.contains("device float* output [[buffer(0)]]"));
        assert!(text.contains("const device float* input [[buffer(1)]]"));
    }

    #[test]
    fn test_packed_constant_buffer() {
        let source = r#"
cbuffer Params : register(b0)
{
    float3 direction;
    float intensity;
    float2 scale;
};

float4 PS() : SV_Target
{
    return float4(direction * intensity, scale.x);
}
"#;
        let text = msl(source, "PS", ShaderStage::Pixel);
        assert!(text.contains("packed_float3 direction;"));
        assert!(text.contains("float intensity;"));
        assert!(text.contains("packed_float2 scale;"));
    }

    #[test]
    fn test_two_component_matrix_rows_are_widened() {
        let source = r#"
cbuffer Params : register(b0)
{
    float3x2 uvTransform;
    float4 offset;
};

float4 PS(float2 uv : TEXCOORD0) : SV_Target
{
    float2 t = mul(float3(uv, 1), uvTransform);
    return float4(t, 0, 1) + offset;
}
"#;
        let module = module(source, "PS", ShaderStage::Pixel);
        let text = msl_module(&module, ShadingLanguage::MslMacOs, "").unwrap();
        assert!(text.contains("float3x4 uvTransform;"), "{}", text);
        assert!(text.contains("float4 offset;"), "{}", text);
        assert!(text.contains("float3x2("), "{}", text);
        assert!(text.contains(".uvTransform[2].xy)"), "{}", text);
    }

    #[test]
    fn test_platform_rules() {
        let mut module = module(PIXEL, "PS", ShaderStage::Pixel);
        let ios = msl_module(&module, ShadingLanguage::MslIos, "20000").unwrap();
        assert!(ios.starts_with("// Metal Shading Language 2.0 for iOS"));

        module.uses_64bit = true;
        let err = msl_module(&module, ShadingLanguage::MslMacOs, "2.1").unwrap_err();
        assert_eq!(err.first_error().unwrap().kind, ErrorKind::TargetCapability);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let module = module(PIXEL, "PS", ShaderStage::Pixel);
        let err = msl_module(&module, ShadingLanguage::MslMacOs, "9.9").unwrap_err();
        assert!(err.render().contains("invalid MSL version '9.9'"));
    }

    #[test]
    fn test_subscript_padding() {
        assert_eq!(insert_after_subscript("b.w[i + a[2]].y", 3, "x"), "b.w[i + a[2]].x.y");
        assert_eq!(insert_after_subscript("b.w", 3, "x"), "b.w");
    }
}
