//! GLSL and ESSL emission
//!
//! HLSL matrices are emitted transposed: HLSL row `i` of a `floatRxC` is
//! column `i` of a GLSL `matRxC`. Row-major HLSL storage therefore maps to
//! the default column-major GLSL layout, and `mul(a, b)` becomes `b * a`.
//! Textures and samplers are merged into combined samplers named
//! `SPIRV_Cross_Combined{Texture}{Sampler}`; texel fetches use
//! `SPIRV_Cross_Combined{Texture}`.

use super::text::{
    BodyWriter, Interface, LevelText, Names, Namer, SampleText, Scope, Syntax, Writer,
    double_digits, float_digits, int_digits, local_names, narrow_texel, semantic_text,
    swizzle_letters, write_entry_call,
};
use super::{CombinedSampler, EmitContext, EmitOutput, Emitter, capability};
use crate::desc::{ShaderStage, ShadingLanguage};
use crate::diag::Diagnostics;
use crate::ir::layout::{LayoutRules, std140_offsets, struct_layout};
use crate::ir::visit::for_each_expr;
use crate::ir::{
    BinaryOp, BufferKind, BuiltIn, CBufferMember, EntryPoint, Expr, ExprKind, Function, GlobalKind,
    GlobalVariable, Handle, Interpolation, Intrinsic, Literal, MatrixLayout, MemoryScope, Module,
    ParamDirection, ResourceRef, Scalar, ScalarKind, TextureDim, TextureType, Type, UnaryOp,
};
use std::collections::HashMap;

const KEYWORDS: &[&str] = &[
    "active", "asm", "atomic_uint", "attribute", "bool", "break", "buffer", "case", "cast",
    "centroid", "class", "coherent", "common", "const", "continue", "default", "discard", "do",
    "double", "else", "enum", "extern", "external", "false", "filter", "fixed", "flat", "float",
    "for", "fvec2", "fvec3", "fvec4", "goto", "half", "highp", "hvec2", "hvec3", "hvec4", "if",
    "iimage1D", "iimage2D", "iimage3D", "image1D", "image2D", "image3D", "in", "inline",
    "inout", "input", "int", "interface", "invariant", "isampler1D", "isampler2D",
    "isampler3D", "layout", "long", "lowp", "main", "mediump", "namespace", "noinline",
    "noperspective", "out", "output", "partition", "patch", "precise", "precision", "public",
    "readonly", "resource", "restrict", "return", "sample", "sampler1D", "sampler2D",
    "sampler3D", "samplerBuffer", "samplerCube", "shared", "short", "sizeof", "smooth",
    "static", "struct", "subroutine", "superp", "switch", "template", "this", "true",
    "typedef", "uimage1D", "uimage2D", "uimage3D", "uint", "uniform", "union", "unsigned",
    "usampler1D", "usampler2D", "usampler3D", "using", "varying", "void", "volatile", "while",
    "writeonly", "mat2", "mat3", "mat4", "vec2", "vec3", "vec4", "ivec2", "ivec3", "ivec4",
    "uvec2", "uvec3", "uvec4", "bvec2", "bvec3", "bvec4", "dvec2", "dvec3", "dvec4", "abs",
    "all", "any", "bitCount", "ceil", "clamp", "cross", "dFdx", "dFdy", "distance", "dot",
    "equal", "exp", "exp2", "floor", "fract", "fwidth", "greaterThan", "imageLoad",
    "imageStore", "inversesqrt", "length", "lessThan", "log", "log2", "max", "min", "mix",
    "mod", "normalize", "not", "notEqual", "pow", "reflect", "refract", "sign", "smoothstep",
    "sqrt", "step", "texelFetch", "texture", "textureGrad", "textureLod", "transpose",
];

const GLSL_VERSIONS: &[u32] = &[330, 400, 410, 420, 430, 440, 450, 460];
const ESSL_VERSIONS: &[u32] = &[300, 310, 320];

#[derive(Debug)]
pub struct GlslEmitter;

/// `#version` of the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlslVersion {
    pub number: u32,
    pub es: bool,
}

impl GlslVersion {
    pub fn parse(ctx: &EmitContext) -> Result<Self, String> {
        let es = ctx.language() == ShadingLanguage::Essl;
        let (default, valid) = if es {
            (310, ESSL_VERSIONS)
        } else {
            (450, GLSL_VERSIONS)
        };
        let number = match ctx.version() {
            None => default,
            Some(text) => {
                let text = text.trim_end_matches(" es").trim_end_matches("es");
                text.trim().parse().map_err(|_| {
                    format!("invalid {} version '{}'", ctx.language(), ctx.version().unwrap_or_default())
                })?
            }
        };
        if !valid.contains(&number) {
            let list: Vec<String> = valid.iter().map(u32::to_string).collect();
            return Err(format!(
                "{} version {} is not supported, expected one of {}",
                ctx.language(),
                number,
                list.join(", ")
            ));
        }
        Ok(GlslVersion { number, es })
    }

    fn binding_qualifiers(self) -> bool {
        if self.es { self.number >= 310 } else { self.number >= 420 }
    }

    fn explicit_offsets(self) -> bool {
        !self.es && self.number >= 440
    }

    /// ESSL 3.00 cannot put locations on stage-to-stage varyings; they link by name.
    fn legacy_varyings(self) -> bool {
        self.number <= 300
    }

    fn separate_shader_objects(self) -> bool {
        !self.es && self.number < 410
    }

    fn compute(self) -> bool {
        if self.es { self.number >= 310 } else { self.number >= 430 }
    }

    fn images(self) -> bool {
        if self.es { self.number >= 310 } else { self.number >= 420 }
    }

    fn texel_buffers(self) -> bool {
        !self.es || self.number >= 320
    }

    fn bit_ops(self) -> bool {
        if self.es { self.number >= 310 } else { self.number >= 400 }
    }

    fn fine_derivatives(self) -> bool {
        !self.es && self.number >= 450
    }
}

impl Emitter for GlslEmitter {
    fn name(&self) -> &'static str {
        "GLSL"
    }

    fn languages(&self) -> &'static [ShadingLanguage] {
        &[ShadingLanguage::Glsl, ShadingLanguage::Essl]
    }

    fn check(&self, module: &Module, ctx: &EmitContext, diags: &mut Diagnostics) {
        let version = match GlslVersion::parse(ctx) {
            Ok(version) => version,
            Err(message) => {
                capability(diags, message);
                return;
            }
        };
        let lang = ctx.language();
        if module.entry().map(|e| e.stage) == Some(ShaderStage::Compute) && !version.compute() {
            capability(
                diags,
                format!("compute shaders are not available in {} {}", lang, version.number),
            );
        }
        if module.uses_16bit && (version.es || version.number < 450) {
            capability(diags, format!("16-bit types are not available in {} {}", lang, version.number));
        }
        if module.uses_64bit && (version.es || version.number < 400) {
            capability(
                diags,
                format!("double precision is not available in {} {}", lang, version.number),
            );
        }
        for (_, global) in module.resources() {
            let what = match &global.ty {
                Type::Buffer {
                    kind: BufferKind::Structured | BufferKind::ByteAddress,
                    ..
                } if !version.compute() => Some("storage buffers"),
                Type::Buffer {
                    kind: BufferKind::Typed,
                    rw: true,
                    ..
                } if !version.images() => Some("image buffers"),
                Type::Buffer {
                    kind: BufferKind::Typed,
                    rw: false,
                    ..
                } if !version.texel_buffers() => Some("texel buffers"),
                Type::Texture(t) if t.rw && !version.images() => Some("image load/store"),
                _ => None,
            };
            if let Some(what) = what {
                capability(
                    diags,
                    format!("'{}': {} are not available in {} {}", global.name, what, lang, version.number),
                );
            }
            if let GlobalKind::ConstantBuffer { members, .. } = &global.kind {
                check_block_layout(module, global, members, version, diags);
            }
        }
        if !version.bit_ops() {
            let mut uses_bit_ops = false;
            for (_, function) in module.functions.iter() {
                for_each_expr(&function.body, &mut |e| {
                    if let ExprKind::Intrinsic { fun, .. } = &e.kind {
                        uses_bit_ops |= matches!(
                            fun,
                            Intrinsic::CountBits
                                | Intrinsic::ReverseBits
                                | Intrinsic::FirstBitHigh
                                | Intrinsic::FirstBitLow
                        );
                    }
                });
            }
            if uses_bit_ops {
                capability(
                    diags,
                    format!("bit manipulation intrinsics are not available in {} {}", lang, version.number),
                );
            }
        }
    }

    fn emit(&self, module: &Module, ctx: &EmitContext) -> Result<EmitOutput, Diagnostics> {
        let version = GlslVersion::parse(ctx).map_err(|message| {
            let mut diags = Diagnostics::new();
            capability(&mut diags, message);
            diags
        })?;
        let mut namer = Namer::new(KEYWORDS, &["gl_"]);
        let names = Names::new(module, &mut namer);
        let combined = combined_samplers(module, &names, &mut namer, ctx.options.inherit_combined_sampler_bindings);
        let syntax = GlslSyntax { version, combined };
        let mut output = EmitOutput::text(syntax.write_module(module, &names, namer));
        output.reflection_hints.combined_samplers = syntax
            .combined
            .values()
            .map(|c| c.info.clone())
            .collect();
        output
            .reflection_hints
            .combined_samplers
            .sort_by(|a, b| a.name.cmp(&b.name));
        Ok(output)
    }
}

/// HLSL packing must be expressible in std140: top-level differences need
/// explicit offsets, nested struct differences cannot be expressed at all.
fn check_block_layout(
    module: &Module,
    global: &GlobalVariable,
    members: &[CBufferMember],
    version: GlslVersion,
    diags: &mut Diagnostics,
) {
    let std140 = std140_offsets(members, &module.structs);
    for (member, offset) in members.iter().zip(std140) {
        if member.offset != offset && !version.explicit_offsets() {
            capability(
                diags,
                format!(
                    "constant buffer '{}': member '{}' at offset {} cannot be placed with std140 layout (offset {}); explicit offsets need GLSL 440",
                    global.name, member.name, member.offset, offset
                ),
            );
        }
        let mut elem = &member.ty;
        while let Type::Array(inner, _) = elem {
            elem = inner;
        }
        if let Type::Struct(h) = elem {
            let decl = &module.structs[*h];
            let hlsl = struct_layout(decl, &module.structs, LayoutRules::HlslCBuffer, member.matrix_layout);
            let glsl = struct_layout(decl, &module.structs, LayoutRules::Std140, member.matrix_layout);
            if hlsl.0 != glsl.0 {
                capability(
                    diags,
                    format!(
                        "constant buffer '{}': struct '{}' is packed differently under std140",
                        global.name, decl.name
                    ),
                );
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Combined {
    info: CombinedSampler,
    /// Declared with the texture's binding
    inherit: bool,
    texture: Handle<GlobalVariable>,
    sampler: Option<Handle<GlobalVariable>>,
}

type CombinedKey = (Handle<GlobalVariable>, Option<Handle<GlobalVariable>>);

fn combined_samplers(
    module: &Module,
    names: &Names,
    namer: &mut Namer,
    inherit_bindings: bool,
) -> HashMap<CombinedKey, Combined> {
    let mut keys: Vec<CombinedKey> = Vec::new();
    for (_, function) in module.functions.iter() {
        for_each_expr(&function.body, &mut |e| {
            let key = match &e.kind {
                ExprKind::Sample {
                    texture: ResourceRef::Global(t),
                    sampler: ResourceRef::Global(s),
                    ..
                } => (*t, Some(*s)),
                ExprKind::ImageLoad {
                    image: ResourceRef::Global(t),
                    ..
                } if matches!(module.globals[*t].ty, Type::Texture(TextureType { rw: false, .. })) => {
                    (*t, None)
                }
                _ => return,
            };
            if !keys.contains(&key) {
                keys.push(key);
            }
        });
    }
    keys.into_iter()
        .map(|(texture, sampler)| {
            let texture_name = names.global(texture);
            let sampler_name = sampler.map(|s| names.global(s).to_string());
            let name = namer.name(&format!(
                "SPIRV_Cross_Combined{}{}",
                texture_name,
                sampler_name.as_deref().unwrap_or("")
            ));
            let texture_binding = module.globals[texture].binding.filter(|_| inherit_bindings);
            (
                (texture, sampler),
                Combined {
                    info: CombinedSampler {
                        name,
                        texture: module.globals[texture].name.clone(),
                        sampler: sampler.map(|s| module.globals[s].name.clone()),
                        binding: texture_binding.map_or(0, |b| b.register),
                    },
                    inherit: texture_binding.is_some(),
                    texture,
                    sampler,
                },
            )
        })
        .collect()
}

struct GlslSyntax {
    version: GlslVersion,
    combined: HashMap<CombinedKey, Combined>,
}

fn scalar_prefix(scalar: Scalar) -> &'static str {
    match (scalar.kind, scalar.width) {
        (ScalarKind::Bool, _) => "b",
        (ScalarKind::Sint, 2) => "i16",
        (ScalarKind::Sint, _) => "i",
        (ScalarKind::Uint, 2) => "u16",
        (ScalarKind::Uint, _) => "u",
        (ScalarKind::Float, 2) => "f16",
        (ScalarKind::Float, 8) => "d",
        (ScalarKind::Float, _) => "",
    }
}

fn scalar_name(scalar: Scalar) -> &'static str {
    match (scalar.kind, scalar.width) {
        (ScalarKind::Bool, _) => "bool",
        (ScalarKind::Sint, 2) => "int16_t",
        (ScalarKind::Sint, _) => "int",
        (ScalarKind::Uint, 2) => "uint16_t",
        (ScalarKind::Uint, _) => "uint",
        (ScalarKind::Float, 2) => "float16_t",
        (ScalarKind::Float, 8) => "double",
        (ScalarKind::Float, _) => "float",
    }
}

fn sampler_type(image: &TextureType, shadow: bool) -> String {
    let prefix = match image.sampled.kind {
        ScalarKind::Sint => "i",
        ScalarKind::Uint => "u",
        _ => "",
    };
    let dim = match image.dim {
        TextureDim::D1 => "1D",
        TextureDim::D2 => "2D",
        TextureDim::D3 => "3D",
        TextureDim::Cube => "Cube",
    };
    format!(
        "{}{}{}{}{}{}",
        if shadow { "" } else { prefix },
        if image.rw { "image" } else { "sampler" },
        dim,
        if image.multisampled { "MS" } else { "" },
        if image.arrayed { "Array" } else { "" },
        if shadow { "Shadow" } else { "" }
    )
}

/// Image format qualifier for a texel type.
fn image_format(scalar: Scalar, components: u8) -> String {
    let channels = match components {
        1 => "r",
        2 => "rg",
        _ => "rgba",
    };
    let suffix = match (scalar.kind, scalar.width) {
        (ScalarKind::Float, 2) => "16f",
        (ScalarKind::Float, _) => "32f",
        (ScalarKind::Sint, _) => "32i",
        _ => "32ui",
    };
    format!("{}{}", channels, suffix)
}

fn interpolation_keyword(interpolation: Interpolation) -> Option<&'static str> {
    match interpolation {
        Interpolation::Linear => None,
        Interpolation::NoInterpolation => Some("flat"),
        Interpolation::Centroid => Some("centroid"),
        Interpolation::NoPerspective => Some("noperspective"),
        Interpolation::Sample => Some("sample"),
    }
}

/// Text and natural type of a built-in read.
fn builtin_input(builtin: BuiltIn) -> Option<(&'static str, Type)> {
    Some(match builtin {
        BuiltIn::FragCoord => (
            "vec4(gl_FragCoord.xyz, 1.0 / gl_FragCoord.w)",
            Type::Vector(Scalar::F32, 4),
        ),
        BuiltIn::VertexId => ("gl_VertexID", Type::INT),
        BuiltIn::InstanceId => ("gl_InstanceID", Type::INT),
        BuiltIn::FrontFacing => ("gl_FrontFacing", Type::BOOL),
        BuiltIn::SampleIndex => ("gl_SampleID", Type::INT),
        BuiltIn::PrimitiveId => ("gl_PrimitiveID", Type::INT),
        BuiltIn::GlobalInvocationId => ("gl_GlobalInvocationID", Type::Vector(Scalar::U32, 3)),
        BuiltIn::LocalInvocationId => ("gl_LocalInvocationID", Type::Vector(Scalar::U32, 3)),
        BuiltIn::WorkgroupId => ("gl_WorkGroupID", Type::Vector(Scalar::U32, 3)),
        BuiltIn::LocalInvocationIndex => ("gl_LocalInvocationIndex", Type::UINT),
        BuiltIn::Position | BuiltIn::FragDepth => return None,
    })
}

fn builtin_output(builtin: BuiltIn) -> Option<(&'static str, Type)> {
    match builtin {
        BuiltIn::Position => Some(("gl_Position", Type::Vector(Scalar::F32, 4))),
        BuiltIn::FragDepth => Some(("gl_FragDepth", Type::FLOAT)),
        _ => None,
    }
}

impl GlslSyntax {
    fn binding(&self, register: Option<u32>) -> Option<String> {
        match register {
            Some(r) if self.version.binding_qualifiers() => Some(format!("binding = {}", r)),
            _ => None,
        }
    }

    fn precision(&self) -> &'static str {
        if self.version.es { "highp " } else { "" }
    }

    fn write_module(&self, module: &Module, names: &Names, mut namer: Namer) -> String {
        let mut w = Writer::new();
        let Some(entry) = module.entry() else {
            return String::new();
        };
        let entry_function = &module.functions[entry.function];
        let version = self.version;
        w.line(if version.es {
            format!("#version {} es", version.number)
        } else {
            format!("#version {}", version.number)
        });
        let interstage = match entry.stage {
            ShaderStage::Vertex => entry.outputs.iter().any(|v| v.builtin.is_none()),
            ShaderStage::Pixel => entry.inputs.iter().any(|v| v.builtin.is_none()),
            _ => false,
        };
        if version.separate_shader_objects() && interstage {
            w.line("#extension GL_ARB_separate_shader_objects : require");
        }
        if module.uses_16bit {
            w.line("#extension GL_EXT_shader_explicit_arithmetic_types : require");
        }
        if version.es {
            w.line("precision highp float;");
            w.line("precision highp int;");
        }
        if entry.stage == ShaderStage::Compute {
            let [x, y, z] = entry.workgroup_size;
            w.line(format!(
                "layout(local_size_x = {}, local_size_y = {}, local_size_z = {}) in;",
                x, y, z
            ));
        }
        w.blank();

        let init_scope = Scope {
            module,
            names,
            function: entry_function,
            handle: entry.function,
            locals: local_names(entry_function, &namer),
        };

        for (h, decl) in module.structs.iter() {
            w.line(format!("struct {}", names.structs[h.index()]));
            w.open();
            for (i, member) in decl.members.iter().enumerate() {
                w.line(format!(
                    "{};",
                    self.declare(&init_scope, &member.ty, &names.members[h.index()][i])
                ));
            }
            w.close_with("};");
            w.blank();
        }

        for (h, global) in module.globals.iter() {
            let name = names.global(h);
            let register = global.binding.map(|b| b.register);
            match &global.kind {
                GlobalKind::ConstantBuffer { members, .. } => {
                    let std140 = std140_offsets(members, &module.structs);
                    let mut qualifiers = vec!["std140".to_string()];
                    qualifiers.extend(self.binding(register));
                    w.line(format!("layout({}) uniform type_{}", qualifiers.join(", "), name));
                    w.open();
                    for (member, offset) in members.iter().zip(std140) {
                        let mut layout = Vec::new();
                        if member.offset != offset && version.explicit_offsets() {
                            layout.push(format!("offset = {}", member.offset));
                        }
                        if member.ty.is_matrix() && member.matrix_layout == MatrixLayout::ColumnMajor {
                            layout.push("row_major".to_string());
                        }
                        let prefix = if layout.is_empty() {
                            String::new()
                        } else {
                            format!("layout({}) ", layout.join(", "))
                        };
                        w.line(format!(
                            "{}{};",
                            prefix,
                            self.declare(&init_scope, &member.ty, &namer.member(&member.name))
                        ));
                    }
                    w.close_with(&format!("}} {};", name));
                    w.blank();
                }
                GlobalKind::Resource => match &global.ty {
                    Type::Buffer {
                        kind: BufferKind::Structured | BufferKind::ByteAddress,
                        rw,
                        elem,
                        ..
                    } => {
                        let elem = match &global.ty {
                            Type::Buffer {
                                kind: BufferKind::ByteAddress,
                                ..
                            } => Type::UINT,
                            _ => (**elem).clone(),
                        };
                        let mut qualifiers = vec!["std430".to_string()];
                        qualifiers.extend(self.binding(register));
                        w.line(format!(
                            "layout({}) {}buffer type_{}",
                            qualifiers.join(", "),
                            if *rw { "" } else { "readonly " },
                            name
                        ));
                        w.open();
                        w.line(format!("{} _m0[];", self.type_name(&init_scope, &elem)));
                        w.close_with(&format!("}} {};", name));
                        w.blank();
                    }
                    Type::Buffer {
                        kind: BufferKind::Typed,
                        rw,
                        elem,
                    } => {
                        let scalar = elem.scalar().unwrap_or(Scalar::F32);
                        let prefix = match scalar.kind {
                            ScalarKind::Sint => "i",
                            ScalarKind::Uint => "u",
                            _ => "",
                        };
                        if *rw {
                            let mut qualifiers =
                                vec![image_format(scalar, elem.vector_size().unwrap_or(1))];
                            qualifiers.extend(self.binding(register));
                            w.line(format!(
                                "layout({}) uniform {}{}imageBuffer {};",
                                qualifiers.join(", "),
                                self.precision(),
                                prefix,
                                name
                            ));
                        } else {
                            let layout = self
                                .binding(register)
                                .map(|b| format!("layout({}) ", b))
                                .unwrap_or_default();
                            w.line(format!(
                                "{}uniform {}{}samplerBuffer {};",
                                layout,
                                self.precision(),
                                prefix,
                                name
                            ));
                        }
                    }
                    Type::Texture(t) if t.rw => {
                        let mut qualifiers = vec![image_format(t.sampled, t.components)];
                        qualifiers.extend(self.binding(register));
                        w.line(format!(
                            "layout({}) uniform {}{} {};",
                            qualifiers.join(", "),
                            self.precision(),
                            sampler_type(t, false),
                            name
                        ));
                    }
                    // Sampled textures and samplers appear as combined samplers
                    _ => {}
                },
                GlobalKind::Private => {
                    let mut line = String::new();
                    if global.is_const {
                        line.push_str("const ");
                    }
                    line.push_str(&self.declare(&init_scope, &global.ty, name));
                    if let Some(init) = &global.init {
                        let printer = BodyWriter::new(
                            self,
                            Scope {
                                locals: init_scope.locals.clone(),
                                ..init_scope
                            },
                        );
                        line.push_str(" = ");
                        line.push_str(&printer.expr(init));
                    }
                    line.push(';');
                    w.line(line);
                }
                GlobalKind::Workgroup => {
                    w.line(format!("shared {};", self.declare(&init_scope, &global.ty, name)));
                }
            }
        }

        let mut combined: Vec<&Combined> = self.combined.values().collect();
        combined.sort_by(|a, b| a.info.name.cmp(&b.info.name));
        for c in combined {
            let Type::Texture(image) = &module.globals[c.texture].ty else {
                continue;
            };
            let shadow = c
                .sampler
                .is_some_and(|s| matches!(module.globals[s].ty, Type::Sampler { comparison: true }));
            let layout = self
                .binding(Some(c.info.binding).filter(|_| c.inherit))
                .map(|b| format!("layout({}) ", b))
                .unwrap_or_default();
            w.line(format!(
                "{}uniform {}{} {};",
                layout,
                self.precision(),
                sampler_type(image, shadow),
                c.info.name
            ));
        }
        w.blank();

        let interface = self.write_interface(&mut w, module, names, entry, &mut namer);
        w.blank();

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

        self.write_main(&mut w, module, names, entry, &interface, &mut namer);
        w.finish()
    }

    /// Declares the stage inputs and outputs; returns the name each varying is read or written through.
    fn write_interface(
        &self,
        w: &mut Writer,
        module: &Module,
        names: &Names,
        entry: &EntryPoint,
        namer: &mut Namer,
    ) -> Interface {
        let entry_function = &module.functions[entry.function];
        let scope = Scope {
            module,
            names,
            function: entry_function,
            handle: entry.function,
            locals: Vec::new(),
        };
        let mut interface = Interface::default();
        for (is_output, varyings) in [(false, &entry.inputs), (true, &entry.outputs)] {
            for varying in varyings {
                if let Some(builtin) = varying.builtin {
                    let natural = if is_output {
                        builtin_output(builtin)
                    } else {
                        builtin_input(builtin)
                    };
                    let name = natural.map(|(text, ty)| (text.to_string(), ty));
                    interface.push(is_output, name);
                    continue;
                }
                let interstage = match entry.stage {
                    ShaderStage::Vertex => is_output,
                    ShaderStage::Pixel => !is_output,
                    _ => false,
                };
                let legacy = interstage && self.version.legacy_varyings();
                let base = if legacy {
                    format!("varying_{}", semantic_text(varying))
                } else if is_output {
                    format!("out_var_{}", semantic_text(varying))
                } else {
                    format!("in_var_{}", semantic_text(varying))
                };
                let name = namer.name(&base);
                let mut line = String::new();
                if !legacy {
                    line.push_str(&format!("layout(location = {}) ", varying.location));
                }
                let integer = varying.ty.scalar().is_some_and(|s| !s.is_float());
                let interpolation = match varying.interpolation {
                    _ if interstage && integer => Some("flat"),
                    Some(i) if interstage => interpolation_keyword(i),
                    _ => None,
                };
                if let Some(keyword) = interpolation {
                    line.push_str(keyword);
                    line.push(' ');
                }
                line.push_str(if is_output { "out " } else { "in " });
                line.push_str(&self.declare(&scope, &varying.ty, &name));
                line.push(';');
                w.line(line);
                interface.push(is_output, Some((name, varying.ty.clone())));
            }
        }
        interface
    }

    fn write_main(
        &self,
        w: &mut Writer,
        module: &Module,
        names: &Names,
        entry: &EntryPoint,
        interface: &Interface,
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
        w.line("void main()");
        w.open();
        write_entry_call(self, w, &scope, entry, interface, namer, Vec::new());
        w.close();
    }

    fn header(&self, s: &Scope, function: &Function) -> String {
        let params: Vec<String> = function
            .params
            .iter()
            .map(|p| {
                let local = &function.locals[p.local];
                let direction = match p.direction {
                    ParamDirection::In => "",
                    ParamDirection::Out => "out ",
                    ParamDirection::InOut => "inout ",
                };
                format!("{}{}", direction, self.declare(s, &local.ty, s.local(p.local)))
            })
            .collect();
        format!(
            "{} {}({})",
            self.type_name(s, &function.result),
            s.names.functions[s.handle.index()],
            params.join(", ")
        )
    }

    fn combined_name(&self, s: &Scope, texture: ResourceRef, sampler: Option<ResourceRef>) -> String {
        let key = match (texture, sampler) {
            (ResourceRef::Global(t), Some(ResourceRef::Global(smp))) => (t, Some(smp)),
            (ResourceRef::Global(t), None) => (t, None),
            _ => return s.resource(texture).to_string(),
        };
        match self.combined.get(&key) {
            Some(c) => c.info.name.clone(),
            None => s.resource(texture).to_string(),
        }
    }

}

impl Syntax for GlslSyntax {
    fn type_name(&self, s: &Scope, ty: &Type) -> String {
        match ty {
            Type::Void => "void".to_string(),
            Type::Scalar(scalar) => scalar_name(*scalar).to_string(),
            Type::Vector(scalar, n) => format!("{}vec{}", scalar_prefix(*scalar), n),
            Type::Matrix { scalar, rows, cols } => {
                let prefix = match scalar.width {
                    2 => "f16",
                    8 => "d",
                    _ => "",
                };
                if rows == cols {
                    format!("{}mat{}", prefix, rows)
                } else {
                    format!("{}mat{}x{}", prefix, rows, cols)
                }
            }
            Type::Array(elem, n) => format!("{}[{}]", self.type_name(s, elem), n),
            Type::Struct(h) => s
                .names
                .structs
                .get(h.index())
                .cloned()
                .unwrap_or_else(|| "_invalid".to_string()),
            Type::Texture(t) => sampler_type(t, false),
            Type::Sampler { .. } => "sampler".to_string(),
            Type::Buffer { .. } => "_invalid".to_string(),
        }
    }

    fn literal(&self, value: Literal, scalar: Scalar) -> String {
        match (value.cast(scalar), scalar.width) {
            (Literal::Bool(b), _) => b.to_string(),
            (Literal::Int(i), 2) => format!("int16_t({})", i),
            (Literal::Int(i), _) => int_digits(i),
            (Literal::Uint(u), 2) => format!("uint16_t({}u)", u),
            (Literal::Uint(u), _) => format!("{}u", u),
            (Literal::Float(f), _) if f.is_nan() => "(0.0 / 0.0)".to_string(),
            (Literal::Float(f), _) if f.is_infinite() => {
                format!("({}1.0 / 0.0)", if f < 0.0 { "-" } else { "" })
            }
            (Literal::Float(f), 2) => format!("float16_t({})", float_digits(f)),
            (Literal::Float(f), 8) => format!("{}lf", double_digits(f)),
            (Literal::Float(f), _) => float_digits(f),
        }
    }

    fn cbuffer_member(&self, s: &Scope, buffer: Handle<GlobalVariable>, member: u32) -> String {
        let name = s
            .module
            .cbuffer_member(buffer, member)
            .map(|m| sanitize_member(&m.name))
            .unwrap_or_else(|| "_invalid".to_string());
        format!("{}.{}", s.names.global(buffer), name)
    }

    fn element(&self, s: &Scope, resource: ResourceRef, index: String) -> String {
        format!("{}._m0[{}]", s.resource(resource), index)
    }

    fn binary(&self, _s: &Scope, op: BinaryOp, ty: &Type, left: String, right: String) -> String {
        let vector = ty.is_vector();
        let boolean = ty.is_bool_like();
        if vector && op.is_comparison() {
            let fun = match op {
                BinaryOp::Eq => "equal",
                BinaryOp::Ne => "notEqual",
                BinaryOp::Lt => "lessThan",
                BinaryOp::Le => "lessThanEqual",
                BinaryOp::Gt => "greaterThan",
                _ => "greaterThanEqual",
            };
            return format!("{}({}, {})", fun, left, right);
        }
        if boolean {
            let logical = match op {
                BinaryOp::LogicalAnd | BinaryOp::BitAnd => Some("&&"),
                BinaryOp::LogicalOr | BinaryOp::BitOr => Some("||"),
                BinaryOp::BitXor => {
                    return if vector {
                        format!("notEqual({}, {})", left, right)
                    } else {
                        format!("({} != {})", left, right)
                    };
                }
                _ => None,
            };
            if let Some(symbol) = logical {
                if let Type::Vector(_, n) = ty {
                    let parts: Vec<String> = (0..*n)
                        .map(|i| {
                            let c = swizzle_letters(&[i]);
                            format!("{}.{} {} {}.{}", left, c, symbol, right, c)
                        })
                        .collect();
                    return format!("bvec{}({})", n, parts.join(", "));
                }
                return format!("({} {} {})", left, symbol, right);
            }
        }
        if op == BinaryOp::Rem && ty.scalar().is_some_and(Scalar::is_float) {
            return format!("({0} - {1} * trunc({0} / {1}))", left, right);
        }
        format!("({} {} {})", left, op.symbol(), right)
    }

    fn unary(&self, _s: &Scope, op: UnaryOp, ty: &Type, value: String) -> String {
        match op {
            UnaryOp::Not if ty.is_vector() => format!("not({})", value),
            UnaryOp::Neg => format!("(-{})", parenthesize(value)),
            UnaryOp::Not => format!("(!{})", parenthesize(value)),
            UnaryOp::BitNot => format!("(~{})", parenthesize(value)),
        }
    }

    fn select(&self, s: &Scope, condition: &Type, ty: &Type, c: String, a: String, b: String) -> String {
        match (condition, ty) {
            (Type::Vector(..), Type::Vector(scalar, _)) if scalar.is_float() => {
                format!("mix({}, {}, {})", b, a, c)
            }
            (Type::Vector(_, n), _) => {
                let parts: Vec<String> = (0..*n)
                    .map(|i| {
                        let l = swizzle_letters(&[i]);
                        format!("{}.{} ? {}.{} : {}.{}", c, l, a, l, b, l)
                    })
                    .collect();
                format!("{}({})", self.type_name(s, ty), parts.join(", "))
            }
            _ => format!("({} ? {} : {})", c, a, b),
        }
    }

    fn bitcast(&self, s: &Scope, ty: &Type, from: &Type, value: String) -> String {
        let to = ty.scalar().map(|s| s.kind);
        let source = from.scalar().map(|s| s.kind);
        match (source, to) {
            (Some(ScalarKind::Float), Some(ScalarKind::Sint)) => format!("floatBitsToInt({})", value),
            (Some(ScalarKind::Float), Some(ScalarKind::Uint)) => format!("floatBitsToUint({})", value),
            (Some(ScalarKind::Sint), Some(ScalarKind::Float)) => format!("intBitsToFloat({})", value),
            (Some(ScalarKind::Uint), Some(ScalarKind::Float)) => format!("uintBitsToFloat({})", value),
            _ => format!("{}({})", self.type_name(s, ty), value),
        }
    }

    fn intrinsic(&self, s: &Scope, fun: Intrinsic, args: &[Expr], printed: Vec<String>, ty: &Type) -> String {
        use Intrinsic::*;
        let a = |i: usize| printed.get(i).cloned().unwrap_or_default();
        let call = |name: &str| format!("{}({})", name, printed.join(", "));
        let arg_ty = args.first().map(|e| e.ty.clone()).unwrap_or(Type::Void);
        let text = match fun {
            Atan2 => format!("atan({}, {})", a(0), a(1)),
            Ddx => call("dFdx"),
            Ddy => call("dFdy"),
            DdxCoarse if self.version.fine_derivatives() => call("dFdxCoarse"),
            DdyCoarse if self.version.fine_derivatives() => call("dFdyCoarse"),
            DdxFine if self.version.fine_derivatives() => call("dFdxFine"),
            DdyFine if self.version.fine_derivatives() => call("dFdyFine"),
            DdxCoarse | DdxFine => call("dFdx"),
            DdyCoarse | DdyFine => call("dFdy"),
            Fmod => format!("({0} - {1} * trunc({0} / {1}))", a(0), a(1)),
            Frac => call("fract"),
            Lerp => call("mix"),
            Log10 => format!("(log2({}) * 0.30102999566398120)", a(0)),
            Mad => format!("({} * {} + {})", a(0), a(1), a(2)),
            Rcp => format!("(1.0 / {})", a(0)),
            Round => call("roundEven"),
            Rsqrt => call("inversesqrt"),
            Saturate => format!("clamp({}, 0.0, 1.0)", a(0)),
            Ldexp => format!("({} * exp2({}))", a(0), a(1)),
            All | Any => {
                let name = if fun == All { "all" } else { "any" };
                match &arg_ty {
                    Type::Vector(scalar, n) if scalar.kind != ScalarKind::Bool => {
                        format!("{}(bvec{}({}))", name, n, a(0))
                    }
                    Type::Vector(..) => call(name),
                    _ => format!("bool({})", a(0)),
                }
            }
            CountBits => call("bitCount"),
            ReverseBits => call("bitfieldReverse"),
            FirstBitHigh => call("findMSB"),
            FirstBitLow => call("findLSB"),
            other => call(other.hlsl_name()),
        };
        let natural_scalar = match fun {
            CountBits | FirstBitHigh | FirstBitLow => Some(ScalarKind::Sint),
            IsInf | IsNan | All | Any => Some(ScalarKind::Bool),
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
        let name = self.combined_name(s, sample.texture, Some(sample.sampler));
        let image = sample.image;
        let coord = match &sample.compare {
            Some(cmp) => match (image.dim, image.arrayed) {
                (TextureDim::D1, false) => format!("vec3({}, 0.0, {})", sample.coord, cmp),
                (TextureDim::Cube, true) => sample.coord.clone(),
                _ => {
                    let n = image.full_coord_size() + 1;
                    format!("vec{}({}, {})", n, sample.coord, cmp)
                }
            },
            None => sample.coord.clone(),
        };
        let cube_array_compare = sample.compare.is_some() && image.dim == TextureDim::Cube && image.arrayed;
        let mut args = vec![name, coord];
        if cube_array_compare {
            args.push(sample.compare.clone().unwrap_or_default());
        }
        let offset = sample.offset;
        let fun = match sample.level {
            LevelText::Auto => {
                if let Some(offset) = offset {
                    args.push(offset);
                    "textureOffset"
                } else {
                    "texture"
                }
            }
            LevelText::Bias(bias) => {
                let fun = if let Some(offset) = offset {
                    args.push(offset);
                    "textureOffset"
                } else {
                    "texture"
                };
                args.push(bias);
                fun
            }
            LevelText::Lod(_) | LevelText::Zero
                if sample.compare.is_some() && self.version.es =>
            {
                let zero = match image.dim.coord_size() {
                    1 => "0.0".to_string(),
                    n => format!("vec{}(0.0)", n),
                };
                args.push(zero.clone());
                args.push(zero);
                if let Some(offset) = offset {
                    args.push(offset);
                    "textureGradOffset"
                } else {
                    "textureGrad"
                }
            }
            LevelText::Lod(lod) => {
                args.push(lod);
                if let Some(offset) = offset {
                    args.push(offset);
                    "textureLodOffset"
                } else {
                    "textureLod"
                }
            }
            LevelText::Zero => {
                args.push("0.0".to_string());
                if let Some(offset) = offset {
                    args.push(offset);
                    "textureLodOffset"
                } else {
                    "textureLod"
                }
            }
            LevelText::Grad(dx, dy) => {
                args.push(dx);
                args.push(dy);
                if let Some(offset) = offset {
                    args.push(offset);
                    "textureGradOffset"
                } else {
                    "textureGrad"
                }
            }
        };
        let call = format!("{}({})", fun, args.join(", "));
        if sample.compare.is_some() {
            call
        } else {
            narrow_texel(call, ty)
        }
    }

    fn image_load(&self, s: &Scope, image: ResourceRef, coord: String, lod: Option<String>, ty: &Type) -> String {
        let call = match s.resource_type(image) {
            Type::Texture(t) if !t.rw => {
                let name = self.combined_name(s, image, None);
                format!("texelFetch({}, {}, {})", name, coord, lod.unwrap_or_else(|| "0".to_string()))
            }
            Type::Buffer { rw: false, .. } => format!("texelFetch({}, {})", s.resource(image), coord),
            _ => format!("imageLoad({}, {})", s.resource(image), coord),
        };
        narrow_texel(call, ty)
    }

    fn image_store(&self, s: &Scope, image: ResourceRef, coord: String, value: String, value_ty: &Type) -> String {
        let value = match (value_ty.scalar(), value_ty.vector_size()) {
            (Some(scalar), Some(n)) if n < 4 => {
                let zero = self.literal(Literal::Int(0), scalar);
                let mut parts = vec![value];
                parts.extend(std::iter::repeat_n(zero, 4 - n as usize));
                format!("{}vec4({})", scalar_prefix(scalar), parts.join(", "))
            }
            _ => value,
        };
        format!("imageStore({}, {}, {});", s.resource(image), coord, value)
    }

    fn barrier(&self, scope: MemoryScope, sync: bool) -> String {
        let memory = match scope {
            MemoryScope::Group => "groupMemoryBarrier();",
            MemoryScope::Device | MemoryScope::All => "memoryBarrier();",
        };
        if sync {
            format!("{} barrier();", memory)
        } else {
            memory.to_string()
        }
    }
}

fn parenthesize(value: String) -> String {
    if value.starts_with(['-', '!', '~']) {
        format!("({})", value)
    } else {
        value
    }
}

fn sanitize_member(name: &str) -> String {
    let namer = Namer::new(KEYWORDS, &["gl_"]);
    namer.member(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{OptionsDesc, TargetDesc};
    use crate::emit::emit;
    use crate::emit::test_support::*;

    fn glsl(source: &str, entry: &str, stage: ShaderStage, language: ShadingLanguage, version: &str) -> Result<String, Diagnostics> {
        let module = module(source, entry, stage);
        let options = OptionsDesc::default();
        let target = TargetDesc::with_version(language, version);
        emit(&module, &EmitContext::new(&options, &target)).map(|o| o.blob.to_string_lossy())
    }

    #[test]
    fn test_minimal_pixel_shader() {
        let text = glsl(
            "float4 PS():SV_Target{return float4(1,0,0,1);}",
            "PS",
            ShaderStage::Pixel,
            ShadingLanguage::Glsl,
            "460",
        )
        .unwrap();
        assert!(text.starts_with("#version 460\n"));
        assert!(text.contains("layout(location = 0) out vec4 out_var_SV_Target0;"));
        assert!(text.contains("void main()"));
        assert!(text.contains("out_var_SV_Target0 = _ret;"));
    }

    #[test]
    fn test_vertex_shader_block_and_matrix_order() {
        let text = glsl(VERTEX, "VS", ShaderStage::Vertex, ShadingLanguage::Glsl, "450").unwrap();
        assert!(text.contains("layout(std140, binding = 0) uniform type_Transform"));
        assert!(text.contains("mat4 mvp;"));
        assert!(text.contains("} Transform;"));
        assert!(text.contains("(Transform.mvp * vec4(pos, 1.0))"));
        assert!(text.contains("layout(location = 0) in vec3 in_var_POSITION0;"));
        assert!(text.contains("gl_Position = _ret.pos;"));
        assert!(text.contains("layout(location = 0) out vec2 out_var_TEXCOORD0;"));
    }

    #[test]
    fn test_pixel_shader_combined_sampler() {
        let text = glsl(PIXEL, "PS", ShaderStage::Pixel, ShadingLanguage::Glsl, "450").unwrap();
        assert!(text.contains("uniform sampler2D SPIRV_Cross_CombinedalbedolinearSampler;"));
        assert!(text.contains("texture(SPIRV_Cross_CombinedalbedolinearSampler, uv)"));
        assert!(text.contains("discard;"));
    }

    #[test]
    fn test_essl_300_uses_named_varyings() {
        let text = glsl(PIXEL, "PS", ShaderStage::Pixel, ShadingLanguage::Essl, "300").unwrap();
        assert!(text.starts_with("#version 300 es\n"));
        assert!(text.contains("precision highp float;"));
        assert!(text.contains("in vec2 varying_TEXCOORD0;"));
        assert!(text.contains("uniform highp sampler2D"));
    }

    #[test]
    fn test_compute_version_gate() {
        let err = glsl(COMPUTE, "CS", ShaderStage::Compute, ShadingLanguage::Glsl, "410").unwrap_err();
        let first = err.first_error().unwrap();
        assert_eq!(first.kind, crate::diag::ErrorKind::TargetCapability);
        assert!(first.message.contains("compute shaders are not available"));

        let text = glsl(COMPUTE, "CS", ShaderStage::Compute, ShadingLanguage::Glsl, "430").unwrap();
        assert!(text.contains("layout(local_size_x = 64, local_size_y = 1, local_size_z = 1) in;"));
        assert!(text.contains("buffer type__output"));
        assert!(text.contains("gl_GlobalInvocationID"));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let err = glsl(PIXEL, "PS", ShaderStage::Pixel, ShadingLanguage::Glsl, "120").unwrap_err();
        assert!(err.render().contains("glsl version 120 is not supported"));
    }
}
