//! HLSL re-emission for shader models 3.0 to 6.7

use super::text::{
    BodyWriter, LevelText, Names, Namer, SampleText, Scope, Syntax, Writer, double_digits,
    float_digits, int_digits, local_names,
};
use super::{EmitContext, EmitOutput, Emitter, capability};
use crate::desc::{ShaderStage, ShadingLanguage};
use crate::diag::Diagnostics;
use crate::ir::visit::{for_each_expr, for_each_statement};
use crate::ir::{
    BufferKind, Expr, ExprKind, Function, GlobalKind, GlobalVariable, Handle, Interpolation,
    Intrinsic, Literal, MatrixLayout, MemoryScope, Module, ParamDirection, Place, ResourceRef,
    Scalar, ScalarKind, Semantic, Statement, TextureDim, Type,
};
use std::collections::HashMap;

const KEYWORDS: &[&str] = &[
    "AppendStructuredBuffer", "BlendState", "Buffer", "ByteAddressBuffer", "ConstantBuffer",
    "ConsumeStructuredBuffer", "RWBuffer", "RWByteAddressBuffer", "RWStructuredBuffer",
    "RWTexture1D", "RWTexture2D", "RWTexture3D", "SamplerComparisonState", "SamplerState",
    "StructuredBuffer", "Texture1D", "Texture2D", "Texture2DArray", "Texture3D", "TextureCube",
    "asm", "bool", "break", "case", "cbuffer", "centroid", "class", "column_major", "compile",
    "const", "continue", "default", "discard", "do", "double", "else", "extern", "false",
    "float", "for", "groupshared", "half", "if", "in", "inline", "inout", "int", "interface",
    "line", "linear", "matrix", "namespace", "nointerpolation", "noperspective", "out",
    "packoffset", "pass", "point", "precise", "register", "return", "row_major", "sample",
    "sampler", "shared", "snorm", "static", "string", "struct", "switch", "tbuffer", "technique",
    "texture", "triangle", "true", "typedef", "uint", "uniform", "unorm", "vector", "void",
    "volatile", "while",
];

const MODELS: &[u32] = &[30, 40, 41, 50, 51, 60, 61, 62, 63, 64, 65, 66, 67];

#[derive(Debug)]
pub struct HlslEmitter;

/// Packed shader model (`62`) requested for the output.
fn shader_model(module: &Module, ctx: &EmitContext) -> Option<u32> {
    match ctx.version() {
        None => Some(module.shader_model.as_u32()),
        Some(text) => {
            let model = super::parse_dotted(text).map(|(major, minor)| major * 10 + minor)?;
            MODELS.contains(&model).then_some(model)
        }
    }
}

impl Emitter for HlslEmitter {
    fn name(&self) -> &'static str {
        "HLSL"
    }

    fn languages(&self) -> &'static [ShadingLanguage] {
        &[ShadingLanguage::Hlsl]
    }

    fn check(&self, module: &Module, ctx: &EmitContext, diags: &mut Diagnostics) {
        let Some(model) = shader_model(module, ctx) else {
            capability(
                diags,
                format!(
                    "invalid HLSL shader model '{}', expected 30 to 67",
                    ctx.version().unwrap_or_default()
                ),
            );
            return;
        };
        let stage = module.entry().map(|e| e.stage);
        if stage == Some(ShaderStage::Compute) && model < 50 {
            capability(diags, "compute shaders require HLSL shader model 5.0 or up");
        }
        if module.uses_16bit && model < 62 {
            capability(diags, "16-bit types require HLSL shader model 6.2 or up");
        }
        if module.uses_64bit && model < 50 {
            capability(diags, "double precision requires HLSL shader model 5.0 or up");
        }
        for (_, global) in module.resources() {
            let needs_sm5 = match &global.ty {
                Type::Buffer { kind, rw, .. } => *rw || *kind != BufferKind::Typed,
                Type::Texture(t) => t.rw,
                _ => false,
            };
            if needs_sm5 && model < 50 {
                capability(
                    diags,
                    format!(
                        "'{}' requires HLSL shader model 5.0 or up",
                        global.ty.display(&module.structs)
                    ),
                );
            }
        }
        if model <= 30 {
            check_legacy(module, diags);
        }
    }

    fn emit(&self, module: &Module, ctx: &EmitContext) -> Result<EmitOutput, Diagnostics> {
        let model = shader_model(module, ctx).unwrap_or(60);
        let mut namer = Namer::new(KEYWORDS, &[]);
        let names = Names::new(module, &mut namer);
        let cbuffer_members = module
            .globals
            .iter()
            .map(|(_, g)| match &g.kind {
                GlobalKind::ConstantBuffer { members, .. } => {
                    members.iter().map(|m| namer.name(&m.name)).collect()
                }
                _ => Vec::new(),
            })
            .collect();
        let combined = if model <= 30 {
            combined_samplers(module, &names, &mut namer)
        } else {
            HashMap::new()
        };
        let syntax = HlslSyntax {
            model,
            cbuffer_members,
            combined,
        };
        let source = syntax.write_module(module, &names, &namer);
        Ok(EmitOutput::text(source))
    }
}

/// Shader model 3.0 has no texel fetches, writable resources or compare sampling.
fn check_legacy(module: &Module, diags: &mut Diagnostics) {
    let mut problems = Vec::new();
    for (_, function) in module.functions.iter() {
        for_each_expr(&function.body, &mut |e| match &e.kind {
            ExprKind::ImageLoad { .. } => problems.push("texel fetches"),
            ExprKind::Sample {
                compare: Some(_), ..
            } => problems.push("comparison sampling"),
            ExprKind::Load(Place::Element { .. }) => problems.push("buffer loads"),
            _ => {}
        });
        for_each_statement(&function.body, &mut |s| {
            if let Statement::Barrier { .. } = s {
                problems.push("barriers");
            }
        });
    }
    problems.sort_unstable();
    problems.dedup();
    for problem in problems {
        capability(diags, format!("{} require HLSL shader model 4.0 or up", problem));
    }
}

/// Texture/sampler pairs sampled together, merged for shader model 3.0.
fn combined_samplers(
    module: &Module,
    names: &Names,
    namer: &mut Namer,
) -> HashMap<(Handle<GlobalVariable>, Handle<GlobalVariable>), String> {
    let mut pairs = Vec::new();
    for (_, function) in module.functions.iter() {
        for_each_expr(&function.body, &mut |e| {
            if let ExprKind::Sample {
                texture: ResourceRef::Global(t),
                sampler: ResourceRef::Global(s),
                ..
            } = &e.kind
            {
                if !pairs.contains(&(*t, *s)) {
                    pairs.push((*t, *s));
                }
            }
        });
    }
    pairs
        .into_iter()
        .map(|(t, s)| {
            let name = namer.name(&format!("{}_{}", names.global(t), names.global(s)));
            ((t, s), name)
        })
        .collect()
}

struct HlslSyntax {
    model: u32,
    cbuffer_members: Vec<Vec<String>>,
    combined: HashMap<(Handle<GlobalVariable>, Handle<GlobalVariable>), String>,
}

fn interpolation_keyword(interpolation: Interpolation) -> &'static str {
    match interpolation {
        Interpolation::Linear => "linear",
        Interpolation::NoInterpolation => "nointerpolation",
        Interpolation::Centroid => "centroid",
        Interpolation::NoPerspective => "noperspective",
        Interpolation::Sample => "sample",
    }
}

fn layout_keyword(layout: MatrixLayout) -> &'static str {
    match layout {
        MatrixLayout::RowMajor => "row_major",
        MatrixLayout::ColumnMajor => "column_major",
    }
}

fn spelled(semantic: &Semantic) -> String {
    if semantic.key().starts_with("SV_") {
        semantic.to_string()
    } else {
        format!("{}{}", semantic.name, semantic.index)
    }
}

impl HlslSyntax {
    /// Semantic spelling; shader model 3.0 predates the `SV_` names.
    /// User semantics always carry their index (`TEXCOORD0`).
    fn semantic(&self, semantic: &Semantic, stage: Option<ShaderStage>, output: bool) -> String {
        if self.model > 30 {
            return spelled(semantic);
        }
        let legacy = match semantic.key().as_str() {
            "SV_POSITION" if stage == Some(ShaderStage::Pixel) && !output => "VPOS",
            "SV_POSITION" => "POSITION",
            "SV_TARGET" => "COLOR",
            "SV_DEPTH" => "DEPTH",
            "SV_ISFRONTFACE" => "VFACE",
            _ => return spelled(semantic),
        };
        spelled(&Semantic {
            name: legacy.to_string(),
            index: semantic.index,
        })
    }

    fn register(&self, global: &GlobalVariable) -> String {
        let (Some(class), Some(binding)) = (global.register_class(), global.binding) else {
            return String::new();
        };
        if self.model >= 51 && binding.space != 0 {
            format!(
                " : register({}{}, space{})",
                class.prefix(),
                binding.register,
                binding.space
            )
        } else {
            format!(" : register({}{})", class.prefix(), binding.register)
        }
    }

    fn write_module(&self, module: &Module, names: &Names, namer: &Namer) -> String {
        let mut w = Writer::new();
        let Some(entry) = module.entry() else {
            return String::new();
        };
        let entry_function = &module.functions[entry.function];
        let init_scope = Scope {
            module,
            names,
            function: entry_function,
            handle: entry.function,
            locals: local_names(entry_function, namer),
        };

        for (h, decl) in module.structs.iter() {
            w.line(format!("struct {}", names.structs[h.index()]));
            w.open();
            for (i, member) in decl.members.iter().enumerate() {
                let mut line = String::new();
                if let Some(interpolation) = member.interpolation {
                    line.push_str(interpolation_keyword(interpolation));
                    line.push(' ');
                }
                if let (Some(layout), true) = (member.matrix_layout, member.ty.is_matrix()) {
                    line.push_str(layout_keyword(layout));
                    line.push(' ');
                }
                line.push_str(&self.declare(&init_scope, &member.ty, &names.members[h.index()][i]));
                if let Some(semantic) = &member.semantic {
                    line.push_str(" : ");
                    line.push_str(&self.semantic(semantic, None, true));
                }
                line.push(';');
                w.line(line);
            }
            w.close_with("};");
            w.blank();
        }

        for (h, global) in module.globals.iter() {
            let name = names.global(h);
            match &global.kind {
                GlobalKind::ConstantBuffer { members, .. } => {
                    w.line(format!("cbuffer {}{}", name, self.register(global)));
                    w.open();
                    for (i, member) in members.iter().enumerate() {
                        let layout = if member.ty.is_matrix() {
                            format!("{} ", layout_keyword(member.matrix_layout))
                        } else {
                            String::new()
                        };
                        let component = match member.offset % 16 / 4 {
                            0 => String::new(),
                            c => format!(".{}", ['x', 'y', 'z', 'w'][c as usize]),
                        };
                        w.line(format!(
                            "{}{} : packoffset(c{}{});",
                            layout,
                            self.declare(&init_scope, &member.ty, &self.cbuffer_members[h.index()][i]),
                            member.offset / 16,
                            component
                        ));
                    }
                    w.close_with("};");
                    w.blank();
                }
                GlobalKind::Resource => {
                    if self.model <= 30 {
                        continue;
                    }
                    w.line(format!(
                        "{}{};",
                        self.declare(&init_scope, &global.ty, name),
                        self.register(global)
                    ));
                }
                GlobalKind::Private => {
                    let mut line = String::from("static ");
                    if global.is_const {
                        line.push_str("const ");
                    }
                    line.push_str(&self.declare(&init_scope, &global.ty, name));
                    if let Some(init) = &global.init {
                        let printer = BodyWriter::new(self, Scope { locals: init_scope.locals.clone(), ..init_scope });
                        line.push_str(" = ");
                        line.push_str(&printer.expr(init));
                    }
                    line.push(';');
                    w.line(line);
                }
                GlobalKind::Workgroup => {
                    w.line(format!("groupshared {};", self.declare(&init_scope, &global.ty, name)));
                }
            }
        }
        let mut combined: Vec<_> = self.combined.iter().collect();
        combined.sort_by(|a, b| a.1.cmp(b.1));
        for ((texture, sampler), name) in combined {
            let dim = match &module.globals[*texture].ty {
                Type::Texture(t) => legacy_dim(t.dim),
                _ => "2D",
            };
            let register = module.globals[*sampler]
                .binding
                .map(|b| format!(" : register(s{})", b.register))
                .unwrap_or_default();
            w.line(format!("sampler{} {}{};", dim, name, register));
        }
        w.blank();

        for (h, function) in module.functions.iter() {
            let scope = Scope {
                module,
                names,
                function,
                handle: h,
                locals: local_names(function, namer),
            };
            let is_entry = h == entry.function;
            if is_entry && entry.stage == ShaderStage::Compute {
                let [x, y, z] = entry.workgroup_size;
                w.line(format!("[numthreads({}, {}, {})]", x, y, z));
            }
            w.line(self.header(&scope, function, is_entry.then_some(entry.stage)));
            BodyWriter::new(self, scope).write_body(&mut w);
            w.blank();
        }
        w.finish()
    }

    fn header(&self, s: &Scope, function: &Function, entry: Option<ShaderStage>) -> String {
        let params: Vec<String> = function
            .params
            .iter()
            .map(|p| {
                let local = &function.locals[p.local];
                let mut text = String::new();
                if let Some(interpolation) = local.interpolation {
                    text.push_str(interpolation_keyword(interpolation));
                    text.push(' ');
                }
                text.push_str(match p.direction {
                    ParamDirection::In => "",
                    ParamDirection::Out => "out ",
                    ParamDirection::InOut => "inout ",
                });
                text.push_str(&self.declare(s, &local.ty, s.local(p.local)));
                if let Some(semantic) = &local.semantic {
                    let output = p.direction != ParamDirection::In;
                    text.push_str(" : ");
                    text.push_str(&self.semantic(semantic, entry, output));
                }
                text
            })
            .collect();
        let mut header = format!(
            "{} {}({})",
            self.type_name(s, &function.result),
            s.names.functions[s.handle.index()],
            params.join(", ")
        );
        if let Some(semantic) = &function.result_semantic {
            header.push_str(" : ");
            header.push_str(&self.semantic(semantic, entry, true));
        }
        header
    }
}

fn legacy_dim(dim: TextureDim) -> &'static str {
    match dim {
        TextureDim::D1 => "1D",
        TextureDim::D2 => "2D",
        TextureDim::D3 => "3D",
        TextureDim::Cube => "CUBE",
    }
}

impl Syntax for HlslSyntax {
    fn type_name(&self, s: &Scope, ty: &Type) -> String {
        match ty {
            Type::Struct(h) => s.names.structs[h.index()].clone(),
            Type::Array(elem, n) => format!("{}[{}]", self.type_name(s, elem), n),
            Type::Buffer {
                kind: BufferKind::Structured,
                rw,
                elem,
            } => format!(
                "{}StructuredBuffer<{}>",
                if *rw { "RW" } else { "" },
                self.type_name(s, elem)
            ),
            other => other.hlsl_name_plain(),
        }
    }

    fn literal(&self, value: Literal, scalar: Scalar) -> String {
        match (value.cast(scalar), scalar.width) {
            (Literal::Bool(b), _) => b.to_string(),
            (Literal::Int(i), 2) => format!("int16_t({})", i),
            (Literal::Int(i), _) => int_digits(i),
            (Literal::Uint(u), 2) => format!("uint16_t({})", u),
            (Literal::Uint(u), _) => format!("{}u", u),
            (Literal::Float(f), _) if f.is_nan() => "(0.0f / 0.0f)".to_string(),
            (Literal::Float(f), _) if f.is_infinite() => {
                format!("({}1.0f / 0.0f)", if f < 0.0 { "-" } else { "" })
            }
            (Literal::Float(f), 2) => format!("{}h", float_digits(f)),
            (Literal::Float(f), 8) => format!("{}L", double_digits(f)),
            (Literal::Float(f), _) => format!("{}f", float_digits(f)),
        }
    }

    fn cbuffer_member(&self, _s: &Scope, buffer: Handle<GlobalVariable>, member: u32) -> String {
        self.cbuffer_members
            .get(buffer.index())
            .and_then(|m| m.get(member as usize))
            .cloned()
            .unwrap_or_else(|| "_invalid".to_string())
    }

    fn element(&self, s: &Scope, resource: ResourceRef, index: String) -> String {
        match s.resource_type(resource) {
            Type::Buffer {
                kind: BufferKind::ByteAddress,
                ..
            } => format!("{}.Load({} * 4)", s.resource(resource), index),
            _ => format!("{}[{}]", s.resource(resource), index),
        }
    }

    fn element_store(&self, s: &Scope, resource: ResourceRef, index: &str, value: &str) -> Option<String> {
        match s.resource_type(resource) {
            Type::Buffer {
                kind: BufferKind::ByteAddress,
                ..
            } => Some(format!("{}.Store({} * 4, {});", s.resource(resource), index, value)),
            _ => None,
        }
    }

    fn construct(&self, s: &Scope, ty: &Type, args: Vec<String>) -> String {
        match ty {
            Type::Struct(_) | Type::Array(..) => format!("{{ {} }}", args.join(", ")),
            _ => format!("{}({})", self.type_name(s, ty), args.join(", ")),
        }
    }

    fn splat(&self, s: &Scope, ty: &Type, value: String) -> String {
        format!("(({}){})", self.type_name(s, ty), value)
    }

    fn convert(&self, s: &Scope, ty: &Type, _from: &Type, value: String) -> String {
        if ty.is_matrix() {
            format!("(({})({}))", self.type_name(s, ty), value)
        } else {
            format!("{}({})", self.type_name(s, ty), value)
        }
    }

    fn bitcast(&self, _s: &Scope, ty: &Type, _from: &Type, value: String) -> String {
        let fun = match ty.scalar() {
            Some(Scalar {
                kind: ScalarKind::Float,
                width: 2,
            }) => "asfloat16",
            Some(Scalar {
                kind: ScalarKind::Sint,
                width: 2,
            }) => "asint16",
            Some(Scalar {
                kind: ScalarKind::Uint,
                width: 2,
            }) => "asuint16",
            Some(Scalar {
                kind: ScalarKind::Float,
                ..
            }) => "asfloat",
            Some(Scalar {
                kind: ScalarKind::Sint,
                ..
            }) => "asint",
            _ => "asuint",
        };
        format!("{}({})", fun, value)
    }

    fn intrinsic(&self, _s: &Scope, fun: Intrinsic, _args: &[Expr], printed: Vec<String>, _ty: &Type) -> String {
        format!("{}({})", fun.hlsl_name(), printed.join(", "))
    }

    fn matmul(&self, _s: &Scope, _left: &Expr, _right: &Expr, l: String, r: String) -> String {
        format!("mul({}, {})", l, r)
    }

    fn sample(&self, s: &Scope, sample: SampleText, _ty: &Type) -> String {
        if self.model <= 30 {
            return self.legacy_sample(s, sample);
        }
        let texture = s.resource(sample.texture);
        let sampler = s.resource(sample.sampler);
        let coord = sample.coord;
        let (method, mut args) = match (sample.compare, sample.level) {
            (Some(cmp), LevelText::Auto | LevelText::Bias(_) | LevelText::Grad(..)) => {
                ("SampleCmp", vec![sampler.to_string(), coord, cmp])
            }
            (Some(cmp), LevelText::Zero | LevelText::Lod(_)) => {
                ("SampleCmpLevelZero", vec![sampler.to_string(), coord, cmp])
            }
            (None, LevelText::Auto) => ("Sample", vec![sampler.to_string(), coord]),
            (None, LevelText::Bias(b)) => ("SampleBias", vec![sampler.to_string(), coord, b]),
            (None, LevelText::Lod(l)) => ("SampleLevel", vec![sampler.to_string(), coord, l]),
            (None, LevelText::Zero) => {
                ("SampleLevel", vec![sampler.to_string(), coord, "0.0f".to_string()])
            }
            (None, LevelText::Grad(dx, dy)) => {
                ("SampleGrad", vec![sampler.to_string(), coord, dx, dy])
            }
        };
        if let Some(offset) = sample.offset {
            args.push(offset);
        }
        format!("{}.{}({})", texture, method, args.join(", "))
    }

    fn image_load(&self, s: &Scope, image: ResourceRef, coord: String, lod: Option<String>, _ty: &Type) -> String {
        let name = s.resource(image);
        match (s.resource_type(image), lod) {
            (Type::Texture(t), Some(lod)) if !t.rw => {
                let n = t.full_coord_size() + 1;
                format!("{}.Load(int{}({}, {}))", name, n, coord, lod)
            }
            (Type::Texture(t), None) if !t.multisampled && !t.rw => {
                let n = t.full_coord_size() + 1;
                format!("{}.Load(int{}({}, 0))", name, n, coord)
            }
            (Type::Buffer { rw: false, .. }, _) => format!("{}.Load({})", name, coord),
            _ => format!("{}[{}]", name, coord),
        }
    }

    fn image_store(&self, s: &Scope, image: ResourceRef, coord: String, value: String, _ty: &Type) -> String {
        format!("{}[{}] = {};", s.resource(image), coord, value)
    }

    fn barrier(&self, scope: MemoryScope, sync: bool) -> String {
        let base = match scope {
            MemoryScope::Group => "GroupMemoryBarrier",
            MemoryScope::Device => "DeviceMemoryBarrier",
            MemoryScope::All => "AllMemoryBarrier",
        };
        format!("{}{}();", base, if sync { "WithGroupSync" } else { "" })
    }

    fn split_aggregate_stores(&self) -> bool {
        true
    }
}

impl HlslSyntax {
    fn legacy_sample(&self, s: &Scope, sample: SampleText) -> String {
        let name = match (sample.texture, sample.sampler) {
            (ResourceRef::Global(t), ResourceRef::Global(smp)) => self
                .combined
                .get(&(t, smp))
                .cloned()
                .unwrap_or_else(|| s.resource(sample.texture).to_string()),
            _ => s.resource(sample.texture).to_string(),
        };
        let dim = legacy_dim(sample.image.dim);
        let padded = |coord: &str, w: &str| match sample.image.dim.coord_size() {
            1 => format!("float4({}, 0.0f, 0.0f, {})", coord, w),
            2 => format!("float4({}, 0.0f, {})", coord, w),
            _ => format!("float4({}, {})", coord, w),
        };
        match sample.level {
            LevelText::Auto => format!("tex{}({}, {})", dim, name, sample.coord),
            LevelText::Bias(b) => format!("tex{}bias({}, {})", dim, name, padded(&sample.coord, &b)),
            LevelText::Lod(l) => format!("tex{}lod({}, {})", dim, name, padded(&sample.coord, &l)),
            LevelText::Zero => format!("tex{}lod({}, {})", dim, name, padded(&sample.coord, "0.0f")),
            LevelText::Grad(dx, dy) => {
                format!("tex{}grad({}, {}, {}, {})", dim, name, sample.coord, dx, dy)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{OptionsDesc, TargetDesc};
    use crate::emit::test_support::*;
    use crate::emit::{check_capabilities, emit};

    fn hlsl(source: &str, entry: &str, stage: ShaderStage, version: &str) -> Result<String, Diagnostics> {
        let module = module(source, entry, stage);
        let options = OptionsDesc::default();
        let target = TargetDesc::with_version(ShadingLanguage::Hlsl, version);
        emit(&module, &EmitContext::new(&options, &target)).map(|o| o.blob.to_string_lossy())
    }

    #[test]
    fn test_vertex_shader_round_trips_bindings() {
        let text = hlsl(VERTEX, "VS", ShaderStage::Vertex, "").unwrap();
        assert!(text.contains("cbuffer Transform : register(b0)"));
        assert!(text.contains("row_major float4x4 mvp : packoffset(c0);"));
        assert!(text.contains("float4 tint : packoffset(c4);"));
        assert!(text.contains("VsOut VS(float3 pos : POSITION0, float2 uv : TEXCOORD0)"));
        assert!(text.contains("mul("));
    }

    #[test]
    fn test_pixel_shader_keeps_sample_methods() {
        let text = hlsl(PIXEL, "PS", ShaderStage::Pixel, "50").unwrap();
        assert!(text.contains("Texture2D<float4> albedo : register(t0);"));
        assert!(text.contains("albedo.Sample(linearSampler, uv)"));
        assert!(text.contains("discard;"));
        assert!(text.contains(": SV_Target"));
    }

    #[test]
    fn test_shader_model_3_uses_combined_samplers() {
        let text = hlsl(PIXEL, "PS", ShaderStage::Pixel, "30").unwrap();
        assert!(text.contains("sampler2D albedo_linearSampler : register(s0);"));
        assert!(text.contains("tex2D(albedo_linearSampler, uv)"));
        assert!(text.contains(": COLOR"));
        assert!(!text.contains("Texture2D"));
    }

    #[test]
    fn test_compute_needs_shader_model_5() {
        let module = module(COMPUTE, "CS", ShaderStage::Compute);
        let options = OptionsDesc::default();
        let target = TargetDesc::with_version(ShadingLanguage::Hlsl, "40");
        let diags =
            check_capabilities(&HlslEmitter, &module, &EmitContext::new(&options, &target)).unwrap_err();
        assert!(diags.render().contains("compute shaders require HLSL shader model 5.0"));

        let text = hlsl(COMPUTE, "CS", ShaderStage::Compute, "50").unwrap();
        assert!(text.contains("[numthreads(64, 1, 1)]"));
        assert!(text.contains("RWStructuredBuffer<float> output : register(u0);"));
    }

    #[test]
    fn test_rejects_unknown_model() {
        let err = hlsl(PIXEL, "PS", ShaderStage::Pixel, "20").unwrap_err();
        assert!(err.render().contains("invalid HLSL shader model '20'"));
    }
}
