//! Turns a checked module into stage-ready IR.
//!
//! The builder specializes functions that take resources, keeps only what
//! the entry point reaches (callees before callers), rejects recursion and
//! stage-illegal operations, assigns resource bindings with the configured
//! shifts, packs constant buffers and flattens the entry signature into
//! varyings.

use super::layout::pack_cbuffer;
use super::visit::{for_each_expr, for_each_resource_ref_mut, for_each_statement, for_each_statement_mut};
use super::{
    Arena, Binding, BuiltIn, CallArg, EntryPoint, ExprKind, Function, GlobalKind, GlobalVariable,
    Handle, Interpolation, Module, ParamDirection, RegisterClass, ResourceRef, SampleLevel,
    Semantic, Statement, Type, Varying, VaryingSource,
};
use crate::desc::{OptionsDesc, ShaderStage};
use crate::diag::{Diagnostics, ErrorKind};
use crate::front::sema::Checked;
use std::collections::{HashMap, HashSet};

pub fn build(checked: Checked, options: &OptionsDesc) -> Result<Module, Diagnostics> {
    let Checked {
        mut module,
        entry,
        stage,
        ..
    } = checked;
    let mut diags = Diagnostics::new();

    specialize(&mut module, entry);
    let order = match call_order(&module, entry) {
        Ok(order) => order,
        Err(function) => {
            diags.error(
                ErrorKind::Semantic,
                module.functions[function].location.clone(),
                "recursive functions are not allowed",
            );
            return Err(diags);
        }
    };
    let entry = reorder(&mut module, &order);

    for (_, function) in module.functions.iter() {
        check_stage(&module, function, stage, &mut diags);
    }
    if diags.has_errors() {
        return Err(diags);
    }

    assign_bindings(&mut module, options, &mut diags);
    if diags.has_errors() {
        return Err(diags);
    }
    pack_constant_buffers(&mut module);

    let function = &module.functions[entry];
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    // Struct-typed values carry their semantics on the members
    let unnamed = Semantic::parse("");
    for (index, param) in function.params.iter().enumerate() {
        let local = &function.locals[param.local];
        let semantic = local.semantic.as_ref().unwrap_or(&unnamed);
        let mut leaves = Vec::new();
        flatten(&module, &local.ty, semantic, local.interpolation, local.name.clone(), Vec::new(), &mut leaves);
        for leaf in leaves {
            let source = |path| VaryingSource::Param { index, path };
            if param.direction != ParamDirection::Out {
                inputs.push(leaf.clone().into_varying(source));
            }
            if param.direction != ParamDirection::In {
                outputs.push(leaf.into_varying(source));
            }
        }
    }
    if function.result != Type::Void {
        let semantic = function.result_semantic.as_ref().unwrap_or(&unnamed);
        let mut leaves = Vec::new();
        flatten(&module, &function.result, semantic, None, "out".to_string(), Vec::new(), &mut leaves);
        outputs.extend(
            leaves
                .into_iter()
                .map(|leaf| leaf.into_varying(|path| VaryingSource::Result { path })),
        );
    }
    assign_locations(&mut inputs, stage, false);
    assign_locations(&mut outputs, stage, true);
    for varying in inputs.iter_mut() {
        varying.builtin = builtin(stage, false, &varying.semantic);
    }
    for varying in outputs.iter_mut() {
        varying.builtin = builtin(stage, true, &varying.semantic);
    }

    module.entry = Some(EntryPoint {
        name: function.name.clone(),
        stage,
        function: entry,
        inputs,
        outputs,
        workgroup_size: function.numthreads.unwrap_or([1, 1, 1]),
    });
    module.shader_model = options.shader_model;
    module.uses_16bit = uses_width(&module, |ty, structs| ty.uses_16bit(structs));
    module.uses_64bit = uses_width(&module, |ty, structs| ty.uses_64bit(structs));

    if let Err(message) = module.validate() {
        diags.error(ErrorKind::Internal, None, format!("invalid IR: {}", message));
        return Err(diags);
    }
    debug_log!(
        "ir: {} functions, {} globals, {} inputs, {} outputs",
        module.functions.len(),
        module.globals.len(),
        module.entry.as_ref().map_or(0, |e| e.inputs.len()),
        module.entry.as_ref().map_or(0, |e| e.outputs.len())
    );
    dump_ir!("build", module);
    Ok(module)
}

/// Clones every function called with resource arguments once per distinct
/// set of resources, so no reachable function takes resource parameters.
fn specialize(module: &mut Module, entry: Handle<Function>) {
    let mut copies: HashMap<(Handle<Function>, Vec<Handle<GlobalVariable>>), Handle<Function>> =
        HashMap::new();
    let mut queue = vec![entry];
    let mut done = HashSet::new();
    while let Some(handle) = queue.pop() {
        if !done.insert(handle) {
            continue;
        }
        let mut body = std::mem::take(&mut module.functions[handle].body);
        for_each_statement_mut(&mut body, &mut |statement| {
            let Statement::Call { function, args, .. } = statement else {
                return;
            };
            let resources: Vec<(usize, Handle<GlobalVariable>)> = args
                .iter()
                .enumerate()
                .filter_map(|(i, arg)| match arg {
                    CallArg::Resource(ResourceRef::Global(g)) => Some((i, *g)),
                    _ => None,
                })
                .collect();
            // A function calling itself is left for the recursion check
            if !resources.is_empty() && *function != handle {
                let key = (*function, resources.iter().map(|(_, g)| *g).collect::<Vec<_>>());
                let copy = match copies.get(&key) {
                    Some(copy) => *copy,
                    None => {
                        let copy = specialized_copy(module, *function, &resources);
                        copies.insert(key, copy);
                        copy
                    }
                };
                *function = copy;
                args.retain(|arg| !matches!(arg, CallArg::Resource(_)));
            }
            queue.push(*function);
        });
        module.functions[handle].body = body;
    }
}

fn specialized_copy(
    module: &mut Module,
    original: Handle<Function>,
    resources: &[(usize, Handle<GlobalVariable>)],
) -> Handle<Function> {
    let mut copy = module.functions[original].clone();
    let bound: HashMap<u32, Handle<GlobalVariable>> =
        resources.iter().map(|(i, g)| (*i as u32, *g)).collect();
    for_each_resource_ref_mut(&mut copy.body, &mut |r| {
        if let ResourceRef::Param(i) = r {
            if let Some(g) = bound.get(i) {
                *r = ResourceRef::Global(*g);
            }
        }
    });
    let mut index = 0;
    copy.params.retain(|_| {
        let keep = !bound.contains_key(&index);
        index += 1;
        keep
    });
    let suffix: Vec<&str> = resources
        .iter()
        .map(|(_, g)| module.globals[*g].name.as_str())
        .collect();
    copy.name = format!("{}_{}", copy.name, suffix.join("_"));
    debug_log!("specialized '{}'", copy.name);
    module.functions.append(copy)
}

/// Functions reachable from the entry, callees first. Fails with the first
/// function found on a call cycle.
fn call_order(module: &Module, entry: Handle<Function>) -> Result<Vec<Handle<Function>>, Handle<Function>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        module: &Module,
        handle: Handle<Function>,
        marks: &mut HashMap<Handle<Function>, Mark>,
        order: &mut Vec<Handle<Function>>,
    ) -> Result<(), Handle<Function>> {
        match marks.get(&handle) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(handle),
            None => {}
        }
        marks.insert(handle, Mark::Visiting);
        let mut callees = Vec::new();
        for_each_statement(&module.functions[handle].body, &mut |s| {
            if let Statement::Call { function, .. } = s {
                callees.push(*function);
            }
        });
        for callee in callees {
            visit(module, callee, marks, order)?;
        }
        marks.insert(handle, Mark::Done);
        order.push(handle);
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut order = Vec::new();
    visit(module, entry, &mut marks, &mut order)?;
    Ok(order)
}

/// Rebuilds the function arena in `order`, remapping call targets. Returns
/// the entry's new handle.
fn reorder(module: &mut Module, order: &[Handle<Function>]) -> Handle<Function> {
    let remap: HashMap<Handle<Function>, Handle<Function>> = order
        .iter()
        .enumerate()
        .map(|(i, h)| (*h, Handle::new(i)))
        .collect();
    let old = std::mem::take(&mut module.functions);
    for handle in order {
        let mut function = old[*handle].clone();
        for_each_statement_mut(&mut function.body, &mut |s| {
            if let Statement::Call { function: callee, .. } = s {
                if let Some(new) = remap.get(callee) {
                    *callee = *new;
                }
            }
        });
        module.functions.append(function);
    }
    Handle::new(order.len().saturating_sub(1))
}

fn check_stage(module: &Module, function: &Function, stage: ShaderStage, diags: &mut Diagnostics) {
    let location = function.location.clone();
    let mut fail = |message: &str| {
        if !diags
            .iter()
            .any(|d| d.message == message && d.location == location)
        {
            diags.error(ErrorKind::Semantic, location.clone(), message);
        }
    };
    let pixel = stage == ShaderStage::Pixel;
    let compute = stage == ShaderStage::Compute;
    for_each_statement(&function.body, &mut |s| match s {
        Statement::Discard if !pixel => fail("discard is only available in pixel shaders"),
        Statement::Barrier { sync: true, .. } if !compute => {
            fail("group synchronization is only available in compute shaders")
        }
        _ => {}
    });
    for_each_expr(&function.body, &mut |e| match &e.kind {
        ExprKind::Intrinsic { fun, .. } if fun.is_derivative() && !pixel => {
            fail("derivative intrinsics are only available in pixel shaders")
        }
        ExprKind::Sample {
            level: SampleLevel::Auto | SampleLevel::Bias(_),
            ..
        } if !pixel => fail("implicit level-of-detail sampling is only available in pixel shaders"),
        ExprKind::Load(place) => {
            if let super::Place::Global(h) = place.root() {
                if matches!(module.globals[*h].kind, GlobalKind::Workgroup) && !compute {
                    fail("groupshared variables are only available in compute shaders");
                }
            }
        }
        _ => {}
    });
}

/// Explicit registers are kept, the rest take the next free slot of their
/// class in space 0, then every binding moves by the class's shift. A shift
/// that leaves the register range is an error.
fn assign_bindings(module: &mut Module, options: &OptionsDesc, diags: &mut Diagnostics) {
    let mut used: HashSet<(RegisterClass, u32, u32)> = HashSet::new();
    for (_, global) in module.globals.iter() {
        if let Some((class, register)) = global.register {
            used.insert((class, register, global.space));
        }
    }
    let handles: Vec<_> = module.globals.handles().collect();
    for handle in handles {
        let global = &mut module.globals[handle];
        let Some(class) = global.register_class() else {
            continue;
        };
        let (register, space) = match global.register {
            Some((_, register)) => (register, global.space),
            None => {
                let mut next = 0;
                while used.contains(&(class, next, 0)) {
                    next += 1;
                }
                used.insert((class, next, 0));
                (next, 0)
            }
        };
        let shift = match class {
            RegisterClass::ShaderResource => options.shift_all_textures_bindings,
            RegisterClass::Sampler => options.shift_all_samplers_bindings,
            RegisterClass::ConstantBuffer => options.shift_all_cbuffers_bindings,
            RegisterClass::UnorderedAccess => options.shift_all_ua_buffers_bindings,
        };
        let Ok(register) = u32::try_from(i64::from(register) + i64::from(shift)) else {
            diags.error(
                ErrorKind::UnsupportedFeature,
                global.location.clone(),
                format!(
                    "binding of '{}' ({}{}) shifted by {} falls outside the register range",
                    global.name,
                    class.prefix(),
                    register,
                    shift
                ),
            );
            continue;
        };
        global.binding = Some(Binding { register, space });
        log::trace!(
            target: "shaderconductor",
            "binding '{}' -> {}{} space{}",
            global.name,
            class.prefix(),
            register,
            space
        );
    }
}

fn pack_constant_buffers(module: &mut Module) {
    let Module { globals, structs, .. } = module;
    for (_, global) in globals.iter_mut() {
        let GlobalKind::ConstantBuffer { members, size } = &mut global.kind else {
            continue;
        };
        let loose = std::mem::take(members)
            .into_iter()
            .map(|m| (m.name, m.ty, m.matrix_layout))
            .collect();
        let (packed, total) = pack_cbuffer(loose, structs);
        *members = packed;
        *size = total;
    }
}

#[derive(Debug, Clone)]
struct Leaf {
    name: String,
    ty: Type,
    semantic: Semantic,
    interpolation: Option<Interpolation>,
    path: Vec<u32>,
}

impl Leaf {
    fn into_varying(self, source: impl FnOnce(Vec<u32>) -> VaryingSource) -> Varying {
        Varying {
            source: source(self.path),
            name: self.name,
            ty: self.ty,
            semantic: self.semantic,
            builtin: None,
            location: 0,
            interpolation: self.interpolation,
        }
    }
}

/// Splits struct-typed interface values into one leaf per member.
fn flatten(
    module: &Module,
    ty: &Type,
    semantic: &Semantic,
    interpolation: Option<Interpolation>,
    name: String,
    path: Vec<u32>,
    leaves: &mut Vec<Leaf>,
) {
    if let Type::Struct(h) = ty {
        for (i, member) in module.structs[*h].members.iter().enumerate() {
            let mut member_path = path.clone();
            member_path.push(i as u32);
            flatten(
                module,
                &member.ty,
                member.semantic.as_ref().unwrap_or(semantic),
                member.interpolation.or(interpolation),
                format!("{}_{}", name, member.name),
                member_path,
                leaves,
            );
        }
        return;
    }
    leaves.push(Leaf {
        name,
        ty: ty.clone(),
        semantic: semantic.clone(),
        interpolation,
        path,
    });
}

/// Locations follow declaration order; pixel outputs use the render target
/// index of `SV_TargetN`.
fn assign_locations(varyings: &mut [Varying], stage: ShaderStage, is_output: bool) {
    let mut next = 0;
    for varying in varyings.iter_mut() {
        let key = varying.semantic.key();
        if builtin(stage, is_output, &varying.semantic).is_some() {
            continue;
        }
        if is_output && stage == ShaderStage::Pixel && key == "SV_TARGET" {
            varying.location = varying.semantic.index;
        } else {
            varying.location = next;
            next += 1;
        }
    }
}

fn builtin(stage: ShaderStage, is_output: bool, semantic: &Semantic) -> Option<BuiltIn> {
    Some(match semantic.key().as_str() {
        "SV_POSITION" if stage == ShaderStage::Pixel && !is_output => BuiltIn::FragCoord,
        "SV_POSITION" => BuiltIn::Position,
        "SV_VERTEXID" => BuiltIn::VertexId,
        "SV_INSTANCEID" => BuiltIn::InstanceId,
        "SV_ISFRONTFACE" => BuiltIn::FrontFacing,
        "SV_DEPTH" => BuiltIn::FragDepth,
        "SV_SAMPLEINDEX" => BuiltIn::SampleIndex,
        "SV_PRIMITIVEID" => BuiltIn::PrimitiveId,
        "SV_DISPATCHTHREADID" => BuiltIn::GlobalInvocationId,
        "SV_GROUPTHREADID" => BuiltIn::LocalInvocationId,
        "SV_GROUPID" => BuiltIn::WorkgroupId,
        "SV_GROUPINDEX" => BuiltIn::LocalInvocationIndex,
        _ => return None,
    })
}

fn uses_width(module: &Module, test: impl Fn(&Type, &Arena<super::StructDecl>) -> bool) -> bool {
    let structs = &module.structs;
    module.globals.iter().any(|(_, g)| {
        test(&g.ty, structs)
            || matches!(&g.kind, GlobalKind::ConstantBuffer { members, .. } if members.iter().any(|m| test(&m.ty, structs)))
    }) || module.functions.iter().any(|(_, f)| {
        test(&f.result, structs) || f.locals.iter().any(|(_, l)| test(&l.ty, structs))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::lexer::tokenize;
    use crate::front::parser::parse;
    use crate::front::sema::{SemaOptions, analyze};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn build_with(source: &str, entry: &str, stage: ShaderStage, options: &OptionsDesc) -> Result<Module, Diagnostics> {
        let tokens = tokenize(source, Arc::from("test.hlsl")).unwrap();
        let unit = parse(tokens).unwrap();
        let checked = analyze(&unit, &SemaOptions::new(entry, stage, options), "test.hlsl")?;
        build(checked, options)
    }

    const VERTEX: &str = "
        cbuffer Transforms : register(b1) { float4x4 wvp; float3 tint; float fade; };
        struct VsOut { float4 pos : SV_Position; float2 uv : TEXCOORD0; float3 color : COLOR; };
        VsOut VS(float3 pos : POSITION, float2 uv : TEXCOORD0) {
            VsOut o;
            o.pos = mul(float4(pos, 1), wvp);
            o.uv = uv;
            o.color = tint * fade;
            return o;
        }";

    #[test]
    fn test_vertex_signature_is_flattened() {
        let module = build_with(VERTEX, "VS", ShaderStage::Vertex, &OptionsDesc::default()).unwrap();
        let entry = module.entry().unwrap();
        let inputs: Vec<_> = entry.inputs.iter().map(|v| (v.name.as_str(), v.location)).collect();
        assert_eq!(inputs, [("pos", 0), ("uv", 1)]);
        let outputs: Vec<_> = entry
            .outputs
            .iter()
            .map(|v| (v.name.as_str(), v.builtin, v.source.clone()))
            .collect();
        assert_eq!(
            outputs,
            [
                ("out_pos", Some(BuiltIn::Position), VaryingSource::Result { path: vec![0] }),
                ("out_uv", None, VaryingSource::Result { path: vec![1] }),
                ("out_color", None, VaryingSource::Result { path: vec![2] }),
            ]
        );
        assert_eq!(entry.outputs[1].location, 0);
        assert_eq!(entry.outputs[2].location, 1);
    }

    #[test]
    fn test_cbuffer_packing_and_shift() {
        let options = OptionsDesc {
            shift_all_cbuffers_bindings: 10,
            ..OptionsDesc::default()
        };
        let module = build_with(VERTEX, "VS", ShaderStage::Vertex, &options).unwrap();
        let (_, cbuffer) = module.resources().next().unwrap();
        assert_eq!(cbuffer.binding, Some(Binding { register: 11, space: 0 }));
        let GlobalKind::ConstantBuffer { members, size } = &cbuffer.kind else {
            panic!("expected a constant buffer");
        };
        let offsets: Vec<_> = members.iter().map(|m| m.offset).collect();
        // float3 and float share the register after the matrix
        assert_eq!(offsets, [0, 64, 76]);
        assert_eq!(*size, 80);
    }

    #[test]
    fn test_implicit_registers_skip_explicit_ones() {
        let source = "
            Texture2D a : register(t0);
            Texture2D b;
            SamplerState s;
            float4 PS(float2 uv : TEXCOORD0) : SV_Target { return a.Sample(s, uv) + b.Sample(s, uv); }";
        let module = build_with(source, "PS", ShaderStage::Pixel, &OptionsDesc::default()).unwrap();
        let bindings: Vec<_> = module
            .resources()
            .map(|(_, g)| (g.name.as_str(), g.binding.map(|b| b.register)))
            .collect();
        assert_eq!(bindings, [("a", Some(0)), ("b", Some(1)), ("s", Some(0))]);
    }

    #[test]
    fn test_shift_out_of_register_range() {
        let source = "
            Texture2D a : register(t0);
            Texture2D b : register(t1);
            SamplerState s;
            float4 PS(float2 uv : TEXCOORD0) : SV_Target { return a.Sample(s, uv) + b.Sample(s, uv); }";
        let below = OptionsDesc {
            shift_all_textures_bindings: -1,
            ..OptionsDesc::default()
        };
        let diags = build_with(source, "PS", ShaderStage::Pixel, &below).unwrap_err();
        let text = diags.render();
        assert!(text.contains("binding of 'a' (t0) shifted by -1"), "{}", text);
        assert!(!text.contains("'b'"), "{}", text);

        let high = source.replace("register(t1)", "register(t4000000000)");
        let above = OptionsDesc {
            shift_all_textures_bindings: 1_000_000_000,
            ..OptionsDesc::default()
        };
        let diags = build_with(&high, "PS", ShaderStage::Pixel, &above).unwrap_err();
        assert!(diags.render().contains("binding of 'b' (t4000000000)"));
    }

    #[test]
    fn test_negative_shift_inside_range() {
        let source = "
            Texture2D a : register(t2);
            Texture2D b : register(t3);
            SamplerState s;
            float4 PS(float2 uv : TEXCOORD0) : SV_Target { return a.Sample(s, uv) + b.Sample(s, uv); }";
        let options = OptionsDesc {
            shift_all_textures_bindings: -2,
            ..OptionsDesc::default()
        };
        let module = build_with(source, "PS", ShaderStage::Pixel, &options).unwrap();
        let bindings: Vec<_> = module
            .resources()
            .map(|(_, g)| (g.name.as_str(), g.binding.map(|b| b.register)))
            .collect();
        assert_eq!(bindings, [("a", Some(0)), ("b", Some(1)), ("s", Some(0))]);
    }

    #[test]
    fn test_recursion_is_rejected() {
        let source = "
            float f(float x) { return x > 0 ? f(x - 1) : 0; }
            float4 PS() : SV_Target { return f(3); }";
        let diags = build_with(source, "PS", ShaderStage::Pixel, &OptionsDesc::default()).unwrap_err();
        assert!(diags.render().contains("recursive functions are not allowed"));
    }

    #[test]
    fn test_resource_parameters_are_specialized() {
        let source = "
            Texture2D tex; SamplerState samp;
            float4 unused() { return 0; }
            float4 fetch(Texture2D t, SamplerState s, float2 uv) { return t.Sample(s, uv); }
            float4 PS(float2 uv : TEXCOORD0) : SV_Target { return fetch(tex, samp, uv); }";
        let module = build_with(source, "PS", ShaderStage::Pixel, &OptionsDesc::default()).unwrap();
        let names: Vec<_> = module.functions.iter().map(|(_, f)| f.name.as_str()).collect();
        assert_eq!(names, ["fetch_tex_samp", "PS"]);
        let (_, fetch) = module.functions.iter().next().unwrap();
        assert_eq!(fetch.params.len(), 1);
    }

    #[test]
    fn test_discard_outside_pixel_stage() {
        let source = "float4 VS(float4 p : POSITION) : SV_Position { if (p.x < 0) discard; return p; }";
        let diags = build_with(source, "VS", ShaderStage::Vertex, &OptionsDesc::default()).unwrap_err();
        assert!(diags.render().contains("discard is only available in pixel shaders"));
    }
}
