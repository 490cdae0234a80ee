//! DXIL emission.
//!
//! The output is a DXBC container with the input and output signatures,
//! the optional debug name and embedded source, a hash part and the `DXIL`
//! program. The program uses the structured bytecode of
//! [`crate::dxil_ops`]: numeric operations work on whole vectors and
//! matrices, and as with SPIR-V the HLSL entry function is kept as
//! `src.<entry>` behind a generated `<entry>` wrapper that moves signature
//! elements in and out of it.

use super::{EmitContext, EmitOutput, Emitter, capability};
use crate::container::{
    ContainerBuilder, FOURCC_DEBUG_INFO, FOURCC_DEBUG_NAME, FOURCC_HASH, FOURCC_INPUT_SIGNATURE,
    FOURCC_OUTPUT_SIGNATURE, FOURCC_PROGRAM, SignatureElement, digest, write_signature,
};
use crate::desc::{ShaderModel, ShaderStage, ShadingLanguage};
use crate::diag::{Diagnostics, ErrorKind};
use crate::dxil_ops::{
    AddressSpace, DxilOp, Instruction, Predicate, ProgramHeader, barrier, encode_string,
    intrinsic_code, program_kind,
};
use crate::ir::layout::{LayoutRules, struct_layout};
use crate::ir::{
    BinaryOp, BufferKind, BuiltIn, CallArg, EntryPoint, Expr, ExprKind, Function, GlobalKind,
    GlobalVariable, Handle, Literal, MatrixLayout, MemoryScope, Module, ParamDirection, Place,
    RegisterClass, ResourceRef, SampleLevel, Scalar, ScalarKind, Statement, TextureDim, Type,
    UnaryOp, Varying, VaryingSource,
};
use std::collections::{HashMap, HashSet};

type Result<T> = std::result::Result<T, Diagnostics>;

fn internal(message: impl std::fmt::Display) -> Diagnostics {
    Diagnostics::single(
        ErrorKind::Internal,
        None,
        format!("DXIL generation failed: {}", message),
    )
}

#[derive(Debug)]
pub struct DxilEmitter;

impl Emitter for DxilEmitter {
    fn name(&self) -> &'static str {
        "DXIL"
    }

    fn languages(&self) -> &'static [ShadingLanguage] {
        &[ShadingLanguage::Dxil]
    }

    fn check(&self, module: &Module, _ctx: &EmitContext, diags: &mut Diagnostics) {
        if module.shader_model < ShaderModel::SM_6_0 {
            capability(
                diags,
                format!(
                    "DXIL requires shader model 6.0 or up, got {}",
                    module.shader_model
                ),
            );
        }
    }

    fn emit(&self, module: &Module, ctx: &EmitContext) -> Result<EmitOutput> {
        let entry = module
            .entry()
            .ok_or_else(|| internal("module has no entry point"))?;
        let debug_info = ctx.options.enable_debug_info;
        let mut writer = DxilWriter::new(module, debug_info);
        let code = writer.write(entry)?;

        let mut program = Vec::with_capacity(24 + code.len() * 4);
        ProgramHeader {
            stage: entry.stage,
            major: module.shader_model.major,
            minor: module.shader_model.minor,
            code_words: code.len() as u32,
        }
        .write(&mut program);
        program.extend(code.iter().flat_map(|w| w.to_le_bytes()));

        let mut builder = ContainerBuilder::new();
        builder
            .add_part(FOURCC_INPUT_SIGNATURE, write_signature(&signature(&entry.inputs, true)))
            .add_part(FOURCC_OUTPUT_SIGNATURE, write_signature(&signature(&entry.outputs, false)));
        if debug_info {
            builder.add_part(FOURCC_DEBUG_NAME, debug_name_part(&program));
            if let Some(source) = &module.debug_source {
                builder.add_part(FOURCC_DEBUG_INFO, debug_info_part(&module.source_name, source));
            }
        }
        builder.add_part(FOURCC_HASH, hash_part(&program, debug_info));
        builder.add_part(FOURCC_PROGRAM, program);
        Ok(EmitOutput::binary(builder.finish()))
    }
}

// Container parts

/// Compute-stage system values are read with dedicated ops, not through
/// the signature.
pub(crate) fn in_signature(varying: &Varying) -> bool {
    !matches!(
        varying.builtin,
        Some(
            BuiltIn::GlobalInvocationId
                | BuiltIn::LocalInvocationId
                | BuiltIn::WorkgroupId
                | BuiltIn::LocalInvocationIndex
        )
    )
}

/// `D3D_NAME` of a signature element.
pub(crate) fn system_value(varying: &Varying) -> u32 {
    match varying.builtin {
        Some(BuiltIn::Position | BuiltIn::FragCoord) => 1,
        Some(BuiltIn::VertexId) => 6,
        Some(BuiltIn::PrimitiveId) => 7,
        Some(BuiltIn::InstanceId) => 8,
        Some(BuiltIn::FrontFacing) => 9,
        Some(BuiltIn::SampleIndex) => 10,
        Some(BuiltIn::FragDepth) => 65,
        None if varying.semantic.key() == "SV_TARGET" => 64,
        _ => 0,
    }
}

/// Register component type, with 16 and 64-bit kinds after the 32-bit ones.
pub(crate) fn component_type(ty: &Type) -> u32 {
    let Some(scalar) = ty.scalar() else {
        return 0;
    };
    match (scalar.kind, scalar.width) {
        (ScalarKind::Bool, _) => 1,
        (ScalarKind::Uint, 2) => 4,
        (ScalarKind::Sint, 2) => 5,
        (ScalarKind::Float, 2) => 6,
        (ScalarKind::Uint, 8) => 7,
        (ScalarKind::Sint, 8) => 8,
        (ScalarKind::Float, 8) => 9,
        (ScalarKind::Uint, _) => 1,
        (ScalarKind::Sint, _) => 2,
        (ScalarKind::Float, _) => 3,
    }
}

pub(crate) fn component_mask(ty: &Type) -> u8 {
    let count = match *ty {
        Type::Matrix { cols, .. } => cols,
        _ => ty.vector_size().unwrap_or(4),
    };
    ((1u32 << count.min(4)) - 1) as u8
}

fn signature(varyings: &[Varying], is_input: bool) -> Vec<SignatureElement> {
    varyings
        .iter()
        .filter(|v| in_signature(v))
        .enumerate()
        .map(|(register, varying)| {
            let mask = component_mask(&varying.ty);
            SignatureElement {
                stream: 0,
                semantic_name: varying.semantic.name.clone(),
                semantic_index: varying.semantic.index,
                system_value: system_value(varying),
                component_type: component_type(&varying.ty),
                register: register as u32,
                mask,
                rw_mask: if is_input { mask } else { 0 },
                min_precision: 0,
            }
        })
        .collect()
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// `ILDN`: flags, name length, then a PDB name derived from the program hash.
fn debug_name_part(program: &[u8]) -> Vec<u8> {
    let id = uuid::Builder::from_sha1_bytes(digest(program)).into_uuid();
    let name = format!("{}.pdb", id.simple());
    let mut out = Vec::with_capacity(name.len() + 8);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    pad4(&mut out);
    out
}

/// `ILDB`: the main file name and the preprocessed source, each length-prefixed.
fn debug_info_part(file_name: &str, source: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(file_name.len() + source.len() + 8);
    for text in [file_name, source] {
        out.extend_from_slice(&(text.len() as u32).to_le_bytes());
        out.extend_from_slice(text.as_bytes());
    }
    pad4(&mut out);
    out
}

fn hash_part(program: &[u8], debug_info: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(20);
    out.extend_from_slice(&(debug_info as u32).to_le_bytes());
    out.extend_from_slice(&digest(program));
    out
}

fn register_class_code(class: RegisterClass) -> u32 {
    match class {
        RegisterClass::ShaderResource => 0,
        RegisterClass::Sampler => 1,
        RegisterClass::ConstantBuffer => 2,
        RegisterClass::UnorderedAccess => 3,
    }
}

fn texture_dim_code(dim: TextureDim) -> u32 {
    match dim {
        TextureDim::D1 => 1,
        TextureDim::D2 => 2,
        TextureDim::D3 => 3,
        TextureDim::Cube => 4,
    }
}

fn buffer_kind_code(kind: BufferKind) -> u32 {
    match kind {
        BufferKind::Typed => 0,
        BufferKind::Structured => 1,
        BufferKind::ByteAddress => 2,
    }
}

fn comparison(op: BinaryOp, kind: ScalarKind) -> Predicate {
    let unsigned = kind == ScalarKind::Uint;
    match op {
        BinaryOp::Ne => Predicate::Ne,
        BinaryOp::Lt if unsigned => Predicate::ULt,
        BinaryOp::Lt => Predicate::SLt,
        BinaryOp::Le if unsigned => Predicate::ULe,
        BinaryOp::Le => Predicate::SLe,
        BinaryOp::Gt if unsigned => Predicate::UGt,
        BinaryOp::Gt => Predicate::SGt,
        BinaryOp::Ge if unsigned => Predicate::UGe,
        BinaryOp::Ge => Predicate::SGe,
        _ => Predicate::Eq,
    }
}

/// Op and result type of the compute system values.
fn compute_builtin(builtin: BuiltIn) -> Option<(DxilOp, Type)> {
    let uint3 = Type::Vector(Scalar::U32, 3);
    Some(match builtin {
        BuiltIn::GlobalInvocationId => (DxilOp::ThreadId, uint3),
        BuiltIn::WorkgroupId => (DxilOp::GroupId, uint3),
        BuiltIn::LocalInvocationId => (DxilOp::ThreadIdInGroup, uint3),
        BuiltIn::LocalInvocationIndex => (DxilOp::FlattenedThreadIdInGroup, Type::UINT),
        _ => return None,
    })
}

struct FunctionState<'a> {
    function: &'a Function,
    /// Pointer for every local, indexed by handle; `0` for resources
    locals: Vec<u32>,
    terminated: bool,
}

impl<'a> FunctionState<'a> {
    fn new(function: &'a Function) -> Self {
        FunctionState {
            function,
            locals: Vec::with_capacity(function.locals.len()),
            terminated: false,
        }
    }
}

struct DxilWriter<'a> {
    module: &'a Module,
    debug_info: bool,
    next_id: u32,
    /// Names, bindings and layout annotations
    annotations: Vec<u32>,
    /// Types, constants and global variables
    declarations: Vec<u32>,
    code: Vec<u32>,
    types: HashMap<Type, u32>,
    pointers: HashMap<(AddressSpace, u32), u32>,
    constants: HashMap<(u32, u64), u32>,
    composites: HashMap<(u32, Vec<u32>), u32>,
    laid_out: HashSet<Type>,
    globals: Vec<u32>,
    functions: Vec<u32>,
}

fn push(out: &mut Vec<u32>, inst: Instruction) -> Result<()> {
    inst.encode(out).map_err(internal)
}

impl<'a> DxilWriter<'a> {
    fn new(module: &'a Module, debug_info: bool) -> Self {
        DxilWriter {
            module,
            debug_info,
            next_id: 1,
            annotations: Vec::new(),
            declarations: Vec::new(),
            code: Vec::new(),
            types: HashMap::new(),
            pointers: HashMap::new(),
            constants: HashMap::new(),
            composites: HashMap::new(),
            laid_out: HashSet::new(),
            globals: Vec::new(),
            functions: Vec::new(),
        }
    }

    fn id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn write(&mut self, entry: &EntryPoint) -> Result<Vec<u32>> {
        let module = self.module;
        let deferred = self.declare_globals()?;
        self.functions = (0..module.functions.len()).map(|_| self.id()).collect();
        for (h, function) in module.functions.iter() {
            self.write_function(h, function, h == entry.function)?;
        }
        let wrapper = self.write_wrapper(entry, &deferred)?;

        let mut words = Vec::new();
        let mut operands = vec![program_kind(entry.stage), wrapper];
        encode_string(&entry.name, &mut operands);
        push(&mut words, Instruction::new(DxilOp::EntryPoint, operands))?;
        if entry.stage == ShaderStage::Compute {
            let [x, y, z] = entry.workgroup_size;
            push(&mut words, Instruction::new(DxilOp::NumThreads, vec![wrapper, x, y, z]))?;
        }
        words.append(&mut self.annotations);
        words.append(&mut self.declarations);
        words.append(&mut self.code);
        debug_log!("DXIL program: {} words, {} ids", words.len(), self.next_id);
        Ok(words)
    }

    // Module-level instructions

    fn annotate(&mut self, op: DxilOp, operands: Vec<u32>) -> Result<()> {
        push(&mut self.annotations, Instruction::new(op, operands))
    }

    fn name(&mut self, target: u32, name: &str) -> Result<()> {
        let mut operands = vec![target];
        encode_string(name, &mut operands);
        self.annotate(DxilOp::Name, operands)
    }

    fn declare(&mut self, op: DxilOp, ty: u32, operands: Vec<u32>) -> Result<u32> {
        let id = self.id();
        push(
            &mut self.declarations,
            Instruction::with_result(op, ty, id, operands),
        )?;
        Ok(id)
    }

    fn scalar_id(&mut self, scalar: Scalar) -> Result<u32> {
        let bits = scalar.width as u32 * 8;
        match scalar.kind {
            ScalarKind::Bool => self.declare(DxilOp::TypeBool, 0, vec![]),
            ScalarKind::Sint => self.declare(DxilOp::TypeInt, 0, vec![bits, 1]),
            ScalarKind::Uint => self.declare(DxilOp::TypeInt, 0, vec![bits, 0]),
            ScalarKind::Float => self.declare(DxilOp::TypeFloat, 0, vec![bits]),
        }
    }

    fn type_id(&mut self, ty: &Type) -> Result<u32> {
        if let Some(&id) = self.types.get(ty) {
            return Ok(id);
        }
        let module = self.module;
        let id = match ty {
            Type::Void => self.declare(DxilOp::TypeVoid, 0, vec![])?,
            Type::Scalar(s) => self.scalar_id(*s)?,
            Type::Vector(s, n) => {
                let component = self.type_id(&Type::Scalar(*s))?;
                self.declare(DxilOp::TypeVector, 0, vec![component, *n as u32])?
            }
            Type::Matrix { scalar, rows, cols } => {
                let component = self.type_id(&Type::Scalar(*scalar))?;
                self.declare(
                    DxilOp::TypeMatrix,
                    0,
                    vec![component, *rows as u32, *cols as u32],
                )?
            }
            Type::Array(elem, n) => {
                let elem = self.type_id(elem)?;
                self.declare(DxilOp::TypeArray, 0, vec![elem, *n])?
            }
            Type::Struct(h) => {
                let decl = &module.structs[*h];
                let mut members = Vec::with_capacity(decl.members.len());
                for member in &decl.members {
                    members.push(self.type_id(&member.ty)?);
                }
                let id = self.declare(DxilOp::TypeStruct, 0, members)?;
                self.name(id, &decl.name)?;
                id
            }
            Type::Texture(t) => {
                let sampled = self.type_id(&Type::Scalar(t.sampled))?;
                self.declare(
                    DxilOp::TypeTexture,
                    0,
                    vec![
                        sampled,
                        texture_dim_code(t.dim),
                        t.arrayed as u32,
                        t.multisampled as u32,
                        t.rw as u32,
                        t.components as u32,
                    ],
                )?
            }
            Type::Sampler { comparison } => {
                self.declare(DxilOp::TypeSampler, 0, vec![*comparison as u32])?
            }
            Type::Buffer { kind, rw, elem } => {
                let elem = match kind {
                    BufferKind::ByteAddress => self.type_id(&Type::UINT)?,
                    _ => self.type_id(elem)?,
                };
                self.declare(
                    DxilOp::TypeBuffer,
                    0,
                    vec![buffer_kind_code(*kind), *rw as u32, elem],
                )?
            }
        };
        self.types.insert(ty.clone(), id);
        Ok(id)
    }

    fn pointer(&mut self, space: AddressSpace, pointee: u32) -> Result<u32> {
        if let Some(&id) = self.pointers.get(&(space, pointee)) {
            return Ok(id);
        }
        let id = self.declare(DxilOp::TypePointer, 0, vec![space as u32, pointee])?;
        self.pointers.insert((space, pointee), id);
        Ok(id)
    }

    /// Member offsets of the structs inside a buffer, annotated once per type.
    fn lay_out(&mut self, ty: &Type, rules: LayoutRules) -> Result<()> {
        let module = self.module;
        match ty {
            Type::Array(elem, _) => self.lay_out(elem, rules),
            Type::Struct(h) => {
                if !self.laid_out.insert(ty.clone()) {
                    return Ok(());
                }
                let decl = &module.structs[*h];
                let (offsets, _, _) = struct_layout(decl, &module.structs, rules, module.matrix_layout);
                let id = self.type_id(ty)?;
                for (i, (member, offset)) in decl.members.iter().zip(offsets).enumerate() {
                    self.annotate(DxilOp::MemberOffset, vec![id, i as u32, offset])?;
                    if member.ty.is_matrix() {
                        let layout = member.matrix_layout.unwrap_or(module.matrix_layout);
                        self.annotate(
                            DxilOp::MatrixOrientation,
                            vec![id, i as u32, (layout == MatrixLayout::RowMajor) as u32],
                        )?;
                    }
                    self.lay_out(&member.ty, rules)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // Constants

    fn literal(&mut self, value: Literal, scalar: Scalar) -> Result<u32> {
        let ty = self.type_id(&Type::Scalar(scalar))?;
        let bits = value.bits(scalar);
        if let Some(&id) = self.constants.get(&(ty, bits)) {
            return Ok(id);
        }
        let mut words = vec![bits as u32];
        if scalar.width == 8 {
            words.push((bits >> 32) as u32);
        }
        let id = self.declare(DxilOp::Constant, ty, words)?;
        self.constants.insert((ty, bits), id);
        Ok(id)
    }

    fn const_u32(&mut self, value: u32) -> Result<u32> {
        self.literal(Literal::Uint(value as u64), Scalar::U32)
    }

    fn composite_const(&mut self, ty: &Type, parts: Vec<u32>) -> Result<u32> {
        let ty = self.type_id(ty)?;
        if let Some(&id) = self.composites.get(&(ty, parts.clone())) {
            return Ok(id);
        }
        let id = self.declare(DxilOp::ConstantComposite, ty, parts.clone())?;
        self.composites.insert((ty, parts), id);
        Ok(id)
    }

    /// `value` converted to `ty` and broadcast to every component.
    fn splat_const(&mut self, value: f64, ty: &Type) -> Result<u32> {
        let scalar = ty
            .scalar()
            .ok_or_else(|| internal("constant of non-numeric type"))?;
        let component = self.literal(Literal::Float(value), scalar)?;
        match *ty {
            Type::Vector(_, n) => self.composite_const(ty, vec![component; n as usize]),
            Type::Matrix { scalar, rows, cols } => {
                let row = self.splat_const(value, &Type::Vector(scalar, cols))?;
                self.composite_const(ty, vec![row; rows as usize])
            }
            _ => Ok(component),
        }
    }

    /// Constant id for literal trees, used for global initializers.
    fn constant(&mut self, expr: &Expr) -> Result<Option<u32>> {
        match &expr.kind {
            ExprKind::Literal(value) => match expr.ty.scalar() {
                Some(scalar) => self.literal(*value, scalar).map(Some),
                None => Ok(None),
            },
            ExprKind::Construct(parts) if expr.is_constant() => {
                let mut ids = Vec::with_capacity(parts.len());
                for part in parts {
                    match self.constant(part)? {
                        Some(id) => ids.push(id),
                        None => return Ok(None),
                    }
                }
                self.composite_const(&expr.ty, ids).map(Some)
            }
            ExprKind::Splat(inner) => match inner.as_literal() {
                Some(value) => self.splat_const(value.as_f64(), &expr.ty).map(Some),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    // Globals

    /// Declares every global; returns the `static` variables whose
    /// initializers must run in the wrapper.
    fn declare_globals(&mut self) -> Result<Vec<Handle<GlobalVariable>>> {
        let module = self.module;
        let mut deferred = Vec::new();
        for (h, global) in module.globals.iter() {
            let id = match &global.kind {
                GlobalKind::Private | GlobalKind::Workgroup => {
                    let space = if global.kind == GlobalKind::Workgroup {
                        AddressSpace::GroupShared
                    } else {
                        AddressSpace::Private
                    };
                    let ty = self.type_id(&global.ty)?;
                    let ptr = self.pointer(space, ty)?;
                    let init = match &global.init {
                        Some(init) if space == AddressSpace::Private => {
                            match self.constant(init)? {
                                Some(id) => id,
                                None => {
                                    deferred.push(h);
                                    0
                                }
                            }
                        }
                        _ => 0,
                    };
                    self.declare(DxilOp::GlobalVariable, ptr, vec![space as u32, init])?
                }
                GlobalKind::Resource => {
                    if let Type::Buffer {
                        kind: BufferKind::Structured,
                        elem,
                        ..
                    } = &global.ty
                    {
                        self.lay_out(elem, LayoutRules::Std430)?;
                    }
                    let ty = self.type_id(&global.ty)?;
                    let ptr = self.pointer(AddressSpace::Resource, ty)?;
                    self.declare(
                        DxilOp::GlobalVariable,
                        ptr,
                        vec![AddressSpace::Resource as u32, 0],
                    )?
                }
                GlobalKind::ConstantBuffer { members, .. } => {
                    let mut ids = Vec::with_capacity(members.len());
                    for member in members {
                        self.lay_out(&member.ty, LayoutRules::HlslCBuffer)?;
                        ids.push(self.type_id(&member.ty)?);
                    }
                    let block = self.declare(DxilOp::TypeStruct, 0, ids)?;
                    self.name(block, &format!("type.{}", global.name))?;
                    for (i, member) in members.iter().enumerate() {
                        self.annotate(DxilOp::MemberOffset, vec![block, i as u32, member.offset])?;
                        if member.ty.is_matrix() {
                            self.annotate(
                                DxilOp::MatrixOrientation,
                                vec![
                                    block,
                                    i as u32,
                                    (member.matrix_layout == MatrixLayout::RowMajor) as u32,
                                ],
                            )?;
                        }
                    }
                    let ptr = self.pointer(AddressSpace::ConstantBuffer, block)?;
                    self.declare(
                        DxilOp::GlobalVariable,
                        ptr,
                        vec![AddressSpace::ConstantBuffer as u32, 0],
                    )?
                }
            };
            self.name(id, &global.name)?;
            if let (Some(class), Some(binding)) = (global.register_class(), global.binding) {
                self.annotate(
                    DxilOp::Binding,
                    vec![id, register_class_code(class), binding.register, binding.space],
                )?;
            }
            self.globals.push(id);
        }
        Ok(deferred)
    }

    // Functions

    fn write_function(&mut self, handle: Handle<Function>, function: &'a Function, is_entry: bool) -> Result<()> {
        let result = self.type_id(&function.result)?;
        let mut param_types = Vec::with_capacity(function.params.len());
        for param in &function.params {
            let ty = self.type_id(&function.locals[param.local].ty)?;
            param_types.push(match param.direction {
                ParamDirection::In => ty,
                _ => self.pointer(AddressSpace::Function, ty)?,
            });
        }
        let mut signature = vec![result];
        signature.extend_from_slice(&param_types);
        let fn_type = self.declare(DxilOp::TypeFunction, 0, signature)?;
        let id = self.functions[handle.index()];
        push(
            &mut self.code,
            Instruction::with_result(DxilOp::Function, result, id, vec![fn_type]),
        )?;
        let name = if is_entry {
            format!("src.{}", function.name)
        } else {
            function.name.clone()
        };
        self.name(id, &name)?;
        let mut params = Vec::with_capacity(param_types.len());
        for &ty in &param_types {
            params.push(self.emit(DxilOp::Parameter, ty, vec![])?);
        }

        let mut fs = FunctionState::new(function);
        for (h, local) in function.locals.iter() {
            let param = function.params.iter().position(|p| p.local == h);
            let ptr = match param {
                Some(i) if function.params[i].direction != ParamDirection::In => params[i],
                _ if local.ty.is_resource() => 0,
                _ => {
                    let var = self.alloca(&local.ty)?;
                    if self.debug_info {
                        self.name(var, &local.name)?;
                    }
                    var
                }
            };
            fs.locals.push(ptr);
        }
        for (i, param) in function.params.iter().enumerate() {
            let var = fs.locals[param.local.index()];
            if param.direction == ParamDirection::In && var != 0 {
                self.void(DxilOp::Store, vec![var, params[i]])?;
            }
        }

        self.block(&mut fs, &function.body)?;
        if !fs.terminated && function.result == Type::Void {
            self.void(DxilOp::Return, vec![])?;
        }
        self.void(DxilOp::FunctionEnd, vec![])
    }

    /// The `void()` function the entry point names.
    fn write_wrapper(&mut self, entry: &EntryPoint, deferred: &[Handle<GlobalVariable>]) -> Result<u32> {
        let module = self.module;
        let function = &module.functions[entry.function];
        let void = self.type_id(&Type::Void)?;
        let fn_type = self.declare(DxilOp::TypeFunction, 0, vec![void])?;
        let id = self.id();
        push(
            &mut self.code,
            Instruction::with_result(DxilOp::Function, void, id, vec![fn_type]),
        )?;
        self.name(id, &entry.name)?;

        let mut fs = FunctionState::new(function);
        let mut param_vars = Vec::with_capacity(function.params.len());
        for param in &function.params {
            let local = &function.locals[param.local];
            let var = self.alloca(&local.ty)?;
            if self.debug_info {
                self.name(var, &format!("param.var.{}", local.name))?;
            }
            param_vars.push(var);
        }
        for &h in deferred {
            if let Some(init) = &module.globals[h].init {
                let value = self.expr(&mut fs, init)?;
                let var = self.globals[h.index()];
                self.void(DxilOp::Store, vec![var, value])?;
            }
        }

        let mut element = 0;
        for varying in &entry.inputs {
            let value = match varying.builtin.and_then(compute_builtin) {
                Some((op, natural)) => {
                    let ty = self.type_id(&natural)?;
                    let value = self.emit(op, ty, vec![])?;
                    self.adapt(value, &natural, &varying.ty)?
                }
                None => {
                    let ty = self.type_id(&varying.ty)?;
                    let value = self.emit(DxilOp::LoadInput, ty, vec![element])?;
                    element += 1;
                    value
                }
            };
            let VaryingSource::Param { index, path } = &varying.source else {
                continue;
            };
            let base_ty = function.locals[function.params[*index].local].ty.clone();
            let target = self.access_path(param_vars[*index], &base_ty, path)?;
            self.void(DxilOp::Store, vec![target, value])?;
        }

        let result_ty = self.type_id(&function.result)?;
        let mut call = vec![self.functions[entry.function.index()]];
        for (param, &var) in function.params.iter().zip(&param_vars) {
            call.push(match param.direction {
                ParamDirection::In => {
                    let ty = self.type_id(&function.locals[param.local].ty)?;
                    self.emit(DxilOp::Load, ty, vec![var])?
                }
                _ => var,
            });
        }
        let result = self.emit(DxilOp::Call, result_ty, call)?;

        for (element, varying) in entry.outputs.iter().filter(|v| in_signature(v)).enumerate() {
            let value = match &varying.source {
                VaryingSource::Result { path } if path.is_empty() => result,
                VaryingSource::Result { path } => {
                    let ty = self.type_id(&varying.ty)?;
                    let mut operands = vec![result];
                    operands.extend_from_slice(path);
                    self.emit(DxilOp::Extract, ty, operands)?
                }
                VaryingSource::Param { index, path } => {
                    let base_ty = function.locals[function.params[*index].local].ty.clone();
                    let ptr = self.access_path(param_vars[*index], &base_ty, path)?;
                    let ty = self.type_id(&varying.ty)?;
                    self.emit(DxilOp::Load, ty, vec![ptr])?
                }
            };
            self.void(DxilOp::StoreOutput, vec![element as u32, value])?;
        }
        self.void(DxilOp::Return, vec![])?;
        self.void(DxilOp::FunctionEnd, vec![])?;
        Ok(id)
    }

    /// Pointer to the leaf `path` names inside a function variable.
    fn access_path(&mut self, base: u32, ty: &Type, path: &[u32]) -> Result<u32> {
        if path.is_empty() {
            return Ok(base);
        }
        let mut leaf = ty.clone();
        let mut operands = vec![base];
        for &index in path {
            leaf = match &leaf {
                Type::Struct(_) => self.module.member_type(&leaf, index),
                other => crate::ir::element_type(other),
            };
            operands.push(self.const_u32(index)?);
        }
        let leaf = self.type_id(&leaf)?;
        let ptr = self.pointer(AddressSpace::Function, leaf)?;
        self.emit(DxilOp::GetElementPtr, ptr, operands)
    }

    fn alloca(&mut self, ty: &Type) -> Result<u32> {
        let ty = self.type_id(ty)?;
        let ptr = self.pointer(AddressSpace::Function, ty)?;
        self.emit(DxilOp::Alloca, ptr, vec![])
    }

    // Instructions

    fn emit(&mut self, op: DxilOp, ty: u32, operands: Vec<u32>) -> Result<u32> {
        let id = self.id();
        push(&mut self.code, Instruction::with_result(op, ty, id, operands))?;
        Ok(id)
    }

    fn void(&mut self, op: DxilOp, operands: Vec<u32>) -> Result<()> {
        push(&mut self.code, Instruction::new(op, operands))
    }

    // Statements

    fn block(&mut self, fs: &mut FunctionState<'a>, block: &'a [Statement]) -> Result<()> {
        for statement in block {
            if fs.terminated {
                break;
            }
            self.statement(fs, statement)?;
        }
        Ok(())
    }

    /// Emits a nested block; control may reach the code after it again.
    fn region(&mut self, fs: &mut FunctionState<'a>, block: &'a [Statement]) -> Result<()> {
        self.block(fs, block)?;
        fs.terminated = false;
        Ok(())
    }

    fn statement(&mut self, fs: &mut FunctionState<'a>, statement: &'a Statement) -> Result<()> {
        let module = self.module;
        match statement {
            Statement::Block(inner) => self.block(fs, inner),
            Statement::Store { place, value } => {
                let id = self.expr(fs, value)?;
                self.store_place(fs, place, id)
            }
            Statement::ImageStore { image, coord, value } => {
                let image = self.resource(fs, *image)?;
                let coord = self.expr(fs, coord)?;
                let value = self.expr(fs, value)?;
                self.void(DxilOp::TextureStore, vec![image, coord, value])
            }
            Statement::Call {
                function,
                args,
                result,
            } => {
                let callee = &module.functions[*function];
                let mut operands = vec![self.functions[function.index()]];
                for arg in args {
                    operands.push(match arg {
                        CallArg::Value(e) => self.expr(fs, e)?,
                        CallArg::Ref(h) => fs.locals[h.index()],
                        CallArg::Resource(_) => {
                            return Err(internal(format!(
                                "call to '{}' still passes a resource",
                                callee.name
                            )));
                        }
                    });
                }
                let ty = self.type_id(&callee.result)?;
                let value = self.emit(DxilOp::Call, ty, operands)?;
                match result {
                    Some(place) => self.store_place(fs, place, value),
                    None => Ok(()),
                }
            }
            Statement::If {
                condition,
                accept,
                reject,
            } => {
                let condition = self.expr(fs, condition)?;
                self.void(DxilOp::If, vec![condition])?;
                self.region(fs, accept)?;
                if !reject.is_empty() {
                    self.void(DxilOp::Else, vec![])?;
                    self.region(fs, reject)?;
                }
                self.void(DxilOp::EndIf, vec![])
            }
            Statement::Loop {
                body,
                continuing,
                break_if,
            } => {
                self.void(DxilOp::Loop, vec![])?;
                self.region(fs, body)?;
                self.void(DxilOp::Continuing, vec![])?;
                self.block(fs, continuing)?;
                if let (Some(condition), false) = (break_if, fs.terminated) {
                    let condition = self.expr(fs, condition)?;
                    self.void(DxilOp::BreakIf, vec![condition])?;
                }
                fs.terminated = false;
                self.void(DxilOp::EndLoop, vec![])
            }
            Statement::Switch { selector, cases } => {
                let selector = self.expr(fs, selector)?;
                self.void(DxilOp::Switch, vec![selector])?;
                for case in cases {
                    match case.value {
                        Some(value) => self.void(DxilOp::Case, vec![value as u32])?,
                        None => self.void(DxilOp::Default, vec![])?,
                    }
                    self.region(fs, &case.body)?;
                }
                self.void(DxilOp::EndSwitch, vec![])
            }
            Statement::Break => self.terminate(fs, DxilOp::Break, vec![]),
            Statement::Continue => self.terminate(fs, DxilOp::Continue, vec![]),
            Statement::Discard => self.terminate(fs, DxilOp::Discard, vec![]),
            Statement::Return(None) => self.terminate(fs, DxilOp::Return, vec![]),
            Statement::Return(Some(value)) => {
                let id = self.expr(fs, value)?;
                self.terminate(fs, DxilOp::ReturnValue, vec![id])
            }
            Statement::Barrier { scope, sync } => {
                let mut flags = match scope {
                    MemoryScope::Group => barrier::GROUP_MEMORY,
                    MemoryScope::Device => barrier::DEVICE_MEMORY,
                    MemoryScope::All => barrier::GROUP_MEMORY | barrier::DEVICE_MEMORY,
                };
                if *sync {
                    flags |= barrier::SYNC_GROUP;
                }
                self.void(DxilOp::Barrier, vec![flags])
            }
        }
    }

    fn terminate(&mut self, fs: &mut FunctionState, op: DxilOp, operands: Vec<u32>) -> Result<()> {
        self.void(op, operands)?;
        fs.terminated = true;
        Ok(())
    }

    // Places

    fn global(&self, h: Handle<GlobalVariable>) -> Result<u32> {
        self.globals
            .get(h.index())
            .copied()
            .ok_or_else(|| internal("reference to an undeclared global"))
    }

    fn resource(&self, fs: &FunctionState, r: ResourceRef) -> Result<u32> {
        match r {
            ResourceRef::Global(h) => self.global(h),
            ResourceRef::Param(i) => Err(internal(format!(
                "'{}' reads resource parameter {}",
                fs.function.name, i
            ))),
        }
    }

    fn address_space(&self, place: &Place) -> Result<AddressSpace> {
        Ok(match place.root() {
            Place::Local(_) => AddressSpace::Function,
            Place::Global(h) => match self.module.globals[*h].kind {
                GlobalKind::Workgroup => AddressSpace::GroupShared,
                _ => AddressSpace::Private,
            },
            Place::CBuffer { .. } => AddressSpace::ConstantBuffer,
            Place::Element { .. } => AddressSpace::Resource,
            _ => return Err(internal("place has no root variable")),
        })
    }

    fn place_ptr(&mut self, fs: &mut FunctionState<'a>, place: &Place) -> Result<u32> {
        let module = self.module;
        let (base, index) = match place {
            Place::Local(h) => return Ok(fs.locals[h.index()]),
            Place::Global(h) => return self.global(*h),
            Place::CBuffer { buffer, member } => (self.global(*buffer)?, self.const_u32(*member)?),
            Place::Element { resource, index } => {
                let var = self.resource(fs, *resource)?;
                (var, self.expr(fs, index)?)
            }
            Place::Member(base, member) => (self.place_ptr(fs, base)?, self.const_u32(*member)?),
            Place::Index(base, index) => {
                let base = self.place_ptr(fs, base)?;
                (base, self.expr(fs, index)?)
            }
            Place::Swizzle(..) => return Err(internal("swizzled place used as a pointer")),
        };
        let ty = fs.function.place_type(module, place);
        let pointee = self.type_id(&ty)?;
        let space = self.address_space(place)?;
        let ptr = self.pointer(space, pointee)?;
        self.emit(DxilOp::GetElementPtr, ptr, vec![base, index])
    }

    fn load_place(&mut self, fs: &mut FunctionState<'a>, place: &Place, ty: &Type) -> Result<u32> {
        if let Place::Swizzle(base, pattern) = place {
            let base_ty = fs.function.place_type(self.module, base);
            let vector = self.load_place(fs, base, &base_ty)?;
            return self.swizzle(vector, &base_ty, pattern, ty);
        }
        let ptr = self.place_ptr(fs, place)?;
        let id = self.type_id(ty)?;
        self.emit(DxilOp::Load, id, vec![ptr])
    }

    fn store_place(&mut self, fs: &mut FunctionState<'a>, place: &Place, value: u32) -> Result<()> {
        if let Place::Swizzle(base, pattern) = place {
            let base_ty = fs.function.place_type(self.module, base);
            let Some(size) = base_ty.vector_size().filter(|&n| n > 1) else {
                return self.store_place(fs, base, value);
            };
            let old = self.load_place(fs, base, &base_ty)?;
            let base_id = self.type_id(&base_ty)?;
            let merged = if pattern.len() == 1 {
                self.emit(DxilOp::Insert, base_id, vec![value, old, pattern[0] as u32])?
            } else {
                let mut operands = vec![old, value];
                operands.extend((0..size as u32).map(|i| {
                    match pattern.iter().position(|&p| p as u32 == i) {
                        Some(k) => size as u32 + k as u32,
                        None => i,
                    }
                }));
                self.emit(DxilOp::Shuffle, base_id, operands)?
            };
            return self.store_place(fs, base, merged);
        }
        let ptr = self.place_ptr(fs, place)?;
        self.void(DxilOp::Store, vec![ptr, value])
    }

    // Expressions

    fn expr(&mut self, fs: &mut FunctionState<'a>, expr: &Expr) -> Result<u32> {
        let ty = &expr.ty;
        match &expr.kind {
            ExprKind::Literal(value) => {
                let scalar = ty.scalar().ok_or_else(|| internal("non-scalar literal"))?;
                self.literal(*value, scalar)
            }
            ExprKind::Load(place) => self.load_place(fs, place, ty),
            ExprKind::Binary { op, left, right } => {
                let l = self.expr(fs, left)?;
                let r = self.expr(fs, right)?;
                self.binary(*op, &left.ty, ty, l, r)
            }
            ExprKind::Unary { op, expr: inner } => {
                let value = self.expr(fs, inner)?;
                let id = self.type_id(ty)?;
                let code = match op {
                    UnaryOp::Neg if ty.scalar().is_some_and(Scalar::is_float) => DxilOp::FNeg,
                    UnaryOp::Neg => DxilOp::Neg,
                    UnaryOp::Not => DxilOp::LogicalNot,
                    UnaryOp::BitNot => DxilOp::Not,
                };
                self.emit(code, id, vec![value])
            }
            ExprKind::Select {
                condition,
                accept,
                reject,
            } => {
                let c = self.expr(fs, condition)?;
                let a = self.expr(fs, accept)?;
                let b = self.expr(fs, reject)?;
                let id = self.type_id(ty)?;
                self.emit(DxilOp::Select, id, vec![c, a, b])
            }
            ExprKind::Construct(parts) => {
                let mut ids = Vec::with_capacity(parts.len());
                for part in parts {
                    ids.push(self.expr(fs, part)?);
                }
                self.construct(ty, parts, ids)
            }
            ExprKind::Splat(inner) => {
                let value = self.expr(fs, inner)?;
                self.splat(ty, value)
            }
            ExprKind::Convert(inner) => {
                let value = self.expr(fs, inner)?;
                self.convert(value, &inner.ty, ty)
            }
            ExprKind::Bitcast(inner) => {
                let value = self.expr(fs, inner)?;
                let id = self.type_id(ty)?;
                self.emit(DxilOp::Bitcast, id, vec![value])
            }
            ExprKind::Swizzle { vector, pattern } => {
                let value = self.expr(fs, vector)?;
                self.swizzle(value, &vector.ty, pattern, ty)
            }
            ExprKind::Member { base, index } => {
                let value = self.expr(fs, base)?;
                let id = self.type_id(ty)?;
                self.emit(DxilOp::Extract, id, vec![value, *index])
            }
            ExprKind::Index { base, index } => {
                let value = self.expr(fs, base)?;
                let id = self.type_id(ty)?;
                match index.as_literal() {
                    Some(constant) => {
                        self.emit(DxilOp::Extract, id, vec![value, constant.as_i64() as u32])
                    }
                    None => {
                        let index = self.expr(fs, index)?;
                        self.emit(DxilOp::ExtractDynamic, id, vec![value, index])
                    }
                }
            }
            ExprKind::Intrinsic { fun, args } => {
                let mut operands = vec![intrinsic_code(*fun)];
                for arg in args {
                    operands.push(self.expr(fs, arg)?);
                }
                let id = self.type_id(ty)?;
                self.emit(DxilOp::Intrinsic, id, operands)
            }
            ExprKind::MatMul { left, right } => {
                let l = self.expr(fs, left)?;
                let r = self.expr(fs, right)?;
                let id = self.type_id(ty)?;
                self.emit(DxilOp::MatMul, id, vec![l, r])
            }
            ExprKind::Sample {
                texture,
                sampler,
                coord,
                level,
                offset,
                compare,
            } => {
                let texture = self.resource(fs, *texture)?;
                let sampler = self.resource(fs, *sampler)?;
                let coord = self.expr(fs, coord)?;
                let offset = match offset {
                    Some(offset) => self.expr(fs, offset)?,
                    None => 0,
                };
                let mut operands = vec![texture, sampler, coord, offset];
                let op = match (compare, level) {
                    (None, SampleLevel::Auto) => DxilOp::Sample,
                    (None, SampleLevel::Bias(bias)) => {
                        operands.push(self.expr(fs, bias)?);
                        DxilOp::SampleBias
                    }
                    (None, SampleLevel::Lod(lod)) => {
                        operands.push(self.expr(fs, lod)?);
                        DxilOp::SampleLevel
                    }
                    (None, SampleLevel::Zero) => {
                        operands.push(self.splat_const(0.0, &Type::FLOAT)?);
                        DxilOp::SampleLevel
                    }
                    (None, SampleLevel::Grad(dx, dy)) => {
                        operands.push(self.expr(fs, dx)?);
                        operands.push(self.expr(fs, dy)?);
                        DxilOp::SampleGrad
                    }
                    (Some(reference), SampleLevel::Auto) => {
                        operands.push(self.expr(fs, reference)?);
                        DxilOp::SampleCmp
                    }
                    (Some(reference), SampleLevel::Lod(lod)) => {
                        operands.push(self.expr(fs, reference)?);
                        operands.push(self.expr(fs, lod)?);
                        DxilOp::SampleCmpLevel
                    }
                    (Some(reference), SampleLevel::Zero) => {
                        operands.push(self.expr(fs, reference)?);
                        DxilOp::SampleCmpLevelZero
                    }
                    (Some(_), SampleLevel::Bias(_) | SampleLevel::Grad(..)) => {
                        return Err(internal("comparison sampling with bias or gradients"));
                    }
                };
                let id = self.type_id(ty)?;
                self.emit(op, id, operands)
            }
            ExprKind::ImageLoad { image, coord, lod } => {
                let image = self.resource(fs, *image)?;
                let coord = self.expr(fs, coord)?;
                let lod = match lod {
                    Some(lod) => self.expr(fs, lod)?,
                    None => 0,
                };
                let id = self.type_id(ty)?;
                self.emit(DxilOp::TextureLoad, id, vec![image, coord, lod])
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, operand: &Type, result: &Type, l: u32, r: u32) -> Result<u32> {
        use ScalarKind::{Float, Sint};
        let id = self.type_id(result)?;
        let kind = operand
            .scalar()
            .ok_or_else(|| internal(format!("'{}' on a non-numeric operand", op.symbol())))?
            .kind;
        let code = match (op, kind) {
            (BinaryOp::Add, Float) => DxilOp::FAdd,
            (BinaryOp::Add, _) => DxilOp::Add,
            (BinaryOp::Sub, Float) => DxilOp::FSub,
            (BinaryOp::Sub, _) => DxilOp::Sub,
            (BinaryOp::Mul, Float) => DxilOp::FMul,
            (BinaryOp::Mul, _) => DxilOp::Mul,
            (BinaryOp::Div, Float) => DxilOp::FDiv,
            (BinaryOp::Div, Sint) => DxilOp::SDiv,
            (BinaryOp::Div, _) => DxilOp::UDiv,
            (BinaryOp::Rem, Float) => DxilOp::FRem,
            (BinaryOp::Rem, Sint) => DxilOp::SRem,
            (BinaryOp::Rem, _) => DxilOp::URem,
            (BinaryOp::Shl, _) => DxilOp::Shl,
            (BinaryOp::Shr, Sint) => DxilOp::AShr,
            (BinaryOp::Shr, _) => DxilOp::LShr,
            (BinaryOp::BitAnd, _) => DxilOp::And,
            (BinaryOp::BitOr, _) => DxilOp::Or,
            (BinaryOp::BitXor, _) => DxilOp::Xor,
            (BinaryOp::LogicalAnd, _) => DxilOp::LogicalAnd,
            (BinaryOp::LogicalOr, _) => DxilOp::LogicalOr,
            (
                BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge,
                _,
            ) => {
                let code = if kind == Float {
                    DxilOp::FCmp
                } else {
                    DxilOp::ICmp
                };
                return self.emit(code, id, vec![comparison(op, kind) as u32, l, r]);
            }
        };
        self.emit(code, id, vec![l, r])
    }

    fn construct(&mut self, ty: &Type, parts: &[Expr], ids: Vec<u32>) -> Result<u32> {
        let id = self.type_id(ty)?;
        match *ty {
            Type::Scalar(_) if ids.len() == 1 => Ok(ids[0]),
            Type::Matrix { scalar, rows, cols }
                if parts.iter().all(|p| p.ty.is_scalar())
                    && ids.len() == rows as usize * cols as usize =>
            {
                let row = self.type_id(&Type::Vector(scalar, cols))?;
                let mut row_ids = Vec::with_capacity(rows as usize);
                for chunk in ids.chunks(cols as usize) {
                    row_ids.push(self.emit(DxilOp::Composite, row, chunk.to_vec())?);
                }
                self.emit(DxilOp::Composite, id, row_ids)
            }
            _ => self.emit(DxilOp::Composite, id, ids),
        }
    }

    fn splat(&mut self, ty: &Type, value: u32) -> Result<u32> {
        match *ty {
            Type::Vector(_, n) => {
                let id = self.type_id(ty)?;
                self.emit(DxilOp::Composite, id, vec![value; n as usize])
            }
            Type::Matrix { scalar, rows, cols } => {
                let row = self.splat(&Type::Vector(scalar, cols), value)?;
                let id = self.type_id(ty)?;
                self.emit(DxilOp::Composite, id, vec![row; rows as usize])
            }
            _ => Ok(value),
        }
    }

    fn swizzle(&mut self, value: u32, base: &Type, pattern: &[u8], ty: &Type) -> Result<u32> {
        let id = self.type_id(ty)?;
        if base.is_scalar() {
            return if pattern.len() == 1 {
                Ok(value)
            } else {
                self.emit(DxilOp::Composite, id, vec![value; pattern.len()])
            };
        }
        if pattern.len() == 1 {
            return self.emit(DxilOp::Extract, id, vec![value, pattern[0] as u32]);
        }
        let mut operands = vec![value, value];
        operands.extend(pattern.iter().map(|&c| c as u32));
        self.emit(DxilOp::Shuffle, id, operands)
    }

    /// Component-wise numeric conversion between two same-shaped types.
    fn convert(&mut self, value: u32, from: &Type, to: &Type) -> Result<u32> {
        use ScalarKind::{Bool, Float, Sint, Uint};
        if from == to {
            return Ok(value);
        }
        let (Some(source), Some(target)) = (from.scalar(), to.scalar()) else {
            return Err(internal("conversion between non-numeric types"));
        };
        let id = self.type_id(to)?;
        let code = match (source.kind, target.kind) {
            (Bool, Bool) => return Ok(value),
            (Bool, _) => {
                let one = self.splat_const(1.0, to)?;
                let zero = self.splat_const(0.0, to)?;
                return self.emit(DxilOp::Select, id, vec![value, one, zero]);
            }
            (_, Bool) => {
                let zero = self.splat_const(0.0, from)?;
                let code = if source.is_float() {
                    DxilOp::FCmp
                } else {
                    DxilOp::ICmp
                };
                return self.emit(code, id, vec![Predicate::Ne as u32, value, zero]);
            }
            (Float, Float) => DxilOp::FPCast,
            (Float, Sint) => DxilOp::FPToSI,
            (Float, Uint) => DxilOp::FPToUI,
            (Sint, Float) => DxilOp::SIToFP,
            (Uint, Float) => DxilOp::UIToFP,
            (Sint | Uint, Sint | Uint) => {
                return self.emit(DxilOp::IntCast, id, vec![value, (source.kind == Sint) as u32]);
            }
        };
        self.emit(code, id, vec![value])
    }

    /// Resizes a scalar or vector to `to`'s component count, then converts
    /// its component type.
    fn adapt(&mut self, value: u32, from: &Type, to: &Type) -> Result<u32> {
        if from == to {
            return Ok(value);
        }
        let (Some(scalar), Some(have), Some(want)) = (from.scalar(), from.vector_size(), to.vector_size())
        else {
            return Err(internal("system value of aggregate type"));
        };
        let resized = Type::vector(scalar, want);
        let value = if have > want {
            let pattern: Vec<u8> = (0..want).collect();
            self.swizzle(value, from, &pattern, &resized)?
        } else if have < want {
            let fill = self.literal(Literal::Uint(0), scalar)?;
            let mut parts = vec![value];
            parts.extend(std::iter::repeat_n(fill, (want - have) as usize));
            let id = self.type_id(&resized)?;
            self.emit(DxilOp::Composite, id, parts)?
        } else {
            value
        };
        self.convert(value, &resized, to)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{EmitContext, emit};
    use super::*;
    use crate::container::{Container, parse_signature};
    use crate::desc::{OptionsDesc, TargetDesc};
    use pretty_assertions::assert_eq;

    fn emit_with(module: &Module, options: &OptionsDesc) -> Vec<u8> {
        let target = TargetDesc::new(ShadingLanguage::Dxil);
        let output = emit(module, &EmitContext::new(options, &target)).unwrap();
        assert!(!output.is_text);
        output.blob.data().to_vec()
    }

    fn program(bytes: &[u8]) -> Vec<Instruction> {
        let container = Container::parse(bytes).unwrap();
        let part = container.part(FOURCC_PROGRAM).unwrap();
        let (_, code) = ProgramHeader::parse(part.data).unwrap();
        let mut offset = 0;
        let mut out = Vec::new();
        while offset < code.len() {
            let (inst, len) = Instruction::decode(&code, offset).unwrap();
            out.push(inst);
            offset += len;
        }
        out
    }

    #[test]
    fn test_pixel_container_parts() {
        let module = module(PIXEL, "PS", ShaderStage::Pixel);
        let bytes = emit_with(&module, &OptionsDesc::default());
        assert!(Container::verify(&bytes));
        let container = Container::parse(&bytes).unwrap();
        let names: Vec<String> = container.parts.iter().map(|p| p.name()).collect();
        assert_eq!(names, ["ISG1", "OSG1", "HASH", "DXIL"]);

        let inputs = parse_signature(container.part(FOURCC_INPUT_SIGNATURE).unwrap().data).unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].semantic_name, "TEXCOORD");
        assert_eq!(inputs[0].mask, 0x3);
        assert_eq!(inputs[0].component_type, 3);
        let outputs = parse_signature(container.part(FOURCC_OUTPUT_SIGNATURE).unwrap().data).unwrap();
        assert_eq!(outputs[0].system_value, 64);
        assert_eq!(outputs[0].rw_mask, 0);
    }

    #[test]
    fn test_program_decodes_with_entry_first() {
        let module = module(PIXEL, "PS", ShaderStage::Pixel);
        let code = program(&emit_with(&module, &OptionsDesc::default()));
        assert_eq!(code[0].op, DxilOp::EntryPoint);
        assert_eq!(code[0].operands[0], 0);
        assert!(code.iter().any(|i| i.op == DxilOp::Sample));
        assert!(code.iter().any(|i| i.op == DxilOp::Discard));
        assert!(code.iter().any(|i| i.op == DxilOp::LoadInput));
        assert_eq!(
            code.iter().filter(|i| i.op == DxilOp::Function).count(),
            code.iter().filter(|i| i.op == DxilOp::FunctionEnd).count()
        );
    }

    #[test]
    fn test_compute_threads_and_bindings() {
        let module = module(COMPUTE, "CS", ShaderStage::Compute);
        let bytes = emit_with(&module, &OptionsDesc::default());
        let code = program(&bytes);
        let threads = code.iter().find(|i| i.op == DxilOp::NumThreads).unwrap();
        assert_eq!(threads.operands[1..], [64, 1, 1]);
        assert!(code.iter().any(|i| i.op == DxilOp::ThreadId));
        let bindings: Vec<_> = code
            .iter()
            .filter(|i| i.op == DxilOp::Binding)
            .map(|i| i.operands[1])
            .collect();
        assert_eq!(bindings.len(), 2);
        assert!(bindings.contains(&3));
        assert!(bindings.contains(&0));

        let container = Container::parse(&bytes).unwrap();
        let inputs = parse_signature(container.part(FOURCC_INPUT_SIGNATURE).unwrap().data).unwrap();
        assert!(inputs.is_empty());
    }

    #[test]
    fn test_debug_info_parts() {
        let mut module = module(PIXEL, "PS", ShaderStage::Pixel);
        module.debug_source = Some(PIXEL.to_string());
        let options = OptionsDesc {
            enable_debug_info: true,
            ..OptionsDesc::default()
        };
        let bytes = emit_with(&module, &options);
        let container = Container::parse(&bytes).unwrap();
        let name = container.part(FOURCC_DEBUG_NAME).unwrap().data;
        let len = u16::from_le_bytes([name[2], name[3]]) as usize;
        let text = std::str::from_utf8(&name[4..4 + len]).unwrap();
        assert!(text.ends_with(".pdb"));
        assert_eq!(text.len(), 36);
        let source = container.part(FOURCC_DEBUG_INFO).unwrap().data;
        assert!(String::from_utf8_lossy(source).contains("albedo.Sample"));
        assert_eq!(container.part(FOURCC_HASH).unwrap().data[0], 1);
    }

    #[test]
    fn test_rejects_shader_model_below_6() {
        let mut module = module(PIXEL, "PS", ShaderStage::Pixel);
        module.shader_model = ShaderModel::new(5, 1);
        let options = OptionsDesc::default();
        let target = TargetDesc::new(ShadingLanguage::Dxil);
        let diags = emit(&module, &EmitContext::new(&options, &target)).unwrap_err();
        let first = diags.first_error().unwrap();
        assert_eq!(first.kind, ErrorKind::TargetCapability);
        assert!(first.message.contains("6.0"));
    }
}
