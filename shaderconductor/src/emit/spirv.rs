//! SPIR-V emission through `rspirv`'s module builder.
//!
//! HLSL matrices are emitted transposed: `floatRxC` becomes an
//! `OpTypeMatrix` of R columns holding C components, so a row-major HLSL
//! layout is decorated `ColMajor` and `mul(a, b)` maps onto the SPIR-V
//! products with the operands swapped.
//!
//! The HLSL entry function is emitted as an ordinary function named
//! `src.<entry>`; a generated `<entry>` wrapper moves the stage interface
//! variables in and out of it.

use super::{EmitContext, EmitOutput, Emitter, capability, parse_dotted};
use crate::desc::ShaderStage;
use crate::diag::{Diagnostics, ErrorKind};
use crate::ir::layout::{self, LayoutRules};
use crate::ir::visit::for_each_expr;
use crate::ir::{
    BinaryOp, Block, BufferKind, BuiltIn, CallArg, EntryPoint, Expr, ExprKind, Function, GlobalKind,
    GlobalVariable, Handle, Interpolation, Intrinsic, Literal, MatrixLayout, MemoryScope,
    Module, ParamDirection, Place, ResourceRef, SampleLevel, Scalar, ScalarKind, Statement,
    StructDecl, TextureDim, TextureType, Type, UnaryOp, Varying, VaryingSource,
};
use crate::ir::Arena;
use rspirv::binary::Assemble;
use rspirv::dr::{Builder, InsertPoint, Instruction, Operand};
use rspirv::spirv::{
    self, AddressingModel, Capability, Decoration, Dim, ExecutionMode, ExecutionModel,
    FunctionControl, GLOp, ImageFormat, ImageOperands, LoopControl, MemoryModel,
    MemorySemantics, Op, Scope, SelectionControl, SourceLanguage, StorageClass, Word,
};
use std::collections::{HashMap, HashSet};

const VERSIONS: &[(u32, u32)] = &[(1, 0), (1, 1), (1, 2), (1, 3)];
const DEFAULT_VERSION: (u32, u32) = (1, 0);
const LOG10_2: f64 = std::f64::consts::LOG10_2;

type Result<T> = std::result::Result<T, Diagnostics>;

fn version(ctx: &EmitContext) -> std::result::Result<(u32, u32), String> {
    match ctx.version() {
        None => Ok(DEFAULT_VERSION),
        Some(text) => parse_dotted(text)
            .filter(|v| VERSIONS.contains(v))
            .ok_or_else(|| format!("SPIR-V version {} is not supported", text)),
    }
}

fn internal(message: impl std::fmt::Debug) -> Diagnostics {
    Diagnostics::single(
        ErrorKind::Internal,
        None,
        format!("SPIR-V generation failed: {:?}", message),
    )
}

trait Built<T> {
    fn built(self) -> Result<T>;
}

impl<T, E: std::fmt::Debug> Built<T> for std::result::Result<T, E> {
    fn built(self) -> Result<T> {
        self.map_err(internal)
    }
}

#[derive(Debug)]
pub struct SpirvEmitter;

impl Emitter for SpirvEmitter {
    fn name(&self) -> &'static str {
        "SPIR-V"
    }

    fn languages(&self) -> &'static [crate::desc::ShadingLanguage] {
        &[crate::desc::ShadingLanguage::SpirV]
    }

    fn check(&self, module: &Module, ctx: &EmitContext, diags: &mut Diagnostics) {
        if let Err(message) = version(ctx) {
            capability(diags, message);
            return;
        }
        let structs = &module.structs;
        for (_, global) in module.globals.iter() {
            if has_integer_matrix(&global.ty, structs) {
                capability(
                    diags,
                    format!("'{}': integer matrices are not supported in SPIR-V", global.name),
                );
            }
            match &global.kind {
                GlobalKind::ConstantBuffer { members, .. } => {
                    for member in members {
                        if has_integer_matrix(&member.ty, structs) {
                            capability(
                                diags,
                                format!("'{}': integer matrices are not supported in SPIR-V", member.name),
                            );
                        }
                        if !member.ty.is_bool_like() && contains_bool(&member.ty, structs) {
                            capability(
                                diags,
                                format!(
                                    "'{}': booleans nested in constant buffer aggregates are not supported in SPIR-V",
                                    member.name
                                ),
                            );
                        }
                    }
                }
                GlobalKind::Resource => {
                    if let Type::Buffer {
                        kind: BufferKind::Structured,
                        elem,
                        ..
                    } = &global.ty
                    {
                        if !elem.is_bool_like() && contains_bool(elem, structs) {
                            capability(
                                diags,
                                format!(
                                    "'{}': booleans nested in structured buffer elements are not supported in SPIR-V",
                                    global.name
                                ),
                            );
                        }
                    }
                }
                _ => {}
            }
        }
        for (_, function) in module.functions.iter() {
            let locals = function.locals.iter().map(|(_, l)| &l.ty);
            if std::iter::once(&function.result)
                .chain(locals)
                .any(|ty| has_integer_matrix(ty, structs))
            {
                capability(
                    diags,
                    format!("'{}': integer matrices are not supported in SPIR-V", function.name),
                );
            }
            let mut aggregate_select = false;
            for_each_expr(&function.body, &mut |e| {
                if matches!(e.kind, ExprKind::Select { .. })
                    && matches!(e.ty, Type::Struct(_) | Type::Array(..))
                {
                    aggregate_select = true;
                }
            });
            if aggregate_select {
                capability(
                    diags,
                    format!(
                        "'{}': conditional selection of structs or arrays is not supported in SPIR-V",
                        function.name
                    ),
                );
            }
        }
    }

    fn emit(&self, module: &Module, ctx: &EmitContext) -> Result<EmitOutput> {
        let version = version(ctx).map_err(|m| Diagnostics::single(ErrorKind::TargetCapability, None, m))?;
        let entry = module
            .entry()
            .ok_or_else(|| internal("module has no entry point"))?;
        let mut writer = SpirvWriter::new(module, version);
        writer.write(entry, ctx.options.enable_debug_info)?;
        let words = writer.b.module().assemble();
        Ok(EmitOutput::binary(
            words.iter().flat_map(|w| w.to_le_bytes()).collect(),
        ))
    }
}

fn contains_bool(ty: &Type, structs: &Arena<StructDecl>) -> bool {
    match ty {
        Type::Array(elem, _) => contains_bool(elem, structs),
        Type::Struct(h) => structs[*h]
            .members
            .iter()
            .any(|m| contains_bool(&m.ty, structs)),
        _ => ty.is_bool_like(),
    }
}

fn has_integer_matrix(ty: &Type, structs: &Arena<StructDecl>) -> bool {
    match ty {
        Type::Matrix { scalar, .. } => !scalar.is_float(),
        Type::Array(elem, _) => has_integer_matrix(elem, structs),
        Type::Struct(h) => structs[*h]
            .members
            .iter()
            .any(|m| has_integer_matrix(&m.ty, structs)),
        _ => false,
    }
}

/// Booleans live in buffers as 32-bit unsigned integers.
fn storage_type(ty: &Type) -> Type {
    if ty.is_bool_like() {
        ty.with_scalar(Scalar::U32)
    } else {
        ty.clone()
    }
}

/// Sampled type of an image; images only hold 32-bit components.
fn texel_scalar(scalar: Scalar) -> Scalar {
    Scalar::new(scalar.kind, 4)
}

fn storage_format(scalar: Scalar, components: u8) -> ImageFormat {
    match (scalar.kind, components) {
        (ScalarKind::Float, 1) => ImageFormat::R32f,
        (ScalarKind::Float, 2) => ImageFormat::Rg32f,
        (ScalarKind::Float, _) => ImageFormat::Rgba32f,
        (ScalarKind::Sint, 1) => ImageFormat::R32i,
        (ScalarKind::Sint, 2) => ImageFormat::Rg32i,
        (ScalarKind::Sint, _) => ImageFormat::Rgba32i,
        (_, 1) => ImageFormat::R32ui,
        (_, 2) => ImageFormat::Rg32ui,
        _ => ImageFormat::Rgba32ui,
    }
}

/// Type of the variable a built-in is declared with.
fn builtin_type(builtin: BuiltIn) -> Type {
    match builtin {
        BuiltIn::Position | BuiltIn::FragCoord => Type::Vector(Scalar::F32, 4),
        BuiltIn::FragDepth => Type::FLOAT,
        BuiltIn::FrontFacing => Type::BOOL,
        BuiltIn::VertexId
        | BuiltIn::InstanceId
        | BuiltIn::SampleIndex
        | BuiltIn::PrimitiveId
        | BuiltIn::LocalInvocationIndex => Type::UINT,
        BuiltIn::GlobalInvocationId | BuiltIn::LocalInvocationId | BuiltIn::WorkgroupId => {
            Type::Vector(Scalar::U32, 3)
        }
    }
}

fn spirv_builtin(builtin: BuiltIn) -> spirv::BuiltIn {
    match builtin {
        BuiltIn::Position => spirv::BuiltIn::Position,
        BuiltIn::FragCoord => spirv::BuiltIn::FragCoord,
        BuiltIn::VertexId => spirv::BuiltIn::VertexIndex,
        BuiltIn::InstanceId => spirv::BuiltIn::InstanceIndex,
        BuiltIn::FrontFacing => spirv::BuiltIn::FrontFacing,
        BuiltIn::FragDepth => spirv::BuiltIn::FragDepth,
        BuiltIn::SampleIndex => spirv::BuiltIn::SampleId,
        BuiltIn::PrimitiveId => spirv::BuiltIn::PrimitiveId,
        BuiltIn::GlobalInvocationId => spirv::BuiltIn::GlobalInvocationId,
        BuiltIn::LocalInvocationId => spirv::BuiltIn::LocalInvocationId,
        BuiltIn::WorkgroupId => spirv::BuiltIn::WorkgroupId,
        BuiltIn::LocalInvocationIndex => spirv::BuiltIn::LocalInvocationIndex,
    }
}

fn binary_op(op: BinaryOp, kind: ScalarKind) -> Op {
    use ScalarKind::{Bool, Float, Sint};
    match (op, kind) {
        (BinaryOp::Add, Float) => Op::FAdd,
        (BinaryOp::Add, _) => Op::IAdd,
        (BinaryOp::Sub, Float) => Op::FSub,
        (BinaryOp::Sub, _) => Op::ISub,
        (BinaryOp::Mul, Float) => Op::FMul,
        (BinaryOp::Mul, _) => Op::IMul,
        (BinaryOp::Div, Float) => Op::FDiv,
        (BinaryOp::Div, Sint) => Op::SDiv,
        (BinaryOp::Div, _) => Op::UDiv,
        (BinaryOp::Rem, Float) => Op::FRem,
        (BinaryOp::Rem, Sint) => Op::SRem,
        (BinaryOp::Rem, _) => Op::UMod,
        (BinaryOp::Shl, _) => Op::ShiftLeftLogical,
        (BinaryOp::Shr, Sint) => Op::ShiftRightArithmetic,
        (BinaryOp::Shr, _) => Op::ShiftRightLogical,
        (BinaryOp::BitAnd, Bool) | (BinaryOp::LogicalAnd, _) => Op::LogicalAnd,
        (BinaryOp::BitOr, Bool) | (BinaryOp::LogicalOr, _) => Op::LogicalOr,
        (BinaryOp::BitXor, Bool) => Op::LogicalNotEqual,
        (BinaryOp::BitAnd, _) => Op::BitwiseAnd,
        (BinaryOp::BitOr, _) => Op::BitwiseOr,
        (BinaryOp::BitXor, _) => Op::BitwiseXor,
        (BinaryOp::Eq, Bool) => Op::LogicalEqual,
        (BinaryOp::Ne, Bool) => Op::LogicalNotEqual,
        (BinaryOp::Eq, Float) => Op::FOrdEqual,
        (BinaryOp::Ne, Float) => Op::FUnordNotEqual,
        (BinaryOp::Eq, _) => Op::IEqual,
        (BinaryOp::Ne, _) => Op::INotEqual,
        (BinaryOp::Lt, Float) => Op::FOrdLessThan,
        (BinaryOp::Lt, Sint) => Op::SLessThan,
        (BinaryOp::Lt, _) => Op::ULessThan,
        (BinaryOp::Le, Float) => Op::FOrdLessThanEqual,
        (BinaryOp::Le, Sint) => Op::SLessThanEqual,
        (BinaryOp::Le, _) => Op::ULessThanEqual,
        (BinaryOp::Gt, Float) => Op::FOrdGreaterThan,
        (BinaryOp::Gt, Sint) => Op::SGreaterThan,
        (BinaryOp::Gt, _) => Op::UGreaterThan,
        (BinaryOp::Ge, Float) => Op::FOrdGreaterThanEqual,
        (BinaryOp::Ge, Sint) => Op::SGreaterThanEqual,
        (BinaryOp::Ge, _) => Op::UGreaterThanEqual,
    }
}

#[derive(Debug, Clone, Copy)]
struct GlobalInfo {
    var: Word,
    class: StorageClass,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    merge: Word,
    /// Continue target for loops, `None` for switches
    cont: Option<Word>,
}

struct FunctionState<'a> {
    function: &'a Function,
    /// Pointer for every local, indexed by handle
    locals: Vec<Word>,
    frames: Vec<Frame>,
    terminated: bool,
    /// Function variables that dynamically indexed values are spilled to
    spills: HashMap<Type, Word>,
}

impl<'a> FunctionState<'a> {
    fn new(function: &'a Function) -> Self {
        FunctionState {
            function,
            locals: Vec::with_capacity(function.locals.len()),
            frames: Vec::new(),
            terminated: false,
            spills: HashMap::new(),
        }
    }
}

struct SpirvWriter<'a> {
    module: &'a Module,
    b: Builder,
    version: (u32, u32),
    glsl: Word,
    types: HashMap<Type, Word>,
    pointers: HashMap<(StorageClass, Word), Word>,
    laid_out: HashSet<Word>,
    capabilities: Vec<Capability>,
    globals: Vec<GlobalInfo>,
    functions: Vec<Word>,
}

impl<'a> SpirvWriter<'a> {
    fn new(module: &'a Module, version: (u32, u32)) -> Self {
        let mut b = Builder::new();
        b.set_version(version.0 as u8, version.1 as u8);
        let glsl = b.ext_inst_import("GLSL.std.450");
        b.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);
        SpirvWriter {
            module,
            b,
            version,
            glsl,
            types: HashMap::new(),
            pointers: HashMap::new(),
            laid_out: HashSet::new(),
            capabilities: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
        }
    }

    fn require(&mut self, capability: Capability) {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
            self.b.capability(capability);
        }
    }

    fn write(&mut self, entry: &EntryPoint, debug_info: bool) -> Result<()> {
        let module = self.module;
        self.require(Capability::Shader);
        if module.uses_16bit {
            self.require(Capability::Float16);
            self.require(Capability::Int16);
            self.require(Capability::StorageBuffer16BitAccess);
            self.require(Capability::UniformAndStorageBuffer16BitAccess);
            if self.version < (1, 3) {
                self.b.extension("SPV_KHR_16bit_storage");
            }
        }
        if module.uses_64bit {
            self.require(Capability::Float64);
        }
        if debug_info {
            if let Some(source) = &module.debug_source {
                let file = self.b.string(module.source_name.clone());
                self.b
                    .source(SourceLanguage::HLSL, 500, Some(file), Some(source.clone()));
            }
        }

        let deferred = self.declare_globals()?;
        let inputs = self.declare_interface(entry, false);
        let outputs = self.declare_interface(entry, true);

        self.functions = (0..module.functions.len()).map(|_| self.b.id()).collect();
        for (h, function) in module.functions.iter() {
            self.write_function(h, function, h == entry.function)?;
        }
        let wrapper = self.write_wrapper(entry, &inputs, &outputs, &deferred)?;

        let model = match entry.stage {
            ShaderStage::Vertex => ExecutionModel::Vertex,
            ShaderStage::Pixel => ExecutionModel::Fragment,
            ShaderStage::Compute => ExecutionModel::GLCompute,
            other => {
                return Err(internal(format!("unexpected {:?} entry point", other)));
            }
        };
        let interface: Vec<Word> = inputs.iter().chain(&outputs).copied().collect();
        self.b.entry_point(model, wrapper, entry.name.clone(), interface);
        match entry.stage {
            ShaderStage::Pixel => {
                self.b
                    .execution_mode(wrapper, ExecutionMode::OriginUpperLeft, Vec::<u32>::new());
                if entry
                    .outputs
                    .iter()
                    .any(|v| v.builtin == Some(BuiltIn::FragDepth))
                {
                    self.b
                        .execution_mode(wrapper, ExecutionMode::DepthReplacing, Vec::<u32>::new());
                }
            }
            ShaderStage::Compute => {
                self.b.execution_mode(
                    wrapper,
                    ExecutionMode::LocalSize,
                    entry.workgroup_size.to_vec(),
                );
            }
            _ => {}
        }
        Ok(())
    }

    // Types

    fn scalar_id(&mut self, scalar: Scalar) -> Word {
        let bits = scalar.width as u32 * 8;
        match scalar.kind {
            ScalarKind::Bool => self.b.type_bool(),
            ScalarKind::Sint => self.b.type_int(bits, 1),
            ScalarKind::Uint => self.b.type_int(bits, 0),
            ScalarKind::Float => self.b.type_float(bits),
        }
    }

    fn type_id(&mut self, ty: &Type) -> Word {
        if let Some(&id) = self.types.get(ty) {
            return id;
        }
        let module = self.module;
        let id = match ty {
            Type::Void => self.b.type_void(),
            Type::Scalar(s) => self.scalar_id(*s),
            Type::Vector(s, n) => {
                let component = self.scalar_id(*s);
                self.b.type_vector(component, *n as u32)
            }
            Type::Matrix { scalar, rows, cols } => {
                let column = self.type_id(&Type::Vector(*scalar, *cols));
                self.b.type_matrix(column, *rows as u32)
            }
            Type::Array(elem, len) => {
                let elem = self.type_id(elem);
                let len = self.const_u32(*len);
                self.b.type_array(elem, len)
            }
            Type::Struct(h) => {
                let decl = &module.structs[*h];
                let members: Vec<Word> = decl.members.iter().map(|m| self.type_id(&m.ty)).collect();
                let id = self.b.id();
                self.b.type_struct_id(Some(id), members);
                self.b.name(id, decl.name.clone());
                for (i, member) in decl.members.iter().enumerate() {
                    self.b.member_name(id, i as u32, member.name.clone());
                }
                id
            }
            Type::Texture(t) => self.image_id(t),
            Type::Sampler { .. } => self.b.type_sampler(),
            Type::Buffer {
                kind: BufferKind::Typed,
                rw,
                elem,
            } => self.texel_buffer_id(*rw, elem),
            Type::Buffer { .. } => self.b.type_void(),
        };
        self.types.insert(ty.clone(), id);
        id
    }

    fn image_id(&mut self, t: &TextureType) -> Word {
        let dim = match t.dim {
            TextureDim::D1 => Dim::Dim1D,
            TextureDim::D2 => Dim::Dim2D,
            TextureDim::D3 => Dim::Dim3D,
            TextureDim::Cube => Dim::DimCube,
        };
        match (t.dim, t.rw) {
            (TextureDim::D1, false) => self.require(Capability::Sampled1D),
            (TextureDim::D1, true) => self.require(Capability::Image1D),
            (TextureDim::Cube, false) if t.arrayed => self.require(Capability::SampledCubeArray),
            (TextureDim::Cube, true) if t.arrayed => self.require(Capability::ImageCubeArray),
            _ => {}
        }
        if t.rw && t.multisampled && t.arrayed {
            self.require(Capability::ImageMSArray);
        }
        let format = if t.rw {
            self.storage_format(t.sampled, t.components)
        } else {
            ImageFormat::Unknown
        };
        let sampled = self.scalar_id(texel_scalar(t.sampled));
        self.b.type_image(
            sampled,
            dim,
            2,
            t.arrayed as u32,
            t.multisampled as u32,
            if t.rw { 2 } else { 1 },
            format,
            None,
        )
    }

    fn texel_buffer_id(&mut self, rw: bool, elem: &Type) -> Word {
        let scalar = elem.scalar().unwrap_or(Scalar::F32);
        let components = elem.vector_size().unwrap_or(4);
        let format = if rw {
            self.require(Capability::ImageBuffer);
            self.storage_format(scalar, components)
        } else {
            self.require(Capability::SampledBuffer);
            ImageFormat::Unknown
        };
        let sampled = self.scalar_id(texel_scalar(scalar));
        self.b.type_image(
            sampled,
            Dim::DimBuffer,
            2,
            0,
            0,
            if rw { 2 } else { 1 },
            format,
            None,
        )
    }

    fn storage_format(&mut self, scalar: Scalar, components: u8) -> ImageFormat {
        if components == 2 {
            self.require(Capability::StorageImageExtendedFormats);
        }
        storage_format(scalar, components)
    }

    fn pointer(&mut self, class: StorageClass, pointee: Word) -> Word {
        if let Some(&id) = self.pointers.get(&(class, pointee)) {
            return id;
        }
        let id = self.b.type_pointer(None, class, pointee);
        self.pointers.insert((class, pointee), id);
        id
    }

    /// Decorates the explicit layout of `ty` when it is stored in a buffer.
    fn lay_out(&mut self, ty: &Type, rules: LayoutRules, matrix_layout: MatrixLayout) {
        let module = self.module;
        match ty {
            Type::Array(elem, _) => {
                let id = self.type_id(ty);
                if self.laid_out.insert(id) {
                    let stride = layout::array_stride(elem, &module.structs, rules, matrix_layout);
                    self.b
                        .decorate(id, Decoration::ArrayStride, vec![Operand::LiteralBit32(stride)]);
                }
                self.lay_out(elem, rules, matrix_layout);
            }
            Type::Struct(h) => {
                let id = self.type_id(ty);
                if !self.laid_out.insert(id) {
                    return;
                }
                let decl = &module.structs[*h];
                let (offsets, _, _) = layout::struct_layout(decl, &module.structs, rules, matrix_layout);
                for (i, member) in decl.members.iter().enumerate() {
                    let offset = offsets.get(i).copied().unwrap_or(0);
                    self.b.member_decorate(
                        id,
                        i as u32,
                        Decoration::Offset,
                        vec![Operand::LiteralBit32(offset)],
                    );
                    let member_layout = member.matrix_layout.unwrap_or(matrix_layout);
                    self.decorate_matrix(id, i as u32, &member.ty, rules, member_layout);
                    self.lay_out(&member.ty, rules, member_layout);
                }
            }
            _ => {}
        }
    }

    fn decorate_matrix(
        &mut self,
        structure: Word,
        member: u32,
        ty: &Type,
        rules: LayoutRules,
        matrix_layout: MatrixLayout,
    ) {
        let mut inner = ty;
        while let Type::Array(elem, _) = inner {
            inner = elem;
        }
        if !inner.is_matrix() {
            return;
        }
        // HLSL rows are SPIR-V columns
        let major = match matrix_layout {
            MatrixLayout::RowMajor => Decoration::ColMajor,
            MatrixLayout::ColumnMajor => Decoration::RowMajor,
        };
        self.b.member_decorate(structure, member, major, vec![]);
        let stride = layout::matrix_stride_of(inner, rules, matrix_layout);
        self.b.member_decorate(
            structure,
            member,
            Decoration::MatrixStride,
            vec![Operand::LiteralBit32(stride)],
        );
    }

    // Constants

    fn const_u32(&mut self, value: u32) -> Word {
        let ty = self.scalar_id(Scalar::U32);
        self.b.constant_bit32(ty, value)
    }

    fn literal(&mut self, value: Literal, scalar: Scalar) -> Word {
        let ty = self.scalar_id(scalar);
        match scalar.kind {
            ScalarKind::Bool if value.cast(scalar).as_bool() => self.b.constant_true(ty),
            ScalarKind::Bool => self.b.constant_false(ty),
            _ if scalar.width == 8 => self.b.constant_bit64(ty, value.bits(scalar)),
            _ => self.b.constant_bit32(ty, value.bits(scalar) as u32),
        }
    }

    /// `value` converted to the component type of `ty` and broadcast.
    fn splat_const(&mut self, value: f64, ty: &Type) -> Word {
        let scalar = ty.scalar().unwrap_or(Scalar::F32);
        let component = self.literal(Literal::Float(value), scalar);
        match ty {
            Type::Vector(_, n) => {
                let id = self.type_id(ty);
                self.b.constant_composite(id, vec![component; *n as usize])
            }
            _ => component,
        }
    }

    /// Constant for an expression built only from literals.
    fn constant(&mut self, expr: &Expr) -> Option<Word> {
        match &expr.kind {
            ExprKind::Literal(value) => Some(self.literal(*value, expr.ty.scalar()?)),
            ExprKind::Splat(inner) => {
                let component = self.constant(inner)?;
                match expr.ty {
                    Type::Vector(_, n) => {
                        let id = self.type_id(&expr.ty);
                        Some(self.b.constant_composite(id, vec![component; n as usize]))
                    }
                    Type::Scalar(_) => Some(component),
                    _ => None,
                }
            }
            ExprKind::Construct(parts) => {
                let flat = match expr.ty {
                    Type::Vector(..) => parts.iter().all(|p| p.ty.is_scalar()),
                    Type::Matrix { .. } => parts.iter().all(|p| p.ty.is_vector()),
                    _ => true,
                };
                if !flat {
                    return None;
                }
                let ids = parts
                    .iter()
                    .map(|p| self.constant(p))
                    .collect::<Option<Vec<_>>>()?;
                let id = self.type_id(&expr.ty);
                Some(self.b.constant_composite(id, ids))
            }
            _ => None,
        }
    }

    // Declarations

    /// Declares every global; returns private globals whose initializer
    /// has to run at the start of the entry point.
    fn declare_globals(&mut self) -> Result<Vec<Handle<GlobalVariable>>> {
        let module = self.module;
        let mut deferred = Vec::new();
        for (h, global) in module.globals.iter() {
            let info = match &global.kind {
                GlobalKind::Private | GlobalKind::Workgroup => {
                    let class = if global.kind == GlobalKind::Private {
                        StorageClass::Private
                    } else {
                        StorageClass::Workgroup
                    };
                    let ty = self.type_id(&global.ty);
                    let ptr = self.pointer(class, ty);
                    let init = match &global.init {
                        Some(init) if class == StorageClass::Private => {
                            let constant = self.constant(init);
                            if constant.is_none() {
                                deferred.push(h);
                            }
                            constant
                        }
                        _ => None,
                    };
                    GlobalInfo {
                        var: self.b.variable(ptr, None, class, init),
                        class,
                    }
                }
                GlobalKind::ConstantBuffer { members, .. } => {
                    let types: Vec<Word> = members
                        .iter()
                        .map(|m| self.type_id(&storage_type(&m.ty)))
                        .collect();
                    let block = self.b.id();
                    self.b.type_struct_id(Some(block), types);
                    self.b.decorate(block, Decoration::Block, vec![]);
                    self.b.name(block, format!("type_{}", global.name));
                    for (i, member) in members.iter().enumerate() {
                        let index = i as u32;
                        self.b.member_name(block, index, member.name.clone());
                        self.b.member_decorate(
                            block,
                            index,
                            Decoration::Offset,
                            vec![Operand::LiteralBit32(member.offset)],
                        );
                        self.decorate_matrix(
                            block,
                            index,
                            &member.ty,
                            LayoutRules::HlslCBuffer,
                            member.matrix_layout,
                        );
                        self.lay_out(&member.ty, LayoutRules::HlslCBuffer, member.matrix_layout);
                    }
                    let ptr = self.pointer(StorageClass::Uniform, block);
                    GlobalInfo {
                        var: self.b.variable(ptr, None, StorageClass::Uniform, None),
                        class: StorageClass::Uniform,
                    }
                }
                GlobalKind::Resource => self.declare_resource(global)?,
            };
            self.b.name(info.var, global.name.clone());
            if let Some(binding) = global.binding {
                self.b.decorate(
                    info.var,
                    Decoration::DescriptorSet,
                    vec![Operand::LiteralBit32(binding.space)],
                );
                self.b.decorate(
                    info.var,
                    Decoration::Binding,
                    vec![Operand::LiteralBit32(binding.register)],
                );
            }
            self.globals.push(info);
        }
        Ok(deferred)
    }

    fn declare_resource(&mut self, global: &GlobalVariable) -> Result<GlobalInfo> {
        let module = self.module;
        match &global.ty {
            Type::Texture(_)
            | Type::Sampler { .. }
            | Type::Buffer {
                kind: BufferKind::Typed,
                ..
            } => {
                let ty = self.type_id(&global.ty);
                let ptr = self.pointer(StorageClass::UniformConstant, ty);
                Ok(GlobalInfo {
                    var: self.b.variable(ptr, None, StorageClass::UniformConstant, None),
                    class: StorageClass::UniformConstant,
                })
            }
            Type::Buffer { kind, rw, elem } => {
                let elem = match kind {
                    BufferKind::ByteAddress => Type::UINT,
                    _ => storage_type(elem),
                };
                let elem_id = self.type_id(&elem);
                self.lay_out(&elem, LayoutRules::Std430, module.matrix_layout);
                let array = self.b.type_runtime_array(elem_id);
                if self.laid_out.insert(array) {
                    let stride = layout::array_stride(
                        &elem,
                        &module.structs,
                        LayoutRules::Std430,
                        module.matrix_layout,
                    );
                    self.b.decorate(
                        array,
                        Decoration::ArrayStride,
                        vec![Operand::LiteralBit32(stride)],
                    );
                }
                let block = self.b.id();
                self.b.type_struct_id(Some(block), vec![array]);
                self.b.name(block, format!("type_{}", global.name));
                self.b.member_decorate(
                    block,
                    0,
                    Decoration::Offset,
                    vec![Operand::LiteralBit32(0)],
                );
                self.decorate_matrix(block, 0, &elem, LayoutRules::Std430, module.matrix_layout);
                if !rw {
                    self.b
                        .member_decorate(block, 0, Decoration::NonWritable, vec![]);
                }
                let class = if self.version >= (1, 3) {
                    self.b.decorate(block, Decoration::Block, vec![]);
                    StorageClass::StorageBuffer
                } else {
                    self.b.decorate(block, Decoration::BufferBlock, vec![]);
                    StorageClass::Uniform
                };
                let ptr = self.pointer(class, block);
                Ok(GlobalInfo {
                    var: self.b.variable(ptr, None, class, None),
                    class,
                })
            }
            other => Err(internal(format!(
                "'{}' has unexpected resource type {:?}",
                global.name, other
            ))),
        }
    }

    fn declare_interface(&mut self, entry: &EntryPoint, is_output: bool) -> Vec<Word> {
        let varyings = if is_output {
            &entry.outputs
        } else {
            &entry.inputs
        };
        let class = if is_output {
            StorageClass::Output
        } else {
            StorageClass::Input
        };
        let mut vars = Vec::with_capacity(varyings.len());
        for varying in varyings {
            let natural = interface_type(varying);
            let ty = self.type_id(&natural);
            let ptr = self.pointer(class, ty);
            let var = self.b.variable(ptr, None, class, None);
            match varying.builtin {
                Some(builtin) => {
                    match builtin {
                        BuiltIn::SampleIndex => self.require(Capability::SampleRateShading),
                        BuiltIn::PrimitiveId => self.require(Capability::Geometry),
                        _ => {}
                    }
                    self.b.name(var, format!("gl_{:?}", spirv_builtin(builtin)));
                    self.b.decorate(
                        var,
                        Decoration::BuiltIn,
                        vec![Operand::BuiltIn(spirv_builtin(builtin))],
                    );
                }
                None => {
                    let prefix = if is_output { "out" } else { "in" };
                    self.b.name(
                        var,
                        format!("{}.var.{}{}", prefix, varying.semantic.name, varying.semantic.index),
                    );
                    self.b.decorate(
                        var,
                        Decoration::Location,
                        vec![Operand::LiteralBit32(varying.location)],
                    );
                    if !is_output && entry.stage == ShaderStage::Pixel {
                        self.decorate_interpolation(var, varying);
                    }
                }
            }
            vars.push(var);
        }
        vars
    }

    fn decorate_interpolation(&mut self, var: Word, varying: &Varying) {
        let integer = varying.ty.scalar().is_some_and(|s| !s.is_float());
        let decoration = match varying.interpolation {
            _ if integer => Some(Decoration::Flat),
            Some(Interpolation::NoInterpolation) => Some(Decoration::Flat),
            Some(Interpolation::NoPerspective) => Some(Decoration::NoPerspective),
            Some(Interpolation::Centroid) => Some(Decoration::Centroid),
            Some(Interpolation::Sample) => {
                self.require(Capability::SampleRateShading);
                Some(Decoration::Sample)
            }
            Some(Interpolation::Linear) | None => None,
        };
        if let Some(decoration) = decoration {
            self.b.decorate(var, decoration, vec![]);
        }
    }

    // Functions

    fn write_function(&mut self, handle: Handle<Function>, function: &'a Function, is_entry: bool) -> Result<()> {
        let result = self.type_id(&function.result);
        let mut param_types = Vec::with_capacity(function.params.len());
        for param in &function.params {
            let ty = self.type_id(&function.locals[param.local].ty);
            param_types.push(match param.direction {
                ParamDirection::In => ty,
                _ => self.pointer(StorageClass::Function, ty),
            });
        }
        let fn_type = self.b.type_function(result, param_types.clone());
        let id = self.functions[handle.index()];
        self.b
            .begin_function(result, Some(id), FunctionControl::NONE, fn_type)
            .built()?;
        let name = if is_entry {
            format!("src.{}", function.name)
        } else {
            function.name.clone()
        };
        self.b.name(id, name);
        let mut params = Vec::with_capacity(param_types.len());
        for ty in &param_types {
            params.push(self.b.function_parameter(*ty).built()?);
        }
        self.b.begin_block(None).built()?;

        let mut fs = FunctionState::new(function);
        for (h, local) in function.locals.iter() {
            let param = function.params.iter().position(|p| p.local == h);
            let ptr = match param {
                Some(i) if function.params[i].direction != ParamDirection::In => params[i],
                _ if local.ty.is_resource() => 0,
                _ => {
                    let var = self.function_variable(&local.ty)?;
                    self.b.name(var, local.name.clone());
                    var
                }
            };
            fs.locals.push(ptr);
        }
        self.allocate_spills(&mut fs, &function.body)?;
        for (i, param) in function.params.iter().enumerate() {
            if param.direction == ParamDirection::In {
                let var = fs.locals[param.local.index()];
                self.store_ptr(var, params[i])?;
            }
        }

        self.block(&mut fs, &function.body)?;
        if !fs.terminated {
            if function.result == Type::Void {
                self.b.ret().built()?;
            } else {
                self.b.unreachable().built()?;
            }
        }
        self.b.end_function().built()
    }

    /// The `void()` function the entry point names: loads the inputs, calls
    /// the HLSL entry function and stores the outputs.
    fn write_wrapper(
        &mut self,
        entry: &EntryPoint,
        inputs: &[Word],
        outputs: &[Word],
        deferred: &[Handle<GlobalVariable>],
    ) -> Result<Word> {
        let module = self.module;
        let function = &module.functions[entry.function];
        let void = self.type_id(&Type::Void);
        let fn_type = self.b.type_function(void, Vec::<Word>::new());
        let id = self
            .b
            .begin_function(void, None, FunctionControl::NONE, fn_type)
            .built()?;
        self.b.name(id, entry.name.clone());
        self.b.begin_block(None).built()?;

        let mut fs = FunctionState::new(function);
        let mut param_vars = Vec::with_capacity(function.params.len());
        for param in &function.params {
            let local = &function.locals[param.local];
            let var = self.function_variable(&local.ty)?;
            self.b.name(var, format!("param.var.{}", local.name));
            param_vars.push(var);
        }
        for &h in deferred {
            if let Some(init) = &module.globals[h].init {
                let value = self.expr(&mut fs, init)?;
                let var = self.globals[h.index()].var;
                self.store_ptr(var, value)?;
            }
        }

        for (varying, &var) in entry.inputs.iter().zip(inputs) {
            let VaryingSource::Param { index, path } = &varying.source else {
                continue;
            };
            let natural = interface_type(varying);
            let ty = self.type_id(&natural);
            let loaded = self.load_ptr(ty, var)?;
            let value = self.adapt(loaded, &natural, &varying.ty)?;
            let param = &function.params[*index];
            let base_ty = function.locals[param.local].ty.clone();
            let target = self.access_path(param_vars[*index], &base_ty, path)?;
            self.store_ptr(target, value)?;
        }

        let mut args = Vec::with_capacity(function.params.len());
        for (param, &var) in function.params.iter().zip(&param_vars) {
            args.push(match param.direction {
                ParamDirection::In => {
                    let ty = self.type_id(&function.locals[param.local].ty);
                    self.load_ptr(ty, var)?
                }
                _ => var,
            });
        }
        let result_ty = self.type_id(&function.result);
        let mut call = vec![self.functions[entry.function.index()]];
        call.extend(args);
        let result = self.op(Op::FunctionCall, result_ty, &call)?;

        for (varying, &var) in entry.outputs.iter().zip(outputs) {
            let value = match &varying.source {
                VaryingSource::Result { path } if path.is_empty() => result,
                VaryingSource::Result { path } => {
                    let ty = self.type_id(&varying.ty);
                    self.extract(ty, result, path)?
                }
                VaryingSource::Param { index, path } => {
                    let param = &function.params[*index];
                    let base_ty = function.locals[param.local].ty.clone();
                    let ptr = self.access_path(param_vars[*index], &base_ty, path)?;
                    let ty = self.type_id(&varying.ty);
                    self.load_ptr(ty, ptr)?
                }
            };
            let natural = interface_type(varying);
            let value = self.adapt(value, &varying.ty, &natural)?;
            self.store_ptr(var, value)?;
        }
        self.b.ret().built()?;
        self.b.end_function().built()?;
        Ok(id)
    }

    /// Pointer to the leaf `path` names inside a function variable.
    fn access_path(&mut self, base: Word, ty: &Type, path: &[u32]) -> Result<Word> {
        if path.is_empty() {
            return Ok(base);
        }
        let mut leaf = ty.clone();
        let mut indices = Vec::with_capacity(path.len());
        for &index in path {
            leaf = match &leaf {
                Type::Struct(_) => self.module.member_type(&leaf, index),
                other => crate::ir::element_type(other),
            };
            indices.push(self.const_u32(index));
        }
        let leaf = self.type_id(&leaf);
        let ptr = self.pointer(StorageClass::Function, leaf);
        let mut operands = vec![base];
        operands.extend(indices);
        self.op(Op::AccessChain, ptr, &operands)
    }

    fn function_variable(&mut self, ty: &Type) -> Result<Word> {
        let ty = self.type_id(ty);
        let ptr = self.pointer(StorageClass::Function, ty);
        self.inst(
            Op::Variable,
            ptr,
            vec![Operand::StorageClass(StorageClass::Function)],
        )
    }

    /// Arrays and matrices indexed with a non-constant value are stored to a
    /// variable first; those variables must open the function.
    fn allocate_spills(&mut self, fs: &mut FunctionState, body: &Block) -> Result<()> {
        let mut types = Vec::new();
        for_each_expr(body, &mut |e| {
            if let ExprKind::Index { base, index } = &e.kind {
                if index.as_literal().is_none()
                    && matches!(base.ty, Type::Array(..) | Type::Matrix { .. })
                    && !types.contains(&base.ty)
                {
                    types.push(base.ty.clone());
                }
            }
        });
        for ty in types {
            let var = self.function_variable(&ty)?;
            fs.spills.insert(ty, var);
        }
        Ok(())
    }

    // Instructions

    fn inst(&mut self, code: Op, ty: Word, operands: Vec<Operand>) -> Result<Word> {
        let id = self.b.id();
        self.b
            .insert_into_block(
                InsertPoint::End,
                Instruction::new(code, Some(ty), Some(id), operands),
            )
            .built()?;
        Ok(id)
    }

    fn op(&mut self, code: Op, ty: Word, ids: &[Word]) -> Result<Word> {
        self.inst(code, ty, ids.iter().map(|&id| Operand::IdRef(id)).collect())
    }

    fn void_inst(&mut self, code: Op, operands: Vec<Operand>) -> Result<()> {
        self.b
            .insert_into_block(InsertPoint::End, Instruction::new(code, None, None, operands))
            .built()
    }

    fn load_ptr(&mut self, ty: Word, ptr: Word) -> Result<Word> {
        self.op(Op::Load, ty, &[ptr])
    }

    fn store_ptr(&mut self, ptr: Word, value: Word) -> Result<()> {
        self.void_inst(Op::Store, vec![Operand::IdRef(ptr), Operand::IdRef(value)])
    }

    fn extract(&mut self, ty: Word, composite: Word, indices: &[u32]) -> Result<Word> {
        let mut operands = vec![Operand::IdRef(composite)];
        operands.extend(indices.iter().map(|&i| Operand::LiteralBit32(i)));
        self.inst(Op::CompositeExtract, ty, operands)
    }

    fn shuffle(&mut self, ty: Word, a: Word, b: Word, components: &[u32]) -> Result<Word> {
        let mut operands = vec![Operand::IdRef(a), Operand::IdRef(b)];
        operands.extend(components.iter().map(|&c| Operand::LiteralBit32(c)));
        self.inst(Op::VectorShuffle, ty, operands)
    }

    fn ext(&mut self, ty: Word, inst: GLOp, args: &[Word]) -> Result<Word> {
        let mut operands = vec![
            Operand::IdRef(self.glsl),
            Operand::LiteralExtInstInteger(inst as u32),
        ];
        operands.extend(args.iter().map(|&a| Operand::IdRef(a)));
        self.inst(Op::ExtInst, ty, operands)
    }

    fn branch(&mut self, fs: &mut FunctionState, target: Word) -> Result<()> {
        self.b.branch(target).built()?;
        fs.terminated = true;
        Ok(())
    }

    fn start_block(&mut self, fs: &mut FunctionState, label: Word) -> Result<()> {
        self.b.begin_block(Some(label)).built()?;
        fs.terminated = false;
        Ok(())
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

    fn statement(&mut self, fs: &mut FunctionState<'a>, statement: &'a Statement) -> Result<()> {
        let module = self.module;
        match statement {
            Statement::Block(inner) => self.block(fs, inner),
            Statement::Store { place, value } => {
                let id = self.expr(fs, value)?;
                self.store_place(fs, place, id, &value.ty)
            }
            Statement::ImageStore { image, coord, value } => {
                let (info, ty) = self.resource(fs, *image)?;
                let image_ty = self.type_id(&ty);
                let image = self.load_ptr(image_ty, info.var)?;
                let coord = self.expr(fs, coord)?;
                let texel = self.expr(fs, value)?;
                let scalar = texel_scalar(value.ty.scalar().unwrap_or(Scalar::F32));
                let texel = self.adapt(texel, &value.ty, &Type::Vector(scalar, 4))?;
                self.void_inst(
                    Op::ImageWrite,
                    vec![
                        Operand::IdRef(image),
                        Operand::IdRef(coord),
                        Operand::IdRef(texel),
                    ],
                )
            }
            Statement::Call {
                function,
                args,
                result,
            } => {
                let callee = &module.functions[*function];
                let mut ids = vec![self.functions[function.index()]];
                for arg in args {
                    ids.push(match arg {
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
                let ty = self.type_id(&callee.result);
                let value = self.op(Op::FunctionCall, ty, &ids)?;
                match result {
                    Some(place) => self.store_place(fs, place, value, &callee.result),
                    None => Ok(()),
                }
            }
            Statement::If {
                condition,
                accept,
                reject,
            } => {
                let condition = self.expr(fs, condition)?;
                let merge = self.b.id();
                let accept_label = self.b.id();
                let reject_label = if reject.is_empty() { merge } else { self.b.id() };
                self.void_inst(
                    Op::SelectionMerge,
                    vec![
                        Operand::IdRef(merge),
                        Operand::SelectionControl(SelectionControl::NONE),
                    ],
                )?;
                self.b
                    .branch_conditional(condition, accept_label, reject_label, Vec::<u32>::new())
                    .built()?;
                self.start_block(fs, accept_label)?;
                self.block(fs, accept)?;
                if !fs.terminated {
                    self.branch(fs, merge)?;
                }
                if !reject.is_empty() {
                    self.start_block(fs, reject_label)?;
                    self.block(fs, reject)?;
                    if !fs.terminated {
                        self.branch(fs, merge)?;
                    }
                }
                self.start_block(fs, merge)
            }
            Statement::Loop {
                body,
                continuing,
                break_if,
            } => {
                let header = self.b.id();
                let body_label = self.b.id();
                let cont = self.b.id();
                let merge = self.b.id();
                self.branch(fs, header)?;
                self.start_block(fs, header)?;
                self.void_inst(
                    Op::LoopMerge,
                    vec![
                        Operand::IdRef(merge),
                        Operand::IdRef(cont),
                        Operand::LoopControl(LoopControl::NONE),
                    ],
                )?;
                self.branch(fs, body_label)?;

                self.start_block(fs, body_label)?;
                fs.frames.push(Frame {
                    merge,
                    cont: Some(cont),
                });
                self.block(fs, body)?;
                fs.frames.pop();
                if !fs.terminated {
                    self.branch(fs, cont)?;
                }

                self.start_block(fs, cont)?;
                self.block(fs, continuing)?;
                if !fs.terminated {
                    match break_if {
                        Some(condition) => {
                            let condition = self.expr(fs, condition)?;
                            self.b
                                .branch_conditional(condition, merge, header, Vec::<u32>::new())
                                .built()?;
                            fs.terminated = true;
                        }
                        None => self.branch(fs, header)?,
                    }
                }
                self.start_block(fs, merge)
            }
            Statement::Switch { selector, cases } => {
                let selector = self.expr(fs, selector)?;
                let merge = self.b.id();
                let mut labels: Vec<Word> = cases.iter().map(|_| self.b.id()).collect();
                // Empty cases fall into the next one and share its block
                for i in (0..cases.len()).rev() {
                    if cases[i].body.is_empty() {
                        labels[i] = labels.get(i + 1).copied().unwrap_or(merge);
                    }
                }
                let default = cases
                    .iter()
                    .position(|c| c.value.is_none())
                    .map(|i| labels[i])
                    .unwrap_or(merge);
                let targets: Vec<(Operand, Word)> = cases
                    .iter()
                    .zip(&labels)
                    .filter_map(|(case, &label)| {
                        case.value
                            .map(|value| (Operand::LiteralBit32(value as u32), label))
                    })
                    .collect();
                self.void_inst(
                    Op::SelectionMerge,
                    vec![
                        Operand::IdRef(merge),
                        Operand::SelectionControl(SelectionControl::NONE),
                    ],
                )?;
                self.b.switch(selector, default, targets).built()?;
                fs.terminated = true;
                fs.frames.push(Frame { merge, cont: None });
                for (i, case) in cases.iter().enumerate() {
                    if case.body.is_empty() {
                        continue;
                    }
                    self.start_block(fs, labels[i])?;
                    self.block(fs, &case.body)?;
                    if !fs.terminated {
                        let next = labels.get(i + 1).copied().unwrap_or(merge);
                        self.branch(fs, next)?;
                    }
                }
                fs.frames.pop();
                self.start_block(fs, merge)
            }
            Statement::Break => {
                let frame = fs
                    .frames
                    .last()
                    .copied()
                    .ok_or_else(|| internal("break outside of a loop or switch"))?;
                self.branch(fs, frame.merge)
            }
            Statement::Continue => {
                let target = fs
                    .frames
                    .iter()
                    .rev()
                    .find_map(|f| f.cont)
                    .ok_or_else(|| internal("continue outside of a loop"))?;
                self.branch(fs, target)
            }
            Statement::Return(value) => {
                match value {
                    Some(value) => {
                        let id = self.expr(fs, value)?;
                        self.b.ret_value(id).built()?;
                    }
                    None => self.b.ret().built()?,
                }
                fs.terminated = true;
                Ok(())
            }
            Statement::Discard => {
                self.b.kill().built()?;
                fs.terminated = true;
                Ok(())
            }
            Statement::Barrier { scope, sync } => {
                let (memory, semantics) = match scope {
                    MemoryScope::Group => (Scope::Workgroup, MemorySemantics::WORKGROUP_MEMORY),
                    MemoryScope::Device => (
                        Scope::Device,
                        MemorySemantics::UNIFORM_MEMORY | MemorySemantics::IMAGE_MEMORY,
                    ),
                    MemoryScope::All => (
                        Scope::Device,
                        MemorySemantics::WORKGROUP_MEMORY
                            | MemorySemantics::UNIFORM_MEMORY
                            | MemorySemantics::IMAGE_MEMORY,
                    ),
                };
                let memory = self.const_u32(memory as u32);
                let semantics = self.const_u32((semantics | MemorySemantics::ACQUIRE_RELEASE).bits());
                if *sync {
                    let execution = self.const_u32(Scope::Workgroup as u32);
                    self.void_inst(
                        Op::ControlBarrier,
                        vec![
                            Operand::IdScope(execution),
                            Operand::IdScope(memory),
                            Operand::IdMemorySemantics(semantics),
                        ],
                    )
                } else {
                    self.void_inst(
                        Op::MemoryBarrier,
                        vec![
                            Operand::IdScope(memory),
                            Operand::IdMemorySemantics(semantics),
                        ],
                    )
                }
            }
        }
    }

    // Places

    fn global(&self, h: Handle<GlobalVariable>) -> Result<GlobalInfo> {
        self.globals
            .get(h.index())
            .copied()
            .ok_or_else(|| internal("reference to an undeclared global"))
    }

    fn resource(&self, fs: &FunctionState, r: ResourceRef) -> Result<(GlobalInfo, Type)> {
        match r {
            ResourceRef::Global(h) => Ok((self.global(h)?, self.module.globals[h].ty.clone())),
            ResourceRef::Param(i) => Err(internal(format!(
                "'{}' reads resource parameter {}",
                fs.function.name, i
            ))),
        }
    }

    fn storage_class(&self, fs: &FunctionState, place: &Place) -> Result<StorageClass> {
        Ok(match place.root() {
            Place::Local(_) => StorageClass::Function,
            Place::Global(h) => self.global(*h)?.class,
            Place::CBuffer { .. } => StorageClass::Uniform,
            Place::Element { resource, .. } => self.resource(fs, *resource)?.0.class,
            _ => return Err(internal("place has no root variable")),
        })
    }

    /// Pointer to `place` and whether it holds a boolean stored as `uint`.
    fn place_ptr(&mut self, fs: &mut FunctionState<'a>, place: &Place) -> Result<(Word, bool)> {
        let module = self.module;
        let ty = fs.function.place_type(module, place);
        let in_buffer = matches!(place.root(), Place::CBuffer { .. } | Place::Element { .. });
        let stored_as_uint = in_buffer && ty.is_bool_like();
        let pointee = if stored_as_uint {
            ty.with_scalar(Scalar::U32)
        } else {
            ty
        };
        let ptr = match place {
            Place::Local(h) => fs.locals[h.index()],
            Place::Global(h) => self.global(*h)?.var,
            Place::CBuffer { buffer, member } => {
                let var = self.global(*buffer)?.var;
                let index = self.const_u32(*member);
                let pointee = self.type_id(&pointee);
                let ptr = self.pointer(StorageClass::Uniform, pointee);
                self.op(Op::AccessChain, ptr, &[var, index])?
            }
            Place::Element { resource, index } => {
                let (info, _) = self.resource(fs, *resource)?;
                let zero = self.const_u32(0);
                let index = self.expr(fs, index)?;
                let pointee = self.type_id(&pointee);
                let ptr = self.pointer(info.class, pointee);
                self.op(Op::AccessChain, ptr, &[info.var, zero, index])?
            }
            Place::Member(base, member) => {
                let (base, _) = self.place_ptr(fs, base)?;
                let class = self.storage_class(fs, place)?;
                let index = self.const_u32(*member);
                let pointee = self.type_id(&pointee);
                let ptr = self.pointer(class, pointee);
                self.op(Op::AccessChain, ptr, &[base, index])?
            }
            Place::Index(base, index) => {
                let (base, _) = self.place_ptr(fs, base)?;
                let class = self.storage_class(fs, place)?;
                let index = self.expr(fs, index)?;
                let pointee = self.type_id(&pointee);
                let ptr = self.pointer(class, pointee);
                self.op(Op::AccessChain, ptr, &[base, index])?
            }
            Place::Swizzle(..) => return Err(internal("swizzled place used as a pointer")),
        };
        Ok((ptr, stored_as_uint))
    }

    fn load_place(&mut self, fs: &mut FunctionState<'a>, place: &Place, ty: &Type) -> Result<Word> {
        if let Place::Swizzle(base, pattern) = place {
            let base_ty = fs.function.place_type(self.module, base);
            let vector = self.load_place(fs, base, &base_ty)?;
            return self.swizzle(vector, &base_ty, pattern, ty);
        }
        let (ptr, stored_as_uint) = self.place_ptr(fs, place)?;
        if stored_as_uint {
            let storage = ty.with_scalar(Scalar::U32);
            let storage_id = self.type_id(&storage);
            let raw = self.load_ptr(storage_id, ptr)?;
            let zero = self.splat_const(0.0, &storage);
            let bool_ty = self.type_id(ty);
            self.op(Op::INotEqual, bool_ty, &[raw, zero])
        } else {
            let id = self.type_id(ty);
            self.load_ptr(id, ptr)
        }
    }

    fn store_place(&mut self, fs: &mut FunctionState<'a>, place: &Place, value: Word, ty: &Type) -> Result<()> {
        if let Place::Swizzle(base, pattern) = place {
            let base_ty = fs.function.place_type(self.module, base);
            let Some(size) = base_ty.vector_size().filter(|&n| n > 1) else {
                return self.store_place(fs, base, value, &base_ty);
            };
            let old = self.load_place(fs, base, &base_ty)?;
            let base_id = self.type_id(&base_ty);
            let merged = if pattern.len() == 1 {
                self.inst(
                    Op::CompositeInsert,
                    base_id,
                    vec![
                        Operand::IdRef(value),
                        Operand::IdRef(old),
                        Operand::LiteralBit32(pattern[0] as u32),
                    ],
                )?
            } else {
                let components: Vec<u32> = (0..size as u32)
                    .map(|i| match pattern.iter().position(|&p| p as u32 == i) {
                        Some(k) => size as u32 + k as u32,
                        None => i,
                    })
                    .collect();
                self.shuffle(base_id, old, value, &components)?
            };
            return self.store_place(fs, base, merged, &base_ty);
        }
        let (ptr, stored_as_uint) = self.place_ptr(fs, place)?;
        let value = if stored_as_uint {
            let storage = ty.with_scalar(Scalar::U32);
            let storage_id = self.type_id(&storage);
            let one = self.splat_const(1.0, &storage);
            let zero = self.splat_const(0.0, &storage);
            self.op(Op::Select, storage_id, &[value, one, zero])?
        } else {
            value
        };
        self.store_ptr(ptr, value)
    }

    // Expressions

    fn expr(&mut self, fs: &mut FunctionState<'a>, expr: &Expr) -> Result<Word> {
        let ty = &expr.ty;
        match &expr.kind {
            ExprKind::Literal(value) => {
                let scalar = ty.scalar().ok_or_else(|| internal("non-scalar literal"))?;
                Ok(self.literal(*value, scalar))
            }
            ExprKind::Load(place) => self.load_place(fs, place, ty),
            ExprKind::Binary { op, left, right } => {
                let l = self.expr(fs, left)?;
                let r = self.expr(fs, right)?;
                self.binary(*op, &left.ty, ty, l, r)
            }
            ExprKind::Unary { op, expr: inner } => {
                let value = self.expr(fs, inner)?;
                self.unary(*op, ty, value)
            }
            ExprKind::Select {
                condition,
                accept,
                reject,
            } => {
                let c = self.expr(fs, condition)?;
                let a = self.expr(fs, accept)?;
                let b = self.expr(fs, reject)?;
                self.select(&condition.ty, ty, c, a, b)
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
                let id = self.type_id(ty);
                self.op(Op::Bitcast, id, &[value])
            }
            ExprKind::Swizzle { vector, pattern } => {
                let value = self.expr(fs, vector)?;
                self.swizzle(value, &vector.ty, pattern, ty)
            }
            ExprKind::Member { base, index } => {
                let value = self.expr(fs, base)?;
                let id = self.type_id(ty);
                self.extract(id, value, &[*index])
            }
            ExprKind::Index { base, index } => {
                let value = self.expr(fs, base)?;
                let id = self.type_id(ty);
                if let Some(constant) = index.as_literal() {
                    return self.extract(id, value, &[constant.as_i64() as u32]);
                }
                let index = self.expr(fs, index)?;
                if base.ty.is_vector() {
                    return self.op(Op::VectorExtractDynamic, id, &[value, index]);
                }
                let spill = fs
                    .spills
                    .get(&base.ty)
                    .copied()
                    .ok_or_else(|| internal("dynamically indexed value was not spilled"))?;
                self.store_ptr(spill, value)?;
                let ptr = self.pointer(StorageClass::Function, id);
                let element = self.op(Op::AccessChain, ptr, &[spill, index])?;
                self.load_ptr(id, element)
            }
            ExprKind::Intrinsic { fun, args } => {
                let mut ids = Vec::with_capacity(args.len());
                for arg in args {
                    ids.push(self.expr(fs, arg)?);
                }
                self.intrinsic(*fun, args, &ids, ty)
            }
            ExprKind::MatMul { left, right } => {
                let l = self.expr(fs, left)?;
                let r = self.expr(fs, right)?;
                self.matmul(&left.ty, &right.ty, ty, l, r)
            }
            ExprKind::Sample {
                texture,
                sampler,
                coord,
                level,
                offset,
                compare,
            } => {
                let (texture_info, texture_ty) = self.resource(fs, *texture)?;
                let (sampler_info, sampler_ty) = self.resource(fs, *sampler)?;
                let Type::Texture(t) = texture_ty else {
                    return Err(internal("sampling a non-texture"));
                };
                let image_ty = self.type_id(&texture_ty);
                let image = self.load_ptr(image_ty, texture_info.var)?;
                let sampler_id = self.type_id(&sampler_ty);
                let sampler = self.load_ptr(sampler_id, sampler_info.var)?;
                let sampled_ty = self.b.type_sampled_image(image_ty);
                let sampled = self.op(Op::SampledImage, sampled_ty, &[image, sampler])?;
                let coord = self.expr(fs, coord)?;

                let mut mask = ImageOperands::NONE;
                let mut extra = Vec::new();
                let mut explicit = false;
                match level {
                    SampleLevel::Auto => {}
                    SampleLevel::Bias(bias) => {
                        mask |= ImageOperands::BIAS;
                        extra.push(self.expr(fs, bias)?);
                    }
                    SampleLevel::Lod(lod) => {
                        mask |= ImageOperands::LOD;
                        extra.push(self.expr(fs, lod)?);
                        explicit = true;
                    }
                    SampleLevel::Zero => {
                        mask |= ImageOperands::LOD;
                        extra.push(self.splat_const(0.0, &Type::FLOAT));
                        explicit = true;
                    }
                    SampleLevel::Grad(dx, dy) => {
                        mask |= ImageOperands::GRAD;
                        extra.push(self.expr(fs, dx)?);
                        extra.push(self.expr(fs, dy)?);
                        explicit = true;
                    }
                }
                if let Some(offset) = offset {
                    match self.constant(offset) {
                        Some(constant) => {
                            mask |= ImageOperands::CONST_OFFSET;
                            extra.push(constant);
                        }
                        None => {
                            self.require(Capability::ImageGatherExtended);
                            mask |= ImageOperands::OFFSET;
                            extra.push(self.expr(fs, offset)?);
                        }
                    }
                }

                let mut operands = vec![Operand::IdRef(sampled), Operand::IdRef(coord)];
                let (code, result) = match compare {
                    Some(reference) => {
                        operands.push(Operand::IdRef(self.expr(fs, reference)?));
                        let code = if explicit {
                            Op::ImageSampleDrefExplicitLod
                        } else {
                            Op::ImageSampleDrefImplicitLod
                        };
                        (code, Type::Scalar(texel_scalar(t.sampled)))
                    }
                    None => {
                        let code = if explicit {
                            Op::ImageSampleExplicitLod
                        } else {
                            Op::ImageSampleImplicitLod
                        };
                        (code, Type::Vector(texel_scalar(t.sampled), 4))
                    }
                };
                if !mask.is_empty() {
                    operands.push(Operand::ImageOperands(mask));
                    operands.extend(extra.into_iter().map(Operand::IdRef));
                }
                let result_id = self.type_id(&result);
                let value = self.inst(code, result_id, operands)?;
                self.adapt(value, &result, ty)
            }
            ExprKind::ImageLoad { image, coord, lod } => {
                let (info, image_ty) = self.resource(fs, *image)?;
                let image_id = self.type_id(&image_ty);
                let loaded = self.load_ptr(image_id, info.var)?;
                let coord = self.expr(fs, coord)?;
                let (scalar, rw, multisampled, is_texture) = match &image_ty {
                    Type::Texture(t) => (t.sampled, t.rw, t.multisampled, true),
                    Type::Buffer { rw, elem, .. } => {
                        (elem.scalar().unwrap_or(Scalar::F32), *rw, false, false)
                    }
                    _ => return Err(internal("texel load from a non-image")),
                };
                let texel = Type::Vector(texel_scalar(scalar), 4);
                let texel_id = self.type_id(&texel);
                let mut operands = vec![Operand::IdRef(loaded), Operand::IdRef(coord)];
                if is_texture && !rw {
                    let level = match lod {
                        Some(lod) => self.expr(fs, lod)?,
                        None => self.literal(Literal::Int(0), Scalar::I32),
                    };
                    let mask = if multisampled {
                        ImageOperands::SAMPLE
                    } else {
                        ImageOperands::LOD
                    };
                    operands.push(Operand::ImageOperands(mask));
                    operands.push(Operand::IdRef(level));
                }
                let code = if rw { Op::ImageRead } else { Op::ImageFetch };
                let value = self.inst(code, texel_id, operands)?;
                self.adapt(value, &texel, ty)
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, operand: &Type, result: &Type, l: Word, r: Word) -> Result<Word> {
        let result_id = self.type_id(result);
        if let Type::Matrix { scalar, rows, cols } = *operand {
            let row = Type::Vector(scalar, cols);
            let row_id = self.type_id(&row);
            let result_row = crate::ir::element_type(result);
            let mut parts = Vec::with_capacity(rows as usize);
            for i in 0..rows as u32 {
                let a = self.extract(row_id, l, &[i])?;
                let b = self.extract(row_id, r, &[i])?;
                parts.push(self.binary(op, &row, &result_row, a, b)?);
            }
            return self.op(Op::CompositeConstruct, result_id, &parts);
        }
        let scalar = operand
            .scalar()
            .ok_or_else(|| internal(format!("'{}' on a non-numeric operand", op.symbol())))?;
        self.op(binary_op(op, scalar.kind), result_id, &[l, r])
    }

    fn unary(&mut self, op: UnaryOp, ty: &Type, value: Word) -> Result<Word> {
        let id = self.type_id(ty);
        if let Type::Matrix { scalar, rows, cols } = *ty {
            let row = Type::Vector(scalar, cols);
            let row_id = self.type_id(&row);
            let mut parts = Vec::with_capacity(rows as usize);
            for i in 0..rows as u32 {
                let v = self.extract(row_id, value, &[i])?;
                parts.push(self.unary(op, &row, v)?);
            }
            return self.op(Op::CompositeConstruct, id, &parts);
        }
        let float = ty.scalar().is_some_and(Scalar::is_float);
        let code = match op {
            UnaryOp::Neg if float => Op::FNegate,
            UnaryOp::Neg => Op::SNegate,
            UnaryOp::Not => Op::LogicalNot,
            UnaryOp::BitNot => Op::Not,
        };
        self.op(code, id, &[value])
    }

    fn select(&mut self, condition: &Type, ty: &Type, c: Word, a: Word, b: Word) -> Result<Word> {
        let id = self.type_id(ty);
        match *ty {
            Type::Matrix { scalar, rows, cols } => {
                let row = Type::Vector(scalar, cols);
                let row_id = self.type_id(&row);
                let mut parts = Vec::with_capacity(rows as usize);
                for i in 0..rows as u32 {
                    let x = self.extract(row_id, a, &[i])?;
                    let y = self.extract(row_id, b, &[i])?;
                    parts.push(self.select(condition, &row, c, x, y)?);
                }
                self.op(Op::CompositeConstruct, id, &parts)
            }
            Type::Vector(_, n) => {
                // Scalar conditions on vectors need SPIR-V 1.4
                let c = if condition.is_scalar() {
                    let bvec = self.type_id(&Type::Vector(Scalar::BOOL, n));
                    self.op(Op::CompositeConstruct, bvec, &vec![c; n as usize])?
                } else {
                    c
                };
                self.op(Op::Select, id, &[c, a, b])
            }
            Type::Scalar(_) => self.op(Op::Select, id, &[c, a, b]),
            _ => Err(internal("selection between aggregates")),
        }
    }

    fn construct(&mut self, ty: &Type, parts: &[Expr], ids: Vec<Word>) -> Result<Word> {
        let id = self.type_id(ty);
        match *ty {
            Type::Scalar(_) if ids.len() == 1 => Ok(ids[0]),
            Type::Matrix { scalar, rows, cols }
                if parts.iter().all(|p| p.ty.is_scalar())
                    && ids.len() == rows as usize * cols as usize =>
            {
                let row_id = self.type_id(&Type::Vector(scalar, cols));
                let mut rows_ids = Vec::with_capacity(rows as usize);
                for row in ids.chunks(cols as usize) {
                    rows_ids.push(self.op(Op::CompositeConstruct, row_id, row)?);
                }
                self.op(Op::CompositeConstruct, id, &rows_ids)
            }
            _ => self.op(Op::CompositeConstruct, id, &ids),
        }
    }

    fn splat(&mut self, ty: &Type, value: Word) -> Result<Word> {
        let id = self.type_id(ty);
        match *ty {
            Type::Vector(_, n) => self.op(Op::CompositeConstruct, id, &vec![value; n as usize]),
            Type::Matrix { scalar, rows, cols } => {
                let row = self.splat(&Type::Vector(scalar, cols), value)?;
                self.op(Op::CompositeConstruct, id, &vec![row; rows as usize])
            }
            _ => Ok(value),
        }
    }

    fn swizzle(&mut self, value: Word, base: &Type, pattern: &[u8], ty: &Type) -> Result<Word> {
        let id = self.type_id(ty);
        if base.is_scalar() {
            return if pattern.len() == 1 {
                Ok(value)
            } else {
                self.op(Op::CompositeConstruct, id, &vec![value; pattern.len()])
            };
        }
        if pattern.len() == 1 {
            return self.extract(id, value, &[pattern[0] as u32]);
        }
        let components: Vec<u32> = pattern.iter().map(|&c| c as u32).collect();
        self.shuffle(id, value, value, &components)
    }

    /// Component-wise numeric conversion between two same-shaped types.
    fn convert(&mut self, value: Word, from: &Type, to: &Type) -> Result<Word> {
        if from == to {
            return Ok(value);
        }
        let id = self.type_id(to);
        if let (Type::Matrix { rows, .. }, Type::Matrix { .. }) = (from, to) {
            let from_row = crate::ir::element_type(from);
            let to_row = crate::ir::element_type(to);
            let from_row_id = self.type_id(&from_row);
            let mut parts = Vec::with_capacity(*rows as usize);
            for i in 0..*rows as u32 {
                let row = self.extract(from_row_id, value, &[i])?;
                parts.push(self.convert(row, &from_row, &to_row)?);
            }
            return self.op(Op::CompositeConstruct, id, &parts);
        }
        let (Some(source), Some(target)) = (from.scalar(), to.scalar()) else {
            return Err(internal("conversion between non-numeric types"));
        };
        use ScalarKind::{Bool, Float, Sint, Uint};
        let code = match (source.kind, target.kind) {
            (Bool, _) => {
                let one = self.splat_const(1.0, to);
                let zero = self.splat_const(0.0, to);
                return self.op(Op::Select, id, &[value, one, zero]);
            }
            (_, Bool) => {
                let zero = self.splat_const(0.0, from);
                let code = if source.is_float() {
                    Op::FUnordNotEqual
                } else {
                    Op::INotEqual
                };
                return self.op(code, id, &[value, zero]);
            }
            (Float, Float) => Op::FConvert,
            (Float, Sint) => Op::ConvertFToS,
            (Float, Uint) => Op::ConvertFToU,
            (Sint, Float) => Op::ConvertSToF,
            (Uint, Float) => Op::ConvertUToF,
            (Sint, Sint) => Op::SConvert,
            (Uint, Uint) => Op::UConvert,
            (Sint, Uint) | (Uint, Sint) if source.width == target.width => Op::Bitcast,
            (Sint, Uint) | (Uint, Sint) => {
                let resized = from.with_scalar(Scalar::new(source.kind, target.width));
                let resized_id = self.type_id(&resized);
                let code = if source.kind == Sint {
                    Op::SConvert
                } else {
                    Op::UConvert
                };
                let widened = self.op(code, resized_id, &[value])?;
                return self.op(Op::Bitcast, id, &[widened]);
            }
        };
        self.op(code, id, &[value])
    }

    /// Resizes a scalar or vector to `to`'s component count, then converts
    /// its component type.
    fn adapt(&mut self, value: Word, from: &Type, to: &Type) -> Result<Word> {
        if from == to {
            return Ok(value);
        }
        let (Some(scalar), Some(have), Some(want)) = (from.scalar(), from.vector_size(), to.vector_size())
        else {
            return Err(internal("interface value of aggregate type"));
        };
        let resized = Type::vector(scalar, want);
        let resized_id = self.type_id(&resized);
        let value = if have > want {
            if want == 1 {
                self.extract(resized_id, value, &[0])?
            } else {
                let components: Vec<u32> = (0..want as u32).collect();
                self.shuffle(resized_id, value, value, &components)?
            }
        } else if have < want {
            let fill = self.literal(Literal::Float(0.0), scalar);
            let mut parts = vec![value];
            parts.extend(std::iter::repeat_n(fill, (want - have) as usize));
            self.op(Op::CompositeConstruct, resized_id, &parts)?
        } else {
            value
        };
        self.convert(value, &resized, to)
    }

    fn matmul(&mut self, left: &Type, right: &Type, ty: &Type, l: Word, r: Word) -> Result<Word> {
        let id = self.type_id(ty);
        let float = ty.scalar().is_some_and(Scalar::is_float);
        match (left, right) {
            (Type::Vector(..), Type::Matrix { .. }) => self.op(Op::MatrixTimesVector, id, &[r, l]),
            (Type::Matrix { .. }, Type::Vector(..)) => self.op(Op::VectorTimesMatrix, id, &[r, l]),
            (Type::Matrix { .. }, Type::Matrix { .. }) => {
                self.op(Op::MatrixTimesMatrix, id, &[r, l])
            }
            (Type::Vector(..), Type::Vector(..)) => self.dot(ty, left, l, r),
            (Type::Scalar(_), Type::Scalar(_)) => {
                let code = if float { Op::FMul } else { Op::IMul };
                self.op(code, id, &[l, r])
            }
            (Type::Scalar(_), _) => self.scale(ty, r, l),
            _ => self.scale(ty, l, r),
        }
    }

    fn scale(&mut self, ty: &Type, value: Word, factor: Word) -> Result<Word> {
        let id = self.type_id(ty);
        match ty {
            Type::Matrix { .. } => self.op(Op::MatrixTimesScalar, id, &[value, factor]),
            _ if ty.scalar().is_some_and(Scalar::is_float) => {
                self.op(Op::VectorTimesScalar, id, &[value, factor])
            }
            _ => {
                let factor = self.splat(ty, factor)?;
                self.op(Op::IMul, id, &[value, factor])
            }
        }
    }

    fn dot(&mut self, ty: &Type, operand: &Type, a: Word, b: Word) -> Result<Word> {
        let id = self.type_id(ty);
        let Some(scalar) = operand.scalar() else {
            return Err(internal("dot of non-vectors"));
        };
        if scalar.is_float() {
            return self.op(Op::Dot, id, &[a, b]);
        }
        let operand_id = self.type_id(operand);
        let product = self.op(Op::IMul, operand_id, &[a, b])?;
        let size = operand.vector_size().unwrap_or(1) as u32;
        let mut sum = self.extract(id, product, &[0])?;
        for i in 1..size {
            let component = self.extract(id, product, &[i])?;
            sum = self.op(Op::IAdd, id, &[sum, component])?;
        }
        Ok(sum)
    }

    fn intrinsic(&mut self, fun: Intrinsic, args: &[Expr], ids: &[Word], ty: &Type) -> Result<Word> {
        let id = self.type_id(ty);
        let first = args.first().map(|a| a.ty.clone()).unwrap_or(Type::Void);
        let kind = first.scalar().map(|s| s.kind).unwrap_or(ScalarKind::Float);
        let pick = |float: GLOp, sint: GLOp, uint: GLOp| match kind {
            ScalarKind::Float => float,
            ScalarKind::Sint => sint,
            _ => uint,
        };
        let gl = match fun {
            Intrinsic::Acos => GLOp::Acos,
            Intrinsic::Asin => GLOp::Asin,
            Intrinsic::Atan => GLOp::Atan,
            Intrinsic::Atan2 => GLOp::Atan2,
            Intrinsic::Ceil => GLOp::Ceil,
            Intrinsic::Cos => GLOp::Cos,
            Intrinsic::Cosh => GLOp::Cosh,
            Intrinsic::Cross => GLOp::Cross,
            Intrinsic::Degrees => GLOp::Degrees,
            Intrinsic::Determinant => GLOp::Determinant,
            Intrinsic::Distance => GLOp::Distance,
            Intrinsic::Exp => GLOp::Exp,
            Intrinsic::Exp2 => GLOp::Exp2,
            Intrinsic::FaceForward => GLOp::FaceForward,
            Intrinsic::Floor => GLOp::Floor,
            Intrinsic::Frac => GLOp::Fract,
            Intrinsic::Length => GLOp::Length,
            Intrinsic::Lerp => GLOp::FMix,
            Intrinsic::Log => GLOp::Log,
            Intrinsic::Log2 => GLOp::Log2,
            Intrinsic::Normalize => GLOp::Normalize,
            Intrinsic::Pow => GLOp::Pow,
            Intrinsic::Radians => GLOp::Radians,
            Intrinsic::Reflect => GLOp::Reflect,
            Intrinsic::Refract => GLOp::Refract,
            Intrinsic::Round => GLOp::RoundEven,
            Intrinsic::Rsqrt => GLOp::InverseSqrt,
            Intrinsic::Sin => GLOp::Sin,
            Intrinsic::Sinh => GLOp::Sinh,
            Intrinsic::Smoothstep => GLOp::SmoothStep,
            Intrinsic::Sqrt => GLOp::Sqrt,
            Intrinsic::Step => GLOp::Step,
            Intrinsic::Tan => GLOp::Tan,
            Intrinsic::Tanh => GLOp::Tanh,
            Intrinsic::Trunc => GLOp::Trunc,
            Intrinsic::Min => pick(GLOp::FMin, GLOp::SMin, GLOp::UMin),
            Intrinsic::Max => pick(GLOp::FMax, GLOp::SMax, GLOp::UMax),
            Intrinsic::Clamp => pick(GLOp::FClamp, GLOp::SClamp, GLOp::UClamp),
            Intrinsic::FirstBitHigh => pick(GLOp::FindUMsb, GLOp::FindSMsb, GLOp::FindUMsb),
            Intrinsic::FirstBitLow => GLOp::FindILsb,
            Intrinsic::Abs => match kind {
                ScalarKind::Float => GLOp::FAbs,
                ScalarKind::Sint => GLOp::SAbs,
                _ => return Ok(ids[0]),
            },
            Intrinsic::Sign => match kind {
                ScalarKind::Float => {
                    let first_id = self.type_id(&first);
                    let sign = self.ext(first_id, GLOp::FSign, ids)?;
                    return self.convert(sign, &first, ty);
                }
                ScalarKind::Sint => GLOp::SSign,
                _ => {
                    let nonzero = self.convert(ids[0], &first, &first.with_scalar(Scalar::BOOL))?;
                    return self.convert(nonzero, &first.with_scalar(Scalar::BOOL), ty);
                }
            },
            Intrinsic::Saturate => {
                let zero = self.splat_const(0.0, ty);
                let one = self.splat_const(1.0, ty);
                return self.ext(id, GLOp::FClamp, &[ids[0], zero, one]);
            }
            Intrinsic::Rcp => {
                let one = self.splat_const(1.0, ty);
                return self.op(Op::FDiv, id, &[one, ids[0]]);
            }
            Intrinsic::Log10 => {
                let log2 = self.ext(id, GLOp::Log2, ids)?;
                let factor = self.splat_const(LOG10_2, ty);
                return self.op(Op::FMul, id, &[log2, factor]);
            }
            Intrinsic::Ldexp => {
                let exponent_ty = args.get(1).map(|a| a.ty.clone()).unwrap_or(Type::FLOAT);
                let exponent_id = self.type_id(&exponent_ty);
                let scale = self.ext(exponent_id, GLOp::Exp2, &ids[1..])?;
                return self.op(Op::FMul, id, &[ids[0], scale]);
            }
            Intrinsic::Fmod => return self.op(Op::FRem, id, ids),
            Intrinsic::Mad => {
                let (mul, add) = if kind == ScalarKind::Float {
                    (Op::FMul, Op::FAdd)
                } else {
                    (Op::IMul, Op::IAdd)
                };
                let product = self.op(mul, id, &ids[..2])?;
                return self.op(add, id, &[product, ids[2]]);
            }
            Intrinsic::Dot => return self.dot(ty, &first, ids[0], ids[1]),
            Intrinsic::Transpose => return self.op(Op::Transpose, id, ids),
            Intrinsic::IsInf => return self.op(Op::IsInf, id, ids),
            Intrinsic::IsNan => return self.op(Op::IsNan, id, ids),
            Intrinsic::All | Intrinsic::Any => {
                let as_bool = first.with_scalar(Scalar::BOOL);
                let value = self.convert(ids[0], &first, &as_bool)?;
                if as_bool.is_scalar() {
                    return Ok(value);
                }
                let code = if fun == Intrinsic::All { Op::All } else { Op::Any };
                return self.op(code, id, &[value]);
            }
            Intrinsic::Ddx => return self.op(Op::DPdx, id, ids),
            Intrinsic::Ddy => return self.op(Op::DPdy, id, ids),
            Intrinsic::Fwidth => return self.op(Op::Fwidth, id, ids),
            Intrinsic::DdxCoarse | Intrinsic::DdyCoarse | Intrinsic::DdxFine | Intrinsic::DdyFine => {
                self.require(Capability::DerivativeControl);
                let code = match fun {
                    Intrinsic::DdxCoarse => Op::DPdxCoarse,
                    Intrinsic::DdyCoarse => Op::DPdyCoarse,
                    Intrinsic::DdxFine => Op::DPdxFine,
                    _ => Op::DPdyFine,
                };
                return self.op(code, id, ids);
            }
            Intrinsic::CountBits => return self.op(Op::BitCount, id, ids),
            Intrinsic::ReverseBits => return self.op(Op::BitReverse, id, ids),
        };
        self.ext(id, gl, ids)
    }
}

/// Type of the interface variable carrying `varying`.
fn interface_type(varying: &Varying) -> Type {
    match varying.builtin {
        Some(builtin) => builtin_type(builtin),
        None => varying.ty.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{EmitContext, emit};
    use super::*;
    use crate::desc::{OptionsDesc, ShadingLanguage, TargetDesc};
    use pretty_assertions::assert_eq;
    use rspirv::dr;

    fn words(module: &Module, version: Option<&str>) -> Vec<u32> {
        let options = OptionsDesc::default();
        let target = match version {
            Some(v) => TargetDesc::with_version(ShadingLanguage::SpirV, v),
            None => TargetDesc::new(ShadingLanguage::SpirV),
        };
        let output = emit(module, &EmitContext::new(&options, &target)).unwrap();
        assert!(!output.is_text);
        output.blob.to_words().unwrap()
    }

    fn has_decoration(module: &dr::Module, decoration: Decoration) -> bool {
        module.annotations.iter().any(|inst| {
            inst.operands
                .iter()
                .any(|o| *o == Operand::Decoration(decoration))
        })
    }

    #[test]
    fn test_pixel_shader_header_and_entry() {
        let module = module(PIXEL, "PS", ShaderStage::Pixel);
        let words = words(&module, None);
        assert_eq!(words[0], 0x0723_0203);
        assert_eq!(words[1], 0x0001_0000);

        let parsed = dr::load_words(&words).unwrap();
        assert_eq!(parsed.entry_points.len(), 1);
        let entry = &parsed.entry_points[0];
        assert_eq!(
            entry.operands[0],
            Operand::ExecutionModel(ExecutionModel::Fragment)
        );
        assert_eq!(entry.operands[2], Operand::LiteralString("PS".to_string()));
        assert!(parsed.execution_modes.iter().any(|inst| {
            inst.operands.get(1) == Some(&Operand::ExecutionMode(ExecutionMode::OriginUpperLeft))
        }));
        assert!(parsed
            .capabilities
            .iter()
            .any(|inst| inst.operands[0] == Operand::Capability(Capability::Shader)));
        let kills = parsed
            .functions
            .iter()
            .flat_map(|f| &f.blocks)
            .filter(|b| b.instructions.last().is_some_and(|i| i.class.opcode == Op::Kill))
            .count();
        assert_eq!(kills, 1);
        assert!(has_decoration(&parsed, Decoration::DescriptorSet));
    }

    #[test]
    fn test_requested_version_is_written() {
        let module = module(PIXEL, "PS", ShaderStage::Pixel);
        assert_eq!(words(&module, Some("1.3"))[1], 0x0001_0300);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let module = module(PIXEL, "PS", ShaderStage::Pixel);
        let options = OptionsDesc::default();
        let target = TargetDesc::with_version(ShadingLanguage::SpirV, "1.5");
        let diags = emit(&module, &EmitContext::new(&options, &target)).unwrap_err();
        let first = diags.first_error().unwrap();
        assert_eq!(first.kind, ErrorKind::TargetCapability);
        assert_eq!(first.message, "SPIR-V version 1.5 is not supported");
    }

    #[test]
    fn test_vertex_constant_buffer_layout() {
        let module = module(VERTEX, "VS", ShaderStage::Vertex);
        let parsed = dr::load_words(&words(&module, None)).unwrap();
        assert!(has_decoration(&parsed, Decoration::Block));
        assert!(has_decoration(&parsed, Decoration::ColMajor));
        assert!(has_decoration(&parsed, Decoration::MatrixStride));
        assert!(parsed.annotations.iter().any(|inst| {
            inst.operands.get(1) == Some(&Operand::Decoration(Decoration::BuiltIn))
                && inst.operands.get(2) == Some(&Operand::BuiltIn(spirv::BuiltIn::Position))
        }));
    }

    #[test]
    fn test_compute_local_size_and_buffers() {
        let module = module(COMPUTE, "CS", ShaderStage::Compute);
        let parsed = dr::load_words(&words(&module, None)).unwrap();
        let local_size = parsed
            .execution_modes
            .iter()
            .find(|inst| inst.operands.get(1) == Some(&Operand::ExecutionMode(ExecutionMode::LocalSize)))
            .unwrap();
        assert_eq!(
            local_size.operands[2..],
            [
                Operand::LiteralBit32(64),
                Operand::LiteralBit32(1),
                Operand::LiteralBit32(1)
            ]
        );
        assert!(has_decoration(&parsed, Decoration::BufferBlock));
        assert!(has_decoration(&parsed, Decoration::NonWritable));

        let parsed = dr::load_words(&words(&module, Some("1.3"))).unwrap();
        assert!(!has_decoration(&parsed, Decoration::BufferBlock));
        assert!(has_decoration(&parsed, Decoration::Block));
    }

    #[test]
    fn test_debug_info_embeds_source() {
        let mut module = module(PIXEL, "PS", ShaderStage::Pixel);
        module.debug_source = Some(PIXEL.to_string());
        let options = OptionsDesc {
            enable_debug_info: true,
            ..OptionsDesc::default()
        };
        let target = TargetDesc::new(ShadingLanguage::SpirV);
        let output = emit(&module, &EmitContext::new(&options, &target)).unwrap();
        let parsed = dr::load_words(output.blob.to_words().unwrap()).unwrap();
        assert!(parsed
            .debug_string_source
            .iter()
            .any(|inst| inst.class.opcode == Op::Source));
    }
}
