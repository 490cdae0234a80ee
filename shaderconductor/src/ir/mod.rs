//! Target-independent intermediate representation.
//!
//! The IR is a structured tree: functions own a local-variable arena and a
//! block of statements, statements own pure expression trees. Anything with
//! side effects (calls, stores, image writes) is a statement, so expressions
//! can be evaluated, duplicated or dropped freely by the optimizer and the
//! emitters.

pub mod arena;
pub mod builder;
pub mod layout;
pub mod types;
pub mod visit;

pub use arena::{Arena, Handle};
pub use types::{
    BufferKind, Interpolation, MatrixLayout, RegisterClass, Scalar, ScalarKind, Semantic,
    StructDecl, StructMember, TextureDim, TextureType, Type,
};

use crate::ShaderModel;
use crate::desc::ShaderStage;
use crate::diag::SourceLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    LogicalAnd,
    LogicalOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor
        )
    }

    /// C-family operator spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

/// Built-in functions that survive semantic analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    Abs,
    Acos,
    Asin,
    Atan,
    Atan2,
    Ceil,
    Clamp,
    Cos,
    Cosh,
    Cross,
    Ddx,
    Ddy,
    DdxCoarse,
    DdyCoarse,
    DdxFine,
    DdyFine,
    Degrees,
    Determinant,
    Distance,
    Dot,
    Exp,
    Exp2,
    FaceForward,
    Floor,
    Fmod,
    Frac,
    Fwidth,
    IsInf,
    IsNan,
    Ldexp,
    Length,
    Lerp,
    Log,
    Log10,
    Log2,
    Mad,
    Max,
    Min,
    Normalize,
    Pow,
    Radians,
    Rcp,
    Reflect,
    Refract,
    Round,
    Rsqrt,
    Saturate,
    Sign,
    Sin,
    Sinh,
    Smoothstep,
    Sqrt,
    Step,
    Tan,
    Tanh,
    Transpose,
    Trunc,
    All,
    Any,
    CountBits,
    ReverseBits,
    FirstBitHigh,
    FirstBitLow,
}

impl Intrinsic {
    /// HLSL spelling.
    pub fn hlsl_name(self) -> &'static str {
        use Intrinsic::*;
        match self {
            Abs => "abs",
            Acos => "acos",
            Asin => "asin",
            Atan => "atan",
            Atan2 => "atan2",
            Ceil => "ceil",
            Clamp => "clamp",
            Cos => "cos",
            Cosh => "cosh",
            Cross => "cross",
            Ddx => "ddx",
            Ddy => "ddy",
            DdxCoarse => "ddx_coarse",
            DdyCoarse => "ddy_coarse",
            DdxFine => "ddx_fine",
            DdyFine => "ddy_fine",
            Degrees => "degrees",
            Determinant => "determinant",
            Distance => "distance",
            Dot => "dot",
            Exp => "exp",
            Exp2 => "exp2",
            FaceForward => "faceforward",
            Floor => "floor",
            Fmod => "fmod",
            Frac => "frac",
            Fwidth => "fwidth",
            IsInf => "isinf",
            IsNan => "isnan",
            Ldexp => "ldexp",
            Length => "length",
            Lerp => "lerp",
            Log => "log",
            Log10 => "log10",
            Log2 => "log2",
            Mad => "mad",
            Max => "max",
            Min => "min",
            Normalize => "normalize",
            Pow => "pow",
            Radians => "radians",
            Rcp => "rcp",
            Reflect => "reflect",
            Refract => "refract",
            Round => "round",
            Rsqrt => "rsqrt",
            Saturate => "saturate",
            Sign => "sign",
            Sin => "sin",
            Sinh => "sinh",
            Smoothstep => "smoothstep",
            Sqrt => "sqrt",
            Step => "step",
            Tan => "tan",
            Tanh => "tanh",
            Transpose => "transpose",
            Trunc => "trunc",
            All => "all",
            Any => "any",
            CountBits => "countbits",
            ReverseBits => "reversebits",
            FirstBitHigh => "firstbithigh",
            FirstBitLow => "firstbitlow",
        }
    }

    /// Derivatives are only defined in pixel shaders.
    pub fn is_derivative(self) -> bool {
        use Intrinsic::*;
        matches!(
            self,
            Ddx | Ddy | DdxCoarse | DdyCoarse | DdxFine | DdyFine | Fwidth
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
}

impl Literal {
    pub fn as_f64(self) -> f64 {
        match self {
            Literal::Bool(b) => b as u8 as f64,
            Literal::Int(i) => i as f64,
            Literal::Uint(u) => u as f64,
            Literal::Float(f) => f,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Literal::Bool(b) => b as i64,
            Literal::Int(i) => i,
            Literal::Uint(u) => u as i64,
            Literal::Float(f) => f as i64,
        }
    }

    pub fn as_bool(self) -> bool {
        match self {
            Literal::Bool(b) => b,
            Literal::Int(i) => i != 0,
            Literal::Uint(u) => u != 0,
            Literal::Float(f) => f != 0.0,
        }
    }

    /// Converts to the representation of `scalar`.
    pub fn cast(self, scalar: Scalar) -> Literal {
        match scalar.kind {
            ScalarKind::Bool => Literal::Bool(self.as_bool()),
            ScalarKind::Sint => {
                let value = match self {
                    Literal::Float(f) => f.trunc() as i64,
                    other => other.as_i64(),
                };
                if scalar.width == 2 {
                    Literal::Int(value as i16 as i64)
                } else {
                    Literal::Int(value as i32 as i64)
                }
            }
            ScalarKind::Uint => {
                let value = match self {
                    Literal::Float(f) => f.trunc() as i64,
                    other => other.as_i64(),
                };
                if scalar.width == 2 {
                    Literal::Uint(value as u16 as u64)
                } else {
                    Literal::Uint(value as u32 as u64)
                }
            }
            ScalarKind::Float => Literal::Float(self.as_f64()),
        }
    }

    /// Bit pattern of the literal stored as `scalar`, low 32 bits first.
    pub fn bits(self, scalar: Scalar) -> u64 {
        match (self.cast(scalar), scalar.width) {
            (Literal::Bool(b), _) => b as u64,
            (Literal::Int(i), 2) => i as i16 as u16 as u64,
            (Literal::Int(i), _) => i as i32 as u32 as u64,
            (Literal::Uint(u), 2) => u as u16 as u64,
            (Literal::Uint(u), _) => u as u32 as u64,
            (Literal::Float(f), 2) => f32_to_f16_bits(f as f32) as u64,
            (Literal::Float(f), 8) => f.to_bits(),
            (Literal::Float(f), _) => (f as f32).to_bits() as u64,
        }
    }
}

/// Round-to-nearest conversion of an `f32` to IEEE half bits.
pub fn f32_to_f16_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let mant = bits & 0x7f_ffff;
    if exp == 0xff {
        return sign | 0x7c00 | if mant != 0 { 0x200 } else { 0 };
    }
    let half_exp = exp - 127 + 15;
    if half_exp >= 0x1f {
        return sign | 0x7c00;
    }
    if half_exp <= 0 {
        if half_exp < -10 {
            return sign;
        }
        let mant = mant | 0x80_0000;
        let shift = (14 - half_exp) as u32;
        let half_mant = mant >> shift;
        let round = (mant >> (shift - 1)) & 1;
        return sign | (half_mant + round) as u16;
    }
    let half = sign as u32 | ((half_exp as u32) << 10) | (mant >> 13);
    let round = (mant >> 12) & 1;
    (half + round) as u16
}

/// Reference to a resource: a global, or a resource parameter awaiting
/// specialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    Global(Handle<GlobalVariable>),
    Param(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleLevel {
    Auto,
    Bias(Box<Expr>),
    Lod(Box<Expr>),
    Grad(Box<Expr>, Box<Expr>),
    Zero,
}

/// A typed, side-effect-free expression tree
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    /// Read of a memory location
    Load(Place),
    /// Component-wise operation; operands share a shape
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Select {
        condition: Box<Expr>,
        accept: Box<Expr>,
        reject: Box<Expr>,
    },
    /// Vector from scalars/vectors, matrix from row vectors, struct from
    /// members, array from elements
    Construct(Vec<Expr>),
    /// Scalar broadcast to `ty`
    Splat(Box<Expr>),
    /// Numeric conversion to `ty`, component-wise
    Convert(Box<Expr>),
    /// Bit reinterpretation (`asfloat`, `asuint`, `asint`)
    Bitcast(Box<Expr>),
    Swizzle {
        vector: Box<Expr>,
        pattern: Vec<u8>,
    },
    Member {
        base: Box<Expr>,
        index: u32,
    },
    /// Dynamic or constant index into an array, vector or matrix row
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Intrinsic {
        fun: Intrinsic,
        args: Vec<Expr>,
    },
    /// HLSL `mul`: vector-matrix, matrix-vector or matrix-matrix product
    MatMul {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Sample {
        texture: ResourceRef,
        sampler: ResourceRef,
        coord: Box<Expr>,
        level: SampleLevel,
        offset: Option<Box<Expr>>,
        compare: Option<Box<Expr>>,
    },
    /// Texel fetch from a texture or typed buffer
    ImageLoad {
        image: ResourceRef,
        coord: Box<Expr>,
        lod: Option<Box<Expr>>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type) -> Self {
        Expr { kind, ty }
    }

    pub fn literal(value: Literal, scalar: Scalar) -> Self {
        Expr::new(ExprKind::Literal(value.cast(scalar)), Type::Scalar(scalar))
    }

    pub fn bool(value: bool) -> Self {
        Expr::literal(Literal::Bool(value), Scalar::BOOL)
    }

    pub fn int(value: i64) -> Self {
        Expr::literal(Literal::Int(value), Scalar::I32)
    }

    pub fn uint(value: u64) -> Self {
        Expr::literal(Literal::Uint(value), Scalar::U32)
    }

    pub fn float(value: f64) -> Self {
        Expr::literal(Literal::Float(value), Scalar::F32)
    }

    pub fn load(place: Place, ty: Type) -> Self {
        Expr::new(ExprKind::Load(place), ty)
    }

    pub fn as_literal(&self) -> Option<Literal> {
        match self.kind {
            ExprKind::Literal(l) => Some(l),
            _ => None,
        }
    }

    /// Whether every leaf is a literal.
    pub fn is_constant(&self) -> bool {
        match &self.kind {
            ExprKind::Literal(_) => true,
            ExprKind::Construct(args) => args.iter().all(Expr::is_constant),
            ExprKind::Splat(e) | ExprKind::Convert(e) => e.is_constant(),
            _ => false,
        }
    }
}

/// A memory location that can be read or written
#[derive(Debug, Clone, PartialEq)]
pub enum Place {
    Local(Handle<Local>),
    /// `static` or `groupshared` global
    Global(Handle<GlobalVariable>),
    /// Member of a constant buffer
    CBuffer {
        buffer: Handle<GlobalVariable>,
        member: u32,
    },
    /// Element of a structured or byte-address buffer
    Element {
        resource: ResourceRef,
        index: Box<Expr>,
    },
    Member(Box<Place>, u32),
    Index(Box<Place>, Box<Expr>),
    Swizzle(Box<Place>, Vec<u8>),
}

impl Place {
    /// The outermost variable the place is rooted at.
    pub fn root(&self) -> &Place {
        match self {
            Place::Member(p, _) | Place::Index(p, _) | Place::Swizzle(p, _) => p.root(),
            other => other,
        }
    }

    pub fn root_local(&self) -> Option<Handle<Local>> {
        match self.root() {
            Place::Local(h) => Some(*h),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryScope {
    Group,
    Device,
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Value(Expr),
    /// Local passed to an `out`/`inout` parameter
    Ref(Handle<Local>),
    Resource(ResourceRef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// `None` for `default`
    pub value: Option<i64>,
    pub body: Block,
    pub fall_through: bool,
}

pub type Block = Vec<Statement>;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Block(Block),
    Store {
        place: Place,
        value: Expr,
    },
    ImageStore {
        image: ResourceRef,
        coord: Expr,
        value: Expr,
    },
    Call {
        function: Handle<Function>,
        args: Vec<CallArg>,
        result: Option<Place>,
    },
    If {
        condition: Expr,
        accept: Block,
        reject: Block,
    },
    /// `body` then `continuing` forever; `continue` jumps to `continuing`,
    /// `break_if` is tested after `continuing`
    Loop {
        body: Block,
        continuing: Block,
        break_if: Option<Expr>,
    },
    Switch {
        selector: Expr,
        cases: Vec<SwitchCase>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Discard,
    Barrier {
        scope: MemoryScope,
        sync: bool,
    },
}

impl Statement {
    /// Whether control never falls through to the next statement.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Statement::Break | Statement::Continue | Statement::Return(_) | Statement::Discard
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Local {
    pub name: String,
    pub ty: Type,
    pub semantic: Option<Semantic>,
    pub interpolation: Option<Interpolation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDirection {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub local: Handle<Local>,
    pub direction: ParamDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub result: Type,
    pub result_semantic: Option<Semantic>,
    pub locals: Arena<Local>,
    pub body: Block,
    pub numthreads: Option<[u32; 3]>,
    pub location: Option<SourceLocation>,
}

impl Function {
    /// Type of the value stored at `place`.
    pub fn place_type(&self, module: &Module, place: &Place) -> Type {
        match place {
            Place::Local(h) => self.locals[*h].ty.clone(),
            Place::Global(h) => module.globals[*h].ty.clone(),
            Place::CBuffer { buffer, member } => module.cbuffer_member(*buffer, *member)
                .map(|m| m.ty.clone())
                .unwrap_or(Type::Void),
            Place::Element { resource, .. } => match self.resource_type(module, *resource) {
                Type::Buffer {
                    kind: BufferKind::ByteAddress,
                    ..
                } => Type::UINT,
                Type::Buffer { elem, .. } => *elem,
                _ => Type::Void,
            },
            Place::Member(base, index) => {
                module.member_type(&self.place_type(module, base), *index)
            }
            Place::Index(base, _) => element_type(&self.place_type(module, base)),
            Place::Swizzle(base, pattern) => {
                let base = self.place_type(module, base);
                match base.scalar() {
                    Some(s) => Type::vector(s, pattern.len() as u8),
                    None => Type::Void,
                }
            }
        }
    }

    /// Type of a resource reference.
    pub fn resource_type(&self, module: &Module, resource: ResourceRef) -> Type {
        match resource {
            ResourceRef::Global(h) => module.globals[h].ty.clone(),
            ResourceRef::Param(i) => self
                .params
                .get(i as usize)
                .map(|p| self.locals[p.local].ty.clone())
                .unwrap_or(Type::Void),
        }
    }
}

/// Type of `base[i]`.
pub fn element_type(base: &Type) -> Type {
    match base {
        Type::Array(elem, _) => (**elem).clone(),
        Type::Vector(s, _) => Type::Scalar(*s),
        Type::Matrix { scalar, cols, .. } => Type::Vector(*scalar, *cols),
        _ => Type::Void,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub register: u32,
    pub space: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CBufferMember {
    pub name: String,
    pub ty: Type,
    /// Byte offset inside the buffer (HLSL packing rules)
    pub offset: u32,
    pub size: u32,
    pub matrix_layout: MatrixLayout,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlobalKind {
    /// `static` (thread-private)
    Private,
    /// `groupshared`
    Workgroup,
    /// Texture, sampler or buffer
    Resource,
    /// `cbuffer`, `ConstantBuffer<T>` or the implicit `$Globals`
    ConstantBuffer {
        members: Vec<CBufferMember>,
        size: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVariable {
    pub name: String,
    /// Value type; `Void` for constant buffers
    pub ty: Type,
    pub kind: GlobalKind,
    /// Register requested in source
    pub register: Option<(RegisterClass, u32)>,
    pub space: u32,
    /// Final binding, assigned by the IR builder after shifts
    pub binding: Option<Binding>,
    pub init: Option<Expr>,
    pub is_const: bool,
    pub location: Option<SourceLocation>,
}

impl GlobalVariable {
    pub fn register_class(&self) -> Option<RegisterClass> {
        match self.kind {
            GlobalKind::ConstantBuffer { .. } => Some(RegisterClass::ConstantBuffer),
            GlobalKind::Resource => self.ty.register_class(),
            _ => None,
        }
    }

    pub fn is_resource(&self) -> bool {
        matches!(
            self.kind,
            GlobalKind::Resource | GlobalKind::ConstantBuffer { .. }
        )
    }
}

/// Built-in variables system-value semantics map to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltIn {
    Position,
    FragCoord,
    VertexId,
    InstanceId,
    FrontFacing,
    FragDepth,
    SampleIndex,
    PrimitiveId,
    GlobalInvocationId,
    LocalInvocationId,
    WorkgroupId,
    LocalInvocationIndex,
}

/// Where a flattened interface variable lives in the entry signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaryingSource {
    Param { index: usize, path: Vec<u32> },
    Result { path: Vec<u32> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Varying {
    pub name: String,
    pub ty: Type,
    pub semantic: Semantic,
    pub builtin: Option<BuiltIn>,
    pub location: u32,
    pub interpolation: Option<Interpolation>,
    pub source: VaryingSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryPoint {
    pub name: String,
    pub stage: ShaderStage,
    pub function: Handle<Function>,
    pub inputs: Vec<Varying>,
    pub outputs: Vec<Varying>,
    pub workgroup_size: [u32; 3],
}

#[derive(Debug, Clone)]
pub struct Module {
    pub source_name: String,
    pub structs: Arena<StructDecl>,
    pub globals: Arena<GlobalVariable>,
    /// Callees precede callers once the builder has run
    pub functions: Arena<Function>,
    pub entry: Option<EntryPoint>,
    pub matrix_layout: MatrixLayout,
    pub shader_model: ShaderModel,
    pub uses_16bit: bool,
    pub uses_64bit: bool,
    /// Preprocessed source, kept when debug info is requested
    pub debug_source: Option<String>,
}

impl Module {
    pub fn new(source_name: &str) -> Self {
        Module {
            source_name: source_name.to_string(),
            structs: Arena::new(),
            globals: Arena::new(),
            functions: Arena::new(),
            entry: None,
            matrix_layout: MatrixLayout::RowMajor,
            shader_model: ShaderModel::default(),
            uses_16bit: false,
            uses_64bit: false,
            debug_source: None,
        }
    }

    pub fn cbuffer_member(&self, buffer: Handle<GlobalVariable>, member: u32) -> Option<&CBufferMember> {
        match &self.globals.get(buffer)?.kind {
            GlobalKind::ConstantBuffer { members, .. } => members.get(member as usize),
            _ => None,
        }
    }

    /// Type of member `index` of a struct type.
    pub fn member_type(&self, ty: &Type, index: u32) -> Type {
        match ty {
            Type::Struct(h) => self.structs[*h]
                .members
                .get(index as usize)
                .map(|m| m.ty.clone())
                .unwrap_or(Type::Void),
            _ => Type::Void,
        }
    }

    /// The entry point; only valid after the builder ran.
    pub fn entry(&self) -> Option<&EntryPoint> {
        self.entry.as_ref()
    }

    pub fn entry_function(&self) -> Option<&Function> {
        self.entry.as_ref().map(|e| &self.functions[e.function])
    }

    /// Resources and constant buffers in declaration order.
    pub fn resources(&self) -> impl Iterator<Item = (Handle<GlobalVariable>, &GlobalVariable)> {
        self.globals.iter().filter(|(_, g)| g.is_resource())
    }

    pub fn type_name(&self, ty: &Type) -> String {
        ty.display(&self.structs)
    }

    /// Checks that every handle in the module points into its arena.
    pub fn validate(&self) -> Result<(), String> {
        for (_, decl) in self.structs.iter() {
            for member in &decl.members {
                self.check_type(&member.ty)?;
            }
        }
        for (_, global) in self.globals.iter() {
            self.check_type(&global.ty)?;
        }
        for (handle, function) in self.functions.iter() {
            let mut error = None;
            let mut report = |message: String| {
                if error.is_none() {
                    error = Some(format!("function '{}': {}", function.name, message));
                }
            };
            for param in &function.params {
                if !function.locals.contains(param.local) {
                    report(format!("parameter local {} out of range", param.local.index()));
                }
            }
            for (_, local) in function.locals.iter() {
                if let Err(e) = self.check_type(&local.ty) {
                    report(e);
                }
            }
            visit::for_each_statement(&function.body, &mut |statement| match statement {
                Statement::Store { place, .. } => self.check_place(function, place, &mut report),
                Statement::ImageStore { image, .. } => {
                    self.check_resource(function, *image, &mut report)
                }
                Statement::Call {
                    function: callee,
                    args,
                    result,
                } => {
                    if !self.functions.contains(*callee) || *callee == handle {
                        report(format!("bad call target {}", callee.index()));
                    }
                    for arg in args {
                        match arg {
                            CallArg::Ref(local) if !function.locals.contains(*local) => {
                                report(format!("argument local {} out of range", local.index()));
                            }
                            CallArg::Resource(r) => self.check_resource(function, *r, &mut report),
                            _ => {}
                        }
                    }
                    if let Some(place) = result {
                        self.check_place(function, place, &mut report);
                    }
                }
                _ => {}
            });
            visit::for_each_expr(&function.body, &mut |expr| match &expr.kind {
                ExprKind::Load(place) => self.check_place(function, place, &mut report),
                ExprKind::Sample {
                    texture, sampler, ..
                } => {
                    self.check_resource(function, *texture, &mut report);
                    self.check_resource(function, *sampler, &mut report);
                }
                ExprKind::ImageLoad { image, .. } => {
                    self.check_resource(function, *image, &mut report)
                }
                _ => {}
            });
            if let Some(error) = error {
                return Err(error);
            }
        }
        if let Some(entry) = &self.entry {
            if !self.functions.contains(entry.function) {
                return Err("entry point function out of range".into());
            }
        }
        Ok(())
    }

    fn check_type(&self, ty: &Type) -> Result<(), String> {
        match ty {
            Type::Struct(h) if !self.structs.contains(*h) => {
                Err(format!("struct {} out of range", h.index()))
            }
            Type::Array(base, _) => self.check_type(base),
            Type::Buffer { elem, .. } => self.check_type(elem),
            _ => Ok(()),
        }
    }

    fn check_resource(&self, function: &Function, r: ResourceRef, report: &mut dyn FnMut(String)) {
        match r {
            ResourceRef::Global(h) if !self.globals.contains(h) => {
                report(format!("resource global {} out of range", h.index()))
            }
            ResourceRef::Param(i) if i as usize >= function.params.len() => {
                report(format!("resource parameter {} out of range", i))
            }
            _ => {}
        }
    }

    fn check_place(&self, function: &Function, place: &Place, report: &mut dyn FnMut(String)) {
        match place.root() {
            Place::Local(h) if !function.locals.contains(*h) => {
                report(format!("local {} out of range", h.index()))
            }
            Place::Global(h) | Place::CBuffer { buffer: h, .. } if !self.globals.contains(*h) => {
                report(format!("global {} out of range", h.index()))
            }
            Place::Element { resource, .. } => self.check_resource(function, *resource, report),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_casts() {
        assert_eq!(Literal::Float(2.7).cast(Scalar::I32), Literal::Int(2));
        assert_eq!(Literal::Int(-1).cast(Scalar::U32), Literal::Uint(0xffff_ffff));
        assert_eq!(Literal::Int(3).cast(Scalar::BOOL), Literal::Bool(true));
        assert_eq!(Literal::Float(1.0).bits(Scalar::F32), 0x3f80_0000);
        assert_eq!(Literal::Float(1.0).bits(Scalar::F16), 0x3c00);
    }

    #[test]
    fn test_half_conversion() {
        assert_eq!(f32_to_f16_bits(0.0), 0);
        assert_eq!(f32_to_f16_bits(-2.0), 0xc000);
        assert_eq!(f32_to_f16_bits(65504.0), 0x7bff);
        assert_eq!(f32_to_f16_bits(1.0e6), 0x7c00);
        assert_eq!(f32_to_f16_bits(0.5), 0x3800);
    }

    #[test]
    fn test_element_types() {
        let m = Type::Matrix {
            scalar: Scalar::F32,
            rows: 3,
            cols: 4,
        };
        assert_eq!(element_type(&m), Type::Vector(Scalar::F32, 4));
        assert_eq!(element_type(&Type::Vector(Scalar::I32, 3)), Type::INT);
        assert_eq!(
            element_type(&Type::Array(Box::new(Type::FLOAT), 8)),
            Type::FLOAT
        );
    }

    #[test]
    fn test_place_root() {
        let mut locals = Arena::new();
        let h = locals.append(Local {
            name: "v".into(),
            ty: Type::Vector(Scalar::F32, 4),
            semantic: None,
            interpolation: None,
        });
        let place = Place::Swizzle(Box::new(Place::Local(h)), vec![0, 1]);
        assert_eq!(place.root_local(), Some(h));
    }
}
