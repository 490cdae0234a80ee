//! Semantic analysis: name resolution, typing and lowering of the syntax
//! tree into IR function bodies.
//!
//! Declarations are processed in source order, the way HLSL scoping works.
//! Errors are collected in a [`Diagnostics`] list; a failing declaration is
//! skipped so later ones still report their own problems.

mod call;
mod convert;
mod expr;
mod resource;
mod stmt;

use super::ast::{self, Decl, TemplateArg, TranslationUnit, TypeName};
use crate::desc::{OptionsDesc, ShaderStage};
use crate::diag::{Diagnostics, ErrorKind, SourceLocation};
use crate::ir::{
    Arena, BufferKind, CBufferMember, Expr, ExprKind, Function, GlobalKind, GlobalVariable, Handle,
    Literal, Local, MatrixLayout, Module, Param, ParamDirection, Place, RegisterClass, Scalar,
    Semantic, Statement, StructDecl, StructMember, TextureDim, TextureType, Type, UnaryOp,
};
use std::collections::{HashMap, HashSet};

/// Front-end settings derived from the compile request
#[derive(Debug, Clone)]
pub struct SemaOptions {
    pub entry_point: String,
    pub stage: ShaderStage,
    pub enable_16bit_types: bool,
    /// Layout of matrices without an explicit `row_major`/`column_major`
    pub default_matrix_layout: MatrixLayout,
}

impl SemaOptions {
    pub fn new(entry_point: &str, stage: ShaderStage, options: &OptionsDesc) -> Self {
        SemaOptions {
            entry_point: entry_point.to_string(),
            stage,
            enable_16bit_types: options.enable_16bit_types,
            default_matrix_layout: if options.pack_matrices_in_row_major {
                MatrixLayout::RowMajor
            } else {
                MatrixLayout::ColumnMajor
            },
        }
    }
}

/// A type-checked module, ready for the IR builder
#[derive(Debug)]
pub struct Checked {
    pub module: Module,
    pub entry: Handle<Function>,
    pub stage: ShaderStage,
    pub warnings: Diagnostics,
}

pub fn analyze(
    unit: &TranslationUnit,
    options: &SemaOptions,
    source_name: &str,
) -> Result<Checked, Diagnostics> {
    let mut analyzer = Analyzer::new(options, source_name);
    let lowers_functions = !matches!(
        options.stage,
        ShaderStage::Geometry | ShaderStage::Hull | ShaderStage::Domain
    );
    for decl in &unit.decls {
        // Failures are already recorded
        let _ = match decl {
            Decl::Function(def) if !lowers_functions => analyzer.entry_stub(def),
            _ => analyzer.declaration(decl),
        };
    }
    if analyzer.diags.has_errors() {
        return Err(analyzer.diags);
    }
    let Ok(entry) = analyzer.validate_entry() else {
        return Err(analyzer.diags);
    };
    debug_log!(
        "sema: {} functions, {} globals, entry '{}'",
        analyzer.module.functions.len(),
        analyzer.module.globals.len(),
        options.entry_point
    );
    Ok(Checked {
        module: analyzer.module,
        entry,
        stage: options.stage,
        warnings: analyzer.diags,
    })
}

/// Marker for an error that has already been pushed to the diagnostics
#[derive(Debug, Clone, Copy)]
struct Reported;

type SResult<T> = Result<T, Reported>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Symbol {
    Local(Handle<Local>),
    Global(Handle<GlobalVariable>),
    CBufferMember {
        buffer: Handle<GlobalVariable>,
        member: u32,
    },
    /// A `ConstantBuffer<T>` variable; only its members can be named
    CBufferObject(Handle<GlobalVariable>),
    ResourceParam(u32),
}

#[derive(Debug, Clone)]
struct FunctionSig {
    handle: Handle<Function>,
    params: Vec<(Type, ParamDirection)>,
    result: Type,
    defined: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Breakable {
    Loop,
    Switch,
}

/// Per-function lowering state
struct FnCtx {
    locals: Arena<Local>,
    params: Vec<Param>,
    scopes: Vec<HashMap<String, Symbol>>,
    const_locals: HashSet<Handle<Local>>,
    result: Type,
    breakable: Vec<Breakable>,
    temps: u32,
}

impl FnCtx {
    fn new(result: Type) -> Self {
        FnCtx {
            locals: Arena::new(),
            params: Vec::new(),
            scopes: vec![HashMap::new()],
            const_locals: HashSet::new(),
            result,
            breakable: Vec::new(),
            temps: 0,
        }
    }

    fn lookup(&self, name: &str) -> Option<Symbol> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    /// Declares `name` in the innermost scope; false if it already exists there.
    fn declare(&mut self, name: &str, symbol: Symbol) -> bool {
        let Some(scope) = self.scopes.last_mut() else {
            return false;
        };
        if scope.contains_key(name) {
            return false;
        }
        scope.insert(name.to_string(), symbol);
        true
    }

    fn temp(&mut self, ty: Type) -> Handle<Local> {
        self.temps += 1;
        self.locals.append(Local {
            name: format!("_tmp{}", self.temps),
            ty,
            semantic: None,
            interpolation: None,
        })
    }

    fn param_type(&self, index: u32) -> Type {
        self.params
            .get(index as usize)
            .map(|p| self.locals[p.local].ty.clone())
            .unwrap_or(Type::Void)
    }
}

struct Analyzer<'a> {
    options: &'a SemaOptions,
    module: Module,
    diags: Diagnostics,
    globals: HashMap<String, Symbol>,
    types: HashMap<String, Type>,
    functions: HashMap<String, FunctionSig>,
    /// The implicit `$Globals` buffer, created on the first loose uniform
    loose_uniforms: Option<Handle<GlobalVariable>>,
}

impl<'a> Analyzer<'a> {
    fn new(options: &'a SemaOptions, source_name: &str) -> Self {
        let mut module = Module::new(source_name);
        module.matrix_layout = options.default_matrix_layout;
        Analyzer {
            options,
            module,
            diags: Diagnostics::new(),
            globals: HashMap::new(),
            types: HashMap::new(),
            functions: HashMap::new(),
            loose_uniforms: None,
        }
    }

    fn fail<T>(
        &mut self,
        kind: ErrorKind,
        location: &SourceLocation,
        message: impl Into<String>,
    ) -> SResult<T> {
        self.diags.error(kind, Some(location.clone()), message);
        Err(Reported)
    }

    fn warn(&mut self, location: &SourceLocation, message: impl Into<String>) {
        self.diags.warning(Some(location.clone()), message);
    }

    fn type_name(&self, ty: &Type) -> String {
        self.module.type_name(ty)
    }

    fn lookup(&self, f: &FnCtx, name: &str) -> Option<Symbol> {
        f.lookup(name).or_else(|| self.globals.get(name).copied())
    }

    fn declaration(&mut self, decl: &Decl) -> SResult<()> {
        match decl {
            Decl::Struct(def) => self.struct_def(def),
            Decl::Typedef(def) => {
                let base = self.resolve_type(&def.ty)?;
                let ty = self.apply_dims(base, &def.dims, &def.location)?;
                self.types.insert(def.name.clone(), ty);
                Ok(())
            }
            Decl::CBuffer(def) => self.cbuffer(def),
            Decl::Variable(var) => self.global_variable(var),
            Decl::Function(def) => self.function(def),
        }
    }

    // Types

    fn scalar_type(&mut self, name: &str, location: &SourceLocation) -> SResult<Scalar> {
        let half = self.options.enable_16bit_types;
        Ok(match name {
            "bool" => Scalar::BOOL,
            "int" | "int32_t" => Scalar::I32,
            "uint" | "dword" | "uint32_t" => Scalar::U32,
            "float" | "float32_t" => Scalar::F32,
            "double" | "float64_t" => Scalar::F64,
            "half" | "min16float" | "min10float" => {
                if half {
                    Scalar::F16
                } else {
                    Scalar::F32
                }
            }
            "min16int" | "min12int" => {
                if half {
                    Scalar::I16
                } else {
                    Scalar::I32
                }
            }
            "min16uint" => {
                if half {
                    Scalar::U16
                } else {
                    Scalar::U32
                }
            }
            "float16_t" | "int16_t" | "uint16_t" => {
                if !half {
                    return self.fail(
                        ErrorKind::UnsupportedFeature,
                        location,
                        format!("'{}' is only available with 16-bit types enabled", name),
                    );
                }
                match name {
                    "float16_t" => Scalar::F16,
                    "int16_t" => Scalar::I16,
                    _ => Scalar::U16,
                }
            }
            "int64_t" | "uint64_t" => {
                return self.fail(
                    ErrorKind::UnsupportedFeature,
                    location,
                    "64-bit integer types are not supported",
                );
            }
            other => {
                return self.fail(
                    ErrorKind::Semantic,
                    location,
                    format!("unknown type name '{}'", other),
                );
            }
        })
    }

    fn resolve_type(&mut self, tn: &TypeName) -> SResult<Type> {
        let loc = &tn.location;
        if let Some(numeric) = ast::numeric_name(&tn.name) {
            let scalar = self.scalar_type(numeric.scalar, loc)?;
            return Ok(if numeric.is_matrix {
                Type::Matrix {
                    scalar,
                    rows: numeric.rows,
                    cols: numeric.cols,
                }
            } else if numeric.is_vector {
                Type::Vector(scalar, numeric.cols)
            } else {
                Type::Scalar(scalar)
            });
        }
        if let Some(ty) = self.types.get(&tn.name) {
            return Ok(ty.clone());
        }
        let texture = |dim, arrayed, multisampled, rw| (dim, arrayed, multisampled, rw);
        let tex = match tn.name.as_str() {
            "Texture1D" => Some(texture(TextureDim::D1, false, false, false)),
            "Texture1DArray" => Some(texture(TextureDim::D1, true, false, false)),
            "Texture2D" => Some(texture(TextureDim::D2, false, false, false)),
            "Texture2DArray" => Some(texture(TextureDim::D2, true, false, false)),
            "Texture2DMS" => Some(texture(TextureDim::D2, false, true, false)),
            "Texture2DMSArray" => Some(texture(TextureDim::D2, true, true, false)),
            "Texture3D" => Some(texture(TextureDim::D3, false, false, false)),
            "TextureCube" => Some(texture(TextureDim::Cube, false, false, false)),
            "TextureCubeArray" => Some(texture(TextureDim::Cube, true, false, false)),
            "RWTexture1D" => Some(texture(TextureDim::D1, false, false, true)),
            "RWTexture1DArray" => Some(texture(TextureDim::D1, true, false, true)),
            "RWTexture2D" => Some(texture(TextureDim::D2, false, false, true)),
            "RWTexture2DArray" => Some(texture(TextureDim::D2, true, false, true)),
            "RWTexture3D" => Some(texture(TextureDim::D3, false, false, true)),
            _ => None,
        };
        if let Some((dim, arrayed, multisampled, rw)) = tex {
            let texel = self.texel_arg(tn)?;
            let (Some(sampled), Some(components)) = (texel.scalar(), texel.vector_size()) else {
                return self.fail(
                    ErrorKind::Semantic,
                    loc,
                    format!("'{}' is not a valid texel type", self.type_name(&texel)),
                );
            };
            return Ok(Type::Texture(TextureType {
                dim,
                arrayed,
                multisampled,
                sampled,
                components,
                rw,
            }));
        }
        match tn.name.as_str() {
            "void" => Ok(Type::Void),
            "vector" => match tn.args.as_slice() {
                [] => Ok(Type::Vector(Scalar::F32, 4)),
                [TemplateArg::Type(t), TemplateArg::Int(n)] if (1..=4).contains(n) => {
                    match self.resolve_type(t)? {
                        Type::Scalar(s) => Ok(Type::vector(s, *n as u8)),
                        _ => self.fail(ErrorKind::Semantic, loc, "invalid vector element type"),
                    }
                }
                _ => self.fail(ErrorKind::Semantic, loc, "invalid vector template arguments"),
            },
            "matrix" => match tn.args.as_slice() {
                [] => Ok(Type::Matrix {
                    scalar: Scalar::F32,
                    rows: 4,
                    cols: 4,
                }),
                [TemplateArg::Type(t), TemplateArg::Int(r), TemplateArg::Int(c)]
                    if (1..=4).contains(r) && (1..=4).contains(c) =>
                {
                    match self.resolve_type(t)? {
                        Type::Scalar(scalar) => Ok(Type::Matrix {
                            scalar,
                            rows: *r as u8,
                            cols: *c as u8,
                        }),
                        _ => self.fail(ErrorKind::Semantic, loc, "invalid matrix element type"),
                    }
                }
                _ => self.fail(ErrorKind::Semantic, loc, "invalid matrix template arguments"),
            },
            "Buffer" | "RWBuffer" => {
                let elem = self.texel_arg(tn)?;
                if elem.vector_size().is_none() {
                    return self.fail(
                        ErrorKind::Semantic,
                        loc,
                        "typed buffer elements must be scalars or vectors",
                    );
                }
                Ok(Type::Buffer {
                    kind: BufferKind::Typed,
                    rw: tn.name == "RWBuffer",
                    elem: Box::new(elem),
                })
            }
            "StructuredBuffer" | "RWStructuredBuffer" => {
                let elem = match tn.args.as_slice() {
                    [TemplateArg::Type(t)] => self.resolve_type(t)?,
                    _ => {
                        return self.fail(
                            ErrorKind::Semantic,
                            loc,
                            format!("'{}' requires an element type", tn.name),
                        );
                    }
                };
                if elem.is_resource() || elem == Type::Void {
                    return self.fail(ErrorKind::Semantic, loc, "invalid structured buffer element type");
                }
                Ok(Type::Buffer {
                    kind: BufferKind::Structured,
                    rw: tn.name == "RWStructuredBuffer",
                    elem: Box::new(elem),
                })
            }
            "ByteAddressBuffer" | "RWByteAddressBuffer" => Ok(Type::Buffer {
                kind: BufferKind::ByteAddress,
                rw: tn.name == "RWByteAddressBuffer",
                elem: Box::new(Type::UINT),
            }),
            "SamplerState" | "sampler" => Ok(Type::Sampler { comparison: false }),
            "SamplerComparisonState" => Ok(Type::Sampler { comparison: true }),
            "ConstantBuffer" => self.fail(
                ErrorKind::Semantic,
                loc,
                "ConstantBuffer<T> can only be declared at global scope",
            ),
            other => self.fail(
                ErrorKind::Semantic,
                loc,
                format!("unknown type name '{}'", other),
            ),
        }
    }

    /// Element type of a texture or typed buffer, `float4` when omitted.
    fn texel_arg(&mut self, tn: &TypeName) -> SResult<Type> {
        match tn.args.first() {
            None => Ok(Type::Vector(Scalar::F32, 4)),
            Some(TemplateArg::Type(t)) => self.resolve_type(t),
            Some(TemplateArg::Int(_)) => self.fail(
                ErrorKind::Semantic,
                &tn.location,
                format!("invalid template arguments for '{}'", tn.name),
            ),
        }
    }

    /// Wraps `base` in the declarator's array dimensions. The first
    /// dimension may be unsized only when `unsized` is given.
    fn apply_dims(
        &mut self,
        base: Type,
        dims: &[Option<ast::Expr>],
        location: &SourceLocation,
    ) -> SResult<Type> {
        let mut ty = base;
        for dim in dims.iter().rev() {
            let Some(dim) = dim else {
                return self.fail(ErrorKind::Semantic, location, "array size must be specified");
            };
            let size = self.const_int(dim)?;
            if size <= 0 {
                return self.fail(ErrorKind::Semantic, &dim.location, "array size must be positive");
            }
            ty = Type::Array(Box::new(ty), size as u32);
        }
        Ok(ty)
    }

    /// Evaluates an integer constant expression.
    fn const_int(&mut self, expr: &ast::Expr) -> SResult<i64> {
        let mut f = FnCtx::new(Type::Void);
        let mut scratch = Vec::new();
        let value = self.lower_expr(&mut f, expr, &mut scratch)?;
        match scratch.is_empty().then(|| self.eval_const(&value)).flatten() {
            Some(literal) if !matches!(literal, Literal::Float(_)) => Ok(literal.as_i64()),
            _ => self.fail(
                ErrorKind::Semantic,
                &expr.location,
                "expression is not an integral constant expression",
            ),
        }
    }

    /// Folds scalar integer arithmetic over literals and `static const` globals.
    fn eval_const(&self, expr: &Expr) -> Option<Literal> {
        use crate::ir::BinaryOp as B;
        match &expr.kind {
            ExprKind::Literal(l) => Some(*l),
            ExprKind::Load(Place::Global(h)) => {
                let global = &self.module.globals[*h];
                match (&global.kind, global.is_const, &global.init) {
                    (GlobalKind::Private, true, Some(init)) => self.eval_const(init),
                    _ => None,
                }
            }
            ExprKind::Convert(inner) => {
                let scalar = expr.ty.scalar()?;
                expr.ty
                    .is_scalar()
                    .then(|| self.eval_const(inner))
                    .flatten()
                    .map(|l| l.cast(scalar))
            }
            ExprKind::Unary { op, expr: inner } => {
                let value = self.eval_const(inner)?;
                match (op, value) {
                    (UnaryOp::Neg, Literal::Int(i)) => Some(Literal::Int(i.wrapping_neg())),
                    (UnaryOp::Neg, Literal::Float(v)) => Some(Literal::Float(-v)),
                    (UnaryOp::BitNot, Literal::Int(i)) => Some(Literal::Int(!i)),
                    (UnaryOp::Not, l) => Some(Literal::Bool(!l.as_bool())),
                    _ => None,
                }
            }
            ExprKind::Binary { op, left, right } => {
                let (a, b) = (self.eval_const(left)?, self.eval_const(right)?);
                if matches!(a, Literal::Float(_)) || matches!(b, Literal::Float(_)) {
                    return None;
                }
                let (a, b) = (a.as_i64(), b.as_i64());
                let value = match op {
                    B::Add => a.wrapping_add(b),
                    B::Sub => a.wrapping_sub(b),
                    B::Mul => a.wrapping_mul(b),
                    B::Div if b != 0 => a / b,
                    B::Rem if b != 0 => a % b,
                    B::Shl => a.wrapping_shl(b as u32),
                    B::Shr => a.wrapping_shr(b as u32),
                    B::BitAnd => a & b,
                    B::BitOr => a | b,
                    B::BitXor => a ^ b,
                    _ => return None,
                };
                Some(Literal::Int(value).cast(expr.ty.scalar()?))
            }
            _ => None,
        }
    }

    // Declarations

    fn struct_def(&mut self, def: &ast::StructDef) -> SResult<()> {
        if self.types.contains_key(&def.name) {
            return self.fail(
                ErrorKind::Semantic,
                &def.location,
                format!("redefinition of '{}'", def.name),
            );
        }
        let mut members: Vec<StructMember> = Vec::with_capacity(def.fields.len());
        for field in &def.fields {
            let base = self.resolve_type(&field.ty)?;
            let ty = self.apply_dims(base, &field.dims, &field.location)?;
            if ty.is_resource() || ty == Type::Void {
                return self.fail(
                    ErrorKind::UnsupportedFeature,
                    &field.location,
                    format!("invalid type for struct member '{}'", field.name),
                );
            }
            if members.iter().any(|m| m.name == field.name) {
                return self.fail(
                    ErrorKind::Semantic,
                    &field.location,
                    format!("duplicate member '{}'", field.name),
                );
            }
            members.push(StructMember {
                name: field.name.clone(),
                ty,
                semantic: field.semantic.as_deref().map(Semantic::parse),
                interpolation: field.qualifiers.interpolation,
                matrix_layout: field.qualifiers.matrix_layout,
            });
        }
        let handle = self.module.structs.append(StructDecl {
            name: def.name.clone(),
            members,
        });
        self.types.insert(def.name.clone(), Type::Struct(handle));
        Ok(())
    }

    fn declare_global(&mut self, name: &str, symbol: Symbol, location: &SourceLocation) -> SResult<()> {
        if self.globals.contains_key(name) {
            return self.fail(
                ErrorKind::Semantic,
                location,
                format!("redefinition of '{}'", name),
            );
        }
        self.globals.insert(name.to_string(), symbol);
        Ok(())
    }

    /// Checks an explicit register against the class the resource binds to.
    fn register(
        &mut self,
        register: Option<&ast::Register>,
        class: RegisterClass,
    ) -> SResult<(Option<(RegisterClass, u32)>, u32)> {
        match register {
            None => Ok((None, 0)),
            Some(reg) if reg.class != class => self.fail(
                ErrorKind::Semantic,
                &reg.location,
                format!(
                    "register class '{}' does not match the resource type, expected '{}'",
                    reg.class.prefix(),
                    class.prefix()
                ),
            ),
            Some(reg) => Ok((Some((reg.class, reg.index)), reg.space)),
        }
    }

    fn cbuffer(&mut self, def: &ast::CBufferDef) -> SResult<()> {
        if def.texture_buffer {
            return self.fail(
                ErrorKind::UnsupportedFeature,
                &def.location,
                "tbuffer is not supported",
            );
        }
        let mut members = Vec::with_capacity(def.fields.len());
        for field in &def.fields {
            let base = self.resolve_type(&field.ty)?;
            let ty = self.apply_dims(base, &field.dims, &field.location)?;
            if ty.is_resource() || ty == Type::Void {
                return self.fail(
                    ErrorKind::UnsupportedFeature,
                    &field.location,
                    format!("invalid type for constant buffer member '{}'", field.name),
                );
            }
            members.push(CBufferMember {
                name: field.name.clone(),
                ty,
                offset: 0,
                size: 0,
                matrix_layout: field
                    .qualifiers
                    .matrix_layout
                    .unwrap_or(self.options.default_matrix_layout),
            });
        }
        let (register, space) = self.register(def.register.as_ref(), RegisterClass::ConstantBuffer)?;
        let names: Vec<String> = members.iter().map(|m| m.name.clone()).collect();
        let buffer = self.module.globals.append(GlobalVariable {
            name: def.name.clone(),
            ty: Type::Void,
            kind: GlobalKind::ConstantBuffer { members, size: 0 },
            register,
            space,
            binding: None,
            init: None,
            is_const: true,
            location: Some(def.location.clone()),
        });
        for (member, name) in names.iter().enumerate() {
            self.declare_global(
                name,
                Symbol::CBufferMember {
                    buffer,
                    member: member as u32,
                },
                &def.location,
            )?;
        }
        Ok(())
    }

    /// `ConstantBuffer<T> name : register(bN);`
    fn constant_buffer_object(&mut self, var: &ast::VarDecl) -> SResult<()> {
        let elem = match var.ty.args.as_slice() {
            [TemplateArg::Type(t)] => self.resolve_type(t)?,
            _ => {
                return self.fail(
                    ErrorKind::Semantic,
                    &var.location,
                    "ConstantBuffer requires a struct type argument",
                );
            }
        };
        let Type::Struct(decl) = elem else {
            return self.fail(
                ErrorKind::Semantic,
                &var.location,
                "ConstantBuffer requires a struct type argument",
            );
        };
        if !var.dims.is_empty() {
            return self.fail(
                ErrorKind::UnsupportedFeature,
                &var.location,
                "arrays of resources are not supported",
            );
        }
        let default_layout = self.options.default_matrix_layout;
        let members = self.module.structs[decl]
            .members
            .iter()
            .map(|m| CBufferMember {
                name: m.name.clone(),
                ty: m.ty.clone(),
                offset: 0,
                size: 0,
                matrix_layout: m.matrix_layout.unwrap_or(default_layout),
            })
            .collect();
        let (register, space) = self.register(var.register.as_ref(), RegisterClass::ConstantBuffer)?;
        let buffer = self.module.globals.append(GlobalVariable {
            name: var.name.clone(),
            ty: Type::Void,
            kind: GlobalKind::ConstantBuffer { members, size: 0 },
            register,
            space,
            binding: None,
            init: None,
            is_const: true,
            location: Some(var.location.clone()),
        });
        self.declare_global(&var.name, Symbol::CBufferObject(buffer), &var.location)
    }

    fn global_variable(&mut self, var: &ast::VarDecl) -> SResult<()> {
        if var.ty.name == "ConstantBuffer" {
            return self.constant_buffer_object(var);
        }
        let base = self.resolve_type(&var.ty)?;
        if base.is_resource() {
            if !var.dims.is_empty() {
                return self.fail(
                    ErrorKind::UnsupportedFeature,
                    &var.location,
                    "arrays of resources are not supported",
                );
            }
            let class = base.register_class().unwrap_or(RegisterClass::ShaderResource);
            let (register, space) = self.register(var.register.as_ref(), class)?;
            let handle = self.module.globals.append(GlobalVariable {
                name: var.name.clone(),
                ty: base,
                kind: GlobalKind::Resource,
                register,
                space,
                binding: None,
                init: None,
                is_const: false,
                location: Some(var.location.clone()),
            });
            return self.declare_global(&var.name, Symbol::Global(handle), &var.location);
        }
        if base == Type::Void {
            return self.fail(
                ErrorKind::Semantic,
                &var.location,
                format!("variable '{}' has incomplete type 'void'", var.name),
            );
        }

        let q = &var.qualifiers;
        if q.is_static || q.groupshared {
            let mut f = FnCtx::new(Type::Void);
            let mut scratch = Vec::new();
            let (ty, init) = self.declared_value(&mut f, base, var, &mut scratch)?;
            if !scratch.is_empty() {
                return self.fail(
                    ErrorKind::Semantic,
                    &var.location,
                    "global initializers cannot call functions",
                );
            }
            let kind = if q.groupshared {
                GlobalKind::Workgroup
            } else {
                GlobalKind::Private
            };
            let handle = self.module.globals.append(GlobalVariable {
                name: var.name.clone(),
                ty,
                kind,
                register: None,
                space: 0,
                binding: None,
                init,
                is_const: q.is_const,
                location: Some(var.location.clone()),
            });
            return self.declare_global(&var.name, Symbol::Global(handle), &var.location);
        }

        // Everything else is a loose uniform packed into `$Globals`
        let ty = self.apply_dims(base, &var.dims, &var.location)?;
        let buffer = match self.loose_uniforms {
            Some(h) => h,
            None => {
                let h = self.module.globals.append(GlobalVariable {
                    name: "$Globals".into(),
                    ty: Type::Void,
                    kind: GlobalKind::ConstantBuffer {
                        members: Vec::new(),
                        size: 0,
                    },
                    register: None,
                    space: 0,
                    binding: None,
                    init: None,
                    is_const: true,
                    location: Some(var.location.clone()),
                });
                self.loose_uniforms = Some(h);
                h
            }
        };
        let matrix_layout = q.matrix_layout.unwrap_or(self.options.default_matrix_layout);
        let GlobalKind::ConstantBuffer { members, .. } = &mut self.module.globals[buffer].kind else {
            return self.fail(ErrorKind::Internal, &var.location, "$Globals is not a constant buffer");
        };
        members.push(CBufferMember {
            name: var.name.clone(),
            ty,
            offset: 0,
            size: 0,
            matrix_layout,
        });
        let member = members.len() as u32 - 1;
        self.declare_global(&var.name, Symbol::CBufferMember { buffer, member }, &var.location)
    }

    /// Resolves the declarator's array type (sizing an unsized array from
    /// its initializer list) and lowers the initializer.
    fn declared_value(
        &mut self,
        f: &mut FnCtx,
        base: Type,
        var: &ast::VarDecl,
        out: &mut Vec<Statement>,
    ) -> SResult<(Type, Option<Expr>)> {
        let is_unsized = matches!(var.dims.first(), Some(None));
        if !is_unsized {
            let ty = self.apply_dims(base, &var.dims, &var.location)?;
            let init = match &var.init {
                Some(init) => Some(self.initializer(f, init, &ty, out)?),
                None => None,
            };
            return Ok((ty, init));
        }
        let Some(ast::Initializer::List(items, list_loc)) = &var.init else {
            return self.fail(
                ErrorKind::Semantic,
                &var.location,
                format!("definition of variable '{}' with array type needs an explicit size or an initializer", var.name),
            );
        };
        let elem = self.apply_dims(base, &var.dims[1..], &var.location)?;
        let leaves = self.initializer_leaves(f, items, out)?;
        let (value, count) = self.build_unsized_array(&elem, leaves, list_loc)?;
        Ok((Type::Array(Box::new(elem), count), Some(value)))
    }

    // Functions

    /// Geometry and tessellation entries have no IR lowering. Only the
    /// entry's name and location are kept, so emission reports the stage.
    fn entry_stub(&mut self, def: &ast::FunctionDef) -> SResult<()> {
        if def.name != self.options.entry_point || def.body.is_none() {
            return Ok(());
        }
        if self.functions.contains_key(&def.name) {
            return self.fail(
                ErrorKind::Semantic,
                &def.location,
                format!("redefinition of '{}'", def.name),
            );
        }
        let attribute = |name: &str| {
            def.attributes
                .iter()
                .find(|attr| attr.name.eq_ignore_ascii_case(name))
        };
        match self.options.stage {
            ShaderStage::Geometry => {
                if !attribute("maxvertexcount").is_some_and(|attr| attr.args.len() == 1) {
                    return self.fail(
                        ErrorKind::Semantic,
                        &def.location,
                        "geometry entry point must have a valid maxvertexcount attribute",
                    );
                }
                if !def.params.iter().any(|p| p.qualifiers.primitive.is_some()) {
                    return self.fail(
                        ErrorKind::Semantic,
                        &def.location,
                        "geometry entry point input must declare a primitive type",
                    );
                }
            }
            ShaderStage::Hull | ShaderStage::Domain => {
                let domain = attribute("domain").and_then(|attr| match attr.args.as_slice() {
                    [ast::Expr {
                        kind: ast::ExprKind::Str(name),
                        ..
                    }] => Some(name.as_str()),
                    _ => None,
                });
                if !matches!(domain, Some("tri" | "quad" | "isoline")) {
                    return self.fail(
                        ErrorKind::Semantic,
                        &def.location,
                        format!(
                            "{} entry point must have a valid domain attribute",
                            if self.options.stage == ShaderStage::Hull { "hull" } else { "domain" }
                        ),
                    );
                }
            }
            _ => {}
        }
        let handle = self.module.functions.append(Function {
            name: def.name.clone(),
            params: Vec::new(),
            result: Type::Void,
            result_semantic: None,
            locals: Arena::new(),
            body: Vec::new(),
            numthreads: None,
            location: Some(def.location.clone()),
        });
        self.functions.insert(
            def.name.clone(),
            FunctionSig {
                handle,
                params: Vec::new(),
                result: Type::Void,
                defined: true,
            },
        );
        Ok(())
    }

    fn function(&mut self, def: &ast::FunctionDef) -> SResult<()> {
        let result = self.resolve_type(&def.return_type)?;
        if result.is_resource() {
            return self.fail(
                ErrorKind::UnsupportedFeature,
                &def.location,
                "functions cannot return resources",
            );
        }
        let mut signature = Vec::with_capacity(def.params.len());
        for param in &def.params {
            let base = self.resolve_type(&param.ty)?;
            let ty = self.apply_dims(base, &param.dims, &param.location)?;
            let direction = param.qualifiers.direction.unwrap_or(ParamDirection::In);
            if ty == Type::Void {
                return self.fail(ErrorKind::Semantic, &param.location, "parameter has type 'void'");
            }
            if ty.is_resource() && direction != ParamDirection::In {
                return self.fail(
                    ErrorKind::Semantic,
                    &param.location,
                    "resources can only be passed as 'in' parameters",
                );
            }
            if param.init.is_some() {
                return self.fail(
                    ErrorKind::UnsupportedFeature,
                    &param.location,
                    "default parameter values are not supported",
                );
            }
            signature.push((ty, direction));
        }

        let handle = match self.functions.get(&def.name) {
            Some(sig) if sig.defined && def.body.is_some() => {
                return self.fail(
                    ErrorKind::Semantic,
                    &def.location,
                    format!("redefinition of '{}'", def.name),
                );
            }
            Some(sig) if sig.params != signature || sig.result != result => {
                return self.fail(
                    ErrorKind::Semantic,
                    &def.location,
                    format!("conflicting types for '{}'", def.name),
                );
            }
            Some(sig) => sig.handle,
            None => {
                if self.globals.contains_key(&def.name) {
                    return self.fail(
                        ErrorKind::Semantic,
                        &def.location,
                        format!("redefinition of '{}' as a different kind of symbol", def.name),
                    );
                }
                let handle = self.module.functions.append(Function {
                    name: def.name.clone(),
                    params: Vec::new(),
                    result: result.clone(),
                    result_semantic: None,
                    locals: Arena::new(),
                    body: Vec::new(),
                    numthreads: None,
                    location: Some(def.location.clone()),
                });
                self.functions.insert(
                    def.name.clone(),
                    FunctionSig {
                        handle,
                        params: signature.clone(),
                        result: result.clone(),
                        defined: false,
                    },
                );
                handle
            }
        };

        let Some(body) = &def.body else {
            return Ok(());
        };
        // Mark as defined first so recursion resolves; the builder rejects it
        if let Some(sig) = self.functions.get_mut(&def.name) {
            sig.defined = true;
        }

        let mut f = FnCtx::new(result.clone());
        for (index, (param, (ty, direction))) in def.params.iter().zip(&signature).enumerate() {
            let local = f.locals.append(Local {
                name: param.name.clone(),
                ty: ty.clone(),
                semantic: param.semantic.as_deref().map(Semantic::parse),
                interpolation: param.qualifiers.interpolation,
            });
            let symbol = if ty.is_resource() {
                Symbol::ResourceParam(index as u32)
            } else {
                Symbol::Local(local)
            };
            if !f.declare(&param.name, symbol) {
                return self.fail(
                    ErrorKind::Semantic,
                    &param.location,
                    format!("redefinition of parameter '{}'", param.name),
                );
            }
            f.params.push(Param {
                local,
                direction: *direction,
            });
        }

        let mut block = Vec::new();
        for stmt in body {
            // Report every statement's errors, then give up on the body
            let _ = self.lower_stmt(&mut f, stmt, &mut block);
        }
        let numthreads = self.numthreads(&def.attributes)?;

        let function = &mut self.module.functions[handle];
        function.params = f.params;
        function.locals = f.locals;
        function.body = block;
        function.result_semantic = def.semantic.as_deref().map(Semantic::parse);
        function.numthreads = numthreads;
        function.location = Some(def.location.clone());
        Ok(())
    }

    fn numthreads(&mut self, attributes: &[ast::Attribute]) -> SResult<Option<[u32; 3]>> {
        let Some(attr) = attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case("numthreads"))
        else {
            return Ok(None);
        };
        if attr.args.len() != 3 {
            return self.fail(
                ErrorKind::Semantic,
                &attr.location,
                "numthreads requires three arguments",
            );
        }
        let mut size = [1u32; 3];
        for (slot, arg) in size.iter_mut().zip(&attr.args) {
            let value = self.const_int(arg)?;
            if !(1..=1024).contains(&value) {
                return self.fail(
                    ErrorKind::Semantic,
                    &arg.location,
                    "numthreads dimensions must be between 1 and 1024",
                );
            }
            *slot = value as u32;
        }
        Ok(Some(size))
    }

    // Entry point

    fn validate_entry(&mut self) -> SResult<Handle<Function>> {
        let name = self.options.entry_point.clone();
        let stage = self.options.stage;
        let handle = match self.functions.get(&name) {
            Some(sig) if sig.defined => sig.handle,
            _ => {
                self.diags.error(
                    ErrorKind::Semantic,
                    None,
                    format!("missing entry point definition '{}'", name),
                );
                return Err(Reported);
            }
        };
        let function = self.module.functions[handle].clone();
        let location = function
            .location
            .clone()
            .unwrap_or_else(|| SourceLocation::new(self.module.source_name.as_str().into(), 1, 1));

        if stage == ShaderStage::Compute {
            if function.numthreads.is_none() {
                return self.fail(
                    ErrorKind::Semantic,
                    &location,
                    "compute entry point must have a valid numthreads attribute",
                );
            }
            if function.result != Type::Void {
                return self.fail(
                    ErrorKind::Semantic,
                    &location,
                    "compute entry point must return void",
                );
            }
        }

        for param in &function.params {
            let local = &function.locals[param.local];
            if local.ty.is_resource() {
                return self.fail(
                    ErrorKind::Semantic,
                    &location,
                    format!("entry point parameter '{}' cannot be a resource", local.name),
                );
            }
            let is_output = param.direction != ParamDirection::In;
            let is_input = param.direction != ParamDirection::Out;
            if is_input {
                self.check_interface(&local.ty, local.semantic.as_ref(), false, &location)?;
            }
            if is_output {
                self.check_interface(&local.ty, local.semantic.as_ref(), true, &location)?;
            }
        }
        if function.result != Type::Void {
            self.check_interface(
                &function.result,
                function.result_semantic.as_ref(),
                true,
                &location,
            )?;
        }
        Ok(handle)
    }

    fn check_interface(
        &mut self,
        ty: &Type,
        semantic: Option<&Semantic>,
        is_output: bool,
        location: &SourceLocation,
    ) -> SResult<()> {
        if let Type::Struct(h) = ty {
            let members = self.module.structs[*h].members.clone();
            for member in &members {
                self.check_interface(&member.ty, member.semantic.as_ref(), is_output, location)?;
            }
            return Ok(());
        }
        let Some(semantic) = semantic else {
            return self.fail(
                ErrorKind::Semantic,
                location,
                format!(
                    "Semantic must be defined for all {} of an entry function or patch constant function",
                    if is_output { "outputs" } else { "parameters" }
                ),
            );
        };
        if !semantic_allowed(self.options.stage, is_output, semantic) {
            return self.fail(
                ErrorKind::Semantic,
                location,
                format!(
                    "Semantic '{}' is invalid as {} {}.",
                    semantic,
                    self.options.stage.short_name(),
                    if is_output { "Output" } else { "Input" }
                ),
            );
        }
        Ok(())
    }
}

/// Whether a semantic may appear on the given side of a stage's signature.
fn semantic_allowed(stage: ShaderStage, is_output: bool, semantic: &Semantic) -> bool {
    let key = semantic.key();
    let allowed: &[&str] = match (stage, is_output) {
        (ShaderStage::Vertex, false) => &["SV_VERTEXID", "SV_INSTANCEID"],
        (ShaderStage::Vertex, true) => &["SV_POSITION"],
        (ShaderStage::Pixel, false) => &[
            "SV_POSITION",
            "SV_ISFRONTFACE",
            "SV_SAMPLEINDEX",
            "SV_PRIMITIVEID",
        ],
        (ShaderStage::Pixel, true) => return key == "SV_TARGET" || key == "SV_DEPTH",
        (ShaderStage::Compute, false) => {
            return [
                "SV_DISPATCHTHREADID",
                "SV_GROUPTHREADID",
                "SV_GROUPID",
                "SV_GROUPINDEX",
            ]
            .contains(&key.as_str());
        }
        (ShaderStage::Compute, true) => return false,
        _ => return true,
    };
    !semantic.is_system_value() || allowed.contains(&key.as_str())
}

#[cfg(test)]
mod tests;
