//! Expression lowering: typing, access paths, operators and assignments

use super::convert::{common_scalar, convert_scalar, matrix_row, swizzle};
use super::{Analyzer, FnCtx, SResult, Symbol};
use crate::diag::{ErrorKind, SourceLocation};
use crate::front::ast::{self, UnaryOperator};
use crate::front::token::FloatSuffix;
use crate::ir::{
    BinaryOp, BufferKind, Expr, ExprKind, GlobalKind, Literal, Place, ResourceRef, Scalar,
    ScalarKind, Statement, Type, UnaryOp, element_type,
};
use std::collections::VecDeque;

/// Result of resolving an access path (`a.b[i].xy`)
pub(super) enum Access {
    /// A memory location, with its type and whether it may be written
    Place(Place, Type, bool),
    /// An r-value, once part of the path stopped being addressable
    Value(Expr),
    /// Not an access path (or a resource name)
    Other,
}

/// Left-hand side of an assignment
pub(super) enum Target {
    Place(Place, Type),
    Image {
        image: ResourceRef,
        coord: Expr,
        ty: Type,
    },
}

impl Target {
    pub(super) fn ty(&self) -> &Type {
        match self {
            Target::Place(_, ty) | Target::Image { ty, .. } => ty,
        }
    }

    pub(super) fn load(&self) -> Expr {
        match self {
            Target::Place(place, ty) => Expr::load(place.clone(), ty.clone()),
            Target::Image { image, coord, ty } => Expr::new(
                ExprKind::ImageLoad {
                    image: *image,
                    coord: Box::new(coord.clone()),
                    lod: None,
                },
                ty.clone(),
            ),
        }
    }

    pub(super) fn store(&self, value: Expr) -> Statement {
        match self {
            Target::Place(place, _) => Statement::Store {
                place: place.clone(),
                value,
            },
            Target::Image { image, coord, .. } => Statement::ImageStore {
                image: *image,
                coord: coord.clone(),
                value,
            },
        }
    }
}

/// `xyzw`/`rgba` component selection on a vector of `size` components.
pub(super) fn parse_swizzle(name: &str, size: u8) -> Option<Vec<u8>> {
    if name.is_empty() || name.len() > 4 {
        return None;
    }
    for set in ["xyzw", "rgba"] {
        let pattern: Option<Vec<u8>> = name.chars().map(|c| set.find(c).map(|i| i as u8)).collect();
        if let Some(pattern) = pattern {
            return pattern.iter().all(|&i| i < size).then_some(pattern);
        }
    }
    None
}

/// `_m01_m10` (zero-based) or `_12_21` (one-based) matrix element selection.
pub(super) fn parse_matrix_swizzle(name: &str, rows: u8, cols: u8) -> Option<Vec<(u8, u8)>> {
    let mut rest = name;
    let mut elements = Vec::new();
    while !rest.is_empty() {
        let s = rest.strip_prefix('_')?;
        let (zero_based, s) = match s.strip_prefix('m') {
            Some(s) => (true, s),
            None => (false, s),
        };
        let bytes = s.as_bytes();
        if bytes.len() < 2 || !bytes[0].is_ascii_digit() || !bytes[1].is_ascii_digit() {
            return None;
        }
        let (mut r, mut c) = (bytes[0] - b'0', bytes[1] - b'0');
        if !zero_based {
            r = r.checked_sub(1)?;
            c = c.checked_sub(1)?;
        }
        if r >= rows || c >= cols {
            return None;
        }
        elements.push((r, c));
        rest = &s[2..];
    }
    (!elements.is_empty() && elements.len() <= 4).then_some(elements)
}

fn has_duplicates(pattern: &[u8]) -> bool {
    pattern
        .iter()
        .enumerate()
        .any(|(i, c)| pattern[..i].contains(c))
}

impl Analyzer<'_> {
    pub(super) fn lower_expr(
        &mut self,
        f: &mut FnCtx,
        e: &ast::Expr,
        out: &mut Vec<Statement>,
    ) -> SResult<Expr> {
        let loc = &e.location;
        match &e.kind {
            ast::ExprKind::Int { value, unsigned } => {
                Ok(if *unsigned || *value > i32::MAX as u64 {
                    Expr::uint(*value)
                } else {
                    Expr::int(*value as i64)
                })
            }
            ast::ExprKind::Float { value, suffix } => {
                let scalar = match suffix {
                    FloatSuffix::Half if self.options.enable_16bit_types => Scalar::F16,
                    FloatSuffix::Double => Scalar::F64,
                    _ => Scalar::F32,
                };
                Ok(Expr::literal(Literal::Float(*value), scalar))
            }
            ast::ExprKind::Bool(b) => Ok(Expr::bool(*b)),
            ast::ExprKind::Str(_) => self.fail(
                ErrorKind::Semantic,
                loc,
                "string literals are only allowed in attributes",
            ),
            ast::ExprKind::Ident(name) => match self.access(f, e, out)? {
                Access::Place(place, ty, _) => Ok(Expr::load(place, ty)),
                Access::Value(value) => Ok(value),
                Access::Other => self.fail(
                    ErrorKind::Semantic,
                    loc,
                    format!("'{}' cannot be used as a value", name),
                ),
            },
            ast::ExprKind::Member { .. } | ast::ExprKind::Index { .. } => {
                match self.access(f, e, out)? {
                    Access::Place(place, ty, _) => Ok(Expr::load(place, ty)),
                    Access::Value(value) => Ok(value),
                    Access::Other => {
                        self.fail(ErrorKind::Semantic, loc, "expression cannot be used as a value")
                    }
                }
            }
            ast::ExprKind::Unary { op, operand } => match op {
                UnaryOperator::PreInc
                | UnaryOperator::PreDec
                | UnaryOperator::PostInc
                | UnaryOperator::PostDec => {
                    let value = self.increment(f, *op, operand, loc, out, true)?;
                    value.map_or_else(
                        || self.fail(ErrorKind::Internal, loc, "increment produced no value"),
                        Ok,
                    )
                }
                _ => {
                    let value = self.lower_expr(f, operand, out)?;
                    self.unary(*op, value, loc)
                }
            },
            ast::ExprKind::Binary { op, left, right } => {
                let left = self.lower_expr(f, left, out)?;
                let right = self.lower_expr(f, right, out)?;
                self.binary(*op, left, right, loc)
            }
            ast::ExprKind::Assign { op, target, value } => {
                let result = self.assign(f, *op, target, value, loc, out, true)?;
                result.map_or_else(
                    || self.fail(ErrorKind::Internal, loc, "assignment produced no value"),
                    Ok,
                )
            }
            ast::ExprKind::Conditional {
                condition,
                accept,
                reject,
            } => self.conditional(f, condition, accept, reject, loc, out),
            ast::ExprKind::Cast { ty, operand } => {
                let target = self.resolve_type(ty)?;
                let value = self.lower_expr(f, operand, out)?;
                self.convert(value, &target, loc, true)
            }
            ast::ExprKind::Call { name, args } => match self.call(f, name, args, loc, out, true)? {
                Some(value) => Ok(value),
                None => self.fail(
                    ErrorKind::Semantic,
                    loc,
                    format!("'{}' does not return a value", name),
                ),
            },
            ast::ExprKind::Constructor { ty, args } => self.constructor(f, ty, args, loc, out),
            ast::ExprKind::MethodCall {
                object,
                method,
                args,
            } => match self.method_call(f, object, method, args, loc, out, true)? {
                Some(value) => Ok(value),
                None => self.fail(
                    ErrorKind::Semantic,
                    loc,
                    format!("'{}' does not return a value", method),
                ),
            },
            ast::ExprKind::Comma(first, second) => {
                self.lower_effect(f, first, out)?;
                self.lower_expr(f, second, out)
            }
        }
    }

    /// Lowers an expression evaluated only for its side effects.
    pub(super) fn lower_effect(
        &mut self,
        f: &mut FnCtx,
        e: &ast::Expr,
        out: &mut Vec<Statement>,
    ) -> SResult<()> {
        let loc = &e.location;
        match &e.kind {
            ast::ExprKind::Assign { op, target, value } => {
                self.assign(f, *op, target, value, loc, out, false)?;
            }
            ast::ExprKind::Unary {
                op:
                    op @ (UnaryOperator::PreInc
                    | UnaryOperator::PreDec
                    | UnaryOperator::PostInc
                    | UnaryOperator::PostDec),
                operand,
            } => {
                self.increment(f, *op, operand, loc, out, false)?;
            }
            ast::ExprKind::Call { name, args } => {
                self.call(f, name, args, loc, out, false)?;
            }
            ast::ExprKind::MethodCall {
                object,
                method,
                args,
            } => {
                self.method_call(f, object, method, args, loc, out, false)?;
            }
            ast::ExprKind::Comma(first, second) => {
                self.lower_effect(f, first, out)?;
                self.lower_effect(f, second, out)?;
            }
            _ => {
                self.lower_expr(f, e, out)?;
            }
        }
        Ok(())
    }

    /// Resolves identifiers, members and subscripts to places where possible.
    pub(super) fn access(
        &mut self,
        f: &mut FnCtx,
        e: &ast::Expr,
        out: &mut Vec<Statement>,
    ) -> SResult<Access> {
        let loc = &e.location;
        match &e.kind {
            ast::ExprKind::Ident(name) => match self.lookup(f, name) {
                None => self.fail(
                    ErrorKind::Semantic,
                    loc,
                    format!("use of undeclared identifier '{}'", name),
                ),
                Some(Symbol::Local(h)) => Ok(Access::Place(
                    Place::Local(h),
                    f.locals[h].ty.clone(),
                    !f.const_locals.contains(&h),
                )),
                Some(Symbol::Global(h)) => {
                    let global = &self.module.globals[h];
                    match global.kind {
                        GlobalKind::Private | GlobalKind::Workgroup => Ok(Access::Place(
                            Place::Global(h),
                            global.ty.clone(),
                            !global.is_const,
                        )),
                        _ => Ok(Access::Other),
                    }
                }
                Some(Symbol::CBufferMember { buffer, member }) => {
                    let ty = self
                        .module
                        .cbuffer_member(buffer, member)
                        .map(|m| m.ty.clone())
                        .unwrap_or(Type::Void);
                    Ok(Access::Place(Place::CBuffer { buffer, member }, ty, false))
                }
                Some(Symbol::CBufferObject(_)) | Some(Symbol::ResourceParam(_)) => Ok(Access::Other),
            },
            ast::ExprKind::Member { base, name } => {
                if let ast::ExprKind::Ident(object) = &base.kind {
                    if let Some(Symbol::CBufferObject(buffer)) = self.lookup(f, object) {
                        let found = match &self.module.globals[buffer].kind {
                            GlobalKind::ConstantBuffer { members, .. } => members
                                .iter()
                                .position(|m| &m.name == name)
                                .map(|i| (i as u32, members[i].ty.clone())),
                            _ => None,
                        };
                        let Some((member, ty)) = found else {
                            return self.fail(
                                ErrorKind::Semantic,
                                loc,
                                format!("no member named '{}' in '{}'", name, object),
                            );
                        };
                        return Ok(Access::Place(Place::CBuffer { buffer, member }, ty, false));
                    }
                }
                match self.access(f, base, out)? {
                    Access::Place(place, ty, writable) => {
                        self.place_member(place, ty, writable, name, loc)
                    }
                    Access::Value(value) => Ok(Access::Value(self.member_value(value, name, loc)?)),
                    Access::Other => {
                        if self.resource_ref(f, base)?.is_some() {
                            return self.fail(
                                ErrorKind::Semantic,
                                loc,
                                format!("'{}' is not a field of a resource", name),
                            );
                        }
                        let value = self.lower_expr(f, base, out)?;
                        Ok(Access::Value(self.member_value(value, name, loc)?))
                    }
                }
            }
            ast::ExprKind::Index { base, index } => {
                if let Some((resource, ty)) = self.resource_ref(f, base)? {
                    return self.resource_index(f, resource, ty, index, loc, out);
                }
                match self.access(f, base, out)? {
                    Access::Place(place, ty, writable) => {
                        let index = self.index_value(f, index, &ty, out)?;
                        let elem = element_type(&ty);
                        Ok(Access::Place(
                            Place::Index(Box::new(place), Box::new(index)),
                            elem,
                            writable,
                        ))
                    }
                    Access::Value(value) => {
                        let index = self.index_value(f, index, &value.ty, out)?;
                        Ok(Access::Value(index_expr(value, index)))
                    }
                    Access::Other => {
                        let value = self.lower_expr(f, base, out)?;
                        let index = self.index_value(f, index, &value.ty, out)?;
                        Ok(Access::Value(index_expr(value, index)))
                    }
                }
            }
            _ => Ok(Access::Other),
        }
    }

    /// Lowers a subscript and checks it against the indexed type.
    fn index_value(
        &mut self,
        f: &mut FnCtx,
        index: &ast::Expr,
        base: &Type,
        out: &mut Vec<Statement>,
    ) -> SResult<Expr> {
        let size = match base {
            Type::Array(_, n) => *n,
            Type::Vector(_, n) => *n as u32,
            Type::Matrix { rows, .. } => *rows as u32,
            other => {
                return self.fail(
                    ErrorKind::Semantic,
                    &index.location,
                    format!(
                        "subscripted value of type '{}' is not an array, matrix, or vector",
                        self.type_name(other)
                    ),
                );
            }
        };
        let value = self.lower_expr(f, index, out)?;
        let value = match value.ty.scalar() {
            Some(s) if value.ty.is_scalar() && s.is_integer() => value,
            Some(_) if value.ty.is_scalar() => convert_scalar(value, Scalar::I32),
            _ => {
                return self.fail(
                    ErrorKind::Semantic,
                    &index.location,
                    "array subscript is not an integer",
                );
            }
        };
        if let Some(literal) = value.as_literal() {
            let i = literal.as_i64();
            if i < 0 || i >= size as i64 {
                return self.fail(
                    ErrorKind::Semantic,
                    &index.location,
                    format!("index {} is out of bounds", i),
                );
            }
        }
        Ok(value)
    }

    fn place_member(
        &mut self,
        place: Place,
        ty: Type,
        writable: bool,
        name: &str,
        loc: &SourceLocation,
    ) -> SResult<Access> {
        match &ty {
            Type::Struct(h) => {
                let decl = &self.module.structs[*h];
                match decl.member_index(name) {
                    Some(i) => {
                        let member_ty = decl.members[i].ty.clone();
                        Ok(Access::Place(
                            Place::Member(Box::new(place), i as u32),
                            member_ty,
                            writable,
                        ))
                    }
                    None => {
                        let struct_name = decl.name.clone();
                        self.fail(
                            ErrorKind::Semantic,
                            loc,
                            format!("no member named '{}' in '{}'", name, struct_name),
                        )
                    }
                }
            }
            Type::Scalar(s) | Type::Vector(s, _) => {
                let size = ty.vector_size().unwrap_or(1);
                let Some(pattern) = parse_swizzle(name, size) else {
                    return self.fail(
                        ErrorKind::Semantic,
                        loc,
                        format!("invalid swizzle '{}' on '{}'", name, self.type_name(&ty)),
                    );
                };
                if size == 1 {
                    if pattern.len() == 1 {
                        return Ok(Access::Place(place, ty, writable));
                    }
                    let value = Expr::load(place, ty.clone());
                    return Ok(Access::Value(Expr::new(
                        ExprKind::Splat(Box::new(value)),
                        Type::Vector(*s, pattern.len() as u8),
                    )));
                }
                let writable = writable && !has_duplicates(&pattern);
                let swizzled = Type::vector(*s, pattern.len() as u8);
                Ok(Access::Place(
                    Place::Swizzle(Box::new(place), pattern),
                    swizzled,
                    writable,
                ))
            }
            Type::Matrix { scalar, rows, cols } => {
                let Some(elements) = parse_matrix_swizzle(name, *rows, *cols) else {
                    return self.fail(
                        ErrorKind::Semantic,
                        loc,
                        format!("invalid matrix swizzle '{}'", name),
                    );
                };
                if let [(r, c)] = elements.as_slice() {
                    let row = Place::Index(Box::new(place), Box::new(Expr::int(*r as i64)));
                    return Ok(Access::Place(
                        Place::Swizzle(Box::new(row), vec![*c]),
                        Type::Scalar(*scalar),
                        writable,
                    ));
                }
                let value = Expr::load(place, ty.clone());
                Ok(Access::Value(self.member_value(value, name, loc)?))
            }
            other => self.fail(
                ErrorKind::Semantic,
                loc,
                format!(
                    "member reference base type '{}' is not a structure",
                    self.type_name(other)
                ),
            ),
        }
    }

    /// Member or swizzle of an r-value.
    fn member_value(&mut self, value: Expr, name: &str, loc: &SourceLocation) -> SResult<Expr> {
        match value.ty.clone() {
            Type::Struct(h) => {
                let decl = &self.module.structs[h];
                match decl.member_index(name) {
                    Some(i) => {
                        let ty = decl.members[i].ty.clone();
                        Ok(Expr::new(
                            ExprKind::Member {
                                base: Box::new(value),
                                index: i as u32,
                            },
                            ty,
                        ))
                    }
                    None => {
                        let struct_name = decl.name.clone();
                        self.fail(
                            ErrorKind::Semantic,
                            loc,
                            format!("no member named '{}' in '{}'", name, struct_name),
                        )
                    }
                }
            }
            Type::Scalar(s) | Type::Vector(s, _) => {
                let size = value.ty.vector_size().unwrap_or(1);
                let Some(pattern) = parse_swizzle(name, size) else {
                    return self.fail(
                        ErrorKind::Semantic,
                        loc,
                        format!("invalid swizzle '{}' on '{}'", name, self.type_name(&value.ty)),
                    );
                };
                if size == 1 {
                    return Ok(if pattern.len() == 1 {
                        value
                    } else {
                        Expr::new(
                            ExprKind::Splat(Box::new(value)),
                            Type::Vector(s, pattern.len() as u8),
                        )
                    });
                }
                Ok(swizzle(value, pattern))
            }
            Type::Matrix { scalar, rows, cols } => {
                let Some(elements) = parse_matrix_swizzle(name, rows, cols) else {
                    return self.fail(
                        ErrorKind::Semantic,
                        loc,
                        format!("invalid matrix swizzle '{}'", name),
                    );
                };
                let mut parts: Vec<Expr> = elements
                    .iter()
                    .map(|&(r, c)| swizzle(matrix_row(&value, r), vec![c]))
                    .collect();
                if parts.len() == 1 {
                    return Ok(parts.remove(0));
                }
                let ty = Type::Vector(scalar, parts.len() as u8);
                Ok(Expr::new(ExprKind::Construct(parts), ty))
            }
            other => self.fail(
                ErrorKind::Semantic,
                loc,
                format!(
                    "member reference base type '{}' is not a structure",
                    self.type_name(&other)
                ),
            ),
        }
    }

    /// Resolves the left-hand side of an assignment.
    pub(super) fn lower_target(
        &mut self,
        f: &mut FnCtx,
        e: &ast::Expr,
        out: &mut Vec<Statement>,
    ) -> SResult<Target> {
        if let ast::ExprKind::Index { base, index } = &e.kind {
            if let Some((image, ty)) = self.resource_ref(f, base)? {
                let (writable, coord_size, texel) = match &ty {
                    Type::Texture(t) => (
                        t.rw,
                        t.full_coord_size(),
                        Type::texel(t.sampled, t.components),
                    ),
                    Type::Buffer {
                        kind: BufferKind::Typed,
                        rw,
                        elem,
                    } => (*rw, 1, (**elem).clone()),
                    _ => (true, 0, Type::Void),
                };
                if coord_size > 0 {
                    if !writable {
                        return self.fail(
                            ErrorKind::Semantic,
                            &e.location,
                            "cannot assign to a read-only resource",
                        );
                    }
                    let coord = self.lower_expr(f, index, out)?;
                    let coord = self.convert(
                        coord,
                        &Type::vector(Scalar::I32, coord_size),
                        &index.location,
                        false,
                    )?;
                    return Ok(Target::Image {
                        image,
                        coord,
                        ty: texel,
                    });
                }
            }
        }
        match self.access(f, e, out)? {
            Access::Place(place, ty, true) => Ok(Target::Place(place, ty)),
            Access::Place(..) => self.fail(
                ErrorKind::Semantic,
                &e.location,
                "cannot assign to a read-only location",
            ),
            _ => self.fail(ErrorKind::Semantic, &e.location, "expression is not assignable"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn assign(
        &mut self,
        f: &mut FnCtx,
        op: Option<BinaryOp>,
        target: &ast::Expr,
        value: &ast::Expr,
        loc: &SourceLocation,
        out: &mut Vec<Statement>,
        want_value: bool,
    ) -> SResult<Option<Expr>> {
        let target = self.lower_target(f, target, out)?;
        let rhs = self.lower_expr(f, value, out)?;
        let rhs = match op {
            Some(op) => self.binary(op, target.load(), rhs, loc)?,
            None => rhs,
        };
        let rhs = self.convert(rhs, target.ty(), loc, false)?;
        out.push(target.store(rhs));
        Ok(want_value.then(|| target.load()))
    }

    fn increment(
        &mut self,
        f: &mut FnCtx,
        op: UnaryOperator,
        operand: &ast::Expr,
        loc: &SourceLocation,
        out: &mut Vec<Statement>,
        want_value: bool,
    ) -> SResult<Option<Expr>> {
        let target = self.lower_target(f, operand, out)?;
        let ty = target.ty().clone();
        if !matches!(ty, Type::Scalar(_) | Type::Vector(..)) || ty.is_bool_like() {
            return self.fail(
                ErrorKind::Semantic,
                loc,
                format!("cannot increment value of type '{}'", self.type_name(&ty)),
            );
        }
        let (delta, prefix) = match op {
            UnaryOperator::PreInc => (BinaryOp::Add, true),
            UnaryOperator::PreDec => (BinaryOp::Sub, true),
            UnaryOperator::PostInc => (BinaryOp::Add, false),
            _ => (BinaryOp::Sub, false),
        };
        let current = target.load();
        let updated = self.binary(delta, current.clone(), Expr::int(1), loc)?;
        let updated = self.convert(updated, &ty, loc, true)?;
        let saved = if want_value && !prefix {
            let tmp = f.temp(ty.clone());
            out.push(Statement::Store {
                place: Place::Local(tmp),
                value: current.clone(),
            });
            Some(Expr::load(Place::Local(tmp), ty))
        } else {
            None
        };
        out.push(target.store(updated));
        Ok(match (want_value, prefix) {
            (false, _) => None,
            (true, true) => Some(target.load()),
            (true, false) => saved,
        })
    }

    pub(super) fn unary(&mut self, op: UnaryOperator, value: Expr, loc: &SourceLocation) -> SResult<Expr> {
        if !value.ty.is_numeric() {
            return self.fail(
                ErrorKind::Semantic,
                loc,
                format!(
                    "invalid argument type '{}' to unary expression",
                    self.type_name(&value.ty)
                ),
            );
        }
        match op {
            UnaryOperator::Plus => Ok(value),
            UnaryOperator::Neg => {
                let value = if value.ty.is_bool_like() {
                    let ty = value.ty.with_scalar(Scalar::I32);
                    self.convert(value, &ty, loc, true)?
                } else {
                    value
                };
                if let Some(literal) = value.as_literal() {
                    let negated = match literal {
                        Literal::Int(i) => Literal::Int(i.wrapping_neg()),
                        Literal::Uint(u) => Literal::Uint((u as u32).wrapping_neg() as u64),
                        Literal::Float(v) => Literal::Float(-v),
                        Literal::Bool(b) => Literal::Int(-(b as i64)),
                    };
                    return Ok(Expr::new(ExprKind::Literal(negated), value.ty));
                }
                if let Type::Matrix { scalar, rows, cols } = value.ty {
                    let parts = (0..rows)
                        .map(|r| {
                            Expr::new(
                                ExprKind::Unary {
                                    op: UnaryOp::Neg,
                                    expr: Box::new(matrix_row(&value, r)),
                                },
                                Type::vector(scalar, cols),
                            )
                        })
                        .collect();
                    let ty = value.ty.clone();
                    return Ok(Expr::new(ExprKind::Construct(parts), ty));
                }
                let ty = value.ty.clone();
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Neg,
                        expr: Box::new(value),
                    },
                    ty,
                ))
            }
            UnaryOperator::Not => {
                if value.ty.is_matrix() {
                    return self.fail(
                        ErrorKind::UnsupportedFeature,
                        loc,
                        "logical not of a matrix is not supported",
                    );
                }
                let ty = value.ty.with_scalar(Scalar::BOOL);
                let value = self.convert(value, &ty, loc, true)?;
                if let Some(literal) = value.as_literal() {
                    return Ok(Expr::bool(!literal.as_bool()));
                }
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Not,
                        expr: Box::new(value),
                    },
                    ty,
                ))
            }
            UnaryOperator::BitNot => {
                if !value.ty.scalar().is_some_and(Scalar::is_integer) || value.ty.is_matrix() {
                    return self.fail(ErrorKind::Semantic, loc, "int or unsigned int type required");
                }
                let ty = value.ty.clone();
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::BitNot,
                        expr: Box::new(value),
                    },
                    ty,
                ))
            }
            _ => self.fail(ErrorKind::Internal, loc, "increment lowered as a plain unary"),
        }
    }

    pub(super) fn binary(
        &mut self,
        op: BinaryOp,
        left: Expr,
        right: Expr,
        loc: &SourceLocation,
    ) -> SResult<Expr> {
        if !left.ty.is_numeric() || !right.ty.is_numeric() {
            return self.fail(
                ErrorKind::Semantic,
                loc,
                format!(
                    "invalid operands to binary expression ('{}' and '{}')",
                    self.type_name(&left.ty),
                    self.type_name(&right.ty)
                ),
            );
        }
        let Some(mut scalar) = common_scalar(&left, &right) else {
            return self.fail(ErrorKind::Internal, loc, "numeric operand without a scalar type");
        };
        if op.is_logical() {
            scalar = Scalar::BOOL;
        } else if op.is_bitwise() {
            match scalar.kind {
                ScalarKind::Bool => scalar = Scalar::I32,
                ScalarKind::Float => {
                    return self.fail(ErrorKind::Semantic, loc, "int or unsigned int type required");
                }
                _ => {}
            }
        } else if scalar.kind == ScalarKind::Bool && !matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
            scalar = Scalar::I32;
        }
        let operand_ty = self.common_type(&left.ty, &right.ty, scalar, loc)?;
        let left = self.convert(left, &operand_ty, loc, false)?;
        let right = self.convert(right, &operand_ty, loc, false)?;

        if let Type::Matrix { rows, cols, .. } = operand_ty {
            if op.is_comparison() || op.is_logical() {
                return self.fail(
                    ErrorKind::UnsupportedFeature,
                    loc,
                    "component-wise matrix comparisons are not supported",
                );
            }
            let parts = (0..rows)
                .map(|r| {
                    Expr::new(
                        ExprKind::Binary {
                            op,
                            left: Box::new(matrix_row(&left, r)),
                            right: Box::new(matrix_row(&right, r)),
                        },
                        Type::vector(scalar, cols),
                    )
                })
                .collect();
            return Ok(Expr::new(ExprKind::Construct(parts), operand_ty));
        }

        let result_ty = if op.is_comparison() {
            operand_ty.with_scalar(Scalar::BOOL)
        } else {
            operand_ty
        };
        Ok(Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            result_ty,
        ))
    }

    fn conditional(
        &mut self,
        f: &mut FnCtx,
        condition: &ast::Expr,
        accept: &ast::Expr,
        reject: &ast::Expr,
        loc: &SourceLocation,
        out: &mut Vec<Statement>,
    ) -> SResult<Expr> {
        let condition = self.lower_expr(f, condition, out)?;
        let accept = self.lower_expr(f, accept, out)?;
        let reject = self.lower_expr(f, reject, out)?;

        let (ty, accept, reject) = if accept.ty.is_numeric() && reject.ty.is_numeric() {
            let scalar = common_scalar(&accept, &reject).unwrap_or(Scalar::F32);
            let ty = self.common_type(&accept.ty, &reject.ty, scalar, loc)?;
            let accept = self.convert(accept, &ty, loc, false)?;
            let reject = self.convert(reject, &ty, loc, false)?;
            (ty, accept, reject)
        } else if accept.ty == reject.ty && !accept.ty.is_resource() {
            (accept.ty.clone(), accept, reject)
        } else {
            return self.fail(
                ErrorKind::Semantic,
                loc,
                format!(
                    "incompatible operand types ('{}' and '{}')",
                    self.type_name(&accept.ty),
                    self.type_name(&reject.ty)
                ),
            );
        };

        if matches!(ty, Type::Scalar(_) | Type::Vector(..)) {
            let condition = if condition.ty.is_vector() {
                let cond_ty = ty.with_scalar(Scalar::BOOL);
                if !ty.is_vector() {
                    return self.fail(
                        ErrorKind::Semantic,
                        loc,
                        "vector condition requires vector operands",
                    );
                }
                self.convert(condition, &cond_ty, loc, false)?
            } else {
                self.to_bool(condition, loc)?
            };
            return Ok(Expr::new(
                ExprKind::Select {
                    condition: Box::new(condition),
                    accept: Box::new(accept),
                    reject: Box::new(reject),
                },
                ty,
            ));
        }

        // Composite results go through a temporary
        let condition = self.to_bool(condition, loc)?;
        let tmp = f.temp(ty.clone());
        out.push(Statement::If {
            condition,
            accept: vec![Statement::Store {
                place: Place::Local(tmp),
                value: accept,
            }],
            reject: vec![Statement::Store {
                place: Place::Local(tmp),
                value: reject,
            }],
        });
        Ok(Expr::load(Place::Local(tmp), ty))
    }

    fn constructor(
        &mut self,
        f: &mut FnCtx,
        tn: &ast::TypeName,
        args: &[ast::Expr],
        loc: &SourceLocation,
        out: &mut Vec<Statement>,
    ) -> SResult<Expr> {
        let ty = self.resolve_type(tn)?;
        if !ty.is_numeric() {
            return self.fail(
                ErrorKind::Semantic,
                loc,
                format!("'{}' cannot be constructed", self.type_name(&ty)),
            );
        }
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.lower_expr(f, arg, out)?);
        }
        let expected = ty.component_count().unwrap_or(0);
        if let [single] = values.as_slice() {
            if single.ty.is_scalar() || single.ty.component_count() == Some(expected) {
                let value = values.remove(0);
                return self.convert(value, &ty, loc, true);
            }
        }
        let mut total = 0;
        for value in &values {
            match value.ty.component_count() {
                Some(n) => total += n,
                None => {
                    return self.fail(
                        ErrorKind::Semantic,
                        loc,
                        format!(
                            "'{}' cannot be used to construct '{}'",
                            self.type_name(&value.ty),
                            self.type_name(&ty)
                        ),
                    );
                }
            }
        }
        if total != expected {
            return self.fail(
                ErrorKind::Semantic,
                loc,
                format!(
                    "too {} elements in {} initialization (expected {} elements, have {})",
                    if total < expected { "few" } else { "many" },
                    if ty.is_matrix() { "matrix" } else { "vector" },
                    expected,
                    total
                ),
            );
        }
        if let Type::Vector(scalar, _) = ty {
            if values.iter().all(|v| !v.ty.is_matrix()) {
                let mut parts = Vec::with_capacity(values.len());
                for value in values {
                    let part_ty = value.ty.with_scalar(scalar);
                    parts.push(self.convert(value, &part_ty, loc, true)?);
                }
                return Ok(Expr::new(ExprKind::Construct(parts), ty));
            }
        }
        let mut cursor = VecDeque::from(values);
        self.take_leaf(&mut cursor, &ty, loc)
    }
}

fn index_expr(base: Expr, index: Expr) -> Expr {
    let ty = element_type(&base.ty);
    Expr::new(
        ExprKind::Index {
            base: Box::new(base),
            index: Box::new(index),
        },
        ty,
    )
}

