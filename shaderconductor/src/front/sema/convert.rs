//! Implicit and explicit conversions, operand unification and initializer lists

use super::{Analyzer, FnCtx, SResult};
use crate::diag::{ErrorKind, SourceLocation};
use crate::front::ast;
use crate::ir::{Expr, ExprKind, Literal, Scalar, Statement, Type};
use std::collections::VecDeque;

/// Whether `expr` is a bare literal, whose type adapts to the other operand.
pub(super) fn is_literal(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Literal(_))
}

/// Common component type of two operands.
pub(super) fn common_scalar(a: &Expr, b: &Expr) -> Option<Scalar> {
    let (sa, sb) = (a.ty.scalar()?, b.ty.scalar()?);
    let (la, lb) = (is_literal(a), is_literal(b));
    if la != lb {
        let (lit, var) = if la { (sa, sb) } else { (sb, sa) };
        if lit.is_float() && !var.is_float() {
            return Some(Scalar::F32);
        }
        return Some(var);
    }
    Some(if sa.rank() >= sb.rank() { sa } else { sb })
}

/// `i`-th row of a matrix expression.
pub(super) fn matrix_row(matrix: &Expr, row: u8) -> Expr {
    let (scalar, cols) = match matrix.ty {
        Type::Matrix { scalar, cols, .. } => (scalar, cols),
        _ => (Scalar::F32, 1),
    };
    Expr::new(
        ExprKind::Index {
            base: Box::new(matrix.clone()),
            index: Box::new(Expr::int(row as i64)),
        },
        Type::vector(scalar, cols),
    )
}

pub(super) fn swizzle(vector: Expr, pattern: Vec<u8>) -> Expr {
    let scalar = vector.ty.scalar().unwrap_or(Scalar::F32);
    let ty = Type::vector(scalar, pattern.len() as u8);
    Expr::new(
        ExprKind::Swizzle {
            vector: Box::new(vector),
            pattern,
        },
        ty,
    )
}

/// Splits a composite value into its immediate parts.
pub(super) fn components(expr: &Expr, structs: &crate::ir::Arena<crate::ir::StructDecl>) -> Vec<Expr> {
    match &expr.ty {
        Type::Vector(_, n) => (0..*n).map(|i| swizzle(expr.clone(), vec![i])).collect(),
        Type::Matrix { rows, .. } => (0..*rows).map(|r| matrix_row(expr, r)).collect(),
        Type::Array(elem, n) => (0..*n)
            .map(|i| {
                Expr::new(
                    ExprKind::Index {
                        base: Box::new(expr.clone()),
                        index: Box::new(Expr::int(i as i64)),
                    },
                    (**elem).clone(),
                )
            })
            .collect(),
        Type::Struct(h) => structs[*h]
            .members
            .iter()
            .enumerate()
            .map(|(i, m)| {
                Expr::new(
                    ExprKind::Member {
                        base: Box::new(expr.clone()),
                        index: i as u32,
                    },
                    m.ty.clone(),
                )
            })
            .collect(),
        _ => vec![expr.clone()],
    }
}

/// Numeric conversion of a scalar, folded for literals.
pub(super) fn convert_scalar(expr: Expr, target: Scalar) -> Expr {
    if expr.ty == Type::Scalar(target) {
        return expr;
    }
    match expr.kind {
        ExprKind::Literal(l) => Expr::literal(l, target),
        _ => Expr::new(ExprKind::Convert(Box::new(expr)), Type::Scalar(target)),
    }
}

fn splat(scalar: Expr, ty: Type) -> Expr {
    Expr::new(ExprKind::Splat(Box::new(scalar)), ty)
}

impl Analyzer<'_> {
    pub(super) fn convert(
        &mut self,
        expr: Expr,
        target: &Type,
        location: &SourceLocation,
        explicit: bool,
    ) -> SResult<Expr> {
        if &expr.ty == target {
            return Ok(expr);
        }
        match (expr.ty.clone(), target) {
            (Type::Scalar(_), Type::Scalar(t)) => Ok(convert_scalar(expr, *t)),
            (Type::Scalar(_), Type::Vector(t, _)) => Ok(splat(convert_scalar(expr, *t), target.clone())),
            (Type::Scalar(_), Type::Matrix { scalar, rows, cols }) => {
                let row = splat(convert_scalar(expr, *scalar), Type::Vector(*scalar, *cols));
                Ok(Expr::new(
                    ExprKind::Construct(vec![row; *rows as usize]),
                    target.clone(),
                ))
            }
            (Type::Vector(_, _), Type::Scalar(t)) => {
                if !explicit {
                    self.warn(location, "implicit truncation of vector type");
                }
                Ok(convert_scalar(swizzle(expr, vec![0]), *t))
            }
            (Type::Vector(s, n), Type::Vector(t, m)) if *m <= n => {
                let value = if *m < n {
                    if !explicit {
                        self.warn(location, "implicit truncation of vector type");
                    }
                    swizzle(expr, (0..*m).collect())
                } else {
                    expr
                };
                Ok(if s == *t {
                    value
                } else {
                    match value.kind {
                        ExprKind::Splat(inner) => splat(convert_scalar(*inner, *t), target.clone()),
                        kind => Expr::new(
                            ExprKind::Convert(Box::new(Expr::new(kind, Type::Vector(s, *m)))),
                            target.clone(),
                        ),
                    }
                })
            }
            (
                Type::Matrix { rows: r0, cols: c0, .. },
                Type::Matrix { scalar, rows, cols },
            ) if *rows <= r0 && *cols <= c0 => {
                if (*rows, *cols) != (r0, c0) && !explicit {
                    self.warn(location, "implicit truncation of matrix type");
                }
                let row_ty = Type::Vector(*scalar, *cols);
                let mut parts = Vec::with_capacity(*rows as usize);
                for r in 0..*rows {
                    let row = matrix_row(&expr, r);
                    parts.push(self.convert(row, &row_ty, location, true)?);
                }
                Ok(Expr::new(ExprKind::Construct(parts), target.clone()))
            }
            (from, to)
                if from.is_numeric()
                    && to.is_numeric()
                    && from.component_count() == to.component_count() =>
            {
                let mut cursor = VecDeque::from([expr]);
                self.take_leaf(&mut cursor, to, location)
            }
            (from, to) => self.fail(
                ErrorKind::Semantic,
                location,
                format!(
                    "cannot convert from '{}' to '{}'",
                    self.type_name(&from),
                    self.type_name(to)
                ),
            ),
        }
    }

    /// Shape two operands share once broadcast, with `scalar` components.
    pub(super) fn common_type(
        &mut self,
        a: &Type,
        b: &Type,
        scalar: Scalar,
        location: &SourceLocation,
    ) -> SResult<Type> {
        Ok(match (a, b) {
            (Type::Scalar(_), Type::Scalar(_)) => Type::Scalar(scalar),
            (Type::Scalar(_), Type::Vector(_, n)) | (Type::Vector(_, n), Type::Scalar(_)) => {
                Type::Vector(scalar, *n)
            }
            (Type::Vector(_, n), Type::Vector(_, m)) => Type::Vector(scalar, (*n).min(*m)),
            (Type::Scalar(_), Type::Matrix { rows, cols, .. })
            | (Type::Matrix { rows, cols, .. }, Type::Scalar(_)) => Type::Matrix {
                scalar,
                rows: *rows,
                cols: *cols,
            },
            (
                Type::Matrix { rows: r0, cols: c0, .. },
                Type::Matrix { rows: r1, cols: c1, .. },
            ) => Type::Matrix {
                scalar,
                rows: (*r0).min(*r1),
                cols: (*c0).min(*c1),
            },
            _ => {
                return self.fail(
                    ErrorKind::Semantic,
                    location,
                    format!(
                        "invalid operands ('{}' and '{}')",
                        self.type_name(a),
                        self.type_name(b)
                    ),
                );
            }
        })
    }

    /// Lowers the initializer of a variable of type `ty`.
    pub(super) fn initializer(
        &mut self,
        f: &mut FnCtx,
        init: &ast::Initializer,
        ty: &Type,
        out: &mut Vec<Statement>,
    ) -> SResult<Expr> {
        match init {
            ast::Initializer::Expr(e) => {
                let value = self.lower_expr(f, e, out)?;
                self.convert(value, ty, &e.location, false)
            }
            ast::Initializer::List(items, location) => {
                let leaves = self.initializer_leaves(f, items, out)?;
                let mut cursor = VecDeque::from(leaves);
                let value = self.take_leaf(&mut cursor, ty, location)?;
                if !cursor.is_empty() {
                    return self.fail(
                        ErrorKind::Semantic,
                        location,
                        "too many elements in initializer list",
                    );
                }
                Ok(value)
            }
        }
    }

    /// Lowers every expression of a (nested) initializer list in order.
    pub(super) fn initializer_leaves(
        &mut self,
        f: &mut FnCtx,
        items: &[ast::Initializer],
        out: &mut Vec<Statement>,
    ) -> SResult<Vec<Expr>> {
        let mut leaves = Vec::new();
        for item in items {
            match item {
                ast::Initializer::Expr(e) => leaves.push(self.lower_expr(f, e, out)?),
                ast::Initializer::List(inner, _) => {
                    leaves.extend(self.initializer_leaves(f, inner, out)?)
                }
            }
        }
        Ok(leaves)
    }

    /// Builds elements of `elem` until the leaves run out.
    pub(super) fn build_unsized_array(
        &mut self,
        elem: &Type,
        leaves: Vec<Expr>,
        location: &SourceLocation,
    ) -> SResult<(Expr, u32)> {
        let mut cursor = VecDeque::from(leaves);
        let mut elements = Vec::new();
        while !cursor.is_empty() {
            elements.push(self.take_leaf(&mut cursor, elem, location)?);
        }
        if elements.is_empty() {
            return self.fail(ErrorKind::Semantic, location, "zero-length arrays are not allowed");
        }
        let count = elements.len() as u32;
        Ok((
            Expr::new(
                ExprKind::Construct(elements),
                Type::Array(Box::new(elem.clone()), count),
            ),
            count,
        ))
    }

    /// Consumes leaves to build one value of type `ty`, splitting composite
    /// leaves into their components when they do not match as a whole.
    pub(super) fn take_leaf(
        &mut self,
        cursor: &mut VecDeque<Expr>,
        ty: &Type,
        location: &SourceLocation,
    ) -> SResult<Expr> {
        let Some(front) = cursor.front() else {
            return self.fail(
                ErrorKind::Semantic,
                location,
                "too few elements in initializer list",
            );
        };
        if &front.ty == ty {
            if let Some(value) = cursor.pop_front() {
                return Ok(value);
            }
        }
        let parts = |this: &mut Self, cursor: &mut VecDeque<Expr>, tys: Vec<Type>| {
            tys.iter()
                .map(|t| this.take_leaf(cursor, t, location))
                .collect::<SResult<Vec<_>>>()
        };
        match ty {
            Type::Scalar(s) => {
                let Some(value) = cursor.pop_front() else {
                    return self.fail(ErrorKind::Internal, location, "initializer cursor underflow");
                };
                if value.ty.is_scalar() {
                    return Ok(convert_scalar(value, *s));
                }
                if !value.ty.is_numeric() && !matches!(value.ty, Type::Array(..) | Type::Struct(_)) {
                    return self.fail(
                        ErrorKind::Semantic,
                        location,
                        format!("cannot initialize '{}' from '{}'", self.type_name(ty), self.type_name(&value.ty)),
                    );
                }
                for part in components(&value, &self.module.structs).into_iter().rev() {
                    cursor.push_front(part);
                }
                self.take_leaf(cursor, ty, location)
            }
            Type::Vector(s, n) => {
                let args = parts(self, cursor, vec![Type::Scalar(*s); *n as usize])?;
                Ok(Expr::new(ExprKind::Construct(args), ty.clone()))
            }
            Type::Matrix { scalar, rows, cols } => {
                let args = parts(self, cursor, vec![Type::Vector(*scalar, *cols); *rows as usize])?;
                Ok(Expr::new(ExprKind::Construct(args), ty.clone()))
            }
            Type::Array(elem, n) => {
                let args = parts(self, cursor, vec![(**elem).clone(); *n as usize])?;
                Ok(Expr::new(ExprKind::Construct(args), ty.clone()))
            }
            Type::Struct(h) => {
                let tys = self.module.structs[*h]
                    .members
                    .iter()
                    .map(|m| m.ty.clone())
                    .collect();
                let args = parts(self, cursor, tys)?;
                Ok(Expr::new(ExprKind::Construct(args), ty.clone()))
            }
            other => self.fail(
                ErrorKind::Semantic,
                location,
                format!("cannot initialize a value of type '{}'", self.type_name(other)),
            ),
        }
    }

    /// Converts a condition to a scalar bool.
    pub(super) fn to_bool(&mut self, value: Expr, location: &SourceLocation) -> SResult<Expr> {
        if !value.ty.is_scalar() {
            return self.fail(
                ErrorKind::Semantic,
                location,
                format!(
                    "condition must be a scalar, found '{}'",
                    self.type_name(&value.ty)
                ),
            );
        }
        Ok(match value.kind {
            ExprKind::Literal(l) => Expr::bool(l.as_bool()),
            _ if value.ty == Type::BOOL => value,
            _ => Expr::new(ExprKind::Convert(Box::new(value)), Type::BOOL),
        })
    }
}

