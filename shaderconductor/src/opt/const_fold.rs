//! Constant folding.
//!
//! Evaluates operators, conversions, bit casts, constructors and swizzles
//! whose operands are constants. Vector constants are `Construct`s of
//! literals or `Splat`s of one literal. Integer division or remainder by
//! zero is left for the target to evaluate.

use super::Pass;
use crate::ir::visit::{expr_tree_mut, for_each_expr_mut};
use crate::ir::{BinaryOp, Expr, ExprKind, Literal, Module, Scalar, ScalarKind, Type, UnaryOp};

#[derive(Debug)]
pub struct ConstantFolding;

impl Pass for ConstantFolding {
    fn name(&self) -> &str {
        "const-fold"
    }

    fn run(&self, module: &mut Module) -> bool {
        let mut changed = false;
        let mut visit = |e: &mut Expr| {
            if let Some(folded) = fold(e) {
                *e = folded;
                changed = true;
            }
        };
        for (_, function) in module.functions.iter_mut() {
            for_each_expr_mut(&mut function.body, &mut visit);
        }
        for (_, global) in module.globals.iter_mut() {
            if let Some(init) = global.init.as_mut() {
                expr_tree_mut(init, &mut visit);
            }
        }
        changed
    }
}

/// Components of a scalar or vector constant.
pub(super) fn constant_components(expr: &Expr) -> Option<Vec<Literal>> {
    match (&expr.kind, &expr.ty) {
        (ExprKind::Literal(l), Type::Scalar(_)) => Some(vec![*l]),
        (ExprKind::Splat(inner), Type::Vector(_, n)) => match inner.kind {
            ExprKind::Literal(l) => Some(vec![l; *n as usize]),
            _ => None,
        },
        (ExprKind::Construct(args), Type::Vector(..)) => {
            let mut out = Vec::new();
            for arg in args {
                out.extend(constant_components(arg)?);
            }
            Some(out)
        }
        _ => None,
    }
}

/// Builds a constant of a scalar or vector type from its components.
pub(super) fn from_components(components: Vec<Literal>, ty: &Type) -> Option<Expr> {
    let scalar = ty.scalar()?;
    match ty {
        Type::Scalar(_) if components.len() == 1 => {
            Some(Expr::new(ExprKind::Literal(components[0]), ty.clone()))
        }
        Type::Vector(_, n) if components.len() == *n as usize => Some(Expr::new(
            ExprKind::Construct(
                components
                    .into_iter()
                    .map(|l| Expr::new(ExprKind::Literal(l), Type::Scalar(scalar)))
                    .collect(),
            ),
            ty.clone(),
        )),
        _ => None,
    }
}

/// Rounds a literal to what `scalar` can hold.
pub(super) fn normalize(literal: Literal, scalar: Scalar) -> Literal {
    match literal.cast(scalar) {
        Literal::Float(f) if scalar.width < 8 => Literal::Float(f as f32 as f64),
        other => other,
    }
}

fn fold(expr: &Expr) -> Option<Expr> {
    match &expr.kind {
        ExprKind::Binary { op, left, right } => {
            let operand = left.ty.scalar()?;
            let result = expr.ty.scalar()?;
            let a = constant_components(left)?;
            let b = constant_components(right)?;
            if a.len() != b.len() {
                return None;
            }
            let values = a
                .into_iter()
                .zip(b)
                .map(|(a, b)| fold_binary(*op, a, b, operand).map(|l| normalize(l, result)))
                .collect::<Option<Vec<_>>>()?;
            from_components(values, &expr.ty)
        }
        ExprKind::Unary { op, expr: inner } => {
            let scalar = expr.ty.scalar()?;
            let values = constant_components(inner)?
                .into_iter()
                .map(|l| fold_unary(*op, l, scalar))
                .collect::<Option<Vec<_>>>()?;
            from_components(values, &expr.ty)
        }
        ExprKind::Convert(inner) => {
            let scalar = expr.ty.scalar()?;
            let values = constant_components(inner)?;
            if inner.ty.vector_size() != expr.ty.vector_size() {
                return None;
            }
            let values = values.into_iter().map(|l| normalize(l, scalar)).collect();
            from_components(values, &expr.ty)
        }
        ExprKind::Bitcast(inner) => {
            let from = inner.ty.scalar()?;
            let to = expr.ty.scalar()?;
            if from.width != 4 || to.width != 4 {
                return None;
            }
            let values = constant_components(inner)?
                .into_iter()
                .map(|l| bitcast(l.bits(from) as u32, to))
                .collect();
            from_components(values, &expr.ty)
        }
        ExprKind::Construct(args) if expr.ty.is_vector() => {
            // Flatten nested constant vectors into one list of literals
            if args.iter().all(|a| matches!(a.kind, ExprKind::Literal(_))) {
                return None;
            }
            from_components(constant_components(expr)?, &expr.ty)
        }
        ExprKind::Swizzle { vector, pattern } => {
            let values = constant_components(vector)?;
            let picked = pattern
                .iter()
                .map(|&i| values.get(i as usize).copied())
                .collect::<Option<Vec<_>>>()?;
            from_components(picked, &expr.ty)
        }
        ExprKind::Index { base, index } => {
            let i = index.as_literal()?.as_i64();
            let values = constant_components(base)?;
            let value = *values.get(usize::try_from(i).ok()?)?;
            from_components(vec![value], &expr.ty)
        }
        _ => None,
    }
}

fn bitcast(bits: u32, to: Scalar) -> Literal {
    match to.kind {
        ScalarKind::Float => Literal::Float(f32::from_bits(bits) as f64),
        ScalarKind::Sint => Literal::Int(bits as i32 as i64),
        ScalarKind::Uint => Literal::Uint(bits as u64),
        ScalarKind::Bool => Literal::Bool(bits != 0),
    }
}

/// Folds one component. `operand` is the operands' scalar type.
pub(super) fn fold_binary(op: BinaryOp, a: Literal, b: Literal, operand: Scalar) -> Option<Literal> {
    use BinaryOp as B;
    let a = a.cast(operand);
    let b = b.cast(operand);
    if op.is_logical() {
        let (a, b) = (a.as_bool(), b.as_bool());
        return Some(Literal::Bool(match op {
            B::LogicalAnd => a && b,
            _ => a || b,
        }));
    }
    match (a, b) {
        (Literal::Float(x), Literal::Float(y)) => {
            let single = operand.width < 8;
            let round = |v: f64| if single { v as f32 as f64 } else { v };
            Some(match op {
                B::Add => Literal::Float(round(x + y)),
                B::Sub => Literal::Float(round(x - y)),
                B::Mul => Literal::Float(round(x * y)),
                B::Div => Literal::Float(round(x / y)),
                B::Rem => Literal::Float(round(x % y)),
                B::Eq => Literal::Bool(x == y),
                B::Ne => Literal::Bool(x != y),
                B::Lt => Literal::Bool(x < y),
                B::Le => Literal::Bool(x <= y),
                B::Gt => Literal::Bool(x > y),
                B::Ge => Literal::Bool(x >= y),
                _ => return None,
            })
        }
        (Literal::Int(x), Literal::Int(y)) => {
            let mask = operand.width as u32 * 8 - 1;
            Some(match op {
                B::Add => Literal::Int(x.wrapping_add(y)),
                B::Sub => Literal::Int(x.wrapping_sub(y)),
                B::Mul => Literal::Int(x.wrapping_mul(y)),
                B::Div if y != 0 => Literal::Int(x.wrapping_div(y)),
                B::Rem if y != 0 => Literal::Int(x.wrapping_rem(y)),
                B::Shl => Literal::Int(x.wrapping_shl(y as u32 & mask)),
                B::Shr => Literal::Int(x >> (y as u32 & mask)),
                B::BitAnd => Literal::Int(x & y),
                B::BitOr => Literal::Int(x | y),
                B::BitXor => Literal::Int(x ^ y),
                _ => compare(op, x.cmp(&y))?,
            })
        }
        (Literal::Uint(x), Literal::Uint(y)) => {
            let mask = operand.width as u32 * 8 - 1;
            Some(match op {
                B::Add => Literal::Uint(x.wrapping_add(y)),
                B::Sub => Literal::Uint(x.wrapping_sub(y)),
                B::Mul => Literal::Uint(x.wrapping_mul(y)),
                B::Div if y != 0 => Literal::Uint(x / y),
                B::Rem if y != 0 => Literal::Uint(x % y),
                B::Shl => Literal::Uint(x.wrapping_shl(y as u32 & mask)),
                B::Shr => Literal::Uint(x >> (y as u32 & mask)),
                B::BitAnd => Literal::Uint(x & y),
                B::BitOr => Literal::Uint(x | y),
                B::BitXor => Literal::Uint(x ^ y),
                _ => compare(op, x.cmp(&y))?,
            })
        }
        (Literal::Bool(x), Literal::Bool(y)) => Some(match op {
            B::Eq => Literal::Bool(x == y),
            B::Ne => Literal::Bool(x != y),
            B::BitAnd => Literal::Bool(x & y),
            B::BitOr => Literal::Bool(x | y),
            B::BitXor => Literal::Bool(x ^ y),
            _ => return None,
        }),
        _ => None,
    }
}

fn compare(op: BinaryOp, ordering: std::cmp::Ordering) -> Option<Literal> {
    use std::cmp::Ordering::*;
    Some(Literal::Bool(match op {
        BinaryOp::Eq => ordering == Equal,
        BinaryOp::Ne => ordering != Equal,
        BinaryOp::Lt => ordering == Less,
        BinaryOp::Le => ordering != Greater,
        BinaryOp::Gt => ordering == Greater,
        BinaryOp::Ge => ordering != Less,
        _ => return None,
    }))
}

fn fold_unary(op: UnaryOp, value: Literal, scalar: Scalar) -> Option<Literal> {
    let value = value.cast(scalar);
    let folded = match (op, value) {
        (UnaryOp::Not, l) => Literal::Bool(!l.as_bool()),
        (UnaryOp::Neg, Literal::Float(f)) => Literal::Float(-f),
        (UnaryOp::Neg, Literal::Int(i)) => Literal::Int(i.wrapping_neg()),
        (UnaryOp::Neg, Literal::Uint(u)) => Literal::Uint(u.wrapping_neg()),
        (UnaryOp::BitNot, Literal::Int(i)) => Literal::Int(!i),
        (UnaryOp::BitNot, Literal::Uint(u)) => Literal::Uint(!u),
        _ => return None,
    };
    Some(normalize(folded, scalar))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Expr {
        Expr::int(v)
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr, ty: Type) -> Expr {
        Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
        )
    }

    #[test]
    fn test_folds_integer_arithmetic_with_wrapping() {
        let e = binary(BinaryOp::Add, int(i32::MAX as i64), int(1), Type::INT);
        assert_eq!(fold(&e), Some(int(i32::MIN as i64)));
        let shift = binary(BinaryOp::Shl, int(1), int(33), Type::INT);
        assert_eq!(fold(&shift), Some(int(2)));
    }

    #[test]
    fn test_division_by_zero_is_kept() {
        let e = binary(BinaryOp::Div, int(4), int(0), Type::INT);
        assert_eq!(fold(&e), None);
    }

    #[test]
    fn test_comparison_yields_bool() {
        let e = binary(BinaryOp::Lt, Expr::float(1.0), Expr::float(2.0), Type::BOOL);
        assert_eq!(fold(&e), Some(Expr::bool(true)));
    }

    #[test]
    fn test_vector_swizzle_of_constants() {
        let v = Expr::new(
            ExprKind::Construct(vec![Expr::float(1.0), Expr::float(2.0), Expr::float(3.0)]),
            Type::Vector(Scalar::F32, 3),
        );
        let swizzled = Expr::new(
            ExprKind::Swizzle {
                vector: Box::new(v),
                pattern: vec![2, 0],
            },
            Type::Vector(Scalar::F32, 2),
        );
        let expected = Expr::new(
            ExprKind::Construct(vec![Expr::float(3.0), Expr::float(1.0)]),
            Type::Vector(Scalar::F32, 2),
        );
        assert_eq!(fold(&swizzled), Some(expected));
    }

    #[test]
    fn test_bitcast_float_to_uint() {
        let e = Expr::new(ExprKind::Bitcast(Box::new(Expr::float(1.0))), Type::UINT);
        assert_eq!(fold(&e), Some(Expr::uint(0x3f80_0000)));
    }
}
