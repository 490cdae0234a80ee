//! Algebraic simplification.
//!
//! `x + 0`, `x - 0` and `x * 0` are only rewritten for integers since
//! floating point keeps the sign of zero and propagates NaN. `x * 1`,
//! double negation and double complement hold for every type. Selects and
//! `if`s on constant conditions keep only the taken side.

use super::Pass;
use super::const_fold::constant_components;
use crate::ir::visit::{for_each_expr_mut, for_each_statement_mut};
use crate::ir::{BinaryOp, Block, Expr, ExprKind, Literal, Module, Statement, Type, UnaryOp};

#[derive(Debug)]
pub struct InstCombine;

impl Pass for InstCombine {
    fn name(&self) -> &str {
        "inst-combine"
    }

    fn run(&self, module: &mut Module) -> bool {
        let mut changed = false;
        for (_, function) in module.functions.iter_mut() {
            for_each_expr_mut(&mut function.body, &mut |e| {
                if let Some(simpler) = combine(e) {
                    *e = simpler;
                    changed = true;
                }
            });
            for_each_statement_mut(&mut function.body, &mut |s| {
                if let Some(taken) = constant_branch(s) {
                    *s = Statement::Block(taken);
                    changed = true;
                }
            });
        }
        changed
    }
}

/// The single value every component of a constant has.
fn uniform(expr: &Expr) -> Option<Literal> {
    let components = constant_components(expr)?;
    let first = *components.first()?;
    components.iter().all(|c| *c == first).then_some(first)
}

fn is_zero(expr: &Expr) -> bool {
    uniform(expr).is_some_and(|l| l.as_f64() == 0.0 && !matches!(l, Literal::Bool(_)))
}

fn is_one(expr: &Expr) -> bool {
    uniform(expr).is_some_and(|l| l.as_f64() == 1.0 && !matches!(l, Literal::Bool(_)))
}

fn is_integer(ty: &Type) -> bool {
    ty.scalar().is_some_and(|s| s.is_integer())
}

fn combine(expr: &Expr) -> Option<Expr> {
    match &expr.kind {
        ExprKind::Binary { op, left, right } => {
            // Only same-shape operands can stand in for the result
            let same = |e: &Expr| (e.ty == expr.ty).then(|| e.clone());
            let integer = is_integer(&expr.ty);
            match op {
                BinaryOp::Add if integer && is_zero(right) => same(left),
                BinaryOp::Add if integer && is_zero(left) => same(right),
                BinaryOp::Sub if integer && is_zero(right) => same(left),
                BinaryOp::Mul if is_one(right) => same(left),
                BinaryOp::Mul if is_one(left) => same(right),
                BinaryOp::Mul if integer && is_zero(right) => same(right),
                BinaryOp::Mul if integer && is_zero(left) => same(left),
                BinaryOp::Div if is_one(right) => same(left),
                _ => None,
            }
        }
        ExprKind::Unary { op, expr: inner } => match (&inner.kind, op) {
            (
                ExprKind::Unary {
                    op: inner_op,
                    expr: operand,
                },
                UnaryOp::Neg | UnaryOp::Not | UnaryOp::BitNot,
            ) if inner_op == op && operand.ty == expr.ty => Some((**operand).clone()),
            _ => None,
        },
        ExprKind::Select {
            condition,
            accept,
            reject,
        } => match condition.as_literal()? {
            Literal::Bool(true) => Some((**accept).clone()),
            Literal::Bool(false) => Some((**reject).clone()),
            _ => None,
        },
        _ => None,
    }
}

fn constant_branch(statement: &mut Statement) -> Option<Block> {
    let Statement::If {
        condition,
        accept,
        reject,
    } = statement
    else {
        return None;
    };
    match condition.as_literal()? {
        Literal::Bool(true) => Some(std::mem::take(accept)),
        Literal::Bool(false) => Some(std::mem::take(reject)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Arena, Function, Handle, Local, Place, Scalar};

    fn load(ty: Type) -> Expr {
        Expr::load(Place::Local(Handle::new(0)), ty)
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        let ty = left.ty.clone();
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
    fn test_integer_identities() {
        let x = load(Type::INT);
        assert_eq!(combine(&binary(BinaryOp::Add, x.clone(), Expr::int(0))), Some(x.clone()));
        assert_eq!(combine(&binary(BinaryOp::Mul, Expr::int(0), x.clone())), Some(Expr::int(0)));
    }

    #[test]
    fn test_float_zero_is_not_an_identity() {
        let x = load(Type::FLOAT);
        assert_eq!(combine(&binary(BinaryOp::Add, x.clone(), Expr::float(0.0))), None);
        let splat = Expr::new(
            ExprKind::Splat(Box::new(Expr::float(1.0))),
            Type::Vector(Scalar::F32, 3),
        );
        let v = load(Type::Vector(Scalar::F32, 3));
        assert_eq!(combine(&binary(BinaryOp::Mul, v.clone(), splat)), Some(v));
    }

    #[test]
    fn test_constant_if_is_replaced_by_taken_branch() {
        let mut module = Module::new("test.hlsl");
        let mut locals = Arena::new();
        locals.append(Local {
            name: "x".into(),
            ty: Type::INT,
            semantic: None,
            interpolation: None,
        });
        module.functions.append(Function {
            name: "f".into(),
            params: Vec::new(),
            result: Type::Void,
            result_semantic: None,
            locals,
            body: vec![Statement::If {
                condition: Expr::bool(false),
                accept: vec![Statement::Discard],
                reject: vec![Statement::Return(None)],
            }],
            numthreads: None,
            location: None,
        });
        assert!(InstCombine.run(&mut module));
        let (_, f) = module.functions.iter().next().unwrap();
        assert_eq!(f.body, vec![Statement::Block(vec![Statement::Return(None)])]);
    }
}
