//! Calls to user functions and intrinsics

use super::convert::{is_literal, matrix_row, swizzle};
use super::{Analyzer, FnCtx, FunctionSig, SResult};
use crate::diag::{ErrorKind, SourceLocation};
use crate::front::ast;
use crate::front::intrinsics::{self, ArgClass, IntrinsicKind, MathSignature, ReturnRule, Special};
use crate::ir::{
    BinaryOp, CallArg, Expr, ExprKind, Intrinsic, Literal, ParamDirection, Place, Scalar,
    ScalarKind, Statement, Type,
};

impl Analyzer<'_> {
    pub(super) fn call(
        &mut self,
        f: &mut FnCtx,
        name: &str,
        args: &[ast::Expr],
        loc: &SourceLocation,
        out: &mut Vec<Statement>,
        want_value: bool,
    ) -> SResult<Option<Expr>> {
        if let Some(sig) = self.functions.get(name).cloned() {
            return self.user_call(f, name, sig, args, loc, out, want_value);
        }
        match intrinsics::lookup(name) {
            Some(IntrinsicKind::Math(sig)) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.lower_expr(f, arg, out)?);
                }
                self.math_call(sig, name, values, loc).map(Some)
            }
            Some(IntrinsicKind::Special(special)) => self.special_call(f, special, name, args, loc, out),
            None if self.lookup(f, name).is_some() => self.fail(
                ErrorKind::Semantic,
                loc,
                format!("called object '{}' is not a function", name),
            ),
            None => self.fail(
                ErrorKind::Semantic,
                loc,
                format!("use of undeclared identifier '{}'", name),
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn user_call(
        &mut self,
        f: &mut FnCtx,
        name: &str,
        sig: FunctionSig,
        args: &[ast::Expr],
        loc: &SourceLocation,
        out: &mut Vec<Statement>,
        want_value: bool,
    ) -> SResult<Option<Expr>> {
        if args.len() != sig.params.len() {
            return self.fail(
                ErrorKind::Semantic,
                loc,
                format!(
                    "too {} arguments to function call '{}', expected {}, have {}",
                    if args.len() < sig.params.len() { "few" } else { "many" },
                    name,
                    sig.params.len(),
                    args.len()
                ),
            );
        }
        let mut call_args = Vec::with_capacity(args.len());
        let mut write_backs = Vec::new();
        for (arg, (param_ty, direction)) in args.iter().zip(&sig.params) {
            if param_ty.is_resource() {
                let Some((resource, ty)) = self.resource_ref(f, arg)? else {
                    return self.fail(
                        ErrorKind::Semantic,
                        &arg.location,
                        format!("expected a resource of type '{}'", self.type_name(param_ty)),
                    );
                };
                if &ty != param_ty {
                    return self.fail(
                        ErrorKind::Semantic,
                        &arg.location,
                        format!(
                            "cannot convert from '{}' to '{}'",
                            self.type_name(&ty),
                            self.type_name(param_ty)
                        ),
                    );
                }
                call_args.push(CallArg::Resource(resource));
                continue;
            }
            match direction {
                ParamDirection::In => {
                    let value = self.lower_expr(f, arg, out)?;
                    let value = self.convert(value, param_ty, &arg.location, false)?;
                    call_args.push(CallArg::Value(value));
                }
                ParamDirection::Out | ParamDirection::InOut => {
                    let target = self.lower_target(f, arg, out)?;
                    if let super::expr::Target::Place(Place::Local(local), ty) = &target {
                        if ty == param_ty {
                            call_args.push(CallArg::Ref(*local));
                            continue;
                        }
                    }
                    let tmp = f.temp(param_ty.clone());
                    if *direction == ParamDirection::InOut {
                        let value = self.convert(target.load(), param_ty, &arg.location, false)?;
                        out.push(Statement::Store {
                            place: Place::Local(tmp),
                            value,
                        });
                    }
                    call_args.push(CallArg::Ref(tmp));
                    write_backs.push((target, tmp, arg.location.clone()));
                }
            }
        }
        let result = (want_value && sig.result != Type::Void).then(|| f.temp(sig.result.clone()));
        out.push(Statement::Call {
            function: sig.handle,
            args: call_args,
            result: result.map(Place::Local),
        });
        for (target, tmp, location) in write_backs {
            let param_ty = f.locals[tmp].ty.clone();
            let value = Expr::load(Place::Local(tmp), param_ty);
            let value = self.convert(value, target.ty(), &location, false)?;
            out.push(target.store(value));
        }
        Ok(result.map(|tmp| Expr::load(Place::Local(tmp), sig.result.clone())))
    }

    /// Unifies arguments, checks shapes and builds an intrinsic expression.
    pub(super) fn math_call(
        &mut self,
        sig: MathSignature,
        name: &str,
        args: Vec<Expr>,
        loc: &SourceLocation,
    ) -> SResult<Expr> {
        if args.len() != sig.arity {
            return self.fail(
                ErrorKind::Semantic,
                loc,
                format!(
                    "'{}' expects {} argument{}, have {}",
                    name,
                    sig.arity,
                    if sig.arity == 1 { "" } else { "s" },
                    args.len()
                ),
            );
        }
        if let Some(bad) = args.iter().find(|a| !a.ty.is_numeric()) {
            return self.fail(
                ErrorKind::Semantic,
                loc,
                format!(
                    "invalid argument type '{}' to '{}'",
                    self.type_name(&bad.ty),
                    name
                ),
            );
        }
        let fun = sig.fun;
        if sig.args == ArgClass::Any {
            return self.any_class_call(fun, name, args, loc);
        }

        let unified = if fun == Intrinsic::Refract { &args[..2] } else { &args[..] };
        let mut scalar = unify_scalar(unified);
        match sig.args {
            ArgClass::Float if !scalar.is_float() => scalar = Scalar::F32,
            ArgClass::Numeric if scalar.kind == ScalarKind::Bool => scalar = Scalar::I32,
            ArgClass::Integer => match scalar.kind {
                ScalarKind::Bool => scalar = Scalar::U32,
                ScalarKind::Float => {
                    return self.fail(
                        ErrorKind::Semantic,
                        loc,
                        format!("'{}' requires integer arguments", name),
                    );
                }
                _ => {}
            },
            _ => {}
        }
        let mut ty = unified[0].ty.with_scalar(scalar);
        for arg in &unified[1..] {
            ty = self.common_type(&ty, &arg.ty, scalar, loc)?;
        }
        let mut converted = Vec::with_capacity(args.len());
        for (i, arg) in args.into_iter().enumerate() {
            let target = if fun == Intrinsic::Refract && i == 2 {
                Type::Scalar(scalar)
            } else {
                ty.clone()
            };
            converted.push(self.convert(arg, &target, loc, false)?);
        }

        match fun {
            Intrinsic::Dot => return self.dot(converted, loc),
            Intrinsic::Determinant => {
                return match ty {
                    Type::Matrix { rows, cols, .. } if rows == cols && rows > 1 => {
                        Ok(intrinsic(fun, converted, Type::Scalar(scalar)))
                    }
                    _ => self.fail(ErrorKind::Semantic, loc, "determinant requires a square matrix"),
                };
            }
            Intrinsic::Length if ty.is_scalar() => {
                return Ok(intrinsic(Intrinsic::Abs, converted, ty));
            }
            Intrinsic::Distance if ty.is_scalar() => {
                let mut it = converted.into_iter();
                let (Some(a), Some(b)) = (it.next(), it.next()) else {
                    return self.fail(ErrorKind::Internal, loc, "distance arity");
                };
                let diff = self.binary(BinaryOp::Sub, a, b, loc)?;
                return Ok(intrinsic(Intrinsic::Abs, vec![diff], ty));
            }
            Intrinsic::Cross if ty != Type::Vector(scalar, 3) => {
                return self.fail(ErrorKind::Semantic, loc, "cross requires float3 arguments");
            }
            Intrinsic::Normalize
            | Intrinsic::Reflect
            | Intrinsic::Refract
            | Intrinsic::FaceForward
            | Intrinsic::Length
            | Intrinsic::Distance
                if !ty.is_vector() =>
            {
                return self.fail(
                    ErrorKind::Semantic,
                    loc,
                    format!("'{}' requires vector arguments", name),
                );
            }
            _ => {}
        }

        let result = match sig.ret {
            ReturnRule::Same => ty.clone(),
            ReturnRule::Scalar => Type::Scalar(scalar),
            ReturnRule::BoolShape => ty.with_scalar(Scalar::BOOL),
            ReturnRule::BoolScalar => Type::BOOL,
            ReturnRule::IntShape => ty.with_scalar(Scalar::I32),
            ReturnRule::UintShape => ty.with_scalar(Scalar::U32),
            ReturnRule::Transposed => ty.clone(),
        };

        if let Type::Matrix { rows, cols, .. } = ty {
            if sig.ret != ReturnRule::Same {
                return self.fail(
                    ErrorKind::UnsupportedFeature,
                    loc,
                    format!("'{}' is not supported on matrices", name),
                );
            }
            let parts = (0..rows)
                .map(|r| {
                    let row_args = converted.iter().map(|a| row_of(a, r)).collect();
                    intrinsic(fun, row_args, Type::vector(scalar, cols))
                })
                .collect();
            return Ok(Expr::new(ExprKind::Construct(parts), result));
        }
        Ok(intrinsic(fun, converted, result))
    }

    /// `transpose`, `determinant`, `all` and `any`: arguments kept as given.
    fn any_class_call(
        &mut self,
        fun: Intrinsic,
        name: &str,
        mut args: Vec<Expr>,
        loc: &SourceLocation,
    ) -> SResult<Expr> {
        let arg = args.remove(0);
        match fun {
            Intrinsic::Transpose => match arg.ty {
                Type::Matrix { scalar, rows, cols } => Ok(intrinsic(
                    fun,
                    vec![arg],
                    Type::Matrix {
                        scalar,
                        rows: cols,
                        cols: rows,
                    },
                )),
                _ => self.fail(ErrorKind::Semantic, loc, "transpose requires a matrix"),
            },
            Intrinsic::All | Intrinsic::Any => {
                if arg.ty.is_matrix() {
                    return self.fail(
                        ErrorKind::UnsupportedFeature,
                        loc,
                        format!("'{}' is not supported on matrices", name),
                    );
                }
                let bool_ty = arg.ty.with_scalar(Scalar::BOOL);
                let arg = self.convert(arg, &bool_ty, loc, true)?;
                if bool_ty.is_scalar() {
                    return Ok(arg);
                }
                Ok(intrinsic(fun, vec![arg], Type::BOOL))
            }
            _ => self.fail(ErrorKind::Internal, loc, format!("unexpected intrinsic '{}'", name)),
        }
    }

    /// `dot`; integer vectors are expanded because targets only have a float dot.
    fn dot(&mut self, args: Vec<Expr>, loc: &SourceLocation) -> SResult<Expr> {
        let mut it = args.into_iter();
        let (Some(a), Some(b)) = (it.next(), it.next()) else {
            return self.fail(ErrorKind::Internal, loc, "dot arity");
        };
        let Some(scalar) = a.ty.scalar() else {
            return self.fail(ErrorKind::Internal, loc, "dot of non-numeric");
        };
        match a.ty {
            Type::Scalar(_) => self.binary(BinaryOp::Mul, a, b, loc),
            Type::Vector(..) if scalar.is_float() => {
                Ok(intrinsic(Intrinsic::Dot, vec![a, b], Type::Scalar(scalar)))
            }
            Type::Vector(_, n) => {
                let mut sum: Option<Expr> = None;
                for i in 0..n {
                    let product = self.binary(
                        BinaryOp::Mul,
                        swizzle(a.clone(), vec![i]),
                        swizzle(b.clone(), vec![i]),
                        loc,
                    )?;
                    sum = Some(match sum {
                        Some(acc) => self.binary(BinaryOp::Add, acc, product, loc)?,
                        None => product,
                    });
                }
                match sum {
                    Some(sum) => Ok(sum),
                    None => self.fail(ErrorKind::Internal, loc, "empty dot"),
                }
            }
            _ => self.fail(ErrorKind::Semantic, loc, "dot requires vector arguments"),
        }
    }

    fn special_call(
        &mut self,
        f: &mut FnCtx,
        special: Special,
        name: &str,
        args: &[ast::Expr],
        loc: &SourceLocation,
        out: &mut Vec<Statement>,
    ) -> SResult<Option<Expr>> {
        let expected = match special {
            Special::Mul => 2,
            Special::SinCos => 3,
            Special::Barrier { .. } => 0,
            _ => 1,
        };
        if args.len() != expected {
            return self.fail(
                ErrorKind::Semantic,
                loc,
                format!("'{}' expects {} arguments, have {}", name, expected, args.len()),
            );
        }
        match special {
            Special::Mul => {
                let a = self.lower_expr(f, &args[0], out)?;
                let b = self.lower_expr(f, &args[1], out)?;
                self.mul(a, b, loc).map(Some)
            }
            Special::Clip => {
                let x = self.lower_expr(f, &args[0], out)?;
                if !matches!(x.ty, Type::Scalar(_) | Type::Vector(..)) {
                    return self.fail(ErrorKind::Semantic, loc, "clip requires a scalar or vector");
                }
                let ty = x.ty.with_scalar(Scalar::F32);
                let x = self.convert(x, &ty, loc, false)?;
                let negative = self.binary(BinaryOp::Lt, x, Expr::float(0.0), loc)?;
                let condition = if negative.ty.is_vector() {
                    intrinsic(Intrinsic::Any, vec![negative], Type::BOOL)
                } else {
                    negative
                };
                out.push(Statement::If {
                    condition,
                    accept: vec![Statement::Discard],
                    reject: Vec::new(),
                });
                Ok(None)
            }
            Special::SinCos => {
                let x = self.lower_expr(f, &args[0], out)?;
                let scalar = x.ty.scalar().filter(|s| s.is_float()).unwrap_or(Scalar::F32);
                let ty = x.ty.with_scalar(scalar);
                let x = self.convert(x, &ty, loc, false)?;
                for (arg, fun) in args[1..].iter().zip([Intrinsic::Sin, Intrinsic::Cos]) {
                    let target = self.lower_target(f, arg, out)?;
                    let value = intrinsic(fun, vec![x.clone()], ty.clone());
                    let value = self.convert(value, target.ty(), &arg.location, false)?;
                    out.push(target.store(value));
                }
                Ok(None)
            }
            Special::AsFloat | Special::AsInt | Special::AsUint => {
                let x = self.lower_expr(f, &args[0], out)?;
                let target_kind = match special {
                    Special::AsFloat => ScalarKind::Float,
                    Special::AsInt => ScalarKind::Sint,
                    _ => ScalarKind::Uint,
                };
                self.bitcast(x, target_kind, name, loc).map(Some)
            }
            Special::Barrier { scope, sync } => {
                out.push(Statement::Barrier { scope, sync });
                Ok(None)
            }
        }
    }

    fn bitcast(
        &mut self,
        x: Expr,
        kind: ScalarKind,
        name: &str,
        loc: &SourceLocation,
    ) -> SResult<Expr> {
        let source = match x.ty.scalar() {
            Some(s) if !x.ty.is_matrix() && s.width == 4 && s.kind != ScalarKind::Bool => s,
            _ => {
                return self.fail(
                    ErrorKind::Semantic,
                    loc,
                    format!(
                        "'{}' requires a 32-bit scalar or vector, found '{}'",
                        name,
                        self.type_name(&x.ty)
                    ),
                );
            }
        };
        let target = Scalar::new(kind, 4);
        if source == target {
            return Ok(x);
        }
        if let Some(literal) = x.as_literal() {
            let bits = literal.bits(source) as u32;
            let folded = match kind {
                ScalarKind::Float => Literal::Float(f32::from_bits(bits) as f64),
                ScalarKind::Sint => Literal::Int(bits as i32 as i64),
                _ => Literal::Uint(bits as u64),
            };
            return Ok(Expr::literal(folded, target));
        }
        let ty = x.ty.with_scalar(target);
        Ok(Expr::new(ExprKind::Bitcast(Box::new(x)), ty))
    }

    /// HLSL `mul` with its vector/matrix overloads.
    pub(super) fn mul(&mut self, a: Expr, b: Expr, loc: &SourceLocation) -> SResult<Expr> {
        if !a.ty.is_numeric() || !b.ty.is_numeric() {
            return self.fail(ErrorKind::Semantic, loc, "mul requires numeric arguments");
        }
        if a.ty.is_scalar() || b.ty.is_scalar() {
            return self.binary(BinaryOp::Mul, a, b, loc);
        }
        let mut scalar = unify_scalar(&[a.clone(), b.clone()]);
        if scalar.kind == ScalarKind::Bool {
            scalar = Scalar::I32;
        }
        let result = match (a.ty.clone(), b.ty.clone()) {
            (Type::Vector(_, n), Type::Vector(_, m)) => {
                let size = n.min(m);
                let ty = Type::Vector(scalar, size);
                let a = self.convert(a, &ty, loc, false)?;
                let b = self.convert(b, &ty, loc, false)?;
                return self.dot(vec![a, b], loc);
            }
            (Type::Vector(_, n), Type::Matrix { rows, cols, .. }) if n == rows => {
                Type::Vector(scalar, cols)
            }
            (Type::Matrix { rows, cols, .. }, Type::Vector(_, n)) if n == cols => {
                Type::Vector(scalar, rows)
            }
            (Type::Matrix { rows, cols, .. }, Type::Matrix { rows: r2, cols: c2, .. })
                if cols == r2 =>
            {
                Type::Matrix {
                    scalar,
                    rows,
                    cols: c2,
                }
            }
            _ => {
                return self.fail(
                    ErrorKind::Semantic,
                    loc,
                    format!(
                        "dimension mismatch in mul('{}', '{}')",
                        self.type_name(&a.ty),
                        self.type_name(&b.ty)
                    ),
                );
            }
        };
        if !scalar.is_float() {
            return self.fail(
                ErrorKind::UnsupportedFeature,
                loc,
                "integer matrix multiplication is not supported",
            );
        }
        let a_ty = a.ty.with_scalar(scalar);
        let b_ty = b.ty.with_scalar(scalar);
        let a = self.convert(a, &a_ty, loc, false)?;
        let b = self.convert(b, &b_ty, loc, false)?;
        Ok(Expr::new(
            ExprKind::MatMul {
                left: Box::new(a),
                right: Box::new(b),
            },
            result,
        ))
    }
}

fn intrinsic(fun: Intrinsic, args: Vec<Expr>, ty: Type) -> Expr {
    Expr::new(ExprKind::Intrinsic { fun, args }, ty)
}

fn row_of(value: &Expr, row: u8) -> Expr {
    if value.ty.is_matrix() {
        matrix_row(value, row)
    } else {
        value.clone()
    }
}

/// Common component type of several arguments; literals adapt to the rest.
fn unify_scalar(args: &[Expr]) -> Scalar {
    let typed = max_rank(args.iter().filter(|a| !is_literal(a)).filter_map(|a| a.ty.scalar()));
    match typed {
        Some(s) => {
            let float_literal = args
                .iter()
                .filter(|a| is_literal(a))
                .any(|a| a.ty.scalar().is_some_and(Scalar::is_float));
            if float_literal && !s.is_float() {
                Scalar::F32
            } else {
                s
            }
        }
        None => max_rank(args.iter().filter_map(|a| a.ty.scalar())).unwrap_or(Scalar::F32),
    }
}

fn max_rank(scalars: impl Iterator<Item = Scalar>) -> Option<Scalar> {
    scalars.max_by_key(|s| s.rank())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unify_prefers_typed_operands() {
        let var = Expr::load(
            Place::Local(crate::ir::Arena::<crate::ir::Local>::new().append(crate::ir::Local {
                name: "h".into(),
                ty: Type::Scalar(Scalar::F16),
                semantic: None,
                interpolation: None,
            })),
            Type::Scalar(Scalar::F16),
        );
        assert_eq!(unify_scalar(&[var.clone(), Expr::float(1.0)]), Scalar::F16);
        assert_eq!(unify_scalar(&[Expr::int(1), Expr::float(2.0)]), Scalar::F32);
        let int_var = Expr::new(var.kind.clone(), Type::INT);
        assert_eq!(unify_scalar(&[int_var, Expr::float(0.5)]), Scalar::F32);
    }
}
