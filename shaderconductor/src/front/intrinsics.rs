//! Signatures of HLSL intrinsic functions

use crate::ir::{Intrinsic, MemoryScope};

/// How arguments are unified before the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgClass {
    /// Converted to a common floating-point type
    Float,
    /// Converted to a common numeric type
    Numeric,
    /// Converted to a common integer type
    Integer,
    /// Left as they are
    Any,
}

/// Result type relative to the unified argument type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnRule {
    Same,
    /// Scalar of the argument's component type (`dot`, `length`)
    Scalar,
    /// Bool with the argument's shape (`isnan`)
    BoolShape,
    /// Scalar bool (`all`, `any`)
    BoolScalar,
    /// Signed int with the argument's shape (`sign`)
    IntShape,
    /// Unsigned int with the argument's shape (`countbits`)
    UintShape,
    /// Matrix with rows and columns swapped
    Transposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MathSignature {
    pub fun: Intrinsic,
    pub arity: usize,
    pub args: ArgClass,
    pub ret: ReturnRule,
}

/// Intrinsics that need dedicated lowering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Special {
    Mul,
    Clip,
    SinCos,
    AsFloat,
    AsInt,
    AsUint,
    Barrier { scope: MemoryScope, sync: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrinsicKind {
    Math(MathSignature),
    Special(Special),
}

const fn math(fun: Intrinsic, arity: usize, args: ArgClass, ret: ReturnRule) -> IntrinsicKind {
    IntrinsicKind::Math(MathSignature {
        fun,
        arity,
        args,
        ret,
    })
}

pub fn lookup(name: &str) -> Option<IntrinsicKind> {
    use ArgClass::*;
    use Intrinsic as I;
    use ReturnRule::*;

    let kind = match name {
        "abs" => math(I::Abs, 1, Numeric, Same),
        "acos" => math(I::Acos, 1, Float, Same),
        "asin" => math(I::Asin, 1, Float, Same),
        "atan" => math(I::Atan, 1, Float, Same),
        "atan2" => math(I::Atan2, 2, Float, Same),
        "ceil" => math(I::Ceil, 1, Float, Same),
        "clamp" => math(I::Clamp, 3, Numeric, Same),
        "cos" => math(I::Cos, 1, Float, Same),
        "cosh" => math(I::Cosh, 1, Float, Same),
        "cross" => math(I::Cross, 2, Float, Same),
        "ddx" => math(I::Ddx, 1, Float, Same),
        "ddy" => math(I::Ddy, 1, Float, Same),
        "ddx_coarse" => math(I::DdxCoarse, 1, Float, Same),
        "ddy_coarse" => math(I::DdyCoarse, 1, Float, Same),
        "ddx_fine" => math(I::DdxFine, 1, Float, Same),
        "ddy_fine" => math(I::DdyFine, 1, Float, Same),
        "degrees" => math(I::Degrees, 1, Float, Same),
        "determinant" => math(I::Determinant, 1, Float, Scalar),
        "distance" => math(I::Distance, 2, Float, Scalar),
        "dot" => math(I::Dot, 2, Numeric, Scalar),
        "exp" => math(I::Exp, 1, Float, Same),
        "exp2" => math(I::Exp2, 1, Float, Same),
        "faceforward" => math(I::FaceForward, 3, Float, Same),
        "floor" => math(I::Floor, 1, Float, Same),
        "fmod" => math(I::Fmod, 2, Float, Same),
        "frac" => math(I::Frac, 1, Float, Same),
        "fwidth" => math(I::Fwidth, 1, Float, Same),
        "isinf" => math(I::IsInf, 1, Float, BoolShape),
        "isnan" => math(I::IsNan, 1, Float, BoolShape),
        "ldexp" => math(I::Ldexp, 2, Float, Same),
        "length" => math(I::Length, 1, Float, Scalar),
        "lerp" => math(I::Lerp, 3, Float, Same),
        "log" => math(I::Log, 1, Float, Same),
        "log10" => math(I::Log10, 1, Float, Same),
        "log2" => math(I::Log2, 1, Float, Same),
        "mad" => math(I::Mad, 3, Numeric, Same),
        "max" => math(I::Max, 2, Numeric, Same),
        "min" => math(I::Min, 2, Numeric, Same),
        "normalize" => math(I::Normalize, 1, Float, Same),
        "pow" => math(I::Pow, 2, Float, Same),
        "radians" => math(I::Radians, 1, Float, Same),
        "rcp" => math(I::Rcp, 1, Float, Same),
        "reflect" => math(I::Reflect, 2, Float, Same),
        "refract" => math(I::Refract, 3, Float, Same),
        "round" => math(I::Round, 1, Float, Same),
        "rsqrt" => math(I::Rsqrt, 1, Float, Same),
        "saturate" => math(I::Saturate, 1, Float, Same),
        "sign" => math(I::Sign, 1, Numeric, IntShape),
        "sin" => math(I::Sin, 1, Float, Same),
        "sinh" => math(I::Sinh, 1, Float, Same),
        "smoothstep" => math(I::Smoothstep, 3, Float, Same),
        "sqrt" => math(I::Sqrt, 1, Float, Same),
        "step" => math(I::Step, 2, Float, Same),
        "tan" => math(I::Tan, 1, Float, Same),
        "tanh" => math(I::Tanh, 1, Float, Same),
        "transpose" => math(I::Transpose, 1, Any, Transposed),
        "trunc" => math(I::Trunc, 1, Float, Same),
        "all" => math(I::All, 1, Any, BoolScalar),
        "any" => math(I::Any, 1, Any, BoolScalar),
        "countbits" => math(I::CountBits, 1, Integer, UintShape),
        "reversebits" => math(I::ReverseBits, 1, Integer, Same),
        "firstbithigh" => math(I::FirstBitHigh, 1, Integer, Same),
        "firstbitlow" => math(I::FirstBitLow, 1, Integer, Same),
        "mul" => IntrinsicKind::Special(Special::Mul),
        "clip" => IntrinsicKind::Special(Special::Clip),
        "sincos" => IntrinsicKind::Special(Special::SinCos),
        "asfloat" => IntrinsicKind::Special(Special::AsFloat),
        "asint" => IntrinsicKind::Special(Special::AsInt),
        "asuint" => IntrinsicKind::Special(Special::AsUint),
        "GroupMemoryBarrier" => barrier(MemoryScope::Group, false),
        "GroupMemoryBarrierWithGroupSync" => barrier(MemoryScope::Group, true),
        "DeviceMemoryBarrier" => barrier(MemoryScope::Device, false),
        "DeviceMemoryBarrierWithGroupSync" => barrier(MemoryScope::Device, true),
        "AllMemoryBarrier" => barrier(MemoryScope::All, false),
        "AllMemoryBarrierWithGroupSync" => barrier(MemoryScope::All, true),
        _ => return None,
    };
    Some(kind)
}

fn barrier(scope: MemoryScope, sync: bool) -> IntrinsicKind {
    IntrinsicKind::Special(Special::Barrier { scope, sync })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_intrinsics() {
        assert_eq!(
            lookup("lerp"),
            Some(IntrinsicKind::Math(MathSignature {
                fun: Intrinsic::Lerp,
                arity: 3,
                args: ArgClass::Float,
                ret: ReturnRule::Same,
            }))
        );
        assert_eq!(lookup("mul"), Some(IntrinsicKind::Special(Special::Mul)));
        assert!(lookup("not_an_intrinsic").is_none());
    }

    #[test]
    fn test_every_math_name_round_trips() {
        for name in ["sin", "firstbitlow", "ddx_fine", "transpose", "saturate"] {
            let Some(IntrinsicKind::Math(sig)) = lookup(name) else {
                panic!("{} should be a math intrinsic", name);
            };
            assert_eq!(sig.fun.hlsl_name(), name);
        }
    }
}
