//! Texture and buffer methods, subscripts on resources

use super::expr::Access;
use super::{Analyzer, FnCtx, SResult, Symbol};
use crate::diag::{ErrorKind, SourceLocation};
use crate::front::ast;
use crate::ir::{
    BinaryOp, BufferKind, Expr, ExprKind, GlobalKind, Place, ResourceRef, SampleLevel, Scalar,
    Statement, TextureDim, TextureType, Type,
};

impl Analyzer<'_> {
    /// The resource an expression names, if it is a bare resource identifier.
    pub(super) fn resource_ref(
        &mut self,
        f: &FnCtx,
        e: &ast::Expr,
    ) -> SResult<Option<(ResourceRef, Type)>> {
        let ast::ExprKind::Ident(name) = &e.kind else {
            return Ok(None);
        };
        Ok(match self.lookup(f, name) {
            Some(Symbol::Global(h)) if matches!(self.module.globals[h].kind, GlobalKind::Resource) => {
                Some((ResourceRef::Global(h), self.module.globals[h].ty.clone()))
            }
            Some(Symbol::ResourceParam(i)) => Some((ResourceRef::Param(i), f.param_type(i))),
            _ => None,
        })
    }

    /// `buffer[i]` and `texture[coord]`.
    pub(super) fn resource_index(
        &mut self,
        f: &mut FnCtx,
        resource: ResourceRef,
        ty: Type,
        index: &ast::Expr,
        loc: &SourceLocation,
        out: &mut Vec<Statement>,
    ) -> SResult<Access> {
        match &ty {
            Type::Buffer {
                kind: BufferKind::Structured,
                rw,
                elem,
            } => {
                let index = self.buffer_index(f, index, out)?;
                Ok(Access::Place(
                    Place::Element {
                        resource,
                        index: Box::new(index),
                    },
                    (**elem).clone(),
                    *rw,
                ))
            }
            Type::Buffer {
                kind: BufferKind::Typed,
                elem,
                ..
            } => {
                let coord = self.buffer_index(f, index, out)?;
                Ok(Access::Value(image_load(resource, coord, None, (**elem).clone())))
            }
            Type::Texture(t) if !t.multisampled => {
                let coord = self.lower_expr(f, index, out)?;
                let coord = self.convert(
                    coord,
                    &Type::vector(Scalar::I32, t.full_coord_size()),
                    &index.location,
                    false,
                )?;
                let lod = (!t.rw).then(|| Expr::int(0));
                Ok(Access::Value(image_load(
                    resource,
                    coord,
                    lod,
                    Type::texel(t.sampled, t.components),
                )))
            }
            other => self.fail(
                ErrorKind::Semantic,
                loc,
                format!("type '{}' cannot be indexed", self.type_name(other)),
            ),
        }
    }

    fn buffer_index(
        &mut self,
        f: &mut FnCtx,
        index: &ast::Expr,
        out: &mut Vec<Statement>,
    ) -> SResult<Expr> {
        let value = self.lower_expr(f, index, out)?;
        match value.ty.scalar() {
            Some(s) if value.ty.is_scalar() && s.is_integer() => Ok(value),
            _ => self.convert(value, &Type::UINT, &index.location, false),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn method_call(
        &mut self,
        f: &mut FnCtx,
        object: &ast::Expr,
        method: &str,
        args: &[ast::Expr],
        loc: &SourceLocation,
        out: &mut Vec<Statement>,
        _want_value: bool,
    ) -> SResult<Option<Expr>> {
        let Some((resource, ty)) = self.resource_ref(f, object)? else {
            // Evaluate the object for its diagnostics
            let value = self.lower_expr(f, object, out)?;
            return self.fail(
                ErrorKind::Semantic,
                loc,
                format!(
                    "'{}' is not a method of type '{}'",
                    method,
                    self.type_name(&value.ty)
                ),
            );
        };
        if matches!(
            method,
            "GetDimensions"
                | "CalculateLevelOfDetail"
                | "Gather"
                | "GatherRed"
                | "GatherGreen"
                | "GatherBlue"
                | "GatherAlpha"
                | "Append"
                | "Consume"
                | "IncrementCounter"
                | "DecrementCounter"
                | "InterlockedAdd"
        ) {
            return self.fail(
                ErrorKind::UnsupportedFeature,
                loc,
                format!("'{}' is not supported", method),
            );
        }
        match &ty {
            Type::Texture(t) => self.texture_method(f, resource, *t, method, args, loc, out).map(Some),
            Type::Buffer { kind, rw, elem } => {
                self.buffer_method(f, resource, *kind, *rw, elem, method, args, loc, out)
            }
            _ => self.fail(
                ErrorKind::Semantic,
                loc,
                format!("'{}' is not a method of type '{}'", method, self.type_name(&ty)),
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn texture_method(
        &mut self,
        f: &mut FnCtx,
        texture: ResourceRef,
        t: TextureType,
        method: &str,
        args: &[ast::Expr],
        loc: &SourceLocation,
        out: &mut Vec<Statement>,
    ) -> SResult<Expr> {
        let texel = Type::texel(t.sampled, t.components);
        let coord_ty = Type::vector(Scalar::F32, t.full_coord_size());

        if method == "Load" {
            if t.multisampled {
                return self.fail(
                    ErrorKind::UnsupportedFeature,
                    loc,
                    "loads from multisampled textures are not supported",
                );
            }
            let (min, max) = (1, 2);
            if !(min..=max).contains(&args.len()) {
                return self.arg_count(method, min, max, args.len(), loc);
            }
            if args.len() == 2 {
                return self.fail(
                    ErrorKind::UnsupportedFeature,
                    loc,
                    "Load with an offset is not supported",
                );
            }
            let location = self.lower_expr(f, &args[0], out)?;
            if t.rw {
                let coord = self.convert(
                    location,
                    &Type::vector(Scalar::I32, t.full_coord_size()),
                    &args[0].location,
                    false,
                )?;
                return Ok(image_load(texture, coord, None, texel));
            }
            // The last component carries the mip level
            let size = t.full_coord_size() + 1;
            let location = self.convert(
                location,
                &Type::vector(Scalar::I32, size),
                &args[0].location,
                false,
            )?;
            let coord = swizzle_range(location.clone(), 0, t.full_coord_size());
            let lod = swizzle_range(location, size - 1, size);
            return Ok(image_load(texture, coord, Some(lod), texel));
        }

        let (min_args, compare, level_kind) = match method {
            "Sample" => (2, false, LevelKind::Auto),
            "SampleBias" => (3, false, LevelKind::Bias),
            "SampleLevel" => (3, false, LevelKind::Lod),
            "SampleGrad" => (4, false, LevelKind::Grad),
            "SampleCmp" => (3, true, LevelKind::Auto),
            "SampleCmpLevelZero" => (3, true, LevelKind::Zero),
            _ => {
                return self.fail(
                    ErrorKind::Semantic,
                    loc,
                    format!("'{}' is not a method of type '{}'", method, t.hlsl_name()),
                );
            }
        };
        if t.rw || t.multisampled {
            return self.fail(
                ErrorKind::Semantic,
                loc,
                format!("'{}' is not a method of type '{}'", method, t.hlsl_name()),
            );
        }
        if !(min_args..=min_args + 1).contains(&args.len()) {
            return self.arg_count(method, min_args, min_args + 1, args.len(), loc);
        }
        if !t.sampled.is_float() {
            return self.fail(
                ErrorKind::Semantic,
                loc,
                "only floating-point textures can be sampled",
            );
        }

        let Some((sampler, sampler_ty)) = self.resource_ref(f, &args[0])? else {
            return self.fail(
                ErrorKind::Semantic,
                &args[0].location,
                "the first argument must be a sampler",
            );
        };
        match sampler_ty {
            Type::Sampler { comparison } if comparison == compare => {}
            Type::Sampler { .. } => {
                let wanted = if compare {
                    "SamplerComparisonState"
                } else {
                    "SamplerState"
                };
                return self.fail(
                    ErrorKind::Semantic,
                    &args[0].location,
                    format!("'{}' requires a {}", method, wanted),
                );
            }
            _ => {
                return self.fail(
                    ErrorKind::Semantic,
                    &args[0].location,
                    "the first argument must be a sampler",
                );
            }
        }

        let coord = self.lower_expr(f, &args[1], out)?;
        let coord = self.convert(coord, &coord_ty, &args[1].location, false)?;
        let mut next = 2;
        let compare_value = if compare {
            let value = self.lower_expr(f, &args[next], out)?;
            next += 1;
            Some(Box::new(self.convert(value, &Type::FLOAT, loc, false)?))
        } else {
            None
        };
        let grad_ty = Type::vector(Scalar::F32, t.dim.coord_size());
        let level = match level_kind {
            LevelKind::Auto => SampleLevel::Auto,
            LevelKind::Zero => SampleLevel::Zero,
            LevelKind::Bias | LevelKind::Lod => {
                let value = self.lower_expr(f, &args[next], out)?;
                next += 1;
                let value = Box::new(self.convert(value, &Type::FLOAT, loc, false)?);
                if level_kind == LevelKind::Bias {
                    SampleLevel::Bias(value)
                } else {
                    SampleLevel::Lod(value)
                }
            }
            LevelKind::Grad => {
                let dx = self.lower_expr(f, &args[next], out)?;
                let dy = self.lower_expr(f, &args[next + 1], out)?;
                next += 2;
                let dx = self.convert(dx, &grad_ty, loc, false)?;
                let dy = self.convert(dy, &grad_ty, loc, false)?;
                SampleLevel::Grad(Box::new(dx), Box::new(dy))
            }
        };
        let offset = match args.get(next) {
            None => None,
            Some(arg) => {
                if t.dim == TextureDim::Cube {
                    return self.fail(
                        ErrorKind::Semantic,
                        &arg.location,
                        "cube textures do not take an offset",
                    );
                }
                let value = self.lower_expr(f, arg, out)?;
                let value = self.convert(
                    value,
                    &Type::vector(Scalar::I32, t.dim.coord_size()),
                    &arg.location,
                    false,
                )?;
                if !value.is_constant() {
                    return self.fail(
                        ErrorKind::Semantic,
                        &arg.location,
                        "texture offset must be an immediate value",
                    );
                }
                Some(Box::new(value))
            }
        };
        let ty = if compare { Type::FLOAT } else { texel };
        Ok(Expr::new(
            ExprKind::Sample {
                texture,
                sampler,
                coord: Box::new(coord),
                level,
                offset,
                compare: compare_value,
            },
            ty,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn buffer_method(
        &mut self,
        f: &mut FnCtx,
        buffer: ResourceRef,
        kind: BufferKind,
        rw: bool,
        elem: &Type,
        method: &str,
        args: &[ast::Expr],
        loc: &SourceLocation,
        out: &mut Vec<Statement>,
    ) -> SResult<Option<Expr>> {
        let width = match (kind, method) {
            (_, "Load") => Some(1),
            (BufferKind::ByteAddress, "Load2") => Some(2),
            (BufferKind::ByteAddress, "Load3") => Some(3),
            (BufferKind::ByteAddress, "Load4") => Some(4),
            _ => None,
        };
        if let Some(width) = width {
            if args.len() != 1 {
                return self.arg_count(method, 1, 1, args.len(), loc);
            }
            let index = self.buffer_index(f, &args[0], out)?;
            return Ok(Some(match kind {
                BufferKind::Typed => image_load(buffer, index, None, elem.clone()),
                BufferKind::Structured => Expr::load(
                    Place::Element {
                        resource: buffer,
                        index: Box::new(index),
                    },
                    elem.clone(),
                ),
                BufferKind::ByteAddress => {
                    let word = self.word_index(f, index, width, loc, out)?;
                    let parts: Vec<Expr> = (0..width)
                        .map(|k| Expr::load(element(buffer, offset_word(&word, k)), Type::UINT))
                        .collect();
                    if width == 1 {
                        parts.into_iter().next().unwrap_or_else(|| Expr::uint(0))
                    } else {
                        Expr::new(ExprKind::Construct(parts), Type::Vector(Scalar::U32, width))
                    }
                }
            }));
        }

        let store_width = match method {
            "Store" => 1,
            "Store2" => 2,
            "Store3" => 3,
            "Store4" => 4,
            _ => 0,
        };
        if kind != BufferKind::ByteAddress || store_width == 0 {
            return self.fail(
                ErrorKind::Semantic,
                loc,
                format!("'{}' is not a method of this buffer type", method),
            );
        }
        if !rw {
            return self.fail(
                ErrorKind::Semantic,
                loc,
                format!("'{}' requires a RWByteAddressBuffer", method),
            );
        }
        if args.len() != 2 {
            return self.arg_count(method, 2, 2, args.len(), loc);
        }
        let index = self.buffer_index(f, &args[0], out)?;
        let word = self.word_index(f, index, store_width, loc, out)?;
        let value = self.lower_expr(f, &args[1], out)?;
        let value_ty = Type::vector(Scalar::U32, store_width);
        let value = self.convert(value, &value_ty, &args[1].location, false)?;
        let value = if store_width > 1 && !is_simple(&value) {
            let tmp = f.temp(value_ty.clone());
            out.push(Statement::Store {
                place: Place::Local(tmp),
                value,
            });
            Expr::load(Place::Local(tmp), value_ty)
        } else {
            value
        };
        for k in 0..store_width {
            let component = if store_width == 1 {
                value.clone()
            } else {
                super::convert::swizzle(value.clone(), vec![k])
            };
            out.push(Statement::Store {
                place: element(buffer, offset_word(&word, k)),
                value: component,
            });
        }
        Ok(None)
    }

    /// Converts a byte address into a word index, kept in a temporary when
    /// it is used for several words.
    fn word_index(
        &mut self,
        f: &mut FnCtx,
        address: Expr,
        width: u8,
        loc: &SourceLocation,
        out: &mut Vec<Statement>,
    ) -> SResult<Expr> {
        let address = self.convert(address, &Type::UINT, loc, false)?;
        let word = self.binary(BinaryOp::Shr, address, Expr::uint(2), loc)?;
        if width == 1 || is_simple(&word) {
            return Ok(word);
        }
        let tmp = f.temp(Type::UINT);
        out.push(Statement::Store {
            place: Place::Local(tmp),
            value: word,
        });
        Ok(Expr::load(Place::Local(tmp), Type::UINT))
    }

    fn arg_count<T>(
        &mut self,
        method: &str,
        min: usize,
        max: usize,
        found: usize,
        loc: &SourceLocation,
    ) -> SResult<T> {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        self.fail(
            ErrorKind::Semantic,
            loc,
            format!("'{}' expects {} arguments, have {}", method, expected, found),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LevelKind {
    Auto,
    Bias,
    Lod,
    Grad,
    Zero,
}

fn image_load(image: ResourceRef, coord: Expr, lod: Option<Expr>, ty: Type) -> Expr {
    Expr::new(
        ExprKind::ImageLoad {
            image,
            coord: Box::new(coord),
            lod: lod.map(Box::new),
        },
        ty,
    )
}

fn element(resource: ResourceRef, index: Expr) -> Place {
    Place::Element {
        resource,
        index: Box::new(index),
    }
}

fn offset_word(word: &Expr, k: u8) -> Expr {
    if k == 0 {
        return word.clone();
    }
    Expr::new(
        ExprKind::Binary {
            op: BinaryOp::Add,
            left: Box::new(word.clone()),
            right: Box::new(Expr::uint(k as u64)),
        },
        Type::UINT,
    )
}

fn swizzle_range(vector: Expr, start: u8, end: u8) -> Expr {
    super::convert::swizzle(vector, (start..end).collect())
}

/// Literals and plain variable reads are cheap to repeat.
fn is_simple(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Literal(_) | ExprKind::Load(Place::Local(_))
    )
}
