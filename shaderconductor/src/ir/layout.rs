//! Memory layout of buffer contents.
//!
//! Constant buffers follow the HLSL packing rules: members are packed into
//! 16-byte registers, a member never straddles a register boundary, and
//! arrays, matrices and structs always start a new register. Storage
//! buffers use std430, and the GLSL emitter compares against std140 to see
//! whether explicit offsets are required.

use super::{Arena, CBufferMember, MatrixLayout, StructDecl, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutRules {
    HlslCBuffer,
    Std140,
    Std430,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeLayout {
    pub size: u32,
    pub align: u32,
}

pub const REGISTER_SIZE: u32 = 16;
pub const MATRIX_STRIDE: u32 = 16;

pub fn round_up(value: u32, align: u32) -> u32 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

/// Number and size of the vectors a matrix is stored as.
///
/// Row-major storage keeps each HLSL row contiguous; column-major keeps
/// each column contiguous.
pub fn matrix_vectors(rows: u8, cols: u8, layout: MatrixLayout) -> (u32, u32) {
    match layout {
        MatrixLayout::RowMajor => (rows as u32, cols as u32),
        MatrixLayout::ColumnMajor => (cols as u32, rows as u32),
    }
}

pub fn type_layout(
    ty: &Type,
    structs: &Arena<StructDecl>,
    rules: LayoutRules,
    matrix_layout: MatrixLayout,
) -> TypeLayout {
    match ty {
        Type::Scalar(s) => TypeLayout {
            size: s.width as u32,
            align: s.width as u32,
        },
        Type::Vector(s, n) => {
            let w = s.width as u32;
            let align = match rules {
                LayoutRules::HlslCBuffer => w,
                _ if *n == 2 => 2 * w,
                _ => 4 * w,
            };
            TypeLayout {
                size: *n as u32 * w,
                align,
            }
        }
        Type::Matrix { scalar, rows, cols } => {
            let w = scalar.width as u32;
            let (count, len) = matrix_vectors(*rows, *cols, matrix_layout);
            let stride = matrix_stride(len, w, rules);
            match rules {
                LayoutRules::HlslCBuffer => TypeLayout {
                    size: (count - 1) * stride + len * w,
                    align: REGISTER_SIZE,
                },
                _ => TypeLayout {
                    size: count * stride,
                    align: stride,
                },
            }
        }
        Type::Array(elem, n) => {
            let inner = type_layout(elem, structs, rules, matrix_layout);
            let stride = array_stride(elem, structs, rules, matrix_layout);
            match rules {
                LayoutRules::HlslCBuffer => TypeLayout {
                    size: n.saturating_sub(1) * stride + inner.size,
                    align: REGISTER_SIZE,
                },
                LayoutRules::Std140 => TypeLayout {
                    size: n * stride,
                    align: round_up(inner.align, REGISTER_SIZE),
                },
                LayoutRules::Std430 => TypeLayout {
                    size: n * stride,
                    align: inner.align,
                },
            }
        }
        Type::Struct(h) => {
            let decl = &structs[*h];
            let (_, end, align) = struct_layout(decl, structs, rules, matrix_layout);
            match rules {
                LayoutRules::HlslCBuffer => TypeLayout {
                    size: end,
                    align: REGISTER_SIZE,
                },
                LayoutRules::Std140 => {
                    let align = round_up(align, REGISTER_SIZE);
                    TypeLayout {
                        size: round_up(end, align),
                        align,
                    }
                }
                LayoutRules::Std430 => TypeLayout {
                    size: round_up(end, align),
                    align,
                },
            }
        }
        _ => TypeLayout { size: 0, align: 1 },
    }
}

fn matrix_stride(len: u32, width: u32, rules: LayoutRules) -> u32 {
    match rules {
        LayoutRules::HlslCBuffer | LayoutRules::Std140 => MATRIX_STRIDE,
        LayoutRules::Std430 => {
            if len == 2 {
                2 * width
            } else {
                4 * width
            }
        }
    }
}

/// Stride between consecutive elements of an array of `elem`.
pub fn array_stride(
    elem: &Type,
    structs: &Arena<StructDecl>,
    rules: LayoutRules,
    matrix_layout: MatrixLayout,
) -> u32 {
    let inner = type_layout(elem, structs, rules, matrix_layout);
    match rules {
        LayoutRules::HlslCBuffer | LayoutRules::Std140 => round_up(inner.size, REGISTER_SIZE),
        LayoutRules::Std430 => round_up(inner.size, inner.align),
    }
}

/// Stride between the vectors of a matrix.
pub fn matrix_stride_of(ty: &Type, rules: LayoutRules, matrix_layout: MatrixLayout) -> u32 {
    match ty {
        Type::Matrix { scalar, rows, cols } => {
            let (_, len) = matrix_vectors(*rows, *cols, matrix_layout);
            matrix_stride(len, scalar.width as u32, rules)
        }
        _ => 0,
    }
}

/// Places one member after `offset`, returning its start.
pub fn place_member(offset: u32, layout: TypeLayout, rules: LayoutRules) -> u32 {
    match rules {
        LayoutRules::HlslCBuffer => {
            if layout.align >= REGISTER_SIZE {
                round_up(offset, REGISTER_SIZE)
            } else if offset % REGISTER_SIZE + layout.size > REGISTER_SIZE {
                round_up(offset, REGISTER_SIZE)
            } else {
                round_up(offset, layout.align)
            }
        }
        LayoutRules::Std140 | LayoutRules::Std430 => round_up(offset, layout.align),
    }
}

/// Member offsets, end offset and alignment of a struct.
pub fn struct_layout(
    decl: &StructDecl,
    structs: &Arena<StructDecl>,
    rules: LayoutRules,
    default_layout: MatrixLayout,
) -> (Vec<u32>, u32, u32) {
    let mut offsets = Vec::with_capacity(decl.members.len());
    let mut end = 0;
    let mut align = 1;
    for member in &decl.members {
        let ml = member.matrix_layout.unwrap_or(default_layout);
        let layout = type_layout(&member.ty, structs, rules, ml);
        let offset = place_member(end, layout, rules);
        offsets.push(offset);
        end = offset + layout.size;
        align = align.max(layout.align);
    }
    (offsets, end, align)
}

/// Packs loose constant-buffer members; the total size is a whole number
/// of registers.
pub fn pack_cbuffer(
    members: Vec<(String, Type, MatrixLayout)>,
    structs: &Arena<StructDecl>,
) -> (Vec<CBufferMember>, u32) {
    let mut packed = Vec::with_capacity(members.len());
    let mut end = 0;
    for (name, ty, matrix_layout) in members {
        let layout = type_layout(&ty, structs, LayoutRules::HlslCBuffer, matrix_layout);
        let offset = place_member(end, layout, LayoutRules::HlslCBuffer);
        end = offset + layout.size;
        packed.push(CBufferMember {
            name,
            ty,
            offset,
            size: layout.size,
            matrix_layout,
        });
    }
    (packed, round_up(end, REGISTER_SIZE))
}

/// std140 offsets of the same members, for comparison with HLSL packing.
pub fn std140_offsets(members: &[CBufferMember], structs: &Arena<StructDecl>) -> Vec<u32> {
    let mut end = 0;
    members
        .iter()
        .map(|m| {
            let layout = type_layout(&m.ty, structs, LayoutRules::Std140, m.matrix_layout);
            let offset = place_member(end, layout, LayoutRules::Std140);
            end = offset + layout.size;
            offset
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Scalar, StructMember};
    use pretty_assertions::assert_eq;

    fn pack(members: &[(&str, Type)]) -> (Vec<u32>, u32) {
        let structs = Arena::new();
        let (packed, size) = pack_cbuffer(
            members
                .iter()
                .map(|(n, t)| (n.to_string(), t.clone(), MatrixLayout::RowMajor))
                .collect(),
            &structs,
        );
        (packed.iter().map(|m| m.offset).collect(), size)
    }

    #[test]
    fn test_scalars_share_a_register() {
        let (offsets, size) = pack(&[
            ("a", Type::FLOAT),
            ("b", Type::Vector(Scalar::F32, 2)),
            ("c", Type::FLOAT),
        ]);
        assert_eq!(offsets, vec![0, 4, 12]);
        assert_eq!(size, 16);
    }

    #[test]
    fn test_no_register_straddling() {
        let (offsets, size) = pack(&[
            ("a", Type::Vector(Scalar::F32, 2)),
            ("b", Type::Vector(Scalar::F32, 3)),
            ("c", Type::FLOAT),
        ]);
        assert_eq!(offsets, vec![0, 16, 28]);
        assert_eq!(size, 32);
    }

    #[test]
    fn test_arrays_and_matrices_start_registers() {
        let (offsets, size) = pack(&[
            ("a", Type::FLOAT),
            ("b", Type::Array(Box::new(Type::FLOAT), 3)),
            ("c", Type::FLOAT),
            (
                "m",
                Type::Matrix {
                    scalar: Scalar::F32,
                    rows: 4,
                    cols: 4,
                },
            ),
        ]);
        // array: 2 * 16 + 4 = 36 bytes, so `c` packs into its last register
        assert_eq!(offsets, vec![0, 16, 52, 64]);
        assert_eq!(size, 128);
    }

    #[test]
    fn test_std140_differs_for_float2_after_float() {
        let structs = Arena::new();
        let (packed, _) = pack_cbuffer(
            vec![
                ("a".into(), Type::FLOAT, MatrixLayout::RowMajor),
                ("b".into(), Type::Vector(Scalar::F32, 2), MatrixLayout::RowMajor),
            ],
            &structs,
        );
        assert_eq!(std140_offsets(&packed, &structs), vec![0, 8]);
        assert_eq!(packed[1].offset, 4);
    }

    #[test]
    fn test_struct_layout_std430() {
        let mut structs = Arena::new();
        let h = structs.append(StructDecl {
            name: "S".into(),
            members: vec![
                StructMember {
                    name: "p".into(),
                    ty: Type::Vector(Scalar::F32, 3),
                    semantic: None,
                    interpolation: None,
                    matrix_layout: None,
                },
                StructMember {
                    name: "w".into(),
                    ty: Type::FLOAT,
                    semantic: None,
                    interpolation: None,
                    matrix_layout: None,
                },
            ],
        });
        let layout = type_layout(
            &Type::Struct(h),
            &structs,
            LayoutRules::Std430,
            MatrixLayout::RowMajor,
        );
        assert_eq!(layout, TypeLayout { size: 16, align: 16 });
        let (offsets, _, _) =
            struct_layout(&structs[h], &structs, LayoutRules::Std430, MatrixLayout::RowMajor);
        assert_eq!(offsets, vec![0, 12]);
    }
}
