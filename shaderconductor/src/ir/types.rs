//! Value and resource types shared by the front-end, IR and emitters

use super::arena::{Arena, Handle};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    Sint,
    Uint,
    Float,
}

/// A scalar kind with its width in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scalar {
    pub kind: ScalarKind,
    pub width: u8,
}

impl Scalar {
    pub const BOOL: Scalar = Scalar::new(ScalarKind::Bool, 4);
    pub const I32: Scalar = Scalar::new(ScalarKind::Sint, 4);
    pub const U32: Scalar = Scalar::new(ScalarKind::Uint, 4);
    pub const F32: Scalar = Scalar::new(ScalarKind::Float, 4);
    pub const F16: Scalar = Scalar::new(ScalarKind::Float, 2);
    pub const I16: Scalar = Scalar::new(ScalarKind::Sint, 2);
    pub const U16: Scalar = Scalar::new(ScalarKind::Uint, 2);
    pub const F64: Scalar = Scalar::new(ScalarKind::Float, 8);

    pub const fn new(kind: ScalarKind, width: u8) -> Self {
        Scalar { kind, width }
    }

    pub fn is_float(self) -> bool {
        self.kind == ScalarKind::Float
    }

    pub fn is_integer(self) -> bool {
        matches!(self.kind, ScalarKind::Sint | ScalarKind::Uint)
    }

    pub fn is_signed(self) -> bool {
        matches!(self.kind, ScalarKind::Sint | ScalarKind::Float)
    }

    pub fn is_16bit(self) -> bool {
        self.width == 2
    }

    /// Conversion rank used to pick the common type of a binary expression.
    pub fn rank(self) -> u8 {
        match (self.kind, self.width) {
            (ScalarKind::Bool, _) => 0,
            (ScalarKind::Sint, 2) => 1,
            (ScalarKind::Uint, 2) => 2,
            (ScalarKind::Sint, _) => 3,
            (ScalarKind::Uint, _) => 4,
            (ScalarKind::Float, 2) => 5,
            (ScalarKind::Float, 4) => 6,
            (ScalarKind::Float, _) => 7,
        }
    }

    /// HLSL spelling of the scalar type.
    pub fn hlsl_name(self) -> &'static str {
        match (self.kind, self.width) {
            (ScalarKind::Bool, _) => "bool",
            (ScalarKind::Sint, 2) => "int16_t",
            (ScalarKind::Sint, _) => "int",
            (ScalarKind::Uint, 2) => "uint16_t",
            (ScalarKind::Uint, _) => "uint",
            (ScalarKind::Float, 2) => "half",
            (ScalarKind::Float, 8) => "double",
            (ScalarKind::Float, _) => "float",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDim {
    D1,
    D2,
    D3,
    Cube,
}

impl TextureDim {
    /// Number of coordinate components (without the array layer).
    pub fn coord_size(self) -> u8 {
        match self {
            TextureDim::D1 => 1,
            TextureDim::D2 => 2,
            TextureDim::D3 | TextureDim::Cube => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureType {
    pub dim: TextureDim,
    pub arrayed: bool,
    pub multisampled: bool,
    /// Component type of a texel
    pub sampled: Scalar,
    /// Components per texel (1-4)
    pub components: u8,
    /// Writable (`RWTexture*`)
    pub rw: bool,
}

impl TextureType {
    /// Coordinate components including the array layer.
    pub fn full_coord_size(&self) -> u8 {
        self.dim.coord_size() + self.arrayed as u8
    }

    /// HLSL spelling, for example `Texture2DArray<float4>`.
    pub fn hlsl_name(&self) -> String {
        let dim = match self.dim {
            TextureDim::D1 => "1D",
            TextureDim::D2 => "2D",
            TextureDim::D3 => "3D",
            TextureDim::Cube => "Cube",
        };
        format!(
            "{}Texture{}{}{}<{}>",
            if self.rw { "RW" } else { "" },
            dim,
            if self.multisampled { "MS" } else { "" },
            if self.arrayed { "Array" } else { "" },
            Type::texel(self.sampled, self.components).hlsl_name_plain()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// `Buffer<T>` / `RWBuffer<T>`
    Typed,
    /// `StructuredBuffer<T>` / `RWStructuredBuffer<T>`
    Structured,
    /// `ByteAddressBuffer` / `RWByteAddressBuffer`
    ByteAddress,
}

/// Register class a resource binds to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    /// `t` registers: read-only textures and buffers
    ShaderResource,
    /// `s` registers
    Sampler,
    /// `b` registers
    ConstantBuffer,
    /// `u` registers: read-write resources
    UnorderedAccess,
}

impl RegisterClass {
    pub fn prefix(self) -> char {
        match self {
            RegisterClass::ShaderResource => 't',
            RegisterClass::Sampler => 's',
            RegisterClass::ConstantBuffer => 'b',
            RegisterClass::UnorderedAccess => 'u',
        }
    }

    pub fn from_prefix(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            't' => Some(RegisterClass::ShaderResource),
            's' => Some(RegisterClass::Sampler),
            'b' => Some(RegisterClass::ConstantBuffer),
            'u' => Some(RegisterClass::UnorderedAccess),
            _ => None,
        }
    }
}

/// Matrix storage order in buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixLayout {
    RowMajor,
    ColumnMajor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interpolation {
    Linear,
    NoInterpolation,
    Centroid,
    NoPerspective,
    Sample,
}

/// Semantic name with its numeric suffix split off (`TEXCOORD3` -> `TEXCOORD`, 3)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Semantic {
    pub name: String,
    pub index: u32,
}

impl Semantic {
    pub fn parse(text: &str) -> Self {
        let digits = text
            .bytes()
            .rev()
            .take_while(|b| b.is_ascii_digit())
            .count();
        let (name, index) = text.split_at(text.len() - digits);
        Semantic {
            name: name.to_string(),
            index: index.parse().unwrap_or(0),
        }
    }

    pub fn is_system_value(&self) -> bool {
        self.name.len() > 3 && self.name[..3].eq_ignore_ascii_case("SV_")
    }

    /// Upper-cased name, the form semantics are compared in.
    pub fn key(&self) -> String {
        self.name.to_ascii_uppercase()
    }
}

impl fmt::Display for Semantic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index == 0 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}{}", self.name, self.index)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructMember {
    pub name: String,
    pub ty: Type,
    pub semantic: Option<Semantic>,
    pub interpolation: Option<Interpolation>,
    pub matrix_layout: Option<MatrixLayout>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: String,
    pub members: Vec<StructMember>,
}

impl StructDecl {
    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Scalar(Scalar),
    Vector(Scalar, u8),
    /// HLSL `floatRxC`: `rows` rows of `cols` components
    Matrix {
        scalar: Scalar,
        rows: u8,
        cols: u8,
    },
    Array(Box<Type>, u32),
    Struct(Handle<StructDecl>),
    Texture(TextureType),
    Sampler {
        comparison: bool,
    },
    Buffer {
        kind: BufferKind,
        rw: bool,
        elem: Box<Type>,
    },
}

impl Type {
    pub const BOOL: Type = Type::Scalar(Scalar::BOOL);
    pub const INT: Type = Type::Scalar(Scalar::I32);
    pub const UINT: Type = Type::Scalar(Scalar::U32);
    pub const FLOAT: Type = Type::Scalar(Scalar::F32);

    /// Scalar for one component, vector otherwise.
    pub fn vector(scalar: Scalar, size: u8) -> Type {
        if size <= 1 {
            Type::Scalar(scalar)
        } else {
            Type::Vector(scalar, size)
        }
    }

    pub fn texel(scalar: Scalar, components: u8) -> Type {
        Type::vector(scalar, components)
    }

    pub fn scalar(&self) -> Option<Scalar> {
        match *self {
            Type::Scalar(s) | Type::Vector(s, _) | Type::Matrix { scalar: s, .. } => Some(s),
            _ => None,
        }
    }

    /// Number of components for scalars and vectors.
    pub fn vector_size(&self) -> Option<u8> {
        match *self {
            Type::Scalar(_) => Some(1),
            Type::Vector(_, n) => Some(n),
            _ => None,
        }
    }

    /// Total number of numeric components (matrices count every element).
    pub fn component_count(&self) -> Option<u32> {
        match *self {
            Type::Scalar(_) => Some(1),
            Type::Vector(_, n) => Some(n as u32),
            Type::Matrix { rows, cols, .. } => Some(rows as u32 * cols as u32),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Scalar(_) | Type::Vector(..) | Type::Matrix { .. })
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Scalar(_))
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Type::Vector(..))
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, Type::Matrix { .. })
    }

    pub fn is_bool_like(&self) -> bool {
        self.scalar().is_some_and(|s| s.kind == ScalarKind::Bool)
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, Type::Texture(_) | Type::Sampler { .. } | Type::Buffer { .. })
    }

    /// Same shape with a different scalar.
    pub fn with_scalar(&self, scalar: Scalar) -> Type {
        match *self {
            Type::Scalar(_) => Type::Scalar(scalar),
            Type::Vector(_, n) => Type::Vector(scalar, n),
            Type::Matrix { rows, cols, .. } => Type::Matrix { scalar, rows, cols },
            ref other => other.clone(),
        }
    }

    /// Register class for resource types.
    pub fn register_class(&self) -> Option<RegisterClass> {
        match self {
            Type::Texture(t) if t.rw => Some(RegisterClass::UnorderedAccess),
            Type::Texture(_) => Some(RegisterClass::ShaderResource),
            Type::Sampler { .. } => Some(RegisterClass::Sampler),
            Type::Buffer { rw: true, .. } => Some(RegisterClass::UnorderedAccess),
            Type::Buffer { .. } => Some(RegisterClass::ShaderResource),
            _ => None,
        }
    }

    /// Whether any part of the type uses a 16-bit scalar.
    pub fn uses_16bit(&self, structs: &Arena<StructDecl>) -> bool {
        match self {
            Type::Scalar(s) | Type::Vector(s, _) | Type::Matrix { scalar: s, .. } => s.is_16bit(),
            Type::Array(base, _) => base.uses_16bit(structs),
            Type::Struct(h) => structs[*h].members.iter().any(|m| m.ty.uses_16bit(structs)),
            Type::Texture(t) => t.sampled.is_16bit(),
            Type::Buffer { elem, .. } => elem.uses_16bit(structs),
            _ => false,
        }
    }

    pub fn uses_64bit(&self, structs: &Arena<StructDecl>) -> bool {
        match self {
            Type::Scalar(s) | Type::Vector(s, _) | Type::Matrix { scalar: s, .. } => s.width == 8,
            Type::Array(base, _) => base.uses_64bit(structs),
            Type::Struct(h) => structs[*h].members.iter().any(|m| m.ty.uses_64bit(structs)),
            Type::Buffer { elem, .. } => elem.uses_64bit(structs),
            _ => false,
        }
    }

    /// HLSL spelling for types that do not need struct names.
    pub fn hlsl_name_plain(&self) -> String {
        match self {
            Type::Void => "void".into(),
            Type::Scalar(s) => s.hlsl_name().into(),
            Type::Vector(s, n) => format!("{}{}", s.hlsl_name(), n),
            Type::Matrix { scalar, rows, cols } => {
                format!("{}{}x{}", scalar.hlsl_name(), rows, cols)
            }
            Type::Array(base, n) => format!("{}[{}]", base.hlsl_name_plain(), n),
            Type::Struct(h) => format!("struct#{}", h.index()),
            Type::Texture(t) => t.hlsl_name(),
            Type::Sampler { comparison: false } => "SamplerState".into(),
            Type::Sampler { comparison: true } => "SamplerComparisonState".into(),
            Type::Buffer { kind, rw, elem } => {
                let rw = if *rw { "RW" } else { "" };
                match kind {
                    BufferKind::Typed => format!("{}Buffer<{}>", rw, elem.hlsl_name_plain()),
                    BufferKind::Structured => {
                        format!("{}StructuredBuffer<{}>", rw, elem.hlsl_name_plain())
                    }
                    BufferKind::ByteAddress => format!("{}ByteAddressBuffer", rw),
                }
            }
        }
    }

    /// Human-readable name used in diagnostics.
    pub fn display(&self, structs: &Arena<StructDecl>) -> String {
        match self {
            Type::Struct(h) => match structs.get(*h) {
                Some(decl) => decl.name.clone(),
                None => self.hlsl_name_plain(),
            },
            Type::Array(base, n) => format!("{}[{}]", base.display(structs), n),
            Type::Buffer { kind, rw, elem } if *kind == BufferKind::Structured => format!(
                "{}StructuredBuffer<{}>",
                if *rw { "RW" } else { "" },
                elem.display(structs)
            ),
            _ => self.hlsl_name_plain(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_parse_splits_index() {
        assert_eq!(
            Semantic::parse("TEXCOORD3"),
            Semantic {
                name: "TEXCOORD".into(),
                index: 3
            }
        );
        let pos = Semantic::parse("SV_Position");
        assert_eq!(pos.index, 0);
        assert!(pos.is_system_value());
        assert!(!Semantic::parse("COLOR").is_system_value());
    }

    #[test]
    fn test_type_names() {
        let m = Type::Matrix {
            scalar: Scalar::F32,
            rows: 4,
            cols: 3,
        };
        assert_eq!(m.hlsl_name_plain(), "float4x3");
        assert_eq!(m.component_count(), Some(12));
        assert_eq!(Type::vector(Scalar::F16, 1), Type::Scalar(Scalar::F16));
        let tex = TextureType {
            dim: TextureDim::D2,
            arrayed: true,
            multisampled: false,
            sampled: Scalar::F32,
            components: 4,
            rw: false,
        };
        assert_eq!(tex.hlsl_name(), "Texture2DArray<float4>");
        assert_eq!(tex.full_coord_size(), 3);
    }

    #[test]
    fn test_register_classes() {
        assert_eq!(
            Type::Sampler { comparison: false }.register_class(),
            Some(RegisterClass::Sampler)
        );
        let rw = Type::Buffer {
            kind: BufferKind::Structured,
            rw: true,
            elem: Box::new(Type::FLOAT),
        };
        assert_eq!(rw.register_class(), Some(RegisterClass::UnorderedAccess));
        assert_eq!(RegisterClass::from_prefix('T'), Some(RegisterClass::ShaderResource));
    }
}
