//! Syntax tree produced by the parser

use super::token::FloatSuffix;
use crate::diag::SourceLocation;
use crate::ir::{BinaryOp, Interpolation, MatrixLayout, ParamDirection, RegisterClass};

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationUnit {
    pub decls: Vec<Decl>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Struct(StructDef),
    Typedef(TypedefDecl),
    CBuffer(CBufferDef),
    Variable(VarDecl),
    Function(FunctionDef),
}

/// A type as written, e.g. `float4`, `Texture2D<float4>`, `matrix<float, 3, 3>`
#[derive(Debug, Clone, PartialEq)]
pub struct TypeName {
    pub name: String,
    pub args: Vec<TemplateArg>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateArg {
    Type(TypeName),
    Int(u64),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Qualifiers {
    pub is_static: bool,
    pub is_const: bool,
    pub is_uniform: bool,
    pub is_extern: bool,
    pub groupshared: bool,
    pub precise: bool,
    pub matrix_layout: Option<MatrixLayout>,
    pub interpolation: Option<Interpolation>,
    pub direction: Option<ParamDirection>,
    /// Geometry shader input topology (`triangle`, `lineadj`, ...)
    pub primitive: Option<InputPrimitive>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPrimitive {
    Point,
    Line,
    Triangle,
    LineAdj,
    TriangleAdj,
}

impl InputPrimitive {
    pub fn from_keyword(word: &str) -> Option<Self> {
        Some(match word {
            "point" => InputPrimitive::Point,
            "line" => InputPrimitive::Line,
            "triangle" => InputPrimitive::Triangle,
            "lineadj" => InputPrimitive::LineAdj,
            "triangleadj" => InputPrimitive::TriangleAdj,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    pub class: RegisterClass,
    pub index: u32,
    pub space: u32,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Initializer {
    Expr(Expr),
    List(Vec<Initializer>, SourceLocation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub ty: TypeName,
    /// Array dimensions; `None` for `[]`
    pub dims: Vec<Option<Expr>>,
    pub qualifiers: Qualifiers,
    pub semantic: Option<String>,
    pub register: Option<Register>,
    pub init: Option<Initializer>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<VarDecl>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedefDecl {
    pub name: String,
    pub ty: TypeName,
    pub dims: Vec<Option<Expr>>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CBufferDef {
    pub name: String,
    pub fields: Vec<VarDecl>,
    pub register: Option<Register>,
    /// `tbuffer` rather than `cbuffer`
    pub texture_buffer: bool,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub args: Vec<Expr>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub return_type: TypeName,
    pub return_qualifiers: Qualifiers,
    pub params: Vec<VarDecl>,
    pub semantic: Option<String>,
    pub attributes: Vec<Attribute>,
    /// `None` for a prototype
    pub body: Option<Vec<Stmt>>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Block(Vec<Stmt>),
    Decl(Vec<VarDecl>),
    Expr(Expr),
    If {
        condition: Expr,
        accept: Box<Stmt>,
        reject: Option<Box<Stmt>>,
    },
    For {
        init: Option<Box<Stmt>>,
        condition: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        condition: Expr,
    },
    Switch {
        selector: Expr,
        cases: Vec<CaseGroup>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Discard,
    Empty,
}

/// Consecutive `case`/`default` labels sharing one body
#[derive(Debug, Clone, PartialEq)]
pub struct CaseGroup {
    /// `None` for `default`
    pub labels: Vec<Option<Expr>>,
    pub body: Vec<Stmt>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Plus,
    Neg,
    Not,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int {
        value: u64,
        unsigned: bool,
    },
    Float {
        value: f64,
        suffix: FloatSuffix,
    },
    Bool(bool),
    /// Only meaningful as an attribute argument, e.g. `[domain("tri")]`
    Str(String),
    Ident(String),
    Unary {
        op: UnaryOperator,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `op` is set for compound assignments (`+=`)
    Assign {
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        accept: Box<Expr>,
        reject: Box<Expr>,
    },
    Cast {
        ty: TypeName,
        operand: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Constructor {
        ty: TypeName,
        args: Vec<Expr>,
    },
    MethodCall {
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Member {
        base: Box<Expr>,
        name: String,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Comma(Box<Expr>, Box<Expr>),
}

/// Shape of a built-in numeric type name such as `float4x3`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumericName<'a> {
    pub scalar: &'a str,
    pub rows: u8,
    pub cols: u8,
    pub is_vector: bool,
    pub is_matrix: bool,
}

pub const SCALAR_NAMES: &[&str] = &[
    "bool", "int", "uint", "dword", "half", "float", "double", "min16float", "min10float",
    "min16int", "min12int", "min16uint", "float16_t", "float32_t", "float64_t", "int16_t",
    "uint16_t", "int32_t", "uint32_t", "int64_t", "uint64_t",
];

pub const TEMPLATE_TYPES: &[&str] = &[
    "vector",
    "matrix",
    "Texture1D",
    "Texture1DArray",
    "Texture2D",
    "Texture2DArray",
    "Texture2DMS",
    "Texture2DMSArray",
    "Texture3D",
    "TextureCube",
    "TextureCubeArray",
    "RWTexture1D",
    "RWTexture1DArray",
    "RWTexture2D",
    "RWTexture2DArray",
    "RWTexture3D",
    "Buffer",
    "RWBuffer",
    "StructuredBuffer",
    "RWStructuredBuffer",
    "ConstantBuffer",
    "PointStream",
    "LineStream",
    "TriangleStream",
    "InputPatch",
    "OutputPatch",
];

pub const PLAIN_OBJECT_TYPES: &[&str] = &[
    "void",
    "ByteAddressBuffer",
    "RWByteAddressBuffer",
    "SamplerState",
    "SamplerComparisonState",
    "sampler",
];

/// Splits `float4x3` into its scalar name and shape.
pub fn numeric_name(name: &str) -> Option<NumericName<'_>> {
    if SCALAR_NAMES.contains(&name) {
        return Some(NumericName {
            scalar: name,
            rows: 1,
            cols: 1,
            is_vector: false,
            is_matrix: false,
        });
    }
    let bytes = name.as_bytes();
    let dim = |b: u8| (b'1'..=b'4').contains(&b).then_some(b - b'0');
    if bytes.len() >= 4 && bytes[bytes.len() - 2] == b'x' {
        let (rows, cols) = (dim(bytes[bytes.len() - 3])?, dim(bytes[bytes.len() - 1])?);
        let scalar = &name[..name.len() - 3];
        return SCALAR_NAMES.contains(&scalar).then_some(NumericName {
            scalar,
            rows,
            cols,
            is_vector: false,
            is_matrix: true,
        });
    }
    let size = dim(*bytes.last()?)?;
    let scalar = &name[..name.len() - 1];
    SCALAR_NAMES.contains(&scalar).then_some(NumericName {
        scalar,
        rows: 1,
        cols: size,
        is_vector: true,
        is_matrix: false,
    })
}

pub fn is_builtin_type(name: &str) -> bool {
    TEMPLATE_TYPES.contains(&name) || PLAIN_OBJECT_TYPES.contains(&name) || numeric_name(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_names() {
        let m = numeric_name("float4x3").unwrap();
        assert_eq!((m.scalar, m.rows, m.cols, m.is_matrix), ("float", 4, 3, true));
        let v = numeric_name("uint2").unwrap();
        assert_eq!((v.scalar, v.cols, v.is_vector), ("uint", 2, true));
        let h = numeric_name("float16_t4").unwrap();
        assert_eq!(h.scalar, "float16_t");
        assert!(numeric_name("float5").is_none());
        assert!(numeric_name("int16_t").is_some_and(|n| !n.is_vector));
        assert!(numeric_name("myfloat4").is_none());
    }

    #[test]
    fn test_builtin_types() {
        assert!(is_builtin_type("Texture2D"));
        assert!(is_builtin_type("RWByteAddressBuffer"));
        assert!(!is_builtin_type("MyStruct"));
    }
}
