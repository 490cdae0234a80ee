//! Tokens produced by the lexer

use crate::diag::SourceLocation;
use crate::ir::MatrixLayout;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatSuffix {
    None,
    /// `f`
    Float,
    /// `h`
    Half,
    /// `l`
    Double,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifiers and keywords
    Ident(String),
    Int {
        value: u64,
        unsigned: bool,
    },
    Float {
        value: f64,
        suffix: FloatSuffix,
    },
    Str(String),
    Punct(&'static str),
    /// `#pragma pack_matrix(...)`
    PackMatrix(MatrixLayout),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: SourceLocation,
}

impl Token {
    pub fn is_punct(&self, punct: &str) -> bool {
        matches!(self.kind, TokenKind::Punct(p) if p == punct)
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(s) if s == name)
    }

    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(s) => f.write_str(s),
            TokenKind::Int { value, .. } => write!(f, "{}", value),
            TokenKind::Float { value, .. } => write!(f, "{}", value),
            TokenKind::Str(s) => write!(f, "\"{}\"", s),
            TokenKind::Punct(p) => f.write_str(p),
            TokenKind::PackMatrix(_) => f.write_str("#pragma pack_matrix"),
            TokenKind::Eof => f.write_str("end of file"),
        }
    }
}

/// Punctuators, longest first so the lexer can match greedily.
pub const PUNCTUATORS: &[&str] = &[
    "<<=", ">>=", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<", ">>", "<=",
    ">=", "==", "!=", "&&", "||", "::", "+", "-", "*", "/", "%", "<", ">", "=", "!", "~", "&",
    "|", "^", "?", ":", ";", ",", ".", "(", ")", "[", "]", "{", "}",
];
