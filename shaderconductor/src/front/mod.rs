//! HLSL front-end: preprocessing, lexing, parsing and semantic analysis

pub mod ast;
pub mod include;
pub mod intrinsics;
pub mod lexer;
pub mod parser;
pub mod preprocess;
pub mod sema;
pub mod token;
