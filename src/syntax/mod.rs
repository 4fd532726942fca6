//! GLSL syntax: pest grammar, AST, and parser.

pub mod ast;
pub mod parser;

pub use parser::{parse, ParseError};
