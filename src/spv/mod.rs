//! SPIR-V binary emission.

pub mod emit;
mod instruction;

pub use emit::emit;
