//! Semantic analysis: type interning, name resolution, builtin function
//! signatures, and validation of the parsed tree.

pub mod builtins;
pub mod check;
pub mod scope;
pub mod types;

pub use check::{check, check_with_limits, CheckedUnit, ExecInfo, Global, GlobalKind};
pub use types::{Ty, TyKind, Types};
