//! GLSL to SPIR-V front-end compiler
//!
//! This crate implements a Vulkan-flavored GLSL compiler with:
//! - A preprocessor with pluggable `#include` resolution
//! - Centralized type definitions with interning
//! - A structured-control-flow IR between the typed tree and the binary
//! - Direct SPIR-V word emission with deduplicated types and constants
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        CompilerContext                          │
//! │  ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌─────────────┐  │
//! │  │ Interner  │  │  Types    │  │ SourceMap │  │ Diagnostics │  │
//! │  │ (strings) │  │ (Ty→Kind) │  │ (files)   │  │ (collected) │  │
//! │  └───────────┘  └───────────┘  └───────────┘  └─────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//!         ↑              ↑              ↑              ↑
//!         │              │              │              │
//!   ┌─────┴─────┐  ┌─────┴────┐  ┌─────┴─────┐  ┌─────┴────┐
//!   │ Preprocess│→ │  Parse   │→ │   Check   │→ │  Lower   │→ Emit
//!   │  (text)   │  │  (AST)   │  │  (typed)  │  │  (CFG)   │  (words)
//!   └───────────┘  └──────────┘  └───────────┘  └──────────┘
//! ```
//!
//! One [`Compiler`] instance is bound to a [`TargetEnv`] for its lifetime and
//! runs the whole pipeline per compile call; compiled stages link into a
//! [`Program`] by matching `in`/`out` interfaces.

// Core modules
pub mod compiler;
pub mod context;
pub mod diagnostic;
pub mod ids;
pub mod index_vec;
pub mod interner;
pub mod limits;
pub mod source;
pub mod stage;
pub mod target;

// Pipeline modules
pub mod ir;
pub mod preprocess;
pub mod program;
pub mod sema;
pub mod spv;
pub mod syntax;

// Re-exports
pub use compiler::{process_compiler_count, CompileError, Compiler};
pub use context::CompilerContext;
pub use diagnostic::{Code, Diagnostic, Diagnostics, Severity};
pub use ids::{BlockId, FuncId, GlobalId, LocalId, MemberIdx, StructId, ValueId};
pub use index_vec::{Idx, IndexVec};
pub use interner::{Interner, Name};
pub use limits::ResourceLimits;
pub use preprocess::{FileIncludeResolver, IncludeResolver, MemoryIncludeResolver};
pub use program::{CompileArtifact, InterfaceVar, LinkError, Program};
pub use sema::{Ty, TyKind};
pub use source::{Source, SourceId, SourceMap, Span};
pub use stage::ShaderStage;
pub use syntax::{parse, ParseError};
pub use target::{ClientVersion, SpirvVersion, TargetEnv};
