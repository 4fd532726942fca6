//! Central compiler context.

use std::sync::Arc;

use crate::diagnostic::Diagnostics;
use crate::interner::{Interner, Name};
use crate::sema::types::Types;
use crate::source::SourceMap;

/// Stores the state shared by every pass of one compile call.
///
/// A fresh context is created per compilation, so nothing here needs
/// synchronization beyond the interner (which may be shared between
/// compiler instances).
pub struct CompilerContext {
    /// String interner (shared, thread-safe).
    pub interner: Arc<Interner>,
    /// Type interner and struct definitions.
    pub types: Types,
    /// Source file management.
    pub source_map: SourceMap,
    /// Accumulated diagnostics.
    pub diagnostics: Diagnostics,
}

impl Default for CompilerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilerContext {
    pub fn new() -> Self {
        Self::with_interner(Arc::new(Interner::new()))
    }

    /// Create with a shared interner.
    pub fn with_interner(interner: Arc<Interner>) -> Self {
        Self {
            interner,
            types: Types::new(),
            source_map: SourceMap::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Intern a string.
    pub fn intern(&self, s: &str) -> Name {
        self.interner.intern(s)
    }

    /// Get the string for an interned name.
    pub fn str(&self, name: Name) -> String {
        self.interner.str(name).to_string()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    /// Render all diagnostics.
    pub fn render_diagnostics(&self) -> String {
        self.diagnostics.render(&self.source_map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_basic() {
        let ctx = CompilerContext::new();
        let name = ctx.intern("gl_Position");
        assert_eq!(ctx.str(name), "gl_Position");
    }

    #[test]
    fn test_context_shared_interner() {
        let interner = Arc::new(Interner::new());
        let name1 = interner.intern("shared");

        let ctx = CompilerContext::with_interner(interner.clone());
        let name2 = ctx.intern("shared");

        assert_eq!(name1, name2);
    }
}
