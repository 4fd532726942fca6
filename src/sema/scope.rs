//! Lexically scoped symbol table used during validation.

use crate::ids::{GlobalId, LocalId};
use crate::interner::Name;
use std::collections::HashMap;

/// What a name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Global(GlobalId),
    Local(LocalId),
    /// Member of an anonymous interface block, addressed through the
    /// block's global plus a member index.
    BlockMember(GlobalId, u32),
}

/// A stack of lexical scopes. The outermost scope holds globals; each
/// compound statement pushes a scope. Shadowing across scopes is legal,
/// redeclaration within one scope is not.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<HashMap<Name, Symbol>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    pub fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot pop the global scope");
        self.scopes.pop();
    }

    /// Declare a name in the innermost scope. Returns the previous symbol
    /// if the name is already taken there.
    pub fn declare(&mut self, name: Name, symbol: Symbol) -> Option<Symbol> {
        let scope = self
            .scopes
            .last_mut()
            .unwrap_or_else(|| unreachable!("scope stack is never empty"));
        scope.insert(name, symbol)
    }

    /// Resolve a name, innermost scope first.
    pub fn lookup(&self, name: Name) -> Option<Symbol> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(&name).copied())
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interner::Interner;

    #[test]
    fn test_shadowing_and_restore() {
        let interner = Interner::default();
        let x = interner.intern("x");
        let y = interner.intern("y");

        let mut scopes = ScopeStack::new();
        assert!(scopes.declare(x, Symbol::Global(GlobalId::new(0))).is_none());

        scopes.push();
        assert!(scopes.declare(x, Symbol::Local(LocalId::new(0))).is_none());
        assert_eq!(scopes.lookup(x), Some(Symbol::Local(LocalId::new(0))));
        assert_eq!(scopes.lookup(y), None);
        scopes.pop();

        assert_eq!(scopes.lookup(x), Some(Symbol::Global(GlobalId::new(0))));
    }

    #[test]
    fn test_redeclaration_in_same_scope() {
        let interner = Interner::default();
        let x = interner.intern("x");

        let mut scopes = ScopeStack::new();
        scopes.push();
        assert!(scopes.declare(x, Symbol::Local(LocalId::new(0))).is_none());
        assert_eq!(
            scopes.declare(x, Symbol::Local(LocalId::new(1))),
            Some(Symbol::Local(LocalId::new(0)))
        );
    }
}
