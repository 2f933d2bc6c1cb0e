//! Lexical scopes and symbol tables.
//!
//! Scopes form a tree in the module's scope arena. Each scope maps names
//! to declaration lists in declaration order; a list longer than one
//! element only ever holds function declarations (overloading).

use indexmap::IndexMap;

use crate::ast::{ExprKind, Module};
use crate::index_vec::{ExprId, Name, ScopeId};

#[derive(Debug, Clone)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    symbols: IndexMap<Name, Vec<ExprId>>,
}

impl Scope {
    pub fn new(parent: Option<ScopeId>) -> Self {
        Self {
            parent,
            symbols: IndexMap::new(),
        }
    }

    pub fn symbols(&self) -> impl Iterator<Item = (Name, &[ExprId])> {
        self.symbols.iter().map(|(n, d)| (*n, d.as_slice()))
    }
}

/// A rejected declaration, carrying the conflicting existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redeclaration {
    pub existing: ExprId,
}

impl Module {
    /// Declarations for `name` in this scope only.
    pub fn find(&self, scope: ScopeId, name: Name) -> &[ExprId] {
        self.scopes[scope]
            .symbols
            .get(&name)
            .map(|d| d.as_slice())
            .unwrap_or(&[])
    }

    /// Walk ancestor scopes and return the first non-empty hit.
    pub fn find_recursive(&self, scope: ScopeId, name: Name) -> Vec<ExprId> {
        let mut current = Some(scope);
        while let Some(s) = current {
            let found = self.find(s, name);
            if !found.is_empty() {
                return found.to_vec();
            }
            current = self.scopes[s].parent;
        }
        Vec::new()
    }

    /// Declare `name` in `scope`.
    ///
    /// Succeeds unless a binding already exists and the existing binding
    /// and the new one are not both functions.
    pub fn declare(
        &mut self,
        scope: ScopeId,
        name: Name,
        decl: ExprId,
    ) -> Result<(), Redeclaration> {
        let new_is_function = matches!(self.exprs[decl].kind, ExprKind::FuncDecl { .. });
        if let Some(existing) = self.scopes[scope].symbols.get(&name) {
            if !existing.is_empty() {
                let all_functions = existing
                    .iter()
                    .all(|&d| matches!(self.exprs[d].kind, ExprKind::FuncDecl { .. }));
                if !(all_functions && new_is_function) {
                    return Err(Redeclaration {
                        existing: existing[0],
                    });
                }
            }
        }
        self.scopes[scope]
            .symbols
            .entry(name)
            .or_default()
            .push(decl);
        Ok(())
    }

    /// Every declaration reachable from `scope` through its ancestors,
    /// in inside-out declaration order. Used by the spell-checker.
    pub fn all_symbols_recursive(&self, scope: ScopeId) -> Vec<ExprId> {
        let mut out = Vec::new();
        let mut current = Some(scope);
        while let Some(s) = current {
            for (_, decls) in self.scopes[s].symbols() {
                out.extend_from_slice(decls);
            }
            current = self.scopes[s].parent;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Linkage;
    use crate::context::Context;
    use crate::source::Location;

    fn var(m: &mut Module, name: Name) -> ExprId {
        m.new_expr(
            ExprKind::VarDecl {
                name,
                init: None,
                linkage: Linkage::Local,
            },
            Location::default(),
        )
    }

    fn func(m: &mut Module, name: Name) -> ExprId {
        let scope = m.new_scope(Some(ScopeId::GLOBAL));
        m.new_expr(
            ExprKind::FuncDecl {
                name,
                body: None,
                scope,
                linkage: Linkage::Internal,
                param_decls: Vec::new(),
                dangling_dynarrays: Vec::new(),
            },
            Location::default(),
        )
    }

    #[test]
    fn test_declare_and_find() {
        let ctx = Context::default();
        let mut m = Module::new(&ctx, "t");
        let x = ctx.intern("x");
        let d = var(&mut m, x);

        assert!(m.declare(ScopeId::GLOBAL, x, d).is_ok());
        assert_eq!(m.find(ScopeId::GLOBAL, x), &[d]);
        assert_eq!(m.find(ScopeId::GLOBAL, ctx.intern("y")), &[] as &[ExprId]);
    }

    #[test]
    fn test_find_recursive_walks_parents() {
        let ctx = Context::default();
        let mut m = Module::new(&ctx, "t");
        let x = ctx.intern("x");
        let d = var(&mut m, x);
        m.declare(ScopeId::GLOBAL, x, d).unwrap();

        let inner = m.new_scope(Some(ScopeId::GLOBAL));
        assert_eq!(m.find(inner, x), &[] as &[ExprId]);
        assert_eq!(m.find_recursive(inner, x), vec![d]);
    }

    #[test]
    fn test_inner_scope_shadows() {
        let ctx = Context::default();
        let mut m = Module::new(&ctx, "t");
        let x = ctx.intern("x");
        let outer = var(&mut m, x);
        m.declare(ScopeId::GLOBAL, x, outer).unwrap();

        let inner_scope = m.new_scope(Some(ScopeId::GLOBAL));
        let inner = var(&mut m, x);
        m.declare(inner_scope, x, inner).unwrap();

        assert_eq!(m.find_recursive(inner_scope, x), vec![inner]);
    }

    #[test]
    fn test_function_overloading_allowed() {
        let ctx = Context::default();
        let mut m = Module::new(&ctx, "t");
        let f = ctx.intern("f");
        let f1 = func(&mut m, f);
        let f2 = func(&mut m, f);

        assert!(m.declare(ScopeId::GLOBAL, f, f1).is_ok());
        assert!(m.declare(ScopeId::GLOBAL, f, f2).is_ok());
        assert_eq!(m.find(ScopeId::GLOBAL, f).len(), 2);
    }

    #[test]
    fn test_mixed_redeclaration_rejected() {
        let ctx = Context::default();
        let mut m = Module::new(&ctx, "t");
        let n = ctx.intern("n");
        let v = var(&mut m, n);
        let f = func(&mut m, n);

        m.declare(ScopeId::GLOBAL, n, v).unwrap();
        let err = m.declare(ScopeId::GLOBAL, n, f).unwrap_err();
        assert_eq!(err.existing, v);
    }
}
