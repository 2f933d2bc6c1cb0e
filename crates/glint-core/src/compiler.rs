//! High-level compiler driver.
//!
//! Wraps a [`Context`] and runs the front end and sema over source
//! text. The CLI and tests both drive compilation through this facade.

use std::path::Path;

use crate::ast::Module;
use crate::context::Context;
use crate::sema;
use crate::syntax;

pub struct Compiler {
    ctx: Context,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            ctx: Context::default(),
        }
    }

    pub fn with_context(ctx: Context) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// Parse source text registered under `name`.
    pub fn parse_source(&mut self, name: impl AsRef<Path>, source: &str) -> Module {
        let name = name.as_ref();
        let module_name = name
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "module".to_string());
        let file_id = self.ctx.add_file(name, source);
        syntax::parse(&self.ctx, file_id, source, &module_name)
    }

    /// Load and parse a file from disk.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> std::io::Result<Module> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        Ok(self.parse_source(path, &source))
    }

    /// Run semantic analysis over a parsed module.
    pub fn analyse(&self, module: &mut Module) {
        sema::analyse(&self.ctx, module);
    }

    /// Parse and analyse in one step.
    pub fn compile_source(&mut self, name: impl AsRef<Path>, source: &str) -> Module {
        let mut module = self.parse_source(name, source);
        self.analyse(&mut module);
        module
    }

    pub fn has_errors(&self) -> bool {
        self.ctx.has_error()
    }

    pub fn render_diagnostics(&self) -> String {
        self.ctx.render_diagnostics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Severity;

    #[test]
    fn test_clean_compile() {
        let mut compiler = Compiler::new();
        let _ = compiler.compile_source("ok.g", "x : int 1; y : int = x; y + 1;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_unknown_symbol_is_error() {
        let mut compiler = Compiler::new();
        let _ = compiler.compile_source("bad.g", "definitely_not_declared;");
        assert!(compiler.has_errors());
        assert!(compiler.context().count_of(Severity::Error) >= 1);
    }

    #[test]
    fn test_parse_error_stops_sema() {
        let mut compiler = Compiler::new();
        let mut module = compiler.parse_source("syn.g", "x : int = ;");
        assert!(compiler.has_errors());
        // Sema refuses to run on an errored context.
        compiler.analyse(&mut module);
    }
}
