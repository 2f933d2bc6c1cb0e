//! Central compiler context.
//!
//! One [`Context`] holds the process-wide state of one compilation: the
//! file registry, the monotonic error flag, the diagnostic sink, target
//! and object-format descriptors, and the include search directories.
//! Multiple contexts may coexist; there is no global mutable state.

use std::cell::{Cell, RefCell};
use std::path::PathBuf;

use crate::diagnostic::{self, Diagnostic, Diagnostics, Severity};
use crate::index_vec::Name;
use crate::interner::Interner;
use crate::source::{FileId, Files, Location};

/// Code generation target descriptor.
///
/// Sema only needs the widths that feed size and alignment queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub name: &'static str,
    /// Width of pointers and references, in bits.
    pub pointer_width: u32,
    /// Width of the default `int` type, in bits.
    pub int_width: u32,
    /// Width of the FFI `cint` type, in bits.
    pub ffi_int_width: u32,
}

impl Target {
    pub const X86_64_LINUX: Target = Target {
        name: "x86_64-linux",
        pointer_width: 64,
        int_width: 64,
        ffi_int_width: 32,
    };
}

/// Object file format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectFormat {
    #[default]
    Elf,
}

/// Stores all state of one compilation.
pub struct Context {
    files: Files,
    interner: Interner,
    /// Error flag. Set-only; never cleared.
    error_flag: Cell<bool>,
    diagnostics: RefCell<Diagnostics>,
    colour_diagnostics: bool,
    target: Target,
    format: ObjectFormat,
    include_directories: Vec<PathBuf>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Target::X86_64_LINUX, ObjectFormat::Elf, false)
    }
}

impl Context {
    pub fn new(target: Target, format: ObjectFormat, colour_diagnostics: bool) -> Self {
        Self {
            files: Files::new(),
            interner: Interner::new(),
            error_flag: Cell::new(false),
            diagnostics: RefCell::new(Diagnostics::new()),
            colour_diagnostics,
            target,
            format,
            include_directories: Vec::new(),
        }
    }

    // ========================================================================
    // Files
    // ========================================================================

    pub fn files(&self) -> &Files {
        &self.files
    }

    pub fn add_file(&mut self, path: impl AsRef<std::path::Path>, contents: impl Into<String>) -> FileId {
        self.files.add(path, contents)
    }

    // ========================================================================
    // String interning
    // ========================================================================

    pub fn intern(&self, s: &str) -> Name {
        self.interner.intern(s)
    }

    pub fn str(&self, name: Name) -> String {
        self.interner.str(name)
    }

    // ========================================================================
    // Error flag
    // ========================================================================

    pub fn has_error(&self) -> bool {
        self.error_flag.get()
    }

    /// Set the error flag. Returns the previous value.
    pub fn set_error(&self) -> bool {
        self.error_flag.replace(true)
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Record a diagnostic, flipping the error flag for error-class
    /// severities. Fatal and ICE diagnostics terminate the process.
    pub fn issue(&self, diag: Diagnostic) {
        if diag.severity.sets_error_flag() {
            self.set_error();
        }
        match diag.severity {
            Severity::Ice => {
                eprint!("{}", diag.render(&self.files, self.colour_diagnostics));
                diagnostic::ice(&diag.message);
            }
            Severity::Fatal => {
                eprint!("{}", diag.render(&self.files, self.colour_diagnostics));
                diagnostic::fatal(&diag.message);
            }
            Severity::None => {}
            _ => self.diagnostics.borrow_mut().push(diag),
        }
    }

    pub fn error(&self, loc: Location, message: impl Into<String>) {
        self.issue(Diagnostic::new(Severity::Error, loc, message));
    }

    pub fn warning(&self, loc: Location, message: impl Into<String>) {
        self.issue(Diagnostic::new(Severity::Warning, loc, message));
    }

    /// Attach a note to the most recently issued diagnostic.
    pub fn note(&self, loc: Location, message: impl Into<String>) {
        self.diagnostics.borrow_mut().attach_note(loc, message);
    }

    pub fn diagnostic_count(&self) -> usize {
        self.diagnostics.borrow().len()
    }

    pub fn count_of(&self, severity: Severity) -> usize {
        self.diagnostics.borrow().count_of(severity)
    }

    pub fn render_diagnostics(&self) -> String {
        self.diagnostics
            .borrow()
            .render(&self.files, self.colour_diagnostics)
    }

    /// Run `f` over every accumulated diagnostic.
    pub fn with_diagnostics<R>(&self, f: impl FnOnce(&Diagnostics) -> R) -> R {
        f(&self.diagnostics.borrow())
    }

    // ========================================================================
    // Target, format, search paths
    // ========================================================================

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn format(&self) -> ObjectFormat {
        self.format
    }

    pub fn use_colour_diagnostics(&self) -> bool {
        self.colour_diagnostics
    }

    pub fn include_directories(&self) -> &[PathBuf] {
        &self.include_directories
    }

    pub fn add_include_directory(&mut self, dir: impl Into<PathBuf>) {
        self.include_directories.push(dir.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_flag_monotonic() {
        let ctx = Context::default();
        assert!(!ctx.has_error());
        assert!(!ctx.set_error());
        assert!(ctx.has_error());
        // Setting again reports the previous value and stays set.
        assert!(ctx.set_error());
        assert!(ctx.has_error());
    }

    #[test]
    fn test_issue_sets_flag() {
        let ctx = Context::default();
        ctx.warning(Location::default(), "nothing");
        assert!(!ctx.has_error());
        ctx.error(Location::default(), "bad");
        assert!(ctx.has_error());
        assert_eq!(ctx.diagnostic_count(), 2);
    }

    #[test]
    fn test_note_attaches() {
        let ctx = Context::default();
        ctx.error(Location::default(), "unknown symbol");
        ctx.note(Location::default(), "declared here");
        assert_eq!(ctx.diagnostic_count(), 1);
        ctx.with_diagnostics(|d| {
            assert_eq!(d.iter().next().unwrap().notes.len(), 1);
        });
    }

    #[test]
    fn test_include_directories() {
        let mut ctx = Context::default();
        ctx.add_include_directory("/usr/lib/glint");
        ctx.add_include_directory("deps");
        assert_eq!(ctx.include_directories().len(), 2);
    }
}
