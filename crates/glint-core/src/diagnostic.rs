//! Diagnostic types and rendering.
//!
//! Diagnostics are message-valued data: sema issues them through the
//! [`Context`](crate::context::Context) and keeps analysing. Ordinary
//! errors accumulate; internal compiler errors and fatal host errors
//! terminate the process with their dedicated exit codes.

use crate::source::{Files, Location};
use std::fmt;

pub const ICE_EXIT_CODE: i32 = 17;
pub const FATAL_EXIT_CODE: i32 = 18;

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Not an error; never emitted.
    None,
    /// Informational note attached to a preceding diagnostic.
    Note,
    /// Warning; does not set the error flag.
    Warning,
    /// Hard error; the program is ill-formed.
    Error,
    /// Fatal host-system error. Not a compiler bug.
    Fatal,
    /// Internal compiler error.
    Ice,
}

impl Severity {
    pub fn sets_error_flag(self) -> bool {
        matches!(self, Severity::Error | Severity::Fatal | Severity::Ice)
    }

    fn label(self) -> &'static str {
        match self {
            Severity::None => "",
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal error",
            Severity::Ice => "internal compiler error",
        }
    }

    fn colour(self) -> &'static str {
        match self {
            Severity::None => "",
            Severity::Note => "\x1b[1;36m",
            Severity::Warning => "\x1b[1;33m",
            Severity::Error | Severity::Fatal | Severity::Ice => "\x1b[1;31m",
        }
    }
}

/// An attached note.
#[derive(Debug, Clone)]
pub struct Note {
    pub loc: Location,
    pub message: String,
}

/// A single diagnostic message.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub loc: Location,
    pub notes: Vec<Note>,
}

impl Diagnostic {
    pub fn new(severity: Severity, loc: Location, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            loc,
            notes: Vec::new(),
        }
    }

    pub fn error(loc: Location, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, loc, message)
    }

    pub fn warning(loc: Location, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, loc, message)
    }

    pub fn with_note(mut self, loc: Location, message: impl Into<String>) -> Self {
        self.notes.push(Note {
            loc,
            message: message.into(),
        });
        self
    }

    /// Render the diagnostic with source context.
    pub fn render(&self, files: &Files, colour: bool) -> String {
        let mut out = String::new();
        render_one(&mut out, self.severity, self.loc, &self.message, files, colour);
        for note in &self.notes {
            render_one(&mut out, Severity::Note, note.loc, &note.message, files, colour);
        }
        out
    }
}

fn render_one(
    out: &mut String,
    severity: Severity,
    loc: Location,
    message: &str,
    files: &Files,
    colour: bool,
) {
    use fmt::Write;

    let (tint, bold, reset) = if colour {
        (severity.colour(), "\x1b[1m", "\x1b[0m")
    } else {
        ("", "", "")
    };

    let _ = writeln!(
        out,
        "{}{}{}: {}{}{}",
        tint,
        severity.label(),
        reset,
        bold,
        message,
        reset
    );

    // Unanchored diagnostics keep the message but print no source line.
    let Some(info) = loc.seek(files) else { return };
    let file = files
        .get(crate::source::FileId(loc.file_id))
        .expect("seekable location has a file");

    let _ = writeln!(out, "  --> {}:{}:{}", file.name(), info.line, info.col);

    let line_text = &file.contents[info.line_start..info.line_end];
    let _ = writeln!(out, "{:4} | {}", info.line, line_text);

    let underline_start = info.col - 1;
    let underline_len = (loc.len as usize).min(info.line_end - info.line_start - underline_start).max(1);
    let _ = writeln!(
        out,
        "     | {}{}{}{}",
        " ".repeat(underline_start),
        tint,
        "~".repeat(underline_len),
        reset
    );
}

/// The accumulated diagnostics of one compilation.
#[derive(Debug, Default)]
pub struct Diagnostics {
    list: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.list.push(diag);
    }

    /// Attach a note to the most recent diagnostic.
    ///
    /// A note with no preceding diagnostic is recorded standalone.
    pub fn attach_note(&mut self, loc: Location, message: impl Into<String>) {
        match self.list.last_mut() {
            Some(prev) => prev.notes.push(Note {
                loc,
                message: message.into(),
            }),
            None => self.push(Diagnostic::new(Severity::Note, loc, message)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.list.iter()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn count_of(&self, severity: Severity) -> usize {
        self.list.iter().filter(|d| d.severity == severity).count()
    }

    pub fn render(&self, files: &Files, colour: bool) -> String {
        self.list
            .iter()
            .map(|d| d.render(files, colour))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Report an internal compiler error and terminate.
pub fn ice(message: impl fmt::Display) -> ! {
    eprintln!("internal compiler error: {message}");
    std::process::exit(ICE_EXIT_CODE);
}

/// Report a fatal host-system error and terminate.
///
/// This is not a compiler bug; it is an error caused by the underlying
/// system, such as an unreadable input file.
pub fn fatal(message: impl fmt::Display) -> ! {
    eprintln!("fatal error: {message}");
    std::process::exit(FATAL_EXIT_CODE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Files;

    #[test]
    fn test_render_without_location() {
        let files = Files::new();
        let diag = Diagnostic::error(Location::default(), "unknown symbol 'x'");
        let text = diag.render(&files, false);
        assert!(text.starts_with("error: unknown symbol 'x'"));
        assert!(!text.contains("-->"));
    }

    #[test]
    fn test_render_with_snippet() {
        let mut files = Files::new();
        let id = files.add("/nonexistent/a.g", "foo : int 3;\n");
        let diag = Diagnostic::warning(Location::new(0, 3, id.0), "unused");
        let text = diag.render(&files, false);
        assert!(text.contains("a.g:1:1"));
        assert!(text.contains("foo : int 3;"));
        assert!(text.contains("~~~"));
    }

    #[test]
    fn test_notes_attach_to_preceding() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::error(Location::default(), "bad"));
        diags.attach_note(Location::default(), "declared here");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.iter().next().unwrap().notes.len(), 1);
    }

    #[test]
    fn test_severity_flags() {
        assert!(Severity::Error.sets_error_flag());
        assert!(Severity::Fatal.sets_error_flag());
        assert!(Severity::Ice.sets_error_flag());
        assert!(!Severity::Warning.sets_error_flag());
        assert!(!Severity::Note.sets_error_flag());
    }
}
