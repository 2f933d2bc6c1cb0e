//! The Glint compiler core.
//!
//! Glint is one front end of a multi-front-end toolchain; this crate
//! implements its surface syntax and, above all, its semantic analysis:
//! name resolution, type elaboration, implicit conversion, compile-time
//! evaluation, separate-compilation metadata import, and linear
//! tracking of dynamic-array bindings. Downstream IR generation is a
//! thin translation over the elaborated tree sema produces.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Context                           │
//! │   files      interner      diagnostics      target       │
//! └──────────────────────────────────────────────────────────┘
//!        ↑              ↑               ↑
//!   ┌────┴────┐    ┌────┴─────┐    ┌────┴────┐
//!   │  parse  │ →  │   sema   │ →  │ printer │ / IR gen
//!   │  (AST)  │    │ (rewrite)│    │  (dump) │
//!   └─────────┘    └──────────┘    └─────────┘
//! ```
//!
//! A [`Module`] owns three arenas (expressions, types, scopes); sema
//! rewrites child id slots in place and never frees a node, so every
//! id a diagnostic captured stays valid for the module's lifetime.

pub mod ast;
pub mod compiler;
pub mod context;
pub mod diagnostic;
pub mod eval;
pub mod index_vec;
pub mod interner;
pub mod metadata;
pub mod printer;
pub mod scope;
pub mod sema;
pub mod source;
pub mod syntax;
pub mod types;

pub use ast::{Expr, ExprKind, Module, SemaState};
pub use compiler::Compiler;
pub use context::{Context, ObjectFormat, Target};
pub use diagnostic::{Diagnostic, Diagnostics, Severity};
pub use index_vec::{ExprId, Idx, IndexVec, Name, ScopeId, TypeId};
pub use interner::Interner;
pub use source::{FileId, Files, Location, SourceFile};
pub use types::{Type, TypeKind};
