//! The Glint AST.
//!
//! Expressions, statements and declarations are a single closed variant
//! set: everything in Glint is an expression. A [`Module`] owns three
//! arenas (expressions, types, scopes); analysis rewrites the tree by
//! allocating replacement nodes from the same arena and overwriting the
//! child id slot in the parent. Old nodes are never destroyed before the
//! module, so ids held by diagnostics stay valid.

use serde::Serialize;

use crate::context::Context;
use crate::eval::EvalResult;
use crate::index_vec::{ExprId, IndexVec, Name, ScopeId, TypeId};
use crate::scope::Scope;
use crate::source::Location;
use crate::types::{seed_builtin_types, FuncAttrs, Type, TypeKind};

/// Analysis state of an AST or type node.
///
/// A node that is `Done` or `Errored` is never analysed again.
/// `InProgress` on re-entry detects use-in-own-initialiser cycles.
/// `NoLongerViable` marks a freed dynamic-array binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SemaState {
    NotAnalysed,
    InProgress,
    Done,
    Errored,
    NoLongerViable,
}

impl SemaState {
    pub fn done_or_errored(self) -> bool {
        matches!(self, SemaState::Done | SemaState::Errored)
    }

    pub fn analysed(self) -> bool {
        !matches!(self, SemaState::NotAnalysed | SemaState::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CastKind {
    /// Inserted by sema; always trusted.
    Implicit,
    LValueToRValue,
    LValueToReference,
    ReferenceToLValue,
    /// Explicit `as!`.
    Hard,
    /// Explicit `as`.
    Soft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IntrinsicKind {
    DebugTrap,
    Filename,
    Inline,
    Line,
    MemCopy,
    MemSet,
    Syscall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    /// `&` address-of.
    Addr,
    /// `@` dereference.
    Deref,
    /// `-` negation, or freeing a dynamic array.
    Neg,
    /// `~` bitwise not.
    BitNot,
    /// `!` logical not.
    Not,
    /// `has` sum-type member test.
    Has,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    /// `:=`
    Assign,
    /// `lhs[rhs]`
    Subscript,
}

impl BinaryOp {
    pub fn token(self) -> &'static str {
        match self {
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Assign => ":=",
            BinaryOp::Subscript => "[]",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Linkage {
    /// Function-local variable.
    Local,
    /// Not visible outside this module.
    Internal,
    /// Internal, but kept alive for the optimiser.
    Used,
    /// Visible outside this module.
    Exported,
    /// Declared here, defined elsewhere.
    Imported,
}

/// An expression node. Allocated once, rewritten in place.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    /// `TypeId::UNKNOWN` until analysis assigns one.
    pub ty: TypeId,
    pub state: SemaState,
    pub lvalue: bool,
    pub loc: Location,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLit(u64),
    /// Index into the module's string-literal table.
    StrLit(usize),
    CompoundLit {
        values: Vec<ExprId>,
    },
    If {
        cond: ExprId,
        then: ExprId,
        otherwise: Option<ExprId>,
    },
    While {
        cond: ExprId,
        body: ExprId,
    },
    For {
        init: ExprId,
        cond: ExprId,
        increment: ExprId,
        body: ExprId,
    },
    Return {
        value: Option<ExprId>,
    },
    Block {
        children: Vec<ExprId>,
    },
    Call {
        callee: ExprId,
        args: Vec<ExprId>,
    },
    IntrinsicCall {
        intrinsic: IntrinsicKind,
        args: Vec<ExprId>,
    },
    Cast {
        kind: CastKind,
        operand: ExprId,
    },
    Unary {
        op: UnaryOp,
        postfix: bool,
        operand: ExprId,
    },
    Binary {
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    /// Reference to a declared entity; `target` is filled by analysis.
    NameRef {
        name: Name,
        scope: ScopeId,
        target: Option<ExprId>,
    },
    /// An expression denoting a type; the denoted type is `ty`.
    TypeExpr,
    /// `object.name`; `member` and `strukt` are finalised by analysis.
    MemberAccess {
        object: ExprId,
        name: Name,
        member: usize,
        strukt: Option<TypeId>,
    },
    /// Reference to an imported module. Only created by sema.
    ModuleRef {
        import: usize,
    },
    Sizeof {
        operand: ExprId,
    },
    Alignof {
        operand: ExprId,
    },
    /// Same-named function declarations awaiting resolution.
    OverloadSet {
        overloads: Vec<ExprId>,
    },
    /// A pre-computed value inserted by the constant folder.
    EvaluatedConstant {
        expr: Option<ExprId>,
        value: EvalResult,
    },
    VarDecl {
        name: Name,
        init: Option<ExprId>,
        linkage: Linkage,
    },
    FuncDecl {
        name: Name,
        body: Option<ExprId>,
        scope: ScopeId,
        linkage: Linkage,
        param_decls: Vec<ExprId>,
        /// Dynamic-array locals not yet freed or returned.
        dangling_dynarrays: Vec<ExprId>,
    },
    /// Declares the type stored in `ty` under `name`.
    TypeDecl {
        name: Name,
    },
    TypeAliasDecl {
        name: Name,
    },
    EnumeratorDecl {
        name: Name,
        init: Option<ExprId>,
    },
}

impl Expr {
    pub fn is_decl(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::VarDecl { .. }
                | ExprKind::FuncDecl { .. }
                | ExprKind::TypeDecl { .. }
                | ExprKind::TypeAliasDecl { .. }
                | ExprKind::EnumeratorDecl { .. }
        )
    }

    /// Name of a declaration, if this is one.
    pub fn decl_name(&self) -> Option<Name> {
        match self.kind {
            ExprKind::VarDecl { name, .. }
            | ExprKind::FuncDecl { name, .. }
            | ExprKind::TypeDecl { name }
            | ExprKind::TypeAliasDecl { name }
            | ExprKind::EnumeratorDecl { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn ok(&self) -> bool {
        self.state == SemaState::Done
    }
}

/// One `import` in a module, with the scope its declarations land in.
#[derive(Debug, Clone)]
pub struct Import {
    pub name: Name,
    pub loc: Location,
    pub scope: ScopeId,
    pub resolved: bool,
}

/// One parsed translation unit and its node arenas.
///
/// The arenas grow monotonically; nodes are never freed while the module
/// is alive. Declarations are referenced from many name references
/// without ownership.
pub struct Module {
    pub name: String,
    pub exprs: IndexVec<ExprId, Expr>,
    pub types: IndexVec<TypeId, Type>,
    pub scopes: IndexVec<ScopeId, Scope>,
    /// String-literal contents, referenced by index from `StrLit`.
    pub strings: Vec<String>,
    pub imports: Vec<Import>,
    /// Every function declaration, top-level function first.
    pub functions: Vec<ExprId>,
    /// The synthetic function holding all top-level code.
    pub top_level_function: ExprId,
}

impl Module {
    /// Create an empty module with its global scope, canonical builtin
    /// types, and the synthetic top-level function (named `main` for
    /// executable modules).
    pub fn new(ctx: &Context, name: impl Into<String>) -> Self {
        let mut exprs = IndexVec::new();
        let mut types = IndexVec::new();
        let mut scopes = IndexVec::new();

        let global = scopes.push(Scope::new(None));
        debug_assert_eq!(global, ScopeId::GLOBAL);
        seed_builtin_types(&mut types);

        let fn_scope = scopes.push(Scope::new(Some(ScopeId::GLOBAL)));
        let body = exprs.push(Expr {
            kind: ExprKind::Block {
                children: Vec::new(),
            },
            ty: TypeId::UNKNOWN,
            state: SemaState::NotAnalysed,
            lvalue: false,
            loc: Location::default(),
        });
        let fn_ty = types.push(Type {
            kind: TypeKind::Function {
                ret: TypeId::INT,
                params: Vec::new(),
                attrs: FuncAttrs::NONE,
            },
            state: SemaState::NotAnalysed,
            loc: Location::default(),
        });
        let main = ctx.intern("main");
        let top = exprs.push(Expr {
            kind: ExprKind::FuncDecl {
                name: main,
                body: Some(body),
                scope: fn_scope,
                linkage: Linkage::Exported,
                param_decls: Vec::new(),
                dangling_dynarrays: Vec::new(),
            },
            ty: fn_ty,
            state: SemaState::NotAnalysed,
            lvalue: false,
            loc: Location::default(),
        });

        let mut module = Self {
            name: name.into(),
            exprs,
            types,
            scopes,
            strings: Vec::new(),
            imports: Vec::new(),
            functions: vec![top],
            top_level_function: top,
        };
        // The top-level function is an ordinary declaration in the global
        // scope, so `main` resolves like any other name.
        let _ = module.declare(ScopeId::GLOBAL, main, top);
        module
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    pub fn new_expr(&mut self, kind: ExprKind, loc: Location) -> ExprId {
        self.exprs.push(Expr {
            kind,
            ty: TypeId::UNKNOWN,
            state: SemaState::NotAnalysed,
            lvalue: false,
            loc,
        })
    }

    pub fn new_expr_typed(&mut self, kind: ExprKind, loc: Location, ty: TypeId) -> ExprId {
        let id = self.new_expr(kind, loc);
        self.exprs[id].ty = ty;
        id
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id]
    }

    pub fn state(&self, id: ExprId) -> SemaState {
        self.exprs[id].state
    }

    pub fn set_state(&mut self, id: ExprId, state: SemaState) {
        self.exprs[id].state = state;
    }

    pub fn ty(&self, id: ExprId) -> TypeId {
        self.exprs[id].ty
    }

    pub fn set_ty(&mut self, id: ExprId, ty: TypeId) {
        self.exprs[id].ty = ty;
    }

    pub fn is_lvalue(&self, id: ExprId) -> bool {
        self.exprs[id].lvalue
    }

    pub fn set_lvalue(&mut self, id: ExprId, lvalue: bool) {
        self.exprs[id].lvalue = lvalue;
    }

    pub fn loc(&self, id: ExprId) -> Location {
        self.exprs[id].loc
    }

    /// `state == Done`; errored and no-longer-viable nodes are not ok.
    pub fn expr_ok(&self, id: ExprId) -> bool {
        self.exprs[id].ok()
    }

    // ========================================================================
    // Strings, scopes, imports
    // ========================================================================

    pub fn intern_string(&mut self, value: impl Into<String>) -> usize {
        let value = value.into();
        if let Some(i) = self.strings.iter().position(|s| *s == value) {
            return i;
        }
        self.strings.push(value);
        self.strings.len() - 1
    }

    pub fn new_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.scopes.push(Scope::new(parent))
    }

    pub fn add_import(&mut self, name: Name, loc: Location) -> usize {
        let scope = self.new_scope(None);
        self.imports.push(Import {
            name,
            loc,
            scope,
            resolved: false,
        });
        self.imports.len() - 1
    }

    /// Append an expression to the top-level function's body.
    pub fn push_top_level(&mut self, expr: ExprId) {
        let body = match &self.exprs[self.top_level_function].kind {
            ExprKind::FuncDecl { body: Some(b), .. } => *b,
            _ => unreachable!("top-level function has a block body"),
        };
        match &mut self.exprs[body].kind {
            ExprKind::Block { children } => children.push(expr),
            _ => unreachable!("top-level function has a block body"),
        }
    }

    /// Scope of the top-level function's body.
    pub fn top_level_scope(&self) -> ScopeId {
        match &self.exprs[self.top_level_function].kind {
            ExprKind::FuncDecl { scope, .. } => *scope,
            _ => unreachable!("top-level function is a FuncDecl"),
        }
    }
}
