//! Parsing Glint source into the raw AST.
//!
//! Declarations are entered into their scopes as they are parsed; name
//! references record only the scope they appeared in and are resolved
//! by sema. Top-level code becomes the body of the module's synthetic
//! `main` function; function, type and static declarations land in the
//! global scope.

use crate::ast::{BinaryOp, CastKind, ExprKind, Linkage, Module, SemaState, UnaryOp};
use crate::context::Context;
use crate::index_vec::{ExprId, Name, ScopeId, TypeId};
use crate::source::{FileId, Location};
use crate::types::{FuncAttrs, Member, Param, TypeKind};

use super::lexer::{lex, Token, TokenKind};

/// Parse one source file into a module.
///
/// Parse errors are issued as diagnostics; the parser recovers at
/// statement boundaries and returns whatever it could build.
pub fn parse(ctx: &Context, file_id: FileId, source: &str, module_name: &str) -> Module {
    let tokens = lex(ctx, file_id, source);
    let module = Module::new(ctx, module_name);
    let top_scope = module.top_level_scope();
    let mut parser = Parser {
        ctx,
        module,
        tokens,
        pos: 0,
        scopes: vec![top_scope],
    };
    parser.parse_module();
    parser.module
}

struct Parser<'a> {
    ctx: &'a Context,
    module: Module,
    tokens: Vec<Token>,
    pos: usize,
    scopes: Vec<ScopeId>,
}

impl Parser<'_> {
    // ========================================================================
    // Token plumbing
    // ========================================================================

    fn cur(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek(&self, offset: usize) -> &TokenKind {
        let i = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[i].kind
    }

    fn loc(&self) -> Location {
        self.tokens[self.pos].loc
    }

    fn prev_loc(&self) -> Location {
        self.tokens[self.pos.saturating_sub(1)].loc
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.cur() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> bool {
        if self.eat(kind) {
            return true;
        }
        let loc = self.loc();
        self.ctx.error(
            loc,
            format!("Expected {}, found {}", kind.describe(), self.cur().describe()),
        );
        false
    }

    /// Skip to just past the next `;`, or to a `}`/end of file.
    fn synchronise(&mut self) {
        loop {
            match self.cur() {
                TokenKind::Eof | TokenKind::RBrace => return,
                TokenKind::Semicolon => {
                    self.bump();
                    return;
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn scope(&self) -> ScopeId {
        *self.scopes.last().unwrap()
    }

    /// An expression statement that could not be parsed at all.
    fn poison(&mut self, loc: Location) -> ExprId {
        let e = self.module.new_expr(ExprKind::IntLit(0), loc);
        self.module.set_state(e, SemaState::Errored);
        e
    }

    // ========================================================================
    // Module structure
    // ========================================================================

    fn parse_module(&mut self) {
        while self.at(&TokenKind::KwImport) {
            let import_loc = self.loc();
            self.bump();
            match self.bump().kind {
                TokenKind::Ident(name) => {
                    self.module.add_import(name, import_loc);
                }
                other => {
                    self.ctx.error(
                        import_loc,
                        format!("Expected module name after 'import', found {}", other.describe()),
                    );
                }
            }
            self.expect(&TokenKind::Semicolon);
        }

        while !self.at(&TokenKind::Eof) {
            if let Some(stmt) = self.parse_statement(true) {
                self.module.push_top_level(stmt);
            }
        }
    }

    /// One statement: a declaration or an expression. Returns the
    /// expression to append to the enclosing body, or `None` for
    /// declarations that live outside it (functions).
    fn parse_statement(&mut self, top_level: bool) -> Option<ExprId> {
        let export = top_level && self.eat(&TokenKind::KwExport);
        let static_ = top_level && !export && self.eat(&TokenKind::KwStatic);

        if (export || static_) && !self.is_decl_start() {
            let loc = self.loc();
            self.ctx.error(loc, "Expected a declaration");
            self.synchronise();
            return None;
        }

        let stmt = if self.is_decl_start() {
            self.parse_decl(top_level, export, static_)
        } else {
            let e = self.parse_expr(0);
            Some(e)
        };

        // Statements are `;`-terminated; block-shaped expressions may
        // omit it.
        if !self.eat(&TokenKind::Semicolon) && !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
            let blockish = stmt.is_none_or(|s| {
                matches!(
                    self.module.expr(s).kind,
                    ExprKind::Block { .. }
                        | ExprKind::If { .. }
                        | ExprKind::While { .. }
                        | ExprKind::For { .. }
                        | ExprKind::FuncDecl { .. }
                        | ExprKind::TypeDecl { .. }
                )
            });
            if !blockish {
                let loc = self.loc();
                self.ctx.error(
                    loc,
                    format!("Expected ';', found {}", self.cur().describe()),
                );
                self.synchronise();
            }
        }
        stmt
    }

    fn is_decl_start(&self) -> bool {
        matches!(self.cur(), TokenKind::Ident(_))
            && matches!(
                self.peek(1),
                TokenKind::Colon | TokenKind::ColonColon
            )
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    fn parse_decl(&mut self, top_level: bool, export: bool, static_: bool) -> Option<ExprId> {
        let name_loc = self.loc();
        let name = match self.bump().kind {
            TokenKind::Ident(name) => name,
            _ => unreachable!("checked by is_decl_start"),
        };

        // `name :: expr` infers the type from the initialiser.
        if self.eat(&TokenKind::ColonColon) {
            let init = self.parse_expr(0);
            let linkage = self.var_linkage(top_level, export, static_);
            let decl = self.module.new_expr(
                ExprKind::VarDecl {
                    name,
                    init: Some(init),
                    linkage,
                },
                name_loc,
            );
            self.place_var_decl(name, decl, top_level, export || static_);
            return Some(decl);
        }

        self.expect(&TokenKind::Colon);

        match self.cur() {
            TokenKind::KwStruct | TokenKind::KwUnion | TokenKind::KwSum | TokenKind::KwEnum => {
                let ty = self.parse_composite_type();
                let decl = self
                    .module
                    .new_expr_typed(ExprKind::TypeDecl { name }, name_loc, ty);
                self.declare_named(self.type_decl_scope(top_level), name, decl, name_loc);
                Some(decl)
            }

            TokenKind::KwAlias => {
                self.bump();
                let ty = self.parse_type();
                let decl = self
                    .module
                    .new_expr_typed(ExprKind::TypeAliasDecl { name }, name_loc, ty);
                self.declare_named(self.type_decl_scope(top_level), name, decl, name_loc);
                Some(decl)
            }

            _ => {
                let ty = self.parse_type();
                if self.module.is_function(ty) && self.function_decl_follows() {
                    self.parse_function_decl(name, name_loc, ty, top_level, export)
                } else {
                    let init = if self.eat(&TokenKind::Eq) {
                        Some(self.parse_expr(0))
                    } else if !self.at(&TokenKind::Semicolon) && !self.at(&TokenKind::Eof) {
                        // Initialisers may be juxtaposed: `foo : int 3;`
                        Some(self.parse_expr(0))
                    } else {
                        None
                    };
                    let linkage = self.var_linkage(top_level, export, static_);
                    let decl = self.module.new_expr_typed(
                        ExprKind::VarDecl {
                            name,
                            init,
                            linkage,
                        },
                        name_loc,
                        ty,
                    );
                    self.place_var_decl(name, decl, top_level, export || static_);
                    Some(decl)
                }
            }
        }
    }

    fn function_decl_follows(&self) -> bool {
        matches!(
            self.cur(),
            TokenKind::LBrace | TokenKind::Eq | TokenKind::Semicolon
        )
    }

    fn parse_function_decl(
        &mut self,
        name: Name,
        name_loc: Location,
        ty: TypeId,
        top_level: bool,
        export: bool,
    ) -> Option<ExprId> {
        if !top_level {
            self.ctx
                .error(name_loc, "Function declarations must be at the top level");
        }

        let fn_scope = self.module.new_scope(Some(ScopeId::GLOBAL));
        let (body, linkage) = if self.at(&TokenKind::LBrace) {
            self.scopes.push(fn_scope);
            let body = self.parse_block();
            self.scopes.pop();
            let linkage = if export {
                Linkage::Exported
            } else {
                Linkage::Internal
            };
            (Some(body), linkage)
        } else if self.eat(&TokenKind::Eq) {
            self.scopes.push(fn_scope);
            let body = self.parse_expr(0);
            self.scopes.pop();
            let linkage = if export {
                Linkage::Exported
            } else {
                Linkage::Internal
            };
            (Some(body), linkage)
        } else {
            // A function declaration with no body is defined elsewhere.
            (None, Linkage::Imported)
        };

        let decl = self.module.new_expr_typed(
            ExprKind::FuncDecl {
                name,
                body,
                scope: fn_scope,
                linkage,
                param_decls: Vec::new(),
                dangling_dynarrays: Vec::new(),
            },
            name_loc,
            ty,
        );
        self.declare_named(ScopeId::GLOBAL, name, decl, name_loc);
        self.module.functions.push(decl);
        None
    }

    fn var_linkage(&self, top_level: bool, export: bool, static_: bool) -> Linkage {
        if export {
            Linkage::Exported
        } else if static_ || !top_level {
            if static_ {
                Linkage::Internal
            } else {
                Linkage::Local
            }
        } else {
            Linkage::Local
        }
    }

    fn type_decl_scope(&self, top_level: bool) -> ScopeId {
        if top_level {
            ScopeId::GLOBAL
        } else {
            self.scope()
        }
    }

    fn place_var_decl(&mut self, name: Name, decl: ExprId, top_level: bool, global: bool) {
        let scope = if top_level && global {
            ScopeId::GLOBAL
        } else {
            self.scope()
        };
        let loc = self.module.loc(decl);
        self.declare_named(scope, name, decl, loc);
    }

    fn declare_named(&mut self, scope: ScopeId, name: Name, decl: ExprId, loc: Location) {
        if let Err(clash) = self.module.declare(scope, name, decl) {
            self.ctx.error(
                loc,
                format!("Redeclaration of '{}'", self.ctx.str(name)),
            );
            let existing_loc = self.module.loc(clash.existing);
            self.ctx.note(existing_loc, "Previous declaration is here");
        }
    }

    // ========================================================================
    // Types
    // ========================================================================

    fn parse_type(&mut self) -> TypeId {
        let loc = self.loc();
        let mut ty = match self.cur().clone() {
            TokenKind::KwVoid => {
                self.bump();
                TypeId::VOID
            }
            TokenKind::KwInt => {
                self.bump();
                TypeId::INT
            }
            TokenKind::KwBool => {
                self.bump();
                TypeId::BOOL
            }
            TokenKind::KwByte => {
                self.bump();
                TypeId::BYTE
            }
            TokenKind::KwCInt => {
                self.bump();
                TypeId::CINT
            }
            TokenKind::KwUInt => {
                self.bump();
                TypeId::UINT
            }

            TokenKind::Ident(name) => {
                self.bump();
                match sized_integer(self.ctx.str(name).as_str()) {
                    Some((bit_width, signed)) => self
                        .module
                        .new_type(TypeKind::Integer { bit_width, signed }, loc),
                    None => self.module.new_type(
                        TypeKind::Named {
                            name,
                            scope: self.scope(),
                        },
                        loc,
                    ),
                }
            }

            TokenKind::LBrack => {
                self.bump();
                let elem = self.parse_type();
                if self.eat(&TokenKind::KwDynamic) {
                    let initial_size = if self.at(&TokenKind::RBrack) {
                        None
                    } else {
                        Some(self.parse_expr(0))
                    };
                    self.expect(&TokenKind::RBrack);
                    self.module.new_type(
                        TypeKind::DynamicArray {
                            elem,
                            initial_size,
                            struct_cache: None,
                        },
                        loc,
                    )
                } else {
                    let size = self.parse_expr(0);
                    self.expect(&TokenKind::RBrack);
                    self.module.new_type(TypeKind::Array { elem, size }, loc)
                }
            }

            TokenKind::KwStruct | TokenKind::KwUnion | TokenKind::KwSum | TokenKind::KwEnum => {
                self.parse_composite_type()
            }

            other => {
                self.ctx
                    .error(loc, format!("Expected a type, found {}", other.describe()));
                return TypeId::UNKNOWN;
            }
        };

        loop {
            if self.at(&TokenKind::Dot) {
                let wrapped = match self.peek(1) {
                    TokenKind::Ident(name) => match self.ctx.str(*name).as_str() {
                        "ptr" => Some(TypeKind::Pointer { elem: ty }),
                        "ref" => Some(TypeKind::Reference { elem: ty }),
                        _ => None,
                    },
                    _ => None,
                };
                let Some(kind) = wrapped else { break };
                self.bump();
                self.bump();
                ty = self.module.new_type(kind, loc);
                continue;
            }

            if self.at(&TokenKind::LParen) {
                let (params, attrs) = self.parse_fn_params();
                ty = self.module.new_type(
                    TypeKind::Function {
                        ret: ty,
                        params,
                        attrs,
                    },
                    loc,
                );
                continue;
            }

            break;
        }
        ty
    }

    fn parse_fn_params(&mut self) -> (Vec<Param>, FuncAttrs) {
        self.expect(&TokenKind::LParen);
        let mut params = Vec::new();
        if !self.at(&TokenKind::RParen) {
            loop {
                let loc = self.loc();
                let name = match (self.cur(), self.peek(1)) {
                    (TokenKind::Ident(name), TokenKind::Colon) => {
                        let name = *name;
                        self.bump();
                        self.bump();
                        Some(name)
                    }
                    _ => None,
                };
                let ty = self.parse_type();
                params.push(Param { name, ty, loc });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen);

        let mut attrs = FuncAttrs::NONE;
        loop {
            let attr = match self.cur() {
                TokenKind::KwPure => FuncAttrs::PURE,
                TokenKind::KwConst => FuncAttrs::CONST,
                TokenKind::KwNoReturn => FuncAttrs::NORETURN,
                TokenKind::KwNoInline => FuncAttrs::NOINLINE,
                TokenKind::KwInline => FuncAttrs::INLINE,
                TokenKind::KwDiscardable => FuncAttrs::DISCARDABLE,
                TokenKind::KwUsed => FuncAttrs::USED,
                _ => break,
            };
            self.bump();
            attrs = attrs.with(attr);
        }
        (params, attrs)
    }

    fn parse_composite_type(&mut self) -> TypeId {
        let loc = self.loc();
        let keyword = self.bump().kind;

        if keyword == TokenKind::KwEnum {
            return self.parse_enum_type(loc);
        }

        let members = self.parse_member_list();
        match keyword {
            TokenKind::KwStruct => self.module.new_type(
                TypeKind::Struct {
                    members,
                    byte_size: 0,
                    alignment: 1,
                },
                loc,
            ),
            TokenKind::KwUnion => self.module.new_type(
                TypeKind::Union {
                    members,
                    byte_size: 0,
                    alignment: 1,
                    array_cache: None,
                },
                loc,
            ),
            TokenKind::KwSum => self.module.new_type(
                TypeKind::Sum {
                    members,
                    byte_size: 0,
                    alignment: 1,
                    struct_cache: None,
                },
                loc,
            ),
            _ => unreachable!(),
        }
    }

    fn parse_member_list(&mut self) -> Vec<Member> {
        self.expect(&TokenKind::LBrace);
        let mut members = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
            let loc = self.loc();
            let name = match self.bump().kind {
                TokenKind::Ident(name) => name,
                other => {
                    self.ctx.error(
                        loc,
                        format!("Expected member name, found {}", other.describe()),
                    );
                    self.synchronise();
                    continue;
                }
            };
            self.expect(&TokenKind::Colon);
            let ty = self.parse_type();
            members.push(Member {
                name,
                ty,
                byte_offset: 0,
            });
            self.eat(&TokenKind::Semicolon);
        }
        self.expect(&TokenKind::RBrace);
        members
    }

    fn parse_enum_type(&mut self, loc: Location) -> TypeId {
        let underlying = if self.eat(&TokenKind::LParen) {
            let ty = self.parse_type();
            self.expect(&TokenKind::RParen);
            ty
        } else {
            TypeId::INT
        };

        let scope = self.module.new_scope(Some(self.scope()));
        self.expect(&TokenKind::LBrace);
        let mut enumerators = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
            let e_loc = self.loc();
            let name = match self.bump().kind {
                TokenKind::Ident(name) => name,
                other => {
                    self.ctx.error(
                        e_loc,
                        format!("Expected enumerator name, found {}", other.describe()),
                    );
                    self.synchronise();
                    continue;
                }
            };
            let init = if self.eat(&TokenKind::ColonEq) {
                Some(self.parse_expr(0))
            } else {
                None
            };
            enumerators.push(
                self.module
                    .new_expr(ExprKind::EnumeratorDecl { name, init }, e_loc),
            );
            self.eat(&TokenKind::Semicolon);
        }
        self.expect(&TokenKind::RBrace);

        self.module.new_type(
            TypeKind::Enum {
                underlying,
                enumerators,
                scope,
            },
            loc,
        )
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn binary_op(kind: &TokenKind) -> Option<(BinaryOp, u8, u8)> {
        Some(match kind {
            TokenKind::ColonEq => (BinaryOp::Assign, 2, 2),
            TokenKind::KwOr => (BinaryOp::Or, 4, 5),
            TokenKind::KwAnd => (BinaryOp::And, 6, 7),
            TokenKind::Pipe => (BinaryOp::BitOr, 8, 9),
            TokenKind::Caret => (BinaryOp::BitXor, 10, 11),
            TokenKind::Amp => (BinaryOp::BitAnd, 12, 13),
            TokenKind::Eq => (BinaryOp::Eq, 14, 15),
            TokenKind::Ne => (BinaryOp::Ne, 14, 15),
            TokenKind::Lt => (BinaryOp::Lt, 16, 17),
            TokenKind::Gt => (BinaryOp::Gt, 16, 17),
            TokenKind::Le => (BinaryOp::Le, 16, 17),
            TokenKind::Ge => (BinaryOp::Ge, 16, 17),
            TokenKind::Shl => (BinaryOp::Shl, 18, 19),
            TokenKind::Shr => (BinaryOp::Shr, 18, 19),
            TokenKind::Plus => (BinaryOp::Add, 20, 21),
            TokenKind::Minus => (BinaryOp::Sub, 20, 21),
            TokenKind::Star => (BinaryOp::Mul, 22, 23),
            TokenKind::Slash => (BinaryOp::Div, 22, 23),
            TokenKind::Percent => (BinaryOp::Rem, 22, 23),
            _ => return None,
        })
    }

    fn parse_expr(&mut self, min_bp: u8) -> ExprId {
        let mut lhs = self.parse_unary(true);
        loop {
            let Some((op, lbp, rbp)) = Self::binary_op(self.cur()) else {
                break;
            };
            if lbp < min_bp {
                break;
            }
            self.bump();
            let rhs = self.parse_expr(rbp);
            let loc = Location::spanning(self.module.loc(lhs), self.module.loc(rhs));
            lhs = self
                .module
                .new_expr(ExprKind::Binary { op, lhs, rhs }, loc);
        }
        lhs
    }

    fn parse_unary(&mut self, allow_juxtaposition: bool) -> ExprId {
        let loc = self.loc();
        let op = match self.cur() {
            TokenKind::Amp => Some(UnaryOp::Addr),
            TokenKind::At => Some(UnaryOp::Deref),
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::KwHas => Some(UnaryOp::Has),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let operand = self.parse_unary(false);
            let loc = Location::spanning(loc, self.module.loc(operand));
            return self.module.new_expr(
                ExprKind::Unary {
                    op,
                    postfix: false,
                    operand,
                },
                loc,
            );
        }
        self.parse_postfix(allow_juxtaposition)
    }

    fn parse_postfix(&mut self, allow_juxtaposition: bool) -> ExprId {
        let mut e = self.parse_primary();

        loop {
            if self.at(&TokenKind::Dot) {
                // `.ptr`/`.ref` belong to type syntax, which is not
                // parsed here; every other member name is fine.
                let TokenKind::Ident(name) = self.peek(1) else {
                    break;
                };
                let name = *name;
                self.bump();
                let member_loc = self.loc();
                self.bump();
                let loc = Location::spanning(self.module.loc(e), member_loc);
                e = self.module.new_expr(
                    ExprKind::MemberAccess {
                        object: e,
                        name,
                        member: 0,
                        strukt: None,
                    },
                    loc,
                );
                continue;
            }

            if self.at(&TokenKind::LBrack) {
                self.bump();
                let index = self.parse_expr(0);
                self.expect(&TokenKind::RBrack);
                let loc = Location::spanning(self.module.loc(e), self.prev_loc());
                e = self.module.new_expr(
                    ExprKind::Binary {
                        op: BinaryOp::Subscript,
                        lhs: e,
                        rhs: index,
                    },
                    loc,
                );
                continue;
            }

            if self.at(&TokenKind::KwAs) || self.at(&TokenKind::KwAsBang) {
                let kind = if self.at(&TokenKind::KwAsBang) {
                    CastKind::Hard
                } else {
                    CastKind::Soft
                };
                self.bump();
                let ty = self.parse_type();
                let loc = Location::spanning(self.module.loc(e), self.prev_loc());
                e = self
                    .module
                    .new_expr_typed(ExprKind::Cast { kind, operand: e }, loc, ty);
                continue;
            }

            // `f()` forces a call with no arguments.
            if self.at(&TokenKind::LParen) && self.peek(1) == &TokenKind::RParen {
                self.bump();
                self.bump();
                let loc = Location::spanning(self.module.loc(e), self.prev_loc());
                e = self.module.new_expr(
                    ExprKind::Call {
                        callee: e,
                        args: Vec::new(),
                    },
                    loc,
                );
                continue;
            }

            break;
        }

        // Call by juxtaposition: arguments simply follow the callee.
        if allow_juxtaposition && self.arg_follows() {
            let mut args = Vec::new();
            while self.arg_follows() {
                args.push(self.parse_unary(false));
            }
            let loc = Location::spanning(
                self.module.loc(e),
                self.module.loc(*args.last().unwrap()),
            );
            e = self
                .module
                .new_expr(ExprKind::Call { callee: e, args }, loc);
        }
        e
    }

    /// Tokens that can begin a juxtaposed call argument. Tokens that
    /// double as binary operators (`-`, `&`) are deliberately absent.
    fn arg_follows(&self) -> bool {
        matches!(
            self.cur(),
            TokenKind::Ident(_)
                | TokenKind::Int(_)
                | TokenKind::Str(_)
                | TokenKind::LParen
                | TokenKind::Colon
                | TokenKind::At
                | TokenKind::Tilde
                | TokenKind::Bang
                | TokenKind::KwTrue
                | TokenKind::KwFalse
        )
    }

    fn parse_primary(&mut self) -> ExprId {
        let loc = self.loc();
        match self.cur().clone() {
            TokenKind::Int(value) => {
                self.bump();
                self.module.new_expr(ExprKind::IntLit(value), loc)
            }

            TokenKind::KwTrue => {
                self.bump();
                self.module
                    .new_expr_typed(ExprKind::IntLit(1), loc, TypeId::BOOL)
            }

            TokenKind::KwFalse => {
                self.bump();
                self.module
                    .new_expr_typed(ExprKind::IntLit(0), loc, TypeId::BOOL)
            }

            TokenKind::Str(value) => {
                self.bump();
                let index = self.module.intern_string(value);
                self.module.new_expr(ExprKind::StrLit(index), loc)
            }

            TokenKind::Ident(name) => {
                self.bump();
                self.module.new_expr(
                    ExprKind::NameRef {
                        name,
                        scope: self.scope(),
                        target: None,
                    },
                    loc,
                )
            }

            TokenKind::LParen => {
                self.bump();
                let e = self.parse_expr(0);
                self.expect(&TokenKind::RParen);
                e
            }

            // `:type` denotes a type in expression position.
            TokenKind::Colon => {
                self.bump();
                let ty = self.parse_type();
                self.module
                    .new_expr_typed(ExprKind::TypeExpr, loc, ty)
            }

            TokenKind::LBrace => self.parse_block(),

            TokenKind::KwIf => {
                self.bump();
                let cond = self.parse_expr(0);
                let then = self.parse_expr(0);
                let otherwise = if self.eat(&TokenKind::KwElse) {
                    Some(self.parse_expr(0))
                } else {
                    None
                };
                self.module.new_expr(
                    ExprKind::If {
                        cond,
                        then,
                        otherwise,
                    },
                    loc,
                )
            }

            TokenKind::KwWhile => {
                self.bump();
                let cond = self.parse_expr(0);
                let body = self.parse_expr(0);
                self.module.new_expr(ExprKind::While { cond, body }, loc)
            }

            TokenKind::KwFor => {
                self.bump();
                let init = self.parse_expr(0);
                self.expect(&TokenKind::Semicolon);
                let cond = self.parse_expr(0);
                self.expect(&TokenKind::Semicolon);
                let increment = self.parse_expr(0);
                let body = self.parse_expr(0);
                self.module.new_expr(
                    ExprKind::For {
                        init,
                        cond,
                        increment,
                        body,
                    },
                    loc,
                )
            }

            TokenKind::KwReturn => {
                self.bump();
                let value = if self.at(&TokenKind::Semicolon)
                    || self.at(&TokenKind::RBrace)
                    || self.at(&TokenKind::Eof)
                {
                    None
                } else {
                    Some(self.parse_expr(0))
                };
                self.module.new_expr(ExprKind::Return { value }, loc)
            }

            TokenKind::KwSizeof => {
                self.bump();
                let operand = self.parse_unary(false);
                self.module.new_expr(ExprKind::Sizeof { operand }, loc)
            }

            TokenKind::KwAlignof => {
                self.bump();
                let operand = self.parse_unary(false);
                self.module.new_expr(ExprKind::Alignof { operand }, loc)
            }

            other => {
                self.bump();
                self.ctx.error(
                    loc,
                    format!("Expected an expression, found {}", other.describe()),
                );
                self.poison(loc)
            }
        }
    }

    fn parse_block(&mut self) -> ExprId {
        let loc = self.loc();
        self.expect(&TokenKind::LBrace);
        let scope = self.module.new_scope(Some(self.scope()));
        self.scopes.push(scope);

        let mut children = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
            if let Some(stmt) = self.parse_statement(false) {
                children.push(stmt);
            }
        }

        self.scopes.pop();
        self.expect(&TokenKind::RBrace);
        let loc = Location::spanning(loc, self.prev_loc());
        self.module.new_expr(ExprKind::Block { children }, loc)
    }
}

fn sized_integer(text: &str) -> Option<(u16, bool)> {
    let signed = match text.as_bytes().first()? {
        b'i' => true,
        b'u' => false,
        _ => return None,
    };
    let digits = &text[1..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let bit_width: u16 = digits.parse().ok()?;
    Some((bit_width, signed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_source(ctx: &mut Context, source: &str) -> Module {
        let file_id = ctx.add_file("/nonexistent/test.g", source);
        parse(ctx, file_id, source, "test")
    }

    fn top_level_children(module: &Module) -> Vec<ExprId> {
        let body = match module.expr(module.top_level_function).kind {
            ExprKind::FuncDecl { body: Some(b), .. } => b,
            _ => panic!("top-level function has a body"),
        };
        match &module.expr(body).kind {
            ExprKind::Block { children } => children.clone(),
            _ => panic!("top-level body is a block"),
        }
    }

    #[test]
    fn test_parse_var_decl_with_juxtaposed_init() {
        let mut ctx = Context::default();
        let m = parse_source(&mut ctx, "foo : int 3;");
        assert!(!ctx.has_error());

        let children = top_level_children(&m);
        assert_eq!(children.len(), 1);
        let ExprKind::VarDecl { init: Some(init), .. } = m.expr(children[0]).kind else {
            panic!("expected a variable declaration");
        };
        assert!(matches!(m.expr(init).kind, ExprKind::IntLit(3)));
        assert_eq!(m.ty(children[0]), TypeId::INT);
    }

    #[test]
    fn test_parse_inferred_decl() {
        let mut ctx = Context::default();
        let m = parse_source(&mut ctx, "x :: 42;");
        assert!(!ctx.has_error());
        let children = top_level_children(&m);
        assert_eq!(m.ty(children[0]), TypeId::UNKNOWN);
    }

    #[test]
    fn test_parse_juxtaposition_call() {
        let mut ctx = Context::default();
        let m = parse_source(&mut ctx, "f a b;");
        assert!(!ctx.has_error());

        let children = top_level_children(&m);
        let ExprKind::Call { callee, ref args } = m.expr(children[0]).kind else {
            panic!("expected a call");
        };
        assert!(matches!(m.expr(callee).kind, ExprKind::NameRef { .. }));
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_parse_precedence() {
        let mut ctx = Context::default();
        let m = parse_source(&mut ctx, "x := 1 + 2 * 3;");
        assert!(!ctx.has_error());

        let children = top_level_children(&m);
        let ExprKind::Binary {
            op: BinaryOp::Assign,
            rhs,
            ..
        } = m.expr(children[0]).kind
        else {
            panic!("expected an assignment");
        };
        let ExprKind::Binary {
            op: BinaryOp::Add,
            rhs: mul,
            ..
        } = m.expr(rhs).kind
        else {
            panic!("expected addition at the top");
        };
        assert!(matches!(
            m.expr(mul).kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_function_decl() {
        let mut ctx = Context::default();
        let m = parse_source(&mut ctx, "add : int(a : int, b : int) { a + b };");
        assert!(!ctx.has_error());

        // The synthetic top-level function plus `add`.
        assert_eq!(m.functions.len(), 2);
        let add = m.functions[1];
        let TypeKind::Function { params, .. } = m.type_kind(m.ty(add)) else {
            panic!("expected a function type");
        };
        assert_eq!(params.len(), 2);
        assert!(params[0].name.is_some());
    }

    #[test]
    fn test_parse_external_function() {
        let mut ctx = Context::default();
        let m = parse_source(&mut ctx, "puts : void(s : byte.ptr);");
        assert!(!ctx.has_error());
        let puts = m.functions[1];
        let ExprKind::FuncDecl { body, linkage, .. } = &m.expr(puts).kind else {
            panic!("expected a function");
        };
        assert!(body.is_none());
        assert_eq!(*linkage, Linkage::Imported);
    }

    #[test]
    fn test_parse_dynamic_array_type() {
        let mut ctx = Context::default();
        let m = parse_source(&mut ctx, "a :[int dynamic];");
        assert!(!ctx.has_error());
        let children = top_level_children(&m);
        assert!(matches!(
            m.type_kind(m.ty(children[0])),
            TypeKind::DynamicArray { .. }
        ));
    }

    #[test]
    fn test_parse_sum_type_decl() {
        let mut ctx = Context::default();
        let m = parse_source(&mut ctx, "foo : sum { x :int; y :uint; };");
        assert!(!ctx.has_error());
        let children = top_level_children(&m);
        let ExprKind::TypeDecl { .. } = m.expr(children[0]).kind else {
            panic!("expected a type declaration");
        };
        let TypeKind::Sum { members, .. } = m.type_kind(m.ty(children[0])) else {
            panic!("expected a sum type");
        };
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn test_parse_pointer_postfix() {
        let mut ctx = Context::default();
        let m = parse_source(&mut ctx, "p : int.ptr;");
        assert!(!ctx.has_error());
        let children = top_level_children(&m);
        let TypeKind::Pointer { elem } = m.type_kind(m.ty(children[0])) else {
            panic!("expected a pointer type");
        };
        assert_eq!(*elem, TypeId::INT);
    }

    #[test]
    fn test_parse_import() {
        let mut ctx = Context::default();
        let m = parse_source(&mut ctx, "import foo;\nx : int 1;");
        assert!(!ctx.has_error());
        assert_eq!(m.imports.len(), 1);
        assert_eq!(ctx.str(m.imports[0].name).as_str(), "foo");
    }

    #[test]
    fn test_parse_free_statement() {
        let mut ctx = Context::default();
        let m = parse_source(&mut ctx, "a :[int dynamic]; -a;");
        assert!(!ctx.has_error());
        let children = top_level_children(&m);
        assert_eq!(children.len(), 2);
        assert!(matches!(
            m.expr(children[1]).kind,
            ExprKind::Unary {
                op: UnaryOp::Neg,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_error_recovers() {
        let mut ctx = Context::default();
        let m = parse_source(&mut ctx, "x : int 1; ) ; y : int 2;");
        assert!(ctx.has_error());
        // The parser kept going past the bad token.
        let children = top_level_children(&m);
        assert!(children.len() >= 2);
    }

    #[test]
    fn test_sized_integer_names() {
        assert_eq!(sized_integer("i16"), Some((16, true)));
        assert_eq!(sized_integer("u8"), Some((8, false)));
        assert_eq!(sized_integer("int"), None);
        assert_eq!(sized_integer("i"), None);
        assert_eq!(sized_integer("i3x"), None);
    }
}
