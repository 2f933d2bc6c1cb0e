//! Semantic analysis.
//!
//! [`analyse`] drives the whole pass for one module: imports are
//! resolved first, then every function signature, then every body. The
//! analyser rewrites the AST in place (inserting implicit casts,
//! replacing calls with intrinsics, folding constants) and reaches a
//! fixed point through the per-node state machine: a node that is
//! `Done` or `Errored` is never analysed again.
//!
//! Errors are data, not control flow: the offending node is marked
//! `Errored`, the context's error flag is set, and analysis continues
//! with its siblings so one compilation surfaces as many problems as
//! possible.

mod convert;

use tracing::debug;

use crate::ast::{
    BinaryOp, CastKind, ExprKind, IntrinsicKind, Linkage, Module, SemaState, UnaryOp,
};
use crate::context::Context;
use crate::diagnostic;
use crate::eval::{self, EvalResult, IntValue};
use crate::index_vec::{ExprId, Name, ScopeId, TypeId};
use crate::metadata;
use crate::source::{FileId, Location};
use crate::types::{FuncAttrs, Member, TypeKind};

/// Analyse `module`. Does nothing if the context has already errored.
pub fn analyse(ctx: &Context, module: &mut Module) {
    if ctx.has_error() {
        return;
    }
    let mut sema = Sema {
        ctx,
        module,
        curr_func: None,
    };
    sema.analyse_module();
}

pub struct Sema<'a> {
    pub(crate) ctx: &'a Context,
    pub(crate) module: &'a mut Module,
    /// The function whose body is being analysed.
    curr_func: Option<ExprId>,
}

impl Sema<'_> {
    // ========================================================================
    // Pipeline
    // ========================================================================

    fn analyse_module(&mut self) {
        debug!(module = %self.module.name, "analysing module");

        if !metadata::resolve_imports(self.ctx, self.module) {
            return;
        }

        // All signatures are analysed before any body so calls and
        // overload sets see fully decayed parameter types.
        let functions = self.module.functions.clone();
        for &f in &functions {
            self.analyse_function_signature(f);
        }
        for &f in &functions {
            self.analyse_function_body(f);
        }
    }

    fn analyse_function_signature(&mut self, decl: ExprId) {
        let ty = self.analyse_type(self.module.ty(decl));
        self.module.set_ty(decl, ty);

        let attrs = match self.module.type_kind(ty) {
            TypeKind::Function { attrs, .. } => *attrs,
            _ => return,
        };
        // `used` only matters for internal functions, where it upgrades
        // the linkage so the definition is not discarded.
        if attrs.has(FuncAttrs::USED) {
            let current = match &self.module.expr(decl).kind {
                ExprKind::FuncDecl { linkage, .. } => *linkage,
                _ => return,
            };
            if current != Linkage::Internal {
                let loc = self.module.loc(decl);
                self.ctx.warning(loc, "'used' has no effect on this function");
            } else if let ExprKind::FuncDecl { linkage, .. } =
                &mut self.module.expr_mut(decl).kind
            {
                *linkage = Linkage::Used;
            }
        }
    }

    fn analyse_function_body(&mut self, decl: ExprId) {
        let prev_func = self.curr_func.replace(decl);

        let (name, body, fn_scope) = match &self.module.expr(decl).kind {
            ExprKind::FuncDecl {
                name, body, scope, ..
            } => (*name, *body, *scope),
            _ => unreachable!("analyse_function_body on non-function"),
        };
        let fn_ty = self.module.ty(decl);
        let (ret, params) = match self.module.type_kind(fn_ty) {
            TypeKind::Function { ret, params, .. } => (*ret, params.clone()),
            // An errored signature leaves nothing to check here.
            _ => {
                self.curr_func = prev_func;
                return;
            }
        };

        let Some(body) = body else {
            if self.module.state(decl) == SemaState::NotAnalysed {
                self.module.set_state(decl, SemaState::Done);
            }
            self.curr_func = prev_func;
            return;
        };

        // Declare the named parameters in the function scope.
        for param in &params {
            let Some(param_name) = param.name else { continue };
            let existing = self.module.find(fn_scope, param_name);
            if let Some(&clash) = existing.first() {
                let clash_loc = self.module.loc(clash);
                self.ctx
                    .error(clash_loc, "Declaration conflicts with parameter name");
                self.ctx.note(param.loc, "Parameter declared here");
                continue;
            }
            let d = self.module.new_expr_typed(
                ExprKind::VarDecl {
                    name: param_name,
                    init: None,
                    linkage: Linkage::Local,
                },
                param.loc,
                param.ty,
            );
            self.module
                .declare(fn_scope, param_name, d)
                .expect("empty scope entry accepts a declaration");
            self.analyse(d, None);
            if let ExprKind::FuncDecl { param_decls, .. } = &mut self.module.expr_mut(decl).kind {
                param_decls.push(d);
            }
        }

        // Parameter dynamic arrays are owned by the caller; they were
        // registered as dangling by their declarations just above.
        if let ExprKind::FuncDecl {
            dangling_dynarrays, ..
        } = &mut self.module.expr_mut(decl).kind
        {
            dangling_dynarrays.clear();
        }

        let body = {
            let analysed = self.analyse(body, Some(ret));
            if let ExprKind::FuncDecl { body, .. } = &mut self.module.expr_mut(decl).kind {
                *body = Some(analysed);
            }
            analysed
        };

        if self.module.state(decl) == SemaState::NotAnalysed {
            self.module.set_state(decl, SemaState::Done);
        }

        if self.ctx.has_error() {
            self.curr_func = prev_func;
            return;
        }

        // Report every dynamic array declared in this function that was
        // neither freed nor returned.
        let dangling = match &self.module.expr(decl).kind {
            ExprKind::FuncDecl {
                dangling_dynarrays, ..
            } => dangling_dynarrays.clone(),
            _ => unreachable!(),
        };
        for d in dangling {
            let loc = self.module.loc(d);
            self.ctx.error(loc, "You forgot to free this dynamic array");
        }

        self.finish_function_body(decl, name, body, ret);
        self.curr_func = prev_func;
    }

    /// The last expression of a non-void function must be a return or
    /// convertible to the return type, in which case it is wrapped in
    /// one. `main` additionally synthesises `return 0` for an empty
    /// body; void functions are padded with an empty return.
    fn finish_function_body(&mut self, decl: ExprId, name: Name, body: ExprId, ret: TypeId) {
        let is_block = matches!(self.module.expr(body).kind, ExprKind::Block { .. });

        if !self.module.is_void(ret) {
            let last = if is_block {
                let children_empty = match &self.module.expr(body).kind {
                    ExprKind::Block { children } => children.is_empty(),
                    _ => unreachable!(),
                };
                if children_empty {
                    if self.ctx.str(name).as_str() != "main" {
                        let loc = self.module.loc(decl);
                        self.ctx.error(
                            loc,
                            format!(
                                "Function `{}` has non-void return type, and must return a value",
                                self.ctx.str(name)
                            ),
                        );
                        return;
                    }
                    // Executable entry points get a return value made up
                    // for them.
                    let zero = self
                        .module
                        .new_expr(ExprKind::IntLit(0), Location::default());
                    let ret_expr = self
                        .module
                        .new_expr(ExprKind::Return { value: Some(zero) }, Location::default());
                    let analysed = self.analyse(ret_expr, None);
                    if let ExprKind::Block { children } = &mut self.module.expr_mut(body).kind {
                        children.push(analysed);
                    }
                    return;
                }
                match &self.module.expr(body).kind {
                    ExprKind::Block { children } => *children.last().unwrap(),
                    _ => unreachable!(),
                }
            } else {
                body
            };

            if matches!(self.module.expr(last).kind, ExprKind::Return { .. }) {
                return;
            }

            let (converted, ok) = self.convert(last, ret);
            if !ok {
                let loc = self.module.loc(converted);
                self.ctx.error(
                    loc,
                    format!(
                        "Type of last expression {} is not convertible to return type {}",
                        self.module.type_to_string(self.ctx, self.module.ty(converted)),
                        self.module.type_to_string(self.ctx, ret)
                    ),
                );
                return;
            }
            let converted = self.lvalue_to_rvalue(converted);

            let loc = self.module.loc(converted);
            let wrapped = self.module.new_expr(
                ExprKind::Return {
                    value: Some(converted),
                },
                loc,
            );
            self.module.set_state(wrapped, SemaState::Done);
            self.module.set_ty(wrapped, TypeId::VOID);

            if is_block {
                if let ExprKind::Block { children } = &mut self.module.expr_mut(body).kind {
                    *children.last_mut().unwrap() = wrapped;
                }
            } else if let ExprKind::FuncDecl { body, .. } = &mut self.module.expr_mut(decl).kind {
                *body = Some(wrapped);
            }
        } else {
            if is_block {
                let needs_return = match &self.module.expr(body).kind {
                    ExprKind::Block { children } => match children.last() {
                        None => true,
                        Some(&last) => {
                            !matches!(self.module.expr(last).kind, ExprKind::Return { .. })
                        }
                    },
                    _ => unreachable!(),
                };
                if needs_return {
                    let ret_expr = self
                        .module
                        .new_expr(ExprKind::Return { value: None }, Location::default());
                    let analysed = self.analyse(ret_expr, None);
                    if let ExprKind::Block { children } = &mut self.module.expr_mut(body).kind {
                        children.push(analysed);
                    }
                }
            }
            let discarded = self.discard(body);
            if discarded != body {
                if let ExprKind::FuncDecl { body, .. } = &mut self.module.expr_mut(decl).kind {
                    *body = Some(discarded);
                }
            }
        }
    }

    // ========================================================================
    // Expression dispatch
    // ========================================================================

    /// Analyse one expression.
    ///
    /// Because rewrites replace the node, the caller must store the
    /// returned id back into the parent slot and re-read through it.
    pub fn analyse(&mut self, expr: ExprId, expected: Option<TypeId>) -> ExprId {
        if self.module.state(expr) != SemaState::NotAnalysed {
            return expr;
        }
        self.module.set_state(expr, SemaState::InProgress);

        // A typed node's type is analysed before the node itself.
        let ty = self.analyse_type(self.module.ty(expr));
        self.module.set_ty(expr, ty);

        let result = self.analyse_kind(expr, expected);

        if !self.module.state(result).analysed() {
            self.module.set_state(result, SemaState::Done);
        }
        result
    }

    fn ok(&self, expr: ExprId) -> bool {
        self.module.expr_ok(expr)
    }

    fn errored(&self, expr: ExprId) -> bool {
        self.module.state(expr) == SemaState::Errored
    }

    fn set_errored(&mut self, expr: ExprId) {
        self.module.set_state(expr, SemaState::Errored);
    }

    fn analyse_kind(&mut self, expr: ExprId, expected: Option<TypeId>) -> ExprId {
        match self.module.expr(expr).kind.clone() {
            ExprKind::IntLit(_) => {
                if self.module.is_unknown(self.module.ty(expr)) {
                    self.module.set_ty(expr, TypeId::INT);
                }
                expr
            }

            ExprKind::StrLit(index) => {
                let len = self.module.strings[index].len() as u64;
                let size = self.module.new_expr_typed(
                    ExprKind::EvaluatedConstant {
                        expr: None,
                        value: EvalResult::int(len),
                    },
                    Location::default(),
                    TypeId::INT,
                );
                self.module.set_state(size, SemaState::Done);
                let ty = self.module.new_type_done(TypeKind::Array {
                    elem: TypeId::BYTE,
                    size,
                });
                self.module.set_ty(expr, ty);
                self.module.set_lvalue(expr, true);
                expr
            }

            // The denoted type was analysed in the dispatch prelude.
            ExprKind::TypeExpr => expr,

            ExprKind::CompoundLit { values } => {
                let mut errored = false;
                let mut analysed = Vec::with_capacity(values.len());
                for child in values {
                    let child = self.analyse(child, None);
                    let child = if self.ok(child) {
                        self.lvalue_to_rvalue(child)
                    } else {
                        errored = true;
                        child
                    };
                    analysed.push(child);
                }
                if let ExprKind::CompoundLit { values } = &mut self.module.expr_mut(expr).kind {
                    *values = analysed;
                }
                if errored {
                    self.set_errored(expr);
                }

                if self.module.is_unknown(self.module.ty(expr)) {
                    match expected {
                        Some(want) if !self.module.is_unknown(want) => {
                            let want = self.analyse_type(want);
                            self.module.set_ty(expr, want);
                        }
                        _ => {
                            let loc = self.module.loc(expr);
                            self.ctx
                                .error(loc, "Cannot infer type of untyped compound literal");
                            self.set_errored(expr);
                        }
                    }
                }
                expr
            }

            ExprKind::While { cond, body } => {
                let cond = self.analyse_loop_condition(cond);
                let body = self.analyse_and_discard(body);
                if let ExprKind::While { cond: c, body: b } = &mut self.module.expr_mut(expr).kind {
                    *c = cond;
                    *b = body;
                }
                self.module.set_ty(expr, TypeId::VOID);
                expr
            }

            ExprKind::For {
                init,
                cond,
                increment,
                body,
            } => {
                let init = self.analyse_and_discard(init);
                let increment = self.analyse_and_discard(increment);
                let cond = self.analyse_loop_condition(cond);
                let body = self.analyse_and_discard(body);
                if let ExprKind::For {
                    init: i,
                    cond: c,
                    increment: inc,
                    body: b,
                } = &mut self.module.expr_mut(expr).kind
                {
                    *i = init;
                    *c = cond;
                    *inc = increment;
                    *b = body;
                }
                self.module.set_ty(expr, TypeId::VOID);
                expr
            }

            ExprKind::Return { value } => {
                self.analyse_return(expr, value);
                expr
            }

            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                self.analyse_if(expr, cond, then, otherwise);
                expr
            }

            ExprKind::Block { children } => {
                self.analyse_block(expr, children, expected);
                expr
            }

            ExprKind::Cast { kind, operand } => {
                self.analyse_cast(expr, kind, operand);
                expr
            }

            ExprKind::IntrinsicCall { intrinsic, args } => {
                self.analyse_intrinsic_call(expr, intrinsic, args)
            }

            ExprKind::Call { callee, args } => self.analyse_call(expr, callee, args),

            ExprKind::VarDecl { init, .. } => {
                self.analyse_var_decl(expr, init);
                expr
            }

            ExprKind::EnumeratorDecl { .. } => {
                diagnostic::ice("enumerator declarations are analysed with their enum type")
            }

            ExprKind::MemberAccess { object, name, .. } => {
                self.analyse_member_access(expr, object, name)
            }

            ExprKind::Sizeof { operand } => {
                let operand = self.analyse(operand, None);
                let bytes = self.sizeof_operand_bits(operand, "sizeof") / 8;
                let loc = self.module.loc(expr);
                self.module
                    .new_expr_typed(ExprKind::IntLit(bytes as u64), loc, TypeId::INT)
            }

            ExprKind::Alignof { operand } => {
                let operand = self.analyse(operand, None);
                let ty = self.module.ty(operand);
                let bytes = if self.module.is_unknown(ty) {
                    let loc = self.module.loc(expr);
                    self.ctx.error(loc, "Unhandled expression in alignof");
                    0
                } else {
                    self.module.type_align_bits(self.ctx, ty) / 8
                };
                let loc = self.module.loc(expr);
                self.module
                    .new_expr_typed(ExprKind::IntLit(bytes as u64), loc, TypeId::INT)
            }

            ExprKind::OverloadSet { overloads } => {
                self.analyse_overload_set(expr, &overloads);
                expr
            }

            ExprKind::Unary {
                op,
                postfix,
                operand,
            } => {
                self.analyse_unary(expr, op, postfix, operand);
                expr
            }

            ExprKind::Binary { op, lhs, rhs } => {
                self.analyse_binary(expr, op, lhs, rhs);
                expr
            }

            ExprKind::NameRef { name, scope, .. } => {
                self.analyse_name_ref(expr, name, scope);
                expr
            }

            ExprKind::FuncDecl { .. } => {
                if !self.module.is_function(self.module.ty(expr)) {
                    diagnostic::ice("function declaration without function type");
                }
                expr
            }

            // The work is analysing the declared type, done in the
            // dispatch prelude.
            ExprKind::TypeDecl { .. } | ExprKind::TypeAliasDecl { .. } => expr,

            // Only created by sema; nothing to check.
            ExprKind::ModuleRef { .. } | ExprKind::EvaluatedConstant { .. } => expr,
        }
    }

    fn sizeof_operand_bits(&mut self, operand: ExprId, what: &str) -> usize {
        let ty = self.module.ty(operand);
        if self.module.is_unknown(ty) {
            let loc = self.module.loc(operand);
            self.ctx.error(loc, format!("Unhandled expression in {what}"));
            return 0;
        }
        self.module.type_size_bits(self.ctx, ty)
    }

    fn analyse_loop_condition(&mut self, cond: ExprId) -> ExprId {
        let cond = self.analyse(cond, None);
        let (cond, ok) = self.convert(cond, TypeId::BOOL);
        if !ok {
            let loc = self.module.loc(cond);
            self.ctx.error(
                loc,
                format!(
                    "Invalid type for loop condition: {}",
                    self.module.type_to_string(self.ctx, self.module.ty(cond))
                ),
            );
        }
        self.lvalue_to_rvalue(cond)
    }

    fn analyse_return(&mut self, expr: ExprId, value: Option<ExprId>) {
        let curr_func = self.curr_func.expect("return outside of a function");
        let ret_type = match self.module.type_kind(self.module.ty(curr_func)) {
            TypeKind::Function { ret, .. } => *ret,
            _ => TypeId::VOID,
        };

        let value = value.map(|v| {
            let v = self.analyse(v, Some(ret_type));
            if let ExprKind::Return { value } = &mut self.module.expr_mut(expr).kind {
                *value = Some(v);
            }
            v
        });

        // Returning a dynamic-array binding hands it to the caller, so
        // it is no longer this function's leak to report.
        if let Some(v) = value {
            if self.module.is_dynamic_array(self.module.ty(v)) {
                if let ExprKind::NameRef {
                    target: Some(target),
                    ..
                } = self.module.expr(v).kind
                {
                    self.remove_dangling(curr_func, target);
                }
            }
        }

        let loc = self.module.loc(expr);
        if self.module.is_void(ret_type) {
            // A void return may still carry an operand, as long as that
            // operand is itself void (e.g. a call to a void function).
            if let Some(v) = value {
                if self.ok(v) && !self.module.is_void(self.module.ty(v)) {
                    self.ctx
                        .error(loc, "Function returning void must not return a value");
                }
            }
        } else {
            match value {
                None => self.ctx.error(loc, "Non-void function must return a value"),
                Some(v) => {
                    let (v, ok) = self.convert(v, ret_type);
                    if !ok {
                        self.ctx.error(
                            loc,
                            format!(
                                "Type of return expression is not convertible to return type {}",
                                self.module.type_to_string(self.ctx, ret_type)
                            ),
                        );
                    }
                    let v = self.lvalue_to_rvalue(v);
                    if let ExprKind::Return { value } = &mut self.module.expr_mut(expr).kind {
                        *value = Some(v);
                    }
                }
            }
        }
        self.module.set_ty(expr, TypeId::VOID);
    }

    fn analyse_if(&mut self, expr: ExprId, cond: ExprId, then: ExprId, otherwise: Option<ExprId>) {
        let cond = self.analyse(cond, None);
        let (cond, ok) = self.convert(cond, TypeId::BOOL);
        if !ok {
            let loc = self.module.loc(cond);
            self.ctx.error(
                loc,
                format!(
                    "Invalid type for if condition: {}",
                    self.module.type_to_string(self.ctx, self.module.ty(cond))
                ),
            );
        }
        let cond = self.lvalue_to_rvalue(cond);

        let mut then = self.analyse(then, None);
        let mut otherwise = otherwise.map(|e| self.analyse(e, None));

        if !self.ok(then) || otherwise.is_some_and(|e| !self.ok(e)) {
            self.set_errored(expr);
        }

        // With two non-void branches convertible to a common type, the
        // if-expression has that type; otherwise it is void and both
        // branches are discarded.
        self.module.set_ty(expr, TypeId::VOID);
        if let Some(other) = otherwise {
            if !self.module.is_void(self.module.ty(then))
                && !self.module.is_void(self.module.ty(other))
            {
                let (a, b, ok) = self.convert_to_common_type(then, other);
                then = a;
                otherwise = Some(b);
                if ok {
                    self.module.set_ty(expr, self.module.ty(then));
                    let then_lv = self.module.is_lvalue(then);
                    let other_lv = self.module.is_lvalue(b);
                    if then_lv && other_lv {
                        self.module.set_lvalue(expr, true);
                    } else if then_lv {
                        then = self.lvalue_to_rvalue(then);
                    } else if other_lv {
                        otherwise = Some(self.lvalue_to_rvalue(b));
                    }
                }
            }
        }

        if self.module.is_void(self.module.ty(expr)) {
            then = self.discard(then);
            otherwise = otherwise.map(|e| self.discard(e));
        }

        if let ExprKind::If {
            cond: c,
            then: t,
            otherwise: o,
        } = &mut self.module.expr_mut(expr).kind
        {
            *c = cond;
            *t = then;
            *o = otherwise;
        }
    }

    fn analyse_block(&mut self, expr: ExprId, children: Vec<ExprId>, expected: Option<TypeId>) {
        if children.is_empty() {
            self.module.set_ty(expr, TypeId::VOID);
            return;
        }

        let last_index = children.len() - 1;
        let mut analysed = Vec::with_capacity(children.len());
        let mut errored = false;
        for (i, child) in children.into_iter().enumerate() {
            let last = i == last_index;
            let child = self.analyse(child, if last { expected } else { None });
            if !self.ok(child) {
                errored = true;
                analysed.push(child);
                continue;
            }
            analysed.push(if last { child } else { self.discard(child) });
        }

        let last = *analysed.last().unwrap();
        if let ExprKind::Block { children } = &mut self.module.expr_mut(expr).kind {
            *children = analysed;
        }
        if errored {
            self.set_errored(expr);
        } else {
            self.module.set_ty(expr, self.module.ty(last));
            let lv = self.module.is_lvalue(last);
            self.module.set_lvalue(expr, lv);
        }
    }

    fn analyse_var_decl(&mut self, expr: ExprId, init: Option<ExprId>) {
        // With no declared type, infer from the initialiser; the
        // declared type otherwise drives top-down inference.
        let infer = self.module.is_unknown(self.module.ty(expr));
        let init = init.map(|i| {
            let expected = if infer {
                None
            } else {
                Some(self.decl_type_decay(self.module.ty(expr)))
            };
            let i = self.analyse(i, expected);
            if let ExprKind::VarDecl { init, .. } = &mut self.module.expr_mut(expr).kind {
                *init = Some(i);
            }
            i
        });

        if infer {
            match init {
                Some(i) if self.ok(i) => {
                    let ty = self.module.ty(i);
                    self.module.set_ty(expr, ty);
                }
                _ => {
                    self.set_errored(expr);
                    return;
                }
            }
        }

        let decayed = self.decl_type_decay(self.module.ty(expr));
        self.module.set_ty(expr, decayed);

        // A failed initialiser conversion does not error the declaration
        // itself; its type is still well-formed.
        if let Some(i) = init {
            let (i, ok) = self.convert(i, decayed);
            if !ok {
                let loc = self.module.loc(i);
                self.ctx.error(
                    loc,
                    format!(
                        "Type of initialiser, {}, is not convertible to variable type {}",
                        self.module.type_to_string(self.ctx, self.module.ty(i)),
                        self.module.type_to_string(self.ctx, decayed)
                    ),
                );
            }
            let i = self.lvalue_to_rvalue(i);
            if let ExprKind::VarDecl { init, .. } = &mut self.module.expr_mut(expr).kind {
                *init = Some(i);
            }
        }

        if self.module.is_dynamic_array(decayed) {
            if let Some(f) = self.curr_func {
                if let ExprKind::FuncDecl {
                    dangling_dynarrays, ..
                } = &mut self.module.expr_mut(f).kind
                {
                    dangling_dynarrays.push(expr);
                }
            }
        }

        self.module.set_lvalue(expr, true);
    }

    fn analyse_cast(&mut self, expr: ExprId, kind: CastKind, operand: ExprId) {
        // Casts produced by sema are trusted.
        if matches!(
            kind,
            CastKind::Implicit
                | CastKind::LValueToRValue
                | CastKind::LValueToReference
                | CastKind::ReferenceToLValue
        ) {
            self.module
                .set_lvalue(expr, kind == CastKind::ReferenceToLValue);
            return;
        }

        let to = self.module.ty(expr);
        let operand = {
            let analysed = self.analyse(operand, Some(to));
            if let ExprKind::Cast { operand, .. } = &mut self.module.expr_mut(expr).kind {
                *operand = analysed;
            }
            analysed
        };
        if !self.ok(operand) {
            return;
        }

        // Implicitly convertible means the cast is fine. Even on
        // failure this performs lvalue-to-rvalue conversion, which is
        // what an explicit cast wants anyway.
        let (operand, converted) = self.convert(operand, to);
        if let ExprKind::Cast { operand: o, .. } = &mut self.module.expr_mut(expr).kind {
            *o = operand;
        }
        if converted {
            return;
        }

        let from = self.module.ty(operand);
        let loc = self.module.loc(expr);

        if self.module.is_reference(to) {
            self.ctx.error(loc, "Invalid cast of rvalue to reference type");
            return;
        }

        let from_integerish = self.module.is_integer(from, true) || self.module.is_enum(from);
        if from_integerish && self.module.is_integer(to, true) {
            return;
        }

        if self.module.is_pointer(from) && self.module.is_integer(to, true) {
            return;
        }

        let hard_only = |sema: &Sema| {
            if kind != CastKind::Hard {
                sema.ctx.error(
                    loc,
                    format!(
                        "Cast from {} to {} is unsafe. If this is intended, use 'as!' instead",
                        sema.module.type_to_string(sema.ctx, from),
                        sema.module.type_to_string(sema.ctx, to)
                    ),
                );
            }
        };

        if self.module.is_integer(from, true) && self.module.is_enum(to) {
            return hard_only(self);
        }

        if self.module.is_pointer(to)
            && (self.module.is_integer(from, false) || self.module.is_pointer(from))
        {
            return hard_only(self);
        }

        if self.module.type_size_bits(self.ctx, from) == self.module.type_size_bits(self.ctx, to)
            && kind == CastKind::Hard
        {
            return;
        }

        self.ctx.error(
            loc,
            format!(
                "Invalid cast from {} to {}",
                self.module.type_to_string(self.ctx, from),
                self.module.type_to_string(self.ctx, to)
            ),
        );
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn builtin_intrinsic(name: &str) -> Option<IntrinsicKind> {
        Some(match name {
            "__builtin_debugtrap" => IntrinsicKind::DebugTrap,
            "__builtin_filename" => IntrinsicKind::Filename,
            "__builtin_inline" => IntrinsicKind::Inline,
            "__builtin_line" => IntrinsicKind::Line,
            "__builtin_memcpy" => IntrinsicKind::MemCopy,
            "__builtin_memset" => IntrinsicKind::MemSet,
            "__builtin_syscall" => IntrinsicKind::Syscall,
            _ => return None,
        })
    }

    fn analyse_call(&mut self, expr: ExprId, callee: ExprId, args: Vec<ExprId>) -> ExprId {
        // A callee naming a builtin rewrites the whole call into an
        // intrinsic before anything is analysed. The arguments are
        // shared with the original node rather than patched in place.
        if let ExprKind::NameRef { name, .. } = &self.module.expr(callee).kind {
            if let Some(kind) = Self::builtin_intrinsic(self.ctx.str(*name).as_str()) {
                let loc = self.module.loc(expr);
                let intrinsic = self.module.new_expr(
                    ExprKind::IntrinsicCall {
                        intrinsic: kind,
                        args,
                    },
                    loc,
                );
                return self.analyse(intrinsic, None);
            }
        }

        let args: Vec<ExprId> = args.into_iter().map(|a| self.analyse(a, None)).collect();
        if let ExprKind::Call { args: slots, .. } = &mut self.module.expr_mut(expr).kind {
            *slots = args.clone();
        }

        let callee = {
            let analysed = self.analyse(callee, None);
            if let ExprKind::Call { callee, .. } = &mut self.module.expr_mut(expr).kind {
                *callee = analysed;
            }
            analysed
        };
        if !self.ok(callee) {
            self.set_errored(expr);
            return expr;
        }

        // Overload resolution is not implemented; detecting the
        // situation is sema's job, resolving it is not (yet).
        if matches!(self.module.expr(callee).kind, ExprKind::OverloadSet { .. })
            || self.module.ty(callee) == TypeId::OVERLOAD_SET
        {
            if args.iter().any(|&a| self.errored(a)) {
                self.set_errored(expr);
                return expr;
            }
            diagnostic::ice("sorry, overload resolution is currently not implemented");
        }

        // A type in callee position is a cast (one argument) or a
        // compound literal (any other arity).
        let callee_is_type = matches!(self.module.expr(callee).kind, ExprKind::TypeExpr)
            || matches!(
                self.module.expr(callee).kind,
                ExprKind::NameRef {
                    target: Some(t),
                    ..
                } if matches!(self.module.expr(t).kind, ExprKind::TypeDecl { .. })
            );
        if callee_is_type {
            let args: Vec<ExprId> = args
                .into_iter()
                .map(|a| self.lvalue_to_rvalue(a))
                .collect();
            let loc = self.module.loc(expr);
            let ty = self.module.ty(callee);
            if args.len() == 1 {
                return self.module.new_expr_typed(
                    ExprKind::Cast {
                        kind: CastKind::Hard,
                        operand: args[0],
                    },
                    loc,
                    ty,
                );
            }
            return self
                .module
                .new_expr_typed(ExprKind::CompoundLit { values: args }, loc, ty);
        }

        // Calling through a function pointer dereferences it.
        let callee = {
            let ty = self.module.ty(callee);
            if let Some(elem) = self.module.elem_type(ty) {
                if self.module.is_pointer(ty) && self.module.is_function(elem) {
                    let deref = self.wrap_with_cast(callee, elem, CastKind::Implicit);
                    if let ExprKind::Call { callee, .. } = &mut self.module.expr_mut(expr).kind {
                        *callee = deref;
                    }
                    deref
                } else {
                    callee
                }
            } else {
                callee
            }
        };

        // An integer in callee position re-shapes the call into
        // left-associative multiplication: `100 x y` is `100 * (x * y)`.
        let callee_ty = self.module.ty(callee);
        if self.module.is_integer(callee_ty, false) {
            if args.is_empty() {
                // `100()` is suspicious but harmless.
                if !self.has_side_effects(expr) {
                    let loc = self.module.loc(expr);
                    self.ctx.warning(loc, "Expression result unused");
                }
                self.module.set_ty(expr, callee_ty);
                return expr;
            }

            let mut rhs = *args.last().unwrap();
            for &lhs in args[..args.len() - 1].iter().rev() {
                let loc = Location::spanning(self.module.loc(lhs), self.module.loc(rhs));
                rhs = self.module.new_expr(
                    ExprKind::Binary {
                        op: BinaryOp::Mul,
                        lhs,
                        rhs,
                    },
                    loc,
                );
            }
            let loc = self.module.loc(expr);
            let product = self.module.new_expr(
                ExprKind::Binary {
                    op: BinaryOp::Mul,
                    lhs: callee,
                    rhs,
                },
                loc,
            );
            return self.analyse(product, None);
        }

        if !self.module.is_function(callee_ty) {
            let loc = self.module.loc(callee);
            self.ctx.error(
                loc,
                format!(
                    "Cannot call non-function(-pointer) type {}",
                    self.module.type_to_string(self.ctx, callee_ty)
                ),
            );
            self.set_errored(expr);
            return expr;
        }

        let (ret, params) = match self.module.type_kind(callee_ty) {
            TypeKind::Function { ret, params, .. } => (*ret, params.clone()),
            _ => unreachable!(),
        };
        self.module.set_ty(expr, ret);

        if args.len() != params.len() {
            let loc = self.module.loc(expr);
            self.ctx.error(
                loc,
                format!(
                    "Incorrect number of arguments for function. Expected {} instead of {}",
                    params.len(),
                    args.len()
                ),
            );
        }

        // Arguments convert to the parameter types. This is one of the
        // few places reference binding is allowed, so lvalue-to-rvalue
        // conversion only applies for non-reference parameters; the
        // conversion engine handles both transparently.
        let mut converted = args;
        for (i, param) in params.iter().enumerate().take(converted.len()) {
            let (arg, ok) = self.convert(converted[i], param.ty);
            converted[i] = arg;
            if !ok {
                let loc = self.module.loc(arg);
                self.ctx.error(
                    loc,
                    format!(
                        "Type of argument {} is not convertible to parameter type {}",
                        self.module.type_to_string(self.ctx, self.module.ty(arg)),
                        self.module.type_to_string(self.ctx, param.ty)
                    ),
                );
            }
            if !self.module.is_reference(param.ty) {
                converted[i] = self.lvalue_to_rvalue(converted[i]);
            }
        }
        if let ExprKind::Call { args, .. } = &mut self.module.expr_mut(expr).kind {
            *args = converted;
        }
        expr
    }

    fn analyse_intrinsic_call(
        &mut self,
        expr: ExprId,
        intrinsic: IntrinsicKind,
        args: Vec<ExprId>,
    ) -> ExprId {
        let loc = self.module.loc(expr);
        match intrinsic {
            IntrinsicKind::DebugTrap => {
                if !args.is_empty() {
                    self.ctx
                        .error(loc, "__builtin_debugtrap() takes no arguments");
                }
                self.module.set_ty(expr, TypeId::VOID);
                expr
            }

            IntrinsicKind::Filename => {
                if !args.is_empty() {
                    self.ctx
                        .error(loc, "__builtin_filename() takes no arguments");
                }
                let filename = self
                    .ctx
                    .files()
                    .get(FileId(loc.file_id))
                    .map(|f| f.name())
                    .unwrap_or_else(|| "<unknown>".to_string());
                let index = self.module.intern_string(filename);
                let lit = self.module.new_expr(ExprKind::StrLit(index), loc);
                let lit = self.analyse(lit, None);
                let ty = self.module.ty(lit);
                self.module.set_ty(expr, ty);
                self.module.set_state(expr, SemaState::Done);
                self.module.new_expr_typed(
                    ExprKind::EvaluatedConstant {
                        expr: Some(expr),
                        value: EvalResult::String(index),
                    },
                    loc,
                    ty,
                )
            }

            IntrinsicKind::Line => {
                if !args.is_empty() {
                    self.ctx.error(loc, "__builtin_line() takes no arguments");
                }
                self.module.set_ty(expr, TypeId::INT);
                self.module.set_state(expr, SemaState::Done);
                let line = loc
                    .seek_line_column(self.ctx.files())
                    .map(|(line, _)| line as u64)
                    .unwrap_or(0);
                self.module.new_expr_typed(
                    ExprKind::EvaluatedConstant {
                        expr: Some(expr),
                        value: EvalResult::Int(IntValue::new(line)),
                    },
                    loc,
                    TypeId::INT,
                )
            }

            IntrinsicKind::Inline => {
                if args.len() != 1 {
                    self.ctx
                        .error(loc, "__builtin_inline() takes exactly one argument");
                    self.set_errored(expr);
                    return expr;
                }
                let call = self.analyse(args[0], None);
                if let ExprKind::IntrinsicCall { args, .. } = &mut self.module.expr_mut(expr).kind {
                    args[0] = call;
                }
                if !self.ok(call) {
                    self.set_errored(expr);
                }
                if !matches!(self.module.expr(call).kind, ExprKind::Call { .. }) {
                    let call_loc = self.module.loc(call);
                    self.ctx.error(
                        call_loc,
                        "Argument to __builtin_inline() must be a (non-builtin) function call",
                    );
                }
                if self.ok(call) {
                    let ty = self.module.ty(call);
                    self.module.set_ty(expr, ty);
                }
                expr
            }

            IntrinsicKind::MemCopy | IntrinsicKind::MemSet => {
                let name = if intrinsic == IntrinsicKind::MemCopy {
                    "__builtin_memcpy"
                } else {
                    "__builtin_memset"
                };
                if args.len() != 3 {
                    self.ctx
                        .error(loc, format!("{name}() takes exactly three arguments"));
                    self.set_errored(expr);
                    return expr;
                }
                let second = if intrinsic == IntrinsicKind::MemCopy {
                    TypeId::VOID_PTR
                } else {
                    TypeId::BYTE
                };
                let wanted = [TypeId::VOID_PTR, second, TypeId::INT];
                let mut analysed = Vec::with_capacity(3);
                for (&arg, &want) in args.iter().zip(wanted.iter()) {
                    let arg = self.analyse(arg, None);
                    let arg = self.convert_or_error(arg, want);
                    analysed.push(self.lvalue_to_rvalue(arg));
                }
                if let ExprKind::IntrinsicCall { args, .. } = &mut self.module.expr_mut(expr).kind {
                    *args = analysed;
                }
                self.module.set_ty(expr, TypeId::VOID);
                expr
            }

            IntrinsicKind::Syscall => {
                if args.is_empty() || args.len() > 7 {
                    self.ctx
                        .error(loc, "__builtin_syscall() takes between 1 and 7 arguments");
                    self.set_errored(expr);
                    return expr;
                }
                let mut analysed = Vec::with_capacity(args.len());
                for arg in args {
                    let mut arg = self.analyse(arg, None);
                    if self.module.is_pointer(self.module.ty(arg)) {
                        arg = self.wrap_with_cast(arg, TypeId::INT, CastKind::Implicit);
                    }
                    let arg = self.convert_or_error(arg, TypeId::INT);
                    analysed.push(self.lvalue_to_rvalue(arg));
                }
                if let ExprKind::IntrinsicCall { args, .. } = &mut self.module.expr_mut(expr).kind {
                    *args = analysed;
                }
                self.module.set_ty(expr, TypeId::INT);
                expr
            }
        }
    }

    // ========================================================================
    // Member access
    // ========================================================================

    fn analyse_member_access(
        &mut self,
        expr: ExprId,
        object: ExprId,
        name: Name,
    ) -> ExprId {
        let object = {
            let analysed = self.analyse(object, None);
            if let ExprKind::MemberAccess { object, .. } = &mut self.module.expr_mut(expr).kind {
                *object = analysed;
            }
            analysed
        };
        if !self.ok(object) {
            self.set_errored(expr);
            return expr;
        }
        let loc = self.module.loc(expr);

        // Accessing members of an imported module resolves in that
        // module's scope instead.
        if let ExprKind::NameRef {
            target: Some(target),
            ..
        } = self.module.expr(object).kind
        {
            if let ExprKind::ModuleRef { import } = self.module.expr(target).kind {
                let scope = self.module.imports[import].scope;
                let name_ref = self.module.new_expr(
                    ExprKind::NameRef {
                        name,
                        scope,
                        target: None,
                    },
                    loc,
                );
                return self.analyse(name_ref, None);
            }

            // The object may name a type; enumerators resolve to their
            // constants.
            if matches!(self.module.expr(target).kind, ExprKind::TypeDecl { .. }) {
                return self.analyse_type_member(expr, target, name);
            }
        }

        let stripped = self
            .module
            .strip_pointers_and_references(self.module.ty(object));

        // A union member read is a hard cast to the member's type.
        if let TypeKind::Union { members, .. } = self.module.type_kind(stripped) {
            let Some(member) = members.iter().find(|m| m.name == name) else {
                self.ctx.error(
                    loc,
                    format!(
                        "Union {} has no member named '{}'",
                        self.module.type_to_string(self.ctx, stripped),
                        self.ctx.str(name)
                    ),
                );
                self.set_errored(expr);
                return expr;
            };
            let member_ty = member.ty;
            let cast = self.module.new_expr_typed(
                ExprKind::Cast {
                    kind: CastKind::Hard,
                    operand: object,
                },
                loc,
                member_ty,
            );
            let lv = self.module.is_lvalue(object);
            self.module.set_lvalue(cast, lv);
            return cast;
        }

        // A sum member access keeps the sum as its type; the finalised
        // member index is what IR generation uses to emit the tag check.
        // Lvalue-to-rvalue conversion later narrows it to the member.
        if let TypeKind::Sum { members, .. } = self.module.type_kind(stripped) {
            let Some(index) = members.iter().position(|m| m.name == name) else {
                self.ctx.error(
                    loc,
                    format!(
                        "Sum type {} has no member named '{}'",
                        self.module.type_to_string(self.ctx, stripped),
                        self.ctx.str(name)
                    ),
                );
                self.set_errored(expr);
                return expr;
            };
            let layout = self.module.sum_struct(self.ctx, stripped);
            self.module.set_ty(expr, stripped);
            if let ExprKind::MemberAccess { member, strukt, .. } =
                &mut self.module.expr_mut(expr).kind
            {
                *member = index;
                *strukt = Some(layout);
            }
            self.module.set_lvalue(expr, true);
            return expr;
        }

        // Everything else must be a struct, or the struct a dynamic
        // array is represented by.
        let struct_ty = match self.module.type_kind(stripped) {
            TypeKind::Struct { .. } => stripped,
            TypeKind::DynamicArray { .. } => self.module.dynamic_array_struct(self.ctx, stripped),
            _ => {
                let obj_loc = self.module.loc(object);
                self.ctx.error(
                    obj_loc,
                    format!(
                        "LHS of member access must be a struct, but was {}",
                        self.module
                            .type_to_string(self.ctx, self.module.ty(object))
                    ),
                );
                self.set_errored(expr);
                return expr;
            }
        };

        let members = match self.module.type_kind(struct_ty) {
            TypeKind::Struct { members, .. } => members,
            _ => unreachable!(),
        };
        let Some(index) = members.iter().position(|m| m.name == name) else {
            self.ctx.error(
                loc,
                format!(
                    "Struct {} has no member named '{}'",
                    self.module.type_to_string(self.ctx, struct_ty),
                    self.ctx.str(name)
                ),
            );
            self.set_errored(expr);
            return expr;
        };
        let member_ty = match self.module.type_kind(struct_ty) {
            TypeKind::Struct { members, .. } => members[index].ty,
            _ => unreachable!(),
        };

        // Pointers dereference until the object is an lvalue struct;
        // the access is an lvalue iff the struct is.
        let (object, lv) = self.implicit_dereference(object);
        if let ExprKind::MemberAccess {
            object: o,
            member,
            strukt,
            ..
        } = &mut self.module.expr_mut(expr).kind
        {
            *o = object;
            *member = index;
            *strukt = Some(struct_ty);
        }
        self.module.set_lvalue(expr, lv);
        self.module.set_ty(expr, member_ty);
        expr
    }

    fn analyse_type_member(
        &mut self,
        expr: ExprId,
        type_decl: ExprId,
        name: Name,
    ) -> ExprId {
        let loc = self.module.loc(expr);
        let decl_ty = self.module.ty(type_decl);

        if let TypeKind::Enum { enumerators, .. } = self.module.type_kind(decl_ty) {
            let enumerators = enumerators.clone();
            let found = enumerators.iter().copied().find(|&e| {
                self.module.expr(e).decl_name() == Some(name)
            });
            let Some(enumerator) = found else {
                self.ctx.error(
                    loc,
                    format!(
                        "Type {} has no enumerator named '{}'",
                        self.module.type_to_string(self.ctx, decl_ty),
                        self.ctx.str(name)
                    ),
                );
                self.set_errored(expr);
                return expr;
            };
            if self.errored(enumerator) {
                self.set_errored(expr);
                return expr;
            }
            if !self.ok(enumerator) {
                self.ctx.error(
                    loc,
                    format!(
                        "Enumerator {} cannot be used before it is defined",
                        self.ctx.str(name)
                    ),
                );
                self.set_errored(expr);
                return expr;
            }

            let value = self.enumerator_value(enumerator);
            let ty = self.module.ty(enumerator);
            self.module.set_ty(expr, ty);
            self.module.set_state(expr, SemaState::Done);
            return self.module.new_expr_typed(
                ExprKind::EvaluatedConstant {
                    expr: Some(expr),
                    value,
                },
                loc,
                ty,
            );
        }

        self.ctx.error(
            loc,
            format!(
                "Cannot access member '{}' of type {}",
                self.ctx.str(name),
                self.module.type_to_string(self.ctx, decl_ty)
            ),
        );
        self.set_errored(expr);
        expr
    }

    fn enumerator_value(&self, enumerator: ExprId) -> EvalResult {
        if let ExprKind::EnumeratorDecl {
            init: Some(init), ..
        } = self.module.expr(enumerator).kind
        {
            if let ExprKind::EvaluatedConstant { value, .. } = self.module.expr(init).kind {
                return value;
            }
        }
        EvalResult::int(0)
    }

    // ========================================================================
    // Unary and binary operators
    // ========================================================================

    fn analyse_unary(&mut self, expr: ExprId, op: UnaryOp, postfix: bool, operand: ExprId) {
        let operand = {
            let analysed = self.analyse(operand, None);
            if let ExprKind::Unary { operand, .. } = &mut self.module.expr_mut(expr).kind {
                *operand = analysed;
            }
            analysed
        };
        if !self.ok(operand) {
            self.set_errored(expr);
            return;
        }
        if postfix {
            diagnostic::ice("there are no postfix operators");
        }
        let loc = self.module.loc(expr);

        match op {
            UnaryOp::Addr => {
                if !self.module.is_lvalue(operand) {
                    self.ctx.error(loc, "Cannot take address of rvalue");
                    self.set_errored(expr);
                    return;
                }
                let ptr = self.module.pointer_to(self.module.ty(operand));
                self.module.set_ty(expr, ptr);
            }

            UnaryOp::Deref => {
                let operand = self.lvalue_to_rvalue(operand);
                let operand = self.store_unary_operand(expr, operand);
                let ty = self.module.ty(operand);
                if !self.module.is_pointer(ty) {
                    self.ctx.error(
                        loc,
                        format!(
                            "Cannot dereference non-pointer type {}",
                            self.module.type_to_string(self.ctx, ty)
                        ),
                    );
                    self.set_errored(expr);
                    return;
                }
                let elem = self.module.elem_type(ty).unwrap();
                self.module.set_ty(expr, elem);
                self.module.set_lvalue(expr, true);
            }

            UnaryOp::Neg => {
                // Negating a dynamic-array lvalue frees it.
                if self.module.is_dynamic_array(self.module.ty(operand)) {
                    self.module.set_ty(expr, TypeId::VOID);
                    let ExprKind::NameRef {
                        target: Some(target),
                        ..
                    } = self.module.expr(operand).kind
                    else {
                        self.ctx
                            .error(loc, "Only a named dynamic array can be freed");
                        self.set_errored(expr);
                        return;
                    };
                    // Referencing the binding again is a use-after-free,
                    // caught by name resolution.
                    self.module.set_state(target, SemaState::NoLongerViable);
                    if let Some(f) = self.curr_func {
                        self.remove_dangling(f, target);
                    }
                    return;
                }

                let operand = self.lvalue_to_rvalue(operand);
                let operand = self.store_unary_operand(expr, operand);
                let ty = self.module.ty(operand);
                if !self.module.is_integer(ty, false) {
                    self.ctx.error(
                        loc,
                        format!(
                            "Operand of unary prefix operator '-' must be an integer type, but was {}",
                            self.module.type_to_string(self.ctx, ty)
                        ),
                    );
                    self.set_errored(expr);
                    return;
                }
                self.module.set_ty(expr, ty);
            }

            UnaryOp::BitNot => {
                let operand = self.lvalue_to_rvalue(operand);
                let operand = self.store_unary_operand(expr, operand);
                let ty = self.module.ty(operand);
                if !self.module.is_integer(ty, false) {
                    self.ctx.error(
                        loc,
                        format!(
                            "Operand of operator '~' must be an integer type, but was {}",
                            self.module.type_to_string(self.ctx, ty)
                        ),
                    );
                    self.set_errored(expr);
                    return;
                }
                self.module.set_ty(expr, ty);
            }

            UnaryOp::Not => {
                let operand = self.lvalue_to_rvalue(operand);
                let operand = self.store_unary_operand(expr, operand);
                let ty = self.module.ty(operand);
                if !self.module.is_pointer(ty) && !self.module.is_integer(ty, true) {
                    self.ctx.error(
                        loc,
                        format!(
                            "Operand of operator '!' must be a bool, integer, or pointer type, but was {}",
                            self.module.type_to_string(self.ctx, ty)
                        ),
                    );
                    // The result type is bool regardless, so the node
                    // is not marked errored.
                }
                self.module.set_ty(expr, TypeId::BOOL);
            }

            UnaryOp::Has => {
                let operand_loc = self.module.loc(operand);
                if !matches!(
                    self.module.type_kind(self.module.ty(operand)),
                    TypeKind::Sum { .. }
                ) {
                    self.ctx
                        .error(operand_loc, "Operand of 'has' must be a sum type");
                    self.set_errored(expr);
                    return;
                }
                if !matches!(
                    self.module.expr(operand).kind,
                    ExprKind::MemberAccess { .. }
                ) {
                    self.ctx.error(
                        operand_loc,
                        "Operand of 'has' must be a member access to a sum type",
                    );
                    self.set_errored(expr);
                    return;
                }
                self.module.set_ty(expr, TypeId::BOOL);
            }
        }
    }

    fn store_unary_operand(&mut self, expr: ExprId, operand: ExprId) -> ExprId {
        if let ExprKind::Unary { operand: o, .. } = &mut self.module.expr_mut(expr).kind {
            *o = operand;
        }
        operand
    }

    fn analyse_binary(&mut self, expr: ExprId, op: BinaryOp, lhs: ExprId, rhs: ExprId) {
        let lhs = self.analyse(lhs, None);
        let rhs = self.analyse(rhs, None);
        self.store_binary_operands(expr, lhs, rhs);
        if !self.ok(lhs) || !self.ok(rhs) {
            self.set_errored(expr);
            return;
        }
        let loc = self.module.loc(expr);

        match op {
            BinaryOp::And | BinaryOp::Or => {
                let lhs = self.lvalue_to_rvalue(lhs);
                let rhs = self.lvalue_to_rvalue(rhs);
                self.store_binary_operands(expr, lhs, rhs);
                let lty = self.module.ty(lhs);
                let rty = self.module.ty(rhs);

                if !self.module.is_integer(lty, true) || !self.module.is_integer(rty, true) {
                    self.ctx.error(
                        loc,
                        format!(
                            "Cannot perform arithmetic on {} and {}",
                            self.module.type_to_string(self.ctx, lty),
                            self.module.type_to_string(self.ctx, rty)
                        ),
                    );
                    self.set_errored(expr);
                    return;
                }

                let (lhs, lok) = self.convert(lhs, TypeId::BOOL);
                let (rhs, rok) = self.convert(rhs, TypeId::BOOL);
                self.store_binary_operands(expr, lhs, rhs);
                if !lok || !rok {
                    let side = if !lok { "lhs" } else { "rhs" };
                    let bad = if !lok { lty } else { rty };
                    self.ctx.error(
                        loc,
                        format!(
                            "Binary logical operator {} on {} and {}: cannot convert {}, of type {}, to bool",
                            op.token(),
                            self.module.type_to_string(self.ctx, lty),
                            self.module.type_to_string(self.ctx, rty),
                            side,
                            self.module.type_to_string(self.ctx, bad)
                        ),
                    );
                    self.set_errored(expr);
                    return;
                }
                self.module.set_ty(expr, TypeId::BOOL);
            }

            BinaryOp::Subscript => {
                let (lhs, _) = self.implicit_de_reference(lhs);
                self.store_binary_operands(expr, lhs, rhs);
                let lty = self.module.ty(lhs);
                let is_ptr = self.module.is_pointer(lty);
                if !is_ptr && !self.module.is_array(lty) {
                    self.ctx.error(
                        loc,
                        format!(
                            "LHS of subscript must be a pointer or array, but was {}",
                            self.module.type_to_string(self.ctx, lty)
                        ),
                    );
                    self.set_errored(expr);
                    return;
                }

                // A pointer subscript stays a pointer; an array
                // subscript is a pointer to the element type.
                let result = if is_ptr {
                    lty
                } else {
                    let elem = match *self.module.type_kind(lty) {
                        TypeKind::Array { elem, .. } => elem,
                        _ => unreachable!(),
                    };
                    self.module.pointer_to(elem)
                };
                self.module.set_ty(expr, result);

                let rhs = self.lvalue_to_rvalue(rhs);
                let (rhs, ok) = self.convert(rhs, TypeId::INT);
                self.store_binary_operands(expr, lhs, rhs);
                if !ok {
                    let rloc = self.module.loc(rhs);
                    self.ctx.error(rloc, "RHS of subscript must be an integer");
                    return;
                }

                // Constant indices into fixed arrays are bounds-checked
                // and folded.
                if let Some(dim) = self.module.array_dimension(lty) {
                    if let Some(EvalResult::Int(v)) = eval::evaluate(self.ctx, self.module, rhs) {
                        if v.is_negative() || v.value() >= dim {
                            self.ctx.error(loc, "Array subscript out of bounds");
                        }
                        let rloc = self.module.loc(rhs);
                        let folded = self.module.new_expr_typed(
                            ExprKind::EvaluatedConstant {
                                expr: Some(rhs),
                                value: EvalResult::Int(v),
                            },
                            rloc,
                            self.module.ty(rhs),
                        );
                        self.module.set_state(folded, SemaState::Done);
                        self.store_binary_operands(expr, lhs, folded);
                    }
                }
            }

            BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Rem
            | BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Shl
            | BinaryOp::Shr
            | BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor => {
                let lhs = self.lvalue_to_rvalue(lhs);
                let rhs = self.lvalue_to_rvalue(rhs);
                self.store_binary_operands(expr, lhs, rhs);
                let lty = self.module.ty(lhs);
                let rty = self.module.ty(rhs);

                if !self.module.is_integer(lty, false) || !self.module.is_integer(rty, false) {
                    self.ctx.error(
                        loc,
                        format!(
                            "Cannot perform arithmetic on {} and {}",
                            self.module.type_to_string(self.ctx, lty),
                            self.module.type_to_string(self.ctx, rty)
                        ),
                    );
                    self.set_errored(expr);
                    return;
                }

                let (lhs, rhs, ok) = self.convert_to_common_type(lhs, rhs);
                self.store_binary_operands(expr, lhs, rhs);
                if !ok {
                    self.ctx.error(
                        loc,
                        format!(
                            "Cannot perform arithmetic on {} and {}",
                            self.module.type_to_string(self.ctx, lty),
                            self.module.type_to_string(self.ctx, rty)
                        ),
                    );
                    self.set_errored(expr);
                    return;
                }
                let ty = self.module.ty(lhs);
                self.module.set_ty(expr, ty);
            }

            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Gt
            | BinaryOp::Le
            | BinaryOp::Ge => {
                let lhs = self.lvalue_to_rvalue(lhs);
                let rhs = self.lvalue_to_rvalue(rhs);
                self.store_binary_operands(expr, lhs, rhs);
                let lty = self.module.ty(lhs);
                let rty = self.module.ty(rhs);

                if self.module.is_integer(lty, false) && self.module.is_integer(rty, false) {
                    let (lhs, rhs, ok) = self.convert_to_common_type(lhs, rhs);
                    self.store_binary_operands(expr, lhs, rhs);
                    if !ok {
                        self.ctx.error(
                            loc,
                            format!(
                                "Cannot compare {} and {}",
                                self.module.type_to_string(self.ctx, lty),
                                self.module.type_to_string(self.ctx, rty)
                            ),
                        );
                        self.set_errored(expr);
                        return;
                    }
                } else if self.module.is_bool(lty) && self.module.is_bool(rty) {
                    // Bool compares with bool.
                } else if self.module.is_pointer(lty) && self.module.is_pointer(rty) {
                    if !self.module.types_equal(lty, rty) {
                        self.ctx.error(
                            loc,
                            format!(
                                "Cannot compare unrelated pointer types {} and {}",
                                self.module.type_to_string(self.ctx, lty),
                                self.module.type_to_string(self.ctx, rty)
                            ),
                        );
                    }
                } else {
                    self.ctx.error(
                        loc,
                        format!(
                            "Cannot compare {} and {}",
                            self.module.type_to_string(self.ctx, lty),
                            self.module.type_to_string(self.ctx, rty)
                        ),
                    );
                }
                self.module.set_ty(expr, TypeId::BOOL);
            }

            BinaryOp::Assign => {
                let rhs = self.lvalue_to_rvalue(rhs);
                let (lhs, lhs_lv) = self.implicit_de_reference(lhs);
                self.store_binary_operands(expr, lhs, rhs);
                if !lhs_lv {
                    self.ctx.error(loc, "LHS of assignment must be an lvalue");
                    self.set_errored(expr);
                    return;
                }

                // The assignment's type is known once the LHS is an
                // lvalue, so conversion failures below do not mark the
                // node errored.
                let lty = self.module.ty(lhs);
                self.module.set_ty(expr, lty);
                self.module.set_lvalue(expr, true);

                let mut target_ty = lty;
                if let TypeKind::Sum { members, .. } = self.module.type_kind(lty) {
                    if let ExprKind::MemberAccess { member, .. } = self.module.expr(lhs).kind {
                        target_ty = members[member].ty;
                    } else {
                        let lhs_loc = self.module.loc(lhs);
                        self.ctx.error(
                            lhs_loc,
                            "Cannot assign to a sum type; access one of its members using `.`",
                        );
                        self.set_errored(expr);
                        return;
                    }
                }

                let (rhs, ok) = self.convert(rhs, target_ty);
                self.store_binary_operands(expr, lhs, rhs);
                if !ok {
                    let rloc = self.module.loc(rhs);
                    self.ctx.error(
                        rloc,
                        format!(
                            "Type of expression {} is not convertible to variable type {}",
                            self.module.type_to_string(self.ctx, self.module.ty(rhs)),
                            self.module.type_to_string(self.ctx, target_ty)
                        ),
                    );
                }
            }
        }
    }

    fn store_binary_operands(&mut self, expr: ExprId, lhs: ExprId, rhs: ExprId) {
        if let ExprKind::Binary { lhs: l, rhs: r, .. } = &mut self.module.expr_mut(expr).kind {
            *l = lhs;
            *r = rhs;
        }
    }

    // ========================================================================
    // Name resolution
    // ========================================================================

    fn analyse_name_ref(&mut self, expr: ExprId, name: Name, scope: ScopeId) {
        let symbols = self.module.find_recursive(scope, name);
        let loc = self.module.loc(expr);

        if symbols.is_empty() {
            // The name may refer to an imported module.
            let import = self.module.imports.iter().position(|i| i.name == name);
            if let Some(index) = import {
                let module_ref = self
                    .module
                    .new_expr(ExprKind::ModuleRef { import: index }, loc);
                self.module.set_state(module_ref, SemaState::Done);
                self.module.set_ty(module_ref, TypeId::VOID);
                if let ExprKind::NameRef { target, .. } = &mut self.module.expr_mut(expr).kind {
                    *target = Some(module_ref);
                }
                self.module.set_ty(expr, TypeId::VOID);
                return;
            }

            self.report_unknown_name(expr, name, scope, loc);
            return;
        }

        // Either exactly one non-function declaration, or one or more
        // functions.
        let first = symbols[0];
        if !matches!(self.module.expr(first).kind, ExprKind::FuncDecl { .. }) {
            let analysed = self.analyse(first, None);
            debug_assert_eq!(analysed, first, "declarations do not rewrite themselves");

            if self.module.state(first) == SemaState::NoLongerViable {
                self.ctx.error(
                    loc,
                    format!(
                        "Reference to a name, {}, that is no longer viable; probably a use-after-free thing",
                        self.ctx.str(name)
                    ),
                );
            }

            // A reference that resolves to a declaration still being
            // analysed can only come from that declaration's own
            // initialiser.
            if self.module.state(first) == SemaState::InProgress {
                self.ctx.error(
                    loc,
                    format!("Cannot use '{}' in its own initialiser", self.ctx.str(name)),
                );
                self.set_errored(expr);
                return;
            }

            let ty = self.module.ty(first);
            let lv = self.module.is_lvalue(first);
            if let ExprKind::NameRef { target, .. } = &mut self.module.expr_mut(expr).kind {
                *target = Some(first);
            }
            self.module.set_ty(expr, ty);
            self.module.set_lvalue(expr, lv);
            return;
        }

        if symbols.len() == 1 {
            let ty = self.module.ty(first);
            if let ExprKind::NameRef { target, .. } = &mut self.module.expr_mut(expr).kind {
                *target = Some(first);
            }
            self.module.set_ty(expr, ty);
            return;
        }

        // Multiple functions with this name form an overload set whose
        // type is resolved from context at the call site.
        let overload_set = self
            .module
            .new_expr(ExprKind::OverloadSet { overloads: symbols }, loc);
        let overload_set = self.analyse(overload_set, None);
        if self.errored(overload_set) {
            self.set_errored(expr);
        }
        if let ExprKind::NameRef { target, .. } = &mut self.module.expr_mut(expr).kind {
            *target = Some(overload_set);
        }
        self.module.set_ty(expr, TypeId::OVERLOAD_SET);
    }

    fn report_unknown_name(
        &mut self,
        expr: ExprId,
        name: Name,
        scope: ScopeId,
        loc: Location,
    ) {
        let typed = self.ctx.str(name);

        // Find the closest declaration to what was typed.
        let mut best: Option<(ExprId, usize)> = None;
        for decl in self.module.all_symbols_recursive(scope) {
            let Some(decl_name) = self.module.expr(decl).decl_name() else {
                continue;
            };
            let candidate = self.ctx.str(decl_name);
            let distance = osa_distance(typed.as_str(), candidate.as_str());
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((decl, distance));
            }
        }

        // Identifiers one transposition away from exactly one existing
        // declaration of the same length are treated as that
        // declaration. Short names are exempt: their maximum possible
        // distance is too close to the threshold.
        if let Some((decl, 1)) = best {
            let decl_name = self.module.expr(decl).decl_name().unwrap();
            let candidate = self.ctx.str(decl_name);
            if typed.len() > 2 && typed.len() == candidate.len() {
                self.ctx.warning(
                    loc,
                    format!(
                        "You typed '{}'; we are treating it as '{}' because it's so close",
                        typed, candidate
                    ),
                );
                let decl_loc = self.module.loc(decl);
                self.ctx.note(decl_loc, "Declared here");

                let ty = self.module.ty(decl);
                let lv = self.module.is_lvalue(decl);
                if let ExprKind::NameRef { target, .. } = &mut self.module.expr_mut(expr).kind {
                    *target = Some(decl);
                }
                self.module.set_ty(expr, ty);
                self.module.set_lvalue(expr, lv);
                return;
            }
        }

        self.ctx
            .error(loc, format!("Unknown symbol '{}'", typed));

        // A binding that exists only at the top level was probably
        // meant to be static.
        let top_level = self.module.find(self.module.top_level_scope(), name);
        if let Some(&decl) = top_level.first() {
            let decl_loc = self.module.loc(decl);
            self.ctx.note(
                decl_loc,
                "A declaration exists at the top-level. Did you mean to make it 'static'?",
            );
        }

        // Suggest the closest candidate unless it is a short name that
        // is not actually close.
        if let Some((decl, distance)) = best {
            let decl_name = self.module.expr(decl).decl_name().unwrap();
            let candidate = self.ctx.str(decl_name);
            let short = candidate.len() < 5;
            if !short || distance <= 1 {
                let decl_loc = self.module.loc(decl);
                self.ctx.note(
                    decl_loc,
                    format!("Maybe you meant '{}', defined here?", candidate),
                );
            }
        }

        self.set_errored(expr);
    }

    fn analyse_overload_set(&mut self, expr: ExprId, overloads: &[ExprId]) {
        // No two overloads may share a parameter-type sequence. All
        // signatures were analysed up front, so comparing types is
        // enough.
        for i in 0..overloads.len() {
            let pi = self.param_types(overloads[i]);
            for j in (i + 1)..overloads.len() {
                let pj = self.param_types(overloads[j]);
                if pi.len() != pj.len() {
                    continue;
                }
                let same = pi
                    .iter()
                    .zip(pj.iter())
                    .all(|(&a, &b)| self.module.types_equal(a, b));
                if same {
                    let loc = self.module.loc(overloads[i]);
                    self.ctx.error(
                        loc,
                        "Overload set contains two overloads with the same parameter types",
                    );
                    let other = self.module.loc(overloads[j]);
                    self.ctx.note(other, "Conflicting overload is here");
                    self.set_errored(expr);
                }
            }
        }
        self.module.set_ty(expr, TypeId::OVERLOAD_SET);
    }

    fn param_types(&self, func: ExprId) -> Vec<TypeId> {
        match self.module.type_kind(self.module.ty(func)) {
            TypeKind::Function { params, .. } => params.iter().map(|p| p.ty).collect(),
            _ => Vec::new(),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn analyse_and_discard(&mut self, expr: ExprId) -> ExprId {
        let expr = self.analyse(expr, None);
        if !self.ok(expr) {
            return expr;
        }
        self.discard(expr)
    }

    /// Check an expression in discarded position.
    fn discard(&mut self, expr: ExprId) -> ExprId {
        if !self.ok(expr) || self.module.is_void(self.module.ty(expr)) {
            return expr;
        }

        // Discarding a call's result requires the callee to allow it.
        if let ExprKind::Call { callee, .. } = self.module.expr(expr).kind {
            let callee_ty = self.module.ty(callee);
            if let TypeKind::Function { attrs, .. } = self.module.type_kind(callee_ty) {
                if !attrs.has(FuncAttrs::DISCARDABLE) {
                    let loc = self.module.loc(expr);
                    self.ctx.error(
                        loc,
                        "Discarding return value of function not marked as 'discardable'",
                    );
                }
            }
        }

        // Deproceduring applies exactly once in discarded position;
        // explicit `()` covers anything beyond that.
        if self.can_deprocedure(expr) {
            return self.deprocedure(expr);
        }

        if !self.has_side_effects(expr) {
            let loc = self.module.loc(expr);
            self.ctx.warning(loc, "Expression result unused");
        }
        expr
    }

    pub(crate) fn has_side_effects(&self, expr: ExprId) -> bool {
        match &self.module.expr(expr).kind {
            ExprKind::While { .. }
            | ExprKind::For { .. }
            | ExprKind::Return { .. }
            | ExprKind::TypeDecl { .. }
            | ExprKind::TypeAliasDecl { .. }
            | ExprKind::VarDecl { .. }
            | ExprKind::FuncDecl { .. }
            | ExprKind::EnumeratorDecl { .. } => true,

            ExprKind::IntLit(_)
            | ExprKind::StrLit(_)
            | ExprKind::OverloadSet { .. }
            | ExprKind::NameRef { .. }
            | ExprKind::ModuleRef { .. }
            | ExprKind::TypeExpr
            | ExprKind::Sizeof { .. }
            | ExprKind::Alignof { .. } => false,

            ExprKind::Cast { operand, .. } | ExprKind::Unary { operand, .. } => {
                self.has_side_effects(*operand)
            }
            ExprKind::MemberAccess { object, .. } => self.has_side_effects(*object),
            ExprKind::CompoundLit { values } => {
                values.iter().any(|&v| self.has_side_effects(v))
            }
            ExprKind::Block { children } => children.iter().any(|&c| self.has_side_effects(c)),
            ExprKind::EvaluatedConstant { expr, .. } => {
                expr.is_some_and(|e| self.has_side_effects(e))
            }

            ExprKind::Binary { op, lhs, rhs } => {
                self.has_side_effects(*lhs)
                    || self.has_side_effects(*rhs)
                    || *op == BinaryOp::Assign
            }

            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                self.has_side_effects(*cond)
                    || self.has_side_effects(*then)
                    || otherwise.is_some_and(|e| self.has_side_effects(e))
            }

            ExprKind::Call { callee, args } => {
                if self.has_side_effects(*callee) {
                    return true;
                }
                if args.iter().any(|&a| self.has_side_effects(a)) {
                    return true;
                }
                let callee_ty = self
                    .module
                    .strip_pointers_and_references(self.module.ty(*callee));
                match self.module.type_kind(callee_ty) {
                    TypeKind::Function { attrs, .. } => {
                        !attrs.has(FuncAttrs::PURE) && !attrs.has(FuncAttrs::CONST)
                    }
                    _ => false,
                }
            }

            ExprKind::IntrinsicCall { intrinsic, args } => match intrinsic {
                IntrinsicKind::DebugTrap
                | IntrinsicKind::MemCopy
                | IntrinsicKind::MemSet
                | IntrinsicKind::Syscall => true,
                IntrinsicKind::Filename | IntrinsicKind::Line => false,
                IntrinsicKind::Inline => {
                    self.errored(expr)
                        || args.first().is_some_and(|&a| self.has_side_effects(a))
                }
            },
        }
    }

    /// Whether deproceduring applies: a zero-parameter function (or
    /// function pointer) value that is not a declaration or block.
    pub(crate) fn can_deprocedure(&self, expr: ExprId) -> bool {
        let ty = self.module.ty(expr);
        let fn_ty = if self.module.is_function(ty) {
            ty
        } else {
            match self.module.elem_type(ty) {
                Some(elem) if self.module.is_pointer(ty) && self.module.is_function(elem) => elem,
                _ => return false,
            }
        };

        let node = self.module.expr(expr);
        if node.is_decl() || matches!(node.kind, ExprKind::Block { .. }) {
            return false;
        }

        match self.module.type_kind(fn_ty) {
            TypeKind::Function { params, .. } => params.is_empty(),
            _ => false,
        }
    }

    pub(crate) fn deprocedure(&mut self, expr: ExprId) -> ExprId {
        debug_assert!(self.can_deprocedure(expr));
        let loc = self.module.loc(expr);
        let call = self.module.new_expr(
            ExprKind::Call {
                callee: expr,
                args: Vec::new(),
            },
            loc,
        );
        self.analyse(call, None)
    }

    /// Wrap `expr` in a cast to `ty` and analyse the wrapper.
    pub(crate) fn wrap_with_cast(&mut self, expr: ExprId, ty: TypeId, kind: CastKind) -> ExprId {
        let loc = self.module.loc(expr);
        let cast = self
            .module
            .new_expr_typed(ExprKind::Cast { kind, operand: expr }, loc, ty);
        self.analyse(cast, None)
    }

    pub(crate) fn lvalue_to_rvalue(&mut self, expr: ExprId) -> ExprId {
        self.lvalue_to_rvalue_impl(expr, true)
    }

    pub(crate) fn lvalue_to_rvalue_impl(&mut self, expr: ExprId, strip_ref: bool) -> ExprId {
        if self.errored(expr) {
            return expr;
        }

        // Reading a sum member is where the access narrows from the sum
        // type to the member's type: the finalised slot becomes the
        // underlying struct's data member, and the expression's type
        // becomes the member type the read produces.
        if let ExprKind::MemberAccess { member, .. } = self.module.expr(expr).kind {
            if let TypeKind::Sum { members, .. } = self.module.type_kind(self.module.ty(expr)) {
                let member_ty = members[member].ty;
                let sum_ty = self.module.ty(expr);
                let layout = self.module.sum_struct(self.ctx, sum_ty);
                if let ExprKind::MemberAccess { member, strukt, .. } =
                    &mut self.module.expr_mut(expr).kind
                {
                    *strukt = Some(layout);
                    *member = 1;
                }
                self.module.set_ty(expr, member_ty);
            }
        }

        let mut expr = expr;
        if self.module.is_lvalue(expr) {
            let ty = self.module.ty(expr);
            expr = self.wrap_with_cast(expr, ty, CastKind::LValueToRValue);
        }

        if strip_ref && self.module.is_reference(self.module.ty(expr)) {
            let elem = self.module.elem_type(self.module.ty(expr)).unwrap();
            expr = self.wrap_with_cast(expr, elem, CastKind::ReferenceToLValue);
            expr = self.lvalue_to_rvalue_impl(expr, true);
        }
        expr
    }

    /// Strip a reference (yielding an lvalue) without dereferencing
    /// pointers. Returns the expression and its lvalue-ness.
    fn implicit_de_reference(&mut self, expr: ExprId) -> (ExprId, bool) {
        let mut expr = expr;
        if self.module.is_reference(self.module.ty(expr)) {
            expr = self.lvalue_to_rvalue_impl(expr, false);
            let elem = self.module.elem_type(self.module.ty(expr)).unwrap();
            expr = self.wrap_with_cast(expr, elem, CastKind::ReferenceToLValue);
        }
        (expr, self.module.is_lvalue(expr))
    }

    /// Dereference references and pointers until the expression is an
    /// lvalue of the pointee type.
    fn implicit_dereference(&mut self, expr: ExprId) -> (ExprId, bool) {
        let (mut expr, _) = self.implicit_de_reference(expr);
        while self.module.is_pointer(self.module.ty(expr)) {
            let loc = self.module.loc(expr);
            let deref = self.module.new_expr(
                ExprKind::Unary {
                    op: UnaryOp::Deref,
                    postfix: false,
                    operand: expr,
                },
                loc,
            );
            expr = self.analyse(deref, None);
        }
        (expr, self.module.is_lvalue(expr))
    }

    /// Declared types of function type decay to function pointers.
    fn decl_type_decay(&mut self, ty: TypeId) -> TypeId {
        if self.module.is_function(ty) {
            self.module.pointer_to(ty)
        } else {
            ty
        }
    }

    fn remove_dangling(&mut self, func: ExprId, decl: ExprId) {
        if let ExprKind::FuncDecl {
            dangling_dynarrays, ..
        } = &mut self.module.expr_mut(func).kind
        {
            dangling_dynarrays.retain(|&d| d != decl);
        }
    }

    // ========================================================================
    // Types
    // ========================================================================

    /// Analyse a type node. Returns the node that replaced it (named
    /// types resolve to their declared type); the caller must store the
    /// returned id back into the parent slot.
    pub fn analyse_type(&mut self, ty: TypeId) -> TypeId {
        if self.module.type_state(ty) != SemaState::NotAnalysed {
            return ty;
        }
        self.module.types[ty].state = SemaState::InProgress;

        let result = self.analyse_type_kind(ty);

        if !self.module.type_state(result).analysed() {
            self.module.types[result].state = SemaState::Done;
        }
        result
    }

    fn set_type_errored(&mut self, ty: TypeId) {
        self.module.types[ty].state = SemaState::Errored;
    }

    fn analyse_type_kind(&mut self, ty: TypeId) -> TypeId {
        let loc = self.module.types[ty].loc;
        match self.module.types[ty].kind.clone() {
            // Builtins are done on creation; FFI types need nothing.
            TypeKind::Builtin(_) | TypeKind::Ffi(_) => ty,

            TypeKind::Named { name, scope } => self.resolve_named_type(ty, name, scope, loc),

            TypeKind::Pointer { elem } => {
                let elem = self.analyse_type(elem);
                if let TypeKind::Pointer { elem: slot } = &mut self.module.types[ty].kind {
                    *slot = elem;
                }
                if self.module.is_reference(elem) {
                    if self.module.type_ok(elem) {
                        self.ctx.error(
                            loc,
                            format!(
                                "Cannot create pointer to reference type {}",
                                self.module.type_to_string(self.ctx, elem)
                            ),
                        );
                    }
                    self.set_type_errored(ty);
                }
                ty
            }

            TypeKind::Reference { elem } => {
                let mut elem = self.analyse_type(elem);
                // References to references collapse.
                while let TypeKind::Reference { elem: inner } = self.module.types[elem].kind {
                    elem = inner;
                }
                if let TypeKind::Reference { elem: slot } = &mut self.module.types[ty].kind {
                    *slot = elem;
                }
                ty
            }

            TypeKind::Array { elem, size } => {
                let elem = self.analyse_type(elem);
                let elem = self.decl_type_decay(elem);
                if let TypeKind::Array { elem: slot, .. } = &mut self.module.types[ty].kind {
                    *slot = elem;
                }
                if self.module.is_reference(elem) {
                    if self.module.type_ok(elem) {
                        self.ctx.error(
                            loc,
                            format!(
                                "Cannot create array of reference type {}",
                                self.module.type_to_string(self.ctx, elem)
                            ),
                        );
                    }
                    self.set_type_errored(ty);
                }

                let size = self.analyse(size, None);
                if let TypeKind::Array { size: slot, .. } = &mut self.module.types[ty].kind {
                    *slot = size;
                }
                if self.ok(size) {
                    match eval::evaluate(self.ctx, self.module, size) {
                        Some(EvalResult::Int(v)) => {
                            if v.slt(1) {
                                self.ctx.error(loc, "Array size must be greater than 0");
                                self.set_type_errored(ty);
                            }
                            let size_loc = self.module.loc(size);
                            let folded = self.module.new_expr_typed(
                                ExprKind::EvaluatedConstant {
                                    expr: Some(size),
                                    value: EvalResult::Int(v),
                                },
                                size_loc,
                                TypeId::INT,
                            );
                            self.module.set_state(folded, SemaState::Done);
                            if let TypeKind::Array { size: slot, .. } =
                                &mut self.module.types[ty].kind
                            {
                                *slot = folded;
                            }
                        }
                        _ => {
                            self.ctx.error(
                                loc,
                                "Array with variable size should have been made a dynamic array by the parser",
                            );
                            self.set_type_errored(ty);
                        }
                    }
                }
                ty
            }

            TypeKind::DynamicArray { elem, initial_size, .. } => {
                let elem = self.analyse_type(elem);
                let elem = self.decl_type_decay(elem);
                if let TypeKind::DynamicArray { elem: slot, .. } = &mut self.module.types[ty].kind
                {
                    *slot = elem;
                }
                if self.module.is_reference(elem) {
                    if self.module.type_ok(elem) {
                        self.ctx.error(
                            loc,
                            format!(
                                "Cannot create dynamic array of reference type {}",
                                self.module.type_to_string(self.ctx, elem)
                            ),
                        );
                    }
                    self.set_type_errored(ty);
                }

                // IR generation wants the struct layout ready.
                let _ = self.module.dynamic_array_struct(self.ctx, ty);

                if let Some(size) = initial_size {
                    let size = self.analyse(size, None);
                    if let TypeKind::DynamicArray {
                        initial_size: slot, ..
                    } = &mut self.module.types[ty].kind
                    {
                        *slot = Some(size);
                    }
                }
                ty
            }

            TypeKind::Sum { members, .. } => {
                if members.len() < 2 {
                    self.ctx.error(
                        loc,
                        "A sum type must have more than one member (otherwise, use a struct, or something)",
                    );
                    self.set_type_errored(ty);
                    return ty;
                }

                let mut byte_size = 0usize;
                let mut alignment = 1usize;
                let members = self.analyse_members(ty, members, |sema, m| {
                    let msize = sema.module.type_size_bits(sema.ctx, m.ty) / 8;
                    let malign = sema.module.type_align_bits(sema.ctx, m.ty) / 8;
                    byte_size = byte_size.max(msize);
                    alignment = alignment.max(malign);
                });
                if let TypeKind::Sum {
                    members: slot,
                    byte_size: bs,
                    alignment: al,
                    ..
                } = &mut self.module.types[ty].kind
                {
                    *slot = members;
                    *bs = byte_size;
                    *al = alignment;
                }

                let _ = self.module.sum_struct(self.ctx, ty);
                ty
            }

            TypeKind::Union { members, .. } => {
                let mut byte_size = 0usize;
                let mut alignment = 1usize;
                let members = self.analyse_members(ty, members, |sema, m| {
                    let msize = sema.module.type_size_bits(sema.ctx, m.ty) / 8;
                    let malign = sema.module.type_align_bits(sema.ctx, m.ty) / 8;
                    byte_size = byte_size.max(msize);
                    alignment = alignment.max(malign);
                });
                if let TypeKind::Union {
                    members: slot,
                    byte_size: bs,
                    alignment: al,
                    ..
                } = &mut self.module.types[ty].kind
                {
                    *slot = members;
                    *bs = byte_size;
                    *al = alignment;
                }

                let _ = self.module.union_array(ty);
                ty
            }

            TypeKind::Struct { members, .. } => {
                let mut byte_size = 0usize;
                let mut alignment = 1usize;
                let mut offsets = Vec::with_capacity(members.len());
                let members = self.analyse_members(ty, members, |sema, m| {
                    let msize = sema.module.type_size_bits(sema.ctx, m.ty) / 8;
                    let malign = (sema.module.type_align_bits(sema.ctx, m.ty) / 8).max(1);
                    let offset = crate::types::align_to(byte_size, malign);
                    offsets.push(offset);
                    byte_size = offset + msize;
                    alignment = alignment.max(malign);
                });
                let mut members = members;
                for (m, off) in members.iter_mut().zip(offsets) {
                    m.byte_offset = off;
                }
                let final_size = if byte_size == 0 {
                    0
                } else {
                    crate::types::align_to(byte_size, alignment)
                };
                if let TypeKind::Struct {
                    members: slot,
                    byte_size: bs,
                    alignment: al,
                } = &mut self.module.types[ty].kind
                {
                    *slot = members;
                    *bs = final_size;
                    *al = alignment;
                }
                ty
            }

            TypeKind::Function { ret, params, attrs } => {
                let ret = self.analyse_type(ret);
                if let TypeKind::Function { ret: slot, .. } = &mut self.module.types[ty].kind {
                    *slot = ret;
                }

                let mut params = params;
                for p in &mut params {
                    let decayed = self.decl_type_decay(p.ty);
                    p.ty = self.analyse_type(decayed);
                }
                if let TypeKind::Function { params: slot, .. } = &mut self.module.types[ty].kind {
                    *slot = params;
                }

                if self.module.type_ok(ret) && self.module.is_void(ret) {
                    if attrs.has(FuncAttrs::DISCARDABLE) {
                        self.ctx
                            .error(loc, "Function returning void cannot be 'discardable'");
                    }
                }
                if attrs.has(FuncAttrs::NORETURN) {
                    if attrs.has(FuncAttrs::CONST) {
                        self.ctx.error(loc, "'noreturn' function cannot be 'const'");
                    }
                    if attrs.has(FuncAttrs::PURE) {
                        self.ctx.error(loc, "'noreturn' function cannot be 'pure'");
                    }
                }
                if attrs.has(FuncAttrs::INLINE) && attrs.has(FuncAttrs::NOINLINE) {
                    self.ctx
                        .error(loc, "Function cannot be both 'inline' and 'noinline'");
                }
                ty
            }

            TypeKind::Integer { bit_width, .. } => {
                if bit_width == 0 {
                    self.ctx.error(loc, "Bit width of integer type cannot be 0");
                    self.set_type_errored(ty);
                }
                ty
            }

            TypeKind::Enum {
                underlying,
                enumerators,
                scope,
            } => {
                self.analyse_enum(ty, underlying, enumerators, scope, loc);
                ty
            }
        }
    }

    /// Analyse and decay every member type, running `f` over the result
    /// for layout accumulation. Errored member types error the owner.
    fn analyse_members(
        &mut self,
        owner: TypeId,
        members: Vec<Member>,
        mut f: impl FnMut(&mut Self, &Member),
    ) -> Vec<Member> {
        let mut members = members;
        for m in &mut members {
            let analysed = self.analyse_type(m.ty);
            m.ty = self.decl_type_decay(analysed);
            if self.module.type_errored(m.ty) {
                self.set_type_errored(owner);
                continue;
            }
            f(self, m);
        }
        members
    }

    fn resolve_named_type(
        &mut self,
        ty: TypeId,
        name: Name,
        scope: ScopeId,
        loc: Location,
    ) -> TypeId {
        let mut current = Some(scope);
        while let Some(s) = current {
            let symbols = self.module.find(s, name);
            let Some(&decl) = symbols.first() else {
                current = self.module.scopes[s].parent;
                continue;
            };

            match self.module.expr(decl).kind {
                ExprKind::TypeDecl { .. } | ExprKind::TypeAliasDecl { .. } => {
                    self.analyse(decl, None);
                    let resolved = self.module.ty(decl);
                    self.module.types[ty].state = SemaState::Done;
                    return resolved;
                }
                _ => {
                    self.ctx.error(
                        loc,
                        format!("'{}' is not a type", self.ctx.str(name)),
                    );
                    let decl_loc = self.module.loc(decl);
                    self.ctx.note(decl_loc, "Because of declaration here");
                    self.set_type_errored(ty);
                    return ty;
                }
            }
        }

        self.ctx.error(
            loc,
            format!("'{}' does not name a type", self.ctx.str(name)),
        );
        self.set_type_errored(ty);
        ty
    }

    fn analyse_enum(
        &mut self,
        ty: TypeId,
        underlying: TypeId,
        enumerators: Vec<ExprId>,
        scope: ScopeId,
        loc: Location,
    ) {
        let underlying = self.analyse_type(underlying);
        if let TypeKind::Enum { underlying: slot, .. } = &mut self.module.types[ty].kind {
            *slot = underlying;
        }
        if !self.module.type_ok(underlying) {
            self.set_type_errored(ty);
            return;
        }
        if !self.module.is_integer(underlying, true) {
            self.ctx.error(
                loc,
                "Disallowed underlying type of enum; only integer or integer-like types are allowed",
            );
            self.set_type_errored(ty);
            return;
        }

        // Duplicate enumerator names.
        let mut seen = std::collections::HashSet::new();
        for &e in &enumerators {
            let name = self.module.expr(e).decl_name().unwrap();
            if !seen.insert(name) {
                let e_loc = self.module.loc(e);
                self.ctx.error(
                    e_loc,
                    format!("Duplicate enumerator '{}'", self.ctx.str(name)),
                );
                self.set_type_errored(ty);
                return;
            }
        }

        let mut next_value: i64 = -1;
        for &e in &enumerators {
            self.module.set_ty(e, ty);
            let name = self.module.expr(e).decl_name().unwrap();
            let e_loc = self.module.loc(e);

            let init = match self.module.expr(e).kind {
                ExprKind::EnumeratorDecl { init, .. } => init,
                _ => unreachable!("enum holds enumerator declarations"),
            };

            let Some(init) = init else {
                next_value += 1;
                let constant = self.module.new_expr_typed(
                    ExprKind::EvaluatedConstant {
                        expr: None,
                        value: EvalResult::Int(IntValue::from_i64(next_value)),
                    },
                    e_loc,
                    ty,
                );
                self.module.set_state(constant, SemaState::Done);
                if let ExprKind::EnumeratorDecl { init, .. } = &mut self.module.expr_mut(e).kind {
                    *init = Some(constant);
                }
                self.module.set_state(e, SemaState::Done);
                let _ = self.module.declare(scope, name, e);
                continue;
            };

            let init = {
                let analysed = self.analyse(init, None);
                if let ExprKind::EnumeratorDecl { init, .. } = &mut self.module.expr_mut(e).kind {
                    *init = Some(analysed);
                }
                analysed
            };
            if !self.ok(init) {
                let init_loc = self.module.loc(init);
                self.ctx.error(
                    init_loc,
                    format!(
                        "Invalid init expression for {} within enumerator declaration",
                        self.ctx.str(name)
                    ),
                );
                self.module.set_state(e, SemaState::Errored);
                self.set_type_errored(ty);
                return;
            }

            let (init, converted) = self.convert(init, underlying);
            if !converted {
                let init_loc = self.module.loc(init);
                self.ctx.error(
                    init_loc,
                    format!(
                        "Init expression for {} is not convertible to the enum's underlying type",
                        self.ctx.str(name)
                    ),
                );
                self.ctx.note(loc, "Defined here");
                self.module.set_state(e, SemaState::Errored);
                self.set_type_errored(ty);
                return;
            }

            let Some(EvalResult::Int(value)) = eval::evaluate(self.ctx, self.module, init) else {
                let init_loc = self.module.loc(init);
                self.ctx.error(
                    init_loc,
                    format!(
                        "Init expression for {} within enumerator is not a constant expression",
                        self.ctx.str(name)
                    ),
                );
                self.module.set_state(e, SemaState::Errored);
                self.set_type_errored(ty);
                return;
            };

            let constant = self.module.new_expr_typed(
                ExprKind::EvaluatedConstant {
                    expr: Some(init),
                    value: EvalResult::Int(value),
                },
                e_loc,
                ty,
            );
            self.module.set_state(constant, SemaState::Done);
            if let ExprKind::EnumeratorDecl { init, .. } = &mut self.module.expr_mut(e).kind {
                *init = Some(constant);
            }
            self.module.set_state(e, SemaState::Done);
            next_value = value.as_i64();

            let _ = self.module.declare(scope, name, e);
        }
    }
}

/// Optimal string alignment distance: Damerau-Levenshtein restricted to
/// single transpositions of adjacent characters.
pub fn osa_distance(s: &str, t: &str) -> usize {
    let s: Vec<char> = s.chars().collect();
    let t: Vec<char> = t.chars().collect();
    let (m, n) = (s.len(), t.len());
    let stride = n + 1;
    let mut d = vec![0usize; (m + 1) * stride];

    for i in 0..=m {
        d[i * stride] = i;
    }
    for j in 0..=n {
        d[j] = j;
    }

    for i in 1..=m {
        for j in 1..=n {
            let cost = usize::from(s[i - 1] != t[j - 1]);
            let mut best = (d[(i - 1) * stride + j] + 1)
                .min(d[i * stride + j - 1] + 1)
                .min(d[(i - 1) * stride + j - 1] + cost);
            if i > 1 && j > 1 && s[i - 1] == t[j - 2] && s[i - 2] == t[j - 1] {
                best = best.min(d[(i - 2) * stride + j - 2] + 1);
            }
            d[i * stride + j] = best;
        }
    }
    d[m * stride + n]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::diagnostic::Severity;

    #[test]
    fn test_osa_distance_basics() {
        assert_eq!(osa_distance("abc", "abc"), 0);
        assert_eq!(osa_distance("abc", "abd"), 1);
        assert_eq!(osa_distance("abc", "ab"), 1);
        assert_eq!(osa_distance("", "abc"), 3);
        // Transpositions count once.
        assert_eq!(osa_distance("fob", "foo"), 1);
        assert_eq!(osa_distance("acbd", "abcd"), 1);
        // The classic OSA case: no edits inside a transposed pair.
        assert_eq!(osa_distance("ca", "abc"), 3);
    }

    fn compile(source: &str) -> (Compiler, Module) {
        let mut compiler = Compiler::new();
        let module = compiler.compile_source("test.g", source);
        (compiler, module)
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

    fn diagnostic_messages(compiler: &Compiler) -> Vec<(Severity, String)> {
        compiler.context().with_diagnostics(|d| {
            d.iter().map(|d| (d.severity, d.message.clone())).collect()
        })
    }

    // ------------------------------------------------------------------------
    // Name resolution
    // ------------------------------------------------------------------------

    #[test]
    fn test_typo_auto_correct_resolves_and_warns() {
        let (compiler, module) = compile("foo : int 3; fob;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());

        let messages = diagnostic_messages(&compiler);
        assert!(messages.iter().any(|(sev, msg)| {
            *sev == Severity::Warning && msg.contains("treating it as 'foo'")
        }));

        // The reference now targets the declaration of `foo`.
        let foo_decl = top_level_children(&module)[0];
        let fob = module
            .exprs
            .iter_enumerated()
            .find_map(|(id, e)| match &e.kind {
                ExprKind::NameRef { name, .. }
                    if compiler.context().str(*name).as_str() == "fob" =>
                {
                    Some(id)
                }
                _ => None,
            })
            .expect("the reference is still in the arena");
        let ExprKind::NameRef { target, .. } = module.expr(fob).kind else {
            unreachable!();
        };
        assert_eq!(target, Some(foo_decl));
        assert_eq!(module.ty(fob), TypeId::INT);
    }

    #[test]
    fn test_use_in_own_initialiser() {
        let (compiler, _) = compile("x : int = x;");
        assert!(compiler.has_errors());
        let messages = diagnostic_messages(&compiler);
        assert!(messages
            .iter()
            .any(|(_, msg)| msg.contains("Cannot use 'x' in its own initialiser")));
    }

    #[test]
    fn test_unknown_symbol_suggests_static_for_top_level() {
        let (compiler, _) = compile("t_var : int 5; f : int() { t_var };");
        assert!(compiler.has_errors());
        let has_note = compiler.context().with_diagnostics(|d| {
            d.iter().any(|diag| {
                diag.message.contains("Unknown symbol 't_var'")
                    && diag
                        .notes
                        .iter()
                        .any(|n| n.message.contains("Did you mean to make it 'static'?"))
            })
        });
        assert!(has_note, "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_static_declaration_visible_in_functions() {
        let (compiler, _) = compile("static g : int 5; f : int() { g };");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    // ------------------------------------------------------------------------
    // Dynamic arrays
    // ------------------------------------------------------------------------

    #[test]
    fn test_dynamic_array_leak_reported() {
        let (compiler, module) = compile("a :[int dynamic]; return 0;");
        assert!(compiler.has_errors());
        let messages = diagnostic_messages(&compiler);
        assert!(messages
            .iter()
            .any(|(_, msg)| msg == "You forgot to free this dynamic array"));

        // The diagnostic is anchored at the declaration of `a`.
        let a_decl = top_level_children(&module)[0];
        let a_loc = module.loc(a_decl);
        let anchored = compiler
            .context()
            .with_diagnostics(|d| d.iter().any(|diag| diag.loc == a_loc));
        assert!(anchored);
    }

    #[test]
    fn test_freed_dynamic_array_is_not_a_leak() {
        let (compiler, _) = compile("a :[int dynamic]; -a; return 0;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_returned_dynamic_array_is_not_a_leak() {
        let (compiler, _) =
            compile("f : [int dynamic]() { a :[int dynamic]; return a; };");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_dynamic_array_double_free() {
        let (compiler, _) = compile("a :[int dynamic]; -a; -a;");
        assert!(compiler.has_errors());
        let messages = diagnostic_messages(&compiler);
        let viability: Vec<_> = messages
            .iter()
            .filter(|(_, msg)| msg.contains("no longer viable"))
            .collect();
        assert_eq!(viability.len(), 1);
        // The leak report stays quiet once an error was issued.
        assert!(!messages
            .iter()
            .any(|(_, msg)| msg.contains("forgot to free")));
    }

    // ------------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------------

    #[test]
    fn test_integer_callee_becomes_multiplication() {
        let (compiler, module) = compile("x : int 2; y : int 3; 100 x y; 0;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());

        let product = top_level_children(&module)[2];
        let ExprKind::Binary {
            op: BinaryOp::Mul,
            rhs,
            ..
        } = module.expr(product).kind
        else {
            panic!("expected the call to be re-shaped into multiplication");
        };
        assert!(matches!(
            module.expr(rhs).kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
        assert_eq!(module.ty(product), TypeId::INT);
    }

    #[test]
    fn test_call_with_arguments_converts_them() {
        let (compiler, _) = compile("add : int(a : int, b : int) { a + b }; add 1 2;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_call_arity_mismatch() {
        let (compiler, _) = compile("one : int(a : int) { a }; one 1 2;");
        assert!(compiler.has_errors());
        let messages = diagnostic_messages(&compiler);
        assert!(messages
            .iter()
            .any(|(_, msg)| msg.contains("Expected 1 instead of 2")));
    }

    #[test]
    fn test_deproceduring_in_initialiser() {
        let (compiler, _) = compile("f : int() discardable { 42 }; x : int = f; x;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_discarding_non_discardable_call() {
        let (compiler, _) = compile("g : int() { 1 }; g(); 0;");
        assert!(compiler.has_errors());
        let messages = diagnostic_messages(&compiler);
        assert!(messages.iter().any(|(_, msg)| {
            msg.contains("Discarding return value of function not marked as 'discardable'")
        }));
    }

    #[test]
    fn test_discardable_call_is_fine() {
        let (compiler, _) = compile("g : int() discardable { 1 }; g(); 0;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_type_callee_is_a_cast() {
        let (compiler, module) = compile("n :: (:byte 7); n;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
        let n_decl = top_level_children(&module)[0];
        assert_eq!(module.ty(n_decl), TypeId::BYTE);
    }

    // ------------------------------------------------------------------------
    // Sum types and member access
    // ------------------------------------------------------------------------

    #[test]
    fn test_sum_member_access_keeps_sum_type() {
        let (compiler, module) =
            compile("foo : sum { x :int; y :uint; }; bar :foo; bar.x; 0;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());

        let access = top_level_children(&module)[2];
        let ExprKind::MemberAccess { member, strukt, .. } = module.expr(access).kind else {
            panic!("expected a member access");
        };
        assert_eq!(member, 0);
        // The expression's type stays the sum; the cached {tag, data}
        // layout is finalised in.
        assert!(matches!(
            module.type_kind(module.ty(access)),
            TypeKind::Sum { .. }
        ));
        let layout = strukt.expect("layout finalised");
        let TypeKind::Struct { members, .. } = module.type_kind(layout) else {
            panic!("expected the struct layout");
        };
        assert_eq!(compiler.context().str(members[0].name).as_str(), "tag");
        assert_eq!(compiler.context().str(members[1].name).as_str(), "data");
    }

    #[test]
    fn test_sum_member_assignment_targets_member_type() {
        let (compiler, _) =
            compile("foo : sum { x :int; y :uint; }; bar :foo; bar.x := 69; 0;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_assigning_whole_sum_is_an_error() {
        let (compiler, _) =
            compile("foo : sum { x :int; y :uint; }; bar :foo; baz :foo; bar := baz; 0;");
        assert!(compiler.has_errors());
        let messages = diagnostic_messages(&compiler);
        assert!(messages
            .iter()
            .any(|(_, msg)| msg.contains("Cannot assign to a sum type")));
    }

    #[test]
    fn test_has_on_sum_member() {
        let (compiler, _) =
            compile("foo : sum { x :int; y :uint; }; bar :foo; b : bool = has bar.x;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_struct_member_access() {
        let (compiler, module) =
            compile("pair : struct { a :int; b :byte; }; p :pair; x : int = p.a;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());

        // Offsets come out of struct layout.
        let p_decl = top_level_children(&module)[1];
        let TypeKind::Struct {
            members, byte_size, ..
        } = module.type_kind(module.ty(p_decl))
        else {
            panic!("expected a struct type");
        };
        assert_eq!(members[0].byte_offset, 0);
        assert_eq!(members[1].byte_offset, 8);
        assert_eq!(*byte_size, 16);
    }

    #[test]
    fn test_dynamic_array_member_access_uses_cached_struct() {
        let (compiler, _) = compile("a :[int dynamic]; n : int = a.size; -a; n;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_enum_member_is_a_constant() {
        let (compiler, module) =
            compile("colour : enum { red; green; blue; }; g :colour = colour.green;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());

        let g_decl = top_level_children(&module)[1];
        let ExprKind::VarDecl { init: Some(init), .. } = module.expr(g_decl).kind else {
            panic!("expected an initialised declaration");
        };
        let ExprKind::EvaluatedConstant {
            value: EvalResult::Int(v),
            ..
        } = module.expr(init).kind
        else {
            panic!("expected the enumerator's folded constant, got {:?}", module.expr(init).kind);
        };
        assert_eq!(v.value(), 1);
    }

    #[test]
    fn test_enum_explicit_values_continue_counting() {
        let (compiler, module) =
            compile("e : enum { a; b := 10; c; }; x :e = e.c;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
        let x_decl = top_level_children(&module)[1];
        let ExprKind::VarDecl { init: Some(init), .. } = module.expr(x_decl).kind else {
            panic!();
        };
        let ExprKind::EvaluatedConstant {
            value: EvalResult::Int(v),
            ..
        } = module.expr(init).kind
        else {
            panic!();
        };
        assert_eq!(v.value(), 11);
    }

    #[test]
    fn test_duplicate_enumerator() {
        let (compiler, _) = compile("e : enum { a; a; }; 0;");
        assert!(compiler.has_errors());
        let messages = diagnostic_messages(&compiler);
        assert!(messages
            .iter()
            .any(|(_, msg)| msg.contains("Duplicate enumerator 'a'")));
    }

    // ------------------------------------------------------------------------
    // Conversion algebra
    // ------------------------------------------------------------------------

    fn sema_fixture(source: &str) -> (Compiler, Module) {
        let mut compiler = Compiler::new();
        let module = compiler.compile_source("fixture.g", source);
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
        (compiler, module)
    }

    #[test]
    fn test_convert_to_own_type_is_noop() {
        let (compiler, mut module) = sema_fixture("0;");
        let mut sema = Sema {
            ctx: compiler.context(),
            module: &mut module,
            curr_func: None,
        };
        let lit = sema.module.new_expr(ExprKind::IntLit(7), Location::default());
        let lit = sema.analyse(lit, None);
        assert_eq!(sema.try_convert(lit, TypeId::INT), convert::NO_OP);
        let (converted, ok) = sema.convert(lit, TypeId::INT);
        assert!(ok);
        assert_eq!(converted, lit);
    }

    #[test]
    fn test_convert_to_void_always_succeeds() {
        let (compiler, mut module) = sema_fixture("0;");
        let mut sema = Sema {
            ctx: compiler.context(),
            module: &mut module,
            curr_func: None,
        };
        let lit = sema.module.new_expr(ExprKind::IntLit(1), Location::default());
        let lit = sema.analyse(lit, None);
        assert_eq!(sema.try_convert(lit, TypeId::VOID), convert::NO_OP);
    }

    #[test]
    fn test_converting_lvalue_to_its_own_type_yields_one_cast() {
        // Equal types are a no-op for the engine itself; the single
        // lvalue-to-rvalue cast is inserted by the conversion site.
        let (_compiler, module) = sema_fixture("x : int 1; y : int = x; y;");
        let y_decl = top_level_children(&module)[1];
        let ExprKind::VarDecl { init: Some(init), .. } = module.expr(y_decl).kind else {
            panic!("expected an initialised declaration");
        };
        let ExprKind::Cast { kind, operand } = module.expr(init).kind else {
            panic!("expected a cast wrapper, got {:?}", module.expr(init).kind);
        };
        assert_eq!(kind, CastKind::LValueToRValue);
        // Exactly one: the wrapped operand is the bare reference.
        assert!(matches!(
            module.expr(operand).kind,
            ExprKind::NameRef { .. }
        ));
        assert!(!module.is_lvalue(init));
    }

    #[test]
    fn test_reference_binding_preserves_lvalue() {
        let (compiler, mut module) = sema_fixture("x : int 1; x;");
        let x_name = compiler.context().intern("x");
        let scope = module.top_level_scope();
        let name_ref = module.new_expr(
            ExprKind::NameRef {
                name: x_name,
                scope,
                target: None,
            },
            Location::default(),
        );
        let ref_ty = module.reference_to(TypeId::INT);
        let mut sema = Sema {
            ctx: compiler.context(),
            module: &mut module,
            curr_func: None,
        };
        let name_ref = sema.analyse(name_ref, None);
        assert!(sema.module.is_lvalue(name_ref));

        let (bound, ok) = sema.convert(name_ref, ref_ty);
        assert!(ok);
        let ExprKind::Cast { kind, .. } = sema.module.expr(bound).kind else {
            panic!("expected a reference-binding cast");
        };
        assert_eq!(kind, CastKind::LValueToReference);
        assert!(sema.module.types_equal(sema.module.ty(bound), ref_ty));
    }

    #[test]
    fn test_try_convert_agrees_with_convert() {
        let (compiler, mut module) = sema_fixture("0;");
        let mut sema = Sema {
            ctx: compiler.context(),
            module: &mut module,
            curr_func: None,
        };
        let lit = sema.module.new_expr(ExprKind::IntLit(100), Location::default());
        let lit = sema.analyse(lit, None);

        let score = sema.try_convert(lit, TypeId::BYTE);
        assert!(score >= 0);
        let (converted, ok) = sema.convert(lit, TypeId::BYTE);
        assert!(ok);
        assert_eq!(sema.module.ty(converted), TypeId::BYTE);
        // In-range constants fold to an evaluated constant.
        assert!(matches!(
            sema.module.expr(converted).kind,
            ExprKind::EvaluatedConstant { .. }
        ));
    }

    #[test]
    fn test_narrowing_without_constant_is_impossible() {
        let (compiler, mut module) = sema_fixture("x : int 1; x;");
        let x_name = compiler.context().intern("x");
        let scope = module.top_level_scope();
        let name_ref = module.new_expr(
            ExprKind::NameRef {
                name: x_name,
                scope,
                target: None,
            },
            Location::default(),
        );
        let mut sema = Sema {
            ctx: compiler.context(),
            module: &mut module,
            curr_func: None,
        };
        let name_ref = sema.analyse(name_ref, None);
        assert!(sema.try_convert(name_ref, TypeId::BYTE) < 0);
    }

    #[test]
    fn test_negative_constant_to_unsigned_is_impossible() {
        let (compiler, _) = compile("u : uint = 0 - 1;");
        // `0 - 1` folds to a negative constant, which cannot convert to
        // an unsigned type.
        assert!(compiler.has_errors());
    }

    // ------------------------------------------------------------------------
    // Casts
    // ------------------------------------------------------------------------

    #[test]
    fn test_soft_cast_between_integers() {
        let (compiler, _) = compile("x : int 300; b : byte = x as byte; b;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_pointer_to_integer_cast() {
        let (compiler, _) = compile("x : int 1; p : int.ptr = &x; n : int = p as int; n;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_integer_to_enum_requires_hard_cast() {
        let (compiler, _) = compile("e : enum { a; b; }; v :e = 1 as e;");
        assert!(compiler.has_errors());
        let messages = diagnostic_messages(&compiler);
        assert!(messages
            .iter()
            .any(|(_, msg)| msg.contains("use 'as!' instead")));

        let (compiler, _) = compile("e : enum { a; b; }; v :e = 1 as! e;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_integer_to_pointer_requires_hard_cast() {
        let (compiler, _) = compile("p : int.ptr = 64 as int.ptr;");
        assert!(compiler.has_errors());

        let (compiler, _) = compile("p : int.ptr = 64 as! int.ptr;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    // ------------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------------

    #[test]
    fn test_if_with_common_type() {
        let (compiler, _) = compile("x : int 1; y : int = if x 2 else 3; y;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_if_without_else_is_void() {
        let (compiler, module) = compile("x : int 1; if x { x := 2; }; 0;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
        let if_expr = top_level_children(&module)[1];
        assert!(module.is_void(module.ty(if_expr)));
    }

    #[test]
    fn test_while_condition_converts_to_bool() {
        let (compiler, _) =
            compile("x : int 0; while x < 10 { x := x + 1; }; x;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_bad_loop_condition() {
        let (compiler, _) = compile("s : struct { a :int; }; v :s; while v { 0; }; 0;");
        assert!(compiler.has_errors());
        let messages = diagnostic_messages(&compiler);
        assert!(messages
            .iter()
            .any(|(_, msg)| msg.contains("Invalid type for loop condition")));
    }

    #[test]
    fn test_main_synthesises_return_zero() {
        let (compiler, module) = compile("");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
        let children = top_level_children(&module);
        assert_eq!(children.len(), 1);
        let ExprKind::Return { value: Some(value) } = module.expr(children[0]).kind else {
            panic!("expected a synthesised return");
        };
        assert_eq!(module.ty(value), TypeId::INT);
    }

    #[test]
    fn test_last_expression_becomes_return() {
        let (compiler, module) = compile("x : int 1; x + 1;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
        let children = top_level_children(&module);
        assert!(matches!(
            module.expr(*children.last().unwrap()).kind,
            ExprKind::Return { .. }
        ));
    }

    #[test]
    fn test_void_function_padded_with_return() {
        let (compiler, module) = compile("v : void() { 1; };");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
        let v = module.functions[1];
        let ExprKind::FuncDecl { body: Some(body), .. } = module.expr(v).kind else {
            panic!();
        };
        let ExprKind::Block { children } = &module.expr(body).kind else {
            panic!();
        };
        assert!(matches!(
            module.expr(*children.last().unwrap()).kind,
            ExprKind::Return { value: None }
        ));
    }

    #[test]
    fn test_non_void_function_with_empty_body_errors() {
        let (compiler, _) = compile("f : int() { };");
        assert!(compiler.has_errors());
        let messages = diagnostic_messages(&compiler);
        assert!(messages
            .iter()
            .any(|(_, msg)| msg.contains("must return a value")));
    }

    // ------------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------------

    #[test]
    fn test_subscript_bounds_check() {
        let (compiler, _) = compile("arr : [int 3]; arr[5]; 0;");
        assert!(compiler.has_errors());
        let messages = diagnostic_messages(&compiler);
        assert!(messages
            .iter()
            .any(|(_, msg)| msg.contains("Array subscript out of bounds")));
    }

    #[test]
    fn test_subscript_in_bounds() {
        let (compiler, module) = compile("arr : [int 3]; p :: arr[1]; 0;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
        // An array subscript yields a pointer to the element.
        let p_decl = top_level_children(&module)[1];
        let TypeKind::Pointer { elem } = module.type_kind(module.ty(p_decl)) else {
            panic!("expected a pointer type");
        };
        assert_eq!(*elem, TypeId::INT);
    }

    #[test]
    fn test_address_of_rvalue_is_an_error() {
        let (compiler, _) = compile("p :: &(1 + 2); 0;");
        assert!(compiler.has_errors());
        let messages = diagnostic_messages(&compiler);
        assert!(messages
            .iter()
            .any(|(_, msg)| msg.contains("Cannot take address of rvalue")));
    }

    #[test]
    fn test_deref_round_trip() {
        let (compiler, _) = compile("x : int 1; p : int.ptr = &x; y : int = @p; y;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_logical_operators_yield_bool() {
        let (compiler, _) = compile("x : int 1; b : bool = x and true or false; b;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_comparing_unrelated_pointers() {
        let (compiler, _) =
            compile("x : int 1; b : byte 2; bp : byte.ptr = &b; xp : int.ptr = &x; xp = bp; 0;");
        assert!(compiler.has_errors());
        let messages = diagnostic_messages(&compiler);
        assert!(messages
            .iter()
            .any(|(_, msg)| msg.contains("Cannot compare unrelated pointer types")));
    }

    #[test]
    fn test_sizeof_folds_to_byte_count() {
        let (compiler, module) = compile("s : int = sizeof :int; s;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
        let s_decl = top_level_children(&module)[0];
        let ExprKind::VarDecl { init: Some(init), .. } = module.expr(s_decl).kind else {
            panic!();
        };
        assert!(matches!(module.expr(init).kind, ExprKind::IntLit(8)));
    }

    // ------------------------------------------------------------------------
    // Overload sets
    // ------------------------------------------------------------------------

    #[test]
    fn test_overload_set_with_distinct_signatures() {
        let (compiler, _) = compile(
            "f : int(a : int) { a }; f : int(a : int, b : int) { a }; g :: f; 0;",
        );
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_overload_set_duplicate_signature() {
        let (compiler, _) =
            compile("f : int(a : int) { a }; f : int(b : int) { b }; g :: f; 0;");
        assert!(compiler.has_errors());
        let messages = diagnostic_messages(&compiler);
        assert!(messages.iter().any(|(_, msg)| {
            msg.contains("Overload set contains two overloads with the same parameter types")
        }));
    }

    // ------------------------------------------------------------------------
    // Intrinsics
    // ------------------------------------------------------------------------

    #[test]
    fn test_builtin_line_folds_to_constant() {
        let (compiler, module) = compile("n : int = __builtin_line(); n;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
        let n_decl = top_level_children(&module)[0];
        let ExprKind::VarDecl { init: Some(init), .. } = module.expr(n_decl).kind else {
            panic!();
        };
        let ExprKind::EvaluatedConstant {
            value: EvalResult::Int(v),
            ..
        } = module.expr(init).kind
        else {
            panic!("expected a folded line number");
        };
        assert_eq!(v.value(), 1);
    }

    #[test]
    fn test_builtin_debugtrap_is_void() {
        let (compiler, module) = compile("__builtin_debugtrap(); 0;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
        let trap = top_level_children(&module)[0];
        assert!(matches!(
            module.expr(trap).kind,
            ExprKind::IntrinsicCall {
                intrinsic: IntrinsicKind::DebugTrap,
                ..
            }
        ));
        assert!(module.is_void(module.ty(trap)));
    }

    #[test]
    fn test_builtin_syscall_arity() {
        let (compiler, _) = compile("__builtin_syscall(); 0;");
        assert!(compiler.has_errors());
        let messages = diagnostic_messages(&compiler);
        assert!(messages
            .iter()
            .any(|(_, msg)| msg.contains("between 1 and 7 arguments")));
    }

    #[test]
    fn test_builtin_syscall_converts_arguments() {
        let (compiler, _) = compile("x : int 1; r : int = __builtin_syscall 60 x; r;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_builtin_memcpy_shape() {
        let (compiler, _) = compile(
            "a : int 1; b : int 2; __builtin_memcpy (&a) (&b) 8; 0;",
        );
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    // ------------------------------------------------------------------------
    // Imports
    // ------------------------------------------------------------------------

    #[test]
    fn test_missing_import_enumerates_paths_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = Context::default();
        ctx.add_include_directory(dir.path());
        let mut compiler = Compiler::with_context(ctx);
        let _ = compiler.compile_source("test.g", "import m;\n0;");

        assert!(compiler.has_errors());
        let found = compiler.context().with_diagnostics(|d| {
            d.iter().any(|diag| {
                diag.message.contains("Could not find imported module 'm'")
                    && diag.message.contains("m.gmeta")
                    && diag.message.contains("libm.a")
            })
        });
        assert!(found, "{}", compiler.render_diagnostics());
    }

    #[test]
    fn test_import_member_access_resolves() {
        // Build a library module and write its metadata blob.
        let mut lib_compiler = Compiler::new();
        let lib = lib_compiler.compile_source("lib.g", "export answer : int 42;");
        assert!(!lib_compiler.has_errors());
        let blob = metadata::serialise(lib_compiler.context(), &lib);

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.gmeta"), blob).unwrap();

        let mut ctx = Context::default();
        ctx.add_include_directory(dir.path());
        let mut compiler = Compiler::with_context(ctx);
        let _ = compiler.compile_source("test.g", "import lib;\nx : int = lib.answer; x;");
        assert!(!compiler.has_errors(), "{}", compiler.render_diagnostics());
    }

    // ------------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------------

    #[test]
    fn test_analysis_is_idempotent_per_node() {
        let (compiler, mut module) = sema_fixture("x : int 1; x;");
        let decl = top_level_children(&module)[0];
        let state = module.state(decl);
        assert_eq!(state, SemaState::Done);

        let mut sema = Sema {
            ctx: compiler.context(),
            module: &mut module,
            curr_func: None,
        };
        let again = sema.analyse(decl, None);
        assert_eq!(again, decl);
        assert_eq!(sema.module.state(decl), SemaState::Done);
        assert!(!compiler.has_errors());
    }

    #[test]
    fn test_all_top_level_nodes_reach_a_final_state() {
        let (_compiler, module) = compile(
            "x : int 1; s : struct { a :int; }; v :s; x + 1; if x { 0; }; x;",
        );
        for &child in &top_level_children(&module) {
            assert!(
                module.state(child).analysed(),
                "{:?} left in state {:?}",
                module.expr(child).kind,
                module.state(child)
            );
        }
    }

    #[test]
    fn test_typed_expressions_have_analysed_types() {
        let (_compiler, module) = compile("x : int 1; y : byte = x as byte; y;");
        for (id, expr) in module.exprs.iter_enumerated() {
            if expr.state == SemaState::Done && !module.is_unknown(expr.ty) {
                assert!(
                    module.type_state(expr.ty).analysed(),
                    "type of {id} is {:?}",
                    module.type_state(expr.ty)
                );
            }
        }
    }
}
