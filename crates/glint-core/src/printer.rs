//! Rendering modules as indented trees.
//!
//! The printer is the one place the AST is walked generically; sema and
//! IR generation both dispatch on kinds directly.

use std::fmt::Write;

use crate::ast::{ExprKind, Module, SemaState};
use crate::context::Context;
use crate::index_vec::ExprId;

/// Render the module's functions and their bodies as a tree.
pub fn print_module(ctx: &Context, module: &Module) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "module {}", module.name);
    for import in &module.imports {
        let _ = writeln!(out, "import {}", ctx.str(import.name));
    }
    for &f in &module.functions {
        print_expr(ctx, module, f, 0, &mut out);
    }
    out
}

fn state_marker(state: SemaState) -> &'static str {
    match state {
        SemaState::NotAnalysed => " <raw>",
        SemaState::InProgress => " <in-progress>",
        SemaState::Done => "",
        SemaState::Errored => " <errored>",
        SemaState::NoLongerViable => " <no-longer-viable>",
    }
}

fn print_expr(ctx: &Context, module: &Module, expr: ExprId, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let node = module.expr(expr);
    let ty = module.type_to_string(ctx, node.ty);
    let lvalue = if node.lvalue { " lvalue" } else { "" };
    let state = state_marker(node.state);

    let label = match &node.kind {
        ExprKind::IntLit(v) => format!("IntLit {v}"),
        ExprKind::StrLit(i) => format!("StrLit {:?}", module.strings[*i]),
        ExprKind::CompoundLit { .. } => "CompoundLit".to_string(),
        ExprKind::If { .. } => "If".to_string(),
        ExprKind::While { .. } => "While".to_string(),
        ExprKind::For { .. } => "For".to_string(),
        ExprKind::Return { .. } => "Return".to_string(),
        ExprKind::Block { .. } => "Block".to_string(),
        ExprKind::Call { .. } => "Call".to_string(),
        ExprKind::IntrinsicCall { intrinsic, .. } => format!("IntrinsicCall {intrinsic:?}"),
        ExprKind::Cast { kind, .. } => format!("Cast {kind:?}"),
        ExprKind::Unary { op, .. } => format!("Unary {op:?}"),
        ExprKind::Binary { op, .. } => format!("Binary '{}'", op.token()),
        ExprKind::NameRef { name, target, .. } => {
            let resolved = if target.is_some() { "" } else { " unresolved" };
            format!("NameRef {}{}", ctx.str(*name), resolved)
        }
        ExprKind::TypeExpr => "TypeExpr".to_string(),
        ExprKind::MemberAccess { name, member, .. } => {
            format!("MemberAccess .{} [{}]", ctx.str(*name), member)
        }
        ExprKind::ModuleRef { import } => {
            format!("ModuleRef {}", ctx.str(module.imports[*import].name))
        }
        ExprKind::Sizeof { .. } => "Sizeof".to_string(),
        ExprKind::Alignof { .. } => "Alignof".to_string(),
        ExprKind::OverloadSet { overloads } => format!("OverloadSet ({})", overloads.len()),
        ExprKind::EvaluatedConstant { value, .. } => format!("Constant {value:?}"),
        ExprKind::VarDecl { name, linkage, .. } => {
            format!("VarDecl {} {linkage:?}", ctx.str(*name))
        }
        ExprKind::FuncDecl { name, linkage, .. } => {
            format!("FuncDecl {} {linkage:?}", ctx.str(*name))
        }
        ExprKind::TypeDecl { name } => format!("TypeDecl {}", ctx.str(*name)),
        ExprKind::TypeAliasDecl { name } => format!("TypeAliasDecl {}", ctx.str(*name)),
        ExprKind::EnumeratorDecl { name, .. } => format!("EnumeratorDecl {}", ctx.str(*name)),
    };

    let _ = writeln!(out, "{indent}{label} : {ty}{lvalue}{state}");

    for child in children(module, expr) {
        print_expr(ctx, module, child, depth + 1, out);
    }
}

fn children(module: &Module, expr: ExprId) -> Vec<ExprId> {
    match &module.expr(expr).kind {
        ExprKind::CompoundLit { values } => values.clone(),
        ExprKind::If {
            cond,
            then,
            otherwise,
        } => {
            let mut out = vec![*cond, *then];
            out.extend(*otherwise);
            out
        }
        ExprKind::While { cond, body } => vec![*cond, *body],
        ExprKind::For {
            init,
            cond,
            increment,
            body,
        } => vec![*init, *cond, *increment, *body],
        ExprKind::Return { value } => value.iter().copied().collect(),
        ExprKind::Block { children } => children.clone(),
        ExprKind::Call { callee, args } => {
            let mut out = vec![*callee];
            out.extend_from_slice(args);
            out
        }
        ExprKind::IntrinsicCall { args, .. } => args.clone(),
        ExprKind::Cast { operand, .. }
        | ExprKind::Unary { operand, .. }
        | ExprKind::Sizeof { operand }
        | ExprKind::Alignof { operand } => vec![*operand],
        ExprKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
        ExprKind::MemberAccess { object, .. } => vec![*object],
        ExprKind::VarDecl { init, .. } | ExprKind::EnumeratorDecl { init, .. } => {
            init.iter().copied().collect()
        }
        ExprKind::FuncDecl { body, .. } => body.iter().copied().collect(),
        _ => Vec::new(),
    }
}
