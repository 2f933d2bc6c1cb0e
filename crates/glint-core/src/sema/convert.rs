//! The implicit conversion engine.
//!
//! One ordered rule list drives both [`Sema::convert`] (which rewrites
//! the expression) and [`Sema::try_convert`] (which only scores). The
//! score is negative when conversion is impossible, zero for a no-op,
//! and positive when a conversion chain applies; overload resolution is
//! specified to rank candidates by this score.

use super::Sema;
use crate::ast::{CastKind, ExprKind, SemaState};
use crate::eval::{self, EvalResult};
use crate::index_vec::{ExprId, TypeId};
use crate::types::TypeKind;

pub const TYPES_CONTAIN_ERRORS: i32 = -2;
pub const CONVERSION_IMPOSSIBLE: i32 = -1;
pub const NO_OP: i32 = 0;

fn max_bit_value(bits: u32) -> u64 {
    debug_assert!(bits < 64);
    (1u64 << bits) - 1
}

impl Sema<'_> {
    /// Convert `expr` to `to`, inserting casts as needed. Returns the
    /// rewritten expression and whether the conversion succeeded.
    ///
    /// Already-errored expressions convert trivially so error recovery
    /// does not cascade.
    pub fn convert(&mut self, expr: ExprId, to: TypeId) -> (ExprId, bool) {
        if self.module.state(expr) == SemaState::Errored {
            return (expr, true);
        }
        let (score, expr) = self.convert_impl(expr, to, true);
        (expr, score >= 0)
    }

    /// Score a conversion without performing it.
    pub fn try_convert(&mut self, expr: ExprId, to: TypeId) -> i32 {
        self.convert_impl(expr, to, false).0
    }

    /// Convert, issuing an error diagnostic on failure.
    pub fn convert_or_error(&mut self, expr: ExprId, to: TypeId) -> ExprId {
        let (expr, ok) = self.convert(expr, to);
        if !ok {
            self.ctx.error(
                self.module.loc(expr),
                format!(
                    "Expression is not convertible to type {}",
                    self.module.type_to_string(self.ctx, to)
                ),
            );
        }
        expr
    }

    /// Convert two operands to a common type.
    ///
    /// An integer literal always converts into the type of the other
    /// side, favouring the left hand side when ambiguous.
    pub fn convert_to_common_type(&mut self, a: ExprId, b: ExprId) -> (ExprId, ExprId, bool) {
        let a_lit = matches!(self.module.expr(a).kind, ExprKind::IntLit(_));
        let b_lit = matches!(self.module.expr(b).kind, ExprKind::IntLit(_));
        if !(a_lit && b_lit) {
            if a_lit {
                let (a, ok) = self.convert(a, self.module.ty(b));
                return (a, b, ok);
            }
            if b_lit {
                let (b, ok) = self.convert(b, self.module.ty(a));
                return (a, b, ok);
            }
        }
        let (a, ok) = self.convert(a, self.module.ty(b));
        if ok {
            return (a, b, true);
        }
        let (b, ok) = self.convert(b, self.module.ty(a));
        (a, b, ok)
    }

    /// The ordered rule list. The expression may be rewritten as rules
    /// apply, so its type is re-read at every step.
    fn convert_impl(&mut self, expr: ExprId, to: TypeId, perform: bool) -> (i32, ExprId) {
        let mut expr = expr;

        if self.module.type_errored(self.module.ty(expr)) || self.module.type_errored(to) {
            return (TYPES_CONTAIN_ERRORS, expr);
        }

        // Any type converts to void.
        if self.module.is_void(to) {
            return (NO_OP, expr);
        }

        // Any type converts to itself.
        if self.module.types_equal(self.module.ty(expr), to) {
            return (NO_OP, expr);
        }

        // Binding a reference to an lvalue of exactly the referenced type.
        if let TypeKind::Reference { elem } = *self.module.type_kind(to) {
            if self.module.types_equal(self.module.ty(expr), elem) {
                if self.module.is_lvalue(expr) {
                    if perform {
                        expr = self.wrap_with_cast(expr, to, CastKind::LValueToReference);
                    }
                    return (NO_OP, expr);
                }
                return (CONVERSION_IMPOSSIBLE, expr);
            }
        }

        // Everything below requires lvalue-to-rvalue conversion.
        let mut score = i32::from(self.module.is_lvalue(expr));
        if perform {
            expr = self.lvalue_to_rvalue_impl(expr, false);
        }

        // Reference-to-reference conversions.
        if self.module.is_reference(self.module.ty(expr)) && self.module.is_reference(to) {
            if self.module.types_equal(self.module.ty(expr), to) {
                return (NO_OP, expr);
            }
            // A reference to an array converts to a reference to its
            // first element.
            let from_elem = self.module.elem_type(self.module.ty(expr)).unwrap();
            let to_elem = self.module.elem_type(to).unwrap();
            if let TypeKind::Array { elem, .. } = *self.module.type_kind(from_elem) {
                if self.module.types_equal(elem, to_elem) {
                    if perform {
                        expr = self.wrap_with_cast(expr, to, CastKind::Implicit);
                    }
                    return (1 + score, expr);
                }
            }
            return (CONVERSION_IMPOSSIBLE, expr);
        }

        // Strip a remaining reference from the source.
        if self.module.is_reference(self.module.ty(expr)) {
            score += 1;
            if perform {
                expr = self.lvalue_to_rvalue_impl(expr, true);
            }
        }

        // Function types convert to their function pointer type.
        if self.module.is_function(self.module.ty(expr)) && self.module.is_pointer(to) {
            let to_elem = self.module.elem_type(to).unwrap();
            if self.module.types_equal(to_elem, self.module.ty(expr)) {
                if perform {
                    expr = self.wrap_with_cast(expr, to, CastKind::Implicit);
                }
                return (NO_OP, expr);
            }
        }

        // Deproceduring: a zero-argument function used as a value
        // becomes a call to that function.
        if self.can_deprocedure(expr) {
            if perform {
                expr = self.deprocedure(expr);
            }
            return (1 + score, expr);
        }

        // Lvalue-to-rvalue conversion may be all that was needed.
        if self.module.types_equal(self.module.ty(expr), to) {
            return (NO_OP, expr);
        }

        // Pointer-to-pointer conversions.
        if self.module.is_pointer(self.module.ty(expr)) && self.module.is_pointer(to) {
            // A pointer to an array converts to a pointer to its first
            // element.
            let from_elem = self.module.elem_type(self.module.ty(expr)).unwrap();
            let to_elem = self.module.elem_type(to).unwrap();
            if let TypeKind::Array { elem, .. } = *self.module.type_kind(from_elem) {
                if self.module.types_equal(elem, to_elem) {
                    if perform {
                        expr = self.wrap_with_cast(expr, to, CastKind::Implicit);
                    }
                    return (1 + score, expr);
                }
            }

            // Any pointer converts to a void pointer.
            if self.module.types_equal(to, TypeId::VOID_PTR) {
                if perform {
                    expr = self.wrap_with_cast(expr, to, CastKind::Implicit);
                }
                return (1 + score, expr);
            }
        }

        // Array-to-array conversions.
        if self.module.is_array(self.module.ty(expr)) && self.module.is_array(to) {
            let from_dim = self.module.array_dimension(self.module.ty(expr)).unwrap_or(0);
            let to_dim = self.module.array_dimension(to).unwrap_or(0);
            // A larger array would not fit in a smaller one.
            if from_dim > to_dim {
                return (CONVERSION_IMPOSSIBLE, expr);
            }
            // Element compatibility is deliberately not checked here;
            // see the conversion notes in DESIGN.md before tightening.
            if perform {
                expr = self.wrap_with_cast(expr, to, CastKind::Implicit);
            }
            return (1 + score, expr);
        }

        // Integer-to-boolean and vice versa.
        let from_int = self.module.is_integer(self.module.ty(expr), false);
        if (from_int && self.module.is_bool(to))
            || (self.module.is_bool(self.module.ty(expr)) && self.module.is_integer(to, false))
        {
            if perform {
                expr = self.wrap_with_cast(expr, to, CastKind::Implicit);
            }
            return (1 + score, expr);
        }

        // Integer to integer.
        if from_int && self.module.is_integer(to, false) {
            // Always convertible when the value is known at compile time
            // and in range for the target type.
            if let Some(EvalResult::Int(value)) = eval::evaluate(self.ctx, self.module, expr) {
                if value.slt(0) && self.module.is_unsigned_integer(to) {
                    return (CONVERSION_IMPOSSIBLE, expr);
                }
                let bits = self.module.type_size_bits(self.ctx, to) as u32;
                if self.module.is_unsigned_integer(self.module.ty(expr))
                    && bits < 64
                    && value.value() > max_bit_value(bits)
                {
                    return (CONVERSION_IMPOSSIBLE, expr);
                }
                if perform {
                    expr = self.wrap_with_cast(expr, to, CastKind::Implicit);
                    let loc = self.module.loc(expr);
                    let constant = self.module.new_expr_typed(
                        ExprKind::EvaluatedConstant {
                            expr: Some(expr),
                            value: EvalResult::Int(value),
                        },
                        loc,
                        to,
                    );
                    self.module.set_state(constant, SemaState::Done);
                    expr = constant;
                }
                return (1 + score, expr);
            }

            // Otherwise widening is allowed and narrowing is not.
            if self.module.type_size_bits(self.ctx, self.module.ty(expr))
                <= self.module.type_size_bits(self.ctx, to)
            {
                if perform {
                    expr = self.wrap_with_cast(expr, to, CastKind::Implicit);
                }
                return (1 + score, expr);
            }
            return (CONVERSION_IMPOSSIBLE, expr);
        }

        // Try deproceduring one last time.
        if self.can_deprocedure(expr) {
            if perform {
                expr = self.deprocedure(expr);
            }
            return (1 + score, expr);
        }

        (CONVERSION_IMPOSSIBLE, expr)
    }
}
