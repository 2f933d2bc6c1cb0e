//! Compile-time expression evaluation.
//!
//! Folds integer arithmetic, comparisons, casts and conditionals to an
//! [`EvalResult`]. Integer values are a 64-bit bag of bits with explicit
//! sign- and zero-extension; string literals fold to an interned string
//! reference. Anything else reports failure, which the caller either
//! surfaces as a diagnostic or treats as non-constant.

use serde::Serialize;

use crate::ast::{BinaryOp, CastKind, ExprKind, Module, UnaryOp};
use crate::context::Context;
use crate::index_vec::{ExprId, TypeId};

/// A 64-bit integer value whose signedness is decided by the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntValue(u64);

impl IntValue {
    pub fn new(bits: u64) -> Self {
        Self(bits)
    }

    pub fn from_i64(value: i64) -> Self {
        Self(value as u64)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    /// Signed comparison against a constant.
    pub fn slt(self, rhs: i64) -> bool {
        self.as_i64() < rhs
    }

    pub fn is_negative(self) -> bool {
        self.as_i64() < 0
    }

    /// Truncate to `bits` and sign-extend back to 64.
    pub fn sext(self, bits: u32) -> IntValue {
        if bits == 0 || bits >= 64 {
            return self;
        }
        let shift = 64 - bits;
        Self((((self.0 << shift) as i64) >> shift) as u64)
    }

    /// Truncate to `bits` and zero-extend back to 64.
    pub fn zext(self, bits: u32) -> IntValue {
        if bits == 0 || bits >= 64 {
            return self;
        }
        Self(self.0 & (u64::MAX >> (64 - bits)))
    }
}

/// The result of folding a constant expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EvalResult {
    Int(IntValue),
    /// Index into the module's string-literal table.
    String(usize),
}

impl EvalResult {
    pub fn int(bits: u64) -> Self {
        EvalResult::Int(IntValue::new(bits))
    }

    pub fn is_int(self) -> bool {
        matches!(self, EvalResult::Int(_))
    }

    pub fn as_int(self) -> Option<IntValue> {
        match self {
            EvalResult::Int(v) => Some(v),
            EvalResult::String(_) => None,
        }
    }
}

/// Fold `expr` to a constant, or report failure with `None`.
pub fn evaluate(ctx: &Context, module: &Module, expr: ExprId) -> Option<EvalResult> {
    match &module.expr(expr).kind {
        ExprKind::IntLit(v) => Some(EvalResult::int(*v)),
        ExprKind::StrLit(i) => Some(EvalResult::String(*i)),
        ExprKind::EvaluatedConstant { value, .. } => Some(*value),

        ExprKind::Cast { kind, operand } => {
            let value = evaluate(ctx, module, *operand)?;
            match kind {
                // Value-preserving casts fold through.
                CastKind::LValueToRValue
                | CastKind::LValueToReference
                | CastKind::ReferenceToLValue => Some(value),
                CastKind::Implicit | CastKind::Hard | CastKind::Soft => {
                    fold_cast(ctx, module, value, module.ty(expr), module.ty(*operand))
                }
            }
        }

        ExprKind::Unary {
            op,
            postfix: false,
            operand,
        } => {
            let EvalResult::Int(v) = evaluate(ctx, module, *operand)? else {
                return None;
            };
            match op {
                UnaryOp::Neg => Some(EvalResult::Int(IntValue::new(v.value().wrapping_neg()))),
                UnaryOp::BitNot => Some(EvalResult::Int(IntValue::new(!v.value()))),
                UnaryOp::Not => Some(EvalResult::int(u64::from(v.value() == 0))),
                _ => None,
            }
        }

        ExprKind::Binary { op, lhs, rhs } => {
            let EvalResult::Int(l) = evaluate(ctx, module, *lhs)? else {
                return None;
            };
            let EvalResult::Int(r) = evaluate(ctx, module, *rhs)? else {
                return None;
            };
            let unsigned = module.is_unsigned_integer(module.ty(*lhs));
            fold_binary(*op, l, r, unsigned)
        }

        ExprKind::If {
            cond,
            then,
            otherwise,
        } => {
            let EvalResult::Int(c) = evaluate(ctx, module, *cond)? else {
                return None;
            };
            if c.value() != 0 {
                evaluate(ctx, module, *then)
            } else {
                evaluate(ctx, module, (*otherwise)?)
            }
        }

        _ => None,
    }
}

fn fold_cast(
    ctx: &Context,
    module: &Module,
    value: EvalResult,
    to: TypeId,
    _from: TypeId,
) -> Option<EvalResult> {
    let EvalResult::Int(v) = value else {
        return None;
    };
    if module.is_bool(to) {
        return Some(EvalResult::int(u64::from(v.value() != 0)));
    }
    let target = if module.is_enum(to) {
        match module.type_kind(to) {
            crate::types::TypeKind::Enum { underlying, .. } => *underlying,
            _ => unreachable!(),
        }
    } else {
        to
    };
    if !module.is_integer(target, true) {
        return None;
    }
    let bits = module.type_size_bits(ctx, target) as u32;
    let out = if module.is_unsigned_integer(target) {
        v.zext(bits)
    } else {
        v.sext(bits)
    };
    Some(EvalResult::Int(out))
}

fn fold_binary(op: BinaryOp, l: IntValue, r: IntValue, unsigned: bool) -> Option<EvalResult> {
    let bool_result = |b: bool| Some(EvalResult::int(u64::from(b)));
    match op {
        BinaryOp::Add => Some(EvalResult::Int(IntValue::new(
            l.value().wrapping_add(r.value()),
        ))),
        BinaryOp::Sub => Some(EvalResult::Int(IntValue::new(
            l.value().wrapping_sub(r.value()),
        ))),
        BinaryOp::Mul => Some(EvalResult::Int(IntValue::new(
            l.value().wrapping_mul(r.value()),
        ))),
        BinaryOp::Div => {
            if r.value() == 0 {
                return None;
            }
            if unsigned {
                Some(EvalResult::int(l.value() / r.value()))
            } else {
                Some(EvalResult::Int(IntValue::from_i64(
                    l.as_i64().wrapping_div(r.as_i64()),
                )))
            }
        }
        BinaryOp::Rem => {
            if r.value() == 0 {
                return None;
            }
            if unsigned {
                Some(EvalResult::int(l.value() % r.value()))
            } else {
                Some(EvalResult::Int(IntValue::from_i64(
                    l.as_i64().wrapping_rem(r.as_i64()),
                )))
            }
        }
        BinaryOp::Shl => Some(EvalResult::Int(IntValue::new(
            l.value().wrapping_shl(r.value() as u32),
        ))),
        BinaryOp::Shr => {
            if unsigned {
                Some(EvalResult::Int(IntValue::new(
                    l.value().wrapping_shr(r.value() as u32),
                )))
            } else {
                Some(EvalResult::Int(IntValue::from_i64(
                    l.as_i64().wrapping_shr(r.value() as u32),
                )))
            }
        }
        BinaryOp::BitAnd => Some(EvalResult::Int(IntValue::new(l.value() & r.value()))),
        BinaryOp::BitOr => Some(EvalResult::Int(IntValue::new(l.value() | r.value()))),
        BinaryOp::BitXor => Some(EvalResult::Int(IntValue::new(l.value() ^ r.value()))),
        BinaryOp::And => bool_result(l.value() != 0 && r.value() != 0),
        BinaryOp::Or => bool_result(l.value() != 0 || r.value() != 0),
        BinaryOp::Eq => bool_result(l.value() == r.value()),
        BinaryOp::Ne => bool_result(l.value() != r.value()),
        BinaryOp::Lt => bool_result(if unsigned {
            l.value() < r.value()
        } else {
            l.as_i64() < r.as_i64()
        }),
        BinaryOp::Gt => bool_result(if unsigned {
            l.value() > r.value()
        } else {
            l.as_i64() > r.as_i64()
        }),
        BinaryOp::Le => bool_result(if unsigned {
            l.value() <= r.value()
        } else {
            l.as_i64() <= r.as_i64()
        }),
        BinaryOp::Ge => bool_result(if unsigned {
            l.value() >= r.value()
        } else {
            l.as_i64() >= r.as_i64()
        }),
        BinaryOp::Assign | BinaryOp::Subscript => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Module;
    use crate::source::Location;

    fn setup() -> (Context, Module) {
        let ctx = Context::default();
        let module = Module::new(&ctx, "t");
        (ctx, module)
    }

    fn lit(m: &mut Module, v: u64) -> ExprId {
        m.new_expr_typed(ExprKind::IntLit(v), Location::default(), TypeId::INT)
    }

    #[test]
    fn test_extension_ops() {
        let v = IntValue::new(0xFF);
        assert_eq!(v.sext(8).as_i64(), -1);
        assert_eq!(v.zext(8).value(), 0xFF);
        assert_eq!(IntValue::new(0x80).sext(8).as_i64(), -128);
        assert_eq!(IntValue::from_i64(-1).zext(16).value(), 0xFFFF);
        // Width 64 is the identity.
        assert_eq!(IntValue::from_i64(-5).sext(64).as_i64(), -5);
    }

    #[test]
    fn test_fold_arithmetic() {
        let (ctx, mut m) = setup();
        let a = lit(&mut m, 6);
        let b = lit(&mut m, 7);
        let mul = m.new_expr_typed(
            ExprKind::Binary {
                op: BinaryOp::Mul,
                lhs: a,
                rhs: b,
            },
            Location::default(),
            TypeId::INT,
        );
        assert_eq!(evaluate(&ctx, &m, mul), Some(EvalResult::int(42)));
    }

    #[test]
    fn test_fold_signed_division() {
        let (ctx, mut m) = setup();
        let a = m.new_expr_typed(
            ExprKind::IntLit((-9i64) as u64),
            Location::default(),
            TypeId::INT,
        );
        let b = lit(&mut m, 2);
        let div = m.new_expr_typed(
            ExprKind::Binary {
                op: BinaryOp::Div,
                lhs: a,
                rhs: b,
            },
            Location::default(),
            TypeId::INT,
        );
        let result = evaluate(&ctx, &m, div).unwrap();
        assert_eq!(result.as_int().unwrap().as_i64(), -4);
    }

    #[test]
    fn test_division_by_zero_fails() {
        let (ctx, mut m) = setup();
        let a = lit(&mut m, 1);
        let b = lit(&mut m, 0);
        let div = m.new_expr_typed(
            ExprKind::Binary {
                op: BinaryOp::Div,
                lhs: a,
                rhs: b,
            },
            Location::default(),
            TypeId::INT,
        );
        assert_eq!(evaluate(&ctx, &m, div), None);
    }

    #[test]
    fn test_fold_conditional() {
        let (ctx, mut m) = setup();
        let c = lit(&mut m, 1);
        let t = lit(&mut m, 10);
        let e = lit(&mut m, 20);
        let if_ = m.new_expr_typed(
            ExprKind::If {
                cond: c,
                then: t,
                otherwise: Some(e),
            },
            Location::default(),
            TypeId::INT,
        );
        assert_eq!(evaluate(&ctx, &m, if_), Some(EvalResult::int(10)));
    }

    #[test]
    fn test_string_literal_folds_to_reference() {
        let (ctx, mut m) = setup();
        let idx = m.intern_string("hello");
        let s = m.new_expr(ExprKind::StrLit(idx), Location::default());
        assert_eq!(evaluate(&ctx, &m, s), Some(EvalResult::String(idx)));
    }

    #[test]
    fn test_cast_round_trip() {
        // If fold(e) = v and v fits in T, then casting a literal of v to
        // T folds back to v.
        let (ctx, mut m) = setup();
        let v = lit(&mut m, 100);
        let cast = m.new_expr_typed(
            ExprKind::Cast {
                kind: CastKind::Implicit,
                operand: v,
            },
            Location::default(),
            TypeId::BYTE,
        );
        assert_eq!(evaluate(&ctx, &m, cast), Some(EvalResult::int(100)));
    }

    #[test]
    fn test_non_constant_fails() {
        let (ctx, mut m) = setup();
        let name = ctx.intern("x");
        let n = m.new_expr(
            ExprKind::NameRef {
                name,
                scope: crate::index_vec::ScopeId::GLOBAL,
                target: None,
            },
            Location::default(),
        );
        assert_eq!(evaluate(&ctx, &m, n), None);
    }
}
