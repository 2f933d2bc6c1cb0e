//! The Glint type model.
//!
//! Types are nodes in a per-module arena, carrying the same analysis
//! state machine as expressions: named types are resolved by rewriting
//! the id slot in the parent, array sizes are folded in place, and
//! composite types cache the layouts IR generation consumes.
//!
//! Canonical builtins are seeded at fixed ids when a module is created,
//! so `TypeId::INT` et al. are valid in every module.

use crate::ast::{ExprKind, Module, SemaState};
use crate::context::Context;
use crate::eval::{EvalResult, IntValue};
use crate::index_vec::{ExprId, IndexVec, Name, ScopeId, TypeId};
use crate::source::Location;

impl TypeId {
    /// The inference placeholder. Never equal to any type.
    pub const UNKNOWN: TypeId = TypeId(0);
    pub const VOID: TypeId = TypeId(1);
    pub const INT: TypeId = TypeId(2);
    pub const BOOL: TypeId = TypeId(3);
    pub const BYTE: TypeId = TypeId(4);
    pub const VOID_PTR: TypeId = TypeId(5);
    /// Marker type of unresolved overload sets.
    pub const OVERLOAD_SET: TypeId = TypeId(6);
    pub const UINT: TypeId = TypeId(7);
    pub const CINT: TypeId = TypeId(8);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    Unknown,
    Void,
    Int,
    Bool,
    Byte,
    OverloadSet,
}

/// Opaque foreign types sized by the target descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiKind {
    CInt,
}

impl FfiKind {
    pub fn display(self) -> &'static str {
        match self {
            FfiKind::CInt => "cint",
        }
    }
}

/// Function type attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FuncAttrs(u16);

impl FuncAttrs {
    pub const NONE: FuncAttrs = FuncAttrs(0);
    pub const PURE: FuncAttrs = FuncAttrs(1 << 0);
    pub const CONST: FuncAttrs = FuncAttrs(1 << 1);
    pub const NORETURN: FuncAttrs = FuncAttrs(1 << 2);
    pub const NOINLINE: FuncAttrs = FuncAttrs(1 << 3);
    pub const INLINE: FuncAttrs = FuncAttrs(1 << 4);
    pub const DISCARDABLE: FuncAttrs = FuncAttrs(1 << 5);
    pub const USED: FuncAttrs = FuncAttrs(1 << 6);

    pub fn has(self, attr: FuncAttrs) -> bool {
        self.0 & attr.0 != 0
    }

    #[must_use]
    pub fn with(self, attr: FuncAttrs) -> FuncAttrs {
        FuncAttrs(self.0 | attr.0)
    }
}

/// A member of a struct, sum or union type.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: Name,
    pub ty: TypeId,
    /// Assigned during struct layout; zero for sum/union members.
    pub byte_offset: usize,
}

/// A function type parameter.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: Option<Name>,
    pub ty: TypeId,
    pub loc: Location,
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    Builtin(BuiltinKind),
    Integer {
        bit_width: u16,
        signed: bool,
    },
    Ffi(FfiKind),
    /// Pre-resolution placeholder; replaced by the declared type.
    Named {
        name: Name,
        scope: ScopeId,
    },
    Pointer {
        elem: TypeId,
    },
    Reference {
        elem: TypeId,
    },
    Array {
        elem: TypeId,
        size: ExprId,
    },
    DynamicArray {
        elem: TypeId,
        initial_size: Option<ExprId>,
        /// Equivalent `{data, size, capacity}` layout, built lazily.
        struct_cache: Option<TypeId>,
    },
    Sum {
        members: Vec<Member>,
        byte_size: usize,
        alignment: usize,
        /// Equivalent `{tag, data}` layout, built lazily.
        struct_cache: Option<TypeId>,
    },
    Union {
        members: Vec<Member>,
        byte_size: usize,
        alignment: usize,
        /// Equivalent byte-array layout, built lazily.
        array_cache: Option<TypeId>,
    },
    Struct {
        members: Vec<Member>,
        byte_size: usize,
        alignment: usize,
    },
    Enum {
        underlying: TypeId,
        enumerators: Vec<ExprId>,
        scope: ScopeId,
    },
    Function {
        ret: TypeId,
        params: Vec<Param>,
        attrs: FuncAttrs,
    },
}

#[derive(Debug, Clone)]
pub struct Type {
    pub kind: TypeKind,
    pub state: SemaState,
    pub loc: Location,
}

impl Type {
    pub fn new(kind: TypeKind, loc: Location) -> Self {
        Self {
            kind,
            state: SemaState::NotAnalysed,
            loc,
        }
    }

    fn done(kind: TypeKind) -> Self {
        Self {
            kind,
            state: SemaState::Done,
            loc: Location::default(),
        }
    }
}

/// Seed the canonical builtin types in [`TypeId`] constant order.
pub fn seed_builtin_types(types: &mut IndexVec<TypeId, Type>) {
    let seeded = [
        Type::done(TypeKind::Builtin(BuiltinKind::Unknown)),
        Type::done(TypeKind::Builtin(BuiltinKind::Void)),
        Type::done(TypeKind::Builtin(BuiltinKind::Int)),
        Type::done(TypeKind::Builtin(BuiltinKind::Bool)),
        Type::done(TypeKind::Builtin(BuiltinKind::Byte)),
        Type::done(TypeKind::Pointer { elem: TypeId::VOID }),
        Type::done(TypeKind::Builtin(BuiltinKind::OverloadSet)),
        Type::done(TypeKind::Integer {
            bit_width: 64,
            signed: false,
        }),
        Type::done(TypeKind::Ffi(FfiKind::CInt)),
    ];
    for ty in seeded {
        types.push(ty);
    }
    debug_assert_eq!(types.next_idx(), TypeId(9));
}

impl Module {
    // ========================================================================
    // Construction
    // ========================================================================

    pub fn new_type(&mut self, kind: TypeKind, loc: Location) -> TypeId {
        self.types.push(Type::new(kind, loc))
    }

    /// Allocate a type that needs no analysis.
    pub fn new_type_done(&mut self, kind: TypeKind) -> TypeId {
        self.types.push(Type::done(kind))
    }

    /// Pointer to `elem`. References collapse on construction.
    pub fn pointer_to(&mut self, elem: TypeId) -> TypeId {
        let elem = self.strip_one_reference(elem);
        if elem == TypeId::VOID {
            return TypeId::VOID_PTR;
        }
        self.new_type_done(TypeKind::Pointer { elem })
    }

    /// Reference to `elem`. References collapse on construction.
    pub fn reference_to(&mut self, elem: TypeId) -> TypeId {
        let elem = self.strip_one_reference(elem);
        self.new_type_done(TypeKind::Reference { elem })
    }

    fn strip_one_reference(&self, ty: TypeId) -> TypeId {
        match self.types[ty].kind {
            TypeKind::Reference { elem } => elem,
            _ => ty,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn type_kind(&self, ty: TypeId) -> &TypeKind {
        &self.types[ty].kind
    }

    pub fn type_state(&self, ty: TypeId) -> SemaState {
        self.types[ty].state
    }

    pub fn type_ok(&self, ty: TypeId) -> bool {
        self.types[ty].state == SemaState::Done
    }

    pub fn type_errored(&self, ty: TypeId) -> bool {
        self.types[ty].state == SemaState::Errored
    }

    pub fn is_unknown(&self, ty: TypeId) -> bool {
        matches!(self.types[ty].kind, TypeKind::Builtin(BuiltinKind::Unknown))
    }

    pub fn is_void(&self, ty: TypeId) -> bool {
        matches!(self.types[ty].kind, TypeKind::Builtin(BuiltinKind::Void))
    }

    pub fn is_bool(&self, ty: TypeId) -> bool {
        matches!(self.types[ty].kind, TypeKind::Builtin(BuiltinKind::Bool))
    }

    /// Integer-like types: `int`, `byte`, sized integers and FFI
    /// integers. `bool` only when `accept_bool`.
    pub fn is_integer(&self, ty: TypeId, accept_bool: bool) -> bool {
        match self.types[ty].kind {
            TypeKind::Builtin(BuiltinKind::Int) | TypeKind::Builtin(BuiltinKind::Byte) => true,
            TypeKind::Builtin(BuiltinKind::Bool) => accept_bool,
            TypeKind::Integer { .. } | TypeKind::Ffi(_) => true,
            _ => false,
        }
    }

    pub fn is_unsigned_integer(&self, ty: TypeId) -> bool {
        match self.types[ty].kind {
            TypeKind::Builtin(BuiltinKind::Byte) => true,
            TypeKind::Integer { signed, .. } => !signed,
            _ => false,
        }
    }

    pub fn is_pointer(&self, ty: TypeId) -> bool {
        matches!(self.types[ty].kind, TypeKind::Pointer { .. })
    }

    pub fn is_reference(&self, ty: TypeId) -> bool {
        matches!(self.types[ty].kind, TypeKind::Reference { .. })
    }

    pub fn is_function(&self, ty: TypeId) -> bool {
        matches!(self.types[ty].kind, TypeKind::Function { .. })
    }

    pub fn is_array(&self, ty: TypeId) -> bool {
        matches!(self.types[ty].kind, TypeKind::Array { .. })
    }

    pub fn is_dynamic_array(&self, ty: TypeId) -> bool {
        matches!(self.types[ty].kind, TypeKind::DynamicArray { .. })
    }

    pub fn is_enum(&self, ty: TypeId) -> bool {
        matches!(self.types[ty].kind, TypeKind::Enum { .. })
    }

    pub fn is_overload_set(&self, ty: TypeId) -> bool {
        matches!(
            self.types[ty].kind,
            TypeKind::Builtin(BuiltinKind::OverloadSet)
        )
    }

    /// Element type of a pointer or reference.
    pub fn elem_type(&self, ty: TypeId) -> Option<TypeId> {
        match self.types[ty].kind {
            TypeKind::Pointer { elem } | TypeKind::Reference { elem } => Some(elem),
            _ => None,
        }
    }

    pub fn strip_references(&self, ty: TypeId) -> TypeId {
        let mut ty = ty;
        while let TypeKind::Reference { elem } = self.types[ty].kind {
            ty = elem;
        }
        ty
    }

    pub fn strip_pointers_and_references(&self, ty: TypeId) -> TypeId {
        let mut ty = ty;
        loop {
            match self.types[ty].kind {
                TypeKind::Pointer { elem } | TypeKind::Reference { elem } => ty = elem,
                _ => return ty,
            }
        }
    }

    /// Folded dimension of a fixed array, if its size has been folded.
    pub fn array_dimension(&self, ty: TypeId) -> Option<u64> {
        let TypeKind::Array { size, .. } = self.types[ty].kind else {
            return None;
        };
        match &self.exprs[size].kind {
            ExprKind::IntLit(v) => Some(*v),
            ExprKind::EvaluatedConstant {
                value: EvalResult::Int(v),
                ..
            } => Some(v.value()),
            _ => None,
        }
    }

    // ========================================================================
    // Equality
    // ========================================================================

    /// Structural equality per variant; lookup placeholders compare by
    /// identity only, and the inference placeholder equals nothing.
    pub fn types_equal(&self, a: TypeId, b: TypeId) -> bool {
        if self.is_unknown(a) || self.is_unknown(b) {
            return false;
        }
        if a == b {
            return true;
        }
        match (&self.types[a].kind, &self.types[b].kind) {
            (TypeKind::Builtin(x), TypeKind::Builtin(y)) => x == y,
            (
                TypeKind::Integer {
                    bit_width: w1,
                    signed: s1,
                },
                TypeKind::Integer {
                    bit_width: w2,
                    signed: s2,
                },
            ) => w1 == w2 && s1 == s2,
            (TypeKind::Ffi(x), TypeKind::Ffi(y)) => x == y,
            (TypeKind::Pointer { elem: x }, TypeKind::Pointer { elem: y })
            | (TypeKind::Reference { elem: x }, TypeKind::Reference { elem: y }) => {
                self.types_equal(*x, *y)
            }
            (TypeKind::Array { elem: x, .. }, TypeKind::Array { elem: y, .. }) => {
                self.types_equal(*x, *y)
                    && match (self.array_dimension(a), self.array_dimension(b)) {
                        (Some(da), Some(db)) => da == db,
                        _ => false,
                    }
            }
            (
                TypeKind::DynamicArray { elem: x, .. },
                TypeKind::DynamicArray { elem: y, .. },
            ) => self.types_equal(*x, *y),
            (
                TypeKind::Function {
                    ret: r1,
                    params: p1,
                    ..
                },
                TypeKind::Function {
                    ret: r2,
                    params: p2,
                    ..
                },
            ) => {
                self.types_equal(*r1, *r2)
                    && p1.len() == p2.len()
                    && p1
                        .iter()
                        .zip(p2.iter())
                        .all(|(x, y)| self.types_equal(x.ty, y.ty))
            }
            // Named types compare by identity only; struct, sum, union
            // and enum types are nominal.
            _ => false,
        }
    }

    // ========================================================================
    // Size and alignment (bits)
    // ========================================================================

    pub fn type_size_bits(&self, ctx: &Context, ty: TypeId) -> usize {
        match &self.types[ty].kind {
            TypeKind::Builtin(BuiltinKind::Unknown)
            | TypeKind::Builtin(BuiltinKind::Void)
            | TypeKind::Builtin(BuiltinKind::OverloadSet) => 0,
            TypeKind::Builtin(BuiltinKind::Int) => ctx.target().int_width as usize,
            TypeKind::Builtin(BuiltinKind::Bool) | TypeKind::Builtin(BuiltinKind::Byte) => 8,
            TypeKind::Integer { bit_width, .. } => *bit_width as usize,
            TypeKind::Ffi(FfiKind::CInt) => ctx.target().ffi_int_width as usize,
            TypeKind::Named { .. } => 0,
            TypeKind::Pointer { .. } | TypeKind::Reference { .. } => {
                ctx.target().pointer_width as usize
            }
            TypeKind::Array { elem, .. } => {
                let dim = self.array_dimension(ty).unwrap_or(0) as usize;
                self.type_size_bits(ctx, *elem) * dim
            }
            // The value representation is the {data, size, capacity} struct.
            TypeKind::DynamicArray { .. } => {
                ctx.target().pointer_width as usize + 2 * ctx.target().int_width as usize
            }
            TypeKind::Sum { byte_size, .. }
            | TypeKind::Union { byte_size, .. }
            | TypeKind::Struct { byte_size, .. } => byte_size * 8,
            TypeKind::Enum { underlying, .. } => self.type_size_bits(ctx, *underlying),
            TypeKind::Function { .. } => 0,
        }
    }

    pub fn type_align_bits(&self, ctx: &Context, ty: TypeId) -> usize {
        match &self.types[ty].kind {
            TypeKind::Builtin(BuiltinKind::Int) => ctx.target().int_width as usize,
            TypeKind::Integer { bit_width, .. } => (*bit_width as usize).clamp(8, 64),
            TypeKind::Ffi(FfiKind::CInt) => ctx.target().ffi_int_width as usize,
            TypeKind::Pointer { .. } | TypeKind::Reference { .. } | TypeKind::DynamicArray { .. } => {
                ctx.target().pointer_width as usize
            }
            TypeKind::Array { elem, .. } => self.type_align_bits(ctx, *elem),
            TypeKind::Sum { alignment, .. }
            | TypeKind::Union { alignment, .. }
            | TypeKind::Struct { alignment, .. } => (*alignment).max(1) * 8,
            TypeKind::Enum { underlying, .. } => self.type_align_bits(ctx, *underlying),
            _ => 8,
        }
    }

    // ========================================================================
    // Cached layouts
    // ========================================================================

    /// The `{data, size, capacity}` struct a dynamic array lowers to.
    pub fn dynamic_array_struct(&mut self, ctx: &Context, ty: TypeId) -> TypeId {
        let TypeKind::DynamicArray {
            elem, struct_cache, ..
        } = &self.types[ty].kind
        else {
            unreachable!("dynamic_array_struct on non-dynamic-array");
        };
        if let Some(cached) = struct_cache {
            return *cached;
        }
        let elem = *elem;

        let data_ptr = self.pointer_to(elem);
        let ptr_bytes = ctx.target().pointer_width as usize / 8;
        let int_bytes = ctx.target().int_width as usize / 8;
        let members = vec![
            Member {
                name: ctx.intern("data"),
                ty: data_ptr,
                byte_offset: 0,
            },
            Member {
                name: ctx.intern("size"),
                ty: TypeId::INT,
                byte_offset: ptr_bytes,
            },
            Member {
                name: ctx.intern("capacity"),
                ty: TypeId::INT,
                byte_offset: ptr_bytes + int_bytes,
            },
        ];
        let layout = self.new_type_done(TypeKind::Struct {
            members,
            byte_size: ptr_bytes + 2 * int_bytes,
            alignment: ptr_bytes,
        });

        if let TypeKind::DynamicArray { struct_cache, .. } = &mut self.types[ty].kind {
            *struct_cache = Some(layout);
        }
        layout
    }

    /// The `{tag, data}` struct a sum type lowers to.
    pub fn sum_struct(&mut self, ctx: &Context, ty: TypeId) -> TypeId {
        let TypeKind::Sum {
            members,
            byte_size,
            alignment,
            struct_cache,
        } = &self.types[ty].kind
        else {
            unreachable!("sum_struct on non-sum");
        };
        if let Some(cached) = struct_cache {
            return *cached;
        }
        let members = members.clone();
        let data_size = *byte_size;
        let data_align = (*alignment).max(1);

        let data_union = self.new_type_done(TypeKind::Union {
            members,
            byte_size: data_size,
            alignment: data_align,
            array_cache: None,
        });

        let int_bytes = ctx.target().int_width as usize / 8;
        let data_offset = align_to(int_bytes, data_align);
        let layout_members = vec![
            Member {
                name: ctx.intern("tag"),
                ty: TypeId::INT,
                byte_offset: 0,
            },
            Member {
                name: ctx.intern("data"),
                ty: data_union,
                byte_offset: data_offset,
            },
        ];
        let alignment = int_bytes.max(data_align);
        let layout = self.new_type_done(TypeKind::Struct {
            members: layout_members,
            byte_size: align_to(data_offset + data_size, alignment),
            alignment,
        });

        if let TypeKind::Sum { struct_cache, .. } = &mut self.types[ty].kind {
            *struct_cache = Some(layout);
        }
        layout
    }

    /// The byte-array layout a union lowers to.
    pub fn union_array(&mut self, ty: TypeId) -> TypeId {
        let TypeKind::Union {
            byte_size,
            array_cache,
            ..
        } = &self.types[ty].kind
        else {
            unreachable!("union_array on non-union");
        };
        if let Some(cached) = array_cache {
            return *cached;
        }
        let byte_size = *byte_size;

        let size = self.new_expr_typed(
            ExprKind::EvaluatedConstant {
                expr: None,
                value: EvalResult::Int(IntValue::new(byte_size as u64)),
            },
            Location::default(),
            TypeId::INT,
        );
        self.set_state(size, SemaState::Done);
        let layout = self.new_type_done(TypeKind::Array {
            elem: TypeId::BYTE,
            size,
        });

        if let TypeKind::Union { array_cache, .. } = &mut self.types[ty].kind {
            *array_cache = Some(layout);
        }
        layout
    }

    // ========================================================================
    // Display
    // ========================================================================

    pub fn type_to_string(&self, ctx: &Context, ty: TypeId) -> String {
        match &self.types[ty].kind {
            TypeKind::Builtin(BuiltinKind::Unknown) => "<unknown>".into(),
            TypeKind::Builtin(BuiltinKind::Void) => "void".into(),
            TypeKind::Builtin(BuiltinKind::Int) => "int".into(),
            TypeKind::Builtin(BuiltinKind::Bool) => "bool".into(),
            TypeKind::Builtin(BuiltinKind::Byte) => "byte".into(),
            TypeKind::Builtin(BuiltinKind::OverloadSet) => "<overload set>".into(),
            TypeKind::Integer { bit_width, signed } => {
                format!("{}{}", if *signed { "i" } else { "u" }, bit_width)
            }
            TypeKind::Ffi(kind) => kind.display().into(),
            TypeKind::Named { name, .. } => ctx.str(*name),
            TypeKind::Pointer { elem } => format!("{}.ptr", self.type_to_string(ctx, *elem)),
            TypeKind::Reference { elem } => format!("{}.ref", self.type_to_string(ctx, *elem)),
            TypeKind::Array { elem, .. } => match self.array_dimension(ty) {
                Some(dim) => format!("[{} {}]", self.type_to_string(ctx, *elem), dim),
                None => format!("[{}]", self.type_to_string(ctx, *elem)),
            },
            TypeKind::DynamicArray { elem, .. } => {
                format!("[{} dynamic]", self.type_to_string(ctx, *elem))
            }
            TypeKind::Sum { members, .. } => {
                let inner: Vec<_> = members
                    .iter()
                    .map(|m| {
                        format!("{} :{}", ctx.str(m.name), self.type_to_string(ctx, m.ty))
                    })
                    .collect();
                format!("sum {{ {} }}", inner.join("; "))
            }
            TypeKind::Union { .. } => "union { ... }".into(),
            TypeKind::Struct { .. } => "struct { ... }".into(),
            TypeKind::Enum { underlying, .. } => {
                format!("enum ({})", self.type_to_string(ctx, *underlying))
            }
            TypeKind::Function { ret, params, .. } => {
                let inner: Vec<_> = params
                    .iter()
                    .map(|p| self.type_to_string(ctx, p.ty))
                    .collect();
                format!("{}({})", self.type_to_string(ctx, *ret), inner.join(", "))
            }
        }
    }
}

pub(crate) fn align_to(value: usize, align: usize) -> usize {
    debug_assert!(align > 0);
    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_module() -> (Context, Module) {
        let ctx = Context::default();
        let module = Module::new(&ctx, "t");
        (ctx, module)
    }

    #[test]
    fn test_equality_reflexive_symmetric() {
        let (_ctx, mut m) = test_module();
        let p1 = m.pointer_to(TypeId::INT);
        let p2 = m.pointer_to(TypeId::INT);
        let pb = m.pointer_to(TypeId::BYTE);

        assert!(m.types_equal(TypeId::INT, TypeId::INT));
        assert!(m.types_equal(p1, p2));
        assert!(m.types_equal(p2, p1));
        assert!(!m.types_equal(p1, pb));
    }

    #[test]
    fn test_unknown_never_equal() {
        let (_ctx, m) = test_module();
        assert!(!m.types_equal(TypeId::UNKNOWN, TypeId::UNKNOWN));
        assert!(!m.types_equal(TypeId::UNKNOWN, TypeId::INT));
        assert!(!m.types_equal(TypeId::INT, TypeId::UNKNOWN));
    }

    #[test]
    fn test_void_pointer_is_structural() {
        let (_ctx, mut m) = test_module();
        let p = m.pointer_to(TypeId::VOID);
        assert_eq!(p, TypeId::VOID_PTR);
        assert!(m.types_equal(p, TypeId::VOID_PTR));
    }

    #[test]
    fn test_reference_collapse_on_construction() {
        let (_ctx, mut m) = test_module();
        let r = m.reference_to(TypeId::INT);
        let rr = m.reference_to(r);
        assert!(matches!(
            m.type_kind(rr),
            TypeKind::Reference { elem } if *elem == TypeId::INT
        ));
    }

    #[test]
    fn test_sizes() {
        let (ctx, mut m) = test_module();
        assert_eq!(m.type_size_bits(&ctx, TypeId::INT), 64);
        assert_eq!(m.type_size_bits(&ctx, TypeId::BYTE), 8);
        assert_eq!(m.type_size_bits(&ctx, TypeId::VOID), 0);
        assert_eq!(m.type_size_bits(&ctx, TypeId::CINT), 32);

        let p = m.pointer_to(TypeId::BYTE);
        assert_eq!(m.type_size_bits(&ctx, p), 64);

        // Dynamic arrays are sized as their struct layout.
        let d = m.new_type_done(TypeKind::DynamicArray {
            elem: TypeId::INT,
            initial_size: None,
            struct_cache: None,
        });
        assert_eq!(m.type_size_bits(&ctx, d), 192);
    }

    #[test]
    fn test_dynamic_array_struct_cached() {
        let (ctx, mut m) = test_module();
        let d = m.new_type_done(TypeKind::DynamicArray {
            elem: TypeId::INT,
            initial_size: None,
            struct_cache: None,
        });
        let s1 = m.dynamic_array_struct(&ctx, d);
        let s2 = m.dynamic_array_struct(&ctx, d);
        assert_eq!(s1, s2);
        match m.type_kind(s1) {
            TypeKind::Struct {
                members, byte_size, ..
            } => {
                assert_eq!(members.len(), 3);
                assert_eq!(*byte_size, 24);
                assert_eq!(ctx.str(members[0].name).as_str(), "data");
            }
            _ => panic!("expected struct layout"),
        }
    }

    #[test]
    fn test_sum_struct_layout() {
        let (ctx, mut m) = test_module();
        let members = vec![
            Member {
                name: ctx.intern("x"),
                ty: TypeId::INT,
                byte_offset: 0,
            },
            Member {
                name: ctx.intern("y"),
                ty: TypeId::UINT,
                byte_offset: 0,
            },
        ];
        let s = m.new_type_done(TypeKind::Sum {
            members,
            byte_size: 8,
            alignment: 8,
            struct_cache: None,
        });
        let layout = m.sum_struct(&ctx, s);
        match m.type_kind(layout) {
            TypeKind::Struct { members, .. } => {
                assert_eq!(ctx.str(members[0].name).as_str(), "tag");
                assert_eq!(ctx.str(members[1].name).as_str(), "data");
                assert!(matches!(m.type_kind(members[1].ty), TypeKind::Union { .. }));
            }
            _ => panic!("expected struct layout"),
        }
        // Sum size/alignment stay the max of the members.
        assert_eq!(m.type_size_bits(&ctx, s), 64);
    }

    #[test]
    fn test_function_equality_ignores_attrs() {
        let (_ctx, mut m) = test_module();
        let f1 = m.new_type_done(TypeKind::Function {
            ret: TypeId::INT,
            params: vec![],
            attrs: FuncAttrs::NONE,
        });
        let f2 = m.new_type_done(TypeKind::Function {
            ret: TypeId::INT,
            params: vec![],
            attrs: FuncAttrs::NONE.with(FuncAttrs::PURE),
        });
        assert!(m.types_equal(f1, f2));
    }
}
