//! Compilation of Go expressions into stack-machine programs.
//!
//! `compile` turns an expression string into an immutable [`Program`] of
//! [`Op`]s. The program is executed elsewhere, against the stopped inferior;
//! compilation itself only needs name lookups ([`EvalScope`]) and type
//! resolution ([`TypeResolver`]). Every produced program passes the stack
//! depth verifier before it is returned.

pub mod compile;
pub mod depth;
pub mod opcode;

pub use compile::{compile, compile_ast, compile_set, DEBUG_PINNER_FUNCTION_NAME};
pub use depth::depth_check;
pub use opcode::{listing, JumpCond, Op, Program};

use crate::error::Error;
use crate::syntax::Expr;
use crate::types::TypeRef;
use std::ops::BitOr;

/// Compilation flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(u8);

impl Flags {
    /// Accept `lhs = rhs` input and compile the assignment.
    pub const CAN_SET: Flags = Flags(1 << 0);
    /// The inferior runtime exposes the debug pinner, the new call-injection
    /// lowering is legal.
    pub const HAS_DEBUG_PINNER: Flags = Flags(1 << 1);

    #[inline(always)]
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// Name lookups in the scope the expression is evaluated in.
pub trait EvalScope {
    fn has_local(&self, name: &str) -> bool;

    /// A package-level variable; `package` is empty for the current package.
    fn has_global(&self, package: &str, name: &str) -> bool;

    fn has_builtin(&self, name: &str) -> bool;

    /// Register index for a mnemonic like "rip", if the mnemonic is known.
    fn lookup_register(&self, name: &str) -> Option<usize>;
}

/// Resolution of type expressions against the inferior's debug info.
pub trait TypeResolver {
    /// Resolve a surface-syntax type expression. Unknown types are reported
    /// as [`Error::TypeNotFound`], the compiler falls back or composes
    /// errors based on that exact variant.
    fn find_type_expr(&self, expr: &Expr) -> Result<TypeRef, Error>;
}
