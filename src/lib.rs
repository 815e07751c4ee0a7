//! Expression engine of a debugger for Go programs.
//!
//! Two subsystems live here. The [`eval`] module compiles debugger
//! expressions (plain Go surface syntax) into small stack-machine programs,
//! including the multi-step call-injection protocol that makes the stopped
//! inferior execute a function. The [`mapiter`] module decodes the runtime's
//! two map representations straight out of inferior memory, guided only by
//! debug-info type descriptors.
//!
//! Everything the engine needs from the rest of the debugger comes through
//! four narrow interfaces: [`eval::EvalScope`], [`eval::TypeResolver`],
//! [`memory::MemoryReader`] and [`control::StoppedThreadControl`]. Process
//! control, DWARF parsing and the user surface stay on the other side of
//! those seams.

pub mod control;
pub mod error;
pub mod eval;
pub mod mapiter;
pub mod memory;
pub mod syntax;
pub mod types;
pub mod value;
pub mod version;

pub use error::Error;
