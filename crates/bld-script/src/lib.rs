//! `bld`'s embedded testscript/shellscript language (spec.md §2 component
//! P, §4.9): a mode-driven per-line lexer, a pre-parser that turns a
//! script file into a flat list of replayable [`ast::Line`]s, and an
//! executor that walks those lines against a tree of [`scope::ScriptScope`]s.
//!
//! `bld-core`'s `test` operation plugs this crate in as a recipe: it
//! pre-parses a target's testscript once, then executes it fresh for
//! every run rather than re-parsing on each invocation.

pub mod ast;
pub mod error;
pub mod exec;
pub mod lexer;
pub mod preparse;
pub mod scope;

pub use error::{ExecError, PreparseError};
pub use exec::execute;
pub use preparse::preparse;
pub use scope::{ScopeKind, ScriptScope};
