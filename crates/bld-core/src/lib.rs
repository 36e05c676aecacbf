//! The bld build engine core: the scope/target graph, the buildfile
//! lexer/parser/evaluator, the rule-matching state machine, the task
//! scheduler, and change detection (depdb).
//!
//! This crate owns everything that does not need to know about a
//! particular toolchain (`bld-cc` builds on top of it for C/C++-style
//! compile/link rules) or the testscript language (`bld-script`).
//! `bld-driver` is the only crate that talks to the process environment
//! (argv, stdio, the filesystem root) directly; everything here takes
//! that input already parsed.

pub mod algorithm;
pub mod config;
pub mod context;
pub mod depdb;
pub mod diagnostics;
pub mod functions;
pub mod install;
pub mod lexer;
pub mod loader;
pub mod operation;
pub mod parser;
pub mod rule;
pub mod builtin_rules;
pub mod scheduler;
pub mod scope;
pub mod target;

pub use context::Context;
pub use operation::Action;
pub use scope::{Scope, ScopeMap};
pub use target::{Target, TargetSet, TargetType};
