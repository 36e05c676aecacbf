//! `bld`'s C/C++ front end (spec.md §2 component O, §4.10): compiler
//! toolchain probing, header dependency discovery, and the compile/link
//! rules built on top of `bld-core`'s depdb and rule-matching machinery.
//!
//! Out of scope (spec.md's "external collaborators whose interface we
//! only fix"): argument-synthesis matrices for every compiler driver
//! (MSVC quoting, Windows rpath generation), pkg-config generation, and
//! the full `guess.cxx` vendor-fork table — `toolchain::probe` only
//! recognizes GCC and Clang banners.

pub mod compile;
pub mod depscan;
pub mod link;
pub mod module;
pub mod target_types;
pub mod toolchain;

pub use module::CcModule;
pub use toolchain::{Toolchain, ToolchainError, ToolchainId};
