//! Shared types for the `bld` build engine.
//!
//! This crate defines the primitive currency of the buildfile language and
//! the build graph: filesystem [`path`], the qualified [`name`] identifier,
//! the tagged [`value`] union, and [`variable`] metadata. These types have
//! no dependency on the engine's scope/target graph (`bld-core`) or on any
//! particular front end (`bld-cc`, `bld-script`); they are the wire format
//! everything else is built from.

/// Hash wrappers used for depdb fingerprints and content addressing.
pub mod hash;
/// The qualified identifier (`name`) type and its parsing/printing rules.
pub mod name;
/// Directory/file paths and the monotonic timestamp type.
pub mod path;
/// Typed, overridable variable metadata.
pub mod variable;
/// The tagged value union (`null` plus typed payloads).
pub mod value;

pub use hash::Sha256Digest;
pub use name::Name;
pub use path::{DirPath, FilePath, Timestamp};
pub use value::Value;
