//! The C/C++ target type hierarchy (spec.md §4.10), grounded on
//! `libbuild2/cc/init.cxx`'s target type registration (`h{}`, `c{}`,
//! `hxx{}`, `cxx{}`, `obje{}`, `exe{}`, `liba{}`, `libs{}`).

use bld_core::algorithm::TargetTypeRegistry;
use bld_core::target::TargetType;

/// A C++ header (`.hxx`/`.hpp`/`.h`), never itself built — only scanned
/// for include dependencies by the compile rule.
pub static HXX: TargetType = TargetType {
    name: "hxx",
    base: Some(&bld_core::target::FILE),
    default_extension: Some("hxx"),
    is_dir: false,
};

/// A C++ source file.
pub static CXX: TargetType = TargetType {
    name: "cxx",
    base: Some(&bld_core::target::FILE),
    default_extension: Some("cxx"),
    is_dir: false,
};

/// A compiled object file — the compile rule's output, the link rule's
/// input.
pub static OBJE: TargetType = TargetType {
    name: "obje",
    base: Some(&bld_core::target::FILE),
    default_extension: Some("o"),
    is_dir: false,
};

/// An executable binary.
pub static EXE: TargetType = TargetType {
    name: "exe",
    base: Some(&bld_core::target::FILE),
    default_extension: Some(""),
    is_dir: false,
};

/// A static (archive) library.
pub static LIBA: TargetType = TargetType {
    name: "liba",
    base: Some(&bld_core::target::FILE),
    default_extension: Some("a"),
    is_dir: false,
};

/// A shared (dynamically-linked) library.
pub static LIBS: TargetType = TargetType {
    name: "libs",
    base: Some(&bld_core::target::FILE),
    default_extension: Some("so"),
    is_dir: false,
};

/// Register every type this module provides into `registry` (spec.md
/// §4.10, `cc/init.cxx`'s `boot`/`init` target-type registration).
pub fn register(registry: &mut TargetTypeRegistry) {
    registry.register(&HXX);
    registry.register(&CXX);
    registry.register(&OBJE);
    registry.register(&EXE);
    registry.register(&LIBA);
    registry.register(&LIBS);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_and_source_types_derive_from_file() {
        assert!(OBJE.is_a(&bld_core::target::FILE));
        assert!(CXX.is_a(&bld_core::target::FILE));
        assert!(!CXX.is_a(&OBJE));
    }

    #[test]
    fn register_adds_every_type_to_a_fresh_registry() {
        let mut reg = TargetTypeRegistry::standard();
        register(&mut reg);
        assert!(reg.find("exe").is_some());
        assert!(reg.find("liba").is_some());
        assert!(reg.find("libs").is_some());
    }
}
