//! `install`/`uninstall` support (spec.md §3 "Operation"; reduced scope
//! per SPEC_FULL.md §2 — this module computes install locations and
//! exposes the `install`/`uninstall` variable contract a rule consults,
//! but does not implement the original's full filesystem-permission /
//! `sudo` escalation machinery, which is explicitly out of scope).

use bld_schema::path::{DirPath, FilePath};

use crate::scope::Scope;

/// The `config.install.*` variables a project can set to control where
/// `install` places things (spec.md §3's install variable family,
/// narrowed to the common subset).
#[derive(Debug, Clone)]
pub struct InstallLayout {
    /// `config.install.root` — the installation prefix (`/usr/local` by
    /// default).
    pub root: DirPath,
    /// Subdirectory executables install under, relative to `root`
    /// (`bin/`).
    pub bin: DirPath,
    /// Subdirectory libraries install under (`lib/`).
    pub lib: DirPath,
    /// Subdirectory headers/includes install under (`include/`).
    pub include: DirPath,
    /// Subdirectory read-only data installs under (`share/`).
    pub data: DirPath,
}

impl Default for InstallLayout {
    fn default() -> Self {
        let root = DirPath::new("/usr/local");
        Self {
            bin: root.join("bin"),
            lib: root.join("lib"),
            include: root.join("include"),
            data: root.join("share"),
            root,
        }
    }
}

/// A target-type's install subdirectory, per the `install` variable
/// (spec.md §3: "a target's own `install` variable, if set, names the
/// subdirectory it installs under relative to `config.install.root`; if
/// unset, a target of a type with no default install location is not
/// installed at all").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallSlot {
    /// No installation (the default for most intermediate target types,
    /// e.g. `obje`).
    None,
    /// The `bin/` slot.
    Bin,
    /// The `lib/` slot.
    Lib,
    /// The `include/` slot.
    Include,
    /// The `share/` slot.
    Data,
}

impl InstallLayout {
    /// Resolve `slot` to an absolute install directory.
    pub fn dir_for(&self, slot: InstallSlot) -> Option<&DirPath> {
        match slot {
            InstallSlot::None => None,
            InstallSlot::Bin => Some(&self.bin),
            InstallSlot::Lib => Some(&self.lib),
            InstallSlot::Include => Some(&self.include),
            InstallSlot::Data => Some(&self.data),
        }
    }

    /// The full install destination for a file named `leaf`, installed
    /// into `slot`.
    pub fn destination(&self, slot: InstallSlot, leaf: &str) -> Option<FilePath> {
        self.dir_for(slot).map(|d| FilePath::new(d.join(leaf).as_path()))
    }
}

/// Read a project root scope's `config.install.*` overrides into an
/// [`InstallLayout`], falling back to [`InstallLayout::default`] for
/// anything unset. Looked up by well-known variable names rather than
/// `VariableId` since install configuration is read once per project at
/// the start of an `install`/`uninstall` operation, not on a hot path.
pub fn layout_from_scope(scope: &Scope, var_pool: &bld_schema::variable::VariablePool) -> InstallLayout {
    let mut layout = InstallLayout::default();
    if let Some(id) = var_pool.find("config.install.root") {
        if let Some(bld_schema::value::Value::DirPath(d)) = scope.get_own(id.id) {
            layout = InstallLayout {
                bin: d.join("bin"),
                lib: d.join("lib"),
                include: d.join("include"),
                data: d.join("share"),
                root: d,
            };
        }
    }
    layout
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_rooted_at_usr_local() {
        let layout = InstallLayout::default();
        assert_eq!(layout.bin, DirPath::new("/usr/local/bin"));
    }

    #[test]
    fn none_slot_has_no_destination() {
        let layout = InstallLayout::default();
        assert_eq!(layout.destination(InstallSlot::None, "foo"), None);
    }

    #[test]
    fn bin_slot_resolves_full_path() {
        let layout = InstallLayout::default();
        assert_eq!(
            layout.destination(InstallSlot::Bin, "hello"),
            Some(FilePath::new("/usr/local/bin/hello"))
        );
    }
}
