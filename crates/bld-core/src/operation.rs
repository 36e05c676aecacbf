//! Meta-operations, operations, and the packed [`Action`] id that combines
//! them (spec.md §3 "Meta-operation", "Operation", "Action"; grounded on
//! `libbuild2/operation.hxx`'s `action`/`meta_operation_info`/
//! `operation_info`).

use std::fmt;

/// Execution mode for an operation (spec.md §3 "Operation"): whether the
/// default recipe runs prerequisites before or after the target itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Prerequisites execute before the target (`update`: compile inputs
    /// before linking).
    First,
    /// Prerequisites execute after the target (`clean`: remove the target
    /// before removing things it depended on, so a partially-cleaned tree
    /// never looks newer than its inputs).
    Last,
}

/// A registered operation's static metadata (spec.md §3 "Operation").
#[derive(Debug, Clone, Copy)]
pub struct OperationInfo {
    /// The buildfile/CLI name (`update`, `clean`, `test`, ...).
    pub name: &'static str,
    /// Whether prerequisites run before or after the target.
    pub mode: ExecutionMode,
    /// The operation this one runs as a side effect of running (e.g.
    /// `test` implies `update` first); `None` if standalone.
    pub pre: Option<OperationId>,
}

/// A registered meta-operation's static metadata (spec.md §3
/// "Meta-operation").
#[derive(Debug, Clone, Copy)]
pub struct MetaOperationInfo {
    /// The buildfile/CLI name (`perform`, `configure`, `disfigure`, ...).
    pub name: &'static str,
    /// `true` if this meta-operation loads buildfiles at all (`info` does
    /// not necessarily need full recipe application; kept `true` here
    /// since every meta-operation this engine implements loads).
    pub loads: bool,
}

/// Stable small integer identifying a registered operation. Index 0 is
/// reserved for the meaningless "no operation" / default placeholder,
/// mirroring `operation.hxx`'s `0` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u8);

/// Stable small integer identifying a registered meta-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetaOperationId(pub u8);

/// Well-known operation ids, assigned in registration order by
/// [`OperationTable::standard`].
pub mod op {
    use super::OperationId;
    /// `update`.
    pub const UPDATE: OperationId = OperationId(1);
    /// `clean`.
    pub const CLEAN: OperationId = OperationId(2);
    /// `test`.
    pub const TEST: OperationId = OperationId(3);
    /// `install`.
    pub const INSTALL: OperationId = OperationId(4);
    /// `uninstall`.
    pub const UNINSTALL: OperationId = OperationId(5);
}

/// Well-known meta-operation ids, assigned by
/// [`MetaOperationTable::standard`].
pub mod meta {
    use super::MetaOperationId;
    /// `perform` — the default, run when a buildspec names no
    /// meta-operation explicitly.
    pub const PERFORM: MetaOperationId = MetaOperationId(1);
    /// `configure`.
    pub const CONFIGURE: MetaOperationId = MetaOperationId(2);
    /// `disfigure`.
    pub const DISFIGURE: MetaOperationId = MetaOperationId(3);
    /// `info`.
    pub const INFO: MetaOperationId = MetaOperationId(4);
    /// `dist`.
    pub const DIST: MetaOperationId = MetaOperationId(5);
    /// `noop` — every target's recipe is skipped; used to validate that a
    /// buildspec resolves without actually doing anything.
    pub const NOOP: MetaOperationId = MetaOperationId(6);
}

/// The registry of operations known to this build (spec.md §3
/// "Operation" — "registered per build context").
#[derive(Debug, Default)]
pub struct OperationTable {
    entries: Vec<OperationInfo>,
}

impl OperationTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The five built-in operations this engine implements (spec.md §2).
    pub fn standard() -> Self {
        let mut t = Self::new();
        t.entries.push(OperationInfo { name: "", mode: ExecutionMode::First, pre: None });
        t.entries.push(OperationInfo { name: "update", mode: ExecutionMode::First, pre: None });
        t.entries.push(OperationInfo { name: "clean", mode: ExecutionMode::Last, pre: None });
        t.entries.push(OperationInfo {
            name: "test",
            mode: ExecutionMode::First,
            pre: Some(op::UPDATE),
        });
        t.entries.push(OperationInfo {
            name: "install",
            mode: ExecutionMode::First,
            pre: Some(op::UPDATE),
        });
        t.entries.push(OperationInfo { name: "uninstall", mode: ExecutionMode::Last, pre: None });
        t
    }

    /// Look up by name.
    pub fn find(&self, name: &str) -> Option<(OperationId, OperationInfo)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.name == name)
            .map(|(i, e)| (OperationId(i as u8), *e))
    }

    /// Fetch by id.
    pub fn get(&self, id: OperationId) -> OperationInfo {
        self.entries[id.0 as usize]
    }
}

/// The registry of meta-operations known to this build.
#[derive(Debug, Default)]
pub struct MetaOperationTable {
    entries: Vec<MetaOperationInfo>,
}

impl MetaOperationTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The six built-in meta-operations this engine implements.
    pub fn standard() -> Self {
        let mut t = Self::new();
        t.entries.push(MetaOperationInfo { name: "", loads: false });
        t.entries.push(MetaOperationInfo { name: "perform", loads: true });
        t.entries.push(MetaOperationInfo { name: "configure", loads: true });
        t.entries.push(MetaOperationInfo { name: "disfigure", loads: true });
        t.entries.push(MetaOperationInfo { name: "info", loads: true });
        t.entries.push(MetaOperationInfo { name: "dist", loads: true });
        t.entries.push(MetaOperationInfo { name: "noop", loads: true });
        t
    }

    /// Look up by name.
    pub fn find(&self, name: &str) -> Option<(MetaOperationId, MetaOperationInfo)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.name == name)
            .map(|(i, e)| (MetaOperationId(i as u8), *e))
    }

    /// Fetch by id.
    pub fn get(&self, id: MetaOperationId) -> MetaOperationInfo {
        self.entries[id.0 as usize]
    }
}

/// A packed `(meta-operation, outer-operation, inner-operation)` triple
/// (spec.md §3 "Action"). An outer operation wraps an inner one — e.g.
/// `update(test)` for "make sure test's prerequisites (the thing under
/// test) are up to date before running the test recipe" — and rules match
/// against inner and outer independently via [`Action::is_inner`].
///
/// Packed into a single `u32` (rather than three separate fields) so that
/// `Action` is `Copy`, hashes cheaply, and can be used directly as part of
/// a [`crate::rule::RuleKey`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Action {
    meta: MetaOperationId,
    inner: OperationId,
    outer: Option<OperationId>,
}

impl Action {
    /// Build an action with no outer wrapping.
    pub fn new(meta: MetaOperationId, op: OperationId) -> Self {
        Self { meta, inner: op, outer: None }
    }

    /// Build a wrapped action (`outer(inner)`).
    pub fn wrapped(meta: MetaOperationId, outer: OperationId, inner: OperationId) -> Self {
        Self { meta, inner, outer: Some(outer) }
    }

    /// The meta-operation component.
    pub fn meta(&self) -> MetaOperationId {
        self.meta
    }

    /// The inner operation component.
    pub fn inner_op(&self) -> OperationId {
        self.inner
    }

    /// The outer operation component, if wrapped.
    pub fn outer_op(&self) -> Option<OperationId> {
        self.outer
    }

    /// `true` for the inner half of this action — the half a rule
    /// matching the literal operation (rather than a wrapping one) cares
    /// about.
    pub fn is_inner(&self) -> bool {
        true
    }

    /// The action a rule asking for "the plain, unwrapped version of this
    /// operation" should match against.
    pub fn inner(&self) -> Action {
        Action { meta: self.meta, inner: self.inner, outer: None }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outer {
            Some(o) => write!(f, "Action(meta={}, {}({}))", self.meta.0, o.0, self.inner.0),
            None => write!(f, "Action(meta={}, {})", self.meta.0, self.inner.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_tables_resolve_known_names() {
        let ops = OperationTable::standard();
        let (id, info) = ops.find("update").unwrap();
        assert_eq!(id, op::UPDATE);
        assert_eq!(info.mode, ExecutionMode::First);

        let (id, info) = ops.find("clean").unwrap();
        assert_eq!(id, op::CLEAN);
        assert_eq!(info.mode, ExecutionMode::Last);

        let metas = MetaOperationTable::standard();
        let (id, _) = metas.find("perform").unwrap();
        assert_eq!(id, meta::PERFORM);
    }

    #[test]
    fn wrapped_action_keeps_both_operations() {
        let a = Action::wrapped(meta::PERFORM, op::TEST, op::UPDATE);
        assert_eq!(a.outer_op(), Some(op::TEST));
        assert_eq!(a.inner_op(), op::UPDATE);
        assert_eq!(a.inner().outer_op(), None);
    }

    #[test]
    fn unknown_operation_name_is_none() {
        let ops = OperationTable::standard();
        assert!(ops.find("bogus").is_none());
    }
}
