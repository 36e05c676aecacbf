//! Scopes: the directory-keyed tree of variable/rule containers that
//! mirrors the source/output directory structure (spec.md §3 "Scope",
//! grounded on `libbuild2/scope.hxx`).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bld_schema::path::DirPath;
use bld_schema::variable::VariableId;
use bld_schema::value::Value;

use crate::algorithm::TargetTypeRegistry;
use crate::operation::{MetaOperationTable, OperationTable};
use crate::rule::RuleMap;

/// State only a project root scope carries (spec.md §3: "root_extra" in
/// the original — meta-operation/operation tables, the rule registry, and
/// amalgamation bookkeeping are per-project, not per-scope).
pub struct RootExtra {
    /// The project's declared name, if any (`project = name` in
    /// `bootstrap.build`).
    pub project_name: Option<String>,
    /// This project's source-tree root.
    pub src_root: DirPath,
    /// This project's output-tree root.
    pub out_root: DirPath,
    /// The enclosing amalgamation's root, if this project is a
    /// subproject.
    pub amalgamation: Option<DirPath>,
    /// Operations registered by modules this project has loaded.
    pub operations: RwLock<OperationTable>,
    /// Meta-operations registered by modules this project has loaded.
    pub meta_operations: RwLock<MetaOperationTable>,
    /// Rules registered by modules this project has loaded.
    pub rules: RwLock<RuleMap>,
    /// Target types registered by modules this project has loaded
    /// (`bld-cc`'s `hxx`/`cxx`/`obje`/`exe`/... alongside the engine's
    /// built-ins). A rule's `apply` consults this, via
    /// `crate::scope::ScopeMap::find_root`, to resolve its own
    /// prerequisite list (`crate::algorithm::resolve_prerequisites`).
    pub target_types: RwLock<TargetTypeRegistry>,
}

/// A target-type/pattern-qualified variable block (spec.md §4.2: a
/// buildfile can write `exe{*}: install = bin/` to set a variable only for
/// targets of a given type, optionally narrowed further by a name
/// pattern).
#[derive(Default)]
struct TypePatternVars {
    /// Keyed by `(target type name, glob pattern or "*")`.
    blocks: HashMap<(&'static str, String), HashMap<VariableId, Value>>,
}

/// A node in the scope tree (spec.md §3 "Scope"). Scopes are never
/// removed once created, and the tree is walked by directory-prefix
/// search (see [`ScopeMap::find`]), not by child pointers — a scope does
/// not need to know its children, only its own directory and the global
/// map's ability to find its nearest ancestor.
pub struct Scope {
    /// This scope's output directory — also its key in [`ScopeMap`].
    pub out_dir: DirPath,
    /// This scope's source directory (equal to `out_dir` for an in-tree,
    /// non-out-of-source build).
    pub src_dir: DirPath,
    /// `Some` if this scope is a project root.
    pub root: Option<Arc<RootExtra>>,
    vars: RwLock<HashMap<VariableId, Value>>,
    type_vars: RwLock<TypePatternVars>,
}

impl Scope {
    fn new(out_dir: DirPath, src_dir: DirPath, root: Option<Arc<RootExtra>>) -> Self {
        Self {
            out_dir,
            src_dir,
            root,
            vars: RwLock::new(HashMap::new()),
            type_vars: RwLock::new(TypePatternVars::default()),
        }
    }

    /// Assign a plain (not target-type-qualified) variable directly in
    /// this scope.
    pub fn set(&self, id: VariableId, value: Value) {
        self.vars.write().unwrap().insert(id, value);
    }

    /// This scope's own value for `id`, ignoring ancestors.
    pub fn get_own(&self, id: VariableId) -> Option<Value> {
        self.vars.read().unwrap().get(&id).cloned()
    }

    /// Assign a target-type/pattern-qualified block variable (`exe{*}:
    /// install = ...`).
    pub fn set_typed(
        &self,
        target_type: &'static str,
        pattern: impl Into<String>,
        id: VariableId,
        value: Value,
    ) {
        self.type_vars
            .write()
            .unwrap()
            .blocks
            .entry((target_type, pattern.into()))
            .or_default()
            .insert(id, value);
    }

    /// This scope's type/pattern-qualified value for `id`, for a target of
    /// type `target_type` named `name`, ignoring ancestors. Consults every
    /// block whose type matches (walking the type's base chain) and whose
    /// pattern matches `name`, preferring the most specific (exact type
    /// over base type; non-wildcard pattern over `*`).
    pub fn get_own_typed(
        &self,
        target_type: &crate::target::TargetType,
        name: &str,
        id: VariableId,
    ) -> Option<Value> {
        let guard = self.type_vars.read().unwrap();
        let mut best: Option<(bool, &HashMap<VariableId, Value>)> = None;
        for ((tn, pattern), block) in &guard.blocks {
            if !target_type.is_a_named(tn) {
                continue;
            }
            let exact_type = *tn == target_type.name;
            let matches = pattern == "*" || glob_match(pattern, name);
            if !matches {
                continue;
            }
            if block.contains_key(&id) {
                let specificity = exact_type && pattern != "*";
                if best.is_none() || (specificity && !best.unwrap().0) {
                    best = Some((specificity, block));
                }
            }
        }
        best.and_then(|(_, block)| block.get(&id).cloned())
    }
}

/// Minimal glob match supporting a single trailing `*` (the common
/// `name-*` buildfile pattern); anything else falls back to exact match.
fn glob_match(pattern: &str, name: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        name.starts_with(prefix)
    } else {
        pattern == name
    }
}

impl crate::target::TargetType {
    /// Name-based `is_a` for use where only a `&'static str` type name is
    /// on hand (variable-block matching stores type names, not `&'static
    /// TargetType` pointers, since blocks are parsed before every type in
    /// a module is necessarily registered).
    pub fn is_a_named(&self, name: &str) -> bool {
        let mut cur: &crate::target::TargetType = self;
        loop {
            if cur.name == name {
                return true;
            }
            match cur.base {
                Some(b) => cur = b,
                None => return false,
            }
        }
    }
}

/// The grow-only, directory-prefix-searchable tree of all scopes in a
/// build (spec.md §4.2 "Scope chain"). Scopes are inserted once (during
/// load) and never removed; lookups are safe to run concurrently with
/// insertion of scopes at *different* keys, but this engine only ever
/// inserts scopes during the single-threaded load phase.
#[derive(Default)]
pub struct ScopeMap {
    scopes: RwLock<HashMap<DirPath, Arc<Scope>>>,
}

impl ScopeMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the global root scope (out_dir == src_dir == the process's
    /// root sentinel), if not already present, and return it.
    pub fn global_root(&self) -> Arc<Scope> {
        let key = DirPath::root_sentinel();
        if let Some(s) = self.scopes.read().unwrap().get(&key) {
            return s.clone();
        }
        let mut map = self.scopes.write().unwrap();
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(Scope::new(key.clone(), key, None)))
            .clone()
    }

    /// Insert a new scope rooted at `out_dir`/`src_dir`, returning the
    /// existing one if `out_dir` is already mapped.
    pub fn insert(
        &self,
        out_dir: DirPath,
        src_dir: DirPath,
        root: Option<Arc<RootExtra>>,
    ) -> Arc<Scope> {
        let mut map = self.scopes.write().unwrap();
        if let Some(s) = map.get(&out_dir) {
            return s.clone();
        }
        let s = Arc::new(Scope::new(out_dir.clone(), src_dir, root));
        map.insert(out_dir, s.clone());
        s
    }

    /// Find the scope whose `out_dir` is the longest prefix of `dir`
    /// (spec.md §4.2: "walking up the scope chain"). Always resolves —
    /// the global root scope (inserted by [`ScopeMap::global_root`] at
    /// context construction) is a prefix of everything.
    pub fn find(&self, dir: &DirPath) -> Arc<Scope> {
        let guard = self.scopes.read().unwrap();
        let mut cur = dir.clone();
        loop {
            if let Some(s) = guard.get(&cur) {
                return s.clone();
            }
            match cur.parent() {
                Some(p) => cur = p,
                None => {
                    drop(guard);
                    return self.global_root();
                }
            }
        }
    }

    /// The nearest *root* scope at or above `dir` — the project that
    /// `dir` belongs to (spec.md §3 "Scope": "the nearest ancestor scope
    /// that is a project root").
    pub fn find_root(&self, dir: &DirPath) -> Arc<Scope> {
        let mut s = self.find(dir);
        loop {
            if s.root.is_some() {
                return s;
            }
            match s.out_dir.parent() {
                Some(p) => s = self.find(&p),
                None => return s,
            }
        }
    }
}

/// Walk from `scope` up through ancestors (by directory prefix, via
/// `map`), yielding each scope including `scope` itself, innermost first.
/// This is the "walking up the scope chain" traversal spec.md §4.2
/// describes for target-type/pattern variable lookup and for plain
/// variable fallback.
pub fn ancestors(map: &ScopeMap, scope: &Arc<Scope>) -> Vec<Arc<Scope>> {
    let mut chain = vec![scope.clone()];
    loop {
        let last = chain.last().unwrap().clone();
        let Some(dir) = last.out_dir.parent() else { break };
        let next = map.find(&dir);
        if Arc::ptr_eq(&next, &last) {
            break;
        }
        chain.push(next);
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_resolves_to_nearest_ancestor() {
        let map = ScopeMap::new();
        let _global = map.global_root();
        let sub = map.insert(DirPath::new("proj"), DirPath::new("proj"), None);
        let found = map.find(&DirPath::new("proj/src"));
        assert!(Arc::ptr_eq(&found, &sub));
    }

    #[test]
    fn find_falls_back_to_global_root() {
        let map = ScopeMap::new();
        let global = map.global_root();
        let found = map.find(&DirPath::new("nowhere/near/anything"));
        assert!(Arc::ptr_eq(&found, &global));
    }

    #[test]
    fn typed_lookup_prefers_exact_type_and_pattern() {
        let scope = Scope::new(DirPath::new("p"), DirPath::new("p"), None);
        use crate::target::FILE;
        let mut pool = bld_schema::variable::VariablePool::new();
        let var = pool.insert("install");
        scope.set_typed("file", "*", var, Value::String("wild".into()));
        scope.set_typed("file", "foo", var, Value::String("exact".into()));
        let got = scope.get_own_typed(&FILE, "foo", var);
        assert_eq!(got, Some(Value::String("exact".into())));
    }
}
