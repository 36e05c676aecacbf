//! Walks a parsed buildfile AST against a [`Context`]'s scope/target
//! graph — the evaluator half of spec.md §4.1 that `crate::parser` does
//! not itself provide (the parser only produces a `Statement` tree;
//! something still has to execute it against live scopes during the load
//! phase). Grounded on `libbuild2/parser.cxx`'s statement-execution loop,
//! as distinct from `libbuild2/parser.hxx`'s grammar-only declarations
//! (which `crate::parser` already covers).

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use bld_schema::name::Name;
use bld_schema::value::Value as SchemaValue;

use crate::algorithm::{SearchError, TargetTypeRegistry};
use crate::context::Context;
use crate::functions::{FunctionError, FunctionTable};
use crate::parser::{self, AssignOp, ParseError, Statement, Value as AstValue, ValuePart};
use crate::scope::Scope;
use crate::target::{DeclKind, Prerequisite, TargetKey, FILE};

/// A module's load-time hook (spec.md §3 "Module": `using cxx` runs a
/// module's init before the rest of the buildfile that named it continues
/// loading). `bld-cc`/`bld-script` each register one of these under the
/// module name(s) they provide.
pub trait ModuleInit: Send + Sync {
    /// Register this module's target types/rules/operations into the
    /// project the using scope belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] if the module cannot initialize itself (a
    /// missing toolchain, for `bld-cc`).
    fn init(
        &self,
        ctx: &Arc<Context>,
        scope: &Arc<Scope>,
        registry: &mut TargetTypeRegistry,
    ) -> Result<(), LoadError>;
}

/// The set of modules a driver has made available to `using` directives
/// (spec.md §3 "Module").
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn ModuleInit>>,
}

impl ModuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `module` loadable under `name` (e.g. `"cxx"`, `"test"`).
    pub fn register(&mut self, name: impl Into<String>, module: Arc<dyn ModuleInit>) {
        self.modules.insert(name.into(), module);
    }
}

/// Error evaluating a buildfile against a scope/target graph.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The buildfile text itself did not parse.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// A target/prerequisite name was malformed.
    #[error(transparent)]
    Name(#[from] bld_schema::name::NameParseError),
    /// A prerequisite or target named an unregistered target type.
    #[error(transparent)]
    Search(#[from] SearchError),
    /// A `$(...)` call failed.
    #[error(transparent)]
    Function(#[from] FunctionError),
    /// An append/prepend composed two incompatible value shapes.
    #[error(transparent)]
    ValueOp(#[from] bld_schema::value::ValueOpError),
    /// Reading an `include`d file failed.
    #[error("reading {path}: {source}")]
    Include {
        /// The file that could not be read.
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// `using` named a module this driver did not register.
    #[error("unknown module `{0}`")]
    UnknownModule(String),
    /// A dependency declaration's target or prerequisite named a target
    /// type not known to the project's [`TargetTypeRegistry`].
    #[error("no target type registered for `{0}`")]
    UnknownTargetType(String),
    /// A [`ModuleInit`] failed (a missing toolchain, for `bld-cc`).
    #[error("module init failed: {0}")]
    ModuleInit(String),
    /// A wildcard prerequisite name's pattern was malformed, or matched no
    /// files on disk (spec.md §4.1: "name generation supports wildcard
    /// expansion relative to a base directory and a target-type hint").
    #[error("wildcard prerequisite `{0}`: {1}")]
    Wildcard(String, String),
}

/// One buildfile's evaluation state: the project-wide pieces (context,
/// type registry, function library, module registry) plus whatever
/// loop-local variable bindings are in scope (spec.md §4.1: `for`
/// introduces a binding local to its body, not a new [`Scope`]).
pub struct Loader<'a> {
    ctx: &'a Arc<Context>,
    registry: &'a mut TargetTypeRegistry,
    functions: &'a FunctionTable,
    modules: &'a ModuleRegistry,
    locals: HashMap<String, SchemaValue>,
}

impl<'a> Loader<'a> {
    /// Build a loader over the given project-wide tables.
    pub fn new(
        ctx: &'a Arc<Context>,
        registry: &'a mut TargetTypeRegistry,
        functions: &'a FunctionTable,
        modules: &'a ModuleRegistry,
    ) -> Self {
        Self { ctx, registry, functions, modules, locals: HashMap::new() }
    }

    /// Parse `text` and evaluate it against `scope`, mutating the
    /// project's scope/target graph as dependency declarations,
    /// assignments, and directives are encountered.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] on the first parse or evaluation failure.
    pub fn load_buildfile(&mut self, scope: &Arc<Scope>, text: &str) -> Result<(), LoadError> {
        let statements = parser::parse_buildfile(text)?;
        self.exec_statements(scope, &statements)
    }

    fn exec_statements(&mut self, scope: &Arc<Scope>, statements: &[Statement]) -> Result<(), LoadError> {
        for stmt in statements {
            self.exec_statement(scope, stmt)?;
        }
        Ok(())
    }

    fn exec_statement(&mut self, scope: &Arc<Scope>, stmt: &Statement) -> Result<(), LoadError> {
        match stmt {
            Statement::Assignment { name, op, value } => {
                let rhs = self.eval_value(scope, value)?;
                self.assign(scope, name, *op, rhs)?;
            }
            Statement::Dependency { targets, prerequisites, block } => {
                for target_value in targets {
                    self.declare_target(scope, target_value, prerequisites, block)?;
                }
            }
            Statement::ScopeBlock { directory, body } => {
                let dir_text = self.flatten_to_string(scope, directory)?;
                let out_dir = scope.out_dir.join(&dir_text);
                let src_dir = scope.src_dir.join(&dir_text);
                let child = self.ctx.scope_map.insert(out_dir, src_dir, None);
                self.exec_statements(&child, body)?;
            }
            Statement::If { branches, else_branch } => {
                for (cond, body) in branches {
                    if self.eval_condition(scope, cond)? {
                        return self.exec_statements(scope, body);
                    }
                }
                if let Some(body) = else_branch {
                    self.exec_statements(scope, body)?;
                }
            }
            Statement::For { var, list, body } => {
                let items = self.eval_list(scope, list)?;
                for item in items {
                    let saved = self.locals.insert(var.clone(), item);
                    self.exec_statements(scope, body)?;
                    match saved {
                        Some(prev) => {
                            self.locals.insert(var.clone(), prev);
                        }
                        None => {
                            self.locals.remove(var);
                        }
                    }
                }
            }
            Statement::Import { value, optional } => {
                match self.flatten_to_string(scope, value) {
                    Ok(text) => {
                        tracing::debug!(target: "bld_core::loader", import = %text, "import recorded (no cross-project resolution)");
                    }
                    Err(e) if *optional => {
                        tracing::debug!(target: "bld_core::loader", error = %e, "optional import failed, ignored");
                    }
                    Err(e) => return Err(e),
                }
            }
            Statement::Using { module } => {
                let Some(m) = self.modules_find(module) else {
                    return Err(LoadError::UnknownModule(module.clone()));
                };
                m.init(self.ctx, scope, self.registry)?;
            }
            Statement::Include { path } => {
                let path_text = self.flatten_to_string(scope, path)?;
                let full = scope.src_dir.join(&path_text);
                let text = fs::read_to_string(full.as_path())
                    .map_err(|source| LoadError::Include { path: path_text, source })?;
                self.load_buildfile(scope, &text)?;
            }
        }
        Ok(())
    }

    fn modules_find(&self, name: &str) -> Option<Arc<dyn ModuleInit>> {
        self.modules.modules.get(name).cloned()
    }

    /// Declare one target named by `target_value` (spec.md §3 "Target"):
    /// resolve its type/name/directory, intern it, attach its unresolved
    /// prerequisite list, and apply any per-target variable assignments
    /// from `block`.
    fn declare_target(
        &mut self,
        scope: &Arc<Scope>,
        target_value: &AstValue,
        prerequisite_values: &[AstValue],
        block: &[Statement],
    ) -> Result<(), LoadError> {
        let text = self.flatten_to_string(scope, target_value)?;
        let name = Name::parse(&text)?;
        let target_type = match &name.target_type {
            Some(t) => self
                .registry
                .find(t)
                .ok_or_else(|| LoadError::UnknownTargetType(t.clone()))?,
            None => &FILE,
        };
        let dir = name.directory.clone().unwrap_or_default();
        let out_dir = scope.out_dir.join(dir);
        let extension = if target_type.is_dir {
            None
        } else {
            Some(name.extension.clone().unwrap_or_else(|| {
                target_type.default_extension.map(str::to_string).unwrap_or_default()
            }))
        };
        let key = TargetKey {
            type_name: target_type.name,
            out_dir,
            src_dir: None,
            name: name.value.clone(),
            extension,
        };
        let (target, _created) = self.ctx.target_set.insert(key, target_type, DeclKind::Real);

        let mut prereqs = Vec::with_capacity(prerequisite_values.len());
        for pv in prerequisite_values {
            let ptext = self.flatten_to_string(scope, pv)?;
            let pname = Name::parse(&ptext)?;
            if is_wildcard_value(&pname.value) {
                for expanded in expand_wildcard_name(scope, &pname)? {
                    prereqs.push(prerequisite_from_name(&expanded));
                }
            } else {
                prereqs.push(prerequisite_from_name(&pname));
            }
        }
        *target.prerequisites.write().unwrap() = prereqs;

        for stmt in block {
            if let Statement::Assignment { name: var_name, op, value } = stmt {
                let rhs = self.eval_value(scope, value)?;
                let id = self.ctx.var_pool.write().unwrap().insert(var_name.clone());
                let mut existing = scope
                    .get_own_typed(target_type, &target.key.name, id)
                    .unwrap_or(SchemaValue::Null);
                compose(&mut existing, *op, rhs)?;
                scope.set_typed(target_type.name, target.key.name.clone(), id, existing);
            }
        }
        Ok(())
    }

    fn assign(&mut self, scope: &Arc<Scope>, name: &str, op: AssignOp, rhs: SchemaValue) -> Result<(), LoadError> {
        let id = self.ctx.var_pool.write().unwrap().insert(name);
        let mut existing = scope.get_own(id).unwrap_or(SchemaValue::Null);
        compose(&mut existing, op, rhs)?;
        scope.set(id, existing);
        Ok(())
    }

    /// Look up `name`, walking from `scope` up through its ancestors
    /// (spec.md §4.2 "Scope chain"), falling back to an empty-list local
    /// loop binding if one is in effect. Once the scope-chain value is
    /// found, any override shadows registered for the variable are applied
    /// on top, narrowest-declared composing last (spec.md §4.2: "apply
    /// overrides ... producing the effective value").
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::ValueOp`] if an `+=`/`=+` override's shape is
    /// incompatible with the value it composes onto.
    fn lookup(&self, scope: &Arc<Scope>, name: &str) -> Result<SchemaValue, LoadError> {
        if let Some(v) = self.locals.get(name) {
            return Ok(v.clone());
        }
        let Some(id) = self.ctx.var_pool.read().unwrap().find(name).map(|v| v.id) else {
            return Ok(SchemaValue::Null);
        };
        let mut value = SchemaValue::Null;
        for s in crate::scope::ancestors(&self.ctx.scope_map, scope) {
            if let Some(v) = s.get_own(id) {
                value = v;
                break;
            }
        }
        let pool = self.ctx.var_pool.read().unwrap();
        for shadow in pool.overrides_of(id) {
            if !override_applies(shadow, scope) {
                continue;
            }
            apply_override(&mut value, shadow)?;
        }
        Ok(value)
    }

    fn eval_part(&self, scope: &Arc<Scope>, part: &ValuePart) -> Result<SchemaValue, LoadError> {
        match part {
            ValuePart::Literal(text) => Ok(SchemaValue::String(text.clone())),
            ValuePart::VarRef(name) => self.lookup(scope, name),
            ValuePart::Eval(expr) => self.eval_call(expr),
        }
    }

    /// Evaluate `$(name arg1, arg2, ...)` text against the function
    /// table. Arguments are themselves plain literal/variable text (not
    /// recursively re-lexed) — nested calls are written as the function's
    /// own argument grammar handles them (e.g. `regex.replace` takes three
    /// plain strings), matching the subset of the original's `eval`
    /// grammar this engine's function library actually needs.
    fn eval_call(&self, expr: &str) -> Result<SchemaValue, LoadError> {
        let mut it = expr.splitn(2, char::is_whitespace);
        let name = it.next().unwrap_or_default().trim();
        let rest = it.next().unwrap_or_default().trim();
        let args: Vec<SchemaValue> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',').map(|a| SchemaValue::String(a.trim().to_string())).collect()
        };
        let in_load_phase = self.ctx.phase.current() == crate::context::RunPhase::Load;
        Ok(self.functions.call(name, &args, in_load_phase)?)
    }

    /// Evaluate a multi-part value (spec.md §3 "Variable"): a single part
    /// preserves its own type (a `$var` reference keeps being whatever
    /// type that variable holds); more than one part renders each to text
    /// and produces a string list (the common case: a space-separated
    /// flag list built from literal words and substitutions).
    fn eval_value(&self, scope: &Arc<Scope>, value: &AstValue) -> Result<SchemaValue, LoadError> {
        if value.is_empty() {
            return Ok(SchemaValue::Null);
        }
        if value.len() == 1 {
            return self.eval_part(scope, &value[0]);
        }
        let mut out = Vec::with_capacity(value.len());
        for part in value {
            out.push(render(&self.eval_part(scope, part)?));
        }
        Ok(SchemaValue::StringList(out))
    }

    /// Evaluate `value` and render it as a flat list of strings (spec.md
    /// §3 "for"'s iteration source).
    fn eval_list(&self, scope: &Arc<Scope>, value: &AstValue) -> Result<Vec<SchemaValue>, LoadError> {
        match self.eval_value(scope, value)? {
            SchemaValue::StringList(ss) => Ok(ss.into_iter().map(SchemaValue::String).collect()),
            SchemaValue::NameList(ns) => Ok(ns.into_iter().map(SchemaValue::Name).collect()),
            SchemaValue::PathList(ps) => Ok(ps.into_iter().map(SchemaValue::Path).collect()),
            SchemaValue::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }

    fn flatten_to_string(&self, scope: &Arc<Scope>, value: &AstValue) -> Result<String, LoadError> {
        Ok(render(&self.eval_value(scope, value)?))
    }

    /// Evaluate an `if`/`elif` condition's raw text (spec.md §3 "if"):
    /// `true`/`false` literally, a `$name` reference (truthy unless
    /// `Null`, `false`, empty string, or an empty list), or a `$(...)`
    /// function call rendered the same way.
    fn eval_condition(&self, scope: &Arc<Scope>, text: &str) -> Result<bool, LoadError> {
        let text = text.trim();
        if text == "true" {
            return Ok(true);
        }
        if text == "false" {
            return Ok(false);
        }
        let value = if let Some(inner) = text.strip_prefix("$(").and_then(|s| s.strip_suffix(')')) {
            self.eval_call(inner)?
        } else if let Some(name) = text.strip_prefix('$') {
            self.lookup(scope, name)?
        } else {
            SchemaValue::String(text.to_string())
        };
        Ok(is_truthy(&value))
    }
}

fn is_truthy(v: &SchemaValue) -> bool {
    match v {
        SchemaValue::Null => false,
        SchemaValue::Bool(b) => *b,
        SchemaValue::String(s) => !s.is_empty(),
        SchemaValue::StringList(ss) => !ss.is_empty(),
        SchemaValue::NameList(ns) => !ns.is_empty(),
        SchemaValue::PathList(ps) => !ps.is_empty(),
        _ => true,
    }
}

fn render(v: &SchemaValue) -> String {
    v.to_string()
}

fn compose(existing: &mut SchemaValue, op: AssignOp, rhs: SchemaValue) -> Result<(), LoadError> {
    match op {
        AssignOp::Assign => *existing = rhs,
        AssignOp::Append => existing.append(rhs)?,
        AssignOp::Prepend => existing.prepend(rhs)?,
    }
    Ok(())
}

/// `true` if `shadow` is visible from a lookup started at `scope` (spec.md
/// §4.2 "if its visibility encompasses the lookup scope"). `Global` and
/// `Project` both apply everywhere in this engine, which only ever builds
/// one project per process invocation; `Scope` narrows to the recorded
/// out-directory prefix, if one was given.
fn override_applies(shadow: &bld_schema::variable::OverrideShadow, scope: &Arc<Scope>) -> bool {
    use bld_schema::variable::OverrideVisibility;
    match shadow.visibility {
        OverrideVisibility::Global | OverrideVisibility::Project => true,
        OverrideVisibility::Scope => shadow
            .scope
            .as_ref()
            .map_or(true, |prefix| prefix.is_prefix_of(&scope.out_dir)),
        OverrideVisibility::Target | OverrideVisibility::Prerequisite => false,
    }
}

/// Compose `shadow`'s unparsed text onto `existing` (spec.md §4.2:
/// replace/append/prepend per the override's kind). The text is treated as
/// a plain string — the same representation a bare buildfile assignment's
/// right-hand side renders to before any type-tag coercion — since the CLI
/// and default-options files only ever produce scalar or whitespace-joined
/// overrides.
fn apply_override(
    existing: &mut SchemaValue,
    shadow: &bld_schema::variable::OverrideShadow,
) -> Result<(), LoadError> {
    use bld_schema::variable::OverrideKind;
    let rhs = SchemaValue::String(shadow.text.clone());
    match shadow.kind {
        OverrideKind::Assign => *existing = rhs,
        OverrideKind::Append => existing.append(rhs)?,
        OverrideKind::Prepend => existing.prepend(rhs)?,
    }
    Ok(())
}

/// `true` if a name's bare value carries a glob metacharacter (spec.md
/// §4.1 "name generation supports wildcard expansion").
fn is_wildcard_value(value: &str) -> bool {
    value.contains(['*', '?', '['])
}

/// Expand a wildcard prerequisite name (e.g. `*.cxx`, `gen/*.?xx`) against
/// `scope`'s source directory, producing one concrete [`Name`] per
/// matching file (spec.md §4.1: "relative to a base directory and a
/// target-type hint" — the base directory is the declaring scope's
/// `src_dir`, and the hint is the pattern's own `target_type`/extension,
/// both carried over onto every match unchanged).
///
/// # Errors
///
/// Returns [`LoadError::Wildcard`] if the pattern itself is malformed, or
/// if it matches no files — an empty expansion is almost always a typo
/// rather than an intentionally empty prerequisite list, so it is treated
/// like any other load-time failure rather than silently producing zero
/// prerequisites.
fn expand_wildcard_name(scope: &Arc<Scope>, pname: &Name) -> Result<Vec<Name>, LoadError> {
    let dir = pname.directory.clone().unwrap_or_default();
    let base = scope.src_dir.join(dir).as_path().to_path_buf();
    let file_pattern = match &pname.extension {
        Some(ext) if !ext.is_empty() => format!("{}.{ext}", pname.value),
        _ => pname.value.clone(),
    };
    let pattern = base.join(&file_pattern);
    let pattern_str = pattern.to_string_lossy().into_owned();

    let paths = glob::glob(&pattern_str)
        .map_err(|e| LoadError::Wildcard(pattern_str.clone(), e.to_string()))?;
    let mut out = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| LoadError::Wildcard(pattern_str.clone(), e.to_string()))?;
        let value = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .or_else(|| pname.extension.clone());
        out.push(Name {
            project: pname.project.clone(),
            directory: pname.directory.clone(),
            target_type: pname.target_type.clone(),
            value,
            extension,
            pair: false,
        });
    }
    if out.is_empty() {
        return Err(LoadError::Wildcard(pattern_str, "matched no files".to_string()));
    }
    Ok(out)
}

/// Build a [`Prerequisite`] from an already-resolved (possibly
/// wildcard-expanded) [`Name`].
fn prerequisite_from_name(name: &Name) -> Prerequisite {
    Prerequisite {
        type_name: name.target_type.clone().map(|t| {
            // Leaked once per distinct prerequisite type name encountered
            // during load; see `crate::algorithm::search_name` for the
            // identical trade-off (a small, bounded set, leaked once at
            // startup rather than threaded through lifetimes).
            Box::leak(t.into_boxed_str()) as &'static str
        }),
        directory: bld_schema::path::DirPath::new(name.directory.clone().unwrap_or_default()),
        name: Name::simple(name.value.clone()),
        project: name.project.clone(),
        local_vars: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bld_schema::path::DirPath;

    fn fresh() -> (Arc<Context>, TargetTypeRegistry, FunctionTable, ModuleRegistry) {
        let ctx = Context::new(DirPath::new("/work"));
        (ctx, TargetTypeRegistry::standard(), FunctionTable::standard(), ModuleRegistry::new())
    }

    #[test]
    fn assignment_sets_a_scope_variable() {
        let (ctx, mut reg, funcs, mods) = fresh();
        let scope = ctx.scope_map.global_root();
        let mut loader = Loader::new(&ctx, &mut reg, &funcs, &mods);
        loader.load_buildfile(&scope, "cxx.std = 20\n").unwrap();
        let id = ctx.var_pool.read().unwrap().find("cxx.std").unwrap().id;
        assert_eq!(scope.get_own(id), Some(SchemaValue::String("20".into())));
    }

    #[test]
    fn append_composes_onto_existing_value() {
        let (ctx, mut reg, funcs, mods) = fresh();
        let scope = ctx.scope_map.global_root();
        let mut loader = Loader::new(&ctx, &mut reg, &funcs, &mods);
        loader
            .load_buildfile(&scope, "cxx.coptions = -O2\ncxx.coptions += -g\n")
            .unwrap();
        let id = ctx.var_pool.read().unwrap().find("cxx.coptions").unwrap().id;
        assert_eq!(scope.get_own(id), Some(SchemaValue::String("-O2 -g".into())));
    }

    #[test]
    fn dependency_declaration_interns_a_typed_target() {
        let (ctx, mut reg, funcs, mods) = fresh();
        let scope = ctx.scope_map.insert(DirPath::new("/work"), DirPath::new("/work"), None);
        let mut loader = Loader::new(&ctx, &mut reg, &funcs, &mods);
        loader.load_buildfile(&scope, "file{hello}: file{hello.in}\n").unwrap();
        let key = TargetKey {
            type_name: "file",
            out_dir: DirPath::new("/work"),
            src_dir: None,
            name: "hello".into(),
            extension: Some(String::new()),
        };
        let target = ctx.target_set.find(&key).expect("target interned");
        assert_eq!(target.prerequisites.read().unwrap().len(), 1);
    }

    #[test]
    fn nested_scope_block_creates_a_child_scope() {
        let (ctx, mut reg, funcs, mods) = fresh();
        let scope = ctx.scope_map.insert(DirPath::new("/work"), DirPath::new("/work"), None);
        let mut loader = Loader::new(&ctx, &mut reg, &funcs, &mods);
        loader.load_buildfile(&scope, "tests/\n{\n  cxx.std = 20\n}\n").unwrap();
        let child = ctx.scope_map.find(&DirPath::new("/work/tests"));
        let id = ctx.var_pool.read().unwrap().find("cxx.std").unwrap().id;
        assert_eq!(child.get_own(id), Some(SchemaValue::String("20".into())));
    }

    #[test]
    fn for_loop_binds_each_item() {
        let (ctx, mut reg, funcs, mods) = fresh();
        let scope = ctx.scope_map.global_root();
        let mut loader = Loader::new(&ctx, &mut reg, &funcs, &mods);
        loader
            .load_buildfile(&scope, "names = a b c\nfor n: $names\n{\n  last = $n\n}\n")
            .unwrap();
        let id = ctx.var_pool.read().unwrap().find("last").unwrap().id;
        assert_eq!(scope.get_own(id), Some(SchemaValue::String("c".into())));
    }

    #[test]
    fn if_statement_picks_the_matching_branch() {
        let (ctx, mut reg, funcs, mods) = fresh();
        let scope = ctx.scope_map.global_root();
        let mut loader = Loader::new(&ctx, &mut reg, &funcs, &mods);
        loader
            .load_buildfile(&scope, "flag = true\nif $flag\n{\n  picked = yes\n}\nelse\n{\n  picked = no\n}\n")
            .unwrap();
        let id = ctx.var_pool.read().unwrap().find("picked").unwrap().id;
        assert_eq!(scope.get_own(id), Some(SchemaValue::String("yes".into())));
    }

    #[test]
    fn using_an_unregistered_module_is_an_error() {
        let (ctx, mut reg, funcs, mods) = fresh();
        let scope = ctx.scope_map.global_root();
        let mut loader = Loader::new(&ctx, &mut reg, &funcs, &mods);
        let err = loader.load_buildfile(&scope, "using nope\n").unwrap_err();
        assert!(matches!(err, LoadError::UnknownModule(_)));
    }

    #[test]
    fn wildcard_prerequisite_expands_against_the_source_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("foo.cxx"), "").unwrap();
        std::fs::write(dir.path().join("bar.cxx"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();

        let (ctx, mut reg, funcs, mods) = fresh();
        let out_dir = DirPath::new(dir.path());
        let scope = ctx.scope_map.insert(out_dir.clone(), out_dir, None);
        let mut loader = Loader::new(&ctx, &mut reg, &funcs, &mods);
        loader.load_buildfile(&scope, "file{hello}: *.cxx\n").unwrap();

        let key = TargetKey {
            type_name: "file",
            out_dir: DirPath::new(dir.path()),
            src_dir: None,
            name: "hello".into(),
            extension: Some(String::new()),
        };
        let target = ctx.target_set.find(&key).expect("target interned");
        let prereqs = target.prerequisites.read().unwrap();
        let mut names: Vec<&str> = prereqs.iter().map(|p| p.name.value.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["bar", "foo"]);
    }

    #[test]
    fn wildcard_prerequisite_with_no_matches_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, mut reg, funcs, mods) = fresh();
        let out_dir = DirPath::new(dir.path());
        let scope = ctx.scope_map.insert(out_dir.clone(), out_dir, None);
        let mut loader = Loader::new(&ctx, &mut reg, &funcs, &mods);
        let err = loader.load_buildfile(&scope, "file{hello}: *.cxx\n").unwrap_err();
        assert!(matches!(err, LoadError::Wildcard(..)));
    }
}
