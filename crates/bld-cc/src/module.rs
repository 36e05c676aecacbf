//! The `using cc`/`using cxx` module hook (spec.md §3 "Module"), grounded
//! on `libbuild2/cc/init.cxx`'s `boot`/`init` entry points: register this
//! module's target types and compile/link rules into the project the
//! `using` directive appears in, probing the toolchain exactly once per
//! project.

use std::sync::Arc;

use bld_core::algorithm::TargetTypeRegistry;
use bld_core::context::Context;
use bld_core::loader::{LoadError, ModuleInit};
use bld_core::operation::{meta, op};
use bld_core::scope::Scope;

use crate::compile::CompileRule;
use crate::link::LinkRule;
use crate::target_types;
use crate::toolchain::{self, Toolchain};

/// The registered `using cc`/`using cxx` module: probes a toolchain on
/// first `init` and wires the compile/link rules to it. Reduced scope
/// per spec.md's out-of-scope paragraph: one toolchain per project, no
/// per-target-type compiler override.
pub struct CcModule {
    /// Compiler driver name or path to probe (`c++`, `clang++`, an
    /// absolute override from `config.cc`).
    pub compiler: String,
}

impl CcModule {
    /// A module that probes the default `c++` driver on `PATH`.
    pub fn new() -> Self {
        Self { compiler: "c++".to_string() }
    }

    /// A module that probes an explicit compiler driver or path.
    pub fn with_compiler(compiler: impl Into<String>) -> Self {
        Self { compiler: compiler.into() }
    }
}

impl Default for CcModule {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleInit for CcModule {
    fn init(
        &self,
        ctx: &Arc<Context>,
        scope: &Arc<Scope>,
        registry: &mut TargetTypeRegistry,
    ) -> Result<(), LoadError> {
        target_types::register(registry);

        let toolchain: Arc<Toolchain> =
            Arc::new(toolchain::probe(&self.compiler).map_err(|e| LoadError::ModuleInit(e.to_string()))?);
        tracing::debug!(
            target: "bld_cc::module",
            compiler = %toolchain.path.display(),
            version = %toolchain.version,
            "probed c/c++ toolchain"
        );

        let root = ctx.scope_map.find_root(&scope.out_dir);
        let Some(root_extra) = root.root.clone() else {
            return Err(LoadError::ModuleInit(format!("{} is outside any project", scope.out_dir)));
        };

        let mut rules = root_extra.rules.write().unwrap();
        let compile = Arc::new(CompileRule::new(toolchain.clone()));
        let link = Arc::new(LinkRule::new(toolchain));
        rules.register("perform", "", target_types::OBJE.name, compile);
        rules.register("perform", "", target_types::EXE.name, link.clone());
        rules.register("perform", "", target_types::LIBA.name, link.clone());
        rules.register("perform", "", target_types::LIBS.name, link);
        drop(rules);

        let mut ops = root_extra.operations.write().unwrap();
        if ops.find("update").is_none() {
            *ops = bld_core::operation::OperationTable::standard();
        }
        drop(ops);
        let mut metas = root_extra.meta_operations.write().unwrap();
        if metas.find("perform").is_none() {
            *metas = bld_core::operation::MetaOperationTable::standard();
        }
        drop(metas);
        let _ = (meta::PERFORM, op::UPDATE);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bld_schema::path::DirPath;

    #[test]
    fn missing_compiler_surfaces_as_module_init_error() {
        let module = CcModule::with_compiler("definitely-not-a-real-compiler-xyz");
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ctx = Context::new(DirPath::new("/work"));
            let root_extra = Arc::new(bld_core::scope::RootExtra {
                project_name: None,
                src_root: DirPath::new("/work"),
                out_root: DirPath::new("/work"),
                amalgamation: None,
                operations: std::sync::RwLock::new(bld_core::operation::OperationTable::standard()),
                meta_operations: std::sync::RwLock::new(bld_core::operation::MetaOperationTable::standard()),
                rules: std::sync::RwLock::new(bld_core::rule::RuleMap::new()),
                target_types: std::sync::RwLock::new(TargetTypeRegistry::standard()),
            });
            let scope = ctx.scope_map.insert(DirPath::new("proj"), DirPath::new("proj"), Some(root_extra));
            let mut registry = TargetTypeRegistry::standard();
            let err = module.init(&ctx, &scope, &mut registry).unwrap_err();
            assert!(matches!(err, LoadError::ModuleInit(_)));
        });
    }
}
