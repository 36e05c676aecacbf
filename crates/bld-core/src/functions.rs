//! The built-in function library evaluated inside `$(...)` (spec.md §4.3
//! "Functions", supplemented per SPEC_FULL.md §2 with the `regex.*`,
//! `process.*`, and `json.*` families grounded on
//! `libbuild2/functions-regex.cxx`, `libbuild2/functions-process.cxx`, and
//! `libbuild2/json.cxx`).

use std::collections::HashMap;
use std::sync::Arc;

use bld_schema::value::Value;

/// Error evaluating a function call.
#[derive(Debug, thiserror::Error)]
pub enum FunctionError {
    /// No function registered under this name (optionally qualified by a
    /// value-type prefix, e.g. `string.upper`).
    #[error("unknown function `{0}`")]
    Unknown(String),
    /// Wrong number of arguments.
    #[error("{name}: expected {expected} argument(s), got {got}")]
    Arity { name: String, expected: &'static str, got: usize },
    /// An argument had the wrong shape.
    #[error("{name}: {message}")]
    BadArgument { name: String, message: String },
    /// The function is restricted to the load phase (it has a process- or
    /// filesystem-visible side effect that must happen before rules are
    /// matched, per SPEC_FULL.md §2's `process.*` note) and was called
    /// from match or execute.
    #[error("{0}: only callable during the load phase")]
    LoadPhaseOnly(String),
    /// The underlying operation (process spawn, regex compile) failed.
    #[error("{name}: {source}")]
    Failed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A registered function implementation.
type Func = dyn Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync;

/// Whether a function may run outside the load phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseRestriction {
    /// Callable at any time.
    Any,
    /// Load phase only (spawns a process or reads non-dependency-tracked
    /// filesystem state).
    LoadOnly,
}

struct Entry {
    func: Arc<Func>,
    restriction: PhaseRestriction,
}

/// The function registry consulted when evaluating a
/// [`crate::parser::ValuePart::Eval`] node.
#[derive(Default)]
pub struct FunctionTable {
    entries: HashMap<String, Entry>,
}

impl FunctionTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, restriction: PhaseRestriction, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Entry { func: Arc::new(f), restriction });
    }

    /// Call a registered function. `in_load_phase` gates
    /// [`PhaseRestriction::LoadOnly`] functions.
    ///
    /// # Errors
    ///
    /// Returns [`FunctionError::Unknown`] if `name` is not registered,
    /// [`FunctionError::LoadPhaseOnly`] if a load-only function is called
    /// outside the load phase, or whatever the function itself returns.
    pub fn call(
        &self,
        name: &str,
        args: &[Value],
        in_load_phase: bool,
    ) -> Result<Value, FunctionError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| FunctionError::Unknown(name.to_string()))?;
        if entry.restriction == PhaseRestriction::LoadOnly && !in_load_phase {
            return Err(FunctionError::LoadPhaseOnly(name.to_string()));
        }
        (entry.func)(args)
    }

    /// The standard library: string, path, regex, process, and JSON
    /// functions (spec.md §4.3 plus the SPEC_FULL.md §2 supplements).
    pub fn standard() -> Self {
        let mut t = Self::new();
        register_string(&mut t);
        register_path(&mut t);
        register_regex(&mut t);
        register_process(&mut t);
        register_json(&mut t);
        t
    }
}

fn as_string(v: &Value, _name: &str) -> Result<String, FunctionError> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Path(p) => Ok(p.to_string()),
        Value::DirPath(p) => Ok(p.to_string()),
        other => Ok(other.to_string()),
    }
}

fn one_arg<'a>(name: &str, args: &'a [Value]) -> Result<&'a Value, FunctionError> {
    if args.len() != 1 {
        return Err(FunctionError::Arity { name: name.to_string(), expected: "1", got: args.len() });
    }
    Ok(&args[0])
}

fn two_args<'a>(name: &str, args: &'a [Value]) -> Result<(&'a Value, &'a Value), FunctionError> {
    if args.len() != 2 {
        return Err(FunctionError::Arity { name: name.to_string(), expected: "2", got: args.len() });
    }
    Ok((&args[0], &args[1]))
}

fn register_string(t: &mut FunctionTable) {
    t.register("string.upper", PhaseRestriction::Any, |args| {
        let v = one_arg("string.upper", args)?;
        Ok(Value::String(as_string(v, "string.upper")?.to_uppercase()))
    });
    t.register("string.lower", PhaseRestriction::Any, |args| {
        let v = one_arg("string.lower", args)?;
        Ok(Value::String(as_string(v, "string.lower")?.to_lowercase()))
    });
    t.register("string.trim", PhaseRestriction::Any, |args| {
        let v = one_arg("string.trim", args)?;
        Ok(Value::String(as_string(v, "string.trim")?.trim().to_string()))
    });
    t.register("string.size", PhaseRestriction::Any, |args| {
        let v = one_arg("string.size", args)?;
        Ok(Value::UInt64(as_string(v, "string.size")?.chars().count() as u64))
    });
}

fn register_path(t: &mut FunctionTable) {
    use bld_schema::path::FilePath;
    t.register("path.directory", PhaseRestriction::Any, |args| {
        let v = one_arg("path.directory", args)?;
        let p = FilePath::new(as_string(v, "path.directory")?);
        Ok(Value::DirPath(p.directory()))
    });
    t.register("path.leaf", PhaseRestriction::Any, |args| {
        let v = one_arg("path.leaf", args)?;
        let p = FilePath::new(as_string(v, "path.leaf")?);
        Ok(Value::String(p.stem().unwrap_or_default().to_string()))
    });
    t.register("path.extension", PhaseRestriction::Any, |args| {
        let v = one_arg("path.extension", args)?;
        let p = FilePath::new(as_string(v, "path.extension")?);
        Ok(Value::String(p.extension().unwrap_or_default().to_string()))
    });
}

fn register_regex(t: &mut FunctionTable) {
    t.register("regex.match", PhaseRestriction::Any, |args| {
        let (hay, pat) = two_args("regex.match", args)?;
        let hay = as_string(hay, "regex.match")?;
        let pat = as_string(pat, "regex.match")?;
        let re = regex::Regex::new(&pat).map_err(|e| FunctionError::Failed {
            name: "regex.match".into(),
            source: anyhow::anyhow!(e),
        })?;
        Ok(Value::Bool(re.is_match(&hay)))
    });
    t.register("regex.search", PhaseRestriction::Any, |args| {
        let (hay, pat) = two_args("regex.search", args)?;
        let hay = as_string(hay, "regex.search")?;
        let pat = as_string(pat, "regex.search")?;
        let re = regex::Regex::new(&pat).map_err(|e| FunctionError::Failed {
            name: "regex.search".into(),
            source: anyhow::anyhow!(e),
        })?;
        Ok(match re.find(&hay) {
            Some(m) => Value::String(m.as_str().to_string()),
            None => Value::Null,
        })
    });
    t.register("regex.replace", PhaseRestriction::Any, |args| {
        if args.len() != 3 {
            return Err(FunctionError::Arity {
                name: "regex.replace".into(),
                expected: "3",
                got: args.len(),
            });
        }
        let hay = as_string(&args[0], "regex.replace")?;
        let pat = as_string(&args[1], "regex.replace")?;
        let rep = as_string(&args[2], "regex.replace")?;
        let re = regex::Regex::new(&pat).map_err(|e| FunctionError::Failed {
            name: "regex.replace".into(),
            source: anyhow::anyhow!(e),
        })?;
        Ok(Value::String(re.replace_all(&hay, rep.as_str()).into_owned()))
    });
}

fn register_process(t: &mut FunctionTable) {
    // Load-phase-only per SPEC_FULL.md §2: a buildfile may shell out to
    // probe a tool's version or capabilities while deciding how to
    // configure a project, but recipes must express process invocations
    // as part of their dependency-tracked execute-phase work (via
    // `bld-cc`/`bld-script`), not through this function, so the result
    // never silently escapes depdb's change tracking.
    t.register("process.run", PhaseRestriction::LoadOnly, |args| {
        if args.is_empty() {
            return Err(FunctionError::Arity {
                name: "process.run".into(),
                expected: "1+",
                got: 0,
            });
        }
        let mut cmd_args = Vec::with_capacity(args.len());
        for a in args {
            cmd_args.push(as_string(a, "process.run")?);
        }
        let (program, rest) = cmd_args.split_first().unwrap();
        let output = std::process::Command::new(program)
            .args(rest)
            .output()
            .map_err(|e| FunctionError::Failed {
                name: "process.run".into(),
                source: anyhow::Error::new(e),
            })?;
        Ok(Value::String(String::from_utf8_lossy(&output.stdout).trim_end().to_string()))
    });
}

fn register_json(t: &mut FunctionTable) {
    t.register("json.value", PhaseRestriction::Any, |args| {
        let v = one_arg("json.value", args)?;
        let text = as_string(v, "json.value")?;
        let parsed: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| FunctionError::Failed {
                name: "json.value".into(),
                source: anyhow::Error::new(e),
            })?;
        Ok(Value::Json(parsed))
    });
    t.register("json.member", PhaseRestriction::Any, |args| {
        let (obj, key) = two_args("json.member", args)?;
        let Value::Json(j) = obj else {
            return Err(FunctionError::BadArgument {
                name: "json.member".into(),
                message: "expected a json value".into(),
            });
        };
        let key = as_string(key, "json.member")?;
        Ok(match j.get(&key) {
            Some(v) => Value::Json(v.clone()),
            None => Value::Null,
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_upper_roundtrips() {
        let t = FunctionTable::standard();
        let v = t.call("string.upper", &[Value::String("abc".into())], true).unwrap();
        assert_eq!(v, Value::String("ABC".into()));
    }

    #[test]
    fn process_run_is_rejected_outside_load_phase() {
        let t = FunctionTable::standard();
        let err = t.call("process.run", &[Value::String("true".into())], false).unwrap_err();
        assert!(matches!(err, FunctionError::LoadPhaseOnly(_)));
    }

    #[test]
    fn regex_match_reports_boolean() {
        let t = FunctionTable::standard();
        let v = t
            .call(
                "regex.match",
                &[Value::String("hello.cxx".into()), Value::String(r"\.cxx$".into())],
                true,
            )
            .unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn unknown_function_is_an_error() {
        let t = FunctionTable::standard();
        assert!(matches!(
            t.call("nope.nope", &[], true),
            Err(FunctionError::Unknown(_))
        ));
    }

    #[test]
    fn json_member_navigates_object() {
        let t = FunctionTable::standard();
        let parsed = t
            .call("json.value", &[Value::String(r#"{"a": 1}"#.into())], true)
            .unwrap();
        let got = t.call("json.member", &[parsed, Value::String("a".into())], true).unwrap();
        assert_eq!(got, Value::Json(serde_json::json!(1)));
    }
}
