//! `configure`/`disfigure` persistence (spec.md §3 "Meta-operation":
//! "configure records the decisions it makes in a per-project
//! configuration file; disfigure removes it").
//!
//! `config.build` is a small buildfile-shaped TOML-like store written
//! with `toml_edit` rather than plain `toml` so that hand-edits a
//! developer makes to the file between `configure` runs survive
//! untouched (their comments and key ordering are preserved, matching the
//! original's own "configure is an idempotent merge, not an overwrite"
//! behavior).

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bld_schema::value::Value;
use toml_edit::{DocumentMut, Item};

/// The on-disk configuration file name, relative to a project's output
/// root.
pub const CONFIG_FILE_NAME: &str = "config.build";

/// Error loading or saving a project's configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Filesystem I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The file's contents could not be parsed as TOML.
    #[error("{path}: {source}")]
    Parse {
        /// The offending file.
        path: PathBuf,
        #[source]
        source: toml_edit::TomlError,
    },
}

/// A project's persisted configuration (spec.md §3 "Meta-operation"
/// `configure`).
pub struct Config {
    path: PathBuf,
    doc: DocumentMut,
}

impl Config {
    /// Load `out_root/config.build`, or start an empty document if it
    /// does not exist yet (the state before a project's first
    /// `configure`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] on a read failure other than "not
    /// found", or [`ConfigError::Parse`] if the file is not valid TOML.
    pub fn load(out_root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = out_root.as_ref().join(CONFIG_FILE_NAME);
        let doc = match fs::read_to_string(&path) {
            Ok(text) => text
                .parse::<DocumentMut>()
                .map_err(|source| ConfigError::Parse { path: path.clone(), source })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => DocumentMut::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, doc })
    }

    /// `true` if this project has never been configured (no file existed
    /// at [`Config::load`] time).
    pub fn is_new(&self) -> bool {
        self.doc.as_table().is_empty()
    }

    /// Record (or update) one configuration variable's value, under its
    /// dotted name (`config.cxx.std`). Existing comments/formatting for
    /// keys that are not touched are preserved by `toml_edit`.
    pub fn set(&mut self, name: &str, value: &Value) {
        let mut table = self.doc.as_table_mut();
        let mut parts = name.split('.').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                table[part] = Item::Value(value_to_toml(value));
            } else {
                if !table.contains_key(part) || !table[part].is_table_like() {
                    table[part] = Item::Table(toml_edit::Table::new());
                }
                table = table[part].as_table_mut().expect("just ensured table-like");
            }
        }
    }

    /// Read a previously-configured variable back, if present.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut item: &Item = self.doc.as_item();
        for part in name.split('.') {
            item = item.get(part)?;
        }
        toml_to_value(item.as_value()?)
    }

    /// A flat snapshot of every `config.*` entry (used by `info` to
    /// report the current configuration, and by tests).
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        flatten(self.doc.as_item(), String::new(), &mut out);
        out
    }

    /// Persist the document to `out_root/config.build`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] on a write failure.
    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, self.doc.to_string())?;
        Ok(())
    }

    /// `disfigure`: remove the configuration file entirely (spec.md §3
    /// "Meta-operation" `disfigure`). Not an error if it is already
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] on a removal failure other than "not
    /// found".
    pub fn disfigure(out_root: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = out_root.as_ref().join(CONFIG_FILE_NAME);
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn flatten(item: &Item, prefix: String, out: &mut BTreeMap<String, Value>) {
    match item {
        Item::Table(t) => {
            for (k, v) in t.iter() {
                let next = if prefix.is_empty() { k.to_string() } else { format!("{prefix}.{k}") };
                flatten(v, next, out);
            }
        }
        Item::Value(v) => {
            if let Some(value) = toml_to_value(v) {
                out.insert(prefix, value);
            }
        }
        _ => {}
    }
}

fn value_to_toml(value: &Value) -> toml_edit::Value {
    match value {
        Value::Null => toml_edit::Value::from(""),
        Value::Bool(b) => toml_edit::Value::from(*b),
        Value::UInt64(n) => toml_edit::Value::from(*n as i64),
        Value::String(s) => toml_edit::Value::from(s.as_str()),
        Value::Path(p) => toml_edit::Value::from(p.to_string()),
        Value::DirPath(p) => toml_edit::Value::from(p.to_string()),
        Value::Name(n) => toml_edit::Value::from(n.to_string()),
        Value::StringList(ss) => {
            toml_edit::Value::Array(ss.iter().map(|s| s.as_str().into()).collect())
        }
        Value::NameList(ns) => {
            toml_edit::Value::Array(ns.iter().map(|n| n.to_string().into()).collect())
        }
        Value::PathList(ps) => {
            toml_edit::Value::Array(ps.iter().map(|p| p.to_string().into()).collect())
        }
        Value::TargetTriplet(t) => toml_edit::Value::from(t.to_string()),
        Value::ProcessPath(p) => toml_edit::Value::from(p.recall.clone()),
        Value::Json(j) => toml_edit::Value::from(j.to_string()),
    }
}

fn toml_to_value(v: &toml_edit::Value) -> Option<Value> {
    match v {
        toml_edit::Value::String(s) => Some(Value::String(s.value().clone())),
        toml_edit::Value::Integer(n) => Some(Value::UInt64(*n.value() as u64)),
        toml_edit::Value::Boolean(b) => Some(Value::Bool(*b.value())),
        toml_edit::Value::Array(arr) => {
            let strings: Option<Vec<String>> = arr
                .iter()
                .map(|e| e.as_str().map(str::to_string))
                .collect();
            strings.map(Value::StringList)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn set_and_get_round_trips() {
        let dir = tempdir().unwrap();
        let mut cfg = Config::load(dir.path()).unwrap();
        assert!(cfg.is_new());
        cfg.set("config.cxx.std", &Value::String("20".into()));
        cfg.save().unwrap();

        let cfg2 = Config::load(dir.path()).unwrap();
        assert!(!cfg2.is_new());
        assert_eq!(cfg2.get("config.cxx.std"), Some(Value::String("20".into())));
    }

    #[test]
    fn disfigure_removes_the_file() {
        let dir = tempdir().unwrap();
        let mut cfg = Config::load(dir.path()).unwrap();
        cfg.set("config.install.prefix", &Value::String("/usr/local".into()));
        cfg.save().unwrap();
        assert!(dir.path().join(CONFIG_FILE_NAME).exists());

        Config::disfigure(dir.path()).unwrap();
        assert!(!dir.path().join(CONFIG_FILE_NAME).exists());
        // disfiguring an already-absent config is not an error
        Config::disfigure(dir.path()).unwrap();
    }

    #[test]
    fn snapshot_flattens_nested_tables() {
        let dir = tempdir().unwrap();
        let mut cfg = Config::load(dir.path()).unwrap();
        cfg.set("config.cxx.std", &Value::String("20".into()));
        cfg.set("config.cxx.coptions", &Value::StringList(vec!["-O2".into()]));
        let snap = cfg.snapshot();
        assert_eq!(snap.get("config.cxx.std"), Some(&Value::String("20".into())));
        assert_eq!(
            snap.get("config.cxx.coptions"),
            Some(&Value::StringList(vec!["-O2".into()]))
        );
    }
}
