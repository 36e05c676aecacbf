use crate::name::Name;
use crate::path::{DirPath, FilePath};
use std::fmt;

/// A target triplet (`cpu-vendor-os`), used for toolchain/host matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TargetTriplet {
    /// CPU architecture component (`x86_64`, `aarch64`, ...).
    pub cpu: String,
    /// Vendor component (`unknown`, `pc`, `apple`, ...).
    pub vendor: String,
    /// OS/environment component (`linux-gnu`, `darwin`, `windows-msvc`, ...).
    pub system: String,
}

impl fmt::Display for TargetTriplet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.cpu, self.vendor, self.system)
    }
}

/// A resolved process path: the binary that should actually be executed,
/// distinct from the name the user typed (which may need `PATH` search or
/// builtin resolution).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ProcessPath {
    /// The path as it will be invoked (possibly just a bare name relying on
    /// `PATH` lookup at spawn time).
    pub recall: String,
    /// The fully resolved, absolute path, if resolution already happened.
    pub effective: Option<FilePath>,
}

/// The tagged value union described in spec.md §3 ("Value"): `null` plus a
/// typed payload. Every [`crate::variable::Variable`] lookup in the engine
/// ultimately produces one of these (wrapped in a `Lookup` in `bld-core`
/// that also carries provenance).
///
/// Values compose under `+=`/`=+` overrides: [`Value::append`] and
/// [`Value::prepend`] implement that composition for every variant where it
/// is meaningful (scalars do not support it and return an error).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// The null value — distinct from "absent"; a variable can be defined
    /// and null.
    Null,
    /// A boolean.
    Bool(bool),
    /// An unsigned 64-bit integer.
    UInt64(u64),
    /// A string.
    String(String),
    /// A single file path.
    Path(FilePath),
    /// A single directory path.
    DirPath(DirPath),
    /// A single qualified name.
    Name(Name),
    /// A list of names (e.g. a prerequisite list before resolution).
    NameList(Vec<Name>),
    /// A list of strings (the most common list type: compiler flags, etc).
    StringList(Vec<String>),
    /// A vector of paths (e.g. an include-search path list).
    PathList(Vec<FilePath>),
    /// A target triplet.
    TargetTriplet(TargetTriplet),
    /// A resolved process path.
    ProcessPath(ProcessPath),
    /// An arbitrary JSON value (§SPEC_FULL supplement, grounded on
    /// `libbuild2/json.cxx`).
    Json(serde_json::Value),
}

/// Error appending/prepending onto a [`Value`] of an incompatible shape.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValueOpError {
    /// The two values cannot be composed (e.g. appending a string onto a
    /// bool).
    #[error("cannot append/prepend {1} onto a value of type {0}")]
    Incompatible(&'static str, &'static str),
}

impl Value {
    /// A short, stable name for the variant, used in diagnostics and in
    /// [`ValueOpError`].
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::UInt64(_) => "uint64",
            Value::String(_) => "string",
            Value::Path(_) => "path",
            Value::DirPath(_) => "dir_path",
            Value::Name(_) => "name",
            Value::NameList(_) => "name[]",
            Value::StringList(_) => "string[]",
            Value::PathList(_) => "path[]",
            Value::TargetTriplet(_) => "target_triplet",
            Value::ProcessPath(_) => "process_path",
            Value::Json(_) => "json",
        }
    }

    /// `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Append `other` onto `self` in place (`+=` override composition).
    /// `Null += x` takes on `x`'s shape, matching the original's behavior
    /// of treating an as-yet-unset variable as an empty value of whatever
    /// type first gets appended to it.
    ///
    /// # Errors
    ///
    /// Returns [`ValueOpError::Incompatible`] if the two values' shapes
    /// cannot be composed (e.g. a string list appended to a bool).
    pub fn append(&mut self, other: Value) -> Result<(), ValueOpError> {
        if matches!(self, Value::Null) {
            *self = other;
            return Ok(());
        }
        match (self, other) {
            (Value::String(a), Value::String(b)) => {
                a.push(' ');
                a.push_str(&b);
                Ok(())
            }
            (Value::StringList(a), Value::StringList(b)) => {
                a.extend(b);
                Ok(())
            }
            (Value::StringList(a), Value::String(b)) => {
                a.push(b);
                Ok(())
            }
            (Value::NameList(a), Value::NameList(b)) => {
                a.extend(b);
                Ok(())
            }
            (Value::NameList(a), Value::Name(b)) => {
                a.push(b);
                Ok(())
            }
            (Value::PathList(a), Value::PathList(b)) => {
                a.extend(b);
                Ok(())
            }
            (a, b) => Err(ValueOpError::Incompatible(a.type_name(), b.type_name())),
        }
    }

    /// Prepend `other` onto `self` (`=+` override composition). See
    /// [`Value::append`] for the composition rules; this differs only in
    /// insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`ValueOpError::Incompatible`] under the same conditions as
    /// [`Value::append`].
    pub fn prepend(&mut self, other: Value) -> Result<(), ValueOpError> {
        if matches!(self, Value::Null) {
            *self = other;
            return Ok(());
        }
        match (self, other) {
            (Value::String(a), Value::String(b)) => {
                *a = format!("{b} {a}");
                Ok(())
            }
            (Value::StringList(a), Value::StringList(mut b)) => {
                b.extend(a.drain(..));
                *a = b;
                Ok(())
            }
            (Value::StringList(a), Value::String(b)) => {
                a.insert(0, b);
                Ok(())
            }
            (Value::NameList(a), Value::NameList(mut b)) => {
                b.extend(a.drain(..));
                *a = b;
                Ok(())
            }
            (Value::PathList(a), Value::PathList(mut b)) => {
                b.extend(a.drain(..));
                *a = b;
                Ok(())
            }
            (a, b) => Err(ValueOpError::Incompatible(a.type_name(), b.type_name())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "[null]"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::UInt64(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Path(p) => write!(f, "{p}"),
            Value::DirPath(p) => write!(f, "{p}"),
            Value::Name(n) => write!(f, "{n}"),
            Value::NameList(ns) => {
                let parts: Vec<String> = ns.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(" "))
            }
            Value::StringList(ss) => write!(f, "{}", ss.join(" ")),
            Value::PathList(ps) => {
                let parts: Vec<String> = ps.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(" "))
            }
            Value::TargetTriplet(t) => write!(f, "{t}"),
            Value::ProcessPath(p) => write!(f, "{}", p.recall),
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_onto_null_takes_the_new_shape() {
        let mut v = Value::Null;
        v.append(Value::StringList(vec!["a".into()])).unwrap();
        assert_eq!(v, Value::StringList(vec!["a".into()]));
    }

    #[test]
    fn append_string_concatenates_with_space() {
        let mut v = Value::String("1".into());
        v.append(Value::String("2".into())).unwrap();
        assert_eq!(v, Value::String("1 2".into()));
    }

    #[test]
    fn prepend_string_list_preserves_order() {
        let mut v = Value::StringList(vec!["b".into(), "c".into()]);
        v.prepend(Value::StringList(vec!["a".into()])).unwrap();
        assert_eq!(v, Value::StringList(vec!["a".into(), "b".into(), "c".into()]));
    }

    #[test]
    fn incompatible_append_is_an_error() {
        let mut v = Value::Bool(true);
        let err = v.append(Value::String("x".into())).unwrap_err();
        assert_eq!(err, ValueOpError::Incompatible("bool", "string"));
    }

    #[test]
    fn json_round_trips_through_serde() {
        let v = Value::Json(serde_json::json!({"a": 1}));
        let s = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&s).unwrap();
        assert_eq!(v, back);
    }
}
