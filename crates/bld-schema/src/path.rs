use std::fmt;
use std::path::{Path, PathBuf};

/// A normalized, comparable directory path.
///
/// Internally stored with no trailing separator (canonical form); [`Display`]
/// adds one back so diagnostics read the way build2-style tools print
/// directories (`out/base/`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirPath(PathBuf);

impl DirPath {
    /// Normalize `p` into a directory path: strip a trailing separator (if
    /// any), collapse `.`/`..` components lexically.
    pub fn new(p: impl Into<PathBuf>) -> Self {
        Self(normalize(p.into()))
    }

    /// Borrow as a plain filesystem path (no trailing separator).
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// `true` if `self` is a (non-strict) prefix of `other` — i.e. `other`
    /// names a location inside `self` or is `self` itself. Used by the
    /// scope map (`bld-core::scope::ScopeMap::find`) to locate the deepest
    /// enclosing scope.
    pub fn is_prefix_of(&self, other: &DirPath) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Join a relative path component, returning a new, normalized
    /// directory path.
    pub fn join(&self, rel: impl AsRef<Path>) -> Self {
        Self::new(self.0.join(rel))
    }

    /// The parent directory, if any (the root has none).
    pub fn parent(&self) -> Option<Self> {
        self.0.parent().map(|p| Self(p.to_path_buf()))
    }

    /// `true` for the distinguished empty path used as the global scope's
    /// key (spec.md §3, §4.3).
    pub fn is_empty(&self) -> bool {
        self.0.as_os_str().is_empty()
    }

    /// The distinguished empty directory path (global scope key).
    pub fn root_sentinel() -> Self {
        Self(PathBuf::new())
    }
}

impl fmt::Display for DirPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.as_os_str().is_empty() {
            write!(f, "./")
        } else {
            write!(f, "{}{}", self.0.display(), std::path::MAIN_SEPARATOR)
        }
    }
}

/// A normalized, comparable file path (never a directory).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FilePath(PathBuf);

impl FilePath {
    /// Normalize `p` into a file path.
    pub fn new(p: impl Into<PathBuf>) -> Self {
        Self(normalize(p.into()))
    }

    /// Borrow as a plain filesystem path.
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// The containing directory.
    pub fn directory(&self) -> DirPath {
        DirPath::new(self.0.parent().unwrap_or_else(|| Path::new("")))
    }

    /// The file's extension, if any (without the leading dot).
    pub fn extension(&self) -> Option<&str> {
        self.0.extension().and_then(|e| e.to_str())
    }

    /// The leaf name without directory or extension.
    pub fn stem(&self) -> Option<&str> {
        self.0.file_stem().and_then(|s| s.to_str())
    }

    /// Returns a new path with `ext` substituted (or appended if there was
    /// none). Used heavily by rules deriving an output name from an input
    /// (e.g. `foo.cxx` -> `foo.o`).
    pub fn with_extension(&self, ext: &str) -> Self {
        Self::new(self.0.with_extension(ext))
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

fn normalize(p: PathBuf) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                if !matches!(out.components().next_back(), None | Some(Component::ParentDir)) {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Monotonic nanosecond timestamp, per spec.md §3.
///
/// Two sentinel values distinguish *nonexistent* (a path that does not
/// exist on disk) from *unknown* (existence not yet probed). Ordinary
/// timestamps compare normally; sentinels always compare as "older than
/// anything real" is not assumed — callers must check [`Timestamp::is_real`]
/// before using a value in arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i128);

impl Timestamp {
    /// Sentinel for "the path does not exist".
    pub const NONEXISTENT: Self = Self(i128::MIN);
    /// Sentinel for "existence/mtime has not been probed yet".
    pub const UNKNOWN: Self = Self(i128::MIN + 1);

    /// Construct from nanoseconds since the Unix epoch.
    pub fn from_nanos_since_epoch(ns: i128) -> Self {
        Self(ns)
    }

    /// `true` unless this is one of the two sentinel values.
    pub fn is_real(self) -> bool {
        self != Self::NONEXISTENT && self != Self::UNKNOWN
    }

    /// Read the mtime of `path` as a `Timestamp`, mapping a missing file to
    /// [`Timestamp::NONEXISTENT`].
    ///
    /// # Errors
    ///
    /// Returns an error for any I/O failure other than "not found".
    pub fn mtime(path: &Path) -> std::io::Result<Self> {
        match std::fs::metadata(path) {
            Ok(meta) => {
                let mtime = meta.modified()?;
                let dur = mtime
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default();
                Ok(Self(dur.as_nanos() as i128))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::NONEXISTENT),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_path_normalizes_trailing_separator() {
        let a = DirPath::new("out/base/");
        let b = DirPath::new("out/base");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), format!("out{}base{}", std::path::MAIN_SEPARATOR, std::path::MAIN_SEPARATOR));
    }

    #[test]
    fn is_prefix_of_matches_ancestors() {
        let root = DirPath::new("");
        let sub = DirPath::new("a/b");
        assert!(root.is_prefix_of(&sub));
        assert!(!sub.is_prefix_of(&root));
        assert!(sub.is_prefix_of(&sub));
    }

    #[test]
    fn file_path_extension_and_stem() {
        let f = FilePath::new("src/foo.cxx");
        assert_eq!(f.extension(), Some("cxx"));
        assert_eq!(f.stem(), Some("foo"));
        assert_eq!(f.with_extension("o").to_string(), "src/foo.o".replace('/', &std::path::MAIN_SEPARATOR.to_string()));
    }

    #[test]
    fn timestamp_sentinels_are_not_real() {
        assert!(!Timestamp::NONEXISTENT.is_real());
        assert!(!Timestamp::UNKNOWN.is_real());
        assert!(Timestamp::from_nanos_since_epoch(1).is_real());
    }

    #[test]
    fn mtime_missing_file_is_nonexistent() {
        let t = Timestamp::mtime(Path::new("/does/not/exist/at/all")).unwrap();
        assert_eq!(t, Timestamp::NONEXISTENT);
    }
}
