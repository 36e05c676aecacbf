//! Header dependency discovery (spec.md §4.10 "dynamic dependency
//! discovery"): ask the compiler itself which headers a translation unit
//! pulls in, the same way every real C/C++ build system does, rather
//! than re-implementing a preprocessor. Grounded on the `-MM`-style
//! dependency-output support `libbuild2/cc/` drivers rely on (exposed
//! there through the `gcc`/`msvc` output-parsing paths; this engine only
//! needs the GCC-compatible make-rule format since the reduced-scope
//! toolchain probe in `crate::toolchain` only recognizes GCC/Clang).

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::toolchain::Toolchain;

/// Error scanning a translation unit for header dependencies.
#[derive(Debug, thiserror::Error)]
pub enum DepScanError {
    /// The compiler could not be run in dependency-scan mode.
    #[error("running {path}: {source}")]
    Exec {
        /// The compiler path that failed to execute.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The scan invocation exited non-zero.
    #[error("{path} -MM exited with {status}: {stderr}")]
    Failed {
        /// The compiler path.
        path: PathBuf,
        /// Its exit status.
        status: std::process::ExitStatus,
        /// Captured stderr.
        stderr: String,
    },
}

/// Run `toolchain` in dependency-scan mode (`-MM`) over `source` and
/// return every header path it reports, in the order the make rule
/// lists them (the primary source itself is excluded).
///
/// # Errors
///
/// Returns [`DepScanError`] if the compiler cannot be run or exits with
/// a failure status.
pub fn scan_includes(
    toolchain: &Toolchain,
    source: &Path,
    options: &[String],
) -> Result<Vec<PathBuf>, DepScanError> {
    let output = Command::new(&toolchain.path)
        .args(options)
        .arg("-MM")
        .arg(source)
        .output()
        .map_err(|source_err| DepScanError::Exec { path: toolchain.path.clone(), source: source_err })?;
    if !output.status.success() {
        return Err(DepScanError::Failed {
            path: toolchain.path.clone(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(parse_make_rule(&String::from_utf8_lossy(&output.stdout), source))
}

/// Parse a GCC/Clang `-MM` make rule (`target.o: a.cxx b.hxx c.hxx \`,
/// continuation lines joined by trailing `\`) into its prerequisite
/// list, dropping the primary source file itself.
fn parse_make_rule(text: &str, source: &Path) -> Vec<PathBuf> {
    let joined = text.replace("\\\n", " ");
    let Some(rest) = joined.split_once(':') else {
        return Vec::new();
    };
    rest.1
        .split_whitespace()
        .map(PathBuf::from)
        .filter(|p| p != source)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_continued_make_rule() {
        let rule = "foo.o: foo.cxx foo.hxx \\\n  common.hxx\n";
        let deps = parse_make_rule(rule, Path::new("foo.cxx"));
        assert_eq!(deps, vec![PathBuf::from("foo.hxx"), PathBuf::from("common.hxx")]);
    }

    #[test]
    fn a_rule_with_no_colon_yields_nothing() {
        assert!(parse_make_rule("garbage output", Path::new("foo.cxx")).is_empty());
    }
}
