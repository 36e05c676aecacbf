//! Compiler toolchain discovery and probing (spec.md §4.10 "C/C++ front
//! end"). Grounded on `libbuild2/bin/guess.cxx`'s `guess_ar`/`search`:
//! find the compiler driver on `PATH` (or an explicit override), run it
//! with a version-printing flag, and pattern-match the banner into an
//! id/version pair. Explicitly reduced scope (SPEC_FULL.md §2): this is
//! "the interface we only fix" — no MSVC-specific argument quoting, no
//! Windows rpath synthesis.

use std::path::{Path, PathBuf};
use std::process::Command;

/// The compiler family a probed driver identifies as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolchainId {
    /// GCC (`gcc`/`g++`), identified by a `gcc version ` banner line.
    Gcc,
    /// Clang/LLVM (`clang`/`clang++`), identified by a `clang version `
    /// banner line.
    Clang,
    /// Anything whose banner matched neither known pattern. Probing
    /// still succeeds — an unrecognized id just disables id-specific
    /// option defaults (spec.md §4.10's reduced scope does not attempt
    /// to support every vendor fork `guess.cxx` itself special-cases).
    Unknown,
}

/// Error probing a compiler driver.
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    /// The driver could not be found on `PATH` or the given override
    /// path.
    #[error("compiler `{0}` not found (set config.bld.cc to override)")]
    NotFound(String),
    /// The driver was found but could not be run (permissions, not
    /// actually executable, ...).
    #[error("running `{path}`: {source}")]
    Exec {
        /// The path that failed to execute.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The driver ran but printed nothing recognizable as a version
    /// banner.
    #[error("could not determine the version of `{0}`")]
    UnrecognizedBanner(PathBuf),
}

/// A probed compiler driver: what it identifies as, the version it
/// reports, and the target triplet it was built for (spec.md §3 "target
/// triplet"). Grounded on `guess_result` (`libbuild2/bin/guess.cxx`):
/// `id`/`signature`/`version` there map to `id`/`banner`/`version` here,
/// minus the `checksum` field (this engine fingerprints compiler
/// behavior through depdb content hashes, not a separate signature
/// field — see `bld_core::depdb::format_fingerprint`).
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// The absolute path to the compiler driver.
    pub path: PathBuf,
    /// The family this driver identifies as.
    pub id: ToolchainId,
    /// The raw first matching banner line, kept for diagnostics and for
    /// depdb fingerprinting (a toolchain upgrade changes this string
    /// even when `version` parses the same).
    pub banner: String,
    /// The parsed semantic-ish version (major.minor.patch; a banner that
    /// does not carry a full triplet zero-fills the rest).
    pub version: semver::Version,
    /// The target triplet the driver reports building for, if it prints
    /// one (`--version -v`'s `Target: ...` line on gcc/clang).
    pub target: Option<bld_schema::value::TargetTriplet>,
}

/// Find `name` (a compiler driver like `"c++"`, `"clang++"`, or an
/// absolute/relative override path) and probe it.
///
/// # Errors
///
/// Returns [`ToolchainError::NotFound`] if `name` resolves to nothing on
/// `PATH`, [`ToolchainError::Exec`] if found but not runnable, or
/// [`ToolchainError::UnrecognizedBanner`] if it ran but its output
/// matched none of the known patterns.
pub fn probe(name: &str) -> Result<Toolchain, ToolchainError> {
    let path = resolve(name)?;
    let output = Command::new(&path)
        .arg("-v")
        .output()
        .map_err(|source| ToolchainError::Exec { path: path.clone(), source })?;
    // Both gcc and clang write their version banner to stderr for `-v`;
    // fall back to stdout in case a vendor fork differs.
    let text = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stderr),
        String::from_utf8_lossy(&output.stdout)
    );
    parse_banner(&path, &text)
}

fn resolve(name: &str) -> Result<PathBuf, ToolchainError> {
    let candidate = Path::new(name);
    if candidate.is_absolute() || candidate.components().count() > 1 {
        return if candidate.is_file() {
            Ok(candidate.to_path_buf())
        } else {
            Err(ToolchainError::NotFound(name.to_string()))
        };
    }
    which::which(name).map_err(|_| ToolchainError::NotFound(name.to_string()))
}

/// Pattern-match a `-v`/`--version` banner the way `guess_ar`'s closures
/// do: look for a family-identifying substring, then parse a semantic
/// version starting right after it.
fn parse_banner(path: &Path, text: &str) -> Result<Toolchain, ToolchainError> {
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("gcc version ") {
            return Ok(Toolchain {
                path: path.to_path_buf(),
                id: ToolchainId::Gcc,
                banner: line.to_string(),
                version: parse_version(rest),
                target: find_target_line(text),
            });
        }
        if let Some(idx) = line.find("clang version ") {
            let rest = &line[idx + "clang version ".len()..];
            return Ok(Toolchain {
                path: path.to_path_buf(),
                id: ToolchainId::Clang,
                banner: line.to_string(),
                version: parse_version(rest),
                target: find_target_line(text),
            });
        }
    }
    Err(ToolchainError::UnrecognizedBanner(path.to_path_buf()))
}

fn find_target_line(text: &str) -> Option<bld_schema::value::TargetTriplet> {
    let line = text.lines().find_map(|l| l.strip_prefix("Target: "))?;
    let mut parts = line.trim().splitn(3, '-');
    Some(bld_schema::value::TargetTriplet {
        cpu: parts.next()?.to_string(),
        vendor: parts.next().unwrap_or("unknown").to_string(),
        system: parts.next().unwrap_or("unknown").to_string(),
    })
}

/// Parse the leading `major.minor.patch` of `s`, zero-filling whatever
/// components are missing or non-numeric (spec.md §4.10: "a version
/// that fails to parse cleanly is treated as 0.0.0 rather than
/// rejected" — matching `parse_version`'s `guess.cxx` fallback of a
/// default-constructed, all-zero `semantic_version` on failure).
fn parse_version(s: &str) -> semver::Version {
    let digits: String = s
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts = digits.splitn(3, '.');
    let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    semver::Version::new(major, minor, patch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gcc_banner() {
        let t = parse_banner(Path::new("/usr/bin/g++"), "gcc version 12.2.0 (Debian 12.2.0-14)\n").unwrap();
        assert_eq!(t.id, ToolchainId::Gcc);
        assert_eq!(t.version, semver::Version::new(12, 2, 0));
    }

    #[test]
    fn parses_clang_banner() {
        let t = parse_banner(
            Path::new("/usr/bin/clang++"),
            "Ubuntu clang version 15.0.7\nTarget: x86_64-pc-linux-gnu\n",
        )
        .unwrap();
        assert_eq!(t.id, ToolchainId::Clang);
        assert_eq!(t.version, semver::Version::new(15, 0, 7));
        assert_eq!(t.target.unwrap().cpu, "x86_64");
    }

    #[test]
    fn unrecognized_banner_is_an_error() {
        let err = parse_banner(Path::new("/usr/bin/cc"), "some unrelated tool, v1\n").unwrap_err();
        assert!(matches!(err, ToolchainError::UnrecognizedBanner(_)));
    }

    #[test]
    fn messy_version_suffix_falls_back_to_zero_patch() {
        let v = parse_version("13-ubuntu1");
        assert_eq!(v, semver::Version::new(13, 0, 0));
    }
}
