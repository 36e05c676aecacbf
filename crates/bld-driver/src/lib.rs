//! `bld` — a build2-style build system driver.
//!
//! This crate is the only one in the workspace that talks to the process
//! environment (argv, stdio, the current directory) directly; `bld-core`,
//! `bld-cc`, and `bld-script` take everything already parsed (spec.md §6
//! "External interfaces").

#![allow(clippy::missing_errors_doc)]

pub mod buildspec;
pub mod completions;
pub mod dispatch;
pub mod options;
pub mod overrides;
pub mod project;
pub mod test_rule;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

/// `bld` — builds, cleans, tests, and installs projects described by
/// `buildfile`s (spec.md §6 "CLI").
#[derive(Debug, Parser)]
#[command(name = "bld")]
#[command(author, version, about = "bld - a build2-style build system driver")]
pub struct Cli {
    /// Read the root buildfile from this path instead of searching
    /// upward from the working directory.
    #[arg(short = 'f', long = "file", global = true)]
    pub file: Option<PathBuf>,

    /// Change to this directory before doing anything else.
    #[arg(short = 'C', long = "directory", global = true)]
    pub directory: Option<PathBuf>,

    /// Maximum number of recipes to run concurrently (defaults to the
    /// host's logical CPU count).
    #[arg(short = 'j', long = "jobs", global = true)]
    pub jobs: Option<usize>,

    /// Suppress non-essential output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print each command line before running it.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Keep building unrelated targets after a failure, instead of
    /// stopping at the first one.
    #[arg(long, global = true)]
    pub keep_going: bool,

    /// Print a shell-completion script for `<shell>` to stdout and exit
    /// without building anything.
    #[arg(long = "completions", value_enum, global = true)]
    pub completions: Option<clap_complete::Shell>,

    /// Have `info(...)` (the only meta-operation with a report to print)
    /// emit a JSON array instead of a `comfy-table`.
    #[arg(long, global = true)]
    pub json: bool,

    /// Buildspec and variable-override arguments (spec.md §6): any mix of
    /// `meta-op(op(targets, ...))` groups, bare target names, and
    /// `<name>=<value>`/`+=`/`=+` assignments, optionally prefixed
    /// `!`/`%`/`/`. Parsed by [`crate::buildspec::parse_args`].
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// The three exit statuses the driver ever produces (spec.md §6 "Exit
/// status").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverExit {
    /// The requested build completed with no errors.
    Success,
    /// A diagnostic was already issued for a load/match/execute failure.
    Failure,
    /// The command line itself, or the project it names, could not be
    /// made sense of before any diagnostic-worthy build work started.
    Misuse,
}

impl From<DriverExit> for ExitCode {
    fn from(exit: DriverExit) -> Self {
        match exit {
            DriverExit::Success => ExitCode::SUCCESS,
            DriverExit::Failure => ExitCode::from(1),
            DriverExit::Misuse => ExitCode::from(2),
        }
    }
}

/// Strip a leading `#`-prefixed trailing comment token stream the way a
/// shell history paste sometimes carries one (mirrors a convention common
/// among build-tool CLIs: a user can copy a documented command verbatim,
/// trailing comment and all).
#[must_use]
pub fn strip_trailing_comment(args: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        if arg.starts_with('#') {
            break;
        }
        out.push(arg);
    }
    out
}

/// Run the parsed CLI to completion: bootstrap the named (or discovered)
/// project, dispatch its buildspec, and report the resulting exit status.
///
/// This is the single entry point `src/main.rs` calls; it never itself
/// exits the process, so it is exercised directly by integration tests.
pub async fn run(cli: Cli) -> DriverExit {
    if let Some(shell) = cli.completions {
        completions::completions(shell);
        return DriverExit::Success;
    }

    if let Some(dir) = &cli.directory {
        if let Err(e) = std::env::set_current_dir(dir) {
            tracing::error!(target: "bld_driver", directory = %dir.display(), error = %e, "cannot change directory");
            return DriverExit::Misuse;
        }
    }

    let (spec, cli_overrides) = match buildspec::parse_args(&cli.args) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::error!(target: "bld_driver", error = %e, "invalid buildspec");
            return DriverExit::Misuse;
        }
    };

    let work_dir = match std::env::current_dir() {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(target: "bld_driver", error = %e, "cannot determine working directory");
            return DriverExit::Misuse;
        }
    };

    let bootstrap = project::BootstrapOptions {
        work_dir,
        file: cli.file.clone(),
        jobs: cli.jobs,
        keep_going: cli.keep_going,
        cli_overrides,
        json_output: cli.json,
    };

    let project = match project::bootstrap(bootstrap).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(target: "bld_driver", error = %e, "project bootstrap failed");
            return DriverExit::Misuse;
        }
    };

    match dispatch::run_buildspec(&project, &spec).await {
        Ok(sink) if !sink.has_errors() => DriverExit::Success,
        Ok(_) => DriverExit::Failure,
        Err(e) => {
            tracing::error!(target: "bld_driver", error = %e, "buildspec dispatch failed");
            DriverExit::Misuse
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_trailing_comment_drops_everything_from_the_hash() {
        let args = vec!["update(hello.exe)".to_string(), "#".to_string(), "rebuild".to_string()];
        assert_eq!(strip_trailing_comment(args), vec!["update(hello.exe)".to_string()]);
    }

    #[test]
    fn exit_variants_convert_without_panicking() {
        let _: ExitCode = DriverExit::Success.into();
        let _: ExitCode = DriverExit::Failure.into();
        let _: ExitCode = DriverExit::Misuse.into();
    }

    #[test]
    fn completions_flag_parses_without_requiring_a_buildspec() {
        let cli = Cli::parse_from(["bld", "--completions", "bash"]);
        assert_eq!(cli.completions, Some(clap_complete::Shell::Bash));
        assert!(cli.args.is_empty());
    }

    #[tokio::test]
    async fn run_short_circuits_on_completions_without_touching_the_filesystem() {
        let cli = Cli::parse_from(["bld", "--completions", "zsh"]);
        assert_eq!(run(cli).await, DriverExit::Success);
    }
}
