//! Shell-completion generation, grounded on the teacher's standalone
//! `cmd::completions` command: `clap_complete` renders straight from the
//! derived [`crate::Cli`] definition, so the completion script can never
//! drift from the flags `Cli::parse_from` actually accepts.
//!
//! bld's own buildspec grammar (`meta-op(op(targets))`, bare target
//! names, `var=value` overrides) occupies the trailing argument
//! position, so it is not a subcommand enum the way the teacher's `dl`
//! is — `--completions <shell>` is a flag instead, short-circuiting
//! before any buildspec parsing happens.

use clap::CommandFactory;
use clap_complete::generate;

use crate::Cli;

/// Write `shell`'s completion script for `bld` to stdout.
pub fn completions(shell: clap_complete::Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "bld", &mut std::io::stdout());
}
