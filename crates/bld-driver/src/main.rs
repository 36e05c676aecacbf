//! `bld` — a build2-style build system driver.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bld_driver::{run, strip_trailing_comment, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("bld: {e:#}");
        return ExitCode::from(2);
    }

    // Allow a trailing `#`-prefixed comment on the command line, so a
    // documented invocation can be copy-pasted verbatim.
    let args = strip_trailing_comment(std::env::args().collect());
    let cli = Cli::parse_from(args);

    run(cli).await.into()
}

/// Install the global tracing subscriber, threading failure back to the
/// process boundary through `anyhow::Context` the way the teacher's own
/// `main` does — the only way this fails is a subscriber already being
/// installed, which `.init()` alone would turn into a panic instead of
/// an exit status.
fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .context("installing tracing subscriber")
}
