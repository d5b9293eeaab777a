//! procset - run shell commands in parallel with build-tool semantics.
//!
//! Exit codes:
//! - 0: every command succeeded
//! - 1: a command failed, or procset itself hit an error
//! - 2: interrupted by SIGINT, SIGTERM or SIGHUP

mod cli;

use clap::Parser;

use cli::{execute, init_tracing, Cli};

fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.log_level()) {
        eprintln!("procset: {e:#}");
    }

    let code = match execute(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("procset: {e:#}");
            1
        }
    };
    std::process::exit(code);
}
