//! CLI argument definitions.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// procset - Run shell commands in parallel with build-tool semantics
#[derive(Parser, Debug)]
#[command(name = "procset")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Maximum number of commands running at once
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Stop starting new commands after N failures (0 never stops)
    #[arg(short, long, value_name = "N")]
    pub keep_going: Option<usize>,

    /// JSON manifest with defaults and a command list
    #[arg(short, long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Run a command attached to the terminal (repeatable)
    #[arg(long, value_name = "COMMAND")]
    pub console: Vec<String>,

    /// Print a JSON summary on stdout when done
    #[arg(long)]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Commands to run, each passed to /bin/sh -c
    pub commands: Vec<String>,
}

impl Cli {
    /// Log filter implied by `-v`, used when `RUST_LOG` is unset.
    pub const fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags_and_commands() {
        let cli = Cli::parse_from([
            "procset", "-j", "3", "-k", "0", "--console", "vim notes", "make", "make test",
        ]);
        assert_eq!(cli.jobs, Some(3));
        assert_eq!(cli.keep_going, Some(0));
        assert_eq!(cli.console, ["vim notes"]);
        assert_eq!(cli.commands, ["make", "make test"]);
        assert_eq!(cli.log_level(), "warn");
    }

    #[test]
    fn test_verbosity() {
        assert_eq!(Cli::parse_from(["procset", "-v"]).log_level(), "debug");
        assert_eq!(Cli::parse_from(["procset", "-vvv"]).log_level(), "trace");
    }
}
