//! Command-line front end: argument parsing and run execution.

mod args;
mod commands;

pub use args::Cli;
pub use commands::{execute, init_tracing};
