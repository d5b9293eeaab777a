//! Run configuration: what to run and how many at once.
//!
//! A JSON manifest may supply the command list and defaults; command-line
//! flags override it.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// One command to run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandSpec {
    /// Shell command line, passed to `/bin/sh -c`.
    pub command: String,

    /// Run attached to the terminal instead of capturing output.
    #[serde(default)]
    pub console: bool,
}

impl CommandSpec {
    /// A captured (non-console) command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            console: false,
        }
    }

    /// A command attached to the terminal.
    pub fn console(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            console: true,
        }
    }
}

/// Settings for a [`Runner`](crate::Runner) invocation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Maximum number of commands running at once.
    pub jobs: usize,

    /// Stop starting new commands after this many failures; 0 never stops.
    pub keep_going: usize,

    /// Commands in launch order.
    pub commands: Vec<CommandSpec>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            keep_going: 1,
            commands: Vec::new(),
        }
    }
}

/// One job per available CPU.
fn default_jobs() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

impl RunnerConfig {
    /// Load a manifest from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Invalid manifest {}", path.display()))
    }

    /// Parse a manifest from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse manifest JSON")
    }

    /// Check that the configuration can be run.
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            bail!("jobs must be at least 1");
        }
        if self.commands.is_empty() {
            bail!("no commands to run");
        }
        if let Some(index) = self.commands.iter().position(|c| c.command.trim().is_empty()) {
            bail!("command #{} is empty", index + 1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert!(config.jobs >= 1);
        assert_eq!(config.keep_going, 1);
        assert!(config.commands.is_empty());
    }

    #[test]
    fn test_parse_manifest() {
        let config = RunnerConfig::from_json(
            r#"{
                "jobs": 3,
                "commands": [
                    {"command": "make -C lib"},
                    {"command": "./configure", "console": true}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.jobs, 3);
        assert_eq!(config.keep_going, 1);
        assert_eq!(
            config.commands,
            vec![CommandSpec::new("make -C lib"), CommandSpec::console("./configure")]
        );
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(RunnerConfig::from_json(r#"{"workers": 2}"#).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"keep_going": 0, "commands": [{{"command": "true"}}]}}"#).unwrap();

        let config = RunnerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.keep_going, 0);
        assert_eq!(config.commands.len(), 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RunnerConfig::from_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read manifest"));
    }

    #[test]
    fn test_validate() {
        let mut config = RunnerConfig {
            jobs: 0,
            keep_going: 1,
            commands: vec![CommandSpec::new("true")],
        };
        assert!(config.validate().is_err());

        config.jobs = 2;
        assert!(config.validate().is_ok());

        config.commands.push(CommandSpec::new("  "));
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "command #2 is empty");

        config.commands.clear();
        assert!(config.validate().is_err());
    }
}
