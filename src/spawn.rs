//! Re-executing the applog binary as a helper process.
//!
//! The aggregator and the workers are not forked: the parent starts its own
//! executable again (`posix_spawn` via `std::process::Command`) with a
//! hidden subcommand selecting the helper's role.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{ApplogError, Result};

/// Hidden subcommand that runs the aggregator consume loop.
pub const AGGREGATOR_COMMAND: &str = "internal-aggregator";

/// Hidden subcommand that runs a worker receive loop.
pub const WORKER_COMMAND: &str = "internal-worker";

/// Program used to start helper processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    program: PathBuf,
}

impl Launcher {
    /// Launch helpers from an explicit binary, e.g. `CARGO_BIN_EXE_applog`
    /// in integration tests.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Launch helpers from the running executable.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| {
            ApplogError::Worker(format!("Failed to get current executable: {}", e))
        })?;
        Ok(Self::new(program))
    }

    /// Resolve an optional launcher, defaulting to the running executable.
    pub fn resolve(launcher: Option<&Launcher>) -> Result<Self> {
        match launcher {
            Some(launcher) => Ok(launcher.clone()),
            None => Self::current_exe(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Command for `subcommand` with `args` appended.
    pub fn command(&self, subcommand: &str, args: Vec<OsString>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(subcommand);
        cmd.args(args);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_prefers_explicit_launcher() {
        let explicit = Launcher::new("/opt/applog/bin/applog");
        assert_eq!(Launcher::resolve(Some(&explicit)).unwrap(), explicit);
    }

    #[test]
    fn test_resolve_defaults_to_current_exe() {
        let launcher = Launcher::resolve(None).unwrap();
        assert_eq!(launcher.program(), std::env::current_exe().unwrap());
    }

    #[test]
    fn test_command_puts_subcommand_first() {
        let launcher = Launcher::new("/bin/applog");
        let cmd = launcher.command(WORKER_COMMAND, vec!["--worker-id".into(), "4".into()]);
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, vec!["internal-worker", "--worker-id", "4"]);
        assert_eq!(cmd.get_program(), "/bin/applog");
    }
}
