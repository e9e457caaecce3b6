use crate::signals::{self, ChildRegistration};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::os::unix::process::ExitStatusExt;
use std::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TestOutcome {
    pub exit_code: Option<i32>,
    pub interrupted: bool,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.exit_code == Some(0) && !self.interrupted
    }

    pub fn interrupted_before_start() -> Self {
        Self {
            exit_code: None,
            interrupted: true,
        }
    }
}

/// The hardware test suite. Opaque apart from its exit status.
pub trait TestSuite {
    fn describe(&self) -> String;
    fn execute(&self) -> Result<TestOutcome>;
}

/// Runs the suite as a child process with inherited stdio.
pub struct CommandSuite {
    program: String,
    args: Vec<String>,
}

impl CommandSuite {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("no test command given"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl TestSuite for CommandSuite {
    fn describe(&self) -> String {
        self.command_line().join(" ")
    }

    fn execute(&self) -> Result<TestOutcome> {
        info!(command = %self.describe(), "starting test suite");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .spawn()
            .with_context(|| format!("spawn {}", self.program))?;
        let registration = ChildRegistration::register(child.id());
        let status = child
            .wait()
            .with_context(|| format!("wait for {}", self.program))?;
        drop(registration);

        let killed_by = status.signal();
        let outcome = TestOutcome {
            exit_code: status.code(),
            interrupted: signals::interrupted() || killed_by.is_some(),
        };
        if outcome.passed() {
            info!("test suite passed");
        } else {
            warn!(
                exit_code = ?outcome.exit_code,
                signal = ?killed_by,
                interrupted = outcome.interrupted,
                "test suite did not pass"
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    #[test]
    fn reports_exit_code() {
        let suite = CommandSuite::new(&command(&["sh", "-c", "exit 3"])).unwrap();
        let outcome = suite.execute().unwrap();
        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.passed());
    }

    #[test]
    fn zero_exit_passes() {
        let suite = CommandSuite::new(&command(&["true"])).unwrap();
        assert!(suite.execute().unwrap().passed());
    }

    #[test]
    fn missing_program_is_an_error() {
        let suite = CommandSuite::new(&command(&["rigprep-no-such-test-runner"])).unwrap();
        assert!(suite.execute().is_err());
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandSuite::new(&[]).is_err());
    }
}
