use std::io;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stderr when present, otherwise stdout, trimmed. Used in error messages.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs an external program to completion and captures its output.
///
/// A program that is not installed must surface as an `io::Error` of kind
/// `NotFound` so callers can tell "tool missing" apart from "tool failed".
pub trait ToolRunner {
    fn run_env(&self, program: &str, args: &[&str], env: &[(&str, &str)]) -> io::Result<ToolOutput>;

    fn run(&self, program: &str, args: &[&str]) -> io::Result<ToolOutput> {
        self.run_env(program, args, &[])
    }
}

impl<T: ToolRunner + ?Sized> ToolRunner for &T {
    fn run_env(&self, program: &str, args: &[&str], env: &[(&str, &str)]) -> io::Result<ToolOutput> {
        (**self).run_env(program, args, env)
    }
}

pub fn is_missing_tool(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound
}
