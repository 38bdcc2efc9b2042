//! External command execution
//!
//! Every tool nmbridge drives (`nmcli`, `bridge`, `sysctl`, `systemctl`,
//! `crontab`) is invoked through [`CommandRunner`], so exit status is always
//! checked and the callers can be exercised without touching the host.

use crate::error::{Error, Result};
use std::io::Write;
use std::process::{Command, Output, Stdio};

/// Captured result of an external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Whether the command exited successfully
    pub success: bool,
    /// Exit code (if available)
    pub exit_code: Option<i32>,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    #[cfg(test)]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given stderr
    #[cfg(test)]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Get a formatted summary of the result
    pub fn summary(&self) -> String {
        let status = if self.success { "success" } else { "failed" };
        let code = self
            .exit_code
            .map(|c| format!(" (exit {})", c))
            .unwrap_or_default();
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("{}{}", status, code)
        } else {
            format!("{}{}: {}", status, code, stderr)
        }
    }

    /// Turn a non-zero exit into [`Error::CommandFailed`]
    pub fn check(self, command: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(Error::CommandFailed {
                command: command.to_string(),
                message: self.summary(),
            })
        }
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Render a program and its arguments as a single command line
pub fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Synchronous command execution boundary
pub trait CommandRunner {
    /// Run a command and capture its output
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Run a command feeding `input` on stdin
    fn run_with_input(&self, program: &str, args: &[&str], input: &str) -> Result<CommandOutput>;

    /// Run a command and fail on non-zero exit
    fn run_checked(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        self.run(program, args)?.check(&command_line(program, args))
    }
}

/// Runs commands on the host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        tracing::debug!(command = %command_line(program, args), "exec");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::CommandFailed {
                command: command_line(program, args),
                message: e.to_string(),
            })?;

        Ok(output.into())
    }

    fn run_with_input(&self, program: &str, args: &[&str], input: &str) -> Result<CommandOutput> {
        tracing::debug!(command = %command_line(program, args), bytes = input.len(), "exec with stdin");

        let spawn_err = |e: std::io::Error| Error::CommandFailed {
            command: command_line(program, args),
            message: e.to_string(),
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(input.as_bytes()).map_err(spawn_err)?;
        }

        let output = child.wait_with_output().map_err(spawn_err)?;

        Ok(output.into())
    }
}

/// Fail unless running with an effective uid of 0
pub fn require_root(operation: &str) -> Result<()> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(Error::NotRoot(operation.to_string()))
    }
}

/// Scripted runner used by unit tests across the crate
#[cfg(test)]
pub mod testing {
    use super::{command_line, CommandOutput, CommandRunner};
    use crate::error::Result;
    use std::cell::RefCell;

    /// Answers commands by longest matching command-line prefix and records
    /// every invocation. Unmatched commands succeed with empty output.
    #[derive(Default)]
    pub struct ScriptedRunner {
        responses: Vec<(String, CommandOutput)>,
        calls: RefCell<Vec<String>>,
        inputs: RefCell<Vec<(String, String)>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(mut self, prefix: &str, stdout: &str) -> Self {
            self.responses
                .push((prefix.to_string(), CommandOutput::ok(stdout)));
            self
        }

        pub fn fail(mut self, prefix: &str, stderr: &str) -> Self {
            self.responses
                .push((prefix.to_string(), CommandOutput::failed(1, stderr)));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
            self.calls
                .borrow()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .cloned()
                .collect()
        }

        pub fn input_for(&self, prefix: &str) -> Option<String> {
            self.inputs
                .borrow()
                .iter()
                .rev()
                .find(|(c, _)| c.starts_with(prefix))
                .map(|(_, input)| input.clone())
        }

        fn answer(&self, line: &str) -> CommandOutput {
            self.responses
                .iter()
                .filter(|(prefix, _)| line.starts_with(prefix.as_str()))
                .max_by_key(|(prefix, _)| prefix.len())
                .map(|(_, output)| output.clone())
                .unwrap_or_else(|| CommandOutput::ok(""))
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
            let line = command_line(program, args);
            self.calls.borrow_mut().push(line.clone());
            Ok(self.answer(&line))
        }

        fn run_with_input(
            &self,
            program: &str,
            args: &[&str],
            input: &str,
        ) -> Result<CommandOutput> {
            let line = command_line(program, args);
            self.calls.borrow_mut().push(line.clone());
            self.inputs
                .borrow_mut()
                .push((line.clone(), input.to_string()));
            Ok(self.answer(&line))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedRunner;
    use super::*;

    #[test]
    fn test_command_line() {
        assert_eq!(
            command_line("nmcli", &["connection", "delete", "Wired connection 1"]),
            "nmcli connection delete Wired connection 1"
        );
    }

    #[test]
    fn test_summary_includes_stderr() {
        let out = CommandOutput::failed(10, "Error: unknown connection\n");
        assert_eq!(out.summary(), "failed (exit 10): Error: unknown connection");
        assert_eq!(CommandOutput::ok("x").summary(), "success (exit 0)");
    }

    #[test]
    fn test_from_process_output() {
        use std::os::unix::process::ExitStatusExt;

        let out: CommandOutput = Output {
            status: std::process::ExitStatus::from_raw(2 << 8),
            stdout: b"partial".to_vec(),
            stderr: b"Error: no such connection\n".to_vec(),
        }
        .into();
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(2));
        assert_eq!(out.stdout, "partial");
        assert_eq!(out.summary(), "failed (exit 2): Error: no such connection");
    }

    #[test]
    fn test_run_checked_reports_failure() {
        let runner = ScriptedRunner::new().fail("sysctl", "permission denied");
        let err = runner.run_checked("sysctl", &["-p", "-q"]).unwrap_err();
        match err {
            Error::CommandFailed { command, message } => {
                assert_eq!(command, "sysctl -p -q");
                assert!(message.contains("permission denied"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_scripted_runner_longest_prefix() {
        let runner = ScriptedRunner::new()
            .respond("nmcli connection show", "table")
            .respond("nmcli connection show eth0", "detail");
        assert_eq!(runner.run("nmcli", &["connection", "show"]).unwrap().stdout, "table");
        assert_eq!(
            runner.run("nmcli", &["connection", "show", "eth0"]).unwrap().stdout,
            "detail"
        );
        assert_eq!(runner.calls().len(), 2);
    }
}
