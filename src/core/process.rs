//! Subprocess execution seam.
//!
//! Backends never spawn processes directly. They build an [`Invocation`] and
//! hand it to a [`ProcessRunner`], so tests can substitute a scripted runner
//! that records every call.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::{Error, Result};
use crate::utils::shell;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Shell-quoted command line, for logs and error details.
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        shell::quote_args(&parts)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            exit_code: 0,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
            exit_code,
        }
    }
}

pub trait ProcessRunner {
    /// Run to completion with stdout and stderr captured.
    fn capture(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Run attached to the user's terminal; returns the exit code.
    fn passthrough(&self, invocation: &Invocation) -> Result<i32>;

    /// Whether stdout is attached to a terminal.
    fn is_terminal(&self) -> bool;
}

/// Spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcess;

impl SystemProcess {
    fn command(invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        if let Some(dir) = &invocation.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn spawn_error(invocation: &Invocation, err: std::io::Error) -> Error {
        Error::internal_io(
            err.to_string(),
            Some(format!("spawn {}", invocation.program)),
        )
        .with_hint(format!("Is '{}' installed and on PATH?", invocation.program))
    }
}

impl ProcessRunner for SystemProcess {
    fn capture(&self, invocation: &Invocation) -> Result<CommandOutput> {
        tracing::debug!(command = %invocation.display(), "capture");
        let out = Self::command(invocation)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Self::spawn_error(invocation, e))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        })
    }

    fn passthrough(&self, invocation: &Invocation) -> Result<i32> {
        tracing::debug!(command = %invocation.display(), "passthrough");
        let status = Self::command(invocation)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| Self::spawn_error(invocation, e))?;
        Ok(status.code().unwrap_or(-1))
    }

    fn is_terminal(&self) -> bool {
        std::io::IsTerminal::is_terminal(&std::io::stdout())
    }
}

/// Scripted process runner for tests.
#[doc(hidden)]
pub mod testing {
    use std::cell::RefCell;

    use super::{CommandOutput, Invocation, ProcessRunner};
    use crate::error::Result;

    struct Rule {
        needle: String,
        output: CommandOutput,
        once: bool,
    }

    /// Records invocations and answers them from a list of rules.
    ///
    /// A rule matches when its needle is a substring of the invocation's
    /// display line. One-shot rules are consumed on first match and take
    /// precedence over sticky ones. Unmatched calls succeed with empty output.
    #[derive(Default)]
    pub struct ScriptedProcess {
        rules: RefCell<Vec<Rule>>,
        calls: RefCell<Vec<Invocation>>,
        terminal: bool,
    }

    impl ScriptedProcess {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_terminal(mut self, terminal: bool) -> Self {
            self.terminal = terminal;
            self
        }

        /// Answer every matching call with `output`.
        pub fn on(&self, needle: &str, output: CommandOutput) -> &Self {
            self.rules.borrow_mut().push(Rule {
                needle: needle.to_string(),
                output,
                once: false,
            });
            self
        }

        /// Answer the next matching call with `output`.
        pub fn once(&self, needle: &str, output: CommandOutput) -> &Self {
            self.rules.borrow_mut().push(Rule {
                needle: needle.to_string(),
                output,
                once: true,
            });
            self
        }

        pub fn calls(&self) -> Vec<Invocation> {
            self.calls.borrow().clone()
        }

        /// Display lines of every recorded call.
        pub fn lines(&self) -> Vec<String> {
            self.calls.borrow().iter().map(|c| c.display()).collect()
        }

        pub fn count_matching(&self, needle: &str) -> usize {
            self.lines().iter().filter(|l| l.contains(needle)).count()
        }

        fn answer(&self, invocation: &Invocation) -> CommandOutput {
            self.calls.borrow_mut().push(invocation.clone());
            let line = invocation.display();
            let mut rules = self.rules.borrow_mut();

            if let Some(pos) = rules
                .iter()
                .position(|r| r.once && line.contains(&r.needle))
            {
                return rules.remove(pos).output;
            }
            rules
                .iter()
                .find(|r| line.contains(&r.needle))
                .map(|r| r.output.clone())
                .unwrap_or_else(|| CommandOutput::ok(""))
        }
    }

    impl ProcessRunner for ScriptedProcess {
        fn capture(&self, invocation: &Invocation) -> Result<CommandOutput> {
            Ok(self.answer(invocation))
        }

        fn passthrough(&self, invocation: &Invocation) -> Result<i32> {
            Ok(self.answer(invocation).exit_code)
        }

        fn is_terminal(&self) -> bool {
            self.terminal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedProcess;
    use super::*;

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let inv = Invocation::new("sh").args(["-e", "-c", "echo hi"]);
        assert_eq!(inv.display(), "sh -e -c 'echo hi'");
    }

    #[test]
    fn scripted_once_rules_win_then_expire() {
        let proc = ScriptedProcess::new();
        proc.on("kubectl get", CommandOutput::ok("sticky"));
        proc.once("kubectl get", CommandOutput::ok("first"));

        let inv = Invocation::new("kubectl").arg("get");
        assert_eq!(proc.capture(&inv).unwrap().stdout, "first");
        assert_eq!(proc.capture(&inv).unwrap().stdout, "sticky");
        assert_eq!(proc.calls().len(), 2);
    }

    #[test]
    fn scripted_unmatched_call_succeeds() {
        let proc = ScriptedProcess::new();
        let code = proc.passthrough(&Invocation::new("true")).unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn system_process_reports_missing_binary() {
        let err = SystemProcess
            .capture(&Invocation::new("berth-definitely-not-a-binary"))
            .unwrap_err();
        assert_eq!(err.code.as_str(), "internal.io_error");
        assert!(!err.hints.is_empty());
    }
}
