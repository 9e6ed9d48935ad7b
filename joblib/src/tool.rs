use crate::errors::JobError;
use crate::intercept;
use crate::types::CommandLine;
use std::path::PathBuf;
use std::process::Command;

/// The external command-line tool driven by the pool.
///
/// `invoke` runs synchronously on a worker thread. Output must go through
/// [`intercept::execute`] and the [`console`](crate::console) hooks so it can be captured.
pub trait Tool: Send + Sync + 'static {
    /// Command line shown to viewers for `args`.
    fn command_line(&self, args: &[String]) -> CommandLine;

    fn invoke(&self, args: &[String]) -> Result<(), JobError>;
}

/// Registry of the tool's capabilities (plugins, extensions) that goes stale whenever a
/// command mutates it.
pub trait Registry: Send + Sync + 'static {
    fn reload(&self);
}

/// Runs `args` as a child process, optionally behind a fixed program such as `tutor`.
#[derive(Clone, Debug, Default)]
pub struct Program {
    prefix: Option<String>,
    current_dir: Option<PathBuf>,
}

impl Program {
    /// `args` are the full command, e.g. `["echo", "hello"]`.
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// `args` are appended to `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            prefix: Some(program.into()),
            current_dir: None,
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    fn command(&self, args: &[String]) -> Vec<String> {
        self.prefix.iter().cloned().chain(args.iter().cloned()).collect()
    }
}

impl Tool for Program {
    fn command_line(&self, args: &[String]) -> CommandLine {
        intercept::join(&self.command(args))
    }

    fn invoke(&self, args: &[String]) -> Result<(), JobError> {
        let command = self.command(args);
        if command.is_empty() {
            return Err(JobError::Tool("No command given".to_string()));
        }
        match &self.current_dir {
            Some(dir) => intercept::execute_with(&command, |cmd: &mut Command| {
                cmd.current_dir(dir);
            }),
            None => intercept::execute(&command),
        }
        .map(|_| ())
    }
}
