use crate::types::CommandLine;
use std::{io, result};
use thiserror::Error;

/// Everything that can end a job other than a clean exit.
///
/// None of these escape a background run: their message is appended to the job's
/// output so viewers see the failure inline.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Command failed to start: {command}: {source}")]
    LaunchFailure {
        command: CommandLine,
        #[source]
        source: io::Error,
    },
    #[error("Command failed with status {code}: {command}")]
    NonZeroExit { code: i32, command: CommandLine },
    #[error("Command killed by signal {signal}: {command}")]
    Killed { signal: i32, command: CommandLine },
    #[error("Command interrupted: {command}")]
    Interrupted { command: CommandLine },
    #[error("{0}")]
    Tool(String),
    #[error("Command already started: {command}")]
    AlreadyStarted { command: CommandLine },
    #[error(transparent)]
    Intercept(#[from] InterceptError),
}

impl JobError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, JobError::Interrupted { .. })
    }
}

/// Failures of the output substitution itself. Output capture can't be trusted after one.
#[derive(Error, Debug)]
pub enum InterceptError {
    #[error("output interception is already active on this thread")]
    Reentered,
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("execution pool has shut down")]
    Closed,
    #[error("failed to create job output: {0}")]
    Sink(#[from] io::Error),
    #[error(transparent)]
    Job(#[from] JobError),
}

pub type Result<T> = result::Result<T, PoolError>;
