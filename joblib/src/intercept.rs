//! Redirection of a tool's output into a job's [`OutputSink`].
//!
//! A tool writes in two ways: it spawns child processes through [`execute`], and it
//! prints through the [`console`](crate::console) hooks. An [`Interception`] points both
//! at one sink for as long as it is alive, then puts back whatever was there before.
//!
//! The hooks are process-wide, so at most one interception exists at a time. Beginning
//! one blocks until the previous one has ended.

use crate::console::{self, Console, Style};
use crate::errors::{InterceptError, JobError};
use crate::job::CancelFlag;
use crate::sink::OutputSink;
use crate::types::CommandLine;
use std::cell::Cell;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

static EXCLUSIVE: Mutex<()> = Mutex::new(());
static REDIRECT: Mutex<Option<Arc<Redirect>>> = Mutex::new(None);

thread_local! {
    static INTERCEPTING: Cell<bool> = Cell::new(false);
}

struct Redirect {
    sink: Arc<OutputSink>,
    cancel: CancelFlag,
    poll_interval: Duration,
    on_spawn: Box<dyn Fn() + Send + Sync>,
}

/// Console that writes into a sink and flattens styling to plain text.
struct SinkConsole {
    sink: Arc<OutputSink>,
}

impl Console for SinkConsole {
    fn echo(&self, text: &str) {
        if let Err(err) = self.sink.append_line(text) {
            warn!(error = %err, "failed to write tool output");
        }
    }

    fn style(&self, text: &str, _style: Style) -> String {
        strip_ansi_escapes::strip_str(text).to_string()
    }
}

/// Scoped redirection of the output hooks. Dropping it restores the previous hooks.
pub struct Interception {
    previous_console: Option<Arc<dyn Console>>,
    _exclusive: MutexGuard<'static, ()>,
}

impl Interception {
    /// Point the hooks at `sink` until the returned value is dropped. `on_spawn` is
    /// called each time [`execute`] has a child process running.
    pub fn begin<F>(
        sink: Arc<OutputSink>,
        cancel: CancelFlag,
        poll_interval: Duration,
        on_spawn: F,
    ) -> Result<Self, InterceptError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if INTERCEPTING.with(Cell::get) {
            return Err(InterceptError::Reentered);
        }
        // a panicking tool poisons the lock; the guarded data is `()`, nothing to repair
        let exclusive = EXCLUSIVE.lock().unwrap_or_else(PoisonError::into_inner);
        INTERCEPTING.with(|flag| flag.set(true));

        let console: Arc<dyn Console> = Arc::new(SinkConsole {
            sink: Arc::clone(&sink),
        });
        let previous_console = console::replace(Some(console));
        *lock_redirect() = Some(Arc::new(Redirect {
            sink,
            cancel,
            poll_interval,
            on_spawn: Box::new(on_spawn),
        }));

        Ok(Self {
            previous_console,
            _exclusive: exclusive,
        })
    }
}

impl Drop for Interception {
    fn drop(&mut self) {
        lock_redirect().take();
        console::replace(self.previous_console.take());
        INTERCEPTING.with(|flag| flag.set(false));
    }
}

fn lock_redirect() -> MutexGuard<'static, Option<Arc<Redirect>>> {
    REDIRECT.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Whether an interception is active on the current thread.
#[cfg(test)]
pub(crate) fn is_active() -> bool {
    INTERCEPTING.with(Cell::get)
}

/// Render a command line the way a shell would accept it.
pub fn join(command: &[String]) -> CommandLine {
    shlex::try_join(command.iter().map(String::as_str)).unwrap_or_else(|_| command.join(" "))
}

/// Run `command` to completion and return its exit code.
///
/// While an interception is active the child's stdout and stderr go to the job's sink
/// and the wait is sliced into `poll_interval` steps; a pending cancellation, or a child
/// that can no longer be waited on, kills the child and yields [`JobError::Interrupted`].
/// Otherwise the child inherits the terminal.
pub fn execute(command: &[String]) -> Result<i32, JobError> {
    execute_with(command, |_| {})
}

/// [`execute`], letting the caller adjust the [`Command`] (working directory, env) first.
pub fn execute_with<F>(command: &[String], configure: F) -> Result<i32, JobError>
where
    F: FnOnce(&mut Command),
{
    let (program, args) = command
        .split_first()
        .ok_or_else(|| JobError::Tool("Cannot execute an empty command".to_string()))?;
    let command_line = join(command);
    let launch_failure = |source: std::io::Error| JobError::LaunchFailure {
        command: command_line.clone(),
        source,
    };

    let mut cmd = Command::new(program);
    cmd.args(args);
    configure(&mut cmd);

    let redirect = lock_redirect().clone();
    let redirect = match redirect {
        Some(redirect) => redirect,
        None => {
            let status = cmd.status().map_err(launch_failure)?;
            return check_status(status, command_line);
        }
    };

    if redirect.cancel.is_requested() {
        return Err(JobError::Interrupted {
            command: command_line,
        });
    }

    let stdout = redirect.sink.stdio().map_err(launch_failure)?;
    let stderr = redirect.sink.stdio().map_err(launch_failure)?;
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .spawn()
        .map_err(launch_failure)?;
    debug!(pid = child.id(), command = %command_line, "spawned child");
    (redirect.on_spawn)();

    loop {
        match child.wait_timeout(redirect.poll_interval) {
            Ok(Some(status)) => return check_status(status, command_line),
            Ok(None) if redirect.cancel.is_requested() => {
                info!(pid = child.id(), command = %command_line, "cancelling child");
                kill_and_reap(&mut child);
                return Err(JobError::Interrupted {
                    command: command_line,
                });
            }
            Ok(None) => {}
            Err(err) => {
                warn!(pid = child.id(), error = %err, "lost track of child");
                kill_and_reap(&mut child);
                return Err(JobError::Interrupted {
                    command: command_line,
                });
            }
        }
    }
}

fn kill_and_reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!(pid = child.id(), error = %err, "kill failed, child probably exited");
    }
    if let Err(err) = child.wait() {
        warn!(pid = child.id(), error = %err, "failed to reap child");
    }
}

fn check_status(status: ExitStatus, command: CommandLine) -> Result<i32, JobError> {
    match status.code() {
        Some(0) => Ok(0),
        Some(code) => Err(JobError::NonZeroExit { code, command }),
        None => Err(JobError::Killed {
            signal: signal_of(status),
            command,
        }),
    }
}

#[cfg(unix)]
fn signal_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().unwrap_or_default()
}

#[cfg(not(unix))]
fn signal_of(_status: ExitStatus) -> i32 {
    0
}
