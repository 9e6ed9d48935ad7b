use crate::errors::JobError;
use crate::events::JobState;
use crate::intercept::Interception;
use crate::sink::OutputSink;
use crate::tool::Tool;
use crate::types::{Args, CommandLine, JobId};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Marker appended to the output when a job completes.
pub const SUCCESS_FOOTER: &str = "Success!";
/// Marker appended to the output when a job is cancelled.
pub const CANCELLED_FOOTER: &str = "Cancelled!";

/// Cooperative cancellation flag. Setting it more than once has no further effect.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Returns `true` for the call that actually set the flag.
    pub fn request(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One tracked invocation of the tool.
pub struct Job {
    id: JobId,
    args: Args,
    command_line: CommandLine,
    sink: Arc<OutputSink>,
    cancel: CancelFlag,
    state: Arc<watch::Sender<JobState>>,
    started: AtomicBool,
    error: OnceLock<String>,
    tool: Arc<dyn Tool>,
    poll_interval: Duration,
}

impl Job {
    pub fn new(
        id: JobId,
        args: Args,
        sink: OutputSink,
        tool: Arc<dyn Tool>,
        poll_interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(JobState::Pending);
        Self {
            id,
            command_line: tool.command_line(&args),
            args,
            sink: Arc::new(sink),
            cancel: CancelFlag::default(),
            state: Arc::new(state),
            started: AtomicBool::new(false),
            error: OnceLock::new(),
            tool,
            poll_interval,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn sink(&self) -> &Arc<OutputSink> {
        &self.sink
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    /// Why the job failed, once it has.
    pub fn error(&self) -> Option<&str> {
        self.error.get().map(String::as_str)
    }

    /// Ask the job to stop. Observed at the next poll of the child process.
    pub fn request_cancel(&self) {
        if self.cancel.request() {
            info!(job_id = %self.id, "cancellation requested");
        }
    }

    /// Wait until the job has reached a terminal state.
    pub async fn wait_terminal(&self) -> JobState {
        let mut rx = self.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state.is_terminal() {
                return state;
            }
            if rx.changed().await.is_err() {
                // the sender lives in `self`, so this only happens while tearing down
                return self.state();
            }
        }
    }

    /// Run the job to a terminal state, blocking the calling thread.
    ///
    /// The job turns `Running` once the tool has a child process going. Tool output and
    /// any failure message end up in the sink; the error is also returned for callers
    /// that wait on the result. A job runs at most once, later calls fail right away.
    pub fn run(&self) -> Result<(), JobError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(JobError::AlreadyStarted {
                command: self.command_line.clone(),
            });
        }
        let state = Arc::clone(&self.state);
        let on_spawn = move || {
            advance(&state, JobState::Running);
        };
        let interception = match Interception::begin(
            Arc::clone(&self.sink),
            self.cancel.clone(),
            self.poll_interval,
            on_spawn,
        ) {
            Ok(interception) => interception,
            Err(err) => {
                let err = JobError::from(err);
                self.finish(JobState::Failed, Some(&err));
                return Err(err);
            }
        };
        info!(job_id = %self.id, command = %self.command_line, "job started");

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.tool.invoke(&self.args)))
            .unwrap_or_else(|_| {
                Err(JobError::Tool(format!("Command crashed: {}", self.command_line)))
            });
        drop(interception);

        let state = match &result {
            Ok(()) => JobState::Completed,
            Err(err) if err.is_interrupted() => JobState::Cancelled,
            Err(_) => JobState::Failed,
        };
        self.finish(state, result.as_ref().err());
        result
    }

    fn finish(&self, state: JobState, error: Option<&JobError>) {
        if let Some(err) = error {
            let message = err.to_string();
            self.record(&message);
            let _ = self.error.set(message);
        }
        match state {
            JobState::Completed => {
                self.record(SUCCESS_FOOTER);
                // tools that work in-process finish without ever spawning a child
                self.advance(JobState::Running);
            }
            JobState::Cancelled => self.record(CANCELLED_FOOTER),
            _ => {}
        }
        self.advance(state);
        info!(job_id = %self.id, %state, "job finished");
    }

    fn record(&self, line: &str) {
        if let Err(err) = self.sink.append_line(line) {
            warn!(job_id = %self.id, error = %err, "failed to write to job output");
        }
    }

    fn advance(&self, next: JobState) -> bool {
        advance(&self.state, next)
    }
}

/// Move to `next` if the transition is legal; terminal states never change.
fn advance(state: &watch::Sender<JobState>, next: JobState) -> bool {
    state.send_if_modified(|state| {
        if state.can_advance_to(next) {
            *state = next;
            true
        } else {
            false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{self, Color, Style};
    use crate::intercept;
    use crate::sink;
    use crate::tool::Program;
    use uuid::Uuid;

    fn job(tool: Arc<dyn Tool>, args: &[&str]) -> Arc<Job> {
        let dir = sink::log_dir(None).unwrap();
        let id = Uuid::new_v4();
        let sink = OutputSink::create(&dir, id).unwrap();
        Arc::new(Job::new(
            id,
            args.iter().map(|s| s.to_string()).collect(),
            sink,
            tool,
            Duration::from_millis(50),
        ))
    }

    fn output(job: &Job) -> String {
        std::fs::read_to_string(job.sink().path()).unwrap()
    }

    /// Run `job` in the background, collecting every state it publishes.
    async fn run_recording_states(job: &Arc<Job>) -> Vec<JobState> {
        let mut states = job.subscribe();
        let runner = job.clone();
        let handle = tokio::task::spawn_blocking(move || runner.run());
        let mut seen = vec![*states.borrow_and_update()];
        while !seen[seen.len() - 1].is_terminal() {
            states.changed().await.unwrap();
            seen.push(*states.borrow_and_update());
        }
        let _ = handle.await.unwrap();
        seen
    }

    /// A tool that prints in-process before delegating to a child.
    struct Chatty;

    impl Tool for Chatty {
        fn command_line(&self, args: &[String]) -> CommandLine {
            format!("chatty {}", intercept::join(args))
        }

        fn invoke(&self, args: &[String]) -> Result<(), JobError> {
            console::echo(&console::style("Starting", Style::fg(Color::Green).bold()));
            intercept::execute(args)?;
            console::echo("Done");
            Ok(())
        }
    }

    struct Broken;

    impl Tool for Broken {
        fn command_line(&self, _args: &[String]) -> CommandLine {
            "broken".to_string()
        }

        fn invoke(&self, _args: &[String]) -> Result<(), JobError> {
            Err(JobError::Tool("Error: missing configuration".to_string()))
        }
    }

    struct Panicky;

    impl Tool for Panicky {
        fn command_line(&self, _args: &[String]) -> CommandLine {
            "panicky".to_string()
        }

        fn invoke(&self, _args: &[String]) -> Result<(), JobError> {
            panic!("tool bug")
        }
    }

    #[tokio::test]
    async fn completes_and_records_output() {
        let job = job(Arc::new(Program::passthrough()), &["echo", "hello"]);
        assert_eq!(job.state(), JobState::Pending);
        let runner = job.clone();
        tokio::task::spawn_blocking(move || runner.run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.wait_terminal().await, JobState::Completed);
        assert_eq!(output(&job), "hello\nSuccess!\n");
    }

    #[tokio::test]
    async fn in_process_output_is_captured_without_styling() {
        let job = job(Arc::new(Chatty), &["echo", "child"]);
        let runner = job.clone();
        tokio::task::spawn_blocking(move || runner.run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(output(&job), "Starting\nchild\nDone\nSuccess!\n");
        assert_eq!(job.command_line(), "chatty echo child");
    }

    #[tokio::test]
    async fn non_zero_exit_fails_with_status() {
        let job = job(Arc::new(Program::passthrough()), &["false"]);
        let runner = job.clone();
        let err = tokio::task::spawn_blocking(move || runner.run())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, JobError::NonZeroExit { code: 1, .. }));
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(output(&job), "Command failed with status 1: false\n");
        assert_eq!(job.error(), Some("Command failed with status 1: false"));
    }

    #[tokio::test]
    async fn launch_failure_never_reports_running() {
        let job = job(
            Arc::new(Program::passthrough()),
            &["definitely-not-a-real-program-4242"],
        );
        let states = run_recording_states(&job).await;
        assert_eq!(states, vec![JobState::Pending, JobState::Failed]);
        let error = job.error().unwrap();
        assert!(error.starts_with("Command failed to start: "), "{}", error);
        assert_eq!(output(&job), format!("{}\n", error));
    }

    #[tokio::test]
    async fn tool_error_before_spawning_goes_straight_to_failed() {
        let job = job(Arc::new(Broken), &[]);
        let states = run_recording_states(&job).await;
        assert_eq!(states, vec![JobState::Pending, JobState::Failed]);
    }

    #[tokio::test]
    async fn cancelled_before_spawning_never_runs() {
        let job = job(Arc::new(Program::passthrough()), &["sleep", "10"]);
        job.request_cancel();
        let states = run_recording_states(&job).await;
        assert_eq!(states, vec![JobState::Pending, JobState::Cancelled]);
        assert_eq!(output(&job), "Command interrupted: sleep 10\nCancelled!\n");
    }

    #[tokio::test]
    async fn a_job_runs_at_most_once() {
        let job = job(Arc::new(Program::passthrough()), &["echo", "once"]);
        let runner = job.clone();
        let second = tokio::task::spawn_blocking(move || {
            runner.run().unwrap();
            runner.run()
        })
        .await
        .unwrap();
        assert!(matches!(second, Err(JobError::AlreadyStarted { .. })));
        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(output(&job), "once\nSuccess!\n");
        assert_eq!(job.error(), None);
    }

    #[tokio::test]
    async fn tool_error_message_is_recorded_verbatim() {
        let job = job(Arc::new(Broken), &[]);
        let runner = job.clone();
        let _ = tokio::task::spawn_blocking(move || runner.run()).await.unwrap();
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(output(&job), "Error: missing configuration\n");
    }

    #[tokio::test]
    async fn panicking_tool_fails_the_job() {
        let job = job(Arc::new(Panicky), &[]);
        let runner = job.clone();
        let result = tokio::task::spawn_blocking(move || runner.run()).await.unwrap();
        assert!(matches!(result, Err(JobError::Tool(_))));
        assert_eq!(job.state(), JobState::Failed);
        assert!(!intercept::is_active());
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_interrupts() {
        let job = job(Arc::new(Program::passthrough()), &["sleep", "10"]);
        let runner = job.clone();
        let handle = tokio::task::spawn_blocking(move || runner.run());

        let mut states = job.subscribe();
        while *states.borrow_and_update() != JobState::Running {
            states.changed().await.unwrap();
        }
        job.request_cancel();
        job.request_cancel();

        let state = tokio::time::timeout(Duration::from_secs(5), job.wait_terminal())
            .await
            .expect("job did not stop");
        assert_eq!(state, JobState::Cancelled);
        assert!(handle.await.unwrap().unwrap_err().is_interrupted());
        assert_eq!(output(&job), "Command interrupted: sleep 10\nCancelled!\n");
    }

    #[tokio::test]
    async fn terminal_state_is_never_left() {
        let job = job(Arc::new(Program::passthrough()), &["true"]);
        let runner = job.clone();
        tokio::task::spawn_blocking(move || runner.run())
            .await
            .unwrap()
            .unwrap();
        assert!(!job.advance(JobState::Running));
        assert!(!job.advance(JobState::Failed));
        assert_eq!(job.state(), JobState::Completed);
    }
}
