mod actor;
mod messages;

use self::{actor::PoolActor, messages::PoolMessage};
use crate::context::{Context, PoolConfig};
use crate::errors::{self, JobError, PoolError};
use crate::job::Job;
use crate::sink::{self, OutputSink};
use crate::streamer::{LogStreamer, StreamStart};
use crate::tool::{Registry, Tool};
use crate::types::Args;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

/// An `ExecutionPool` runs the tool, at most one background job at a time.
///
/// This struct is an actor handle: the active job is owned by the actor spawned in
/// `ExecutionPool::spawn`, and the handle can be cloned freely across tasks.
#[derive(Clone)]
pub struct ExecutionPool {
    sender: mpsc::Sender<PoolMessage>,
    active: watch::Receiver<Option<Arc<Job>>>,
    jobs: Arc<Jobs>,
}

/// A finished foreground run. The job's output is intact whatever the outcome.
pub struct Finished {
    pub job: Arc<Job>,
    pub error: Option<JobError>,
}

impl Finished {
    pub fn into_result(self) -> errors::Result<Arc<Job>> {
        match self.error {
            Some(err) => Err(err.into()),
            None => Ok(self.job),
        }
    }
}

impl ExecutionPool {
    /// Spawn a new pool. Must be called from within a tokio runtime.
    pub fn spawn(context: Context) -> io::Result<Self> {
        let Context {
            tool,
            registry,
            config,
        } = context;
        let log_dir = sink::log_dir(config.log_dir.as_deref())?;
        info!(path = ?log_dir.path(), "job output directory");

        let (sender, inbox) = mpsc::channel(config.message_capacity.max(1));
        let jobs = Arc::new(Jobs {
            tool,
            registry,
            config,
            log_dir,
        });
        let active = PoolActor::spawn(inbox, Arc::clone(&jobs));
        Ok(Self {
            sender,
            active,
            jobs,
        })
    }

    /// Start `args` in the background and return right away.
    ///
    /// A job that is still running is cancelled first, and the new one is only started
    /// once the old one has finished.
    pub async fn run_parallel(&self, args: Args) -> errors::Result<Arc<Job>> {
        self.request(|response| PoolMessage::RunParallel { args, response })
            .await?
    }

    /// Run `args` and wait for it to finish. Leaves the active background job alone.
    pub async fn run_sequential(&self, args: Args) -> errors::Result<Finished> {
        let job = self.jobs.create(args)?;
        let jobs = Arc::clone(&self.jobs);
        let runner = Arc::clone(&job);
        let result = tokio::task::spawn_blocking(move || jobs.execute(&runner))
            .await
            .map_err(|err| PoolError::Job(JobError::Tool(err.to_string())))?;
        Ok(Finished {
            job,
            error: result.err(),
        })
    }

    /// Ask the active background job to stop. Returns `false` when nothing is running.
    pub async fn request_cancel(&self) -> errors::Result<bool> {
        match self.active_job().await? {
            Some(job) if !job.state().is_terminal() => {
                job.request_cancel();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// The active background job, or the last one if it has finished.
    ///
    /// Answers right away, also while a replacement is waiting for the old job to stop.
    pub async fn active_job(&self) -> errors::Result<Option<Arc<Job>>> {
        if self.sender.is_closed() {
            return Err(PoolError::Closed);
        }
        Ok(self.active.borrow().clone())
    }

    /// A new streamer over the active background job's output.
    pub async fn stream_logs(&self, start: StreamStart) -> errors::Result<Option<LogStreamer>> {
        let interval = self.jobs.config.stream_interval;
        Ok(self
            .active_job()
            .await?
            .map(|job| LogStreamer::new(&job, start, interval)))
    }

    /// Cancel the active job, wait for it, and stop accepting messages.
    pub async fn shutdown(&self) -> errors::Result<()> {
        self.request(|response| PoolMessage::Shutdown { response }).await
    }

    /// Resolves once the pool has shut down.
    pub async fn closed(&self) {
        self.sender.closed().await
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> PoolMessage,
    ) -> errors::Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|_| PoolError::Closed)?;
        rx.await.map_err(|_| PoolError::Closed)
    }
}

/// Shut `pool` down once `signal` resolves, e.g. on ctrl-c.
pub fn spawn_shutdown_watchdog<F>(pool: ExecutionPool, signal: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        signal.await;
        if let Err(err) = pool.shutdown().await {
            debug!(error = %err, "execution pool already closed");
        }
    })
}

/// What every job of a pool shares.
pub(crate) struct Jobs {
    tool: Arc<dyn Tool>,
    registry: Option<Arc<dyn Registry>>,
    config: PoolConfig,
    log_dir: Arc<TempDir>,
}

impl Jobs {
    fn create(&self, args: Args) -> io::Result<Arc<Job>> {
        let id = Uuid::new_v4();
        let sink = OutputSink::create(&self.log_dir, id)?;
        Ok(Arc::new(Job::new(
            id,
            args,
            sink,
            Arc::clone(&self.tool),
            self.config.poll_interval,
        )))
    }

    /// Run `job` on the current (blocking) thread, reloading the registry on success.
    fn execute(&self, job: &Job) -> Result<(), JobError> {
        job.run()?;
        if let Some(registry) = &self.registry {
            registry.reload();
        }
        Ok(())
    }

    fn execute_background(&self, job: &Job) {
        match self.execute(job) {
            Ok(()) => {}
            Err(JobError::Intercept(err)) => {
                error!(job_id = %job.id(), error = %err, "output capture is broken, aborting");
                std::process::abort();
            }
            Err(err) => debug!(job_id = %job.id(), error = %err, "background job failed"),
        }
    }
}
