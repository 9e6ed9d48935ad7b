use super::messages::PoolMessage;
use super::Jobs;
use crate::errors;
use crate::job::Job;
use crate::types::Args;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Owns the active background job. Messages are handled one at a time, so replacing the
/// active job (cancel, wait, start) can't interleave with another replacement.
///
/// The active job is published on a `watch` channel, so status, cancel and viewers never
/// queue behind a replacement that is still waiting for the old job to stop.
pub(crate) struct PoolActor {
    inbox: mpsc::Receiver<PoolMessage>,
    jobs: Arc<Jobs>,
    active: watch::Sender<Option<Arc<Job>>>,
}

impl PoolActor {
    pub(crate) fn spawn(
        inbox: mpsc::Receiver<PoolMessage>,
        jobs: Arc<Jobs>,
    ) -> watch::Receiver<Option<Arc<Job>>> {
        let (active, receiver) = watch::channel(None);
        let actor = Self {
            inbox,
            jobs,
            active,
        };
        tokio::spawn(async move { actor.run().await });
        receiver
    }

    async fn run(mut self) {
        use self::PoolMessage::*;
        while let Some(msg) = self.inbox.recv().await {
            match msg {
                RunParallel { args, response } => {
                    let result = self.run_parallel(args).await;
                    let _ = response.send(result);
                }
                Shutdown { response } => {
                    info!("execution pool shutting down");
                    self.stop_active().await;
                    let _ = response.send(());
                    return;
                }
            }
        }
        // every handle dropped, make sure the child doesn't outlive us
        self.stop_active().await;
    }

    async fn run_parallel(&mut self, args: Args) -> errors::Result<Arc<Job>> {
        self.stop_active().await;

        let job = self.jobs.create(args)?;
        self.active.send_replace(Some(Arc::clone(&job)));

        let jobs = Arc::clone(&self.jobs);
        let runner = Arc::clone(&job);
        tokio::task::spawn_blocking(move || jobs.execute_background(&runner));
        Ok(job)
    }

    /// Cancel the active job, if any, and wait for it to finish.
    async fn stop_active(&mut self) {
        let active = self.active.borrow().clone();
        if let Some(job) = active {
            if job.state().is_terminal() {
                return;
            }
            job.request_cancel();
            let state = job.wait_terminal().await;
            debug!(job_id = %job.id(), %state, "previous job stopped");
        }
    }
}
