use crate::errors;
use crate::job::Job;
use crate::types::Args;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Requests that change which job is active. Reads go through the `watch` channel.
pub enum PoolMessage {
    RunParallel {
        args: Args,
        response: oneshot::Sender<errors::Result<Arc<Job>>>,
    },
    Shutdown {
        response: oneshot::Sender<()>,
    },
}
