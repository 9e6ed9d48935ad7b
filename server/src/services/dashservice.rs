use futures::{Stream, StreamExt};
use joblib::errors::{JobError, PoolError};
use joblib::{ExecutionPool, Job, JobState, StreamStart};
use protobuf::dash_server::Dash;
use protobuf::{
    CancelRequest, CancelResponse, CommandRequest, JobInfo, LogChunk, LogsRequest, StatusRequest,
    StatusResponse,
};
use std::pin::Pin;
use tonic::{Request, Response, Status};
use tracing::info;

/// gRPC front of the execution pool: one endpoint per pool operation.
pub struct DashService {
    pool: ExecutionPool,
}

impl DashService {
    pub fn new(pool: ExecutionPool) -> Self {
        Self { pool }
    }
}

fn wire_state(state: JobState) -> protobuf::JobState {
    match state {
        JobState::Pending => protobuf::JobState::Pending,
        JobState::Running => protobuf::JobState::Running,
        JobState::Completed => protobuf::JobState::Completed,
        JobState::Failed => protobuf::JobState::Failed,
        JobState::Cancelled => protobuf::JobState::Cancelled,
    }
}

fn job_info(job: &Job) -> JobInfo {
    let mut info = JobInfo {
        job_id: job.id().as_bytes().to_vec(),
        command: job.command_line().to_string(),
        log_path: job.sink().path().display().to_string(),
        error: job.error().unwrap_or_default().to_string(),
        ..JobInfo::default()
    };
    info.set_state(wire_state(job.state()));
    info
}

fn pool_status(err: PoolError) -> Status {
    match err {
        PoolError::Closed => Status::unavailable(err.to_string()),
        PoolError::Sink(_) | PoolError::Job(_) => Status::internal(err.to_string()),
    }
}

#[tonic::async_trait]
impl Dash for DashService {
    type StreamLogsStream = Pin<Box<dyn Stream<Item = Result<LogChunk, Status>> + Send>>;

    async fn run_parallel(
        &self,
        req: Request<CommandRequest>,
    ) -> Result<Response<JobInfo>, Status> {
        let CommandRequest { args } = req.into_inner();
        let job = self.pool.run_parallel(args).await.map_err(pool_status)?;
        info!(job_id = %job.id(), command = %job.command_line(), "background command submitted");
        Ok(Response::new(job_info(&job)))
    }

    async fn run_sequential(
        &self,
        req: Request<CommandRequest>,
    ) -> Result<Response<JobInfo>, Status> {
        let CommandRequest { args } = req.into_inner();
        let finished = self.pool.run_sequential(args).await.map_err(pool_status)?;
        match &finished.error {
            Some(JobError::Intercept(err)) => Err(Status::internal(err.to_string())),
            _ => Ok(Response::new(job_info(&finished.job))),
        }
    }

    async fn cancel(
        &self,
        _req: Request<CancelRequest>,
    ) -> Result<Response<CancelResponse>, Status> {
        let cancelled = self.pool.request_cancel().await.map_err(pool_status)?;
        Ok(Response::new(CancelResponse { cancelled }))
    }

    async fn status(
        &self,
        _req: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let job = self.pool.active_job().await.map_err(pool_status)?;
        Ok(Response::new(StatusResponse {
            job: job.map(|job| job_info(&job)),
        }))
    }

    async fn stream_logs(
        &self,
        req: Request<LogsRequest>,
    ) -> Result<Response<Self::StreamLogsStream>, Status> {
        let start = if req.into_inner().replay {
            StreamStart::Beginning
        } else {
            StreamStart::End
        };
        let streamer = self
            .pool
            .stream_logs(start)
            .await
            .map_err(pool_status)?
            .ok_or_else(|| Status::not_found("no command has been run yet"))?;

        // the client hanging up drops the stream; a pool shutdown ends it
        let pool = self.pool.clone();
        let chunks = streamer
            .into_stream()
            .take_until(async move { pool.closed().await })
            .map(|text| Ok(LogChunk { text }));
        Ok(Response::new(Box::pin(chunks) as Self::StreamLogsStream))
    }
}
