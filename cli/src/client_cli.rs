use protobuf::{
    dash_client::DashClient, CancelRequest, CommandRequest, JobInfo, JobState, LogChunk,
    LogsRequest, StatusRequest,
};
use std::io::Write;
use tonic::{transport::Channel, Request, Status};
use uuid::Uuid;

pub struct ClientCli {
    inner: DashClient<Channel>,
}

fn describe(job: &JobInfo) -> String {
    let id = Uuid::from_slice(&job.job_id)
        .map(|id| id.to_string())
        .unwrap_or_else(|_| "<invalid id>".to_string());
    let state = match job.state() {
        JobState::Pending => "pending",
        JobState::Running => "running",
        JobState::Completed => "completed",
        JobState::Failed => "failed",
        JobState::Cancelled => "cancelled",
    };
    format!("{} [{}] $ {}", id, state, job.command)
}

impl ClientCli {
    pub async fn connect(server_addr: &str) -> Result<Self, tonic::transport::Error> {
        let inner = DashClient::connect(server_addr.to_string()).await?;
        Ok(Self { inner })
    }

    pub async fn run(&mut self, args: Vec<String>, wait: bool) -> Result<(), Status> {
        let request = Request::new(CommandRequest { args });
        let job = if wait {
            self.inner.run_sequential(request).await?.into_inner()
        } else {
            self.inner.run_parallel(request).await?.into_inner()
        };
        println!("{}", describe(&job));
        if !job.error.is_empty() {
            println!("{}", job.error);
        }
        println!("Output: {}", job.log_path);
        Ok(())
    }

    pub async fn cancel(&mut self) -> Result<(), Status> {
        let response = self.inner.cancel(Request::new(CancelRequest {})).await?;
        if response.into_inner().cancelled {
            println!("Cancellation requested");
        } else {
            println!("Nothing to cancel");
        }
        Ok(())
    }

    pub async fn status(&mut self) -> Result<(), Status> {
        let response = self.inner.status(Request::new(StatusRequest {})).await?;
        match response.into_inner().job {
            Some(job) => println!("{}", describe(&job)),
            None => println!("No command has been run yet"),
        }
        Ok(())
    }

    /// Print output as it arrives until the server ends the stream.
    pub async fn logs(&mut self, replay: bool) -> Result<(), Status> {
        let response = self.inner.stream_logs(Request::new(LogsRequest { replay })).await?;
        let mut stream = response.into_inner();
        let mut stdout = std::io::stdout();
        while let Some(LogChunk { text }) = stream.message().await? {
            print!("{}", text);
            let _ = stdout.flush();
        }
        Ok(())
    }
}
