mod config;
mod services;

use clap::Parser;
use config::Config;
use joblib::{Context, ExecutionPool};
use protobuf::dash_server::DashServer;
use services::dashservice::DashService;
use std::future::Future;
use std::net::SocketAddr;
use tonic::transport::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    let addr = config.addr();
    serve(addr, config.into_context(), shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "cannot listen for ctrl-c, shutdown only by kill");
        std::future::pending::<()>().await;
    }
    info!("ctrl-c received");
}

/// Serve until `shutdown` resolves. The active command is cancelled and waited for
/// before this returns, so no child process outlives the server.
async fn serve<F>(
    addr: SocketAddr,
    context: Context,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let pool = ExecutionPool::spawn(context)?;
    let watchdog = joblib::spawn_shutdown_watchdog(pool.clone(), shutdown);
    let dash_service = DashService::new(pool.clone());
    info!(%addr, "dash server listening");

    Server::builder()
        .add_service(DashServer::new(dash_service))
        .serve_with_shutdown(addr, async move { pool.closed().await })
        .await?;

    watchdog.await?;
    info!("dash server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use joblib::{PoolConfig, Program};
    use protobuf::dash_client::DashClient;
    use protobuf::{
        CancelRequest, CommandRequest, JobInfo, JobState, LogChunk, LogsRequest, StatusRequest,
    };
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tonic::transport::Channel;
    use tonic::Streaming;

    fn context() -> Context {
        Context::new(Program::passthrough()).with_config(PoolConfig {
            poll_interval: Duration::from_millis(50),
            stream_interval: Duration::from_millis(10),
            ..PoolConfig::default()
        })
    }

    // start the server, returning the trigger that shuts it down
    async fn start_server(addr: &'static str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = rx.await;
            };
            let _ = serve(addr.parse().unwrap(), context(), shutdown).await;
        });
        tx
    }

    async fn build_client(server_addr: &'static str) -> DashClient<Channel> {
        // the server may still be binding, retry for a bit
        for _ in 0..50 {
            if let Ok(client) = DashClient::connect(format!("http://{}", server_addr)).await {
                return client;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("server at {} never came up", server_addr);
    }

    fn command(parts: &[&str]) -> CommandRequest {
        CommandRequest {
            args: parts.iter().map(|s| s.to_string()).collect(),
        }
    }

    async fn logs(client: &mut DashClient<Channel>, replay: bool) -> Streaming<LogChunk> {
        client
            .stream_logs(LogsRequest { replay })
            .await
            .expect("no stream response")
            .into_inner()
    }

    async fn read_until(stream: &mut Streaming<LogChunk>, needle: &str) -> String {
        let mut received = String::new();
        while !received.contains(needle) {
            let chunk = tokio::time::timeout(Duration::from_secs(10), stream.message())
                .await
                .expect("log stream stalled")
                .expect("log stream error")
                .expect("log stream ended");
            received.push_str(&chunk.text);
        }
        received
    }

    async fn wait_for_state(client: &mut DashClient<Channel>, job: &JobInfo, state: JobState) {
        for _ in 0..200 {
            let status = client
                .status(StatusRequest {})
                .await
                .expect("status")
                .into_inner();
            if let Some(active) = status.job {
                if active.job_id == job.job_id && active.state() == state {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("job {} never reached {:?}", job.command, state);
    }

    #[tokio::test]
    async fn echo_streams_header_and_output() {
        let addr = "[::1]:50061";
        let _shutdown = start_server(addr).await;
        let mut client = build_client(addr).await;

        let status = client.status(StatusRequest {}).await.unwrap().into_inner();
        assert!(status.job.is_none());
        let err = client.stream_logs(LogsRequest { replay: false }).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);

        let job = client
            .run_parallel(command(&["echo", "hello"]))
            .await
            .expect("Bad run response")
            .into_inner();
        assert_eq!(job.command, "echo hello");

        let mut stream = logs(&mut client, true).await;
        let received = read_until(&mut stream, "Success!").await;
        assert!(received.starts_with("$ echo hello\n"), "{:?}", received);
        assert!(received.contains("hello\n"));
        wait_for_state(&mut client, &job, JobState::Completed).await;
    }

    #[tokio::test]
    async fn cancel_interrupts_running_command() {
        let addr = "[::1]:50062";
        let _shutdown = start_server(addr).await;
        let mut client = build_client(addr).await;

        let job = client
            .run_parallel(command(&["sleep", "10"]))
            .await
            .unwrap()
            .into_inner();
        let mut stream = logs(&mut client, true).await;
        wait_for_state(&mut client, &job, JobState::Running).await;

        let cancelled = client.cancel(CancelRequest {}).await.unwrap().into_inner();
        assert!(cancelled.cancelled);
        let received = read_until(&mut stream, "Cancelled!").await;
        assert!(received.contains("Command interrupted: sleep 10"));
        wait_for_state(&mut client, &job, JobState::Cancelled).await;
    }

    #[tokio::test]
    async fn failing_command_reports_exit_status() {
        let addr = "[::1]:50063";
        let _shutdown = start_server(addr).await;
        let mut client = build_client(addr).await;

        let job = client.run_parallel(command(&["false"])).await.unwrap().into_inner();
        let mut stream = logs(&mut client, true).await;
        let received = read_until(&mut stream, "status 1").await;
        assert!(received.contains("Command failed with status 1: false"));
        wait_for_state(&mut client, &job, JobState::Failed).await;
        let status = client.status(StatusRequest {}).await.unwrap().into_inner();
        assert_eq!(
            status.job.unwrap().error,
            "Command failed with status 1: false"
        );

        let sequential = client
            .run_sequential(command(&["false"]))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(sequential.state(), JobState::Failed);
        assert_eq!(sequential.error, "Command failed with status 1: false");
        assert_eq!(sequential.command, "false");
    }

    #[tokio::test]
    async fn second_command_replaces_the_first() {
        let addr = "[::1]:50064";
        let _shutdown = start_server(addr).await;
        let mut client = build_client(addr).await;

        let first = client
            .run_parallel(command(&["sleep", "10"]))
            .await
            .unwrap()
            .into_inner();
        // an open stream keeps the first job's output alive after it is replaced
        let mut first_stream = logs(&mut client, true).await;
        let second = client
            .run_parallel(command(&["echo", "second"]))
            .await
            .unwrap()
            .into_inner();
        assert_ne!(first.job_id, second.job_id);

        let first_output = read_until(&mut first_stream, "Cancelled!").await;
        assert!(first_output.starts_with("$ sleep 10\n"), "{:?}", first_output);
        wait_for_state(&mut client, &second, JobState::Completed).await;
    }

    #[tokio::test]
    async fn two_viewers_each_get_a_header() {
        let addr = "[::1]:50065";
        let _shutdown = start_server(addr).await;
        let mut client = build_client(addr).await;

        client
            .run_parallel(command(&["sh", "-c", "echo start; sleep 0.5; echo finish"]))
            .await
            .unwrap();
        let mut early = logs(&mut client, false).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut late = logs(&mut client.clone(), false).await;

        let early = read_until(&mut early, "Success!").await;
        let late = read_until(&mut late, "Success!").await;
        assert!(early.starts_with("$ sh -c "), "{:?}", early);
        assert!(late.starts_with("$ sh -c "), "{:?}", late);
        assert!(early.contains("finish\n"));
        assert!(late.contains("finish\n"));
    }

    #[tokio::test]
    async fn shutdown_cancels_active_command_and_ends_streams() {
        let addr = "[::1]:50066";
        let shutdown = start_server(addr).await;
        let mut client = build_client(addr).await;

        let job = client
            .run_parallel(command(&["sleep", "10"]))
            .await
            .unwrap()
            .into_inner();
        let mut stream = logs(&mut client, true).await;
        wait_for_state(&mut client, &job, JobState::Running).await;

        shutdown.send(()).unwrap();
        let mut received = String::new();
        loop {
            match tokio::time::timeout(Duration::from_secs(10), stream.message()).await {
                Ok(Ok(Some(chunk))) => received.push_str(&chunk.text),
                Ok(_) => break,
                Err(_) => panic!("log stream did not end on shutdown"),
            }
        }
        assert!(received.starts_with("$ sleep 10\n"), "{:?}", received);
    }
}
