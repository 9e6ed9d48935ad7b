use clap::Parser;
use joblib::{Context, PoolConfig, Program};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Serve a dashboard control plane for a command-line tool over gRPC
#[derive(Debug, Parser)]
#[clap(name = "dash-server")]
pub struct Config {
    /// Address to listen on
    #[clap(long, env = "DASH_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,
    /// Port to listen on
    #[clap(short, long, env = "DASH_PORT", default_value_t = 3274)]
    pub port: u16,
    /// Program every command is passed to (e.g. `tutor`); commands run as-is when unset
    #[clap(long, env = "DASH_TOOL")]
    pub tool: Option<String>,
    /// Project root, used as the working directory of every command
    #[clap(long, env = "DASH_ROOT")]
    pub root: Option<PathBuf>,
    /// Where to keep command output; defaults to the system temp dir
    #[clap(long, env = "DASH_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
    /// How often a running command is checked for cancellation
    #[clap(long, env = "DASH_POLL_INTERVAL_MS", default_value_t = 500)]
    pub poll_interval_ms: u64,
    /// How often caught-up log streams look for new output
    #[clap(long, env = "DASH_STREAM_INTERVAL_MS", default_value_t = 100)]
    pub stream_interval_ms: u64,
}

impl Config {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn into_context(self) -> Context {
        let mut program = match self.tool {
            Some(tool) => Program::new(tool),
            None => Program::passthrough(),
        };
        if let Some(root) = self.root {
            program = program.current_dir(root);
        }
        Context::new(program).with_config(PoolConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            stream_interval: Duration::from_millis(self.stream_interval_ms),
            log_dir: self.log_dir,
            ..PoolConfig::default()
        })
    }
}
