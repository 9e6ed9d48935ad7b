use clap::{Parser, Subcommand};

/// Drive a dash server: run commands, cancel them, and watch their output
#[derive(Debug, Parser)]
pub struct ArgParser {
    /// The address of the server
    #[clap(
        short = 's',
        long = "server",
        env = "DASH_SERVER",
        default_value = "http://127.0.0.1:3274"
    )]
    pub server: String,
    /// The sub-command to use
    #[clap(subcommand)]
    pub sub_command: SubCommand,
}

#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
pub enum SubCommand {
    /// run a command, replacing whatever is running in the background
    Run {
        #[clap(long)]
        /// block until the command finishes instead of running it in the background
        wait: bool,

        #[clap(required = true, multiple_values = true, allow_hyphen_values = true)]
        /// the command and its arguments
        args: Vec<String>,
    },
    /// cancel the background command
    Cancel,
    /// show the background command's state
    Status,
    /// follow the background command's output
    Logs {
        #[clap(long)]
        /// start from the first line instead of from now
        replay: bool,
    },
}
