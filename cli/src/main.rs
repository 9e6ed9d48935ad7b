mod arg_parser;
mod client_cli;

use arg_parser::{ArgParser, SubCommand};
use client_cli::ClientCli;

use clap::Parser;
use std::error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn error::Error>> {
    let args = ArgParser::parse();
    let mut client = ClientCli::connect(&args.server).await?;

    match args.sub_command {
        SubCommand::Run { wait, args } => client.run(args, wait).await?,
        SubCommand::Cancel => client.cancel().await?,
        SubCommand::Status => client.status().await?,
        SubCommand::Logs { replay } => client.logs(replay).await?,
    }

    Ok(())
}
