// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use gmp_router::config::Config;
use gmp_router::logging::{Facility, LogRegistry, Logger};
use gmp_router::protocols::router::IntfRegistry;
use gmp_router::supervisor::{
    GmpDriver, GmpSupervisor, Response, Scenario, SupervisorCommand, SupervisorOutput,
};
use gmp_router::{log_error, log_info};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug, PartialEq)]
enum Command {
    /// Run the engine, reading JSON commands from stdin and writing outputs to stdout
    Run {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Replay a scenario file in virtual time
    Simulate { scenario: PathBuf },
    /// Validate a configuration file
    CheckConfig { config: PathBuf },
    /// Print the default configuration
    DefaultConfig,
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run { config } => {
            let runtime = tokio::runtime::Runtime::new()?;
            let result = runtime.block_on(run(&config));
            // A pending blocking read on stdin must not hold up exit
            runtime.shutdown_background();
            result?
        }
        Command::Simulate { scenario } => simulate(&scenario)?,
        Command::CheckConfig { config } => {
            let config = Config::load_from_file(&config)?;
            config.validate()?;
            println!(
                "Configuration OK: {} interface(s), proto {}",
                config.interfaces.len(),
                config.instance.proto.as_str()
            );
        }
        Command::DefaultConfig => print!("{}", Config::default().to_json5()),
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

async fn run(path: &Path) -> Result<()> {
    let config = Config::load_from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    let registry = LogRegistry::stderr_json();
    let logger = registry.logger();
    let driver = GmpDriver::from_config(&config, IntfRegistry::new(), logger.clone(), Instant::now())?;

    let (command_tx, command_rx) = mpsc::channel::<SupervisorCommand>(64);
    let (output_tx, mut output_rx) = mpsc::channel::<SupervisorOutput>(256);
    let supervisor = tokio::spawn(GmpSupervisor::new(driver, command_rx, output_tx).run());

    let reader_logger = logger.clone();
    let reader = tokio::spawn(async move {
        let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log_error!(reader_logger, Facility::Supervisor, "Reading stdin: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SupervisorCommand>(&line) {
                Ok(command) => {
                    if command_tx.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let output = SupervisorOutput::Response {
                        response: Response::Error {
                            message: format!("invalid command: {}", e),
                        },
                    };
                    if let Ok(json) = serde_json::to_string(&output) {
                        println!("{}", json);
                    }
                }
            }
        }
    });

    while let Some(output) = output_rx.recv().await {
        print_json(&output)?;
    }
    supervisor.await?;
    reader.abort();
    log_info!(logger, Facility::Supervisor, "gmprd exiting");
    Ok(())
}

fn simulate(path: &Path) -> Result<()> {
    let scenario = Scenario::load_from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    let logger = Logger::stderr_json();
    for output in scenario.run(logger)? {
        print_json(&output)?;
    }
    Ok(())
}
