use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{LevelFilter, info};
use simplelog::WriteLogger;

use pdfmill::config::Config;
use pdfmill::engine::LopdfEngine;
use pdfmill::task::{SubmitOutcome, TaskDispatcher, TaskEvent, TaskMode, TaskOutcome, TaskParams};

#[derive(Parser)]
#[command(name = "pdfmill", about = "PDF manipulation task runner", version)]
struct Cli {
    /// Log file location
    #[arg(long, default_value = "pdfmill.log")]
    log_file: PathBuf,

    /// Log verbosity (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute one task and wait for it to finish
    Run {
        /// Task mode, e.g. merge, rotate, watermark
        mode: String,
        /// Task parameters as a JSON object
        params: String,
    },
    /// List the available task modes
    Modes,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    WriteLogger::init(
        cli.log_level,
        simplelog::Config::default(),
        File::create(&cli.log_file)
            .with_context(|| format!("cannot create {}", cli.log_file.display()))?,
    )?;

    match cli.command {
        Command::Modes => {
            for mode in TaskMode::ALL {
                println!("{:<18} {}", mode.as_str(), mode.description());
            }
            Ok(())
        }
        Command::Run { mode, params } => run_one(&mode, &params),
    }
}

fn run_one(mode: &str, params: &str) -> Result<()> {
    let Some(mode) = TaskMode::from_name(mode) else {
        bail!("unknown mode {mode:?}; see `pdfmill modes`");
    };
    let params = TaskParams::from_value(
        serde_json::from_str(params).context("parameters are not valid JSON")?,
    )?;

    let config = Config::load();
    let engine = Arc::new(LopdfEngine::new());
    let mut dispatcher = TaskDispatcher::new(engine, &config)?;

    let id = match dispatcher.submit(mode, params) {
        SubmitOutcome::Started(id) => id,
        SubmitOutcome::Rejected(reason) => bail!("{reason}"),
        SubmitOutcome::Queued => unreachable!("nothing can be in flight yet"),
    };
    info!("submitted {} as {id:?}", mode.as_str());

    let exit = loop {
        let mut done = None;
        for event in dispatcher.poll_events() {
            match event {
                TaskEvent::Progress { value, .. } => eprint!("\r{value:>3}%"),
                TaskEvent::Finished { outcome, .. } => done = Some(outcome),
            }
        }
        if let Some(outcome) = done {
            eprintln!();
            break match outcome {
                TaskOutcome::Succeeded(message) => {
                    println!("{message}");
                    Ok(())
                }
                TaskOutcome::Cancelled(message) => {
                    println!("cancelled: {message}");
                    Ok(())
                }
                TaskOutcome::Failed { message, .. } => Err(anyhow::anyhow!(message)),
            };
        }
        std::thread::sleep(Duration::from_millis(25));
    };

    dispatcher.shutdown();
    exit
}
