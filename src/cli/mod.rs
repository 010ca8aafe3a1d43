pub mod config;

use std::path::PathBuf;

use ansi_term::{Colour, Style};
use anyhow::Result;
use clap::Parser;
use config::{MonitorConfig, StartupError};
use tracing::info;

use crate::{
    classifier::model::Provider,
    monitor::start_monitor,
    overlay::{backend_name, challenge::ChallengeKind},
    utils::{logging::enable_logging, runtime::single_thread_runtime},
};

#[derive(Parser, Debug)]
#[command(name = "nannybot", version, long_about = None)]
#[command(about = "Checks your screen every so often and locks it when you're not working")]
pub struct Args {
    #[arg(long, help = "Description of the task you should be working on")]
    pub task: String,
    #[arg(
        long,
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Check interval in seconds"
    )]
    pub interval: u64,
    #[arg(long, value_enum, default_value_t = Provider::Gemini, help = "Vision model to use")]
    pub model: Provider,
    #[arg(
        long = "model-name",
        help = "Model id to request instead of the provider's default"
    )]
    pub model_name: Option<String>,
    #[arg(
        long,
        value_enum,
        default_value_t = ChallengeKind::Template,
        help = "Where apology messages come from"
    )]
    pub challenge: ChallengeKind,
    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
    #[arg(long = "log-dir", help = "Also write logs to daily files in this directory")]
    pub log_dir: Option<PathBuf>,
}

fn print_banner(config: &MonitorConfig) {
    let bold = Style::new().bold();
    println!(
        "Monitoring work for task: {}",
        Colour::Green.bold().paint(config.task.to_string())
    );
    println!(
        "Checking every {} seconds with {}",
        bold.paint(config.interval.as_secs().to_string()),
        bold.paint(config.model.model.as_str())
    );
    println!("Press Ctrl+C to stop monitoring");
}

pub fn run_cli() -> Result<()> {
    let args = Args::parse();

    enable_logging(args.log_dir.as_deref(), args.verbose)?;

    let config = MonitorConfig::from_args(&args, config::env_lookup(config::env_file_vars()))?;
    let backend = backend_name().ok_or(StartupError::NoOverlayBackend)?;
    info!("Using the {backend} lock screen with {:?}", config.model);

    print_banner(&config);
    single_thread_runtime()?.block_on(start_monitor(config))?;
    println!("\nStopping work monitoring...");
    Ok(())
}
