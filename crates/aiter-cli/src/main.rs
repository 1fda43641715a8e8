//! Aiter command-line driver
//!
//! Runs the bundled scheduler scenarios: the stepper demo, concurrent
//! counters and an environment/self-test report.

mod commands;
mod output;

use aiter_engine::SchedulerConfig;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "aiter")]
#[command(about = "Cooperative task scheduler demos", long_about = None)]
#[command(version)]
struct Cli {
    /// Scheduler configuration file (TOML); defaults to AITER_* variables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Color output: auto, always, never
    #[arg(long, default_value = "auto", global = true)]
    color: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interleave three steppers, pause, then run a fourth
    Demo {
        /// Pause between the first three steppers and the last one
        #[arg(long, default_value_t = 5000)]
        pause_ms: u64,
        /// Index of the last step each stepper produces
        #[arg(long, default_value_t = aiter_engine::stepper::DEFAULT_LAST_STEP)]
        last: u32,
    },

    /// Run one counter per argument concurrently and gather the results
    Counters {
        /// Count targets
        #[arg(required = true)]
        counts: Vec<u64>,
    },

    /// Show effective configuration and run a scheduler self-test
    Info,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    log::debug!("effective configuration: {:?}", config);

    match cli.command {
        Commands::Demo { pause_ms, last } => commands::demo::execute(
            config,
            commands::demo::DemoArgs {
                pause_ms,
                last,
                color: cli.color,
            },
        ),
        Commands::Counters { counts } => commands::counters::execute(config, &counts, &cli.color),
        Commands::Info => commands::info::execute(config, &cli.color),
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .try_init()
        .ok();
}

/// Read configuration from `path`, or from the environment when absent
fn load_config(path: Option<&Path>) -> anyhow::Result<SchedulerConfig> {
    let Some(path) = path else {
        return Ok(SchedulerConfig::from_env()?);
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = parse_config(&text)
        .with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(config)
}

fn parse_config(text: &str) -> anyhow::Result<SchedulerConfig> {
    let config: SchedulerConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
}
