use std::{path::PathBuf, process::ExitCode, str::FromStr};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use horizon_core::ControllerKind;
use horizon_logger::TelemetryLogger;
use log::LevelFilter;

use crate::commands::{
    convert_logs::convert_log,
    run::{run, RunArgs},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlantKind {
    /// Inverted pendulum on a cart, starting slightly tilted.
    Cartpole,
    /// Heated room following a setpoint schedule.
    Thermal,
    /// Mass-spring-damper driven to a new position.
    Oscillator,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run a closed-loop simulation and print a summary of the tracking performance.
    #[clap(name = "run")]
    Run {
        #[clap(long, default_value = "cartpole")]
        plant: PlantKind,

        /// One of `nonlinear`, `linear` or `adaptive`.
        #[clap(long, default_value = "nonlinear")]
        controller: ControllerKind,

        /// Simulated duration in seconds.
        #[clap(long, default_value = "10.0")]
        duration: f64,

        /// Settings file. Created from the plant's preset if it does not exist.
        #[clap(long, short = 'f')]
        settings: Option<PathBuf>,

        /// Standard deviation of the measurement noise.
        #[clap(long, default_value = "0.0")]
        noise: f64,

        #[clap(long, default_value = "0")]
        seed: u64,
    },

    /// Convert a telemetry log file to JSON.
    #[clap(name = "convert")]
    Convert {
        #[clap(short, long)]
        input: PathBuf,
        #[clap(short, long)]
        output: PathBuf,
    },
}

#[derive(Debug, Parser)]
#[command(name = "horizon")]
pub struct Cli {
    #[clap(subcommand)]
    command: Command,

    #[clap(long, global = true, default_value = "info")]
    pub log_level: String,

    /// `auto` for a timestamped file in the local data directory, `none` to only log to stdout,
    /// or a path.
    #[clap(long, global = true, default_value = "auto")]
    pub log_file: String,
}

impl Cli {
    pub fn start(self) -> ExitCode {
        match self.command.clone() {
            Command::Run {
                plant,
                controller,
                duration,
                settings,
                noise,
                seed,
            } => {
                let logger = match self.setup_logging() {
                    Ok(logger) => logger,
                    Err(err) => {
                        eprintln!("Error setting up logging: {}", err);
                        return ExitCode::FAILURE;
                    }
                };
                let result = run(RunArgs {
                    plant,
                    controller,
                    duration,
                    settings_file: settings,
                    noise,
                    seed,
                });
                if let Some(logger) = logger {
                    logger.sync();
                }
                match result {
                    Ok(metrics) => {
                        println!("{}", metrics);
                        ExitCode::SUCCESS
                    }
                    Err(err) => {
                        eprintln!("Error running simulation: {}", err);
                        ExitCode::FAILURE
                    }
                }
            }
            Command::Convert { input, output } => match convert_log(&input, &output) {
                Ok(_) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("Error converting logs: {}", err);
                    ExitCode::FAILURE
                }
            },
        }
    }

    /// Install the global logger. Returns the telemetry logger if a log file is written.
    fn setup_logging(&self) -> Result<Option<&'static TelemetryLogger>> {
        let level = LevelFilter::from_str(&self.log_level)
            .with_context(|| format!("Invalid log level: {}", self.log_level))?;
        let stdout_env = env_logger::Builder::new()
            .filter_level(level)
            .format_timestamp(None)
            .format_module_path(false)
            .build();

        let log_file_path = match self.log_file.as_str() {
            "none" => {
                log::set_boxed_logger(Box::new(stdout_env))
                    .map_err(|err| anyhow!("Failed to set logger: {}", err))?;
                log::set_max_level(level);
                return Ok(None);
            }
            "auto" => auto_log_file_path()?,
            path => {
                let path = PathBuf::from(path);
                if path.exists() {
                    bail!("Log file already exists: {}", path.display());
                }
                path
            }
        };

        println!("Saving logs to {}", log_file_path.display());
        let logger = TelemetryLogger::init_with_env_logger(log_file_path, stdout_env);
        log::set_logger(logger).map_err(|err| anyhow!("Failed to set logger: {}", err))?;
        // The log file always gets the per-solve details
        log::set_max_level(level.max(LevelFilter::Debug));
        Ok(Some(logger))
    }
}

fn auto_log_file_path() -> Result<PathBuf> {
    let time = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let filename = format!("horizon-{time}.log");
    let path = dirs::data_local_dir()
        .map(|p| p.join("horizon").join(&filename))
        .unwrap_or_else(|| PathBuf::from(&filename));
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    }
    Ok(path)
}
