//! Run the bootstrap procedure on this instance.

use clap::{Arg, ArgAction, Command};
use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Mutex,
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{filter::LevelFilter, prelude::*};
use webstack_bootstrap::{Config, Error, Executor, Procedure, SystemRunner, DEFAULT_CONFIG_PATH};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Optional positional branch override
const BRANCH_ARG: &str = "branch";

/// Flag for the configuration file
const CONFIG_FLAG: &str = "config";

/// Flag for the transcript location
const LOG_FLAG: &str = "log";

/// Flag to print the rendered script instead of running it
const RENDER_FLAG: &str = "render";

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

/// Variable carrying the region (set by the instance environment or the operator)
const REGION_VARIABLE: &str = "AWS_REGION";

/// Entrypoint for the bootstrap CLI
#[tokio::main]
async fn main() -> ExitCode {
    let matches = Command::new("webstack-bootstrap")
        .version(crate_version())
        .about("Bring this instance from bare OS to a running application.")
        .arg(
            Arg::new(BRANCH_ARG)
                .help("Branch to deploy instead of the environment default")
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new(CONFIG_FLAG)
                .long(CONFIG_FLAG)
                .default_value(DEFAULT_CONFIG_PATH)
                .help("Path to YAML config file")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(LOG_FLAG)
                .long(LOG_FLAG)
                .help("Path of the transcript (overrides the configured path)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(RENDER_FLAG)
                .long(RENDER_FLAG)
                .help("Print the procedure as a bash script instead of running it")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .get_matches();
    let level = if matches.get_flag(VERBOSE_FLAG) {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let config_path = matches.get_one::<PathBuf>(CONFIG_FLAG).unwrap();
    let config = Config::load(config_path);

    // Rendering writes the script to stdout, so logs go to stderr only
    if matches.get_flag(RENDER_FLAG) {
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .init();
        return match config.and_then(|config| Procedure::new(&config)) {
            Ok(procedure) => {
                print!("{}", procedure.render());
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, path = ?config_path, "failed to render procedure");
                ExitCode::FAILURE
            }
        };
    }

    // Create logger (stdout and transcript)
    let log_path = matches
        .get_one::<PathBuf>(LOG_FLAG)
        .cloned()
        .or_else(|| config.as_ref().ok().map(|c| c.log.clone()))
        .unwrap_or_else(|| PathBuf::from(webstack_bootstrap::DEFAULT_LOG_PATH));
    let transcript = init_logging(&log_path, level);
    if let Err(e) = &transcript {
        warn!(error = %e, "transcript unavailable, logging to stdout only");
    }

    let mut config = match config {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, path = ?config_path, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    // Resolve region from the caller's environment, falling back to the configuration
    if let Some(region) = std::env::var(REGION_VARIABLE)
        .ok()
        .filter(|region| !region.is_empty())
    {
        config.region = region;
    }
    let procedure = match Procedure::new(&config) {
        Ok(procedure) => procedure,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let branch = matches.get_one::<String>(BRANCH_ARG);
    info!(
        environment = %config.environment,
        region = config.region.as_str(),
        branch = ?branch,
        transcript = ?log_path,
        "starting bootstrap"
    );

    let executor = Executor::new(SystemRunner);
    match executor.run(&procedure, branch.map(String::as_str)).await {
        Ok(report) => {
            info!(
                branch = report.branch.as_str(),
                cloned = report.cloned,
                "instance bootstrapped"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "bootstrap failed");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Installs a subscriber writing to stdout and appending to the transcript at `path`.
///
/// If the transcript cannot be opened, only the stdout subscriber is installed.
fn init_logging(path: &Path, level: Level) -> Result<(), Error> {
    let stdout = tracing_subscriber::fmt::layer().with_target(false);
    let filter = LevelFilter::from_level(level);
    let file = path
        .parent()
        .map(fs::create_dir_all)
        .transpose()
        .and_then(|_| OpenOptions::new().create(true).append(true).open(path))
        .map_err(|source| Error::Log {
            path: path.to_path_buf(),
            source,
        });
    match file {
        Ok(file) => {
            let transcript = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file));
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .with(transcript)
                .init();
            Ok(())
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .init();
            Err(e)
        }
    }
}
