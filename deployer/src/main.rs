//! Webstack Deployer CLI

use clap::{Arg, ArgAction, Command};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use webstack_deployer::{aws, deployments, stack, Config, Error, Target};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

/// Subcommand that prints a template without deploying it
const SYNTH_CMD: &str = "synth";

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .required(true)
        .help("Path to YAML config file")
        .value_parser(clap::value_parser!(PathBuf))
}

fn target_arg() -> Arg {
    Arg::new("target")
        .long("target")
        .required(true)
        .help("Stack to operate on: shared, prod, staging, or dev")
        .value_parser(|s: &str| s.parse::<Target>().map_err(|e| e.to_string()))
}

/// Writes the target's template to stdout or a file.
fn synth(config_path: &Path, target: Target, output: Option<&PathBuf>) -> Result<(), Error> {
    let config = Config::load(config_path)?;
    let body = stack::synthesize(&config, target)?.render()?;
    match output {
        Some(path) => {
            std::fs::write(path, body)?;
            info!(
                stack = stack::stack_name(&config, target).as_str(),
                path = ?path,
                "wrote template"
            );
        }
        None => println!("{body}"),
    }
    Ok(())
}

/// Entrypoint for the Webstack Deployer CLI
#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Define application
    let matches = Command::new("webstack-deployer")
        .version(crate_version())
        .about("Declare and deploy the infrastructure of a web application.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new(SYNTH_CMD)
                .about("Print the CloudFormation template of a stack without deploying it.")
                .arg(config_arg())
                .arg(target_arg())
                .arg(
                    Arg::new("output")
                        .long("output")
                        .help("Write the template to this file instead of stdout")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new(aws::CMD)
                .about("Deploy stacks with CloudFormation change sets.")
                .subcommand(
                    Command::new(aws::DEPLOY_CMD)
                        .about("Create or update a stack from a YAML configuration file.")
                        .arg(config_arg())
                        .arg(target_arg())
                        .arg(
                            Arg::new("plan")
                                .long("plan")
                                .help("Compute and log the change set without executing it")
                                .action(ArgAction::SetTrue),
                        ),
                )
                .subcommand(
                    Command::new(aws::DESTROY_CMD)
                        .about("Delete a stack and wait until it is gone.")
                        .arg(config_arg())
                        .arg(target_arg()),
                )
                .subcommand(
                    Command::new(aws::LIST_CMD)
                        .about("List all active deployments (created but not destroyed)."),
                ),
        )
        .get_matches();

    // Create logger (stdout is reserved for templates)
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    // Parse subcommands
    match matches.subcommand() {
        Some((SYNTH_CMD, matches)) => {
            let config_path = matches.get_one::<PathBuf>("config").unwrap();
            let target = *matches.get_one::<Target>("target").unwrap();
            let output = matches.get_one::<PathBuf>("output");
            if let Err(e) = synth(config_path, target, output) {
                error!(error=?e, "failed to synthesize template");
            } else {
                return std::process::ExitCode::SUCCESS;
            }
        }
        Some((aws::CMD, aws_matches)) => match aws_matches.subcommand() {
            Some((aws::DEPLOY_CMD, matches)) => {
                let config_path = matches.get_one::<PathBuf>("config").unwrap();
                let target = *matches.get_one::<Target>("target").unwrap();
                let plan = matches.get_flag("plan");
                if let Err(e) = aws::deploy(config_path, target, plan).await {
                    error!(error=?e, "failed to deploy stack");
                } else {
                    return std::process::ExitCode::SUCCESS;
                }
            }
            Some((aws::DESTROY_CMD, matches)) => {
                let config_path = matches.get_one::<PathBuf>("config").unwrap();
                let target = *matches.get_one::<Target>("target").unwrap();
                if let Err(e) = aws::destroy(config_path, target).await {
                    error!(error=?e, "failed to destroy stack");
                } else {
                    return std::process::ExitCode::SUCCESS;
                }
            }
            Some((aws::LIST_CMD, _)) => {
                if let Err(e) = deployments::list() {
                    error!(error=?e, "failed to list deployments");
                } else {
                    return std::process::ExitCode::SUCCESS;
                }
            }
            Some((cmd, _)) => {
                error!(cmd, "invalid subcommand");
            }
            None => {
                error!("no subcommand provided");
            }
        },
        Some((cmd, _)) => {
            error!(cmd, "invalid subcommand");
        }
        None => {
            error!("no subcommand provided");
        }
    }
    std::process::ExitCode::FAILURE
}
