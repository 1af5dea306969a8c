//! `gateway-ctl`: drive the gateway from the command line.
//!
//! ```text
//! gateway-ctl run --user alice --exp-id 42 --profile profile.json --duration 60
//! gateway-ctl check-profile profile.json
//! gateway-ctl send set_time
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use iotlab_gateway::config::{GatewayConfig, DEFAULT_CONFIG_PATH};
use iotlab_gateway::control_node::{
    Command, ControlLink, ControlNode, IotlabControlNode, Measure, MeasuresHandler,
};
use iotlab_gateway::logging::{self, ExperimentLogSink};
use iotlab_gateway::profile::Profile;
use iotlab_gateway::registry::NodeRegistry;
use iotlab_gateway::{ExperimentOrchestrator, GatewayError};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "gateway-ctl")]
#[command(author, version, about = "IoT testbed gateway control", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Gateway configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print decoded measures on stdout
    #[arg(long, global = true)]
    print_measures: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one experiment
    Run {
        /// Experiment owner
        #[arg(long)]
        user: String,

        /// Experiment id
        #[arg(long)]
        exp_id: u32,

        /// Firmware flashed on the open node
        #[arg(long)]
        firmware: Option<PathBuf>,

        /// Monitoring profile (JSON)
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Expiration timeout in seconds, 0 disables it
        #[arg(long, default_value_t = 0)]
        timeout: u64,

        /// Stop after this many seconds instead of waiting for the timeout
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Parse and validate a profile
    CheckProfile {
        /// Profile file (JSON)
        file: PathBuf,
    },

    /// Send one raw command to the control node
    Send {
        /// Command name and arguments
        #[arg(required = true)]
        tokens: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            if let Some(GatewayError::Busy(_)) = err.downcast_ref::<GatewayError>() {
                eprintln!("service unavailable: {}", err);
            } else {
                eprintln!("error: {:#}", err);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = GatewayConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let sink = ExperimentLogSink::new();
    logging::init(&config.gateway.log_level, sink.clone())?;

    let handler = cli.print_measures.then(measures_printer);

    match cli.command {
        Commands::Run {
            user,
            exp_id,
            firmware,
            profile,
            timeout,
            duration,
        } => {
            if timeout == 0 && duration.is_none() {
                bail!("either --duration or a non-zero --timeout is required");
            }
            let profile = profile
                .map(|path| read_profile(&path, &config.gateway.alim))
                .transpose()?;
            let orchestrator = build_orchestrator(&config, handler, sink)?;
            run_experiment(
                &orchestrator,
                &user,
                exp_id,
                firmware.as_deref(),
                profile,
                Duration::from_secs(timeout),
                duration.map(Duration::from_secs),
            )
        }
        Commands::CheckProfile { file } => {
            let profile = read_profile(&file, &config.gateway.alim)?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Send { tokens } => send_raw(&config, handler, &tokens),
    }
}

fn read_profile(path: &Path, alim: &str) -> Result<Profile> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let profile = Profile::from_json(&json, alim)?;
    profile.validate()?;
    Ok(profile)
}

fn measures_printer() -> MeasuresHandler {
    Arc::new(|line: &str| match Measure::parse(line) {
        Some(measure) => println!("{:?}", measure),
        None => println!("{}", line),
    })
}

fn build_orchestrator(
    config: &GatewayConfig,
    handler: Option<MeasuresHandler>,
    sink: ExperimentLogSink,
) -> Result<ExperimentOrchestrator> {
    let mut registry = NodeRegistry::with_builtin();
    if let Some(handler) = handler {
        registry.register_control_node("iotlab", move |config| {
            Ok(Box::new(IotlabControlNode::with_measures_handler(config, handler.clone()))
                as Box<dyn ControlNode>)
        });
    }
    Ok(ExperimentOrchestrator::from_config(config, &registry, sink)?)
}

fn run_experiment(
    orchestrator: &ExperimentOrchestrator,
    user: &str,
    exp_id: u32,
    firmware: Option<&Path>,
    profile: Option<Profile>,
    timeout: Duration,
    duration: Option<Duration>,
) -> Result<ExitCode> {
    let started = orchestrator.exp_start(user, exp_id, firmware, profile, timeout)?;
    println!("exp_start: {}", started);

    let stopped = match duration {
        Some(duration) => {
            thread::sleep(duration);
            orchestrator.exp_stop()?
        }
        None => {
            // the expiration timer stops the experiment
            loop {
                thread::sleep(Duration::from_millis(500));
                match orchestrator.current() {
                    Ok(None) => break,
                    Ok(Some(_)) => {}
                    Err(err) if err.is_busy() => {}
                    Err(err) => return Err(err.into()),
                }
            }
            info!("Experiment expired");
            0
        }
    };
    println!("exp_stop: {}", stopped);

    if started == 0 && stopped == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn send_raw(
    config: &GatewayConfig,
    handler: Option<MeasuresHandler>,
    tokens: &[String],
) -> Result<ExitCode> {
    let Some((name, args)) = tokens.split_first() else {
        bail!("empty command");
    };
    let mut link = ControlLink::new(config.control_node.clone());
    if let Some(handler) = handler {
        link = link.with_measures_handler(handler);
    }
    if link.start(None) != 0 {
        bail!("control node serial program did not start");
    }

    let command = Command::new(name.as_str()).args(args);
    let result = link.send(&command);
    link.stop();
    match result {
        Ok(answer) => {
            println!("{}", answer);
            Ok(if answer.is_ack_for(command.name()) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Err(err) => {
            println!("no answer: {}", err);
            Ok(ExitCode::FAILURE)
        }
    }
}
