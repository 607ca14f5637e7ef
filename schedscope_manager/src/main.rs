use clap::{Parser, Subcommand};
use colored::*;
use schedscope_core::ReportFormat;
use std::path::PathBuf;

use schedscope_manager::commands::{self, replay::ReplayOptions, run::RunOptions};
use schedscope_manager::dashboard;

#[derive(Parser)]
#[command(name = "schedscope")]
#[command(about = "Run, watch and replay CPU scheduler simulations")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (YAML or TOML)
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the scheduler and stream its events
    Run {
        /// Launch file describing algorithm and jobs
        launch_file: PathBuf,

        /// Scheduler executable (overrides config)
        #[arg(short = 'b', long = "binary")]
        binary: Option<String>,

        /// Only print the final timeline and metrics
        #[arg(short = 'q', long = "quiet")]
        quiet: bool,
    },

    /// Replay a stored run
    Replay {
        /// Run id
        run_id: String,

        /// Show the state at this tick
        #[arg(short = 't', long = "tick")]
        tick: Option<u64>,

        /// Animate from the first tick
        #[arg(short = 'p', long = "play", conflicts_with = "export")]
        play: bool,

        /// Playback speed multiplier
        #[arg(short = 's', long = "speed")]
        speed: Option<f64>,

        /// Export a report instead (csv, markdown or json)
        #[arg(short = 'e', long = "export")]
        export: Option<ReportFormat>,

        /// Write the report here instead of stdout
        #[arg(short = 'o', long = "output", requires = "export")]
        output: Option<PathBuf>,
    },

    /// List stored runs
    Runs {
        /// Delete the run with this id
        #[arg(short = 'd', long = "delete")]
        delete: Option<String>,

        /// Print as JSON
        #[arg(long = "json")]
        json: bool,
    },

    /// Start the web dashboard
    Serve {
        /// Port (overrides config)
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run_command(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_command(cli: Cli) -> anyhow::Result<()> {
    let mut config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            launch_file,
            binary,
            quiet,
        } => commands::run::run_scheduler(
            config,
            RunOptions {
                launch_file,
                binary,
                quiet,
            },
        ),

        Commands::Replay {
            run_id,
            tick,
            play,
            speed,
            export,
            output,
        } => commands::replay::run_replay(
            config,
            ReplayOptions {
                run_id,
                tick,
                play,
                speed,
                export,
                output,
            },
        ),

        Commands::Runs { delete, json } => commands::runs::run_runs(config, delete, json),

        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(dashboard::run(config))
        }
    }
}
