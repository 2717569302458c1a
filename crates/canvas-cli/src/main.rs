//! Canvas CLI - drive a project canvas from the terminal.
//!
//! Talks to the project store configured in `client.json` (or
//! `CANVAS_API_URL`) through the same engine a graphical canvas uses.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use canvas_client::{ClientConfig, HttpRemoteStore, API_URL_ENV};
use canvas_core::RelationType;
use canvas_engine::{CanvasEngine, EngineConfig, ViewProfile};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{config as config_cmd, edit, graph, run, watch};

/// Canvas CLI - inspect and edit a project canvas.
#[derive(Parser, Debug)]
#[command(
    name = "canvas",
    author,
    version,
    about = "Canvas: inspect and edit a project canvas backed by a remote store",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Project store base URL (overrides the config file).
    #[arg(long, global = true, env = API_URL_ENV)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Mount the canvas and print engine events until interrupted.
    Watch {
        /// Polling profile: canvas (500 ms) or light (2 s).
        #[arg(long, default_value = "canvas")]
        profile: ViewProfile,
    },

    /// Print the render graph as JSON.
    Graph {
        /// Write to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pretty-print the JSON.
        #[arg(long)]
        pretty: bool,
    },

    /// Summarise the project: counts, folders and running files.
    Status,

    /// Run a file and stream its output.
    Run {
        /// File id.
        file: String,
    },

    /// Stop a running file.
    Stop {
        /// File id.
        file: String,
    },

    /// Connect two nodes with a typed edge.
    Connect {
        from: String,
        to: String,

        /// Relation type, e.g. depends_on, calls, imports.
        #[arg(short, long, default_value = "depends_on")]
        relation: RelationType,

        /// Optional edge description.
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Move a file or folder to absolute canvas coordinates. Files dropped
    /// over a folder are filed into it.
    Move {
        id: String,
        #[arg(allow_hyphen_values = true)]
        x: f64,
        #[arg(allow_hyphen_values = true)]
        y: f64,
    },

    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration.
    Show,

    /// Set a configuration value.
    Set {
        /// Configuration key.
        key: String,
        /// Configuration value.
        value: String,
    },

    /// Get a configuration value.
    Get {
        /// Configuration key.
        key: String,
    },

    /// Reset configuration to defaults.
    Reset,

    /// Show path to config file.
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    // RUST_LOG, when set, wins over the switches.
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // `config set` edits the saved file; URL overrides only affect this run.
    let mut persisted = ClientConfig::load_persisted().context("Failed to load configuration")?;
    let mut config = persisted.clone().with_env_overrides();
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }

    match cli.command {
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show => config_cmd::show(&config)?,
            ConfigCommands::Set { key, value } => config_cmd::set(&mut persisted, &key, &value)?,
            ConfigCommands::Get { key } => config_cmd::get(&config, &key)?,
            ConfigCommands::Reset => config_cmd::reset()?,
            ConfigCommands::Path => match ClientConfig::config_file_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("(no config file path available)"),
            },
        },

        Commands::Watch { profile } => {
            let engine = connect(config, EngineConfig::for_profile(profile))?;
            watch::execute(&engine).await?;
        }

        Commands::Graph { output, pretty } => {
            let engine = connect(config, EngineConfig::default())?;
            graph::execute(&engine, output.as_deref(), pretty).await?;
        }

        Commands::Status => {
            let engine = connect(config, EngineConfig::default())?;
            graph::status(&engine).await?;
        }

        Commands::Run { file } => {
            let engine = connect(config, EngineConfig::for_profile(ViewProfile::Light))?;
            let success = run::execute(&engine, &file.into()).await?;
            engine.teardown();
            if !success {
                std::process::exit(1);
            }
        }

        Commands::Stop { file } => {
            let engine = connect(config, EngineConfig::default())?;
            run::stop(&engine, &file.into()).await?;
        }

        Commands::Connect {
            from,
            to,
            relation,
            description,
        } => {
            let engine = connect(config, EngineConfig::default())?;
            edit::connect(&engine, from.into(), to.into(), relation, description).await?;
        }

        Commands::Move { id, x, y } => {
            let engine = connect(config, EngineConfig::default())?;
            edit::move_node(&engine, &id.into(), x, y).await?;
        }
    }

    Ok(())
}

fn connect(config: ClientConfig, engine_config: EngineConfig) -> Result<CanvasEngine> {
    let client = HttpRemoteStore::new(config).context("Failed to create store client")?;
    Ok(CanvasEngine::new(Arc::new(client), engine_config))
}
