//! Batchline CLI.
//!
//! Micro-batching queue consumer with at-least-once delivery into SQLite.
//!
//! # Quick Start
//!
//! ```bash
//! # Produce and consume 12 events through an in-process broker
//! batchline demo --count 12
//!
//! # Inspect what was stored
//! batchline query
//!
//! # Against RabbitMQ (built with --features amqp)
//! batchline declare
//! batchline produce --count 100
//! batchline consume --batch-size 10 --prefetch 10
//! ```

mod commands;
mod style;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::Overrides;

/// Batchline - micro-batching queue consumer with at-least-once delivery.
#[derive(Parser)]
#[command(name = "batchline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory containing batchline.toml.
    #[arg(short = 'C', long, global = true, default_value = ".")]
    project: String,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Produce synthetic events into an in-process broker and consume them.
    Demo {
        /// Number of events to produce.
        #[arg(short = 'n', long, default_value_t = 12)]
        count: u64,

        /// Keep records in memory instead of the SQLite store.
        #[arg(long)]
        in_memory: bool,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Print the events stored in the SQLite database.
    Query {
        /// Show at most this many rows.
        #[arg(short, long)]
        limit: Option<usize>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Configuration commands.
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Consume events from RabbitMQ into the store.
    #[cfg(feature = "amqp")]
    Consume {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Publish synthetic events to RabbitMQ.
    #[cfg(feature = "amqp")]
    Produce {
        /// Stop after this many events (default: run until Ctrl+C).
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Upper bound of the random pause between events, in milliseconds.
        #[arg(long, default_value_t = 500)]
        max_jitter_ms: u64,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Declare the queue on RabbitMQ.
    #[cfg(feature = "amqp")]
    Declare {
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration.
    Show {
        /// Output format (text, json, toml).
        #[arg(short, long, default_value = "text")]
        format: String,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Validate configuration files.
    Validate,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    style::set_no_color(cli.no_color || std::env::var_os("NO_COLOR").is_some());

    let project = cli.project.as_str();

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Demo {
            count,
            in_memory,
            overrides,
        } => {
            let config = commands::load_config(project, &overrides)?;
            commands::demo::run(&config, count, in_memory)
        }
        Commands::Query { limit, overrides } => {
            let config = commands::load_config(project, &overrides)?;
            commands::query::run(&config, limit)
        }
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show { format, overrides } => {
                let config = commands::load_config(project, &overrides)?;
                commands::config::show(&config, &format)
            }
            ConfigCommands::Validate => {
                let config = commands::load_config(project, &Overrides::default())?;
                commands::config::validate(project, &config);
                Ok(())
            }
        },
        #[cfg(feature = "amqp")]
        Commands::Consume { overrides } => {
            let config = commands::load_config(project, &overrides)?;
            commands::consume::run(&config)
        }
        #[cfg(feature = "amqp")]
        Commands::Produce {
            count,
            max_jitter_ms,
            overrides,
        } => {
            let config = commands::load_config(project, &overrides)?;
            commands::produce::run(&config, count, max_jitter_ms)
        }
        #[cfg(feature = "amqp")]
        Commands::Declare { overrides } => {
            let config = commands::load_config(project, &overrides)?;
            commands::declare::run(&config)
        }
    }
}
