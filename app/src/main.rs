#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

mod command;

use command::{
    CommandStrategy, InfoStrategy, InitStrategy, ServeInput, ServeStrategy, VersionStrategy,
};

#[derive(Parser)]
#[command(name = "chatmq")]
#[command(about = "Bridge an MQTT chat topic to an OpenAI-compatible chat API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the broker and answer chat messages
    Serve {
        /// Broker host
        #[arg(long)]
        host: Option<String>,

        /// Broker port
        #[arg(short, long)]
        port: Option<u16>,

        /// Model to use
        #[arg(short = 'M', long)]
        model: Option<String>,

        /// Assemble replies from a streamed response
        #[arg(short, long)]
        streaming: bool,

        /// Publish bare reply text on this topic instead of a JSON envelope
        #[arg(long)]
        reply_topic: Option<String>,

        /// Handle messages from different users concurrently
        #[arg(short, long)]
        concurrent: bool,
    },
    /// Initialize configuration
    Init,
    /// Show configuration
    Info,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            model,
            streaming,
            reply_topic,
            concurrent,
        } => {
            ServeStrategy
                .execute(ServeInput {
                    host,
                    port,
                    model,
                    streaming,
                    reply_topic,
                    concurrent,
                })
                .await
        }
        Commands::Init => InitStrategy.execute(()).await,
        Commands::Info => InfoStrategy.execute(()).await,
        Commands::Version => VersionStrategy.execute(()).await,
    }
}
