use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use clusterwatch::{commands, init_tracing, serve, Overrides, Settings};
use clusterwatch_aggregator::http::DEFAULT_LISTEN_ADDR;
use clusterwatch_aggregator::RemoteClient;

#[derive(Parser, Debug)]
#[command(name = "clusterwatch", version)]
#[command(about = "Aggregate cluster telemetry into time-aligned snapshots")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the aggregator and its HTTP API until Ctrl-C
    Serve(ServeArgs),

    /// Push a file's bytes into a source queue
    Push {
        #[command(flatten)]
        server: ServerArg,

        /// Source queue key (node name, or __cluster_data)
        #[arg(short, long)]
        key: String,

        /// File whose content is the payload
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Print the raw content of a source queue, one payload per line
    Pull {
        #[command(flatten)]
        server: ServerArg,

        /// Source queue key
        #[arg(short, long)]
        key: String,
    },

    /// Print snapshots whose watermark lies in [from, to]
    Snapshots {
        #[command(flatten)]
        server: ServerArg,

        /// Lower bound in milliseconds (inclusive)
        #[arg(long, allow_negative_numbers = true)]
        from: Option<f64>,

        /// Upper bound in milliseconds (inclusive)
        #[arg(long, allow_negative_numbers = true)]
        to: Option<f64>,

        /// Write JSON to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete the snapshot history
    Clear {
        #[command(flatten)]
        server: ServerArg,
    },
}

#[derive(Args, Debug)]
struct ServerArg {
    /// Server address (host:port)
    #[arg(short, long, default_value = DEFAULT_LISTEN_ADDR)]
    server: String,
}

impl ServerArg {
    fn client(&self) -> RemoteClient {
        RemoteClient::new(self.server.clone())
    }
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Settings file (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<String>,

    /// Aggregation interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Number of snapshots to retain
    #[arg(long)]
    capacity: Option<usize>,

    /// Alignment window in milliseconds (defaults to the interval)
    #[arg(long)]
    window_ms: Option<u64>,

    /// Use static membership with these nodes (repeatable)
    #[arg(short, long = "node")]
    nodes: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Command::Serve(args) => {
            let mut settings = Settings::load(args.config.as_deref())
                .context("Failed to load settings")?;
            settings.apply(Overrides {
                listen_addr: args.listen,
                interval_ms: args.interval_ms,
                capacity: args.capacity,
                window_ms: args.window_ms,
                nodes: args.nodes,
            });
            serve(settings).await
        }
        Command::Push { server, key, file } => commands::push(&server.client(), &key, &file).await,
        Command::Pull { server, key } => {
            commands::pull(&server.client(), &key, &mut std::io::stdout()).await?;
            Ok(())
        }
        Command::Snapshots {
            server,
            from,
            to,
            output,
        } => {
            let count = commands::snapshots(
                &server.client(),
                from,
                to,
                output.as_deref(),
                &mut std::io::stdout(),
            )
            .await?;
            if output.is_some() {
                eprintln!("Wrote {} snapshots", count);
            }
            Ok(())
        }
        Command::Clear { server } => commands::clear(&server.client()).await,
    }
}
