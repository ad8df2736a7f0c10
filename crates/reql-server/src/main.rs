use anyhow::Result;
use clap::Parser;
use reql_server::Server;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reql-serverd")]
#[command(author, version, about = "Document query protocol server", long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 28015)]
    port: u16,

    /// Allow change feeds to answer empty normal batches
    #[arg(long)]
    return_empty_normal_batches: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    Server::new(&cli.host, cli.port)
        .with_return_empty_normal_batches(cli.return_empty_normal_batches)
        .start()
        .await
}
