use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use leasebind::{Config, DhcpServer, NameTable, Result};

#[derive(Parser)]
#[command(name = "leasebind")]
#[command(author, version, about = "A minimal DHCP lease server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "dhcp_config.txt")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run,
    ShowConfig,
    Lookup { domain: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("Starting DHCP server with config: {:?}", cli.config);
            let server = DhcpServer::new(config)?;

            tokio::select! {
                result = server.run() => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal, stopping server...");
                    server.shutdown();
                    Ok(())
                }
            }
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Lookup { domain } => {
            let names = NameTable::with_builtin_entries();
            match names.lookup(&domain) {
                Some(ip) => println!("{} -> {}", domain, ip),
                None => println!("No entry for {}", domain),
            }
            Ok(())
        }
    }
}
