use anyhow::Result;
use clap::{Parser, Subcommand};

#[cfg(feature = "stdio")]
mod mcp;

#[derive(Parser, Debug)]
#[command(name = "askpipe")]
#[command(about = "Web search + AI answer engines behind one tool surface (MCP stdio server)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as an MCP stdio server (for Cursor / MCP clients).
    #[cfg(feature = "stdio")]
    McpStdio,
    /// Print version info (json).
    Version,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    // stdout belongs to the MCP transport; all logging goes to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        #[cfg(feature = "stdio")]
        Commands::McpStdio => {
            mcp::serve_stdio()
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
        Commands::Version => {
            println!(
                "{}",
                serde_json::json!({
                    "name": "askpipe",
                    "version": env!("CARGO_PKG_VERSION"),
                })
            );
        }
    }

    Ok(())
}
