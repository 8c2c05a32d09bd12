#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use news_classifier::{config::Config, run_server};

/// Multi-model news classification server
#[cfg(feature = "cli")]
#[derive(Debug, Parser)]
#[command(name = "news-classifier", version, about)]
struct Cli {
    /// Model catalog file (YAML or JSON); overrides MODEL_CONFIG
    #[arg(long)]
    config: Option<String>,

    /// Bind host; overrides API_HOST
    #[arg(long)]
    host: Option<String>,

    /// Bind port; overrides PORT
    #[arg(long)]
    port: Option<u16>,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = Config::from_env()?;
    if let Some(path) = cli.config {
        cfg.model_config = path;
    }
    if let Some(host) = cli.host {
        cfg.api_host = host;
    }
    if let Some(port) = cli.port {
        cfg.api_port = port;
    }

    run_server(cfg).await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
