use anyhow::Context;
use clap::{Arg, Command};
use common::config::Settings;
use std::process;
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wfcatalog=info,tower_http=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if json {
        builder.json().with_current_span(true).init();
    } else {
        builder.init();
    }
}

async fn serve(config_path: &str) -> anyhow::Result<()> {
    let settings = Settings::new(config_path)
        .with_context(|| format!("Failed to load config {}", config_path))?;
    init_tracing(settings.logging.json);

    wfcatalog::run_service(settings)
        .await
        .context("Catalog service stopped")
}

#[tokio::main]
async fn main() {
    let matches = Command::new("WFCatalog")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Serves waveform quality metadata over HTTP")
        .subcommand(
            Command::new("serve")
                .about("Run the catalog query service")
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("Sets a custom config file"),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("serve", serve_matches)) => {
            let config_path = serve_matches
                .get_one::<String>("config")
                .map(|s| s.as_str())
                .unwrap_or("config/wfcatalog.toml");

            if let Err(e) = serve(config_path).await {
                eprintln!("WFCatalog error: {:#}", e);
                process::exit(1);
            }
        }
        _ => {
            println!("No subcommand specified. Use --help for usage information.");
            process::exit(1);
        }
    }
}
