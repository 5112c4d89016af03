mod app;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stock_ledger::api::{self, AppState};
use stock_ledger::config::Config;
use stock_ledger::ledger::Ledger;
use stock_ledger::parser::Parser;
use stock_ledger::service::TransactionService;

use crate::app::{Cli, Command};

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::new();
    let config = Config::load_or_default(cli.config_path()).with_context(|| {
        format!("Unable to read config file \"{}\"", cli.config_path().display())
    })?;
    init_logging(&config);

    let ledger = Ledger::open(&config.database_path, config.busy_timeout())
        .with_context(|| format!("Unable to open ledger \"{}\"", config.database_path.display()))?;
    let service = TransactionService::new(ledger, &config);

    match cli.command() {
        Command::Serve => {
            let state = Arc::new(AppState::new(service, &config));
            let addr: SocketAddr = config
                .listen_addr
                .parse()
                .with_context(|| format!("Invalid listen address \"{}\"", config.listen_addr))?;

            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(%addr, "listening");
            axum::serve(listener, api::router(state)).await?;
        }
        Command::Import { input_path, user_id } => {
            let count = Parser::new(&service, user_id)
                .parse_sheet(input_path)
                .with_context(|| format!("Unable to import \"{}\"", input_path.display()))?;
            println!("Recorded {} transactions", count);
        }
        Command::Report { output_path, user_id } => {
            let report = service.realized_gains(user_id)?;
            report
                .write_to_file(output_path)
                .with_context(|| format!("Unable to write \"{}\"", output_path.display()))?;
            println!(
                "Wrote {} realized gain records, total {}",
                report.records().len(),
                report.total_gains()
            );
        }
    }

    Ok(())
}
