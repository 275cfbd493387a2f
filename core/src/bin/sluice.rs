/// Sluice CLI
///
/// Administrative commands for worker leases, the reservation set and the
/// catalog backlog.

use sluice_core::{cli, logging};

#[tokio::main]
async fn main() {
    logging::init_tracing("warn");

    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
