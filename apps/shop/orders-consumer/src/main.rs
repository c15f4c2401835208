//! Orders consumer service
//!
//! Binary entry point. See the library crate for the supervision loop.

use clap::Parser;
use orders_consumer::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = orders_consumer::run(cli).await {
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}
