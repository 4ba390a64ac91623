use clap::Parser;
use dotenvy::dotenv;
use log::info;

mod cli;
mod config;
mod errors;
mod loops;

use cli::{Arguments, Command};
use config::DaemonConfig;
use loops::{run_finalization_loop, run_settlement_loop};

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();
    let cli = Arguments::parse();
    let config = DaemonConfig::from_env_or_default();

    info!("🚀️ Starting bazaard against {}", config.database_url);
    let result = match cli.command {
        Command::SettlePayments => run_settlement_loop(config).await,
        Command::FinalizeAuctions => run_finalization_loop(config).await,
    };
    match result {
        Ok(()) => println!("Bye!"),
        Err(e) => eprintln!("{e}"),
    }
}
