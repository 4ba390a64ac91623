use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version = "1.0.0", about = "Settlement and finalization daemon for the Bazaar marketplace")]
pub struct Arguments {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Watch pending sales and orders and settle them as their payments arrive
    #[clap(name = "settle-payments")]
    SettlePayments,
    /// Decide auctions whose bidding window has closed
    #[clap(name = "finalize-auctions")]
    FinalizeAuctions,
}
