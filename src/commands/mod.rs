use std::path::PathBuf;

use clap::{Parser, Subcommand};
use roscapool::config::Config;
use roscapool::store::Store;
use roscapool::{one_eth_key, server, BlockClient};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// config file with chain endpoint, contract addresses and wallet keys
    #[clap(short = 'c', long = "config", default_value = "config.json")]
    pub(crate) config: PathBuf,

    #[clap(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API server
    Serve,

    /// Deploy a new pool through the factory
    CreatePool {
        /// per-cycle contribution in tokens, e.g. "100" or "0.5"
        #[clap(long)]
        amount: String,

        /// maximum number of members
        #[clap(long, default_value_t = 5)]
        max_members: u32,
    },

    /// Request to join a pool as a member
    JoinPool {
        /// pool contract address
        #[clap(long)]
        pool: String,

        /// member id with a key in the config, e.g. "M001"
        #[clap(long)]
        member: String,
    },

    /// Approve every pending join request (creator only)
    ApproveAllJoins {
        /// pool contract address
        #[clap(long)]
        pool: String,
    },

    /// Start the first contribution cycle (creator only)
    StartPool {
        /// pool contract address
        #[clap(long)]
        pool: String,
    },

    /// Pay a member's contribution for the current cycle
    Contribute {
        /// pool contract address
        #[clap(long)]
        pool: String,

        /// member id, e.g. "M001"
        #[clap(long)]
        member: String,

        /// contribution in tokens, must match the pool's configured amount
        #[clap(long)]
        amount: String,
    },

    /// Bid a percentage of the contribution amount for the payout
    PlaceBid {
        /// pool contract address
        #[clap(long)]
        pool: String,

        /// member id, e.g. "M001"
        #[clap(long)]
        member: String,

        /// bid percentage, 60 to 95
        #[clap(long, default_value_t = 65)]
        percent: u32,
    },

    /// Close the bid window and settle the current cycle (creator only)
    SettleCycle {
        /// pool contract address
        #[clap(long)]
        pool: String,
    },

    /// Show one pool's on-chain state
    Status {
        /// pool contract address
        #[clap(long)]
        pool: String,
    },

    /// List mirrored pools from the backing store
    Pools,

    /// Generate a fresh wallet keypair
    Keygen,
}

fn print_json<T: serde::Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap());
}

pub(crate) fn run(cli: Cli) -> anyhow::Result<()> {
    // keygen needs no config or node
    if let Commands::Keygen = cli.command {
        print_json(&one_eth_key());
        return Ok(());
    }

    let config = Config::parse_from_file(&cli.config);
    match cli.command {
        Commands::Serve => {
            actix_web::rt::System::new().block_on(server::run(config))?;
        }
        Commands::CreatePool { amount, max_members } => {
            let client = BlockClient::setup(&config, None);
            print_json(&client.create_pool(&amount, max_members)?);
        }
        Commands::JoinPool { pool, member } => {
            let client = BlockClient::setup(&config, None);
            print_json(&client.request_join(&pool, &member)?);
        }
        Commands::ApproveAllJoins { pool } => {
            let client = BlockClient::setup(&config, None);
            print_json(&client.approve_all_joins(&pool)?);
        }
        Commands::StartPool { pool } => {
            let client = BlockClient::setup(&config, None);
            print_json(&client.start_pool(&pool)?);
        }
        Commands::Contribute { pool, member, amount } => {
            let client = BlockClient::setup(&config, None);
            print_json(&client.contribute(&pool, &member, &amount)?);
        }
        Commands::PlaceBid { pool, member, percent } => {
            let client = BlockClient::setup(&config, None);
            print_json(&client.place_bid(&pool, &member, percent)?);
        }
        Commands::SettleCycle { pool } => {
            let client = BlockClient::setup(&config, None);
            print_json(&client.settle_cycle(&pool)?);
        }
        Commands::Status { pool } => {
            let client = BlockClient::setup(&config, None);
            print_json(&client.pool_status(&pool)?);
        }
        Commands::Pools => {
            let store = Store::new(&config.redis)?;
            print_json(&store.load()?.pools);
        }
        Commands::Keygen => unreachable!(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_place_bid_with_default_percent() {
        let cli = Cli::try_parse_from([
            "roscapool",
            "place-bid",
            "--pool",
            "0xC4f3BeE53bBd6dB94bbBD7534B72434d0a096B05",
            "--member",
            "M001",
        ])
        .unwrap();
        match cli.command {
            Commands::PlaceBid { percent, ref member, .. } => {
                assert_eq!(percent, 65);
                assert_eq!(member, "M001");
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.config, PathBuf::from("config.json"));
    }

    #[test]
    fn cli_rejects_missing_pool_argument() {
        assert!(Cli::try_parse_from(["roscapool", "start-pool"]).is_err());
    }
}
