use anyhow::{Context, Result};
use log::info;

use utxo_ledger::{Address, EngineState, LedgerConfig, MiningControl};

const DEFAULT_CONFIG_PATH: &str = "ledger.toml";

fn main() -> Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = LedgerConfig::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path))?;
    info!(
        "Ledger difficulty {}, base reward {}, initial supply {}",
        config.difficulty, config.base_reward, config.initial_supply
    );

    let mut state = EngineState::new(config)?;

    let alice = Address(state.create_wallet(Some("A")).address);
    let bob = Address(state.create_wallet(Some("B")).address);
    let miner = Address(state.create_wallet(Some("M")).address);

    state.create_genesis(&alice)?;
    state.send(&alice, &bob, 100.0, 1.0)?;

    let report = state.mine_pending(&miner, &MiningControl::default())?;
    for (tx, reason) in report.rejected() {
        info!("Transaction {} left out: {}", tx.txid(), reason);
    }

    println!("{}", serde_json::to_string_pretty(&state.wallets().list())?);
    println!("{}", serde_json::to_string_pretty(&state.ledger().records())?);
    println!("{}", serde_json::to_string_pretty(&state.ledger().utxo_snapshot())?);

    info!("Chain length {}, valid: {}", state.ledger().len(), state.ledger().is_valid());
    Ok(())
}
