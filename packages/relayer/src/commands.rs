//! CLI operations over a persisted devnet
//!
//! Every operation opens the devnet from the state directory, runs, and
//! returns a JSON value for the binary to print. State is persisted by the
//! devnet itself after each successful chain operation.

use std::sync::Arc;

use eyre::{eyre, Result, WrapErr};
use serde_json::{json, Value};
use tracing::info;

use starkbridge_rs::{
    Devnet, Felt, JsonFileStore, L1Address, MessageHash, PendingMessage, TokenMetadata,
};

use crate::config::RelayerConfig;

/// Open (or create) the devnet stored under `config.state_dir`
pub fn open_devnet(config: &RelayerConfig) -> Result<Devnet> {
    let store = JsonFileStore::new(&config.state_dir)
        .wrap_err_with(|| format!("Failed to open state dir {:?}", config.state_dir))?;
    let devnet = Devnet::open(config.devnet_config(), Arc::new(store))
        .wrap_err("Failed to load devnet state")?;
    Ok(devnet)
}

/// Deployment addresses and chain heights
pub fn init(devnet: &Devnet) -> Value {
    let config = devnet.config();
    let (l1_height, l2_height) = devnet.heights();
    json!({
        "l1_bridge": config.l1_bridge_address,
        "l1_base_token": config.l1_base_token,
        "l2_deployer": config.l2_deployer_address,
        "l2_token_class_hash": config.l2_token_class_hash,
        "auto_settle_l1_to_l2": config.auto_settle_l1_to_l2,
        "l1_height": l1_height,
        "l2_height": l2_height,
    })
}

/// Parameters of `deploy-token`
#[derive(Debug, Clone)]
pub struct DeployTokenArgs {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub initial_supply: u128,
    pub recipient: Felt,
    pub salt: Felt,
}

pub fn deploy_token(devnet: &mut Devnet, args: DeployTokenArgs) -> Result<Value> {
    let metadata = TokenMetadata::new(&args.name, &args.symbol, args.decimals)?;
    let token = devnet.deploy_l2_token(args.salt, metadata, args.initial_supply, args.recipient)?;
    info!(token = %token, name = %args.name, "Deployed L2 token");
    Ok(json!({
        "token": token,
        "expected_l1_clone": devnet.l1().compute_address(token.as_bytes()),
        "initial_supply": args.initial_supply.to_string(),
        "recipient": args.recipient,
    }))
}

/// Lock on L2; with `settle`, flush and mint on L1
pub fn bridge_to_l1(
    devnet: &mut Devnet,
    token: Felt,
    from: Felt,
    amount: u128,
    recipient: L1Address,
    settle: bool,
) -> Result<Value> {
    let message = devnet.lock_and_notify(token, from, amount, recipient)?;
    let settlement = if settle {
        devnet.flush()?;
        Some(devnet.submit_consume(&message)?)
    } else {
        None
    };
    Ok(json!({
        "message": message.hash(),
        "state": devnet.transfer_state(&message),
        "settlement": settlement,
    }))
}

/// Burn on L1; with `settle`, flush and release on L2
pub fn bridge_to_l2(
    devnet: &mut Devnet,
    token: Felt,
    from: L1Address,
    amount: u128,
    recipient: Felt,
    settle: bool,
) -> Result<Value> {
    let message = devnet.burn_and_notify(from, token, recipient, amount)?;
    let mut settlement = None;
    if settle {
        let report = devnet.flush()?;
        settlement = report
            .settled
            .into_iter()
            .find(|s| s.message() == message.hash());
        if settlement.is_none() {
            settlement = Some(devnet.submit_consume(&message)?);
        }
    }
    Ok(json!({
        "message": message.hash(),
        "state": devnet.transfer_state(&message),
        "settlement": settlement,
    }))
}

/// Ask L1 to deploy the clone for `token` without moving funds
pub fn create_l1_instance(devnet: &mut Devnet, token: Felt, settle: bool) -> Result<Value> {
    let message = devnet.request_l1_instance(token)?;
    let settlement = if settle {
        devnet.flush()?;
        Some(devnet.submit_consume(&message)?)
    } else {
        None
    };
    Ok(json!({
        "message": message.hash(),
        "state": devnet.transfer_state(&message),
        "settlement": settlement,
    }))
}

pub fn flush(devnet: &mut Devnet) -> Result<Value> {
    let report = devnet.flush()?;
    Ok(serde_json::to_value(report)?)
}

/// Consume the delivered message with `hash` on whichever chain holds it
pub fn consume(devnet: &mut Devnet, hash: MessageHash) -> Result<Value> {
    let message = find_delivered(devnet, &hash)
        .ok_or_else(|| eyre!("Message {} is not waiting in any inbox", hash))?;
    let settlement = devnet.submit_consume(&message)?;
    Ok(serde_json::to_value(settlement)?)
}

fn find_delivered(devnet: &Devnet, hash: &MessageHash) -> Option<PendingMessage> {
    devnet
        .l1()
        .mailbox()
        .inbox()
        .chain(devnet.l2().mailbox().inbox())
        .find(|m| m.hash() == *hash)
        .cloned()
}

/// Balances on both chains plus the supply equation for `token`
pub fn balances(
    devnet: &Devnet,
    token: Felt,
    l2_account: Option<Felt>,
    l1_account: Option<L1Address>,
) -> Result<Value> {
    let l2_token = devnet
        .l2()
        .token(&token)
        .ok_or_else(|| eyre!("Unknown L2 token {}", token))?;
    let l1_clone = devnet.l1().lookup(&token);
    let supply = devnet.check_supply_invariant(&token)?;

    let l2_balance = l2_account.map(|account| l2_token.balance_of(&account).to_string());
    let l1_balance = l1_account.map(|account| {
        l1_clone
            .map(|clone| devnet.l1().balance_of(&clone, &account))
            .unwrap_or(0)
            .to_string()
    });

    Ok(json!({
        "token": token,
        "name": l2_token.metadata.name,
        "symbol": l2_token.metadata.symbol,
        "l1_clone": l1_clone,
        "l2_total_supply": l2_token.total_supply().to_string(),
        "escrow": supply.escrow.to_string(),
        "l1_supply": supply.l1_supply.to_string(),
        "in_flight_to_l1": supply.in_flight.to_l1.to_string(),
        "in_flight_to_l2": supply.in_flight.to_l2.to_string(),
        "l2_balance": l2_balance,
        "l1_balance": l1_balance,
    }))
}
