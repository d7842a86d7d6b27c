//! StarkBridge CLI
//!
//! Drives an in-process L1/L2 devnet whose state lives in `STATE_DIR`:
//! - `starkbridge deploy-token ...` deploys an L2 token
//! - `starkbridge bridge-to-l1 ...` / `bridge-to-l2 ...` move funds
//! - `starkbridge relay` runs the relayer until Ctrl+C/SIGTERM

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::Result;
use tokio::sync::Mutex;
use tracing::info;

use relayer::commands::{self, DeployTokenArgs};
use relayer::{metrics, Relayer, RelayerConfig};
use starkbridge_rs::{DevnetRelay, Felt, L1Address, MessageHash};

#[derive(Parser)]
#[command(name = "starkbridge")]
#[command(about = "L1 <-> L2 token bridge devnet and relayer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// State directory, overrides STATE_DIR
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the state directory and print deployment addresses
    Init,

    /// Deploy an L2 token with its full supply minted to `recipient`
    DeployToken {
        #[arg(long)]
        name: String,
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value_t = 18)]
        decimals: u8,
        #[arg(long)]
        supply: u128,
        /// L2 account receiving the supply
        #[arg(long)]
        recipient: Felt,
        #[arg(long, default_value = "0x1")]
        salt: Felt,
    },

    /// Lock L2 tokens and mint them on L1
    BridgeToL1 {
        #[arg(long)]
        token: Felt,
        /// L2 holder
        #[arg(long)]
        from: Felt,
        #[arg(long)]
        amount: u128,
        #[arg(long)]
        recipient: L1Address,
        /// Only emit the message; leave delivery and consumption to the relayer
        #[arg(long)]
        no_settle: bool,
    },

    /// Burn L1 clone tokens and release them on L2
    BridgeToL2 {
        /// L2 token whose clone is burned
        #[arg(long)]
        token: Felt,
        /// L1 holder
        #[arg(long)]
        from: L1Address,
        #[arg(long)]
        amount: u128,
        #[arg(long)]
        recipient: Felt,
        #[arg(long)]
        no_settle: bool,
    },

    /// Deploy the L1 clone of an L2 token without moving funds
    CreateL1Instance {
        #[arg(long)]
        token: Felt,
        #[arg(long)]
        no_settle: bool,
    },

    /// Deliver both outboxes
    Flush,

    /// Consume a delivered message by hash
    Consume {
        #[arg(long)]
        hash: String,
    },

    /// Show balances and the supply equation for a token
    Balances {
        #[arg(long)]
        token: Felt,
        #[arg(long)]
        l2_account: Option<Felt>,
        #[arg(long)]
        l1_account: Option<L1Address>,
    },

    /// Relay messages until interrupted
    Relay {
        /// Print Prometheus metrics on exit
        #[arg(long)]
        print_metrics: bool,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let mut config = RelayerConfig::load()?;
    if let Some(dir) = cli.state_dir {
        config.state_dir = dir;
    }

    let mut devnet = commands::open_devnet(&config)?;

    let output = match cli.command {
        Commands::Init => commands::init(&devnet),
        Commands::DeployToken {
            name,
            symbol,
            decimals,
            supply,
            recipient,
            salt,
        } => commands::deploy_token(
            &mut devnet,
            DeployTokenArgs {
                name,
                symbol,
                decimals,
                initial_supply: supply,
                recipient,
                salt,
            },
        )?,
        Commands::BridgeToL1 {
            token,
            from,
            amount,
            recipient,
            no_settle,
        } => commands::bridge_to_l1(&mut devnet, token, from, amount, recipient, !no_settle)?,
        Commands::BridgeToL2 {
            token,
            from,
            amount,
            recipient,
            no_settle,
        } => commands::bridge_to_l2(&mut devnet, token, from, amount, recipient, !no_settle)?,
        Commands::CreateL1Instance { token, no_settle } => {
            commands::create_l1_instance(&mut devnet, token, !no_settle)?
        }
        Commands::Flush => commands::flush(&mut devnet)?,
        Commands::Consume { hash } => {
            commands::consume(&mut devnet, MessageHash::from_hex(&hash)?)?
        }
        Commands::Balances {
            token,
            l2_account,
            l1_account,
        } => commands::balances(&devnet, token, l2_account, l1_account)?,
        Commands::Relay { print_metrics } => {
            relay(devnet, &config).await?;
            if print_metrics {
                println!("{}", metrics::encode_metrics()?);
            }
            return Ok(());
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn relay(devnet: starkbridge_rs::Devnet, config: &RelayerConfig) -> Result<()> {
    info!(
        state_dir = ?config.state_dir,
        poll_interval_ms = config.poll_interval_ms,
        "Starting StarkBridge relayer"
    );

    let driver = DevnetRelay::new(Arc::new(Mutex::new(devnet)));
    let mut relayer = Relayer::new(driver, config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    relayer.run(shutdown_rx).await?;

    info!(
        dead_letters = relayer.dead_letters().len(),
        deferred = relayer.deferred().len(),
        "StarkBridge relayer stopped"
    );
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,relayer=debug,starkbridge_rs=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
