//! Gas tracker - live multi-chain fee engine
//!
//! Connects every configured network, keeps fee history and token prices current,
//! and logs a short summary whenever a network's fees move.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use gastrack_core::{ChainId, Timeframe, TRANSFER_GAS_LIMIT};
use gastrack_engine::{settings, Engine};
use gastrack_rpc::WsChainRpc;
use gastrack_state::{ChangeKind, Slice, StateChange};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting gas tracker v{}", env!("CARGO_PKG_VERSION"));

    let config = settings::load()?;
    let engine = Arc::new(Engine::new(config, Arc::new(WsChainRpc::new()))?);

    for (chain, result) in engine.connect_all().await {
        if let Err(e) = result {
            warn!("{} unavailable: {}", chain, e);
        }
    }

    let reporters: Vec<JoinHandle<()>> = engine
        .state()
        .chains()
        .into_iter()
        .map(|chain| {
            let changes = engine.subscribe(Slice::Network(chain));
            tokio::spawn(report_fees(Arc::clone(&engine), chain, changes))
        })
        .collect();

    info!("Press Ctrl+C to shutdown");
    wait_for_signal().await;

    engine.shutdown().await;
    for reporter in reporters {
        if let Err(e) = reporter.await {
            debug!("Reporter ended abnormally: {}", e);
        }
    }

    match serde_json::to_string(&engine.snapshot()) {
        Ok(json) => debug!("Final state: {}", json),
        Err(e) => warn!("Could not serialize final state: {}", e),
    }

    let stats = engine.stats();
    info!(
        "Shutdown complete after {:?}: {} state updates",
        stats.uptime, stats.state.update_count
    );
    Ok(())
}

/// Log the latest fee and candle for `chain` whenever a new observation lands
async fn report_fees(engine: Arc<Engine>, chain: ChainId, mut changes: broadcast::Receiver<StateChange>) {
    loop {
        match changes.recv().await {
            Ok(change) if change.kind == ChangeKind::Observation => {
                let Some(network) = engine.state().network(chain) else {
                    return;
                };
                let candle = engine
                    .candles(chain, Timeframe::default())
                    .ok()
                    .and_then(|c| c.last().copied());
                let cost = engine
                    .simulate_costs(TRANSFER_GAS_LIMIT, 0.0)
                    .into_iter()
                    .find(|c| c.chain == chain);

                match (candle, cost) {
                    (Some(c), Some(cost)) => info!(
                        "{}: {:.3} gwei ({} candle o {:.3} h {:.3} l {:.3} c {:.3}), transfer ${:.4}",
                        chain,
                        network.total_fee(),
                        Timeframe::default(),
                        c.open,
                        c.high,
                        c.low,
                        c.close,
                        cost.gas_cost_usd
                    ),
                    _ => info!("{}: {:.3} gwei", chain, network.total_fee()),
                }
            }
            Ok(change) if change.kind == ChangeKind::Connectivity => {
                info!("{} is {}", chain, engine.status(chain));
                if let Some(e) = engine.last_error(chain) {
                    error!("{}", e);
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                debug!("{} reporter skipped {} changes", chain, skipped);
            }
            Err(RecvError::Closed) => return,
        }
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received termination signal");
        }
    }
}
