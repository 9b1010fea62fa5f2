//! Exchange feeds publishing `candle` and `balance` messages on the bus.

mod balance;
mod candle;

pub use balance::{load_lot_sizes, translate_account_update, BalanceFeed};
pub use candle::{CandleFeed, OpenPriceTracker};

use std::time::Duration;
use tokio::sync::watch;

/// Delay before reconnecting a dropped WebSocket stream.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Resolves once `true` is signalled; never resolves if the sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Sleep before a reconnect. False if shutdown was signalled meanwhile.
async fn backoff(shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(RECONNECT_DELAY) => true,
        _ = stopped(shutdown) => false,
    }
}
