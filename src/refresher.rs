// src/refresher.rs
use crate::auth::SessionStore;
use crate::quotes::QuoteProvider;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time;

/// Latest close per watch-list ticker. The refresher is the only writer.
#[derive(Clone, Default)]
pub struct PriceCache {
    inner: Arc<RwLock<HashMap<String, f64>>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, ticker: &str) -> Option<f64> {
        self.inner.read().await.get(ticker).copied()
    }

    pub async fn put(&self, ticker: &str, price: f64) {
        self.inner.write().await.insert(ticker.to_string(), price);
    }

    pub async fn snapshot(&self) -> HashMap<String, f64> {
        self.inner.read().await.clone()
    }
}

/// One pass over the watch-list. Tickers without data keep their previous
/// price. Returns how many tickers were updated.
pub async fn refresh_once(
    quotes: &dyn QuoteProvider,
    cache: &PriceCache,
    watch_list: &[String],
) -> usize {
    let mut updated = 0;
    for ticker in watch_list {
        match quotes.latest_close(ticker).await {
            Some(price) => {
                cache.put(ticker, price).await;
                updated += 1;
            }
            None => warn!("No price for {} this round", ticker),
        }
    }
    debug!("Refreshed {}/{} watch-list prices", updated, watch_list.len());
    updated
}

/// Spawns the perpetual polling loop.
pub fn spawn_price_refresher(
    quotes: Arc<dyn QuoteProvider>,
    cache: PriceCache,
    watch_list: Vec<String>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Price refresher started for {} tickers every {:?}",
            watch_list.len(),
            every
        );
        loop {
            refresh_once(quotes.as_ref(), &cache, &watch_list).await;
            time::sleep(every).await;
        }
    })
}

pub fn spawn_session_sweeper(sessions: SessionStore, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        loop {
            ticker.tick().await;
            let purged = sessions.purge_idle().await;
            if purged > 0 {
                info!("Expired {} idle sessions", purged);
            }
        }
    })
}
