// src/lib.rs
pub mod api;
pub mod auth;
pub mod config;
pub mod currency;
pub mod db;
pub mod error;
pub mod market;
pub mod models;
pub mod news;
pub mod quotes;
pub mod refresher;
pub mod trade;

use crate::auth::{Auth, SessionStore};
use crate::config::Config;
use crate::currency::{ExchangeRateApi, RateProvider};
use crate::db::Store;
use crate::market::Market;
use crate::news::{NewsApi, NewsProvider};
use crate::quotes::{QuoteProvider, YahooQuotes};
use crate::refresher::PriceCache;
use crate::trade::TradeEngine;
use log::info;
use reqwest::Client;
use std::sync::Arc;
use warp::Filter;

/// Everything a request handler can reach.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub auth: Auth,
    pub trades: TradeEngine,
    pub market: Market,
    pub quotes: Arc<dyn QuoteProvider>,
    pub news: Arc<dyn NewsProvider>,
    pub prices: PriceCache,
}

/// External collaborators, swappable in tests.
pub struct Providers {
    pub quotes: Arc<dyn QuoteProvider>,
    pub rates: Arc<dyn RateProvider>,
    pub news: Arc<dyn NewsProvider>,
}

impl Providers {
    pub fn from_config(config: &Config) -> Self {
        let client = Client::new();
        Providers {
            quotes: Arc::new(YahooQuotes::new(client.clone(), &config.quote_base_url)),
            rates: Arc::new(ExchangeRateApi::new(client.clone(), &config.fx_base_url)),
            news: Arc::new(NewsApi::new(client, &config.news_base_url)),
        }
    }
}

impl AppState {
    pub fn new(config: Config, store: Store, providers: Providers) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(store);
        let sessions = SessionStore::new(config.session_idle);
        let auth = Auth::new(
            store.clone(),
            sessions,
            &config.jwt_secret,
            config.token_ttl,
            &config.default_currency,
            config.watch_list.clone(),
        );
        let trades = TradeEngine::new(
            store.clone(),
            providers.quotes.clone(),
            providers.rates.clone(),
        );
        let market = Market::new(
            store.clone(),
            providers.quotes.clone(),
            providers.rates.clone(),
            config.watch_list.clone(),
        );

        AppState {
            config,
            store,
            auth,
            trades,
            market,
            quotes: providers.quotes,
            news: providers.news,
            prices: PriceCache::new(),
        }
    }
}

pub fn build_state(config: Config) -> error::Result<AppState> {
    let store = Store::open(&config.db_path, config.initial_balance)?;
    info!("Opened account store at {}", config.db_path);
    let providers = Providers::from_config(&config);
    Ok(AppState::new(config, store, providers))
}

/// Starts the background tasks and serves the API until the process exits.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.listen_addr;
    let state = build_state(config)?;

    refresher::spawn_price_refresher(
        state.quotes.clone(),
        state.prices.clone(),
        state.config.watch_list.clone(),
        state.config.refresh_interval,
    );
    refresher::spawn_session_sweeper(state.auth.sessions().clone(), state.config.refresh_interval);

    let api = api::routes(state).with(warp::log("bulltrader::http"));

    info!("Server running on http://{}", listen_addr);
    warp::serve(api).run(listen_addr).await;
    Ok(())
}
