// src/market.rs
//! Read-only views: account overview, market ticker, currency board,
//! holdings charts and ticker lookup.

use crate::config::{DEFAULT_CURRENCY, GOLD_TICKER};
use crate::currency::{self, RateProvider};
use crate::db::Store;
use crate::error::{AppError, Result};
use crate::quotes::{Period, QuoteProvider};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

const BOARD_CURRENCIES: [&str; 4] = ["EUR", "GBP", "JPY", "AUD"];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FinancialOverview {
    pub total_value: f64,
    pub invested_value: f64,
    pub initial_balance: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CurrencyBoard {
    /// Units of each currency per 1 USD.
    pub rates: BTreeMap<String, f64>,
    pub gold_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Series {
    pub ticker: String,
    pub initial_investment: Option<f64>,
    pub points: Vec<(DateTime<Utc>, f64)>,
}

#[derive(Clone)]
pub struct Market {
    store: Arc<Store>,
    quotes: Arc<dyn QuoteProvider>,
    rates: Arc<dyn RateProvider>,
    watch_list: Arc<Vec<String>>,
}

impl Market {
    pub fn new(
        store: Arc<Store>,
        quotes: Arc<dyn QuoteProvider>,
        rates: Arc<dyn RateProvider>,
        watch_list: Vec<String>,
    ) -> Self {
        Market {
            store,
            quotes,
            rates,
            watch_list: Arc::new(watch_list),
        }
    }

    /// Cash plus the market value of every non-empty holding, in the
    /// account's currency. Each call is also recorded in the financial log.
    pub async fn financial_overview(&self, username: &str) -> Result<FinancialOverview> {
        let user = self.store.require_user(username)?;
        let holdings = self.store.holdings(username)?;

        let mut invested_value = 0.0;
        for holding in holdings.iter().filter(|h| h.shares > 0) {
            match self.quotes.latest_close(&holding.ticker).await {
                Some(close) => invested_value += close * holding.shares as f64,
                None => warn!("Skipping {} in overview: no quote", holding.ticker),
            }
        }
        let total_value = user.balance + invested_value;

        let to = user.currency.as_str();
        let rates = self.rates.as_ref();
        let overview = FinancialOverview {
            total_value: currency::convert(rates, total_value, DEFAULT_CURRENCY, to).await,
            invested_value: currency::convert(rates, invested_value, DEFAULT_CURRENCY, to).await,
            initial_balance: currency::convert(rates, user.initial_balance, DEFAULT_CURRENCY, to)
                .await,
            currency: user.currency.clone(),
        };

        self.store
            .append_financial_log(username, overview.total_value)?;
        Ok(overview)
    }

    /// Intraday percent move (first open to last close) per watch-list
    /// ticker. Tickers without data are left out.
    pub async fn market_status(&self) -> BTreeMap<String, f64> {
        let mut status = BTreeMap::new();
        for ticker in self.watch_list.iter() {
            let Some(history) = self.quotes.fetch(ticker, Period::OneDay).await else {
                continue;
            };
            if let Some(change) = percent_change(history.first_open(), history.last_close()) {
                status.insert(ticker.clone(), change);
            }
        }
        debug!("Market status for {} tickers", status.len());
        status
    }

    pub async fn currency_board(&self) -> CurrencyBoard {
        let mut rates = BTreeMap::new();
        for code in BOARD_CURRENCIES {
            let rate = currency::rate(self.rates.as_ref(), DEFAULT_CURRENCY, code).await;
            rates.insert(code.to_string(), rate);
        }
        let gold_usd = self.quotes.latest_close(GOLD_TICKER).await;
        if gold_usd.is_none() {
            warn!("Failed to fetch the gold price.");
        }
        CurrencyBoard { rates, gold_usd }
    }

    /// Close series for each of the user's holdings over `period`.
    pub async fn holdings_history(&self, username: &str, period: Period) -> Result<Vec<Series>> {
        let holdings = self.store.holdings(username)?;
        let mut series = Vec::with_capacity(holdings.len());
        for holding in holdings {
            if let Some(history) = self.quotes.fetch(&holding.ticker, period).await {
                series.push(Series {
                    ticker: holding.ticker,
                    initial_investment: Some(holding.initial_investment),
                    points: history.closes(),
                });
            }
        }
        Ok(series)
    }

    pub async fn lookup(&self, ticker: &str, period: Period) -> Result<Series> {
        let history = self
            .quotes
            .fetch(ticker, period)
            .await
            .ok_or_else(|| AppError::InvalidTicker(ticker.to_string()))?;
        Ok(Series {
            ticker: ticker.to_string(),
            initial_investment: None,
            points: history.closes(),
        })
    }
}

fn percent_change(open: Option<f64>, close: Option<f64>) -> Option<f64> {
    match (open, close) {
        (Some(open), Some(close)) if open != 0.0 => Some((close - open) / open * 100.0),
        _ => None,
    }
}
