// src/trade.rs
use crate::config::{is_supported_currency, DEFAULT_CURRENCY};
use crate::currency::{self, RateProvider};
use crate::db::Store;
use crate::error::{AppError, Result};
use crate::models::{TradeAction, TradeReceipt};
use crate::quotes::QuoteProvider;
use log::info;
use std::sync::Arc;

/// Quote currency of the price provider.
const QUOTE_CURRENCY: &str = DEFAULT_CURRENCY;

/// Settles buy and sell orders against the account store. Every order
/// fetches a fresh quote, the refresher's cache is never consulted.
#[derive(Clone)]
pub struct TradeEngine {
    store: Arc<Store>,
    quotes: Arc<dyn QuoteProvider>,
    rates: Arc<dyn RateProvider>,
}

impl TradeEngine {
    pub fn new(
        store: Arc<Store>,
        quotes: Arc<dyn QuoteProvider>,
        rates: Arc<dyn RateProvider>,
    ) -> Self {
        TradeEngine {
            store,
            quotes,
            rates,
        }
    }

    pub async fn buy(
        &self,
        username: &str,
        ticker: &str,
        amount: i64,
        target_currency: &str,
    ) -> Result<TradeReceipt> {
        validate_order(amount, target_currency)?;
        let price = self.quote(ticker).await?;
        let total_cost = price * amount as f64;

        let user = self.store.require_user(username)?;
        let converted_cost =
            currency::convert(self.rates.as_ref(), total_cost, QUOTE_CURRENCY, &user.currency)
                .await;

        let balance = self.store.settle_buy(
            username,
            ticker,
            amount,
            price,
            total_cost,
            converted_cost,
        )?;

        let message = format!(
            "Successfully bought {} shares of {} for ${:.2} {}",
            amount, ticker, converted_cost, user.currency
        );
        info!("{}: {}", username, message);
        Ok(TradeReceipt {
            message,
            action: TradeAction::Buy,
            ticker: ticker.to_string(),
            amount,
            unit_price: price,
            settled_value: converted_cost,
            currency: user.currency,
            balance,
        })
    }

    pub async fn sell(
        &self,
        username: &str,
        ticker: &str,
        amount: i64,
        target_currency: &str,
    ) -> Result<TradeReceipt> {
        validate_order(amount, target_currency)?;
        let price = self.quote(ticker).await?;
        let total_value = price * amount as f64;

        let held = self
            .store
            .holding(username, ticker)?
            .map(|h| h.shares)
            .unwrap_or(0);
        if held < amount {
            return Err(AppError::InsufficientShares {
                ticker: ticker.to_string(),
                held,
                requested: amount,
            });
        }

        let user = self.store.require_user(username)?;
        let proceeds =
            currency::convert(self.rates.as_ref(), total_value, QUOTE_CURRENCY, &user.currency)
                .await;

        let balance = self
            .store
            .settle_sell(username, ticker, amount, price, proceeds)?;

        let message = format!(
            "Successfully sold {} shares of {} for ${:.2} {}",
            amount, ticker, proceeds, user.currency
        );
        info!("{}: {}", username, message);
        Ok(TradeReceipt {
            message,
            action: TradeAction::Sell,
            ticker: ticker.to_string(),
            amount,
            unit_price: price,
            settled_value: proceeds,
            currency: user.currency,
            balance,
        })
    }

    async fn quote(&self, ticker: &str) -> Result<f64> {
        self.quotes
            .latest_close(ticker)
            .await
            .ok_or_else(|| AppError::InvalidTicker(ticker.to_string()))
    }
}

// The order form's currency is checked but settlement always happens in
// the account's stored currency.
fn validate_order(amount: i64, target_currency: &str) -> Result<()> {
    if amount <= 0 {
        return Err(AppError::InvalidAmount(amount));
    }
    if !is_supported_currency(target_currency) {
        return Err(AppError::InvalidCurrency(target_currency.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceHistory;
    use crate::quotes::Period;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FixedQuotes {
        prices: Mutex<HashMap<String, f64>>,
    }

    impl FixedQuotes {
        fn new(prices: &[(&str, f64)]) -> Arc<Self> {
            Arc::new(FixedQuotes {
                prices: Mutex::new(prices.iter().map(|(t, p)| (t.to_string(), *p)).collect()),
            })
        }

        fn set(&self, ticker: &str, price: f64) {
            self.prices.lock().unwrap().insert(ticker.to_string(), price);
        }
    }

    #[async_trait]
    impl QuoteProvider for FixedQuotes {
        async fn fetch(&self, ticker: &str, _period: Period) -> Option<PriceHistory> {
            let price = *self.prices.lock().unwrap().get(ticker)?;
            Some(PriceHistory {
                ticker: ticker.to_string(),
                bars: vec![crate::models::Bar {
                    timestamp: Utc::now(),
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: 0,
                }],
            })
        }
    }

    struct FlatRates(HashMap<String, f64>);

    #[async_trait]
    impl RateProvider for FlatRates {
        async fn rates(&self, _base: &str) -> std::result::Result<HashMap<String, f64>, AppError> {
            Ok(self.0.clone())
        }
    }

    fn engine_with(quotes: Arc<FixedQuotes>) -> (TradeEngine, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory(10000.0).unwrap());
        store
            .create_user("alice", "hash", "USD", &["AAPL".to_string()])
            .unwrap();
        let rates = Arc::new(FlatRates(HashMap::from([("EUR".to_string(), 0.5)])));
        (TradeEngine::new(store.clone(), quotes, rates), store)
    }

    #[tokio::test]
    async fn buy_then_sell_round_trip() {
        let quotes = FixedQuotes::new(&[("AAPL", 100.0)]);
        let (engine, store) = engine_with(quotes.clone());

        let receipt = engine.buy("alice", "AAPL", 5, "USD").await.unwrap();
        assert_eq!(receipt.balance, 9500.0);
        assert_eq!(
            receipt.message,
            "Successfully bought 5 shares of AAPL for $500.00 USD"
        );
        assert_eq!(store.holding("alice", "AAPL").unwrap().unwrap().shares, 5);

        quotes.set("AAPL", 120.0);
        let receipt = engine.sell("alice", "AAPL", 5, "USD").await.unwrap();
        assert_eq!(receipt.balance, 10100.0);
        assert!(store.holding("alice", "AAPL").unwrap().is_none());

        let log = store.transactions("alice").unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!((log[0].action, log[0].price), (TradeAction::Buy, 100.0));
        assert_eq!((log[1].action, log[1].price), (TradeAction::Sell, 120.0));
    }

    #[tokio::test]
    async fn non_positive_amounts_are_rejected() {
        let (engine, store) = engine_with(FixedQuotes::new(&[("AAPL", 100.0)]));
        for amount in [0, -1] {
            assert!(matches!(
                engine.buy("alice", "AAPL", amount, "USD").await,
                Err(AppError::InvalidAmount(a)) if a == amount
            ));
            assert!(matches!(
                engine.sell("alice", "AAPL", amount, "USD").await,
                Err(AppError::InvalidAmount(_))
            ));
        }
        assert_eq!(store.require_user("alice").unwrap().balance, 10000.0);
    }

    #[tokio::test]
    async fn unknown_ticker_is_invalid() {
        let (engine, store) = engine_with(FixedQuotes::new(&[]));
        let err = engine.buy("alice", "ZZZZ", 1, "USD").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid ticker symbol.");
        assert!(matches!(
            engine.sell("alice", "ZZZZ", 1, "USD").await,
            Err(AppError::InvalidTicker(_))
        ));
        assert!(store.transactions("alice").unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsupported_form_currency_is_rejected() {
        let (engine, _) = engine_with(FixedQuotes::new(&[("AAPL", 100.0)]));
        assert!(matches!(
            engine.buy("alice", "AAPL", 1, "XYZ").await,
            Err(AppError::InvalidCurrency(_))
        ));
    }

    #[tokio::test]
    async fn buy_beyond_balance_changes_nothing() {
        let (engine, store) = engine_with(FixedQuotes::new(&[("AAPL", 100.0)]));
        let err = engine.buy("alice", "AAPL", 101, "USD").await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds { .. }));
        assert_eq!(store.require_user("alice").unwrap().balance, 10000.0);
        assert_eq!(store.holding("alice", "AAPL").unwrap().unwrap().shares, 0);
    }

    #[tokio::test]
    async fn oversell_changes_nothing() {
        let (engine, store) = engine_with(FixedQuotes::new(&[("AAPL", 100.0)]));
        engine.buy("alice", "AAPL", 2, "USD").await.unwrap();

        let err = engine.sell("alice", "AAPL", 3, "USD").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientShares { held: 2, requested: 3, .. }
        ));
        assert_eq!(store.holding("alice", "AAPL").unwrap().unwrap().shares, 2);
        assert_eq!(store.require_user("alice").unwrap().balance, 9800.0);
        assert_eq!(store.transactions("alice").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn settles_in_the_account_currency() {
        let store = Arc::new(Store::open_in_memory(10000.0).unwrap());
        store.create_user("eve", "hash", "EUR", &[]).unwrap();
        let rates = Arc::new(FlatRates(HashMap::from([("EUR".to_string(), 0.5)])));
        let engine = TradeEngine::new(store.clone(), FixedQuotes::new(&[("SAP", 100.0)]), rates);

        // Form currency is USD but the account is in EUR.
        let receipt = engine.buy("eve", "SAP", 4, "USD").await.unwrap();
        assert_eq!(receipt.settled_value, 200.0);
        assert_eq!(receipt.currency, "EUR");
        assert_eq!(receipt.balance, 9800.0);

        // Cost basis stays in the quote currency.
        let holding = store.holding("eve", "SAP").unwrap().unwrap();
        assert_eq!(holding.initial_investment, 400.0);
    }
}
