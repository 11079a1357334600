// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub balance: f64,
    pub initial_balance: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Holding {
    pub username: String,
    pub ticker: String,
    pub shares: i64,
    /// Cumulative cost basis in the quote currency.
    pub initial_investment: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeAction {
    Buy,
    Sell,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "Buy"),
            TradeAction::Sell => write!(f, "Sell"),
        }
    }
}

impl TradeAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Buy" => Some(TradeAction::Buy),
            "Sell" => Some(TradeAction::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub username: String,
    pub action: TradeAction,
    pub ticker: String,
    pub amount: i64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialLogEntry {
    pub username: String,
    pub timestamp: DateTime<Utc>,
    pub total_value: f64,
}

/// One OHLC bar from the quote provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceHistory {
    pub ticker: String,
    pub bars: Vec<Bar>,
}

impl PriceHistory {
    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|bar| bar.close)
    }

    pub fn first_open(&self) -> Option<f64> {
        self.bars.first().map(|bar| bar.open)
    }

    pub fn closes(&self) -> Vec<(DateTime<Utc>, f64)> {
        self.bars.iter().map(|bar| (bar.timestamp, bar.close)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub title: String,
    pub description: Option<String>,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct TradeRequest {
    pub ticker: String,
    pub amount: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    crate::config::DEFAULT_CURRENCY.to_string()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TradeReceipt {
    pub message: String,
    pub action: TradeAction,
    pub ticker: String,
    pub amount: i64,
    pub unit_price: f64,
    /// Cost or proceeds in the user's currency.
    pub settled_value: f64,
    pub currency: String,
    pub balance: f64,
}
