// src/quotes.rs
use crate::error::AppError;
use crate::models::{Bar, PriceHistory};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use anyhow::anyhow;
use log::{debug, warn};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "5d")]
    FiveDays,
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
    #[serde(rename = "10y")]
    TenYears,
    #[serde(rename = "ytd")]
    YearToDate,
    #[serde(rename = "max")]
    Max,
}

impl Period {
    pub const ALL: [Period; 11] = [
        Period::OneDay,
        Period::FiveDays,
        Period::OneMonth,
        Period::ThreeMonths,
        Period::SixMonths,
        Period::OneYear,
        Period::TwoYears,
        Period::FiveYears,
        Period::TenYears,
        Period::YearToDate,
        Period::Max,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Period::OneDay => "1d",
            Period::FiveDays => "5d",
            Period::OneMonth => "1mo",
            Period::ThreeMonths => "3mo",
            Period::SixMonths => "6mo",
            Period::OneYear => "1y",
            Period::TwoYears => "2y",
            Period::FiveYears => "5y",
            Period::TenYears => "10y",
            Period::YearToDate => "ytd",
            Period::Max => "max",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Period::OneDay => "1 Day",
            Period::FiveDays => "5 Days",
            Period::OneMonth => "1 Month",
            Period::ThreeMonths => "3 Months",
            Period::SixMonths => "6 Months",
            Period::OneYear => "1 Year",
            Period::TwoYears => "2 Years",
            Period::FiveYears => "5 Years",
            Period::TenYears => "10 Years",
            Period::YearToDate => "Year to Date",
            Period::Max => "Max",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Period {
    type Err = AppError;

    /// Accepts the provider codes (`1mo`) as well as the form labels (`1 Month`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Period::ALL
            .iter()
            .copied()
            .find(|p| p.code().eq_ignore_ascii_case(wanted) || p.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| AppError::InvalidRange(s.to_string()))
    }
}

/// Source of OHLC history. Implementations swallow provider errors and
/// return `None`, callers must treat that as "cannot proceed".
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn fetch(&self, ticker: &str, period: Period) -> Option<PriceHistory>;

    async fn latest_close(&self, ticker: &str) -> Option<f64> {
        self.fetch(ticker, Period::OneDay)
            .await
            .and_then(|history| history.last_close())
    }
}

#[derive(Deserialize, Debug)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Deserialize, Debug)]
struct ChartBody {
    result: Option<Vec<ChartItem>>,
}

#[derive(Deserialize, Debug)]
struct ChartItem {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    quote: Vec<QuoteSeries>,
}

#[derive(Deserialize, Debug, Default)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

pub struct YahooQuotes {
    client: Client,
    base_url: String,
}

impl YahooQuotes {
    pub fn new(client: Client, base_url: &str) -> Self {
        YahooQuotes {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn chart_url(&self, ticker: &str) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("{} cannot carry a path", self.base_url))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", ticker]);
        Ok(url)
    }

    async fn request(&self, ticker: &str, period: Period) -> anyhow::Result<PriceHistory> {
        let url = self.chart_url(ticker)?;
        debug!("Requesting {}", url);

        let response = self
            .client
            .get(url)
            .query(&[("interval", "1d"), ("range", period.code())])
            .send()
            .await?
            .error_for_status()?
            .json::<ChartResponse>()
            .await?;

        Ok(PriceHistory {
            ticker: ticker.to_string(),
            bars: response
                .chart
                .result
                .and_then(|items| items.into_iter().next())
                .map(bars_from_chart)
                .unwrap_or_default(),
        })
    }
}

fn bars_from_chart(item: ChartItem) -> Vec<Bar> {
    let timestamps = item.timestamp.unwrap_or_default();
    let series = item.indicators.quote.into_iter().next().unwrap_or_default();

    timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let close = at(&series.close, i)?;
            let timestamp = Utc.timestamp_opt(*ts, 0).single()?;
            Some(Bar {
                timestamp,
                open: at(&series.open, i).unwrap_or(close),
                high: at(&series.high, i).unwrap_or(close),
                low: at(&series.low, i).unwrap_or(close),
                close,
                volume: series.volume.get(i).copied().flatten().unwrap_or(0),
            })
        })
        .collect()
}

/// Provider symbols are letters and digits plus `.^=-` (`BRK-B`, `^GSPC`, `GC=F`).
pub fn is_valid_symbol(ticker: &str) -> bool {
    ticker.chars().any(|c| c.is_ascii_alphanumeric())
        && ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '^' | '=' | '-'))
}

fn at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten()
}

#[async_trait]
impl QuoteProvider for YahooQuotes {
    async fn fetch(&self, ticker: &str, period: Period) -> Option<PriceHistory> {
        if !is_valid_symbol(ticker) {
            debug!("Refusing malformed ticker {:?}", ticker);
            return None;
        }
        match self.request(ticker, period).await {
            Ok(history) if !history.bars.is_empty() => Some(history),
            Ok(_) => {
                debug!("No trading data for {} over {}", ticker, period);
                None
            }
            Err(e) => {
                warn!("Error fetching data for {}: {}", ticker, e);
                None
            }
        }
    }
}
