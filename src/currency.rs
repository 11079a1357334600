// src/currency.rs
//! Currency conversion against an exchangerate-api style rate table.

use crate::error::AppError;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;

#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Rates quoted against `base`, keyed by currency code.
    async fn rates(&self, base: &str) -> Result<HashMap<String, f64>, AppError>;
}

#[derive(Deserialize, Debug)]
struct LatestRates {
    rates: HashMap<String, f64>,
}

pub struct ExchangeRateApi {
    client: Client,
    base_url: String,
}

impl ExchangeRateApi {
    pub fn new(client: Client, base_url: &str) -> Self {
        ExchangeRateApi {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RateProvider for ExchangeRateApi {
    async fn rates(&self, base: &str) -> Result<HashMap<String, f64>, AppError> {
        let url = format!("{}/v4/latest/{}", self.base_url, base);
        debug!("Requesting rates from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(e.to_string()))?;
        let latest = response
            .json::<LatestRates>()
            .await
            .map_err(|e| AppError::ProviderUnavailable(e.to_string()))?;
        Ok(latest.rates)
    }
}

/// Converts `amount` from one currency to another.
///
/// Same currency is the identity and never touches the network. A target
/// missing from the table converts at 1. If the provider fails the amount
/// comes back unconverted.
pub async fn convert(provider: &dyn RateProvider, amount: f64, from: &str, to: &str) -> f64 {
    if from == to {
        return amount;
    }
    match provider.rates(from).await {
        Ok(rates) => amount * rates.get(to).copied().unwrap_or(1.0),
        Err(e) => {
            warn!("Error converting currency {} -> {}: {}", from, to, e);
            amount
        }
    }
}

pub async fn rate(provider: &dyn RateProvider, from: &str, to: &str) -> f64 {
    convert(provider, 1.0, from, to).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct CountingRates {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RateProvider for CountingRates {
        async fn rates(&self, _base: &str) -> Result<HashMap<String, f64>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HashMap::from([("EUR".to_string(), 0.5)]))
        }
    }

    #[tokio::test]
    async fn same_currency_is_identity_without_lookup() {
        let provider = CountingRates {
            calls: AtomicUsize::new(0),
        };
        for amount in [0.0, 1.0, -3.25, 10000.0] {
            for code in ["USD", "EUR", "JPY"] {
                assert_eq!(convert(&provider, amount, code, code).await, amount);
            }
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_target_converts_at_one() {
        let provider = CountingRates {
            calls: AtomicUsize::new(0),
        };
        assert_eq!(convert(&provider, 100.0, "USD", "EUR").await, 50.0);
        assert_eq!(convert(&provider, 100.0, "USD", "XYZ").await, 100.0);
    }

    #[test_log::test(tokio::test)]
    async fn reads_rate_table() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/latest/USD"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"base":"USD","rates":{"USD":1,"EUR":0.9,"JPY":150.0}}"#,
            ))
            .mount(&server)
            .await;

        let api = ExchangeRateApi::new(Client::new(), &server.uri());
        assert_eq!(convert(&api, 10.0, "USD", "EUR").await, 9.0);
        assert_eq!(rate(&api, "USD", "JPY").await, 150.0);
    }

    #[test_log::test(tokio::test)]
    async fn provider_failure_returns_amount_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let api = ExchangeRateApi::new(Client::new(), &server.uri());
        assert_eq!(convert(&api, 500.0, "USD", "EUR").await, 500.0);
    }
}
