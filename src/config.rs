// src/config.rs
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const INITIAL_BALANCE: f64 = 10000.0;
pub const DEFAULT_CURRENCY: &str = "USD";
pub const UPDATE_INTERVAL_SECS: u64 = 60;
pub const SESSION_IDLE_SECS: u64 = 30 * 60;
pub const TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

pub const STOCK_LIST: [&str; 10] = [
    "AAPL", "MSFT", "GOOGL", "AMZN", "TSLA", "META", "NVDA", "BRK-B", "V", "JPM",
];
pub const CURRENCIES: [&str; 5] = ["USD", "EUR", "GBP", "JPY", "AUD"];
pub const GOLD_TICKER: &str = "GC=F";

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub db_path: String,
    pub jwt_secret: String,
    pub quote_base_url: String,
    pub fx_base_url: String,
    pub news_base_url: String,
    pub initial_balance: f64,
    pub default_currency: String,
    pub watch_list: Vec<String>,
    pub refresh_interval: Duration,
    pub session_idle: Duration,
    pub token_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: ([127, 0, 0, 1], 3030).into(),
            db_path: "trading_game.db".to_string(),
            jwt_secret: "change-me".to_string(),
            quote_base_url: "https://query1.finance.yahoo.com".to_string(),
            fx_base_url: "https://api.exchangerate-api.com".to_string(),
            news_base_url: "https://newsapi.org".to_string(),
            initial_balance: INITIAL_BALANCE,
            default_currency: DEFAULT_CURRENCY.to_string(),
            watch_list: STOCK_LIST.iter().map(|t| t.to_string()).collect(),
            refresh_interval: Duration::from_secs(UPDATE_INTERVAL_SECS),
            session_idle: Duration::from_secs(SESSION_IDLE_SECS),
            token_ttl: Duration::from_secs(TOKEN_TTL_SECS),
        }
    }
}

impl Config {
    /// Reads `BULLTRADER_*` variables, falling back to the defaults above.
    /// A `.env` file in the working directory is honoured.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Config::default();

        Config {
            listen_addr: parse_var("BULLTRADER_LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            db_path: env::var("BULLTRADER_DB_PATH").unwrap_or(defaults.db_path),
            jwt_secret: env::var("BULLTRADER_JWT_SECRET").unwrap_or(defaults.jwt_secret),
            quote_base_url: env::var("BULLTRADER_QUOTE_URL").unwrap_or(defaults.quote_base_url),
            fx_base_url: env::var("BULLTRADER_FX_URL").unwrap_or(defaults.fx_base_url),
            news_base_url: env::var("BULLTRADER_NEWS_URL").unwrap_or(defaults.news_base_url),
            initial_balance: parse_var("BULLTRADER_INITIAL_BALANCE")
                .unwrap_or(defaults.initial_balance),
            default_currency: env::var("BULLTRADER_CURRENCY")
                .map(|c| c.to_uppercase())
                .unwrap_or(defaults.default_currency),
            watch_list: env::var("BULLTRADER_WATCH_LIST")
                .map(|list| parse_list(&list))
                .unwrap_or(defaults.watch_list),
            refresh_interval: parse_var("BULLTRADER_REFRESH_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.refresh_interval),
            session_idle: parse_var("BULLTRADER_SESSION_IDLE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_idle),
            token_ttl: parse_var("BULLTRADER_TOKEN_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.token_ttl),
        }
    }
}

pub fn is_supported_currency(code: &str) -> bool {
    CURRENCIES.contains(&code)
}

fn parse_var<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring unparsable {}={}", key, raw);
            None
        }
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_list_parsing_skips_blanks() {
        assert_eq!(parse_list("aapl, msft,,TSLA "), vec!["AAPL", "MSFT", "TSLA"]);
    }

    #[test]
    fn defaults_match_game_rules() {
        let config = Config::default();
        assert_eq!(config.initial_balance, 10000.0);
        assert_eq!(config.default_currency, "USD");
        assert_eq!(config.watch_list.len(), 10);
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
    }

    #[test]
    fn supported_currencies() {
        assert!(is_supported_currency("EUR"));
        assert!(!is_supported_currency("XYZ"));
    }
}
