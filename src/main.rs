// src/main.rs
use bulltrader::config::Config;
use env_logger::Builder;
use log::{error, info, LevelFilter};

#[tokio::main]
async fn main() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    let config = Config::from_env();
    info!("Starting the bulltrader paper-trading server...");

    if let Err(e) = bulltrader::run(config).await {
        error!("Server stopped: {:#}", e);
        std::process::exit(1);
    }
}
