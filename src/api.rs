// src/api.rs
use crate::auth::Session;
use crate::error::AppError;
use crate::models::{Credentials, Holding, TradeRequest, Transaction, User};
use crate::news;
use crate::quotes::Period;
use crate::refresher::PriceCache;
use crate::AppState;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use warp::http::StatusCode;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

const MAX_BODY_BYTES: u64 = 16 * 1024;

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    range: Option<String>,
}

impl RangeQuery {
    fn period(&self) -> Result<Period, AppError> {
        match &self.range {
            Some(range) => range.parse(),
            None => Ok(Period::OneDay),
        }
    }
}

#[derive(Serialize)]
struct PortfolioView {
    user: User,
    holdings: Vec<Holding>,
    transactions: Vec<Transaction>,
}

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let create_account = warp::path("accounts")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(json_body::<Credentials>())
        .and_then(create_account_handler);

    let login = warp::path("login")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(json_body::<Credentials>())
        .and_then(login_handler);

    let logout = warp::path("logout")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(bearer_token())
        .and_then(logout_handler);

    let buy = warp::path!("trade" / "buy")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(authenticated(state.clone()))
        .and(json_body::<TradeRequest>())
        .and_then(buy_handler);

    let sell = warp::path!("trade" / "sell")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(authenticated(state.clone()))
        .and(json_body::<TradeRequest>())
        .and_then(sell_handler);

    let portfolio = warp::path("portfolio")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(authenticated(state.clone()))
        .and_then(portfolio_handler);

    let overview = warp::path("overview")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(authenticated(state.clone()))
        .and_then(overview_handler);

    let holdings_history = warp::path!("holdings" / "history")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(authenticated(state.clone()))
        .and(warp::query::<RangeQuery>())
        .and_then(holdings_history_handler);

    let lookup = warp::path!("lookup" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(authenticated(state.clone()))
        .and(warp::query::<RangeQuery>())
        .and_then(lookup_handler);

    let get_news = warp::path!("news" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(authenticated(state.clone()))
        .and(warp::header::optional::<String>("x-news-api-key"))
        .and_then(news_handler);

    let market_status = warp::path!("market" / "status")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(market_status_handler);

    let currencies = warp::path!("market" / "currencies")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(currency_board_handler);

    let prices = warp::path("prices")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(prices_handler);

    let price_feed = warp::path!("prices" / "ws")
        .and(warp::ws())
        .and(with_state(state.prices.clone()))
        .and(with_state(state.config.refresh_interval))
        .map(|ws: Ws, cache: PriceCache, every: Duration| {
            ws.on_upgrade(move |socket| stream_prices(socket, cache, every))
        });

    create_account
        .or(login)
        .or(logout)
        .or(buy)
        .or(sell)
        .or(portfolio)
        .or(overview)
        .or(holdings_history)
        .or(lookup)
        .or(get_news)
        .or(market_status)
        .or(currencies)
        .or(prices)
        .or(price_feed)
        .recover(handle_rejection)
}

fn with_state<T: Clone + Send + Sync + 'static>(
    value: T,
) -> impl Filter<Extract = (T,), Error = Infallible> + Clone {
    warp::any().map(move || value.clone())
}

fn json_body<T: serde::de::DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// Pulls the token out of an `Authorization: Bearer <token>` header.
fn bearer_token() -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(
        |header: Option<String>| async move {
            header
                .as_deref()
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty())
                .ok_or_else(|| warp::reject::custom(AppError::Unauthorized))
        },
    )
}

fn authenticated(state: AppState) -> impl Filter<Extract = (Session,), Error = Rejection> + Clone {
    bearer_token()
        .and(with_state(state))
        .and_then(|token: String, state: AppState| async move {
            state
                .auth
                .authenticate(&token)
                .await
                .map_err(warp::reject::custom)
        })
}

fn reject(context: &str, e: AppError) -> Rejection {
    match e.status() {
        StatusCode::INTERNAL_SERVER_ERROR | StatusCode::BAD_GATEWAY => {
            error!("{} failed: {}", context, e)
        }
        _ => debug!("{} rejected: {}", context, e),
    }
    warp::reject::custom(e)
}

async fn create_account_handler(
    state: AppState,
    credentials: Credentials,
) -> Result<impl Reply, Rejection> {
    match state.auth.register(&credentials.username, &credentials.password) {
        Ok(_) => {
            info!("Account {} created.", credentials.username.trim());
            Ok(warp::reply::with_status(
                warp::reply::json(&json!({"message": "Account created successfully!"})),
                StatusCode::CREATED,
            ))
        }
        Err(e) => Err(reject("Create account", e)),
    }
}

async fn login_handler(state: AppState, credentials: Credentials) -> Result<impl Reply, Rejection> {
    match state
        .auth
        .login(&credentials.username, &credentials.password)
        .await
    {
        Ok(token) => Ok(warp::reply::json(&json!({
            "token": token,
            "username": credentials.username.trim(),
        }))),
        Err(e) => Err(reject("Login", e)),
    }
}

async fn logout_handler(state: AppState, token: String) -> Result<impl Reply, Rejection> {
    match state.auth.logout(&token).await {
        Ok(_) => Ok(warp::reply::json(&json!({"message": "Logged out"}))),
        Err(e) => Err(reject("Logout", e)),
    }
}

async fn buy_handler(
    state: AppState,
    session: Session,
    order: TradeRequest,
) -> Result<impl Reply, Rejection> {
    let ticker = order.ticker.trim().to_uppercase();
    match state
        .trades
        .buy(&session.username, &ticker, order.amount, &order.currency)
        .await
    {
        Ok(receipt) => Ok(warp::reply::json(&receipt)),
        Err(e) => Err(reject("Buy", e)),
    }
}

async fn sell_handler(
    state: AppState,
    session: Session,
    order: TradeRequest,
) -> Result<impl Reply, Rejection> {
    let ticker = order.ticker.trim().to_uppercase();
    match state
        .trades
        .sell(&session.username, &ticker, order.amount, &order.currency)
        .await
    {
        Ok(receipt) => Ok(warp::reply::json(&receipt)),
        Err(e) => Err(reject("Sell", e)),
    }
}

async fn portfolio_handler(state: AppState, session: Session) -> Result<impl Reply, Rejection> {
    match load_portfolio(&state, &session.username) {
        Ok(view) => Ok(warp::reply::json(&view)),
        Err(e) => Err(reject("Portfolio", e)),
    }
}

fn load_portfolio(state: &AppState, username: &str) -> Result<PortfolioView, AppError> {
    Ok(PortfolioView {
        user: state.store.require_user(username)?,
        holdings: state.store.holdings(username)?,
        transactions: state.store.transactions(username)?,
    })
}

async fn overview_handler(state: AppState, session: Session) -> Result<impl Reply, Rejection> {
    match state.market.financial_overview(&session.username).await {
        Ok(overview) => Ok(warp::reply::json(&overview)),
        Err(e) => Err(reject("Overview", e)),
    }
}

async fn holdings_history_handler(
    state: AppState,
    session: Session,
    query: RangeQuery,
) -> Result<impl Reply, Rejection> {
    let period = query.period().map_err(|e| reject("Holdings history", e))?;
    match state
        .market
        .holdings_history(&session.username, period)
        .await
    {
        Ok(series) => Ok(warp::reply::json(&series)),
        Err(e) => Err(reject("Holdings history", e)),
    }
}

async fn lookup_handler(
    ticker: String,
    state: AppState,
    _session: Session,
    query: RangeQuery,
) -> Result<impl Reply, Rejection> {
    let period = query.period().map_err(|e| reject("Lookup", e))?;
    match state.market.lookup(&ticker.to_uppercase(), period).await {
        Ok(series) => Ok(warp::reply::json(&series)),
        Err(AppError::InvalidTicker(_)) => Ok(warp::reply::json(
            &json!({"message": "No data available for this ticker.", "points": []}),
        )),
        Err(e) => Err(reject("Lookup", e)),
    }
}

async fn news_handler(
    ticker: String,
    state: AppState,
    _session: Session,
    api_key: Option<String>,
) -> Result<impl Reply, Rejection> {
    match news::search(state.news.as_ref(), &ticker, api_key.as_deref()).await {
        Ok(articles) if articles.is_empty() => Ok(warp::reply::json(&json!({
            "message": "No news available for this ticker.",
            "articles": [],
        }))),
        Ok(articles) => Ok(warp::reply::json(&json!({ "articles": articles }))),
        Err(e) => Err(reject("News", e)),
    }
}

async fn market_status_handler(state: AppState) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&state.market.market_status().await))
}

async fn currency_board_handler(state: AppState) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&state.market.currency_board().await))
}

async fn prices_handler(state: AppState) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&state.prices.snapshot().await))
}

/// Pushes the cached prices to the client once per refresh interval until
/// it disconnects.
async fn stream_prices(socket: WebSocket, cache: PriceCache, every: Duration) {
    let (mut sink, mut incoming) = socket.split();
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let text = match serde_json::to_string(&cache.snapshot().await) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode price snapshot: {}", e);
                        break;
                    }
                };
                if let Err(e) = sink.send(Message::text(text)).await {
                    debug!("Price feed client gone: {}", e);
                    break;
                }
            }
            message = incoming.next() => match message {
                Some(Ok(message)) if message.is_close() => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Price feed read error: {}", e);
                    break;
                }
                None => break,
            },
        }
    }
    debug!("Price feed closed");
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(e) = err.find::<AppError>() {
        (e.status(), e.to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "message": message })),
        status,
    ))
}
