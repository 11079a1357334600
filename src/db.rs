// src/db.rs
use crate::error::{AppError, Result};
use crate::models::{FinancialLogEntry, Holding, TradeAction, Transaction, User};
use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY,
    password TEXT,
    balance REAL,
    initial_balance REAL,
    currency TEXT DEFAULT 'USD'
);

CREATE TABLE IF NOT EXISTS portfolios (
    username TEXT,
    ticker TEXT,
    shares INTEGER,
    initial_investment REAL,
    PRIMARY KEY (username, ticker),
    FOREIGN KEY (username) REFERENCES users (username)
);

CREATE TABLE IF NOT EXISTS financial_logs (
    username TEXT,
    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
    total_value REAL,
    FOREIGN KEY (username) REFERENCES users (username)
);

CREATE TABLE IF NOT EXISTS transactions (
    username TEXT,
    action TEXT,
    ticker TEXT,
    amount INTEGER,
    price REAL,
    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
);
"#;

/// SQLite-backed account store. The connection sits behind a mutex so the
/// request handlers and background tasks can share one `Arc<Store>`.
pub struct Store {
    conn: Mutex<Connection>,
    initial_balance: f64,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P, initial_balance: f64) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn, initial_balance)
    }

    pub fn open_in_memory(initial_balance: f64) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, initial_balance)
    }

    fn init(conn: Connection, initial_balance: f64) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        run_migrations(&conn, initial_balance)?;
        info!("Account store ready.");
        Ok(Store {
            conn: Mutex::new(conn),
            initial_balance,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::StoreUnavailable)
    }

    /// Inserts the user and a zero-share row for every seed ticker. Either
    /// all rows land or none do.
    pub fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        currency: &str,
        seed_tickers: &[String],
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO users (username, password, balance, initial_balance, currency) VALUES (?1, ?2, ?3, ?3, ?4)",
            params![username, password_hash, self.initial_balance, currency],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(AppError::DuplicateUsername(username.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        for ticker in seed_tickers {
            tx.execute(
                "INSERT OR IGNORE INTO portfolios (username, ticker, shares, initial_investment) VALUES (?1, ?2, 0, 0)",
                params![username, ticker],
            )?;
        }
        tx.commit()?;
        info!("Created account {} with {} seeded holdings", username, seed_tickers.len());
        Ok(())
    }

    pub fn get_user(&self, username: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                "SELECT username, password, balance, initial_balance, currency FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(User {
                        username: row.get(0)?,
                        password_hash: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        balance: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                        initial_balance: row
                            .get::<_, Option<f64>>(3)?
                            .unwrap_or(self.initial_balance),
                        currency: row
                            .get::<_, Option<String>>(4)?
                            .unwrap_or_else(|| crate::config::DEFAULT_CURRENCY.to_string()),
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn require_user(&self, username: &str) -> Result<User> {
        self.get_user(username)?
            .ok_or_else(|| AppError::UnknownUser(username.to_string()))
    }

    pub fn holdings(&self, username: &str) -> Result<Vec<Holding>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT username, ticker, CAST(shares AS INTEGER), COALESCE(initial_investment, 0) FROM portfolios WHERE username = ?1 ORDER BY ticker",
        )?;
        let rows = stmt
            .query_map(params![username], holding_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn holding(&self, username: &str, ticker: &str) -> Result<Option<Holding>> {
        let conn = self.lock()?;
        let holding = conn
            .query_row(
                "SELECT username, ticker, CAST(shares AS INTEGER), COALESCE(initial_investment, 0) FROM portfolios WHERE username = ?1 AND ticker = ?2",
                params![username, ticker],
                holding_from_row,
            )
            .optional()?;
        Ok(holding)
    }

    pub fn transactions(&self, username: &str) -> Result<Vec<Transaction>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT username, action, ticker, CAST(amount AS INTEGER), price, timestamp FROM transactions WHERE username = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![username], |row| {
                let action: String = row.get(1)?;
                let action = TradeAction::parse(&action).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Text,
                        format!("unknown trade action {action}").into(),
                    )
                })?;
                Ok(Transaction {
                    username: row.get(0)?,
                    action,
                    ticker: row.get(2)?,
                    amount: row.get(3)?,
                    price: row.get(4)?,
                    timestamp: row.get::<_, DateTime<Utc>>(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Debits `converted_cost`, adds the shares and logs the trade in one
    /// transaction. Returns the new balance.
    ///
    /// `total_cost` is the quote-currency cost: it is what the holding's
    /// cost basis accumulates.
    pub fn settle_buy(
        &self,
        username: &str,
        ticker: &str,
        shares: i64,
        unit_price: f64,
        total_cost: f64,
        converted_cost: f64,
    ) -> Result<f64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let balance: f64 = tx
            .query_row(
                "SELECT balance FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| AppError::UnknownUser(username.to_string()))?;

        if balance < converted_cost {
            return Err(AppError::InsufficientFunds {
                needed: converted_cost,
                available: balance,
            });
        }

        let new_balance = balance - converted_cost;
        tx.execute(
            "UPDATE users SET balance = ?1 WHERE username = ?2",
            params![new_balance, username],
        )?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT CAST(shares AS INTEGER) FROM portfolios WHERE username = ?1 AND ticker = ?2",
                params![username, ticker],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(held) => {
                tx.execute(
                    "UPDATE portfolios SET shares = ?1, initial_investment = COALESCE(initial_investment, 0) + ?2 WHERE username = ?3 AND ticker = ?4",
                    params![held + shares, total_cost, username, ticker],
                )?;
            }
            None => {
                tx.execute(
                    "INSERT INTO portfolios (username, ticker, shares, initial_investment) VALUES (?1, ?2, ?3, ?4)",
                    params![username, ticker, shares, total_cost],
                )?;
            }
        }

        insert_transaction(&tx, username, TradeAction::Buy, ticker, shares, unit_price)?;
        tx.commit()?;
        debug!("{} bought {} {} at {}", username, shares, ticker, unit_price);
        Ok(new_balance)
    }

    /// Removes the shares (dropping the row at zero), credits
    /// `converted_proceeds` and logs the trade in one transaction. The cost
    /// basis is left as it was. Returns the new balance.
    pub fn settle_sell(
        &self,
        username: &str,
        ticker: &str,
        shares: i64,
        unit_price: f64,
        converted_proceeds: f64,
    ) -> Result<f64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let held: i64 = tx
            .query_row(
                "SELECT CAST(shares AS INTEGER) FROM portfolios WHERE username = ?1 AND ticker = ?2",
                params![username, ticker],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);

        if held < shares {
            return Err(AppError::InsufficientShares {
                ticker: ticker.to_string(),
                held,
                requested: shares,
            });
        }

        let remaining = held - shares;
        if remaining == 0 {
            tx.execute(
                "DELETE FROM portfolios WHERE username = ?1 AND ticker = ?2",
                params![username, ticker],
            )?;
        } else {
            tx.execute(
                "UPDATE portfolios SET shares = ?1 WHERE username = ?2 AND ticker = ?3",
                params![remaining, username, ticker],
            )?;
        }

        let balance: f64 = tx
            .query_row(
                "SELECT balance FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| AppError::UnknownUser(username.to_string()))?;
        let new_balance = balance + converted_proceeds;
        tx.execute(
            "UPDATE users SET balance = ?1 WHERE username = ?2",
            params![new_balance, username],
        )?;

        insert_transaction(&tx, username, TradeAction::Sell, ticker, shares, unit_price)?;
        tx.commit()?;
        debug!("{} sold {} {} at {}", username, shares, ticker, unit_price);
        Ok(new_balance)
    }

    pub fn append_financial_log(&self, username: &str, total_value: f64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO financial_logs (username, timestamp, total_value) VALUES (?1, ?2, ?3)",
            params![username, Utc::now(), total_value],
        )?;
        Ok(())
    }

    pub fn financial_logs(&self, username: &str) -> Result<Vec<FinancialLogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT username, timestamp, total_value FROM financial_logs WHERE username = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![username], |row| {
                Ok(FinancialLogEntry {
                    username: row.get(0)?,
                    timestamp: row.get(1)?,
                    total_value: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn holding_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Holding> {
    Ok(Holding {
        username: row.get(0)?,
        ticker: row.get(1)?,
        shares: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
        initial_investment: row.get(3)?,
    })
}

fn insert_transaction(
    tx: &rusqlite::Transaction<'_>,
    username: &str,
    action: TradeAction,
    ticker: &str,
    amount: i64,
    price: f64,
) -> rusqlite::Result<usize> {
    tx.execute(
        "INSERT INTO transactions (username, action, ticker, amount, price, timestamp) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![username, action.to_string(), ticker, amount, price, Utc::now()],
    )
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

/// Additive migrations for databases created by older releases.
fn run_migrations(conn: &Connection, initial_balance: f64) -> rusqlite::Result<()> {
    let user_columns = table_columns(conn, "users")?;
    if !user_columns.iter().any(|c| c == "initial_balance") {
        conn.execute(
            &format!("ALTER TABLE users ADD COLUMN initial_balance REAL DEFAULT {initial_balance}"),
            [],
        )?;
        info!("Migrated users: added initial_balance");
    }
    if !user_columns.iter().any(|c| c == "currency") {
        conn.execute("ALTER TABLE users ADD COLUMN currency TEXT DEFAULT 'USD'", [])?;
        info!("Migrated users: added currency");
    }

    let portfolio_columns = table_columns(conn, "portfolios")?;
    if !portfolio_columns.iter().any(|c| c == "initial_investment") {
        conn.execute("ALTER TABLE portfolios ADD COLUMN initial_investment REAL", [])?;
        info!("Migrated portfolios: added initial_investment");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_user() -> Store {
        let store = Store::open_in_memory(10000.0).unwrap();
        store
            .create_user("alice", "hash", "USD", &["AAPL".to_string(), "MSFT".to_string()])
            .unwrap();
        store
    }

    #[test]
    fn registration_seeds_zero_holdings() {
        let store = store_with_user();
        let user = store.require_user("alice").unwrap();
        assert_eq!(user.balance, 10000.0);
        assert_eq!(user.initial_balance, 10000.0);
        assert_eq!(user.currency, "USD");

        let holdings = store.holdings("alice").unwrap();
        assert_eq!(holdings.len(), 2);
        assert!(holdings.iter().all(|h| h.shares == 0 && h.initial_investment == 0.0));
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let store = store_with_user();
        let err = store.create_user("alice", "other", "USD", &[]).unwrap_err();
        assert!(matches!(err, AppError::DuplicateUsername(name) if name == "alice"));
        assert_eq!(store.require_user("alice").unwrap().password_hash, "hash");
    }

    #[test]
    fn buy_accumulates_cost_basis_on_seeded_and_new_rows() {
        let store = store_with_user();
        store.settle_buy("alice", "AAPL", 2, 100.0, 200.0, 200.0).unwrap();
        store.settle_buy("alice", "AAPL", 1, 110.0, 110.0, 110.0).unwrap();
        store.settle_buy("alice", "NFLX", 3, 10.0, 30.0, 30.0).unwrap();

        let aapl = store.holding("alice", "AAPL").unwrap().unwrap();
        assert_eq!(aapl.shares, 3);
        assert_eq!(aapl.initial_investment, 310.0);

        let nflx = store.holding("alice", "NFLX").unwrap().unwrap();
        assert_eq!(nflx.shares, 3);
        assert_eq!(nflx.initial_investment, 30.0);

        assert_eq!(store.require_user("alice").unwrap().balance, 10000.0 - 340.0);
        assert_eq!(store.transactions("alice").unwrap().len(), 3);
    }

    #[test]
    fn insufficient_funds_rolls_back() {
        let store = store_with_user();
        let err = store
            .settle_buy("alice", "AAPL", 200, 100.0, 20000.0, 20000.0)
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds { .. }));
        assert_eq!(store.require_user("alice").unwrap().balance, 10000.0);
        assert_eq!(store.holding("alice", "AAPL").unwrap().unwrap().shares, 0);
        assert!(store.transactions("alice").unwrap().is_empty());
    }

    #[test]
    fn sell_deletes_row_only_at_zero_and_keeps_basis() {
        let store = store_with_user();
        store.settle_buy("alice", "AAPL", 5, 100.0, 500.0, 500.0).unwrap();

        store.settle_sell("alice", "AAPL", 2, 120.0, 240.0).unwrap();
        let aapl = store.holding("alice", "AAPL").unwrap().unwrap();
        assert_eq!(aapl.shares, 3);
        assert_eq!(aapl.initial_investment, 500.0);

        let balance = store.settle_sell("alice", "AAPL", 3, 120.0, 360.0).unwrap();
        assert!(store.holding("alice", "AAPL").unwrap().is_none());
        assert_eq!(balance, 10000.0 - 500.0 + 240.0 + 360.0);

        let actions: Vec<_> = store
            .transactions("alice")
            .unwrap()
            .into_iter()
            .map(|t| t.action)
            .collect();
        assert_eq!(actions, vec![TradeAction::Buy, TradeAction::Sell, TradeAction::Sell]);
    }

    #[test]
    fn overselling_leaves_rows_unchanged() {
        let store = store_with_user();
        store.settle_buy("alice", "AAPL", 1, 100.0, 100.0, 100.0).unwrap();

        let err = store.settle_sell("alice", "AAPL", 2, 100.0, 200.0).unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientShares { held: 1, requested: 2, .. }
        ));
        assert_eq!(store.holding("alice", "AAPL").unwrap().unwrap().shares, 1);
        assert_eq!(store.require_user("alice").unwrap().balance, 9900.0);
        assert_eq!(store.transactions("alice").unwrap().len(), 1);

        let err = store.settle_sell("alice", "TSLA", 1, 100.0, 100.0).unwrap_err();
        assert!(matches!(err, AppError::InsufficientShares { held: 0, .. }));
    }

    #[test]
    fn legacy_schema_gains_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE users (username TEXT PRIMARY KEY, password TEXT, balance REAL);
                 CREATE TABLE portfolios (username TEXT, ticker TEXT, shares REAL, PRIMARY KEY (username, ticker));
                 INSERT INTO users VALUES ('old', 'h', 1234.5);
                 INSERT INTO portfolios VALUES ('old', 'AAPL', 4.0);",
            )
            .unwrap();
        }

        let store = Store::open(&path, 10000.0).unwrap();
        let user = store.require_user("old").unwrap();
        assert_eq!(user.balance, 1234.5);
        assert_eq!(user.initial_balance, 10000.0);
        assert_eq!(user.currency, "USD");

        let holding = store.holding("old", "AAPL").unwrap().unwrap();
        assert_eq!(holding.shares, 4);
        assert_eq!(holding.initial_investment, 0.0);

        // A NULL basis from the added column counts as zero on the next buy.
        store.settle_buy("old", "AAPL", 1, 50.0, 50.0, 50.0).unwrap();
        let holding = store.holding("old", "AAPL").unwrap().unwrap();
        assert_eq!(holding.shares, 5);
        assert_eq!(holding.initial_investment, 50.0);
        let raw: Option<f64> = store
            .lock()
            .unwrap()
            .query_row(
                "SELECT initial_investment FROM portfolios WHERE username = 'old' AND ticker = 'AAPL'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(raw, Some(50.0));

        // Reopening is a no-op.
        drop(store);
        Store::open(&path, 10000.0).unwrap();
    }

    #[test]
    fn financial_log_round_trip() {
        let store = store_with_user();
        store.append_financial_log("alice", 10100.0).unwrap();
        let logs = store.financial_logs("alice").unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].total_value, 10100.0);
    }
}
