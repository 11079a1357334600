// src/auth.rs
use crate::db::Store;
use crate::error::{AppError, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, info};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    sid: String,
    exp: usize,
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::PasswordHash(e.to_string()))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    last_seen: Instant,
}

/// Live login sessions. A session ends at logout or once it has been idle
/// for longer than `idle`.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, Session>>>,
    idle: Duration,
}

impl SessionStore {
    pub fn new(idle: Duration) -> Self {
        SessionStore {
            inner: Arc::new(RwLock::new(HashMap::new())),
            idle,
        }
    }

    pub async fn create(&self, username: &str) -> Session {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            created_at: Utc::now(),
            last_seen: Instant::now(),
        };
        self.inner
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        session
    }

    /// Returns the session and marks it as active, or `None` when it is
    /// unknown or has gone idle (idle sessions are dropped).
    pub async fn touch(&self, id: &str) -> Option<Session> {
        let mut sessions = self.inner.write().await;
        let now = Instant::now();
        let expired = match sessions.get_mut(id) {
            Some(session) if now.duration_since(session.last_seen) <= self.idle => {
                session.last_seen = now;
                return Some(session.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            debug!("Session {} idled out", id);
            sessions.remove(id);
        }
        None
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.inner.write().await.remove(id).is_some()
    }

    pub async fn purge_idle(&self) -> usize {
        let mut sessions = self.inner.write().await;
        let before = sessions.len();
        let now = Instant::now();
        sessions.retain(|_, s| now.duration_since(s.last_seen) <= self.idle);
        before - sessions.len()
    }

    pub async fn active_count(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// Registration, login and bearer-token checks.
#[derive(Clone)]
pub struct Auth {
    store: Arc<Store>,
    sessions: SessionStore,
    secret: Arc<String>,
    token_ttl: Duration,
    default_currency: String,
    seed_tickers: Arc<Vec<String>>,
}

impl Auth {
    pub fn new(
        store: Arc<Store>,
        sessions: SessionStore,
        secret: &str,
        token_ttl: Duration,
        default_currency: &str,
        seed_tickers: Vec<String>,
    ) -> Self {
        Auth {
            store,
            sessions,
            secret: Arc::new(secret.to_string()),
            token_ttl,
            default_currency: default_currency.to_string(),
            seed_tickers: Arc::new(seed_tickers),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn register(&self, username: &str, password: &str) -> Result<()> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AppError::MissingField("Username and password are required."));
        }
        let hash = hash_password(password)?;
        self.store
            .create_user(username, &hash, &self.default_currency, &self.seed_tickers)
    }

    /// Checks the credentials, opens a session and returns its bearer token.
    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        let user = self
            .store
            .get_user(username.trim())?
            .ok_or(AppError::AuthFailure)?;
        if !verify_password(password, &user.password_hash) {
            return Err(AppError::AuthFailure);
        }

        let session = self.sessions.create(&user.username).await;
        info!("{} logged in", user.username);
        self.create_token(&session)
    }

    fn create_token(&self, session: &Session) -> Result<String> {
        let exp = Utc::now().timestamp() as usize + self.token_ttl.as_secs() as usize;
        let claims = Claims {
            sub: session.username.clone(),
            sid: session.id.clone(),
            exp,
        };
        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?)
    }

    pub async fn authenticate(&self, token: &str) -> Result<Session> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| {
            debug!("Rejected token: {}", e);
            AppError::Unauthorized
        })?;

        match self.sessions.touch(&data.claims.sid).await {
            Some(session) if session.username == data.claims.sub => Ok(session),
            _ => Err(AppError::Unauthorized),
        }
    }

    pub async fn logout(&self, token: &str) -> Result<()> {
        let session = self.authenticate(token).await?;
        self.sessions.remove(&session.id).await;
        info!("{} logged out", session.username);
        Ok(())
    }
}
