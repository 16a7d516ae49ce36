//! Store adapters for accounts and sessions.
//!
//! The session lifecycle only sees the narrow [`SessionStore`] interface;
//! all SQL and state live behind it so any transactional backend can be
//! substituted.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Connection, PgPool, Row};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use tracing::Instrument;

/// Persistence operations consumed by the session lifecycle.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Connectivity check used by the health endpoint.
    async fn ping(&self) -> Result<()>;

    /// Equality lookup of an account by email and derived credential.
    async fn find_account(&self, email: &str, credential: &str) -> Result<Option<String>>;

    /// Record a successful login. Callers treat failures as non-fatal.
    async fn touch_last_login(&self, email: &str) -> Result<()>;

    /// Delete every session row for an email, returning the row count.
    async fn delete_sessions_for_email(&self, email: &str) -> Result<u64>;

    /// Insert a `(token, email)` session row.
    async fn insert_session(&self, token: &str, email: &str) -> Result<()>;

    /// Email associated with a session token, if the token exists.
    async fn session_email(&self, token: &str) -> Result<Option<String>>;

    /// Delete the session row matching this exact token. Idempotent.
    async fn delete_session(&self, token: &str) -> Result<()>;

    /// Account email lookup for the identity endpoint.
    async fn account_email(&self, email: &str) -> Result<Option<String>>;
}

/// PostgreSQL-backed store over a shared connection pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn ping(&self) -> Result<()> {
        let span = tracing::info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(span)
            .await
            .context("failed to acquire database connection")?;

        let span = tracing::info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(span)
            .await
            .context("failed to ping database")?;
        Ok(())
    }

    async fn find_account(&self, email: &str, credential: &str) -> Result<Option<String>> {
        let query = "SELECT email FROM accounts WHERE email = $1 AND password = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .bind(credential)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup account")?;
        Ok(row.map(|row| row.get("email")))
    }

    async fn touch_last_login(&self, email: &str) -> Result<()> {
        let query = "UPDATE accounts SET lastlogin = NOW() WHERE email = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(email)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update last login")?;
        Ok(())
    }

    async fn delete_sessions_for_email(&self, email: &str) -> Result<u64> {
        let query = "DELETE FROM sessions WHERE email = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(email)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete sessions for email")?;
        Ok(result.rows_affected())
    }

    async fn insert_session(&self, token: &str, email: &str) -> Result<()> {
        let query = "INSERT INTO sessions (session, email) VALUES ($1, $2)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token)
            .bind(email)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert session")?;
        Ok(())
    }

    async fn session_email(&self, token: &str) -> Result<Option<String>> {
        let query = "SELECT email FROM sessions WHERE session = $1 LIMIT 1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;
        Ok(row.map(|row| row.get("email")))
    }

    async fn delete_session(&self, token: &str) -> Result<()> {
        // Logout is idempotent; it's fine if no rows are deleted.
        let query = "DELETE FROM sessions WHERE session = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session")?;
        Ok(())
    }

    async fn account_email(&self, email: &str) -> Result<Option<String>> {
        let query = "SELECT email FROM accounts WHERE email = $1 LIMIT 1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup account email")?;
        Ok(row.map(|row| row.get("email")))
    }
}

struct AccountRecord {
    credential: String,
    last_login: Option<SystemTime>,
}

#[derive(Default)]
struct MemoryInner {
    accounts: HashMap<String, AccountRecord>,
    // token -> email
    sessions: HashMap<String, String>,
}

/// In-memory store used by tests and database-less local runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an account with an already-derived credential.
    pub fn add_account(&self, email: &str, credential: &str) {
        self.lock().accounts.insert(
            email.to_string(),
            AccountRecord {
                credential: credential.to_string(),
                last_login: None,
            },
        );
    }

    #[must_use]
    pub fn last_login(&self, email: &str) -> Option<SystemTime> {
        self.lock()
            .accounts
            .get(email)
            .and_then(|account| account.last_login)
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn find_account(&self, email: &str, credential: &str) -> Result<Option<String>> {
        let inner = self.lock();
        Ok(inner
            .accounts
            .get(email)
            .filter(|account| account.credential == credential)
            .map(|_| email.to_string()))
    }

    async fn touch_last_login(&self, email: &str) -> Result<()> {
        if let Some(account) = self.lock().accounts.get_mut(email) {
            account.last_login = Some(SystemTime::now());
        }
        Ok(())
    }

    async fn delete_sessions_for_email(&self, email: &str) -> Result<u64> {
        let mut inner = self.lock();
        let before = inner.sessions.len();
        inner.sessions.retain(|_, session_email| session_email != email);
        Ok((before - inner.sessions.len()) as u64)
    }

    async fn insert_session(&self, token: &str, email: &str) -> Result<()> {
        self.lock()
            .sessions
            .insert(token.to_string(), email.to_string());
        Ok(())
    }

    async fn session_email(&self, token: &str) -> Result<Option<String>> {
        Ok(self.lock().sessions.get(token).cloned())
    }

    async fn delete_session(&self, token: &str) -> Result<()> {
        self.lock().sessions.remove(token);
        Ok(())
    }

    async fn account_email(&self, email: &str) -> Result<Option<String>> {
        Ok(self
            .lock()
            .accounts
            .contains_key(email)
            .then(|| email.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_session_round_trip() {
        let store = MemoryStore::new();
        store.insert_session("token-a", "a@example.com").await.unwrap();

        assert_eq!(
            store.session_email("token-a").await.unwrap().as_deref(),
            Some("a@example.com")
        );
        assert_eq!(store.session_email("token-b").await.unwrap(), None);

        store.delete_session("token-a").await.unwrap();
        assert_eq!(store.session_email("token-a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_deletes_only_matching_email() {
        let store = MemoryStore::new();
        store.insert_session("token-a", "a@example.com").await.unwrap();
        store.insert_session("token-b", "a@example.com").await.unwrap();
        store.insert_session("token-c", "c@example.com").await.unwrap();

        let deleted = store
            .delete_sessions_for_email("a@example.com")
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.session_count(), 1);
        assert_eq!(
            store.session_email("token-c").await.unwrap().as_deref(),
            Some("c@example.com")
        );
    }

    #[tokio::test]
    async fn memory_store_account_lookup_requires_matching_credential() {
        let store = MemoryStore::new();
        store.add_account("a@example.com", "credential");

        assert!(store
            .find_account("a@example.com", "credential")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_account("a@example.com", "other")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_account("b@example.com", "credential")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn memory_store_touch_sets_last_login() {
        let store = MemoryStore::new();
        store.add_account("a@example.com", "credential");
        assert!(store.last_login("a@example.com").is_none());

        store.touch_last_login("a@example.com").await.unwrap();
        assert!(store.last_login("a@example.com").is_some());
    }
}
