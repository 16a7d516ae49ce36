//! Authentication core: password derivation, session lifecycle, store
//! adapters.

pub mod password;
pub mod session;
pub mod store;

pub use session::SessionManager;
pub use store::{MemoryStore, PgStore, SessionStore};

use thiserror::Error;

/// Failures surfaced by the authentication core.
///
/// Invalid credentials and unknown accounts are deliberately the same
/// variant so responses cannot be used to enumerate accounts. Store I/O
/// failures are recoverable; callers map them to a redirect or a 5xx, never
/// a crash.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid session")]
    InvalidSession,
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),
}
