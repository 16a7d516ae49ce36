//! Session lifecycle: issuance, validation, revocation.

use crate::auth::password::derive_credential;
use crate::auth::store::SessionStore;
use crate::auth::AuthError;
use anyhow::{Context, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use tracing::error;

/// Raw entropy per session token; hex-encodes to 128 characters.
const SESSION_TOKEN_BYTES: usize = 64;

/// Issues, validates, and revokes session tokens against an injected store.
///
/// Per account the state machine is `NoSession -> Active -> NoSession`:
/// a session becomes active on issuance and returns to none on revocation
/// or when a newer issuance supersedes it.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Verify credentials and issue a fresh session token.
    ///
    /// Returns the token together with the normalized email. Unknown
    /// accounts and wrong passwords are indistinguishable to the caller.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` when the email/credential pair matches no
    /// account; `Store` when the store fails.
    pub async fn login(&self, email: &str, password: &str) -> Result<(String, String), AuthError> {
        let email = normalize_email(email);
        let credential = derive_credential(password);

        let account = self
            .store
            .find_account(&email, &credential)
            .await
            .map_err(AuthError::Store)?;
        if account.is_none() {
            return Err(AuthError::InvalidCredentials);
        }

        // Failure to record the login time never aborts the login.
        if let Err(err) = self.store.touch_last_login(&email).await {
            error!("Failed to update last login for {email}: {err}");
        }

        let token = self.issue(&email).await?;
        Ok((token, email))
    }

    /// Issue a token for an already-authenticated email.
    ///
    /// Existing sessions for the email are deleted first so at most one
    /// session stays live per account. The delete and the insert are
    /// separate statements, not a transaction: two concurrent logins can
    /// both pass the delete before either inserts, leaving two valid
    /// tokens. The invariant is a target, not a guarantee.
    ///
    /// # Errors
    ///
    /// `Store` when token generation or either store operation fails.
    pub async fn issue(&self, email: &str) -> Result<String, AuthError> {
        let token = generate_session_token().map_err(AuthError::Store)?;
        self.store
            .delete_sessions_for_email(email)
            .await
            .map_err(AuthError::Store)?;
        self.store
            .insert_session(&token, email)
            .await
            .map_err(AuthError::Store)?;
        Ok(token)
    }

    /// Resolve a token to its email.
    ///
    /// Existence of the row is the only check; there is no server-side
    /// expiry, only the client cookie's lifetime bounds exposure.
    ///
    /// # Errors
    ///
    /// `InvalidSession` when no row matches; `Store` when the lookup fails.
    pub async fn validate(&self, token: &str) -> Result<String, AuthError> {
        self.store
            .session_email(token)
            .await
            .map_err(AuthError::Store)?
            .ok_or(AuthError::InvalidSession)
    }

    /// Delete the session matching this exact token, logging out only the
    /// device that presented it.
    ///
    /// # Errors
    ///
    /// `Store` when the delete fails.
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        self.store
            .delete_session(token)
            .await
            .map_err(AuthError::Store)
    }
}

/// Lowercase and trim an email for lookup, matching how accounts are stored.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Generate a session token: 64 bytes from the OS RNG, hex-encoded.
/// The raw value only travels in the cookie; the store keeps it verbatim.
fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryStore;

    fn manager_with_store() -> (SessionManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (SessionManager::new(store.clone()), store)
    }

    #[test]
    fn generated_tokens_are_128_hex_chars_and_unique() {
        let first = generate_session_token().expect("token");
        let second = generate_session_token().expect("token");
        assert_eq!(first.len(), 128);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Admin@Example.COM "), "admin@example.com");
    }

    #[tokio::test]
    async fn issue_then_validate_returns_email() {
        let (manager, _) = manager_with_store();
        let token = manager.issue("admin@example.com").await.expect("issue");
        let email = manager.validate(&token).await.expect("validate");
        assert_eq!(email, "admin@example.com");
    }

    #[tokio::test]
    async fn validate_fails_after_revoke() {
        let (manager, _) = manager_with_store();
        let token = manager.issue("admin@example.com").await.expect("issue");
        manager.revoke(&token).await.expect("revoke");
        assert!(matches!(
            manager.validate(&token).await,
            Err(AuthError::InvalidSession)
        ));
    }

    #[tokio::test]
    async fn second_issue_supersedes_first_token() {
        let (manager, store) = manager_with_store();
        let first = manager.issue("admin@example.com").await.expect("issue");
        let second = manager.issue("admin@example.com").await.expect("issue");

        assert!(matches!(
            manager.validate(&first).await,
            Err(AuthError::InvalidSession)
        ));
        assert_eq!(
            manager.validate(&second).await.expect("validate"),
            "admin@example.com"
        );
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn revoke_leaves_other_accounts_sessions_alone() {
        let (manager, store) = manager_with_store();
        let admin = manager.issue("admin@example.com").await.expect("issue");
        let other = manager.issue("other@example.com").await.expect("issue");

        manager.revoke(&admin).await.expect("revoke");
        assert_eq!(store.session_count(), 1);
        assert_eq!(
            manager.validate(&other).await.expect("validate"),
            "other@example.com"
        );
    }

    #[tokio::test]
    async fn login_issues_token_and_touches_last_login() {
        let (manager, store) = manager_with_store();
        store.add_account("admin@example.com", &derive_credential("hunter2"));

        let (token, email) = manager
            .login(" Admin@Example.COM ", "hunter2")
            .await
            .expect("login");
        assert_eq!(email, "admin@example.com");
        assert_eq!(
            manager.validate(&token).await.expect("validate"),
            "admin@example.com"
        );
        assert!(store.last_login("admin@example.com").is_some());
    }

    #[tokio::test]
    async fn login_rejects_wrong_password_and_unknown_account_alike() {
        let (manager, store) = manager_with_store();
        store.add_account("admin@example.com", &derive_credential("hunter2"));

        assert!(matches!(
            manager.login("admin@example.com", "hunter3").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            manager.login("nobody@example.com", "hunter2").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert_eq!(store.session_count(), 0);
    }
}
