use anyhow::{anyhow, Context as _, Result};
use argon2::{
    password_hash::{
        rand_core::OsRng as SaltRng, PasswordHash, PasswordHasher as _, PasswordVerifier as _,
        SaltString,
    },
    Argon2,
};
use rand::RngCore as _;
use twinmail_storage::Store;

/// password verification and bearer token management
///
/// password hashes are opaque argon2 strings; verification runs on the
/// blocking thread pool so an expensive hash never stalls the connection
/// handling path. Tokens are random 16 byte values handed back raw exactly
/// once and stored unhashed, indexed token to username.
#[derive(Clone)]
pub struct Auth {
    store: Store,
}

/// outcome of a TOKEN exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Login {
    /// the password verified; a fresh token was minted and stored
    Token(String),
    /// no such user
    UnknownUser,
    /// the user exists but the password did not verify
    BadPassword,
}

impl Auth {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// verify the password and mint a token on success
    ///
    /// several live tokens per user are fine; each login adds one.
    pub async fn login(&self, username: &str, password: &str) -> Result<Login> {
        let hash = match self.store.password_hash(username).await {
            Some(hash) => hash,
            None => return Ok(Login::UnknownUser),
        };

        let password = password.to_owned();
        let verified = tokio::task::spawn_blocking(move || verify(&hash, &password))
            .await
            .context("password verification task failed")??;
        if !verified {
            return Ok(Login::BadPassword);
        }

        let token = generate_token();
        self.store.insert_token(&token, username).await?;
        Ok(Login::Token(token))
    }

    /// the username owning the token, if the token is live
    pub async fn resolve(&self, token: &str) -> Option<String> {
        self.store.resolve_token(token).await
    }

    /// drop the token; revoking an unknown token is not an error
    pub async fn revoke(&self, token: &str) -> Result<bool> {
        self.store.revoke_token(token).await
    }
}

fn verify(hash: &str, password: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|error| anyhow!("stored password hash is invalid: {}", error))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// hash a password for storage; used by the administrative tooling when
/// registering users
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut SaltRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| anyhow!("cannot hash password: {}", error))
}

fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_alice() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().expect("temporary directory");
        let store = Store::open(dir.path().join("store.json"))
            .await
            .expect("open store");
        let hash = hash_password("secret1").expect("hash password");
        store.create_user("alice", &hash).await.expect("create user");
        (dir, store)
    }

    #[tokio::test]
    async fn login_mints_a_resolvable_token() {
        let (_dir, store) = store_with_alice().await;
        let auth = Auth::new(store);

        let token = match auth.login("alice", "secret1").await.expect("login") {
            Login::Token(token) => token,
            other => panic!("expected a token, got {:?}", other),
        };

        assert_eq!(auth.resolve(&token).await.as_deref(), Some("alice"));

        assert!(auth.revoke(&token).await.expect("revoke"));
        assert_eq!(auth.resolve(&token).await, None);
        // second revocation finds nothing but is still fine
        assert!(!auth.revoke(&token).await.expect("revoke again"));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_are_distinct() {
        let (_dir, store) = store_with_alice().await;
        let auth = Auth::new(store);

        assert_eq!(
            auth.login("alice", "wrong").await.expect("login"),
            Login::BadPassword
        );
        assert_eq!(
            auth.login("nobody", "secret1").await.expect("login"),
            Login::UnknownUser
        );
    }

    #[tokio::test]
    async fn every_login_mints_a_distinct_token() {
        let (_dir, store) = store_with_alice().await;
        let auth = Auth::new(store);

        let first = auth.login("alice", "secret1").await.expect("login");
        let second = auth.login("alice", "secret1").await.expect("login");
        assert_ne!(first, second);
    }
}
