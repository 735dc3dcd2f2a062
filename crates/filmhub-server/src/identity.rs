//! Identity resolution for room sockets.
//!
//! Sessions are issued elsewhere; the hub only sees a short-lived signed token
//! in the socket URL (`?token=`). A socket without a token is anonymous.

use base64::Engine;
use filmhub_db::DbPool;
use filmhub_types::Identity;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// How long a WebSocket session token stays valid. Tokens are meant to be
/// fetched right before connecting.
pub const WS_TOKEN_TTL_SECS: u64 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not valid base64url")]
    Encoding,
    #[error("token is malformed")]
    Malformed,
    #[error("token signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid session token: {0}")]
    Token(#[from] TokenError),
    #[error("token names unknown user {0}")]
    UnknownUser(String),
    #[error("identity lookup failed: {0}")]
    Storage(String),
}

/// Turns the connection handshake into an [`Identity`].
///
/// Implementations may block; callers run them on the blocking pool.
pub trait IdentityResolver: Send + Sync + 'static {
    fn resolve(&self, token: Option<&str>) -> Result<Identity, IdentityError>;
}

/// Derives the HMAC key for session tokens from the configured secret.
pub fn derive_token_secret(configured: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"filmhub-ws-token-v1:");
    hasher.update(configured);
    hasher.finalize().into()
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn sign(payload: &str, secret: &[u8; 32]) -> Hmac<Sha256> {
    let mut mac =
        <Hmac<Sha256> as Mac>::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    mac
}

/// Issues a token binding `username` to the next [`WS_TOKEN_TTL_SECS`].
///
/// Format: `base64url(username|expires_unix_secs|hex(hmac_sha256))`.
pub fn generate_ws_token(username: &str, secret: &[u8; 32]) -> String {
    issue_token(username, unix_now() + WS_TOKEN_TTL_SECS, secret)
}

fn issue_token(username: &str, expires: u64, secret: &[u8; 32]) -> String {
    let payload = format!("{username}|{expires}");
    let signature = sign(&payload, secret).finalize().into_bytes();
    let token = format!("{payload}|{}", hex::encode(signature));
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(token.as_bytes())
}

/// Verifies a token and returns the username it was issued for.
pub fn verify_ws_token(token: &str, secret: &[u8; 32]) -> Result<String, TokenError> {
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .map_err(|_| TokenError::Encoding)?;
    let decoded = String::from_utf8(decoded).map_err(|_| TokenError::Encoding)?;

    // Split from the right: usernames may contain '|'.
    let mut parts = decoded.rsplitn(3, '|');
    let (Some(sig_hex), Some(expires), Some(username)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed);
    };

    let provided = hex::decode(sig_hex).map_err(|_| TokenError::Malformed)?;
    sign(&format!("{username}|{expires}"), secret)
        .verify_slice(&provided)
        .map_err(|_| TokenError::BadSignature)?;

    let expires: u64 = expires.parse().map_err(|_| TokenError::Malformed)?;
    if unix_now() > expires {
        return Err(TokenError::Expired);
    }

    Ok(username.to_string())
}

/// Resolves identities from signed tokens and confirms the user still exists.
pub struct TokenIdentityResolver {
    secret: [u8; 32],
    pool: DbPool,
}

impl TokenIdentityResolver {
    pub fn new(secret: [u8; 32], pool: DbPool) -> Self {
        Self { secret, pool }
    }
}

impl IdentityResolver for TokenIdentityResolver {
    fn resolve(&self, token: Option<&str>) -> Result<Identity, IdentityError> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Ok(Identity::Anonymous);
        };

        let username = verify_ws_token(token, &self.secret)?;
        let conn = self
            .pool
            .get()
            .map_err(|e| IdentityError::Storage(e.to_string()))?;
        let exists = filmhub_rooms::user_exists(&conn, &username)
            .map_err(|e| IdentityError::Storage(e.to_string()))?;

        if exists {
            Ok(Identity::Authenticated(username))
        } else {
            Err(IdentityError::UnknownUser(username))
        }
    }
}
