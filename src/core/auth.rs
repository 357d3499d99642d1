//! Password digests and opaque token sessions.
//!
//! Tokens are random, server-side state; there is nothing to decode
//! client-side. Access tokens are short-lived, refresh tokens rotate
//! the whole pair.

use super::model::Session;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Default access token lifetime in minutes.
pub const ACCESS_TOKEN_MINUTES: i64 = 60;
/// Default refresh token lifetime in days.
pub const REFRESH_TOKEN_DAYS: i64 = 7;

/// Computes the salted digest stored for a password.
#[must_use]
pub fn password_digest(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{salt}${:x}", hasher.finalize())
}

/// Creates a fresh digest with a random salt.
#[must_use]
pub fn new_password_digest(password: &str) -> String {
    password_digest(password, &Uuid::new_v4().simple().to_string())
}

/// Constant-shape verification against a stored `salt$hex` digest.
#[must_use]
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, _)) = stored.split_once('$') else {
        return false;
    };
    password_digest(password, salt) == stored
}

fn random_token() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Issues a new session for `user_id` with the given lifetimes.
#[must_use]
pub fn issue_session(
    user_id: Uuid,
    now: DateTime<Utc>,
    access_minutes: i64,
    refresh_days: i64,
) -> Session {
    Session {
        access_token: random_token(),
        refresh_token: random_token(),
        user: user_id,
        access_expires_at: now + Duration::minutes(access_minutes),
        refresh_expires_at: now + Duration::days(refresh_days),
    }
}

/// True when the session's access token is still usable.
#[must_use]
pub fn access_valid(session: &Session, now: DateTime<Utc>) -> bool {
    session.access_expires_at > now
}

/// True when the session's refresh token is still usable.
#[must_use]
pub fn refresh_valid(session: &Session, now: DateTime<Utc>) -> bool {
    session.refresh_expires_at > now
}
