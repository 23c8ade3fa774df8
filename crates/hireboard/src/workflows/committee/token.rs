//! Single-use, time-limited feedback tokens.
//!
//! A token is the sole credential letting a named reviewer submit exactly
//! one assessment without logging in. Secrets are 32 random bytes from the
//! OS CSPRNG, hex-encoded, so a link carries 256 bits of entropy.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::domain::{CommitteeId, ReviewerId, TokenId, DEFAULT_FEEDBACK_DEADLINE_DAYS};

/// Failure modes of the verify gate, surfaced verbatim to the reviewer so
/// the form can say exactly why a link stopped working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("this feedback link is not recognized")]
    NotFound,
    #[error("this feedback link has expired")]
    Expired,
    #[error("this feedback link was already used")]
    AlreadyUsed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackToken {
    pub id: TokenId,
    /// Opaque unguessable credential embedded in the feedback URL.
    pub secret: String,
    pub committee_id: CommitteeId,
    pub reviewer_id: ReviewerId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub access_count: u32,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

static TOKEN_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_token_id() -> TokenId {
    let id = TOKEN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    TokenId(format!("tok-{id:06}"))
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Mint a fresh token for one committee seat.
pub fn mint_token(
    committee_id: CommitteeId,
    reviewer_id: ReviewerId,
    deadline_days: i64,
    now: DateTime<Utc>,
) -> FeedbackToken {
    let deadline_days = if deadline_days > 0 {
        deadline_days
    } else {
        DEFAULT_FEEDBACK_DEADLINE_DAYS
    };

    FeedbackToken {
        id: next_token_id(),
        secret: generate_secret(),
        committee_id,
        reviewer_id,
        issued_at: now,
        expires_at: now + Duration::days(deadline_days),
        is_used: false,
        used_at: None,
        access_count: 0,
        last_accessed_at: None,
    }
}

impl FeedbackToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Absolute URL a reviewer opens to reach the feedback form.
    pub fn feedback_url(&self, base_url: &str) -> String {
        format!("{}/feedback/{}", base_url.trim_end_matches('/'), self.secret)
    }
}

/// Hard gate applied before any submission form is served or accepted.
///
/// Read-only: access accounting is recorded separately by the caller so
/// this stays safe under concurrent verification.
pub fn verify_gate(token: &FeedbackToken, now: DateTime<Utc>) -> Result<(), TokenError> {
    if token.is_used {
        return Err(TokenError::AlreadyUsed);
    }
    if token.is_expired(now) {
        return Err(TokenError::Expired);
    }
    Ok(())
}
