use chrono::{Duration, Utc};

use crate::workflows::committee::domain::{CommitteeId, ReviewerId};
use crate::workflows::committee::token::{mint_token, verify_gate, TokenError};

fn mint() -> crate::workflows::committee::token::FeedbackToken {
    mint_token(
        CommitteeId("cmt-test".to_string()),
        ReviewerId("rev-test".to_string()),
        7,
        Utc::now(),
    )
}

#[test]
fn secrets_are_long_and_unique() {
    let first = mint();
    let second = mint();

    // 32 random bytes, hex-encoded.
    assert_eq!(first.secret.len(), 64);
    assert!(first.secret.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(first.secret, second.secret);
    assert_ne!(first.id, second.id);
}

#[test]
fn expiry_follows_policy_deadline() {
    let now = Utc::now();
    let token = mint_token(
        CommitteeId("cmt-test".to_string()),
        ReviewerId("rev-test".to_string()),
        3,
        now,
    );
    assert_eq!(token.expires_at, now + Duration::days(3));

    // Non-positive deadlines fall back to the 7 day default.
    let fallback = mint_token(
        CommitteeId("cmt-test".to_string()),
        ReviewerId("rev-test".to_string()),
        0,
        now,
    );
    assert_eq!(fallback.expires_at, now + Duration::days(7));
}

#[test]
fn verify_gate_passes_fresh_tokens() {
    let token = mint();
    assert_eq!(verify_gate(&token, Utc::now()), Ok(()));
}

#[test]
fn verify_gate_rejects_expired_tokens() {
    let mut token = mint();
    token.expires_at = Utc::now() - Duration::hours(1);

    assert_eq!(verify_gate(&token, Utc::now()), Err(TokenError::Expired));
}

#[test]
fn used_wins_over_expired_in_gate_order() {
    let mut token = mint();
    token.is_used = true;
    token.expires_at = Utc::now() - Duration::hours(1);

    assert_eq!(verify_gate(&token, Utc::now()), Err(TokenError::AlreadyUsed));
}

#[test]
fn feedback_url_embeds_secret() {
    let token = mint();

    let url = token.feedback_url("https://hire.example.com/");
    assert_eq!(
        url,
        format!("https://hire.example.com/feedback/{}", token.secret)
    );
}
