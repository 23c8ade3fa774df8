use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{
    ApplicationId, CommitteeId, CommitteePolicy, CommitteeStatus, FeedbackSubmission,
    MemberStatus, PanelSeat, ReviewerId, ReviewerProfile, TemplateId, ValidationError,
};
use super::instance::{CommitteeInstance, StateError};
use super::notify::{AlertType, NotificationRouter, Notifier, Recipient};
use super::repository::{CommitteeStore, RepositoryError, StaffDirectory};
use super::token::{mint_token, verify_gate, FeedbackToken, TokenError};

/// Tunables for link dispatch and reminders, sourced from configuration.
#[derive(Debug, Clone)]
pub struct CommitteeSettings {
    /// Base URL embedded in feedback links.
    pub feedback_base_url: String,
    /// Shared secret expected from the external reminder scheduler.
    pub scheduler_secret: String,
    /// Reminder sweep looks at active committees due within this window.
    pub reminder_lookahead_days: i64,
    /// Hard cap on link sends per reviewer per rolling day.
    pub resend_daily_cap: u32,
    /// Minimum gap between link sends unless a resend is forced.
    pub resend_cooldown_hours: i64,
}

impl Default for CommitteeSettings {
    fn default() -> Self {
        Self {
            feedback_base_url: "http://localhost:3000".to_string(),
            scheduler_secret: "local-scheduler-secret".to_string(),
            reminder_lookahead_days: 2,
            resend_daily_cap: 3,
            resend_cooldown_hours: 4,
        }
    }
}

static COMMITTEE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_committee_id() -> CommitteeId {
    let id = COMMITTEE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    CommitteeId(format!("cmt-{id:06}"))
}

/// Error raised by the committee service.
#[derive(Debug, thiserror::Error)]
pub enum CommitteeServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("resend limit reached for reviewer {reviewer_id} (max {cap} per day)")]
    ResendLimitReached { reviewer_id: String, cap: u32 },
    #[error("a feedback link was sent to this reviewer recently; retry later or force the resend")]
    ResendCoolingDown,
}

/// Context returned to an unauthenticated reviewer after a successful
/// verify, scoped strictly to their own seat.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackFormContext {
    pub committee_id: CommitteeId,
    pub application_id: ApplicationId,
    pub reviewer: ReviewerProfile,
    pub deadline: DateTime<Utc>,
}

/// Outcome of a scheduler-triggered reminder sweep.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReminderSweepReport {
    pub committees_scanned: usize,
    pub reminders_sent: usize,
}

/// Service coordinating assignment, token issuance, notification, feedback
/// collection, aggregation, and reminders.
pub struct CommitteeService<S, D, N> {
    store: Arc<S>,
    router: NotificationRouter<D, N>,
    settings: CommitteeSettings,
}

impl<S, D, N> CommitteeService<S, D, N>
where
    S: CommitteeStore + 'static,
    D: StaffDirectory + 'static,
    N: Notifier + 'static,
{
    pub fn new(
        store: Arc<S>,
        router: NotificationRouter<D, N>,
        settings: CommitteeSettings,
    ) -> Self {
        Self {
            store,
            router,
            settings,
        }
    }

    pub fn settings(&self) -> &CommitteeSettings {
        &self.settings
    }

    /// Assign a committee built from a template copy. Rejects when an
    /// active or pending committee already exists for the application.
    pub fn assign_from_template(
        &self,
        application_id: ApplicationId,
        template_id: &TemplateId,
        policy_override: Option<CommitteePolicy>,
        assigned_by: &str,
    ) -> Result<CommitteeInstance, CommitteeServiceError> {
        let template = self
            .store
            .fetch_template(template_id)?
            .ok_or(RepositoryError::NotFound)?;

        let now = Utc::now();
        let mut instance = CommitteeInstance::from_template(
            next_committee_id(),
            application_id,
            &template,
            policy_override,
            assigned_by,
            now,
        )?;
        instance.push_audit(
            assigned_by,
            format!("assigned from template {}", template.id.0),
            now,
        );

        let stored = self.store.insert_instance(instance)?;
        self.dispatch_assignment(stored, now)
    }

    /// Assign an ad hoc committee from a supplied roster.
    pub fn assign_custom(
        &self,
        application_id: ApplicationId,
        seats: Vec<PanelSeat>,
        policy: CommitteePolicy,
        assigned_by: &str,
    ) -> Result<CommitteeInstance, CommitteeServiceError> {
        let now = Utc::now();
        let mut instance = CommitteeInstance::from_roster(
            next_committee_id(),
            application_id,
            seats,
            policy,
            assigned_by,
            now,
        )?;
        instance.push_audit(assigned_by, "assigned ad hoc committee", now);

        let stored = self.store.insert_instance(instance)?;
        self.dispatch_assignment(stored, now)
    }

    /// Issue one token per pending member and email each link, then
    /// transition pending -> active. A failed email leaves the member
    /// pending with a valid, usable token rather than rolling back the
    /// whole committee.
    fn dispatch_assignment(
        &self,
        mut instance: CommitteeInstance,
        now: DateTime<Utc>,
    ) -> Result<CommitteeInstance, CommitteeServiceError> {
        let pending: Vec<ReviewerId> = instance
            .members
            .iter()
            .filter(|member| member.status == MemberStatus::Pending)
            .map(|member| member.reviewer.reviewer_id.clone())
            .collect();

        for reviewer_id in pending {
            self.issue_and_email_link(&mut instance, &reviewer_id, now)?;
        }

        instance.activate(now);
        self.store.update_instance(instance.clone())?;

        let mut details = BTreeMap::new();
        details.insert("committee_id".to_string(), instance.id.0.clone());
        details.insert(
            "application_id".to_string(),
            instance.application_id.0.clone(),
        );
        self.router
            .broadcast(AlertType::CommitteeAssigned, Some(&instance), details);

        info!(
            committee_id = %instance.id.0,
            application_id = %instance.application_id.0,
            members = instance.members.len(),
            "committee assigned"
        );
        Ok(instance)
    }

    fn issue_and_email_link(
        &self,
        instance: &mut CommitteeInstance,
        reviewer_id: &ReviewerId,
        now: DateTime<Utc>,
    ) -> Result<FeedbackToken, CommitteeServiceError> {
        let token = mint_token(
            instance.id.clone(),
            reviewer_id.clone(),
            instance.policy.feedback_deadline_days,
            now,
        );
        let token = self.store.insert_token(token)?;

        let member = instance
            .member_mut(reviewer_id)
            .ok_or_else(|| StateError::MemberNotFound(reviewer_id.0.clone()))?;
        member.link_sends.push(now);
        let recipient = Recipient {
            name: member.reviewer.name.clone(),
            email: member.reviewer.email.clone(),
        };

        let mut details = BTreeMap::new();
        details.insert(
            "feedback_url".to_string(),
            token.feedback_url(&self.settings.feedback_base_url),
        );
        details.insert(
            "application_id".to_string(),
            instance.application_id.0.clone(),
        );
        details.insert("deadline".to_string(), token.expires_at.to_rfc3339());

        self.router
            .send_direct(recipient, AlertType::FeedbackRequest.label(), details);

        Ok(token)
    }

    /// Add a reviewer to an open committee and issue them a fresh link.
    pub fn add_member(
        &self,
        committee_id: &CommitteeId,
        seat: PanelSeat,
        actor: &str,
    ) -> Result<CommitteeInstance, CommitteeServiceError> {
        let mut instance = self.fetch_required(committee_id)?;
        let now = Utc::now();
        let reviewer_id = seat.reviewer.reviewer_id.clone();

        instance.add_member(seat, now)?;
        instance.push_audit(actor, format!("added reviewer {}", reviewer_id.0), now);
        self.issue_and_email_link(&mut instance, &reviewer_id, now)?;
        self.store.update_instance(instance.clone())?;
        Ok(instance)
    }

    /// Drop a reviewer and invalidate any outstanding token they hold.
    pub fn remove_member(
        &self,
        committee_id: &CommitteeId,
        reviewer_id: &ReviewerId,
        actor: &str,
    ) -> Result<CommitteeInstance, CommitteeServiceError> {
        let mut instance = self.fetch_required(committee_id)?;
        let now = Utc::now();

        instance.remove_member(reviewer_id, now)?;
        instance.push_audit(actor, format!("removed reviewer {}", reviewer_id.0), now);

        if let Some(token) = self.store.outstanding_token(committee_id, reviewer_id)? {
            self.store.expire_token(&token.id, now)?;
        }

        self.store.update_instance(instance.clone())?;
        Ok(instance)
    }

    /// Cancel a committee, force-expiring every outstanding token so links
    /// die immediately. Idempotent: cancelling twice is a no-op.
    pub fn cancel(
        &self,
        committee_id: &CommitteeId,
        actor: &str,
        reason: &str,
    ) -> Result<CommitteeInstance, CommitteeServiceError> {
        let mut instance = self.fetch_required(committee_id)?;
        let now = Utc::now();

        if !instance.cancel(actor, reason, now)? {
            return Ok(instance);
        }

        for member in instance.members.clone() {
            if let Some(token) = self
                .store
                .outstanding_token(committee_id, &member.reviewer.reviewer_id)?
            {
                self.store.expire_token(&token.id, now)?;
            }
        }

        self.store.update_instance(instance.clone())?;

        let mut details = BTreeMap::new();
        details.insert("committee_id".to_string(), instance.id.0.clone());
        details.insert("reason".to_string(), reason.to_string());
        self.router
            .broadcast(AlertType::CommitteeCancelled, Some(&instance), details);

        Ok(instance)
    }

    /// Latest non-cancelled committee for an application, with the cached
    /// aggregate recomputed on read. Feedback may have been recorded
    /// through a path that skipped the cache update; the read self-heals.
    pub fn get_by_application(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Option<CommitteeInstance>, CommitteeServiceError> {
        let Some(mut instance) = self.store.instance_for_application(application_id)? else {
            return Ok(None);
        };

        instance.refresh_aggregate(Utc::now());
        self.store.update_instance(instance.clone())?;
        Ok(Some(instance))
    }

    /// Verify gate for rendering the feedback form. Successful verification
    /// increments the access counter (engagement auditing only).
    pub fn verify_token(
        &self,
        secret: &str,
    ) -> Result<FeedbackFormContext, CommitteeServiceError> {
        let now = Utc::now();
        let token = self
            .store
            .fetch_token_by_secret(secret)?
            .ok_or(TokenError::NotFound)?;
        verify_gate(&token, now)?;

        let instance = self
            .store
            .fetch_instance(&token.committee_id)?
            .ok_or(RepositoryError::NotFound)?;
        let member = instance
            .member(&token.reviewer_id)
            .ok_or_else(|| StateError::MemberNotFound(token.reviewer_id.0.clone()))?;

        self.store.record_token_access(&token.id, now)?;

        Ok(FeedbackFormContext {
            committee_id: instance.id.clone(),
            application_id: instance.application_id.clone(),
            reviewer: member.reviewer.clone(),
            deadline: token.expires_at,
        })
    }

    /// Record one assessment against the token's seat.
    ///
    /// Safe to re-enter with the same token exactly once: the conditional
    /// consume guarantees a second call fails loudly with `AlreadyUsed`
    /// instead of being silently ignored. Validation runs before the token
    /// is consumed so a rejected payload never burns the link.
    pub fn submit_feedback(
        &self,
        secret: &str,
        submission: FeedbackSubmission,
    ) -> Result<CommitteeInstance, CommitteeServiceError> {
        let now = Utc::now();
        let token = self
            .store
            .fetch_token_by_secret(secret)?
            .ok_or(TokenError::NotFound)?;
        verify_gate(&token, now)?;

        let mut instance = self
            .store
            .fetch_instance(&token.committee_id)?
            .ok_or(RepositoryError::NotFound)?;
        let member = instance
            .member(&token.reviewer_id)
            .ok_or_else(|| StateError::MemberNotFound(token.reviewer_id.0.clone()))?;

        let feedback = submission.into_feedback(&member.reviewer, now)?;

        // Single-writer serialization per token: exactly one concurrent
        // caller wins this conditional write.
        let token = match self.store.consume_token(&token.id, now) {
            Ok(token) => token,
            Err(RepositoryError::Conflict) => return Err(TokenError::AlreadyUsed.into()),
            Err(other) => return Err(other.into()),
        };

        instance.record_feedback(&token.reviewer_id, feedback, now)?;
        let completed = instance.recompute(now);
        self.store.update_instance(instance.clone())?;

        let mut details = BTreeMap::new();
        details.insert("committee_id".to_string(), instance.id.0.clone());
        details.insert(
            "application_id".to_string(),
            instance.application_id.0.clone(),
        );
        details.insert("reviewer_id".to_string(), token.reviewer_id.0.clone());
        self.router
            .broadcast(AlertType::FeedbackReceived, Some(&instance), details.clone());

        if completed {
            if let Some(aggregate) = &instance.aggregate {
                details.insert(
                    "final_recommendation".to_string(),
                    aggregate.final_recommendation.label().to_string(),
                );
            }
            self.router
                .broadcast(AlertType::CommitteeCompleted, Some(&instance), details);
            info!(committee_id = %instance.id.0, "committee completed");
        }

        Ok(instance)
    }

    /// Token-authenticated decline: consumes the token and marks the seat
    /// declined so reminders stop.
    pub fn decline_feedback(
        &self,
        secret: &str,
    ) -> Result<CommitteeInstance, CommitteeServiceError> {
        let now = Utc::now();
        let token = self
            .store
            .fetch_token_by_secret(secret)?
            .ok_or(TokenError::NotFound)?;
        verify_gate(&token, now)?;

        let mut instance = self
            .store
            .fetch_instance(&token.committee_id)?
            .ok_or(RepositoryError::NotFound)?;

        let token = match self.store.consume_token(&token.id, now) {
            Ok(token) => token,
            Err(RepositoryError::Conflict) => return Err(TokenError::AlreadyUsed.into()),
            Err(other) => return Err(other.into()),
        };

        instance.mark_member_declined(&token.reviewer_id, now)?;
        instance.refresh_aggregate(now);
        self.store.update_instance(instance.clone())?;
        Ok(instance)
    }

    /// Force-expire a reviewer's current link and issue a fresh one.
    ///
    /// `force` bypasses the cool-down a normal resend honors, but never the
    /// bounded per-day cap; unlimited resends are deliberately not offered.
    pub fn resend_link(
        &self,
        committee_id: &CommitteeId,
        reviewer_id: &ReviewerId,
        force: bool,
        actor: &str,
    ) -> Result<FeedbackToken, CommitteeServiceError> {
        let mut instance = self.fetch_required(committee_id)?;
        if !instance.is_open() {
            return Err(StateError::Closed {
                id: instance.id.0.clone(),
                status: instance.status.label(),
            }
            .into());
        }

        let now = Utc::now();
        let member = instance
            .member(reviewer_id)
            .ok_or_else(|| StateError::MemberNotFound(reviewer_id.0.clone()))?;
        if !matches!(member.status, MemberStatus::Pending | MemberStatus::Expired) {
            return Err(StateError::MemberNotAwaiting(reviewer_id.0.clone()).into());
        }

        let sends_today = member
            .link_sends
            .iter()
            .filter(|sent| now.signed_duration_since(**sent) < Duration::hours(24))
            .count();
        if sends_today >= self.settings.resend_daily_cap as usize {
            return Err(CommitteeServiceError::ResendLimitReached {
                reviewer_id: reviewer_id.0.clone(),
                cap: self.settings.resend_daily_cap,
            });
        }

        if !force {
            if let Some(last) = member.link_sends.last() {
                if now.signed_duration_since(*last)
                    < Duration::hours(self.settings.resend_cooldown_hours)
                {
                    return Err(CommitteeServiceError::ResendCoolingDown);
                }
            }
        }

        if let Some(previous) = self.store.outstanding_token(committee_id, reviewer_id)? {
            self.store.expire_token(&previous.id, now)?;
        }

        let token = self.issue_and_email_link(&mut instance, reviewer_id, now)?;

        // A seat aged to expired by the sweep comes back to life with a
        // fresh link.
        if let Some(member) = instance.member_mut(reviewer_id) {
            if member.status == MemberStatus::Expired {
                member.status = MemberStatus::Pending;
            }
        }

        instance.push_audit(actor, format!("link reissued for {}", reviewer_id.0), now);
        self.store.update_instance(instance.clone())?;
        Ok(token)
    }

    /// Re-email the *same* token to every member still pending with an
    /// unexpired link; a new token would invalidate a link the reviewer may
    /// already have open. Members whose token has lapsed are aged to
    /// expired. Returns the number of reminders sent.
    ///
    /// Idempotent per run: pending members are re-queried at invocation
    /// time, and the cool-down suppresses an immediate re-run.
    pub fn send_reminders(
        &self,
        committee_id: &CommitteeId,
        triggered_by: &str,
    ) -> Result<usize, CommitteeServiceError> {
        let mut instance = self.fetch_required(committee_id)?;
        if instance.status != CommitteeStatus::Active {
            return Ok(0);
        }

        let now = Utc::now();
        let pending: Vec<ReviewerId> = instance
            .members
            .iter()
            .filter(|member| member.status == MemberStatus::Pending)
            .map(|member| member.reviewer.reviewer_id.clone())
            .collect();

        let mut sent = 0;
        let mut changed = false;
        for reviewer_id in pending {
            let Some(token) = self.store.outstanding_token(committee_id, &reviewer_id)? else {
                continue;
            };

            if token.is_expired(now) {
                if let Some(member) = instance.member_mut(&reviewer_id) {
                    member.status = MemberStatus::Expired;
                    changed = true;
                }
                continue;
            }

            let member = instance
                .member(&reviewer_id)
                .ok_or_else(|| StateError::MemberNotFound(reviewer_id.0.clone()))?;
            if let Some(last) = member.link_sends.last() {
                if now.signed_duration_since(*last)
                    < Duration::hours(self.settings.resend_cooldown_hours)
                {
                    continue;
                }
            }

            let mut details = BTreeMap::new();
            details.insert(
                "feedback_url".to_string(),
                token.feedback_url(&self.settings.feedback_base_url),
            );
            details.insert("deadline".to_string(), token.expires_at.to_rfc3339());
            details.insert(
                "application_id".to_string(),
                instance.application_id.0.clone(),
            );

            let delivered = self.router.send_direct(
                Recipient {
                    name: member.reviewer.name.clone(),
                    email: member.reviewer.email.clone(),
                },
                AlertType::FeedbackReminder.label(),
                details,
            );
            if delivered {
                sent += 1;
            }
            if let Some(member) = instance.member_mut(&reviewer_id) {
                member.link_sends.push(now);
                changed = true;
            }
        }

        if changed {
            instance.push_audit(
                triggered_by,
                format!("reminders sent to {sent} reviewer(s)"),
                now,
            );
            self.store.update_instance(instance)?;
        }

        Ok(sent)
    }

    /// Scheduler entry point: remind every active committee whose deadline
    /// falls within the lookahead window and is not yet past due.
    pub fn run_reminder_sweep(
        &self,
        triggered_by: &str,
    ) -> Result<ReminderSweepReport, CommitteeServiceError> {
        let now = Utc::now();
        let until = now + Duration::days(self.settings.reminder_lookahead_days);
        let due = self.store.active_due_within(now, until)?;

        let mut report = ReminderSweepReport {
            committees_scanned: due.len(),
            reminders_sent: 0,
        };

        for instance in due {
            match self.send_reminders(&instance.id, triggered_by) {
                Ok(sent) => report.reminders_sent += sent,
                Err(error) => {
                    warn!(committee_id = %instance.id.0, %error, "reminder run failed");
                }
            }
        }

        info!(
            scanned = report.committees_scanned,
            sent = report.reminders_sent,
            "reminder sweep finished"
        );
        Ok(report)
    }

    fn fetch_required(
        &self,
        committee_id: &CommitteeId,
    ) -> Result<CommitteeInstance, CommitteeServiceError> {
        let instance = self
            .store
            .fetch_instance(committee_id)?
            .ok_or(RepositoryError::NotFound)?;
        Ok(instance)
    }
}
