//! Per-application committee roster and lifecycle state machine.
//!
//! `pending --(links dispatched)--> active --(completion policy)--> completed`
//! `pending|active --(explicit cancellation)--> cancelled` (terminal).
//!
//! Template-based and ad hoc committees are two construction paths feeding
//! this one type; there is no subtype hierarchy, so downstream behavior
//! never diverges by origin.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    validate_roster, ApplicationId, AuditNote, CommitteeId, CommitteeMember, CommitteePolicy,
    CommitteeStatus, Feedback, MemberStatus, PanelSeat, ReviewerId, ValidationError,
};
use super::template::CommitteeTemplate;
use super::voting::{compute_aggregate, is_complete, FeedbackAggregate, RecommendationTally};

/// Illegal roster or lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("committee {id} is {status} and can no longer be modified")]
    Closed { id: String, status: &'static str },
    #[error("reviewer {0} is already on the committee")]
    DuplicateMember(String),
    #[error("reviewer {0} is not on the committee")]
    MemberNotFound(String),
    #[error("reviewer {0} already has recorded feedback")]
    FeedbackAlreadyRecorded(String),
    #[error("reviewer {0} is no longer awaiting feedback")]
    MemberNotAwaiting(String),
    #[error("a completed committee cannot be cancelled")]
    CancelCompleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitteeInstance {
    pub id: CommitteeId,
    pub application_id: ApplicationId,
    pub members: Vec<CommitteeMember>,
    pub policy: CommitteePolicy,
    pub deadline: DateTime<Utc>,
    /// Cached aggregate; advisory and always re-derivable from feedback.
    pub aggregate: Option<FeedbackAggregate>,
    pub status: CommitteeStatus,
    pub created_by: String,
    pub audit_log: Vec<AuditNote>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CommitteeInstance {
    /// Build an instance from a template copy, optionally overriding policy.
    pub fn from_template(
        id: CommitteeId,
        application_id: ApplicationId,
        template: &CommitteeTemplate,
        policy_override: Option<CommitteePolicy>,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        if !template.active {
            return Err(ValidationError::InactiveTemplate(template.id.0.clone()));
        }
        let policy = policy_override.unwrap_or_else(|| template.policy.clone());
        Self::build(id, application_id, template.members.clone(), policy, created_by, now)
    }

    /// Build an instance from an ad hoc roster.
    pub fn from_roster(
        id: CommitteeId,
        application_id: ApplicationId,
        seats: Vec<PanelSeat>,
        policy: CommitteePolicy,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        Self::build(id, application_id, seats, policy, created_by, now)
    }

    fn build(
        id: CommitteeId,
        application_id: ApplicationId,
        seats: Vec<PanelSeat>,
        policy: CommitteePolicy,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        validate_roster(&seats, &policy)?;
        let deadline = now + Duration::days(policy.feedback_deadline_days);

        Ok(Self {
            id,
            application_id,
            members: seats.into_iter().map(CommitteeMember::from_seat).collect(),
            policy,
            deadline,
            aggregate: None,
            status: CommitteeStatus::Pending,
            created_by: created_by.to_string(),
            audit_log: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, CommitteeStatus::Pending | CommitteeStatus::Active)
    }

    pub fn member(&self, reviewer_id: &ReviewerId) -> Option<&CommitteeMember> {
        self.members
            .iter()
            .find(|member| member.reviewer.reviewer_id == *reviewer_id)
    }

    pub fn member_mut(&mut self, reviewer_id: &ReviewerId) -> Option<&mut CommitteeMember> {
        self.members
            .iter_mut()
            .find(|member| member.reviewer.reviewer_id == *reviewer_id)
    }

    pub fn submitted_count(&self) -> usize {
        self.members
            .iter()
            .filter(|member| member.status == MemberStatus::Submitted)
            .count()
    }

    pub fn push_audit(&mut self, actor: &str, note: impl Into<String>, now: DateTime<Utc>) {
        self.audit_log.push(AuditNote {
            at: now,
            actor: actor.to_string(),
            note: note.into(),
        });
        self.updated_at = now;
    }

    /// pending -> active, once link issuance has been attempted for every
    /// member. A no-op for any other state.
    pub fn activate(&mut self, now: DateTime<Utc>) {
        if self.status == CommitteeStatus::Pending {
            self.status = CommitteeStatus::Active;
            self.updated_at = now;
        }
    }

    /// Roster additions are legal only while the committee is open.
    pub fn add_member(&mut self, seat: PanelSeat, now: DateTime<Utc>) -> Result<(), StateError> {
        self.ensure_open()?;
        if self.member(&seat.reviewer.reviewer_id).is_some() {
            return Err(StateError::DuplicateMember(seat.reviewer.reviewer_id.0.clone()));
        }
        self.members.push(CommitteeMember::from_seat(seat));
        self.updated_at = now;
        Ok(())
    }

    /// Drop a roster entry. Deliberately does not reopen a completed
    /// instance even if remaining feedback now falls below the threshold;
    /// reopening requires an explicit recompute.
    pub fn remove_member(
        &mut self,
        reviewer_id: &ReviewerId,
        now: DateTime<Utc>,
    ) -> Result<CommitteeMember, StateError> {
        if self.status == CommitteeStatus::Cancelled {
            return Err(StateError::Closed {
                id: self.id.0.clone(),
                status: self.status.label(),
            });
        }
        let position = self
            .members
            .iter()
            .position(|member| member.reviewer.reviewer_id == *reviewer_id)
            .ok_or_else(|| StateError::MemberNotFound(reviewer_id.0.clone()))?;

        let removed = self.members.remove(position);
        self.updated_at = now;
        Ok(removed)
    }

    /// Terminal cancellation, reachable from any non-completed state.
    /// Returns false when the instance was already cancelled (no-op).
    pub fn cancel(
        &mut self,
        actor: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StateError> {
        match self.status {
            CommitteeStatus::Cancelled => Ok(false),
            CommitteeStatus::Completed => Err(StateError::CancelCompleted),
            CommitteeStatus::Pending | CommitteeStatus::Active => {
                self.status = CommitteeStatus::Cancelled;
                self.push_audit(actor, format!("committee cancelled: {reason}"), now);
                Ok(true)
            }
        }
    }

    /// Record an immutable assessment against a pending member. Late
    /// submissions against a completed instance are still recorded; only
    /// cancellation closes the door.
    pub fn record_feedback(
        &mut self,
        reviewer_id: &ReviewerId,
        feedback: Feedback,
        now: DateTime<Utc>,
    ) -> Result<(), StateError> {
        if self.status == CommitteeStatus::Cancelled {
            return Err(StateError::Closed {
                id: self.id.0.clone(),
                status: self.status.label(),
            });
        }
        let member = self
            .member_mut(reviewer_id)
            .ok_or_else(|| StateError::MemberNotFound(reviewer_id.0.clone()))?;
        if member.feedback.is_some() {
            return Err(StateError::FeedbackAlreadyRecorded(reviewer_id.0.clone()));
        }

        member.feedback = Some(feedback);
        member.status = MemberStatus::Submitted;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_member_declined(
        &mut self,
        reviewer_id: &ReviewerId,
        now: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let member = self
            .member_mut(reviewer_id)
            .ok_or_else(|| StateError::MemberNotFound(reviewer_id.0.clone()))?;
        member.status = MemberStatus::Declined;
        self.updated_at = now;
        Ok(())
    }

    /// Refresh the cached aggregate without touching lifecycle state. Used
    /// by the read path to self-heal a cache written by an older path.
    pub fn refresh_aggregate(&mut self, now: DateTime<Utc>) {
        self.aggregate = Some(compute_aggregate(&self.policy, &self.members, now));
    }

    /// Recompute the aggregate and apply the completion test. Returns true
    /// when this call transitioned the instance to completed.
    pub fn recompute(&mut self, now: DateTime<Utc>) -> bool {
        self.refresh_aggregate(now);
        self.updated_at = now;

        if self.status == CommitteeStatus::Active && is_complete(&self.policy, &self.members) {
            self.status = CommitteeStatus::Completed;
            self.completed_at = Some(now);
            true
        } else {
            false
        }
    }

    pub fn status_view(&self) -> CommitteeView {
        CommitteeView {
            committee_id: self.id.clone(),
            application_id: self.application_id.clone(),
            status: self.status.label(),
            deadline: self.deadline,
            voting_mechanism: self.policy.voting_mechanism.label(),
            min_feedback_required: self.policy.min_feedback_required,
            require_all_feedback: self.policy.require_all_feedback,
            members: self.members.iter().map(MemberView::from_member).collect(),
            aggregate: self.aggregate.as_ref().map(AggregateView::from_aggregate),
        }
    }
}

/// Sanitized representation for staff-facing API responses. Never carries
/// token secrets or raw feedback bodies.
#[derive(Debug, Clone, Serialize)]
pub struct CommitteeView {
    pub committee_id: CommitteeId,
    pub application_id: ApplicationId,
    pub status: &'static str,
    pub deadline: DateTime<Utc>,
    pub voting_mechanism: &'static str,
    pub min_feedback_required: u32,
    pub require_all_feedback: bool,
    pub members: Vec<MemberView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberView {
    pub reviewer_id: ReviewerId,
    pub name: String,
    pub email: String,
    pub role: String,
    pub is_primary: bool,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<&'static str>,
}

impl MemberView {
    fn from_member(member: &CommitteeMember) -> Self {
        Self {
            reviewer_id: member.reviewer.reviewer_id.clone(),
            name: member.reviewer.name.clone(),
            email: member.reviewer.email.clone(),
            role: member.reviewer.role.clone(),
            is_primary: member.is_primary,
            status: member.status.label(),
            submitted_at: member.feedback.as_ref().map(|feedback| feedback.submitted_at),
            overall_score: member.feedback.as_ref().map(|feedback| feedback.overall_score),
            recommendation: member
                .feedback
                .as_ref()
                .map(|feedback| feedback.recommendation.label()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_score: Option<f64>,
    pub recommendation_counts: RecommendationTally,
    pub final_recommendation: &'static str,
    pub computed_at: DateTime<Utc>,
}

impl AggregateView {
    fn from_aggregate(aggregate: &FeedbackAggregate) -> Self {
        Self {
            average_score: aggregate.average_score,
            recommendation_counts: aggregate.recommendation_counts,
            final_recommendation: aggregate.final_recommendation.label(),
            computed_at: aggregate.computed_at,
        }
    }
}

impl CommitteeInstance {
    fn ensure_open(&self) -> Result<(), StateError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(StateError::Closed {
                id: self.id.0.clone(),
                status: self.status.label(),
            })
        }
    }
}
