use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::domain::{ApplicationId, CommitteeId, ReviewerId, StaffRole, TemplateId, TokenId};
use super::instance::CommitteeInstance;
use super::notify::StaffMember;
use super::template::CommitteeTemplate;
use super::token::FeedbackToken;

/// Error enumeration for storage failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("a committee is already assigned to this application")]
    DuplicateCommittee,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Storage abstraction for templates, instances, and tokens so the service
/// module can be exercised in isolation.
///
/// The two invariants most exposed to storage engines without transactions
/// live here rather than in check-then-act service logic:
/// `insert_instance` rejects a second non-cancelled committee for an
/// application, and `consume_token` is an atomic conditional write that
/// succeeds only while `is_used` is still false.
pub trait CommitteeStore: Send + Sync {
    fn insert_template(
        &self,
        template: CommitteeTemplate,
    ) -> Result<CommitteeTemplate, RepositoryError>;
    fn update_template(&self, template: CommitteeTemplate) -> Result<(), RepositoryError>;
    fn fetch_template(&self, id: &TemplateId)
        -> Result<Option<CommitteeTemplate>, RepositoryError>;
    fn templates_by_category(
        &self,
        category: Option<&str>,
        include_inactive: bool,
    ) -> Result<Vec<CommitteeTemplate>, RepositoryError>;

    fn insert_instance(
        &self,
        instance: CommitteeInstance,
    ) -> Result<CommitteeInstance, RepositoryError>;
    fn update_instance(&self, instance: CommitteeInstance) -> Result<(), RepositoryError>;
    fn fetch_instance(
        &self,
        id: &CommitteeId,
    ) -> Result<Option<CommitteeInstance>, RepositoryError>;
    /// Latest non-cancelled instance for the application, if any.
    fn instance_for_application(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Option<CommitteeInstance>, RepositoryError>;
    /// Active instances whose deadline falls inside `[from, until]`.
    fn active_due_within(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CommitteeInstance>, RepositoryError>;

    fn insert_token(&self, token: FeedbackToken) -> Result<FeedbackToken, RepositoryError>;
    fn fetch_token_by_secret(
        &self,
        secret: &str,
    ) -> Result<Option<FeedbackToken>, RepositoryError>;
    /// Latest unconsumed token for a committee seat, if any.
    fn outstanding_token(
        &self,
        committee_id: &CommitteeId,
        reviewer_id: &ReviewerId,
    ) -> Result<Option<FeedbackToken>, RepositoryError>;
    /// Compare-and-swap on `is_used`: flips it and stamps `used_at` only if
    /// it was still false, otherwise fails with `Conflict`. Under concurrent
    /// replay exactly one caller gets the token back.
    fn consume_token(
        &self,
        id: &TokenId,
        now: DateTime<Utc>,
    ) -> Result<FeedbackToken, RepositoryError>;
    /// Force-expire a token so it immediately fails verification.
    fn expire_token(&self, id: &TokenId, now: DateTime<Utc>) -> Result<(), RepositoryError>;
    /// Engagement accounting for a successful verify; not access control.
    fn record_token_access(&self, id: &TokenId, now: DateTime<Utc>)
        -> Result<(), RepositoryError>;
}

/// Read-only view of the staff roster owned by the surrounding system.
pub trait StaffDirectory: Send + Sync {
    fn active_staff_with_roles(
        &self,
        roles: &BTreeSet<StaffRole>,
    ) -> Result<Vec<StaffMember>, RepositoryError>;
    fn find_by_email(&self, email: &str) -> Result<Option<StaffMember>, RepositoryError>;
}
