//! Hiring-committee feedback collection and consensus.
//!
//! A committee is assigned to a candidate application from a template copy
//! or an ad hoc roster; each reviewer receives a single-use tokenized link,
//! submits one structured assessment, and the aggregate recommendation is
//! derived under the configured voting policy.

pub mod domain;
pub mod instance;
pub mod notify;
pub mod repository;
pub mod router;
pub mod service;
pub mod template;
pub mod token;
pub mod voting;

#[cfg(test)]
mod tests;

pub use domain::{
    parse_line_list, ApplicationId, AuditNote, CommitteeId, CommitteeMember, CommitteePolicy,
    CommitteeStatus, Feedback, FeedbackSubmission, MemberStatus, PanelSeat, Recommendation,
    ReviewerId, ReviewerProfile, StaffRole, TemplateId, TokenId, ValidationError, VotingMechanism,
};
pub use instance::{AggregateView, CommitteeInstance, CommitteeView, MemberView, StateError};
pub use notify::{
    AlertType, EmailMessage, NotificationError, NotificationRouter, NotificationRules, Notifier,
    Recipient, StaffMember,
};
pub use repository::{CommitteeStore, RepositoryError, StaffDirectory};
pub use router::{committee_router, feedback_router, template_router, StaffIdentity};
pub use service::{
    CommitteeService, CommitteeServiceError, CommitteeSettings, FeedbackFormContext,
    ReminderSweepReport,
};
pub use template::{CatalogError, CommitteeTemplate, TemplateCatalog, TemplateDraft};
pub use token::{mint_token, verify_gate, FeedbackToken, TokenError};
pub use voting::{compute_aggregate, is_complete, FeedbackAggregate, RecommendationTally};
