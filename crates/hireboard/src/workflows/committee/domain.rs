use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for candidate applications owned by the ATS.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

/// Identifier wrapper for committee instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitteeId(pub String);

/// Identifier wrapper for committee templates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

/// Identifier wrapper for reviewers referenced by a committee roster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReviewerId(pub String);

/// Identifier wrapper for feedback tokens (distinct from the secret itself).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId(pub String);

/// Staff roles recognized by the authenticated boundary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    SuperAdmin,
    Admin,
    HrManager,
    HrSpecialist,
    Recruiter,
    Interviewer,
}

impl StaffRole {
    pub const fn label(self) -> &'static str {
        match self {
            StaffRole::SuperAdmin => "super_admin",
            StaffRole::Admin => "admin",
            StaffRole::HrManager => "hr_manager",
            StaffRole::HrSpecialist => "hr_specialist",
            StaffRole::Recruiter => "recruiter",
            StaffRole::Interviewer => "interviewer",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "super_admin" => Some(StaffRole::SuperAdmin),
            "admin" => Some(StaffRole::Admin),
            "hr_manager" => Some(StaffRole::HrManager),
            "hr_specialist" => Some(StaffRole::HrSpecialist),
            "recruiter" => Some(StaffRole::Recruiter),
            "interviewer" => Some(StaffRole::Interviewer),
            _ => None,
        }
    }

    /// Roles allowed to assign committees and manage rosters.
    pub const fn can_manage_committees(self) -> bool {
        matches!(
            self,
            StaffRole::SuperAdmin
                | StaffRole::Admin
                | StaffRole::HrManager
                | StaffRole::HrSpecialist
        )
    }

    /// Roles additionally allowed to remove members and cancel committees.
    pub const fn can_dissolve_committees(self) -> bool {
        matches!(
            self,
            StaffRole::SuperAdmin | StaffRole::Admin | StaffRole::HrManager
        )
    }
}

/// Reviewer verdict captured on each assessment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Recommend,
    Pending,
    NotRecommend,
}

impl Recommendation {
    pub const fn label(self) -> &'static str {
        match self {
            Recommendation::Recommend => "recommend",
            Recommendation::Pending => "pending",
            Recommendation::NotRecommend => "not_recommend",
        }
    }
}

/// Policy describing how individual assessments become one recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingMechanism {
    Average,
    Majority,
    Consensus,
}

impl VotingMechanism {
    pub const fn label(self) -> &'static str {
        match self {
            VotingMechanism::Average => "average",
            VotingMechanism::Majority => "majority",
            VotingMechanism::Consensus => "consensus",
        }
    }
}

pub const DEFAULT_FEEDBACK_DEADLINE_DAYS: i64 = 7;
const DEFAULT_RECOMMEND_THRESHOLD: f64 = 7.0;
const DEFAULT_REJECT_THRESHOLD: f64 = 4.0;

/// Voting and completion policy copied by value into every instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitteePolicy {
    pub min_feedback_required: u32,
    pub require_all_feedback: bool,
    pub voting_mechanism: VotingMechanism,
    pub feedback_deadline_days: i64,
    pub auto_assign: bool,
    /// Average mechanism only: mean score at or above this recommends.
    pub recommend_threshold: f64,
    /// Average mechanism only: mean score at or below this rejects.
    pub reject_threshold: f64,
}

impl Default for CommitteePolicy {
    fn default() -> Self {
        Self {
            min_feedback_required: 1,
            require_all_feedback: false,
            voting_mechanism: VotingMechanism::Average,
            feedback_deadline_days: DEFAULT_FEEDBACK_DEADLINE_DAYS,
            auto_assign: false,
            recommend_threshold: DEFAULT_RECOMMEND_THRESHOLD,
            reject_threshold: DEFAULT_REJECT_THRESHOLD,
        }
    }
}

impl CommitteePolicy {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.min_feedback_required < 1 {
            return Err(ValidationError::MinFeedbackTooLow);
        }
        if self.feedback_deadline_days <= 0 {
            return Err(ValidationError::NonPositiveDeadline);
        }
        Ok(())
    }
}

/// Point-in-time reviewer contact details carried on rosters and feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerProfile {
    pub reviewer_id: ReviewerId,
    pub name: String,
    pub email: String,
    /// Committee seat, e.g. "technical" or "bar_raiser". Free text.
    pub role: String,
}

/// Roster entry supplied when building a committee (template or ad hoc).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelSeat {
    pub reviewer: ReviewerProfile,
    #[serde(default)]
    pub is_primary: bool,
}

/// Lifecycle of one reviewer inside a committee instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Pending,
    Submitted,
    Declined,
    Expired,
}

impl MemberStatus {
    pub const fn label(self) -> &'static str {
        match self {
            MemberStatus::Pending => "pending",
            MemberStatus::Submitted => "submitted",
            MemberStatus::Declined => "declined",
            MemberStatus::Expired => "expired",
        }
    }
}

/// Roster entry tracked on a live committee instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitteeMember {
    pub reviewer: ReviewerProfile,
    pub is_primary: bool,
    pub status: MemberStatus,
    pub feedback: Option<Feedback>,
    /// Timestamps of every link email sent to this reviewer, newest last.
    #[serde(default)]
    pub link_sends: Vec<DateTime<Utc>>,
}

impl CommitteeMember {
    pub fn from_seat(seat: PanelSeat) -> Self {
        Self {
            reviewer: seat.reviewer,
            is_primary: seat.is_primary,
            status: MemberStatus::Pending,
            feedback: None,
            link_sends: Vec::new(),
        }
    }
}

/// A recorded assessment. Immutable once created; exactly one per member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub reviewer_name: String,
    pub reviewer_email: String,
    pub reviewer_role: String,
    pub technical_notes: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendation: Recommendation,
    pub overall_score: u8,
    pub submitted_at: DateTime<Utc>,
}

/// Inbound assessment payload as typed by the reviewer.
///
/// Strengths and weaknesses arrive as free text and are parsed into line
/// lists; the reviewer identity is snapshotted from the roster, never from
/// the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackSubmission {
    pub technical_notes: String,
    #[serde(default)]
    pub strengths: String,
    #[serde(default)]
    pub weaknesses: String,
    pub recommendation: Recommendation,
    pub overall_score: u8,
}

impl FeedbackSubmission {
    pub fn into_feedback(
        self,
        reviewer: &ReviewerProfile,
        now: DateTime<Utc>,
    ) -> Result<Feedback, ValidationError> {
        if self.technical_notes.trim().is_empty() {
            return Err(ValidationError::MissingTechnicalNotes);
        }
        if !(1..=10).contains(&self.overall_score) {
            return Err(ValidationError::ScoreOutOfRange(self.overall_score));
        }

        Ok(Feedback {
            reviewer_name: reviewer.name.clone(),
            reviewer_email: reviewer.email.clone(),
            reviewer_role: reviewer.role.clone(),
            technical_notes: self.technical_notes.trim().to_string(),
            strengths: parse_line_list(&self.strengths),
            weaknesses: parse_line_list(&self.weaknesses),
            recommendation: self.recommendation,
            overall_score: self.overall_score,
            submitted_at: now,
        })
    }
}

/// Split free text into trimmed, non-empty lines.
pub fn parse_line_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// High level committee lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitteeStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl CommitteeStatus {
    pub const fn label(self) -> &'static str {
        match self {
            CommitteeStatus::Pending => "pending",
            CommitteeStatus::Active => "active",
            CommitteeStatus::Completed => "completed",
            CommitteeStatus::Cancelled => "cancelled",
        }
    }
}

/// Append-only trail of staff actions against an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditNote {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub note: String,
}

/// Validation errors for inbound payloads, rosters, and policies.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("technical notes are required")]
    MissingTechnicalNotes,
    #[error("overall score must be between 1 and 10, got {0}")]
    ScoreOutOfRange(u8),
    #[error("committee requires at least one member")]
    EmptyRoster,
    #[error("duplicate reviewer in roster: {0}")]
    DuplicateReviewer(String),
    #[error("minimum feedback required must be at least 1")]
    MinFeedbackTooLow,
    #[error("minimum feedback required ({required}) exceeds roster size ({roster_size})")]
    MinFeedbackExceedsRoster { required: u32, roster_size: usize },
    #[error("feedback deadline must be a positive number of days")]
    NonPositiveDeadline,
    #[error("template name is required")]
    MissingTemplateName,
    #[error("template {0} is deactivated")]
    InactiveTemplate(String),
}

/// Roster checks shared by templates, custom assignment, and add-member.
pub fn validate_roster(seats: &[PanelSeat], policy: &CommitteePolicy) -> Result<(), ValidationError> {
    if seats.is_empty() {
        return Err(ValidationError::EmptyRoster);
    }

    let mut seen = std::collections::BTreeSet::new();
    for seat in seats {
        if !seen.insert(seat.reviewer.reviewer_id.0.as_str()) {
            return Err(ValidationError::DuplicateReviewer(
                seat.reviewer.reviewer_id.0.clone(),
            ));
        }
    }

    policy.validate()?;
    if policy.min_feedback_required as usize > seats.len() {
        return Err(ValidationError::MinFeedbackExceedsRoster {
            required: policy.min_feedback_required,
            roster_size: seats.len(),
        });
    }

    Ok(())
}
