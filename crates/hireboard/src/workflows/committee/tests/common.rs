use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::workflows::committee::domain::{
    ApplicationId, CommitteeId, CommitteePolicy, FeedbackSubmission, PanelSeat, Recommendation,
    ReviewerId, ReviewerProfile, StaffRole, TemplateId, TokenId, VotingMechanism,
};
use crate::workflows::committee::instance::CommitteeInstance;
use crate::workflows::committee::notify::{
    AlertType, EmailMessage, NotificationError, NotificationRouter, NotificationRules, Notifier,
    StaffMember,
};
use crate::workflows::committee::repository::{
    CommitteeStore, RepositoryError, StaffDirectory,
};
use crate::workflows::committee::service::{CommitteeService, CommitteeSettings};
use crate::workflows::committee::template::CommitteeTemplate;
use crate::workflows::committee::token::FeedbackToken;

#[derive(Default)]
struct StoreInner {
    templates: HashMap<TemplateId, CommitteeTemplate>,
    instances: HashMap<CommitteeId, CommitteeInstance>,
    tokens: HashMap<TokenId, FeedbackToken>,
}

/// In-memory store with the same conditional-write guarantees a real
/// engine would provide: duplicate-committee checks and token consumption
/// happen under one lock.
#[derive(Default)]
pub(super) struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    /// Test hook: age a token so the link reads as expired.
    pub(super) fn backdate_token(&self, id: &TokenId, expires_at: DateTime<Utc>) {
        let mut guard = self.inner.lock().expect("store mutex poisoned");
        if let Some(token) = guard.tokens.get_mut(id) {
            token.expires_at = expires_at;
        }
    }

    /// Test hook: shift an active committee's deadline.
    pub(super) fn set_deadline(&self, id: &CommitteeId, deadline: DateTime<Utc>) {
        let mut guard = self.inner.lock().expect("store mutex poisoned");
        if let Some(instance) = guard.instances.get_mut(id) {
            instance.deadline = deadline;
        }
    }
}

impl CommitteeStore for MemoryStore {
    fn insert_template(
        &self,
        template: CommitteeTemplate,
    ) -> Result<CommitteeTemplate, RepositoryError> {
        let mut guard = self.inner.lock().expect("store mutex poisoned");
        if guard.templates.contains_key(&template.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.templates.insert(template.id.clone(), template.clone());
        Ok(template)
    }

    fn update_template(&self, template: CommitteeTemplate) -> Result<(), RepositoryError> {
        let mut guard = self.inner.lock().expect("store mutex poisoned");
        if !guard.templates.contains_key(&template.id) {
            return Err(RepositoryError::NotFound);
        }
        guard.templates.insert(template.id.clone(), template);
        Ok(())
    }

    fn fetch_template(
        &self,
        id: &TemplateId,
    ) -> Result<Option<CommitteeTemplate>, RepositoryError> {
        let guard = self.inner.lock().expect("store mutex poisoned");
        Ok(guard.templates.get(id).cloned())
    }

    fn templates_by_category(
        &self,
        category: Option<&str>,
        include_inactive: bool,
    ) -> Result<Vec<CommitteeTemplate>, RepositoryError> {
        let guard = self.inner.lock().expect("store mutex poisoned");
        let mut templates: Vec<CommitteeTemplate> = guard
            .templates
            .values()
            .filter(|template| include_inactive || template.active)
            .filter(|template| category.map_or(true, |wanted| template.category == wanted))
            .cloned()
            .collect();
        templates.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(templates)
    }

    fn insert_instance(
        &self,
        instance: CommitteeInstance,
    ) -> Result<CommitteeInstance, RepositoryError> {
        let mut guard = self.inner.lock().expect("store mutex poisoned");
        let duplicate = guard.instances.values().any(|existing| {
            existing.application_id == instance.application_id
                && existing.status != crate::workflows::committee::CommitteeStatus::Cancelled
        });
        if duplicate {
            return Err(RepositoryError::DuplicateCommittee);
        }
        guard.instances.insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    fn update_instance(&self, instance: CommitteeInstance) -> Result<(), RepositoryError> {
        let mut guard = self.inner.lock().expect("store mutex poisoned");
        if !guard.instances.contains_key(&instance.id) {
            return Err(RepositoryError::NotFound);
        }
        guard.instances.insert(instance.id.clone(), instance);
        Ok(())
    }

    fn fetch_instance(
        &self,
        id: &CommitteeId,
    ) -> Result<Option<CommitteeInstance>, RepositoryError> {
        let guard = self.inner.lock().expect("store mutex poisoned");
        Ok(guard.instances.get(id).cloned())
    }

    fn instance_for_application(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Option<CommitteeInstance>, RepositoryError> {
        let guard = self.inner.lock().expect("store mutex poisoned");
        let mut candidates: Vec<&CommitteeInstance> = guard
            .instances
            .values()
            .filter(|instance| {
                instance.application_id == *application_id
                    && instance.status != crate::workflows::committee::CommitteeStatus::Cancelled
            })
            .collect();
        candidates.sort_by_key(|instance| instance.created_at);
        Ok(candidates.last().map(|instance| (*instance).clone()))
    }

    fn active_due_within(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CommitteeInstance>, RepositoryError> {
        let guard = self.inner.lock().expect("store mutex poisoned");
        let mut due: Vec<CommitteeInstance> = guard
            .instances
            .values()
            .filter(|instance| {
                instance.status == crate::workflows::committee::CommitteeStatus::Active
                    && instance.deadline >= from
                    && instance.deadline <= until
            })
            .cloned()
            .collect();
        due.sort_by_key(|instance| instance.deadline);
        Ok(due)
    }

    fn insert_token(&self, token: FeedbackToken) -> Result<FeedbackToken, RepositoryError> {
        let mut guard = self.inner.lock().expect("store mutex poisoned");
        if guard.tokens.contains_key(&token.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.tokens.insert(token.id.clone(), token.clone());
        Ok(token)
    }

    fn fetch_token_by_secret(
        &self,
        secret: &str,
    ) -> Result<Option<FeedbackToken>, RepositoryError> {
        let guard = self.inner.lock().expect("store mutex poisoned");
        Ok(guard
            .tokens
            .values()
            .find(|token| token.secret == secret)
            .cloned())
    }

    fn outstanding_token(
        &self,
        committee_id: &CommitteeId,
        reviewer_id: &ReviewerId,
    ) -> Result<Option<FeedbackToken>, RepositoryError> {
        let guard = self.inner.lock().expect("store mutex poisoned");
        let mut candidates: Vec<&FeedbackToken> = guard
            .tokens
            .values()
            .filter(|token| {
                token.committee_id == *committee_id
                    && token.reviewer_id == *reviewer_id
                    && !token.is_used
            })
            .collect();
        candidates.sort_by_key(|token| (token.issued_at, token.id.0.clone()));
        Ok(candidates.last().map(|token| (*token).clone()))
    }

    fn consume_token(
        &self,
        id: &TokenId,
        now: DateTime<Utc>,
    ) -> Result<FeedbackToken, RepositoryError> {
        let mut guard = self.inner.lock().expect("store mutex poisoned");
        let token = guard.tokens.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if token.is_used {
            return Err(RepositoryError::Conflict);
        }
        token.is_used = true;
        token.used_at = Some(now);
        Ok(token.clone())
    }

    fn expire_token(&self, id: &TokenId, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut guard = self.inner.lock().expect("store mutex poisoned");
        let token = guard.tokens.get_mut(id).ok_or(RepositoryError::NotFound)?;
        token.expires_at = now - Duration::seconds(1);
        Ok(())
    }

    fn record_token_access(
        &self,
        id: &TokenId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.inner.lock().expect("store mutex poisoned");
        let token = guard.tokens.get_mut(id).ok_or(RepositoryError::NotFound)?;
        token.access_count += 1;
        token.last_accessed_at = Some(now);
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct MemoryDirectory {
    staff: Mutex<Vec<StaffMember>>,
}

impl MemoryDirectory {
    pub(super) fn seed(&self, members: Vec<StaffMember>) {
        *self.staff.lock().expect("directory mutex poisoned") = members;
    }
}

impl StaffDirectory for MemoryDirectory {
    fn active_staff_with_roles(
        &self,
        roles: &BTreeSet<StaffRole>,
    ) -> Result<Vec<StaffMember>, RepositoryError> {
        let guard = self.staff.lock().expect("directory mutex poisoned");
        Ok(guard
            .iter()
            .filter(|staff| staff.active && roles.contains(&staff.role))
            .cloned()
            .collect())
    }

    fn find_by_email(&self, email: &str) -> Result<Option<StaffMember>, RepositoryError> {
        let guard = self.staff.lock().expect("directory mutex poisoned");
        Ok(guard
            .iter()
            .find(|staff| staff.email.eq_ignore_ascii_case(email))
            .cloned())
    }
}

#[derive(Default)]
pub(super) struct MemoryNotifier {
    messages: Mutex<Vec<EmailMessage>>,
}

impl MemoryNotifier {
    pub(super) fn sent(&self) -> Vec<EmailMessage> {
        self.messages.lock().expect("notifier mutex poisoned").clone()
    }

    pub(super) fn sent_with_template(&self, template: &str) -> Vec<EmailMessage> {
        self.sent()
            .into_iter()
            .filter(|message| message.template == template)
            .collect()
    }
}

impl Notifier for MemoryNotifier {
    fn send(&self, message: EmailMessage) -> Result<(), NotificationError> {
        self.messages
            .lock()
            .expect("notifier mutex poisoned")
            .push(message);
        Ok(())
    }
}

pub(super) struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn send(&self, _message: EmailMessage) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("smtp offline".to_string()))
    }
}

pub(super) fn reviewer(id: &str, name: &str, email: &str, role: &str) -> ReviewerProfile {
    ReviewerProfile {
        reviewer_id: ReviewerId(id.to_string()),
        name: name.to_string(),
        email: email.to_string(),
        role: role.to_string(),
    }
}

pub(super) fn seat(id: &str, name: &str, email: &str, role: &str) -> PanelSeat {
    PanelSeat {
        reviewer: reviewer(id, name, email, role),
        is_primary: false,
    }
}

pub(super) fn three_seats() -> Vec<PanelSeat> {
    vec![
        PanelSeat {
            reviewer: reviewer("rev-ada", "Ada Nguyen", "ada@example.com", "technical"),
            is_primary: true,
        },
        seat("rev-bo", "Bo Castillo", "bo@example.com", "technical"),
        seat("rev-cy", "Cyrus Patel", "cyrus@example.com", "bar_raiser"),
    ]
}

pub(super) fn policy_min2_average() -> CommitteePolicy {
    CommitteePolicy {
        min_feedback_required: 2,
        voting_mechanism: VotingMechanism::Average,
        ..CommitteePolicy::default()
    }
}

pub(super) fn staff_roster() -> Vec<StaffMember> {
    vec![
        StaffMember {
            id: "staff-hr".to_string(),
            name: "Hana Ruiz".to_string(),
            email: "hana@example.com".to_string(),
            role: StaffRole::HrManager,
            active: true,
            muted_alerts: BTreeSet::new(),
        },
        StaffMember {
            id: "staff-adm".to_string(),
            name: "Avery Kim".to_string(),
            email: "avery@example.com".to_string(),
            role: StaffRole::Admin,
            active: true,
            muted_alerts: BTreeSet::new(),
        },
    ]
}

pub(super) fn submission(score: u8, recommendation: Recommendation) -> FeedbackSubmission {
    FeedbackSubmission {
        technical_notes: "Strong systems depth; clear tradeoff reasoning.".to_string(),
        strengths: "distributed systems\nmentoring".to_string(),
        weaknesses: "limited frontend exposure".to_string(),
        recommendation,
        overall_score: score,
    }
}

pub(super) fn test_settings() -> CommitteeSettings {
    CommitteeSettings {
        feedback_base_url: "https://hire.example.com".to_string(),
        scheduler_secret: "sweep-secret".to_string(),
        reminder_lookahead_days: 2,
        resend_daily_cap: 3,
        resend_cooldown_hours: 4,
    }
}

pub(super) type TestService = CommitteeService<MemoryStore, MemoryDirectory, MemoryNotifier>;

pub(super) fn build_service() -> (
    Arc<TestService>,
    Arc<MemoryStore>,
    Arc<MemoryDirectory>,
    Arc<MemoryNotifier>,
) {
    build_service_with(test_settings())
}

pub(super) fn build_service_with(
    settings: CommitteeSettings,
) -> (
    Arc<TestService>,
    Arc<MemoryStore>,
    Arc<MemoryDirectory>,
    Arc<MemoryNotifier>,
) {
    let store = Arc::new(MemoryStore::default());
    let directory = Arc::new(MemoryDirectory::default());
    directory.seed(staff_roster());
    let notifier = Arc::new(MemoryNotifier::default());
    let router = NotificationRouter::new(
        directory.clone(),
        notifier.clone(),
        NotificationRules::standard(),
    );
    let service = Arc::new(CommitteeService::new(store.clone(), router, settings));
    (service, store, directory, notifier)
}

/// Assign a three-member average/min-2 committee and return it active.
pub(super) fn assign_committee(service: &TestService, application_id: &str) -> CommitteeInstance {
    service
        .assign_custom(
            ApplicationId(application_id.to_string()),
            three_seats(),
            policy_min2_average(),
            "staff-hr",
        )
        .expect("committee assigns")
}

pub(super) fn secret_for(
    store: &MemoryStore,
    committee_id: &CommitteeId,
    reviewer_id: &str,
) -> String {
    store
        .outstanding_token(committee_id, &ReviewerId(reviewer_id.to_string()))
        .expect("token lookup")
        .expect("token outstanding")
        .secret
}

/// Number of times an event reached one recipient; one broadcast produces
/// exactly one message per resolved recipient.
pub(super) fn alerts_to(notifier: &MemoryNotifier, alert: AlertType, email: &str) -> usize {
    notifier
        .sent_with_template(alert.label())
        .into_iter()
        .filter(|message| message.to.email == email)
        .count()
}
