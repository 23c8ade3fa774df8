use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

use hireboard::config::CommitteeConfig;
use hireboard::workflows::committee::{
    ApplicationId, CommitteeId, CommitteeInstance, CommitteeSettings, CommitteeStatus,
    CommitteeStore, CommitteeTemplate, EmailMessage, FeedbackToken, NotificationError, Notifier,
    RepositoryError, ReviewerId, StaffDirectory, StaffMember, StaffRole, TemplateId, TokenId,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) fn settings_from_config(config: &CommitteeConfig) -> CommitteeSettings {
    CommitteeSettings {
        feedback_base_url: config.feedback_base_url.clone(),
        scheduler_secret: config.scheduler_secret.clone(),
        reminder_lookahead_days: config.reminder_lookahead_days,
        resend_daily_cap: config.resend_daily_cap,
        resend_cooldown_hours: config.resend_cooldown_hours,
    }
}

#[derive(Default)]
struct StoreInner {
    templates: HashMap<TemplateId, CommitteeTemplate>,
    instances: HashMap<CommitteeId, CommitteeInstance>,
    tokens: HashMap<TokenId, FeedbackToken>,
}

/// Process-local store. All conditional writes happen under one lock, which
/// stands in for the unique constraints a durable engine would enforce.
#[derive(Default)]
pub(crate) struct InMemoryCommitteeStore {
    inner: Mutex<StoreInner>,
}

impl CommitteeStore for InMemoryCommitteeStore {
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
                && existing.status != CommitteeStatus::Cancelled
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
                    && instance.status != CommitteeStatus::Cancelled
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
                instance.status == CommitteeStatus::Active
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

/// Staff roster stub standing in for the user service.
#[derive(Default)]
pub(crate) struct InMemoryStaffDirectory {
    staff: Mutex<Vec<StaffMember>>,
}

impl InMemoryStaffDirectory {
    pub(crate) fn seeded() -> Self {
        let directory = Self::default();
        *directory.staff.lock().expect("directory mutex poisoned") = vec![
            staff("staff-hr", "Hana Ruiz", "hana@example.com", StaffRole::HrManager),
            staff("staff-adm", "Avery Kim", "avery@example.com", StaffRole::Admin),
            staff(
                "staff-spec",
                "Sam Idowu",
                "sam@example.com",
                StaffRole::HrSpecialist,
            ),
        ];
        directory
    }
}

fn staff(id: &str, name: &str, email: &str, role: StaffRole) -> StaffMember {
    StaffMember {
        id: id.to_string(),
        name: name.to_string(),
        email: email.to_string(),
        role,
        active: true,
        muted_alerts: BTreeSet::new(),
    }
}

impl StaffDirectory for InMemoryStaffDirectory {
    fn active_staff_with_roles(
        &self,
        roles: &BTreeSet<StaffRole>,
    ) -> Result<Vec<StaffMember>, RepositoryError> {
        let guard = self.staff.lock().expect("directory mutex poisoned");
        Ok(guard
            .iter()
            .filter(|member| member.active && roles.contains(&member.role))
            .cloned()
            .collect())
    }

    fn find_by_email(&self, email: &str) -> Result<Option<StaffMember>, RepositoryError> {
        let guard = self.staff.lock().expect("directory mutex poisoned");
        Ok(guard
            .iter()
            .find(|member| member.email.eq_ignore_ascii_case(email))
            .cloned())
    }
}

/// Outbound adapter that logs every message and keeps a copy so demos and
/// tests can inspect what went out. Swap for a real transport in production.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    messages: Mutex<Vec<EmailMessage>>,
}

impl RecordingNotifier {
    pub(crate) fn sent(&self) -> Vec<EmailMessage> {
        self.messages.lock().expect("notifier mutex poisoned").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, message: EmailMessage) -> Result<(), NotificationError> {
        info!(
            template = %message.template,
            recipient = %message.to.email,
            "email dispatched"
        );
        self.messages
            .lock()
            .expect("notifier mutex poisoned")
            .push(message);
        Ok(())
    }
}
