//! Recipient resolution and outbound dispatch.
//!
//! Role rules alone miss ad hoc committee members with no special role;
//! committee membership alone misses standing stakeholders who must see
//! every event. The union-with-dedup contract here is depended on by every
//! component that sends mail.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::domain::StaffRole;
use super::instance::CommitteeInstance;
use super::repository::{RepositoryError, StaffDirectory};

/// Events this subsystem announces.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    CommitteeAssigned,
    FeedbackRequest,
    FeedbackReceived,
    FeedbackReminder,
    CommitteeCompleted,
    CommitteeCancelled,
}

impl AlertType {
    pub const fn label(self) -> &'static str {
        match self {
            AlertType::CommitteeAssigned => "committee_assigned",
            AlertType::FeedbackRequest => "feedback_request",
            AlertType::FeedbackReceived => "feedback_received",
            AlertType::FeedbackReminder => "feedback_reminder",
            AlertType::CommitteeCompleted => "committee_completed",
            AlertType::CommitteeCancelled => "committee_cancelled",
        }
    }
}

/// Directory record for a staff user, as supplied by the surrounding system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: StaffRole,
    pub active: bool,
    /// Alert types this person has opted out of.
    #[serde(default)]
    pub muted_alerts: BTreeSet<AlertType>,
}

/// Global mapping from event type to the staff roles always informed of it,
/// independent of any specific committee.
#[derive(Debug, Clone, Default)]
pub struct NotificationRules {
    rules: BTreeMap<AlertType, BTreeSet<StaffRole>>,
}

impl NotificationRules {
    /// Baseline rules: HR management follows the whole lifecycle, admins
    /// additionally see final decisions.
    pub fn standard() -> Self {
        Self::default()
            .with_rule(AlertType::CommitteeAssigned, [StaffRole::HrManager])
            .with_rule(AlertType::FeedbackReceived, [StaffRole::HrManager])
            .with_rule(
                AlertType::CommitteeCompleted,
                [StaffRole::HrManager, StaffRole::Admin],
            )
            .with_rule(AlertType::CommitteeCancelled, [StaffRole::HrManager])
    }

    pub fn with_rule(
        mut self,
        alert: AlertType,
        roles: impl IntoIterator<Item = StaffRole>,
    ) -> Self {
        self.rules.insert(alert, roles.into_iter().collect());
        self
    }

    pub fn roles_for(&self, alert: AlertType) -> BTreeSet<StaffRole> {
        self.rules.get(&alert).cloned().unwrap_or_default()
    }
}

/// A resolved mail target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub email: String,
}

/// Outbound payload handed to the transport as a black box. This subsystem
/// decides recipient, template, and details only, never transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: Recipient,
    pub template: String,
    pub details: BTreeMap<String, String>,
}

/// Trait describing the single outbound send capability.
pub trait Notifier: Send + Sync {
    fn send(&self, message: EmailMessage) -> Result<(), NotificationError>;
}

/// Delivery failure. Non-fatal by contract: logged and surfaced to staff,
/// never rolled back into committee state.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

pub struct NotificationRouter<D, N> {
    directory: Arc<D>,
    notifier: Arc<N>,
    rules: NotificationRules,
}

impl<D, N> NotificationRouter<D, N>
where
    D: StaffDirectory + 'static,
    N: Notifier + 'static,
{
    pub fn new(directory: Arc<D>, notifier: Arc<N>, rules: NotificationRules) -> Self {
        Self {
            directory,
            notifier,
            rules,
        }
    }

    /// Union of rule-based staff and the committee roster, deduplicated by
    /// email; a person in both sets is notified once. Opt-outs are honored
    /// unless the caller overrides them.
    pub fn resolve_recipients(
        &self,
        alert: AlertType,
        committee: Option<&CommitteeInstance>,
        override_opt_out: bool,
    ) -> Result<Vec<Recipient>, RepositoryError> {
        let mut recipients = Vec::new();
        let mut seen = BTreeSet::new();

        let roles = self.rules.roles_for(alert);
        if !roles.is_empty() {
            for staff in self.directory.active_staff_with_roles(&roles)? {
                if !override_opt_out && staff.muted_alerts.contains(&alert) {
                    continue;
                }
                if seen.insert(staff.email.to_ascii_lowercase()) {
                    recipients.push(Recipient {
                        name: staff.name,
                        email: staff.email,
                    });
                }
            }
        }

        if let Some(instance) = committee {
            for member in &instance.members {
                let key = member.reviewer.email.to_ascii_lowercase();
                if seen.contains(&key) {
                    continue;
                }
                if !override_opt_out {
                    if let Some(staff) = self.directory.find_by_email(&member.reviewer.email)? {
                        if staff.muted_alerts.contains(&alert) {
                            continue;
                        }
                    }
                }
                seen.insert(key);
                recipients.push(Recipient {
                    name: member.reviewer.name.clone(),
                    email: member.reviewer.email.clone(),
                });
            }
        }

        Ok(recipients)
    }

    /// Resolve and dispatch an event to every stakeholder. Fire-and-forget:
    /// failures are logged per recipient and the sent count is returned.
    pub fn broadcast(
        &self,
        alert: AlertType,
        committee: Option<&CommitteeInstance>,
        details: BTreeMap<String, String>,
    ) -> usize {
        let recipients = match self.resolve_recipients(alert, committee, false) {
            Ok(recipients) => recipients,
            Err(error) => {
                warn!(alert = alert.label(), %error, "recipient resolution failed");
                return 0;
            }
        };

        let mut sent = 0;
        for recipient in recipients {
            if self.send_direct(recipient, alert.label(), details.clone()) {
                sent += 1;
            }
        }
        sent
    }

    /// Send one message to one recipient, logging delivery failures instead
    /// of propagating them.
    pub fn send_direct(
        &self,
        to: Recipient,
        template: &str,
        details: BTreeMap<String, String>,
    ) -> bool {
        let email = to.email.clone();
        let message = EmailMessage {
            to,
            template: template.to_string(),
            details,
        };

        match self.notifier.send(message) {
            Ok(()) => true,
            Err(error) => {
                warn!(template, recipient = %email, %error, "notification delivery failed");
                false
            }
        }
    }
}
