//! Reusable panel blueprints scoped by hiring category.
//!
//! Templates are consulted only at instantiation time and are always
//! cloned by value into an instance, never referenced live, so editing a
//! template after assignment cannot mutate a committee in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{validate_roster, CommitteePolicy, PanelSeat, TemplateId, ValidationError};
use super::repository::{CommitteeStore, RepositoryError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitteeTemplate {
    pub id: TemplateId,
    pub name: String,
    /// Department or hiring category the template applies to.
    pub category: String,
    pub members: Vec<PanelSeat>,
    pub policy: CommitteePolicy,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inbound payload for creating or replacing a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDraft {
    pub name: String,
    pub category: String,
    pub members: Vec<PanelSeat>,
    #[serde(default)]
    pub policy: CommitteePolicy,
}

impl TemplateDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingTemplateName);
        }
        validate_roster(&self.members, &self.policy)
    }
}

static TEMPLATE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_template_id() -> TemplateId {
    let id = TEMPLATE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    TemplateId(format!("tpl-{id:06}"))
}

/// Error raised by the template catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// CRUD plus lookup-by-category over the template store. Templates are
/// never hard-deleted; `deactivate` is the only removal so instances cloned
/// from a template can always resolve their origin.
pub struct TemplateCatalog<S> {
    store: Arc<S>,
}

impl<S> TemplateCatalog<S>
where
    S: CommitteeStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn create(&self, draft: TemplateDraft) -> Result<CommitteeTemplate, CatalogError> {
        draft.validate()?;
        let now = Utc::now();
        let template = CommitteeTemplate {
            id: next_template_id(),
            name: draft.name.trim().to_string(),
            category: draft.category.trim().to_string(),
            members: draft.members,
            policy: draft.policy,
            active: true,
            created_at: now,
            updated_at: now,
        };
        let stored = self.store.insert_template(template)?;
        Ok(stored)
    }

    /// Replace the mutable parts of a template; id and created_at stay stable.
    pub fn update(
        &self,
        id: &TemplateId,
        draft: TemplateDraft,
    ) -> Result<CommitteeTemplate, CatalogError> {
        draft.validate()?;
        let mut template = self
            .store
            .fetch_template(id)?
            .ok_or(RepositoryError::NotFound)?;

        template.name = draft.name.trim().to_string();
        template.category = draft.category.trim().to_string();
        template.members = draft.members;
        template.policy = draft.policy;
        template.updated_at = Utc::now();

        self.store.update_template(template.clone())?;
        Ok(template)
    }

    pub fn get(&self, id: &TemplateId) -> Result<CommitteeTemplate, CatalogError> {
        let template = self
            .store
            .fetch_template(id)?
            .ok_or(RepositoryError::NotFound)?;
        Ok(template)
    }

    pub fn list(
        &self,
        category: Option<&str>,
        include_inactive: bool,
    ) -> Result<Vec<CommitteeTemplate>, CatalogError> {
        let templates = self
            .store
            .templates_by_category(category, include_inactive)?;
        Ok(templates)
    }

    pub fn deactivate(&self, id: &TemplateId) -> Result<CommitteeTemplate, CatalogError> {
        let mut template = self
            .store
            .fetch_template(id)?
            .ok_or(RepositoryError::NotFound)?;

        if template.active {
            template.active = false;
            template.updated_at = Utc::now();
            self.store.update_template(template.clone())?;
        }

        Ok(template)
    }
}
