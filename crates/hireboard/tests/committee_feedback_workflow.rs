//! Integration specifications for the committee feedback workflow.
//!
//! Scenarios run end-to-end through the public service facade and HTTP
//! router so assignment, token gating, aggregation, and lifecycle behavior
//! are validated without reaching into private modules.

mod common {
    use std::collections::{BTreeSet, HashMap};
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, Duration, Utc};

    use hireboard::workflows::committee::{
        ApplicationId, CommitteeId, CommitteeInstance, CommitteePolicy, CommitteeService,
        CommitteeSettings, CommitteeStatus, CommitteeStore, CommitteeTemplate, EmailMessage,
        FeedbackSubmission, FeedbackToken, NotificationError, NotificationRouter,
        NotificationRules, Notifier, PanelSeat, Recommendation, RepositoryError, ReviewerId,
        ReviewerProfile, StaffDirectory, StaffMember, StaffRole, TemplateId, TokenId,
        VotingMechanism,
    };

    #[derive(Default)]
    struct StoreInner {
        templates: HashMap<TemplateId, CommitteeTemplate>,
        instances: HashMap<CommitteeId, CommitteeInstance>,
        tokens: HashMap<TokenId, FeedbackToken>,
    }

    #[derive(Default)]
    pub struct MemoryStore {
        inner: Mutex<StoreInner>,
    }

    impl MemoryStore {
        pub fn backdate_token(&self, id: &TokenId, expires_at: DateTime<Utc>) {
            let mut guard = self.inner.lock().expect("store mutex poisoned");
            if let Some(token) = guard.tokens.get_mut(id) {
                token.expires_at = expires_at;
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
            Ok(guard
                .templates
                .values()
                .filter(|template| include_inactive || template.active)
                .filter(|template| category.map_or(true, |wanted| template.category == wanted))
                .cloned()
                .collect())
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
            Ok(guard
                .instances
                .values()
                .filter(|instance| {
                    instance.status == CommitteeStatus::Active
                        && instance.deadline >= from
                        && instance.deadline <= until
                })
                .cloned()
                .collect())
        }

        fn insert_token(&self, token: FeedbackToken) -> Result<FeedbackToken, RepositoryError> {
            let mut guard = self.inner.lock().expect("store mutex poisoned");
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
    pub struct MemoryDirectory {
        staff: Mutex<Vec<StaffMember>>,
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
    pub struct MemoryNotifier {
        messages: Mutex<Vec<EmailMessage>>,
    }

    impl MemoryNotifier {
        pub fn sent_with_template(&self, template: &str) -> Vec<EmailMessage> {
            self.messages
                .lock()
                .expect("notifier mutex poisoned")
                .iter()
                .filter(|message| message.template == template)
                .cloned()
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

    pub type Service = CommitteeService<MemoryStore, MemoryDirectory, MemoryNotifier>;

    pub fn build_service() -> (Arc<Service>, Arc<MemoryStore>, Arc<MemoryNotifier>) {
        let store = Arc::new(MemoryStore::default());
        let directory = Arc::new(MemoryDirectory::default());
        *directory.staff.lock().expect("directory mutex poisoned") = vec![StaffMember {
            id: "staff-hr".to_string(),
            name: "Hana Ruiz".to_string(),
            email: "hana@example.com".to_string(),
            role: StaffRole::HrManager,
            active: true,
            muted_alerts: BTreeSet::new(),
        }];
        let notifier = Arc::new(MemoryNotifier::default());
        let router = NotificationRouter::new(
            directory,
            notifier.clone(),
            NotificationRules::standard(),
        );
        let service = Arc::new(CommitteeService::new(
            store.clone(),
            router,
            CommitteeSettings {
                feedback_base_url: "https://hire.example.com".to_string(),
                scheduler_secret: "sweep-secret".to_string(),
                reminder_lookahead_days: 2,
                resend_daily_cap: 3,
                resend_cooldown_hours: 4,
            },
        ));
        (service, store, notifier)
    }

    pub fn reviewer(id: &str, name: &str, email: &str) -> PanelSeat {
        PanelSeat {
            reviewer: ReviewerProfile {
                reviewer_id: ReviewerId(id.to_string()),
                name: name.to_string(),
                email: email.to_string(),
                role: "technical".to_string(),
            },
            is_primary: false,
        }
    }

    pub fn panel() -> Vec<PanelSeat> {
        vec![
            reviewer("rev-ada", "Ada Nguyen", "ada@example.com"),
            reviewer("rev-bo", "Bo Castillo", "bo@example.com"),
            reviewer("rev-cy", "Cyrus Patel", "cyrus@example.com"),
        ]
    }

    pub fn average_policy() -> CommitteePolicy {
        CommitteePolicy {
            min_feedback_required: 2,
            voting_mechanism: VotingMechanism::Average,
            ..CommitteePolicy::default()
        }
    }

    pub fn assessment(score: u8, recommendation: Recommendation) -> FeedbackSubmission {
        FeedbackSubmission {
            technical_notes: "Thorough design discussion with solid tradeoffs.".to_string(),
            strengths: "architecture\ncommunication".to_string(),
            weaknesses: "little on-call experience".to_string(),
            recommendation,
            overall_score: score,
        }
    }

    pub fn secret_for(store: &MemoryStore, committee_id: &CommitteeId, reviewer_id: &str) -> String {
        store
            .outstanding_token(committee_id, &ReviewerId(reviewer_id.to_string()))
            .expect("token lookup")
            .expect("token outstanding")
            .secret
    }

    pub use hireboard::workflows::committee::AlertType as Alert;
}

mod lifecycle {
    use super::common::*;
    use chrono::{Duration, Utc};
    use hireboard::workflows::committee::{
        ApplicationId, CommitteeServiceError, CommitteeStatus, CommitteeStore, MemberStatus,
        Recommendation, ReviewerId, TokenError,
    };

    #[test]
    fn average_committee_completes_at_minimum_and_accepts_late_feedback() {
        let (service, store, notifier) = build_service();
        let instance = service
            .assign_custom(
                ApplicationId("app-777".to_string()),
                panel(),
                average_policy(),
                "staff-hr",
            )
            .expect("assignment succeeds");
        assert_eq!(instance.status, CommitteeStatus::Active);
        assert_eq!(
            notifier.sent_with_template(Alert::FeedbackRequest.label()).len(),
            3
        );

        let ada = secret_for(&store, &instance.id, "rev-ada");
        let bo = secret_for(&store, &instance.id, "rev-bo");
        service
            .submit_feedback(&ada, assessment(8, Recommendation::Recommend))
            .expect("first assessment");
        let completed = service
            .submit_feedback(&bo, assessment(9, Recommendation::Recommend))
            .expect("second assessment");

        assert_eq!(completed.status, CommitteeStatus::Completed);
        let aggregate = completed.aggregate.as_ref().expect("aggregate present");
        assert_eq!(aggregate.average_score, Some(8.5));
        let decision_ready_to_hr = notifier
            .sent_with_template(Alert::CommitteeCompleted.label())
            .into_iter()
            .filter(|message| message.to.email == "hana@example.com")
            .count();
        assert_eq!(decision_ready_to_hr, 1, "decision-ready notification fired once");

        // Third link still works after completion.
        let cyrus = secret_for(&store, &instance.id, "rev-cy");
        let late = service
            .submit_feedback(&cyrus, assessment(7, Recommendation::Recommend))
            .expect("late assessment recorded");
        assert_eq!(late.submitted_count(), 3);
        assert_eq!(
            late.aggregate.as_ref().and_then(|aggregate| aggregate.average_score),
            Some(8.0)
        );
    }

    #[test]
    fn expired_link_is_rejected_without_side_effects() {
        let (service, store, _notifier) = build_service();
        let instance = service
            .assign_custom(
                ApplicationId("app-778".to_string()),
                panel(),
                average_policy(),
                "staff-hr",
            )
            .expect("assignment succeeds");

        let token = store
            .outstanding_token(&instance.id, &ReviewerId("rev-ada".to_string()))
            .expect("token lookup")
            .expect("token outstanding");
        store.backdate_token(&token.id, Utc::now() - Duration::minutes(5));

        let error = service
            .verify_token(&token.secret)
            .expect_err("expired link rejected");
        assert!(matches!(
            error,
            CommitteeServiceError::Token(TokenError::Expired)
        ));

        let stored = store
            .fetch_instance(&instance.id)
            .expect("fetch")
            .expect("instance present");
        let member = stored
            .member(&ReviewerId("rev-ada".to_string()))
            .expect("member present");
        assert_eq!(member.status, MemberStatus::Pending);
        assert!(member.feedback.is_none());
    }

    #[test]
    fn cancellation_is_terminal_and_kills_every_link() {
        let (service, store, _notifier) = build_service();
        let instance = service
            .assign_custom(
                ApplicationId("app-779".to_string()),
                panel(),
                average_policy(),
                "staff-hr",
            )
            .expect("assignment succeeds");
        let ada = secret_for(&store, &instance.id, "rev-ada");
        let bo = secret_for(&store, &instance.id, "rev-bo");

        let cancelled = service
            .cancel(&instance.id, "staff-hr", "offer accepted elsewhere")
            .expect("cancellation succeeds");
        assert_eq!(cancelled.status, CommitteeStatus::Cancelled);

        for secret in [ada, bo] {
            let error = service.verify_token(&secret).expect_err("link dead");
            assert!(matches!(
                error,
                CommitteeServiceError::Token(TokenError::Expired)
            ));
        }

        let error = service
            .add_member(
                &instance.id,
                reviewer("rev-new", "Noa Field", "noa@example.com"),
                "staff-hr",
            )
            .expect_err("cancelled roster frozen");
        assert!(matches!(error, CommitteeServiceError::State(_)));

        // A replacement committee may now be assigned to the application.
        service
            .assign_custom(
                ApplicationId("app-779".to_string()),
                panel(),
                average_policy(),
                "staff-hr",
            )
            .expect("replacement assignment succeeds");
    }
}

mod consensus {
    use super::common::*;
    use hireboard::workflows::committee::{
        ApplicationId, CommitteePolicy, CommitteeStatus, Recommendation, VotingMechanism,
    };

    #[test]
    fn consensus_mechanism_goes_pending_on_any_disagreement() {
        let (service, store, _notifier) = build_service();
        let policy = CommitteePolicy {
            min_feedback_required: 2,
            require_all_feedback: true,
            voting_mechanism: VotingMechanism::Consensus,
            ..CommitteePolicy::default()
        };
        let instance = service
            .assign_custom(
                ApplicationId("app-880".to_string()),
                panel(),
                policy,
                "staff-hr",
            )
            .expect("assignment succeeds");

        for (reviewer_id, recommendation) in [
            ("rev-ada", Recommendation::Recommend),
            ("rev-bo", Recommendation::Recommend),
            ("rev-cy", Recommendation::NotRecommend),
        ] {
            let secret = secret_for(&store, &instance.id, reviewer_id);
            service
                .submit_feedback(&secret, assessment(8, recommendation))
                .expect("assessment recorded");
        }

        let finished = service
            .get_by_application(&ApplicationId("app-880".to_string()))
            .expect("lookup succeeds")
            .expect("committee present");
        assert_eq!(finished.status, CommitteeStatus::Completed);
        assert_eq!(
            finished
                .aggregate
                .as_ref()
                .map(|aggregate| aggregate.final_recommendation),
            Some(Recommendation::Pending),
            "any dissent prevents a consensus verdict"
        );
    }

    #[test]
    fn majority_tie_never_picks_a_side() {
        let (service, store, _notifier) = build_service();
        let policy = CommitteePolicy {
            min_feedback_required: 2,
            voting_mechanism: VotingMechanism::Majority,
            ..CommitteePolicy::default()
        };
        let mut seats = panel();
        seats.push(reviewer("rev-dee", "Dee Ortiz", "dee@example.com"));
        let instance = service
            .assign_custom(
                ApplicationId("app-881".to_string()),
                seats,
                policy,
                "staff-hr",
            )
            .expect("assignment succeeds");

        for (reviewer_id, recommendation) in [
            ("rev-ada", Recommendation::Recommend),
            ("rev-bo", Recommendation::Recommend),
            ("rev-cy", Recommendation::NotRecommend),
            ("rev-dee", Recommendation::NotRecommend),
        ] {
            let secret = secret_for(&store, &instance.id, reviewer_id);
            service
                .submit_feedback(&secret, assessment(6, recommendation))
                .expect("assessment recorded");
        }

        let finished = service
            .get_by_application(&ApplicationId("app-881".to_string()))
            .expect("lookup succeeds")
            .expect("committee present");
        assert_eq!(
            finished
                .aggregate
                .as_ref()
                .map(|aggregate| aggregate.final_recommendation),
            Some(Recommendation::Pending),
            "a 2/2 tie resolves to pending"
        );
    }
}

mod http {
    use super::common::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use hireboard::workflows::committee::{feedback_router, ApplicationId};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    #[tokio::test]
    async fn reviewer_submits_through_the_public_endpoint() {
        let (service, store, _notifier) = build_service();
        let instance = service
            .assign_custom(
                ApplicationId("app-990".to_string()),
                panel(),
                average_policy(),
                "staff-hr",
            )
            .expect("assignment succeeds");
        let secret = secret_for(&store, &instance.id, "rev-ada");
        let router = feedback_router(service);

        let body = json!({
            "token": secret,
            "technical_notes": "Excellent debugging instincts.",
            "strengths": "profiling\nroot-cause analysis",
            "weaknesses": "",
            "recommendation": "recommend",
            "overall_score": 9,
        });
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/feedback")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).expect("serialize")))
                    .expect("request"),
            )
            .await
            .expect("router dispatch");
        assert_eq!(response.status(), StatusCode::OK);

        // Replay through the same endpoint fails loudly.
        let replay = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/feedback")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).expect("serialize")))
                    .expect("request"),
            )
            .await
            .expect("router dispatch");
        assert_eq!(replay.status(), StatusCode::CONFLICT);

        let bytes = axum::body::to_bytes(replay.into_body(), 1024)
            .await
            .expect("read body");
        let payload: Value = serde_json::from_slice(&bytes).expect("json payload");
        assert!(payload
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .contains("already used"));
    }
}
