use std::sync::Arc;

use clap::Args;

use crate::infra::{InMemoryCommitteeStore, InMemoryStaffDirectory, RecordingNotifier};
use hireboard::error::AppError;
use hireboard::workflows::committee::{
    AlertType, ApplicationId, CommitteePolicy, CommitteeService, CommitteeServiceError,
    CommitteeSettings, CommitteeStore, FeedbackSubmission, NotificationRouter, NotificationRules,
    PanelSeat, Recommendation, ReviewerId, ReviewerProfile, TemplateCatalog, TemplateDraft,
    VotingMechanism,
};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Voting mechanism for the demo committee (average, majority, consensus)
    #[arg(long, default_value = "average", value_parser = parse_mechanism)]
    pub(crate) mechanism: Option<VotingMechanism>,
}

fn parse_mechanism(raw: &str) -> Result<VotingMechanism, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "average" => Ok(VotingMechanism::Average),
        "majority" => Ok(VotingMechanism::Majority),
        "consensus" => Ok(VotingMechanism::Consensus),
        other => Err(format!(
            "unknown mechanism '{other}' (expected average, majority, or consensus)"
        )),
    }
}

fn seat(id: &str, name: &str, email: &str, role: &str) -> PanelSeat {
    PanelSeat {
        reviewer: ReviewerProfile {
            reviewer_id: ReviewerId(id.to_string()),
            name: name.to_string(),
            email: email.to_string(),
            role: role.to_string(),
        },
        is_primary: false,
    }
}

/// Walk the full committee lifecycle against the in-memory stack and print
/// each step, so stakeholders can see the flow without an HTTP client.
pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let mechanism = args.mechanism.unwrap_or(VotingMechanism::Average);

    let store = Arc::new(InMemoryCommitteeStore::default());
    let directory = Arc::new(InMemoryStaffDirectory::seeded());
    let notifier = Arc::new(RecordingNotifier::default());
    let router = NotificationRouter::new(
        directory,
        notifier.clone(),
        NotificationRules::standard(),
    );
    let service = CommitteeService::new(
        store.clone(),
        router,
        CommitteeSettings::default(),
    );
    let catalog = TemplateCatalog::new(store.clone());

    println!("Committee feedback demo ({} voting)", mechanism.label());

    let template = catalog.create(TemplateDraft {
        name: "Engineering loop".to_string(),
        category: "engineering".to_string(),
        members: vec![
            seat("rev-ada", "Ada Nguyen", "ada@example.com", "technical"),
            seat("rev-bo", "Bo Castillo", "bo@example.com", "technical"),
            seat("rev-cy", "Cyrus Patel", "cyrus@example.com", "bar_raiser"),
        ],
        policy: CommitteePolicy {
            min_feedback_required: 2,
            voting_mechanism: mechanism,
            ..CommitteePolicy::default()
        },
    })?;
    println!("Created template {} ({})", template.id.0, template.name);

    let application_id = ApplicationId("app-50041".to_string());
    let instance =
        service.assign_from_template(application_id.clone(), &template.id, None, "staff-hr")?;
    println!(
        "\nAssigned committee {} to application {} ({} reviewers)",
        instance.id.0,
        instance.application_id.0,
        instance.members.len()
    );

    for message in notifier.sent() {
        if message.template == AlertType::FeedbackRequest.label() {
            if let Some(url) = message.details.get("feedback_url") {
                println!("- link for {}: {}", message.to.email, url);
            }
        }
    }

    let assessments = [
        (
            "rev-ada",
            8,
            Recommendation::Recommend,
            "Deep systems background; strong debugging instincts.",
        ),
        (
            "rev-bo",
            9,
            Recommendation::Recommend,
            "Excellent design round; thoughtful tradeoffs.",
        ),
    ];

    for (reviewer_id, score, recommendation, notes) in assessments {
        let token = store
            .outstanding_token(&instance.id, &ReviewerId(reviewer_id.to_string()))
            .map_err(CommitteeServiceError::from)?
            .expect("token outstanding for demo reviewer");
        let updated = service.submit_feedback(
            &token.secret,
            FeedbackSubmission {
                technical_notes: notes.to_string(),
                strengths: "architecture\ncommunication".to_string(),
                weaknesses: String::new(),
                recommendation,
                overall_score: score,
            },
        )?;
        println!(
            "\n{} submitted score {} ({}); committee now {}",
            reviewer_id,
            score,
            recommendation.label(),
            updated.status.label()
        );
    }

    let final_view = service
        .get_by_application(&application_id)?
        .expect("committee present");

    println!("\nFinal state: {}", final_view.status.label());
    if let Some(aggregate) = &final_view.aggregate {
        if let Some(average) = aggregate.average_score {
            println!("Average score: {average}");
        }
        println!(
            "Votes: {} recommend / {} pending / {} not_recommend",
            aggregate.recommendation_counts.recommend,
            aggregate.recommendation_counts.pending,
            aggregate.recommendation_counts.not_recommend
        );
        println!("Recommendation: {}", aggregate.final_recommendation.label());
    }

    Ok(())
}
