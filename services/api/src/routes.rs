use std::sync::Arc;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde_json::json;

use crate::infra::{AppState, InMemoryCommitteeStore, InMemoryStaffDirectory, RecordingNotifier};
use hireboard::workflows::committee::{
    committee_router, feedback_router, template_router, CommitteeService, TemplateCatalog,
};

pub(crate) type ApiCommitteeService =
    CommitteeService<InMemoryCommitteeStore, InMemoryStaffDirectory, RecordingNotifier>;

pub(crate) fn build_router(
    service: Arc<ApiCommitteeService>,
    catalog: Arc<TemplateCatalog<InMemoryCommitteeStore>>,
) -> axum::Router {
    feedback_router(service.clone())
        .merge(committee_router(service))
        .merge(template_router(catalog))
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use hireboard::workflows::committee::{
        CommitteeSettings, NotificationRouter, NotificationRules,
    };
    use tower::ServiceExt;

    fn test_router() -> axum::Router {
        let store = Arc::new(InMemoryCommitteeStore::default());
        let directory = Arc::new(InMemoryStaffDirectory::seeded());
        let notifier = Arc::new(RecordingNotifier::default());
        let router = NotificationRouter::new(directory, notifier, NotificationRules::standard());
        let service = Arc::new(CommitteeService::new(
            store.clone(),
            router,
            CommitteeSettings::default(),
        ));
        let catalog = Arc::new(TemplateCatalog::new(store));
        build_router(service, catalog)
    }

    #[tokio::test]
    async fn healthcheck_reports_ok() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router dispatch");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_feedback_token_maps_to_not_found() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/v1/feedback/not-a-real-token")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router dispatch");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
