use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;

use collections_storage::Database;
use collections_util::TransferSettings;

use crate::transfer::{
    inserter::BatchInserter, Clock, InMemoryJobStore, JobStore, TransferQueue, TransferService,
    TransferWorker,
};
use crate::{collections, telemetry, transfer};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Clock,
    transfers: TransferService,
}

impl AppState {
    /// Builds the state with a process-local job table.
    ///
    /// The returned worker must be spawned for transfers to make progress.
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        settings: TransferSettings,
    ) -> (Self, TransferWorker) {
        Self::with_job_store(
            metrics,
            storage,
            settings,
            Arc::new(InMemoryJobStore::new()),
        )
    }

    pub fn with_job_store(
        metrics: PrometheusHandle,
        storage: Database,
        settings: TransferSettings,
        jobs: Arc<dyn JobStore>,
    ) -> (Self, TransferWorker) {
        let clock: Clock = Arc::new(Utc::now);
        let inserter = BatchInserter::new(
            storage.clone(),
            jobs.clone(),
            clock.clone(),
            settings.batch_size,
        );
        let (queue, worker) = TransferQueue::new(inserter, settings.max_concurrent_jobs);
        let transfers = TransferService::new(storage.clone(), jobs, queue, clock.clone());

        (
            Self {
                metrics,
                storage,
                clock,
                transfers,
            },
            worker,
        )
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn transfers(&self) -> &TransferService {
        &self.transfers
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/companies", get(collections::list_companies))
        .route("/collections", get(collections::list_collections))
        .route(
            "/collections/addCompaniesToCollection",
            post(collections::add_companies_to_collection),
        )
        .route(
            "/collections/transfer-status/:job_id",
            get(transfer::api::transfer_status),
        )
        .route("/collections/:collection_id", get(collections::get_collection))
        .route(
            "/collections/:collection_id/transfer",
            post(transfer::api::start_transfer),
        )
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        telemetry::render_metrics(state.metrics()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::test_support::setup_state;

    #[tokio::test]
    async fn healthz_returns_ok() {
        let (state, _worker) = setup_state().await;
        let app = app_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let (state, _worker) = setup_state().await;
        let app = app_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (state, _worker) = setup_state().await;
        let response = app_router(state)
            .oneshot(
                Request::builder()
                    .uri("/collections/x/y/z")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
