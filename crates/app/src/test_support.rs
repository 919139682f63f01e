//! Shared fixtures for handler and worker tests.

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use collections_core::{CollectionId, CompanyId, TransferJob};
use collections_storage::Database;
use collections_util::TransferSettings;

use crate::router::AppState;
use crate::telemetry;
use crate::transfer::TransferWorker;

pub async fn setup_state() -> (AppState, TransferWorker) {
    setup_state_with(TransferSettings::default()).await
}

pub async fn setup_state_with(settings: TransferSettings) -> (AppState, TransferWorker) {
    let metrics = telemetry::init_metrics().expect("metrics init");
    let database = Database::connect("sqlite::memory:")
        .await
        .expect("connect");
    database.run_migrations().await.expect("migrations");
    AppState::new(metrics, database, settings)
}

pub async fn seed_companies(database: &Database, count: usize) -> Vec<CompanyId> {
    let repo = database.companies();
    let mut ids = Vec::with_capacity(count);
    for n in 1..=count {
        ids.push(
            repo.create(&format!("Company {n}"), Utc::now())
                .await
                .expect("create company"),
        );
    }
    ids
}

pub async fn seed_collection(
    database: &Database,
    name: &str,
    members: &[CompanyId],
) -> CollectionId {
    let collection = database
        .collections()
        .create(name, Utc::now())
        .await
        .expect("create collection");
    let repo = database.associations();
    let mut tx = repo.begin().await.expect("begin");
    repo.insert_ignoring_duplicates(&mut tx, &collection.id, members, Utc::now())
        .await
        .expect("insert members");
    tx.commit().await.expect("commit");
    collection.id
}

pub async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request");
    send(app, request).await
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");
    send(app, request).await
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("handler should respond");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should read")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, value)
}

/// Polls the status endpoint until the job reaches a terminal state.
///
/// Returns every snapshot observed, the terminal one last.
pub async fn poll_until_terminal(app: Router, job_id: &str) -> Vec<TransferJob> {
    let uri = format!("/collections/transfer-status/{job_id}");
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut seen = Vec::new();
        loop {
            let (status, body) = get_json(app.clone(), &uri).await;
            assert_eq!(status, StatusCode::OK, "status poll failed: {body}");
            let job: TransferJob = serde_json::from_value(body).expect("decode job");
            let done = job.is_terminal();
            seen.push(job);
            if done {
                break seen;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("transfer finished in time")
}
