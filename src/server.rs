//! HTTP surface: job submission plus read-only polling routes.

use crate::entities::JobStatus;
use crate::pipeline::{JobPipeline, SubmitRequest};
use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<JobPipeline>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    pub job_id: Uuid,
    pub status: JobStatus,
    pub url_count: usize,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

pub fn build_router(pipeline: Arc<JobPipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/parse-sitemap",
            post(parse_sitemap)
                .options(preflight)
                .fallback(method_not_allowed),
        )
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/urls", get(get_job_urls))
        .layer(Extension(AppState { pipeline }))
        .layer(cors)
}

pub async fn serve(bind: &str, pipeline: Arc<JobPipeline>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, build_router(pipeline)).await
}

/// Creates the records, expands the sitemap inline and leaves metadata
/// fetching to a background task.
async fn parse_sitemap(
    Extension(state): Extension<AppState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let submission = match state.pipeline.submit(request).await {
        Ok(submission) => submission,
        Err(e) if e.is_client_error() => {
            return error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            tracing::error!("Could not create job: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };
    let job_id = submission.job.id;

    let (status, url_count) = match state.pipeline.expand_stage(&submission).await {
        Ok(expanded) => {
            let url_count = expanded.urls.len();
            state
                .pipeline
                .clone()
                .spawn_processing(submission, expanded);
            (JobStatus::Processing, url_count)
        }
        Err(e) => {
            let outcome = state.pipeline.finalize(&submission.job, Err(e)).await;
            (outcome.status, 0)
        }
    };

    (
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            success: status != JobStatus::Failed,
            job_id,
            status,
            url_count,
        }),
    )
        .into_response()
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

async fn get_job(Extension(state): Extension<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.pipeline.store().get_job(id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Job {id} not found")),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Entries written by this job, whether or not a newer run has since
/// superseded them.
async fn get_job_urls(Extension(state): Extension<AppState>, Path(id): Path<Uuid>) -> Response {
    let store = state.pipeline.store();
    match store.get_job(id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(StatusCode::NOT_FOUND, format!("Job {id} not found")),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }

    match store.job_url_entries(id).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
