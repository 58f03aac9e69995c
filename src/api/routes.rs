//! HTTP route handlers (spec §6). Auth/RBAC and the upstream REST client are
//! explicitly out of scope (spec §1) — these handlers assume an upstream
//! layer (reverse proxy, gateway) has already authenticated the caller and
//! simply trust `tenant_id`/`user_id` as supplied.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::Event;
use axum::response::{Json, Sse};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::models::JobStatus;
use crate::domain::EngineError;

use super::dto::{
    ConfirmResponse, DeleteJobsRequest, DeleteJobsResponse, GraphPhase, GraphResponse, JobListEntry, JobStatusResponse,
    PlanRequest, PlanResponse,
};
use super::error::{ApiError, ApiResult};
use super::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", get(list_jobs).delete(delete_jobs))
        .route("/jobs/{job_id}/status", get(job_status))
        .route("/jobs/{job_id}/stream", get(job_stream))
        .route("/jobs/{job_id}/cancel", post(cancel_job))
        .route("/{workflow}/plan", post(plan))
        .route("/{workflow}/{job_id}/plan", get(plan_status))
        .route("/{workflow}/{job_id}/confirm", post(confirm))
        .route("/{workflow}/{job_id}/graph", get(graph))
        .with_state(state)
}

async fn plan(Path(workflow): Path<String>, State(state): State<AppState>, Json(req): Json<PlanRequest>) -> ApiResult<Json<PlanResponse>> {
    let job_id = Uuid::new_v4().to_string();
    let mut job = state
        .scheduler
        .create_job(job_id.clone(), req.user_id, req.venue_id, req.tenant_id, workflow, req.options, req.input_data)
        .await
        .map_err(ApiError::from)?;

    Arc::clone(&state.scheduler).spawn_validation(job.job_id.clone());
    job.status = JobStatus::Validating;
    Ok(Json(PlanResponse::from(job)))
}

async fn plan_status(
    Path((_workflow, job_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<PlanResponse>> {
    let job = state
        .state_store
        .load_job(&job_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::from(EngineError::JobNotFound(job_id.clone())))?;
    Ok(Json(PlanResponse::from(job)))
}

async fn confirm(Path((_workflow, job_id)): Path<(String, String)>, State(state): State<AppState>) -> ApiResult<Json<ConfirmResponse>> {
    Arc::clone(&state.scheduler).confirm(&job_id).await.map_err(ApiError::from)?;
    let job = state
        .state_store
        .load_job(&job_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::from(EngineError::JobNotFound(job_id.clone())))?;
    Ok(Json(ConfirmResponse { job_id: job.job_id, status: job.status }))
}

async fn graph(Path((workflow, _job_id)): Path<(String, String)>, State(state): State<AppState>) -> ApiResult<Json<GraphResponse>> {
    let workflow = state.registry.workflow(&workflow).map_err(ApiError::from)?;
    let dag = workflow.build_graph().map_err(ApiError::from)?;
    Ok(Json(GraphResponse {
        workflow_name: workflow.name.clone(),
        phases: dag.phases().map(GraphPhase::from).collect(),
        levels: dag.levels(),
    }))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    tenant_id: String,
}

async fn list_jobs(State(state): State<AppState>, Query(query): Query<ListJobsQuery>) -> ApiResult<Json<Vec<JobListEntry>>> {
    let job_ids = state.state_store.list_job_ids(&query.tenant_id).await.map_err(ApiError::from)?;
    let mut jobs = Vec::with_capacity(job_ids.len());
    for job_id in job_ids {
        if let Some(job) = state.state_store.load_job(&job_id).await.map_err(ApiError::from)? {
            jobs.push(JobListEntry::from(&job));
        }
    }
    Ok(Json(jobs))
}

async fn job_status(Path(job_id): Path<String>, State(state): State<AppState>) -> ApiResult<Json<JobStatusResponse>> {
    let job = state
        .state_store
        .load_job(&job_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::from(EngineError::JobNotFound(job_id.clone())))?;
    Ok(Json(JobStatusResponse::from(&job)))
}

async fn job_stream(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Sse<impl futures::Stream<Item = Result<Event, std::convert::Infallible>>>> {
    state
        .state_store
        .load_job(&job_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::from(EngineError::JobNotFound(job_id.clone())))?;

    let rx = state.event_bus.subscribe();
    Ok(super::sse::job_event_stream(job_id, rx, state.config.sse_keepalive_s))
}

async fn cancel_job(Path(job_id): Path<String>, State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.scheduler.cancel(&job_id).await.map_err(ApiError::from)?;
    Ok(StatusCode::ACCEPTED)
}

/// Admin-only per spec §6 — auth enforcement lives upstream of this crate;
/// this handler trusts it has already happened.
async fn delete_jobs(State(state): State<AppState>, Json(req): Json<DeleteJobsRequest>) -> ApiResult<Json<DeleteJobsResponse>> {
    let mut deleted = Vec::with_capacity(req.job_ids.len());
    for job_id in req.job_ids {
        state.state_store.delete_job(&job_id).await.map_err(ApiError::from)?;
        deleted.push(job_id);
    }
    Ok(Json(DeleteJobsResponse { deleted }))
}
