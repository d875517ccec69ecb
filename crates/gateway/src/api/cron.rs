//! Cron job CRUD + pause/resume/run + state endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::{Map, Value};

use nx_domain::error::Error;
use nx_domain::state::{
    CronDispatch, CronJobSpec, CronJobState, CronRuntime, CronSchedule, CronTaskType,
    CronWorkflowSpec, DEFAULT_CRON_JOB_ID,
};

use crate::runtime::cron::{lease, validate_job};
use crate::state::AppState;

use super::{ApiJson, ApiResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CronJobBody {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub schedule: CronSchedule,
    pub task_type: CronTaskType,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub workflow: Option<CronWorkflowSpec>,
    pub dispatch: CronDispatch,
    #[serde(default)]
    pub runtime: CronRuntime,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl CronJobBody {
    fn into_spec(self, id: String) -> CronJobSpec {
        CronJobSpec {
            id,
            name: self.name,
            enabled: self.enabled,
            schedule: self.schedule,
            task_type: self.task_type,
            text: self.text,
            workflow: self.workflow,
            dispatch: self.dispatch,
            runtime: self.runtime,
            meta: self.meta,
        }
    }
}

/// Validate and upsert a job spec, clearing `next_run_at` so the next
/// tick recomputes it against the (possibly changed) schedule.
fn upsert_job(state: &AppState, job: CronJobSpec) -> ApiResult<CronJobSpec> {
    validate_job(&job)?;
    state.store.write(|doc| {
        doc.cron_jobs.insert(job.id.clone(), job.clone());
        let row = doc.cron_states.entry(job.id.clone()).or_insert_with(CronJobState::default);
        row.next_run_at = None;
        Ok(())
    })?;
    tracing::info!(job_id = %job.id, "cron job written");
    Ok(job)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CRUD
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    let mut jobs: Vec<CronJobSpec> =
        state.store.read(|doc| doc.cron_jobs.values().cloned().collect());
    jobs.sort_by(|a, b| a.id.cmp(&b.id));
    let count = jobs.len();
    Json(serde_json::json!({ "jobs": jobs, "count": count }))
}

pub async fn create_job(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CronJobBody>,
) -> ApiResult<impl IntoResponse> {
    let id = if body.id.trim().is_empty() {
        format!("cron-{}", uuid::Uuid::new_v4())
    } else {
        body.id.clone()
    };
    let job = upsert_job(&state, body.into_spec(id))?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "job": job }))))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let job = state
        .store
        .read(|doc| doc.cron_jobs.get(&id).cloned())
        .ok_or(Error::CronJobNotFound(id))?;
    Ok(Json(serde_json::json!({ "job": job })))
}

pub async fn put_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<CronJobBody>,
) -> ApiResult<impl IntoResponse> {
    let job = upsert_job(&state, body.into_spec(id))?;
    Ok(Json(serde_json::json!({ "job": job })))
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if id == DEFAULT_CRON_JOB_ID {
        return Err(Error::CronDefaultProtected.into());
    }
    state.store.write(|doc| {
        if doc.cron_jobs.remove(&id).is_none() {
            return Err(Error::CronJobNotFound(id.clone()));
        }
        doc.cron_states.remove(&id);
        Ok(())
    })?;
    // Slot files for the removed job are garbage; best-effort cleanup.
    let _ = std::fs::remove_dir_all(lease::job_lease_dir(&state.config.leases_path(), &id));
    Ok(Json(serde_json::json!({ "ok": true })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// pause / resume / run / state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn pause_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.cron.pause(&id)?;
    Ok(Json(serde_json::json!({ "ok": true, "paused": true })))
}

pub async fn resume_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.cron.resume(&id)?;
    Ok(Json(serde_json::json!({ "ok": true, "paused": false })))
}

/// Manual trigger. 202 when the run was admitted; 409 when the
/// concurrency budget is exhausted.
pub async fn run_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.cron.clone().run_now(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "ok": true }))))
}

pub async fn job_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let row = state.store.read(|doc| {
        if !doc.cron_jobs.contains_key(&id) {
            return Err(Error::CronJobNotFound(id.clone()));
        }
        Ok(doc.cron_states.get(&id).cloned().unwrap_or_default())
    })?;
    Ok(Json(serde_json::json!({ "state": row })))
}
