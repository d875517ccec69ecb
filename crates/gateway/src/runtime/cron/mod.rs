//! Cron scheduler — tick loop, schedule resolution, misfire handling,
//! lease-guarded execution, and workflow DAGs.
//!
//! The tick runs on its own task every second; correctness does not
//! depend on tick granularity. Each tick reads one consistent snapshot,
//! computes `next_run_at` for every job, skips misfires beyond their
//! grace, writes the merged state back in one transaction, and spawns
//! an execution per due job.

pub mod execute;
pub mod lease;
pub mod schedule;
pub mod workflow;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use nx_domain::error::{Error, Result};
use nx_domain::state::{
    CronDispatch, CronJobSpec, CronJobState, CronRunStatus, CronRuntime, CronSchedule,
    CronTaskType, DispatchTarget, ScheduleKind, DEFAULT_CRON_JOB_ID,
};
use nx_store::StateStore;

use super::channels::{ChannelDispatcher, CHANNEL_TYPES};
use super::Engine;

/// Tick period of the scheduler loop.
const TICK_PERIOD: std::time::Duration = std::time::Duration::from_secs(1);

pub struct CronScheduler {
    pub(crate) engine: Arc<Engine>,
    pub(crate) channels: Arc<ChannelDispatcher>,
    pub(crate) leases_root: PathBuf,
    cancel: CancellationToken,
}

impl CronScheduler {
    pub fn new(
        engine: Arc<Engine>,
        channels: Arc<ChannelDispatcher>,
        leases_root: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            channels,
            leases_root,
            cancel,
        }
    }

    fn store(&self) -> &StateStore {
        &self.engine.store
    }

    /// Run the tick loop until the process-global token cancels.
    /// In-flight executions finish within their own timeouts.
    pub fn spawn_tick_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.clone().tick(Utc::now()).await;
                    }
                }
            }
            tracing::info!("cron scheduler stopped");
        })
    }

    /// One scheduler pass: resolve every job, persist the merged state,
    /// spawn executions for due jobs.
    pub async fn tick(self: Arc<Self>, now: DateTime<Utc>) {
        let due = self.plan_tick(now);
        for job in due {
            let this = self.clone();
            tokio::spawn(async move {
                this.execute(job).await;
            });
        }
    }

    /// Steps 1–3 of the tick protocol. Returns the jobs to fire.
    pub(crate) fn plan_tick(&self, now: DateTime<Utc>) -> Vec<CronJobSpec> {
        // 1. Consistent snapshot.
        let (jobs, states) = self.store().read(|doc| {
            (
                doc.cron_jobs.values().cloned().collect::<Vec<_>>(),
                doc.cron_states.clone(),
            )
        });

        // 2. Per-job resolution.
        struct Patch {
            next_run_at: Option<DateTime<Utc>>,
            failure: Option<String>,
        }
        let mut patches: HashMap<String, Patch> = HashMap::new();
        let mut due_jobs = Vec::new();

        for job in &jobs {
            let state = states.get(&job.id).cloned().unwrap_or_default();

            if !job.enabled || state.paused {
                patches.insert(
                    job.id.clone(),
                    Patch {
                        next_run_at: None,
                        failure: None,
                    },
                );
                continue;
            }

            match schedule::resolve_next_run_at(job, state.next_run_at, now) {
                Err(e) => {
                    patches.insert(
                        job.id.clone(),
                        Patch {
                            next_run_at: None,
                            failure: Some(e),
                        },
                    );
                }
                Ok((next, due)) => {
                    let mut failure = None;
                    if let Some(due_at) = due {
                        let grace = job.runtime.misfire_grace_seconds;
                        let late = (now - due_at).num_seconds().max(0) as u64;
                        // grace == 0 means "never skip".
                        if grace > 0 && late > grace {
                            failure = Some(format!(
                                "misfire skipped: scheduled_at={}",
                                due_at.to_rfc3339()
                            ));
                        } else {
                            due_jobs.push(job.clone());
                        }
                    }
                    patches.insert(
                        job.id.clone(),
                        Patch {
                            next_run_at: next,
                            failure,
                        },
                    );
                }
            }
        }

        // 3. Merge back in one transaction, reconciling the key sets:
        // every job has a state row, no state row without a job.
        let write = self.store().write(|doc| {
            let job_ids: std::collections::HashSet<String> =
                doc.cron_jobs.keys().cloned().collect();
            doc.cron_states.retain(|id, _| job_ids.contains(id));
            for id in job_ids {
                let state = doc.cron_states.entry(id.clone()).or_default();
                if let Some(patch) = patches.get(&id) {
                    state.next_run_at = patch.next_run_at;
                    if let Some(failure) = &patch.failure {
                        state.last_status = Some(CronRunStatus::Failed);
                        state.last_error = Some(failure.clone());
                        tracing::warn!(job_id = %id, error = %failure, "cron job skipped");
                    }
                }
            }
            Ok(())
        });
        if let Err(e) = write {
            tracing::error!(error = %e, "cron tick failed to persist state");
            return Vec::new();
        }

        due_jobs
    }

    /// Manual trigger (`POST /cron/jobs/{id}/run`). Acquires the lease
    /// synchronously so concurrency violations surface to the caller,
    /// then runs in the background.
    pub async fn run_now(self: Arc<Self>, job_id: &str) -> Result<()> {
        let job = self
            .store()
            .read(|doc| doc.cron_jobs.get(job_id).cloned())
            .ok_or_else(|| Error::CronJobNotFound(job_id.to_string()))?;

        let lease = self.try_begin(&job)?;
        let this = self.clone();
        tokio::spawn(async move {
            this.run_with_lease(job, lease).await;
        });
        Ok(())
    }

    /// Pause a job: no further firing until resumed.
    pub fn pause(&self, job_id: &str) -> Result<()> {
        self.set_paused(job_id, true)
    }

    pub fn resume(&self, job_id: &str) -> Result<()> {
        self.set_paused(job_id, false)
    }

    fn set_paused(&self, job_id: &str, paused: bool) -> Result<()> {
        self.store().write(|doc| {
            if !doc.cron_jobs.contains_key(job_id) {
                return Err(Error::CronJobNotFound(job_id.to_string()));
            }
            let state = doc.cron_states.entry(job_id.to_string()).or_default();
            state.paused = paused;
            state.last_status = Some(if paused {
                CronRunStatus::Paused
            } else {
                CronRunStatus::Resumed
            });
            if paused {
                state.next_run_at = None;
            }
            Ok(())
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a job spec before it is written.
pub fn validate_job(job: &CronJobSpec) -> Result<()> {
    if job.id.trim().is_empty() {
        return Err(Error::InvalidCronSchedule("job id must not be empty".into()));
    }

    match job.schedule.kind {
        ScheduleKind::Interval => {
            schedule::parse_interval(&job.schedule.cron).map_err(Error::InvalidCronSchedule)?;
        }
        ScheduleKind::Cron => {
            schedule::validate_cron_expr(&job.schedule.cron)
                .map_err(Error::InvalidCronSchedule)?;
            schedule::validate_timezone(&job.schedule.timezone)
                .map_err(Error::InvalidCronSchedule)?;
        }
    }

    if job.runtime.max_concurrency < 1 {
        return Err(Error::InvalidCronSchedule(
            "max_concurrency must be at least 1".into(),
        ));
    }
    if job.runtime.timeout_seconds < 1 {
        return Err(Error::InvalidCronSchedule(
            "timeout_seconds must be at least 1".into(),
        ));
    }

    match job.task_type {
        CronTaskType::Text => {
            if job.text.trim().is_empty() {
                return Err(Error::InvalidCronTaskType(
                    "text task requires non-empty text".into(),
                ));
            }
            if job.workflow.is_some() {
                return Err(Error::InvalidCronTaskType(
                    "text task must not carry a workflow".into(),
                ));
            }
        }
        CronTaskType::Workflow => {
            if !job.text.trim().is_empty() {
                return Err(Error::InvalidCronTaskType(
                    "workflow task must not carry text".into(),
                ));
            }
            let spec = job.workflow.as_ref().ok_or_else(|| {
                Error::InvalidCronTaskType("workflow task requires a workflow".into())
            })?;
            workflow::validate_workflow(spec).map_err(Error::InvalidCronWorkflow)?;
        }
    }

    if !CHANNEL_TYPES.contains(&job.dispatch.channel.as_str()) {
        return Err(Error::ChannelNotSupported(job.dispatch.channel.clone()));
    }

    Ok(())
}

/// Seed the protected default job (disabled, hourly heartbeat) if it is
/// not present, together with its state row.
pub fn seed_default_job(store: &StateStore) -> Result<()> {
    store.write(|doc| {
        if !doc.cron_jobs.contains_key(DEFAULT_CRON_JOB_ID) {
            doc.cron_jobs.insert(
                DEFAULT_CRON_JOB_ID.to_string(),
                CronJobSpec {
                    id: DEFAULT_CRON_JOB_ID.to_string(),
                    name: "Default job".into(),
                    enabled: false,
                    schedule: CronSchedule {
                        kind: ScheduleKind::Interval,
                        cron: "1h".into(),
                        timezone: String::new(),
                    },
                    task_type: CronTaskType::Text,
                    text: "Scheduled check-in".into(),
                    workflow: None,
                    dispatch: CronDispatch {
                        channel: "console".into(),
                        target: DispatchTarget {
                            user_id: "system".into(),
                            session_id: "cron-default".into(),
                        },
                        mode: String::new(),
                        meta: serde_json::Map::new(),
                    },
                    runtime: CronRuntime::default(),
                    meta: serde_json::Map::new(),
                },
            );
            tracing::info!(job_id = DEFAULT_CRON_JOB_ID, "default cron job seeded");
        }
        doc.cron_states
            .entry(DEFAULT_CRON_JOB_ID.to_string())
            .or_insert_with(CronJobState::default);
        Ok(())
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use nx_domain::config::Config;
    use nx_domain::state::{CronWorkflowSpec, WorkflowEdge, WorkflowNode, WorkflowNodeType};
    use nx_tools::ToolRegistry;

    pub(crate) fn scheduler() -> (tempfile::TempDir, Arc<CronScheduler>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::open(dir.path().join("state.json")).unwrap());
        let engine = Arc::new(Engine::new(
            Arc::new(Config::default()),
            store,
            Arc::new(ToolRegistry::new()),
        ));
        let channels = Arc::new(ChannelDispatcher::new(engine.clone()));
        let cron = Arc::new(CronScheduler::new(
            engine,
            channels,
            dir.path().join("cron-leases"),
            CancellationToken::new(),
        ));
        (dir, cron)
    }

    pub(crate) fn text_job(id: &str, cron: &str) -> CronJobSpec {
        CronJobSpec {
            id: id.into(),
            name: id.into(),
            enabled: true,
            schedule: CronSchedule {
                kind: ScheduleKind::Interval,
                cron: cron.into(),
                timezone: String::new(),
            },
            task_type: CronTaskType::Text,
            text: "tick".into(),
            workflow: None,
            dispatch: CronDispatch {
                channel: "console".into(),
                target: DispatchTarget {
                    user_id: "u".into(),
                    session_id: "s2".into(),
                },
                mode: String::new(),
                meta: serde_json::Map::new(),
            },
            runtime: CronRuntime::default(),
            meta: serde_json::Map::new(),
        }
    }

    pub(crate) fn insert_job(cron: &CronScheduler, job: &CronJobSpec) {
        cron.store()
            .write(|doc| {
                doc.cron_jobs.insert(job.id.clone(), job.clone());
                doc.cron_states
                    .entry(job.id.clone())
                    .or_insert_with(CronJobState::default);
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn tick_reconciles_state_rows() {
        let (_dir, cron) = scheduler();
        insert_job(&cron, &text_job("j1", "60s"));
        // Orphan state row and missing state row.
        cron.store()
            .write(|doc| {
                doc.cron_states.insert("ghost".into(), CronJobState::default());
                doc.cron_states.remove("j1");
                doc.cron_jobs.insert("j2".into(), text_job("j2", "60s"));
                Ok(())
            })
            .unwrap();

        cron.plan_tick(Utc::now());

        cron.store().read(|doc| {
            let mut job_ids: Vec<&String> = doc.cron_jobs.keys().collect();
            let mut state_ids: Vec<&String> = doc.cron_states.keys().collect();
            job_ids.sort();
            state_ids.sort();
            assert_eq!(job_ids, state_ids);
        });
    }

    #[tokio::test]
    async fn first_tick_sets_next_run_without_firing() {
        let (_dir, cron) = scheduler();
        insert_job(&cron, &text_job("j1", "60s"));

        let now = Utc::now();
        let due = cron.plan_tick(now);
        assert!(due.is_empty());

        let next = cron
            .store()
            .read(|doc| doc.cron_states["j1"].next_run_at)
            .unwrap();
        assert!(next > now);
    }

    #[tokio::test]
    async fn elapsed_next_run_marks_job_due() {
        let (_dir, cron) = scheduler();
        insert_job(&cron, &text_job("j1", "60s"));

        let now = Utc::now();
        cron.plan_tick(now);
        // Advance the clock past the interval.
        let later = now + chrono::Duration::seconds(65);
        let due = cron.plan_tick(later);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "j1");

        let next = cron
            .store()
            .read(|doc| doc.cron_states["j1"].next_run_at)
            .unwrap();
        assert!(next > later, "next_run_at advanced past the tick time");
    }

    #[tokio::test]
    async fn paused_job_clears_next_run() {
        let (_dir, cron) = scheduler();
        insert_job(&cron, &text_job("j1", "60s"));
        cron.plan_tick(Utc::now());
        cron.pause("j1").unwrap();
        cron.plan_tick(Utc::now());

        cron.store().read(|doc| {
            let state = &doc.cron_states["j1"];
            assert!(state.next_run_at.is_none());
            assert!(state.paused);
        });
    }

    #[tokio::test]
    async fn disabled_job_clears_next_run() {
        let (_dir, cron) = scheduler();
        let mut job = text_job("j1", "60s");
        job.enabled = false;
        insert_job(&cron, &job);
        cron.plan_tick(Utc::now());
        cron.store()
            .read(|doc| assert!(doc.cron_states["j1"].next_run_at.is_none()));
    }

    #[tokio::test]
    async fn misfire_beyond_grace_is_skipped_and_marked_failed() {
        let (_dir, cron) = scheduler();
        let mut job = text_job("j1", "60s");
        job.runtime.misfire_grace_seconds = 5;
        insert_job(&cron, &job);

        let now = Utc::now();
        let missed = now - chrono::Duration::seconds(30);
        cron.store()
            .write(|doc| {
                doc.cron_states.get_mut("j1").unwrap().next_run_at = Some(missed);
                Ok(())
            })
            .unwrap();

        let due = cron.plan_tick(now);
        assert!(due.is_empty(), "misfired job must not fire");

        cron.store().read(|doc| {
            let state = &doc.cron_states["j1"];
            assert_eq!(state.last_status, Some(CronRunStatus::Failed));
            let err = state.last_error.as_deref().unwrap();
            assert!(err.starts_with("misfire skipped: scheduled_at="));
        });
    }

    #[tokio::test]
    async fn misfire_with_zero_grace_never_skips() {
        let (_dir, cron) = scheduler();
        let job = text_job("j1", "60s"); // grace defaults to 0
        insert_job(&cron, &job);

        let now = Utc::now();
        cron.store()
            .write(|doc| {
                doc.cron_states.get_mut("j1").unwrap().next_run_at =
                    Some(now - chrono::Duration::hours(6));
                Ok(())
            })
            .unwrap();

        let due = cron.plan_tick(now);
        assert_eq!(due.len(), 1, "grace 0 means never skip");
    }

    #[tokio::test]
    async fn misfire_within_grace_fires() {
        let (_dir, cron) = scheduler();
        let mut job = text_job("j1", "60s");
        job.runtime.misfire_grace_seconds = 120;
        insert_job(&cron, &job);

        let now = Utc::now();
        cron.store()
            .write(|doc| {
                doc.cron_states.get_mut("j1").unwrap().next_run_at =
                    Some(now - chrono::Duration::seconds(30));
                Ok(())
            })
            .unwrap();

        assert_eq!(cron.plan_tick(now).len(), 1);
    }

    #[tokio::test]
    async fn run_now_unknown_job_errors() {
        let (_dir, cron) = scheduler();
        let err = cron.clone().run_now("nope").await.unwrap_err();
        assert_eq!(err.code(), "cron_job_not_found");
    }

    // ── validate_job ─────────────────────────────────────────────────

    #[test]
    fn validate_job_accepts_text_job() {
        assert!(validate_job(&text_job("j1", "60s")).is_ok());
    }

    #[test]
    fn validate_job_rejects_bad_interval() {
        let job = text_job("j1", "banana");
        assert_eq!(
            validate_job(&job).unwrap_err().code(),
            "invalid_cron_schedule"
        );
    }

    #[test]
    fn validate_job_rejects_text_with_workflow() {
        let mut job = text_job("j1", "60s");
        job.workflow = Some(CronWorkflowSpec {
            version: "v1".into(),
            nodes: vec![],
            edges: vec![],
        });
        assert_eq!(
            validate_job(&job).unwrap_err().code(),
            "invalid_cron_task_type"
        );
    }

    #[test]
    fn validate_job_rejects_empty_text() {
        let mut job = text_job("j1", "60s");
        job.text = String::new();
        assert_eq!(
            validate_job(&job).unwrap_err().code(),
            "invalid_cron_task_type"
        );
    }

    #[test]
    fn validate_job_rejects_workflow_violations() {
        let mut job = text_job("j1", "60s");
        job.task_type = CronTaskType::Workflow;
        job.text = String::new();
        job.workflow = Some(CronWorkflowSpec {
            version: "v1".into(),
            nodes: vec![WorkflowNode {
                id: "start".into(),
                kind: WorkflowNodeType::Start,
                text: String::new(),
                delay_seconds: 0,
                if_condition: String::new(),
                continue_on_error: false,
            }],
            edges: vec![WorkflowEdge {
                from: "start".into(),
                to: "start".into(),
            }],
        });
        assert_eq!(
            validate_job(&job).unwrap_err().code(),
            "invalid_cron_workflow"
        );
    }

    #[test]
    fn validate_job_rejects_unknown_channel() {
        let mut job = text_job("j1", "60s");
        job.dispatch.channel = "telegram".into();
        assert_eq!(
            validate_job(&job).unwrap_err().code(),
            "channel_not_supported"
        );
    }

    #[test]
    fn validate_job_rejects_zero_concurrency() {
        let mut job = text_job("j1", "60s");
        job.runtime.max_concurrency = 0;
        assert!(validate_job(&job).is_err());
    }

    #[test]
    fn seed_default_job_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.json")).unwrap();
        seed_default_job(&store).unwrap();
        seed_default_job(&store).unwrap();
        store.read(|doc| {
            let job = &doc.cron_jobs[DEFAULT_CRON_JOB_ID];
            assert!(!job.enabled);
            assert!(doc.cron_states.contains_key(DEFAULT_CRON_JOB_ID));
        });
    }
}
