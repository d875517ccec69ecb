//! Job execution: lease acquisition, timeout enforcement, text tasks,
//! and workflow runs.

use chrono::Utc;

use nx_domain::error::{Error, Result};
use nx_domain::state::{
    CronExecution, CronJobSpec, CronRunStatus, CronTaskType, NodeExecution, NodeRunStatus,
    WorkflowNodeType,
};

use super::lease::{self, LeaseHandle};
use super::workflow::{self, ConditionCtx};
use super::CronScheduler;

impl CronScheduler {
    /// Tick-path execution: acquire a slot, run, record. Concurrency
    /// exhaustion is already recorded by [`CronScheduler::try_begin`].
    pub(crate) async fn execute(self: std::sync::Arc<Self>, job: CronJobSpec) {
        match self.try_begin(&job) {
            Ok(lease) => self.run_with_lease(job, lease).await,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "cron job did not start");
            }
        }
    }

    /// Acquire one concurrency slot for the job. On exhaustion the
    /// failure is recorded in the job state before the error returns.
    pub(crate) fn try_begin(&self, job: &CronJobSpec) -> Result<LeaseHandle> {
        let ttl = lease::lease_ttl(job.runtime.timeout_seconds);
        let owner = format!("nextai-{}", std::process::id());
        match lease::acquire(
            &self.leases_root,
            &job.id,
            job.runtime.max_concurrency,
            ttl,
            &owner,
        ) {
            Ok(handle) => Ok(handle),
            Err(e @ Error::CronMaxConcurrencyReached(_)) => {
                let message = e.to_string();
                let write = self.engine.store.write(|doc| {
                    let state = doc.cron_states.entry(job.id.clone()).or_default();
                    state.last_status = Some(CronRunStatus::Failed);
                    state.last_error = Some(message.clone());
                    Ok(())
                });
                if let Err(we) = write {
                    tracing::error!(job_id = %job.id, error = %we, "failed to record concurrency failure");
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Run the job under an acquired lease, bounded by its timeout.
    pub(crate) async fn run_with_lease(&self, job: CronJobSpec, lease: LeaseHandle) {
        let started = Utc::now();
        tracing::info!(job_id = %job.id, slot = lease.slot, "cron job started");

        let begin = self.engine.store.write(|doc| {
            let state = doc.cron_states.entry(job.id.clone()).or_default();
            state.last_run_at = Some(started);
            state.last_status = Some(CronRunStatus::Running);
            state.last_error = None;
            state.last_execution = Some(CronExecution {
                started_at: started,
                finished_at: None,
                nodes: Vec::new(),
            });
            Ok(())
        });
        if let Err(e) = begin {
            tracing::error!(job_id = %job.id, error = %e, "failed to mark job running");
        }

        let timeout = std::time::Duration::from_secs(job.runtime.timeout_seconds.max(1));
        let outcome = tokio::time::timeout(timeout, self.perform(&job)).await;

        let (nodes, error) = match outcome {
            Ok((nodes, error)) => (nodes, error),
            Err(_) => (
                Vec::new(),
                Some(format!(
                    "cron execution timeout after {}s",
                    job.runtime.timeout_seconds
                )),
            ),
        };

        let status = if error.is_none() {
            CronRunStatus::Succeeded
        } else {
            CronRunStatus::Failed
        };

        let finish = self.engine.store.write(|doc| {
            let state = doc.cron_states.entry(job.id.clone()).or_default();
            state.last_status = Some(status);
            state.last_error = error.clone();
            if let Some(exec) = state.last_execution.as_mut() {
                exec.finished_at = Some(Utc::now());
                exec.nodes = nodes.clone();
            }
            Ok(())
        });
        if let Err(e) = finish {
            tracing::error!(job_id = %job.id, error = %e, "failed to record job result");
        }

        lease::release(&lease);
        match &error {
            None => tracing::info!(job_id = %job.id, "cron job succeeded"),
            Some(err) => tracing::warn!(job_id = %job.id, error = %err, "cron job failed"),
        }
    }

    /// Run the task body. Returns the node records (empty for text
    /// tasks) and the failure cause, if any.
    async fn perform(&self, job: &CronJobSpec) -> (Vec<NodeExecution>, Option<String>) {
        match job.task_type {
            CronTaskType::Text => {
                let result = self
                    .channels
                    .send_text(
                        &job.dispatch.channel,
                        &job.dispatch.target.user_id,
                        &job.dispatch.target.session_id,
                        &job.text,
                    )
                    .await;
                (Vec::new(), result.err().map(|e| e.to_string()))
            }
            CronTaskType::Workflow => match &job.workflow {
                Some(spec) => self.run_workflow(job, spec).await,
                None => (
                    Vec::new(),
                    Some("workflow task has no workflow".to_string()),
                ),
            },
        }
    }

    /// Execute the workflow path node by node.
    async fn run_workflow(
        &self,
        job: &CronJobSpec,
        spec: &nx_domain::state::CronWorkflowSpec,
    ) -> (Vec<NodeExecution>, Option<String>) {
        let path = match workflow::linearize(spec) {
            Ok(p) => p,
            Err(e) => return (Vec::new(), Some(format!("invalid workflow: {e}"))),
        };

        let ctx = ConditionCtx::from_job(job);
        let mut records: Vec<NodeExecution> = Vec::with_capacity(path.len());
        let mut halted = false;
        let mut first_error: Option<String> = None;

        for node in path {
            if halted {
                records.push(NodeExecution {
                    id: node.id.clone(),
                    kind: node.kind,
                    status: NodeRunStatus::Skipped,
                    started_at: None,
                    finished_at: None,
                    error: None,
                });
                continue;
            }

            let started = Utc::now();
            let result: std::result::Result<bool, String> = match node.kind {
                WorkflowNodeType::Start => Ok(true),
                WorkflowNodeType::TextEvent => self
                    .channels
                    .send_text(
                        &job.dispatch.channel,
                        &job.dispatch.target.user_id,
                        &job.dispatch.target.session_id,
                        &node.text,
                    )
                    .await
                    .map(|_| true)
                    .map_err(|e| e.to_string()),
                WorkflowNodeType::Delay => {
                    tokio::time::sleep(std::time::Duration::from_secs(node.delay_seconds)).await;
                    Ok(true)
                }
                WorkflowNodeType::IfEvent => workflow::eval_condition(&node.if_condition, &ctx),
            };

            match result {
                Ok(proceed) => {
                    records.push(NodeExecution {
                        id: node.id.clone(),
                        kind: node.kind,
                        status: NodeRunStatus::Succeeded,
                        started_at: Some(started),
                        finished_at: Some(Utc::now()),
                        error: None,
                    });
                    if !proceed {
                        // Condition false: the rest of the path is skipped.
                        halted = true;
                    }
                }
                Err(e) => {
                    records.push(NodeExecution {
                        id: node.id.clone(),
                        kind: node.kind,
                        status: NodeRunStatus::Failed,
                        started_at: Some(started),
                        finished_at: Some(Utc::now()),
                        error: Some(e.clone()),
                    });
                    if first_error.is_none() {
                        first_error = Some(format!("node '{}': {e}", node.id));
                    }
                    if !node.continue_on_error {
                        halted = true;
                    }
                }
            }
        }

        (records, first_error)
    }
}
