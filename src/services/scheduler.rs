//! The Scheduler ("Brain", spec §4.6): drives a single job from creation
//! through Phase 0 validation, confirmation, and the per-unit/global
//! execution loop to a terminal status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinSet;

use crate::domain::models::{ActivationSlot, DependencyGraph, Job, JobStatus, PhaseStatus, UnitMapping, UnitStatus, ValidationResult};
use crate::domain::ports::{ActivityStatusSource, EventPublisher, ExecutionOutcome, JobEvent, PhaseContext, PhaseExecutor, StateStore};
use crate::domain::{EngineError, EngineResult, PhaseError};
use crate::infrastructure::config::EngineConfig;

use super::activation_gate::ActivationGate;
use super::activity_tracker::{ActivityTracker, ActivityTrackerConfig};
use super::phase_context::EngineContext;
use super::registry::WorkflowRegistry;

const TICK_INTERVAL: Duration = Duration::from_millis(150);
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Runs `executor.execute` up to `max_attempts` times, backing off
/// exponentially between attempts (spec §7 item 3) as long as the failure is
/// marked `retryable`. `base_s` is the backoff multiplier — validated at
/// config load time to be `> 1.0` so each wait is strictly longer than the
/// last — applied to a 1s initial interval.
async fn execute_with_retry(
    executor: &Arc<dyn PhaseExecutor>,
    ctx: &dyn PhaseContext,
    max_attempts: u32,
    base_s: f64,
) -> Result<ExecutionOutcome, PhaseError> {
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_secs(1))
        .with_multiplier(base_s)
        .with_max_elapsed_time(None)
        .build();

    let mut attempt: u32 = 1;
    loop {
        match executor.execute(ctx).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) if err.retryable && attempt < max_attempts.max(1) => {
                let delay = backoff.next_backoff().unwrap_or_else(|| Duration::from_secs(1));
                tracing::warn!(
                    attempt,
                    max_attempts,
                    error = %err.message,
                    delay_ms = delay.as_millis() as u64,
                    "phase execution failed, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

struct WorkerOutcome {
    unit_id: String,
    phase_id: String,
    critical: bool,
    activation_slot: ActivationSlot,
    outcome: Result<HashMap<String, Value>, String>,
}

pub struct Scheduler {
    registry: Arc<WorkflowRegistry>,
    state_store: Arc<dyn StateStore>,
    event_publisher: Arc<dyn EventPublisher>,
    activity_source: Arc<dyn ActivityStatusSource>,
    config: EngineConfig,
}

impl Scheduler {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        state_store: Arc<dyn StateStore>,
        event_publisher: Arc<dyn EventPublisher>,
        activity_source: Arc<dyn ActivityStatusSource>,
        config: EngineConfig,
    ) -> Self {
        Self { registry, state_store, event_publisher, activity_source, config }
    }

    /// Step 1 (spec §4.6): builds and persists a new job in `PENDING`.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_job(
        &self,
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        venue_id: impl Into<String>,
        tenant_id: impl Into<String>,
        workflow_name: impl Into<String>,
        options: HashMap<String, Value>,
        input_data: Value,
    ) -> EngineResult<Job> {
        let workflow_name = workflow_name.into();
        let workflow = self.registry.workflow(&workflow_name)?;
        let mut merged_options = workflow.default_options.clone();
        merged_options.extend(options);

        let job = Job::new(
            job_id,
            user_id,
            venue_id,
            tenant_id,
            workflow_name,
            workflow.phases.clone(),
            merged_options,
            input_data,
            Utc::now(),
        );
        self.state_store.save_job(&job).await?;
        Ok(job)
    }

    /// Step 2 (spec §4.6): runs the workflow's validate phase, populating
    /// `job.units` and `job.validation`. Idempotent — re-running overwrites.
    pub async fn validate(self: Arc<Self>, job_id: &str) -> EngineResult<Job> {
        let lock = self.state_store.lock_job(job_id).await?;
        let result = self.validate_locked(job_id).await;
        lock.release().await?;
        result
    }

    async fn validate_locked(self: Arc<Self>, job_id: &str) -> EngineResult<Job> {
        let mut job = self.state_store.load_job(job_id).await?.ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
        job.transition(JobStatus::Validating, Utc::now())?;

        let workflow = self.registry.workflow(&job.workflow_name)?.clone();
        let executor = self.registry.executor(&job.workflow_name, &workflow.validate_phase_id)?;

        let tracker = Arc::new(ActivityTracker::new(self.activity_source.clone(), self.activity_tracker_config()));
        let ctx = EngineContext::new(
            job.job_id.clone(),
            None,
            workflow.validate_phase_id.clone(),
            job.options.clone(),
            job.input_data.clone(),
            job.global_phase_results.clone(),
            tracker,
            self.state_store.clone(),
            self.event_publisher.clone(),
        );

        let precheck = executor.validate(&ctx)?;
        if !precheck.valid {
            return Err(EngineError::ValidationFailed(precheck.errors.join("; ")));
        }
        let outcome = executor.execute(&ctx).await;

        match outcome {
            Ok(mut outcome) => {
                let units_value = outcome.outputs.remove("units").unwrap_or(Value::Null);
                let units: HashMap<String, UnitMapping> = serde_json::from_value(units_value)?;
                let validation_value = outcome.outputs.remove("validation").unwrap_or(Value::Null);
                let validation: ValidationResult = serde_json::from_value(validation_value).unwrap_or_default();

                job.units = units;
                job.global_phase_results.extend(outcome.outputs);
                job.global_phase_status.insert(workflow.validate_phase_id.clone(), PhaseStatus::Completed);
                let valid = validation.valid;
                job.validation = Some(validation);

                if !valid {
                    job.errors.push("validation reported blocking conflicts".to_string());
                    job.transition(JobStatus::Failed, Utc::now())?;
                } else if workflow.requires_confirmation {
                    job.transition(JobStatus::AwaitingConfirmation, Utc::now())?;
                } else {
                    job.transition(JobStatus::Running, Utc::now())?;
                }
            }
            Err(err) => {
                job.global_phase_status.insert(workflow.validate_phase_id.clone(), PhaseStatus::Failed);
                job.errors.push(err.message);
                job.transition(JobStatus::Failed, Utc::now())?;
            }
        }

        self.state_store.save_job(&job).await?;
        if job.status == JobStatus::Running {
            let _ = self.event_publisher.publish(JobEvent::JobStarted { job_id: job.job_id.clone() }).await;
            self.spawn_execution(job.job_id.clone());
        }
        Ok(job)
    }

    /// Runs [`Self::validate`] in the background (spec §6 `POST
    /// /{workflow}/plan`): callers get `VALIDATING` back immediately and
    /// poll `plan_status` rather than blocking on Phase 0.
    pub fn spawn_validation(self: Arc<Self>, job_id: String) {
        tokio::spawn(async move {
            if let Err(err) = self.validate(&job_id).await {
                tracing::error!(job_id = %job_id, error = %err, "background validation failed");
            }
        });
    }

    /// Step 3 (spec §4.6): an external confirmation moves the job into
    /// `RUNNING` and starts the execution loop.
    pub async fn confirm(self: Arc<Self>, job_id: &str) -> EngineResult<()> {
        let lock = self.state_store.lock_job(job_id).await?;
        let mut job = match self.state_store.load_job(job_id).await? {
            Some(job) => job,
            None => {
                lock.release().await?;
                return Err(EngineError::JobNotFound(job_id.to_string()));
            }
        };
        if job.status != JobStatus::AwaitingConfirmation {
            lock.release().await?;
            return Err(EngineError::NotAwaitingConfirmation(job_id.to_string()));
        }
        job.transition(JobStatus::Running, Utc::now())?;
        self.state_store.save_job(&job).await?;
        lock.release().await?;
        let _ = self.event_publisher.publish(JobEvent::JobStarted { job_id: job_id.to_string() }).await;
        self.spawn_execution(job_id.to_string());
        Ok(())
    }

    /// Requests cancellation. A job already `RUNNING` is picked up by its
    /// run loop's cancellation tick; a job that hasn't started running yet
    /// (still `PENDING`/`VALIDATING`/`AWAITING_CONFIRMATION`) has no run loop
    /// to notice the flag, so it's transitioned to `CANCELLED` directly here.
    pub async fn cancel(&self, job_id: &str) -> EngineResult<()> {
        self.state_store.request_cancellation(job_id).await?;

        let lock = self.state_store.lock_job(job_id).await?;
        let result = self.cancel_if_not_yet_running(job_id).await;
        lock.release().await?;
        result
    }

    async fn cancel_if_not_yet_running(&self, job_id: &str) -> EngineResult<()> {
        let Some(mut job) = self.state_store.load_job(job_id).await? else {
            return Ok(());
        };
        if job.status.is_terminal() || job.status == JobStatus::Running {
            return Ok(());
        }
        job.transition(JobStatus::Cancelled, Utc::now())?;
        self.state_store.save_job(&job).await?;
        let _ = self.event_publisher.publish(JobEvent::JobCancelled { job_id: job_id.to_string() }).await;
        Ok(())
    }

    fn activity_tracker_config(&self) -> ActivityTrackerConfig {
        ActivityTrackerConfig {
            poll_interval: Duration::from_secs_f64(self.config.activity_poll_interval_s),
            timeout_polls: self.config.activity_timeout_polls,
        }
    }

    fn spawn_execution(self: Arc<Self>, job_id: String) {
        tokio::spawn(async move {
            if let Err(err) = self.run_loop(&job_id).await {
                tracing::error!(job_id = %job_id, error = %err, "scheduler run loop exited with error");
            }
        });
    }

    /// Step 4 (spec §4.6): the main execution loop, run until the job
    /// reaches a terminal status.
    async fn run_loop(self: Arc<Self>, job_id: &str) -> EngineResult<()> {
        let job = self.state_store.load_job(job_id).await?.ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
        let workflow = self.registry.workflow(&job.workflow_name)?.clone();
        let graph = workflow.build_graph()?;

        let activation_gate = Arc::new(ActivationGate::new(workflow.max_activation_slots));
        let activity_tracker = Arc::new(ActivityTracker::new(self.activity_source.clone(), self.activity_tracker_config()));

        let (tracker_stop_tx, tracker_stop_rx) = oneshot::channel();
        let tracker_for_loop = activity_tracker.clone();
        tokio::spawn(async move { tracker_for_loop.run(tracker_stop_rx).await });

        let progress_stop = Self::spawn_progress_loop(self.clone(), job_id.to_string());

        let mut join_set: JoinSet<WorkerOutcome> = JoinSet::new();

        let outcome = loop {
            if self.state_store.is_cancellation_requested(job_id).await? {
                activity_tracker.cancel_all().await;
                // Drain rather than drop: dropping a `JoinSet` aborts every
                // still-running task, which would kill in-flight upstream
                // calls mid-request. Units already dispatched finish and
                // have their outcomes applied before the job is marked
                // cancelled, matching `parallel_map`'s in-flight-completes
                // semantics.
                while let Some(result) = join_set.join_next().await {
                    match result {
                        Ok(outcome) => self.apply_worker_outcome(job_id, outcome, &activation_gate).await?,
                        Err(join_err) => tracing::error!(job_id = %job_id, error = %join_err, "worker task panicked during cancellation drain"),
                    }
                }
                self.finish_cancelled(job_id).await?;
                break JobStatus::Cancelled;
            }

            let mut job = self.state_store.load_job(job_id).await?.ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;

            self.dispatch_ready_global(&mut job, &graph).await?;
            self.dispatch_ready_units(
                &job,
                &graph,
                &activation_gate,
                activity_tracker.clone(),
                &workflow.name,
                &mut join_set,
            )
            .await?;

            while let Some(result) = join_set.try_join_next() {
                match result {
                    Ok(outcome) => self.apply_worker_outcome(job_id, outcome, &activation_gate).await?,
                    Err(join_err) => tracing::error!(job_id = %job_id, error = %join_err, "worker task panicked"),
                }
            }

            let job = self.state_store.load_job(job_id).await?.ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
            if self.is_terminal(&job, &graph) {
                let final_status = job.derive_final_status();
                let mut job = job;
                job.transition(final_status, Utc::now())?;
                self.state_store.save_job(&job).await?;
                let _ = self.event_publisher.publish(JobEvent::JobCompleted {
                    job_id: job_id.to_string(),
                    status: format!("{final_status:?}"),
                }).await;
                break final_status;
            }

            tokio::time::sleep(TICK_INTERVAL).await;
        };

        let _ = tracker_stop_tx.send(());
        let _ = progress_stop.send(());
        tracing::info!(job_id, status = ?outcome, "job reached terminal status");
        Ok(())
    }

    fn is_terminal(&self, job: &Job, graph: &DependencyGraph) -> bool {
        let globals_done = graph
            .phases()
            .filter(|p| !p.per_unit)
            .all(|p| job.global_phase_status.get(&p.id).is_some_and(|s| s.is_terminal()));
        let units_done = !job.units.is_empty() && job.units.values().all(|u| u.status.is_terminal());
        globals_done && units_done
    }

    async fn dispatch_ready_global(&self, job: &mut Job, graph: &DependencyGraph) -> EngineResult<()> {
        let globals_completed = job.globals_completed();
        let Some(phase_id) = graph
            .ready_set(&globals_completed)
            .into_iter()
            .find(|id| !graph.phase(id).expect("ready id is in graph").per_unit)
        else {
            return Ok(());
        };
        let phase = graph.phase(&phase_id).expect("ready id is in graph").clone();

        if let Some(skip_if) = &phase.skip_if {
            if skip_if.evaluate(&job.options, &job.input_data) {
                job.global_phase_status.insert(phase_id, PhaseStatus::Skipped);
                self.state_store.save_job(job).await?;
                return Ok(());
            }
        }

        job.global_phase_status.insert(phase_id.clone(), PhaseStatus::Running);
        self.state_store.save_job(job).await?;
        let _ = self.event_publisher.publish(JobEvent::PhaseStarted {
            job_id: job.job_id.clone(),
            phase_id: phase_id.clone(),
            unit_id: None,
        }).await;

        let executor = self.registry.executor(&job.workflow_name, &phase_id)?;
        let tracker = Arc::new(ActivityTracker::new(self.activity_source.clone(), self.activity_tracker_config()));
        let ctx = EngineContext::new(
            job.job_id.clone(),
            None,
            phase_id.clone(),
            job.options.clone(),
            job.input_data.clone(),
            job.global_phase_results.clone(),
            tracker,
            self.state_store.clone(),
            self.event_publisher.clone(),
        );

        let outcome = match executor.validate(&ctx) {
            Ok(precheck) if !precheck.valid => Err(PhaseError::upstream_fatal(precheck.errors.join("; "))),
            Ok(_) => execute_with_retry(&executor, &ctx, self.config.phase_retry_attempts, self.config.phase_retry_base_s).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(outcome) => {
                job.global_phase_results.extend(outcome.outputs);
                job.global_phase_status.insert(phase_id.clone(), PhaseStatus::Completed);
                let _ = self.event_publisher.publish(JobEvent::PhaseCompleted {
                    job_id: job.job_id.clone(),
                    phase_id,
                    unit_id: None,
                }).await;
            }
            Err(err) => {
                job.global_phase_status.insert(phase_id.clone(), PhaseStatus::Failed);
                job.errors.push(err.message.clone());
                let _ = self.event_publisher.publish(JobEvent::PhaseFailed {
                    job_id: job.job_id.clone(),
                    phase_id,
                    unit_id: None,
                    message: err.message,
                }).await;
            }
        }
        self.state_store.save_job(job).await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_ready_units(
        &self,
        job: &Job,
        graph: &DependencyGraph,
        activation_gate: &Arc<ActivationGate>,
        activity_tracker: Arc<ActivityTracker>,
        workflow_name: &str,
        join_set: &mut JoinSet<WorkerOutcome>,
    ) -> EngineResult<()> {
        let globals_completed = job.globals_completed();
        let mut unit_ids: Vec<&String> = job.units.keys().collect();
        unit_ids.sort();
        let retry_attempts = self.config.phase_retry_attempts;
        let retry_base_s = self.config.phase_retry_base_s;

        for unit_id in unit_ids {
            if join_set.len() >= self.config.max_concurrent_units {
                break;
            }
            let unit = &job.units[unit_id];
            if unit.is_busy() || unit.status.is_terminal() {
                continue;
            }

            let ready = graph.ready_set_for_unit(&unit.completed_set(), &globals_completed);
            let Some(phase_id) = ready.into_iter().next() else { continue };
            let phase = graph.phase(&phase_id).expect("ready id is in graph").clone();

            if let Some(skip_if) = &phase.skip_if {
                if skip_if.evaluate(&job.options, &job.input_data) {
                    let lock = self.state_store.lock_unit(&job.job_id, unit_id).await?;
                    if let Some(mut unit) = self.state_store.load_unit(&job.job_id, unit_id).await? {
                        unit.record_skip(&phase_id);
                        self.state_store.save_unit(&job.job_id, &unit).await?;
                    }
                    lock.release().await?;
                    continue;
                }
            }

            if phase.activation_slot == ActivationSlot::Acquire && !activation_gate.try_acquire(unit_id).await {
                continue;
            }

            let lock = self.state_store.lock_unit(&job.job_id, unit_id).await?;
            let Some(mut unit) = self.state_store.load_unit(&job.job_id, unit_id).await? else {
                lock.release().await?;
                continue;
            };
            unit.current_phase = Some(phase_id.clone());
            self.state_store.save_unit(&job.job_id, &unit).await?;
            lock.release().await?;

            let executor = self.registry.executor(workflow_name, &phase_id)?;
            let mut resolved = job.global_phase_results.clone();
            resolved.extend(unit.resolved.clone());

            let state_store = self.state_store.clone();
            let event_publisher = self.event_publisher.clone();
            let job_id = job.job_id.clone();
            let unit_id_owned = unit_id.clone();
            let tracker = activity_tracker.clone();
            let options = job.options.clone();
            let input_data = job.input_data.clone();
            let critical = phase.critical;
            let activation_slot = phase.activation_slot;

            let _ = event_publisher
                .publish(JobEvent::PhaseStarted {
                    job_id: job_id.clone(),
                    phase_id: phase_id.clone(),
                    unit_id: Some(unit_id_owned.clone()),
                })
                .await;

            join_set.spawn(async move {
                let ctx = EngineContext::new(
                    job_id,
                    Some(unit_id_owned.clone()),
                    phase_id.clone(),
                    options,
                    input_data,
                    resolved,
                    tracker,
                    state_store,
                    event_publisher,
                );
                let outcome = match executor.validate(&ctx) {
                    Ok(precheck) if !precheck.valid => Err(precheck.errors.join("; ")),
                    Ok(_) => execute_with_retry(&executor, &ctx, retry_attempts, retry_base_s)
                        .await
                        .map(|o| o.outputs)
                        .map_err(|e| e.message),
                    Err(e) => Err(e.message),
                };
                WorkerOutcome { unit_id: unit_id_owned, phase_id, critical, activation_slot, outcome }
            });
        }

        Ok(())
    }

    async fn apply_worker_outcome(
        &self,
        job_id: &str,
        worker: WorkerOutcome,
        activation_gate: &Arc<ActivationGate>,
    ) -> EngineResult<()> {
        let lock = self.state_store.lock_unit(job_id, &worker.unit_id).await?;
        let Some(mut unit) = self.state_store.load_unit(job_id, &worker.unit_id).await? else {
            lock.release().await?;
            return Ok(());
        };

        match worker.outcome {
            Ok(outputs) => {
                unit.record_success(&worker.phase_id, outputs);
                if worker.activation_slot == ActivationSlot::Release {
                    activation_gate.release(&worker.unit_id).await;
                }
                let _ = self.event_publisher.publish(JobEvent::PhaseCompleted {
                    job_id: job_id.to_string(),
                    phase_id: worker.phase_id,
                    unit_id: Some(worker.unit_id.clone()),
                }).await;
                if unit.status.is_terminal() {
                    let _ = self.event_publisher.publish(JobEvent::UnitCompleted {
                        job_id: job_id.to_string(),
                        unit_id: worker.unit_id.clone(),
                    }).await;
                }
            }
            Err(message) => {
                unit.record_failure(&worker.phase_id, message.clone(), worker.critical);
                if worker.critical {
                    activation_gate.release(&worker.unit_id).await;
                }
                let _ = self.event_publisher.publish(JobEvent::PhaseFailed {
                    job_id: job_id.to_string(),
                    phase_id: worker.phase_id,
                    unit_id: Some(worker.unit_id.clone()),
                    message,
                }).await;
            }
        }

        self.state_store.save_unit(job_id, &unit).await?;
        lock.release().await
    }

    async fn finish_cancelled(&self, job_id: &str) -> EngineResult<()> {
        let lock = self.state_store.lock_job(job_id).await?;
        let Some(mut job) = self.state_store.load_job(job_id).await? else {
            lock.release().await?;
            return Ok(());
        };
        for unit in job.units.values_mut() {
            if !unit.status.is_terminal() {
                unit.status = UnitStatus::Cancelled;
                unit.current_phase = None;
            }
        }
        job.transition(JobStatus::Cancelled, Utc::now())?;
        self.state_store.save_job(&job).await?;
        lock.release().await?;
        let _ = self.event_publisher.publish(JobEvent::JobCancelled { job_id: job_id.to_string() }).await;
        Ok(())
    }

    /// Progress tracking loop cadence (`SPEC_FULL.md` §C.3): recomputes and
    /// publishes aggregate progress every 2s independent of phase completion
    /// events, so SSE subscribers get a heartbeat during long phases.
    fn spawn_progress_loop(scheduler: Arc<Self>, job_id: String) -> oneshot::Sender<()> {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => return,
                    _ = ticker.tick() => {
                        if let Ok(Some(job)) = scheduler.state_store.load_job(&job_id).await {
                            let _ = scheduler.event_publisher.publish(JobEvent::ProgressUpdated {
                                job_id: job_id.clone(),
                                progress: job.progress(),
                            }).await;
                        }
                    }
                }
            }
        });
        stop_tx
    }
}
