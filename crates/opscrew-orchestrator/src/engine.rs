use crate::aggregator::combine;
use crate::backend::{compute_backoff, AgentBackend, AgentReply, RetryPolicy};
use crate::cache::{fingerprint, Lookup, ResultCache};
use crate::delegation::DelegationResolver;
use crate::monitor::{AgentMonitor, MetricsSink};
use crate::registry::AgentRegistry;
use crate::types::{
    BranchReport, FailurePolicy, Stage, StageReport, TaskReport, Workflow, WorkflowContext,
    WorkflowReport,
};
use futures_util::future::join_all;
use opscrew_core::{
    Agent, AgentId, ErrorKind, FailureSummary, OpsCrewError, OpsCrewResult, Provenance, Task,
    TaskFailure, TaskOutcome, TaskResult, TaskState, WorkflowStatus,
};
use opscrew_security::SecurityGate;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Tunables of the workflow executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Worker pool capacity: tasks running at once across all stages.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Handoffs allowed per task.
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: usize,
    /// Timeout of a whole dispatch (every attempt and backoff) unless a task
    /// sets its own.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Lifetime of a cached result.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Stored results kept before the oldest is evicted.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Backend retry behaviour.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_delegation_depth() -> usize {
    crate::delegation::DEFAULT_MAX_DEPTH
}

fn default_task_timeout_secs() -> u64 {
    120
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_capacity() -> usize {
    crate::cache::DEFAULT_CAPACITY
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_delegation_depth: default_max_delegation_depth(),
            task_timeout_secs: default_task_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Everything a dispatch needs, passed explicitly to every orchestration
/// call. Cheap to share behind an `Arc`.
pub struct ExecutionContext {
    /// Agents tasks are routed to.
    pub registry: Arc<AgentRegistry>,
    /// Checked before every dispatch and after every change of agent.
    pub gate: Arc<SecurityGate>,
    /// Single-flight result cache.
    pub cache: ResultCache,
    /// Delegation and handoff rules.
    pub resolver: DelegationResolver,
    /// Where agents actually run.
    pub backend: Arc<dyn AgentBackend>,
    /// Receives per-task measurements.
    pub metrics: Arc<dyn MetricsSink>,
    /// Backend retry behaviour.
    pub retry: RetryPolicy,
    /// Task timeout unless a task sets its own.
    pub task_timeout: Duration,
    pool: Arc<Semaphore>,
}

impl ExecutionContext {
    /// A context built from `config`, with a private cache and monitor.
    pub fn new(
        config: &OrchestratorConfig,
        registry: Arc<AgentRegistry>,
        gate: Arc<SecurityGate>,
        backend: Arc<dyn AgentBackend>,
    ) -> Self {
        Self {
            registry,
            gate,
            cache: ResultCache::with_capacity(
                Duration::from_secs(config.cache_ttl_secs),
                config.cache_capacity,
            ),
            resolver: DelegationResolver::new(config.max_delegation_depth),
            backend,
            metrics: Arc::new(AgentMonitor::new()),
            retry: config.retry.clone(),
            task_timeout: Duration::from_secs(config.task_timeout_secs),
            pool: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        }
    }

    /// Report measurements to `metrics` instead of a private monitor.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Share a cache with other executors.
    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = cache;
        self
    }

    /// Free worker slots right now.
    pub fn available_workers(&self) -> usize {
        self.pool.available_permits()
    }
}

/// Runs workflows under their declared topology.
#[derive(Clone)]
pub struct WorkflowExecutor {
    ctx: Arc<ExecutionContext>,
}

impl WorkflowExecutor {
    /// An executor over `ctx`.
    pub fn new(ctx: ExecutionContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    /// The shared execution context.
    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    /// Run `workflow` to completion.
    ///
    /// Structural problems are rejected with `Validation` before anything is
    /// dispatched. Every other failure is reported inside the returned
    /// [`WorkflowReport`].
    pub async fn run(&self, workflow: Workflow) -> OpsCrewResult<WorkflowReport> {
        workflow.validate()?;
        let start = Instant::now();
        info!(
            workflow_id = %workflow.id,
            workflow = %workflow.name,
            status = %WorkflowStatus::Running,
            "Workflow: starting"
        );

        let mut context = WorkflowContext::new();
        let stage = match workflow.stage {
            Stage::Sequential { tasks, policy } => {
                self.run_sequential(tasks, policy, &mut context).await
            }
            Stage::Parallel { tasks, policy } => {
                self.run_parallel(tasks, policy, &mut context).await
            }
            Stage::Conditional {
                predicate,
                branches,
            } => {
                let predicate_report = self.dispatch(*predicate, &context).await;
                if !predicate_report.succeeded() {
                    StageReport {
                        status: WorkflowStatus::Failed,
                        failure: predicate_report.failure(),
                        tasks: vec![predicate_report],
                        branch: None,
                    }
                } else {
                    context.absorb(&predicate_report);
                    let payload = predicate_report.payload().cloned().unwrap_or_default();
                    match branches.select(&payload) {
                        Some(branch) => {
                            info!(
                                workflow_id = %workflow.id,
                                branch = %branch.label,
                                "Workflow: branch selected"
                            );
                            let branch_stage = match branch.stage.clone() {
                                Stage::Sequential { tasks, policy } => {
                                    self.run_sequential(tasks, policy, &mut context).await
                                }
                                Stage::Parallel { tasks, policy } => {
                                    self.run_parallel(tasks, policy, &mut context).await
                                }
                                // Rejected by `Workflow::validate`.
                                Stage::Conditional { .. } => StageReport {
                                    status: WorkflowStatus::Failed,
                                    tasks: Vec::new(),
                                    branch: None,
                                    failure: Some(FailureSummary {
                                        task_id: None,
                                        task_name: None,
                                        kind: ErrorKind::Validation,
                                        reason: "nested conditional branch".into(),
                                    }),
                                },
                            };
                            StageReport {
                                status: branch_stage.status,
                                failure: branch_stage.failure.clone(),
                                tasks: vec![predicate_report],
                                branch: Some(BranchReport {
                                    label: branch.label.clone(),
                                    stage: Box::new(branch_stage),
                                }),
                            }
                        }
                        None => {
                            let err = OpsCrewError::NoMatchingBranch(format!(
                                "no branch matches the result of '{}'",
                                predicate_report.name
                            ));
                            warn!(
                                workflow_id = %workflow.id,
                                error = %err,
                                "Workflow: no matching branch"
                            );
                            StageReport {
                                status: WorkflowStatus::Failed,
                                failure: Some(FailureSummary {
                                    task_id: Some(predicate_report.task_id),
                                    task_name: Some(predicate_report.name.clone()),
                                    kind: err.kind(),
                                    reason: err.reason(),
                                }),
                                tasks: vec![predicate_report],
                                branch: None,
                            }
                        }
                    }
                }
            }
        };

        let duration_ms = elapsed_ms(start);
        info!(
            workflow_id = %workflow.id,
            workflow = %workflow.name,
            status = %stage.status,
            duration_ms,
            "Workflow: complete"
        );
        Ok(WorkflowReport {
            workflow_id: workflow.id,
            name: workflow.name,
            status: stage.status,
            failure: stage.failure.clone(),
            stage,
            context,
            duration_ms,
        })
    }

    /// Tasks one at a time in declared order. Under fail-fast the tasks after
    /// a failure are left `Pending`.
    async fn run_sequential(
        &self,
        tasks: Vec<Task>,
        policy: FailurePolicy,
        context: &mut WorkflowContext,
    ) -> StageReport {
        let mut reports = Vec::with_capacity(tasks.len());
        let mut halted = false;
        for task in tasks {
            if halted {
                debug!(task_id = %task.id, task = %task.name, "Sequential: skipped after failure");
                reports.push(TaskReport::pending(&task));
                continue;
            }
            let report = self.dispatch(task, context).await;
            context.absorb(&report);
            if report.failed() && policy == FailurePolicy::FailFast {
                halted = true;
            }
            reports.push(report);
        }
        let stage = combine(reports, policy);
        info!(topology = "sequential", status = %stage.status, "Stage: complete");
        stage
    }

    /// All tasks at once, bounded by the worker pool. Slots are granted in
    /// declared order; results come back in declared order.
    async fn run_parallel(
        &self,
        tasks: Vec<Task>,
        policy: FailurePolicy,
        context: &mut WorkflowContext,
    ) -> StageReport {
        let fail_fast = policy == FailurePolicy::FailFast;
        let halted = Arc::new(AtomicBool::new(false));
        let snapshot = context.to_value();

        let mut slots = Vec::with_capacity(tasks.len());
        for task in tasks {
            if fail_fast && halted.load(Ordering::SeqCst) {
                slots.push(Slot::NotStarted(TaskReport::pending(&task)));
                continue;
            }
            let permit = match Arc::clone(&self.ctx.pool).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let failure = TaskFailure::new(ErrorKind::Cancelled, "worker pool closed");
                    slots.push(Slot::NotStarted(failed_report(task, failure)));
                    continue;
                }
            };
            // The stage may have failed while we waited for a slot.
            if fail_fast && halted.load(Ordering::SeqCst) {
                drop(permit);
                slots.push(Slot::NotStarted(TaskReport::pending(&task)));
                continue;
            }

            let ctx = Arc::clone(&self.ctx);
            let halted = Arc::clone(&halted);
            let snapshot = snapshot.clone();
            let (task_id, name) = (task.id, task.name.clone());
            let handle = tokio::spawn(async move {
                let report = run_task(&ctx, task, &snapshot).await;
                if report.failed() && fail_fast {
                    halted.store(true, Ordering::SeqCst);
                }
                // Released only after the halt is visible to queued siblings.
                drop(permit);
                report
            });
            slots.push(Slot::Spawned {
                task_id,
                name,
                handle,
            });
        }

        let reports = join_all(slots.into_iter().map(Slot::finish)).await;
        for report in &reports {
            context.absorb(report);
        }
        let stage = combine(reports, policy);
        info!(topology = "parallel", status = %stage.status, "Stage: complete");
        stage
    }

    /// Dispatch a single task once a worker slot is free.
    pub async fn dispatch(&self, task: Task, context: &WorkflowContext) -> TaskReport {
        match Arc::clone(&self.ctx.pool).acquire_owned().await {
            Ok(_permit) => run_task(&self.ctx, task, &context.to_value()).await,
            Err(_) => failed_report(
                task,
                TaskFailure::new(ErrorKind::Cancelled, "worker pool closed"),
            ),
        }
    }
}

enum Slot {
    NotStarted(TaskReport),
    Spawned {
        task_id: uuid::Uuid,
        name: String,
        handle: tokio::task::JoinHandle<TaskReport>,
    },
}

impl Slot {
    async fn finish(self) -> TaskReport {
        match self {
            Slot::NotStarted(report) => report,
            Slot::Spawned {
                task_id,
                name,
                handle,
            } => match handle.await {
                Ok(report) => report,
                Err(e) => {
                    error!(task_id = %task_id, task = %name, error = %e, "Parallel: task aborted");
                    TaskReport {
                        task_id,
                        name,
                        state: TaskState::Failed,
                        result: Some(TaskResult {
                            task_id,
                            outcome: TaskOutcome::Failure(TaskFailure::new(
                                ErrorKind::Internal,
                                format!("task aborted: {e}"),
                            )),
                            provenance: Provenance::default(),
                            duration_ms: 0,
                        }),
                    }
                }
            },
        }
    }
}

fn failed_report(task: Task, failure: TaskFailure) -> TaskReport {
    TaskReport {
        task_id: task.id,
        name: task.name,
        state: TaskState::Failed,
        result: Some(TaskResult {
            task_id: task.id,
            outcome: TaskOutcome::Failure(failure),
            provenance: Provenance::default(),
            duration_ms: 0,
        }),
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// A successful execution: the payload and the agent credited with it.
struct Produced {
    payload: serde_json::Value,
    agent: Option<AgentId>,
    cached: bool,
}

/// Run one task and turn the outcome into its single terminal result. The
/// caller holds the worker slot.
async fn run_task(
    ctx: &ExecutionContext,
    mut task: Task,
    context: &serde_json::Value,
) -> TaskReport {
    let start = Instant::now();
    ctx.metrics.task_started(task.id);
    debug!(task_id = %task.id, task = %task.name, "Task: dispatch");

    let mut provenance = Provenance::default();
    let outcome = execute(ctx, &mut task, context, &mut provenance).await;
    let duration = start.elapsed();

    let (state, outcome) = match outcome {
        Ok(produced) => {
            provenance.from_cache = produced.cached;
            if produced.agent.is_some() {
                provenance.agent = produced.agent;
            }
            let state = if produced.cached {
                TaskState::Cached
            } else {
                TaskState::Succeeded
            };
            (state, TaskOutcome::Success { payload: produced.payload })
        }
        Err(failure) => {
            warn!(
                task_id = %task.id,
                task = %task.name,
                kind = %failure.kind,
                reason = %failure.reason,
                "Task: failed"
            );
            (TaskState::Failed, TaskOutcome::Failure(failure))
        }
    };

    if let Err(e) = task.advance(state) {
        error!(task_id = %task.id, error = %e, "Task: illegal terminal transition");
        task.state = state;
    }
    let role = provenance
        .agent
        .as_ref()
        .and_then(|id| ctx.registry.get(id))
        .map(|a| a.role);
    if provenance.from_cache {
        ctx.metrics.cache_hit(task.id, role);
    }
    ctx.metrics.task_finished(task.id, role, state.is_success(), duration);
    info!(
        task_id = %task.id,
        task = %task.name,
        state = %task.state,
        agent = provenance.agent.as_ref().map(AgentId::as_str).unwrap_or("-"),
        delegations = provenance.delegation_depth(),
        attempts = provenance.attempts,
        "Task: finished"
    );

    TaskReport {
        task_id: task.id,
        name: task.name,
        state: task.state,
        result: Some(TaskResult {
            task_id: task.id,
            outcome,
            provenance,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Gate, consult the cache, and on a miss route and execute.
async fn execute(
    ctx: &ExecutionContext,
    task: &mut Task,
    context: &serde_json::Value,
    provenance: &mut Provenance,
) -> Result<Produced, TaskFailure> {
    let agent = select_agent(&ctx.registry, task)?;
    provenance.agent = Some(agent.id.clone());
    ctx.gate.authorize(task, agent)?;
    task.advance(TaskState::Gated)?;

    let key = fingerprint(task, context);
    match ctx.cache.lookup_or_reserve(&key) {
        Lookup::Hit(entry) => {
            task.advance(TaskState::Dispatched)?;
            Ok(Produced {
                payload: entry.payload,
                agent: entry.agent,
                cached: true,
            })
        }
        Lookup::Wait(waiter) => {
            task.advance(TaskState::Dispatched)?;
            debug!(task_id = %task.id, fingerprint = %key, "Task: waiting on in-flight execution");
            let entry = waiter.wait().await?;
            Ok(Produced {
                payload: entry.payload,
                agent: entry.agent,
                cached: true,
            })
        }
        Lookup::Reserved(reservation) => {
            task.advance(TaskState::Dispatched)?;
            match route_and_run(ctx, task, agent, context, provenance).await {
                Ok((payload, agent_id)) => {
                    ctx.cache.store(reservation, payload.clone(), Some(agent_id.clone()), None);
                    Ok(Produced {
                        payload,
                        agent: Some(agent_id),
                        cached: false,
                    })
                }
                Err(e) => {
                    let failure = TaskFailure::from(&e);
                    ctx.cache.abort(reservation, failure.clone());
                    Err(failure)
                }
            }
        }
    }
}

/// The explicitly assigned agent, else the first agent holding every
/// required capability.
fn select_agent<'r>(registry: &'r AgentRegistry, task: &Task) -> OpsCrewResult<&'r Agent> {
    if let Some(id) = &task.assigned_to {
        return registry.require(id);
    }
    if task.required_capabilities.is_empty() {
        return Err(OpsCrewError::Validation(format!(
            "task '{}' names neither an agent nor required capabilities",
            task.name
        )));
    }
    registry
        .find_capable(&task.required_capabilities)
        .into_iter()
        .next()
        .ok_or_else(|| OpsCrewError::NoCapableAgent {
            capabilities: task.required_capabilities.clone(),
        })
}

/// Resolve delegation, re-gate on every change of agent, and invoke the
/// backend until an agent completes the task. The task timeout starts here and
/// spans every agent, attempt and backoff.
async fn route_and_run(
    ctx: &ExecutionContext,
    task: &mut Task,
    initial: &Agent,
    context: &serde_json::Value,
    provenance: &mut Provenance,
) -> OpsCrewResult<(serde_json::Value, AgentId)> {
    let timeout = task.timeout.unwrap_or(ctx.task_timeout);
    let deadline = Instant::now() + timeout;
    let mut agent = ctx
        .resolver
        .resolve(&ctx.registry, task, initial, &mut provenance.delegations)?;
    if agent.id != initial.id {
        task.advance(TaskState::Delegated)?;
        ctx.gate.authorize(task, agent)?;
    }

    loop {
        provenance.agent = Some(agent.id.clone());
        task.advance(TaskState::Running)?;
        let call = Call {
            agent,
            task: &*task,
            timeout,
            deadline,
        };
        match invoke_with_retry(ctx, call, context, provenance).await? {
            AgentReply::Completed(payload) => return Ok((payload, agent.id.clone())),
            AgentReply::Handoff { capability, reason } => {
                let next = ctx.resolver.handoff(
                    &ctx.registry,
                    task,
                    agent,
                    &capability,
                    &reason,
                    &mut provenance.delegations,
                )?;
                task.advance(TaskState::Delegated)?;
                ctx.gate.authorize(task, next)?;
                agent = next;
            }
        }
    }
}

/// One agent invocation and the task deadline it runs under.
struct Call<'a> {
    agent: &'a Agent,
    task: &'a Task,
    timeout: Duration,
    deadline: Instant,
}

impl Call<'_> {
    fn timed_out(&self, attempt: u32) -> OpsCrewError {
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        warn!(
            task_id = %self.task.id,
            agent = %self.agent.id,
            attempt,
            timeout_ms,
            "Task: timed out"
        );
        OpsCrewError::Timeout { timeout_ms }
    }
}

/// One backend call per attempt until the task deadline. Transient failures
/// are retried with exponential backoff while time remains; a timed-out call
/// is left running in the background and never retried.
async fn invoke_with_retry(
    ctx: &ExecutionContext,
    call: Call<'_>,
    context: &serde_json::Value,
    provenance: &mut Provenance,
) -> OpsCrewResult<AgentReply> {
    let (agent, task) = (call.agent, call.task);
    let mut attempt = 0;
    loop {
        provenance.attempts += 1;
        let handle = {
            let backend = Arc::clone(&ctx.backend);
            let (agent, task, context) = (agent.clone(), task.clone(), context.clone());
            tokio::spawn(async move { backend.execute(&agent, &task, &context).await })
        };

        let result = match tokio::time::timeout_at(call.deadline, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(OpsCrewError::Orchestrator(format!("backend call aborted: {e}"))),
            Err(_) => return Err(call.timed_out(attempt)),
        };

        match result {
            Ok(reply) => return Ok(reply),
            Err(e) if e.is_retryable() && attempt < ctx.retry.max_retries => {
                let delay = compute_backoff(&ctx.retry, attempt);
                info!(
                    task_id = %task.id,
                    agent = %agent.id,
                    backend = ctx.backend.name(),
                    attempt,
                    delay_ms = delay,
                    error = %e,
                    "Retryable error, backing off"
                );
                let backoff = tokio::time::sleep(Duration::from_millis(delay));
                if tokio::time::timeout_at(call.deadline, backoff).await.is_err() {
                    return Err(call.timed_out(attempt));
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
