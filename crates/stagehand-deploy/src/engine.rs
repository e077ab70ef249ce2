//! Deployment engine.
//!
//! Runs submitted plans as independent tasks. A fair semaphore caps how
//! many execute at once; excess submissions wait in submission order.
//! Each deployment walks [`StepKind::ALL`], consulting the
//! [`RetryPolicy`](crate::retry::RetryPolicy) after every attempt.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant as StdInstant;

use stagehand_artifact::{Artifact, ArtifactError, ArtifactRepository};
use stagehand_error::CommonError;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DeployError, Result};
use crate::plan::{DeploymentPlan, ValidationIssue};
use crate::result::DeploymentResult;
use crate::retry::{StepOutcome, Transition};
use crate::status::DeploymentStatus;
use crate::step::{DeploymentStep, StepKind};
use crate::target::DeploymentTarget;

// =============================================================================
// Engine
// =============================================================================

/// One submitted deployment.
struct Deployment {
    id: String,
    plan: DeploymentPlan,
    target: Arc<dyn DeploymentTarget>,
    result: RwLock<DeploymentResult>,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
}

/// Executes deployment plans with a concurrency cap.
pub struct DeploymentEngine {
    repository: Arc<ArtifactRepository>,
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    deployments: RwLock<HashMap<String, Arc<Deployment>>>,
}

impl DeploymentEngine {
    /// Creates an engine that runs at most `max_concurrent` deployments at once.
    #[must_use]
    pub fn new(repository: Arc<ArtifactRepository>, max_concurrent: usize) -> Self {
        Self {
            repository,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            active: Arc::new(AtomicUsize::new(0)),
            deployments: RwLock::new(HashMap::new()),
        }
    }

    /// Validates and queues a plan, returning the deployment id.
    ///
    /// Validation warnings are logged; the deployment still runs.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Validation`] with every error-severity issue
    /// if the plan is rejected. Nothing is touched in that case.
    pub async fn submit(
        &self,
        plan: DeploymentPlan,
        target: Arc<dyn DeploymentTarget>,
    ) -> Result<String> {
        let (errors, warnings): (Vec<ValidationIssue>, Vec<ValidationIssue>) =
            plan.validate().into_iter().partition(ValidationIssue::is_error);
        for warning in &warnings {
            warn!(plan_id = %plan.id, issue = %warning, "plan validation warning");
        }
        if !errors.is_empty() {
            return Err(DeployError::Validation(errors));
        }

        let result = DeploymentResult::pending(&plan);
        let deployment_id = result.deployment_id.clone();
        let (done, _) = watch::channel(false);
        let deployment = Arc::new(Deployment {
            id: deployment_id.clone(),
            plan,
            target,
            result: RwLock::new(result),
            cancel: CancellationToken::new(),
            done,
        });
        self.deployments
            .write()
            .await
            .insert(deployment_id.clone(), Arc::clone(&deployment));

        info!(
            deployment_id = %deployment_id,
            plan_id = %deployment.plan.id,
            environment_id = %deployment.plan.environment_id,
            target = %deployment.target.describe(),
            artifacts = deployment.plan.artifacts.len(),
            "deployment submitted"
        );

        let execution = Execution {
            repository: Arc::clone(&self.repository),
            permits: Arc::clone(&self.permits),
            active: Arc::clone(&self.active),
            deployment,
        };
        tokio::spawn(execution.run());
        Ok(deployment_id)
    }

    /// Waits for a deployment to become terminal.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown ids.
    pub async fn wait(&self, deployment_id: &str) -> Result<DeploymentResult> {
        let deployment = self.get(deployment_id).await?;
        let mut done = deployment.done.subscribe();
        done.wait_for(|finished| *finished)
            .await
            .map_err(|e| CommonError::internal(format!("deployment task vanished: {e}")))?;
        let result = deployment.result.read().await.clone();
        Ok(result)
    }

    /// Submits a plan and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns the validation error if the plan is rejected.
    pub async fn deploy(
        &self,
        plan: DeploymentPlan,
        target: Arc<dyn DeploymentTarget>,
    ) -> Result<DeploymentResult> {
        let deployment_id = self.submit(plan, target).await?;
        self.wait(&deployment_id).await
    }

    /// Current snapshot of a deployment.
    pub async fn status(&self, deployment_id: &str) -> Option<DeploymentResult> {
        let deployment = self.deployments.read().await.get(deployment_id).cloned()?;
        let result = deployment.result.read().await.clone();
        Some(result)
    }

    /// Plan a deployment was submitted with.
    pub async fn plan(&self, deployment_id: &str) -> Option<DeploymentPlan> {
        self.deployments
            .read()
            .await
            .get(deployment_id)
            .map(|d| d.plan.clone())
    }

    /// Snapshots of every known deployment, oldest first.
    pub async fn list(&self) -> Vec<DeploymentResult> {
        let deployments: Vec<Arc<Deployment>> =
            self.deployments.read().await.values().cloned().collect();
        let mut results = Vec::with_capacity(deployments.len());
        for deployment in deployments {
            results.push(deployment.result.read().await.clone());
        }
        results.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        results
    }

    /// Requests cancellation.
    ///
    /// Returns false if the deployment had already finished.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown ids.
    pub async fn cancel(&self, deployment_id: &str) -> Result<bool> {
        let deployment = self.get(deployment_id).await?;
        if deployment.result.read().await.status.is_final() {
            return Ok(false);
        }
        info!(deployment_id = %deployment_id, "cancelling deployment");
        deployment.cancel.cancel();
        Ok(true)
    }

    /// Resubmits the plan of a failed or cancelled deployment.
    ///
    /// The new deployment gets a fresh id and reuses the original target.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown ids and an invalid-state error
    /// if the deployment has not failed or been cancelled.
    pub async fn retry(&self, deployment_id: &str) -> Result<String> {
        let deployment = self.get(deployment_id).await?;
        let status = deployment.result.read().await.status;
        if !matches!(status, DeploymentStatus::Failed | DeploymentStatus::Cancelled) {
            return Err(CommonError::invalid_state(format!(
                "deployment {deployment_id} is {status}, only failed or cancelled deployments can be retried"
            ))
            .into());
        }
        info!(deployment_id = %deployment_id, "retrying deployment");
        self.submit(deployment.plan.clone(), Arc::clone(&deployment.target))
            .await
    }

    /// Number of deployments currently holding a concurrency slot.
    #[must_use]
    pub fn active_deployments(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    async fn get(&self, deployment_id: &str) -> Result<Arc<Deployment>> {
        self.deployments
            .read()
            .await
            .get(deployment_id)
            .cloned()
            .ok_or_else(|| DeployError::from(CommonError::not_found(format!("deployment {deployment_id}"))))
    }
}

// =============================================================================
// Execution
// =============================================================================

/// Decrements the active counter on every exit path.
struct ActiveSlot(Arc<AtomicUsize>);

impl ActiveSlot {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Progress carried across steps and retries.
#[derive(Default)]
struct StepContext {
    ordered: Vec<Artifact>,
    transferred: Vec<Artifact>,
    transferred_ids: HashSet<String>,
    installed: HashSet<String>,
    skipped: HashSet<String>,
    connected: bool,
}

struct Execution {
    repository: Arc<ArtifactRepository>,
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    deployment: Arc<Deployment>,
}

impl Execution {
    async fn run(self) {
        let permit = tokio::select! {
            biased;
            () = self.deployment.cancel.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        };

        let (status, error) = if let Some(_permit) = permit {
            let _slot = ActiveSlot::acquire(&self.active);
            self.execute().await
        } else {
            (DeploymentStatus::Cancelled, None)
        };

        self.finish(status, error).await;
    }

    async fn execute(&self) -> (DeploymentStatus, Option<String>) {
        let d = &self.deployment;
        let policy = d.plan.config.retry_policy();
        let deadline = Instant::now() + d.plan.config.timeout();
        let mut ctx = StepContext::default();
        let mut terminal = (DeploymentStatus::Completed, None);

        'steps: for kind in StepKind::ALL {
            let index = {
                let mut result = d.result.write().await;
                result.enter(kind.phase());
                result.steps.push(DeploymentStep::new(kind));
                result.steps.len() - 1
            };
            debug!(deployment_id = %d.id, step = kind.name(), "step started");

            loop {
                d.result.write().await.steps[index].start();

                let outcome = tokio::select! {
                    biased;
                    () = d.cancel.cancelled() => StepOutcome::Cancelled,
                    () = sleep_until(deadline) => StepOutcome::Permanent(format!(
                        "deployment timed out after {}s", d.plan.config.timeout_secs
                    )),
                    run = self.run_step(kind, index, &mut ctx) => match run {
                        Ok(()) => StepOutcome::Success,
                        Err(e) if e.is_transient() => StepOutcome::Transient(e.to_string()),
                        Err(e) => StepOutcome::Permanent(e.to_string()),
                    },
                };

                let retries = d.result.read().await.steps[index].retry_count;
                match policy.next(retries, &outcome) {
                    Transition::Advance => {
                        d.result.write().await.steps[index].complete();
                        info!(deployment_id = %d.id, step = kind.name(), "step completed");
                        break;
                    }
                    Transition::Retry { attempt, delay } => {
                        {
                            let mut result = d.result.write().await;
                            result.steps[index].retry_count = attempt;
                            result.retry_count += 1;
                        }
                        if let StepOutcome::Transient(reason) = &outcome {
                            warn!(
                                deployment_id = %d.id,
                                step = kind.name(),
                                attempt,
                                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                error = %reason,
                                "step failed, retrying"
                            );
                        }
                        let interrupted = tokio::select! {
                            biased;
                            () = d.cancel.cancelled() => Some((DeploymentStatus::Cancelled, "cancelled".to_string())),
                            () = sleep_until(deadline) => Some((
                                DeploymentStatus::Failed,
                                format!("deployment timed out after {}s", d.plan.config.timeout_secs),
                            )),
                            () = sleep(delay) => None,
                        };
                        if let Some((status, message)) = interrupted {
                            d.result.write().await.steps[index].fail(message.clone());
                            terminal = (status, (status == DeploymentStatus::Failed).then_some(message));
                            break 'steps;
                        }
                    }
                    Transition::Fail(message) => {
                        d.result.write().await.steps[index].fail(message.clone());
                        error!(deployment_id = %d.id, step = kind.name(), error = %message, "step failed");
                        terminal = (
                            DeploymentStatus::Failed,
                            Some(format!("{} failed: {message}", kind.name())),
                        );
                        break 'steps;
                    }
                    Transition::Cancel => {
                        d.result.write().await.steps[index].fail("cancelled");
                        terminal = (DeploymentStatus::Cancelled, None);
                        break 'steps;
                    }
                }
            }
        }

        self.teardown(&ctx, terminal.0).await;
        terminal
    }

    async fn run_step(&self, kind: StepKind, index: usize, ctx: &mut StepContext) -> Result<()> {
        let d = &self.deployment;
        match kind {
            StepKind::Preparing => {
                let repository = Arc::clone(&self.repository);
                let artifacts = d.plan.artifacts.clone();
                let validate = d.plan.config.validate_checksums;
                let ordered = tokio::task::spawn_blocking(move || {
                    prepare_artifacts(&repository, &artifacts, validate)
                })
                .await
                .map_err(|e| CommonError::internal(format!("prepare task failed: {e}")))??;

                let mut result = d.result.write().await;
                let step = &mut result.steps[index];
                step.set_progress(ordered.len(), ordered.len());
                step.details.insert(
                    "resolved_order".to_string(),
                    ordered.iter().map(|a| a.id.clone()).collect::<Vec<_>>().into(),
                );
                ctx.ordered = ordered;
            }
            StepKind::Connecting => {
                let timeout = d.plan.config.connection_timeout();
                tokio::time::timeout(timeout, d.target.connect())
                    .await
                    .map_err(|_| {
                        CommonError::timeout(format!(
                            "connecting to {} took longer than {}s",
                            d.target.describe(),
                            timeout.as_secs()
                        ))
                    })??;
                ctx.connected = true;
            }
            StepKind::InstallingDependencies => {
                let total = d.plan.dependencies.len();
                for (done, dependency) in d.plan.dependencies.iter().enumerate() {
                    if ctx.installed.contains(&dependency.name) || ctx.skipped.contains(&dependency.name) {
                        continue;
                    }
                    match d.target.install(dependency).await {
                        Ok(()) => {
                            ctx.installed.insert(dependency.name.clone());
                        }
                        Err(e) if dependency.optional => {
                            warn!(dependency = %dependency.name, error = %e, "optional dependency skipped");
                            ctx.skipped.insert(dependency.name.clone());
                        }
                        Err(e) => return Err(e),
                    }
                    let mut result = d.result.write().await;
                    result.dependencies_installed = ctx.installed.len();
                    result.steps[index].set_progress(done + 1, total);
                }
                let mut result = d.result.write().await;
                result.steps[index].set_progress(total, total);
                if !ctx.skipped.is_empty() {
                    let mut skipped: Vec<_> = ctx.skipped.iter().cloned().collect();
                    skipped.sort();
                    result.steps[index]
                        .details
                        .insert("skipped_optional".to_string(), skipped.into());
                }
            }
            StepKind::DeployingScripts => {
                let total = ctx.ordered.len();
                for artifact in &ctx.ordered {
                    if ctx.transferred_ids.contains(&artifact.id) {
                        continue;
                    }
                    let started = StdInstant::now();
                    let bytes = d.target.transfer(artifact).await?;
                    let seconds = started.elapsed().as_secs_f64();
                    ctx.transferred_ids.insert(artifact.id.clone());
                    ctx.transferred.push(artifact.clone());

                    let mut result = d.result.write().await;
                    result.transfer.record(bytes, seconds);
                    result.artifacts_deployed = ctx.transferred.len();
                    result.steps[index].set_progress(ctx.transferred.len(), total);
                }
            }
            StepKind::ConfiguringInstrumentation => {
                if d.plan.instrumentation.is_enabled() {
                    d.target
                        .configure_instrumentation(&d.plan.instrumentation)
                        .await?;
                } else {
                    d.result.write().await.steps[index]
                        .details
                        .insert("skipped".to_string(), true.into());
                }
            }
            StepKind::Validating => {
                d.target.verify(&ctx.ordered).await?;
                d.result.write().await.steps[index].set_progress(ctx.ordered.len(), ctx.ordered.len());
            }
        }
        Ok(())
    }

    async fn teardown(&self, ctx: &StepContext, status: DeploymentStatus) {
        let d = &self.deployment;
        if status != DeploymentStatus::Completed
            && d.plan.config.cleanup_on_failure
            && !ctx.transferred.is_empty()
        {
            info!(
                deployment_id = %d.id,
                artifacts = ctx.transferred.len(),
                "rolling back transferred artifacts"
            );
            if let Err(e) = d.target.rollback(&ctx.transferred).await {
                warn!(error = %e, "rollback failed");
            }
        }
        if ctx.connected {
            if let Err(e) = d.target.disconnect().await {
                warn!(error = %e, "disconnect failed");
            }
        }
    }

    async fn finish(&self, status: DeploymentStatus, error: Option<String>) {
        let d = &self.deployment;
        {
            let mut result = d.result.write().await;
            if result.finish(status, error) {
                info!(
                    deployment_id = %result.deployment_id,
                    status = %result.status,
                    artifacts_deployed = result.artifacts_deployed,
                    dependencies_installed = result.dependencies_installed,
                    retries = result.retry_count,
                    duration_secs = result.duration_secs().unwrap_or_default(),
                    "deployment finished"
                );
            }
        }
        d.done.send_replace(true);
    }
}

/// Stores the plan's artifacts and returns them in dependency order.
///
/// Dependencies that are not part of the plan are loaded from the repository.
fn prepare_artifacts(
    repository: &ArtifactRepository,
    artifacts: &[Artifact],
    validate_checksums: bool,
) -> Result<Vec<Artifact>> {
    for artifact in artifacts {
        if validate_checksums && !artifact.verify_checksum() {
            return Err(ArtifactError::ChecksumMismatch {
                id: artifact.id.clone(),
                expected: artifact.checksum.clone(),
                actual: stagehand_artifact::sha256_hex(&artifact.content),
            }
            .into());
        }
        repository.store(artifact)?;
    }

    let ids: Vec<String> = artifacts.iter().map(|a| a.id.clone()).collect();
    let order = repository.resolve_dependencies(&ids)?;
    let by_id: HashMap<&str, &Artifact> = artifacts.iter().map(|a| (a.id.as_str(), a)).collect();

    order
        .iter()
        .map(|id| match by_id.get(id.as_str()) {
            Some(artifact) => Ok((*artifact).clone()),
            None => repository
                .get(id)?
                .ok_or_else(|| DeployError::from(CommonError::not_found(format!("artifact {id}")))),
        })
        .collect()
}
