//! Engine context.
//!
//! [`Engine`] owns one instance of every component and wires them
//! together for the two end-to-end flows: deploying a plan onto a
//! registered environment, and running a test with resource monitoring
//! and artifact collection. Nothing is global; tests build as many
//! engines as they like through [`EngineBuilder`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stagehand_artifact::{Artifact, ArtifactRepository};
use stagehand_collector::{
    ArtifactCollector, CleanupStats, Clock, CollectionReport, StorageStats,
};
use stagehand_error::CommonError;
use stagehand_deploy::{
    CompletionReport, DeploymentEngine, DeploymentPlan, DeploymentResult, LocalTarget, ReportStore,
};
use stagehand_perf::{PerformanceMetrics, PerformanceMonitor, ProcProbe, ResourceProbe};
use stagehand_runner::{EmulatorLauncher, ProcessObserver, QemuLauncher, TestCase, TestResult, TestRunner};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::registry::{EnvironmentRegistry, InMemoryRegistry, TargetEnvironment};

/// Everything produced by one test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunOutcome {
    /// Runner verdict.
    pub result: TestResult,
    /// Resource usage while the test ran, when sampling succeeded.
    pub metrics: Option<PerformanceMetrics>,
    /// Artifacts taken over by the collector.
    pub collection: CollectionReport,
}

// =============================================================================
// Builder
// =============================================================================

/// Builds an [`Engine`], optionally replacing the host-facing parts.
pub struct EngineBuilder {
    config: Config,
    launcher: Option<Arc<dyn EmulatorLauncher>>,
    probe: Option<Arc<dyn ResourceProbe>>,
    registry: Option<Arc<dyn EnvironmentRegistry>>,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineBuilder {
    /// Starts from `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            launcher: None,
            probe: None,
            registry: None,
            clock: None,
        }
    }

    /// Uses `launcher` instead of QEMU.
    #[must_use]
    pub fn launcher(mut self, launcher: Arc<dyn EmulatorLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Uses `probe` instead of `/proc`.
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Uses `registry` instead of the configured environments.
    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn EnvironmentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Uses `clock` for artifact retention.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Creates the data directories and opens every component.
    ///
    /// # Errors
    ///
    /// Returns an error if a storage directory cannot be created or an
    /// existing index cannot be read.
    pub fn open(self) -> Result<Engine> {
        let Self {
            config,
            launcher,
            probe,
            registry,
            clock,
        } = self;

        std::fs::create_dir_all(&config.data_dir)?;

        let repository = Arc::new(ArtifactRepository::open(config.artifacts_dir())?);
        let deployments = DeploymentEngine::new(
            Arc::clone(&repository),
            config.deploy.max_concurrent_deployments,
        );

        let launcher = launcher.unwrap_or_else(|| Arc::new(QemuLauncher::new()));
        debug!(launcher = launcher.name(), "using emulator launcher");
        let runner = TestRunner::new(launcher, config.runner.clone());

        let retention = config.collector.retention.clone();
        let collector = match clock {
            Some(clock) => ArtifactCollector::with_clock(config.collector_dir(), retention, clock)?,
            None => ArtifactCollector::open(config.collector_dir(), retention)?,
        };
        let collector = Arc::new(collector);

        let probe = probe.unwrap_or_else(|| Arc::new(ProcProbe::new()));
        let monitor = PerformanceMonitor::new(probe, config.monitor.clone());
        let reports = ReportStore::new(config.reports_dir())?;

        let registry = registry.unwrap_or_else(|| Arc::new(configured_registry(&config)));

        info!(
            data_dir = %config.data_dir.display(),
            environments = registry.list().len(),
            "engine opened"
        );

        Ok(Engine {
            config,
            registry,
            repository,
            deployments,
            runner,
            collector,
            monitor,
            reports,
        })
    }
}

/// Built-in `qemu-<arch>` environments for every emulated architecture,
/// overridden by the configured ones.
fn configured_registry(config: &Config) -> InMemoryRegistry {
    config
        .runner
        .architectures
        .iter()
        .map(|arch| TargetEnvironment::virtual_machine(format!("qemu-{arch}"), *arch))
        .chain(config.environments.iter().cloned())
        .collect()
}

// =============================================================================
// Engine
// =============================================================================

/// Explicit context holding every stagehand component.
pub struct Engine {
    config: Config,
    registry: Arc<dyn EnvironmentRegistry>,
    repository: Arc<ArtifactRepository>,
    deployments: DeploymentEngine,
    runner: TestRunner,
    collector: Arc<ArtifactCollector>,
    monitor: PerformanceMonitor,
    reports: ReportStore,
}

impl Engine {
    /// Opens an engine with the production launcher and probe.
    ///
    /// # Errors
    ///
    /// See [`EngineBuilder::open`].
    pub fn open(config: Config) -> Result<Self> {
        EngineBuilder::new(config).open()
    }

    /// Starts a builder.
    #[must_use]
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Configuration the engine was opened with.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Environment registry.
    #[must_use]
    pub fn registry(&self) -> &dyn EnvironmentRegistry {
        self.registry.as_ref()
    }

    /// Artifact repository.
    #[must_use]
    pub const fn repository(&self) -> &Arc<ArtifactRepository> {
        &self.repository
    }

    /// Deployment engine.
    #[must_use]
    pub const fn deployments(&self) -> &DeploymentEngine {
        &self.deployments
    }

    /// Test runner.
    #[must_use]
    pub const fn runner(&self) -> &TestRunner {
        &self.runner
    }

    /// Artifact collector.
    #[must_use]
    pub fn collector(&self) -> &ArtifactCollector {
        &self.collector
    }

    /// Performance monitor.
    #[must_use]
    pub const fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    /// Looks up an environment.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown ids.
    pub fn environment(&self, id: &str) -> Result<TargetEnvironment> {
        self.registry
            .get(id)
            .ok_or_else(|| CoreError::not_found(format!("environment {id}")))
    }

    /// Creates a plan for `environment_id` carrying the configured
    /// deployment defaults.
    #[must_use]
    pub fn plan(&self, environment_id: impl Into<String>, artifacts: Vec<Artifact>) -> DeploymentPlan {
        DeploymentPlan::new(environment_id, artifacts).with_config(self.config.deploy.clone())
    }

    // -------------------------------------------------------------------------
    // Deployment
    // -------------------------------------------------------------------------

    /// Deploys `plan` onto its environment's staging directory and stores
    /// the completion report.
    ///
    /// A deployment that runs and fails is returned as a result with
    /// status `FAILED`, not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown environments, rejected plans, or when
    /// the report cannot be written.
    pub async fn deploy(&self, plan: DeploymentPlan) -> Result<DeploymentResult> {
        let environment = self.environment(&plan.environment_id)?;
        let target = LocalTarget::new(self.config.staging_dir(&environment))
            .with_commands(environment.run_commands);
        let result = self.deployments.deploy(plan, Arc::new(target)).await?;
        self.save_report(&result)?;
        Ok(result)
    }

    /// Runs a stored plan again as a new deployment.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown deployment ids.
    pub async fn retry(&self, deployment_id: &str) -> Result<DeploymentResult> {
        let retried = self.deployments.retry(deployment_id).await?;
        let result = self.deployments.wait(&retried).await?;
        self.save_report(&result)?;
        Ok(result)
    }

    /// Cancels a running deployment. Returns false if it already finished.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown deployment ids.
    pub async fn cancel(&self, deployment_id: &str) -> Result<bool> {
        Ok(self.deployments.cancel(deployment_id).await?)
    }

    /// Loads a stored completion report.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if no report exists.
    pub fn report(&self, deployment_id: &str) -> Result<CompletionReport> {
        Ok(self.reports.load(deployment_id)?)
    }

    /// Ids of every stored report.
    #[must_use]
    pub fn reports(&self) -> Vec<String> {
        self.reports.list()
    }

    fn save_report(&self, result: &DeploymentResult) -> Result<()> {
        let report = CompletionReport::from_result(result);
        let path = self.reports.save(&report)?;
        debug!(deployment_id = %result.deployment_id, path = %path.display(), "report stored");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Test execution
    // -------------------------------------------------------------------------

    /// Runs `case` on its environment. See [`Engine::run_test_with`].
    ///
    /// # Errors
    ///
    /// See [`Engine::run_test_with`].
    pub async fn run_test(&self, case: TestCase) -> Result<TestRunOutcome> {
        self.run_test_with(case, &CancellationToken::new()).await
    }

    /// Runs `case` under resource monitoring and collects its artifacts.
    ///
    /// The environment decides whether the target is virtual and supplies
    /// the memory size when the case leaves it unset. The monitoring
    /// session belongs to this test only; it is stopped on every path once
    /// started, including when this future is dropped mid-run.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment is unknown or cannot host the
    /// test, or if collection fails. Failing tests are results, not errors.
    pub async fn run_test_with(
        &self,
        mut case: TestCase,
        cancel: &CancellationToken,
    ) -> Result<TestRunOutcome> {
        let environment = self.environment(&case.target.environment_id)?;
        bind_environment(&mut case, &environment)?;
        self.runner.check_capabilities(&case)?;

        let _session = SessionGuard {
            monitor: &self.monitor,
            test_id: &case.id,
        };
        self.monitor.start_monitoring(&case.id, &[]).await?;
        let observer = MonitorAttach {
            monitor: &self.monitor,
        };
        let executed = self.runner.execute(&case, cancel, Some(&observer)).await;
        let metrics = match self.monitor.stop_monitoring_for(&case.id).await {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(test_id = %case.id, error = %e, "resource monitoring failed");
                None
            }
        };
        let result = executed?;

        let collector = Arc::clone(&self.collector);
        let source = result.clone();
        let collection = tokio::task::spawn_blocking(move || collector.collect(&source))
            .await
            .map_err(|e| CommonError::internal(format!("collect task failed: {e}")))??;
        if !collection.skipped.is_empty() {
            warn!(
                test_id = %case.id,
                skipped = collection.skipped.len(),
                "some artifacts could not be collected"
            );
        }

        info!(
            test_id = %case.id,
            environment_id = %environment.id,
            status = %result.status,
            duration_secs = result.duration_secs,
            artifacts = collection.stored.len(),
            score = metrics.as_ref().map(|m| m.score),
            "test run finished"
        );

        Ok(TestRunOutcome {
            result,
            metrics,
            collection,
        })
    }

    // -------------------------------------------------------------------------
    // Collected artifacts
    // -------------------------------------------------------------------------

    /// Storage usage of collected artifacts.
    ///
    /// # Errors
    ///
    /// Returns an error if the collector index is unavailable.
    pub fn storage_stats(&self) -> Result<StorageStats> {
        Ok(self.collector.get_storage_stats()?)
    }

    /// Applies retention to collected artifacts.
    ///
    /// # Errors
    ///
    /// Returns an error if the collector index is unavailable.
    pub fn cleanup_artifacts(&self) -> Result<CleanupStats> {
        Ok(self.collector.cleanup_expired()?)
    }
}

/// Applies the environment's facts to the test target.
fn bind_environment(case: &mut TestCase, environment: &TargetEnvironment) -> Result<()> {
    if environment.architecture != case.target.architecture {
        return Err(CoreError::Incompatible {
            environment_id: environment.id.clone(),
            reason: format!(
                "test targets {}, environment is {}",
                case.target.architecture, environment.architecture
            ),
        });
    }
    if environment.memory_mb > 0 && case.target.memory_mb > environment.memory_mb {
        return Err(CoreError::Incompatible {
            environment_id: environment.id.clone(),
            reason: format!(
                "test needs {} MiB, environment has {} MiB",
                case.target.memory_mb, environment.memory_mb
            ),
        });
    }
    case.target.is_virtual = environment.kind.is_virtual();
    if case.target.memory_mb == 0 {
        case.target.memory_mb = environment.memory_mb;
    }
    Ok(())
}

/// Releases a test's monitoring session if the run ends without stopping
/// it. A no-op once the session was stopped.
struct SessionGuard<'a> {
    monitor: &'a PerformanceMonitor,
    test_id: &'a str,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.monitor.release(self.test_id);
    }
}

/// Attaches the emulator process to its test's monitoring session.
struct MonitorAttach<'a> {
    monitor: &'a PerformanceMonitor,
}

impl ProcessObserver for MonitorAttach<'_> {
    fn process_started(&self, test_id: &str, pid: u32) {
        if !self.monitor.track_process_for(test_id, pid) {
            debug!(test_id, pid, "no monitoring session to attach to");
        }
    }
}
