//! Deployment engine integration tests.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stagehand_artifact::{Artifact, ArtifactRepository, ArtifactType, Dependency, PackageManager};
use stagehand_deploy::{
    CompletionReport, DeployError, DeploymentConfig, DeploymentEngine, DeploymentPlan,
    DeploymentStatus, DeploymentTarget, InstrumentationConfig, LocalTarget, Result,
};
use tempfile::TempDir;

fn repository() -> (TempDir, Arc<ArtifactRepository>) {
    let dir = tempfile::tempdir().unwrap();
    let repo = ArtifactRepository::open(dir.path().join("artifacts")).unwrap();
    (dir, Arc::new(repo))
}

fn three_artifacts() -> Vec<Artifact> {
    let lib = Artifact::new("libhelper.so", ArtifactType::Library, "ELF-lib", "/usr/lib/libhelper.so");
    let cfg = Artifact::new("suite.toml", ArtifactType::Config, "iterations = 3", "/etc/suite.toml");
    let script = Artifact::new("run.sh", ArtifactType::Script, "#!/bin/sh\necho ok\n", "/opt/run.sh")
        .with_dependencies([lib.id.clone(), cfg.id.clone()]);
    vec![script, lib, cfg]
}

/// Scripted target for exercising retries and failures.
#[derive(Default)]
struct FakeTarget {
    connect_failures: AtomicU32,
    verify_always_fails: bool,
    connect_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    transferred: Mutex<Vec<String>>,
    rolled_back: Mutex<Vec<String>>,
    disconnects: AtomicU32,
}

#[async_trait]
impl DeploymentTarget for FakeTarget {
    fn describe(&self) -> String {
        "fake".to_string()
    }

    async fn connect(&self) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DeployError::target("connection refused"));
        }
        Ok(())
    }

    async fn transfer(&self, artifact: &Artifact) -> Result<u64> {
        self.transferred.lock().unwrap().push(artifact.id.clone());
        Ok(artifact.size)
    }

    async fn install(&self, dependency: &Dependency) -> Result<()> {
        if dependency.name.starts_with("broken") {
            return Err(DeployError::target(format!("cannot install {}", dependency.name)));
        }
        Ok(())
    }

    async fn configure_instrumentation(&self, _config: &InstrumentationConfig) -> Result<()> {
        Ok(())
    }

    async fn verify(&self, _artifacts: &[Artifact]) -> Result<()> {
        if self.verify_always_fails {
            return Err(DeployError::target("verification failed"));
        }
        Ok(())
    }

    async fn rollback(&self, artifacts: &[Artifact]) -> Result<()> {
        self.rolled_back
            .lock()
            .unwrap()
            .extend(artifacts.iter().map(|a| a.id.clone()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn wait_for_status(engine: &DeploymentEngine, id: &str, status: DeploymentStatus) {
    for _ in 0..1000 {
        if engine.status(id).await.map(|r| r.status) == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("deployment {id} never reached {status}");
}

#[tokio::test]
async fn three_artifacts_deploy_to_local_target() {
    let (dir, repo) = repository();
    let engine = DeploymentEngine::new(Arc::clone(&repo), 4);
    let staging = dir.path().join("staging");
    let target = Arc::new(LocalTarget::new(&staging));

    let artifacts = three_artifacts();
    let script_id = artifacts[0].id.clone();
    let plan = DeploymentPlan::new("vm-x86", artifacts)
        .with_dependencies(vec![Dependency::new("jq", PackageManager::Apt)])
        .with_instrumentation(InstrumentationConfig {
            enable_coverage: true,
            ..Default::default()
        });

    let result = engine.deploy(plan, target).await.unwrap();

    assert_eq!(result.status, DeploymentStatus::Completed);
    assert!(result.error.is_none());
    assert_eq!(result.artifacts_deployed, 3);
    assert_eq!(result.dependencies_installed, 1);
    assert_eq!(result.steps.len(), 6);
    assert_eq!(result.steps_completed(), result.steps.len());
    assert!(result.steps.iter().all(|s| s.progress == 100 && s.ended_at.is_some()));
    assert!((result.completion_percentage() - 100.0).abs() < f64::EPSILON);

    // The dependent script is resolved after both of its dependencies.
    let order = result.steps[0].details["resolved_order"].as_array().unwrap();
    assert_eq!(order.last().unwrap().as_str().unwrap(), script_id);

    assert!(staging.join("opt/run.sh").exists());
    assert!(staging.join("usr/lib/libhelper.so").exists());
    assert!(staging.join(".stagehand/instrumentation.json").exists());
    assert!(repo.get(&script_id).unwrap().is_some());

    let report = CompletionReport::from_result(&result);
    assert_eq!(report.summary.steps_completed, report.summary.steps_total);
    assert!(report.summary.performance.unwrap().total_duration_seconds > 0.0);
    assert_eq!(engine.active_deployments(), 0);
}

#[tokio::test]
async fn invalid_plan_is_rejected_synchronously() {
    let (_dir, repo) = repository();
    let engine = DeploymentEngine::new(repo, 1);
    let target = Arc::new(FakeTarget::default());

    let empty = Artifact::new("empty", ArtifactType::Data, Vec::<u8>::new(), "/empty");
    let err = engine
        .submit(DeploymentPlan::new("env", vec![empty]), target.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::Validation(ref issues) if !issues.is_empty()));
    assert!(engine.list().await.is_empty());
    assert!(target.transferred.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_connect_failures_are_retried_with_backoff() {
    let (_dir, repo) = repository();
    let engine = DeploymentEngine::new(repo, 1);
    let target = Arc::new(FakeTarget {
        connect_failures: AtomicU32::new(2),
        ..Default::default()
    });

    let started = tokio::time::Instant::now();
    let result = engine
        .deploy(DeploymentPlan::new("env", three_artifacts()), target.clone())
        .await
        .unwrap();

    assert_eq!(result.status, DeploymentStatus::Completed);
    assert_eq!(result.retry_count, 2);
    assert_eq!(result.steps[1].retry_count, 2);
    // 2s then 4s of backoff elapsed on the paused clock.
    assert!(started.elapsed() >= Duration::from_secs(6));
    assert_eq!(target.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_and_roll_back() {
    let (_dir, repo) = repository();
    let engine = DeploymentEngine::new(repo, 1);
    let target = Arc::new(FakeTarget {
        verify_always_fails: true,
        ..Default::default()
    });
    let config = DeploymentConfig {
        retry_attempts: 1,
        ..Default::default()
    };

    let result = engine
        .deploy(
            DeploymentPlan::new("env", three_artifacts()).with_config(config),
            target.clone(),
        )
        .await
        .unwrap();

    assert_eq!(result.status, DeploymentStatus::Failed);
    assert!(result.error.as_deref().unwrap().contains("verification failed"));
    // Partial progress is still reported.
    assert_eq!(result.artifacts_deployed, 3);
    let last = result.steps.last().unwrap();
    assert_eq!(last.status, DeploymentStatus::Failed);
    assert!(last.error.is_some());
    assert_eq!(last.retry_count, 1);
    assert_eq!(target.rolled_back.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn required_dependency_failure_fails_optional_is_skipped() {
    let (_dir, repo) = repository();
    let engine = DeploymentEngine::new(repo, 2);
    let config = DeploymentConfig {
        retry_attempts: 0,
        cleanup_on_failure: false,
        ..Default::default()
    };

    let optional = DeploymentPlan::new("env", three_artifacts())
        .with_dependencies(vec![
            Dependency::new("broken-extra", PackageManager::Pip).optional(),
            Dependency::new("jq", PackageManager::Apt),
        ])
        .with_config(config.clone());
    let result = engine
        .deploy(optional, Arc::new(FakeTarget::default()))
        .await
        .unwrap();
    assert_eq!(result.status, DeploymentStatus::Completed);
    assert_eq!(result.dependencies_installed, 1);

    let required = DeploymentPlan::new("env", three_artifacts())
        .with_dependencies(vec![Dependency::new("broken-core", PackageManager::Apt)])
        .with_config(config);
    let target = Arc::new(FakeTarget::default());
    let result = engine.deploy(required, target.clone()).await.unwrap();
    assert_eq!(result.status, DeploymentStatus::Failed);
    assert_eq!(result.artifacts_deployed, 0);
    // Later steps never started.
    assert_eq!(result.steps.len(), 3);
    assert!(target.transferred.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrency_cap_queues_in_order() {
    let (_dir, repo) = repository();
    let engine = DeploymentEngine::new(repo, 1);
    let target = Arc::new(FakeTarget {
        connect_delay: Some(Duration::from_secs(10)),
        ..Default::default()
    });

    let first = engine
        .submit(DeploymentPlan::new("env", three_artifacts()), target.clone())
        .await
        .unwrap();
    let second = engine
        .submit(DeploymentPlan::new("env", three_artifacts()), target.clone())
        .await
        .unwrap();

    wait_for_status(&engine, &first, DeploymentStatus::Connecting).await;
    assert_eq!(engine.status(&second).await.unwrap().status, DeploymentStatus::Pending);
    assert_eq!(engine.active_deployments(), 1);

    let first = engine.wait(&first).await.unwrap();
    let second = engine.wait(&second).await.unwrap();
    assert_eq!(first.status, DeploymentStatus::Completed);
    assert_eq!(second.status, DeploymentStatus::Completed);
    assert_eq!(target.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(engine.active_deployments(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_running_and_queued_deployments() {
    let (_dir, repo) = repository();
    let engine = DeploymentEngine::new(repo, 1);
    let target = Arc::new(FakeTarget {
        connect_delay: Some(Duration::from_secs(1000)),
        ..Default::default()
    });

    let running = engine
        .submit(DeploymentPlan::new("env", three_artifacts()), target.clone())
        .await
        .unwrap();
    let queued = engine
        .submit(DeploymentPlan::new("env", three_artifacts()), target.clone())
        .await
        .unwrap();
    wait_for_status(&engine, &running, DeploymentStatus::Connecting).await;

    assert!(engine.cancel(&queued).await.unwrap());
    assert!(engine.cancel(&running).await.unwrap());

    let running = engine.wait(&running).await.unwrap();
    let queued = engine.wait(&queued).await.unwrap();
    assert_eq!(running.status, DeploymentStatus::Cancelled);
    assert!(running.error.is_none());
    assert_eq!(queued.status, DeploymentStatus::Cancelled);
    assert!(queued.steps.is_empty());
    assert!(!engine.cancel(&running.deployment_id).await.unwrap());
    assert_eq!(target.disconnects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retry_resubmits_failed_plan() {
    let (_dir, repo) = repository();
    let engine = DeploymentEngine::new(repo, 1);
    let config = DeploymentConfig {
        retry_attempts: 0,
        ..Default::default()
    };
    let target = Arc::new(FakeTarget {
        connect_failures: AtomicU32::new(1),
        ..Default::default()
    });

    let failed = engine
        .deploy(
            DeploymentPlan::new("env", three_artifacts()).with_config(config),
            target,
        )
        .await
        .unwrap();
    assert_eq!(failed.status, DeploymentStatus::Failed);

    let retried_id = engine.retry(&failed.deployment_id).await.unwrap();
    assert_ne!(retried_id, failed.deployment_id);
    let retried = engine.wait(&retried_id).await.unwrap();
    assert_eq!(retried.status, DeploymentStatus::Completed);
    assert_eq!(retried.plan_id, failed.plan_id);

    let err = engine.retry(&retried_id).await.unwrap_err();
    assert!(err.to_string().contains("invalid state"));
    assert!(engine.wait("nope").await.unwrap_err().is_not_found());
    assert_eq!(engine.list().await.len(), 2);
}
