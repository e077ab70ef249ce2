//! Repository integration tests: integrity, resolution order, packaging.

use std::fs;

use stagehand_artifact::{Artifact, ArtifactError, ArtifactRepository, ArtifactType, unpack_package};
use tempfile::tempdir;

fn artifact(id: &str, artifact_type: ArtifactType, content: &str, deps: &[&str]) -> Artifact {
    Artifact::new(format!("{id}.file"), artifact_type, content, format!("/opt/{id}"))
        .with_id(id)
        .with_dependencies(deps.iter().copied())
}

#[test]
fn reopened_repository_serves_stored_artifacts() {
    let dir = tempdir().unwrap();
    {
        let repo = ArtifactRepository::open(dir.path()).unwrap();
        repo.store(&artifact("lib", ArtifactType::Library, "ELF", &[])).unwrap();
        repo.store(&artifact("bin", ArtifactType::Binary, "ELF2", &["lib"])).unwrap();
    }

    let repo = ArtifactRepository::open(dir.path()).unwrap();
    let loaded = repo.get("bin").unwrap().unwrap();
    assert_eq!(loaded.content, b"ELF2");
    assert_eq!(loaded.dependencies, vec!["lib".to_string()]);
    assert_eq!(repo.dependents("lib").unwrap(), vec!["bin".to_string()]);
    assert_eq!(repo.list_ids().unwrap(), vec!["bin".to_string(), "lib".to_string()]);
}

#[test]
fn tampered_content_fails_checksum_on_load() {
    let dir = tempdir().unwrap();
    {
        let repo = ArtifactRepository::open(dir.path()).unwrap();
        repo.store(&artifact("cfg", ArtifactType::Config, "a = 1", &[])).unwrap();
    }
    fs::write(dir.path().join("config").join("cfg_cfg.file"), "a = 2").unwrap();

    let repo = ArtifactRepository::open(dir.path()).unwrap();
    assert!(!repo.verify_stored("cfg").unwrap());
    assert!(matches!(
        repo.get("cfg"),
        Err(ArtifactError::ChecksumMismatch { .. })
    ));
    // Corrupt entries are skipped when listing by type.
    assert!(repo.get_by_type(ArtifactType::Config).unwrap().is_empty());
}

#[test]
fn resolution_puts_dependencies_first_exactly_once() {
    let dir = tempdir().unwrap();
    let repo = ArtifactRepository::open(dir.path()).unwrap();
    repo.store(&artifact("a", ArtifactType::Script, "a", &[])).unwrap();
    repo.store(&artifact("b", ArtifactType::Script, "b", &["a"])).unwrap();
    repo.store(&artifact("c", ArtifactType::Script, "c", &["a", "b"])).unwrap();
    repo.store(&artifact("d", ArtifactType::Data, "d", &["c"])).unwrap();

    let order = repo
        .resolve_dependencies(&["d".to_string(), "b".to_string()])
        .unwrap();
    assert_eq!(order, vec!["a", "b", "c", "d"]);

    for id in &order {
        let position = order.iter().position(|x| x == id).unwrap();
        for dep in repo.get(id).unwrap().unwrap().dependencies {
            assert!(order.iter().position(|x| *x == dep).unwrap() < position);
        }
    }
}

#[test]
fn unknown_dependency_is_not_found() {
    let dir = tempdir().unwrap();
    let repo = ArtifactRepository::open(dir.path()).unwrap();
    repo.store(&artifact("a", ArtifactType::Script, "a", &["ghost"])).unwrap();

    let err = repo.resolve_dependencies(&["a".to_string()]).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn package_round_trip_preserves_artifacts() {
    let dir = tempdir().unwrap();
    let repo = ArtifactRepository::open(dir.path()).unwrap();
    let base = artifact("base", ArtifactType::Library, "libbase", &[])
        .with_metadata("arch", serde_json::json!("aarch64"));
    let tool = artifact("tool", ArtifactType::Binary, "tool-bytes", &["base"]).with_permissions("0750");
    repo.store(&base).unwrap();
    repo.store(&tool).unwrap();

    let bytes = repo.create_package(&["tool".to_string()]).unwrap().unwrap();
    let unpacked = unpack_package(&bytes).unwrap();

    assert_eq!(unpacked, vec![base, tool]);
}

#[test]
fn store_refuses_names_and_targets_outside_the_layout() {
    let dir = tempdir().unwrap();
    let repo = ArtifactRepository::open(dir.path()).unwrap();

    let escaping = Artifact::new("x.sh", ArtifactType::Script, "x", "/../x.sh");
    let slashed = Artifact::new("../../x.sh", ArtifactType::Script, "x", "/opt/");
    let sidecar = Artifact::new("index.meta", ArtifactType::Data, "{}", "/data/");
    for bad in [escaping, slashed, sidecar] {
        let err = repo.store(&bad).unwrap_err();
        assert!(matches!(err, ArtifactError::Invalid { .. }), "{err}");
    }
    assert!(repo.list_ids().unwrap().is_empty());
    assert!(!dir.path().join("x.sh").exists());
}

#[test]
fn package_with_unknown_id_is_none() {
    let dir = tempdir().unwrap();
    let repo = ArtifactRepository::open(dir.path()).unwrap();
    repo.store(&artifact("a", ArtifactType::Script, "a", &[])).unwrap();

    let package = repo
        .create_package(&["a".to_string(), "missing".to_string()])
        .unwrap();
    assert!(package.is_none());
}
