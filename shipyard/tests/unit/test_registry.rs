//! Project registry tests

use shipyard::errors::ErrorKind;
use shipyard::filesys::file::File;
use shipyard::models::project::Credential;
use shipyard::registry::ProjectRegistry;

use crate::common::project_config;

#[tokio::test]
async fn test_identical_put_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let file = File::new(dir.path().join("projects.json"));
    let registry = ProjectRegistry::open(file.clone()).await.unwrap();

    let first = registry.put("api", project_config("/srv/api")).await.unwrap();
    let stored = file.read_string().await.unwrap();
    let second = registry.put("api", project_config("/srv/api")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(file.read_string().await.unwrap(), stored);
    assert_eq!(registry.list().await.len(), 1);
}

#[tokio::test]
async fn test_invalid_names_are_rejected() {
    let registry = ProjectRegistry::in_memory();
    for name in ["", "api server", "../etc", "api;rm"] {
        let err = registry.put(name, project_config("/srv/api")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError, "name {:?}", name);
    }
    assert!(registry.list().await.is_empty());
}

#[tokio::test]
async fn test_only_the_credential_reference_is_stored() {
    let dir = tempfile::tempdir().unwrap();
    let file = File::new(dir.path().join("projects.json"));
    let registry = ProjectRegistry::open(file.clone()).await.unwrap();

    let mut config = project_config("/srv/api");
    config.server.credential = Credential::PasswordEnv {
        var: "API_SSH_PASSWORD".to_string(),
    };
    registry.put("api", config).await.unwrap();

    let stored = file.read_string().await.unwrap();
    assert!(stored.contains("password_env"));
    assert!(stored.contains("API_SSH_PASSWORD"));
    assert!(!stored.contains("\"password\""));
}

#[tokio::test]
async fn test_unknown_project_is_not_found() {
    let registry = ProjectRegistry::in_memory();
    assert_eq!(
        registry.get("api").await.unwrap_err().kind(),
        ErrorKind::NotFoundError
    );
    assert_eq!(
        registry.record_status("api", "running").await.unwrap_err().kind(),
        ErrorKind::NotFoundError
    );
}
