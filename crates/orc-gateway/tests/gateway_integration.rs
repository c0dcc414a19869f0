#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use orc_core::{AgentId, AgentModelConfig, ConfidenceConfig, OrchestratorConfig, PathsConfig, Role};
use orc_gateway::{router, GatewayState};
use orc_repo::fake::InMemoryGateway;
use orc_repo::RepositoryGateway;
use orc_service::OrchestratorService;
use tower::ServiceExt;

fn sample_config(dir: &std::path::Path) -> OrchestratorConfig {
    let model = AgentModelConfig {
        provider: "anthropic".to_string(),
        model: "claude".to_string(),
        temperature: 0.2,
        max_tokens: 1024,
    };
    let mut worker_models = HashMap::new();
    let mut confidence = HashMap::new();
    for role in Role::ALL {
        worker_models.insert(role, model.clone());
        let mut weights = HashMap::new();
        weights.insert("tests_passed".to_string(), 1.0);
        confidence.insert(role, ConfidenceConfig { weights, threshold: 0.5 });
    }
    OrchestratorConfig {
        target: "write a calculator".to_string(),
        coordinator_model: model.clone(),
        structurer_model: model,
        worker_models,
        worker_retry: HashMap::new(),
        coordinator_rate_limit: Default::default(),
        confidence,
        paths: PathsConfig {
            logs_dir: dir.join("logs"),
            repo_dir: dir.join("repo"),
            config_path: dir.join("orchestrator.toml"),
        },
        claim_lease_ms: 20_000,
        request_timeout_ms: 10_000,
        worker_poll_timeout_ms: 50,
        queue_soft_cap: 1_000,
        log_tail_lines: 100,
        subscriber_buffer: 8,
        parallel_roles: false,
    }
}

fn test_app(dir: &std::path::Path) -> axum::Router {
    let service = Arc::new(OrchestratorService::new(sample_config(dir)));
    let repo: Arc<dyn RepositoryGateway> = Arc::new(InMemoryGateway::new());
    let state = GatewayState::new(service, repo, HashMap::new());
    router(state)
}

#[tokio::test]
async fn health_reports_every_agent_stopped_initially() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["agents"].as_array().unwrap().len(), AgentId::ALL.len());
}

#[tokio::test]
async fn unknown_agent_group_returns_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let response = app
        .oneshot(Request::builder().method("POST").uri("/start_ai9").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_config_item_rejects_a_value_that_breaks_validation() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let body = serde_json::json!({ "key": "claim_lease_ms", "value": 1 }).to_string();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/update_config_item")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn file_content_returns_the_binary_sentinel_for_binary_files() {
    let dir = tempfile::tempdir().unwrap();
    let repo = InMemoryGateway::new();
    repo.write("logo.png", vec![0x89, 0x50, 0x4e, 0x47, 0x00]).await.unwrap();
    let service = Arc::new(OrchestratorService::new(sample_config(dir.path())));
    let state = GatewayState::new(service, Arc::new(repo), HashMap::new());
    let app = router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/file_content?path=logo.png")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"[Binary file: logo.png]");
}

#[tokio::test]
async fn file_content_404s_for_a_missing_path() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/file_content?path=missing.py")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn clear_repo_resets_the_structure_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let repo = InMemoryGateway::new();
    repo.write("a.py", b"a".to_vec()).await.unwrap();
    let service = Arc::new(OrchestratorService::new(sample_config(dir.path())));
    service.update_structure(repo.tree().await.unwrap()).await;
    let state = GatewayState::new(service.clone(), Arc::new(repo), HashMap::new());
    let app = router(state);

    let response = app
        .oneshot(Request::builder().method("POST").uri("/clear_repo").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!service.structure().await.contains_file("a.py"));
}
