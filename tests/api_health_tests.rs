//! 健康检查 API 集成测试

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use tower::ServiceExt;

mod common;
use common::{create_lazy_pool, create_test_app_state, create_test_config, setup_test_db};

#[tokio::test]
async fn test_health_check() {
    let config = create_test_config();
    let state = create_test_app_state(create_lazy_pool(&config));
    let app = commerce_core::routes::create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let config = create_test_config();
    let state = create_test_app_state(create_lazy_pool(&config));
    let app = commerce_core::routes::create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/v1/nonexistent")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_request_id_header_present() {
    let config = create_test_config();
    let state = create_test_app_state(create_lazy_pool(&config));
    let app = commerce_core::routes::create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("x-request-id header missing")
        .to_str()
        .unwrap();
    assert!(uuid::Uuid::parse_str(request_id).is_ok());
}

#[tokio::test]
#[ignore] // 需要数据库
async fn test_readiness_check() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let state = create_test_app_state(pool);
    let app = commerce_core::routes::create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/ready")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    // 就绪 = 数据库连通 + 隔离策略矩阵完整
    assert_eq!(json["ready"], true);
    assert_eq!(json["checks"][0]["name"], "database");
    assert_eq!(json["checks"][0]["status"], "healthy");
    assert_eq!(json["checks"][1]["name"], "row_isolation");
    assert_eq!(json["checks"][1]["status"], "healthy");
}
