//! 错误响应格式的集成测试

use axum::response::IntoResponse;
use commerce_core::error::AppError;
use http_body_util::BodyExt;

async fn response_json(error: AppError) -> (u16, serde_json::Value) {
    let response = error.into_response();
    let status = response.status().as_u16();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

#[tokio::test]
async fn test_error_response_shape() {
    let (status, json) = response_json(AppError::NotFound).await;

    assert_eq!(status, 404);
    assert_eq!(json["error"]["code"], 404);
    assert_eq!(json["error"]["message"], "Resource not found");
    assert!(json["error"]["request_id"].is_string());
}

#[tokio::test]
async fn test_replay_response_matches_unauthenticated() {
    let (replay_status, replay_json) = response_json(AppError::Replay).await;
    let (auth_status, auth_json) = response_json(AppError::Unauthenticated).await;

    // 重放对外与普通认证失败完全同形
    assert_eq!(replay_status, auth_status);
    assert_eq!(replay_json["error"]["code"], auth_json["error"]["code"]);
    assert_eq!(
        replay_json["error"]["message"],
        auth_json["error"]["message"]
    );
}

#[tokio::test]
async fn test_internal_errors_hide_details() {
    let (status, json) = response_json(AppError::Database(sqlx::Error::RowNotFound)).await;

    assert_eq!(status, 500);
    let message = json["error"]["message"].as_str().unwrap();
    assert!(!message.contains("sqlx"));
    assert!(!message.contains("RowNotFound"));
}

#[tokio::test]
async fn test_validation_error_carries_message() {
    let (status, json) = response_json(AppError::Validation("quantity out of range".into())).await;

    assert_eq!(status, 422);
    assert_eq!(json["error"]["message"], "quantity out of range");
}
