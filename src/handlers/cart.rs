//! 购物车 HTTP 处理器
//! 租户上下文一律派生自已验证的令牌，绝不读客户端头

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::AppState,
    models::cart::AddItemRequest,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// 查看当前用户的购物车
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let ctx = auth.security_context();
    let view = state.cart_service.view(&ctx).await?;
    Ok(Json(view))
}

/// 添加行项
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(req): Json<AddItemRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let ctx = auth.security_context();
    let view = state.cart_service.add_item(&ctx, req).await?;
    Ok(Json(view))
}

/// 删除行项
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = auth.security_context();
    let view = state.cart_service.remove_item(&ctx, item_id).await?;
    Ok(Json(view))
}
