//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
};

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    error::AppError,
    handlers,
    middleware::AppState,
    services::{
        audit_service::EventRegistry, AuditService, AuthService, CartService, TokenService,
    },
};

/// 请求体上限（登录与购物车请求都很小）
const BODY_LIMIT_BYTES: usize = 64 * 1024;

/// 构建应用状态：所有服务在这里装配一次。
/// 事件注册表在此构建并注入，之后不再变更。
pub fn build_state(config: Arc<AppConfig>, db: sqlx::PgPool) -> Result<Arc<AppState>, AppError> {
    let jwt_service = Arc::new(JwtService::from_config(&config)?);

    let registry = Arc::new(EventRegistry::with_defaults());
    let audit_service = Arc::new(AuditService::new(db.clone(), registry));

    let token_service = Arc::new(TokenService::new(
        db.clone(),
        audit_service.clone(),
        config.clone(),
    ));

    let auth_service = Arc::new(AuthService::new(
        db.clone(),
        jwt_service.clone(),
        token_service.clone(),
        audit_service.clone(),
        config.clone(),
    ));

    let cart_service = Arc::new(CartService::new(db.clone(), audit_service.clone()));

    Ok(Arc::new(AppState {
        config,
        db,
        jwt_service,
        auth_service,
        token_service,
        audit_service,
        cart_service,
    }))
}

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 租户域认证端点（无需令牌；刷新与登出靠 cookie）
    let tenant_auth_routes = Router::new()
        .route("/api/v1/auth/login", post(handlers::auth::tenant_login))
        .route("/api/v1/auth/refresh", post(handlers::auth::tenant_refresh))
        .route("/api/v1/auth/logout", post(handlers::auth::tenant_logout))
        .route(
            "/api/v1/auth/forgot-password",
            post(handlers::auth::forgot_password),
        )
        .route(
            "/api/v1/auth/resend-verification",
            post(handlers::auth::resend_verification),
        );

    // 管理域认证端点
    let admin_auth_routes = Router::new()
        .route("/api/v1/admin/auth/login", post(handlers::auth::admin_login))
        .route(
            "/api/v1/admin/auth/refresh",
            post(handlers::auth::admin_refresh),
        )
        .route(
            "/api/v1/admin/auth/logout",
            post(handlers::auth::admin_logout),
        );

    // 租户域受保护端点：租户上下文只来自已验证的令牌
    let tenant_routes = Router::new()
        .route("/api/v1/cart", get(handlers::cart::get_cart))
        .route("/api/v1/cart/items", post(handlers::cart::add_item))
        .route(
            "/api/v1/cart/items/{id}",
            delete(handlers::cart::remove_item),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.jwt_service.clone(),
            crate::auth::middleware::tenant_auth_middleware,
        ));

    // 管理域受保护端点：租户域令牌在这里被拒绝
    let admin_routes = Router::new()
        .route("/api/v1/admin/events", get(handlers::event::list_events))
        .route_layer(axum::middleware::from_fn_with_state(
            state.jwt_service.clone(),
            crate::auth::middleware::admin_auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(tenant_auth_routes)
        .merge(admin_auth_routes)
        .merge(tenant_routes)
        .merge(admin_routes)
        .layer(axum::middleware::from_fn(
            crate::middleware::request_tracking_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
        .with_state(state)
}
