//! 认证相关的 HTTP 处理器
//!
//! 刷新凭证只通过按域隔离的 HttpOnly cookie 传递：
//! 租户域 `__commerce_refresh`（Path=/api/v1/auth），
//! 管理域 `__commerce_admin_refresh`（Path=/api/v1/admin/auth）。

use crate::{
    auth::password::PasswordHasher,
    context::Realm,
    error::AppError,
    middleware::{client_ip, AppState, RequestId},
    models::auth::{AccountRecoveryRequest, LoginRequest},
    services::auth_service::LoginSuccess,
    services::token_service::ClientInfo,
};
use axum::{
    extract::{Extension, State},
    http::{header::SET_COOKIE, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

/// 租户域刷新 cookie 名
pub const TENANT_REFRESH_COOKIE: &str = "__commerce_refresh";
/// 管理域刷新 cookie 名
pub const ADMIN_REFRESH_COOKIE: &str = "__commerce_admin_refresh";

pub fn refresh_cookie_name(realm: Realm) -> &'static str {
    match realm {
        Realm::Tenant => TENANT_REFRESH_COOKIE,
        Realm::Admin => ADMIN_REFRESH_COOKIE,
    }
}

pub fn refresh_cookie_path(realm: Realm) -> &'static str {
    match realm {
        Realm::Tenant => "/api/v1/auth",
        Realm::Admin => "/api/v1/admin/auth",
    }
}

/// 下发刷新凭证的 Set-Cookie 值
pub fn build_refresh_cookie(realm: Realm, secret: &str, max_age_secs: u64) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path={}; Max-Age={}",
        refresh_cookie_name(realm),
        secret,
        refresh_cookie_path(realm),
        max_age_secs
    )
}

/// 清除刷新 cookie（登出与重放路径）
pub fn clear_refresh_cookie(realm: Realm) -> String {
    format!(
        "{}=; HttpOnly; SameSite=Lax; Path={}; Max-Age=0",
        refresh_cookie_name(realm),
        refresh_cookie_path(realm)
    )
}

/// 从 Cookie 头中解析本域的刷新凭证
pub fn extract_refresh_cookie(headers: &HeaderMap, realm: Realm) -> Option<String> {
    let name = refresh_cookie_name(realm);
    let raw = headers.get("cookie")?.to_str().ok()?;

    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        if key == name && !value.is_empty() {
            Some(value.to_string())
        } else {
            None
        }
    })
}

fn client_info(headers: &HeaderMap, state: &AppState) -> ClientInfo {
    ClientInfo {
        ip: client_ip(headers, state.config.security.trust_proxy),
        agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
    }
}

/// 登录成功应答：访问令牌进 body，刷新凭证进 Set-Cookie
fn login_response(state: &AppState, realm: Realm, success: LoginSuccess) -> Response {
    let cookie = build_refresh_cookie(
        realm,
        &success.refresh.secret,
        state.config.security.refresh_token_exp_secs,
    );

    let mut response = Json(success.response).into_response();
    if let Ok(value) = cookie.parse() {
        response.headers_mut().append(SET_COOKIE, value);
    }
    response
}

// ==================== 租户域 ====================

/// 租户登录
pub async fn tenant_login(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Response, AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    // 低于策略下限的密码不可能是有效口令，在哈希校验之前拒绝
    PasswordHasher::validate_password_policy(&req.password, &state.config)?;

    let client = client_info(&headers, &state);
    let success = state.auth_service.login_tenant(req, &client, request_id).await?;

    Ok(login_response(&state, Realm::Tenant, success))
}

/// 租户令牌刷新
pub async fn tenant_refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    refresh(state, Realm::Tenant, headers).await
}

/// 租户登出（幂等）
pub async fn tenant_logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    logout(state, Realm::Tenant, headers).await
}

/// 忘记密码。账户存在与否应答一致。
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AccountRecoveryRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let client = client_info(&headers, &state);
    state.auth_service.forgot_password(&req.email, &client).await?;

    Ok(Json(json!({
        "message": "If the account exists, a reset email has been sent"
    })))
}

/// 重发验证邮件。与忘记密码一样不区分账户存在性。
pub async fn resend_verification(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AccountRecoveryRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let client = client_info(&headers, &state);
    state
        .auth_service
        .resend_verification(&req.email, &client)
        .await?;

    Ok(Json(json!({
        "message": "If the account exists, a verification email has been sent"
    })))
}

// ==================== 管理域 ====================

/// 管理登录（不携带 tenant_id）
pub async fn admin_login(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Response, AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    PasswordHasher::validate_password_policy(&req.password, &state.config)?;

    let client = client_info(&headers, &state);
    let success = state.auth_service.login_admin(req, &client, request_id).await?;

    Ok(login_response(&state, Realm::Admin, success))
}

/// 管理令牌刷新
pub async fn admin_refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    refresh(state, Realm::Admin, headers).await
}

/// 管理登出
pub async fn admin_logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    logout(state, Realm::Admin, headers).await
}

// ==================== 共享实现 ====================

async fn refresh(
    state: Arc<AppState>,
    realm: Realm,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let secret = extract_refresh_cookie(&headers, realm).ok_or(AppError::Unauthenticated)?;
    let client = client_info(&headers, &state);

    match state.auth_service.refresh(&secret, realm, &client).await {
        Ok(success) => Ok(login_response(&state, realm, success)),
        // 重放：家族已被服务端撤销，这里清掉客户端的 cookie
        Err(e @ AppError::Replay) => {
            let mut response = e.into_response();
            if let Ok(value) = clear_refresh_cookie(realm).parse() {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Ok(response)
        }
        Err(e) => Err(e),
    }
}

async fn logout(
    state: Arc<AppState>,
    realm: Realm,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if let Some(secret) = extract_refresh_cookie(&headers, realm) {
        state.auth_service.logout(&secret, realm).await?;
    }

    let mut response = Json(json!({"message": "Logged out"})).into_response();
    if let Ok(value) = clear_refresh_cookie(realm).parse() {
        response.headers_mut().append(SET_COOKIE, value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_cookie_attributes() {
        let cookie = build_refresh_cookie(Realm::Tenant, "abc123", 604800);
        assert_eq!(
            cookie,
            "__commerce_refresh=abc123; HttpOnly; SameSite=Lax; Path=/api/v1/auth; Max-Age=604800"
        );

        let admin = build_refresh_cookie(Realm::Admin, "xyz", 3600);
        assert_eq!(
            admin,
            "__commerce_admin_refresh=xyz; HttpOnly; SameSite=Lax; Path=/api/v1/admin/auth; Max-Age=3600"
        );
    }

    #[test]
    fn test_clearing_cookie() {
        let cookie = clear_refresh_cookie(Realm::Tenant);
        assert_eq!(
            cookie,
            "__commerce_refresh=; HttpOnly; SameSite=Lax; Path=/api/v1/auth; Max-Age=0"
        );
        assert!(clear_refresh_cookie(Realm::Admin).contains("Max-Age=0"));
    }

    #[test]
    fn test_extract_refresh_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            "other=1; __commerce_refresh=secret-value; theme=dark"
                .parse()
                .unwrap(),
        );

        assert_eq!(
            extract_refresh_cookie(&headers, Realm::Tenant),
            Some("secret-value".to_string())
        );
        // 另一个域的 cookie 不可见
        assert_eq!(extract_refresh_cookie(&headers, Realm::Admin), None);
    }

    #[test]
    fn test_extract_refresh_cookie_empty_value() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", "__commerce_refresh=".parse().unwrap());
        assert_eq!(extract_refresh_cookie(&headers, Realm::Tenant), None);
    }
}
