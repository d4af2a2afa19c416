//! JWT 认证中间件
//! 租户域与管理域各有一个中间件，互相拒绝对方域的令牌

use crate::{
    auth::jwt::JwtService,
    context::{Realm, SecurityContext},
    error::AppError,
    middleware::RequestId,
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

/// 认证上下文（附加到请求扩展）
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub actor_id: Uuid,
    pub realm: Realm,
    pub tenant_id: Option<Uuid>,
    pub request_id: Uuid,
}

impl AuthContext {
    /// 从认证上下文派生一次性的安全上下文。
    /// 租户 id 来自已验证的签名令牌，绝不来自客户端头。
    pub fn security_context(&self) -> SecurityContext {
        SecurityContext {
            tenant_id: self.tenant_id,
            actor_id: Some(self.actor_id),
            realm: self.realm,
            request_id: self.request_id,
        }
    }
}

// 实现 FromRequestParts 以便在 handler 中直接提取 AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AppError::Unauthenticated)
    }
}

/// 从 Authorization 头提取令牌
pub fn extract_token(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
        .ok_or(AppError::Unauthenticated)
}

/// 租户域认证中间件
pub async fn tenant_auth_middleware(
    State(jwt_service): State<Arc<JwtService>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    authenticate(jwt_service, Realm::Tenant, req, next).await
}

/// 管理域认证中间件：租户域令牌即使格式合法也会被拒绝
pub async fn admin_auth_middleware(
    State(jwt_service): State<Arc<JwtService>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    authenticate(jwt_service, Realm::Admin, req, next).await
}

async fn authenticate(
    jwt_service: Arc<JwtService>,
    realm: Realm,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    // 从 Authorization 头提取令牌
    let token = extract_token(req.headers())?;

    // 按域验证令牌（另一个域的密钥签出的令牌在签名层即失败）
    let claims = jwt_service.validate_access_token(&token, realm)?;

    let actor_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthenticated)?;
    let tenant_id = match claims.tenant_id {
        Some(ref raw) => Some(Uuid::parse_str(raw).map_err(|_| AppError::Unauthenticated)?),
        None => None,
    };

    // request_id 由请求追踪中间件注入
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0)
        .unwrap_or_else(Uuid::new_v4);

    let auth_context = AuthContext {
        actor_id,
        realm,
        tenant_id,
        request_id,
    };

    // 附加到请求扩展
    req.extensions_mut().insert(auth_context);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_token_valid() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer test_token_123".parse().unwrap());

        let token = extract_token(&headers).unwrap();
        assert_eq!(token, "test_token_123");
    }

    #[test]
    fn test_extract_token_missing() {
        let headers = HeaderMap::new();
        assert!(extract_token(&headers).is_err());
    }

    #[test]
    fn test_extract_token_invalid_format() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "InvalidFormat".parse().unwrap());

        assert!(extract_token(&headers).is_err());
    }

    #[test]
    fn test_security_context_from_auth_context() {
        let tenant_id = Uuid::new_v4();
        let auth = AuthContext {
            actor_id: Uuid::new_v4(),
            realm: Realm::Tenant,
            tenant_id: Some(tenant_id),
            request_id: Uuid::new_v4(),
        };

        let ctx = auth.security_context();
        assert_eq!(ctx.tenant_id, Some(tenant_id));
        assert_eq!(ctx.actor_id, Some(auth.actor_id));
        assert_eq!(ctx.realm, Realm::Tenant);
    }
}
