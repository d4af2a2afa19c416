//! HTTP 中间件与应用状态
//! 请求追踪、客户端 IP 提取

use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// 应用状态
///
/// 服务用 Arc 包装共享给所有请求；事件注册表在启动时构建一次，
/// 经由这里注入，没有全局可变状态。
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<crate::config::AppConfig>,
    pub db: sqlx::PgPool,
    pub jwt_service: Arc<crate::auth::jwt::JwtService>,
    pub auth_service: Arc<crate::services::AuthService>,
    pub token_service: Arc<crate::services::TokenService>,
    pub audit_service: Arc<crate::services::AuditService>,
    pub cart_service: Arc<crate::services::CartService>,
}

/// 请求 id（由追踪中间件注入请求扩展）
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// 请求追踪中间件
/// 为每个请求生成 request_id，记录时延与计数指标
pub async fn request_tracking_middleware(mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    req.extensions_mut().insert(RequestId(request_id));

    let method = req.method().to_string();
    let uri = req.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    async move {
        let start = Instant::now();

        let mut response = next.run(req).await;

        let elapsed = start.elapsed();
        let status = response.status().as_u16();

        let status_class = match status {
            200..=299 => "2xx",
            300..=399 => "3xx",
            400..=499 => "4xx",
            _ => "5xx",
        };
        metrics::counter!("http_requests_total", "status" => status_class).increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            status,
            elapsed_ms = elapsed.as_millis(),
            "Request completed"
        );

        if let Ok(value) = request_id.to_string().parse() {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 提取客户端 IP。
/// 只有 trust_proxy 打开时才读代理头；取 X-Forwarded-For 的第一跳。
pub fn client_ip(headers: &HeaderMap, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(forwarded) = headers.get("x-forwarded-for") {
            if let Ok(s) = forwarded.to_str() {
                if let Some(first) = s.split(',').next() {
                    if let Ok(addr) = first.trim().parse::<IpAddr>() {
                        return addr.to_string();
                    }
                }
            }
        }

        if let Some(real_ip) = headers.get("x-real-ip") {
            if let Ok(s) = real_ip.to_str() {
                if let Ok(addr) = s.parse::<IpAddr>() {
                    return addr.to_string();
                }
            }
        }
    }

    // 直连部署由反向代理之外的层兜底
    "127.0.0.1".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_respects_trust_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());

        assert_eq!(client_ip(&headers, true), "203.0.113.7");
        // 不信任代理时忽略代理头
        assert_eq!(client_ip(&headers, false), "127.0.0.1");
    }

    #[test]
    fn test_client_ip_real_ip_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());

        assert_eq!(client_ip(&headers, true), "198.51.100.2");
    }

    #[test]
    fn test_client_ip_rejects_garbage_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "not-an-ip".parse().unwrap());

        assert_eq!(client_ip(&headers, true), "127.0.0.1");
    }
}
