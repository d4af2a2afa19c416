//! 健康检查处理器
//! 提供 /health 和 /ready 端点

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::{db, middleware::AppState, rls};

/// 存活探针响应
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// 就绪探针响应
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub checks: Vec<HealthCheck>,
}

/// 健康检查项
#[derive(Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    fn healthy(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: "healthy".to_string(),
            message: None,
        }
    }

    fn unhealthy(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            status: "unhealthy".to_string(),
            message: Some(message),
        }
    }
}

/// 存活探针
/// 快速响应，不检查依赖
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// 就绪探针：数据库连通 + 隔离策略矩阵完整。
/// 策略被迁移外的手段改动过的实例在这里暴露为未就绪。
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> Json<ReadinessResponse> {
    let mut checks = Vec::new();

    db::record_pool_metrics(&state.db);

    checks.push(match db::ping(&state.db).await {
        Ok(()) => HealthCheck::healthy("database"),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness: database ping failed");
            HealthCheck::unhealthy("database", "connection failed".to_string())
        }
    });

    checks.push(match rls::verify_policies(&state.db).await {
        Ok(report) if report.is_clean() => HealthCheck::healthy("row_isolation"),
        Ok(report) => HealthCheck::unhealthy(
            "row_isolation",
            format!(
                "missing={} unexpected={} unforced={}",
                report.missing.len(),
                report.unexpected.len(),
                report.rls_not_forced.len()
            ),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness: policy verification failed");
            HealthCheck::unhealthy("row_isolation", "verification failed".to_string())
        }
    });

    let all_healthy = checks.iter().all(|c| c.status == "healthy");

    Json(ReadinessResponse {
        ready: all_healthy,
        checks,
    })
}
