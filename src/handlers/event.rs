//! 事件查询处理器（仅管理域）

use crate::{
    auth::middleware::AuthContext,
    context::run_with_context,
    error::AppError,
    middleware::AppState,
    models::audit::{EventCursor, EventFilters, EventPage},
};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    pub tenant_id: Option<Uuid>,
    pub name: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

/// 事件列表（键集分页，倒序）。
/// events 的行隔离策略只对管理域放行读取，查询在管理域
/// 上下文作用域内执行。
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Query(query): Query<EventQuery>,
) -> Result<impl IntoResponse, AppError> {
    let cursor = match &query.cursor {
        Some(raw) => Some(EventCursor::decode(raw)?),
        None => None,
    };

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let filters = EventFilters {
        tenant_id: query.tenant_id,
        name: query.name,
        from: query.from,
        to: query.to,
    };

    let ctx = auth.security_context();
    let audit_service = state.audit_service.clone();

    let page: EventPage = run_with_context(&state.db, &ctx, move |tx| {
        async move {
            audit_service
                .list_events(tx, &filters, cursor.as_ref(), limit)
                .await
        }
        .boxed()
    })
    .await?;

    Ok(Json(page))
}
