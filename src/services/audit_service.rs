//! 审计与事件派生服务
//!
//! 审计记录随业务变更在同一事务内提交（或在分离路径上尽力写入）；
//! 派生事件在提交之后由分离任务生成，失败只记日志，绝不影响调用方。

use crate::{
    error::AppError,
    models::audit::{
        AuditEntry, AuditRecord, EventCursor, EventFilters, EventPage, EventRecord,
    },
    repository::AuditRepository,
};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::Arc;

/// 审计操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    // 认证相关
    LoginSuccess,
    LoginFailure,
    Logout,
    TokenRefresh,
    ReplayDetected,
    RateLimitThreshold,
    PasswordResetRequest,
    VerificationResendRequest,

    // 购物车相关
    CartCreate,
    CartItemAdd,
    CartItemRemove,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::LoginSuccess => "auth.login",
            AuditAction::LoginFailure => "auth.login_failed",
            AuditAction::Logout => "auth.logout",
            AuditAction::TokenRefresh => "auth.refresh",
            AuditAction::ReplayDetected => "auth.replay_detected",
            AuditAction::RateLimitThreshold => "auth.rate_limit_threshold",
            AuditAction::PasswordResetRequest => "auth.password_reset_request",
            AuditAction::VerificationResendRequest => "auth.verification_resend_request",

            AuditAction::CartCreate => "cart.create",
            AuditAction::CartItemAdd => "cart.item_add",
            AuditAction::CartItemRemove => "cart.item_remove",
        }
    }
}

/// 事件注册表条目
#[derive(Debug, Clone)]
pub struct EventMapping {
    pub name: &'static str,
    pub version: i16,
    pub origin: bool,
}

/// 审计操作 → 事件的映射。启动时构建一次，经 AppState 注入，
/// 没有全局可变状态。未注册的操作不派生事件。
pub struct EventRegistry {
    map: HashMap<&'static str, EventMapping>,
}

/// 事件名的创建后缀：以它结尾的事件自动标记 origin
pub const ORIGIN_SUFFIX: &str = ".CREATED";

impl EventRegistry {
    pub fn with_defaults() -> Self {
        let mut map = HashMap::new();

        let mut register = |action: AuditAction, name: &'static str, version: i16, origin: bool| {
            map.insert(action.as_str(), EventMapping { name, version, origin });
        };

        register(AuditAction::LoginSuccess, "AUTH.LOGIN", 1, false);
        register(AuditAction::Logout, "AUTH.LOGOUT", 1, false);
        register(AuditAction::ReplayDetected, "AUTH.REPLAY_DETECTED", 1, false);
        register(AuditAction::CartCreate, "CART.CREATED", 1, false);
        register(AuditAction::CartItemAdd, "CART.ITEM_ADDED", 1, false);
        register(AuditAction::CartItemRemove, "CART.ITEM_REMOVED", 1, false);

        Self { map }
    }

    pub fn resolve(&self, action: &str) -> Option<&EventMapping> {
        self.map.get(action)
    }
}

/// 载荷键名的固定拒绝名单：命中则放弃派生（审计记录不受影响）
const SECRET_KEY_FRAGMENTS: &[&str] = &["password", "token", "secret", "key", "hash"];

/// 递归扫描 JSON 对象的键名。返回命中的键名（若有）。
pub fn find_secret_key(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, nested) in map {
                let lowered = key.to_lowercase();
                if SECRET_KEY_FRAGMENTS.iter().any(|f| lowered.contains(f)) {
                    return Some(key.clone());
                }
                if let Some(hit) = find_secret_key(nested) {
                    return Some(hit);
                }
            }
            None
        }
        serde_json::Value::Array(items) => items.iter().find_map(find_secret_key),
        _ => None,
    }
}

pub struct AuditService {
    db: PgPool,
    registry: Arc<EventRegistry>,
}

impl AuditService {
    pub fn new(db: PgPool, registry: Arc<EventRegistry>) -> Self {
        Self { db, registry }
    }

    /// 在调用方事务内写入审计记录（业务变更与审计同生共死）
    pub async fn record(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        entry: AuditEntry,
    ) -> Result<AuditRecord, AppError> {
        AuditRepository::insert(tx, &entry).await
    }

    /// 分离路径写入审计记录：错误只记日志，不打断调用方。
    /// 登录失败的审计不能反过来破坏登录应答。
    pub async fn record_detached(&self, entry: AuditEntry) -> Option<AuditRecord> {
        match AuditRepository::insert_detached(&self.db, &entry).await {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    action = %entry.action,
                    error = %e,
                    "Detached audit write failed"
                );
                None
            }
        }
    }

    /// 提交后派发事件派生任务。分离执行：派生或写入失败
    /// 记 warn 后吞掉，绝不传播回调用方。
    pub fn publish_event(&self, record: AuditRecord) {
        let db = self.db.clone();
        let registry = self.registry.clone();

        tokio::spawn(async move {
            let event = match derive_event(&registry, &record) {
                Some(event) => event,
                None => return,
            };

            match AuditRepository::insert_event(&db, &event).await {
                Ok(true) => {
                    metrics::counter!("audit.events_derived_total").increment(1);
                }
                Ok(false) => {
                    // 重复派生（事件 id 已存在），幂等跳过
                    tracing::debug!(event_id = %event.id, "Event already derived");
                }
                Err(e) => {
                    tracing::warn!(
                        audit_id = %record.id,
                        event = %event.name,
                        error = %e,
                        "Event store failed"
                    );
                }
            }
        });
    }

    /// 管理域事件查询（键集分页，倒序）。
    /// 必须在管理域上下文作用域的事务内调用。
    pub async fn list_events(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        filters: &EventFilters,
        cursor: Option<&EventCursor>,
        limit: i64,
    ) -> Result<EventPage, AppError> {
        let mut events = AuditRepository::list_events(tx, filters, cursor, limit).await?;

        let next_cursor = if events.len() as i64 > limit {
            events.truncate(limit as usize);
            events
                .last()
                .map(|last| EventCursor::new(last.occurred_at, last.id).encode())
        } else {
            None
        };

        Ok(EventPage { events, next_cursor })
    }
}

/// 从审计记录确定性地派生事件。
/// 未注册的操作、或载荷键名命中拒绝名单时返回 None。
pub fn derive_event(registry: &EventRegistry, record: &AuditRecord) -> Option<EventRecord> {
    let mapping = registry.resolve(&record.action)?;

    let payload = record
        .after_json
        .clone()
        .unwrap_or_else(|| serde_json::json!({}));

    if let Some(key) = find_secret_key(&payload) {
        tracing::warn!(
            audit_id = %record.id,
            action = %record.action,
            %key,
            "Event derivation aborted: payload key matches secret denylist"
        );
        metrics::counter!("audit.events_dropped_secret_total").increment(1);
        return None;
    }

    let origin = mapping.origin || mapping.name.ends_with(ORIGIN_SUFFIX);

    Some(EventRecord {
        id: record.id,
        version: mapping.version,
        name: mapping.name.to_string(),
        occurred_at: record.created_at,
        tenant_id: record.tenant_id,
        realm: record.realm.clone(),
        actor_type: record.actor_type.clone(),
        actor_id: record.actor_id,
        entity_type: record.entity.clone(),
        entity_id: record.entity_id,
        payload,
        metadata: serde_json::json!({ "origin": origin }),
        audit_record_id: record.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audit::ActorType;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(action: AuditAction, after: Option<serde_json::Value>) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            realm: "tenant".to_string(),
            tenant_id: Some(Uuid::new_v4()),
            actor_type: ActorType::User.as_str().to_string(),
            actor_id: Some(Uuid::new_v4()),
            action: action.as_str().to_string(),
            entity: "cart_item".to_string(),
            entity_id: Some(Uuid::new_v4()),
            before_json: None,
            after_json: after,
            metadata_json: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let registry = EventRegistry::with_defaults();
        let record = record(
            AuditAction::CartItemAdd,
            Some(serde_json::json!({"quantity": 2})),
        );

        let event = derive_event(&registry, &record).unwrap();
        assert_eq!(event.id, record.id);
        assert_eq!(event.audit_record_id, record.id);
        assert_eq!(event.name, "CART.ITEM_ADDED");
        assert_eq!(event.occurred_at, record.created_at);
        assert_eq!(event.payload, serde_json::json!({"quantity": 2}));
        assert_eq!(event.metadata, serde_json::json!({"origin": false}));
    }

    #[test]
    fn test_origin_flag_from_suffix() {
        let registry = EventRegistry::with_defaults();
        let record = record(AuditAction::CartCreate, None);

        let event = derive_event(&registry, &record).unwrap();
        assert_eq!(event.name, "CART.CREATED");
        assert_eq!(event.metadata, serde_json::json!({"origin": true}));
    }

    #[test]
    fn test_unmapped_action_derives_nothing() {
        let registry = EventRegistry::with_defaults();
        let record = record(AuditAction::LoginFailure, None);
        assert!(derive_event(&registry, &record).is_none());
    }

    #[test]
    fn test_secret_denylist_aborts_derivation() {
        let registry = EventRegistry::with_defaults();
        let record = record(
            AuditAction::CartItemAdd,
            Some(serde_json::json!({"nested": {"api_token": "x"}})),
        );
        assert!(derive_event(&registry, &record).is_none());
    }

    #[test]
    fn test_find_secret_key_cases() {
        assert!(find_secret_key(&serde_json::json!({"Password": 1})).is_some());
        assert!(find_secret_key(&serde_json::json!({"items": [{"secret_ref": 1}]})).is_some());
        assert!(find_secret_key(&serde_json::json!({"token_hash": "x"})).is_some());
        assert!(find_secret_key(&serde_json::json!({"quantity": 2, "sku": "a"})).is_none());
        assert!(find_secret_key(&serde_json::json!("password")).is_none());
    }

    #[test]
    fn test_empty_payload_defaults_to_object() {
        let registry = EventRegistry::with_defaults();
        let record = record(AuditAction::LoginSuccess, None);
        let event = derive_event(&registry, &record).unwrap();
        assert_eq!(event.payload, serde_json::json!({}));
    }
}
